//! Remote commands from the BLE configuration service
//!
//! The BLE write handlers only enqueue; the sampling loop drains the queue
//! at the start of each tick, so every state change happens on one thread.

use std::sync::mpsc::{self, Receiver, Sender};

use orientation_engine::{AxisMapping, ChannelOrder};

/// Command written by a connected central
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Make the current pose the zero orientation
    OrientationReset,
    /// Store default settings, then reboot
    FactoryReset,
    Reboot,
    DeviceNameChanged(String),
    /// Raw routing bytes for roll, pitch, yaw
    AxisMappingChanged([u8; 3]),
    /// Channel block layout (offset, order, enabled mask)
    ChannelLayoutChanged(ChannelOrder),
}

impl RemoteCommand {
    /// Parse a console line, e.g. `reset`, `name Goggles`, `map 16 17 18`,
    /// `layout 0 2 7`
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next()?.to_lowercase().as_str() {
            "reset" | "center" => RemoteCommand::OrientationReset,
            "factory" => RemoteCommand::FactoryReset,
            "reboot" => RemoteCommand::Reboot,
            "name" => {
                let name = words.collect::<Vec<_>>().join(" ");
                if name.is_empty() {
                    return None;
                }
                return Some(RemoteCommand::DeviceNameChanged(name));
            }
            "map" => {
                let bytes = parse_u8_triple(&mut words)?;
                RemoteCommand::AxisMappingChanged(bytes)
            }
            "layout" => {
                let [offset, order, enabled_mask] = parse_u8_triple(&mut words)?;
                RemoteCommand::ChannelLayoutChanged(ChannelOrder {
                    offset,
                    order,
                    enabled_mask,
                })
            }
            _ => return None,
        };
        // Trailing words make the line ambiguous
        words.next().is_none().then_some(command)
    }
}

fn parse_u8_triple<'a>(words: &mut impl Iterator<Item = &'a str>) -> Option<[u8; 3]> {
    let mut out = [0u8; 3];
    for slot in &mut out {
        let word = words.next()?;
        *slot = match word.strip_prefix("0x") {
            Some(hex) => u8::from_str_radix(hex, 16).ok()?,
            None => word.parse().ok()?,
        };
    }
    Some(out)
}

/// Reacts to remote commands
pub trait CommandHandler {
    fn on_orientation_reset(&mut self);
    fn on_factory_reset(&mut self);
    fn on_reboot(&mut self);
    fn on_device_name_changed(&mut self, name: String);
    fn on_axis_mapping_changed(&mut self, mapping: [AxisMapping; 3]);
    fn on_channel_layout_changed(&mut self, layout: ChannelOrder);
}

/// Route one command to its handler method
pub fn dispatch<H: CommandHandler + ?Sized>(handler: &mut H, command: RemoteCommand) {
    match command {
        RemoteCommand::OrientationReset => handler.on_orientation_reset(),
        RemoteCommand::FactoryReset => handler.on_factory_reset(),
        RemoteCommand::Reboot => handler.on_reboot(),
        RemoteCommand::DeviceNameChanged(name) => handler.on_device_name_changed(name),
        RemoteCommand::AxisMappingChanged(bytes) => {
            handler.on_axis_mapping_changed(bytes.map(AxisMapping))
        }
        RemoteCommand::ChannelLayoutChanged(layout) => handler.on_channel_layout_changed(layout),
    }
}

/// Producer side, cloned into each write handler
pub type CommandSender = Sender<RemoteCommand>;

/// Consumer side, owned by the sampling loop
pub struct CommandQueue {
    rx: Receiver<RemoteCommand>,
}

pub fn command_channel() -> (CommandSender, CommandQueue) {
    let (tx, rx) = mpsc::channel();
    (tx, CommandQueue { rx })
}

impl CommandQueue {
    /// Next queued command, never blocks
    pub fn try_next(&self) -> Option<RemoteCommand> {
        self.rx.try_recv().ok()
    }
}
