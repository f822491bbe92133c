//! PARA Frame Monitor
//!
//! Decodes PARA trainer frames captured as hex, one frame per line, e.g.
//! from a BLE sniffer or the head tracker's debug log:
//!
//! ```text
//! 7E 80 DC 5D C5 DC 5D C5 DC 5D C5 DC 5D C5 80 7E
//! ```
//!
//! Bad lines are counted and reported, never fatal.
//!
//! Run with: cargo run -p para-monitor -- [--json] [FILE]

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(author, version, about = "Decode PARA trainer frames from hex lines")]
struct Args {
    /// Print one JSON object per frame
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Capture file (stdin when omitted)
    file: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
enum LineError {
    #[error("odd number of hex digits")]
    OddLength,
    #[error("invalid hex digit '{0}'")]
    BadDigit(char),
    #[error(transparent)]
    Frame(#[from] para::FrameError),
}

/// One decoded line
#[derive(Debug, Serialize)]
struct FrameReport<'a> {
    line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<&'a [u16]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
struct Totals {
    frames: usize,
    bad: usize,
}

/// Hex digits to bytes; whitespace, `:` and `0x` prefixes are ignored
fn parse_hex(line: &str) -> Result<Vec<u8>, LineError> {
    let digits: Vec<char> = line
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(LineError::OddLength);
    }

    digits
        .chunks(2)
        .map(|pair| {
            let hi = pair[0].to_digit(16).ok_or(LineError::BadDigit(pair[0]))?;
            let lo = pair[1].to_digit(16).ok_or(LineError::BadDigit(pair[1]))?;
            Ok((hi * 16 + lo) as u8)
        })
        .collect()
}

fn decode_line(line: &str) -> Result<Vec<u16>, LineError> {
    let bytes = parse_hex(line)?;
    Ok(para::decode(&bytes)?)
}

fn format_channels(channels: &[u16]) -> String {
    channels
        .iter()
        .enumerate()
        .map(|(i, c)| format!("ch{}={}", i + 1, c))
        .collect::<Vec<_>>()
        .join(" ")
}

fn monitor(reader: impl BufRead, json: bool) -> io::Result<Totals> {
    let mut totals = Totals::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let number = index + 1;
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let result = decode_line(&line);
        match &result {
            Ok(_) => totals.frames += 1,
            Err(e) => {
                totals.bad += 1;
                warn!("line {}: {}", number, e);
            }
        }

        if json {
            let report = FrameReport {
                line: number,
                channels: result.as_ref().ok().map(Vec::as_slice),
                error: result.as_ref().err().map(ToString::to_string),
            };
            match serde_json::to_string(&report) {
                Ok(text) => println!("{}", text),
                Err(e) => warn!("line {}: cannot serialize: {}", number, e),
            }
        } else if let Ok(channels) = &result {
            println!("{:5}: {}", number, format_channels(channels));
        }
    }

    Ok(totals)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let totals = match &args.file {
        Some(path) => match File::open(path) {
            Ok(file) => monitor(BufReader::new(file), args.json),
            Err(e) => {
                eprintln!("Cannot open {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => monitor(io::stdin().lock(), args.json),
    };

    match totals {
        Ok(totals) => info!("{} frames decoded, {} bad", totals.frames, totals.bad),
        Err(e) => {
            eprintln!("Read failed: {}", e);
            std::process::exit(1);
        }
    }
}
