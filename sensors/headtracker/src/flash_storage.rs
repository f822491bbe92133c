//! Non-volatile storage backends for the settings blob.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
#[cfg(test)]
use std::sync::{Arc, Mutex};

use log::info;

use crate::settings::StorageError;

/// Whole-blob flash access
pub trait Flash {
    /// Stored bytes, `None` when nothing has been written yet
    fn read_all(&mut self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the stored bytes
    fn write_all(&mut self, data: &[u8]) -> Result<(), StorageError>;
}

/// Host file standing in for the flash page
pub struct FileFlash {
    path: PathBuf,
}

impl FileFlash {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!("Settings file: {}", path.display());
        Self { path }
    }
}

impl Flash for FileFlash {
    fn read_all(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), StorageError> {
        // Write-then-rename so a crash never leaves half a blob behind
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory flash, shared between clones
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemoryFlash {
    inner: Arc<Mutex<MemoryPage>>,
}

#[cfg(test)]
#[derive(Default)]
struct MemoryPage {
    data: Option<Vec<u8>>,
    writes: usize,
}

#[cfg(test)]
impl MemoryFlash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preloaded with raw bytes
    pub fn with_data(data: Vec<u8>) -> Self {
        let flash = Self::new();
        flash.page().data = Some(data);
        flash
    }

    /// Number of completed writes
    pub fn writes(&self) -> usize {
        self.page().writes
    }

    /// Current raw contents
    pub fn data(&self) -> Option<Vec<u8>> {
        self.page().data.clone()
    }

    fn page(&self) -> std::sync::MutexGuard<'_, MemoryPage> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
impl Flash for MemoryFlash {
    fn read_all(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.page().data.clone())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let mut page = self.page();
        page.data = Some(data.to_vec());
        page.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_flash_shared_between_clones() {
        let flash = MemoryFlash::new();
        let mut writer = flash.clone();
        assert_eq!(writer.read_all().unwrap(), None);
        writer.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(flash.data(), Some(vec![1, 2, 3]));
        assert_eq!(flash.writes(), 1);
    }

    #[test]
    fn test_file_flash_missing_then_written() {
        let path = std::env::temp_dir().join(format!("ht-flash-{}.bin", std::process::id()));
        let _ = fs::remove_file(&path);

        let mut flash = FileFlash::new(&path);
        assert_eq!(flash.read_all().unwrap(), None);
        flash.write_all(b"HT\x01").unwrap();
        assert_eq!(flash.read_all().unwrap(), Some(b"HT\x01".to_vec()));
        assert!(!path.with_extension("tmp").exists());

        fs::remove_file(&path).unwrap();
    }
}
