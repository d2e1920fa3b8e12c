//! # Hardware Capabilities Module
//!
//! The pipeline never touches hardware directly. Everything it needs is
//! injected through the traits below, so tests and the bench binary can
//! swap in the fakes from `sim`.
//!
//! ## Capabilities
//! - `Clock`: monotonic millisecond counter, the only time base
//! - `AnalogIn` / `DigitalIn` / `DigitalOut`: pin-level I/O
//! - `EnvSensor`: temperature and barometric pressure
//! - `Oximeter`: optional SpO2 front-end
//! - `Storage` / `AppendWriter`: removable storage opened in append mode
//! - `ModemPort`: non-blocking serial line to the GSM modem
//!
//! Production implementations provided here: `MonotonicClock` and
//! `FsStorage` (a directory standing in for the SD card).

use crate::error::{ModemError, SensorFault, StorageError};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// 12-bit ADC access
pub trait AnalogIn {
    fn read(&mut self, pin: u8) -> u16;
}

pub trait DigitalIn {
    fn read(&mut self, pin: u8) -> bool;
}

pub trait DigitalOut {
    fn write(&mut self, pin: u8, high: bool);
}

pub trait EnvSensor {
    /// Bring the sensor up; `false` means it is absent for the whole run
    fn begin(&mut self) -> bool;
    fn read_temp_c(&mut self) -> Result<f32, SensorFault>;
    fn read_pressure_pa(&mut self) -> Result<f32, SensorFault>;
}

pub trait Oximeter {
    fn read_spo2_pct(&mut self) -> Result<f32, SensorFault>;
}

pub trait Storage {
    fn is_ready(&self) -> bool;
    fn open_append(&mut self, path: &str) -> Result<Box<dyn AppendWriter + '_>, StorageError>;
}

pub trait AppendWriter {
    /// Current file length in bytes
    fn size(&self) -> u64;
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Serial line to the modem. Reads never block.
pub trait ModemPort {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ModemError>;
    /// Next complete reply line, if one has arrived
    fn read_line(&mut self) -> Option<String>;
}

/// Milliseconds since construction, backed by `Instant`
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Append-only storage rooted at a directory
///
/// Paths handed to `open_append` are card-absolute (`/VCR..._1.csv`) and are
/// resolved below `root`.
pub struct FsStorage {
    root: PathBuf,
    ready: bool,
}

impl FsStorage {
    /// Mount the directory, creating it when needed
    pub fn mount(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let ready = match fs::create_dir_all(&root) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Storage root {} unavailable: {}", root.display(), e);
                false
            }
        };
        Self { root, ready }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Storage for FsStorage {
    fn is_ready(&self) -> bool {
        self.ready && self.root.is_dir()
    }

    fn open_append(&mut self, path: &str) -> Result<Box<dyn AppendWriter + '_>, StorageError> {
        if !self.is_ready() {
            return Err(StorageError::NotReady);
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.resolve(path))?;
        let size = file.metadata()?.len();
        Ok(Box::new(FileAppender { file, size }))
    }
}

struct FileAppender {
    file: File,
    size: u64,
}

impl AppendWriter for FileAppender {
    fn size(&self) -> u64 {
        self.size
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.file.write_all(bytes)?;
        self.file.flush()?;
        self.size += bytes.len() as u64;
        Ok(())
    }
}
