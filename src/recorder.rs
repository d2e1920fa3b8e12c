//! # Recording Module
//!
//! Appends one CSV row per log tick to the active session's file on
//! removable storage.
//!
//! ## File Layout
//! ```text
//! /<session id>_<session start in seconds>.csv
//! timestamp,heartRate,systolicBP,diastolicBP,spO2,temperature,ecgValue,pressure,status
//! 30000,72.0,121.0,79.0,95.0,98.6,0,1013.3,Normal
//! ```
//!
//! ## Behavior
//! 1. No-op while no session is active or storage is not ready
//! 2. The header is written only when the file is empty
//! 3. A failed write is logged and the next tick tries again with a fresh row;
//!    nothing is buffered
//! 4. Rows never go back in time within one file

use crate::error::StorageError;
use crate::hal::Storage;
use crate::session::PatientSession;
use crate::vitals::{Status, VitalsSnapshot};
use serde::Serialize;

/// One CSV row, a flat projection of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRow {
    pub timestamp: u64,
    #[serde(rename = "heartRate")]
    pub heart_rate: f32,
    #[serde(rename = "systolicBP")]
    pub systolic_bp: f32,
    #[serde(rename = "diastolicBP")]
    pub diastolic_bp: f32,
    #[serde(rename = "spO2")]
    pub spo2: f32,
    pub temperature: f32,
    #[serde(rename = "ecgValue")]
    pub ecg_value: i32,
    pub pressure: f32,
    pub status: Status,
}

fn one_decimal(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}

impl From<&VitalsSnapshot> for LogRow {
    fn from(snapshot: &VitalsSnapshot) -> Self {
        Self {
            timestamp: snapshot.t_ms,
            heart_rate: one_decimal(snapshot.hr_bpm),
            systolic_bp: one_decimal(snapshot.sys_mmhg),
            diastolic_bp: one_decimal(snapshot.dia_mmhg),
            spo2: one_decimal(snapshot.spo2_pct),
            temperature: one_decimal(snapshot.temp_f),
            ecg_value: snapshot.ecg_code,
            pressure: one_decimal(snapshot.baro_hpa),
            status: snapshot.status,
        }
    }
}

impl LogRow {
    /// Encode as CSV, with the header line first when `with_header` is set
    pub fn to_csv(&self, with_header: bool) -> Result<Vec<u8>, StorageError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(with_header)
            .from_writer(Vec::new());
        writer
            .serialize(self)
            .map_err(|e| StorageError::Encode(e.to_string()))?;
        writer
            .into_inner()
            .map_err(|e| StorageError::Encode(e.to_string()))
    }
}

/// What a log tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    Written,
    NoSession,
    NotReady,
    /// Snapshot older than the last row in this file
    Stale,
    Failed,
}

#[derive(Debug, Default)]
pub struct LogSink {
    current_path: Option<String>,
    last_row_ms: Option<u64>,
    rows_logged: u64,
    failures: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one row for `snapshot` if a session is active and storage is up
    pub fn tick(
        &mut self,
        snapshot: &VitalsSnapshot,
        session: Option<&PatientSession>,
        storage: &mut dyn Storage,
    ) -> LogOutcome {
        let Some(session) = session else {
            return LogOutcome::NoSession;
        };
        if !storage.is_ready() {
            log::debug!("Storage not ready, skipping log row");
            return LogOutcome::NotReady;
        }

        let path = session.log_path();
        if self.current_path.as_deref() != Some(path.as_str()) {
            self.current_path = Some(path.clone());
            self.last_row_ms = None;
        }
        if let Some(last) = self.last_row_ms {
            if snapshot.t_ms < last {
                log::warn!("Snapshot at {} ms is older than last row, skipped", snapshot.t_ms);
                return LogOutcome::Stale;
            }
        }

        match append_row(storage, &path, &LogRow::from(snapshot)) {
            Ok(()) => {
                self.last_row_ms = Some(snapshot.t_ms);
                self.rows_logged += 1;
                log::debug!("Logged row at {} ms to {}", snapshot.t_ms, path);
                LogOutcome::Written
            }
            Err(e) => {
                self.failures += 1;
                log::error!(
                    "Failed to log vitals to {} (failure {}): {}",
                    path,
                    self.failures,
                    e
                );
                LogOutcome::Failed
            }
        }
    }

    pub fn rows_logged(&self) -> u64 {
        self.rows_logged
    }
}

fn append_row(storage: &mut dyn Storage, path: &str, row: &LogRow) -> Result<(), StorageError> {
    let mut file = storage.open_append(path)?;
    let bytes = row.to_csv(file.size() == 0)?;
    file.write_all(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::FsStorage;
    use crate::sim::MemStorage;
    use crate::vitals::SensorHealth;
    use tempfile::tempdir;

    const HEADER: &str =
        "timestamp,heartRate,systolicBP,diastolicBP,spO2,temperature,ecgValue,pressure,status";

    fn snapshot(t_ms: u64) -> VitalsSnapshot {
        let mut s = VitalsSnapshot::initial(
            t_ms,
            SensorHealth {
                ecg: true,
                pulse: true,
                temp: true,
                baro: true,
            },
        );
        s.hr_bpm = 72.0;
        s.sys_mmhg = 121.0;
        s.dia_mmhg = 79.0;
        s.spo2_pct = 95.0;
        s.temp_f = 98.6;
        s.baro_hpa = 1013.25;
        s.status = Status::Normal;
        s
    }

    fn session() -> PatientSession {
        PatientSession {
            id: "VCR1000123".to_string(),
            name: "A".to_string(),
            age: 30,
            gender: "F".to_string(),
            contact: String::new(),
            emergency_contact: String::new(),
            medical_notes: String::new(),
            started_at_ms: 1000,
            registered: true,
        }
    }

    #[test]
    fn test_row_csv_layout() {
        let bytes = LogRow::from(&snapshot(30_000)).to_csv(true).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "30000,72.0,121.0,79.0,95.0,98.6,0,1013.3,Normal");
    }

    #[test]
    fn test_header_written_once() {
        let mut storage = MemStorage::new(true);
        let mut sink = LogSink::new();
        let patient = session();

        for t in [30_000, 60_000, 90_000] {
            assert_eq!(sink.tick(&snapshot(t), Some(&patient), &mut storage), LogOutcome::Written);
        }

        let text = storage.contents("/VCR1000123_1.csv").unwrap();
        assert_eq!(text.lines().filter(|l| *l == HEADER).count(), 1);
        assert_eq!(text.lines().count(), 4);
        assert_eq!(sink.rows_logged(), 3);
    }

    #[test]
    fn test_no_session_or_storage_is_noop() {
        let mut storage = MemStorage::new(false);
        let mut sink = LogSink::new();

        assert_eq!(sink.tick(&snapshot(30_000), None, &mut storage), LogOutcome::NoSession);
        let patient = session();
        assert_eq!(
            sink.tick(&snapshot(30_000), Some(&patient), &mut storage),
            LogOutcome::NotReady
        );
        assert!(storage.file_names().is_empty());

        // Storage coming up later is picked up on the next tick
        storage.set_ready(true);
        assert_eq!(sink.tick(&snapshot(60_000), Some(&patient), &mut storage), LogOutcome::Written);
    }

    #[test]
    fn test_rows_never_go_back_in_time() {
        let mut storage = MemStorage::new(true);
        let mut sink = LogSink::new();
        let patient = session();

        sink.tick(&snapshot(60_000), Some(&patient), &mut storage);
        assert_eq!(sink.tick(&snapshot(30_000), Some(&patient), &mut storage), LogOutcome::Stale);
        assert_eq!(sink.tick(&snapshot(60_000), Some(&patient), &mut storage), LogOutcome::Written);

        let text = storage.contents("/VCR1000123_1.csv").unwrap();
        let stamps: Vec<u64> = text
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(stamps, vec![60_000, 60_000]);
    }

    #[test]
    fn test_appends_to_directory_storage() {
        let dir = tempdir().unwrap();
        let mut storage = FsStorage::mount(dir.path());
        let mut sink = LogSink::new();
        let patient = session();

        sink.tick(&snapshot(30_000), Some(&patient), &mut storage);
        sink.tick(&snapshot(60_000), Some(&patient), &mut storage);

        let text = std::fs::read_to_string(dir.path().join("VCR1000123_1.csv")).unwrap();
        assert!(text.starts_with(HEADER));
        assert_eq!(text.lines().count(), 3);
    }
}
