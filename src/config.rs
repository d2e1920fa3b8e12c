//! # Configuration Management Module
//!
//! Device settings stored as TOML. Every knob the pipeline uses lives here:
//! pin assignments, detector thresholds and windows, task periods, the alert
//! threshold table and sink limits.
//!
//! ## Storage Location
//! - Linux: ~/.config/vitalcare/config.toml
//! - macOS: ~/Library/Application Support/vitalcare/config.toml
//! - Windows: %APPDATA%\vitalcare\config.toml
//!
//! Each section carries `#[serde(default)]`, so a file that only overrides a
//! couple of values is still valid.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pins: PinConfig,
    pub signal: SignalConfig,
    pub schedule: ScheduleConfig,
    pub alerts: AlertConfig,
    pub sms: SmsConfig,
    pub storage: StorageConfig,
    pub push: PushConfig,
}

/// GPIO / ADC pin assignments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub ecg_output: u8,
    pub pulse: u8,
    pub lead_off_plus: u8,
    pub lead_off_minus: u8,
    pub buzzer: u8,
    pub pulse_led: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            ecg_output: 36,
            pulse: 39,
            lead_off_plus: 18,
            lead_off_minus: 19,
            buzzer: 4,
            pulse_led: 2,
        }
    }
}

/// Detector thresholds and windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Rising-edge threshold for the optical pulse channel (12-bit code)
    pub pulse_threshold: u16,
    /// Peak threshold for the ECG channel (12-bit code)
    pub ecg_threshold: u16,
    pub pulse_window_ms: u64,
    /// No beat for this long forces the rate to zero
    pub liveness_timeout_ms: u64,
    pub ecg_refractory_ms: u64,
    pub ecg_beats_per_estimate: usize,
    pub min_valid_bpm: f32,
    pub max_bpm: f32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            pulse_threshold: 2048,
            ecg_threshold: 2000,
            pulse_window_ms: 15_000,
            liveness_timeout_ms: 10_000,
            ecg_refractory_ms: 300,
            ecg_beats_per_estimate: 10,
            min_valid_bpm: 40.0,
            max_bpm: 200.0,
        }
    }
}

/// Periods of the cooperative tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub sample_period_ms: u64,
    pub ui_period_ms: u64,
    pub log_period_ms: u64,
    /// Environmental sensor cadence; it is read on the first sampler tick
    /// at or after each period boundary
    pub env_period_ms: u64,
    /// Operator commands handled per poll
    pub commands_per_poll: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: 100,
            ui_period_ms: 1_000,
            log_period_ms: 30_000,
            env_period_ms: 1_000,
            commands_per_poll: 8,
        }
    }
}

/// Inclusive normal ranges and alert side effects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub hr_low: f32,
    pub hr_high: f32,
    pub systolic_low: f32,
    pub systolic_high: f32,
    pub spo2_low: f32,
    pub temp_low_f: f32,
    pub temp_high_f: f32,
    pub sms_debounce_ms: u64,
    pub beep_ms: u64,
    pub clinic_location: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            hr_low: 50.0,
            hr_high: 120.0,
            systolic_low: 80.0,
            systolic_high: 160.0,
            spo2_low: 90.0,
            temp_low_f: 95.0,
            temp_high_f: 102.0,
            sms_debounce_ms: 60_000,
            beep_ms: 100,
            clinic_location: "clinic".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub queue_capacity: usize,
    pub send_budget_ms: u64,
    pub probe_budget_ms: u64,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4,
            send_budget_ms: 5_000,
            probe_budget_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory standing in for the SD card root
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            root: data_dir.join("vitalcare"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Messages buffered per observer before new ones are dropped
    pub observer_buffer: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self { observer_buffer: 16 }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vitalcare")
            .join("config.toml")
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    /// Load config from `path`, or write and return the defaults if it doesn't exist
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(ConfigError::ParseFailed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::config_path())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.signal.pulse_threshold, 2048);
        assert_eq!(config.schedule.log_period_ms, 30_000);
        assert_eq!(config.alerts.hr_low, 50.0);
        assert_eq!(config.sms.queue_capacity, 4);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let toml_str = r#"
            [alerts]
            hr_low = 45.0
            clinic_location = "Ward 2"
        "#;

        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");
        assert_eq!(config.alerts.hr_low, 45.0);
        assert_eq!(config.alerts.hr_high, 120.0);
        assert_eq!(config.alerts.clinic_location, "Ward 2");
        assert_eq!(config.pins, PinConfig::default());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).expect("Failed to load config");
        assert!(path.exists());
        assert_eq!(config.signal, SignalConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.signal.ecg_threshold = 2200;
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_garbage_file_fails_to_parse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "pins = 7").unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::ParseFailed(_))));
    }
}
