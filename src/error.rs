//! # Error Types Module
//!
//! Centralized error handling for the vitals pipeline.
//! One error type per concern, each with a human-readable `Display`.
//!
//! ## Error Types
//! - `SensorFault`: ECG lead-off and absent/failed sensor reads
//! - `StorageError`: removable storage not mounted or write failures
//! - `ModemError`: SMS modem missing, timing out or rejecting a command
//! - `RegistrationError`: invalid or conflicting patient registration
//! - `OperatorError`: operator command queue full or closed
//! - `ConfigError`: configuration file I/O and parsing errors
//!
//! ## Propagation
//! Sensor faults never leave the sampler; they become a sample `Quality`.
//! Storage and modem errors are logged by their sink and retried or dropped
//! there. Only registration errors are returned to a caller.

use std::fmt;

/// Faults raised while reading a sensor channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFault {
    /// ECG electrodes are not in contact with the patient
    LeadsOff,
    /// Sensor missing, not initialized, or the read failed this tick
    Absent,
}

impl fmt::Display for SensorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorFault::LeadsOff => write!(f, "ECG leads are disconnected"),
            SensorFault::Absent => write!(f, "Sensor is absent or did not respond"),
        }
    }
}

impl std::error::Error for SensorFault {}

/// Errors that can occur while appending to removable storage
#[derive(Debug)]
pub enum StorageError {
    /// Storage is not mounted or not initialized
    NotReady,
    /// Underlying file operation failed
    Io(std::io::Error),
    /// Row could not be encoded
    Encode(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotReady => write!(f, "Storage is not ready"),
            StorageError::Io(e) => write!(f, "Storage I/O failed: {}", e),
            StorageError::Encode(msg) => write!(f, "Failed to encode log row: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

/// Errors that can occur during an SMS exchange with the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemError {
    /// No modem attached, or it never answered the readiness probe
    NotReady,
    /// The dialog exceeded its time budget
    Timeout { stage: &'static str },
    /// The modem answered with an error
    Rejected { stage: &'static str, reply: String },
    /// Writing to the serial line failed
    Io(String),
}

impl fmt::Display for ModemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModemError::NotReady => write!(f, "Modem is not ready"),
            ModemError::Timeout { stage } => {
                write!(f, "Modem timed out while waiting for {}", stage)
            }
            ModemError::Rejected { stage, reply } => {
                write!(f, "Modem rejected {}: {}", stage, reply)
            }
            ModemError::Io(msg) => write!(f, "Modem serial write failed: {}", msg),
        }
    }
}

impl std::error::Error for ModemError {}

/// Errors returned to the caller of a patient registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Payload was not valid JSON
    InvalidJson(String),
    /// A required field was missing or empty
    MissingField(&'static str),
    /// Age outside the accepted range
    InvalidAge(i64),
    /// Another session is active and replacement was not requested
    AlreadyActive { id: String },
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::InvalidJson(msg) => write!(f, "Invalid JSON: {}", msg),
            RegistrationError::MissingField(field) => {
                write!(f, "Missing required field: {}", field)
            }
            RegistrationError::InvalidAge(age) => write!(f, "Invalid age: {}", age),
            RegistrationError::AlreadyActive { id } => {
                write!(f, "Patient {} is already registered", id)
            }
        }
    }
}

impl std::error::Error for RegistrationError {}

/// Errors seen by a transport submitting operator commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorError {
    /// The command queue is full; try again on a later request
    Busy,
    /// The pipeline has shut down
    Closed,
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorError::Busy => write!(f, "Operator command queue is full"),
            OperatorError::Closed => write!(f, "Pipeline is not running"),
        }
    }
}

impl std::error::Error for OperatorError {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::WriteFailed(e) => write!(f, "Failed to write config file: {}", e),
            ConfigError::ParseFailed(e) => write!(f, "Failed to parse config file: {}", e),
            ConfigError::SerializeFailed(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_sensor_fault_display() {
        assert!(SensorFault::LeadsOff.to_string().contains("leads"));
    }

    #[test]
    fn test_storage_error_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no card");
        let err = StorageError::from(io_err);
        assert!(err.source().is_some());
        assert!(StorageError::NotReady.source().is_none());
    }

    #[test]
    fn test_modem_timeout_names_stage() {
        let err = ModemError::Timeout { stage: "text mode" };
        assert_eq!(err.to_string(), "Modem timed out while waiting for text mode");
    }

    #[test]
    fn test_registration_error_display() {
        let err = RegistrationError::MissingField("name");
        assert_eq!(err.to_string(), "Missing required field: name");
    }

    #[test]
    fn test_config_error_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::ReadFailed(io_err);
        assert!(err.source().is_some());
    }
}
