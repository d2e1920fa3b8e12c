//! VitalCare: real-time vitals pipeline for a rural bedside monitor.
//!
//! Samples ECG, optical pulse and environmental channels, derives heart rate
//! and a blood-pressure estimate, and fans the current reading set out to
//! live observers, a per-patient CSV log and threshold-driven SMS alerts.
//! Hardware is injected through the traits in [`hal`]; [`sim`] provides
//! deterministic stand-ins.

pub mod aggregator;
pub mod alert;
pub mod app;
pub mod config;
pub mod error;
pub mod hal;
pub mod operator;
pub mod push;
pub mod recorder;
pub mod scheduler;
pub mod sensor;
pub mod session;
pub mod signal;
pub mod sim;
pub mod sms;
pub mod timeseries;
pub mod vitals;
