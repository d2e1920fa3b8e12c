//! # Alert Arbitration Module
//!
//! Checks vitals against the inclusive normal ranges, sounds the buzzer and
//! decides whether an SMS goes out.
//!
//! ## SMS Preconditions
//! 1. A session is active with a non-empty emergency contact
//! 2. The modem answered its probe
//! 3. No SMS for the same set of violated fields in the debounce window
//!
//! No message is sent when the vitals return to normal.

use crate::config::AlertConfig;
use crate::hal::DigitalOut;
use crate::session::PatientSession;
use crate::sms::{SmsJob, SmsSink};
use crate::vitals::{Field, FieldSet, Status, VitalsSnapshot};
use lru::LruCache;
use std::collections::VecDeque;
use std::num::NonZeroUsize;

/// Field sets remembered for debouncing
const DEBOUNCE_SLOTS: usize = 16;
/// Alert records kept for the current session
const HISTORY_LIMIT: usize = 256;

/// Inclusive normal ranges
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub hr_low: f32,
    pub hr_high: f32,
    pub systolic_low: f32,
    pub systolic_high: f32,
    pub spo2_low: f32,
    pub temp_low_f: f32,
    pub temp_high_f: f32,
}

impl From<&AlertConfig> for Thresholds {
    fn from(config: &AlertConfig) -> Self {
        Self {
            hr_low: config.hr_low,
            hr_high: config.hr_high,
            systolic_low: config.systolic_low,
            systolic_high: config.systolic_high,
            spo2_low: config.spo2_low,
            temp_low_f: config.temp_low_f,
            temp_high_f: config.temp_high_f,
        }
    }
}

impl Thresholds {
    /// Fields outside their normal range
    ///
    /// Heart rate and blood pressure are skipped while no rate is available
    /// (`hr_bpm == 0`), since both are zero then.
    pub fn violations(&self, hr_bpm: f32, sys_mmhg: f32, spo2_pct: f32, temp_f: f32) -> FieldSet {
        let mut set = FieldSet::empty();
        if hr_bpm > 0.0 {
            if hr_bpm < self.hr_low || hr_bpm > self.hr_high {
                set.insert(Field::HeartRate);
            }
            if sys_mmhg < self.systolic_low || sys_mmhg > self.systolic_high {
                set.insert(Field::BloodPressure);
            }
        }
        if spo2_pct < self.spo2_low {
            set.insert(Field::Spo2);
        }
        if temp_f < self.temp_low_f || temp_f > self.temp_high_f {
            set.insert(Field::Temperature);
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    fn of(fields: FieldSet) -> Self {
        if fields.len() >= 2 {
            Severity::Critical
        } else {
            Severity::Warning
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRecord {
    pub snapshot_t_ms: u64,
    pub triggered_fields: FieldSet,
    pub severity: Severity,
    pub sms_queued: bool,
}

/// Output pin held high for a while, then released by `service`
#[derive(Debug, Clone)]
pub struct Indicator {
    pin: u8,
    on_until: Option<u64>,
}

impl Indicator {
    pub fn new(pin: u8) -> Self {
        Self { pin, on_until: None }
    }

    pub fn pulse(&mut self, out: &mut dyn DigitalOut, now: u64, duration_ms: u64) {
        out.write(self.pin, true);
        self.on_until = Some(now + duration_ms);
    }

    pub fn service(&mut self, out: &mut dyn DigitalOut, now: u64) {
        if let Some(until) = self.on_until {
            if now >= until {
                out.write(self.pin, false);
                self.on_until = None;
            }
        }
    }
}

fn describe(field: Field, snapshot: &VitalsSnapshot) -> String {
    match field {
        Field::HeartRate => format!("Heart Rate: {:.0} BPM. ", snapshot.hr_bpm),
        Field::BloodPressure => format!(
            "Blood Pressure: {:.0}/{:.0} mmHg. ",
            snapshot.sys_mmhg, snapshot.dia_mmhg
        ),
        Field::Spo2 => format!("SpO2: {:.0}%. ", snapshot.spo2_pct),
        Field::Temperature => format!("Temperature: {:.1}°F. ", snapshot.temp_f),
    }
}

/// `ALERT: <name> - <field: value>... Location: <clinic>`
pub fn compose_sms(patient_name: &str, snapshot: &VitalsSnapshot, location: &str) -> String {
    let details: String = snapshot
        .violations
        .iter()
        .map(|field| describe(field, snapshot))
        .collect();
    format!("ALERT: {} - {}Location: {}", patient_name, details, location)
}

pub struct AlertArbiter {
    debounce_ms: u64,
    beep_ms: u64,
    location: String,
    buzzer: Indicator,
    last_sms: LruCache<FieldSet, u64>,
    history: VecDeque<AlertRecord>,
    alerting: bool,
}

impl AlertArbiter {
    pub fn new(config: &AlertConfig, buzzer_pin: u8) -> Self {
        let slots = NonZeroUsize::new(DEBOUNCE_SLOTS).unwrap_or(NonZeroUsize::MIN);
        Self {
            debounce_ms: config.sms_debounce_ms,
            beep_ms: config.beep_ms,
            location: config.clinic_location.clone(),
            buzzer: Indicator::new(buzzer_pin),
            last_sms: LruCache::new(slots),
            history: VecDeque::new(),
            alerting: false,
        }
    }

    /// React to a freshly published snapshot
    pub fn observe(
        &mut self,
        snapshot: &VitalsSnapshot,
        session: Option<&PatientSession>,
        sms: &mut SmsSink,
        out: &mut dyn DigitalOut,
    ) -> Option<AlertRecord> {
        if snapshot.status != Status::Alert {
            if self.alerting && snapshot.status != Status::NoPatient {
                log::info!("Vitals back within thresholds");
            }
            self.alerting = false;
            return None;
        }
        self.alerting = true;

        let fields = snapshot.violations;
        self.buzzer.pulse(out, snapshot.t_ms, self.beep_ms);
        log::warn!(
            "ALERT at {} ms: {}",
            snapshot.t_ms,
            fields
                .iter()
                .map(|f| describe(f, snapshot))
                .collect::<String>()
                .trim_end()
        );

        let sms_queued = self.maybe_send(snapshot, session, sms);
        let record = AlertRecord {
            snapshot_t_ms: snapshot.t_ms,
            triggered_fields: fields,
            severity: Severity::of(fields),
            sms_queued,
        };
        if self.history.len() >= HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(record.clone());
        Some(record)
    }

    fn maybe_send(
        &mut self,
        snapshot: &VitalsSnapshot,
        session: Option<&PatientSession>,
        sms: &mut SmsSink,
    ) -> bool {
        let Some(patient) = session.filter(|s| !s.emergency_contact.is_empty()) else {
            log::debug!("No emergency contact, SMS skipped");
            return false;
        };
        if !sms.is_ready() {
            log::debug!("SMS channel not ready, SMS skipped");
            return false;
        }
        let fields = snapshot.violations;
        if let Some(&sent_at) = self.last_sms.get(&fields) {
            if snapshot.t_ms.saturating_sub(sent_at) < self.debounce_ms {
                return false;
            }
        }

        let job = SmsJob {
            to: patient.emergency_contact.clone(),
            body: compose_sms(&patient.name, snapshot, &self.location),
            fields,
        };
        match sms.submit(job) {
            Ok(()) => {
                self.last_sms.put(fields, snapshot.t_ms);
                true
            }
            Err(e) => {
                log::warn!("Could not queue SMS: {}", e);
                false
            }
        }
    }

    /// Release the buzzer once its beep has elapsed
    pub fn service(&mut self, out: &mut dyn DigitalOut, now: u64) {
        self.buzzer.service(out, now);
    }

    pub fn history(&self) -> impl Iterator<Item = &AlertRecord> {
        self.history.iter()
    }

    /// Forget alert history and debounce state at a session boundary
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_sms.clear();
        self.alerting = false;
    }
}
