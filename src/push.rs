//! # Push Sink Module
//!
//! Fans the latest snapshot out to connected operator observers as JSON
//! text records. Each observer is a bounded channel; a full observer misses
//! that record and a disconnected one is pruned on the next broadcast.
//!
//! ## Records
//! ```text
//! {"type":"vitals","heartRate":..,"systolicBP":..,"diastolicBP":..,"spO2":..,
//!  "temperature":..,"ecgValue":..,"pressure":..,"timestamp":..,"status":".."}
//! {"type":"init","patientRegistered":true,"patient":{"name":..,"age":..,"gender":..}}
//! ```
//!
//! Serialization is kept in plain functions so it can be tested without any
//! observer attached.

use crate::session::PatientSession;
use crate::vitals::{Status, VitalsSnapshot};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsRecord {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub heart_rate: f32,
    #[serde(rename = "systolicBP")]
    pub systolic_bp: f32,
    #[serde(rename = "diastolicBP")]
    pub diastolic_bp: f32,
    #[serde(rename = "spO2")]
    pub spo2: f32,
    pub temperature: f32,
    pub ecg_value: i32,
    pub pressure: f32,
    pub timestamp: u64,
    pub status: Status,
}

impl From<&VitalsSnapshot> for VitalsRecord {
    fn from(snapshot: &VitalsSnapshot) -> Self {
        Self {
            kind: "vitals",
            heart_rate: snapshot.hr_bpm,
            systolic_bp: snapshot.sys_mmhg,
            diastolic_bp: snapshot.dia_mmhg,
            spo2: snapshot.spo2_pct,
            temperature: snapshot.temp_f,
            ecg_value: snapshot.ecg_code,
            pressure: snapshot.baro_hpa,
            timestamp: snapshot.t_ms,
            status: snapshot.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientSummary {
    pub name: String,
    pub age: u32,
    pub gender: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRecord {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub patient_registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<PatientSummary>,
}

impl InitRecord {
    pub fn new(session: Option<&PatientSession>) -> Self {
        Self {
            kind: "init",
            patient_registered: session.is_some(),
            patient: session.map(|s| PatientSummary {
                name: s.name.clone(),
                age: s.age,
                gender: s.gender.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDetails {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub contact: String,
    pub emergency_contact: String,
    pub medical_conditions: String,
    /// Uptime at registration, `H:MM:SS`
    pub registration_time: String,
}

/// Answer to a "current patient" query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientView {
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<PatientDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl PatientView {
    pub fn new(session: Option<&PatientSession>) -> Self {
        match session {
            Some(s) => Self {
                registered: true,
                patient: Some(PatientDetails {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    age: s.age,
                    gender: s.gender.clone(),
                    contact: s.contact.clone(),
                    emergency_contact: s.emergency_contact.clone(),
                    medical_conditions: s.medical_notes.clone(),
                    registration_time: format_uptime(s.started_at_ms),
                }),
                message: None,
            },
            None => Self {
                registered: false,
                patient: None,
                message: Some("No patient registered"),
            },
        }
    }
}

/// Device health summary for the operator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub status: Status,
    pub uptime: String,
    pub sd_card_ready: bool,
    pub sim800_ready: bool,
    pub bmp180_ready: bool,
    pub patient_registered: bool,
    pub observers: usize,
    pub sms_sent: u64,
    pub sms_failed: u64,
    pub rows_logged: u64,
}

/// Milliseconds of uptime as `H:MM:SS`
pub fn format_uptime(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Serialize a record, logging instead of failing
pub fn to_json<T: Serialize>(record: &T) -> Option<String> {
    match serde_json::to_string(record) {
        Ok(json) => Some(json),
        Err(e) => {
            log::error!("Failed to serialize record: {}", e);
            None
        }
    }
}

struct Observer {
    id: u64,
    tx: Sender<String>,
}

pub struct PushSink {
    observers: Vec<Observer>,
    buffer: usize,
    next_id: u64,
    latest: Option<Arc<VitalsSnapshot>>,
    missed: u64,
}

impl PushSink {
    pub fn new(buffer: usize) -> Self {
        Self {
            observers: Vec::new(),
            // Room for the init record and the latest vitals on connect
            buffer: buffer.max(2),
            next_id: 0,
            latest: None,
            missed: 0,
        }
    }

    /// Attach an observer; it gets the init record, then the latest vitals
    pub fn connect(&mut self, session: Option<&PatientSession>) -> Receiver<String> {
        let (tx, rx) = bounded(self.buffer);
        let id = self.next_id;
        self.next_id += 1;

        if let Some(json) = to_json(&InitRecord::new(session)) {
            let _ = tx.try_send(json);
        }
        if let Some(snapshot) = &self.latest {
            if let Some(json) = to_json(&VitalsRecord::from(snapshot.as_ref())) {
                let _ = tx.try_send(json);
            }
        }

        self.observers.push(Observer { id, tx });
        log::info!("Observer {} connected ({} total)", id, self.observers.len());
        rx
    }

    /// Remember `snapshot` as the latest and send it to every observer
    pub fn broadcast(&mut self, snapshot: Arc<VitalsSnapshot>) {
        let json = to_json(&VitalsRecord::from(snapshot.as_ref()));
        self.latest = Some(snapshot);
        if let Some(json) = json {
            self.send_all(&json);
        }
    }

    /// Tell every observer the session changed
    pub fn announce(&mut self, session: Option<&PatientSession>) {
        if let Some(json) = to_json(&InitRecord::new(session)) {
            self.send_all(&json);
        }
    }

    fn send_all(&mut self, json: &str) {
        let mut missed = 0;
        self.observers.retain(|observer| match observer.tx.try_send(json.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                missed += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                log::info!("Observer {} disconnected", observer.id);
                false
            }
        });
        if missed > 0 {
            log::debug!("{} observer(s) too slow, record skipped", missed);
            self.missed += missed;
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn latest(&self) -> Option<Arc<VitalsSnapshot>> {
        self.latest.clone()
    }

    /// Records skipped because an observer's buffer was full
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vitals::SensorHealth;
    use serde_json::Value;

    fn snapshot(t_ms: u64) -> Arc<VitalsSnapshot> {
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
        s.temp_f = 98.5;
        s.ecg_code = 1800;
        s.baro_hpa = 1012.0;
        s.status = Status::Normal;
        Arc::new(s)
    }

    fn session() -> PatientSession {
        PatientSession {
            id: "VCR3723456".to_string(),
            name: "A".to_string(),
            age: 30,
            gender: "F".to_string(),
            contact: "+1".to_string(),
            emergency_contact: "+100".to_string(),
            medical_notes: "none".to_string(),
            started_at_ms: 3_723_000,
            registered: true,
        }
    }

    fn parse(json: &str) -> Value {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_vitals_record_field_names() {
        let json = to_json(&VitalsRecord::from(snapshot(5000).as_ref())).unwrap();
        let value = parse(&json);
        assert_eq!(value["type"], "vitals");
        assert_eq!(value["heartRate"], 72.0);
        assert_eq!(value["systolicBP"], 121.0);
        assert_eq!(value["diastolicBP"], 79.0);
        assert_eq!(value["spO2"], 95.0);
        assert_eq!(value["ecgValue"], 1800);
        assert_eq!(value["pressure"], 1012.0);
        assert_eq!(value["timestamp"], 5000);
        assert_eq!(value["status"], "Normal");
        assert!(value.get("temperature").is_some());
    }

    #[test]
    fn test_connect_sends_init_then_latest() {
        let mut sink = PushSink::new(16);
        let first = sink.connect(None);
        let init = parse(&first.try_recv().unwrap());
        assert_eq!(init["type"], "init");
        assert_eq!(init["patientRegistered"], false);
        assert!(init.get("patient").is_none());
        assert!(first.try_recv().is_err());

        sink.broadcast(snapshot(1000));
        let patient = session();
        let second = sink.connect(Some(&patient));
        let init = parse(&second.try_recv().unwrap());
        assert_eq!(init["patient"]["name"], "A");
        assert_eq!(init["patient"]["age"], 30);
        assert_eq!(parse(&second.try_recv().unwrap())["timestamp"], 1000);
    }

    #[test]
    fn test_disconnected_observers_are_pruned() {
        let mut sink = PushSink::new(16);
        let kept = sink.connect(None);
        let dropped = sink.connect(None);
        drop(dropped);
        assert_eq!(sink.observer_count(), 2);

        sink.broadcast(snapshot(1000));
        assert_eq!(sink.observer_count(), 1);
        assert_eq!(kept.try_iter().count(), 2);
    }

    #[test]
    fn test_full_observer_misses_records_but_stays() {
        let mut sink = PushSink::new(2);
        let slow = sink.connect(None);
        for t in 1..=5 {
            sink.broadcast(snapshot(t * 1000));
        }
        assert_eq!(sink.observer_count(), 1);
        assert_eq!(sink.missed(), 4);
        assert_eq!(slow.try_iter().count(), 2);
    }

    #[test]
    fn test_patient_view_and_uptime() {
        assert_eq!(format_uptime(0), "0:00:00");
        assert_eq!(format_uptime(3_723_000), "1:02:03");

        let patient = session();
        let view = parse(&to_json(&PatientView::new(Some(&patient))).unwrap());
        assert_eq!(view["registered"], true);
        assert_eq!(view["patient"]["emergencyContact"], "+100");
        assert_eq!(view["patient"]["medicalConditions"], "none");
        assert_eq!(view["patient"]["registrationTime"], "1:02:03");

        let empty = parse(&to_json(&PatientView::new(None)).unwrap());
        assert_eq!(empty["registered"], false);
        assert_eq!(empty["message"], "No patient registered");
    }
}
