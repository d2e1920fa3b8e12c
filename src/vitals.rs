//! # Vitals Snapshot Module
//!
//! The immutable reading set published once per UI tick and the cell that
//! holds the current one.
//!
//! `SnapshotCell` swaps whole `Arc<VitalsSnapshot>` values, so every sink
//! reads one consistent snapshot and a published snapshot is never edited.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::signal::HrSource;

/// Dominant condition shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    /// Before the first UI tick
    #[serde(rename = "System Ready")]
    Ready,
    #[serde(rename = "No Patient")]
    NoPatient,
    #[serde(rename = "Alert")]
    Alert,
    #[serde(rename = "Normal")]
    Normal,
    #[serde(rename = "No Signal")]
    NoSignal,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ready => "System Ready",
            Status::NoPatient => "No Patient",
            Status::Alert => "Alert",
            Status::Normal => "Normal",
            Status::NoSignal => "No Signal",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vital field checked against the threshold table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    HeartRate,
    BloodPressure,
    Spo2,
    Temperature,
}

impl Field {
    pub fn all() -> [Field; 4] {
        [
            Field::HeartRate,
            Field::BloodPressure,
            Field::Spo2,
            Field::Temperature,
        ]
    }

    fn bit(self) -> u8 {
        match self {
            Field::HeartRate => 1,
            Field::BloodPressure => 1 << 1,
            Field::Spo2 => 1 << 2,
            Field::Temperature => 1 << 3,
        }
    }
}

/// Small set of `Field`s, usable as a map key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FieldSet(u8);

impl FieldSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, field: Field) {
        self.0 |= field.bit();
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        Field::all().into_iter().filter(move |f| self.contains(*f))
    }
}

impl FromIterator<Field> for FieldSet {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        let mut set = FieldSet::empty();
        for field in iter {
            set.insert(field);
        }
        set
    }
}

/// Which sensors came up at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorHealth {
    pub ecg: bool,
    pub pulse: bool,
    pub temp: bool,
    pub baro: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VitalsSnapshot {
    pub hr_bpm: f32,
    pub hr_source: HrSource,
    pub sys_mmhg: f32,
    pub dia_mmhg: f32,
    pub spo2_pct: f32,
    /// True while SpO2 is the surrogate rather than a measurement
    pub spo2_estimated: bool,
    pub temp_f: f32,
    pub ecg_code: i32,
    pub baro_hpa: f32,
    pub t_ms: u64,
    pub status: Status,
    pub violations: FieldSet,
    pub sensor_health: SensorHealth,
    pub leads_connected: bool,
}

impl VitalsSnapshot {
    /// All-zero snapshot current before the first UI tick
    pub fn initial(t_ms: u64, sensor_health: SensorHealth) -> Self {
        Self {
            hr_bpm: 0.0,
            hr_source: HrSource::None,
            sys_mmhg: 0.0,
            dia_mmhg: 0.0,
            spo2_pct: 0.0,
            spo2_estimated: true,
            temp_f: 0.0,
            ecg_code: 0,
            baro_hpa: 0.0,
            t_ms,
            status: Status::Ready,
            violations: FieldSet::empty(),
            sensor_health,
            leads_connected: false,
        }
    }
}

/// Holder of the one current snapshot
pub struct SnapshotCell {
    current: ArcSwap<VitalsSnapshot>,
    published: u64,
}

impl SnapshotCell {
    pub fn new(initial: VitalsSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            published: 0,
        }
    }

    /// Swap in a new snapshot; `t_ms` never goes backwards
    pub fn publish(&mut self, mut snapshot: VitalsSnapshot) -> Arc<VitalsSnapshot> {
        let previous = self.current.load();
        if snapshot.t_ms < previous.t_ms {
            log::warn!(
                "Clock went backwards ({} < {}), holding snapshot time",
                snapshot.t_ms,
                previous.t_ms
            );
            snapshot.t_ms = previous.t_ms;
        }
        let snapshot = Arc::new(snapshot);
        self.current.store(snapshot.clone());
        self.published += 1;
        snapshot
    }

    pub fn load(&self) -> Arc<VitalsSnapshot> {
        self.current.load_full()
    }

    /// Snapshots published since start, not counting the initial one
    pub fn published(&self) -> u64 {
        self.published
    }
}
