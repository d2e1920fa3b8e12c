//! # Vitals Aggregator Module
//!
//! Once per UI tick, fuses the latest per-channel features into one
//! `VitalsSnapshot` and publishes it through the `SnapshotCell`.
//!
//! Missing inputs degrade instead of failing:
//! - no rate: heart rate and blood pressure are 0
//! - no environmental sensor: fallback temperature and pressure
//! - no oximeter reading: the SpO2 surrogate, flagged as estimated
//!
//! Status priority is No Patient, then Alert, then Normal, then No Signal.

use crate::alert::Thresholds;
use crate::config::SignalConfig;
use crate::signal::{
    estimate_blood_pressure, fallback_pressure_hpa, fallback_temperature_f, surrogate_spo2,
    Features, RateFusion,
};
use crate::vitals::{SensorHealth, SnapshotCell, Status, VitalsSnapshot};
use rand::RngCore;
use std::sync::Arc;

pub struct VitalsAggregator {
    fusion: RateFusion,
    thresholds: Thresholds,
    health: SensorHealth,
}

impl VitalsAggregator {
    pub fn new(config: &SignalConfig, thresholds: Thresholds, health: SensorHealth) -> Self {
        Self {
            fusion: RateFusion::new(config),
            thresholds,
            health,
        }
    }

    pub fn health(&self) -> SensorHealth {
        self.health
    }

    /// Build the snapshot for `features` without publishing it
    pub fn build(
        &mut self,
        features: &Features,
        session_active: bool,
        rng: &mut dyn RngCore,
    ) -> VitalsSnapshot {
        let (hr_bpm, hr_source) = self.fusion.fuse(features);
        let (sys_mmhg, dia_mmhg) = estimate_blood_pressure(hr_bpm, rng);

        let (spo2_pct, spo2_estimated) = match features.spo2_pct {
            Some(pct) => (pct, false),
            None => (surrogate_spo2(features.ecg_active, rng), true),
        };
        let temp_f = match features.temp_f {
            Some(t) => t,
            None => fallback_temperature_f(rng),
        };
        let baro_hpa = match features.baro_hpa {
            Some(p) => p,
            None => fallback_pressure_hpa(rng),
        };

        let violations = self.thresholds.violations(hr_bpm, sys_mmhg, spo2_pct, temp_f);
        let status = if !session_active {
            Status::NoPatient
        } else if !violations.is_empty() {
            Status::Alert
        } else if hr_bpm > 0.0 {
            Status::Normal
        } else {
            Status::NoSignal
        };

        VitalsSnapshot {
            hr_bpm,
            hr_source,
            sys_mmhg,
            dia_mmhg,
            spo2_pct,
            spo2_estimated,
            temp_f,
            ecg_code: features.ecg_code,
            baro_hpa,
            t_ms: features.t_ms,
            status,
            violations,
            sensor_health: self.health,
            leads_connected: features.leads_connected,
        }
    }

    /// Build and publish; the returned reference is what every sink sees
    pub fn tick(
        &mut self,
        features: &Features,
        session_active: bool,
        cell: &mut SnapshotCell,
        rng: &mut dyn RngCore,
    ) -> Arc<VitalsSnapshot> {
        let snapshot = self.build(features, session_active, rng);
        log::debug!(
            "Snapshot at {} ms: hr {:.1} ({:?}) status {}",
            snapshot.t_ms,
            snapshot.hr_bpm,
            snapshot.hr_source,
            snapshot.status
        );
        cell.publish(snapshot)
    }

    /// Forget the smoothing history
    pub fn reset(&mut self) {
        self.fusion.reset();
    }
}
