//! # Signal Processing Module
//!
//! Turns per-channel samples into rate estimates and passthrough features.
//!
//! ## Key Types
//! - `PulseDetector`: rising-edge counting over a fixed window with a
//!   liveness timeout
//! - `EcgDetector`: threshold peaks with a refractory period, rate from the
//!   span of the last N peaks
//! - `PassthroughState`: last value and outcome for Temp/Baro/SpO2
//! - `SignalProcessor`: owns one state per channel and produces `Features`
//! - `RateFusion`: picks ECG or pulse rate and applies the one-step low-pass
//!
//! Derived estimates that are not measured at all (blood pressure, the SpO2
//! surrogate, fallback temperature and pressure) are free functions taking an
//! injected RNG so tests stay deterministic.

use crate::config::SignalConfig;
use crate::sensor::{Channel, Quality, Sample};
use crate::timeseries::{PointSliceExt, TimeSeries};
use rand::{Rng, RngCore};

/// Optical pulse rate by rising-edge counting
///
/// `beat_count` and `window_start_ms` are only ever reset together, and a
/// rate only appears once a full window has elapsed.
#[derive(Debug, Clone)]
pub struct PulseDetector {
    threshold: u16,
    window_ms: u64,
    liveness_ms: u64,
    max_bpm: f32,
    last_value: u16,
    beat_count: u32,
    window_start_ms: u64,
    last_beat_ms: Option<u64>,
    window_bpm: f32,
}

impl PulseDetector {
    pub fn new(config: &SignalConfig, start_ms: u64) -> Self {
        Self {
            threshold: config.pulse_threshold,
            window_ms: config.pulse_window_ms.max(1),
            liveness_ms: config.liveness_timeout_ms,
            max_bpm: config.max_bpm,
            last_value: 0,
            beat_count: 0,
            window_start_ms: start_ms,
            last_beat_ms: None,
            window_bpm: 0.0,
        }
    }

    /// Feed one code; returns `true` when it registered a beat
    pub fn on_sample(&mut self, t_ms: u64, value: u16) -> bool {
        let beat = value > self.threshold && self.last_value <= self.threshold;
        if beat {
            self.beat_count += 1;
            self.last_beat_ms = Some(t_ms);
        }
        self.last_value = value;

        if t_ms.saturating_sub(self.window_start_ms) >= self.window_ms {
            let bpm = self.beat_count as f32 * 60_000.0 / self.window_ms as f32;
            self.window_bpm = bpm.clamp(0.0, self.max_bpm);
            log::debug!(
                "Pulse window closed: {} beats -> {:.1} bpm",
                self.beat_count,
                self.window_bpm
            );
            self.beat_count = 0;
            self.window_start_ms = t_ms;
        }
        beat
    }

    /// Rate of the last closed window, or 0 once the pulse has gone quiet
    pub fn bpm(&self, now: u64) -> f32 {
        match self.last_beat_ms {
            Some(last) if now.saturating_sub(last) <= self.liveness_ms => self.window_bpm,
            _ => 0.0,
        }
    }

    pub fn beat_count(&self) -> u32 {
        self.beat_count
    }

    pub fn window_start_ms(&self) -> u64 {
        self.window_start_ms
    }

    pub fn last_beat_ms(&self) -> Option<u64> {
        self.last_beat_ms
    }
}

/// ECG rate from thresholded peaks
#[derive(Debug, Clone)]
pub struct EcgDetector {
    threshold: u16,
    refractory_ms: u64,
    beats_per_estimate: usize,
    min_bpm: f32,
    max_bpm: f32,
    liveness_ms: u64,
    leads_connected: bool,
    last_code: u16,
    last_peak_ms: Option<u64>,
    peaks: TimeSeries,
    beats_since_estimate: usize,
    rate: Option<f32>,
}

impl EcgDetector {
    pub fn new(config: &SignalConfig) -> Self {
        let beats = config.ecg_beats_per_estimate.max(2);
        Self {
            threshold: config.ecg_threshold,
            refractory_ms: config.ecg_refractory_ms,
            beats_per_estimate: beats,
            min_bpm: config.min_valid_bpm,
            max_bpm: config.max_bpm,
            liveness_ms: config.liveness_timeout_ms,
            leads_connected: true,
            last_code: 0,
            last_peak_ms: None,
            peaks: TimeSeries::new(beats),
            beats_since_estimate: 0,
            rate: None,
        }
    }

    /// Feed one ECG sample; lead-off discards all peak history
    pub fn on_sample(&mut self, sample: &Sample) {
        if sample.quality != Quality::Ok {
            if self.leads_connected {
                log::info!("ECG leads disconnected");
            }
            self.leads_connected = false;
            self.last_code = 0;
            self.reset_peaks();
            return;
        }
        if !self.leads_connected {
            log::info!("ECG leads reconnected");
        }
        self.leads_connected = true;

        let code = sample.value as u16;
        self.last_code = code;
        let t = sample.t_ms;
        let outside_refractory = match self.last_peak_ms {
            Some(last) => t.saturating_sub(last) > self.refractory_ms,
            None => true,
        };
        if code > self.threshold && outside_refractory {
            self.last_peak_ms = Some(t);
            self.peaks.add_point(t, code as i32);
            self.beats_since_estimate += 1;
            if self.beats_since_estimate >= self.beats_per_estimate {
                self.estimate();
                self.beats_since_estimate = 0;
            }
        }
    }

    fn estimate(&mut self) {
        let recent = self.peaks.last_points(self.beats_per_estimate);
        if recent.len() < self.beats_per_estimate {
            return;
        }
        let Some((first, last)) = recent.min_max_time() else {
            return;
        };
        if last <= first {
            return;
        }
        let intervals = (recent.len() - 1) as f32;
        let bpm = intervals * 60_000.0 / (last - first) as f32;
        if bpm >= self.min_bpm && bpm <= self.max_bpm {
            self.rate = Some(bpm);
        } else {
            log::debug!("ECG rate {:.1} bpm out of range, suppressed", bpm);
            self.rate = None;
        }
    }

    fn reset_peaks(&mut self) {
        self.peaks.clear();
        self.beats_since_estimate = 0;
        self.last_peak_ms = None;
        self.rate = None;
    }

    pub fn rate(&self, now: u64) -> Option<f32> {
        if !self.leads_connected {
            return None;
        }
        match self.last_peak_ms {
            Some(last) if now.saturating_sub(last) <= self.liveness_ms => self.rate,
            _ => None,
        }
    }

    pub fn leads_connected(&self) -> bool {
        self.leads_connected
    }

    /// Raw code of the last sample, 0 while leads are off
    pub fn last_code(&self) -> u16 {
        self.last_code
    }

    pub fn last_peak_ms(&self) -> Option<u64> {
        self.last_peak_ms
    }
}

/// Last value, read time and read outcome of a passthrough channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassthroughState {
    pub last_value: Option<f32>,
    pub last_read_ms: Option<u64>,
    pub last_outcome: Quality,
}

impl Default for PassthroughState {
    fn default() -> Self {
        Self {
            last_value: None,
            last_read_ms: None,
            last_outcome: Quality::Absent,
        }
    }
}

impl PassthroughState {
    fn on_sample(&mut self, sample: &Sample) {
        self.last_read_ms = Some(sample.t_ms);
        self.last_outcome = sample.quality;
        self.last_value = if sample.is_ok() { Some(sample.value) } else { None };
    }

    /// Current value, if the last read succeeded
    pub fn value(&self) -> Option<f32> {
        match self.last_outcome {
            Quality::Ok => self.last_value,
            _ => None,
        }
    }
}

/// Per-channel detector state
pub enum ChannelState<'a> {
    Ecg(&'a EcgDetector),
    Pulse(&'a PulseDetector),
    Passthrough(&'a PassthroughState),
}

/// Latest per-channel features handed to the aggregator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Features {
    pub t_ms: u64,
    pub pulse_bpm: f32,
    pub ecg_bpm: Option<f32>,
    pub ecg_code: i32,
    pub leads_connected: bool,
    /// Leads on and a non-zero trace
    pub ecg_active: bool,
    pub temp_f: Option<f32>,
    pub baro_hpa: Option<f32>,
    pub spo2_pct: Option<f32>,
}

pub struct SignalProcessor {
    pulse: PulseDetector,
    ecg: EcgDetector,
    temp: PassthroughState,
    baro: PassthroughState,
    spo2: PassthroughState,
}

impl SignalProcessor {
    pub fn new(config: &SignalConfig, start_ms: u64) -> Self {
        Self {
            pulse: PulseDetector::new(config, start_ms),
            ecg: EcgDetector::new(config),
            temp: PassthroughState::default(),
            baro: PassthroughState::default(),
            spo2: PassthroughState::default(),
        }
    }

    /// Consume one sampler tick; returns `true` if a pulse beat was seen
    pub fn ingest(&mut self, samples: &[Sample]) -> bool {
        let mut beat = false;
        for sample in samples {
            match sample.channel {
                Channel::Ecg => self.ecg.on_sample(sample),
                Channel::Pulse => {
                    if sample.is_ok() {
                        beat |= self.pulse.on_sample(sample.t_ms, sample.value as u16);
                    }
                }
                Channel::Temp => self.temp.on_sample(sample),
                Channel::Baro => self.baro.on_sample(sample),
                Channel::Spo2 => self.spo2.on_sample(sample),
            }
        }
        beat
    }

    pub fn state(&self, channel: Channel) -> ChannelState<'_> {
        match channel {
            Channel::Ecg => ChannelState::Ecg(&self.ecg),
            Channel::Pulse => ChannelState::Pulse(&self.pulse),
            Channel::Temp => ChannelState::Passthrough(&self.temp),
            Channel::Baro => ChannelState::Passthrough(&self.baro),
            Channel::Spo2 => ChannelState::Passthrough(&self.spo2),
        }
    }

    pub fn features(&self, now: u64) -> Features {
        let leads_connected = self.ecg.leads_connected();
        let ecg_code = if leads_connected { self.ecg.last_code() as i32 } else { 0 };
        Features {
            t_ms: now,
            pulse_bpm: self.pulse.bpm(now),
            ecg_bpm: self.ecg.rate(now),
            ecg_code,
            leads_connected,
            ecg_active: leads_connected && ecg_code > 0,
            temp_f: self.temp.value(),
            baro_hpa: self.baro.value(),
            spo2_pct: self.spo2.value(),
        }
    }
}

/// Where the published heart rate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrSource {
    Ecg,
    Pulse,
    None,
}

/// ECG-first rate selection with a one-step low-pass
#[derive(Debug, Clone)]
pub struct RateFusion {
    min_ecg_bpm: f32,
    max_bpm: f32,
    prev: f32,
}

impl RateFusion {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            min_ecg_bpm: config.min_valid_bpm,
            max_bpm: config.max_bpm,
            prev: 0.0,
        }
    }

    pub fn fuse(&mut self, features: &Features) -> (f32, HrSource) {
        let ecg = features.ecg_bpm.filter(|bpm| {
            features.leads_connected && *bpm >= self.min_ecg_bpm && *bpm <= self.max_bpm
        });
        let (raw, source) = match ecg {
            Some(bpm) => (bpm, HrSource::Ecg),
            None if features.pulse_bpm > 0.0 && features.pulse_bpm <= self.max_bpm => {
                (features.pulse_bpm, HrSource::Pulse)
            }
            None => (0.0, HrSource::None),
        };

        let out = if raw > 0.0 && self.prev > 0.0 {
            (raw + self.prev) / 2.0
        } else {
            raw
        };
        self.prev = out;
        (out, source)
    }

    pub fn reset(&mut self) {
        self.prev = 0.0;
    }
}

/// Crude systolic/diastolic estimate from heart rate
pub fn estimate_blood_pressure(hr_bpm: f32, rng: &mut dyn RngCore) -> (f32, f32) {
    if hr_bpm <= 0.0 {
        return (0.0, 0.0);
    }
    let mut sys = 120.0;
    let mut dia = 80.0;
    if hr_bpm > 100.0 {
        sys += 0.5 * (hr_bpm - 100.0);
        dia += 0.3 * (hr_bpm - 100.0);
    } else if hr_bpm < 60.0 {
        sys -= 0.3 * (60.0 - hr_bpm);
        dia -= 0.2 * (60.0 - hr_bpm);
    }
    sys += rng.gen_range(-5..=5) as f32;
    dia += rng.gen_range(-3..=3) as f32;
    (sys, dia)
}

/// Placeholder SpO2: 98±2 while the ECG trace is live, 95 otherwise
pub fn surrogate_spo2(ecg_active: bool, rng: &mut dyn RngCore) -> f32 {
    if ecg_active {
        98.0 + rng.gen_range(-2..=2) as f32
    } else {
        95.0
    }
}

/// Stand-in body temperature when the environmental sensor is missing
pub fn fallback_temperature_f(rng: &mut dyn RngCore) -> f32 {
    98.6 + rng.gen_range(-10..=10) as f32 / 10.0
}

pub fn fallback_pressure_hpa(rng: &mut dyn RngCore) -> f32 {
    1013.25 + rng.gen_range(-20..=20) as f32
}
