//! # Sensor Sampling Module
//!
//! Reads every hardware channel once per sampler tick and turns raw codes
//! into `Sample`s. The sampler knows nothing about detection; faults are
//! reported through `Quality` and never raised.
//!
//! ## Channels
//! - `Ecg`: AD8232 output, gated by the two lead-off lines
//! - `Pulse`: optical pulse sensor, no lead-off concept
//! - `Temp` / `Baro`: environmental sensor, read on its own slower cadence
//! - `Spo2`: optional oximeter front-end

use crate::config::{PinConfig, ScheduleConfig};
use crate::error::SensorFault;
use crate::hal::{AnalogIn, DigitalIn, EnvSensor, Oximeter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ecg,
    Pulse,
    Temp,
    Baro,
    Spo2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Ok,
    LeadsOff,
    Absent,
}

impl From<SensorFault> for Quality {
    fn from(fault: SensorFault) -> Self {
        match fault {
            SensorFault::LeadsOff => Quality::LeadsOff,
            SensorFault::Absent => Quality::Absent,
        }
    }
}

/// One channel reading
///
/// `value` is a 12-bit code for `Ecg` and `Pulse`, °F for `Temp`, hPa for
/// `Baro` and percent for `Spo2`. It is 0 whenever `quality` is not `Ok`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub channel: Channel,
    pub t_ms: u64,
    pub value: f32,
    pub quality: Quality,
}

impl Sample {
    fn ok(channel: Channel, t_ms: u64, value: f32) -> Self {
        Self {
            channel,
            t_ms,
            value,
            quality: Quality::Ok,
        }
    }

    fn faulted(channel: Channel, t_ms: u64, fault: SensorFault) -> Self {
        Self {
            channel,
            t_ms,
            value: 0.0,
            quality: fault.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.quality == Quality::Ok
    }
}

/// Converts a BMP180-style Celsius reading to Fahrenheit
pub fn celsius_to_fahrenheit(c: f32) -> f32 {
    c * 9.0 / 5.0 + 32.0
}

pub struct SensorSampler {
    analog: Box<dyn AnalogIn>,
    digital: Box<dyn DigitalIn>,
    env: Option<Box<dyn EnvSensor>>,
    oximeter: Option<Box<dyn Oximeter>>,
    env_ready: bool,
    pins: PinConfig,
    env_period_ms: u64,
    last_env_read_ms: Option<u64>,
}

impl SensorSampler {
    /// Builds the sampler and brings the environmental sensor up once
    pub fn new(
        analog: Box<dyn AnalogIn>,
        digital: Box<dyn DigitalIn>,
        mut env: Option<Box<dyn EnvSensor>>,
        oximeter: Option<Box<dyn Oximeter>>,
        pins: PinConfig,
        schedule: &ScheduleConfig,
    ) -> Self {
        let env_ready = match env.as_mut() {
            Some(sensor) => sensor.begin(),
            None => false,
        };
        if env_ready {
            log::info!("Environmental sensor initialized");
        } else {
            log::warn!("Environmental sensor not found, using fallback temperature");
        }

        Self {
            analog,
            digital,
            env,
            oximeter,
            env_ready,
            pins,
            env_period_ms: schedule.env_period_ms,
            last_env_read_ms: None,
        }
    }

    pub fn env_ready(&self) -> bool {
        self.env_ready
    }

    pub fn has_oximeter(&self) -> bool {
        self.oximeter.is_some()
    }

    /// Read every channel that is due
    pub fn tick(&mut self, now: u64) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(5);
        samples.push(self.read_ecg(now));
        samples.push(self.read_pulse(now));

        let env_due = match self.last_env_read_ms {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.env_period_ms,
        };
        if env_due {
            self.last_env_read_ms = Some(now);
            samples.extend(self.read_env(now));
        }

        if let Some(oximeter) = self.oximeter.as_mut() {
            samples.push(match oximeter.read_spo2_pct() {
                Ok(pct) => Sample::ok(Channel::Spo2, now, pct),
                Err(fault) => Sample::faulted(Channel::Spo2, now, fault),
            });
        }

        log::trace!("Sampled {} channels at {} ms", samples.len(), now);
        samples
    }

    fn read_ecg(&mut self, now: u64) -> Sample {
        let lo_plus = self.digital.read(self.pins.lead_off_plus);
        let lo_minus = self.digital.read(self.pins.lead_off_minus);
        if lo_plus || lo_minus {
            return Sample::faulted(Channel::Ecg, now, SensorFault::LeadsOff);
        }
        let code = self.analog.read(self.pins.ecg_output).min(4095);
        Sample::ok(Channel::Ecg, now, code as f32)
    }

    fn read_pulse(&mut self, now: u64) -> Sample {
        let code = self.analog.read(self.pins.pulse).min(4095);
        Sample::ok(Channel::Pulse, now, code as f32)
    }

    fn read_env(&mut self, now: u64) -> [Sample; 2] {
        let sensor = match self.env.as_mut() {
            Some(sensor) if self.env_ready => sensor,
            _ => {
                return [
                    Sample::faulted(Channel::Temp, now, SensorFault::Absent),
                    Sample::faulted(Channel::Baro, now, SensorFault::Absent),
                ]
            }
        };

        let temp = match sensor.read_temp_c() {
            Ok(c) => Sample::ok(Channel::Temp, now, celsius_to_fahrenheit(c)),
            Err(fault) => Sample::faulted(Channel::Temp, now, fault),
        };
        let baro = match sensor.read_pressure_pa() {
            Ok(pa) => Sample::ok(Channel::Baro, now, pa / 100.0),
            Err(fault) => Sample::faulted(Channel::Baro, now, fault),
        };
        [temp, baro]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{asserted_between, constant, ManualClock, SimBoard, SimEnvSensor, SimOximeter};

    fn sampler(clock: &ManualClock, env: SimEnvSensor) -> (SensorSampler, SimBoard) {
        let board = SimBoard::new(clock.clone());
        let pins = PinConfig::default();
        board.set_analog(pins.ecg_output, constant(1800));
        board.set_analog(pins.pulse, constant(2500));
        let sampler = SensorSampler::new(
            Box::new(board.clone()),
            Box::new(board.clone()),
            Some(Box::new(env)),
            None,
            pins,
            &ScheduleConfig::default(),
        );
        (sampler, board)
    }

    fn find(samples: &[Sample], channel: Channel) -> Option<Sample> {
        samples.iter().copied().find(|s| s.channel == channel)
    }

    #[test]
    fn test_reads_all_channels() {
        let clock = ManualClock::new(100);
        let (mut sampler, _board) = sampler(&clock, SimEnvSensor::present(37.0, 101_325.0));
        let samples = sampler.tick(100);

        assert_eq!(find(&samples, Channel::Ecg).unwrap().value, 1800.0);
        assert_eq!(find(&samples, Channel::Pulse).unwrap().value, 2500.0);
        let temp = find(&samples, Channel::Temp).unwrap();
        assert!((temp.value - 98.6).abs() < 0.01);
        let baro = find(&samples, Channel::Baro).unwrap();
        assert!((baro.value - 1013.25).abs() < 0.01);
        assert!(find(&samples, Channel::Spo2).is_none());
    }

    #[test]
    fn test_lead_off_zeroes_ecg() {
        let clock = ManualClock::new(0);
        let (mut sampler, board) = sampler(&clock, SimEnvSensor::absent());
        board.set_digital(PinConfig::default().lead_off_minus, asserted_between(0, 1000));

        let ecg = find(&sampler.tick(0), Channel::Ecg).unwrap();
        assert_eq!(ecg.quality, Quality::LeadsOff);
        assert_eq!(ecg.value, 0.0);

        clock.set(1000);
        let ecg = find(&sampler.tick(1000), Channel::Ecg).unwrap();
        assert_eq!(ecg.quality, Quality::Ok);
    }

    #[test]
    fn test_absent_env_sensor() {
        let clock = ManualClock::new(0);
        let (mut sampler, _board) = sampler(&clock, SimEnvSensor::absent());
        assert!(!sampler.env_ready());

        let temp = find(&sampler.tick(0), Channel::Temp).unwrap();
        assert_eq!(temp.quality, Quality::Absent);
    }

    #[test]
    fn test_env_follows_its_own_cadence() {
        let clock = ManualClock::new(0);
        let (mut sampler, _board) = sampler(&clock, SimEnvSensor::present(20.0, 100_000.0));

        assert!(find(&sampler.tick(0), Channel::Temp).is_some());
        assert!(find(&sampler.tick(100), Channel::Temp).is_none());
        assert!(find(&sampler.tick(1000), Channel::Temp).is_some());
    }

    #[test]
    fn test_oximeter_channel() {
        let clock = ManualClock::new(0);
        let board = SimBoard::new(clock.clone());
        let mut sampler = SensorSampler::new(
            Box::new(board.clone()),
            Box::new(board),
            None,
            Some(Box::new(SimOximeter::new(93.0))),
            PinConfig::default(),
            &ScheduleConfig::default(),
        );
        assert!(sampler.has_oximeter());
        assert_eq!(find(&sampler.tick(0), Channel::Spo2).unwrap().value, 93.0);
    }
}
