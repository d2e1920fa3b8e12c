//! # Application Module
//!
//! `App` owns every pipeline component and the injected hardware. Each
//! `poll()` is one pass of the cooperative loop:
//!
//! 1. Fire the scheduler tasks that are due, in priority order
//!    (sample, aggregate + push + alerts, log)
//! 2. Release time-windowed outputs (buzzer)
//! 3. Advance the SMS dialog by one step
//! 4. Serve a bounded number of operator commands
//!
//! Nothing here blocks; the caller decides how often to poll.

use crate::aggregator::VitalsAggregator;
use crate::alert::{AlertArbiter, AlertRecord, Indicator, Thresholds};
use crate::config::Config;
use crate::error::RegistrationError;
use crate::hal::{AnalogIn, Clock, DigitalIn, DigitalOut, EnvSensor, ModemPort, Oximeter, Storage};
use crate::operator::{OperatorCommand, OperatorHandle, OperatorQueue};
use crate::push::{format_uptime, PatientView, PushSink, SystemStatus};
use crate::recorder::LogSink;
use crate::scheduler::{Scheduler, Task};
use crate::sensor::SensorSampler;
use crate::session::{PatientSession, Registration, RegistrationResponse, SessionManager};
use crate::signal::SignalProcessor;
use crate::sms::{SmsSink, SmsStats};
use crate::vitals::{SensorHealth, SnapshotCell, VitalsSnapshot};
use crossbeam_channel::{Receiver, Sender};
use rand::RngCore;
use std::sync::Arc;

/// Operator commands that may wait between polls
const COMMAND_QUEUE: usize = 32;

/// Hardware and randomness handed to the app at startup
pub struct Peripherals {
    pub clock: Box<dyn Clock>,
    pub analog: Box<dyn AnalogIn>,
    pub digital: Box<dyn DigitalIn>,
    pub outputs: Box<dyn DigitalOut>,
    pub env: Option<Box<dyn EnvSensor>>,
    pub oximeter: Option<Box<dyn Oximeter>>,
    pub storage: Box<dyn Storage>,
    pub modem: Option<Box<dyn ModemPort>>,
    pub rng: Box<dyn RngCore>,
}

pub struct App {
    clock: Box<dyn Clock>,
    outputs: Box<dyn DigitalOut>,
    storage: Box<dyn Storage>,
    rng: Box<dyn RngCore>,
    sample_period_ms: u64,
    scheduler: Scheduler,
    sampler: SensorSampler,
    processor: SignalProcessor,
    aggregator: VitalsAggregator,
    snapshots: SnapshotCell,
    sessions: SessionManager,
    arbiter: AlertArbiter,
    push: PushSink,
    log: LogSink,
    sms: SmsSink,
    pulse_led: Indicator,
    operator: OperatorQueue,
    handle: OperatorHandle,
}

impl App {
    pub fn new(config: Config, peripherals: Peripherals) -> Self {
        let Peripherals {
            clock,
            analog,
            digital,
            outputs,
            env,
            oximeter,
            storage,
            modem,
            rng,
        } = peripherals;
        let start = clock.now_ms();

        let sampler = SensorSampler::new(
            analog,
            digital,
            env,
            oximeter,
            config.pins.clone(),
            &config.schedule,
        );
        let health = SensorHealth {
            ecg: true,
            pulse: true,
            temp: sampler.env_ready(),
            baro: sampler.env_ready(),
        };
        if storage.is_ready() {
            log::info!("Storage ready");
        } else {
            log::warn!("Storage not ready, logging disabled until it is");
        }

        let (operator, handle) =
            OperatorQueue::new(COMMAND_QUEUE, config.schedule.commands_per_poll);

        Self {
            sample_period_ms: config.schedule.sample_period_ms,
            scheduler: Scheduler::new(&config.schedule, start),
            processor: SignalProcessor::new(&config.signal, start),
            aggregator: VitalsAggregator::new(
                &config.signal,
                Thresholds::from(&config.alerts),
                health,
            ),
            snapshots: SnapshotCell::new(VitalsSnapshot::initial(start, health)),
            sessions: SessionManager::new(),
            arbiter: AlertArbiter::new(&config.alerts, config.pins.buzzer),
            push: PushSink::new(config.push.observer_buffer),
            log: LogSink::new(),
            sms: SmsSink::new(modem, &config.sms),
            pulse_led: Indicator::new(config.pins.pulse_led),
            sampler,
            operator,
            handle,
            clock,
            outputs,
            storage,
            rng,
        }
    }

    /// One pass of the cooperative loop
    pub fn poll(&mut self) {
        let now = self.clock.now_ms();
        for task in self.scheduler.due(now) {
            match task {
                Task::Sample => self.sample(now),
                Task::Aggregate => self.aggregate(now),
                Task::Log => self.write_log(),
            }
        }
        self.arbiter.service(self.outputs.as_mut(), now);
        self.sms.step(now);
        self.serve_operator();
    }

    fn sample(&mut self, now: u64) {
        self.pulse_led.service(self.outputs.as_mut(), now);
        let samples = self.sampler.tick(now);
        if self.processor.ingest(&samples) {
            self.pulse_led
                .pulse(self.outputs.as_mut(), now, self.sample_period_ms);
        }
    }

    fn aggregate(&mut self, now: u64) {
        let features = self.processor.features(now);
        let snapshot = self.aggregator.tick(
            &features,
            self.sessions.is_registered(),
            &mut self.snapshots,
            self.rng.as_mut(),
        );
        self.push.broadcast(snapshot.clone());
        self.arbiter.observe(
            &snapshot,
            self.sessions.get(),
            &mut self.sms,
            self.outputs.as_mut(),
        );
    }

    fn write_log(&mut self) {
        let snapshot = self.snapshots.load();
        self.log
            .tick(&snapshot, self.sessions.get(), self.storage.as_mut());
    }

    fn serve_operator(&mut self) {
        for command in self.operator.drain() {
            match command {
                OperatorCommand::Register { payload, reply } => {
                    send_reply(&reply, self.register_json(&payload), "register");
                }
                OperatorCommand::EndSession { reply } => {
                    send_reply(&reply, self.end_session().is_some(), "end session");
                }
                OperatorCommand::Connect { reply } => {
                    send_reply(&reply, self.connect_observer(), "connect");
                }
                OperatorCommand::Patient { reply } => {
                    send_reply(&reply, self.patient_view(), "patient");
                }
                OperatorCommand::Status { reply } => {
                    send_reply(&reply, self.status_report(), "status");
                }
            }
        }
    }

    /// Start a session; observers are told about the new patient
    pub fn register(&mut self, registration: &Registration) -> Result<String, RegistrationError> {
        let now = self.clock.now_ms();
        let id = self.sessions.register(registration, now, self.rng.as_mut())?;
        self.aggregator.reset();
        self.arbiter.reset();
        self.push.announce(self.sessions.get());
        Ok(id)
    }

    /// Registration from the dashboard's JSON payload
    pub fn register_json(&mut self, payload: &str) -> RegistrationResponse {
        let result = Registration::from_json(payload).and_then(|r| self.register(&r));
        if let Err(e) = &result {
            log::warn!("Registration rejected: {}", e);
        }
        RegistrationResponse::from_result(&result)
    }

    pub fn end_session(&mut self) -> Option<PatientSession> {
        let ended = self.sessions.end()?;
        self.aggregator.reset();
        self.arbiter.reset();
        self.push.announce(None);
        Some(ended)
    }

    pub fn connect_observer(&mut self) -> Receiver<String> {
        self.push.connect(self.sessions.get())
    }

    pub fn patient_view(&self) -> PatientView {
        PatientView::new(self.sessions.get())
    }

    pub fn status_report(&self) -> SystemStatus {
        let sms = self.sms.stats();
        SystemStatus {
            status: self.snapshots.load().status,
            uptime: format_uptime(self.clock.now_ms()),
            sd_card_ready: self.storage.is_ready(),
            sim800_ready: self.sms.is_ready(),
            bmp180_ready: self.sampler.env_ready(),
            patient_registered: self.sessions.is_registered(),
            observers: self.push.observer_count(),
            sms_sent: sms.sent,
            sms_failed: sms.failed,
            rows_logged: self.log.rows_logged(),
        }
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<VitalsSnapshot> {
        self.snapshots.load()
    }

    pub fn session(&self) -> Option<&PatientSession> {
        self.sessions.get()
    }

    pub fn operator_handle(&self) -> OperatorHandle {
        self.handle.clone()
    }

    pub fn alert_history(&self) -> impl Iterator<Item = &AlertRecord> {
        self.arbiter.history()
    }

    pub fn sms_stats(&self) -> SmsStats {
        self.sms.stats()
    }
}

/// The operator may stop waiting before its reply is ready
fn send_reply<T>(reply: &Sender<T>, value: T, command: &str) {
    if reply.try_send(value).is_err() {
        log::debug!("Operator dropped the {} reply", command);
    }
}
