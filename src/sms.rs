//! # SMS Dispatch Module
//!
//! Sends alert texts through a SIM800-style modem without ever blocking the
//! scheduler. The AT exchange is a small state machine advanced once per
//! poll:
//!
//! ```text
//! AT+CMGF=1          -> OK        (text mode)
//! AT+CMGS="<to>"     -> >         (recipient prompt)
//! <body> Ctrl-Z      -> +CMGS / OK
//! ```
//!
//! The channel only counts as ready after the modem answered a plain `AT`
//! probe. One message is in flight at a time; later ones wait in a bounded
//! queue that drops its oldest entry on overflow. A dialog that runs past
//! its budget is abandoned and the message is not retried.

use crate::config::SmsConfig;
use crate::error::ModemError;
use crate::hal::ModemPort;
use crate::vitals::FieldSet;
use std::collections::VecDeque;

const CTRL_Z: u8 = 0x1A;
/// Reply lines inspected per poll
const LINES_PER_STEP: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsJob {
    pub to: String,
    pub body: String,
    pub fields: FieldSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No modem attached
    Absent,
    Probing { started_ms: Option<u64> },
    Ready,
    /// Modem attached but never answered the probe
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    TextMode,
    Recipient,
    Body,
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::TextMode => "text mode",
            Stage::Recipient => "recipient prompt",
            Stage::Body => "send confirmation",
        }
    }

    fn accepts(&self, line: &str) -> bool {
        match self {
            Stage::TextMode | Stage::Body => line == "OK",
            Stage::Recipient => line.starts_with('>'),
        }
    }
}

#[derive(Debug)]
struct Dialog {
    job: SmsJob,
    stage: Stage,
    started_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SmsStats {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
}

pub struct SmsSink {
    port: Option<Box<dyn ModemPort>>,
    link: LinkState,
    queue: VecDeque<SmsJob>,
    dialog: Option<Dialog>,
    capacity: usize,
    send_budget_ms: u64,
    probe_budget_ms: u64,
    stats: SmsStats,
}

impl SmsSink {
    pub fn new(port: Option<Box<dyn ModemPort>>, config: &SmsConfig) -> Self {
        let link = if port.is_some() {
            LinkState::Probing { started_ms: None }
        } else {
            log::warn!("No modem attached, SMS alerts disabled");
            LinkState::Absent
        };
        Self {
            port,
            link,
            queue: VecDeque::with_capacity(config.queue_capacity),
            dialog: None,
            capacity: config.queue_capacity.max(1),
            send_budget_ms: config.send_budget_ms,
            probe_budget_ms: config.probe_budget_ms,
            stats: SmsStats::default(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.link == LinkState::Ready
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn stats(&self) -> SmsStats {
        self.stats
    }

    /// Messages waiting, including the one in flight
    pub fn pending(&self) -> usize {
        self.queue.len() + usize::from(self.dialog.is_some())
    }

    /// Queue a message; the oldest waiting one is dropped when full
    pub fn submit(&mut self, job: SmsJob) -> Result<(), ModemError> {
        if !self.is_ready() {
            return Err(ModemError::NotReady);
        }
        if self.queue.len() >= self.capacity {
            if let Some(dropped) = self.queue.pop_front() {
                self.stats.dropped += 1;
                log::warn!("SMS queue full, dropped message to {}", dropped.to);
            }
        }
        log::info!("SMS queued for {}", job.to);
        self.queue.push_back(job);
        Ok(())
    }

    /// Advance the probe or the current dialog by one bounded step
    pub fn step(&mut self, now: u64) {
        match self.link {
            LinkState::Probing { started_ms } => self.step_probe(now, started_ms),
            LinkState::Ready => self.step_dialog(now),
            LinkState::Absent | LinkState::Unavailable => {}
        }
    }

    fn step_probe(&mut self, now: u64, started_ms: Option<u64>) {
        let Some(started) = started_ms else {
            match self.write(b"AT\r\n") {
                Ok(()) => self.link = LinkState::Probing { started_ms: Some(now) },
                Err(e) => {
                    log::error!("Modem probe failed: {}", e);
                    self.link = LinkState::Unavailable;
                }
            }
            return;
        };

        for _ in 0..LINES_PER_STEP {
            match self.read_line() {
                Some(line) if line == "OK" => {
                    log::info!("Modem initialized and ready");
                    self.link = LinkState::Ready;
                    return;
                }
                Some(_) => continue,
                None => break,
            }
        }
        if now.saturating_sub(started) > self.probe_budget_ms {
            log::warn!("Modem not responding, SMS alerts disabled");
            self.link = LinkState::Unavailable;
        }
    }

    fn step_dialog(&mut self, now: u64) {
        if self.dialog.is_none() {
            let Some(job) = self.queue.pop_front() else {
                return;
            };
            // Stale replies from an abandoned dialog must not satisfy this one.
            while self.read_line().is_some() {}
            let dialog = Dialog {
                job,
                stage: Stage::TextMode,
                started_ms: now,
            };
            if let Err(e) = self.write(b"AT+CMGF=1\r\n") {
                self.fail(&dialog, e);
                return;
            }
            self.dialog = Some(dialog);
            return;
        }

        for _ in 0..LINES_PER_STEP {
            let Some(line) = self.read_line() else {
                break;
            };
            let Some(dialog) = self.dialog.take() else {
                return;
            };
            if line.contains("ERROR") {
                let err = ModemError::Rejected {
                    stage: dialog.stage.name(),
                    reply: line,
                };
                self.fail(&dialog, err);
                return;
            }
            if !dialog.stage.accepts(&line) {
                self.dialog = Some(dialog);
                continue;
            }
            match self.advance(dialog) {
                Ok(Some(next)) => self.dialog = Some(next),
                Ok(None) => return,
                Err((dialog, e)) => {
                    self.fail(&dialog, e);
                    return;
                }
            }
        }

        if let Some(dialog) = self.dialog.take() {
            if now.saturating_sub(dialog.started_ms) > self.send_budget_ms {
                let err = ModemError::Timeout {
                    stage: dialog.stage.name(),
                };
                self.fail(&dialog, err);
            } else {
                self.dialog = Some(dialog);
            }
        }
    }

    /// Move to the next stage; `Ok(None)` means the message went out
    fn advance(&mut self, mut dialog: Dialog) -> Result<Option<Dialog>, (Dialog, ModemError)> {
        match dialog.stage {
            Stage::TextMode => {
                let command = format!("AT+CMGS=\"{}\"\r\n", dialog.job.to);
                if let Err(e) = self.write(command.as_bytes()) {
                    return Err((dialog, e));
                }
                dialog.stage = Stage::Recipient;
                Ok(Some(dialog))
            }
            Stage::Recipient => {
                let mut payload = dialog.job.body.clone().into_bytes();
                payload.push(CTRL_Z);
                if let Err(e) = self.write(&payload) {
                    return Err((dialog, e));
                }
                dialog.stage = Stage::Body;
                Ok(Some(dialog))
            }
            Stage::Body => {
                self.stats.sent += 1;
                log::info!("SMS alert sent to {}", dialog.job.to);
                Ok(None)
            }
        }
    }

    fn fail(&mut self, dialog: &Dialog, err: ModemError) {
        self.stats.failed += 1;
        log::error!("SMS to {} failed: {}", dialog.job.to, err);
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ModemError> {
        match self.port.as_mut() {
            Some(port) => port.write(bytes),
            None => Err(ModemError::NotReady),
        }
    }

    fn read_line(&mut self) -> Option<String> {
        self.port
            .as_mut()
            .and_then(|port| port.read_line())
            .map(|line| line.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ModemBehavior, SimModem};

    fn job(to: &str, body: &str) -> SmsJob {
        SmsJob {
            to: to.to_string(),
            body: body.to_string(),
            fields: FieldSet::empty(),
        }
    }

    fn ready_sink(modem: &SimModem) -> SmsSink {
        let mut sink = SmsSink::new(Some(Box::new(modem.clone())), &SmsConfig::default());
        sink.step(0);
        sink.step(10);
        assert!(sink.is_ready());
        sink
    }

    fn run(sink: &mut SmsSink, from: u64, to: u64) {
        let mut t = from;
        while t <= to {
            sink.step(t);
            t += 10;
        }
    }

    #[test]
    fn test_no_modem_is_never_ready() {
        let mut sink = SmsSink::new(None, &SmsConfig::default());
        sink.step(0);
        assert_eq!(sink.link_state(), LinkState::Absent);
        assert_eq!(sink.submit(job("+1", "x")), Err(ModemError::NotReady));
    }

    #[test]
    fn test_probe_times_out_on_silent_modem() {
        let modem = SimModem::new(ModemBehavior::Silent);
        let mut sink = SmsSink::new(Some(Box::new(modem)), &SmsConfig::default());
        run(&mut sink, 0, 5_000);
        assert!(matches!(sink.link_state(), LinkState::Probing { .. }));
        sink.step(5_020);
        assert_eq!(sink.link_state(), LinkState::Unavailable);
    }

    #[test]
    fn test_sends_through_full_dialog() {
        let modem = SimModem::new(ModemBehavior::Responsive);
        let mut sink = ready_sink(&modem);

        sink.submit(job("+100", "ALERT: A")).unwrap();
        run(&mut sink, 20, 200);

        assert_eq!(modem.sent(), vec![("+100".to_string(), "ALERT: A".to_string())]);
        assert_eq!(
            modem.commands(),
            vec!["AT", "AT+CMGF=1", "AT+CMGS=\"+100\"", "<body>"]
        );
        assert_eq!(sink.stats().sent, 1);
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn test_messages_go_out_one_at_a_time_in_order() {
        let modem = SimModem::new(ModemBehavior::Responsive);
        let mut sink = ready_sink(&modem);

        sink.submit(job("+1", "first")).unwrap();
        sink.submit(job("+2", "second")).unwrap();
        run(&mut sink, 20, 500);

        let bodies: Vec<String> = modem.sent().into_iter().map(|(_, b)| b).collect();
        assert_eq!(bodies, vec!["first", "second"]);
    }

    #[test]
    fn test_queue_overflow_drops_oldest() {
        let modem = SimModem::new(ModemBehavior::Responsive);
        let mut sink = ready_sink(&modem);

        for i in 0..6 {
            sink.submit(job("+1", &format!("m{}", i))).unwrap();
        }
        assert_eq!(sink.stats().dropped, 2);
        run(&mut sink, 20, 1_000);

        let bodies: Vec<String> = modem.sent().into_iter().map(|(_, b)| b).collect();
        assert_eq!(bodies, vec!["m2", "m3", "m4", "m5"]);
    }

    #[test]
    fn test_rejected_recipient_drops_job() {
        let modem = SimModem::new(ModemBehavior::RejectSend);
        let mut sink = ready_sink(&modem);

        sink.submit(job("+1", "x")).unwrap();
        run(&mut sink, 20, 200);
        assert_eq!(sink.stats().failed, 1);
        assert_eq!(sink.pending(), 0);
        assert!(modem.sent().is_empty());
    }

    #[test]
    fn test_dialog_abandoned_after_budget() {
        let modem = SimModem::new(ModemBehavior::Responsive);
        let mut sink = ready_sink(&modem);
        modem.set_behavior(ModemBehavior::Silent);

        sink.submit(job("+1", "x")).unwrap();
        run(&mut sink, 100, 5_000);
        assert_eq!(sink.pending(), 1);
        sink.step(5_110);
        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.stats().failed, 1);
    }
}
