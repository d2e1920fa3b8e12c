//! # Operator Command Module
//!
//! The transport serving the operator dashboard runs outside the pipeline.
//! It talks to the `App` through an `OperatorHandle`, which queues commands
//! on a bounded channel; the app drains a few of them per poll and answers
//! each on its own one-shot reply channel.
//!
//! ## Key Components
//! - `OperatorCommand`: requests from the transport to the pipeline
//! - `OperatorHandle`: cloneable sender side, safe to move to another thread
//! - `OperatorQueue`: receiver side owned by the app

use crate::error::OperatorError;
use crate::push::{PatientView, SystemStatus};
use crate::session::RegistrationResponse;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

#[derive(Debug)]
pub enum OperatorCommand {
    /// Registration JSON as sent by the dashboard
    Register {
        payload: String,
        reply: Sender<RegistrationResponse>,
    },
    EndSession {
        reply: Sender<bool>,
    },
    /// Open a live feed of JSON records
    Connect {
        reply: Sender<Receiver<String>>,
    },
    Patient {
        reply: Sender<PatientView>,
    },
    Status {
        reply: Sender<SystemStatus>,
    },
}

#[derive(Debug, Clone)]
pub struct OperatorHandle {
    commands: Sender<OperatorCommand>,
}

impl OperatorHandle {
    fn submit<T>(
        &self,
        build: impl FnOnce(Sender<T>) -> OperatorCommand,
    ) -> Result<Receiver<T>, OperatorError> {
        let (reply, rx) = bounded(1);
        match self.commands.try_send(build(reply)) {
            Ok(()) => Ok(rx),
            Err(TrySendError::Full(_)) => Err(OperatorError::Busy),
            Err(TrySendError::Disconnected(_)) => Err(OperatorError::Closed),
        }
    }

    pub fn register(&self, payload: &str) -> Result<Receiver<RegistrationResponse>, OperatorError> {
        let payload = payload.to_string();
        self.submit(|reply| OperatorCommand::Register { payload, reply })
    }

    pub fn end_session(&self) -> Result<Receiver<bool>, OperatorError> {
        self.submit(|reply| OperatorCommand::EndSession { reply })
    }

    pub fn connect(&self) -> Result<Receiver<Receiver<String>>, OperatorError> {
        self.submit(|reply| OperatorCommand::Connect { reply })
    }

    pub fn patient(&self) -> Result<Receiver<PatientView>, OperatorError> {
        self.submit(|reply| OperatorCommand::Patient { reply })
    }

    pub fn status(&self) -> Result<Receiver<SystemStatus>, OperatorError> {
        self.submit(|reply| OperatorCommand::Status { reply })
    }
}

pub struct OperatorQueue {
    commands: Receiver<OperatorCommand>,
    per_poll: usize,
}

impl OperatorQueue {
    /// Create the queue and the handle for issuing commands
    pub fn new(capacity: usize, per_poll: usize) -> (Self, OperatorHandle) {
        let (tx, rx) = bounded(capacity.max(1));
        let queue = Self {
            commands: rx,
            per_poll: per_poll.max(1),
        };
        (queue, OperatorHandle { commands: tx })
    }

    /// Up to `per_poll` waiting commands, oldest first
    pub fn drain(&self) -> Vec<OperatorCommand> {
        let mut batch = Vec::new();
        while batch.len() < self.per_poll {
            match self.commands.try_recv() {
                Ok(command) => batch.push(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_is_bounded() {
        let (queue, handle) = OperatorQueue::new(16, 2);
        let _a = handle.end_session().unwrap();
        let _b = handle.end_session().unwrap();
        let _c = handle.end_session().unwrap();

        assert_eq!(queue.drain().len(), 2);
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_full_queue_is_busy() {
        let (_queue, handle) = OperatorQueue::new(1, 8);
        assert!(handle.status().is_ok());
        assert_eq!(handle.status().unwrap_err(), OperatorError::Busy);
    }

    #[test]
    fn test_closed_queue() {
        let (queue, handle) = OperatorQueue::new(4, 8);
        drop(queue);
        assert_eq!(handle.patient().unwrap_err(), OperatorError::Closed);
    }

    #[test]
    fn test_reply_reaches_caller() {
        let (queue, handle) = OperatorQueue::new(4, 8);
        let reply = handle.end_session().unwrap();
        for command in queue.drain() {
            if let OperatorCommand::EndSession { reply } = command {
                reply.send(false).unwrap();
            }
        }
        assert!(!reply.recv().unwrap());
    }
}
