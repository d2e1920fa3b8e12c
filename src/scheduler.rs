//! # Scheduler Module
//!
//! Cooperative periodic task table. `due` is asked once per poll and returns
//! every task whose period has lapsed, always in priority order
//! (sample, then aggregate, then log), so a snapshot built in the same
//! poll already sees that poll's samples.
//!
//! A fired task's next deadline counts from the time it actually fired.
//! Late polls therefore never cause a burst of catch-up firings.

use crate::config::ScheduleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Read every channel and feed the detectors
    Sample,
    /// Build and publish a snapshot, push it and run the alert checks
    Aggregate,
    /// Append a CSV row
    Log,
}

#[derive(Debug, Clone)]
struct Entry {
    task: Task,
    period_ms: u64,
    last_fire_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new(config: &ScheduleConfig, start_ms: u64) -> Self {
        let entry = |task: Task, period_ms: u64| Entry {
            task,
            period_ms: period_ms.max(1),
            last_fire_ms: start_ms,
        };
        Self {
            entries: vec![
                entry(Task::Sample, config.sample_period_ms),
                entry(Task::Aggregate, config.ui_period_ms),
                entry(Task::Log, config.log_period_ms),
            ],
        }
    }

    /// Tasks to run now, in priority order; marks them as fired
    pub fn due(&mut self, now: u64) -> Vec<Task> {
        let mut fired = Vec::new();
        for entry in &mut self.entries {
            if now.saturating_sub(entry.last_fire_ms) >= entry.period_ms {
                entry.last_fire_ms = now;
                fired.push(entry.task);
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_when_all_due() {
        let mut scheduler = Scheduler::new(&ScheduleConfig::default(), 0);
        assert!(scheduler.due(50).is_empty());
        assert_eq!(scheduler.due(100), vec![Task::Sample]);
        assert_eq!(scheduler.due(1000), vec![Task::Sample, Task::Aggregate]);
        assert_eq!(
            scheduler.due(30_000),
            vec![Task::Sample, Task::Aggregate, Task::Log]
        );
    }

    #[test]
    fn test_late_poll_fires_once() {
        let mut scheduler = Scheduler::new(&ScheduleConfig::default(), 0);
        assert_eq!(scheduler.due(550), vec![Task::Sample]);
        assert!(scheduler.due(600).is_empty());
        assert_eq!(scheduler.due(650), vec![Task::Sample]);
    }

    #[test]
    fn test_ten_ms_polls_sample_every_hundred() {
        let mut scheduler = Scheduler::new(&ScheduleConfig::default(), 0);
        let mut samples = 0;
        let mut aggregates = 0;
        for t in (10..=10_000).step_by(10) {
            for task in scheduler.due(t) {
                match task {
                    Task::Sample => samples += 1,
                    Task::Aggregate => aggregates += 1,
                    Task::Log => {}
                }
            }
        }
        assert_eq!(samples, 100);
        assert_eq!(aggregates, 10);
    }
}
