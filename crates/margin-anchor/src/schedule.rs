//! Retry and debounce scheduling for restoration passes.
//!
//! Chat pages render responses late, so a single pass at load time misses
//! most anchors. [`RestoreScheduler`] runs a pass at each configured offset
//! from start and another after every quiet period following content
//! changes. Scheduled passes after the first are skipped once a pass has
//! restored everything.

use std::time::Duration;

use margin_core::config::ScheduleConfig;
use serde::Serialize;
use tokio::{
  sync::mpsc,
  time::{Instant, sleep_until},
};

use crate::RestoreReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Offsets from start, in order.
  pub delays:       Vec<Duration>,
  pub max_attempts: usize,
  pub debounce:     Duration,
}

impl From<&ScheduleConfig> for RetryPolicy {
  fn from(config: &ScheduleConfig) -> Self {
    Self {
      delays:       config.delays(),
      max_attempts: config.max_attempts,
      debounce:     config.debounce(),
    }
  }
}

impl Default for RetryPolicy {
  fn default() -> Self { Self::from(&ScheduleConfig::default()) }
}

impl RetryPolicy {
  /// Offsets at which scheduled passes run.
  pub fn offsets(&self) -> impl Iterator<Item = Duration> + '_ {
    self.delays.iter().copied().take(self.max_attempts)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum Trigger {
  /// The `attempt`-th scheduled pass, counting from zero.
  Scheduled { attempt: usize },
  /// A pass after content changes settled.
  ContentChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRecord {
  pub trigger: Trigger,
  /// Time since the scheduler started.
  pub at:      Duration,
  pub report:  RestoreReport,
}

pub struct RestoreScheduler {
  policy: RetryPolicy,
}

impl RestoreScheduler {
  pub fn new(policy: RetryPolicy) -> Self { Self { policy } }

  pub fn policy(&self) -> &RetryPolicy { &self.policy }

  /// Drive `pass` until the schedule is exhausted, `changes` is closed and
  /// no debounced pass is pending.
  ///
  /// Each message on `changes` reports a relevant content mutation and
  /// restarts the debounce timer.
  pub async fn run<F>(&self, mut changes: mpsc::Receiver<()>, mut pass: F) -> Vec<PassRecord>
  where
    F: FnMut(Trigger) -> RestoreReport,
  {
    let start = Instant::now();
    let mut schedule = self.policy.offsets().enumerate().peekable();
    let mut records = Vec::new();
    let mut complete = false;
    let mut pending: Option<Instant> = None;
    let mut listening = true;

    loop {
      let next_scheduled = schedule.peek().map(|(_, offset)| start + *offset);
      if next_scheduled.is_none() && pending.is_none() && !listening {
        break;
      }

      let trigger = tokio::select! {
        _ = sleep_until(next_scheduled.unwrap_or(start)), if next_scheduled.is_some() => {
          let Some((attempt, _)) = schedule.next() else { continue };
          if attempt > 0 && complete {
            tracing::debug!(attempt, "all highlights restored, skipping scheduled pass");
            continue;
          }
          Trigger::Scheduled { attempt }
        }
        _ = sleep_until(pending.unwrap_or(start)), if pending.is_some() => {
          pending = None;
          Trigger::ContentChanged
        }
        change = changes.recv(), if listening => {
          match change {
            Some(()) => pending = Some(Instant::now() + self.policy.debounce),
            None => listening = false,
          }
          continue;
        }
      };

      let report = pass(trigger);
      complete = report.is_complete();
      tracing::debug!(?trigger, restored = report.restored, attempted = report.attempted, "pass ran");
      records.push(PassRecord {
        trigger,
        at: start.elapsed(),
        report,
      });
    }
    records
  }
}
