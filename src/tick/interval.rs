use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::warn;

use super::message::{TickMessage, TickSender};
use super::{TickKind, TickSource};
use crate::pomodoro::clock::now_ms;

pub const FALLBACK_TICK_MS: u64 = 500; // Coarser cadence when polling in-runtime

/// Polls from a task on the current tokio runtime.
pub struct IntervalTicker {
    ticks: TickSender,
    task: Option<JoinHandle<()>>,
}

impl IntervalTicker {
    pub fn new(ticks: TickSender) -> Self {
        Self { ticks, task: None }
    }
}

impl TickSource for IntervalTicker {
    fn start(&mut self, interval_ms: u64) {
        self.stop();

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "no tokio runtime, interval ticker not started");
                return;
            }
        };

        let period = Duration::from_millis(interval_ms.max(FALLBACK_TICK_MS));
        let ticks = self.ticks.clone();
        self.task = Some(handle.spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if ticks.send(TickMessage::Tick { now: now_ms() }).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn kind(&self) -> TickKind {
        TickKind::Interval
    }
}

impl Drop for IntervalTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
