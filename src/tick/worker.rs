use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::message::{TickControl, TickMessage, TickSender};
use super::{TickKind, TickSource};
use crate::pomodoro::clock::now_ms;

/// Ticks from a dedicated OS thread, so a busy runtime can't starve it.
pub struct WorkerTicker {
    control: Option<mpsc::Sender<TickControl>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerTicker {
    pub fn spawn(ticks: TickSender) -> io::Result<Self> {
        let (control_tx, control_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("tick-worker".to_string())
            .spawn(move || run(control_rx, ticks))?;
        Ok(Self {
            control: Some(control_tx),
            handle: Some(handle),
        })
    }

    fn send(&self, control: TickControl) {
        if let Some(ref tx) = self.control {
            // The thread only goes away once the tick receiver is dropped.
            let _ = tx.send(control);
        }
    }
}

impl TickSource for WorkerTicker {
    fn start(&mut self, interval_ms: u64) {
        self.stop();
        self.send(TickControl::Start { ms: interval_ms });
    }

    fn stop(&mut self) {
        self.send(TickControl::Stop);
    }

    fn kind(&self) -> TickKind {
        TickKind::Worker
    }
}

impl Drop for WorkerTicker {
    fn drop(&mut self) {
        // Disconnecting the control channel ends the thread's loop.
        self.control.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(control: mpsc::Receiver<TickControl>, ticks: TickSender) {
    let mut cadence: Option<Duration> = None;
    let mut next = Instant::now();

    loop {
        let command = match cadence {
            None => match control.recv() {
                Ok(command) => command,
                Err(_) => return,
            },
            Some(period) => {
                let wait = next.saturating_duration_since(Instant::now());
                match control.recv_timeout(wait) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        if ticks.send(TickMessage::Tick { now: now_ms() }).is_err() {
                            return;
                        }
                        next += period;
                        let now = Instant::now();
                        if next <= now {
                            // Fell behind; skip the missed beats instead of bursting.
                            next = now + period;
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        };

        match command {
            TickControl::Start { ms } => {
                let period = Duration::from_millis(ms.max(1));
                cadence = Some(period);
                next = Instant::now() + period;
            }
            TickControl::Stop => cadence = None,
        }
    }
}
