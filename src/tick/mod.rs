//! Periodic "check the time" pulses for the engine.
//!
//! A [`WorkerTicker`] runs on its own thread so ticks keep arriving while the
//! runtime is busy. If that thread can't be spawned, [`connect`] quietly hands
//! back an [`IntervalTicker`] polling from a tokio task instead. Both emit the
//! same [`TickMessage`](message::TickMessage), so consumers never need to know which one is live.

pub mod interval;
pub mod message;
pub mod worker;

use std::io;

use tracing::debug;

pub use interval::IntervalTicker;
pub use message::{DEFAULT_TICK_MS, TickReceiver, TickSender, create_tick_channel};
pub use worker::WorkerTicker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    Worker,
    Interval,
}

pub trait TickSource: Send {
    /// Begins emitting every `interval_ms`. Restarts if already running.
    fn start(&mut self, interval_ms: u64);

    /// Stops emitting. Harmless when not started.
    fn stop(&mut self);

    fn kind(&self) -> TickKind;
}

pub fn connect(ticks: TickSender) -> Box<dyn TickSource> {
    connect_with(ticks, WorkerTicker::spawn)
}

pub fn connect_with<F>(ticks: TickSender, spawn_worker: F) -> Box<dyn TickSource>
where
    F: FnOnce(TickSender) -> io::Result<WorkerTicker>,
{
    match spawn_worker(ticks.clone()) {
        Ok(worker) => Box::new(worker),
        Err(e) => {
            debug!(error = %e, "tick worker unavailable, falling back to interval polling");
            Box::new(IntervalTicker::new(ticks))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::interval::FALLBACK_TICK_MS;
    use super::message::TickMessage;
    use super::*;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    async fn next_tick(rx: &mut TickReceiver) -> TickMessage {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("tick should arrive")
            .expect("channel open")
    }

    async fn drain_after_stop(rx: &mut TickReceiver) {
        // A tick may already be in flight when stop lands.
        sleep(Duration::from_millis(100)).await;
        while rx.try_recv().is_ok() {}
    }

    #[tokio::test]
    async fn worker_emits_timestamps() {
        let (tx, mut rx) = create_tick_channel();
        let mut source = connect(tx);
        assert_eq!(source.kind(), TickKind::Worker);

        let before = crate::pomodoro::clock::now_ms();
        source.start(10);
        let first = next_tick(&mut rx).await;
        let second = next_tick(&mut rx).await;
        assert!(first.now() >= before);
        assert!(second.now() >= first.now());
    }

    #[tokio::test]
    async fn worker_stop_halts_emission() {
        let (tx, mut rx) = create_tick_channel();
        let mut source = connect(tx);
        source.start(10);
        next_tick(&mut rx).await;

        source.stop();
        drain_after_stop(&mut rx).await;
        sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());

        // Stop twice is fine, and start works again afterwards.
        source.stop();
        source.start(10);
        next_tick(&mut rx).await;
    }

    #[tokio::test]
    async fn worker_restart_switches_cadence() {
        let (tx, mut rx) = create_tick_channel();
        let mut source = connect(tx);
        source.start(1_000);
        source.start(20);

        // Only the 20 ms cadence can deliver this well before a second.
        timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("restarted cadence should tick")
            .expect("channel open");

        source.start(1_000);
        drain_after_stop(&mut rx).await;
        sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn falls_back_when_worker_cannot_spawn() {
        let (tx, mut rx) = create_tick_channel();
        let mut source = connect_with(tx, |_| Err(io::Error::other("no threads")));
        assert_eq!(source.kind(), TickKind::Interval);

        source.start(DEFAULT_TICK_MS);
        let tick = next_tick(&mut rx).await;
        assert!(tick.now() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_uses_coarser_cadence() {
        let (tx, mut rx) = create_tick_channel();
        let mut source = IntervalTicker::new(tx);
        source.start(DEFAULT_TICK_MS);

        sleep(Duration::from_millis(FALLBACK_TICK_MS - 10)).await;
        assert!(rx.try_recv().is_err());
        sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_ok());

        source.stop();
        sleep(Duration::from_millis(FALLBACK_TICK_MS * 3)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_restart_replaces_running_stream() {
        let (tx, mut rx) = create_tick_channel();
        let mut source = IntervalTicker::new(tx);
        source.start(2_000);
        sleep(Duration::from_millis(1_000)).await;
        assert!(rx.try_recv().is_err());

        source.start(FALLBACK_TICK_MS);
        // New stream ticks at 1500 and 2000; the old one would add a tick at 2000.
        sleep(Duration::from_millis(1_490)).await;
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 2);

        sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_worker_joins_thread() {
        let (tx, mut rx) = create_tick_channel();
        let mut source = connect(tx);
        source.start(5);
        next_tick(&mut rx).await;
        drop(source);

        drain_after_stop(&mut rx).await;
        // Every sender is gone once the thread has exited.
        assert!(rx.recv().await.is_none());
    }
}
