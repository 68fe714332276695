use chrono::Utc;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub trait Clock {
    fn now_ms(&self) -> Timestamp;
}

/// Wall clock. Deadlines are absolute, so a suspended process catches up
/// on the first tick after it wakes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Timestamp {
        now_ms()
    }
}

pub fn now_ms() -> Timestamp {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
pub use manual::ManualClock;
