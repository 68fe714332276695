use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::pomodoro::Timestamp;

pub const DEFAULT_TICK_MS: u64 = 250;

/// Emitted by a tick source: `{"type":"tick","now":<ms>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TickMessage {
    Tick { now: Timestamp },
}

impl TickMessage {
    pub fn now(&self) -> Timestamp {
        match self {
            TickMessage::Tick { now } => *now,
        }
    }
}

/// Sent to a tick source: `{"cmd":"start","ms":250}` or `{"cmd":"stop"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum TickControl {
    Start {
        #[serde(default = "default_tick_ms")]
        ms: u64,
    },
    Stop,
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

pub type TickSender = mpsc::UnboundedSender<TickMessage>;
pub type TickReceiver = mpsc::UnboundedReceiver<TickMessage>;

pub fn create_tick_channel() -> (TickSender, TickReceiver) {
    mpsc::unbounded_channel()
}
