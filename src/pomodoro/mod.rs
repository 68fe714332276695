pub mod clock;
pub mod engine;
pub mod listeners;
#[allow(clippy::module_inception)]
pub mod pomodoro;

pub use clock::{Clock, Timestamp};
pub use engine::{Engine, TimerState};
pub use listeners::Subscription;
pub use pomodoro::{Durations, DurationsPatch, Phase, format_mm_ss};
