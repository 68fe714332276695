use serde::{Deserialize, Serialize};

pub const POMODORO_WORK_MINUTES: u64 = 25; // Default Pomodoro work time
pub const POMODORO_SHORT_BREAK_MINUTES: u64 = 5;
pub const POMODORO_LONG_BREAK_MINUTES: u64 = 15;
pub const LONG_BREAK_EVERY: u32 = 4; // Work sessions before a long break

const MS_PER_MINUTE: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    Work,
    BreakShort,
    BreakLong,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::Work => "WORK",
            Phase::BreakShort => "BREAK_SHORT",
            Phase::BreakLong => "BREAK_LONG",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Work => "Focus",
            Phase::BreakShort => "Short Break",
            Phase::BreakLong => "Long Break",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Phase::Idle => "⏸",
            Phase::Work => "💼",
            Phase::BreakShort => "☕",
            Phase::BreakLong => "🌿",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured phase lengths in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Durations {
    pub work: u64,
    pub break_short: u64,
    pub break_long: u64,
}

impl Default for Durations {
    fn default() -> Self {
        Self::from_minutes(
            POMODORO_WORK_MINUTES,
            POMODORO_SHORT_BREAK_MINUTES,
            POMODORO_LONG_BREAK_MINUTES,
        )
    }
}

impl Durations {
    /// Lengths past `u64::MAX` ms saturate.
    pub fn from_minutes(work: u64, break_short: u64, break_long: u64) -> Self {
        Self {
            work: work.saturating_mul(MS_PER_MINUTE),
            break_short: break_short.saturating_mul(MS_PER_MINUTE),
            break_long: break_long.saturating_mul(MS_PER_MINUTE),
        }
    }

    pub fn get(&self, phase: Phase) -> Option<u64> {
        match phase {
            Phase::Idle => None,
            Phase::Work => Some(self.work),
            Phase::BreakShort => Some(self.break_short),
            Phase::BreakLong => Some(self.break_long),
        }
    }

    pub fn merge(&mut self, patch: DurationsPatch) {
        if let Some(work) = patch.work {
            self.work = work;
        }
        if let Some(break_short) = patch.break_short {
            self.break_short = break_short;
        }
        if let Some(break_long) = patch.break_long {
            self.break_long = break_long;
        }
    }
}

/// Partial update for [`Durations`]; absent fields keep their value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationsPatch {
    #[serde(default)]
    pub work: Option<u64>,
    #[serde(default)]
    pub break_short: Option<u64>,
    #[serde(default)]
    pub break_long: Option<u64>,
}

/// Converts an optional minutes override into milliseconds.
/// Negative, NaN and infinite values are ignored.
pub fn minutes_to_ms(minutes: Option<f64>) -> Option<u64> {
    match minutes {
        Some(m) if m.is_finite() && m >= 0.0 => Some((m * MS_PER_MINUTE as f64).round() as u64),
        _ => None,
    }
}

/// Format milliseconds as "MM:SS"
pub fn format_mm_ss(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}
