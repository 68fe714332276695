use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::clock::{Clock, SystemClock, Timestamp};
use super::listeners::FinishListeners;
use super::pomodoro::{Durations, DurationsPatch, LONG_BREAK_EVERY, Phase, minutes_to_ms};

/// Everything the display needs. While running, `remaining_ms` is derived
/// from `target_end_at`; while stopped it is the frozen remainder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub phase: Phase,
    pub is_running: bool,
    pub remaining_ms: u64,
    pub target_end_at: Option<Timestamp>,
    /// Completed work sessions since the last long break.
    pub cycle_count: u32,
    pub durations: Durations,
    pub auto_advance: bool,
    pub long_break_every: u32,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            is_running: false,
            remaining_ms: 0,
            target_end_at: None,
            cycle_count: 0,
            durations: Durations::default(),
            auto_advance: true,
            long_break_every: LONG_BREAK_EVERY,
        }
    }
}

impl TimerState {
    fn run(&mut self, phase: Phase, duration: u64, now: Timestamp) {
        self.phase = phase;
        self.is_running = true;
        self.remaining_ms = duration;
        self.target_end_at = Some(now.saturating_add_unsigned(duration));
    }

    fn go_idle(&mut self) {
        self.phase = Phase::Idle;
        self.is_running = false;
        self.remaining_ms = 0;
        self.target_end_at = None;
    }
}

/// Phase-cycling countdown. All operations are total: bad input is clamped
/// or ignored, never an error.
pub struct Engine<C: Clock = SystemClock> {
    state: TimerState,
    listeners: FinishListeners,
    clock: C,
}

impl Engine<SystemClock> {
    pub fn new(durations: Durations, auto_advance: bool, long_break_every: u32) -> Self {
        Self::with_clock(SystemClock, durations, auto_advance, long_break_every)
    }
}

impl<C: Clock> Engine<C> {
    pub fn with_clock(
        clock: C,
        durations: Durations,
        auto_advance: bool,
        long_break_every: u32,
    ) -> Self {
        Self {
            state: TimerState {
                durations,
                auto_advance,
                long_break_every: long_break_every.max(1),
                ..TimerState::default()
            },
            listeners: FinishListeners::new(),
            clock,
        }
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn snapshot(&self) -> TimerState {
        self.state.clone()
    }

    /// Shared handle to the finish listener registry.
    pub fn listeners(&self) -> FinishListeners {
        self.listeners.clone()
    }

    /// Starts `phase` from its full length, or from `minutes` when given.
    /// Idle is not startable.
    pub fn start(&mut self, phase: Phase, minutes: Option<f64>) {
        let Some(configured) = self.state.durations.get(phase) else {
            debug!("ignoring start of idle phase");
            return;
        };
        let duration = minutes_to_ms(minutes).unwrap_or(configured);
        let now = self.clock.now_ms();
        self.state.run(phase, duration, now);
        info!(phase = %phase, duration_ms = duration, "phase started");
    }

    pub fn pause(&mut self) {
        let Some(target) = self.state.target_end_at else {
            return;
        };
        let remaining = target.saturating_sub(self.clock.now_ms()).max(0) as u64;
        self.state.is_running = false;
        self.state.remaining_ms = remaining;
        self.state.target_end_at = None;
        debug!(phase = %self.state.phase, remaining_ms = remaining, "paused");
    }

    /// Continues a paused countdown. A running countdown keeps its deadline.
    pub fn resume(&mut self) {
        if self.state.is_running || self.state.remaining_ms == 0 {
            return;
        }
        let now = self.clock.now_ms();
        self.state.target_end_at = Some(now.saturating_add_unsigned(self.state.remaining_ms));
        self.state.is_running = true;
        debug!(phase = %self.state.phase, remaining_ms = self.state.remaining_ms, "resumed");
    }

    /// Back to idle with a fresh cycle. Configuration is kept.
    pub fn reset(&mut self) {
        self.state.go_idle();
        self.state.cycle_count = 0;
        debug!("reset");
    }

    /// Shows `phase` at full length without starting it. Ignored while a
    /// countdown is running, since it would drop the active deadline.
    pub fn set_phase_preview(&mut self, phase: Phase) {
        if self.state.is_running {
            debug!(phase = %phase, "ignoring preview while running");
            return;
        }
        let Some(duration) = self.state.durations.get(phase) else {
            return;
        };
        self.state.phase = phase;
        self.state.is_running = false;
        self.state.remaining_ms = duration;
        self.state.target_end_at = None;
    }

    /// Reconciles the countdown against `now`. Returns the phase that just
    /// finished, if any. Listeners fire before the transition, and any new
    /// deadline is based on `now` rather than a fresh clock read.
    pub fn tick(&mut self, now: Timestamp) -> Option<Phase> {
        if !self.state.is_running {
            return None;
        }
        let target = self.state.target_end_at?;
        let diff = target.saturating_sub(now);
        if diff > 0 {
            self.state.remaining_ms = diff as u64;
            return None;
        }

        let finished = self.state.phase;
        self.listeners.emit(finished);
        self.advance(finished, now);
        info!(
            finished = %finished,
            next = %self.state.phase,
            cycle = self.state.cycle_count,
            "phase finished"
        );
        Some(finished)
    }

    fn advance(&mut self, finished: Phase, now: Timestamp) {
        let state = &mut self.state;
        match finished {
            Phase::Work => {
                let new_cycle = state.cycle_count.saturating_add(1);
                if !state.auto_advance {
                    state.go_idle();
                    state.cycle_count = new_cycle;
                } else if new_cycle >= state.long_break_every {
                    state.run(Phase::BreakLong, state.durations.break_long, now);
                    state.cycle_count = 0;
                } else {
                    state.run(Phase::BreakShort, state.durations.break_short, now);
                    state.cycle_count = new_cycle;
                }
            }
            Phase::BreakShort | Phase::BreakLong => {
                if state.auto_advance {
                    state.run(Phase::Work, state.durations.work, now);
                } else {
                    state.go_idle();
                }
            }
            Phase::Idle => state.go_idle(),
        }
    }

    pub fn set_durations(&mut self, patch: DurationsPatch) {
        self.state.durations.merge(patch);
    }

    pub fn set_auto_advance(&mut self, auto_advance: bool) {
        self.state.auto_advance = auto_advance;
    }

    /// Floors `every` and clamps it to at least 1.
    pub fn set_long_break_every(&mut self, every: f64) {
        let every = every.floor();
        self.state.long_break_every = if every >= 1.0 {
            every.min(u32::MAX as f64) as u32
        } else {
            1
        };
    }
}
