use notify_rust::Notification;

use crate::pomodoro::{Phase, TimerState};

const SUMMARY: &str = "Pomo Tick";

/// Body text for the notification shown once `finished` is over.
/// `next` is the state after the transition.
pub fn finished_message(finished: Phase, next: &TimerState) -> String {
    let minutes = next.remaining_ms / 60_000;
    match (finished, next.phase) {
        (Phase::Work, Phase::BreakLong) => {
            format!("Work session complete! Time for a {minutes}-minute long break.")
        }
        (Phase::Work, Phase::BreakShort) => {
            format!("Work session complete! Time for a {minutes}-minute break.")
        }
        (Phase::Work, _) => "Work session complete!".to_string(),
        (_, Phase::Work) => format!("Break is over! Starting {minutes}-minute work session."),
        _ => "Break is over!".to_string(),
    }
}

pub fn send_notification(message: &str) -> Result<(), Box<dyn std::error::Error>> {
    Notification::new()
        .summary(SUMMARY)
        .body(message)
        .timeout(0) // No auto-dismiss
        .show()?;
    Ok(())
}
