use serde::{Deserialize, Serialize};

use crate::pomodoro::{Clock, DurationsPatch, Engine, Phase, TimerState};

/// Client requests, tagged by `action`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    Start {
        phase: Phase,
        #[serde(default)]
        minutes: Option<f64>,
    },
    Pause,
    Resume,
    Reset,
    Preview {
        phase: Phase,
    },
    SetDurations(DurationsPatch),
    SetAutoAdvance {
        enabled: bool,
    },
    SetLongBreakEvery {
        every: f64,
    },
    State,
    ListFiles,
    FetchFile {
        name: String,
    },
    /// The next binary frame on the connection is stored under `name`.
    UploadFile {
        name: String,
    },
}

impl ClientCommand {
    /// Runs a timer command against `engine`. File commands are left alone.
    pub fn apply<C: Clock>(self, engine: &mut Engine<C>) {
        match self {
            ClientCommand::Start { phase, minutes } => engine.start(phase, minutes),
            ClientCommand::Pause => engine.pause(),
            ClientCommand::Resume => engine.resume(),
            ClientCommand::Reset => engine.reset(),
            ClientCommand::Preview { phase } => engine.set_phase_preview(phase),
            ClientCommand::SetDurations(patch) => engine.set_durations(patch),
            ClientCommand::SetAutoAdvance { enabled } => engine.set_auto_advance(enabled),
            ClientCommand::SetLongBreakEvery { every } => engine.set_long_break_every(every),
            ClientCommand::State
            | ClientCommand::ListFiles
            | ClientCommand::FetchFile { .. }
            | ClientCommand::UploadFile { .. } => {}
        }
    }
}

#[derive(Debug, Serialize, Default)]
pub struct WebSocketResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TimerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<&'static str>,
}

impl WebSocketResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_state(state: TimerState) -> Self {
        Self {
            success: true,
            state: Some(state),
            ..Default::default()
        }
    }
}

/// Pushed to every connected client, tagged by `type`.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    State { state: TimerState },
    Finished { phase: Phase },
}
