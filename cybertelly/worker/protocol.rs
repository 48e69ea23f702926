//! Messages exchanged between the control side and the media worker.
//!
//! Four one-directional unbounded channels connect the two sides: commands
//! flow to the worker, status replies, liveness events and diagnostics flow
//! back. Status replies carry no correlation id, so at most one `GetInfo`
//! may be outstanding at a time.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Volume reading reported while the engine's audio output is not ready.
pub const VOLUME_UNAVAILABLE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    SetupEngine {
        window_handle: u64,
        engine_args: Vec<String>,
        diagnostic_tag: String,
    },
    SetMedia {
        url: String,
    },
    Play {
        history_key: u64,
    },
    Stop,
    SetVolume {
        level: u8,
    },
    GetInfo {
        kind: InfoKind,
    },
    CheckAlive,
    Exit,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetupEngine { .. } => "SetupEngine",
            Command::SetMedia { .. } => "SetMedia",
            Command::Play { .. } => "Play",
            Command::Stop => "Stop",
            Command::SetVolume { .. } => "SetVolume",
            Command::GetInfo { .. } => "GetInfo",
            Command::CheckAlive => "CheckAlive",
            Command::Exit => "Exit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoKind {
    EngineReady,
    PlayerState,
    Volume,
    StateAndVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    NothingSpecial,
    Opening,
    Buffering,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusReply {
    EngineReady(bool),
    PlayerState(PlayerState),
    Volume(i32),
    StateAndVolume(PlayerState, i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LivenessEvent {
    IsAlive,
    PlayConfirmed { history_key: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub category: String,
    pub message: String,
    pub is_error: bool,
    pub is_notification: bool,
}

impl DiagnosticRecord {
    pub fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
            is_error: true,
            is_notification: false,
        }
    }

    pub fn notification(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
            is_error: false,
            is_notification: true,
        }
    }
}

/// Anything the worker sends back, framed as one line on the stdio transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerMessage {
    Status(StatusReply),
    Liveness(LivenessEvent),
    Diagnostic(DiagnosticRecord),
}

/// Worker-side ends of the four channels.
pub struct WorkerEndpoints {
    pub commands: UnboundedReceiver<Command>,
    pub status: UnboundedSender<StatusReply>,
    pub liveness: UnboundedSender<LivenessEvent>,
    pub diagnostics: UnboundedSender<DiagnosticRecord>,
}

/// Control-side ends of the four channels.
pub struct ControlEndpoints {
    pub commands: UnboundedSender<Command>,
    pub status: UnboundedReceiver<StatusReply>,
    pub liveness: UnboundedReceiver<LivenessEvent>,
    pub diagnostics: UnboundedReceiver<DiagnosticRecord>,
}

pub fn channels() -> (ControlEndpoints, WorkerEndpoints) {
    let (command_sender, command_receiver) = mpsc::unbounded_channel();
    let (status_sender, status_receiver) = mpsc::unbounded_channel();
    let (liveness_sender, liveness_receiver) = mpsc::unbounded_channel();
    let (diagnostic_sender, diagnostic_receiver) = mpsc::unbounded_channel();

    (
        ControlEndpoints {
            commands: command_sender,
            status: status_receiver,
            liveness: liveness_receiver,
            diagnostics: diagnostic_receiver,
        },
        WorkerEndpoints {
            commands: command_receiver,
            status: status_sender,
            liveness: liveness_sender,
            diagnostics: diagnostic_sender,
        },
    )
}
