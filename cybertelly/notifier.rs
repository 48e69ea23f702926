use log::{error, info, warn};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerFailure {
    EngineSetup,
    Unresponsive,
    Terminated,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerFailure::EngineSetup => write!(f, "the video engine could not be set up"),
            WorkerFailure::Unresponsive => write!(f, "the media worker stopped responding"),
            WorkerFailure::Terminated => {
                write!(f, "the media worker terminated, restart the program")
            }
        }
    }
}

/// User-visible feedback. Nothing is ever read back from it.
pub trait Notifier {
    fn show_error(&mut self, failure: WorkerFailure);
    fn playback_error(&mut self, channel_name: &str);
    fn set_busy(&mut self, busy: bool);
}

pub fn playback_error_tooltip(language: &str, channel_name: &str) -> String {
    if language == "de" {
        format!("Streamingfehler: {channel_name}")
    } else {
        format!("Streaming error: {channel_name}")
    }
}

/// Headless notifier: logs and remembers what a window would display.
#[derive(Debug, Default)]
pub struct LogNotifier {
    language: String,
    pub busy: bool,
    pub playback_error: Option<String>,
    pub last_failure: Option<WorkerFailure>,
}

impl LogNotifier {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..Self::default()
        }
    }

    pub fn clear_playback_error(&mut self) {
        self.playback_error = None;
    }
}

impl Notifier for LogNotifier {
    fn show_error(&mut self, failure: WorkerFailure) {
        error!("Error: {failure}");
        self.last_failure = Some(failure);
    }

    fn playback_error(&mut self, channel_name: &str) {
        let tooltip = playback_error_tooltip(&self.language, channel_name);
        warn!("{tooltip}");
        self.playback_error = Some(tooltip);
    }

    fn set_busy(&mut self, busy: bool) {
        if busy != self.busy {
            info!("Busy indicator {}", if busy { "on" } else { "off" });
        }
        self.busy = busy;
    }
}
