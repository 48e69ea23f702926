use chrono::{DateTime, Local};
use log::warn;
use std::fmt;

/// Confirmed entries kept after truncation.
pub const CONFIRMED_HISTORY_LIMIT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayHistoryEntry {
    pub key: u64,
    pub timestamp: DateTime<Local>,
    pub source: String,
    pub channel_name: String,
    pub confirmed: bool,
}

impl fmt::Display for PlayHistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4} {} | {} | {} | {}",
            self.key,
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.source,
            self.channel_name,
            if self.confirmed {
                "confirmed"
            } else {
                "unconfirmed"
            }
        )
    }
}

/// Recent play attempts, ordered by key.
#[derive(Debug, Default)]
pub struct PlayHistory {
    last_key: u64,
    entries: Vec<PlayHistoryEntry>,
}

impl PlayHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an unconfirmed entry and returns its key. Keys are never reused.
    pub fn record(&mut self, source: &str, channel_name: &str) -> u64 {
        self.last_key += 1;
        self.entries.push(PlayHistoryEntry {
            key: self.last_key,
            timestamp: Local::now(),
            source: source.to_string(),
            channel_name: channel_name.to_string(),
            confirmed: false,
        });
        self.last_key
    }

    /// Marks `key` confirmed. Returns false if no such entry exists.
    pub fn reconcile(&mut self, key: u64, truncate: bool) -> bool {
        let found = match self.entries.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => {
                entry.confirmed = true;
                true
            }
            None => {
                warn!("Play confirmation for unknown history key {key}");
                false
            }
        };
        if truncate {
            self.truncate();
        }
        found
    }

    /// Drops the oldest confirmed entries beyond the limit. Unconfirmed entries stay.
    fn truncate(&mut self) {
        let confirmed = self.entries.iter().filter(|entry| entry.confirmed).count();
        let mut excess = confirmed.saturating_sub(CONFIRMED_HISTORY_LIMIT);
        if excess == 0 {
            return;
        }
        self.entries.retain(|entry| {
            if excess > 0 && entry.confirmed {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    pub fn entries(&self) -> &[PlayHistoryEntry] {
        &self.entries
    }

    /// Removes every entry for the log dump. Key allocation continues where it was.
    pub fn take_all(&mut self) -> Vec<PlayHistoryEntry> {
        std::mem::take(&mut self.entries)
    }
}
