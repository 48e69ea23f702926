//! Collects diagnostic records and writes them to the post-mortem log file.

use crate::error::App;
use crate::player::history::PlayHistoryEntry;
use crate::worker::protocol::DiagnosticRecord;
use chrono::Local;
use log::{error, info};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const LOG_FILE_NAME: &str = "cybertelly.log";
const MAX_ERROR_LINES: usize = 50;
const MAX_NOTIFICATION_LINES: usize = 50;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Default)]
struct Section {
    errors: usize,
    notifications: usize,
    lines: Vec<String>,
}

#[derive(Debug)]
pub struct DiagnosticLog {
    path: PathBuf,
    system_info: Vec<String>,
    sections: BTreeMap<String, Section>,
    history: Vec<PlayHistoryEntry>,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            system_info: system_info(),
            sections: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, record: DiagnosticRecord) {
        if record.is_error {
            error!("[{}] {}", record.category, record.message);
        } else {
            info!("[{}] {}", record.category, record.message);
        }

        let section = self.sections.entry(record.category).or_default();
        if record.is_error {
            if section.errors < MAX_ERROR_LINES {
                section.lines.push(format!(
                    "{:02} {} {}",
                    section.errors,
                    Local::now().format(TIMESTAMP_FORMAT),
                    record.message
                ));
            }
            section.errors += 1;
        } else {
            if section.notifications < MAX_NOTIFICATION_LINES {
                section.lines.push(format!("-- {}", record.message));
            }
            section.notifications += 1;
        }
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = DiagnosticRecord>) {
        for record in records {
            self.record(record);
        }
    }

    pub fn record_history(&mut self, entries: Vec<PlayHistoryEntry>) {
        self.history.extend(entries);
    }

    pub fn error_count(&self) -> usize {
        self.sections.values().map(|section| section.errors).sum()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("**********************************************\n");
        let _ = writeln!(
            out,
            "*  CyberTelly Log File  {}  *",
            Local::now().format(TIMESTAMP_FORMAT)
        );
        out.push_str("**********************************************\n");
        for line in &self.system_info {
            let _ = write!(out, "\n{line}");
        }
        for (category, section) in &self.sections {
            let _ = write!(out, "\n\nSource.....: {category}\n");
            let _ = writeln!(out, "ErrorCount.: {}", section.errors);
            out.push_str("Stack Trace:");
            if section.lines.is_empty() {
                out.push_str(" ----");
            }
            for line in &section.lines {
                let _ = write!(out, "\n  {line}");
            }
        }
        if !self.history.is_empty() {
            out.push_str("\n\nPlay history:");
            for entry in &self.history {
                let _ = write!(out, "\n  {entry}");
            }
        }
        out.push('\n');
        out
    }

    pub async fn save(&self) -> Result<(), App> {
        fs::write(&self.path, self.render()).await?;
        info!("Diagnostic log written to {}", self.path.display());
        Ok(())
    }
}

fn system_info() -> Vec<String> {
    let session_type = std::env::var("XDG_SESSION_TYPE").unwrap_or_else(|_| "----".to_string());
    vec![
        format!("Program version: {}", env!("CARGO_PKG_VERSION")),
        format!(
            "Platform.......: {} {}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ),
        format!("Session-Type...: {session_type}"),
    ]
}
