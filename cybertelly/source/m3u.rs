use crate::error::App;
use crate::source::Channel;
use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio::fs;

const EXTINF: &str = "#EXTINF:";

/// Reads a playlist file. Files that are not valid UTF-8 are read as Latin-1.
pub async fn load(path: &Path) -> Result<Vec<Channel>, App> {
    info!("Loading M3U playlist {}", path.display());
    let bytes = fs::read(path).await?;
    let channels = parse(&decode(bytes));
    if channels.is_empty() {
        warn!("No channels found in {}", path.display());
    }
    Ok(channels)
}

fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    }
}

pub fn parse(text: &str) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in text.lines().map(str::trim) {
        if let Some(info) = line.strip_prefix(EXTINF) {
            // `#EXTINF:<duration> <attributes>,<name>`
            pending_name = info.split(',').nth(1).map(|name| name.trim().to_string());
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(name) = pending_name.take() {
            channels.push(Channel {
                name,
                url: line.to_string(),
                uuid: None,
            });
        }
    }
    channels
}

/// The configured playlist inside `dir`, else the first `.m3u`/`.m3u8` file by name.
pub async fn find_playlist(dir: &Path, configured: &str) -> Result<Option<PathBuf>, App> {
    if !configured.is_empty() {
        let path = dir.join(configured);
        if fs::metadata(&path).await.is_ok_and(|meta| meta.is_file()) {
            return Ok(Some(path));
        }
        warn!("Configured playlist {configured} not found, falling back");
    }

    let mut candidates = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let lower = name.to_lowercase();
        if (lower.ends_with(".m3u") || lower.ends_with(".m3u8"))
            && entry.file_type().await?.is_file()
        {
            candidates.push(name);
        }
    }
    candidates.sort_by_key(|name| name.to_lowercase());
    Ok(candidates.first().map(|name| dir.join(name)))
}
