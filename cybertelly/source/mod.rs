pub mod m3u;
pub mod tvh;

use crate::config::{Config, SourceKind};
use crate::error::App;
use log::warn;
use std::path::{Path, PathBuf};
use tvh::TvhClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub url: String,
    /// Set for TVHeadend channels; used for EPG lookups.
    pub uuid: Option<String>,
}

/// Where the channel list comes from.
#[derive(Debug, Clone)]
pub enum ChannelSource {
    M3u { dir: PathBuf, file: String },
    Tvh(TvhClient),
}

impl ChannelSource {
    pub fn from_config(config: &Config, m3u_dir: &Path) -> Result<Self, App> {
        Ok(match config.source {
            SourceKind::M3u => ChannelSource::M3u {
                dir: m3u_dir.to_path_buf(),
                file: config.m3u_file.clone(),
            },
            SourceKind::Tvh => ChannelSource::Tvh(TvhClient::new(config.tvh_server.clone())?),
        })
    }

    /// Short name stored in the play history.
    pub fn label(&self) -> &'static str {
        match self {
            ChannelSource::M3u { .. } => "m3u",
            ChannelSource::Tvh(_) => "tvh",
        }
    }

    pub async fn channels(&self) -> Result<Vec<Channel>, App> {
        match self {
            ChannelSource::M3u { dir, file } => match m3u::find_playlist(dir, file).await? {
                Some(path) => m3u::load(&path).await,
                None => {
                    warn!("No M3U playlist in {}", dir.display());
                    Ok(Vec::new())
                }
            },
            ChannelSource::Tvh(client) => client.channels().await,
        }
    }

    /// Channel name, plus the upcoming programme for TVHeadend channels.
    pub async fn tooltip(&self, channel: &Channel) -> String {
        match (self, channel.uuid.as_deref()) {
            (ChannelSource::Tvh(client), Some(uuid)) => match client.epg(uuid).await {
                Ok(events) => tvh::epg_tooltip(&channel.name, &events),
                Err(e) => {
                    warn!("EPG lookup for {} failed: {e}", channel.name);
                    channel.name.trim().to_string()
                }
            },
            _ => channel.name.trim().to_string(),
        }
    }
}

/// Case-insensitive lookup by channel name.
pub fn find_by_name<'a>(channels: &'a [Channel], name: &str) -> Option<&'a Channel> {
    let wanted = name.trim().to_lowercase();
    channels
        .iter()
        .find(|channel| channel.name.to_lowercase() == wanted)
}
