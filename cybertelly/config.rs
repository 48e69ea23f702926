use crate::error::App;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_VOLUME: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    M3u,
    Tvh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TvhServer {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl Default for TvhServer {
    fn default() -> Self {
        Self {
            url: "http://192.168.178.201:9981".to_string(),
            username: "user".to_string(),
            password: "passw0rd".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Run the engine in a child process that can be killed when it hangs.
    pub out_of_process: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            out_of_process: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub language: String,
    pub source: SourceKind,
    pub volume: u8,
    pub m3u_file: String,
    pub tvh_server: TvhServer,
    /// `property=value` pairs applied to the engine at setup.
    pub engine_args: Vec<String>,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: system_language(),
            source: SourceKind::default(),
            volume: DEFAULT_VOLUME,
            m3u_file: "IPTV-de-plus.m3u".to_string(),
            tvh_server: TvhServer::default(),
            engine_args: Vec::new(),
            worker: WorkerConfig::default(),
        }
    }
}

fn system_language() -> String {
    let lang = std::env::var("LANG").unwrap_or_default();
    if lang.starts_with("de") {
        "de".to_string()
    } else {
        "en".to_string()
    }
}

impl Config {
    /// Reads the configuration, writing the defaults first if the file does not exist.
    pub async fn load(path: &Path) -> Result<Self, App> {
        if fs::metadata(path).await.is_err() {
            info!("Creating default configuration at {}", path.display());
            let config = Config::default();
            config.save(path).await?;
            return Ok(config);
        }
        let content = fs::read_to_string(path).await?;
        let mut config: Config = toml::from_str(&content)?;
        config.normalize();
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), App> {
        fs::write(path, toml::to_string_pretty(self)?).await?;
        Ok(())
    }

    fn normalize(&mut self) {
        if self.volume > 100 {
            warn!("Volume {} out of range, clamping to 100", self.volume);
            self.volume = 100;
        }
        if self.language != "de" && self.language != "en" {
            warn!("Unsupported language {}, using en", self.language);
            self.language = "en".to_string();
        }
    }
}

/// `$HOME/.config/cybertelly` and the directories below it.
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
}

impl Paths {
    pub fn from_home(home: &Path) -> Self {
        Self {
            root: home.join(".config").join("cybertelly"),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn m3u(&self) -> PathBuf {
        self.root.join("m3u")
    }

    pub async fn create_dirs(&self) -> Result<(), App> {
        for dir in [self.logs(), self.m3u()] {
            fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}
