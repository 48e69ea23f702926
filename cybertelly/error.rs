use flexi_logger::FlexiLoggerError;
use glib::BoolError;
use std::io;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use zbus::Error as ZbusError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum App {
    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Data parsing error: {0}")]
    DataParsing(String),

    #[error("Engine initialization error: {0}")]
    Init(String),

    #[error("Engine is not set up")]
    EngineNotReady,

    #[error("Engine state error: {0}")]
    State(String),

    #[error("Engine property error: {0}")]
    Property(String),

    #[error("TOML parsing error: {0}")]
    TomlParsing(String),

    #[error("TOML serialization error: {0}")]
    TomlSerializing(String),

    #[error("Logger initialization error: {0}")]
    Logger(String),

    #[error("Channel send error: {0}")]
    Send(String),

    #[error("Media worker error: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("ZBus error: {0}")]
    ZBus(String),
}

impl From<reqwest::Error> for App {
    fn from(error: reqwest::Error) -> Self {
        App::Network(error.to_string())
    }
}

impl From<io::Error> for App {
    fn from(error: io::Error) -> Self {
        App::Io(error.to_string())
    }
}

impl From<serde_json::Error> for App {
    fn from(error: serde_json::Error) -> Self {
        App::DataParsing(error.to_string())
    }
}

impl From<toml::de::Error> for App {
    fn from(error: toml::de::Error) -> Self {
        App::TomlParsing(error.to_string())
    }
}

impl From<toml::ser::Error> for App {
    fn from(error: toml::ser::Error) -> Self {
        App::TomlSerializing(error.to_string())
    }
}

impl From<FlexiLoggerError> for App {
    fn from(error: FlexiLoggerError) -> Self {
        App::Logger(error.to_string())
    }
}

impl<T> From<SendError<T>> for App {
    fn from(error: SendError<T>) -> Self {
        App::Send(error.to_string())
    }
}

impl From<BoolError> for App {
    fn from(error: BoolError) -> Self {
        App::Init(error.to_string())
    }
}

impl From<ZbusError> for App {
    fn from(error: ZbusError) -> Self {
        App::ZBus(error.to_string())
    }
}
