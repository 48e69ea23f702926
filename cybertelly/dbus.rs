use log::{error, info};
use tokio::sync::{mpsc, oneshot, watch};
use zbus::{fdo, interface, ConnectionBuilder};

use crate::error::App;
use crate::player::Intent;

pub const BUS_NAME: &str = "org.cybertelly.Player";
pub const OBJECT_PATH: &str = "/org/cybertelly/Player";

#[derive(Clone)]
pub struct PlayerDBus {
    tx: mpsc::Sender<Intent>,
}

impl PlayerDBus {
    async fn send(&self, intent: Intent) -> fdo::Result<()> {
        self.tx
            .send(intent)
            .await
            .map_err(|e| fdo::Error::Failed(format!("Player is gone: {e}")))
    }

    async fn ask<T>(&self, intent: impl FnOnce(oneshot::Sender<T>) -> Intent) -> fdo::Result<T> {
        let (reply, answer) = oneshot::channel();
        self.send(intent(reply)).await?;
        answer
            .await
            .map_err(|_| fdo::Error::Failed("Player dropped the request".into()))
    }
}

fn failed(error: App) -> fdo::Error {
    fdo::Error::Failed(error.to_string())
}

#[interface(name = "org.cybertelly.Player")]
impl PlayerDBus {
    async fn test_connection(&self) -> fdo::Result<()> {
        Ok(())
    }

    /// `number` is the 1-based position in the channel list.
    async fn play(&self, number: u32) -> fdo::Result<String> {
        let index = usize::try_from(number)
            .ok()
            .and_then(|number| number.checked_sub(1))
            .ok_or_else(|| fdo::Error::InvalidArgs("Channel numbers start at 1".into()))?;
        self.ask(|reply| Intent::PlayChannel(index, reply))
            .await?
            .map_err(failed)
    }

    async fn play_name(&self, name: String) -> fdo::Result<String> {
        self.ask(|reply| Intent::PlayName(name, reply))
            .await?
            .map_err(failed)
    }

    async fn stop(&self) -> fdo::Result<()> {
        self.send(Intent::Stop).await
    }

    async fn set_volume(&self, level: u8) -> fdo::Result<()> {
        if level > 100 {
            return Err(fdo::Error::InvalidArgs("Volume must be 0..=100".into()));
        }
        self.send(Intent::SetVolume(level)).await
    }

    async fn toggle_mute(&self) -> fdo::Result<()> {
        self.send(Intent::ToggleMute).await
    }

    async fn list_channels(&self) -> fdo::Result<Vec<String>> {
        self.ask(Intent::ListChannels).await
    }

    async fn status(&self) -> fdo::Result<String> {
        self.ask(Intent::Status).await
    }

    async fn quit(&self) -> fdo::Result<()> {
        self.send(Intent::Quit).await
    }
}

pub async fn run_dbus_server(
    intent_sender: mpsc::Sender<Intent>,
    stop_signal: watch::Sender<()>,
) -> Result<(), App> {
    let player_dbus = PlayerDBus { tx: intent_sender };

    let _connection = ConnectionBuilder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, player_dbus)?
        .build()
        .await?;
    info!("DBus interface {BUS_NAME} ready");

    let mut stop_receiver = stop_signal.subscribe();
    if stop_receiver.changed().await.is_err() {
        error!("Stop signal sender dropped");
    }
    info!("Stop signal received, shutting down DBus server...");
    Ok(())
}
