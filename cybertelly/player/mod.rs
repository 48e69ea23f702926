pub mod history;
pub mod session;
pub mod status;
pub mod supervisor;

use crate::config::Config;
use crate::diagnostics::DiagnosticLog;
use crate::error::App;
use crate::notifier::{LogNotifier, Notifier, WorkerFailure};
use crate::source::{find_by_name, Channel, ChannelSource};
use crate::worker::protocol::DiagnosticRecord;
use log::{error, info, warn};
use session::PlaybackSession;
use status::POLL_INTERVAL;
use std::fmt::Write as _;
use std::path::PathBuf;
use supervisor::{Supervisor, Verdict, LIVENESS_INTERVAL, MAX_ALIVE_COUNT};
use tokio::signal;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

const CHANNELS_CATEGORY: &str = "Channels";

/// Requests from the D-Bus interface.
#[derive(Debug)]
pub enum Intent {
    /// Zero-based position in the channel list.
    PlayChannel(usize, oneshot::Sender<Result<String, App>>),
    PlayName(String, oneshot::Sender<Result<String, App>>),
    Stop,
    SetVolume(u8),
    ToggleMute,
    ListChannels(oneshot::Sender<Vec<String>>),
    Status(oneshot::Sender<String>),
    Quit,
}

/// The control side: owns the session, the supervisor and the diagnostic log.
pub struct Player {
    session: PlaybackSession,
    supervisor: Supervisor,
    notifier: LogNotifier,
    log: DiagnosticLog,
    source: ChannelSource,
    channels: Vec<Channel>,
    config: Option<(Config, PathBuf)>,
    worker_dead: bool,
}

impl Player {
    pub fn new(
        session: PlaybackSession,
        source: ChannelSource,
        log: DiagnosticLog,
        notifier: LogNotifier,
    ) -> Self {
        Self {
            session,
            supervisor: Supervisor::new(),
            notifier,
            log,
            source,
            channels: Vec::new(),
            config: None,
            worker_dead: false,
        }
    }

    /// Volume changes are written back to this file on exit.
    pub fn with_config(mut self, config: Config, path: PathBuf) -> Self {
        self.config = Some((config, path));
        self
    }

    pub async fn load_channels(&mut self) {
        self.channels = match self.source.channels().await {
            Ok(channels) => channels,
            Err(e) => {
                warn!("Failed to load channels: {e}");
                self.log.record(DiagnosticRecord::notification(
                    CHANNELS_CATEGORY,
                    format!("{} channel list: {e}", self.source.label()),
                ));
                Vec::new()
            }
        };
        info!("{} channels available", self.channels.len());
    }

    /// Sets up the engine; a failure is reported once and the player keeps running.
    pub async fn setup_engine(&mut self, window_handle: u64, engine_args: Vec<String>) -> bool {
        let ready = self
            .session
            .setup_engine(
                window_handle,
                engine_args,
                crate::worker::DEFAULT_DIAGNOSTIC_TAG,
            )
            .await;
        if !ready {
            self.notifier.show_error(WorkerFailure::EngineSetup);
        }
        self.log.extend(self.session.worker_mut().drain_diagnostics());
        ready
    }

    pub async fn run(
        mut self,
        mut intents: mpsc::Receiver<Intent>,
        stop_signal: watch::Sender<()>,
    ) -> Result<(), App> {
        let mut stop_receiver = stop_signal.subscribe();
        let mut liveness = time::interval_at(Instant::now() + LIVENESS_INTERVAL, LIVENESS_INTERVAL);
        let mut status = time::interval(POLL_INTERVAL);
        status.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.supervisor.start(&self.session);

        loop {
            tokio::select! {
                intent = intents.recv() => match intent {
                    Some(Intent::Quit) | None => break,
                    Some(intent) => self.handle(intent).await,
                },
                _ = liveness.tick(), if !self.supervisor.is_stopped() => self.check_liveness().await,
                _ = status.tick(), if self.session.is_polling() => {
                    self.session.poll_status(&mut self.notifier).await;
                }
                _ = stop_receiver.changed() => break,
                _ = signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            }
        }

        self.shutdown().await;
        let _ = stop_signal.send(());
        Ok(())
    }

    async fn handle(&mut self, intent: Intent) {
        match intent {
            Intent::PlayChannel(index, reply) => {
                let channel = self.channels.get(index).cloned().ok_or_else(|| {
                    App::DataParsing(format!("No channel number {}", index + 1))
                });
                let result = match channel {
                    Ok(channel) => self.play(&channel).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Intent::PlayName(name, reply) => {
                let channel = find_by_name(&self.channels, &name)
                    .cloned()
                    .ok_or_else(|| App::DataParsing(format!("No channel named {name}")));
                let result = match channel {
                    Ok(channel) => self.play(&channel).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Intent::Stop => {
                if let Err(e) = self.session.stop().await {
                    error!("Stop failed: {e}");
                }
                self.notifier.set_busy(false);
            }
            Intent::SetVolume(level) => {
                if let Err(e) = self.session.set_volume(level) {
                    error!("{e}");
                }
            }
            Intent::ToggleMute => match self.session.toggle_mute() {
                Ok(muted) => info!("Muted: {muted}"),
                Err(e) => error!("{e}"),
            },
            Intent::ListChannels(reply) => {
                let names = self
                    .channels
                    .iter()
                    .map(|channel| channel.name.clone())
                    .collect();
                let _ = reply.send(names);
            }
            Intent::Status(reply) => {
                let status = self.status().await;
                let _ = reply.send(status);
            }
            Intent::Quit => {}
        }
    }

    async fn play(&mut self, channel: &Channel) -> Result<String, App> {
        if self.worker_dead {
            return Err(App::Worker(WorkerFailure::Terminated.to_string()));
        }
        self.notifier.clear_playback_error();
        self.session.request_play(self.source.label(), channel).await?;
        Ok(channel.name.clone())
    }

    async fn status(&mut self) -> String {
        let mut out = String::new();
        if self.worker_dead {
            let _ = writeln!(out, "Worker: {}", WorkerFailure::Terminated);
        } else {
            let state = self.session.player_state().await;
            let _ = writeln!(out, "State: {state:?}");
            let _ = writeln!(
                out,
                "Session: {:?}, heartbeat {}/{MAX_ALIVE_COUNT}",
                self.session.poll_phase(),
                self.supervisor.alive_count()
            );
        }
        let _ = writeln!(
            out,
            "Engine: {}",
            if self.session.engine_ready() {
                "ready"
            } else {
                "not ready"
            }
        );
        let _ = write!(out, "Volume: {}", self.session.volume());
        if self.session.is_muted() {
            out.push_str(" (muted)");
        }
        out.push('\n');

        let current = self
            .session
            .current_channel()
            .and_then(|name| find_by_name(&self.channels, name))
            .cloned();
        if let Some(channel) = current {
            let tooltip = self.source.tooltip(&channel).await;
            let _ = writeln!(out, "Channel: {tooltip}");
        }
        if let Some(error) = &self.notifier.playback_error {
            let _ = writeln!(out, "{error}");
        }
        if let Some(failure) = self.notifier.last_failure {
            let _ = writeln!(out, "Last failure: {failure}");
        }
        out
    }

    async fn check_liveness(&mut self) {
        let verdict = self.supervisor.tick(&mut self.session, &mut self.notifier);
        self.log.extend(self.session.worker_mut().drain_diagnostics());
        if verdict == Verdict::Dead && !self.worker_dead {
            self.worker_dead = true;
            self.session.terminate(&mut self.log);
            if let Err(e) = self.log.save().await {
                error!("Failed to write diagnostic log: {e}");
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down");
        if !self.worker_dead {
            let outcome = self.session.shutdown(&mut self.log).await;
            info!("Media worker shutdown: {outcome:?}");
        }
        if let Some((config, path)) = &mut self.config {
            if config.volume != self.session.volume() {
                config.volume = self.session.volume();
                if let Err(e) = config.save(path).await {
                    error!("Failed to save configuration: {e}");
                }
            }
        }
        info!(
            "{} worker errors recorded in {}",
            self.log.error_count(),
            self.log.path().display()
        );
        if let Err(e) = self.log.save().await {
            error!("Failed to write diagnostic log: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::protocol::{Command, WorkerEndpoints};
    use crate::worker::testing::{manual_handle, FakeContext};
    use session::SessionTimings;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn player() -> (Player, WorkerEndpoints, FakeContext, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (handle, worker, context) = manual_handle();
        let session = PlaybackSession::new(handle, 50, SessionTimings::default());
        let source = ChannelSource::M3u {
            dir: dir.path().to_path_buf(),
            file: String::new(),
        };
        let log = DiagnosticLog::new(dir.path().join("cybertelly.log"));
        let mut player = Player::new(session, source, log, LogNotifier::new("en"));
        player.channels = ["Das Erste", "ZDF"]
            .iter()
            .map(|name| Channel {
                name: (*name).to_string(),
                url: format!("http://tv.example/{}", name.len()),
                uuid: None,
            })
            .collect();
        (player, worker, context, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_by_number_and_name() {
        let (mut player, mut worker, _context, _dir) = player();

        let (reply, answer) = oneshot::channel();
        player.handle(Intent::PlayChannel(1, reply)).await;
        assert_eq!(answer.await.unwrap().unwrap(), "ZDF");

        let (reply, answer) = oneshot::channel();
        player.handle(Intent::PlayName("das erste".to_string(), reply)).await;
        assert_eq!(answer.await.unwrap().unwrap(), "Das Erste");

        let (reply, answer) = oneshot::channel();
        player.handle(Intent::PlayChannel(7, reply)).await;
        assert!(matches!(answer.await.unwrap(), Err(App::DataParsing(_))));

        let mut plays = 0;
        while let Ok(command) = worker.commands.try_recv() {
            if matches!(command, Command::Play { .. }) {
                plays += 1;
            }
        }
        assert_eq!(plays, 2);
        assert_eq!(player.session.history().entries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_worker_is_terminated_and_logged() {
        let (mut player, _worker, context, dir) = player();
        let (reply, _answer) = oneshot::channel();
        player.handle(Intent::PlayChannel(0, reply)).await;

        context.finished.store(true, Ordering::SeqCst);
        player.check_liveness().await;

        assert!(player.worker_dead);
        assert!(context.terminated.load(Ordering::SeqCst));
        assert_eq!(player.notifier.last_failure, Some(WorkerFailure::Terminated));
        let text = std::fs::read_to_string(dir.path().join("cybertelly.log")).unwrap();
        assert!(text.contains("| m3u | Das Erste | unconfirmed"));

        let (reply, answer) = oneshot::channel();
        player.handle(Intent::PlayChannel(1, reply)).await;
        assert!(matches!(answer.await.unwrap(), Err(App::Worker(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_shuts_the_worker_down() {
        let (player, mut worker, context, dir) = player();
        let (intent_sender, intents) = mpsc::channel(4);
        let (stop_sender, stop_receiver) = watch::channel(());
        intent_sender.send(Intent::SetVolume(30)).await.unwrap();
        intent_sender.send(Intent::Quit).await.unwrap();

        player.run(intents, stop_sender).await.unwrap();

        assert!(stop_receiver.has_changed().unwrap());
        let mut commands = Vec::new();
        while let Ok(command) = worker.commands.try_recv() {
            commands.push(command);
        }
        assert_eq!(
            commands,
            vec![
                Command::CheckAlive,
                Command::SetVolume { level: 30 },
                Command::Exit
            ]
        );
        assert!(context.terminated.load(Ordering::SeqCst));
        assert!(dir.path().join("cybertelly.log").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_channels_and_status() {
        let (mut player, _worker, _context, _dir) = player();
        let (reply, answer) = oneshot::channel();
        player.handle(Intent::ListChannels(reply)).await;
        assert_eq!(answer.await.unwrap(), vec!["Das Erste", "ZDF"]);

        player.handle(Intent::ToggleMute).await;
        let (reply, answer) = oneshot::channel();
        player.handle(Intent::Status(reply)).await;
        let status = answer.await.unwrap();
        assert!(status.contains("State: NothingSpecial"));
        assert!(status.contains("Volume: 50 (muted)"));
        assert!(status.contains("Engine: not ready"));
    }
}
