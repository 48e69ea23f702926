use crate::diagnostics::DiagnosticLog;
use crate::error::App;
use crate::notifier::Notifier;
use crate::player::history::PlayHistory;
use crate::player::status::{PollPhase, PollStep, StatusPoller};
use crate::source::Channel;
use crate::worker::handle::{ShutdownOutcome, WorkerHandle};
use crate::worker::protocol::{Command, LivenessEvent, PlayerState};
use log::{info, warn};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    /// Bounded wait for late status replies before new playback commands.
    pub quiesce_attempts: u32,
    pub quiesce_interval: Duration,
    /// Wait for the post-stop state.
    pub stop_reply: Duration,
    /// Wait for each status poll reply.
    pub poll_reply: Duration,
    pub engine_setup: Duration,
    pub exit_grace: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            quiesce_attempts: 3,
            quiesce_interval: Duration::from_millis(500),
            stop_reply: Duration::from_millis(500),
            poll_reply: Duration::from_millis(500),
            engine_setup: Duration::from_secs(30),
            exit_grace: Duration::from_secs(3),
        }
    }
}

/// Issues playback commands and keeps the play-history ledger.
pub struct PlaybackSession {
    worker: WorkerHandle,
    history: PlayHistory,
    poller: StatusPoller,
    timings: SessionTimings,
    volume: u8,
    muted: bool,
    current_channel: Option<String>,
    engine_ready: bool,
}

impl PlaybackSession {
    pub fn new(worker: WorkerHandle, volume: u8, timings: SessionTimings) -> Self {
        Self {
            worker,
            history: PlayHistory::new(),
            poller: StatusPoller::new(),
            timings,
            volume: volume.min(100),
            muted: false,
            current_channel: None,
            engine_ready: false,
        }
    }

    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    pub fn worker_mut(&mut self) -> &mut WorkerHandle {
        &mut self.worker
    }

    pub fn history(&self) -> &PlayHistory {
        &self.history
    }

    pub fn current_channel(&self) -> Option<&str> {
        self.current_channel.as_deref()
    }

    pub fn engine_ready(&self) -> bool {
        self.engine_ready
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_active()
    }

    pub fn poll_phase(&self) -> PollPhase {
        self.poller.phase()
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    fn effective_volume(&self) -> u8 {
        if self.muted {
            0
        } else {
            self.volume
        }
    }

    /// Builds the engine in the worker and waits for its readiness flag.
    pub async fn setup_engine(
        &mut self,
        window_handle: u64,
        engine_args: Vec<String>,
        diagnostic_tag: &str,
    ) -> bool {
        let command = Command::SetupEngine {
            window_handle,
            engine_args,
            diagnostic_tag: diagnostic_tag.to_string(),
        };
        self.engine_ready = match self.worker.send(command) {
            Ok(()) => self.worker.engine_ready(self.timings.engine_setup).await,
            Err(e) => {
                warn!("{e}");
                false
            }
        };
        info!("Engine ready: {}", self.engine_ready);
        self.engine_ready
    }

    /// Records the attempt, then asks the worker to play `channel`.
    pub async fn request_play(&mut self, source: &str, channel: &Channel) -> Result<u64, App> {
        self.poller.reset();
        self.worker
            .quiesce(self.timings.quiesce_attempts, self.timings.quiesce_interval)
            .await;

        // The entry exists before the command is sent, so a crash still leaves a trace.
        let key = self.history.record(source, &channel.name);
        info!("Play {} (history key {key})", channel.name);
        self.current_channel = Some(channel.name.clone());
        self.worker.send(Command::SetMedia {
            url: channel.url.clone(),
        })?;
        self.worker.send(Command::Play { history_key: key })?;
        self.poller.start();
        Ok(key)
    }

    pub fn reconcile(&mut self, key: u64, truncate: bool) -> bool {
        self.history.reconcile(key, truncate)
    }

    /// Stops playback and returns the state the engine reports afterwards.
    pub async fn stop(&mut self) -> Result<PlayerState, App> {
        self.poller.reset();
        self.worker
            .quiesce(self.timings.quiesce_attempts, self.timings.quiesce_interval)
            .await;
        self.worker.send(Command::Stop)?;
        self.current_channel = None;
        let state = self.worker.player_state(self.timings.stop_reply).await;
        info!("Stopped, engine state {state:?}");
        Ok(state)
    }

    /// Current engine state, or the fallback if the worker does not answer.
    pub async fn player_state(&mut self) -> PlayerState {
        self.worker
            .quiesce(self.timings.quiesce_attempts, self.timings.quiesce_interval)
            .await;
        self.worker.player_state(self.timings.stop_reply).await
    }

    pub fn set_volume(&mut self, level: u8) -> Result<(), App> {
        self.volume = level.min(100);
        self.muted = false;
        self.worker.send(Command::SetVolume {
            level: self.volume,
        })
    }

    pub fn toggle_mute(&mut self) -> Result<bool, App> {
        self.muted = !self.muted;
        self.worker.send(Command::SetVolume {
            level: self.effective_volume(),
        })?;
        Ok(self.muted)
    }

    /// One status-poll tick of a starting session.
    pub async fn poll_status(&mut self, notifier: &mut dyn Notifier) -> PollStep {
        if !self.poller.is_active() {
            return PollStep::default();
        }
        let reading = self.worker.state_and_volume(self.timings.poll_reply).await;
        let step = self.poller.step(reading);

        if step.show_busy {
            notifier.set_busy(true);
        }
        if step.reapply_volume {
            let level = self.effective_volume();
            if let Err(e) = self.worker.send(Command::SetVolume { level }) {
                warn!("{e}");
                self.poller.fail();
                notifier.set_busy(false);
                return step;
            }
        }
        if step.playback_error {
            let channel = self.current_channel.as_deref().unwrap_or_default();
            notifier.playback_error(channel);
        }
        if step.settled {
            notifier.set_busy(false);
        }
        step
    }

    /// Moves any pending confirmations into the ledger.
    fn drain_confirmations(&mut self) {
        for event in self.worker.drain_liveness() {
            if let LivenessEvent::PlayConfirmed { history_key } = event {
                self.history.reconcile(history_key, false);
            }
        }
    }

    /// Kills the worker and dumps everything it left behind, history included.
    pub fn terminate(&mut self, log: &mut DiagnosticLog) {
        self.poller.fail();
        self.worker.terminate();
        self.flush(log, true);
    }

    /// Sends `Exit`, falls back to termination after the grace period.
    pub async fn shutdown(&mut self, log: &mut DiagnosticLog) -> ShutdownOutcome {
        self.poller.reset();
        let outcome = self.worker.shutdown(self.timings.exit_grace).await;
        self.flush(log, outcome == ShutdownOutcome::Forced);
        outcome
    }

    fn flush(&mut self, log: &mut DiagnosticLog, with_history: bool) {
        self.drain_confirmations();
        log.extend(self.worker.drain_diagnostics());
        if with_history {
            log.record_history(self.history.take_all());
        }
    }
}
