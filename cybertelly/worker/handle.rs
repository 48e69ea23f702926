use crate::error::App;
use crate::worker::protocol::{
    Command, ControlEndpoints, DiagnosticRecord, InfoKind, LivenessEvent, PlayerState, StatusReply,
};
use log::{info, warn};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant};

/// State assumed when the worker does not answer a state query in time.
pub const FALLBACK_STATE: PlayerState = PlayerState::NothingSpecial;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Where the worker runs: a thread or a child process.
pub trait ExecutionContext: Send {
    fn is_finished(&mut self) -> bool;
    /// Last resort when the worker ignores `Exit`.
    fn terminate(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Clean,
    Forced,
}

/// Control-side view of the media worker.
pub struct WorkerHandle {
    commands: UnboundedSender<Command>,
    status: UnboundedReceiver<StatusReply>,
    liveness: UnboundedReceiver<LivenessEvent>,
    diagnostics: UnboundedReceiver<DiagnosticRecord>,
    context: Box<dyn ExecutionContext>,
    /// Queries that timed out; their replies may still show up later.
    abandoned_queries: usize,
}

impl WorkerHandle {
    pub fn new(endpoints: ControlEndpoints, context: Box<dyn ExecutionContext>) -> Self {
        Self {
            commands: endpoints.commands,
            status: endpoints.status,
            liveness: endpoints.liveness,
            diagnostics: endpoints.diagnostics,
            context,
            abandoned_queries: 0,
        }
    }

    pub fn send(&self, command: Command) -> Result<(), App> {
        self.commands
            .send(command)
            .map_err(|e| App::Worker(format!("Failed to send {}: {e}", e.0.name())))
    }

    /// Discards stale status replies and returns how many were dropped.
    pub fn drain_status(&mut self) -> usize {
        let mut drained = 0;
        while self.status.try_recv().is_ok() {
            drained += 1;
        }
        self.abandoned_queries = self.abandoned_queries.saturating_sub(drained);
        drained
    }

    /// Issues one `GetInfo` and waits at most `wait` for its reply.
    pub async fn query(&mut self, kind: InfoKind, wait: Duration) -> Option<StatusReply> {
        let stale = self.drain_status();
        if stale > 0 {
            info!("Discarded {stale} stale status replies");
        }
        if let Err(e) = self.send(Command::GetInfo { kind }) {
            warn!("{e}");
            return None;
        }
        match time::timeout(wait, self.status.recv()).await {
            Ok(reply) => reply,
            Err(_) => {
                self.abandoned_queries += 1;
                warn!("No reply to {kind:?} query within {wait:?}");
                None
            }
        }
    }

    pub async fn engine_ready(&mut self, wait: Duration) -> bool {
        matches!(
            self.query(InfoKind::EngineReady, wait).await,
            Some(StatusReply::EngineReady(true))
        )
    }

    pub async fn player_state(&mut self, wait: Duration) -> PlayerState {
        match self.query(InfoKind::PlayerState, wait).await {
            Some(StatusReply::PlayerState(state)) => state,
            _ => FALLBACK_STATE,
        }
    }

    pub async fn state_and_volume(&mut self, wait: Duration) -> Option<(PlayerState, i32)> {
        match self.query(InfoKind::StateAndVolume, wait).await {
            Some(StatusReply::StateAndVolume(state, volume)) => Some((state, volume)),
            _ => None,
        }
    }

    /// Waits for replies of timed-out queries so they cannot be mistaken for
    /// the answer to the next query. Returns false if some never arrived.
    pub async fn quiesce(&mut self, attempts: u32, interval: Duration) -> bool {
        for _ in 0..attempts {
            self.drain_status();
            if self.abandoned_queries == 0 {
                return true;
            }
            time::sleep(interval).await;
        }
        self.drain_status();
        if self.abandoned_queries > 0 {
            warn!(
                "{} status replies still outstanding, giving up on them",
                self.abandoned_queries
            );
            self.abandoned_queries = 0;
            return false;
        }
        true
    }

    pub fn drain_liveness(&mut self) -> Vec<LivenessEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.liveness.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn drain_diagnostics(&mut self) -> Vec<DiagnosticRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.diagnostics.try_recv() {
            records.push(record);
        }
        records
    }

    pub fn is_finished(&mut self) -> bool {
        self.context.is_finished()
    }

    pub fn terminate(&mut self) {
        warn!("Forcibly terminating the media worker");
        self.context.terminate();
    }

    /// Asks the worker to exit and terminates it if it is still running after `grace`.
    pub async fn shutdown(&mut self, grace: Duration) -> ShutdownOutcome {
        if let Err(e) = self.send(Command::Exit) {
            warn!("{e}");
        }
        let deadline = Instant::now() + grace;
        loop {
            if self.context.is_finished() {
                info!("Media worker exited");
                return ShutdownOutcome::Clean;
            }
            if Instant::now() >= deadline {
                break;
            }
            time::sleep(EXIT_POLL_INTERVAL).await;
        }
        self.terminate();
        ShutdownOutcome::Forced
    }
}
