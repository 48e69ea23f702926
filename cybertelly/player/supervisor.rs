use crate::notifier::{Notifier, WorkerFailure};
use crate::player::session::PlaybackSession;
use crate::worker::protocol::{Command, LivenessEvent};
use log::{error, info, warn};
use std::time::Duration;

pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(20);
/// Ticks without an `IsAlive` before the worker counts as hung.
pub const MAX_ALIVE_COUNT: u32 = 6;
/// 24 hours worth of ticks.
pub const MAX_TICKS: u64 = 4320;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    /// Heartbeats stopped; the worker keeps running and may recover.
    Unresponsive,
    /// The execution context is gone. No further ticks.
    Dead,
    /// The tick cap was reached. No further ticks.
    Retired,
}

/// Heartbeat bookkeeping for the media worker.
#[derive(Debug)]
pub struct Supervisor {
    alive_count: u32,
    ticks: u64,
    failure_reported: bool,
    final_verdict: Option<Verdict>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            alive_count: MAX_ALIVE_COUNT,
            ticks: 0,
            failure_reported: false,
            final_verdict: None,
        }
    }

    pub fn alive_count(&self) -> u32 {
        self.alive_count
    }

    pub fn is_stopped(&self) -> bool {
        self.final_verdict.is_some()
    }

    /// Sends the first ping.
    pub fn start(&mut self, session: &PlaybackSession) {
        if let Err(e) = session.worker().send(Command::CheckAlive) {
            warn!("{e}");
        }
    }

    pub fn tick(&mut self, session: &mut PlaybackSession, notifier: &mut dyn Notifier) -> Verdict {
        if let Some(verdict) = self.final_verdict {
            return verdict;
        }
        self.ticks += 1;
        self.alive_count = self.alive_count.saturating_sub(1);

        for event in session.worker_mut().drain_liveness() {
            match event {
                LivenessEvent::IsAlive => {
                    self.alive_count = MAX_ALIVE_COUNT;
                    if self.failure_reported {
                        info!("Media worker is responding again");
                    }
                    self.failure_reported = false;
                }
                LivenessEvent::PlayConfirmed { history_key } => {
                    session.reconcile(history_key, true);
                }
            }
        }

        if session.worker_mut().is_finished() {
            error!("Media worker terminated");
            notifier.show_error(WorkerFailure::Terminated);
            self.final_verdict = Some(Verdict::Dead);
            return Verdict::Dead;
        }

        let verdict = if self.alive_count == 0 {
            if !self.failure_reported {
                error!("Media worker missed {MAX_ALIVE_COUNT} heartbeats");
                notifier.show_error(WorkerFailure::Unresponsive);
                self.failure_reported = true;
            }
            Verdict::Unresponsive
        } else {
            Verdict::Healthy
        };

        if self.ticks >= MAX_TICKS {
            info!("Liveness supervision retired after {} ticks", self.ticks);
            self.final_verdict = Some(Verdict::Retired);
            return Verdict::Retired;
        }
        // A wedged worker still has earlier pings queued; answering them resumes pinging.
        if verdict == Verdict::Healthy {
            if let Err(e) = session.worker().send(Command::CheckAlive) {
                warn!("{e}");
            }
        }
        verdict
    }
}
