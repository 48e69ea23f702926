use crate::worker::protocol::{PlayerState, VOLUME_UNAVAILABLE};
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Polls to wait for the audio output after playback started (10 s).
pub const AUDIO_READY_TIMEOUT_TICKS: u32 = 50;
/// Polls before the busy indicator shows up (~1 s).
pub const BUSY_INDICATOR_TICKS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Starting,
    WaitingForAudioReady,
    Settled,
    Error,
}

/// What the caller has to do after one poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStep {
    pub reapply_volume: bool,
    pub show_busy: bool,
    pub playback_error: bool,
    pub settled: bool,
}

/// Tracks a starting playback session until audio is up or the stream failed.
#[derive(Debug)]
pub struct StatusPoller {
    phase: PollPhase,
    audio_wait_ticks: u32,
    busy_ticks: u32,
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPoller {
    pub fn new() -> Self {
        Self {
            phase: PollPhase::Idle,
            audio_wait_ticks: 0,
            busy_ticks: 0,
        }
    }

    pub fn start(&mut self) {
        self.phase = PollPhase::Starting;
        self.audio_wait_ticks = 0;
        self.busy_ticks = 0;
    }

    pub fn reset(&mut self) {
        self.phase = PollPhase::Idle;
    }

    /// The worker can no longer be asked; polling stops.
    pub fn fail(&mut self) {
        self.phase = PollPhase::Error;
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            PollPhase::Starting | PollPhase::WaitingForAudioReady
        )
    }

    /// Advances on one poll result; `None` means the worker did not answer in time.
    pub fn step(&mut self, reading: Option<(PlayerState, i32)>) -> PollStep {
        let mut step = PollStep::default();
        if !self.is_active() {
            return step;
        }

        self.busy_ticks += 1;
        step.show_busy = self.busy_ticks == BUSY_INDICATOR_TICKS;

        if let Some((PlayerState::Ended | PlayerState::Error, _)) = reading {
            step.playback_error = true;
            self.settle(&mut step);
            return step;
        }
        if let Some((PlayerState::Playing, _)) = reading {
            self.phase = PollPhase::WaitingForAudioReady;
        }

        if self.phase == PollPhase::WaitingForAudioReady {
            // The engine's volume subsystem may lag behind the state change.
            // Unanswered or non-playing readings still count towards the timeout.
            step.reapply_volume = true;
            self.audio_wait_ticks += 1;
            let audio_ready = matches!(
                reading,
                Some((PlayerState::Playing, volume)) if volume != VOLUME_UNAVAILABLE
            );
            if audio_ready || self.audio_wait_ticks >= AUDIO_READY_TIMEOUT_TICKS {
                self.settle(&mut step);
            }
            return step;
        }

        if let Some((PlayerState::Paused | PlayerState::Stopped, _)) = reading {
            self.settle(&mut step);
        }
        step
    }

    fn settle(&mut self, step: &mut PollStep) {
        self.phase = PollPhase::Settled;
        step.settled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waits_for_a_valid_volume_reading() {
        let mut poller = StatusPoller::new();
        poller.start();

        let step = poller.step(Some((PlayerState::Opening, VOLUME_UNAVAILABLE)));
        assert_eq!(step, PollStep::default());
        assert_eq!(poller.phase(), PollPhase::Starting);

        let step = poller.step(Some((PlayerState::Playing, VOLUME_UNAVAILABLE)));
        assert!(step.reapply_volume);
        assert!(!step.settled);
        assert_eq!(poller.phase(), PollPhase::WaitingForAudioReady);

        let step = poller.step(Some((PlayerState::Playing, 50)));
        assert!(step.reapply_volume);
        assert!(step.settled);
        assert_eq!(poller.phase(), PollPhase::Settled);
        assert!(!poller.is_active());
    }

    #[test]
    fn test_gives_up_on_audio_after_the_timeout() {
        let mut poller = StatusPoller::new();
        poller.start();
        for _ in 1..AUDIO_READY_TIMEOUT_TICKS {
            let step = poller.step(Some((PlayerState::Playing, VOLUME_UNAVAILABLE)));
            assert!(!step.settled);
        }
        let step = poller.step(Some((PlayerState::Playing, VOLUME_UNAVAILABLE)));
        assert!(step.settled);
    }

    #[test]
    fn test_ended_stream_flags_an_error_and_settles() {
        let mut poller = StatusPoller::new();
        poller.start();
        poller.step(Some((PlayerState::Playing, VOLUME_UNAVAILABLE)));

        let step = poller.step(Some((PlayerState::Ended, VOLUME_UNAVAILABLE)));

        assert!(step.playback_error);
        assert!(step.settled);
        assert!(!step.reapply_volume);
        assert_eq!(poller.phase(), PollPhase::Settled);
    }

    #[test]
    fn test_busy_indicator_shows_once() {
        let mut poller = StatusPoller::new();
        poller.start();
        let shown: Vec<bool> = (0..8)
            .map(|_| poller.step(Some((PlayerState::Opening, VOLUME_UNAVAILABLE))).show_busy)
            .collect();
        assert_eq!(shown.iter().filter(|shown| **shown).count(), 1);
        assert!(shown[3]);
    }

    #[test]
    fn test_stalled_worker_still_times_out_after_playing() {
        let mut poller = StatusPoller::new();
        poller.start();
        poller.step(Some((PlayerState::Playing, VOLUME_UNAVAILABLE)));

        let half = AUDIO_READY_TIMEOUT_TICKS / 2;
        for _ in 1..half {
            let step = poller.step(Some((PlayerState::Buffering, VOLUME_UNAVAILABLE)));
            assert!(step.reapply_volume);
            assert!(!step.settled);
        }
        for _ in half..AUDIO_READY_TIMEOUT_TICKS - 1 {
            let step = poller.step(None);
            assert!(step.reapply_volume);
            assert!(!step.settled);
        }
        assert_eq!(poller.phase(), PollPhase::WaitingForAudioReady);

        let step = poller.step(None);
        assert!(step.settled);
        assert!(!poller.is_active());
    }

    #[test]
    fn test_missing_readings_keep_polling() {
        let mut poller = StatusPoller::new();
        poller.start();
        assert!(!poller.step(None).settled);
        assert!(poller.is_active());

        poller.fail();
        assert_eq!(poller.phase(), PollPhase::Error);
        assert_eq!(poller.step(Some((PlayerState::Playing, 40))), PollStep::default());
    }
}
