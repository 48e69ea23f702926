//! Test doubles for the engine and the worker's execution context.

use crate::error::App;
use crate::worker::engine::{Engine, EngineFactory, EngineSetup};
use crate::worker::handle::{ExecutionContext, WorkerHandle};
use crate::worker::protocol::{channels, PlayerState, WorkerEndpoints, VOLUME_UNAVAILABLE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Created(u64),
    SetMedia(String),
    Play,
    Stop,
    SetVolume(u8),
    Dropped,
}

#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<FakeCall>,
    pub player_state: PlayerState,
    pub volume: i32,
    pub fail_create: bool,
    pub fail_set_media: bool,
    pub fail_play: bool,
    pub panic_on_stop: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            player_state: PlayerState::NothingSpecial,
            volume: VOLUME_UNAVAILABLE,
            fail_create: false,
            fail_set_media: false,
            fail_play: false,
            panic_on_stop: false,
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    shared: Arc<Mutex<FakeState>>,
}

impl FakeFactory {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.state().calls.clone()
    }
}

impl EngineFactory for FakeFactory {
    type Engine = FakeEngine;

    fn create(
        &mut self,
        setup: &EngineSetup<'_>,
        notes: &mut Vec<String>,
    ) -> Result<FakeEngine, App> {
        let mut state = self.state();
        if state.fail_create {
            return Err(App::Init("fake engine refused to start".to_string()));
        }
        state.calls.push(FakeCall::Created(setup.window_handle));
        notes.push("Engine: fake 1.0".to_string());
        Ok(FakeEngine {
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct FakeEngine {
    shared: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Engine for FakeEngine {
    fn set_media(&mut self, url: &str) -> Result<(), App> {
        let mut state = self.lock();
        if state.fail_set_media {
            return Err(App::Property("fake media rejected".to_string()));
        }
        state.calls.push(FakeCall::SetMedia(url.to_string()));
        Ok(())
    }

    fn play(&mut self) -> Result<(), App> {
        let mut state = self.lock();
        state.calls.push(FakeCall::Play);
        if state.fail_play {
            return Err(App::State("fake play failed".to_string()));
        }
        state.player_state = PlayerState::Opening;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), App> {
        let panic_on_stop = self.lock().panic_on_stop;
        assert!(!panic_on_stop, "fake engine crashed while stopping");
        let mut state = self.lock();
        state.calls.push(FakeCall::Stop);
        state.player_state = PlayerState::Stopped;
        Ok(())
    }

    fn state(&mut self) -> PlayerState {
        self.lock().player_state
    }

    fn volume(&mut self) -> i32 {
        self.lock().volume
    }

    fn set_volume(&mut self, level: u8) -> Result<(), App> {
        self.lock().calls.push(FakeCall::SetVolume(level));
        Ok(())
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.lock().calls.push(FakeCall::Dropped);
    }
}

/// Execution context whose liveness is controlled by the test.
#[derive(Clone, Default)]
pub struct FakeContext {
    pub finished: Arc<AtomicBool>,
    pub terminated: Arc<AtomicBool>,
}

impl ExecutionContext for FakeContext {
    fn is_finished(&mut self) -> bool {
        self.finished.load(Ordering::SeqCst) || self.terminated.load(Ordering::SeqCst)
    }

    fn terminate(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// A handle with no worker behind it; the test plays the worker through the endpoints.
pub fn manual_handle() -> (WorkerHandle, WorkerEndpoints, FakeContext) {
    let (control, endpoints) = channels();
    let context = FakeContext::default();
    let handle = WorkerHandle::new(control, Box::new(context.clone()));
    (handle, endpoints, context)
}
