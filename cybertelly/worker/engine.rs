use crate::error::App;
use crate::worker::protocol::PlayerState;

/// Parameters for building the engine inside the worker.
pub struct EngineSetup<'a> {
    /// Native window handle of the video surface, 0 lets the engine open its own window.
    pub window_handle: u64,
    pub engine_args: &'a [String],
}

/// The native audio/video engine. Only the media worker ever calls into it.
pub trait Engine {
    fn set_media(&mut self, url: &str) -> Result<(), App>;
    fn play(&mut self) -> Result<(), App>;
    fn stop(&mut self) -> Result<(), App>;
    fn state(&mut self) -> PlayerState;
    /// Current volume level, or `VOLUME_UNAVAILABLE` while audio output is not ready.
    fn volume(&mut self) -> i32;
    fn set_volume(&mut self, level: u8) -> Result<(), App>;
}

pub trait EngineFactory: Send + 'static {
    type Engine: Engine;

    /// Builds the engine. Called on the worker thread so the engine never
    /// leaves it. Non-fatal problems are pushed to `notes`.
    fn create(
        &mut self,
        setup: &EngineSetup<'_>,
        notes: &mut Vec<String>,
    ) -> Result<Self::Engine, App>;
}
