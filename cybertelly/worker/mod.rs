//! The media worker: the only place the native engine lives.
//!
//! `run` is a blocking receive loop over the command channel. It is started
//! either on a dedicated thread (`spawn_thread`) or inside a child process
//! (`process`). A failing or panicking command is turned into a diagnostic
//! record and the loop moves on to the next command.

pub mod engine;
pub mod gst_engine;
pub mod handle;
pub mod process;
pub mod protocol;
#[cfg(test)]
pub mod testing;

use crate::error::App;
use crate::worker::engine::{Engine, EngineFactory, EngineSetup};
use crate::worker::handle::ExecutionContext;
use crate::worker::protocol::{
    channels, Command, ControlEndpoints, DiagnosticRecord, InfoKind, LivenessEvent, PlayerState,
    StatusReply, WorkerEndpoints, VOLUME_UNAVAILABLE,
};
use log::{error, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::UnboundedSender;

pub const DEFAULT_DIAGNOSTIC_TAG: &str = "MediaWorker";

/// Starts the worker loop on its own thread.
pub fn spawn_thread<F: EngineFactory>(factory: F) -> Result<(ControlEndpoints, ThreadContext), App> {
    let (control, endpoints) = channels();
    let handle = thread::Builder::new()
        .name("media-worker".to_string())
        .spawn(move || run(factory, endpoints))?;
    Ok((control, ThreadContext { handle: Some(handle) }))
}

pub struct ThreadContext {
    handle: Option<JoinHandle<()>>,
}

impl ThreadContext {
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Media worker thread panicked");
            }
        }
    }
}

impl ExecutionContext for ThreadContext {
    fn is_finished(&mut self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn terminate(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("Media worker thread panicked");
                }
            } else {
                // Threads cannot be killed; the engine goes down with the process.
                warn!("Media worker thread did not exit, detaching it");
            }
        }
    }
}

struct Worker<F: EngineFactory> {
    factory: F,
    engine: Option<F::Engine>,
    tag: String,
    status: UnboundedSender<StatusReply>,
    liveness: UnboundedSender<LivenessEvent>,
    diagnostics: UnboundedSender<DiagnosticRecord>,
}

pub fn run<F: EngineFactory>(factory: F, endpoints: WorkerEndpoints) {
    let WorkerEndpoints {
        mut commands,
        status,
        liveness,
        diagnostics,
    } = endpoints;
    let mut worker = Worker {
        factory,
        engine: None,
        tag: DEFAULT_DIAGNOSTIC_TAG.to_string(),
        status,
        liveness,
        diagnostics,
    };

    info!("Media worker started");
    while let Some(command) = commands.blocking_recv() {
        if command == Command::Exit {
            break;
        }
        let name = command.name();
        match panic::catch_unwind(AssertUnwindSafe(|| worker.dispatch(command))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => worker.report_error(format!("{name}: {e}")),
            Err(payload) => {
                worker.report_error(format!("{name}: panicked: {}", panic_message(&*payload)));
            }
        }
    }

    // The engine must be torn down on the thread that built it.
    drop(worker.engine.take());
    info!("Media worker stopped");
}

impl<F: EngineFactory> Worker<F> {
    fn dispatch(&mut self, command: Command) -> Result<(), App> {
        match command {
            Command::SetupEngine {
                window_handle,
                engine_args,
                diagnostic_tag,
            } => {
                self.setup(window_handle, &engine_args, diagnostic_tag);
                Ok(())
            }
            Command::SetMedia { url } => self.engine_mut()?.set_media(&url),
            Command::Play { history_key } => {
                let result = self.engine_mut().and_then(|engine| engine.play());
                // Confirms that the call was issued, not that playback is healthy.
                self.liveness
                    .send(LivenessEvent::PlayConfirmed { history_key })?;
                result
            }
            Command::Stop => self.engine_mut()?.stop(),
            Command::SetVolume { level } => {
                let engine = self.engine_mut()?;
                // Volume changes must not bring a stopped session back to life.
                if engine.state() == PlayerState::Playing {
                    engine.set_volume(level.min(100))?;
                }
                Ok(())
            }
            Command::GetInfo { kind } => {
                let reply = self.info(kind);
                self.status.send(reply)?;
                Ok(())
            }
            Command::CheckAlive => {
                self.liveness.send(LivenessEvent::IsAlive)?;
                Ok(())
            }
            Command::Exit => Ok(()),
        }
    }

    fn setup(&mut self, window_handle: u64, engine_args: &[String], diagnostic_tag: String) {
        if !diagnostic_tag.is_empty() {
            self.tag = diagnostic_tag;
        }
        self.engine = None;

        let setup = EngineSetup {
            window_handle,
            engine_args,
        };
        let mut notes = Vec::new();
        match self.factory.create(&setup, &mut notes) {
            Ok(engine) => {
                info!("Engine set up for window handle {window_handle}");
                self.engine = Some(engine);
            }
            Err(e) => self.report_error(format!("SetupEngine: {e}")),
        }
        for note in notes {
            self.report_notification(note);
        }
    }

    fn engine_mut(&mut self) -> Result<&mut F::Engine, App> {
        self.engine.as_mut().ok_or(App::EngineNotReady)
    }

    fn info(&mut self, kind: InfoKind) -> StatusReply {
        let ready = self.engine.is_some();
        match (kind, self.engine.as_mut()) {
            (InfoKind::EngineReady, _) => StatusReply::EngineReady(ready),
            (InfoKind::PlayerState, Some(engine)) => StatusReply::PlayerState(engine.state()),
            (InfoKind::PlayerState, None) => StatusReply::PlayerState(PlayerState::NothingSpecial),
            (InfoKind::Volume, Some(engine)) => StatusReply::Volume(engine.volume()),
            (InfoKind::Volume, None) => StatusReply::Volume(VOLUME_UNAVAILABLE),
            (InfoKind::StateAndVolume, Some(engine)) => {
                let state = engine.state();
                StatusReply::StateAndVolume(state, engine.volume())
            }
            (InfoKind::StateAndVolume, None) => {
                StatusReply::StateAndVolume(PlayerState::NothingSpecial, VOLUME_UNAVAILABLE)
            }
        }
    }

    fn report_error(&self, message: String) {
        error!("{}: {}", self.tag, message);
        let _ = self
            .diagnostics
            .send(DiagnosticRecord::error(self.tag.clone(), message));
    }

    fn report_notification(&self, message: String) {
        info!("{}: {}", self.tag, message);
        let _ = self
            .diagnostics
            .send(DiagnosticRecord::notification(self.tag.clone(), message));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::{FakeFactory, FakeCall};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn setup_command() -> Command {
        Command::SetupEngine {
            window_handle: 42,
            engine_args: vec!["latency=200".to_string()],
            diagnostic_tag: "TestWorker".to_string(),
        }
    }

    async fn next_status(control: &mut ControlEndpoints) -> StatusReply {
        timeout(WAIT, control.status.recv())
            .await
            .expect("status reply timed out")
            .expect("status channel closed")
    }

    async fn next_liveness(control: &mut ControlEndpoints) -> LivenessEvent {
        timeout(WAIT, control.liveness.recv())
            .await
            .expect("liveness event timed out")
            .expect("liveness channel closed")
    }

    #[tokio::test]
    async fn test_failing_commands_do_not_stop_the_loop() {
        let factory = FakeFactory::default();
        factory.state().fail_set_media = true;
        factory.state().panic_on_stop = true;
        let (mut control, mut context) = spawn_thread(factory.clone()).unwrap();

        control.commands.send(Command::Stop).unwrap();
        control.commands.send(setup_command()).unwrap();
        control
            .commands
            .send(Command::SetMedia {
                url: "http://tv/1".to_string(),
            })
            .unwrap();
        control.commands.send(Command::Stop).unwrap();
        control.commands.send(Command::CheckAlive).unwrap();

        assert_eq!(next_liveness(&mut control).await, LivenessEvent::IsAlive);
        assert!(!context.is_finished());

        let mut errors = Vec::new();
        while let Ok(record) = control.diagnostics.try_recv() {
            if record.is_error {
                errors.push(record.message);
            }
        }
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("Stop: "));
        assert!(errors[1].starts_with("SetMedia: "));
        assert!(errors[2].contains("panicked"));

        control.commands.send(Command::Exit).unwrap();
    }

    #[tokio::test]
    async fn test_set_volume_only_reaches_a_playing_engine() {
        let factory = FakeFactory::default();
        let (mut control, _context) = spawn_thread(factory.clone()).unwrap();
        control.commands.send(setup_command()).unwrap();

        factory.state().player_state = PlayerState::Stopped;
        control.commands.send(Command::SetVolume { level: 70 }).unwrap();
        control.commands.send(Command::CheckAlive).unwrap();
        next_liveness(&mut control).await;
        assert!(!factory.calls().contains(&FakeCall::SetVolume(70)));

        factory.state().player_state = PlayerState::Playing;
        control.commands.send(Command::SetVolume { level: 70 }).unwrap();
        control.commands.send(Command::CheckAlive).unwrap();
        next_liveness(&mut control).await;
        assert!(factory.calls().contains(&FakeCall::SetVolume(70)));

        control.commands.send(Command::Exit).unwrap();
    }

    #[tokio::test]
    async fn test_play_is_confirmed_even_when_the_engine_fails() {
        let factory = FakeFactory::default();
        factory.state().fail_play = true;
        let (mut control, _context) = spawn_thread(factory.clone()).unwrap();
        control.commands.send(setup_command()).unwrap();
        control.commands.send(Command::Play { history_key: 5 }).unwrap();

        assert_eq!(
            next_liveness(&mut control).await,
            LivenessEvent::PlayConfirmed { history_key: 5 }
        );
        assert!(factory.calls().contains(&FakeCall::Play));
        control.commands.send(Command::Exit).unwrap();
    }

    #[tokio::test]
    async fn test_setup_failure_keeps_the_worker_alive() {
        let factory = FakeFactory::default();
        factory.state().fail_create = true;
        let (mut control, mut context) = spawn_thread(factory.clone()).unwrap();
        control.commands.send(setup_command()).unwrap();
        control
            .commands
            .send(Command::GetInfo {
                kind: InfoKind::EngineReady,
            })
            .unwrap();

        assert_eq!(next_status(&mut control).await, StatusReply::EngineReady(false));
        let record = timeout(WAIT, control.diagnostics.recv()).await.unwrap().unwrap();
        assert!(record.is_error);
        assert_eq!(record.category, "TestWorker");
        assert!(!context.is_finished());
        control.commands.send(Command::Exit).unwrap();
    }

    #[tokio::test]
    async fn test_get_info_answers_each_query_once() {
        let factory = FakeFactory::default();
        let (mut control, _context) = spawn_thread(factory.clone()).unwrap();
        control.commands.send(setup_command()).unwrap();
        factory.state().player_state = PlayerState::Playing;
        factory.state().volume = 35;

        control
            .commands
            .send(Command::GetInfo {
                kind: InfoKind::StateAndVolume,
            })
            .unwrap();
        assert_eq!(
            next_status(&mut control).await,
            StatusReply::StateAndVolume(PlayerState::Playing, 35)
        );
        control
            .commands
            .send(Command::GetInfo {
                kind: InfoKind::EngineReady,
            })
            .unwrap();
        assert_eq!(next_status(&mut control).await, StatusReply::EngineReady(true));
        assert!(control.status.try_recv().is_err());

        let record = timeout(WAIT, control.diagnostics.recv()).await.unwrap().unwrap();
        assert!(record.is_notification);
        assert_eq!(record.message, "Engine: fake 1.0");
        control.commands.send(Command::Exit).unwrap();
    }

    #[tokio::test]
    async fn test_exit_ends_the_thread_and_drops_the_engine() {
        let factory = FakeFactory::default();
        let (control, mut context) = spawn_thread(factory.clone()).unwrap();
        control.commands.send(setup_command()).unwrap();
        control.commands.send(Command::Exit).unwrap();

        let finished = timeout(WAIT, async {
            while !context.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(finished.is_ok());
        assert!(factory.calls().contains(&FakeCall::Dropped));
        context.terminate();
        assert!(context.is_finished());
    }
}
