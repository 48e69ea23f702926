use crate::error::App;
use crate::worker::engine::{Engine, EngineFactory, EngineSetup};
use crate::worker::protocol::{PlayerState, VOLUME_UNAVAILABLE};
use gstreamer::prelude::*;
use glib::ParamFlags;
use gstreamer::{Element, MessageView, State};
use gstreamer_video::prelude::*;
use gstreamer_video::VideoOverlay;
use log::{info, warn};

pub struct GstFactory;

impl EngineFactory for GstFactory {
    type Engine = GstEngine;

    fn create(
        &mut self,
        setup: &EngineSetup<'_>,
        notes: &mut Vec<String>,
    ) -> Result<GstEngine, App> {
        gstreamer::init().map_err(|e| App::Init(e.to_string()))?;
        notes.push(format!("Engine: {}", gstreamer::version_string()));

        let playbin = gstreamer::ElementFactory::make("playbin")
            .build()
            .map_err(|_| App::Init("Failed to create playbin element".to_string()))?;

        for arg in setup.engine_args {
            if let Err(e) = apply_engine_arg(&playbin, arg) {
                notes.push(e.to_string());
            }
        }

        if setup.window_handle != 0 {
            let overlay = playbin
                .dynamic_cast_ref::<VideoOverlay>()
                .ok_or_else(|| App::Init("playbin has no video overlay interface".to_string()))?;
            let handle = usize::try_from(setup.window_handle)
                .map_err(|_| App::Init(format!("Invalid window handle {}", setup.window_handle)))?;
            // SAFETY: the handle comes from the UI toolkit and outlives the engine.
            unsafe { overlay.set_window_handle(handle) };
            // The overlay would otherwise grab pointer and key events from the UI window.
            // macOS has no support for switching this off.
            if cfg!(target_os = "macos") {
                notes.push("Mouse/keyboard input of the video overlay left enabled".to_string());
            } else {
                overlay.handle_events(false);
            }
        }

        info!("GStreamer playbin created successfully.");
        Ok(GstEngine {
            playbin,
            requested: None,
            terminal: None,
            buffering: false,
        })
    }
}

fn apply_engine_arg(playbin: &Element, arg: &str) -> Result<(), App> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| App::Property(format!("Ignoring engine argument without '=': {arg}")))?;
    let name = name.trim();
    let pspec = playbin
        .find_property(name)
        .ok_or_else(|| App::Property(format!("Unknown engine property: {name}")))?;
    let flags = pspec.flags();
    if !flags.contains(ParamFlags::WRITABLE) || flags.contains(ParamFlags::CONSTRUCT_ONLY) {
        return Err(App::Property(format!("Engine property {name} is not writable")));
    }
    // Setters panic on values of the wrong type, so parse against the pspec first.
    let value = glib::Value::deserialize_with_pspec(value.trim(), &pspec).map_err(|_| {
        App::Property(format!(
            "Invalid value for engine property {name}: {}",
            value.trim()
        ))
    })?;
    playbin.set_property_from_value(name, &value);
    Ok(())
}

pub struct GstEngine {
    playbin: Element,
    /// Target state of the last playback command, `None` before any media was set.
    requested: Option<State>,
    /// End-of-stream or error seen on the bus since the media was set.
    terminal: Option<PlayerState>,
    buffering: bool,
}

impl GstEngine {
    fn set_state(&self, state: State) -> Result<(), App> {
        self.playbin
            .set_state(state)
            .map(|_| ())
            .map_err(|_| App::State(format!("Failed to set pipeline to {state:?}")))
    }

    fn drain_bus(&mut self) {
        let Some(bus) = self.playbin.bus() else {
            return;
        };
        while let Some(msg) = bus.pop() {
            match msg.view() {
                MessageView::Eos(_) => {
                    info!("End of stream");
                    self.terminal = Some(PlayerState::Ended);
                }
                MessageView::Error(err) => {
                    warn!("Error from GStreamer pipeline: {}", err.error());
                    self.terminal = Some(PlayerState::Error);
                }
                MessageView::Buffering(buffering) => {
                    let percent = buffering.percent();
                    let was_buffering = self.buffering;
                    self.buffering = percent < 100;
                    if self.requested == Some(State::Playing) && was_buffering != self.buffering {
                        let target = if self.buffering {
                            State::Paused
                        } else {
                            State::Playing
                        };
                        if let Err(e) = self.set_state(target) {
                            warn!("Buffering at {percent}%: {e}");
                        }
                    }
                }
                _ => (),
            }
        }
    }
}

impl Engine for GstEngine {
    fn set_media(&mut self, url: &str) -> Result<(), App> {
        self.set_state(State::Null)?;
        let uri = if url.contains("://") {
            url.to_string()
        } else {
            glib::filename_to_uri(url, None)
                .map_err(|e| App::Property(e.to_string()))?
                .to_string()
        };
        self.playbin.set_property("uri", uri.as_str());
        self.requested = Some(State::Ready);
        self.terminal = None;
        self.buffering = false;
        Ok(())
    }

    fn play(&mut self) -> Result<(), App> {
        self.requested = Some(State::Playing);
        self.set_state(State::Playing)
    }

    fn stop(&mut self) -> Result<(), App> {
        self.requested = Some(State::Null);
        self.terminal = None;
        self.buffering = false;
        self.set_state(State::Null)
    }

    fn state(&mut self) -> PlayerState {
        self.drain_bus();
        if let Some(terminal) = self.terminal {
            return terminal;
        }
        match (self.requested, self.playbin.current_state()) {
            (None, _) => PlayerState::NothingSpecial,
            (Some(State::Null), _) => PlayerState::Stopped,
            (Some(State::Playing), State::Playing | State::Paused) if self.buffering => {
                PlayerState::Buffering
            }
            (Some(State::Playing), State::Playing) => PlayerState::Playing,
            (Some(State::Playing), _) => PlayerState::Opening,
            (Some(_), State::Paused) => PlayerState::Paused,
            (Some(_), _) => PlayerState::Stopped,
        }
    }

    fn volume(&mut self) -> i32 {
        if self.playbin.current_state() != State::Playing
            || self.playbin.property::<i32>("n-audio") <= 0
        {
            return VOLUME_UNAVAILABLE;
        }
        let volume = self.playbin.property::<f64>("volume");
        #[allow(clippy::cast_possible_truncation)]
        let level = (volume * 100.0).round() as i32;
        level
    }

    fn set_volume(&mut self, level: u8) -> Result<(), App> {
        self.playbin
            .set_property("volume", f64::from(level.min(100)) / 100.0);
        Ok(())
    }
}

impl Drop for GstEngine {
    fn drop(&mut self) {
        if self.playbin.set_state(State::Null).is_err() {
            warn!("Failed to shut down the GStreamer pipeline");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playbin() -> Option<Element> {
        gstreamer::init().ok()?;
        gstreamer::ElementFactory::make("playbin").build().ok()
    }

    #[test]
    fn test_bad_engine_args_are_reported_not_applied() {
        // Needs the playback plugins installed.
        let Some(playbin) = playbin() else {
            return;
        };

        assert!(matches!(
            apply_engine_arg(&playbin, "buffer-duration=abc"),
            Err(App::Property(_))
        ));
        assert!(matches!(
            apply_engine_arg(&playbin, "no-such-property=1"),
            Err(App::Property(_))
        ));
        assert!(matches!(
            apply_engine_arg(&playbin, "n-audio=2"),
            Err(App::Property(_))
        ));
        assert!(matches!(
            apply_engine_arg(&playbin, "buffer-size"),
            Err(App::Property(_))
        ));

        apply_engine_arg(&playbin, "buffer-duration = 2000000000").unwrap();
        assert_eq!(playbin.property::<i64>("buffer-duration"), 2_000_000_000);
    }
}
