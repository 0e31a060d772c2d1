use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use log::{debug, error, info, warn};

use super::{RenderingContext, Task};
use crate::device::{DeviceError, Filter, TexelFormat, TextureDesc, TextureHandle};
use crate::temporal::{
    CaptureConfig, CaptureMode, CaptureState, FrameCache, FramePlayer, PlaybackMode,
    PlaybackState, PlayerEvent, ProgressReporter, SubscriptionSet, TemporalControl,
    TemporalError, wrap_frame,
};

/// Upper bound on event rounds per drain; a player echoing its own events
/// back would otherwise spin forever.
const MAX_EVENT_ROUNDS: usize = 16;

/// Delay before reading back again after a failed readback.
const READBACK_RETRY: Duration = Duration::from_millis(16);

/// Failed readbacks of one frame before the capture is abandoned.
const MAX_READBACK_ATTEMPTS: u32 = 8;

/// Frame currently travelling through the capture loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CaptureStep {
    /// Data requested; the readback is not armed until it reaches the renderer.
    Loading { frame: usize },
    /// Bound to the renderer. Read back once the delay has elapsed (`due`)
    /// and a refresh has drawn the frame (`rendered`).
    Bound {
        frame: usize,
        arm: u64,
        rendered: bool,
        due: bool,
    },
}

/// State of one capture-then-playback cycle.
pub(super) struct TemporalSession {
    id: u64,
    player: Box<dyn FramePlayer>,
    progress: Box<dyn ProgressReporter>,
    subscriptions: SubscriptionSet,
    events: Receiver<PlayerEvent>,
    cache: FrameCache,
    capture: CaptureState,
    playback: PlaybackState,
    frame_texture: Option<TextureHandle>,
    step: Option<CaptureStep>,
    /// Bumped every time a readback is armed; older timers are ignored.
    arms: u64,
    readback_failures: u32,
}

impl RenderingContext {
    /// Starts capturing every frame of the current temporal volume.
    ///
    /// Frames are loaded, rendered for `duration / frames` and read back in
    /// order. When the last one is cached the player is told to play.
    pub fn start_temporal(
        &mut self,
        config: CaptureConfig,
        mut player: Box<dyn FramePlayer>,
        progress: Box<dyn ProgressReporter>,
    ) -> Result<(), TemporalError> {
        if self.temporal.is_some() {
            return Err(TemporalError::CaptureInProgress);
        }
        if config.mode != CaptureMode::FixedTime {
            return Err(TemporalError::UnsupportedCaptureMode(config.mode));
        }
        let frames = self.volume.frame_count();
        if frames == 0 {
            return Err(TemporalError::NotTemporal);
        }

        let (sink, events) = mpsc::channel();
        player.set_max_value(frames);
        let subscriptions = SubscriptionSet::subscribe_all(player.as_mut(), &sink);
        let playback = PlaybackState::new(player.fps());
        let capture = CaptureState::new(frames, config.duration);

        self.session_generation += 1;
        let id = self.session_generation;
        info!(
            "temporal capture {id} started: {frames} frames, {:?} per frame",
            capture.delay()
        );

        self.temporal = Some(TemporalSession {
            id,
            player,
            progress,
            subscriptions,
            events,
            cache: FrameCache::new(frames),
            capture,
            playback,
            frame_texture: None,
            step: None,
            arms: 0,
            readback_failures: 0,
        });
        self.capture_frame(id, 0);
        Ok(())
    }

    /// Ends the temporal session and returns to live first-frame rendering.
    pub fn stop_temporal(&mut self) {
        let Some(mut session) = self.temporal.take() else {
            debug!("stop requested without a temporal session");
            return;
        };

        session.playback.stop();
        session.progress.set_progress(0.0);
        session.player.set_frame(1);
        session.player.set_enabled(false);
        session.subscriptions.release(session.player.as_mut());

        if let Some(texture) = session.frame_texture.take()
            && self.surface.is_ready()
        {
            self.surface.device_mut().destroy_texture(texture);
        }
        info!(
            "temporal session {} stopped with {} cached frames",
            session.id,
            session.cache.len()
        );
        drop(session);

        self.stop_rendering();
        if self.volume.is_temporal() {
            self.begin_load(Some(0));
        }
    }

    pub fn handle_control(&mut self, control: TemporalControl) -> Result<(), TemporalError> {
        match control {
            TemporalControl::StartTemporalRenderingClick {
                config,
                player,
                progress,
            } => self.start_temporal(config, player, progress),
            TemporalControl::StopTemporalRenderingClick => {
                self.stop_temporal();
                Ok(())
            }
        }
    }

    pub fn is_temporal_rendering(&self) -> bool {
        self.temporal.is_some()
    }

    pub fn is_capture_complete(&self) -> bool {
        self.temporal
            .as_ref()
            .is_some_and(|s| s.capture.is_complete())
    }

    pub fn playback_mode(&self) -> Option<PlaybackMode> {
        self.temporal.as_ref().map(|s| s.playback.mode())
    }

    /// Zero-based index of the frame last shown from the cache.
    pub fn current_frame(&self) -> Option<usize> {
        self.temporal.as_ref().map(|s| s.playback.frame())
    }

    pub fn frame_cache(&self) -> Option<&FrameCache> {
        self.temporal.as_ref().map(|s| &s.cache)
    }

    fn session_mut(&mut self, id: u64) -> Option<&mut TemporalSession> {
        self.temporal.as_mut().filter(|s| s.id == id)
    }

    // ── capture ──

    fn capture_frame(&mut self, session: u64, frame: usize) {
        let Some(state) = self.session_mut(session) else {
            debug!("capture of frame {frame} dropped, session {session} ended");
            return;
        };

        if frame >= state.capture.frames() {
            state.capture.mark_complete();
            state.cache.seal();
            info!(
                "temporal capture {session} complete: {} frames, {} bytes",
                state.cache.len(),
                state.cache.byte_len()
            );
            state.player.play();
            return;
        }

        state.step = Some(CaptureStep::Loading { frame });
        self.stop_rendering();
        self.begin_load(Some(frame));
    }

    /// Arms the readback once the frame being captured reaches the renderer.
    ///
    /// Returns `false` when no capture is waiting for the bound data.
    pub(super) fn capture_frame_bound(&mut self) -> bool {
        let bound = self.volume.modality().and_then(|m| m.frame);
        let Some(state) = self.temporal.as_mut() else {
            return false;
        };
        let Some(CaptureStep::Loading { frame }) = state.step else {
            return false;
        };
        if bound != Some(frame) {
            return false;
        }

        let session = state.id;
        let delay = state.capture.delay();
        self.arm_readback(session, frame, delay);
        true
    }

    fn arm_readback(&mut self, session: u64, frame: usize, delay: Duration) {
        let Some(state) = self.session_mut(session) else {
            return;
        };
        state.arms += 1;
        let arm = state.arms;
        state.step = Some(CaptureStep::Bound {
            frame,
            arm,
            rendered: false,
            due: false,
        });
        self.scheduler
            .schedule_after(self.now, delay, Task::Readback { session, arm });
    }

    /// Per-frame delay elapsed; reads back now if the frame is on screen.
    pub(super) fn readback_timer(&mut self, session: u64, arm: u64) {
        let Some(state) = self.session_mut(session) else {
            debug!("readback dropped, session {session} ended");
            return;
        };
        let Some(CaptureStep::Bound {
            arm: current,
            rendered,
            due,
            ..
        }) = state.step.as_mut()
        else {
            return;
        };
        if *current != arm {
            debug!("stale readback timer {arm}");
            return;
        }
        if !*rendered {
            *due = true;
            return;
        }
        self.read_back_frame(session);
    }

    /// Called after every successful composite.
    pub(super) fn frame_rendered(&mut self) {
        let Some(state) = self.temporal.as_mut() else {
            return;
        };
        let Some(CaptureStep::Bound { rendered, due, .. }) = state.step.as_mut() else {
            return;
        };
        *rendered = true;
        if *due {
            let session = state.id;
            self.read_back_frame(session);
        }
    }

    fn read_back_frame(&mut self, session: u64) {
        let Some(state) = self.session_mut(session) else {
            return;
        };
        let Some(CaptureStep::Bound { frame, .. }) = state.step else {
            return;
        };

        if !self.surface.is_ready() {
            self.suspend_capture(self.surface.is_restorable());
            return;
        }

        let image = match self.surface.device_mut().read_pixels() {
            Ok(image) => image,
            Err(err) => {
                let Some(state) = self.session_mut(session) else {
                    return;
                };
                state.readback_failures += 1;
                if state.readback_failures >= MAX_READBACK_ATTEMPTS {
                    error!(
                        "readback of frame {frame} failed {MAX_READBACK_ATTEMPTS} times ({err}), \
                         abandoning capture"
                    );
                    self.stop_temporal();
                    return;
                }
                warn!("readback of frame {frame} failed ({err}), retrying");
                self.arm_readback(session, frame, READBACK_RETRY);
                return;
            }
        };

        let Some(state) = self.session_mut(session) else {
            return;
        };
        state.readback_failures = 0;
        state.step = None;
        state.cache.push(image);
        let percent = state.capture.progress_after(frame);
        state.progress.set_progress(percent);
        debug!("captured frame {}/{}", frame + 1, state.capture.frames());

        self.capture_frame(session, frame + 1);
    }

    /// Reacts to the surface going away mid-capture.
    ///
    /// A restorable surface puts the frame back to waiting for its bind,
    /// which the restore performs. Otherwise the session ends.
    pub(super) fn suspend_capture(&mut self, restorable: bool) {
        let Some(state) = self.temporal.as_mut() else {
            return;
        };
        state.frame_texture = None;
        if state.capture.is_complete() {
            return;
        }

        if restorable {
            if let Some(CaptureStep::Bound { frame, .. }) = state.step {
                state.step = Some(CaptureStep::Loading { frame });
            }
            debug!("temporal capture {} waiting for the surface", state.id);
        } else {
            error!(
                "surface lost for good, abandoning temporal capture {}",
                state.id
            );
            self.stop_temporal();
        }
    }

    // ── player events ──

    pub(super) fn drain_player_events(&mut self) {
        for _ in 0..MAX_EVENT_ROUNDS {
            let Some(state) = self.temporal.as_ref() else {
                return;
            };
            let session = state.id;
            let events: Vec<PlayerEvent> = state.events.try_iter().collect();
            if events.is_empty() {
                return;
            }
            for event in events {
                self.handle_player_event(session, event);
            }
        }
        warn!("player events still pending after {MAX_EVENT_ROUNDS} rounds");
    }

    fn handle_player_event(&mut self, session: u64, event: PlayerEvent) {
        let Some(state) = self.session_mut(session) else {
            return;
        };

        if let PlayerEvent::FpsChange { fps } = event {
            state.playback.set_fps(fps);
            debug!("playback rate set to {} fps", state.playback.fps());
            return;
        }
        if !state.capture.is_complete() {
            debug!("player event {event:?} ignored during capture");
            return;
        }

        let playing = state.playback.is_playing();
        let current = state.playback.frame() as isize;
        match event {
            PlayerEvent::Play => self.play(session),
            PlayerEvent::Pause => state.playback.pause(),
            PlayerEvent::Stop => {
                state.playback.stop();
                self.show_cached_frame(session, 0);
            }
            PlayerEvent::PrevFrame if !playing => {
                self.show_cached_frame(session, current - 1);
            }
            PlayerEvent::NextFrame if !playing => {
                self.show_cached_frame(session, current + 1);
            }
            PlayerEvent::FrameChange { frame } if !playing && frame as isize != current => {
                self.show_cached_frame(session, frame as isize);
            }
            _ => {}
        }
    }

    // ── playback ──

    fn play(&mut self, session: u64) {
        let Some(state) = self.session_mut(session) else {
            return;
        };
        let Some(generation) = state.playback.play() else {
            return;
        };
        state.player.set_enabled(true);
        let frame = state.playback.frame();

        self.stop_rendering();
        self.playback_step(session, generation, frame);
    }

    /// Shows `frame` and schedules the next one after the tick interval.
    pub(super) fn playback_step(&mut self, session: u64, generation: u64, frame: usize) {
        let Some(state) = self.session_mut(session) else {
            return;
        };
        if !state.playback.accepts_tick(generation) {
            return;
        }
        let interval = state.playback.tick_interval();

        let shown = self.show_cached_frame(session, frame as isize);
        self.scheduler.schedule_after(
            self.now,
            interval,
            Task::PlaybackTimer {
                session,
                generation,
                frame: shown + 1,
            },
        );
    }

    /// Blits a cached frame; returns the wrapped index that was selected.
    fn show_cached_frame(&mut self, session: u64, frame: isize) -> usize {
        let Some(state) = self.temporal.as_mut().filter(|s| s.id == session) else {
            return 0;
        };

        let frame = wrap_frame(frame, state.cache.len());
        state.playback.set_frame(frame);
        state.player.set_frame(frame + 1);

        let Some(image) = state.cache.get(frame) else {
            return frame;
        };
        if !self.surface.is_ready() {
            return frame;
        }

        let gpu = self.surface.device_mut();
        let uploaded = match state.frame_texture {
            Some(texture) => gpu
                .write_texture(texture, image.width, image.height, &image.pixels)
                .map(|()| texture),
            None => Err(DeviceError::NotInitialized),
        };
        let texture = match uploaded {
            Ok(texture) => Ok(texture),
            Err(_) => gpu.create_texture(&TextureDesc {
                label: "temporal frame",
                width: image.width,
                height: image.height,
                format: TexelFormat::Rgba8,
                filter: Filter::Linear,
                data: Some(&image.pixels),
            }),
        };

        match texture {
            Ok(texture) => {
                state.frame_texture = Some(texture);
                if let Err(err) = self.surface.blit(texture) {
                    self.report_device_error(err);
                }
            }
            Err(err) => self.report_device_error(err),
        }
        frame
    }
}
