use std::time::{Duration, Instant};

use super::*;
use crate::device::DeviceEvent;
use crate::temporal::{CaptureConfig, CaptureMode, PlaybackMode, TemporalControl, TemporalError};
use crate::testing::{
    MemoryReader, MockDevice, RecordingProgress, SharedDeviceLog, SharedPlayer, SharedProgress,
    StageRecorder, recording_registry, recording_player,
};

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

struct Harness {
    ctx: RenderingContext,
    device: SharedDeviceLog,
    calls: StageRecorder,
    t: Instant,
}

fn harness_with(config: ContextConfig) -> Harness {
    let (device, log) = MockDevice::new();
    let calls = StageRecorder::default();
    let mut ctx = RenderingContext::new(Box::new(device), recording_registry(&calls), config).unwrap();
    ctx.choose_renderer(RendererKind::Mip).unwrap();
    ctx.choose_tone_mapper(ToneMapperKind::Range).unwrap();

    let t = Instant::now();
    ctx.pump(t);
    Harness {
        ctx,
        device: log,
        calls,
        t,
    }
}

fn harness() -> Harness {
    harness_with(ContextConfig {
        resolution: 2,
        ..ContextConfig::default()
    })
}

/// Harness with a loaded temporal volume rendering its first frame.
fn temporal_harness(frames: usize) -> Harness {
    let mut h = harness();
    h.ctx.set_volume(Box::new(MemoryReader::temporal(frames)));
    h.ctx.pump(h.t);
    h.ctx.on_refresh(h.t);
    h
}

impl Harness {
    fn start(&mut self, duration: Duration, player: &SharedPlayer, progress: &SharedProgress) {
        self.ctx
            .start_temporal(
                CaptureConfig::fixed_time(duration),
                Box::new(player.clone()),
                Box::new(progress.clone()),
            )
            .unwrap();
    }

    /// Loads, renders and reads back one frame per `per_frame`.
    fn run_capture(&mut self, frames: usize, per_frame: Duration) {
        for _ in 0..frames {
            self.ctx.pump(self.t);
            self.ctx.on_refresh(self.t);
            self.t += per_frame;
            self.ctx.pump(self.t);
        }
    }

    /// Advances one playback tick: timer, then display refresh.
    fn tick(&mut self, by: Duration) {
        self.t += by;
        self.ctx.pump(self.t);
        self.ctx.on_refresh(self.t);
    }
}

fn progress() -> SharedProgress {
    SharedProgress::new(std::cell::RefCell::new(RecordingProgress::default()))
}

// ── live rendering ──

#[test]
fn rendering_starts_once_volume_is_bound() {
    let mut h = harness();
    h.ctx.set_volume(Box::new(MemoryReader::static_volume()));
    assert!(!h.ctx.is_rendering());

    h.ctx.pump(h.t);
    assert!(h.ctx.is_rendering());
    assert!(h.ctx.volume().is_loaded());
    assert_eq!(h.calls.borrow().bound_frames, vec![None]);

    h.ctx.on_refresh(h.t);
    assert_eq!(h.device.borrow().draws.len(), 1);
    assert_eq!(h.calls.borrow().renders, 1);
}

#[test]
fn inverse_mvp_uploads_only_after_changes() {
    let mut h = harness();
    h.ctx.set_volume(Box::new(MemoryReader::static_volume()));
    h.ctx.pump(h.t);

    h.ctx.on_refresh(h.t);
    h.ctx.on_refresh(h.t + ms(16));
    assert_eq!(h.calls.borrow().matrices.len(), 1);

    h.ctx.set_scale(2.0, 1.0, 1.0);
    h.ctx.on_refresh(h.t + ms(32));
    assert_eq!(h.calls.borrow().matrices.len(), 2);
    assert_eq!(h.ctx.scale(), Vec3::new(2.0, 1.0, 1.0));

    let expected = (h.ctx.camera().transformation_matrix()
        * glam::Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0))
        * glam::Mat4::from_translation(Vec3::splat(-0.5)))
    .inverse()
    .transpose();
    let uploaded = *h.calls.borrow().matrices.last().unwrap();
    assert!(uploaded.abs_diff_eq(expected, 1e-4));
}

#[test]
fn superseded_load_is_dropped() {
    let mut h = harness();
    h.ctx.set_volume(Box::new(MemoryReader::static_volume()));
    h.ctx.set_volume(Box::new(MemoryReader::temporal(3)));
    h.ctx.pump(h.t);

    assert_eq!(h.calls.borrow().bound_frames, vec![Some(0)]);
}

#[test]
fn filter_change_rebinds_and_resets() {
    let mut h = harness();
    h.ctx.set_volume(Box::new(MemoryReader::static_volume()));
    h.ctx.pump(h.t);
    let resets = h.calls.borrow().resets;

    h.ctx.set_filter(crate::device::Filter::Nearest);
    assert_eq!(h.ctx.volume().filter(), crate::device::Filter::Nearest);
    assert_eq!(h.calls.borrow().resets, resets + 1);
    assert_eq!(h.calls.borrow().bound_frames.len(), 2);
}

#[test]
fn resize_updates_surface_and_camera() {
    let mut h = harness();
    h.ctx.resize(300, 100);

    assert_eq!(h.device.borrow().resizes.last(), Some(&(300, 100)));
    let (fov_x, fov_y) = h.ctx.camera().fov();
    assert!((fov_x - fov_y * 3.0).abs() < 1e-6);
    assert!(h.ctx.camera().is_dirty());
}

// ── stages ──

#[test]
fn switching_renderers_destroys_all_but_one() {
    let mut h = harness();
    h.ctx.choose_renderer(RendererKind::Iso).unwrap();
    h.ctx.choose_renderer(RendererKind::Eam).unwrap();
    h.ctx.choose_renderer(RendererKind::Mip).unwrap();

    let calls = h.calls.borrow();
    assert_eq!(calls.renderers_destroyed, calls.renderers_built - 1);
    assert_eq!(h.ctx.renderer_kind(), Some(RendererKind::Mip));
}

#[test]
fn unknown_renderer_name_is_rejected() {
    let mut h = harness();
    let err = h.ctx.choose_renderer_by_name("pathtracer").unwrap_err();
    assert!(matches!(
        err,
        ContextError::Stage(StageError::UnknownRenderer(name)) if name == "pathtracer"
    ));
    assert!(h.ctx.choose_tone_mapper_by_name("aces").is_err());
    assert_eq!(h.ctx.renderer_kind(), Some(RendererKind::Mip));
}

#[test]
fn renderer_switch_reuploads_matrix() {
    let mut h = harness();
    h.ctx.set_volume(Box::new(MemoryReader::static_volume()));
    h.ctx.pump(h.t);
    h.ctx.on_refresh(h.t);

    h.ctx.choose_renderer(RendererKind::Iso).unwrap();
    h.ctx.on_refresh(h.t + ms(16));
    assert_eq!(h.calls.borrow().matrices.len(), 2);
    // The new renderer got the already loaded volume at construction.
    assert_eq!(h.calls.borrow().bound_frames.len(), 2);
}

#[test]
fn resolution_is_shared_and_kept_across_switches() {
    let mut h = harness();
    h.ctx.set_resolution(8).unwrap();
    h.ctx.choose_renderer(RendererKind::Eam).unwrap();

    assert_eq!(h.ctx.resolution(), 8);
    assert_eq!(h.calls.borrow().resolutions.last(), Some(&8));
}

// ── surface loss ──

#[test]
fn loss_and_restore_rebuild_stages() {
    let mut h = harness();
    h.ctx.set_volume(Box::new(MemoryReader::static_volume()));
    h.ctx.pump(h.t);
    h.ctx.on_refresh(h.t);
    let draws = h.device.borrow().draws.len();

    h.device.borrow_mut().pending_events.push(DeviceEvent::Lost);
    h.ctx.pump(h.t);
    assert_eq!(h.ctx.surface_state(), SurfaceState::Lost);
    assert!(h.ctx.renderer_kind().is_none());

    h.ctx.on_refresh(h.t + ms(16));
    assert_eq!(h.device.borrow().draws.len(), draws);

    h.device.borrow_mut().pending_events.push(DeviceEvent::Restored);
    h.ctx.pump(h.t + ms(32));
    assert_eq!(h.ctx.surface_state(), SurfaceState::Ready);
    assert_eq!(h.ctx.renderer_kind(), Some(RendererKind::Mip));
    assert_eq!(h.ctx.tone_mapper_kind(), Some(ToneMapperKind::Range));

    h.ctx.on_refresh(h.t + ms(48));
    let log = h.device.borrow();
    assert_eq!(log.draws.len(), draws + 1);
    assert_eq!(log.draws.last().unwrap().epoch(), 2);
    assert_eq!(h.ctx.renderer().unwrap().texture().epoch(), 2);
}

#[test]
fn stage_chosen_while_lost_is_built_on_restore() {
    let mut h = harness();
    assert_eq!(h.ctx.on_context_lost(), LossResponse::AwaitRestore);

    h.ctx.choose_renderer(RendererKind::Iso).unwrap();
    h.ctx.on_context_restored().unwrap();
    assert_eq!(h.ctx.renderer_kind(), Some(RendererKind::Iso));
}

#[test]
fn non_restorable_surface_ignores_restore() {
    let mut h = harness_with(ContextConfig {
        resolution: 2,
        restorable: false,
        ..ContextConfig::default()
    });
    assert_eq!(h.ctx.on_context_lost(), LossResponse::Default);

    h.device.borrow_mut().pending_events.push(DeviceEvent::Restored);
    h.ctx.pump(h.t);
    assert_eq!(h.ctx.surface_state(), SurfaceState::Lost);
    assert!(h.ctx.renderer_kind().is_none());
}

// ── temporal capture ──

#[test]
fn capture_reads_back_every_frame() {
    let mut h = temporal_harness(3);
    let player = recording_player(10);
    let progress = progress();

    h.start(Duration::from_secs(3), &player, &progress);
    h.run_capture(3, Duration::from_secs(1));

    let cache = h.ctx.frame_cache().unwrap();
    assert_eq!(cache.len(), 3);
    assert!(cache.is_sealed());
    for frame in 0..3 {
        assert_eq!(cache.get(frame).unwrap().pixels[0], frame as u8);
    }

    let reports = progress.borrow().reports.clone();
    let rounded: Vec<f32> = reports.iter().map(|p| p.round()).collect();
    assert_eq!(rounded, vec![33.0, 67.0, 100.0]);
    assert_eq!(*reports.last().unwrap(), 100.0);

    assert!(h.ctx.is_capture_complete());
    assert_eq!(player.borrow().plays, 1);
    assert_eq!(player.borrow().max_values, vec![3]);
    assert_eq!(h.ctx.playback_mode(), Some(PlaybackMode::Playing));
}

#[test]
fn second_start_is_rejected() {
    let mut h = temporal_harness(2);
    let player = recording_player(10);
    h.start(Duration::from_secs(2), &player, &progress());

    let other = recording_player(10);
    let err = h
        .ctx
        .start_temporal(
            CaptureConfig::fixed_time(Duration::from_secs(2)),
            Box::new(other.clone()),
            Box::new(progress()),
        )
        .unwrap_err();
    assert_eq!(err, TemporalError::CaptureInProgress);
    assert_eq!(other.borrow().model.listener_count(), 0);
    assert!(other.borrow().max_values.is_empty());
}

#[test]
fn fixed_error_mode_is_rejected() {
    let mut h = temporal_harness(2);
    let err = h
        .ctx
        .start_temporal(
            CaptureConfig {
                mode: CaptureMode::FixedError,
                duration: Duration::from_secs(1),
            },
            Box::new(recording_player(10)),
            Box::new(progress()),
        )
        .unwrap_err();
    assert_eq!(err, TemporalError::UnsupportedCaptureMode(CaptureMode::FixedError));
    assert!(!h.ctx.is_temporal_rendering());
}

#[test]
fn static_volume_cannot_be_captured() {
    let mut h = harness();
    h.ctx.set_volume(Box::new(MemoryReader::static_volume()));
    h.ctx.pump(h.t);
    let err = h
        .ctx
        .start_temporal(
            CaptureConfig::default(),
            Box::new(recording_player(10)),
            Box::new(progress()),
        )
        .unwrap_err();
    assert_eq!(err, TemporalError::NotTemporal);
}

#[test]
fn capture_skips_inverse_mvp_updates() {
    let mut h = temporal_harness(2);
    let uploads = h.calls.borrow().matrices.len();

    h.start(Duration::from_secs(2), &recording_player(10), &progress());
    h.ctx.set_translation(0.2, 0.0, 0.0);
    h.run_capture(2, Duration::from_secs(1));
    assert_eq!(h.calls.borrow().matrices.len(), uploads);
}

#[test]
fn player_events_wait_for_capture() {
    let mut h = temporal_harness(3);
    let player = recording_player(10);
    h.start(Duration::from_secs(3), &player, &progress());

    h.run_capture(1, Duration::from_secs(1));
    player.borrow_mut().model.next_frame();
    h.ctx.pump(h.t);

    assert_eq!(h.ctx.playback_mode(), Some(PlaybackMode::Stopped));
    assert!(player.borrow().frames_set.is_empty());
}

#[test]
fn zero_delay_capture_reads_back_each_bound_frame() {
    let mut h = temporal_harness(3);
    let player = recording_player(10);
    h.start(Duration::ZERO, &player, &progress());

    for _ in 0..3 {
        h.ctx.pump(h.t);
        h.ctx.on_refresh(h.t);
    }

    let cache = h.ctx.frame_cache().unwrap();
    let shown: Vec<u8> = (0..cache.len())
        .map(|f| cache.get(f).unwrap().pixels[0])
        .collect();
    assert_eq!(shown, vec![0, 1, 2]);
    assert!(h.ctx.is_capture_complete());
}

#[test]
fn readback_waits_for_a_refresh_after_bind() {
    let mut h = temporal_harness(3);
    h.start(ms(3), &recording_player(10), &progress());
    h.ctx.pump(h.t);

    // The per-frame delay has elapsed, but nothing was drawn since the bind.
    h.t += ms(5);
    h.ctx.pump(h.t);
    assert_eq!(h.device.borrow().readbacks, 0);
    assert_eq!(h.ctx.frame_cache().unwrap().len(), 0);

    h.ctx.on_refresh(h.t);
    assert_eq!(h.device.borrow().readbacks, 1);
    assert_eq!(h.ctx.frame_cache().unwrap().len(), 1);
}

#[test]
fn permanent_loss_ends_capture() {
    let mut h = harness_with(ContextConfig {
        resolution: 2,
        restorable: false,
        ..ContextConfig::default()
    });
    h.ctx.set_volume(Box::new(MemoryReader::temporal(3)));
    h.ctx.pump(h.t);
    h.ctx.on_refresh(h.t);

    let player = recording_player(10);
    let progress = progress();
    h.start(Duration::from_secs(3), &player, &progress);
    h.ctx.pump(h.t);

    h.device.borrow_mut().pending_events.push(DeviceEvent::Lost);
    h.ctx.pump(h.t);
    assert!(!h.ctx.is_temporal_rendering());

    for _ in 0..100 {
        h.t += ms(16);
        h.ctx.pump(h.t);
        h.ctx.on_refresh(h.t);
    }
    assert_eq!(h.ctx.next_deadline(), None);
    assert!(!h.ctx.wants_refresh());
    assert_eq!(h.device.borrow().readbacks, 0);
    assert!(progress.borrow().reports.iter().all(|p| *p == 0.0));

    let player = player.borrow();
    assert_eq!(player.enabled.last(), Some(&false));
    assert_eq!(player.model.listener_count(), 0);
}

#[test]
fn restorable_loss_resumes_capture() {
    let mut h = temporal_harness(2);
    let player = recording_player(10);
    h.start(Duration::from_secs(2), &player, &progress());
    h.ctx.pump(h.t);
    h.ctx.on_refresh(h.t);

    h.device.borrow_mut().pending_events.push(DeviceEvent::Lost);
    h.ctx.pump(h.t);
    assert!(h.ctx.is_temporal_rendering());

    // The delay runs out while the surface is down.
    h.t += Duration::from_secs(1);
    h.ctx.pump(h.t);
    assert_eq!(h.ctx.frame_cache().unwrap().len(), 0);

    h.device.borrow_mut().pending_events.push(DeviceEvent::Restored);
    h.ctx.pump(h.t);
    h.run_capture(2, Duration::from_secs(1));

    let cache = h.ctx.frame_cache().unwrap();
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(0).unwrap().pixels[0], 0);
    assert_eq!(cache.get(1).unwrap().pixels[0], 1);
    assert!(h.ctx.is_capture_complete());
    assert_eq!(player.borrow().plays, 1);
}

// ── teardown ──

#[test]
fn abort_mid_capture_resets_player() {
    let mut h = temporal_harness(4);
    let player = recording_player(10);
    let progress = progress();
    h.start(Duration::from_secs(4), &player, &progress);

    // Frame 0 is loaded and rendered but not read back yet.
    h.ctx.pump(h.t);
    h.ctx.on_refresh(h.t);
    let readbacks = h.device.borrow().readbacks;

    h.ctx
        .handle_control(TemporalControl::StopTemporalRenderingClick)
        .unwrap();
    assert!(!h.ctx.is_temporal_rendering());
    {
        let player = player.borrow();
        assert_eq!(player.frames_set.last(), Some(&1));
        assert_eq!(player.enabled.last(), Some(&false));
        assert_eq!(player.model.frame(), 1);
        assert_eq!(player.model.listener_count(), 0);
    }
    assert!(progress.borrow().reports.iter().all(|p| *p == 0.0));

    // The pending readback finds no session and does nothing.
    h.t += Duration::from_secs(1);
    h.ctx.pump(h.t);
    assert_eq!(h.device.borrow().readbacks, readbacks);

    // Live rendering of the first frame resumes.
    assert!(h.ctx.is_rendering());
    assert_eq!(h.calls.borrow().bound_frames.last(), Some(&Some(0)));
}

#[test]
fn stop_after_completion_resets_player() {
    let mut h = temporal_harness(2);
    let player = recording_player(10);
    h.start(Duration::from_secs(2), &player, &progress());
    h.run_capture(2, Duration::from_secs(1));
    h.tick(ms(100));

    h.ctx.stop_temporal();
    let player = player.borrow();
    assert_eq!(player.frames_set.last(), Some(&1));
    assert_eq!(player.enabled, vec![true, false]);
    assert_eq!(player.model.listener_count(), 0);
    assert!(h.ctx.frame_cache().is_none());
}

#[test]
fn restart_after_stop_captures_fresh_cache() {
    let mut h = temporal_harness(2);
    h.start(Duration::from_secs(2), &recording_player(10), &progress());
    h.ctx.pump(h.t);
    h.ctx.stop_temporal();

    let player = recording_player(10);
    h.start(Duration::from_secs(2), &player, &progress());
    h.run_capture(2, Duration::from_secs(1));

    assert_eq!(h.ctx.frame_cache().unwrap().len(), 2);
    assert_eq!(player.borrow().plays, 1);
}

// ── playback ──

#[test]
fn playback_cycles_at_fps() {
    let mut h = temporal_harness(5);
    let player = recording_player(10);
    h.start(Duration::from_millis(500), &player, &progress());
    h.run_capture(5, ms(100));

    let mut shown = vec![h.ctx.current_frame().unwrap()];
    for _ in 0..6 {
        assert_eq!(h.ctx.next_deadline(), Some(h.t + ms(100)));
        h.tick(ms(100));
        shown.push(h.ctx.current_frame().unwrap());
    }

    assert_eq!(shown, vec![0, 1, 2, 3, 4, 0, 1]);
    assert_eq!(player.borrow().frames_set, vec![1, 2, 3, 4, 5, 1, 2]);
    assert_eq!(player.borrow().enabled, vec![true]);
    assert!(!h.ctx.is_rendering());
}

#[test]
fn tick_waits_for_display_refresh() {
    let mut h = temporal_harness(3);
    h.start(Duration::from_secs(3), &recording_player(10), &progress());
    h.run_capture(3, Duration::from_secs(1));

    h.t += ms(100);
    h.ctx.pump(h.t);
    assert_eq!(h.ctx.current_frame(), Some(0));
    assert!(h.ctx.wants_refresh());

    h.ctx.on_refresh(h.t + ms(7));
    assert_eq!(h.ctx.current_frame(), Some(1));
}

#[test]
fn fps_change_applies_from_next_tick() {
    let mut h = temporal_harness(4);
    let player = recording_player(10);
    h.start(Duration::from_secs(4), &player, &progress());
    h.run_capture(4, Duration::from_secs(1));

    player.borrow_mut().model.set_fps(20);
    h.ctx.pump(h.t);
    assert_eq!(h.ctx.next_deadline(), Some(h.t + ms(100)));

    h.tick(ms(100));
    assert_eq!(h.ctx.next_deadline(), Some(h.t + ms(50)));
}

#[test]
fn seeking_wraps_while_paused() {
    let mut h = temporal_harness(5);
    let player = recording_player(10);
    h.start(Duration::from_millis(500), &player, &progress());
    h.run_capture(5, ms(100));

    player.borrow_mut().model.pause();
    h.ctx.pump(h.t);
    assert_eq!(h.ctx.playback_mode(), Some(PlaybackMode::Paused));
    assert_eq!(h.ctx.current_frame(), Some(0));

    player.borrow_mut().model.prev_frame();
    h.ctx.pump(h.t);
    assert_eq!(h.ctx.current_frame(), Some(4));

    player.borrow_mut().model.next_frame();
    h.ctx.pump(h.t);
    assert_eq!(h.ctx.current_frame(), Some(0));

    use crate::temporal::FramePlayer;
    player.borrow_mut().set_frame(3);
    h.ctx.pump(h.t);
    assert_eq!(h.ctx.current_frame(), Some(2));

    // The tick scheduled before the pause is stale.
    h.tick(ms(100));
    assert_eq!(h.ctx.current_frame(), Some(2));

    let framebuffer_value = {
        let log = h.device.borrow();
        let drawn = log.draws.last().copied().unwrap();
        log.textures.get(&drawn.id()).unwrap().data[0]
    };
    assert_eq!(framebuffer_value, 2);
}

#[test]
fn stop_event_rewinds_to_first_frame() {
    let mut h = temporal_harness(3);
    let player = recording_player(10);
    h.start(Duration::from_secs(3), &player, &progress());
    h.run_capture(3, Duration::from_secs(1));
    h.tick(ms(100));
    assert_eq!(h.ctx.current_frame(), Some(1));

    player.borrow_mut().model.stop();
    h.ctx.pump(h.t);
    assert_eq!(h.ctx.playback_mode(), Some(PlaybackMode::Stopped));
    assert_eq!(h.ctx.current_frame(), Some(0));
    assert_eq!(player.borrow().frames_set.last(), Some(&1));

    // Playing again starts over from the first frame.
    use crate::temporal::FramePlayer;
    player.borrow_mut().play();
    h.ctx.pump(h.t);
    assert_eq!(h.ctx.playback_mode(), Some(PlaybackMode::Playing));
    assert_eq!(h.ctx.current_frame(), Some(0));
}
