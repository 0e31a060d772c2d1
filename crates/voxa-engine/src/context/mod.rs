//! Rendering context.
//!
//! Owns the graphics surface, the camera and model transform, the render
//! graph and the attached volume, and sequences them:
//! - volume loads run as chained scheduler tasks and start rendering once
//!   data is bound to the renderer
//! - every display refresh renders one frame while rendering is enabled
//! - surface loss tears the stages down; a restore rebuilds them
//!
//! Temporal capture and playback live in [`session`].

mod camera;
mod config;
mod graph;
mod session;
mod stage;
mod surface;
mod transform;
mod volume;

use std::time::Instant;

use glam::Vec3;
use log::{debug, error, info, warn};
use thiserror::Error;

pub use camera::Camera;
pub use config::{CameraConfig, ContextConfig};
pub use graph::RenderGraph;
pub use stage::{
    Renderer, RendererFactory, RendererInputs, RendererKind, StageError, StageRegistry,
    ToneMapper, ToneMapperFactory, ToneMapperKind,
};
pub use surface::{BaselineResources, GraphicsSurfaceManager, LossResponse, SurfaceState};
pub use transform::TransformPipeline;
pub use volume::{ModalityData, ModalityInfo, Volume, VolumeError, VolumeMetadata, VolumeReader};

use session::TemporalSession;

use crate::device::{
    DeviceError, DeviceEvent, Filter, GraphicsDevice, Image, SurfaceErrorAction, TextureHandle,
};
use crate::temporal::TemporalError;
use crate::time::Scheduler;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    Temporal(#[from] TemporalError),

    #[error("graphics surface is not ready")]
    SurfaceNotReady,
}

/// Deferred work driven by [`RenderingContext::pump`] and
/// [`RenderingContext::on_refresh`].
#[derive(Debug)]
enum Task {
    LoadMetadata { load: u64, frame: Option<usize> },
    LoadModality { load: u64 },
    Readback { session: u64, arm: u64 },
    PlaybackTimer { session: u64, generation: u64, frame: usize },
    PlaybackDraw { session: u64, generation: u64, frame: usize },
}

pub struct RenderingContext {
    config: ContextConfig,
    surface: GraphicsSurfaceManager,
    camera: Camera,
    transform: TransformPipeline,
    graph: RenderGraph,
    volume: Volume,
    filter: Filter,
    environment_image: Option<Image>,

    rendering: bool,
    scheduler: Scheduler<Task>,
    now: Instant,

    /// Bumped by every load request; older load chains abort.
    load_generation: u64,
    /// Bumped by every temporal session.
    session_generation: u64,
    temporal: Option<TemporalSession>,

    /// Stages to rebuild once a lost surface comes back.
    lost_stages: (Option<RendererKind>, Option<ToneMapperKind>),
}

impl RenderingContext {
    pub fn new(
        device: Box<dyn GraphicsDevice>,
        registry: StageRegistry,
        config: ContextConfig,
    ) -> Result<Self, ContextError> {
        let mut surface = GraphicsSurfaceManager::new(device, config.restorable);
        surface.initialize()?;

        let mut camera = Camera::new(&config.camera);
        let (width, height) = surface.device().drawing_buffer_size();
        camera.resize(width, height);

        let graph = RenderGraph::new(registry, config.resolution.max(1));

        Ok(Self {
            filter: config.filter,
            config,
            surface,
            camera,
            transform: TransformPipeline::new(),
            graph,
            volume: Volume::empty(),
            environment_image: None,
            rendering: false,
            scheduler: Scheduler::new(),
            now: Instant::now(),
            load_generation: 0,
            session_generation: 0,
            temporal: None,
            lost_stages: (None, None),
        })
    }

    // ── host loop ──

    /// Runs due timers and pending player events at `now`.
    pub fn pump(&mut self, now: Instant) {
        self.advance_to(now);
        self.poll_device_events();
        self.drain_player_events();

        while let Some(task) = self.scheduler.pop_due(self.now) {
            self.run_task(task);
            self.drain_player_events();
        }
    }

    /// Display refresh: runs refresh waiters, then renders if enabled.
    pub fn on_refresh(&mut self, now: Instant) {
        self.advance_to(now);

        for task in self.scheduler.take_refresh() {
            self.run_task(task);
        }
        if self.rendering {
            self.render_frame();
        }
    }

    /// Earliest instant [`pump`](Self::pump) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// True while the next display refresh has work to do.
    pub fn wants_refresh(&self) -> bool {
        self.rendering || self.scheduler.has_refresh_waiters()
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    fn advance_to(&mut self, now: Instant) {
        self.now = self.now.max(now);
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::LoadMetadata { load, frame } => self.load_metadata(load, frame),
            Task::LoadModality { load } => self.load_modality(load),
            Task::Readback { session, arm } => self.readback_timer(session, arm),
            Task::PlaybackTimer {
                session,
                generation,
                frame,
            } => self.scheduler.defer_to_refresh(Task::PlaybackDraw {
                session,
                generation,
                frame,
            }),
            Task::PlaybackDraw {
                session,
                generation,
                frame,
            } => self.playback_step(session, generation, frame),
        }
    }

    // ── surface ──

    pub fn has_compute_capabilities(&self) -> bool {
        self.surface.has_compute_capabilities()
    }

    pub fn surface_state(&self) -> SurfaceState {
        self.surface.state()
    }

    pub fn surface(&self) -> &GraphicsSurfaceManager {
        &self.surface
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface.resize(width, height);
        self.camera.resize(width, height);
    }

    fn poll_device_events(&mut self) {
        for event in self.surface.device_mut().poll_events() {
            match event {
                DeviceEvent::Lost => {
                    self.on_context_lost();
                }
                DeviceEvent::Restored => {
                    if let Err(err) = self.on_context_restored() {
                        error!("surface restore failed: {err}");
                    }
                }
            }
        }
    }

    /// Drops every GPU-side object; the active stage kinds are remembered.
    pub fn on_context_lost(&mut self) -> LossResponse {
        let response = self.surface.handle_lost();

        let kinds = self.graph.teardown(self.surface.device_mut());
        if kinds != (None, None) {
            self.lost_stages = kinds;
        }
        self.suspend_capture(response == LossResponse::AwaitRestore);
        response
    }

    /// Reinitializes the surface and rebuilds the stages lost with it.
    pub fn on_context_restored(&mut self) -> Result<(), ContextError> {
        if !self.surface.handle_restored()? {
            return Ok(());
        }

        if let Some(image) = self.environment_image.as_ref() {
            self.surface.set_environment_map(image)?;
        }
        let (width, height) = self.surface.device().drawing_buffer_size();
        self.camera.resize(width, height);

        let kinds = std::mem::take(&mut self.lost_stages);
        let environment = self.environment_texture()?;
        self.graph
            .rebuild(self.surface.device_mut(), kinds, &self.volume, environment)?;
        self.transform.mark_dirty();
        // The rebuilt renderer already holds the volume; a waiting capture
        // frame can be armed straight away.
        if self.volume.is_loaded()
            && self.graph.renderer().is_some()
            && self.capture_frame_bound()
        {
            self.start_rendering();
        }

        info!("rendering context restored");
        Ok(())
    }

    pub fn set_environment_map(&mut self, image: Image) -> Result<(), ContextError> {
        if self.surface.is_ready() {
            self.surface.set_environment_map(&image)?;
            self.graph.reset_renderer();
        }
        self.environment_image = Some(image);
        Ok(())
    }

    fn environment_texture(&self) -> Result<TextureHandle, ContextError> {
        self.surface
            .baseline()
            .map(|b| b.environment)
            .ok_or(ContextError::SurfaceNotReady)
    }

    // ── volume ──

    /// Attaches a new volume and starts loading it.
    ///
    /// Temporal volumes load their first frame. Rendering starts once the
    /// data reaches the renderer.
    pub fn set_volume(&mut self, reader: Box<dyn VolumeReader>) {
        if self.temporal.is_some() {
            self.stop_temporal();
        }

        self.volume = Volume::from_reader(reader);
        let frame = self.volume.is_temporal().then_some(0);
        info!(
            "volume attached: frames={} modality={:?}",
            self.volume.frame_count(),
            self.config.modality
        );
        self.begin_load(frame);
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
        if !self.volume.is_loaded() {
            return;
        }

        self.volume.set_filter(filter);
        if self.surface.is_ready()
            && let Err(err) = self.graph.bind_volume(self.surface.device_mut(), &self.volume)
        {
            self.report_stage_error(err);
        }
        self.graph.reset_renderer();
    }

    fn begin_load(&mut self, frame: Option<usize>) {
        self.load_generation += 1;
        self.scheduler.schedule_at(
            self.now,
            Task::LoadMetadata {
                load: self.load_generation,
                frame,
            },
        );
    }

    fn load_metadata(&mut self, load: u64, frame: Option<usize>) {
        if load != self.load_generation {
            debug!("dropping stale metadata load {load}");
            return;
        }

        match self.volume.load_metadata(frame) {
            Ok(()) => self
                .scheduler
                .schedule_at(self.now, Task::LoadModality { load }),
            Err(err) => error!("failed to read volume metadata: {err}"),
        }
    }

    fn load_modality(&mut self, load: u64) {
        if load != self.load_generation {
            debug!("dropping stale modality load {load}");
            return;
        }

        if let Err(err) = self.volume.load_modality(&self.config.modality) {
            error!("failed to read modality {:?}: {err}", self.config.modality);
            return;
        }
        self.volume.set_filter(self.filter);

        if !self.surface.is_ready() {
            debug!("volume loaded while the surface is down");
            return;
        }
        match self.graph.bind_volume(self.surface.device_mut(), &self.volume) {
            Ok(true) => {
                self.start_rendering();
                self.capture_frame_bound();
            }
            Ok(false) => debug!("volume loaded without a renderer"),
            Err(err) => self.report_stage_error(err),
        }
    }

    // ── stages ──

    pub fn choose_renderer(&mut self, kind: RendererKind) -> Result<(), ContextError> {
        if !self.surface.is_ready() {
            debug!("deferring renderer {kind} until the surface is back");
            self.lost_stages.0 = Some(kind);
            return Ok(());
        }

        let environment = self.environment_texture()?;
        self.graph
            .choose_renderer(self.surface.device_mut(), kind, &self.volume, environment)?;
        self.transform.mark_dirty();
        Ok(())
    }

    pub fn choose_renderer_by_name(&mut self, name: &str) -> Result<(), ContextError> {
        let kind = name.parse::<RendererKind>()?;
        self.choose_renderer(kind)
    }

    pub fn choose_tone_mapper(&mut self, kind: ToneMapperKind) -> Result<(), ContextError> {
        if !self.surface.is_ready() {
            debug!("deferring tone mapper {kind} until the surface is back");
            self.lost_stages.1 = Some(kind);
            return Ok(());
        }

        self.graph.choose_tone_mapper(self.surface.device_mut(), kind)?;
        Ok(())
    }

    pub fn choose_tone_mapper_by_name(&mut self, name: &str) -> Result<(), ContextError> {
        let kind = name.parse::<ToneMapperKind>()?;
        self.choose_tone_mapper(kind)
    }

    pub fn renderer(&self) -> Option<&dyn Renderer> {
        self.graph.renderer()
    }

    pub fn renderer_kind(&self) -> Option<RendererKind> {
        self.graph.renderer_kind()
    }

    pub fn tone_mapper(&self) -> Option<&dyn ToneMapper> {
        self.graph.tone_mapper()
    }

    pub fn tone_mapper_kind(&self) -> Option<ToneMapperKind> {
        self.graph.tone_mapper_kind()
    }

    pub fn resolution(&self) -> u32 {
        self.graph.resolution()
    }

    pub fn set_resolution(&mut self, resolution: u32) -> Result<(), ContextError> {
        self.graph
            .set_resolution(self.surface.device_mut(), resolution.max(1))?;
        Ok(())
    }

    // ── transform ──

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn scale(&self) -> Vec3 {
        self.transform.scale()
    }

    pub fn set_scale(&mut self, x: f32, y: f32, z: f32) {
        self.transform.set_scale(Vec3::new(x, y, z));
    }

    pub fn translation(&self) -> Vec3 {
        self.transform.translation()
    }

    pub fn set_translation(&mut self, x: f32, y: f32, z: f32) {
        self.transform.set_translation(Vec3::new(x, y, z));
    }

    // ── rendering ──

    pub fn start_rendering(&mut self) {
        if !self.rendering {
            debug!("rendering started");
        }
        self.rendering = true;
    }

    pub fn stop_rendering(&mut self) {
        if self.rendering {
            debug!("rendering stopped");
        }
        self.rendering = false;
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    /// Renders one frame through both stages and composites it.
    pub fn render_frame(&mut self) {
        if !self.surface.is_ready() {
            return;
        }

        if self.temporal.is_none() {
            self.transform
                .update_inverse_mvp(&mut self.camera, self.graph.renderer_mut());
        }

        let texture = match self.graph.render(self.surface.device_mut()) {
            Ok(Some(texture)) => texture,
            Ok(None) => return,
            Err(err) => {
                self.report_stage_error(err);
                return;
            }
        };

        match self.surface.blit(texture) {
            Ok(()) => self.frame_rendered(),
            Err(err) => self.report_device_error(err),
        }
    }

    fn report_stage_error(&mut self, err: StageError) {
        match err {
            StageError::Device(err) => self.report_device_error(err),
            other => error!("render stage failed: {other}"),
        }
    }

    fn report_device_error(&mut self, err: DeviceError) {
        match err {
            DeviceError::Surface(SurfaceErrorAction::SkipFrame)
            | DeviceError::Surface(SurfaceErrorAction::Reconfigured) => {
                debug!("frame skipped: {err}");
            }
            DeviceError::Lost => {
                self.on_context_lost();
            }
            DeviceError::StaleHandle { .. } => warn!("draw with a stale handle: {err}"),
            other => error!("draw failed: {other}"),
        }
    }
}

#[cfg(test)]
mod tests;
