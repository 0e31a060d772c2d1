use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use glam::{Quat, Vec3};
use log::{debug, info, warn};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::Window;

use voxa_engine::context::{ContextConfig, RendererKind, RenderingContext, VolumeReader};
use voxa_engine::core::{App, AppControl, FrameCtx};
use voxa_engine::device::{DeviceInit, Filter, WgpuDevice};
use voxa_engine::temporal::{
    FramePlayer, FramePlayerModel, PlaybackMode, ProgressReporter, TemporalControl,
};

use crate::cli::Cli;
use crate::readers::{PhantomReader, TemporalRawReader};
use crate::stages;

const ORBIT_STEP: f32 = 0.1;
const PHANTOM_SIZE: u32 = 48;

/// Logs capture progress in quarter steps.
#[derive(Default)]
pub struct ProgressLog {
    percent: f32,
}

impl ProgressLog {
    pub fn percent(&self) -> f32 {
        self.percent
    }
}

impl ProgressReporter for ProgressLog {
    fn set_progress(&mut self, percent: f32) {
        let quarter = |p: f32| (p / 25.0).floor() as u32;
        if quarter(percent) != quarter(self.percent) {
            info!("capture {percent:.0}%");
        }
        self.percent = percent;
    }
}

pub struct StudioApp {
    cli: Cli,
    context: Option<RenderingContext>,
    player: Rc<RefCell<FramePlayerModel>>,
    progress: Rc<RefCell<ProgressLog>>,
    yaw: f32,
    capture_pending: bool,
    title: String,
}

impl StudioApp {
    pub fn new(cli: Cli) -> Self {
        Self {
            player: Rc::new(RefCell::new(FramePlayerModel::new(cli.fps))),
            progress: Rc::new(RefCell::new(ProgressLog::default())),
            capture_pending: cli.capture,
            cli,
            context: None,
            yaw: 0.0,
            title: String::new(),
        }
    }

    fn reader(&self) -> Result<Box<dyn VolumeReader>> {
        let cli = &self.cli;
        Ok(match &cli.raw {
            Some(path) => Box::new(
                TemporalRawReader::open(path, &cli.modality, cli.dims, cli.frames, cli.bits)
                    .with_context(|| format!("failed to open {}", path.display()))?,
            ),
            None => Box::new(PhantomReader::new(&cli.modality, PHANTOM_SIZE, cli.frames)),
        })
    }

    fn start_capture(&mut self) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        let control = TemporalControl::StartTemporalRenderingClick {
            config: self.cli.capture_config(),
            player: Box::new(self.player.clone()),
            progress: Box::new(self.progress.clone()),
        };
        if let Err(err) = ctx.handle_control(control) {
            warn!("capture not started: {err}");
        }
    }

    fn stop_capture(&mut self) {
        if let Some(ctx) = self.context.as_mut() {
            if let Err(err) = ctx.handle_control(TemporalControl::StopTemporalRenderingClick) {
                warn!("stop failed: {err}");
            }
        }
    }

    /// Player buttons only respond once the capture is complete.
    fn with_player(&self, f: impl FnOnce(&mut FramePlayerModel)) {
        let mut player = self.player.borrow_mut();
        if !player.is_enabled() {
            debug!("player disabled");
            return;
        }
        f(&mut player);
    }

    fn orbit(&mut self, delta: f32) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        self.yaw += delta;
        let rotation = Quat::from_rotation_y(self.yaw);
        let camera = ctx.camera_mut();
        let distance = camera.position().length();
        camera.set_position(rotation * Vec3::new(0.0, 0.0, distance));
        camera.set_rotation(rotation);
    }

    fn toggle_filter(&mut self) {
        if let Some(ctx) = self.context.as_mut() {
            let filter = match ctx.filter() {
                Filter::Linear => Filter::Nearest,
                Filter::Nearest => Filter::Linear,
            };
            info!("filter: {filter}");
            ctx.set_filter(filter);
        }
    }

    fn choose_renderer(&mut self, index: usize) {
        let (Some(ctx), Some(&kind)) = (self.context.as_mut(), RendererKind::ALL.get(index)) else {
            return;
        };
        match ctx.choose_renderer(kind) {
            Ok(()) => info!("renderer: {kind}"),
            Err(err) => warn!("renderer {kind} unavailable: {err}"),
        }
    }

    fn on_key(&mut self, code: KeyCode) -> AppControl {
        match code {
            KeyCode::KeyQ => return AppControl::Exit,
            KeyCode::KeyT => self.start_capture(),
            KeyCode::Escape => self.stop_capture(),
            KeyCode::Space => self.with_player(|p| {
                if p.mode() == PlaybackMode::Playing {
                    p.pause();
                } else {
                    p.play();
                }
            }),
            KeyCode::KeyS => self.with_player(|p| p.stop()),
            KeyCode::ArrowLeft => self.with_player(|p| p.prev_frame()),
            KeyCode::ArrowRight => self.with_player(|p| p.next_frame()),
            KeyCode::ArrowUp => self.with_player(|p| {
                let fps = p.fps() + 1;
                p.set_fps(fps);
            }),
            KeyCode::ArrowDown => self.with_player(|p| {
                let fps = p.fps().saturating_sub(1);
                p.set_fps(fps);
            }),
            KeyCode::KeyA => self.orbit(-ORBIT_STEP),
            KeyCode::KeyD => self.orbit(ORBIT_STEP),
            KeyCode::KeyF => self.toggle_filter(),
            KeyCode::Digit1 => self.choose_renderer(0),
            KeyCode::Digit2 => self.choose_renderer(1),
            KeyCode::Digit3 => self.choose_renderer(2),
            KeyCode::Digit4 => self.choose_renderer(3),
            KeyCode::Digit5 => self.choose_renderer(4),
            KeyCode::Digit6 => self.choose_renderer(5),
            _ => {}
        }
        AppControl::Continue
    }

    fn status(&self) -> String {
        let Some(ctx) = self.context.as_ref() else {
            return "voxa".to_string();
        };
        let renderer = ctx
            .renderer_kind()
            .map_or("none", |kind| kind.as_str());

        let state = if !ctx.is_temporal_rendering() {
            "live".to_string()
        } else if !ctx.is_capture_complete() {
            format!("capturing {:.0}%", self.progress.borrow().percent())
        } else {
            let player = self.player.borrow();
            format!(
                "frame {}/{} {:?} @ {} fps",
                player.frame(),
                player.max_value(),
                player.mode(),
                player.fps()
            )
        };
        format!("voxa - {renderer} - {state}")
    }
}

impl App for StudioApp {
    fn on_start(&mut self, window: Arc<Window>) -> Result<()> {
        let size = window.inner_size();
        let device = WgpuDevice::new(window, DeviceInit::default());

        let config = ContextConfig {
            resolution: self.cli.resolution,
            filter: self.cli.filter,
            modality: self.cli.modality.clone(),
            ..ContextConfig::default()
        };
        let mut ctx = RenderingContext::new(Box::new(device), stages::registry(), config)
            .context("failed to create rendering context")?;

        ctx.resize(size.width, size.height);
        ctx.choose_renderer(self.cli.renderer)
            .with_context(|| format!("renderer {}", self.cli.renderer))?;
        ctx.choose_tone_mapper(self.cli.tone_mapper)
            .with_context(|| format!("tone mapper {}", self.cli.tone_mapper))?;
        ctx.set_volume(self.reader()?);

        info!(
            "studio ready: {}x{} surface, compute={}",
            size.width,
            size.height,
            ctx.has_compute_capabilities()
        );
        self.context = Some(ctx);
        Ok(())
    }

    fn on_window_event(&mut self, event: &WindowEvent) -> AppControl {
        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.on_key(*code),
            _ => AppControl::Continue,
        }
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.resize(width, height);
        }
    }

    fn on_frame(&mut self, frame: &mut FrameCtx<'_>) -> AppControl {
        let Some(ctx) = self.context.as_mut() else {
            return AppControl::Continue;
        };
        ctx.on_refresh(frame.time.now);

        let title = self.status();
        if title != self.title {
            frame.runtime.set_title(title.clone());
            self.title = title;
        }
        AppControl::Continue
    }

    fn on_idle(&mut self, now: Instant) -> Option<Instant> {
        let ctx = self.context.as_mut()?;
        ctx.pump(now);

        if self.capture_pending && ctx.is_rendering() {
            self.capture_pending = false;
            self.start_capture();
        }
        self.context.as_ref()?.next_deadline()
    }

    fn wants_redraw(&self) -> bool {
        self.context.as_ref().is_some_and(|ctx| ctx.wants_refresh())
    }
}
