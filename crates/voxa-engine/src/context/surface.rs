use log::{debug, info, warn};

use crate::device::{
    BufferHandle, DeviceError, Extension, GraphicsDevice, Image, ProgramHandle, SurfaceMode,
    TextureDesc, TextureHandle,
};

/// Resources every surface epoch starts with.
#[derive(Debug, Copy, Clone)]
pub struct BaselineResources {
    /// Environment map sampled by renderers; a 1x1 placeholder until set.
    pub environment: TextureHandle,
    pub program: ProgramHandle,
    pub clip_quad: BufferHandle,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceState {
    Uninitialized,
    Ready,
    Lost,
}

/// What the platform should do after a loss notification.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LossResponse {
    /// Suppress the default handling and wait for a restore.
    AwaitRestore,
    /// Let the loss stand; no restore will follow.
    Default,
}

/// Owns the graphics device and the per-epoch baseline resources.
pub struct GraphicsSurfaceManager {
    device: Box<dyn GraphicsDevice>,
    restorable: bool,
    has_compute: bool,
    float_color_buffer: bool,
    baseline: Option<BaselineResources>,
    state: SurfaceState,
}

impl GraphicsSurfaceManager {
    pub fn new(device: Box<dyn GraphicsDevice>, restorable: bool) -> Self {
        Self {
            device,
            restorable,
            has_compute: false,
            float_color_buffer: false,
            baseline: None,
            state: SurfaceState::Uninitialized,
        }
    }

    /// Acquires the device, preferring compute, and creates baseline resources.
    pub fn initialize(&mut self) -> Result<(), DeviceError> {
        self.baseline = None;

        match self.device.acquire(SurfaceMode::Compute) {
            Ok(()) => self.has_compute = true,
            Err(err) => {
                debug!("compute surface unavailable ({err}), falling back to baseline");
                self.device.acquire(SurfaceMode::Baseline)?;
                self.has_compute = false;
            }
        }

        self.float_color_buffer = self.device.supports(Extension::ColorBufferFloat);
        if !self.float_color_buffer {
            warn!("float color attachments unsupported; float render targets will fail");
        }

        let environment = self
            .device
            .create_texture(&TextureDesc::placeholder("environment"))?;
        let program = self.device.create_quad_program()?;
        let clip_quad = self.device.create_clip_quad()?;

        self.baseline = Some(BaselineResources {
            environment,
            program,
            clip_quad,
        });
        self.state = SurfaceState::Ready;

        info!(
            "graphics surface ready: epoch={} compute={} float_color={}",
            self.device.epoch(),
            self.has_compute,
            self.float_color_buffer
        );
        Ok(())
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SurfaceState::Ready
    }

    pub fn is_restorable(&self) -> bool {
        self.restorable
    }

    pub fn has_compute_capabilities(&self) -> bool {
        self.has_compute
    }

    pub fn supports_float_color_buffer(&self) -> bool {
        self.float_color_buffer
    }

    pub fn baseline(&self) -> Option<&BaselineResources> {
        self.baseline.as_ref()
    }

    pub fn device(&self) -> &dyn GraphicsDevice {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn GraphicsDevice {
        self.device.as_mut()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.device.resize(width, height);
    }

    /// Drops every handle of the lost epoch.
    pub fn handle_lost(&mut self) -> LossResponse {
        warn!("graphics surface lost (restorable={})", self.restorable);
        self.baseline = None;
        self.state = SurfaceState::Lost;

        if self.restorable {
            LossResponse::AwaitRestore
        } else {
            LossResponse::Default
        }
    }

    /// Re-runs initialization after a restore signal.
    ///
    /// Returns `Ok(false)` when the signal is ignored because the surface was
    /// not waiting for one.
    pub fn handle_restored(&mut self) -> Result<bool, DeviceError> {
        if self.state != SurfaceState::Lost || !self.restorable {
            debug!("ignoring restore signal in state {:?}", self.state);
            return Ok(false);
        }
        self.initialize()?;
        Ok(true)
    }

    /// Uploads a new environment map into the baseline texture.
    pub fn set_environment_map(&mut self, image: &Image) -> Result<(), DeviceError> {
        let baseline = self.baseline.ok_or(DeviceError::NotInitialized)?;
        self.device
            .write_texture(baseline.environment, image.width, image.height, &image.pixels)
    }

    /// Draws a texture over the whole surface with the baseline quad program.
    pub fn blit(&mut self, texture: TextureHandle) -> Result<(), DeviceError> {
        let baseline = self.baseline.ok_or(DeviceError::NotInitialized)?;
        self.device
            .draw_quad(baseline.program, baseline.clip_quad, texture)
    }
}
