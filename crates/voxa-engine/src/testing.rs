//! Test doubles: an in-memory graphics device, recording stages, an in-memory
//! volume reader and recording player controls.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use glam::{Mat4, UVec3};

use crate::context::{
    ModalityData, ModalityInfo, Renderer, RendererKind, StageError, StageRegistry, ToneMapper,
    ToneMapperKind, Volume, VolumeError, VolumeMetadata, VolumeReader,
};
use crate::device::{
    BufferHandle, DeviceError, DeviceEvent, Extension, Filter, GraphicsDevice, Image,
    ProgramHandle, SurfaceMode, TexelFormat, TextureDesc, TextureHandle,
};
use crate::temporal::{
    FramePlayer, FramePlayerModel, PlayerEventKind, PlayerEventSink, ProgressReporter,
    SubscriptionId,
};

// ── device ──

pub struct MockTexture {
    pub width: u32,
    pub height: u32,
    pub format: TexelFormat,
    pub data: Vec<u8>,
}

#[derive(Default)]
pub struct DeviceLog {
    pub acquired: Vec<SurfaceMode>,
    pub textures: HashMap<u32, MockTexture>,
    pub destroyed: Vec<TextureHandle>,
    pub draws: Vec<TextureHandle>,
    pub readbacks: usize,
    pub resizes: Vec<(u32, u32)>,
    /// Events handed out by the next `poll_events`.
    pub pending_events: Vec<DeviceEvent>,
}

pub type SharedDeviceLog = Rc<RefCell<DeviceLog>>;

/// Graphics device keeping textures in memory.
///
/// Drawing a texture copies its contents into the framebuffer, so
/// `read_pixels` returns whatever was drawn last.
pub struct MockDevice {
    log: SharedDeviceLog,
    compute: bool,
    float_color: bool,
    ready: bool,
    epoch: u32,
    next_id: u32,
    size: (u32, u32),
    framebuffer: Image,
}

impl MockDevice {
    pub fn new() -> (Self, SharedDeviceLog) {
        let log = SharedDeviceLog::default();
        let device = Self {
            log: log.clone(),
            compute: true,
            float_color: true,
            ready: false,
            epoch: 0,
            next_id: 1,
            size: (64, 64),
            framebuffer: Image::new(0, 0, Vec::new()),
        };
        (device, log)
    }

    pub fn without_compute() -> (Self, SharedDeviceLog) {
        let (mut device, log) = Self::new();
        device.compute = false;
        device.float_color = false;
        (device, log)
    }

    fn mint(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_epoch(&self, id: u32, epoch: u32) -> Result<(), DeviceError> {
        if !self.ready {
            return Err(DeviceError::Lost);
        }
        if epoch != self.epoch {
            return Err(DeviceError::StaleHandle {
                id,
                epoch,
                current: self.epoch,
            });
        }
        Ok(())
    }

    fn check_texture(&self, texture: TextureHandle) -> Result<(), DeviceError> {
        self.check_epoch(texture.id(), texture.epoch())?;
        if !self.log.borrow().textures.contains_key(&texture.id()) {
            return Err(DeviceError::UnknownHandle(texture.id()));
        }
        Ok(())
    }
}

impl GraphicsDevice for MockDevice {
    fn acquire(&mut self, mode: SurfaceMode) -> Result<(), DeviceError> {
        let mut log = self.log.borrow_mut();
        log.acquired.push(mode);
        if mode == SurfaceMode::Compute && !self.compute {
            return Err(DeviceError::ModeUnavailable(mode));
        }
        log.textures.clear();
        self.epoch += 1;
        self.ready = true;
        Ok(())
    }

    fn epoch(&self) -> u32 {
        self.epoch
    }

    fn supports(&self, extension: Extension) -> bool {
        match extension {
            Extension::ColorBufferFloat => self.float_color,
        }
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.log.borrow_mut().resizes.push((width, height));
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureHandle, DeviceError> {
        if !self.ready {
            return Err(DeviceError::Lost);
        }
        let len = desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel();
        let data = match desc.data {
            Some(data) if data.len() != len => {
                return Err(DeviceError::SizeMismatch {
                    expected: len,
                    actual: data.len(),
                });
            }
            Some(data) => data.to_vec(),
            None => vec![0; len],
        };

        let id = self.mint();
        self.log.borrow_mut().textures.insert(
            id,
            MockTexture {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                data,
            },
        );
        Ok(TextureHandle::new(id, self.epoch))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.check_texture(texture)?;
        let mut log = self.log.borrow_mut();
        let Some(entry) = log.textures.get_mut(&texture.id()) else {
            return Err(DeviceError::UnknownHandle(texture.id()));
        };
        let expected = width as usize * height as usize * entry.format.bytes_per_pixel();
        if data.len() != expected {
            return Err(DeviceError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        entry.width = width;
        entry.height = height;
        entry.data = data.to_vec();
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> Result<Image, DeviceError> {
        self.check_texture(texture)?;
        let log = self.log.borrow();
        let entry = log
            .textures
            .get(&texture.id())
            .ok_or(DeviceError::UnknownHandle(texture.id()))?;
        Ok(Image::new(entry.width, entry.height, entry.data.clone()))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.check_epoch(texture.id(), texture.epoch()).is_err() {
            return;
        }
        let mut log = self.log.borrow_mut();
        if log.textures.remove(&texture.id()).is_some() {
            log.destroyed.push(texture);
        }
    }

    fn create_quad_program(&mut self) -> Result<ProgramHandle, DeviceError> {
        if !self.ready {
            return Err(DeviceError::Lost);
        }
        let id = self.mint();
        Ok(ProgramHandle::new(id, self.epoch))
    }

    fn create_clip_quad(&mut self) -> Result<BufferHandle, DeviceError> {
        if !self.ready {
            return Err(DeviceError::Lost);
        }
        let id = self.mint();
        Ok(BufferHandle::new(id, self.epoch))
    }

    fn draw_quad(
        &mut self,
        program: ProgramHandle,
        quad: BufferHandle,
        texture: TextureHandle,
    ) -> Result<(), DeviceError> {
        self.check_epoch(program.id(), program.epoch())?;
        self.check_epoch(quad.id(), quad.epoch())?;
        let image = self.read_texture(texture)?;
        self.framebuffer = image;
        self.log.borrow_mut().draws.push(texture);
        Ok(())
    }

    fn read_pixels(&mut self) -> Result<Image, DeviceError> {
        if !self.ready {
            return Err(DeviceError::Lost);
        }
        self.log.borrow_mut().readbacks += 1;
        Ok(self.framebuffer.clone())
    }

    fn poll_events(&mut self) -> Vec<DeviceEvent> {
        let events = std::mem::take(&mut self.log.borrow_mut().pending_events);
        if events.contains(&DeviceEvent::Lost) {
            self.ready = false;
            self.log.borrow_mut().textures.clear();
        }
        events
    }
}

// ── stages ──

#[derive(Default)]
pub struct StageCalls {
    pub renderers_built: usize,
    pub renderers_destroyed: usize,
    pub tone_mappers_built: usize,
    pub tone_mappers_destroyed: usize,
    pub matrices: Vec<Mat4>,
    pub resets: usize,
    pub renders: usize,
    pub resolutions: Vec<u32>,
    pub tone_inputs: Vec<TextureHandle>,
    pub bound_frames: Vec<Option<usize>>,
}

pub type StageRecorder = Rc<RefCell<StageCalls>>;

/// Renderer filling its output with the first voxel of the bound frame.
pub struct RecordingRenderer {
    calls: StageRecorder,
    output: TextureHandle,
    resolution: u32,
    value: u8,
}

impl RecordingRenderer {
    pub fn new(gpu: &mut dyn GraphicsDevice, calls: StageRecorder) -> Result<Self, StageError> {
        let output = gpu.create_texture(&output_desc("recording renderer", 1))?;
        calls.borrow_mut().renderers_built += 1;
        Ok(Self {
            calls,
            output,
            resolution: 1,
            value: 0,
        })
    }

    /// Renderer not backed by any device, for matrix-only tests.
    pub fn detached(calls: StageRecorder) -> Self {
        Self {
            calls,
            output: TextureHandle::new(u32::MAX, 0),
            resolution: 1,
            value: 0,
        }
    }
}

fn output_desc(label: &str, resolution: u32) -> TextureDesc<'_> {
    TextureDesc {
        label,
        width: resolution,
        height: resolution,
        format: TexelFormat::Rgba8,
        filter: Filter::Linear,
        data: None,
    }
}

impl Renderer for RecordingRenderer {
    fn set_volume(&mut self, _gpu: &mut dyn GraphicsDevice, volume: &Volume) -> Result<(), StageError> {
        let modality = volume.modality().ok_or(VolumeError::NotLoaded)?;
        self.value = modality.data.first().copied().unwrap_or(0);
        self.calls.borrow_mut().bound_frames.push(modality.frame);
        Ok(())
    }

    fn set_mvp_inverse_matrix(&mut self, matrix: Mat4) {
        self.calls.borrow_mut().matrices.push(matrix);
    }

    fn render(&mut self, gpu: &mut dyn GraphicsDevice) -> Result<(), StageError> {
        self.calls.borrow_mut().renders += 1;
        let len = (self.resolution * self.resolution * 4) as usize;
        gpu.write_texture(self.output, self.resolution, self.resolution, &vec![self.value; len])?;
        Ok(())
    }

    fn texture(&self) -> TextureHandle {
        self.output
    }

    fn set_resolution(&mut self, gpu: &mut dyn GraphicsDevice, resolution: u32) -> Result<(), StageError> {
        self.calls.borrow_mut().resolutions.push(resolution);
        gpu.destroy_texture(self.output);
        self.output = gpu.create_texture(&output_desc("recording renderer", resolution))?;
        self.resolution = resolution;
        Ok(())
    }

    fn reset(&mut self) {
        self.calls.borrow_mut().resets += 1;
    }

    fn destroy(&mut self, gpu: &mut dyn GraphicsDevice) {
        self.calls.borrow_mut().renderers_destroyed += 1;
        gpu.destroy_texture(self.output);
    }
}

/// Tone mapper copying its input verbatim.
pub struct RecordingToneMapper {
    calls: StageRecorder,
    input: TextureHandle,
    output: TextureHandle,
}

impl RecordingToneMapper {
    pub fn new(
        gpu: &mut dyn GraphicsDevice,
        input: TextureHandle,
        calls: StageRecorder,
    ) -> Result<Self, StageError> {
        let output = gpu.create_texture(&output_desc("recording tone mapper", 1))?;
        {
            let mut log = calls.borrow_mut();
            log.tone_mappers_built += 1;
            log.tone_inputs.push(input);
        }
        Ok(Self {
            calls,
            input,
            output,
        })
    }
}

impl ToneMapper for RecordingToneMapper {
    fn set_texture(&mut self, texture: TextureHandle) {
        self.input = texture;
        self.calls.borrow_mut().tone_inputs.push(texture);
    }

    fn render(&mut self, gpu: &mut dyn GraphicsDevice) -> Result<(), StageError> {
        let image = gpu.read_texture(self.input)?;
        gpu.write_texture(self.output, image.width, image.height, &image.pixels)?;
        Ok(())
    }

    fn texture(&self) -> TextureHandle {
        self.output
    }

    fn set_resolution(&mut self, _gpu: &mut dyn GraphicsDevice, _resolution: u32) -> Result<(), StageError> {
        Ok(())
    }

    fn destroy(&mut self, gpu: &mut dyn GraphicsDevice) {
        self.calls.borrow_mut().tone_mappers_destroyed += 1;
        gpu.destroy_texture(self.output);
    }
}

/// Registry with recording renderers for Mip/Iso/Eam and recording tone mappers
/// for Range/Reinhard.
pub fn recording_registry(calls: &StageRecorder) -> StageRegistry {
    let mut registry = StageRegistry::new();
    for kind in [RendererKind::Mip, RendererKind::Iso, RendererKind::Eam] {
        let calls = calls.clone();
        registry.register_renderer(kind, move |gpu, _inputs| {
            Ok(Box::new(RecordingRenderer::new(gpu, calls.clone())?) as Box<dyn Renderer>)
        });
    }
    for kind in [ToneMapperKind::Range, ToneMapperKind::Reinhard] {
        let calls = calls.clone();
        registry.register_tone_mapper(kind, move |gpu, input| {
            Ok(Box::new(RecordingToneMapper::new(gpu, input, calls.clone())?) as Box<dyn ToneMapper>)
        });
    }
    registry
}

// ── volume ──

/// 2x2x1 single-byte volume whose voxels hold the frame index.
pub struct MemoryReader {
    frames: Option<usize>,
}

impl MemoryReader {
    pub fn temporal(frames: usize) -> Self {
        Self {
            frames: Some(frames),
        }
    }

    pub fn static_volume() -> Self {
        Self { frames: None }
    }

    fn info() -> ModalityInfo {
        ModalityInfo {
            name: "default".to_string(),
            dimensions: UVec3::new(2, 2, 1),
            components: 1,
            bits_per_component: 8,
            transform: Mat4::IDENTITY,
        }
    }
}

impl VolumeReader for MemoryReader {
    fn frame_count(&self) -> Option<usize> {
        self.frames
    }

    fn read_metadata(&mut self) -> Result<VolumeMetadata, VolumeError> {
        Ok(VolumeMetadata {
            frame: None,
            modalities: vec![Self::info()],
        })
    }

    fn read_frame_metadata(&mut self, frame: usize) -> Result<VolumeMetadata, VolumeError> {
        Ok(VolumeMetadata {
            frame: Some(frame),
            modalities: vec![Self::info()],
        })
    }

    fn read_modality(
        &mut self,
        metadata: &VolumeMetadata,
        name: &str,
    ) -> Result<ModalityData, VolumeError> {
        let info = metadata
            .modality(name)
            .cloned()
            .ok_or_else(|| VolumeError::MissingModality(name.to_string()))?;
        let value = metadata.frame.unwrap_or(0) as u8;
        Ok(ModalityData {
            data: vec![value; info.byte_len()],
            frame: metadata.frame,
            info,
        })
    }
}

// ── player ──

/// Frame player recording every call the context makes.
pub struct RecordingPlayer {
    pub model: FramePlayerModel,
    pub frames_set: Vec<usize>,
    pub enabled: Vec<bool>,
    pub max_values: Vec<usize>,
    pub plays: usize,
}

pub type SharedPlayer = Rc<RefCell<RecordingPlayer>>;

pub fn recording_player(fps: u32) -> SharedPlayer {
    Rc::new(RefCell::new(RecordingPlayer {
        model: FramePlayerModel::new(fps),
        frames_set: Vec::new(),
        enabled: Vec::new(),
        max_values: Vec::new(),
        plays: 0,
    }))
}

impl FramePlayer for RecordingPlayer {
    fn set_max_value(&mut self, max: usize) {
        self.max_values.push(max);
        self.model.set_max_value(max);
    }

    fn set_frame(&mut self, frame: usize) {
        self.frames_set.push(frame);
        self.model.set_frame(frame);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled.push(enabled);
        self.model.set_enabled(enabled);
    }

    fn fps(&self) -> u32 {
        self.model.fps()
    }

    fn play(&mut self) {
        self.plays += 1;
        self.model.play();
    }

    fn subscribe(&mut self, kind: PlayerEventKind, sink: PlayerEventSink) -> SubscriptionId {
        self.model.subscribe(kind, sink)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.model.unsubscribe(id);
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    pub reports: Vec<f32>,
}

impl ProgressReporter for RecordingProgress {
    fn set_progress(&mut self, percent: f32) {
        self.reports.push(percent);
    }
}

pub type SharedProgress = Rc<RefCell<RecordingProgress>>;
