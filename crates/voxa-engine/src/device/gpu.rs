use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use super::surface;
use super::{
    BufferHandle, DeviceError, DeviceEvent, DeviceInit, Extension, Filter, GraphicsDevice, Image,
    ProgramHandle, SurfaceMode, TexelFormat, TextureDesc, TextureHandle,
};

/// Format of the off-screen drawing buffer that stands in for the default
/// framebuffer. Every frame is drawn here, then copied to the swapchain, so the
/// last frame stays readable after presentation.
const DRAWING_BUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct ClipVertex {
    pos: [f32; 2],
}

impl ClipVertex {
    const ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ClipVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

/// Clip-space quad as a triangle strip.
const CLIP_QUAD: [ClipVertex; 4] = [
    ClipVertex { pos: [-1.0, -1.0] },
    ClipVertex { pos: [1.0, -1.0] },
    ClipVertex { pos: [-1.0, 1.0] },
    ClipVertex { pos: [1.0, 1.0] },
];

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: TexelFormat,
    filter: Filter,
    width: u32,
    height: u32,
}

/// Everything that dies with the device.
struct GpuState {
    /// Kept alive for the surface.
    _instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,

    bind_group_layout: wgpu::BindGroupLayout,
    shader: wgpu::ShaderModule,
    present_pipeline: wgpu::RenderPipeline,
    present_quad: wgpu::Buffer,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    drawing_buffer: TextureEntry,

    textures: HashMap<u32, TextureEntry>,
    programs: HashMap<u32, wgpu::RenderPipeline>,
    buffers: HashMap<u32, wgpu::Buffer>,
    next_id: u32,
}

/// wgpu implementation of [`GraphicsDevice`] bound to one window.
pub struct WgpuDevice {
    window: Arc<Window>,
    init: DeviceInit,
    epoch: u32,
    state: Option<GpuState>,
    lost: Arc<AtomicBool>,
    lost_reported: bool,
}

impl WgpuDevice {
    /// Creates an unacquired device. Call [`GraphicsDevice::acquire`] before use.
    pub fn new(window: Arc<Window>, init: DeviceInit) -> Self {
        Self {
            window,
            init,
            epoch: 0,
            state: None,
            lost: Arc::new(AtomicBool::new(false)),
            lost_reported: false,
        }
    }

    /// Returns the window the surface presents to.
    pub fn window(&self) -> &Window {
        &self.window
    }

    fn state(&self) -> Result<&GpuState, DeviceError> {
        self.state.as_ref().ok_or(DeviceError::NotInitialized)
    }

    fn state_mut(&mut self) -> Result<&mut GpuState, DeviceError> {
        self.state.as_mut().ok_or(DeviceError::NotInitialized)
    }

    fn check_epoch(&self, id: u32, epoch: u32) -> Result<(), DeviceError> {
        if epoch != self.epoch {
            return Err(DeviceError::StaleHandle {
                id,
                epoch,
                current: self.epoch,
            });
        }
        Ok(())
    }

    fn build_state(&self, mode: SurfaceMode) -> Result<GpuState, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(self.window.clone())
            .map_err(|e| DeviceError::Acquire(format!("failed to create wgpu surface: {e}")))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| DeviceError::Acquire(format!("failed to find a suitable GPU adapter: {e}")))?;

        let compute = adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS);

        let required_limits = match mode {
            SurfaceMode::Compute if !compute => {
                return Err(DeviceError::ModeUnavailable(SurfaceMode::Compute));
            }
            SurfaceMode::Compute => wgpu::Limits::default().using_resolution(adapter.limits()),
            SurfaceMode::Baseline => {
                wgpu::Limits::downlevel_webgl2_defaults().using_resolution(adapter.limits())
            }
        };

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("voxa device"),
            required_features: self.init.required_features,
            required_limits,
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| DeviceError::Acquire(format!("failed to create wgpu device/queue: {e}")))?;

        let lost = self.lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            log::warn!("gpu device lost ({reason:?}): {message}");
            lost.store(true, Ordering::SeqCst);
        });

        let caps = surface.get_capabilities(&adapter);
        let format = surface::choose_surface_format(&caps, self.init.prefer_srgb)
            .ok_or_else(|| DeviceError::Acquire("no supported surface formats".to_string()))?;

        let size = self.window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: self.init.present_mode,
            alpha_mode: surface::choose_alpha_mode(&caps, self.init.alpha),
            view_formats: vec![],
            desired_maximum_frame_latency: self.init.desired_maximum_frame_latency,
        };
        surface.configure(&device, &config);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxa quad bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("voxa quad shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });

        let present_pipeline = quad_pipeline(&device, &bind_group_layout, &shader, format);
        let present_quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("voxa present quad"),
            contents: bytemuck::cast_slice(&CLIP_QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let linear_sampler = sampler(&device, wgpu::FilterMode::Linear);
        let nearest_sampler = sampler(&device, wgpu::FilterMode::Nearest);

        let drawing_buffer = texture_entry(
            &device,
            "voxa drawing buffer",
            config.width,
            config.height,
            TexelFormat::Rgba8,
            Filter::Linear,
        );

        let colour_float = adapter
            .get_texture_format_features(wgpu::TextureFormat::Rgba16Float)
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT);
        log::debug!(
            "acquired {mode:?} device on {:?} (float color buffer: {colour_float})",
            adapter.get_info().backend
        );

        Ok(GpuState {
            _instance: instance,
            surface,
            adapter,
            device,
            queue,
            config,
            size,
            bind_group_layout,
            shader,
            present_pipeline,
            present_quad,
            linear_sampler,
            nearest_sampler,
            drawing_buffer,
            textures: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            next_id: 1,
        })
    }
}

impl GraphicsDevice for WgpuDevice {
    fn acquire(&mut self, mode: SurfaceMode) -> Result<(), DeviceError> {
        // Old resources must be gone before the new epoch starts.
        self.state = None;
        let state = self.build_state(mode)?;
        self.state = Some(state);
        self.epoch = self.epoch.wrapping_add(1);
        self.lost.store(false, Ordering::SeqCst);
        self.lost_reported = false;
        Ok(())
    }

    fn epoch(&self) -> u32 {
        self.epoch
    }

    fn supports(&self, extension: Extension) -> bool {
        let Some(state) = self.state.as_ref() else {
            return false;
        };
        match extension {
            Extension::ColorBufferFloat => state
                .adapter
                .get_texture_format_features(wgpu::TextureFormat::Rgba16Float)
                .allowed_usages
                .contains(wgpu::TextureUsages::RENDER_ATTACHMENT),
        }
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        match self.state.as_ref() {
            Some(s) => (s.drawing_buffer.width, s.drawing_buffer.height),
            None => (0, 0),
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        surface::apply_resize(
            &state.surface,
            &state.device,
            &mut state.config,
            &mut state.size,
            PhysicalSize::new(width, height),
        );
        if width > 0 && height > 0 {
            state.drawing_buffer = texture_entry(
                &state.device,
                "voxa drawing buffer",
                width,
                height,
                TexelFormat::Rgba8,
                Filter::Linear,
            );
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureHandle, DeviceError> {
        let epoch = self.epoch;
        let state = self.state_mut()?;
        let entry = texture_entry(
            &state.device,
            desc.label,
            desc.width.max(1),
            desc.height.max(1),
            desc.format,
            desc.filter,
        );
        if let Some(data) = desc.data {
            upload(&state.queue, &entry, data)?;
        }

        let id = state.next_id;
        state.next_id += 1;
        state.textures.insert(id, entry);
        Ok(TextureHandle::new(id, epoch))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.check_epoch(texture.id(), texture.epoch())?;
        let state = self.state_mut()?;
        let GpuState {
            device,
            queue,
            textures,
            ..
        } = state;
        let entry = textures
            .get_mut(&texture.id())
            .ok_or(DeviceError::UnknownHandle(texture.id()))?;

        if entry.width != width || entry.height != height {
            *entry = texture_entry(
                device,
                "voxa texture",
                width.max(1),
                height.max(1),
                entry.format,
                entry.filter,
            );
        }
        upload(queue, entry, data)
    }

    fn read_texture(&mut self, texture: TextureHandle) -> Result<Image, DeviceError> {
        self.check_epoch(texture.id(), texture.epoch())?;
        let state = self.state()?;
        let entry = state
            .textures
            .get(&texture.id())
            .ok_or(DeviceError::UnknownHandle(texture.id()))?;
        read_back(&state.device, &state.queue, entry)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if texture.epoch() != self.epoch {
            return;
        }
        if let Some(state) = self.state.as_mut()
            && let Some(entry) = state.textures.remove(&texture.id())
        {
            entry.texture.destroy();
        }
    }

    fn create_quad_program(&mut self) -> Result<ProgramHandle, DeviceError> {
        let epoch = self.epoch;
        let state = self.state_mut()?;
        let pipeline = quad_pipeline(
            &state.device,
            &state.bind_group_layout,
            &state.shader,
            DRAWING_BUFFER_FORMAT,
        );
        let id = state.next_id;
        state.next_id += 1;
        state.programs.insert(id, pipeline);
        Ok(ProgramHandle::new(id, epoch))
    }

    fn create_clip_quad(&mut self) -> Result<BufferHandle, DeviceError> {
        let epoch = self.epoch;
        let state = self.state_mut()?;
        let buffer = state
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("voxa clip quad"),
                contents: bytemuck::cast_slice(&CLIP_QUAD),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let id = state.next_id;
        state.next_id += 1;
        state.buffers.insert(id, buffer);
        Ok(BufferHandle::new(id, epoch))
    }

    fn draw_quad(
        &mut self,
        program: ProgramHandle,
        quad: BufferHandle,
        texture: TextureHandle,
    ) -> Result<(), DeviceError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(DeviceError::Lost);
        }
        self.check_epoch(program.id(), program.epoch())?;
        self.check_epoch(quad.id(), quad.epoch())?;
        self.check_epoch(texture.id(), texture.epoch())?;

        let state = self.state()?;
        let pipeline = state
            .programs
            .get(&program.id())
            .ok_or(DeviceError::UnknownHandle(program.id()))?;
        let vbo = state
            .buffers
            .get(&quad.id())
            .ok_or(DeviceError::UnknownHandle(quad.id()))?;
        let source = state
            .textures
            .get(&texture.id())
            .ok_or(DeviceError::UnknownHandle(texture.id()))?;
        if source.format == TexelFormat::Rgba32Float {
            return Err(DeviceError::UnsupportedFormat(source.format));
        }

        let mut encoder = state
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("voxa frame encoder"),
            });

        let bind_group = quad_bind_group(state, source);
        quad_pass(
            &mut encoder,
            &state.drawing_buffer.view,
            pipeline,
            &bind_group,
            vbo,
            "voxa quad pass",
        );

        let surface_texture = match state.surface.get_current_texture() {
            Ok(t) => t,
            Err(err) => {
                // The drawing buffer is still updated; only presentation is skipped.
                state.queue.submit(std::iter::once(encoder.finish()));
                let action = surface::map_surface_error(
                    &state.surface,
                    &state.device,
                    &state.config,
                    state.size,
                    err,
                );
                return Err(DeviceError::Surface(action));
            }
        };
        let surface_view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let present_group = quad_bind_group(state, &state.drawing_buffer);
        quad_pass(
            &mut encoder,
            &surface_view,
            &state.present_pipeline,
            &present_group,
            &state.present_quad,
            "voxa present pass",
        );

        state.queue.submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        surface_texture.present();
        Ok(())
    }

    fn read_pixels(&mut self) -> Result<Image, DeviceError> {
        let state = self.state()?;
        read_back(&state.device, &state.queue, &state.drawing_buffer)
    }

    fn poll_events(&mut self) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        if self.lost.load(Ordering::SeqCst) && !self.lost_reported {
            self.lost_reported = true;
            self.state = None;
            events.push(DeviceEvent::Lost);
        } else if self.lost_reported && self.state.is_none() {
            // The window outlives the device, so a new one can be requested
            // right away.
            events.push(DeviceEvent::Restored);
        }
        events
    }
}

fn sampler(device: &wgpu::Device, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("voxa quad sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        ..Default::default()
    })
}

fn texture_entry(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    format: TexelFormat,
    filter: Filter,
) -> TextureEntry {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: surface::wgpu_format(format),
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    TextureEntry {
        texture,
        view,
        format,
        filter,
        width,
        height,
    }
}

fn upload(queue: &wgpu::Queue, entry: &TextureEntry, data: &[u8]) -> Result<(), DeviceError> {
    let bpp = entry.format.bytes_per_pixel();
    let expected = bpp * entry.width as usize * entry.height as usize;
    if data.len() != expected {
        return Err(DeviceError::SizeMismatch {
            expected,
            actual: data.len(),
        });
    }

    queue.write_texture(
        entry.texture.as_image_copy(),
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(bpp as u32 * entry.width),
            rows_per_image: Some(entry.height),
        },
        wgpu::Extent3d {
            width: entry.width,
            height: entry.height,
            depth_or_array_layers: 1,
        },
    );
    Ok(())
}

fn read_back(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    entry: &TextureEntry,
) -> Result<Image, DeviceError> {
    let tight = entry.format.bytes_per_pixel() * entry.width as usize;
    let padded = surface::padded_bytes_per_row(tight);
    let rows = entry.height as usize;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("voxa readback staging"),
        size: (padded * rows) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("voxa readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        entry.texture.as_image_copy(),
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded as u32),
                rows_per_image: Some(entry.height),
            },
        },
        wgpu::Extent3d {
            width: entry.width,
            height: entry.height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).ok();
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|e| DeviceError::Readback(format!("{e:?}")))?;

    match receiver.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(DeviceError::Readback(format!("buffer mapping failed: {e:?}"))),
        Err(_) => return Err(DeviceError::Readback("map callback dropped".to_string())),
    }

    let data = slice.get_mapped_range();
    let pixels = surface::depad_rows(&data, tight, padded, rows);
    drop(data);
    staging.unmap();

    Ok(Image::new(entry.width, entry.height, pixels))
}

fn quad_pipeline(
    device: &wgpu::Device,
    bind_group_layout: &wgpu::BindGroupLayout,
    shader: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("voxa quad pipeline layout"),
        bind_group_layouts: &[bind_group_layout],
        immediate_size: 0,
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("voxa quad pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[ClipVertex::layout()],
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

fn quad_bind_group(state: &GpuState, source: &TextureEntry) -> wgpu::BindGroup {
    let sampler = match source.filter {
        Filter::Linear => &state.linear_sampler,
        Filter::Nearest => &state.nearest_sampler,
    };
    state.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("voxa quad bind group"),
        layout: &state.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&source.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

fn quad_pass(
    encoder: &mut wgpu::CommandEncoder,
    target: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
    vbo: &wgpu::Buffer,
    label: &str,
) {
    let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    });

    rpass.set_pipeline(pipeline);
    rpass.set_bind_group(0, bind_group, &[]);
    rpass.set_vertex_buffer(0, vbo.slice(..));
    rpass.draw(0..4, 0..1);
}
