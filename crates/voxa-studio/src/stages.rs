//! CPU preview stages.
//!
//! A maximum-intensity-projection renderer and two tone curves, enough to
//! look at a volume without the GPU ray marchers.

use glam::{Mat4, UVec3, Vec2, Vec3};
use log::debug;

use voxa_engine::context::{
    Renderer, RendererKind, StageError, StageRegistry, ToneMapper, ToneMapperKind, Volume,
    VolumeError,
};
use voxa_engine::device::{Filter, GraphicsDevice, TexelFormat, TextureDesc, TextureHandle};

/// Registry with the stages this binary ships.
pub fn registry() -> StageRegistry {
    let mut registry = StageRegistry::new();
    registry
        .register_renderer(RendererKind::Mip, |gpu, _inputs| {
            Ok(Box::new(CpuMipRenderer::new(gpu)?) as Box<dyn Renderer>)
        })
        .register_tone_mapper(ToneMapperKind::Range, |gpu, input| {
            let curve = ToneCurve::Range { low: 0.0, high: 1.0 };
            Ok(Box::new(CpuToneMapper::new(gpu, input, curve)?) as Box<dyn ToneMapper>)
        })
        .register_tone_mapper(ToneMapperKind::Reinhard, |gpu, input| {
            let curve = ToneCurve::Reinhard { exposure: 2.0 };
            Ok(Box::new(CpuToneMapper::new(gpu, input, curve)?) as Box<dyn ToneMapper>)
        });
    registry
}

fn rgba8_desc(label: &str, resolution: u32) -> TextureDesc<'_> {
    TextureDesc {
        label,
        width: resolution,
        height: resolution,
        format: TexelFormat::Rgba8,
        filter: Filter::Linear,
        data: None,
    }
}

// ── voxel grid ──

/// First component of a modality, normalized to `[0, 1]`.
pub struct VoxelGrid {
    dims: UVec3,
    values: Vec<f32>,
    filter: Filter,
}

impl VoxelGrid {
    pub fn from_volume(volume: &Volume) -> Result<Self, StageError> {
        let modality = volume.modality().ok_or(VolumeError::NotLoaded)?;
        let info = &modality.info;
        let stride = info.components as usize * (info.bits_per_component as usize / 8);
        if stride == 0 {
            return Err(VolumeError::Format(format!("modality {:?} has no components", info.name)).into());
        }

        let values = match info.bits_per_component {
            8 => modality
                .data
                .chunks_exact(stride)
                .map(|v| f32::from(v[0]) / 255.0)
                .collect(),
            16 => modality
                .data
                .chunks_exact(stride)
                .map(|v| f32::from(u16::from_le_bytes([v[0], v[1]])) / 65535.0)
                .collect(),
            bits => {
                return Err(VolumeError::Format(format!("{bits}-bit voxels not supported")).into());
            }
        };

        Ok(Self {
            dims: info.dimensions,
            values,
            filter: volume.filter(),
        })
    }

    fn at(&self, x: u32, y: u32, z: u32) -> f32 {
        let d = self.dims;
        let i = (z as usize * d.y as usize + y as usize) * d.x as usize + x as usize;
        self.values.get(i).copied().unwrap_or(0.0)
    }

    /// Samples at `p` in unit-cube coordinates.
    pub fn sample(&self, p: Vec3) -> f32 {
        let max = self.dims.saturating_sub(UVec3::ONE);
        match self.filter {
            Filter::Nearest => {
                let c = (p * self.dims.as_vec3()).floor().as_uvec3().min(max);
                self.at(c.x, c.y, c.z)
            }
            Filter::Linear => {
                let q = (p * self.dims.as_vec3() - 0.5).max(Vec3::ZERO);
                let f = q.fract();
                let a = q.floor().as_uvec3().min(max);
                let b = (a + UVec3::ONE).min(max);

                let lerp = |u: f32, v: f32, t: f32| u + (v - u) * t;
                let x00 = lerp(self.at(a.x, a.y, a.z), self.at(b.x, a.y, a.z), f.x);
                let x10 = lerp(self.at(a.x, b.y, a.z), self.at(b.x, b.y, a.z), f.x);
                let x01 = lerp(self.at(a.x, a.y, b.z), self.at(b.x, a.y, b.z), f.x);
                let x11 = lerp(self.at(a.x, b.y, b.z), self.at(b.x, b.y, b.z), f.x);
                lerp(lerp(x00, x10, f.y), lerp(x01, x11, f.y), f.z)
            }
        }
    }
}

/// Segment parameters `[t0, t1] ⊂ [0, 1]` where `origin + t * dir` is inside the unit cube.
pub fn intersect_unit_cube(origin: Vec3, dir: Vec3) -> Option<(f32, f32)> {
    let inv = dir.recip();
    let a = -origin * inv;
    let b = (Vec3::ONE - origin) * inv;
    let t0 = a.min(b).max_element().max(0.0);
    let t1 = a.max(b).min_element().min(1.0);
    (t1 > t0).then_some((t0, t1))
}

/// Maximum intensity projection as RGBA8, rows top to bottom.
///
/// `mvp_inverse` maps clip space back to unit-cube coordinates.
pub fn project_mip(grid: &VoxelGrid, mvp_inverse: Mat4, resolution: u32, steps: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((resolution * resolution * 4) as usize);
    let size = resolution as f32;

    for y in 0..resolution {
        for x in 0..resolution {
            let ndc = Vec2::new(
                (x as f32 + 0.5) / size * 2.0 - 1.0,
                1.0 - (y as f32 + 0.5) / size * 2.0,
            );
            let near = mvp_inverse.project_point3(ndc.extend(-1.0));
            let far = mvp_inverse.project_point3(ndc.extend(1.0));
            let dir = far - near;

            let mut value: f32 = 0.0;
            if let Some((t0, t1)) = intersect_unit_cube(near, dir) {
                for k in 0..steps {
                    let t = t0 + (k as f32 + 0.5) / steps as f32 * (t1 - t0);
                    value = value.max(grid.sample(near + dir * t));
                }
            }

            let g = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            pixels.extend_from_slice(&[g, g, g, 255]);
        }
    }
    pixels
}

// ── renderer ──

/// Recomputes the projection only when something it depends on changed.
pub struct CpuMipRenderer {
    output: TextureHandle,
    resolution: u32,
    mvp_inverse: Mat4,
    grid: Option<VoxelGrid>,
    dirty: bool,
}

impl CpuMipRenderer {
    pub fn new(gpu: &mut dyn GraphicsDevice) -> Result<Self, StageError> {
        let output = gpu.create_texture(&rgba8_desc("mip output", 1))?;
        Ok(Self {
            output,
            resolution: 1,
            mvp_inverse: Mat4::IDENTITY,
            grid: None,
            dirty: true,
        })
    }
}

impl Renderer for CpuMipRenderer {
    fn set_volume(&mut self, _gpu: &mut dyn GraphicsDevice, volume: &Volume) -> Result<(), StageError> {
        self.grid = Some(VoxelGrid::from_volume(volume)?);
        self.dirty = true;
        Ok(())
    }

    fn set_mvp_inverse_matrix(&mut self, matrix: Mat4) {
        // Stored transposed, column-major shader convention.
        self.mvp_inverse = matrix.transpose();
        self.dirty = true;
    }

    fn render(&mut self, gpu: &mut dyn GraphicsDevice) -> Result<(), StageError> {
        if !self.dirty {
            return Ok(());
        }
        let Some(grid) = self.grid.as_ref() else {
            return Ok(());
        };

        let steps = grid.dims.max_element().max(1) * 2;
        let pixels = project_mip(grid, self.mvp_inverse, self.resolution, steps);
        gpu.write_texture(self.output, self.resolution, self.resolution, &pixels)?;
        self.dirty = false;
        debug!("mip pass at {}px, {steps} steps", self.resolution);
        Ok(())
    }

    fn texture(&self) -> TextureHandle {
        self.output
    }

    fn set_resolution(&mut self, gpu: &mut dyn GraphicsDevice, resolution: u32) -> Result<(), StageError> {
        gpu.destroy_texture(self.output);
        self.output = gpu.create_texture(&rgba8_desc("mip output", resolution))?;
        self.resolution = resolution;
        self.dirty = true;
        Ok(())
    }

    fn reset(&mut self) {
        self.dirty = true;
    }

    fn destroy(&mut self, gpu: &mut dyn GraphicsDevice) {
        gpu.destroy_texture(self.output);
        self.grid = None;
    }
}

// ── tone mapping ──

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ToneCurve {
    /// Linear remap of `[low, high]` onto `[0, 1]`.
    Range { low: f32, high: f32 },
    /// Reinhard curve, normalized so 1 stays 1.
    Reinhard { exposure: f32 },
}

impl ToneCurve {
    pub fn apply(self, v: f32) -> f32 {
        let out = match self {
            ToneCurve::Range { low, high } => (v - low) / (high - low).max(f32::EPSILON),
            ToneCurve::Reinhard { exposure } => {
                let e = exposure.max(f32::EPSILON);
                let curve = |x: f32| x * e / (1.0 + x * e);
                curve(v) / curve(1.0)
            }
        };
        out.clamp(0.0, 1.0)
    }
}

pub struct CpuToneMapper {
    curve: ToneCurve,
    input: TextureHandle,
    output: TextureHandle,
}

impl CpuToneMapper {
    pub fn new(
        gpu: &mut dyn GraphicsDevice,
        input: TextureHandle,
        curve: ToneCurve,
    ) -> Result<Self, StageError> {
        let output = gpu.create_texture(&rgba8_desc("tone mapper output", 1))?;
        Ok(Self {
            curve,
            input,
            output,
        })
    }
}

impl ToneMapper for CpuToneMapper {
    fn set_texture(&mut self, texture: TextureHandle) {
        self.input = texture;
    }

    fn render(&mut self, gpu: &mut dyn GraphicsDevice) -> Result<(), StageError> {
        let mut image = gpu.read_texture(self.input)?;
        for px in image.pixels.chunks_exact_mut(4) {
            for c in &mut px[..3] {
                *c = (self.curve.apply(f32::from(*c) / 255.0) * 255.0).round() as u8;
            }
        }
        gpu.write_texture(self.output, image.width, image.height, &image.pixels)?;
        Ok(())
    }

    fn texture(&self) -> TextureHandle {
        self.output
    }

    fn set_resolution(&mut self, _gpu: &mut dyn GraphicsDevice, _resolution: u32) -> Result<(), StageError> {
        // Output size follows the input on every pass.
        Ok(())
    }

    fn destroy(&mut self, gpu: &mut dyn GraphicsDevice) {
        gpu.destroy_texture(self.output);
    }
}
