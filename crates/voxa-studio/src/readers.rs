//! Volume readers for the studio: raw files on disk and a generated phantom.

use std::f32::consts::TAU;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use glam::{Mat4, UVec3, Vec3};
use log::{debug, info};

use voxa_engine::context::{ModalityData, ModalityInfo, VolumeError, VolumeMetadata, VolumeReader};

fn single_modality(name: &str, dims: UVec3, bits: u32, frame: usize) -> VolumeMetadata {
    VolumeMetadata {
        frame: Some(frame),
        modalities: vec![ModalityInfo {
            name: name.to_string(),
            dimensions: dims,
            components: 1,
            bits_per_component: bits,
            transform: Mat4::IDENTITY,
        }],
    }
}

fn requested<'m>(metadata: &'m VolumeMetadata, name: &str) -> Result<&'m ModalityInfo, VolumeError> {
    metadata
        .modality(name)
        .ok_or_else(|| VolumeError::MissingModality(name.to_string()))
}

// ── raw ──

/// Frames stored back to back in one headerless file.
///
/// Frame `i` occupies slices `depth * i .. depth * (i + 1)` of the stacked
/// volume, x fastest, little-endian for 16-bit data.
pub struct TemporalRawReader {
    path: PathBuf,
    file: File,
    modality: String,
    dims: UVec3,
    frames: usize,
    bits: u32,
}

impl TemporalRawReader {
    pub fn open(
        path: &Path,
        modality: &str,
        dims: UVec3,
        frames: usize,
        bits: u32,
    ) -> Result<Self, VolumeError> {
        if bits != 8 && bits != 16 {
            return Err(VolumeError::Format(format!("{bits}-bit voxels not supported")));
        }
        if frames == 0 || dims.cmpeq(UVec3::ZERO).any() {
            return Err(VolumeError::Format(format!("empty layout {dims} x {frames} frames")));
        }

        let file = File::open(path)?;
        let reader = Self {
            path: path.to_path_buf(),
            file,
            modality: modality.to_string(),
            dims,
            frames,
            bits,
        };

        let len = reader.file.metadata()?.len();
        let expected = reader.frame_bytes() * frames as u64;
        if len < expected {
            return Err(VolumeError::Format(format!(
                "{} holds {len} bytes, {expected} expected",
                path.display()
            )));
        }

        info!("opened {} ({dims} x {frames} frames, {bits} bit)", path.display());
        Ok(reader)
    }

    fn frame_bytes(&self) -> u64 {
        self.dims.x as u64 * self.dims.y as u64 * self.dims.z as u64 * (self.bits as u64 / 8)
    }
}

impl VolumeReader for TemporalRawReader {
    fn frame_count(&self) -> Option<usize> {
        Some(self.frames)
    }

    fn read_metadata(&mut self) -> Result<VolumeMetadata, VolumeError> {
        self.read_frame_metadata(0)
    }

    fn read_frame_metadata(&mut self, frame: usize) -> Result<VolumeMetadata, VolumeError> {
        if frame >= self.frames {
            return Err(VolumeError::FrameOutOfRange {
                frame,
                frames: self.frames,
            });
        }
        Ok(single_modality(&self.modality, self.dims, self.bits, frame))
    }

    fn read_modality(
        &mut self,
        metadata: &VolumeMetadata,
        name: &str,
    ) -> Result<ModalityData, VolumeError> {
        let info = requested(metadata, name)?.clone();
        let frame = metadata.frame.unwrap_or(0);

        self.file.seek(SeekFrom::Start(frame as u64 * self.frame_bytes()))?;
        let mut data = vec![0; info.byte_len()];
        self.file.read_exact(&mut data)?;

        debug!("read frame {frame} from {}", self.path.display());
        Ok(ModalityData {
            info,
            frame: metadata.frame,
            data,
        })
    }
}

// ── synthetic ──

/// Pulsing, orbiting sphere. One full cycle over all frames.
pub struct PhantomReader {
    modality: String,
    size: u32,
    frames: usize,
}

impl PhantomReader {
    pub fn new(modality: &str, size: u32, frames: usize) -> Self {
        Self {
            modality: modality.to_string(),
            size: size.max(1),
            frames: frames.max(1),
        }
    }

    fn voxels(&self, frame: usize) -> Vec<u8> {
        let phase = frame as f32 / self.frames as f32 * TAU;
        let radius = 0.25 + 0.1 * phase.sin();
        let center = Vec3::new(0.5 + 0.15 * phase.cos(), 0.5, 0.5);
        let n = self.size;

        let mut data = Vec::with_capacity((n * n * n) as usize);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let p = (UVec3::new(x, y, z).as_vec3() + 0.5) / n as f32;
                    let v = 1.0 - p.distance(center) / radius;
                    data.push((v.clamp(0.0, 1.0) * 255.0).round() as u8);
                }
            }
        }
        data
    }
}

impl VolumeReader for PhantomReader {
    fn frame_count(&self) -> Option<usize> {
        Some(self.frames)
    }

    fn read_metadata(&mut self) -> Result<VolumeMetadata, VolumeError> {
        self.read_frame_metadata(0)
    }

    fn read_frame_metadata(&mut self, frame: usize) -> Result<VolumeMetadata, VolumeError> {
        Ok(single_modality(&self.modality, UVec3::splat(self.size), 8, frame))
    }

    fn read_modality(
        &mut self,
        metadata: &VolumeMetadata,
        name: &str,
    ) -> Result<ModalityData, VolumeError> {
        let info = requested(metadata, name)?.clone();
        let frame = metadata.frame.unwrap_or(0);
        Ok(ModalityData {
            info,
            frame: metadata.frame,
            data: self.voxels(frame),
        })
    }
}
