use glam::{Mat4, UVec3};
use log::debug;
use thiserror::Error;

use crate::device::Filter;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("volume i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("no reader attached to the volume")]
    NoReader,

    #[error("modality {0:?} not present in the metadata")]
    MissingModality(String),

    #[error("frame {frame} out of range, volume has {frames} frames")]
    FrameOutOfRange { frame: usize, frames: usize },

    #[error("malformed volume data: {0}")]
    Format(String),

    #[error("volume metadata not loaded")]
    NotLoaded,
}

/// Description of one modality of a volume.
#[derive(Debug, Clone, PartialEq)]
pub struct ModalityInfo {
    pub name: String,
    pub dimensions: UVec3,
    pub components: u32,
    pub bits_per_component: u32,
    /// Maps the unit cube onto the modality's physical extent.
    pub transform: Mat4,
}

impl ModalityInfo {
    pub fn voxel_count(&self) -> usize {
        self.dimensions.x as usize * self.dimensions.y as usize * self.dimensions.z as usize
    }

    pub fn byte_len(&self) -> usize {
        self.voxel_count() * self.components as usize * (self.bits_per_component as usize).div_ceil(8)
    }
}

/// Metadata of a volume, or of a single frame of a temporal volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMetadata {
    /// Frame the metadata describes; `None` for static volumes.
    pub frame: Option<usize>,
    pub modalities: Vec<ModalityInfo>,
}

impl VolumeMetadata {
    pub fn modality(&self, name: &str) -> Option<&ModalityInfo> {
        self.modalities.iter().find(|m| m.name == name)
    }
}

/// Voxel payload of one modality.
#[derive(Debug, Clone)]
pub struct ModalityData {
    pub info: ModalityInfo,
    pub frame: Option<usize>,
    pub data: Vec<u8>,
}

/// Source of volume data.
///
/// Temporal readers report a frame count and serve per-frame metadata;
/// static readers return `None` from [`frame_count`](VolumeReader::frame_count).
pub trait VolumeReader {
    fn frame_count(&self) -> Option<usize>;

    fn read_metadata(&mut self) -> Result<VolumeMetadata, VolumeError>;

    fn read_frame_metadata(&mut self, frame: usize) -> Result<VolumeMetadata, VolumeError>;

    fn read_modality(
        &mut self,
        metadata: &VolumeMetadata,
        name: &str,
    ) -> Result<ModalityData, VolumeError>;
}

/// The volume currently attached to a rendering context.
pub struct Volume {
    reader: Option<Box<dyn VolumeReader>>,
    metadata: Option<VolumeMetadata>,
    modality: Option<ModalityData>,
    filter: Filter,
}

impl Volume {
    pub fn empty() -> Self {
        Self {
            reader: None,
            metadata: None,
            modality: None,
            filter: Filter::default(),
        }
    }

    pub fn from_reader(reader: Box<dyn VolumeReader>) -> Self {
        Self {
            reader: Some(reader),
            ..Self::empty()
        }
    }

    pub fn has_reader(&self) -> bool {
        self.reader.is_some()
    }

    /// Number of frames, `0` for static or empty volumes.
    pub fn frame_count(&self) -> usize {
        self.reader
            .as_ref()
            .and_then(|r| r.frame_count())
            .unwrap_or(0)
    }

    pub fn is_temporal(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| r.frame_count().is_some())
    }

    pub fn metadata(&self) -> Option<&VolumeMetadata> {
        self.metadata.as_ref()
    }

    /// Loaded modality, if the load chain has completed.
    pub fn modality(&self) -> Option<&ModalityData> {
        self.modality.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.modality.is_some()
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
    }

    /// Reads whole-volume metadata, or one frame's metadata for temporal volumes.
    pub fn load_metadata(&mut self, frame: Option<usize>) -> Result<(), VolumeError> {
        let reader = self.reader.as_mut().ok_or(VolumeError::NoReader)?;

        let metadata = match frame {
            Some(frame) => {
                let frames = reader.frame_count().unwrap_or(0);
                if frame >= frames {
                    return Err(VolumeError::FrameOutOfRange { frame, frames });
                }
                reader.read_frame_metadata(frame)?
            }
            None => reader.read_metadata()?,
        };

        debug!(
            "volume metadata loaded: frame={:?} modalities={}",
            metadata.frame,
            metadata.modalities.len()
        );
        self.metadata = Some(metadata);
        Ok(())
    }

    pub fn load_modality(&mut self, name: &str) -> Result<(), VolumeError> {
        let reader = self.reader.as_mut().ok_or(VolumeError::NoReader)?;
        let metadata = self.metadata.as_ref().ok_or(VolumeError::NotLoaded)?;
        if metadata.modality(name).is_none() {
            return Err(VolumeError::MissingModality(name.to_string()));
        }

        let data = reader.read_modality(metadata, name)?;
        if data.data.len() != data.info.byte_len() {
            return Err(VolumeError::Format(format!(
                "modality {name:?} has {} bytes, expected {}",
                data.data.len(),
                data.info.byte_len()
            )));
        }

        self.modality = Some(data);
        Ok(())
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::empty()
    }
}
