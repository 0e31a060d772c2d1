use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use glam::Mat4;
use thiserror::Error;

use super::volume::{Volume, VolumeError};
use crate::device::{DeviceError, GraphicsDevice, TextureHandle};

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("unknown renderer {0:?}")]
    UnknownRenderer(String),

    #[error("unknown tone mapper {0:?}")]
    UnknownToneMapper(String),

    #[error("no factory registered for renderer {0}")]
    RendererNotRegistered(RendererKind),

    #[error("no factory registered for tone mapper {0}")]
    ToneMapperNotRegistered(ToneMapperKind),
}

macro_rules! stage_kind {
    (
        $(#[$meta:meta])*
        $name:ident, $err:ident { $($variant:ident => $key:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $key),+
                }
            }
        }

        impl FromStr for $name {
            type Err = StageError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($key => Ok($name::$variant),)+
                    other => Err(StageError::$err(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

stage_kind!(
    /// Volume rendering algorithms.
    RendererKind, UnknownRenderer {
        Mip => "mip",
        Iso => "iso",
        Eam => "eam",
        Mcs => "mcs",
        Mcm => "mcm",
        Mcc => "mcc",
    }
);

stage_kind!(
    /// Tone mapping operators.
    ToneMapperKind, UnknownToneMapper {
        Range => "range",
        Reinhard => "reinhard",
        Artistic => "artistic",
    }
);

/// First stage of the pipeline: turns the bound volume into an image.
pub trait Renderer {
    fn set_volume(&mut self, gpu: &mut dyn GraphicsDevice, volume: &Volume) -> Result<(), StageError>;

    /// Receives the transposed inverse model-view-projection matrix.
    fn set_mvp_inverse_matrix(&mut self, matrix: Mat4);

    fn render(&mut self, gpu: &mut dyn GraphicsDevice) -> Result<(), StageError>;

    /// Output texture; stable until the next `set_resolution` or `destroy`.
    fn texture(&self) -> TextureHandle;

    fn set_resolution(&mut self, gpu: &mut dyn GraphicsDevice, resolution: u32) -> Result<(), StageError>;

    /// Discards accumulated state so progressive algorithms restart.
    fn reset(&mut self);

    fn destroy(&mut self, gpu: &mut dyn GraphicsDevice);
}

/// Second stage: maps the renderer output into displayable range.
pub trait ToneMapper {
    fn set_texture(&mut self, texture: TextureHandle);

    fn render(&mut self, gpu: &mut dyn GraphicsDevice) -> Result<(), StageError>;

    fn texture(&self) -> TextureHandle;

    fn set_resolution(&mut self, gpu: &mut dyn GraphicsDevice, resolution: u32) -> Result<(), StageError>;

    fn destroy(&mut self, gpu: &mut dyn GraphicsDevice);
}

/// Everything a renderer is bound to at construction.
pub struct RendererInputs<'a> {
    pub volume: &'a Volume,
    pub environment: TextureHandle,
}

pub type RendererFactory = Box<
    dyn Fn(&mut dyn GraphicsDevice, &RendererInputs<'_>) -> Result<Box<dyn Renderer>, StageError>,
>;

pub type ToneMapperFactory =
    Box<dyn Fn(&mut dyn GraphicsDevice, TextureHandle) -> Result<Box<dyn ToneMapper>, StageError>>;

/// Table of stage constructors keyed by kind.
///
/// Algorithms are supplied by the embedding application; the context only
/// knows the kind names.
#[derive(Default)]
pub struct StageRegistry {
    renderers: HashMap<RendererKind, RendererFactory>,
    tone_mappers: HashMap<ToneMapperKind, ToneMapperFactory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_renderer<F>(&mut self, kind: RendererKind, factory: F) -> &mut Self
    where
        F: Fn(&mut dyn GraphicsDevice, &RendererInputs<'_>) -> Result<Box<dyn Renderer>, StageError>
            + 'static,
    {
        self.renderers.insert(kind, Box::new(factory));
        self
    }

    pub fn register_tone_mapper<F>(&mut self, kind: ToneMapperKind, factory: F) -> &mut Self
    where
        F: Fn(&mut dyn GraphicsDevice, TextureHandle) -> Result<Box<dyn ToneMapper>, StageError>
            + 'static,
    {
        self.tone_mappers.insert(kind, Box::new(factory));
        self
    }

    pub fn has_renderer(&self, kind: RendererKind) -> bool {
        self.renderers.contains_key(&kind)
    }

    pub fn has_tone_mapper(&self, kind: ToneMapperKind) -> bool {
        self.tone_mappers.contains_key(&kind)
    }

    pub fn build_renderer(
        &self,
        gpu: &mut dyn GraphicsDevice,
        kind: RendererKind,
        inputs: &RendererInputs<'_>,
    ) -> Result<Box<dyn Renderer>, StageError> {
        let factory = self
            .renderers
            .get(&kind)
            .ok_or(StageError::RendererNotRegistered(kind))?;
        factory(gpu, inputs)
    }

    pub fn build_tone_mapper(
        &self,
        gpu: &mut dyn GraphicsDevice,
        kind: ToneMapperKind,
        input: TextureHandle,
    ) -> Result<Box<dyn ToneMapper>, StageError> {
        let factory = self
            .tone_mappers
            .get(&kind)
            .ok_or(StageError::ToneMapperNotRegistered(kind))?;
        factory(gpu, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_by_name() {
        for kind in RendererKind::ALL {
            assert_eq!(kind.as_str().parse::<RendererKind>().unwrap(), *kind);
        }
        assert_eq!("reinhard".parse::<ToneMapperKind>().unwrap(), ToneMapperKind::Reinhard);
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!(matches!(
            "dvr".parse::<RendererKind>(),
            Err(StageError::UnknownRenderer(name)) if name == "dvr"
        ));
        assert!(matches!(
            "aces".parse::<ToneMapperKind>(),
            Err(StageError::UnknownToneMapper(_))
        ));
    }

    #[test]
    fn empty_registry_rejects_builds() {
        let registry = StageRegistry::new();
        assert!(!registry.has_renderer(RendererKind::Mip));
        assert!(!registry.has_tone_mapper(ToneMapperKind::Range));
    }
}
