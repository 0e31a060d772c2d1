use log::{debug, warn};

use super::stage::{
    Renderer, RendererInputs, RendererKind, StageError, StageRegistry, ToneMapper, ToneMapperKind,
};
use super::volume::Volume;
use crate::device::{GraphicsDevice, TextureDesc, TextureHandle};

struct ActiveRenderer {
    kind: RendererKind,
    stage: Box<dyn Renderer>,
}

struct ActiveToneMapper {
    kind: ToneMapperKind,
    stage: Box<dyn ToneMapper>,
}

/// Renderer followed by tone mapper.
///
/// At most one instance of each stage is alive. Replacing a stage destroys
/// the old one first, and the tone mapper is always fed the current
/// renderer's output texture.
pub struct RenderGraph {
    registry: StageRegistry,
    renderer: Option<ActiveRenderer>,
    tone_mapper: Option<ActiveToneMapper>,
    /// Tone mapper input while no renderer exists.
    placeholder: Option<TextureHandle>,
    resolution: u32,
}

impl RenderGraph {
    pub fn new(registry: StageRegistry, resolution: u32) -> Self {
        Self {
            registry,
            renderer: None,
            tone_mapper: None,
            placeholder: None,
            resolution,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn renderer_kind(&self) -> Option<RendererKind> {
        self.renderer.as_ref().map(|r| r.kind)
    }

    pub fn tone_mapper_kind(&self) -> Option<ToneMapperKind> {
        self.tone_mapper.as_ref().map(|t| t.kind)
    }

    pub fn renderer(&self) -> Option<&dyn Renderer> {
        self.renderer.as_ref().map(|r| r.stage.as_ref())
    }

    pub fn renderer_mut(&mut self) -> Option<&mut dyn Renderer> {
        match self.renderer.as_mut() {
            Some(r) => Some(r.stage.as_mut()),
            None => None,
        }
    }

    pub fn tone_mapper(&self) -> Option<&dyn ToneMapper> {
        self.tone_mapper.as_ref().map(|t| t.stage.as_ref())
    }

    pub fn is_complete(&self) -> bool {
        self.renderer.is_some() && self.tone_mapper.is_some()
    }

    /// Replaces the renderer with a fresh instance of `kind`.
    ///
    /// The registry is consulted before anything is torn down, so an
    /// unregistered kind leaves the current renderer in place.
    pub fn choose_renderer(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        kind: RendererKind,
        volume: &Volume,
        environment: TextureHandle,
    ) -> Result<(), StageError> {
        if !self.registry.has_renderer(kind) {
            return Err(StageError::RendererNotRegistered(kind));
        }

        if let Some(mut old) = self.renderer.take() {
            debug!("destroying renderer {}", old.kind);
            old.stage.destroy(gpu);
        }

        let inputs = RendererInputs { volume, environment };
        let mut stage = self.registry.build_renderer(gpu, kind, &inputs)?;
        stage.set_resolution(gpu, self.resolution)?;
        if volume.is_loaded() {
            stage.set_volume(gpu, volume)?;
        }

        let output = stage.texture();
        self.renderer = Some(ActiveRenderer { kind, stage });
        debug!("renderer {kind} ready at {}px", self.resolution);

        if let Some(tone) = self.tone_mapper.as_mut() {
            tone.stage.set_texture(output);
        }
        self.release_placeholder(gpu);
        Ok(())
    }

    /// Replaces the tone mapper with a fresh instance of `kind`.
    pub fn choose_tone_mapper(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        kind: ToneMapperKind,
    ) -> Result<(), StageError> {
        if !self.registry.has_tone_mapper(kind) {
            return Err(StageError::ToneMapperNotRegistered(kind));
        }

        if let Some(mut old) = self.tone_mapper.take() {
            debug!("destroying tone mapper {}", old.kind);
            old.stage.destroy(gpu);
        }

        let input = self.tone_mapper_input(gpu)?;
        let mut stage = self.registry.build_tone_mapper(gpu, kind, input)?;
        stage.set_resolution(gpu, self.resolution)?;
        self.tone_mapper = Some(ActiveToneMapper { kind, stage });
        debug!("tone mapper {kind} ready");
        Ok(())
    }

    /// Resizes both stages and rewires the tone mapper to the new output.
    pub fn set_resolution(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        resolution: u32,
    ) -> Result<(), StageError> {
        self.resolution = resolution;

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.stage.set_resolution(gpu, resolution)?;
        }
        if let Some(tone) = self.tone_mapper.as_mut() {
            tone.stage.set_resolution(gpu, resolution)?;
            if let Some(renderer) = self.renderer.as_ref() {
                tone.stage.set_texture(renderer.stage.texture());
            }
        }
        Ok(())
    }

    /// Binds freshly loaded data to the renderer, if there is one.
    pub fn bind_volume(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        volume: &Volume,
    ) -> Result<bool, StageError> {
        match self.renderer.as_mut() {
            Some(renderer) => {
                renderer.stage.set_volume(gpu, volume)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn reset_renderer(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.stage.reset();
        }
    }

    /// Runs both stages; returns the displayable texture.
    ///
    /// Yields `None` when either stage is missing.
    pub fn render(&mut self, gpu: &mut dyn GraphicsDevice) -> Result<Option<TextureHandle>, StageError> {
        let (Some(renderer), Some(tone)) = (self.renderer.as_mut(), self.tone_mapper.as_mut()) else {
            return Ok(None);
        };

        renderer.stage.render(gpu)?;
        tone.stage.render(gpu)?;
        Ok(Some(tone.stage.texture()))
    }

    /// Tears down both stages, returning the kinds that were active.
    pub fn teardown(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
    ) -> (Option<RendererKind>, Option<ToneMapperKind>) {
        let kinds = (self.renderer_kind(), self.tone_mapper_kind());

        if let Some(mut tone) = self.tone_mapper.take() {
            tone.stage.destroy(gpu);
        }
        if let Some(mut renderer) = self.renderer.take() {
            renderer.stage.destroy(gpu);
        }
        self.release_placeholder(gpu);
        kinds
    }

    /// Recreates the given stages in a new surface epoch.
    pub fn rebuild(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        kinds: (Option<RendererKind>, Option<ToneMapperKind>),
        volume: &Volume,
        environment: TextureHandle,
    ) -> Result<(), StageError> {
        if let Some(kind) = kinds.0 {
            self.choose_renderer(gpu, kind, volume, environment)?;
        }
        if let Some(kind) = kinds.1 {
            self.choose_tone_mapper(gpu, kind)?;
        }
        Ok(())
    }

    fn tone_mapper_input(&mut self, gpu: &mut dyn GraphicsDevice) -> Result<TextureHandle, StageError> {
        if let Some(renderer) = self.renderer.as_ref() {
            return Ok(renderer.stage.texture());
        }
        if let Some(placeholder) = self.placeholder {
            return Ok(placeholder);
        }
        warn!("tone mapper chosen before a renderer; using a placeholder input");
        let placeholder = gpu.create_texture(&TextureDesc::placeholder("tone mapper input"))?;
        self.placeholder = Some(placeholder);
        Ok(placeholder)
    }

    fn release_placeholder(&mut self, gpu: &mut dyn GraphicsDevice) {
        if let Some(placeholder) = self.placeholder.take() {
            gpu.destroy_texture(placeholder);
        }
    }
}
