use glam::Vec3;

use crate::device::Filter;

/// Initial camera placement and frustum.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub position: Vec3,
    /// Horizontal half-extent of the frustum at distance 1.
    pub fov_x: f32,
    /// Vertical half-extent of the frustum at distance 1.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 1.5),
            fov_x: 0.3,
            fov_y: 0.3,
            near: 0.1,
            far: 5.0,
        }
    }
}

/// Rendering context configuration.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Pixel resolution shared by the renderer and tone mapper.
    pub resolution: u32,

    /// Volume sampling filter applied when data finishes loading.
    pub filter: Filter,

    /// Wait for a restore signal after surface loss instead of giving up.
    pub restorable: bool,

    pub camera: CameraConfig,

    /// Modality loaded for rendering.
    pub modality: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            resolution: 512,
            filter: Filter::Linear,
            restorable: true,
            camera: CameraConfig::default(),
            modality: "default".to_string(),
        }
    }
}
