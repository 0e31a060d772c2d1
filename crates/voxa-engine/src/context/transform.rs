use glam::{Mat4, Vec3};

use super::camera::Camera;
use super::stage::Renderer;

/// Model transform of the unit volume cube plus the inverse-MVP upload.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    scale: Vec3,
    translation: Vec3,
    dirty: bool,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self {
            scale: Vec3::ONE,
            translation: Vec3::ZERO,
            dirty: true,
        }
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.dirty = true;
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    pub fn set_translation(&mut self, translation: Vec3) {
        self.translation = translation;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Model matrix: center the unit cube, scale, then translate.
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_translation(self.translation)
            * Mat4::from_scale(self.scale)
            * Mat4::from_translation(Vec3::splat(-0.5))
    }

    /// Recomputes and uploads the inverse MVP if the camera or model changed.
    ///
    /// Returns the uploaded matrix, or `None` when nothing was dirty. Without
    /// a renderer the matrix is computed and dropped; the dirty flags are
    /// cleared either way.
    pub fn update_inverse_mvp(
        &mut self,
        camera: &mut Camera,
        renderer: Option<&mut dyn Renderer>,
    ) -> Option<Mat4> {
        if !camera.is_dirty() && !self.dirty {
            return None;
        }

        camera.update_matrices();
        camera.clear_dirty();
        self.dirty = false;

        let mvp = camera.transformation_matrix() * self.model_matrix();
        let matrix = mvp.inverse().transpose();

        if let Some(renderer) = renderer {
            renderer.set_mvp_inverse_matrix(matrix);
            renderer.reset();
        }

        Some(matrix)
    }
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CameraConfig;
    use crate::testing::{RecordingRenderer, StageRecorder};

    fn approx(a: Mat4, b: Mat4) -> bool {
        a.abs_diff_eq(b, 1e-4)
    }

    #[test]
    fn matrix_matches_composition() {
        let mut camera = Camera::new(&CameraConfig::default());
        let mut transform = TransformPipeline::new();
        transform.set_scale(Vec3::new(2.0, 1.0, 0.5));
        transform.set_translation(Vec3::new(0.1, -0.2, 0.0));

        let m = transform.update_inverse_mvp(&mut camera, None).unwrap();

        let expected = (camera.transformation_matrix()
            * Mat4::from_translation(Vec3::new(0.1, -0.2, 0.0))
            * Mat4::from_scale(Vec3::new(2.0, 1.0, 0.5))
            * Mat4::from_translation(Vec3::splat(-0.5)))
        .inverse()
        .transpose();
        assert!(approx(m, expected));
    }

    #[test]
    fn uploads_once_until_something_changes() {
        let calls = StageRecorder::default();
        let mut renderer = RecordingRenderer::detached(calls.clone());
        let mut camera = Camera::new(&CameraConfig::default());
        let mut transform = TransformPipeline::new();

        assert!(transform.update_inverse_mvp(&mut camera, Some(&mut renderer)).is_some());
        assert!(transform.update_inverse_mvp(&mut camera, Some(&mut renderer)).is_none());
        assert_eq!(calls.borrow().matrices.len(), 1);
        assert_eq!(calls.borrow().resets, 1);

        camera.resize(640, 480);
        assert!(transform.update_inverse_mvp(&mut camera, Some(&mut renderer)).is_some());
        assert_eq!(calls.borrow().matrices.len(), 2);

        transform.set_translation(Vec3::X);
        transform.update_inverse_mvp(&mut camera, Some(&mut renderer));
        assert_eq!(calls.borrow().matrices.len(), 3);
        assert_eq!(calls.borrow().resets, 3);
    }

    #[test]
    fn missing_renderer_still_clears_dirty() {
        let mut camera = Camera::new(&CameraConfig::default());
        let mut transform = TransformPipeline::new();

        assert!(transform.update_inverse_mvp(&mut camera, None).is_some());
        assert!(!transform.is_dirty());
        assert!(!camera.is_dirty());
    }

    #[test]
    fn unit_cube_center_projects_to_origin() {
        let mut camera = Camera::new(&CameraConfig::default());
        let mut transform = TransformPipeline::new();
        let inverse_t = transform.update_inverse_mvp(&mut camera, None).unwrap();

        // The screen center unprojects onto the cube's central axis.
        let ray = inverse_t.transpose().project_point3(Vec3::new(0.0, 0.0, 0.0));
        assert!((ray.x - 0.5).abs() < 1e-4);
        assert!((ray.y - 0.5).abs() < 1e-4);
    }
}
