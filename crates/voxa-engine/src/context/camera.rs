use glam::{Mat4, Quat, Vec3, Vec4};

use super::CameraConfig;

/// Perspective camera looking down -Z in its local frame.
///
/// Every mutation sets the dirty flag; the transform pipeline clears it when
/// it recomputes the inverse MVP. The orbit controller that moves the camera
/// lives outside this crate and goes through the setters.
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    rotation: Quat,
    fov_x: f32,
    fov_y: f32,
    near: f32,
    far: f32,

    view_matrix: Mat4,
    projection_matrix: Mat4,
    transformation_matrix: Mat4,

    dirty: bool,
}

impl Camera {
    pub fn new(config: &CameraConfig) -> Self {
        let mut camera = Self {
            position: config.position,
            rotation: Quat::IDENTITY,
            fov_x: config.fov_x,
            fov_y: config.fov_y,
            near: config.near,
            far: config.far,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            transformation_matrix: Mat4::IDENTITY,
            dirty: true,
        };
        camera.update_matrices();
        camera
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty = true;
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation.normalize();
        self.dirty = true;
    }

    pub fn fov(&self) -> (f32, f32) {
        (self.fov_x, self.fov_y)
    }

    pub fn set_fov(&mut self, fov_x: f32, fov_y: f32) {
        self.fov_x = fov_x;
        self.fov_y = fov_y;
        self.dirty = true;
    }

    /// Adapts the horizontal field of view to the new aspect ratio.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.fov_x = self.fov_y * width as f32 / height as f32;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Rebuilds view, projection and their product from the current parameters.
    pub fn update_matrices(&mut self) {
        self.view_matrix = Mat4::from_rotation_translation(self.rotation, self.position).inverse();

        let w = self.fov_x * self.near;
        let h = self.fov_y * self.near;
        self.projection_matrix = frustum(-w, w, -h, h, self.near, self.far);

        self.transformation_matrix = self.projection_matrix * self.view_matrix;
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view_matrix
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    /// Projection times view.
    pub fn transformation_matrix(&self) -> Mat4 {
        self.transformation_matrix
    }
}

/// OpenGL-style off-center perspective frustum.
fn frustum(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let rl = right - left;
    let tb = top - bottom;
    let fnr = far - near;
    Mat4::from_cols(
        Vec4::new(2.0 * near / rl, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * near / tb, 0.0, 0.0),
        Vec4::new((right + left) / rl, (top + bottom) / tb, -(far + near) / fnr, -1.0),
        Vec4::new(0.0, 0.0, -2.0 * far * near / fnr, 0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_camera_is_dirty_and_positioned() {
        let camera = Camera::new(&CameraConfig::default());
        assert!(camera.is_dirty());
        assert_eq!(camera.position(), Vec3::new(0.0, 0.0, 1.5));
        // The view matrix moves the camera to the origin.
        let origin = camera.view_matrix().transform_point3(camera.position());
        assert!(origin.length() < 1e-6);
    }

    #[test]
    fn resize_keeps_vertical_fov() {
        let mut camera = Camera::new(&CameraConfig::default());
        camera.clear_dirty();

        camera.resize(800, 400);
        assert_eq!(camera.fov(), (0.6, 0.3));
        assert!(camera.is_dirty());
    }

    #[test]
    fn zero_sized_resize_is_ignored() {
        let mut camera = Camera::new(&CameraConfig::default());
        camera.clear_dirty();
        camera.resize(0, 400);
        assert!(!camera.is_dirty());
    }

    #[test]
    fn near_plane_maps_to_ndc_minus_one() {
        let camera = Camera::new(&CameraConfig::default());
        let p = camera
            .projection_matrix()
            .project_point3(Vec3::new(0.0, 0.0, -0.1));
        assert!((p.z + 1.0).abs() < 1e-5);
    }
}
