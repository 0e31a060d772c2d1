/// Initialization parameters for the GPU layer.
///
/// Mirrors the context attributes the renderer depends on: no alpha, depth or
/// stencil on the default framebuffer, no multisampling, and a drawing buffer
/// that survives presentation so it can be read back.
#[derive(Debug, Clone)]
pub struct DeviceInit {
    /// Default framebuffer carries an alpha channel.
    pub alpha: bool,

    pub depth: bool,

    pub stencil: bool,

    pub antialias: bool,

    /// Keep the drawing buffer after presentation so `read_pixels` sees the
    /// last drawn frame.
    pub preserve_drawing_buffer: bool,

    /// Prefer an sRGB surface format when available.
    pub prefer_srgb: bool,

    /// Present mode (swap behavior).
    pub present_mode: wgpu::PresentMode,

    /// Required wgpu features.
    pub required_features: wgpu::Features,

    /// Desired maximum frame latency for the surface.
    ///
    /// This value is a hint; support depends on platform/backend.
    pub desired_maximum_frame_latency: u32,
}

impl Default for DeviceInit {
    fn default() -> Self {
        Self {
            alpha: false,
            depth: false,
            stencil: false,
            antialias: false,
            preserve_drawing_buffer: true,
            prefer_srgb: false,
            present_mode: wgpu::PresentMode::Fifo,
            required_features: wgpu::Features::empty(),
            desired_maximum_frame_latency: 2,
        }
    }
}
