use std::fmt;
use std::str::FromStr;

use super::DeviceError;

macro_rules! resource_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
        pub struct $name {
            id: u32,
            epoch: u32,
        }

        impl $name {
            /// Builds a handle. Only device implementations should mint handles.
            pub fn new(id: u32, epoch: u32) -> Self {
                Self { id, epoch }
            }

            pub fn id(&self) -> u32 {
                self.id
            }

            /// Surface epoch the handle was created in.
            pub fn epoch(&self) -> u32 {
                self.epoch
            }
        }
    };
}

resource_handle!(
    /// Opaque handle to a 2D texture owned by a [`GraphicsDevice`].
    TextureHandle
);
resource_handle!(
    /// Opaque handle to the full-screen-quad program.
    ProgramHandle
);
resource_handle!(
    /// Opaque handle to a vertex buffer.
    BufferHandle
);

/// Surface acquisition mode, in order of preference.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceMode {
    /// Device with compute shader support.
    Compute,
    /// Render-only baseline device.
    Baseline,
}

/// Optional device capabilities probed after acquisition.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Extension {
    /// Floating-point formats usable as color attachments.
    ColorBufferFloat,
}

/// Asynchronous notifications raised by the platform.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeviceEvent {
    /// Every GPU object created so far is gone.
    Lost,
    /// The device may be acquired again.
    Restored,
}

/// Texel layout of a texture.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TexelFormat {
    Rgba8,
    Rgba16Float,
    Rgba32Float,
}

impl TexelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TexelFormat::Rgba8 => 4,
            TexelFormat::Rgba16Float => 8,
            TexelFormat::Rgba32Float => 16,
        }
    }
}

/// Sampling filter, shared by textures and volume data.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

impl FromStr for Filter {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nearest" => Ok(Filter::Nearest),
            "linear" => Ok(Filter::Linear),
            other => Err(DeviceError::UnknownFilter(other.to_string())),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Filter::Nearest => "nearest",
            Filter::Linear => "linear",
        })
    }
}

/// Texture creation parameters.
#[derive(Debug, Clone)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: TexelFormat,
    pub filter: Filter,
    /// Initial contents; zero-filled when `None`.
    pub data: Option<&'a [u8]>,
}

impl<'a> TextureDesc<'a> {
    /// 1x1 opaque white RGBA8 texture.
    pub fn placeholder(label: &'a str) -> Self {
        const WHITE: [u8; 4] = [255, 255, 255, 255];
        Self {
            label,
            width: 1,
            height: 1,
            format: TexelFormat::Rgba8,
            filter: Filter::Linear,
            data: Some(&WHITE),
        }
    }
}

/// Tightly packed pixel rectangle, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self { width, height, pixels }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Port between the rendering context and a concrete GPU backend.
///
/// Resources are referred to by handles stamped with the surface epoch. A
/// successful [`acquire`](GraphicsDevice::acquire) starts a new epoch; handles
/// from an earlier epoch are rejected with [`DeviceError::StaleHandle`].
pub trait GraphicsDevice {
    /// Creates (or recreates) the surface and device in the given mode.
    fn acquire(&mut self, mode: SurfaceMode) -> Result<(), DeviceError>;

    /// Current surface epoch.
    fn epoch(&self) -> u32;

    fn supports(&self, extension: Extension) -> bool;

    /// Size of the default framebuffer in physical pixels.
    fn drawing_buffer_size(&self) -> (u32, u32);

    fn resize(&mut self, width: u32, height: u32);

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureHandle, DeviceError>;

    /// Replaces the texture contents, reallocating storage when the size changes.
    fn write_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    fn read_texture(&mut self, texture: TextureHandle) -> Result<Image, DeviceError>;

    /// Releases a texture. Unknown or stale handles are ignored.
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_quad_program(&mut self) -> Result<ProgramHandle, DeviceError>;

    fn create_clip_quad(&mut self) -> Result<BufferHandle, DeviceError>;

    /// Draws `texture` over the whole default framebuffer and presents it.
    fn draw_quad(
        &mut self,
        program: ProgramHandle,
        quad: BufferHandle,
        texture: TextureHandle,
    ) -> Result<(), DeviceError>;

    /// Reads the default framebuffer as RGBA8.
    fn read_pixels(&mut self) -> Result<Image, DeviceError>;

    /// Drains pending loss/restore notifications.
    fn poll_events(&mut self) -> Vec<DeviceEvent>;
}
