//! GPU device + surface management.
//!
//! This module is responsible for:
//! - the [`GraphicsDevice`] port the rendering context talks to
//! - the wgpu adapter implementing it for a window surface
//! - surface configuration helpers and readback

mod error;
mod gpu;
mod init;
mod port;
mod surface;

pub use error::{DeviceError, SurfaceErrorAction};
pub use gpu::WgpuDevice;
pub use init::DeviceInit;
pub use port::{
    BufferHandle, DeviceEvent, Extension, Filter, GraphicsDevice, Image, ProgramHandle,
    SurfaceMode, TexelFormat, TextureDesc, TextureHandle,
};
