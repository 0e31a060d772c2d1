/// High-level response after a surface error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceErrorAction {
    /// Surface was reconfigured; rendering may resume next frame.
    Reconfigured,
    /// Transient error; skip the current frame.
    SkipFrame,
    /// Fatal error (commonly OOM); terminate gracefully.
    Fatal,
}

/// Errors raised through the [`GraphicsDevice`](super::GraphicsDevice) port.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("surface mode {0:?} is not available")]
    ModeUnavailable(super::SurfaceMode),

    #[error("surface acquisition failed: {0}")]
    Acquire(String),

    #[error("device is not initialized")]
    NotInitialized,

    #[error("surface is lost")]
    Lost,

    #[error("handle {id} belongs to epoch {epoch}, current epoch is {current}")]
    StaleHandle { id: u32, epoch: u32, current: u32 },

    #[error("unknown resource handle {0}")]
    UnknownHandle(u32),

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("texel format {0:?} cannot be sampled by the quad program")]
    UnsupportedFormat(super::TexelFormat),

    #[error("frame skipped: {0:?}")]
    Surface(SurfaceErrorAction),

    #[error("readback failed: {0}")]
    Readback(String),

    #[error("unknown filter `{0}`")]
    UnknownFilter(String),
}
