//! Window + runtime loop.
//!
//! Owns the `winit` EventLoop and the single application window, and drives
//! the app's refresh and timer callbacks.

mod runtime;

pub use runtime::{Runtime, RuntimeConfig, RuntimeCtx};
