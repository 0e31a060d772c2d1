use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use winit::event::WindowEvent;
use winit::window::Window;

use super::ctx::FrameCtx;

/// Control directive returned by app callbacks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AppControl {
    Continue,
    Exit,
}

/// Application contract implemented by higher layers.
pub trait App {
    /// Called once the window exists, before the first frame.
    fn on_start(&mut self, window: Arc<Window>) -> Result<()>;

    /// Called for every window event before the runtime handles it.
    fn on_window_event(&mut self, event: &WindowEvent) -> AppControl {
        let _ = event;
        AppControl::Continue
    }

    /// Called with the new physical size after a resize or scale change.
    fn on_resize(&mut self, width: u32, height: u32) {
        let _ = (width, height);
    }

    /// Called once per display refresh.
    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl;

    /// Called whenever the event loop is about to sleep.
    ///
    /// Returns the next instant the app needs to be woken at.
    fn on_idle(&mut self, now: Instant) -> Option<Instant> {
        let _ = now;
        None
    }

    /// Whether the next display refresh has work to do.
    fn wants_redraw(&self) -> bool {
        true
    }
}
