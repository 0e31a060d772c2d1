//! Time subsystem.
//!
//! Provides stable, testable timing utilities without coupling to the runtime:
//! - one `FrameClock` per window; `tick()` once per display refresh
//! - `Scheduler` for cooperative timers and refresh waits, driven with an
//!   explicit `now`

mod frame_clock;
mod scheduler;

pub use frame_clock::{FrameClock, FrameTime};
pub use scheduler::Scheduler;
