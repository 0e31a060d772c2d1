//! Voxa engine crate.
//!
//! Volume rendering context with temporal capture and playback, plus the
//! platform + GPU runtime pieces it runs on.

pub mod context;
pub mod core;
pub mod device;
pub mod logging;
pub mod temporal;
pub mod time;
pub mod window;

#[cfg(test)]
mod testing;
