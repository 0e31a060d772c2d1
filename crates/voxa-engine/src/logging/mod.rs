//! Logging utilities.
//!
//! Everything logs through the `log` facade; this module only installs the
//! `env_logger` backend once.

mod init;

pub use init::{init_logging, LoggingConfig};
