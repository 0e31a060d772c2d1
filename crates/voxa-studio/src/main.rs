//! Voxa studio: shows a volume, captures its frames, plays them back.
//!
//! Keys: `T` capture, `Esc` stop, `Space` play/pause, `S` stop playback,
//! arrows step frames and change fps, `A`/`D` orbit, `F` filter,
//! `1`-`6` renderer, `Q` quit.

mod app;
mod cli;
mod readers;
mod stages;

use anyhow::Result;
use clap::Parser;
use log::info;

use voxa_engine::logging::{LoggingConfig, init_logging};
use voxa_engine::window::{Runtime, RuntimeConfig};

use crate::app::StudioApp;
use crate::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LoggingConfig {
        env_filter: cli.log.clone(),
        ..LoggingConfig::default()
    });
    info!(
        "voxa studio {}: {} frames, capture {:?}",
        env!("CARGO_PKG_VERSION"),
        cli.frames,
        cli.capture_config().duration
    );

    let config = RuntimeConfig {
        title: "voxa studio".to_string(),
        ..RuntimeConfig::default()
    };
    Runtime::run(config, StudioApp::new(cli))
}
