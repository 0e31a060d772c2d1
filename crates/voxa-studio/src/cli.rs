use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use glam::UVec3;

use voxa_engine::context::{RendererKind, ToneMapperKind};
use voxa_engine::device::Filter;
use voxa_engine::temporal::{CaptureConfig, CaptureMode};

/// Volume viewer with temporal capture and playback.
#[derive(Debug, Clone, Parser)]
#[command(name = "voxa-studio", version)]
pub struct Cli {
    /// Headerless temporal volume; a generated phantom is shown when omitted.
    #[arg(long)]
    pub raw: Option<PathBuf>,

    /// Per-frame dimensions of the raw volume, as WxHxD.
    #[arg(long, value_parser = parse_dims, default_value = "64x64x64")]
    pub dims: UVec3,

    /// Number of frames (raw file or phantom).
    #[arg(long, default_value_t = 16)]
    pub frames: usize,

    /// Bits per voxel in the raw file (8 or 16).
    #[arg(long, default_value_t = 8)]
    pub bits: u32,

    /// Modality name the readers expose and the context loads.
    #[arg(long, default_value = "default")]
    pub modality: String,

    #[arg(long, default_value = "mip")]
    pub renderer: RendererKind,

    #[arg(long, default_value = "range")]
    pub tone_mapper: ToneMapperKind,

    /// Render target size in pixels.
    #[arg(long, default_value_t = 256)]
    pub resolution: u32,

    #[arg(long, default_value = "linear")]
    pub filter: Filter,

    #[arg(long, default_value = "fixedtime")]
    pub capture_mode: CaptureMode,

    /// Capture budget in seconds, shared evenly by all frames.
    #[arg(long, default_value_t = 4.0)]
    pub capture_seconds: f32,

    /// Playback rate in frames per second.
    #[arg(long, default_value_t = 10)]
    pub fps: u32,

    /// Start capturing as soon as the first frame is on screen.
    #[arg(long)]
    pub capture: bool,

    /// Log filter, `env_logger` syntax. Overrides RUST_LOG.
    #[arg(long)]
    pub log: Option<String>,
}

impl Cli {
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            mode: self.capture_mode,
            duration: Duration::from_secs_f32(self.capture_seconds.max(0.0)),
        }
    }
}

fn parse_dims(s: &str) -> Result<UVec3, String> {
    let parts = s
        .split('x')
        .map(|p| p.trim().parse::<u32>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;

    match parts.as_slice() {
        [w, h, d] if *w > 0 && *h > 0 && *d > 0 => Ok(UVec3::new(*w, *h, *d)),
        _ => Err(format!("expected WxHxD with non-zero sizes, got {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_parse() {
        assert_eq!(parse_dims("32x16x8"), Ok(UVec3::new(32, 16, 8)));
        assert!(parse_dims("32x16").is_err());
        assert!(parse_dims("32x0x8").is_err());
        assert!(parse_dims("axbxc").is_err());
    }

    #[test]
    fn defaults_and_kinds() {
        let cli = Cli::try_parse_from(["voxa-studio"]).unwrap();
        assert_eq!(cli.renderer, RendererKind::Mip);
        assert_eq!(cli.tone_mapper, ToneMapperKind::Range);
        assert_eq!(cli.capture_config().mode, CaptureMode::FixedTime);
        assert_eq!(cli.capture_config().duration, Duration::from_secs(4));

        let cli = Cli::try_parse_from(["voxa-studio", "--renderer", "mcs", "--filter", "nearest"]).unwrap();
        assert_eq!(cli.renderer, RendererKind::Mcs);
        assert_eq!(cli.filter, Filter::Nearest);

        assert!(Cli::try_parse_from(["voxa-studio", "--renderer", "raytrace"]).is_err());
    }
}
