//! Temporal volumes: capture every frame once, then play the cache back.
//!
//! The rendering context drives both phases; this module holds the state
//! machines, the frame cache and the player port.

mod capture;
mod frame_cache;
mod playback;
mod player;

use thiserror::Error;

pub use capture::{CaptureConfig, CaptureMode, CaptureState};
pub use frame_cache::FrameCache;
pub use playback::{PlaybackMode, PlaybackState, wrap_frame};
pub use player::{
    FramePlayer, FramePlayerModel, PlayerEvent, PlayerEventKind, PlayerEventSink, ProgressReporter,
    SubscriptionId, SubscriptionSet,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemporalError {
    #[error("a temporal capture is already in progress")]
    CaptureInProgress,

    #[error("capture mode {0} is not supported")]
    UnsupportedCaptureMode(CaptureMode),

    #[error("unknown capture mode {0:?}")]
    UnknownCaptureMode(String),

    #[error("the current volume has no frames to capture")]
    NotTemporal,
}

/// Requests issued by the temporal rendering controls.
pub enum TemporalControl {
    StartTemporalRenderingClick {
        config: CaptureConfig,
        player: Box<dyn FramePlayer>,
        progress: Box<dyn ProgressReporter>,
    },
    StopTemporalRenderingClick,
}
