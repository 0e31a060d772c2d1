use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::TemporalError;

/// Strategy used to step through the frames of a temporal volume.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CaptureMode {
    /// Spend a fixed wall-clock budget on every frame.
    FixedTime,
    /// Refine every frame until an error bound is met. Not supported.
    FixedError,
}

impl FromStr for CaptureMode {
    type Err = TemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixedtime" => Ok(CaptureMode::FixedTime),
            "fixederror" => Ok(CaptureMode::FixedError),
            other => Err(TemporalError::UnknownCaptureMode(other.to_string())),
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureMode::FixedTime => "fixedtime",
            CaptureMode::FixedError => "fixederror",
        })
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    /// Total time budget, split evenly across frames.
    pub duration: Duration,
}

impl CaptureConfig {
    pub fn fixed_time(duration: Duration) -> Self {
        Self {
            mode: CaptureMode::FixedTime,
            duration,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::fixed_time(Duration::from_secs(10))
    }
}

/// Progress of a fixed-time capture pass.
#[derive(Debug, Clone)]
pub struct CaptureState {
    frames: usize,
    delay: Duration,
    complete: bool,
}

impl CaptureState {
    pub fn new(frames: usize, duration: Duration) -> Self {
        let delay = match u32::try_from(frames) {
            Ok(0) => Duration::ZERO,
            Ok(n) => duration / n,
            Err(_) => Duration::ZERO,
        };
        Self {
            frames,
            delay,
            complete: false,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Time each frame is given to converge before readback.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Percentage reported once `frame` has been read back.
    pub fn progress_after(&self, frame: usize) -> f32 {
        if self.frames == 0 {
            return 100.0;
        }
        (frame + 1) as f32 / self.frames as f32 * 100.0
    }
}
