use std::time::Duration;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum PlaybackMode {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Frame cursor over a captured frame cache.
///
/// `generation` changes whenever playback stops or pauses, which
/// invalidates any tick already scheduled.
#[derive(Debug, Clone)]
pub struct PlaybackState {
    mode: PlaybackMode,
    frame: usize,
    fps: u32,
    generation: u64,
}

impl PlaybackState {
    pub fn new(fps: u32) -> Self {
        Self {
            mode: PlaybackMode::Stopped,
            frame: 0,
            fps: fps.max(1),
            generation: 0,
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn is_playing(&self) -> bool {
        self.mode == PlaybackMode::Playing
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn set_frame(&mut self, frame: usize) {
        self.frame = frame;
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn set_fps(&mut self, fps: u32) {
        self.fps = fps.max(1);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Delay between two played frames.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.fps))
    }

    /// Enters `Playing`; returns the tick generation, or `None` if already playing.
    pub fn play(&mut self) -> Option<u64> {
        if self.is_playing() {
            return None;
        }
        self.mode = PlaybackMode::Playing;
        Some(self.generation)
    }

    pub fn pause(&mut self) {
        if self.is_playing() {
            self.mode = PlaybackMode::Paused;
        }
        self.generation += 1;
    }

    pub fn stop(&mut self) {
        self.mode = PlaybackMode::Stopped;
        self.frame = 0;
        self.generation += 1;
    }

    /// True while a tick scheduled under `generation` should still run.
    pub fn accepts_tick(&self, generation: u64) -> bool {
        self.is_playing() && generation == self.generation
    }
}

/// Brings a frame index stepped one past either end back into range.
pub fn wrap_frame(frame: isize, frames: usize) -> usize {
    if frames == 0 {
        return 0;
    }
    if frame < 0 {
        frames - 1
    } else if frame as usize >= frames {
        0
    } else {
        frame as usize
    }
}
