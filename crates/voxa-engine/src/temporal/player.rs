use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::Sender;

use log::warn;

use super::playback::PlaybackMode;

/// Notification raised by a frame player's controls.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlayerEvent {
    Stop,
    Play,
    Pause,
    PrevFrame,
    NextFrame,
    FpsChange { fps: u32 },
    /// Zero-based frame selected by the user.
    FrameChange { frame: usize },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PlayerEventKind {
    Stop,
    Play,
    Pause,
    PrevFrame,
    NextFrame,
    FpsChange,
    FrameChange,
}

impl PlayerEventKind {
    pub const ALL: [PlayerEventKind; 7] = [
        PlayerEventKind::Stop,
        PlayerEventKind::Play,
        PlayerEventKind::Pause,
        PlayerEventKind::PrevFrame,
        PlayerEventKind::NextFrame,
        PlayerEventKind::FpsChange,
        PlayerEventKind::FrameChange,
    ];
}

impl PlayerEvent {
    pub fn kind(&self) -> PlayerEventKind {
        match self {
            PlayerEvent::Stop => PlayerEventKind::Stop,
            PlayerEvent::Play => PlayerEventKind::Play,
            PlayerEvent::Pause => PlayerEventKind::Pause,
            PlayerEvent::PrevFrame => PlayerEventKind::PrevFrame,
            PlayerEvent::NextFrame => PlayerEventKind::NextFrame,
            PlayerEvent::FpsChange { .. } => PlayerEventKind::FpsChange,
            PlayerEvent::FrameChange { .. } => PlayerEventKind::FrameChange,
        }
    }
}

pub type PlayerEventSink = Sender<PlayerEvent>;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SubscriptionId(pub u64);

/// Playback controls driven by the rendering context.
///
/// Frames are one-based on this interface; events carry zero-based frames.
pub trait FramePlayer {
    fn set_max_value(&mut self, max: usize);

    fn set_frame(&mut self, frame: usize);

    fn set_enabled(&mut self, enabled: bool);

    fn fps(&self) -> u32;

    fn play(&mut self);

    fn subscribe(&mut self, kind: PlayerEventKind, sink: PlayerEventSink) -> SubscriptionId;

    fn unsubscribe(&mut self, id: SubscriptionId);
}

/// Sink for capture progress, in percent.
pub trait ProgressReporter {
    fn set_progress(&mut self, percent: f32);
}

impl<P: FramePlayer> FramePlayer for Rc<RefCell<P>> {
    fn set_max_value(&mut self, max: usize) {
        self.borrow_mut().set_max_value(max);
    }

    fn set_frame(&mut self, frame: usize) {
        self.borrow_mut().set_frame(frame);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.borrow_mut().set_enabled(enabled);
    }

    fn fps(&self) -> u32 {
        self.borrow().fps()
    }

    fn play(&mut self) {
        self.borrow_mut().play();
    }

    fn subscribe(&mut self, kind: PlayerEventKind, sink: PlayerEventSink) -> SubscriptionId {
        self.borrow_mut().subscribe(kind, sink)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.borrow_mut().unsubscribe(id);
    }
}

impl<P: ProgressReporter> ProgressReporter for Rc<RefCell<P>> {
    fn set_progress(&mut self, percent: f32) {
        self.borrow_mut().set_progress(percent);
    }
}

/// Subscriptions one temporal session holds on its player.
///
/// Must be released explicitly; the player outlives the session.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    ids: Vec<SubscriptionId>,
}

impl SubscriptionSet {
    /// Subscribes `sink` to every event kind.
    pub fn subscribe_all(player: &mut dyn FramePlayer, sink: &PlayerEventSink) -> Self {
        let ids = PlayerEventKind::ALL
            .iter()
            .map(|kind| player.subscribe(*kind, sink.clone()))
            .collect();
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn release(&mut self, player: &mut dyn FramePlayer) {
        for id in self.ids.drain(..) {
            player.unsubscribe(id);
        }
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        if !self.ids.is_empty() {
            warn!("{} player subscriptions dropped without release", self.ids.len());
        }
    }
}

struct Listener {
    id: SubscriptionId,
    kind: PlayerEventKind,
    sink: PlayerEventSink,
}

/// In-process frame player state with event fan-out.
///
/// `frame` stays within `[min, max]` and `fps` within `[1, 60]`; change
/// events fire only when a setter actually changes the value.
pub struct FramePlayerModel {
    frame: usize,
    min: usize,
    max: usize,
    fps: u32,
    enabled: bool,
    mode: PlaybackMode,
    listeners: Vec<Listener>,
    next_id: u64,
}

impl FramePlayerModel {
    pub const MIN_FPS: u32 = 1;
    pub const MAX_FPS: u32 = 60;

    pub fn new(fps: u32) -> Self {
        Self {
            frame: 1,
            min: 1,
            max: 1,
            fps: fps.clamp(Self::MIN_FPS, Self::MAX_FPS),
            enabled: false,
            mode: PlaybackMode::Stopped,
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn max_value(&self) -> usize {
        self.max
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn set_fps(&mut self, fps: u32) {
        let fps = fps.clamp(Self::MIN_FPS, Self::MAX_FPS);
        if fps != self.fps {
            self.fps = fps;
            self.emit(PlayerEvent::FpsChange { fps });
        }
    }

    pub fn stop(&mut self) {
        self.mode = PlaybackMode::Stopped;
        self.emit(PlayerEvent::Stop);
    }

    pub fn pause(&mut self) {
        self.mode = PlaybackMode::Paused;
        self.emit(PlayerEvent::Pause);
    }

    pub fn prev_frame(&mut self) {
        self.emit(PlayerEvent::PrevFrame);
    }

    pub fn next_frame(&mut self) {
        self.emit(PlayerEvent::NextFrame);
    }

    fn emit(&mut self, event: PlayerEvent) {
        let kind = event.kind();
        // A dropped receiver means the session is gone; forget its listeners.
        self.listeners
            .retain(|l| l.kind != kind || l.sink.send(event).is_ok());
    }
}

impl FramePlayer for FramePlayerModel {
    fn set_max_value(&mut self, max: usize) {
        self.max = max.max(self.min);
        self.frame = self.frame.clamp(self.min, self.max);
    }

    fn set_frame(&mut self, frame: usize) {
        let frame = frame.clamp(self.min, self.max);
        if frame != self.frame {
            self.frame = frame;
            self.emit(PlayerEvent::FrameChange { frame: frame - 1 });
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn play(&mut self) {
        self.mode = PlaybackMode::Playing;
        self.emit(PlayerEvent::Play);
    }

    fn subscribe(&mut self, kind: PlayerEventKind, sink: PlayerEventSink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push(Listener { id, kind, sink });
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.listeners.retain(|l| l.id != id);
    }
}
