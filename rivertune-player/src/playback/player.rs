//! The seam to the underlying media player.
//!
//! The platform player (decoding, rendering, output) is out of scope; the
//! playback core drives it exclusively through [`MediaPlayer`] and receives
//! its callbacks as [`PlayerEvent`] values over a single channel, in
//! emission order. [`StubPlayer`] is an in-memory implementation used by
//! tests and headless embedders.

use std::collections::HashMap;
use std::sync::Mutex;

use rivertune_common::events::{PlaybackState, PlayerEvent, RepeatMode, TransitionReason};
use rivertune_common::model::TrackMetadata;
use tokio::sync::mpsc;

/// Commands understood by the underlying playlist-capable player.
///
/// All methods are non-blocking. Implementations adjust the active index
/// when edits land before it, the way platform players do, so callers can
/// splice around the playing item without disturbing it.
pub trait MediaPlayer: Send + Sync {
    /// Replace the whole playlist. Resets the active item to index 0 and
    /// interrupts playback.
    fn set_items(&self, items: Vec<TrackMetadata>);

    /// Insert items at `index` (clamped to the playlist length).
    fn add_items(&self, index: usize, items: Vec<TrackMetadata>);

    /// Remove items in `[from, to)` (`to` clamped to the playlist length).
    fn remove_items(&self, from: usize, to: usize);

    /// Replace items in `[from, to)` with `items` (`to` clamped).
    ///
    /// Replacing a range that covers everything after the very first item
    /// may interrupt playback on some platform players; callers splice with
    /// remove + add when the active item sits at index 0.
    fn replace_items(&self, from: usize, to: usize, items: Vec<TrackMetadata>);

    fn item_count(&self) -> usize;
    fn item_at(&self, index: usize) -> Option<TrackMetadata>;
    fn current_index(&self) -> usize;
    fn current_item(&self) -> Option<TrackMetadata>;

    /// Index the player would advance to next, honoring the repeat mode.
    fn next_index(&self) -> Option<usize>;

    /// Jump to an item, optionally at a position within it.
    fn seek_to(&self, index: usize, position_ms: Option<u64>);

    fn prepare(&self);
    fn play(&self);
    fn pause(&self);
    fn set_play_when_ready(&self, play: bool);
    fn play_when_ready(&self) -> bool;
    fn is_playing(&self) -> bool;
    fn playback_state(&self) -> PlaybackState;
    fn position_ms(&self) -> u64;

    fn repeat_mode(&self) -> RepeatMode;
    fn set_repeat_mode(&self, mode: RepeatMode);

    /// Effective output volume in [0.0, 1.0].
    fn set_volume(&self, volume: f32);

    /// Supply the resolved stream URL for a track. The player uses it the
    /// next time it opens that track's data source.
    fn set_stream_url(&self, track_id: &str, url: &str);

    /// Release the player. No further commands may be issued.
    fn release(&self);
}

/// Recorded playlist operation, for asserting splice behavior in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerOp {
    SetItems { count: usize },
    AddItems { index: usize, count: usize },
    RemoveItems { from: usize, to: usize },
    ReplaceItems { from: usize, to: usize, count: usize },
    SeekTo { index: usize },
    Prepare,
    Play,
    Pause,
}

struct StubInner {
    items: Vec<TrackMetadata>,
    current: usize,
    play_when_ready: bool,
    state: PlaybackState,
    position_ms: u64,
    repeat: RepeatMode,
    volume: f32,
    stream_urls: HashMap<String, String>,
    released: bool,
    ops: Vec<PlayerOp>,
}

/// In-memory [`MediaPlayer`] emitting events like a platform player would.
///
/// Index adjustment on playlist edits mirrors platform behavior: edits
/// before the active item shift it, removing the active item moves
/// playback to the first surviving item at or after the removal point.
pub struct StubPlayer {
    inner: Mutex<StubInner>,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl StubPlayer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let player = Self {
            inner: Mutex::new(StubInner {
                items: Vec::new(),
                current: 0,
                play_when_ready: false,
                state: PlaybackState::Idle,
                position_ms: 0,
                repeat: RepeatMode::Off,
                volume: 1.0,
                stream_urls: HashMap::new(),
                released: false,
                ops: Vec::new(),
            }),
            events: tx,
        };
        (player, rx)
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    /// Simulate the player reaching the end of the active item.
    pub fn advance_auto(&self) {
        let transition = {
            let mut inner = self.inner.lock().unwrap();
            let next = next_index_for(&inner);
            match next {
                Some(index) => {
                    inner.current = index;
                    inner.position_ms = 0;
                    Some(index)
                }
                None => {
                    inner.state = PlaybackState::Ended;
                    None
                }
            }
        };
        match transition {
            Some(index) => self.emit(PlayerEvent::MediaItemTransition {
                index,
                reason: TransitionReason::Auto,
            }),
            None => self.emit(PlayerEvent::PlaybackStateChanged {
                state: PlaybackState::Ended,
            }),
        }
    }

    /// Simulate a playback failure with a stable error code.
    pub fn fail(&self, code: i32, message: &str) {
        self.emit(PlayerEvent::PlayerError {
            code,
            message: message.to_string(),
        });
    }

    /// Simulate the accounting callback after leaving an item.
    pub fn report_stats(&self, track_id: &str, played_ms: u64) {
        self.emit(PlayerEvent::PlaybackStatsReady {
            track_id: track_id.to_string(),
            played_ms,
        });
    }

    /// Recorded playlist/transport operations since the last call.
    pub fn take_ops(&self) -> Vec<PlayerOp> {
        std::mem::take(&mut self.inner.lock().unwrap().ops)
    }

    pub fn items(&self) -> Vec<TrackMetadata> {
        self.inner.lock().unwrap().items.clone()
    }

    pub fn stream_url(&self, track_id: &str) -> Option<String> {
        self.inner.lock().unwrap().stream_urls.get(track_id).cloned()
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().unwrap().released
    }

    /// Drive the stub to a given position, for refresh-preservation tests.
    pub fn set_position_ms(&self, position_ms: u64) {
        self.inner.lock().unwrap().position_ms = position_ms;
    }
}

fn next_index_for(inner: &StubInner) -> Option<usize> {
    if inner.items.is_empty() {
        return None;
    }
    match inner.repeat {
        RepeatMode::One => Some(inner.current),
        _ if inner.current + 1 < inner.items.len() => Some(inner.current + 1),
        RepeatMode::All => Some(0),
        RepeatMode::Off => None,
    }
}

impl MediaPlayer for StubPlayer {
    fn set_items(&self, items: Vec<TrackMetadata>) {
        {
            let mut inner = self.inner.lock().unwrap();
            let count = items.len();
            inner.items = items;
            inner.current = 0;
            inner.position_ms = 0;
            if inner.items.is_empty() {
                inner.state = PlaybackState::Idle;
            }
            inner.ops.push(PlayerOp::SetItems { count });
        }
        self.emit(PlayerEvent::TimelineChanged);
    }

    fn add_items(&self, index: usize, items: Vec<TrackMetadata>) {
        if items.is_empty() {
            return;
        }
        {
            let mut inner = self.inner.lock().unwrap();
            let index = index.min(inner.items.len());
            let count = items.len();
            let had_items = !inner.items.is_empty();
            let splice: Vec<TrackMetadata> = items;
            inner.items.splice(index..index, splice);
            if had_items && index <= inner.current {
                inner.current += count;
            }
            inner.ops.push(PlayerOp::AddItems { index, count });
        }
        self.emit(PlayerEvent::TimelineChanged);
    }

    fn remove_items(&self, from: usize, to: usize) {
        {
            let mut inner = self.inner.lock().unwrap();
            let to = to.min(inner.items.len());
            if from >= to {
                return;
            }
            inner.items.drain(from..to);
            let removed = to - from;
            if inner.current >= to {
                inner.current -= removed;
            } else if inner.current >= from {
                inner.current = from.min(inner.items.len().saturating_sub(1));
            }
            inner.ops.push(PlayerOp::RemoveItems { from, to });
        }
        self.emit(PlayerEvent::TimelineChanged);
    }

    fn replace_items(&self, from: usize, to: usize, items: Vec<TrackMetadata>) {
        {
            let mut inner = self.inner.lock().unwrap();
            let to = to.min(inner.items.len());
            if from > to {
                return;
            }
            let removed = to - from;
            let count = items.len();
            inner.items.splice(from..to, items);
            if inner.current >= to {
                inner.current = inner.current - removed + count;
            } else if inner.current >= from {
                inner.current = from.min(inner.items.len().saturating_sub(1));
            }
            inner.ops.push(PlayerOp::ReplaceItems { from, to, count });
        }
        self.emit(PlayerEvent::TimelineChanged);
    }

    fn item_count(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    fn item_at(&self, index: usize) -> Option<TrackMetadata> {
        self.inner.lock().unwrap().items.get(index).cloned()
    }

    fn current_index(&self) -> usize {
        self.inner.lock().unwrap().current
    }

    fn current_item(&self) -> Option<TrackMetadata> {
        let inner = self.inner.lock().unwrap();
        inner.items.get(inner.current).cloned()
    }

    fn next_index(&self) -> Option<usize> {
        next_index_for(&self.inner.lock().unwrap())
    }

    fn seek_to(&self, index: usize, position_ms: Option<u64>) {
        let transition = {
            let mut inner = self.inner.lock().unwrap();
            if inner.items.is_empty() {
                return;
            }
            let index = index.min(inner.items.len() - 1);
            let changed = index != inner.current;
            inner.current = index;
            inner.position_ms = position_ms.unwrap_or(0);
            inner.ops.push(PlayerOp::SeekTo { index });
            changed.then_some(index)
        };
        if let Some(index) = transition {
            self.emit(PlayerEvent::MediaItemTransition {
                index,
                reason: TransitionReason::Seek,
            });
        }
    }

    fn prepare(&self) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            inner.ops.push(PlayerOp::Prepare);
            if inner.state != PlaybackState::Ready && !inner.items.is_empty() {
                inner.state = PlaybackState::Ready;
                true
            } else {
                false
            }
        };
        if changed {
            self.emit(PlayerEvent::PlaybackStateChanged {
                state: PlaybackState::Ready,
            });
        }
    }

    fn play(&self) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            inner.ops.push(PlayerOp::Play);
            if !inner.play_when_ready {
                inner.play_when_ready = true;
                true
            } else {
                false
            }
        };
        if changed {
            self.emit(PlayerEvent::PlayWhenReadyChanged {
                play_when_ready: true,
            });
        }
    }

    fn pause(&self) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            inner.ops.push(PlayerOp::Pause);
            if inner.play_when_ready {
                inner.play_when_ready = false;
                true
            } else {
                false
            }
        };
        if changed {
            self.emit(PlayerEvent::PlayWhenReadyChanged {
                play_when_ready: false,
            });
        }
    }

    fn set_play_when_ready(&self, play: bool) {
        if play {
            self.play();
        } else {
            self.pause();
        }
    }

    fn play_when_ready(&self) -> bool {
        self.inner.lock().unwrap().play_when_ready
    }

    fn is_playing(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.play_when_ready
            && matches!(inner.state, PlaybackState::Ready | PlaybackState::Buffering)
    }

    fn playback_state(&self) -> PlaybackState {
        self.inner.lock().unwrap().state
    }

    fn position_ms(&self) -> u64 {
        self.inner.lock().unwrap().position_ms
    }

    fn repeat_mode(&self) -> RepeatMode {
        self.inner.lock().unwrap().repeat
    }

    fn set_repeat_mode(&self, mode: RepeatMode) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            if inner.repeat != mode {
                inner.repeat = mode;
                true
            } else {
                false
            }
        };
        if changed {
            self.emit(PlayerEvent::RepeatModeChanged { mode });
        }
    }

    fn set_volume(&self, volume: f32) {
        self.inner.lock().unwrap().volume = volume.clamp(0.0, 1.0);
    }

    fn set_stream_url(&self, track_id: &str, url: &str) {
        self.inner
            .lock()
            .unwrap()
            .stream_urls
            .insert(track_id.to_string(), url.to_string());
    }

    fn release(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.released = true;
        inner.state = PlaybackState::Idle;
        inner.play_when_ready = false;
    }
}
