//! Event types for the Rivertune playback core.
//!
//! Two event families live here:
//! - [`PlayerEvent`]: callbacks from the underlying media player, delivered
//!   over a single mpsc channel in emission order and dispatched through one
//!   handler function in the orchestrator.
//! - [`RivertuneEvent`]: the broadcast enum carried by [`EventBus`] for
//!   observers (PlayerConnection, UI surfaces, session mirrors).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::TrackMetadata;

/// Transport state of the underlying player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Buffering,
    Ready,
    Ended,
}

/// Repeat mode, persisted as its numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    /// Next mode in the toggle cycle Off -> All -> One -> Off.
    pub fn cycled(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            RepeatMode::Off => 0,
            RepeatMode::One => 1,
            RepeatMode::All => 2,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => RepeatMode::One,
            2 => RepeatMode::All,
            _ => RepeatMode::Off,
        }
    }
}

/// Why the player moved to a different media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Natural advance at end of item
    Auto,
    /// Explicit seek to another item
    Seek,
    /// The playlist was edited under the player
    PlaylistChanged,
    /// Same item restarted by repeat-one
    Repeat,
}

/// Callback from the underlying media player.
///
/// Emitted in order over one channel; the orchestrator's handler is the
/// single place transitions are interpreted, which keeps the state machine
/// testable without a live player.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// The active playlist item changed.
    MediaItemTransition {
        index: usize,
        reason: TransitionReason,
    },

    /// Transport state changed.
    PlaybackStateChanged { state: PlaybackState },

    /// Play/pause intent changed.
    PlayWhenReadyChanged { play_when_ready: bool },

    /// Playlist contents changed (item edits, reloads).
    TimelineChanged,

    RepeatModeChanged { mode: RepeatMode },

    /// A system surface flipped the player's own shuffle flag; the queue
    /// board owns shuffling, so the orchestrator translates this into a
    /// queue-level shuffle toggle.
    ShuffleToggleRequested,

    /// Playback failed with a stable error code (see crate::error).
    PlayerError { code: i32, message: String },

    /// Accounting snapshot after an item finished or was left.
    PlaybackStatsReady { track_id: String, played_ms: u64 },
}

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Informational, auto-dismissing
    Transient,
    /// Requires acknowledgment; playback is stopped or blocked
    Blocking,
}

/// User-visible playback notice (network wait, refresh, stop-on-error).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerNotice {
    pub kind: NoticeKind,
    pub message: String,
}

impl PlayerNotice {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Transient,
            message: message.into(),
        }
    }

    pub fn blocking(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Blocking,
            message: message.into(),
        }
    }
}

/// Rivertune event types, broadcast via [`EventBus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RivertuneEvent {
    /// Transport state changed
    PlaybackStateChanged {
        state: PlaybackState,
        play_when_ready: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The active track changed (None when the playlist emptied)
    TrackChanged {
        track: Option<TrackMetadata>,
        index: Option<usize>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue contents or selection changed
    QueueChanged {
        title: Option<String>,
        playlist_id: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    ShuffleChanged {
        shuffled: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    RepeatModeChanged {
        mode: RepeatMode,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback suspended waiting for connectivity (or resumed)
    WaitingForNetwork {
        waiting: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Current player error, None once cleared
    PlayerErrorChanged {
        code: Option<i32>,
        message: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// User-visible notice
    Notice {
        notice: PlayerNotice,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// One-to-many event broadcaster.
///
/// Thin wrapper over a tokio broadcast channel; sending never fails (no
/// receivers is fine) and slow receivers simply lag.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RivertuneEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RivertuneEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all subscribers.
    pub fn emit(&self, event: RivertuneEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_mode_cycle_covers_all_modes() {
        let mut mode = RepeatMode::Off;
        let mut seen = vec![mode];
        for _ in 0..2 {
            mode = mode.cycled();
            seen.push(mode);
        }
        assert_eq!(seen, vec![RepeatMode::Off, RepeatMode::All, RepeatMode::One]);
        assert_eq!(mode.cycled(), RepeatMode::Off);
    }

    #[test]
    fn repeat_mode_round_trips_through_i64() {
        for mode in [RepeatMode::Off, RepeatMode::One, RepeatMode::All] {
            assert_eq!(RepeatMode::from_i64(mode.as_i64()), mode);
        }
    }

    #[tokio::test]
    async fn event_bus_delivers_to_subscribers() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(RivertuneEvent::ShuffleChanged {
            shuffled: true,
            timestamp: chrono::Utc::now(),
        });
        match rx.recv().await.unwrap() {
            RivertuneEvent::ShuffleChanged { shuffled, .. } => assert!(shuffled),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_ok() {
        let bus = EventBus::new(4);
        bus.emit(RivertuneEvent::WaitingForNetwork {
            waiting: true,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
