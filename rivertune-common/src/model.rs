//! Track, queue and format models shared across the playback core.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata for a single playable track.
///
/// This is the unit the queue board shuffles, persists and hands to the
/// player. `shuffle_index` is queue-scoped: it is owned by the queue board
/// while the track sits inside a queue and is meaningless outside of one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Catalog id of the track (local tracks use a reserved id prefix)
    pub id: String,

    /// Display title
    pub title: String,

    /// Artist names, ordered
    pub artists: Vec<String>,

    /// Album title, if known
    pub album: Option<String>,

    /// Duration in seconds, -1 when unknown
    pub duration_secs: i64,

    /// Whether the track is an on-device file (never resolved or downloaded)
    pub is_local: bool,

    /// Position of this track in its queue's shuffled traversal order
    pub shuffle_index: usize,
}

impl TrackMetadata {
    /// Minimal constructor for remote tracks; fills the optional fields.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artists: Vec::new(),
            album: None,
            duration_secs: -1,
            is_local: false,
            shuffle_index: 0,
        }
    }
}

/// Whether a queue is a named source queue or an ad-hoc extension of one.
///
/// Extension queues hold additions piled onto a source queue without
/// mutating it. They are tagged with the parent queue's id instead of the
/// title-marker convention so titles stay clean and collision-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueKind {
    Primary,
    Extension { parent: Uuid },
}

impl QueueKind {
    pub fn is_extension(&self) -> bool {
        matches!(self, QueueKind::Extension { .. })
    }
}

/// Preferred audio quality for stream resolution and downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    /// Pick by network conditions (metered connections prefer low)
    #[default]
    Auto,
    High,
    Low,
}

/// Technical stream metadata persisted per track id.
///
/// Refreshed on every successful stream resolution; the loudness value
/// feeds volume normalization and the tracking URL feeds remote playback
/// registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub id: String,
    pub itag: i64,
    pub mime_type: String,
    pub codecs: String,
    pub bitrate: i64,
    pub sample_rate: Option<i64>,
    pub content_length: i64,
    pub loudness_db: Option<f64>,
    pub playback_tracking_url: Option<String>,
}

impl FormatInfo {
    /// Build the persisted format row from a fresh resolution result.
    pub fn from_playback(id: &str, data: &PlaybackData) -> Self {
        let format = &data.format;
        Self {
            id: id.to_string(),
            itag: format.itag,
            mime_type: format
                .mime_type
                .split(';')
                .next()
                .unwrap_or(&format.mime_type)
                .to_string(),
            codecs: format
                .mime_type
                .split("codecs=")
                .nth(1)
                .map(|c| c.trim_matches('"').to_string())
                .unwrap_or_default(),
            bitrate: format.bitrate,
            sample_rate: format.audio_sample_rate,
            content_length: format.content_length.unwrap_or(0),
            loudness_db: data.audio_config.as_ref().and_then(|c| c.loudness_db),
            playback_tracking_url: data.playback_tracking_url.clone(),
        }
    }
}

/// One selectable stream format as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub itag: i64,
    /// Full mime type, e.g. `audio/webm; codecs="opus"`
    pub mime_type: String,
    pub bitrate: i64,
    pub audio_sample_rate: Option<i64>,
    pub content_length: Option<i64>,
}

/// Loudness data attached to a playback response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub loudness_db: Option<f64>,
}

/// Result of resolving a track to a playable stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackData {
    /// Signed, time-limited stream URL
    pub stream_url: String,

    /// Remaining URL lifetime as reported by the catalog
    pub expires_in_seconds: i64,

    pub format: StreamFormat,
    pub audio_config: Option<AudioConfig>,
    pub playback_tracking_url: Option<String>,
}

/// A page of radio/continuation results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadioPage {
    pub tracks: Vec<TrackMetadata>,
    /// Endpoint for the next page, if the source has more
    pub continuation: Option<String>,
}
