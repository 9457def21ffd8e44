//! rivertune-player configuration
//!
//! Loaded once at session start from a TOML file (all keys optional) and
//! threaded through [`crate::context::SessionContext`].

use std::path::{Path, PathBuf};

use rivertune_common::model::AudioQuality;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// When liked tracks are downloaded automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutoDownloadMode {
    #[default]
    Off,
    On,
    WifiOnly,
}

/// Playback core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory completed downloads are written to
    pub download_dir: PathBuf,

    /// Base URL of the catalog service
    pub catalog_url: String,

    /// Preferred stream quality
    pub audio_quality: AudioQuality,

    /// Skip to the next item on unclassified playback errors
    /// (false stops playback instead)
    pub skip_on_error: bool,

    /// Persist queues to the database and restore them on start
    pub persistent_queue: bool,

    /// Fetch further radio pages when the queue tail runs low
    pub auto_load_more: bool,

    /// Record play counts / play time / playback events
    pub record_history: bool,

    /// Register qualifying plays with the remote catalog
    pub record_remote_history: bool,

    /// Fraction of a track that must play before it counts as a play.
    /// Clamped to [0.01, 0.99] at use sites.
    pub min_playback_fraction: f32,

    /// Scale volume by the track's reported loudness
    pub audio_normalization: bool,

    /// Auto-download liked tracks
    pub auto_download: AutoDownloadMode,

    /// Network timeout for stream resolution, in seconds
    pub resolve_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            catalog_url: "http://127.0.0.1:5790".to_string(),
            audio_quality: AudioQuality::Auto,
            skip_on_error: true,
            persistent_queue: true,
            auto_load_more: true,
            record_history: true,
            record_remote_history: true,
            min_playback_fraction: 0.3,
            audio_normalization: true,
            auto_download: AutoDownloadMode::Off,
            resolve_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing keys.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&contents).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Minimum playback fraction clamped to a sane range; spam skipping
    /// never counts as a play and 100% is unreachable with rounding.
    pub fn effective_min_playback_fraction(&self) -> f32 {
        self.min_playback_fraction.clamp(0.01, 0.99)
    }
}
