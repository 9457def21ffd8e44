//! Lyrics provider seam.
//!
//! Lyrics fetching is an external collaborator; PlayerConnection derives a
//! lyrics observable from the current track through this trait.

use async_trait::async_trait;
use rivertune_common::model::TrackMetadata;

#[async_trait]
pub trait LyricsProvider: Send + Sync {
    /// Lyrics for the track, or None when unavailable.
    async fn lyrics(&self, track: &TrackMetadata) -> Option<String>;
}
