//! Shared helpers for integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rivertune_common::error::ResolveError;
use rivertune_common::model::{
    AudioConfig, AudioQuality, PlaybackData, RadioPage, StreamFormat, TrackMetadata,
};
use rivertune_player::catalog::CatalogClient;

/// Catalog double: always resolves, counts calls, serves small radio pages.
pub struct FakeCatalog {
    pub playback_calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            playback_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn playback_data(
        &self,
        track_id: &str,
        _quality: AudioQuality,
        _metered: bool,
    ) -> Result<PlaybackData, ResolveError> {
        let n = self.playback_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PlaybackData {
            stream_url: format!("https://streams.example/{track_id}/{n}"),
            expires_in_seconds: 21540,
            format: StreamFormat {
                itag: 251,
                mime_type: "audio/webm; codecs=\"opus\"".to_string(),
                bitrate: 141_000,
                audio_sample_rate: Some(48_000),
                content_length: Some(2_000_000),
            },
            audio_config: Some(AudioConfig {
                loudness_db: Some(-1.2),
            }),
            playback_tracking_url: Some("https://stats.example/playback".to_string()),
        })
    }

    async fn radio_page(&self, endpoint: &str) -> Result<RadioPage, ResolveError> {
        Ok(RadioPage {
            tracks: vec![
                TrackMetadata::new(endpoint, "seed"),
                TrackMetadata::new(format!("{endpoint}-r1"), "r1"),
                TrackMetadata::new(format!("{endpoint}-r2"), "r2"),
            ],
            continuation: None,
        })
    }

    async fn track_details(&self, _track_id: &str) -> Result<Option<TrackMetadata>, ResolveError> {
        Ok(None)
    }

    async fn register_playback(&self, _tracking_url: &str) -> Result<(), ResolveError> {
        Ok(())
    }
}

pub fn tracks(ids: &[&str]) -> Vec<TrackMetadata> {
    ids.iter()
        .map(|id| {
            let mut t = TrackMetadata::new(*id, format!("Title {id}"));
            t.artists = vec!["Artist".to_string()];
            t.duration_secs = 200;
            t
        })
        .collect()
}
