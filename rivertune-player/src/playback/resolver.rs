//! Stream URL resolution with caching and expiry tracking.
//!
//! Resolving a track yields a signed, time-limited URL. Entries are cached
//! until shortly before expiry and are advisory: a cached URL can still go
//! bad, in which case the orchestrator invalidates it and resolves again.
//! This layer never decides recovery policy; failures propagate as typed
//! [`ResolveError`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rivertune_common::error::ResolveError;
use rivertune_common::model::{AudioQuality, FormatInfo, TrackMetadata};
use sqlx::{Pool, Sqlite};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::catalog::CatalogClient;
use crate::context::NetworkState;
use crate::db;

/// A cached URL within this margin of its expiry is treated as stale, so a
/// stream never races its own expiry mid-playback.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(30);

struct CachedStream {
    url: String,
    expires_at: Instant,
}

/// A playable stream for one track.
#[derive(Debug, Clone)]
pub struct ResolvedStream {
    pub track_id: String,
    pub url: String,
    pub expires_at: Instant,
    pub from_cache: bool,
}

/// Resolves track ids to playable stream URLs.
pub struct StreamResolver {
    db: Pool<Sqlite>,
    catalog: Arc<dyn CatalogClient>,
    quality: AudioQuality,
    // guarded map, last-writer-wins per key
    cache: Mutex<HashMap<String, CachedStream>>,
}

impl StreamResolver {
    pub fn new(db: Pool<Sqlite>, catalog: Arc<dyn CatalogClient>, quality: AudioQuality) -> Self {
        Self {
            db,
            catalog,
            quality,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Obtain a playable URL for a track.
    ///
    /// Local tracks are rejected before any cache or network activity. A
    /// cache hit with more than [`EXPIRY_BUFFER`] of remaining lifetime
    /// short-circuits; anything staler is evicted and resolved fresh. Every
    /// fresh resolution persists the track's format metadata and backfills
    /// its song row.
    pub async fn resolve(
        &self,
        track: &TrackMetadata,
        network: NetworkState,
    ) -> Result<ResolvedStream, ResolveError> {
        if track.is_local {
            return Err(ResolveError::UnsupportedLocal);
        }

        let now = Instant::now();
        {
            let mut cache = self.cache.lock().await;
            match cache.get(&track.id) {
                Some(entry) if entry.expires_at > now + EXPIRY_BUFFER => {
                    debug!("[{}] using cached stream URL", track.id);
                    return Ok(ResolvedStream {
                        track_id: track.id.clone(),
                        url: entry.url.clone(),
                        expires_at: entry.expires_at,
                        from_cache: true,
                    });
                }
                Some(_) => {
                    // expired or about to; force a refresh
                    cache.remove(&track.id);
                }
                None => {}
            }
        }

        if !network.connected {
            return Err(ResolveError::NoInternet);
        }

        let data = self
            .catalog
            .playback_data(&track.id, self.quality, network.metered)
            .await?;

        let info = FormatInfo::from_playback(&track.id, &data);
        if let Err(e) = db::formats::upsert_format(&self.db, &info).await {
            // metadata persistence is best-effort
            warn!("[{}] failed to persist format: {}", track.id, e);
        }
        self.backfill_song(track).await;

        if data.expires_in_seconds < 60 {
            warn!(
                "[{}] stream expires very soon: {}s",
                track.id, data.expires_in_seconds
            );
        }
        let expires_at = now + Duration::from_secs(data.expires_in_seconds.max(0) as u64);
        self.cache.lock().await.insert(
            track.id.clone(),
            CachedStream {
                url: data.stream_url.clone(),
                expires_at,
            },
        );
        debug!(
            "[{}] cached stream URL, expires in {}s",
            track.id, data.expires_in_seconds
        );

        Ok(ResolvedStream {
            track_id: track.id.clone(),
            url: data.stream_url,
            expires_at,
            from_cache: false,
        })
    }

    /// Ensure the song row exists and has a duration when the catalog
    /// knows one. All failures are logged and dropped.
    async fn backfill_song(&self, track: &TrackMetadata) {
        if let Err(e) = db::songs::upsert_track(&self.db, track).await {
            warn!("[{}] song backfill failed: {}", track.id, e);
            return;
        }
        if track.duration_secs >= 0 {
            return;
        }
        match self.catalog.track_details(&track.id).await {
            Ok(Some(details)) if details.duration_secs >= 0 => {
                if let Err(e) = db::songs::upsert_track(&self.db, &details).await {
                    warn!("[{}] duration backfill failed: {}", track.id, e);
                }
            }
            Ok(_) => {}
            Err(e) => debug!("[{}] no track details: {}", track.id, e),
        }
    }

    /// Drop the cached URL for a track, forcing the next resolve to run.
    pub async fn invalidate(&self, track_id: &str) {
        self.cache.lock().await.remove(track_id);
    }

    /// Drop every cached URL (cache-clear action).
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Seed the cache directly; expiry-buffer tests use this to simulate
    /// aged entries.
    #[cfg(test)]
    pub(crate) async fn insert_cached(&self, track_id: &str, url: &str, remaining: Duration) {
        self.cache.lock().await.insert(
            track_id.to_string(),
            CachedStream {
                url: url.to_string(),
                expires_at: Instant::now() + remaining,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init;
    use async_trait::async_trait;
    use rivertune_common::model::{AudioConfig, PlaybackData, RadioPage, StreamFormat};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockCatalog {
        calls: AtomicUsize,
        fail_with: Option<ResolveError>,
    }

    impl MockCatalog {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_with: None,
            }
        }

        fn failing(err: ResolveError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_with: Some(err),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogClient for MockCatalog {
        async fn playback_data(
            &self,
            track_id: &str,
            _quality: AudioQuality,
            _metered: bool,
        ) -> Result<PlaybackData, ResolveError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            Ok(PlaybackData {
                stream_url: format!("https://streams.example/{track_id}/{n}"),
                expires_in_seconds: 21540,
                format: StreamFormat {
                    itag: 251,
                    mime_type: "audio/webm; codecs=\"opus\"".to_string(),
                    bitrate: 141_000,
                    audio_sample_rate: Some(48_000),
                    content_length: Some(4_000_000),
                },
                audio_config: Some(AudioConfig {
                    loudness_db: Some(-3.1),
                }),
                playback_tracking_url: None,
            })
        }

        async fn radio_page(&self, _endpoint: &str) -> Result<RadioPage, ResolveError> {
            Ok(RadioPage::default())
        }

        async fn track_details(
            &self,
            _track_id: &str,
        ) -> Result<Option<TrackMetadata>, ResolveError> {
            Ok(None)
        }

        async fn register_playback(&self, _tracking_url: &str) -> Result<(), ResolveError> {
            Ok(())
        }
    }

    async fn resolver_with(catalog: Arc<MockCatalog>) -> StreamResolver {
        let pool = init::memory().await.unwrap();
        StreamResolver::new(pool, catalog, AudioQuality::Auto)
    }

    fn online() -> NetworkState {
        NetworkState::default()
    }

    #[tokio::test]
    async fn local_tracks_are_rejected_without_network() {
        let catalog = Arc::new(MockCatalog::ok());
        let resolver = resolver_with(Arc::clone(&catalog)).await;
        let mut track = TrackMetadata::new("local1", "Local");
        track.is_local = true;

        let err = resolver.resolve(&track, online()).await.unwrap_err();
        assert_eq!(err, ResolveError::UnsupportedLocal);
        assert_eq!(catalog.calls(), 0);
    }

    #[tokio::test]
    async fn offline_resolution_fails_fast() {
        let catalog = Arc::new(MockCatalog::ok());
        let resolver = resolver_with(Arc::clone(&catalog)).await;
        let track = TrackMetadata::new("t1", "T");

        let err = resolver
            .resolve(
                &track,
                NetworkState {
                    connected: false,
                    metered: false,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::NoInternet);
        assert_eq!(catalog.calls(), 0);
    }

    #[tokio::test]
    async fn fresh_resolution_caches_and_persists_format() {
        let catalog = Arc::new(MockCatalog::ok());
        let resolver = resolver_with(Arc::clone(&catalog)).await;
        let track = TrackMetadata::new("t1", "T");

        let stream = resolver.resolve(&track, online()).await.unwrap();
        assert!(!stream.from_cache);
        assert_eq!(catalog.calls(), 1);
        assert_eq!(resolver.cached_len().await, 1);

        let format = db::formats::format(&resolver.db, "t1").await.unwrap().unwrap();
        assert_eq!(format.codecs, "opus");
        assert_eq!(format.loudness_db, Some(-3.1));

        // second resolve is a cache hit
        let again = resolver.resolve(&track, online()).await.unwrap();
        assert!(again.from_cache);
        assert_eq!(again.url, stream.url);
        assert_eq!(catalog.calls(), 1);
    }

    #[tokio::test]
    async fn entry_near_expiry_is_re_resolved() {
        let catalog = Arc::new(MockCatalog::ok());
        let resolver = resolver_with(Arc::clone(&catalog)).await;
        let track = TrackMetadata::new("t1", "T");

        // 20s of lifetime left: inside the buffer, treated as stale
        resolver
            .insert_cached("t1", "https://old.example/url", Duration::from_secs(20))
            .await;
        let stream = resolver.resolve(&track, online()).await.unwrap();
        assert!(!stream.from_cache);
        assert_eq!(catalog.calls(), 1);

        // 45s left: outside the buffer, reused
        resolver
            .insert_cached("t2", "https://ok.example/url", Duration::from_secs(45))
            .await;
        let track2 = TrackMetadata::new("t2", "T2");
        let stream2 = resolver.resolve(&track2, online()).await.unwrap();
        assert!(stream2.from_cache);
        assert_eq!(stream2.url, "https://ok.example/url");
        assert_eq!(catalog.calls(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_fresh_resolution() {
        let catalog = Arc::new(MockCatalog::ok());
        let resolver = resolver_with(Arc::clone(&catalog)).await;
        let track = TrackMetadata::new("t1", "T");

        resolver.resolve(&track, online()).await.unwrap();
        resolver.invalidate("t1").await;
        let stream = resolver.resolve(&track, online()).await.unwrap();
        assert!(!stream.from_cache);
        assert_eq!(catalog.calls(), 2);
    }

    #[tokio::test]
    async fn catalog_failures_propagate_typed() {
        let catalog = Arc::new(MockCatalog::failing(ResolveError::AuthRequired(
            "premium only".to_string(),
        )));
        let resolver = resolver_with(Arc::clone(&catalog)).await;
        let track = TrackMetadata::new("t1", "T");

        let err = resolver.resolve(&track, online()).await.unwrap_err();
        assert!(matches!(err, ResolveError::AuthRequired(_)));
        assert_eq!(resolver.cached_len().await, 0, "failures are never cached");
    }
}
