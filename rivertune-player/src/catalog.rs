//! Remote catalog client seam.
//!
//! The catalog is an external collaborator; this module defines the narrow
//! contract the playback core consumes, plus a thin HTTP implementation.
//! Everything here returns the typed [`ResolveError`] taxonomy; the
//! orchestrator, not this layer, decides retry/skip/stop policy.

use std::time::Duration;

use async_trait::async_trait;
use rivertune_common::error::ResolveError;
use rivertune_common::model::{AudioQuality, PlaybackData, RadioPage, TrackMetadata};
use tracing::debug;

/// Narrow contract to the remote catalog service.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Resolve a track to a signed, time-limited stream URL plus format
    /// metadata, honoring the quality preference (`metered` steers Auto).
    async fn playback_data(
        &self,
        track_id: &str,
        quality: AudioQuality,
        metered: bool,
    ) -> Result<PlaybackData, ResolveError>;

    /// Fetch one page of a radio/continuation source.
    async fn radio_page(&self, endpoint: &str) -> Result<RadioPage, ResolveError>;

    /// Metadata-only lookup, used for song-row backfill.
    async fn track_details(&self, track_id: &str) -> Result<Option<TrackMetadata>, ResolveError>;

    /// Register a qualifying play against the catalog's tracking URL.
    async fn register_playback(&self, tracking_url: &str) -> Result<(), ResolveError>;
}

/// HTTP implementation of [`CatalogClient`].
pub struct RemoteCatalog {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteCatalog {
    /// Build a client with the given base URL and request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn map_error(err: reqwest::Error) -> ResolveError {
        if err.is_timeout() {
            ResolveError::Timeout
        } else if err.is_connect() {
            ResolveError::NoInternet
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => ResolveError::AuthRequired(format!("catalog returned {}", status)),
                _ => ResolveError::Remote(format!("catalog returned {}", status)),
            }
        } else {
            ResolveError::Remote(err.to_string())
        }
    }

    fn quality_param(quality: AudioQuality, metered: bool) -> &'static str {
        match quality {
            AudioQuality::High => "high",
            AudioQuality::Low => "low",
            AudioQuality::Auto if metered => "low",
            AudioQuality::Auto => "high",
        }
    }
}

#[async_trait]
impl CatalogClient for RemoteCatalog {
    async fn playback_data(
        &self,
        track_id: &str,
        quality: AudioQuality,
        metered: bool,
    ) -> Result<PlaybackData, ResolveError> {
        debug!("Requesting playback data for {}", track_id);
        let url = format!(
            "{}/player/{}?quality={}",
            self.base_url,
            track_id,
            Self::quality_param(quality, metered)
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(Self::map_error)?
            .error_for_status()
            .map_err(Self::map_error)?;
        response.json().await.map_err(Self::map_error)
    }

    async fn radio_page(&self, endpoint: &str) -> Result<RadioPage, ResolveError> {
        let url = format!("{}/next/{}", self.base_url, endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(Self::map_error)?
            .error_for_status()
            .map_err(Self::map_error)?;
        response.json().await.map_err(Self::map_error)
    }

    async fn track_details(&self, track_id: &str) -> Result<Option<TrackMetadata>, ResolveError> {
        let url = format!("{}/track/{}", self.base_url, track_id);
        let response = self.http.get(&url).send().await.map_err(Self::map_error)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status().map_err(Self::map_error)?;
        response.json().await.map_err(Self::map_error)
    }

    async fn register_playback(&self, tracking_url: &str) -> Result<(), ResolveError> {
        self.http
            .post(tracking_url)
            .send()
            .await
            .map_err(Self::map_error)?
            .error_for_status()
            .map_err(Self::map_error)?;
        Ok(())
    }
}
