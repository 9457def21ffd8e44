//! Download pipeline boundary.
//!
//! Requests are keyed by track id and processed by a single worker: resolve
//! the stream, fetch it into the download directory, stamp the song row
//! with the completion time. Local tracks must never be downloaded; they
//! are refused up front.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rivertune_common::model::TrackMetadata;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::AutoDownloadMode;
use crate::context::SessionContext;
use crate::db::{self, SongRow};
use crate::playback::resolver::StreamResolver;

/// Where a download currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Queued,
    Downloading,
    Completed,
    Failed,
}

enum Command {
    Add(TrackMetadata),
    Remove(String),
}

/// Handle to the download worker.
#[derive(Clone)]
pub struct DownloadManager {
    ctx: Arc<SessionContext>,
    tx: mpsc::UnboundedSender<Command>,
    statuses: watch::Receiver<HashMap<String, DownloadState>>,
}

impl DownloadManager {
    pub fn spawn(ctx: Arc<SessionContext>, resolver: Arc<StreamResolver>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, statuses) = watch::channel(HashMap::new());
        tokio::spawn(worker(Arc::clone(&ctx), resolver, rx, status_tx));
        Self { ctx, tx, statuses }
    }

    /// Enqueue a download. Local tracks are refused.
    pub fn download(&self, track: TrackMetadata) {
        if track.is_local {
            // downloads are hidden for local tracks; refusing here is the
            // last line of defense
            warn!("[{}] refusing to download local track", track.id);
            return;
        }
        let _ = self.tx.send(Command::Add(track));
    }

    pub fn download_all(&self, tracks: Vec<TrackMetadata>) {
        for track in tracks {
            self.download(track);
        }
    }

    /// Remove a finished or pending download and clear its stamp.
    pub fn remove(&self, track_id: &str) {
        let _ = self.tx.send(Command::Remove(track_id.to_string()));
    }

    /// Observable per-track download states.
    pub fn statuses(&self) -> watch::Receiver<HashMap<String, DownloadState>> {
        self.statuses.clone()
    }

    /// Queue a download for a liked song when the auto-download mode and
    /// network allow it. Returns whether a download was queued.
    pub fn auto_download_if_liked(&self, row: &SongRow) -> bool {
        if !row.liked || row.downloaded_at.is_some() || row.is_local {
            return false;
        }
        let unmetered = !self.ctx.network_state().metered;
        let allowed = match self.ctx.config.auto_download {
            AutoDownloadMode::On => true,
            AutoDownloadMode::WifiOnly => unmetered,
            AutoDownloadMode::Off => false,
        };
        if !allowed {
            return false;
        }
        let mut track = TrackMetadata::new(row.id.clone(), row.title.clone());
        track.artists = row.artists.clone();
        track.album = row.album.clone();
        track.duration_secs = row.duration_secs;
        self.download(track);
        true
    }
}

fn download_path(dir: &std::path::Path, track_id: &str, mime_type: &str) -> PathBuf {
    let extension = match mime_type {
        m if m.starts_with("audio/webm") => "webm",
        m if m.starts_with("audio/mp4") => "m4a",
        _ => "audio",
    };
    dir.join(format!("{track_id}.{extension}"))
}

async fn worker(
    ctx: Arc<SessionContext>,
    resolver: Arc<StreamResolver>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<HashMap<String, DownloadState>>,
) {
    let http = match reqwest::Client::builder()
        .timeout(Duration::from_secs(ctx.config.resolve_timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!("Download worker disabled, cannot build http client: {}", e);
            return;
        }
    };

    let set_state = |id: &str, state: Option<DownloadState>| {
        status_tx.send_modify(|map| {
            match state {
                Some(state) => {
                    map.insert(id.to_string(), state);
                }
                None => {
                    map.remove(id);
                }
            };
        });
    };

    while let Some(command) = rx.recv().await {
        match command {
            Command::Add(track) => {
                if track.is_local {
                    warn!("[{}] local track reached the download worker", track.id);
                    continue;
                }
                set_state(&track.id, Some(DownloadState::Queued));
                set_state(&track.id, Some(DownloadState::Downloading));
                match fetch_one(&ctx, &resolver, &http, &track).await {
                    Ok(path) => {
                        info!("[{}] downloaded to {}", track.id, path.display());
                        if let Err(e) =
                            db::songs::update_download_status(&ctx.db, &track.id, Some(Utc::now()))
                                .await
                        {
                            warn!("[{}] failed to stamp download: {}", track.id, e);
                        }
                        set_state(&track.id, Some(DownloadState::Completed));
                    }
                    Err(e) => {
                        warn!("[{}] download failed: {}", track.id, e);
                        let _ = db::songs::update_download_status(&ctx.db, &track.id, None).await;
                        set_state(&track.id, Some(DownloadState::Failed));
                    }
                }
            }
            Command::Remove(track_id) => {
                debug!("[{}] removing download", track_id);
                if let Ok(Some(format)) = db::formats::format(&ctx.db, &track_id).await {
                    let path =
                        download_path(&ctx.config.download_dir, &track_id, &format.mime_type);
                    let _ = tokio::fs::remove_file(path).await;
                }
                if let Err(e) = db::songs::update_download_status(&ctx.db, &track_id, None).await {
                    warn!("[{}] failed to clear download stamp: {}", track_id, e);
                }
                set_state(&track_id, None);
            }
        }
    }
}

async fn fetch_one(
    ctx: &SessionContext,
    resolver: &StreamResolver,
    http: &reqwest::Client,
    track: &TrackMetadata,
) -> crate::error::Result<PathBuf> {
    let stream = resolver.resolve(track, ctx.network_state()).await?;
    let response = http.get(&stream.url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;

    let mime_type = db::formats::format(&ctx.db, &track.id)
        .await?
        .map(|f| f.mime_type)
        .unwrap_or_default();
    let path = download_path(&ctx.config.download_dir, &track.id, &mime_type);
    tokio::fs::create_dir_all(&ctx.config.download_dir).await?;
    tokio::fs::write(&path, &bytes).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(liked: bool, downloaded: bool, local: bool) -> SongRow {
        SongRow {
            id: "t1".to_string(),
            title: "T".to_string(),
            artists: vec![],
            album: None,
            duration_secs: 100,
            is_local: local,
            liked,
            in_library: false,
            play_count: 0,
            total_play_time_ms: 0,
            downloaded_at: downloaded.then(Utc::now),
        }
    }

    async fn manager(mode: AutoDownloadMode) -> DownloadManager {
        let pool = db::init::memory().await.unwrap();
        let mut config = crate::config::Config::default();
        config.auto_download = mode;
        let (ctx, _network) = SessionContext::new(config, pool.clone());
        let catalog: Arc<dyn crate::catalog::CatalogClient> = Arc::new(
            crate::catalog::RemoteCatalog::new("http://127.0.0.1:1", Duration::from_secs(1))
                .unwrap(),
        );
        let resolver = Arc::new(StreamResolver::new(
            pool,
            catalog,
            rivertune_common::model::AudioQuality::Auto,
        ));
        DownloadManager::spawn(ctx, resolver)
    }

    #[tokio::test]
    async fn auto_download_respects_mode_and_flags() {
        let off = manager(AutoDownloadMode::Off).await;
        assert!(!off.auto_download_if_liked(&row(true, false, false)));

        let on = manager(AutoDownloadMode::On).await;
        assert!(on.auto_download_if_liked(&row(true, false, false)));
        assert!(!on.auto_download_if_liked(&row(false, false, false)));
        assert!(!on.auto_download_if_liked(&row(true, true, false)), "already downloaded");
        assert!(!on.auto_download_if_liked(&row(true, false, true)), "local tracks never download");
    }

    #[tokio::test]
    async fn local_tracks_are_refused() {
        let manager = manager(AutoDownloadMode::Off).await;
        let mut track = TrackMetadata::new("local1", "Local");
        track.is_local = true;
        manager.download(track);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.statuses().borrow().is_empty());
    }

    #[test]
    fn download_paths_follow_mime_type() {
        let dir = std::path::Path::new("/tmp/dl");
        assert_eq!(
            download_path(dir, "t1", "audio/webm"),
            PathBuf::from("/tmp/dl/t1.webm")
        );
        assert_eq!(
            download_path(dir, "t1", "audio/mp4"),
            PathBuf::from("/tmp/dl/t1.m4a")
        );
    }
}
