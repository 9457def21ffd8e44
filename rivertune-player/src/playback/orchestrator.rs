//! Playback orchestration.
//!
//! Owns the single media player instance and everything that reacts to it:
//! queue updates, stream resolution, error recovery, network-wait
//! semantics, playback accounting and the media-session mirror. Player
//! callbacks arrive as [`PlayerEvent`] values over one channel and are
//! dispatched through [`PlaybackOrchestrator::handle_player_event`], which
//! keeps the transition table explicit and testable without a live player.
//!
//! Single-writer model: the queue board and the player are only mutated
//! through this type; background work (resolution, persistence, catalog
//! fetches) rejoins through channels or rechecks the active track before
//! applying results.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use rivertune_common::error::{
    CODE_AUTH_REQUIRED, CODE_NO_INTERNET, CODE_STREAM_EXPIRED, CODE_TIMEOUT,
};
use rivertune_common::events::{
    PlaybackState, PlayerEvent, PlayerNotice, RepeatMode, RivertuneEvent, TransitionReason,
};
use rivertune_common::model::TrackMetadata;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::catalog::CatalogClient;
use crate::context::{NetworkState, SessionContext};
use crate::db;
use crate::error::Result;
use crate::playback::downloads::DownloadManager;
use crate::playback::persist::SaveScheduler;
use crate::playback::player::MediaPlayer;
use crate::playback::queue_board::{AddQueueOptions, QueueBoard};
use crate::playback::resolver::StreamResolver;
use crate::playback::session::SessionLayout;
use crate::playback::sleep_timer::SleepTimer;

/// Error budget for the runaway guard and the stream-refresh loop.
pub const MAX_CONSECUTIVE_ERR: i64 = 3;

/// Tail threshold below which a continuation queue fetches its next page.
const LOAD_MORE_THRESHOLD: usize = 5;

/// What to play: a concrete track list, or a radio seeded from one track
/// whose first page is fetched from the catalog.
#[derive(Debug, Clone)]
pub enum QueueRequest {
    List {
        title: String,
        tracks: Vec<TrackMetadata>,
        start_index: usize,
        start_shuffled: bool,
    },
    Radio {
        seed: TrackMetadata,
    },
}

/// The playback core's coordinator.
pub struct PlaybackOrchestrator {
    ctx: Arc<SessionContext>,
    player: Arc<dyn MediaPlayer>,
    catalog: Arc<dyn CatalogClient>,
    resolver: Arc<StreamResolver>,
    board: Mutex<QueueBoard>,
    saver: SaveScheduler,
    downloads: DownloadManager,
    sleep_timer: SleepTimer,

    queue_title: RwLock<Option<String>>,
    queue_playlist_id: RwLock<Option<String>>,
    player_volume: RwLock<f32>,
    normalize_factor: RwLock<f32>,

    waiting_for_network: AtomicBool,
    consecutive_err: AtomicI64,
    last_media_item_index: AtomicI64,
    /// Bumped whenever resolution interest moves to another track; stale
    /// results check it and discard themselves.
    resolve_generation: AtomicU64,

    layout_tx: watch::Sender<SessionLayout>,
}

impl PlaybackOrchestrator {
    /// Build the orchestrator and its owned components. Must be called
    /// from within a tokio runtime (background tasks are spawned).
    pub fn new(
        ctx: Arc<SessionContext>,
        player: Arc<dyn MediaPlayer>,
        catalog: Arc<dyn CatalogClient>,
    ) -> Arc<Self> {
        let saver = SaveScheduler::spawn(ctx.db.clone(), ctx.config.persistent_queue);
        let resolver = Arc::new(StreamResolver::new(
            ctx.db.clone(),
            Arc::clone(&catalog),
            ctx.config.audio_quality,
        ));
        let downloads = DownloadManager::spawn(Arc::clone(&ctx), Arc::clone(&resolver));
        let (layout_tx, _) = watch::channel(SessionLayout::default());
        Arc::new(Self {
            board: Mutex::new(QueueBoard::new(saver.clone())),
            saver,
            downloads,
            sleep_timer: SleepTimer::new(Arc::clone(&player)),
            resolver,
            catalog,
            player,
            ctx,
            queue_title: RwLock::new(None),
            queue_playlist_id: RwLock::new(None),
            player_volume: RwLock::new(1.0),
            normalize_factor: RwLock::new(1.0),
            waiting_for_network: AtomicBool::new(false),
            consecutive_err: AtomicI64::new(0),
            last_media_item_index: AtomicI64::new(-1),
            resolve_generation: AtomicU64::new(0),
            layout_tx,
        })
    }

    /// Restore persisted state: repeat mode, volume, and (when enabled)
    /// the queue snapshot plus last playback position.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!("Starting playback orchestrator");
        let db = &self.ctx.db;

        self.player
            .set_repeat_mode(db::settings::repeat_mode(db).await.unwrap_or_default());
        let volume = db::settings::player_volume(db).await.unwrap_or(1.0);
        *self.player_volume.write().await = volume;
        self.apply_volume().await;

        if self.ctx.config.persistent_queue {
            match db::queues::read_queues(db).await {
                Ok(queues) if !queues.is_empty() => {
                    info!("Restoring {} persisted queue(s)", queues.len());
                    let mut board = self.board.lock().await;
                    *board = QueueBoard::with_queues(queues, self.saver.clone());
                    let pos = board.set_current(self.player.as_ref(), false);
                    *self.queue_title.write().await =
                        board.current_queue().map(|q| q.title.clone());
                    *self.queue_playlist_id.write().await =
                        board.current_queue().and_then(|q| q.playlist_id.clone());
                    let shuffled = board.current_shuffled();
                    drop(board);

                    if let Some(pos) = pos {
                        // one-time synchronous seek to the saved position
                        let last = db::settings::last_position_ms(db).await.unwrap_or(None);
                        self.player.seek_to(pos, last);
                        let _ = db::settings::clear_last_position(db).await;
                    }
                    self.spawn_resolve_current();
                    self.emit(RivertuneEvent::ShuffleChanged {
                        shuffled,
                        timestamp: chrono::Utc::now(),
                    });
                    self.emit_queue_changed().await;
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to restore queue snapshot: {}", e),
            }
        }

        self.recompute_session_layout().await;
        Ok(())
    }

    /// Drive the orchestrator until the player's event channel closes.
    /// Connectivity changes are folded in for network-wait recovery.
    pub async fn run(self: Arc<Self>, mut player_events: mpsc::UnboundedReceiver<PlayerEvent>) {
        let mut network = self.ctx.network.clone();
        let mut network_alive = true;
        loop {
            tokio::select! {
                event = player_events.recv() => match event {
                    Some(event) => self.handle_player_event(event).await,
                    None => break,
                },
                changed = network.changed(), if network_alive => match changed {
                    Ok(()) => {
                        let state = *network.borrow_and_update();
                        self.on_network_changed(state).await;
                    }
                    Err(_) => network_alive = false,
                },
            }
        }
        debug!("Player event channel closed, orchestrator loop exiting");
    }

    /// Flush pending queue mutations to storage, save the position, and
    /// release the player.
    pub async fn shutdown(self: &Arc<Self>) {
        info!("Shutting down playback orchestrator");
        self.sleep_timer.clear();

        let snapshot = {
            let board = self.board.lock().await;
            board.shutdown(); // drop coalesced saves; the snapshot below supersedes them
            board.all_queues()
        };
        if self.ctx.config.persistent_queue {
            if let Err(e) = db::queues::rewrite_all_queues(&self.ctx.db, &snapshot).await {
                error!("Failed to write final queue snapshot: {}", e);
            }
            let _ =
                db::settings::set_last_position_ms(&self.ctx.db, self.player.position_ms()).await;
        }
        self.saver.flush().await;
        self.player.release();
    }

    // ========================
    // Public intents
    // ========================

    /// Single public entry point for "start playing this thing".
    ///
    /// Radio requests fetch their first page from the catalog before any
    /// queue mutation happens.
    pub async fn play_queue(
        self: &Arc<Self>,
        request: QueueRequest,
        play_when_ready: bool,
        replace: bool,
        is_radio: bool,
        title: Option<String>,
    ) -> Result<()> {
        let (default_title, tracks, start_index, start_shuffled) = match request {
            QueueRequest::List {
                title,
                tracks,
                start_index,
                start_shuffled,
            } => (title, tracks, start_index, start_shuffled),
            QueueRequest::Radio { seed } => {
                let page = self
                    .catalog
                    .radio_page(&seed.id)
                    .await
                    .map_err(crate::error::Error::Resolve)?;
                let mut items = vec![seed.clone()];
                items.extend(page.tracks.into_iter().filter(|t| t.id != seed.id));
                (format!("{} radio", seed.title), items, 0, false)
            }
        };
        if tracks.is_empty() {
            return Ok(());
        }

        let queue_title = title.unwrap_or(default_title);
        *self.queue_title.write().await = Some(queue_title.clone());

        {
            let mut board = self.board.lock().await;
            board.add_queue(
                &queue_title,
                tracks,
                self.player.as_ref(),
                AddQueueOptions {
                    shuffled: start_shuffled,
                    replace,
                    is_radio,
                    start_index,
                    ..Default::default()
                },
            );
            board.set_current(self.player.as_ref(), true);
            *self.queue_playlist_id.write().await =
                board.current_queue().and_then(|q| q.playlist_id.clone());
            let shuffled = board.current_shuffled();
            self.emit(RivertuneEvent::ShuffleChanged {
                shuffled,
                timestamp: chrono::Utc::now(),
            });
        }

        self.spawn_resolve_current();
        self.player.prepare();
        self.player.set_play_when_ready(play_when_ready);

        self.emit_queue_changed().await;
        self.recompute_session_layout().await;
        Ok(())
    }

    /// Insert tracks right after the currently playing item. With no
    /// active queue this starts playback of the items instead.
    pub async fn enqueue_next(self: &Arc<Self>, items: Vec<TrackMetadata>) -> Result<()> {
        let Some(first) = items.first() else {
            return Ok(());
        };
        let board_empty = { self.board.lock().await.is_empty() };
        if board_empty {
            let title = first.title.clone();
            return self
                .play_queue(
                    QueueRequest::List {
                        title,
                        tracks: items,
                        start_index: 0,
                        start_shuffled: false,
                    },
                    true,
                    false,
                    false,
                    None,
                )
                .await;
        }

        let mut board = self.board.lock().await;
        if let Some(index) = board.master_index() {
            let pos = self.player.current_index() + 1;
            board.add_songs_to_queue(index, pos, items, self.player.as_ref(), true, false);
        }
        Ok(())
    }

    /// Append tracks to the end of the current queue.
    pub async fn enqueue_end(self: &Arc<Self>, items: Vec<TrackMetadata>) {
        let mut board = self.board.lock().await;
        board.enqueue_end(items, self.player.as_ref(), false);
    }

    /// Snapshot of all queues, least- to most-recently used.
    pub async fn queues(&self) -> Vec<crate::playback::queue_board::MultiQueue> {
        self.board.lock().await.all_queues()
    }

    /// Load the queue at `index` into the player (seamlessly when its
    /// current track is already playing).
    pub async fn select_queue(self: &Arc<Self>, index: usize) -> Option<usize> {
        let pos = {
            let mut board = self.board.lock().await;
            let pos = board.set_current_queue(Some(index), self.player.as_ref(), true);
            *self.queue_title.write().await = board.current_queue().map(|q| q.title.clone());
            *self.queue_playlist_id.write().await =
                board.current_queue().and_then(|q| q.playlist_id.clone());
            let shuffled = board.current_shuffled();
            self.emit(RivertuneEvent::ShuffleChanged {
                shuffled,
                timestamp: chrono::Utc::now(),
            });
            pos
        };
        self.spawn_resolve_current();
        self.emit_queue_changed().await;
        self.recompute_session_layout().await;
        pos
    }

    /// Remove the track at `index` (traversal order) from the current
    /// queue and resync the player.
    pub async fn remove_queue_song(self: &Arc<Self>, index: usize) -> bool {
        let removed = {
            let mut board = self.board.lock().await;
            let removed = board.remove_current_queue_song(index);
            if removed {
                board.set_current(self.player.as_ref(), true);
            }
            removed
        };
        if removed {
            self.emit_queue_changed().await;
        }
        removed
    }

    /// Move a track within the current queue and resync the player.
    pub async fn move_queue_song(self: &Arc<Self>, from: usize, to: usize) {
        {
            let mut board = self.board.lock().await;
            board.move_current_queue_song(from, to);
            board.set_current(self.player.as_ref(), true);
        }
        self.emit_queue_changed().await;
    }

    /// Reorder the master queue list.
    pub async fn move_queue(self: &Arc<Self>, from: usize, to: usize) {
        self.board.lock().await.move_queue(from, to);
        self.emit_queue_changed().await;
    }

    /// Delete a queue. Deleting the current one loads whatever becomes
    /// current afterwards.
    pub async fn delete_queue(self: &Arc<Self>, index: usize) -> usize {
        let remaining = {
            let mut board = self.board.lock().await;
            let was_current = board.master_index() == Some(index);
            let remaining = board.delete_queue(index);
            if was_current {
                board.set_current(self.player.as_ref(), true);
            }
            remaining
        };
        self.emit_queue_changed().await;
        remaining
    }

    /// Toggle the liked flag of the current song; a fresh like may queue
    /// an automatic download.
    pub async fn toggle_like(self: &Arc<Self>) {
        let Some(track) = self.player.current_item() else {
            return;
        };
        let mut toggled = db::songs::toggle_liked(&self.ctx.db, &track.id).await;
        if matches!(toggled, Ok(None)) {
            // no row yet for this track
            if db::songs::upsert_track(&self.ctx.db, &track).await.is_ok() {
                toggled = db::songs::toggle_liked(&self.ctx.db, &track.id).await;
            }
        }
        match toggled {
            Ok(Some(true)) => {
                if let Ok(Some(row)) = db::songs::song(&self.ctx.db, &track.id).await {
                    self.downloads.auto_download_if_liked(&row);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("[{}] toggle like failed: {}", track.id, e),
        }
        self.recompute_session_layout().await;
    }

    /// Toggle the in-library flag of the current song.
    pub async fn toggle_library(self: &Arc<Self>) {
        let Some(track) = self.player.current_item() else {
            return;
        };
        let mut toggled = db::songs::toggle_library(&self.ctx.db, &track.id).await;
        if matches!(toggled, Ok(None)) {
            if db::songs::upsert_track(&self.ctx.db, &track).await.is_ok() {
                toggled = db::songs::toggle_library(&self.ctx.db, &track.id).await;
            }
        }
        if let Err(e) = toggled {
            warn!("[{}] toggle library failed: {}", track.id, e);
        }
    }

    /// Start a radio queue seeded from the current track.
    pub async fn toggle_start_radio(self: &Arc<Self>) {
        let Some(track) = self.player.current_item() else {
            return;
        };
        if let Err(e) = self
            .play_queue(QueueRequest::Radio { seed: track }, true, false, true, None)
            .await
        {
            warn!("Failed to start radio: {}", e);
        }
    }

    /// Toggle shuffle on the current queue and reload the player
    /// (seamlessly when the current item survives in place).
    pub async fn trigger_shuffle(self: &Arc<Self>) {
        let old_index = self.player.current_index();
        let shuffled = {
            let mut board = self.board.lock().await;
            board.set_current_pos_index(old_index);
            let Some(was_shuffled) = board.current_queue().map(|q| q.shuffled) else {
                return;
            };
            if was_shuffled {
                board.un_shuffle_current();
            } else {
                board.shuffle_current(true);
            }
            board.set_current(self.player.as_ref(), true);
            board.current_shuffled()
        };
        self.emit(RivertuneEvent::ShuffleChanged {
            shuffled,
            timestamp: chrono::Utc::now(),
        });
        self.recompute_session_layout().await;
    }

    /// Advance repeat mode through Off -> All -> One. The player reports
    /// the change back as an event, where persistence and mirrors update.
    pub fn cycle_repeat_mode(&self) {
        self.player
            .set_repeat_mode(self.player.repeat_mode().cycled());
    }

    /// Set the user volume; the effective player volume also carries the
    /// loudness-normalization factor.
    pub async fn set_player_volume(self: &Arc<Self>, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        *self.player_volume.write().await = volume;
        self.apply_volume().await;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = db::settings::set_player_volume(&this.ctx.db, volume).await;
        });
    }

    /// Drop every cached stream URL.
    pub async fn clear_stream_cache(&self) {
        self.resolver.clear().await;
    }

    // ========================
    // Player event dispatch
    // ========================

    /// The single handler for everything the player reports.
    pub async fn handle_player_event(self: &Arc<Self>, event: PlayerEvent) {
        match event {
            PlayerEvent::MediaItemTransition { index, reason } => {
                self.on_media_item_transition(index, reason).await;
            }
            PlayerEvent::PlaybackStateChanged { state } => {
                if state == PlaybackState::Idle {
                    *self.queue_title.write().await = None;
                    *self.queue_playlist_id.write().await = None;
                }
                self.emit(RivertuneEvent::PlaybackStateChanged {
                    state,
                    play_when_ready: self.player.play_when_ready(),
                    timestamp: chrono::Utc::now(),
                });
            }
            PlayerEvent::PlayWhenReadyChanged { play_when_ready } => {
                if !play_when_ready {
                    // a manual pause cancels the network wait
                    self.waiting_for_network.store(false, Ordering::SeqCst);
                }
                self.emit(RivertuneEvent::PlaybackStateChanged {
                    state: self.player.playback_state(),
                    play_when_ready,
                    timestamp: chrono::Utc::now(),
                });
            }
            PlayerEvent::TimelineChanged => {
                self.emit_queue_changed().await;
            }
            PlayerEvent::RepeatModeChanged { mode } => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let _ = db::settings::set_repeat_mode(&this.ctx.db, mode).await;
                });
                self.emit(RivertuneEvent::RepeatModeChanged {
                    mode,
                    timestamp: chrono::Utc::now(),
                });
                self.recompute_session_layout().await;
            }
            PlayerEvent::ShuffleToggleRequested => {
                self.trigger_shuffle().await;
            }
            PlayerEvent::PlayerError { code, message } => {
                self.handle_player_error(code, message).await;
            }
            PlayerEvent::PlaybackStatsReady {
                track_id,
                played_ms,
            } => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.record_playback(track_id, played_ms).await;
                });
            }
        }
    }

    async fn on_media_item_transition(self: &Arc<Self>, index: usize, reason: TransitionReason) {
        // one successful transition offsets part of the error budget
        let _ = self
            .consecutive_err
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (v > 0).then_some(v - 1)
            });

        // restart playback after an explicit seek while playing
        if self.player.is_playing() && reason == TransitionReason::Seek {
            self.player.prepare();
            self.player.play();
        }

        // fetch the next radio page when the tail runs low
        let playlist_id = {
            let board = self.board.lock().await;
            board.current_queue().and_then(|q| q.playlist_id.clone())
        };
        if self.ctx.config.auto_load_more
            && reason != TransitionReason::Repeat
            && self.player.item_count().saturating_sub(index) <= LOAD_MORE_THRESHOLD
        {
            if let Some(endpoint) = playlist_id {
                self.spawn_radio_continuation(endpoint);
            }
        }

        // shuffle + repeat-all wrapping back to the start gets a fresh pass
        let last = self.last_media_item_index.swap(index as i64, Ordering::SeqCst);
        let count = self.player.item_count();
        let shuffled = { self.board.lock().await.current_shuffled() };
        if index == 0
            && count > 1
            && last == count as i64 - 1
            && matches!(reason, TransitionReason::Auto | TransitionReason::Seek)
            && shuffled
            && self.player.repeat_mode() == RepeatMode::All
        {
            debug!("Queue wrapped under shuffle + repeat-all, reshuffling");
            let mut board = self.board.lock().await;
            board.shuffle_current(false);
            board.set_current(self.player.as_ref(), true);
        }

        // track and persist the new position
        {
            let mut board = self.board.lock().await;
            board.set_current_pos_index(self.player.current_index());
            *self.queue_title.write().await = board.current_queue().map(|q| q.title.clone());
        }

        if self.sleep_timer.take_stop_at_end() {
            info!("Sleep timer: end of track reached, pausing");
            self.player.pause();
        }

        self.spawn_resolve_current();
        self.update_normalization_for_current();
        self.recompute_session_layout().await;
        self.emit(RivertuneEvent::TrackChanged {
            track: self.player.current_item(),
            index: (self.player.item_count() > 0).then(|| self.player.current_index()),
            timestamp: chrono::Utc::now(),
        });
    }

    // ========================
    // Error recovery policy
    // ========================

    /// Deterministic per-class recovery. Lower layers never skip tracks;
    /// every decision is made here.
    pub async fn handle_player_error(self: &Arc<Self>, code: i32, message: String) {
        warn!("Player error {}: {}", code, message);

        // connectivity failures suspend playback instead of burning the
        // error budget; an external cause is not a content failure
        if !self.ctx.network_state().connected || code == CODE_NO_INTERNET {
            self.wait_on_network_error();
            return;
        }

        match code {
            CODE_AUTH_REQUIRED => {
                self.player.pause();
                self.notice(PlayerNotice::blocking(format!(
                    "Sign-in required: {message}"
                )));
            }
            CODE_STREAM_EXPIRED => {
                if let Some(track) = self.player.current_item() {
                    let errs = self.consecutive_err.load(Ordering::SeqCst);
                    if errs < MAX_CONSECUTIVE_ERR {
                        let attempt = self.consecutive_err.fetch_add(1, Ordering::SeqCst) + 1;
                        self.notice(PlayerNotice::transient(format!(
                            "Stream expired. Refreshing... ({attempt}/{MAX_CONSECUTIVE_ERR})"
                        )));
                        let position_ms = self.player.position_ms();
                        let was_playing = self.player.is_playing();
                        self.resolver.invalidate(&track.id).await;
                        self.spawn_stream_refresh(track, position_ms, was_playing);
                    } else {
                        self.consecutive_err.store(0, Ordering::SeqCst);
                        self.notice(PlayerNotice::transient(
                            "Unable to refresh stream. Skipping...",
                        ));
                        if self.ctx.config.skip_on_error {
                            self.skip_on_error();
                        } else {
                            self.stop_on_error();
                        }
                    }
                }
            }
            CODE_TIMEOUT => {
                self.notice(PlayerNotice::transient(
                    "Connection timeout. Please check your internet connection.",
                ));
            }
            _ => {
                if self.ctx.config.skip_on_error {
                    self.skip_on_error();
                } else {
                    self.stop_on_error();
                }
                self.notice(PlayerNotice::transient(format!(
                    "Error: {message} ({code})"
                )));
            }
        }

        self.emit(RivertuneEvent::PlayerErrorChanged {
            code: Some(code),
            message: Some(message),
            timestamp: chrono::Utc::now(),
        });
    }

    /// Suspend playback until connectivity returns.
    fn wait_on_network_error(&self) {
        self.waiting_for_network.store(true, Ordering::SeqCst);
        self.notice(PlayerNotice::transient(
            "No connection. Waiting to reconnect...",
        ));
        self.emit(RivertuneEvent::WaitingForNetwork {
            waiting: true,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Advance past a failing item, unless errors are piling up too fast.
    ///
    /// The budget moves +2 per error and -1 per successful transition, so
    /// one success roughly offsets two failures; past the budget playback
    /// pauses rather than cycling through the whole queue on a systemic
    /// fault.
    fn skip_on_error(&self) {
        let errs = self.consecutive_err.fetch_add(2, Ordering::SeqCst) + 2;
        if errs <= MAX_CONSECUTIVE_ERR {
            if let Some(next) = self.player.next_index() {
                self.player.seek_to(next, None);
                self.player.prepare();
                self.player.play();
                self.notice(PlayerNotice::transient("Playback error. Playing next."));
                return;
            }
        }
        self.player.pause();
        self.notice(PlayerNotice::blocking(
            "Too many playback errors. Stopping playback.",
        ));
        self.consecutive_err.store(0, Ordering::SeqCst);
    }

    fn stop_on_error(&self) {
        self.player.pause();
        self.notice(PlayerNotice::blocking("Playback error. Stopped."));
    }

    /// Connectivity changes from the platform observer.
    pub async fn on_network_changed(self: &Arc<Self>, state: NetworkState) {
        if state.connected && self.waiting_for_network.swap(false, Ordering::SeqCst) {
            info!("Connectivity restored, resuming playback");
            self.player.prepare();
            self.player.play();
            self.emit(RivertuneEvent::WaitingForNetwork {
                waiting: false,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    // ========================
    // Background work
    // ========================

    /// Resolve the current item's stream off the main flow; the result is
    /// discarded if the active track changed while it was in flight.
    fn spawn_resolve_current(self: &Arc<Self>) {
        let Some(track) = self.player.current_item() else {
            return;
        };
        if track.is_local {
            // local tracks play from disk and never touch the resolver
            return;
        }
        let generation = self.resolve_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let network = this.ctx.network_state();
            match this.resolver.resolve(&track, network).await {
                Ok(stream) => {
                    if this.resolve_generation.load(Ordering::SeqCst) != generation {
                        return; // superseded
                    }
                    if this.player.current_item().map(|t| t.id) != Some(track.id.clone()) {
                        return; // track changed while resolving
                    }
                    this.player.set_stream_url(&track.id, &stream.url);
                }
                Err(err) => {
                    if this.resolve_generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    this.handle_player_error(err.error_code(), err.to_string()).await;
                }
            }
        });
    }

    /// In-place stream refresh preserving position and play intent.
    fn spawn_stream_refresh(self: &Arc<Self>, track: TrackMetadata, position_ms: u64, was_playing: bool) {
        let generation = self.resolve_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let network = this.ctx.network_state();
            match this.resolver.resolve(&track, network).await {
                Ok(stream) => {
                    if this.resolve_generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    if this.player.current_item().map(|t| t.id) != Some(track.id.clone()) {
                        return;
                    }
                    this.player.set_stream_url(&track.id, &stream.url);
                    this.player
                        .seek_to(this.player.current_index(), Some(position_ms));
                    this.player.prepare();
                    if was_playing {
                        this.player.play();
                    }
                }
                Err(err) => {
                    if this.resolve_generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    this.handle_player_error(err.error_code(), err.to_string()).await;
                }
            }
        });
    }

    fn spawn_radio_continuation(self: &Arc<Self>, endpoint: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.catalog.radio_page(&endpoint).await {
                Ok(page) if page.tracks.len() > 1 => {
                    if this.player.playback_state() == PlaybackState::Idle {
                        return;
                    }
                    // the first item repeats the continuation seed
                    let items: Vec<TrackMetadata> = page.tracks.into_iter().skip(1).collect();
                    debug!("Radio continuation: appending {} track(s)", items.len());
                    let mut board = this.board.lock().await;
                    board.enqueue_end(items, this.player.as_ref(), true);
                }
                Ok(_) => {}
                Err(e) => debug!("Radio continuation failed: {}", e),
            }
        });
    }

    /// Playback accounting once an item was left: a play counts when the
    /// played fraction clears the configured threshold.
    async fn record_playback(self: &Arc<Self>, track_id: String, played_ms: u64) {
        let config = &self.ctx.config;
        let row = match db::songs::song(&self.ctx.db, &track_id).await {
            Ok(Some(row)) => row,
            _ => return,
        };
        let duration_ms = row.duration_secs.saturating_mul(1000);
        if duration_ms <= 0 {
            return;
        }
        let fraction = played_ms as f64 / duration_ms as f64;
        if fraction < config.effective_min_playback_fraction() as f64 {
            return;
        }

        if config.record_history {
            let now = chrono::Utc::now();
            if let Err(e) = db::songs::increment_play_count(&self.ctx.db, &track_id).await {
                warn!("[{}] play count update failed: {}", track_id, e);
            }
            let _ = db::songs::increment_total_play_time(&self.ctx.db, &track_id, played_ms as i64)
                .await;
            let _ =
                db::songs::insert_playback_event(&self.ctx.db, &track_id, now, played_ms as i64)
                    .await;
        }

        if !row.is_local && config.record_remote_history {
            if let Ok(Some(format)) = db::formats::format(&self.ctx.db, &track_id).await {
                if let Some(url) = format.playback_tracking_url {
                    if let Err(e) = self.catalog.register_playback(&url).await {
                        warn!("[{}] remote playback registration failed: {}", track_id, e);
                    }
                }
            }
        }
    }

    fn update_normalization_for_current(self: &Arc<Self>) {
        let Some(track) = self.player.current_item() else {
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let factor = if this.ctx.config.audio_normalization {
                match db::formats::format(&this.ctx.db, &track.id).await {
                    Ok(Some(format)) => format
                        .loudness_db
                        .map(|db| 10f32.powf(-(db as f32) / 20.0).min(1.0))
                        .unwrap_or(1.0),
                    _ => 1.0,
                }
            } else {
                1.0
            };
            *this.normalize_factor.write().await = factor;
            this.apply_volume().await;
        });
    }

    async fn apply_volume(&self) {
        let volume = *self.player_volume.read().await;
        let factor = *self.normalize_factor.read().await;
        self.player.set_volume(volume * factor);
    }

    // ========================
    // Mirrors and accessors
    // ========================

    /// Recompute the media-session command affordances from current truth.
    pub async fn recompute_session_layout(&self) {
        let current = self.player.current_item();
        let liked = match &current {
            Some(track) => db::songs::song(&self.ctx.db, &track.id)
                .await
                .ok()
                .flatten()
                .map(|row| row.liked),
            None => None,
        };
        let shuffled = { self.board.lock().await.current_shuffled() };
        let layout =
            SessionLayout::compute(shuffled, self.player.repeat_mode(), liked, current.is_some());
        self.layout_tx.send_replace(layout);
    }

    pub fn session_layout(&self) -> watch::Receiver<SessionLayout> {
        self.layout_tx.subscribe()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn player(&self) -> &Arc<dyn MediaPlayer> {
        &self.player
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub fn sleep_timer(&self) -> &SleepTimer {
        &self.sleep_timer
    }

    pub fn is_waiting_for_network(&self) -> bool {
        self.waiting_for_network.load(Ordering::SeqCst)
    }

    pub async fn queue_title(&self) -> Option<String> {
        self.queue_title.read().await.clone()
    }

    pub async fn queue_playlist_id(&self) -> Option<String> {
        self.queue_playlist_id.read().await.clone()
    }

    /// Current queue's shuffle state, for observers.
    pub async fn current_shuffled(&self) -> bool {
        self.board.lock().await.current_shuffled()
    }

    #[cfg(test)]
    pub(crate) fn consecutive_errors(&self) -> i64 {
        self.consecutive_err.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn resolver(&self) -> &Arc<StreamResolver> {
        &self.resolver
    }

    fn notice(&self, notice: PlayerNotice) {
        info!("Notice ({:?}): {}", notice.kind, notice.message);
        self.emit(RivertuneEvent::Notice {
            notice,
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit(&self, event: RivertuneEvent) {
        self.ctx.events.emit(event);
    }

    async fn emit_queue_changed(&self) {
        self.emit(RivertuneEvent::QueueChanged {
            title: self.queue_title.read().await.clone(),
            playlist_id: self.queue_playlist_id.read().await.clone(),
            timestamp: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::playback::player::{PlayerOp, StubPlayer};
    use async_trait::async_trait;
    use rivertune_common::error::{ResolveError, CODE_REMOTE_ERROR};
    use rivertune_common::model::{AudioConfig, AudioQuality, PlaybackData, RadioPage, StreamFormat};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct TestCatalog {
        playback_calls: AtomicUsize,
        radio_calls: AtomicUsize,
    }

    impl TestCatalog {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                playback_calls: AtomicUsize::new(0),
                radio_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CatalogClient for TestCatalog {
        async fn playback_data(
            &self,
            track_id: &str,
            _quality: AudioQuality,
            _metered: bool,
        ) -> std::result::Result<PlaybackData, ResolveError> {
            let n = self.playback_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(PlaybackData {
                stream_url: format!("https://streams.example/{track_id}/{n}"),
                expires_in_seconds: 21540,
                format: StreamFormat {
                    itag: 251,
                    mime_type: "audio/webm; codecs=\"opus\"".to_string(),
                    bitrate: 141_000,
                    audio_sample_rate: Some(48_000),
                    content_length: Some(1_000_000),
                },
                audio_config: Some(AudioConfig { loudness_db: None }),
                playback_tracking_url: None,
            })
        }

        async fn radio_page(
            &self,
            endpoint: &str,
        ) -> std::result::Result<RadioPage, ResolveError> {
            self.radio_calls.fetch_add(1, Ordering::SeqCst);
            let base = format!("{endpoint}-c");
            Ok(RadioPage {
                tracks: vec![
                    TrackMetadata::new(endpoint, "seed"),
                    TrackMetadata::new(format!("{base}1"), "c1"),
                    TrackMetadata::new(format!("{base}2"), "c2"),
                ],
                continuation: None,
            })
        }

        async fn track_details(
            &self,
            _track_id: &str,
        ) -> std::result::Result<Option<TrackMetadata>, ResolveError> {
            Ok(None)
        }

        async fn register_playback(&self, _url: &str) -> std::result::Result<(), ResolveError> {
            Ok(())
        }
    }

    struct Harness {
        orchestrator: Arc<PlaybackOrchestrator>,
        stub: Arc<StubPlayer>,
        catalog: Arc<TestCatalog>,
        _player_events: mpsc::UnboundedReceiver<PlayerEvent>,
        _network_tx: watch::Sender<NetworkState>,
    }

    async fn harness() -> Harness {
        harness_with(Config::default()).await
    }

    async fn harness_with(config: Config) -> Harness {
        let pool = db::init::memory().await.unwrap();
        let (ctx, network_tx) = SessionContext::new(config, pool);
        let (stub, player_events) = StubPlayer::new();
        let stub = Arc::new(stub);
        let player: Arc<dyn MediaPlayer> = Arc::clone(&stub) as Arc<dyn MediaPlayer>;
        let catalog = TestCatalog::new();
        let orchestrator = PlaybackOrchestrator::new(ctx, player, catalog.clone());
        Harness {
            orchestrator,
            stub,
            catalog,
            _player_events: player_events,
            _network_tx: network_tx,
        }
    }

    fn tracks(ids: &[&str]) -> Vec<TrackMetadata> {
        ids.iter()
            .map(|id| {
                let mut t = TrackMetadata::new(*id, *id);
                t.duration_secs = 200;
                t
            })
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn play_queue_loads_player_and_resolves_stream() {
        let h = harness().await;
        h.orchestrator
            .play_queue(
                QueueRequest::List {
                    title: "Mix".to_string(),
                    tracks: tracks(&["t1", "t2"]),
                    start_index: 0,
                    start_shuffled: false,
                },
                true,
                false,
                false,
                None,
            )
            .await
            .unwrap();

        assert_eq!(h.stub.item_count(), 2);
        assert!(h.stub.play_when_ready());
        assert_eq!(h.orchestrator.queue_title().await.as_deref(), Some("Mix"));

        settle().await;
        assert!(h.stub.stream_url("t1").is_some(), "current item resolved");
        assert_eq!(h.catalog.playback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_stream_refreshes_three_times_then_skips() {
        let h = harness().await;
        h.orchestrator
            .play_queue(
                QueueRequest::List {
                    title: "Mix".to_string(),
                    tracks: tracks(&["t1", "t2"]),
                    start_index: 0,
                    start_shuffled: false,
                },
                true,
                false,
                false,
                None,
            )
            .await
            .unwrap();
        settle().await;
        assert_eq!(h.catalog.playback_calls.load(Ordering::SeqCst), 1);
        h.stub.set_position_ms(42_000);

        // three in-place refresh attempts
        for attempt in 1..=3 {
            h.orchestrator
                .handle_player_error(CODE_STREAM_EXPIRED, "expired".to_string())
                .await;
            settle().await;
            assert_eq!(
                h.catalog.playback_calls.load(Ordering::SeqCst),
                1 + attempt,
                "refresh {attempt} re-resolves"
            );
            assert_eq!(h.stub.current_index(), 0, "refresh stays on the item");
            assert_eq!(h.stub.position_ms(), 42_000, "position preserved");
        }
        assert_eq!(h.orchestrator.consecutive_errors(), 3);

        // the fourth failure falls through to skip policy
        h.orchestrator
            .handle_player_error(CODE_STREAM_EXPIRED, "expired".to_string())
            .await;
        settle().await;
        assert_eq!(h.stub.current_index(), 1, "skipped to the next item");
        assert_eq!(
            h.catalog.playback_calls.load(Ordering::SeqCst),
            4,
            "no further refresh after the budget"
        );
    }

    #[tokio::test]
    async fn network_failure_waits_without_burning_error_budget() {
        let h = harness().await;
        h.orchestrator
            .play_queue(
                QueueRequest::List {
                    title: "Mix".to_string(),
                    tracks: tracks(&["t1"]),
                    start_index: 0,
                    start_shuffled: false,
                },
                true,
                false,
                false,
                None,
            )
            .await
            .unwrap();
        settle().await;

        h.orchestrator
            .handle_player_error(CODE_NO_INTERNET, "connection failed".to_string())
            .await;
        assert!(h.orchestrator.is_waiting_for_network());
        assert_eq!(h.orchestrator.consecutive_errors(), 0);

        h.stub.take_ops();
        h.orchestrator
            .on_network_changed(NetworkState {
                connected: true,
                metered: false,
            })
            .await;
        assert!(!h.orchestrator.is_waiting_for_network());
        let ops = h.stub.take_ops();
        assert!(ops.contains(&PlayerOp::Prepare));
        assert!(ops.contains(&PlayerOp::Play));
    }

    #[tokio::test]
    async fn runaway_errors_stop_playback() {
        let h = harness().await;
        h.orchestrator
            .play_queue(
                QueueRequest::List {
                    title: "Mix".to_string(),
                    tracks: tracks(&["t1", "t2", "t3"]),
                    start_index: 0,
                    start_shuffled: false,
                },
                true,
                false,
                false,
                None,
            )
            .await
            .unwrap();
        settle().await;

        // first unclassified error: budget goes to 2, skip to next
        h.orchestrator
            .handle_player_error(CODE_REMOTE_ERROR, "boom".to_string())
            .await;
        assert_eq!(h.stub.current_index(), 1);
        assert!(h.stub.play_when_ready());

        // second error with no successful transition: budget hits 4, stop
        h.orchestrator
            .handle_player_error(CODE_REMOTE_ERROR, "boom".to_string())
            .await;
        assert!(!h.stub.play_when_ready(), "runaway guard pauses playback");
        assert_eq!(h.orchestrator.consecutive_errors(), 0, "budget resets");
    }

    #[tokio::test]
    async fn auth_error_pauses_without_retry() {
        let h = harness().await;
        h.orchestrator
            .play_queue(
                QueueRequest::List {
                    title: "Mix".to_string(),
                    tracks: tracks(&["t1", "t2"]),
                    start_index: 0,
                    start_shuffled: false,
                },
                true,
                false,
                false,
                None,
            )
            .await
            .unwrap();
        settle().await;
        let calls = h.catalog.playback_calls.load(Ordering::SeqCst);

        h.orchestrator
            .handle_player_error(CODE_AUTH_REQUIRED, "premium".to_string())
            .await;
        settle().await;
        assert!(!h.stub.play_when_ready());
        assert_eq!(h.stub.current_index(), 0, "no skip on auth errors");
        assert_eq!(
            h.catalog.playback_calls.load(Ordering::SeqCst),
            calls,
            "no auto-retry on auth errors"
        );
    }

    #[tokio::test]
    async fn radio_queue_fetches_continuation_near_tail() {
        let h = harness().await;
        let mut seed = TrackMetadata::new("seed", "Seed Song");
        seed.duration_secs = 180;
        h.orchestrator
            .play_queue(QueueRequest::Radio { seed }, true, false, true, None)
            .await
            .unwrap();
        settle().await;
        // seed + two continuation tracks
        assert_eq!(h.stub.item_count(), 3);
        assert_eq!(h.catalog.radio_calls.load(Ordering::SeqCst), 1);

        // run near the tail; the next page gets appended
        h.stub.seek_to(1, None);
        h.orchestrator
            .handle_player_event(PlayerEvent::MediaItemTransition {
                index: 1,
                reason: TransitionReason::Auto,
            })
            .await;
        settle().await;
        assert_eq!(h.catalog.radio_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.stub.item_count(), 5, "two more tracks appended");
    }

    #[tokio::test]
    async fn trigger_shuffle_round_trips() {
        let h = harness().await;
        h.orchestrator
            .play_queue(
                QueueRequest::List {
                    title: "Mix".to_string(),
                    tracks: tracks(&["t1", "t2", "t3", "t4"]),
                    start_index: 0,
                    start_shuffled: false,
                },
                true,
                false,
                false,
                None,
            )
            .await
            .unwrap();
        settle().await;

        h.orchestrator.trigger_shuffle().await;
        assert!(h.orchestrator.current_shuffled().await);
        assert_eq!(h.stub.current_item().unwrap().id, "t1", "current track survives shuffle");

        h.orchestrator.trigger_shuffle().await;
        assert!(!h.orchestrator.current_shuffled().await);
        assert_eq!(h.stub.item_count(), 4);
    }

    #[tokio::test]
    async fn successful_transition_offsets_error_budget() {
        let h = harness().await;
        h.orchestrator
            .play_queue(
                QueueRequest::List {
                    title: "Mix".to_string(),
                    tracks: tracks(&["t1", "t2", "t3"]),
                    start_index: 0,
                    start_shuffled: false,
                },
                true,
                false,
                false,
                None,
            )
            .await
            .unwrap();
        settle().await;

        h.orchestrator
            .handle_player_error(CODE_REMOTE_ERROR, "boom".to_string())
            .await;
        assert_eq!(h.orchestrator.consecutive_errors(), 2);

        h.orchestrator
            .handle_player_event(PlayerEvent::MediaItemTransition {
                index: 1,
                reason: TransitionReason::Auto,
            })
            .await;
        assert_eq!(h.orchestrator.consecutive_errors(), 1);
    }

    #[tokio::test]
    async fn playback_accounting_counts_qualifying_plays() {
        let h = harness().await;
        h.orchestrator
            .play_queue(
                QueueRequest::List {
                    title: "Mix".to_string(),
                    tracks: tracks(&["t1", "t2"]),
                    start_index: 0,
                    start_shuffled: false,
                },
                true,
                false,
                false,
                None,
            )
            .await
            .unwrap();
        settle().await; // resolver backfills the song row

        // 30s of a 200s track: below the 0.3 threshold
        h.orchestrator
            .handle_player_event(PlayerEvent::PlaybackStatsReady {
                track_id: "t1".to_string(),
                played_ms: 30_000,
            })
            .await;
        settle().await;
        let row = db::songs::song(&h.orchestrator.ctx.db, "t1").await.unwrap().unwrap();
        assert_eq!(row.play_count, 0);

        // 120s of 200s: counts
        h.orchestrator
            .handle_player_event(PlayerEvent::PlaybackStatsReady {
                track_id: "t1".to_string(),
                played_ms: 120_000,
            })
            .await;
        settle().await;
        let row = db::songs::song(&h.orchestrator.ctx.db, "t1").await.unwrap().unwrap();
        assert_eq!(row.play_count, 1);
        assert_eq!(row.total_play_time_ms, 120_000);
    }

    #[tokio::test]
    async fn repeat_mode_change_is_persisted() {
        let h = harness().await;
        h.orchestrator.cycle_repeat_mode();
        // the player reports the change back as an event
        h.orchestrator
            .handle_player_event(PlayerEvent::RepeatModeChanged {
                mode: RepeatMode::All,
            })
            .await;
        settle().await;
        let stored = db::settings::repeat_mode(&h.orchestrator.ctx.db).await.unwrap();
        assert_eq!(stored, RepeatMode::All);
    }

    #[tokio::test]
    async fn shuffle_repeat_all_wraparound_reshuffles() {
        let h = harness().await;
        h.orchestrator
            .play_queue(
                QueueRequest::List {
                    title: "Mix".to_string(),
                    tracks: tracks(&["t1", "t2", "t3"]),
                    start_index: 0,
                    start_shuffled: true,
                },
                true,
                false,
                false,
                None,
            )
            .await
            .unwrap();
        settle().await;
        h.stub.set_repeat_mode(RepeatMode::All);

        // simulate reaching the last item, then wrapping to the first
        h.orchestrator
            .handle_player_event(PlayerEvent::MediaItemTransition {
                index: 2,
                reason: TransitionReason::Auto,
            })
            .await;
        let board_calls_before = h.catalog.radio_calls.load(Ordering::SeqCst);
        h.orchestrator
            .handle_player_event(PlayerEvent::MediaItemTransition {
                index: 0,
                reason: TransitionReason::Auto,
            })
            .await;
        settle().await;

        // still shuffled with a dense permutation, playback uninterrupted
        assert!(h.orchestrator.current_shuffled().await);
        assert_eq!(h.stub.item_count(), 3);
        assert_eq!(board_calls_before, h.catalog.radio_calls.load(Ordering::SeqCst));
    }
}
