//! Read-mostly observer facade for UI and control surfaces.
//!
//! Converts orchestrator/player state into observable values (tokio watch
//! channels) recomputed on every relevant event, and forwards write intents
//! straight to the orchestrator. It keeps no independent state, so it can
//! never diverge from the orchestrator's truth.

use std::sync::Arc;

use rivertune_common::events::{PlaybackState, RepeatMode, RivertuneEvent};
use rivertune_common::model::{FormatInfo, TrackMetadata};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::db::{self, SongRow};
use crate::error::Result;
use crate::lyrics::LyricsProvider;
use crate::playback::orchestrator::{PlaybackOrchestrator, QueueRequest};
use crate::playback::player::MediaPlayer;

struct Observables {
    playback_state: watch::Sender<PlaybackState>,
    is_playing: watch::Sender<bool>,
    waiting_for_network: watch::Sender<bool>,
    current_track: watch::Sender<Option<TrackMetadata>>,
    current_song: watch::Sender<Option<SongRow>>,
    current_format: watch::Sender<Option<FormatInfo>>,
    current_lyrics: watch::Sender<Option<String>>,
    queue_title: watch::Sender<Option<String>>,
    repeat_mode: watch::Sender<RepeatMode>,
    shuffle_enabled: watch::Sender<bool>,
    can_skip_previous: watch::Sender<bool>,
    can_skip_next: watch::Sender<bool>,
    error: watch::Sender<Option<(i32, String)>>,
}

/// Observer facade over the orchestrator and its player.
pub struct PlayerConnection {
    orchestrator: Arc<PlaybackOrchestrator>,
    playback_state: watch::Receiver<PlaybackState>,
    is_playing: watch::Receiver<bool>,
    waiting_for_network: watch::Receiver<bool>,
    current_track: watch::Receiver<Option<TrackMetadata>>,
    current_song: watch::Receiver<Option<SongRow>>,
    current_format: watch::Receiver<Option<FormatInfo>>,
    current_lyrics: watch::Receiver<Option<String>>,
    queue_title: watch::Receiver<Option<String>>,
    repeat_mode: watch::Receiver<RepeatMode>,
    shuffle_enabled: watch::Receiver<bool>,
    can_skip_previous: watch::Receiver<bool>,
    can_skip_next: watch::Receiver<bool>,
    error: watch::Receiver<Option<(i32, String)>>,
    task: JoinHandle<()>,
}

impl PlayerConnection {
    pub fn new(
        orchestrator: Arc<PlaybackOrchestrator>,
        lyrics: Option<Arc<dyn LyricsProvider>>,
    ) -> Self {
        let player = Arc::clone(orchestrator.player());
        let (prev, next) = skip_flags(player.as_ref());

        let (playback_state_tx, playback_state) = watch::channel(player.playback_state());
        let (is_playing_tx, is_playing) = watch::channel(player.is_playing());
        let (waiting_tx, waiting_for_network) =
            watch::channel(orchestrator.is_waiting_for_network());
        let (current_track_tx, current_track) = watch::channel(player.current_item());
        let (current_song_tx, current_song) = watch::channel(None);
        let (current_format_tx, current_format) = watch::channel(None);
        let (current_lyrics_tx, current_lyrics) = watch::channel(None);
        let (queue_title_tx, queue_title) = watch::channel(None);
        let (repeat_mode_tx, repeat_mode) = watch::channel(player.repeat_mode());
        let (shuffle_tx, shuffle_enabled) = watch::channel(false);
        let (can_prev_tx, can_skip_previous) = watch::channel(prev);
        let (can_next_tx, can_skip_next) = watch::channel(next);
        let (error_tx, error) = watch::channel(None);

        let observables = Observables {
            playback_state: playback_state_tx,
            is_playing: is_playing_tx,
            waiting_for_network: waiting_tx,
            current_track: current_track_tx,
            current_song: current_song_tx,
            current_format: current_format_tx,
            current_lyrics: current_lyrics_tx,
            queue_title: queue_title_tx,
            repeat_mode: repeat_mode_tx,
            shuffle_enabled: shuffle_tx,
            can_skip_previous: can_prev_tx,
            can_skip_next: can_next_tx,
            error: error_tx,
        };

        let events = orchestrator.context().events.subscribe();
        let task = tokio::spawn(observe(
            Arc::clone(&orchestrator),
            player,
            lyrics,
            events,
            observables,
        ));

        Self {
            orchestrator,
            playback_state,
            is_playing,
            waiting_for_network,
            current_track,
            current_song,
            current_format,
            current_lyrics,
            queue_title,
            repeat_mode,
            shuffle_enabled,
            can_skip_previous,
            can_skip_next,
            error,
            task,
        }
    }

    // ========================
    // Observables
    // ========================

    pub fn playback_state(&self) -> watch::Receiver<PlaybackState> {
        self.playback_state.clone()
    }

    pub fn is_playing(&self) -> watch::Receiver<bool> {
        self.is_playing.clone()
    }

    pub fn waiting_for_network(&self) -> watch::Receiver<bool> {
        self.waiting_for_network.clone()
    }

    pub fn current_track(&self) -> watch::Receiver<Option<TrackMetadata>> {
        self.current_track.clone()
    }

    pub fn current_song(&self) -> watch::Receiver<Option<SongRow>> {
        self.current_song.clone()
    }

    pub fn current_format(&self) -> watch::Receiver<Option<FormatInfo>> {
        self.current_format.clone()
    }

    pub fn current_lyrics(&self) -> watch::Receiver<Option<String>> {
        self.current_lyrics.clone()
    }

    pub fn queue_title(&self) -> watch::Receiver<Option<String>> {
        self.queue_title.clone()
    }

    pub fn repeat_mode(&self) -> watch::Receiver<RepeatMode> {
        self.repeat_mode.clone()
    }

    pub fn shuffle_enabled(&self) -> watch::Receiver<bool> {
        self.shuffle_enabled.clone()
    }

    pub fn can_skip_previous(&self) -> watch::Receiver<bool> {
        self.can_skip_previous.clone()
    }

    pub fn can_skip_next(&self) -> watch::Receiver<bool> {
        self.can_skip_next.clone()
    }

    pub fn player_error(&self) -> watch::Receiver<Option<(i32, String)>> {
        self.error.clone()
    }

    /// Raw event stream, for surfaces that want notices and fine-grained
    /// updates.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RivertuneEvent> {
        self.orchestrator.context().events.subscribe()
    }

    /// Direct player access for transport control (play/pause/seek).
    pub fn player(&self) -> &Arc<dyn MediaPlayer> {
        self.orchestrator.player()
    }

    // ========================
    // Forwarded intents
    // ========================

    pub async fn play_queue(
        &self,
        request: QueueRequest,
        replace: bool,
        is_radio: bool,
        title: Option<String>,
    ) -> Result<()> {
        self.orchestrator
            .play_queue(request, true, replace, is_radio, title)
            .await
    }

    /// Add items right after the currently playing one.
    pub async fn enqueue_next(&self, items: Vec<TrackMetadata>) -> Result<()> {
        self.orchestrator.enqueue_next(items).await
    }

    /// Add items to the end of the current queue.
    pub async fn enqueue_end(&self, items: Vec<TrackMetadata>) {
        self.orchestrator.enqueue_end(items).await;
    }

    pub async fn toggle_like(&self) {
        self.orchestrator.toggle_like().await;
    }

    pub async fn toggle_library(&self) {
        self.orchestrator.toggle_library().await;
    }

    pub async fn trigger_shuffle(&self) {
        self.orchestrator.trigger_shuffle().await;
    }

    /// Detach the observer task. Dropping the connection does the same.
    pub fn dispose(self) {}
}

impl Drop for PlayerConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn skip_flags(player: &dyn MediaPlayer) -> (bool, bool) {
    if player.item_count() == 0 {
        return (false, false);
    }
    // previous always works on a non-empty playlist (restart or step back)
    (true, player.next_index().is_some())
}

async fn observe(
    orchestrator: Arc<PlaybackOrchestrator>,
    player: Arc<dyn MediaPlayer>,
    lyrics: Option<Arc<dyn LyricsProvider>>,
    mut events: broadcast::Receiver<RivertuneEvent>,
    obs: Observables,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                apply_event(&orchestrator, player.as_ref(), lyrics.as_deref(), &obs, event).await;
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!("Observer lagged {} events, resyncing from player", missed);
                refresh_track(&orchestrator, player.current_item(), lyrics.as_deref(), &obs).await;
                obs.playback_state.send_replace(player.playback_state());
                obs.is_playing.send_replace(player.is_playing());
                obs.repeat_mode.send_replace(player.repeat_mode());
                let (prev, next) = skip_flags(player.as_ref());
                obs.can_skip_previous.send_replace(prev);
                obs.can_skip_next.send_replace(next);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn apply_event(
    orchestrator: &Arc<PlaybackOrchestrator>,
    player: &dyn MediaPlayer,
    lyrics: Option<&dyn LyricsProvider>,
    obs: &Observables,
    event: RivertuneEvent,
) {
    match event {
        RivertuneEvent::PlaybackStateChanged {
            state,
            play_when_ready,
            ..
        } => {
            obs.playback_state.send_replace(state);
            obs.is_playing
                .send_replace(play_when_ready && state != PlaybackState::Ended);
        }
        RivertuneEvent::TrackChanged { track, .. } => {
            refresh_track(orchestrator, track, lyrics, obs).await;
            let (prev, next) = skip_flags(player);
            obs.can_skip_previous.send_replace(prev);
            obs.can_skip_next.send_replace(next);
        }
        RivertuneEvent::QueueChanged { title, .. } => {
            obs.queue_title.send_replace(title);
            // playlist edits can change the current item without a
            // transition event
            let current = player.current_item();
            let changed = {
                let shown = obs.current_track.borrow();
                current.as_ref().map(|t| &t.id) != shown.as_ref().map(|t| &t.id)
            };
            if changed {
                refresh_track(orchestrator, current, lyrics, obs).await;
            }
            let (prev, next) = skip_flags(player);
            obs.can_skip_previous.send_replace(prev);
            obs.can_skip_next.send_replace(next);
        }
        RivertuneEvent::ShuffleChanged { shuffled, .. } => {
            obs.shuffle_enabled.send_replace(shuffled);
        }
        RivertuneEvent::RepeatModeChanged { mode, .. } => {
            obs.repeat_mode.send_replace(mode);
            let (prev, next) = skip_flags(player);
            obs.can_skip_previous.send_replace(prev);
            obs.can_skip_next.send_replace(next);
        }
        RivertuneEvent::WaitingForNetwork { waiting, .. } => {
            obs.waiting_for_network.send_replace(waiting);
        }
        RivertuneEvent::PlayerErrorChanged { code, message, .. } => {
            obs.error.send_replace(match (code, message) {
                (Some(code), Some(message)) => Some((code, message)),
                _ => None,
            });
        }
        RivertuneEvent::Notice { .. } => {}
    }
}

/// Recompute the track-derived observables: song row, format, lyrics.
async fn refresh_track(
    orchestrator: &Arc<PlaybackOrchestrator>,
    track: Option<TrackMetadata>,
    lyrics: Option<&dyn LyricsProvider>,
    obs: &Observables,
) {
    let db = &orchestrator.context().db;
    let (song, format, words) = match &track {
        Some(track) => {
            let song = db::songs::song(db, &track.id).await.unwrap_or(None);
            let format = db::formats::format(db, &track.id).await.unwrap_or(None);
            let words = match lyrics {
                Some(provider) => provider.lyrics(track).await,
                None => None,
            };
            (song, format, words)
        }
        None => (None, None, None),
    };
    obs.current_track.send_replace(track);
    obs.current_song.send_replace(song);
    obs.current_format.send_replace(format);
    obs.current_lyrics.send_replace(words);
}
