//! Sleep timer: pause after a duration or at the end of the current track.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::playback::player::MediaPlayer;

pub struct SleepTimer {
    player: Arc<dyn MediaPlayer>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stop_at_end: AtomicBool,
}

impl SleepTimer {
    pub fn new(player: Arc<dyn MediaPlayer>) -> Self {
        Self {
            player,
            handle: Mutex::new(None),
            stop_at_end: AtomicBool::new(false),
        }
    }

    /// Pause playback after `duration`. Restarting replaces any running
    /// timer.
    pub fn start(&self, duration: Duration) {
        info!("Sleep timer set for {:?}", duration);
        self.clear();
        let player = Arc::clone(&self.player);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            info!("Sleep timer elapsed, pausing playback");
            player.pause();
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Pause when the current track finishes instead of after a duration.
    pub fn stop_at_end_of_track(&self) {
        self.clear();
        self.stop_at_end.store(true, Ordering::SeqCst);
    }

    /// Cancel the timer and the end-of-track stop.
    pub fn clear(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
        self.stop_at_end.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.stop_at_end.load(Ordering::SeqCst)
            || self
                .handle
                .lock()
                .unwrap()
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    /// Consume the end-of-track stop request, if armed. Called by the
    /// orchestrator on every media-item transition.
    pub(crate) fn take_stop_at_end(&self) -> bool {
        self.stop_at_end.swap(false, Ordering::SeqCst)
    }
}
