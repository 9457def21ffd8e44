//! Session context threaded through all playback components.
//!
//! Constructed once at session start. Replaces ambient globals: every
//! component that needs config, the database, the event bus or network
//! state receives this context explicitly.

use std::sync::Arc;

use rivertune_common::events::EventBus;
use sqlx::{Pool, Sqlite};
use tokio::sync::watch;

use crate::config::Config;

/// Connectivity snapshot fed in by the platform's network observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkState {
    pub connected: bool,
    /// Metered connections prefer low quality in Auto mode and block
    /// wifi-only auto-downloads.
    pub metered: bool,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            connected: true,
            metered: false,
        }
    }
}

/// Shared session state handed to every playback component.
pub struct SessionContext {
    pub config: Config,
    pub db: Pool<Sqlite>,
    pub events: EventBus,
    pub network: watch::Receiver<NetworkState>,
}

impl SessionContext {
    /// Build a context. Returns the connectivity sender so the embedder's
    /// network observer can push updates.
    pub fn new(config: Config, db: Pool<Sqlite>) -> (Arc<Self>, watch::Sender<NetworkState>) {
        let (network_tx, network_rx) = watch::channel(NetworkState::default());
        let ctx = Arc::new(Self {
            config,
            db,
            events: EventBus::default(),
            network: network_rx,
        });
        (ctx, network_tx)
    }

    /// Current connectivity snapshot.
    pub fn network_state(&self) -> NetworkState {
        *self.network.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn network_updates_are_visible() {
        let db = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let (ctx, network_tx) = SessionContext::new(Config::default(), db);
        assert!(ctx.network_state().connected);

        network_tx
            .send(NetworkState {
                connected: false,
                metered: false,
            })
            .unwrap();
        assert!(!ctx.network_state().connected);
    }
}
