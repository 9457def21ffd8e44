//! # Rivertune Player
//!
//! The playback queue and media-session core of the Rivertune music client:
//! multi-queue management, stream resolution with expiry tracking, the
//! playback orchestrator with its error-recovery policy, and the observer
//! facade exposed to UI and system control surfaces.
//!
//! The underlying media player and the remote catalog are consumed through
//! narrow trait seams ([`playback::MediaPlayer`], [`catalog::CatalogClient`]);
//! this crate owns everything between them.

pub mod catalog;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod lyrics;
pub mod playback;

pub use config::Config;
pub use context::{NetworkState, SessionContext};
pub use error::{Error, Result};
pub use playback::connection::PlayerConnection;
pub use playback::orchestrator::{PlaybackOrchestrator, QueueRequest};
pub use playback::queue_board::{MultiQueue, QueueBoard, MAX_QUEUES};
pub use playback::resolver::StreamResolver;
