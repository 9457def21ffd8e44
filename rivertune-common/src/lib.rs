//! # Rivertune Common Library
//!
//! Shared code for the Rivertune playback core:
//! - Track, queue and format models
//! - Event types (RivertuneEvent enum) and the EventBus
//! - Playback error taxonomy and stable error codes

pub mod error;
pub mod events;
pub mod model;

pub use error::ResolveError;
pub use events::{EventBus, PlaybackState, PlayerEvent, RepeatMode, RivertuneEvent};

/// Initialize tracing for binaries and integration tests.
///
/// Uses `RUST_LOG` when set, otherwise defaults to debug output for the
/// rivertune crates only.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rivertune_common=debug,rivertune_player=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
