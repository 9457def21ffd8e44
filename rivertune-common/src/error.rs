//! Playback error taxonomy shared between the resolver and the orchestrator.
//!
//! Every failure class carries a distinct, stable numeric code so the
//! orchestrator can apply per-class recovery policy, and so codes survive
//! the trip through the player's error channel unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sign-in required to play this content.
pub const CODE_AUTH_REQUIRED: i32 = 2000;
/// Network connectivity failure (recoverable, wait-and-resume).
pub const CODE_NO_INTERNET: i32 = 2001;
/// Network timeout (recoverable, retry).
pub const CODE_TIMEOUT: i32 = 2002;
/// I/O failure on an open stream, usually an expired stream URL.
pub const CODE_STREAM_EXPIRED: i32 = 2004;
/// A local-only track reached the resolver or downloader.
pub const CODE_UNSUPPORTED_LOCAL: i32 = 2006;
/// Remote service failure with no more specific class.
pub const CODE_REMOTE_ERROR: i32 = 3000;

/// Failure resolving a track to a playable stream.
///
/// The resolver never decides recovery policy itself; it surfaces one of
/// these and the orchestrator picks wait / retry / skip / stop.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ResolveError {
    #[error("no internet connection")]
    NoInternet,

    #[error("network timeout while resolving stream")]
    Timeout,

    #[error("sign-in required: {0}")]
    AuthRequired(String),

    /// Local tracks must never be resolved or downloaded; hitting this is
    /// a caller contract violation, not a transient condition.
    #[error("local tracks cannot be resolved")]
    UnsupportedLocal,

    #[error("remote error: {0}")]
    Remote(String),
}

impl ResolveError {
    /// Stable playback-exception code for this failure class.
    pub fn error_code(&self) -> i32 {
        match self {
            ResolveError::NoInternet => CODE_NO_INTERNET,
            ResolveError::Timeout => CODE_TIMEOUT,
            ResolveError::AuthRequired(_) => CODE_AUTH_REQUIRED,
            ResolveError::UnsupportedLocal => CODE_UNSUPPORTED_LOCAL,
            ResolveError::Remote(_) => CODE_REMOTE_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn error_codes_are_distinct() {
        let codes: HashSet<i32> = [
            ResolveError::NoInternet,
            ResolveError::Timeout,
            ResolveError::AuthRequired(String::new()),
            ResolveError::UnsupportedLocal,
            ResolveError::Remote(String::new()),
        ]
        .iter()
        .map(ResolveError::error_code)
        .collect();
        assert_eq!(codes.len(), 5);
        assert!(!codes.contains(&CODE_STREAM_EXPIRED));
    }
}
