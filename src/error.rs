//! Error types for the live camera viewer.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use livecam::{Error, Result};
//!
//! async fn offer(client: &WhepClient, sdp: &str) -> Result<String> {
//!     let answer = client.offer(sdp).await?;
//!     Ok(answer.sdp)
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Signaling | [`Error::SignalingStatus`], [`Error::MalformedAnswer`] |
//! | Negotiation | [`Error::GatheringTimeout`], [`Error::Negotiation`], [`Error::WebRtc`] |
//! | Playback | [`Error::Playback`], [`Error::Playlist`], [`Error::HelperLoad`], [`Error::Unsupported`] |
//! | Lifecycle | [`Error::Superseded`], [`Error::ManagerClosed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Http`], [`Error::Url`] |
//!
//! The connection manager only cares whether a negotiation failed, not why.
//! The finer categories exist for logging and for the user-visible label.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when viewer configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Signaling Errors
    // ========================================================================
    /// Signaling endpoint answered with something other than 201 Created.
    #[error("Signaling rejected offer with HTTP {status}")]
    SignalingStatus {
        /// HTTP status code returned by the endpoint.
        status: u16,
    },

    /// Signaling endpoint returned a body that is not a usable SDP answer.
    #[error("Malformed answer: {message}")]
    MalformedAnswer {
        /// Description of what was wrong with the answer.
        message: String,
    },

    // ========================================================================
    // Negotiation Errors
    // ========================================================================
    /// ICE candidate gathering did not complete in time.
    #[error("ICE gathering timed out after {timeout_ms}ms")]
    GatheringTimeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    /// Peer session could not be set up.
    #[error("Negotiation failed: {message}")]
    Negotiation {
        /// Description of the failure.
        message: String,
    },

    /// Error raised by the WebRTC stack.
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    // ========================================================================
    // Playback Errors
    // ========================================================================
    /// Fatal playback error reported by the sink or the playlist helper.
    #[error("Playback error: {message}")]
    Playback {
        /// Description of the playback failure.
        message: String,
    },

    /// Playlist could not be fetched or parsed.
    #[error("Playlist error: {message}")]
    Playlist {
        /// Description of the playlist problem.
        message: String,
    },

    /// The playlist-parsing helper could not be loaded.
    #[error("Failed to load playlist helper: {message}")]
    HelperLoad {
        /// Description of the load failure.
        message: String,
    },

    /// Neither native playlist playback nor the helper is available.
    #[error("Playback not supported on this platform")]
    Unsupported,

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// A transport that is no longer active tried to act.
    #[error("Transport superseded by a newer attempt")]
    Superseded,

    /// The connection manager task has stopped.
    #[error("Connection manager closed")]
    ManagerClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a signaling status error.
    #[inline]
    pub fn signaling_status(status: u16) -> Self {
        Self::SignalingStatus { status }
    }

    /// Creates a malformed answer error.
    #[inline]
    pub fn malformed_answer(message: impl Into<String>) -> Self {
        Self::MalformedAnswer {
            message: message.into(),
        }
    }

    /// Creates a gathering timeout error.
    #[inline]
    pub fn gathering_timeout(timeout_ms: u64) -> Self {
        Self::GatheringTimeout { timeout_ms }
    }

    /// Creates a negotiation error.
    #[inline]
    pub fn negotiation(message: impl Into<String>) -> Self {
        Self::Negotiation {
            message: message.into(),
        }
    }

    /// Creates a playback error.
    #[inline]
    pub fn playback(message: impl Into<String>) -> Self {
        Self::Playback {
            message: message.into(),
        }
    }

    /// Creates a playlist error.
    #[inline]
    pub fn playlist(message: impl Into<String>) -> Self {
        Self::Playlist {
            message: message.into(),
        }
    }

    /// Creates a helper load error.
    #[inline]
    pub fn helper_load(message: impl Into<String>) -> Self {
        Self::HelperLoad {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::GatheringTimeout { .. } => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if this error came out of the WHEP offer/answer exchange.
    #[inline]
    #[must_use]
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Self::SignalingStatus { .. }
                | Self::MalformedAnswer { .. }
                | Self::GatheringTimeout { .. }
                | Self::Negotiation { .. }
                | Self::WebRtc(_)
        )
    }

    /// Returns `true` if the playlist helper failed to load.
    #[inline]
    #[must_use]
    pub fn is_helper_load(&self) -> bool {
        matches!(self, Self::HelperLoad { .. })
    }

    /// Returns `true` if playback cannot work without a capability change.
    #[inline]
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::signaling_status(500);
        assert_eq!(err.to_string(), "Signaling rejected offer with HTTP 500");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing sink");
        assert_eq!(err.to_string(), "Configuration error: missing sink");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::gathering_timeout(3000);
        let other_err = Error::playback("decode");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_negotiation_error() {
        assert!(Error::signaling_status(404).is_negotiation_error());
        assert!(Error::malformed_answer("empty").is_negotiation_error());
        assert!(Error::gathering_timeout(3000).is_negotiation_error());
        assert!(!Error::Unsupported.is_negotiation_error());
        assert!(!Error::helper_load("offline").is_negotiation_error());
    }

    #[test]
    fn test_helper_and_unsupported_are_distinct() {
        let load = Error::helper_load("dns failure");
        assert!(load.is_helper_load());
        assert!(!load.is_unsupported());

        assert!(Error::Unsupported.is_unsupported());
        assert!(!Error::Unsupported.is_helper_load());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_url_error() {
        let err: Error = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, Error::Url(_)));
    }
}
