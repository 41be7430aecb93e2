//! Connection state machine types and UI-facing status.
//!
//! ```text
//! Idle ──connect()──► Negotiating(LowLatency) ──ok──► Live(LowLatency)
//!                              │
//!                            fail
//!                              ▼
//!                     Negotiating(Fallback) ──ok──► Live(Fallback)
//!                              │                        │
//!                            fail                     loss
//!                              ▼                        ▼
//!                        Disconnected ◄─────────────────┘
//!                              │
//!              retry timer / page visible ──► Negotiating(LowLatency)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ============================================================================
// TransportKind
// ============================================================================

/// Which negotiation path produced the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// WebRTC session negotiated over WHEP.
    LowLatency,
    /// Segmented HLS playback.
    Fallback,
}

impl TransportKind {
    /// Short protocol name used in labels and logs.
    #[inline]
    #[must_use]
    pub const fn protocol(self) -> &'static str {
        match self {
            Self::LowLatency => "WebRTC",
            Self::Fallback => "HLS",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.protocol())
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Current state of the connection manager.
///
/// Exactly one instance exists per manager; the manager's transitions are
/// the only way it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing requested yet, or shut down.
    #[default]
    Idle,
    /// A transport of the given kind is negotiating.
    Negotiating(TransportKind),
    /// Media is flowing.
    Live {
        /// Transport that went live.
        kind: TransportKind,
        /// When the transition to live happened.
        started_at: Instant,
    },
    /// No transport; a retry may be pending.
    Disconnected,
}

impl ConnectionState {
    /// Returns `true` when media is flowing.
    #[inline]
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    /// Returns the transport kind for `Negotiating` and `Live` states.
    #[inline]
    #[must_use]
    pub const fn transport_kind(&self) -> Option<TransportKind> {
        match self {
            Self::Negotiating(kind) | Self::Live { kind, .. } => Some(*kind),
            Self::Idle | Self::Disconnected => None,
        }
    }

    /// Returns `true` when a transport may exist in this state.
    #[inline]
    #[must_use]
    pub const fn holds_transport(&self) -> bool {
        matches!(self, Self::Negotiating(_) | Self::Live { .. })
    }
}

// ============================================================================
// Status
// ============================================================================

/// Coarse status reported to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Negotiation in progress.
    Connecting,
    /// Media is flowing.
    Live,
    /// Not connected, retry pending or suspended.
    Offline,
    /// A failure the user should see.
    Error,
}

/// Status emitted on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Coarse status.
    pub kind: StatusKind,
    /// Human-readable label.
    pub label: String,
}

impl Status {
    /// Creates a status.
    #[inline]
    pub fn new(kind: StatusKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time view of the manager, published after every change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// Current state.
    pub state: ConnectionState,
    /// Failed attempts since the last success or manual retry.
    pub reconnect_attempts: u32,
    /// Delay of the pending retry timer, if one is scheduled.
    pub retry_in: Option<Duration>,
    /// Whether a wake lock is currently held.
    pub wake_lock_held: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_only_with_transport() {
        assert_eq!(ConnectionState::Idle.transport_kind(), None);
        assert_eq!(ConnectionState::Disconnected.transport_kind(), None);
        assert_eq!(
            ConnectionState::Negotiating(TransportKind::Fallback).transport_kind(),
            Some(TransportKind::Fallback)
        );

        let live = ConnectionState::Live {
            kind: TransportKind::LowLatency,
            started_at: Instant::now(),
        };
        assert!(live.is_live());
        assert!(live.holds_transport());
        assert!(!ConnectionState::Disconnected.holds_transport());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let status = Status::new(StatusKind::Connecting, "Connecting");
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"kind":"connecting","label":"Connecting"}"#);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TransportKind::LowLatency.to_string(), "WebRTC");
        assert_eq!(TransportKind::Fallback.to_string(), "HLS");
    }
}
