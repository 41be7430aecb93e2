//! Page visibility.
//!
//! Hiding the page suspends retry activity without touching a live stream.
//! Showing it again reconnects immediately unless media is already flowing.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::state::ConnectionState;

// ============================================================================
// Visibility
// ============================================================================

/// Whether the host page is currently visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Page is on screen.
    #[default]
    Visible,
    /// Page is in the background or the screen is off.
    Hidden,
}

impl Visibility {
    /// Returns `true` for [`Visibility::Visible`].
    #[inline]
    #[must_use]
    pub const fn is_visible(self) -> bool {
        matches!(self, Self::Visible)
    }
}

// ============================================================================
// VisibilityAction
// ============================================================================

/// What the manager must do in response to a visibility change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityAction {
    /// Cancel any pending retry timer; state is left alone.
    SuspendRetry,
    /// Reset the reconnect counter and connect now, skipping the backoff.
    Reconnect,
    /// Nothing to do for the connection.
    None,
}

impl VisibilityAction {
    /// Decides the action for a change to `visibility` while in `state`.
    #[must_use]
    pub fn for_change(visibility: Visibility, state: &ConnectionState) -> Self {
        match (visibility, state) {
            (Visibility::Hidden, _) => Self::SuspendRetry,
            (Visibility::Visible, ConnectionState::Live { .. } | ConnectionState::Idle) => {
                Self::None
            }
            (
                Visibility::Visible,
                ConnectionState::Disconnected | ConnectionState::Negotiating(_),
            ) => Self::Reconnect,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::Instant;

    use crate::state::TransportKind;

    #[test]
    fn test_hidden_always_suspends() {
        for state in [
            ConnectionState::Idle,
            ConnectionState::Disconnected,
            ConnectionState::Negotiating(TransportKind::Fallback),
        ] {
            assert_eq!(
                VisibilityAction::for_change(Visibility::Hidden, &state),
                VisibilityAction::SuspendRetry
            );
        }
    }

    #[test]
    fn test_visible_reconnects_unless_live() {
        let live = ConnectionState::Live {
            kind: TransportKind::LowLatency,
            started_at: Instant::now(),
        };
        assert_eq!(
            VisibilityAction::for_change(Visibility::Visible, &live),
            VisibilityAction::None
        );
        assert_eq!(
            VisibilityAction::for_change(Visibility::Visible, &ConnectionState::Disconnected),
            VisibilityAction::Reconnect
        );
        assert_eq!(
            VisibilityAction::for_change(
                Visibility::Visible,
                &ConnectionState::Negotiating(TransportKind::LowLatency)
            ),
            VisibilityAction::Reconnect
        );
    }

    #[test]
    fn test_visible_from_idle_does_not_start() {
        assert_eq!(
            VisibilityAction::for_change(Visibility::Visible, &ConnectionState::Idle),
            VisibilityAction::None
        );
    }
}
