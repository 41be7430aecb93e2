//! Host platform signals consumed by the connection manager.
//!
//! The manager does not observe the platform directly. The embedding
//! application forwards page visibility changes and wake-lock revocations as
//! events, and supplies a [`WakeLockProvider`] if the platform has one.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `visibility` | Page visibility and what a change means for retries |
//! | `wake_lock` | Screen wake-lock provider seam and state tracking |

// ============================================================================
// Submodules
// ============================================================================

/// Page visibility handling.
pub mod visibility;

/// Screen wake-lock handling.
pub mod wake_lock;

// ============================================================================
// Re-exports
// ============================================================================

pub use visibility::{Visibility, VisibilityAction};
pub use wake_lock::{AcquireRequest, WakeLock, WakeLockProvider, WakeLockSentinel};
