//! Livecam - Low-latency live camera viewer.
//!
//! This library keeps a single playback sink fed with a live camera stream,
//! preferring WebRTC over WHEP and falling back to HLS when the low-latency
//! path cannot be negotiated.
//!
//! # Architecture
//!
//! The viewer follows an actor model:
//!
//! - **Connection Manager**: Owns the state machine, the active transport,
//!   the reconnect timer and the wake lock; the only place state changes
//! - **Transports**: WHEP/WebRTC and HLS, behind one `negotiate`/`teardown`
//!   contract
//! - **Sink**: The embedding application's playback surface, bound to at most
//!   one transport at a time
//!
//! Key design principles:
//!
//! - Low latency first; any negotiation failure cascades to HLS within the
//!   same attempt
//! - Fallback failure or live loss defers to exponential backoff
//!   (2s × 1.5ⁿ, capped at 30s)
//! - Stale completions are dropped by comparing generation tokens
//! - Hiding the page suspends retries; showing it reconnects immediately
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use livecam::{ConnectionManager, PlaybackSink, Result, SinkSource};
//!
//! struct Screen;
//!
//! impl PlaybackSink for Screen {
//!     fn attach(&self, source: SinkSource) { /* render */ }
//!     fn clear(&self) { /* blank */ }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = ConnectionManager::builder()
//!         .host("cam.local")
//!         .sink(Arc::new(Screen))
//!         .on_status(|status| println!("{status}"))
//!         .build()?;
//!
//!     manager.connect()?;
//!     tokio::signal::ctrl_c().await?;
//!     manager.shutdown().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Generation tokens |
//! | [`manager`] | Connection manager, builder and options |
//! | [`platform`] | Page visibility and wake lock |
//! | [`policy`] | Reconnect backoff |
//! | [`sink`] | Playback sink and single-binding arbiter |
//! | [`state`] | Connection state, status and snapshot |
//! | [`transport`] | WHEP and HLS transports |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Generation tokens for stale-callback suppression.
pub mod identifiers;

/// Connection manager, builder and options.
///
/// Use [`ConnectionManager::builder()`] to create a configured manager.
pub mod manager;

/// Host platform signals: visibility and wake lock.
pub mod platform;

/// Reconnect backoff policy.
pub mod policy;

/// Playback sink abstraction.
pub mod sink;

/// Connection state and status types.
pub mod state;

/// Media transports.
///
/// WHEP/WebRTC low-latency transport and HLS fallback transport.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::Generation;

// Manager types
pub use manager::{ConnectionManager, ManagerBuilder, StatusHandler, ViewerOptions};

// Platform types
pub use platform::{Visibility, WakeLockProvider, WakeLockSentinel};

// Policy types
pub use policy::ReconnectPolicy;

// Sink types
pub use sink::{MediaChunk, PlaybackEvent, PlaybackEvents, PlaybackSink, SinkSource};

// State types
pub use state::{ConnectionState, Snapshot, Status, StatusKind, TransportKind};

// Transport types
pub use transport::{
    HelperConfig, Loss, LossNotifier, NegotiationContext, Transport, TransportFactory,
};
