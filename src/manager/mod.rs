//! Connection manager module.
//!
//! This module provides the entry point for viewing a camera feed.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ConnectionManager`] | Handle to the running state machine |
//! | [`ManagerBuilder`] | Fluent configuration builder |
//! | [`ViewerOptions`] | Endpoints and tuning |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use livecam::{ConnectionManager, Result, Visibility};
//!
//! # async fn example(sink: Arc<dyn livecam::PlaybackSink>) -> Result<()> {
//! let manager = ConnectionManager::builder()
//!     .host("cam.local")
//!     .sink(sink)
//!     .build()?;
//!
//! manager.connect()?;
//! manager.set_visibility(Visibility::Hidden)?;
//! manager.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for manager configuration.
pub mod builder;

/// Manager handle and event loop.
pub mod core;

/// Viewer endpoints and tuning.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ManagerBuilder;
pub use core::{ConnectionManager, StatusHandler};
pub use options::ViewerOptions;
