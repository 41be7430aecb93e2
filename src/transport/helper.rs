//! Playlist helper seam.
//!
//! When the sink cannot play HLS by itself the fallback transport needs a
//! helper that parses the playlist and feeds segments into the sink. The
//! helper is obtained through a [`HelperLoader`], used directly when already
//! loaded and loaded on first use otherwise. A load failure is reported as
//! [`Error::HelperLoad`](crate::Error::HelperLoad), distinct from playback
//! failures.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OnceCell, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::sink::SinkHandle;

use super::player::HlsPlayer;

// ============================================================================
// Constants
// ============================================================================

/// Default amount of already-played media the helper keeps track of.
pub const DEFAULT_BACK_BUFFER: Duration = Duration::from_secs(90);

// ============================================================================
// HelperConfig
// ============================================================================

/// Settings applied when a helper instance is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperConfig {
    /// Bound on retained back-buffer.
    pub back_buffer: Duration,
    /// Start at the live edge and refresh at half the target duration.
    pub low_latency: bool,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            back_buffer: DEFAULT_BACK_BUFFER,
            low_latency: true,
        }
    }
}

// ============================================================================
// HelperSession
// ============================================================================

/// Event reported by a running helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperEvent {
    /// The manifest was fetched and parsed; media is about to flow.
    ManifestParsed {
        /// Media playlist that will be followed.
        media_playlist: Url,
    },
    /// Unrecoverable error; the helper has stopped.
    Fatal(String),
}

/// A helper bound to one manifest and one sink handle.
pub struct HelperSession {
    /// Events from the helper.
    pub events: mpsc::UnboundedReceiver<HelperEvent>,
    /// Stops the helper.
    pub abort: AbortHandle,
}

impl fmt::Debug for HelperSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperSession").finish_non_exhaustive()
    }
}

// ============================================================================
// Traits
// ============================================================================

/// A loaded playlist helper.
pub trait PlaylistHelper: Send + Sync {
    /// Starts pulling `manifest` into `sink`.
    fn start(&self, manifest: Url, config: &HelperConfig, sink: SinkHandle) -> HelperSession;
}

/// Source of the playlist helper.
#[async_trait]
pub trait HelperLoader: Send + Sync {
    /// Whether this platform can run the helper at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Loads the helper.
    ///
    /// # Errors
    ///
    /// [`Error::HelperLoad`] when the helper cannot be obtained.
    async fn load(&self) -> Result<Arc<dyn PlaylistHelper>>;
}

// ============================================================================
// BuiltinHelperLoader
// ============================================================================

/// Loader for the compiled-in [`HlsPlayer`].
#[derive(Debug, Clone, Default)]
pub struct BuiltinHelperLoader {
    http: reqwest::Client,
}

impl BuiltinHelperLoader {
    /// Creates a loader whose player uses `http` for playlist and segment requests.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HelperLoader for BuiltinHelperLoader {
    async fn load(&self) -> Result<Arc<dyn PlaylistHelper>> {
        Ok(Arc::new(HlsPlayer::new(self.http.clone())))
    }
}

// ============================================================================
// CachedHelperLoader
// ============================================================================

/// Loads once, then hands out the same helper.
///
/// Failed loads are not cached; the next call tries again.
pub struct CachedHelperLoader {
    inner: Arc<dyn HelperLoader>,
    loaded: OnceCell<Arc<dyn PlaylistHelper>>,
}

impl fmt::Debug for CachedHelperLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedHelperLoader")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl CachedHelperLoader {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn HelperLoader>) -> Self {
        Self {
            inner,
            loaded: OnceCell::new(),
        }
    }

    /// Whether a helper has been loaded.
    #[inline]
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }
}

#[async_trait]
impl HelperLoader for CachedHelperLoader {
    fn is_supported(&self) -> bool {
        self.inner.is_supported()
    }

    async fn load(&self) -> Result<Arc<dyn PlaylistHelper>> {
        if let Some(helper) = self.loaded.get() {
            debug!("Playlist helper already loaded");
            return Ok(Arc::clone(helper));
        }

        let helper = self
            .loaded
            .get_or_try_init(|| async {
                let helper = self.inner.load().await.map_err(|e| match e {
                    Error::HelperLoad { .. } => e,
                    other => Error::helper_load(other.to_string()),
                })?;
                info!("Playlist helper loaded");
                Ok::<_, Error>(helper)
            })
            .await?;

        Ok(Arc::clone(helper))
    }
}

// ============================================================================
// Tests
// ============================================================================
