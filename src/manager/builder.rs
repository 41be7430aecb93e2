//! Builder pattern for manager configuration.
//!
//! Provides a fluent API for configuring and creating [`ConnectionManager`]
//! instances.
//!
//! # Example
//!
//! ```ignore
//! use livecam::ConnectionManager;
//!
//! let manager = ConnectionManager::builder()
//!     .host("cam.local")
//!     .sink(sink)
//!     .on_status(|status| println!("{status}"))
//!     .build()?;
//!
//! manager.connect()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::platform::{Visibility, WakeLock, WakeLockProvider};
use crate::sink::{PlaybackSink, SinkSlot};
use crate::state::Status;
use crate::transport::helper::HelperLoader;
use crate::transport::{
    BuiltinHelperLoader, CachedHelperLoader, StreamTransportFactory, TransportFactory,
};

use super::core::{ConnectionManager, ManagerParts, StatusHandler};
use super::options::ViewerOptions;

// ============================================================================
// ManagerBuilder
// ============================================================================

/// Builder for configuring a [`ConnectionManager`].
///
/// Use [`ConnectionManager::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ManagerBuilder {
    /// Endpoints and tuning.
    options: Option<ViewerOptions>,
    /// Media origin host, expanded with default ports.
    host: Option<String>,
    /// Playback surface.
    sink: Option<Arc<dyn PlaybackSink>>,
    /// Screen wake-lock primitive, if the platform has one.
    wake_lock: Option<Arc<dyn WakeLockProvider>>,
    /// Playlist helper source.
    helper_loader: Option<Arc<dyn HelperLoader>>,
    /// Transport source; replaces the WHEP/HLS defaults.
    transport_factory: Option<Arc<dyn TransportFactory>>,
    /// Status callback.
    on_status: Option<StatusHandler>,
    /// Visibility at startup.
    visibility: Visibility,
}

impl fmt::Debug for ManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("options", &self.options)
            .field("host", &self.host)
            .field("sink", &self.sink.is_some())
            .field("wake_lock", &self.wake_lock.is_some())
            .field("helper_loader", &self.helper_loader.is_some())
            .field("transport_factory", &self.transport_factory.is_some())
            .field("on_status", &self.on_status.is_some())
            .field("visibility", &self.visibility)
            .finish()
    }
}

// ============================================================================
// ManagerBuilder Implementation
// ============================================================================

impl ManagerBuilder {
    /// Creates a builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoints and tuning explicitly.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ViewerOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Uses the default layout for a media origin on `host`.
    ///
    /// Ignored when [`options`](Self::options) is also set.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the playback sink.
    #[inline]
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn PlaybackSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the wake-lock provider.
    ///
    /// Without one the wake-lock toggle is a no-op.
    #[inline]
    #[must_use]
    pub fn wake_lock(mut self, provider: Arc<dyn WakeLockProvider>) -> Self {
        self.wake_lock = Some(provider);
        self
    }

    /// Replaces the built-in playlist helper loader.
    ///
    /// The loader is wrapped so that a successful load is reused.
    #[inline]
    #[must_use]
    pub fn helper_loader(mut self, loader: Arc<dyn HelperLoader>) -> Self {
        self.helper_loader = Some(loader);
        self
    }

    /// Replaces the WHEP/HLS transports.
    #[inline]
    #[must_use]
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Sets the callback invoked on every state transition.
    #[inline]
    #[must_use]
    pub fn on_status<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Status) + Send + Sync + 'static,
    {
        self.on_status = Some(Arc::new(handler));
        self
    }

    /// Sets the page visibility at startup.
    #[inline]
    #[must_use]
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Builds and starts the manager in `Idle`.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no endpoints or no sink are set
    /// - [`Error::Config`] if the options fail validation
    /// - [`Error::Url`] if the host does not form a valid URL
    pub fn build(self) -> Result<ConnectionManager> {
        let options = self.resolve_options()?;
        options.validate()?;

        let sink = self.sink.ok_or_else(|| {
            Error::config(
                "A playback sink is required. Use .sink() to set it.\n\
                 Example: ConnectionManager::builder().sink(Arc::new(MySink))",
            )
        })?;

        let factory = match self.transport_factory {
            Some(factory) => factory,
            None => {
                let loader = match self.helper_loader {
                    Some(loader) => loader,
                    None => default_helper_loader()?,
                };
                let cached: Arc<dyn HelperLoader> = Arc::new(CachedHelperLoader::new(loader));
                Arc::new(StreamTransportFactory::new(options.clone(), cached)?)
            }
        };

        ConnectionManager::spawn(ManagerParts {
            factory,
            policy: options.reconnect,
            slot: SinkSlot::new(sink),
            on_status: self.on_status,
            wake_lock: WakeLock::new(self.wake_lock),
            visibility: self.visibility,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ManagerBuilder {
    fn resolve_options(&self) -> Result<ViewerOptions> {
        if let Some(options) = &self.options {
            return Ok(options.clone());
        }

        let host = self.host.as_deref().ok_or_else(|| {
            Error::config(
                "Viewer endpoints are required. Use .host() or .options() to set them.\n\
                 Example: ConnectionManager::builder().host(\"cam.local\")",
            )
        })?;

        if host.trim().is_empty() {
            return Err(Error::config("Host must not be empty"));
        }

        ViewerOptions::for_host(host)
    }
}

fn default_helper_loader() -> Result<Arc<dyn HelperLoader>> {
    let http = reqwest::Client::builder()
        .build()
        .map_err(|e| Error::config(format!("HTTP client: {e}")))?;
    Ok(Arc::new(BuiltinHelperLoader::new(http)))
}

// ============================================================================
// Tests
// ============================================================================
