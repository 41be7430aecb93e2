//! HLS fallback transport.
//!
//! Playback path selection:
//!
//! | Sink capability | Helper | Path |
//! |-----------------|--------|------|
//! | native HLS | any | sink plays the manifest itself |
//! | no native HLS | supported | playlist helper feeds segments |
//! | no native HLS | unsupported | [`Error::Unsupported`] |
//!
//! Either path succeeds on its first positive event (`LoadedData` for native
//! playback, `ManifestParsed` for the helper) and fails on a first error.
//! Errors arriving after success are reported as loss. There is no timeout
//! on this path.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::sink::{PlaybackEvent, PlaybackEvents};
use crate::state::TransportKind;

use super::helper::{HelperConfig, HelperEvent, HelperLoader};
use super::{LossNotifier, NegotiationContext, Transport};

// ============================================================================
// FallbackTransport
// ============================================================================

#[derive(Default)]
struct Session {
    tasks: Vec<AbortHandle>,
    torn_down: bool,
}

/// HLS playback through the sink or the playlist helper.
pub struct FallbackTransport {
    manifest: Url,
    loader: Arc<dyn HelperLoader>,
    config: HelperConfig,
    session: Mutex<Session>,
}

impl FallbackTransport {
    /// Creates an unused transport for `manifest`.
    #[must_use]
    pub fn new(manifest: Url, loader: Arc<dyn HelperLoader>, config: HelperConfig) -> Self {
        Self {
            manifest,
            loader,
            config,
            session: Mutex::new(Session::default()),
        }
    }

    /// Manifest this transport plays.
    #[inline]
    #[must_use]
    pub fn manifest(&self) -> &Url {
        &self.manifest
    }

    /// Tracks a background task, or aborts it if teardown already ran.
    fn track(&self, task: AbortHandle) -> Result<()> {
        let mut session = self.session.lock();
        if session.torn_down {
            task.abort();
            return Err(Error::Superseded);
        }
        session.tasks.push(task);
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.session.lock().torn_down {
            return Err(Error::Superseded);
        }
        Ok(())
    }

    async fn play_native(&self, ctx: &NegotiationContext) -> Result<()> {
        let generation = ctx.generation();
        debug!(%generation, manifest = %self.manifest, "Starting native HLS playback");

        let mut events = ctx.sink.play_native(&self.manifest)?;
        match events.recv().await {
            Some(PlaybackEvent::LoadedData) => {
                self.ensure_active()?;
                let monitor = tokio::spawn(watch_native(events, ctx.loss.clone()));
                self.track(monitor.abort_handle())?;
                info!(%generation, "Native HLS playback started");
                Ok(())
            }
            Some(PlaybackEvent::Error(message)) => Err(Error::playback(message)),
            None => Err(Error::playback("native playback stopped before loading")),
        }
    }

    async fn play_with_helper(&self, ctx: &NegotiationContext) -> Result<()> {
        let generation = ctx.generation();

        if !self.loader.is_supported() {
            warn!(%generation, "No native HLS and no playlist helper");
            return Err(Error::Unsupported);
        }

        let helper = self.loader.load().await.map_err(|e| match e {
            Error::HelperLoad { .. } => e,
            other => Error::helper_load(other.to_string()),
        })?;
        self.ensure_active()?;
        if !ctx.sink.is_current() {
            return Err(Error::Superseded);
        }

        let mut session = helper.start(self.manifest.clone(), &self.config, ctx.sink.clone());
        self.track(session.abort.clone())?;

        match session.events.recv().await {
            Some(HelperEvent::ManifestParsed { media_playlist }) => {
                self.ensure_active()?;
                let monitor = tokio::spawn(watch_helper(session.events, ctx.loss.clone()));
                self.track(monitor.abort_handle())?;
                info!(%generation, %media_playlist, "HLS playback started");
                Ok(())
            }
            Some(HelperEvent::Fatal(message)) => Err(Error::playback(message)),
            None => Err(Error::playback("playlist helper stopped before parsing the manifest")),
        }
    }
}

impl std::fmt::Debug for FallbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackTransport")
            .field("manifest", &self.manifest)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for FallbackTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    async fn negotiate(&self, ctx: NegotiationContext) -> Result<()> {
        if ctx.sink.supports_native_hls() {
            self.play_native(&ctx).await
        } else {
            self.play_with_helper(&ctx).await
        }
    }

    fn teardown(&self) {
        let mut session = self.session.lock();
        session.torn_down = true;
        for task in session.tasks.drain(..) {
            task.abort();
        }
    }
}

// ============================================================================
// Loss Monitors
// ============================================================================

async fn watch_native(mut events: PlaybackEvents, loss: LossNotifier) {
    loop {
        match events.recv().await {
            Some(PlaybackEvent::LoadedData) => continue,
            Some(PlaybackEvent::Error(message)) => {
                loss.notify(format!("native playback error: {message}"));
                return;
            }
            None => {
                loss.notify("native playback stopped");
                return;
            }
        }
    }
}

async fn watch_helper(mut events: mpsc::UnboundedReceiver<HelperEvent>, loss: LossNotifier) {
    loop {
        match events.recv().await {
            Some(HelperEvent::ManifestParsed { .. }) => continue,
            Some(HelperEvent::Fatal(message)) => {
                loss.notify(format!("playlist helper error: {message}"));
                return;
            }
            None => {
                loss.notify("playlist helper stopped");
                return;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
