//! Media transports.
//!
//! Both transports share one contract: [`Transport::negotiate`] resolves to
//! success once media flows into the sink, or to an error; after success any
//! later failure is reported through the [`LossNotifier`] handed in with the
//! [`NegotiationContext`]. [`Transport::teardown`] releases everything and
//! detaches every callback.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   POST {base}/whep (application/sdp)   ┌──────────────┐
//! │  LowLatencyTransport │───────────────────────────────────────►│              │
//! │  (WebRTC, recvonly)  │◄──────────── 201 + SDP answer ─────────│ Media origin │
//! └──────────────────────┘                                        │              │
//! ┌──────────────────────┐   GET {base}/index.m3u8 + segments     │              │
//! │  FallbackTransport   │───────────────────────────────────────►│              │
//! │  (HLS)               │                                        └──────────────┘
//! └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `whep` | WHEP signaling client and WebRTC transport |
//! | `hls` | HLS fallback transport |
//! | `helper` | Playlist helper loading |
//! | `player` | Built-in playlist helper |
//! | `playlist` | Manifest fetching and parsing |

// ============================================================================
// Submodules
// ============================================================================

/// Playlist helper seam and loaders.
pub mod helper;

/// HLS fallback transport.
pub mod hls;

/// Built-in playlist helper.
pub mod player;

/// Manifest fetching and parsing.
pub mod playlist;

/// WHEP signaling and WebRTC transport.
pub mod whep;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::Result;
use crate::identifiers::Generation;
use crate::manager::ViewerOptions;
use crate::sink::SinkHandle;
use crate::state::TransportKind;

use self::helper::HelperLoader;
use self::hls::FallbackTransport;
use self::whep::{LowLatencyTransport, WhepClient};

// ============================================================================
// Re-exports
// ============================================================================

pub use helper::{
    BuiltinHelperLoader, CachedHelperLoader, HelperConfig, HelperEvent, HelperSession,
    PlaylistHelper,
};
pub use player::HlsPlayer;

// ============================================================================
// Loss Notification
// ============================================================================

/// Report that a live transport stopped delivering media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loss {
    /// Generation of the transport that failed.
    pub generation: Generation,
    /// What happened, for logs.
    pub reason: String,
}

/// Channel a transport uses to report loss after going live.
#[derive(Debug, Clone)]
pub struct LossNotifier {
    generation: Generation,
    tx: mpsc::UnboundedSender<Loss>,
}

impl LossNotifier {
    /// Creates a notifier for `generation` sending into `tx`.
    #[must_use]
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<Loss>) -> Self {
        Self { generation, tx }
    }

    /// Creates a notifier together with its receiving end.
    #[must_use]
    pub fn channel(generation: Generation) -> (Self, mpsc::UnboundedReceiver<Loss>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(generation, tx), rx)
    }

    /// Generation stamped on every report.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Reports loss. Silently dropped once the receiver is gone.
    pub fn notify(&self, reason: impl Into<String>) {
        let loss = Loss {
            generation: self.generation,
            reason: reason.into(),
        };
        if self.tx.send(loss).is_err() {
            trace!(generation = %self.generation, "Loss receiver gone");
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Everything a transport needs for one negotiation.
#[derive(Debug, Clone)]
pub struct NegotiationContext {
    /// Generation-stamped access to the playback sink.
    pub sink: SinkHandle,
    /// Where to report loss after success.
    pub loss: LossNotifier,
}

impl NegotiationContext {
    /// Generation of this negotiation.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.sink.generation()
    }
}

/// A way of getting the camera feed into the sink.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which path this transport implements.
    fn kind(&self) -> TransportKind;

    /// Runs negotiation to completion.
    ///
    /// Returns once media is bound to the sink. Transports must check
    /// [`SinkHandle::is_current`] before acting on any deferred completion.
    async fn negotiate(&self, ctx: NegotiationContext) -> Result<()>;

    /// Releases all resources and detaches every callback.
    ///
    /// Must not block; asynchronous cleanup is spawned.
    fn teardown(&self);
}

/// Creates transports for the connection manager.
pub trait TransportFactory: Send + Sync {
    /// Creates a fresh, unused transport of `kind`.
    fn create(&self, kind: TransportKind) -> Result<Arc<dyn Transport>>;
}

// ============================================================================
// StreamTransportFactory
// ============================================================================

/// Default factory: WHEP over WebRTC, HLS fallback.
pub struct StreamTransportFactory {
    whep: WhepClient,
    options: ViewerOptions,
    helper: Arc<dyn HelperLoader>,
}

impl StreamTransportFactory {
    /// Creates the factory.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Config`] if the endpoint URLs cannot be derived or the
    /// HTTP client cannot be built.
    pub fn new(options: ViewerOptions, helper: Arc<dyn HelperLoader>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.signaling_timeout)
            .build()
            .map_err(|e| crate::Error::config(format!("HTTP client: {e}")))?;
        let whep = WhepClient::new(http, options.whep_url()?);

        Ok(Self {
            whep,
            options,
            helper,
        })
    }
}

impl TransportFactory for StreamTransportFactory {
    fn create(&self, kind: TransportKind) -> Result<Arc<dyn Transport>> {
        let transport: Arc<dyn Transport> = match kind {
            TransportKind::LowLatency => Arc::new(LowLatencyTransport::new(
                self.whep.clone(),
                self.options.gathering_timeout,
                self.options.ice_servers.clone(),
            )),
            TransportKind::Fallback => Arc::new(FallbackTransport::new(
                self.options.manifest_url()?,
                Arc::clone(&self.helper),
                self.options.helper.clone(),
            )),
        };
        Ok(transport)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_is_stamped() {
        let (notifier, mut rx) = LossNotifier::channel(Generation::new(4));
        notifier.notify("ice failed");

        let loss = rx.try_recv().unwrap();
        assert_eq!(loss.generation, Generation::new(4));
        assert_eq!(loss.reason, "ice failed");
    }

    #[test]
    fn test_notify_after_receiver_dropped() {
        let (notifier, rx) = LossNotifier::channel(Generation::new(1));
        drop(rx);
        notifier.notify("late");
    }

    #[test]
    fn test_factory_builds_both_kinds() {
        let options = ViewerOptions::for_host("127.0.0.1").unwrap();
        let factory =
            StreamTransportFactory::new(options, Arc::new(BuiltinHelperLoader::default())).unwrap();

        let low = factory.create(TransportKind::LowLatency).unwrap();
        let fallback = factory.create(TransportKind::Fallback).unwrap();
        assert_eq!(low.kind(), TransportKind::LowLatency);
        assert_eq!(fallback.kind(), TransportKind::Fallback);
    }
}
