//! Playback sink abstraction.
//!
//! The sink is the single playback surface (a video element, a renderer, a
//! recorder). It is owned by the embedding application; this crate only
//! binds transport output to it.
//!
//! # Single Binding
//!
//! All access goes through a [`SinkSlot`]. The slot stamps each binding with
//! the transport [`Generation`] that requested it and refuses bindings from
//! any generation but the current one. Clearing the sink and moving to the
//! next generation happen under one lock, so a superseded transport can never
//! write into the sink after its successor has been bound.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use url::Url;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{Error, Result};
use crate::identifiers::Generation;

// ============================================================================
// Types
// ============================================================================

/// Segment of fallback media delivered by the playlist helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    /// Media sequence number (init sections reuse the first media sequence).
    pub sequence: u64,
    /// Playback duration; zero for init sections.
    pub duration: Duration,
    /// `true` for an `EXT-X-MAP` initialization section.
    pub init: bool,
    /// Raw container bytes.
    pub data: Bytes,
}

/// Media source a transport attaches to the sink.
#[derive(Clone)]
pub enum SinkSource {
    /// Incoming WebRTC track (audio or video).
    Track(Arc<TrackRemote>),
    /// Segment pulled by the playlist helper.
    Chunk(MediaChunk),
}

impl fmt::Debug for SinkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Track(track) => f
                .debug_tuple("Track")
                .field(&track.kind().to_string())
                .finish(),
            Self::Chunk(chunk) => f.debug_tuple("Chunk").field(&chunk.sequence).finish(),
        }
    }
}

/// Event emitted by a sink playing a manifest natively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Enough data loaded to start playback.
    LoadedData,
    /// Playback failed; always fatal.
    Error(String),
}

/// Receiver for native playback events.
pub type PlaybackEvents = mpsc::UnboundedReceiver<PlaybackEvent>;

// ============================================================================
// PlaybackSink
// ============================================================================

/// Playback surface implemented by the embedding application.
///
/// Implementations must be cheap and non-blocking: every call is made while
/// the slot lock is held.
pub trait PlaybackSink: Send + Sync {
    /// Feeds a media source into the sink.
    fn attach(&self, source: SinkSource);

    /// Drops every source currently bound.
    fn clear(&self);

    /// Whether the sink can play an HLS manifest by itself.
    fn supports_native_hls(&self) -> bool {
        false
    }

    /// Starts native playback of `manifest`.
    ///
    /// The returned channel yields [`PlaybackEvent::LoadedData`] once playback
    /// starts and [`PlaybackEvent::Error`] on any fatal error.
    fn play_native(&self, manifest: &Url) -> Result<PlaybackEvents> {
        let _ = manifest;
        Err(Error::Unsupported)
    }
}

// ============================================================================
// SinkSlot
// ============================================================================

struct SlotState {
    /// Generation allowed to bind.
    current: Generation,
    /// Generation that currently has something bound.
    bound: Option<Generation>,
}

/// Arbiter guaranteeing at most one transport is bound to the sink.
pub struct SinkSlot {
    sink: Arc<dyn PlaybackSink>,
    state: Mutex<SlotState>,
}

impl fmt::Debug for SinkSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SinkSlot")
            .field("current", &state.current)
            .field("bound", &state.bound)
            .finish_non_exhaustive()
    }
}

impl SinkSlot {
    /// Wraps a sink.
    #[must_use]
    pub fn new(sink: Arc<dyn PlaybackSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            state: Mutex::new(SlotState {
                current: Generation::ZERO,
                bound: None,
            }),
        })
    }

    /// Clears the sink and hands out the binding right to a new generation.
    ///
    /// Every handle issued before this call becomes stale.
    pub fn rebind(self: &Arc<Self>) -> SinkHandle {
        let mut state = self.state.lock();
        self.clear_locked(&mut state);
        state.current = state.current.next();

        debug!(generation = %state.current, "Sink slot rebound");

        SinkHandle {
            slot: Arc::clone(self),
            generation: state.current,
        }
    }

    /// Clears the sink and invalidates every outstanding handle.
    pub fn release(&self) {
        let mut state = self.state.lock();
        self.clear_locked(&mut state);
        state.current = state.current.next();
    }

    /// Returns the generation currently allowed to bind.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Generation {
        self.state.lock().current
    }

    /// Returns the generation that has media bound, if any.
    #[inline]
    #[must_use]
    pub fn bound(&self) -> Option<Generation> {
        self.state.lock().bound
    }

    /// Whether the wrapped sink plays HLS natively.
    #[inline]
    #[must_use]
    pub fn supports_native_hls(&self) -> bool {
        self.sink.supports_native_hls()
    }

    fn clear_locked(&self, state: &mut SlotState) {
        if let Some(generation) = state.bound.take() {
            debug!(%generation, "Clearing sink binding");
            self.sink.clear();
        }
    }
}

// ============================================================================
// SinkHandle
// ============================================================================

/// Generation-stamped right to bind media to the sink.
#[derive(Clone)]
pub struct SinkHandle {
    slot: Arc<SinkSlot>,
    generation: Generation,
}

impl fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl SinkHandle {
    /// Generation this handle was issued for.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns `true` while no newer generation has been issued.
    #[inline]
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.slot.current() == self.generation
    }

    /// Whether the sink plays HLS natively.
    #[inline]
    #[must_use]
    pub fn supports_native_hls(&self) -> bool {
        self.slot.supports_native_hls()
    }

    /// Attaches a source to the sink.
    ///
    /// # Errors
    ///
    /// [`Error::Superseded`] if this handle is stale; nothing is attached.
    pub fn attach(&self, source: SinkSource) -> Result<()> {
        let mut state = self.slot.state.lock();
        if state.current != self.generation {
            trace!(generation = %self.generation, "Dropping source from stale transport");
            return Err(Error::Superseded);
        }

        state.bound = Some(self.generation);
        self.slot.sink.attach(source);
        Ok(())
    }

    /// Binds a manifest for native playback.
    ///
    /// # Errors
    ///
    /// - [`Error::Superseded`] if this handle is stale
    /// - whatever the sink reports when it cannot start playback
    pub fn play_native(&self, manifest: &Url) -> Result<PlaybackEvents> {
        let mut state = self.slot.state.lock();
        if state.current != self.generation {
            return Err(Error::Superseded);
        }

        let events = self.slot.sink.play_native(manifest)?;
        state.bound = Some(self.generation);
        Ok(events)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingSink {
        attached: Mutex<Vec<u64>>,
        clears: Mutex<usize>,
    }

    impl PlaybackSink for CountingSink {
        fn attach(&self, source: SinkSource) {
            if let SinkSource::Chunk(chunk) = source {
                self.attached.lock().push(chunk.sequence);
            }
        }

        fn clear(&self) {
            *self.clears.lock() += 1;
            self.attached.lock().clear();
        }
    }

    fn chunk(sequence: u64) -> SinkSource {
        SinkSource::Chunk(MediaChunk {
            sequence,
            duration: Duration::from_secs(1),
            init: false,
            data: Bytes::from_static(b"x"),
        })
    }

    #[test]
    fn test_stale_handle_cannot_attach() {
        let sink = Arc::new(CountingSink::default());
        let slot = SinkSlot::new(sink.clone());

        let first = slot.rebind();
        first.attach(chunk(1)).unwrap();
        assert_eq!(slot.bound(), Some(first.generation()));

        let second = slot.rebind();
        assert!(!first.is_current());
        assert!(matches!(first.attach(chunk(2)), Err(Error::Superseded)));

        second.attach(chunk(3)).unwrap();
        assert_eq!(*sink.attached.lock(), vec![3]);
        assert_eq!(slot.bound(), Some(second.generation()));
    }

    #[test]
    fn test_release_clears_only_when_bound() {
        let sink = Arc::new(CountingSink::default());
        let slot = SinkSlot::new(sink.clone());

        slot.release();
        assert_eq!(*sink.clears.lock(), 0);

        let handle = slot.rebind();
        handle.attach(chunk(1)).unwrap();
        slot.release();

        assert_eq!(*sink.clears.lock(), 1);
        assert_eq!(slot.bound(), None);
        assert!(!handle.is_current());
    }

    #[test]
    fn test_default_sink_has_no_native_playback() {
        let sink = Arc::new(CountingSink::default());
        let slot = SinkSlot::new(sink);
        let handle = slot.rebind();

        assert!(!handle.supports_native_hls());
        let url = Url::parse("http://cam.local:8888/cam/index.m3u8").unwrap();
        assert!(matches!(handle.play_native(&url), Err(Error::Unsupported)));
        assert_eq!(slot.bound(), None);
    }
}
