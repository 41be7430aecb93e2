//! Built-in playlist helper.
//!
//! [`HlsPlayer`] resolves the manifest to a media playlist, reports
//! [`HelperEvent::ManifestParsed`], then keeps pulling new segments into the
//! sink until it is aborted or hits a fatal error.
//!
//! # Pull Loop
//!
//! - First pass starts at the live edge: the newest segment in low-latency
//!   mode, otherwise the last three.
//! - The init section (`EXT-X-MAP`) is delivered before the first segment
//!   that uses it, and again whenever it changes.
//! - Only segments past the last delivered media sequence are pulled, and
//!   they are also deduplicated by URI. The remembered set is trimmed to the
//!   back-buffer duration, never dropping URIs still listed in the playlist.
//! - A playlist whose newest segment is behind the last delivered one means
//!   the origin restarted; the window is reset and starts again at the live
//!   edge, re-sending the init section.
//! - The playlist is refreshed every half target duration in low-latency
//!   mode, every target duration otherwise.
//! - Three consecutive refresh failures, an oversized segment,
//!   `EXT-X-ENDLIST`, or no new segment for three target durations are
//!   fatal.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::sink::{MediaChunk, SinkHandle, SinkSource};

use super::helper::{HelperConfig, HelperEvent, HelperSession, PlaylistHelper};
use super::playlist::{self, MediaManifest, SegmentRef};

// ============================================================================
// Constants
// ============================================================================

/// Consecutive failed refreshes before giving up.
const MAX_REFRESH_FAILURES: u32 = 3;

/// Upper bound on a single segment download.
const MAX_SEGMENT_BYTES: usize = 64 * 1024 * 1024;

/// Segments to start with when not in low-latency mode.
const STANDARD_START_SEGMENTS: usize = 3;

/// Target durations without a new segment before the feed counts as frozen.
const STALL_TARGET_DURATIONS: u32 = 3;

// ============================================================================
// HlsPlayer
// ============================================================================

/// Playlist helper implemented on top of `reqwest` and `m3u8-rs`.
#[derive(Debug, Clone)]
pub struct HlsPlayer {
    http: reqwest::Client,
}

impl HlsPlayer {
    /// Creates a player using `http` for all requests.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl PlaylistHelper for HlsPlayer {
    fn start(&self, manifest: Url, config: &HelperConfig, sink: SinkHandle) -> HelperSession {
        let (tx, events) = mpsc::unbounded_channel();
        let http = self.http.clone();
        let config = config.clone();

        let task = tokio::spawn(async move {
            let generation = sink.generation();
            match pull(&http, &manifest, &config, &sink, &tx).await {
                Ok(()) | Err(Error::Superseded) => {
                    debug!(%generation, "Playlist helper stopped");
                }
                Err(e) => {
                    warn!(%generation, error = %e, "Playlist helper failed");
                    let _ = tx.send(HelperEvent::Fatal(e.to_string()));
                }
            }
        });

        HelperSession {
            events,
            abort: task.abort_handle(),
        }
    }
}

async fn pull(
    http: &reqwest::Client,
    manifest: &Url,
    config: &HelperConfig,
    sink: &SinkHandle,
    tx: &mpsc::UnboundedSender<HelperEvent>,
) -> Result<()> {
    let (media_url, mut playlist) = playlist::resolve_media(http, manifest).await?;

    if tx
        .send(HelperEvent::ManifestParsed {
            media_playlist: media_url.clone(),
        })
        .is_err()
    {
        return Ok(());
    }

    let mut window = SegmentWindow::new(config);
    let mut current_init: Option<Url> = None;
    let mut failures = 0u32;

    loop {
        let segments = window.select(&playlist);
        if window.take_rewound() {
            current_init = None;
        }

        for segment in segments {
            if let Some(init) = &segment.init
                && current_init.as_ref() != Some(init)
            {
                let data = download(http, init).await?;
                sink.attach(SinkSource::Chunk(MediaChunk {
                    sequence: segment.sequence,
                    duration: Duration::ZERO,
                    init: true,
                    data,
                }))?;
                current_init = Some(init.clone());
            }

            let data = download(http, &segment.uri).await?;
            trace!(sequence = segment.sequence, bytes = data.len(), "Segment delivered");
            sink.attach(SinkSource::Chunk(MediaChunk {
                sequence: segment.sequence,
                duration: segment.duration,
                init: false,
                data,
            }))?;
        }

        if playlist.end_list {
            return Err(Error::playback("live stream ended"));
        }

        if window.is_stalled() {
            return Err(Error::playback(format!(
                "no new segment for {STALL_TARGET_DURATIONS} target durations"
            )));
        }

        tokio::time::sleep(window.refresh_interval(&playlist)).await;

        match playlist::refresh_media(http, &media_url).await {
            Ok(fresh) => {
                failures = 0;
                playlist = fresh;
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "Playlist refresh failed");
                if failures >= MAX_REFRESH_FAILURES {
                    return Err(e);
                }
            }
        }
    }
}

async fn download(http: &reqwest::Client, url: &Url) -> Result<Bytes> {
    let response = http.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::playback(format!("segment {url} returned HTTP {status}")));
    }

    let mut body = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > MAX_SEGMENT_BYTES {
            return Err(Error::playback(format!(
                "segment {url} exceeds {MAX_SEGMENT_BYTES} bytes"
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

// ============================================================================
// SegmentWindow
// ============================================================================

/// Decides which playlist segments are new.
#[derive(Debug)]
struct SegmentWindow {
    low_latency: bool,
    back_buffer: Duration,
    seen: FxHashSet<Url>,
    history: VecDeque<(Url, Duration)>,
    retained: Duration,
    started: bool,
    last_sequence: Option<u64>,
    idle_refreshes: u32,
    rewound: bool,
}

impl SegmentWindow {
    fn new(config: &HelperConfig) -> Self {
        Self {
            low_latency: config.low_latency,
            back_buffer: config.back_buffer,
            seen: FxHashSet::default(),
            history: VecDeque::new(),
            retained: Duration::ZERO,
            started: false,
            last_sequence: None,
            idle_refreshes: 0,
            rewound: false,
        }
    }

    fn reset(&mut self) {
        self.seen.clear();
        self.history.clear();
        self.retained = Duration::ZERO;
        self.started = false;
        self.last_sequence = None;
        self.idle_refreshes = 0;
        self.rewound = true;
    }

    /// Whether the last [`select`](Self::select) restarted the window.
    fn take_rewound(&mut self) -> bool {
        std::mem::take(&mut self.rewound)
    }

    /// Consecutive selections without a new segment reached the stall bound.
    fn is_stalled(&self) -> bool {
        let per_target = if self.low_latency { 2 } else { 1 };
        self.idle_refreshes >= STALL_TARGET_DURATIONS * per_target
    }

    /// Returns segments not delivered yet and remembers them.
    fn select(&mut self, playlist: &MediaManifest) -> Vec<SegmentRef> {
        if let (Some(last), Some(newest)) = (self.last_sequence, playlist.segments.last())
            && newest.sequence < last
        {
            warn!(
                last,
                newest = newest.sequence,
                "Media sequence went backwards, restarting at live edge"
            );
            self.reset();
        }

        let candidates: &[SegmentRef] = if self.started {
            &playlist.segments
        } else {
            self.started = true;
            let keep = if self.low_latency { 1 } else { STANDARD_START_SEGMENTS };
            let skip = playlist.segments.len().saturating_sub(keep);
            &playlist.segments[skip..]
        };

        let fresh: Vec<SegmentRef> = candidates
            .iter()
            .filter(|segment| {
                self.last_sequence.is_none_or(|last| segment.sequence > last)
                    && !self.seen.contains(&segment.uri)
            })
            .cloned()
            .collect();

        for segment in &fresh {
            self.last_sequence = Some(segment.sequence);
            self.seen.insert(segment.uri.clone());
            self.history.push_back((segment.uri.clone(), segment.duration));
            self.retained += segment.duration;
        }

        if fresh.is_empty() {
            self.idle_refreshes = self.idle_refreshes.saturating_add(1);
        } else {
            self.idle_refreshes = 0;
        }

        self.trim(playlist);
        fresh
    }

    fn trim(&mut self, playlist: &MediaManifest) {
        while self.retained > self.back_buffer {
            let Some((uri, _)) = self.history.front() else {
                break;
            };
            if playlist.segments.iter().any(|s| &s.uri == uri) {
                break;
            }
            if let Some((uri, duration)) = self.history.pop_front() {
                self.seen.remove(&uri);
                self.retained = self.retained.saturating_sub(duration);
            }
        }
    }

    fn refresh_interval(&self, playlist: &MediaManifest) -> Duration {
        if self.low_latency {
            playlist.target_duration / 2
        } else {
            playlist.target_duration
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
