//! HLS manifest fetching and parsing.
//!
//! Parsing is done by `m3u8-rs`; this module converts its output into owned
//! types with absolute URLs and checked durations, and follows a master
//! playlist down to a media playlist.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use bytes::Bytes;
use m3u8_rs::Playlist;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Maximum master → media indirections followed.
const MAX_PLAYLIST_DEPTH: usize = 4;

/// Target duration assumed when a playlist declares none.
const FALLBACK_TARGET_DURATION: Duration = Duration::from_secs(2);

// ============================================================================
// Types
// ============================================================================

/// One media segment from a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    /// Absolute segment URL.
    pub uri: Url,
    /// Media sequence number.
    pub sequence: u64,
    /// Declared duration.
    pub duration: Duration,
    /// Absolute `EXT-X-MAP` URL, if the segment needs an init section.
    pub init: Option<Url>,
}

/// Parsed media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaManifest {
    /// `EXT-X-TARGETDURATION`.
    pub target_duration: Duration,
    /// `EXT-X-MEDIA-SEQUENCE` of the first segment.
    pub media_sequence: u64,
    /// `EXT-X-ENDLIST` present.
    pub end_list: bool,
    /// Segments in playlist order.
    pub segments: Vec<SegmentRef>,
}

/// Parsed playlist of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    /// Variant list; URLs are absolute, in playlist order.
    Master(Vec<Url>),
    /// Segment list.
    Media(MediaManifest),
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses playlist bytes, resolving relative URIs against `base`.
///
/// # Errors
///
/// [`Error::Playlist`] if the bytes are not a valid playlist or contain
/// unresolvable URIs.
pub fn parse_manifest(bytes: &[u8], base: &Url) -> Result<Manifest> {
    match m3u8_rs::parse_playlist(bytes) {
        Ok((_, Playlist::MasterPlaylist(master))) => {
            let variants = master
                .variants
                .iter()
                .map(|variant| join(base, &variant.uri))
                .collect::<Result<Vec<_>>>()?;
            Ok(Manifest::Master(variants))
        }
        Ok((_, Playlist::MediaPlaylist(media))) => {
            let target_duration = Duration::try_from_secs_f64(media.target_duration as f64)
                .ok()
                .filter(|d| !d.is_zero())
                .unwrap_or(FALLBACK_TARGET_DURATION);

            let mut segments = Vec::with_capacity(media.segments.len());
            let mut init = None;
            for (offset, segment) in media.segments.iter().enumerate() {
                // EXT-X-MAP applies to every following segment until replaced
                if let Some(map) = &segment.map {
                    init = Some(join(base, &map.uri)?);
                }
                let sequence = u64::try_from(offset)
                    .ok()
                    .and_then(|offset| media.media_sequence.checked_add(offset))
                    .ok_or_else(|| {
                        Error::playlist(format!(
                            "media sequence overflows after {} at {base}",
                            media.media_sequence
                        ))
                    })?;
                segments.push(SegmentRef {
                    uri: join(base, &segment.uri)?,
                    sequence,
                    duration: Duration::try_from_secs_f32(segment.duration).unwrap_or_default(),
                    init: init.clone(),
                });
            }

            Ok(Manifest::Media(MediaManifest {
                target_duration,
                media_sequence: media.media_sequence,
                end_list: media.end_list,
                segments,
            }))
        }
        Err(e) => Err(Error::playlist(format!("parse error at {base}: {e:?}"))),
    }
}

fn join(base: &Url, uri: &str) -> Result<Url> {
    base.join(uri.trim())
        .map_err(|e| Error::playlist(format!("bad URI {uri:?}: {e}")))
}

// ============================================================================
// Fetching
// ============================================================================

/// Fetches a URL, requiring a success status.
///
/// # Errors
///
/// - [`Error::Http`] on transport errors
/// - [`Error::Playlist`] on a non-success status
pub async fn fetch(http: &reqwest::Client, url: &Url) -> Result<Bytes> {
    let response = http.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::playlist(format!("GET {url} returned HTTP {status}")));
    }
    Ok(response.bytes().await?)
}

/// Fetches `url` and follows master playlists to the first variant.
///
/// Returns the media playlist URL and its parsed contents.
///
/// # Errors
///
/// [`Error::Playlist`] for fetch or parse failures, empty master playlists,
/// or nesting deeper than four levels.
pub async fn resolve_media(http: &reqwest::Client, url: &Url) -> Result<(Url, MediaManifest)> {
    let mut current = url.clone();

    for _ in 0..MAX_PLAYLIST_DEPTH {
        let body = fetch(http, &current).await?;
        match parse_manifest(&body, &current)? {
            Manifest::Media(media) => return Ok((current, media)),
            Manifest::Master(variants) => {
                let first = variants
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::playlist("master playlist has no variants"))?;
                debug!(from = %current, to = %first, "Following master playlist");
                current = first;
            }
        }
    }

    Err(Error::playlist("playlist nesting too deep"))
}

/// Fetches and parses a media playlist.
///
/// # Errors
///
/// [`Error::Playlist`] if the URL no longer serves a media playlist.
pub async fn refresh_media(http: &reqwest::Client, url: &Url) -> Result<MediaManifest> {
    let body = fetch(http, url).await?;
    match parse_manifest(&body, url)? {
        Manifest::Media(media) => Ok(media),
        Manifest::Master(_) => Err(Error::playlist(format!(
            "{url} turned into a master playlist"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
