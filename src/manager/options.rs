//! Viewer configuration.
//!
//! The media origin exposes two endpoints on independently configurable
//! bases:
//!
//! | Endpoint | Derived URL | Default |
//! |----------|-------------|---------|
//! | WHEP signaling | `{whep_base}/whep` | `http://{host}:8889/cam/whep` |
//! | HLS manifest | `{hls_base}/index.m3u8` | `http://{host}:8888/cam/index.m3u8` |
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use livecam::ViewerOptions;
//!
//! let options = ViewerOptions::for_host("cam.local")?
//!     .with_gathering_timeout(Duration::from_millis(1500))
//!     .with_ice_server("stun:stun.l.google.com:19302");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::policy::ReconnectPolicy;
use crate::transport::HelperConfig;
use crate::transport::whep::DEFAULT_GATHERING_TIMEOUT;

// ============================================================================
// Constants
// ============================================================================

/// Default WHEP port of the media origin.
pub const DEFAULT_WHEP_PORT: u16 = 8889;

/// Default HLS port of the media origin.
pub const DEFAULT_HLS_PORT: u16 = 8888;

/// Default stream path.
pub const DEFAULT_STREAM_PATH: &str = "cam";

/// Default bound on the signaling HTTP request.
pub const DEFAULT_SIGNALING_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ViewerOptions
// ============================================================================

/// Endpoints and tuning for a viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerOptions {
    /// Base URL the WHEP endpoint hangs off.
    pub whep_base: Url,

    /// Base URL the HLS manifest hangs off.
    pub hls_base: Url,

    /// Bound on ICE candidate gathering.
    pub gathering_timeout: Duration,

    /// Bound on the signaling request.
    pub signaling_timeout: Duration,

    /// ICE server URLs; empty for LAN-only viewing.
    pub ice_servers: Vec<String>,

    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,

    /// Playlist helper settings.
    pub helper: HelperConfig,
}

// ============================================================================
// Constructors
// ============================================================================

impl ViewerOptions {
    /// Creates options with explicit bases and default tuning.
    #[must_use]
    pub fn new(whep_base: Url, hls_base: Url) -> Self {
        Self {
            whep_base,
            hls_base,
            gathering_timeout: DEFAULT_GATHERING_TIMEOUT,
            signaling_timeout: DEFAULT_SIGNALING_TIMEOUT,
            ice_servers: Vec::new(),
            reconnect: ReconnectPolicy::new(),
            helper: HelperConfig::default(),
        }
    }

    /// Creates options for a media origin on `host` with the default ports
    /// and stream path.
    ///
    /// # Errors
    ///
    /// [`Error::Url`] if `host` does not form a valid URL.
    pub fn for_host(host: &str) -> Result<Self> {
        let whep = Url::parse(&format!(
            "http://{host}:{DEFAULT_WHEP_PORT}/{DEFAULT_STREAM_PATH}"
        ))?;
        let hls = Url::parse(&format!(
            "http://{host}:{DEFAULT_HLS_PORT}/{DEFAULT_STREAM_PATH}"
        ))?;
        Ok(Self::new(whep, hls))
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ViewerOptions {
    /// Sets the ICE gathering bound.
    #[inline]
    #[must_use]
    pub fn with_gathering_timeout(mut self, timeout: Duration) -> Self {
        self.gathering_timeout = timeout;
        self
    }

    /// Sets the signaling request bound.
    #[inline]
    #[must_use]
    pub fn with_signaling_timeout(mut self, timeout: Duration) -> Self {
        self.signaling_timeout = timeout;
        self
    }

    /// Adds an ICE server URL.
    #[inline]
    #[must_use]
    pub fn with_ice_server(mut self, url: impl Into<String>) -> Self {
        self.ice_servers.push(url.into());
        self
    }

    /// Sets the reconnect policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the playlist helper configuration.
    #[inline]
    #[must_use]
    pub fn with_helper(mut self, helper: HelperConfig) -> Self {
        self.helper = helper;
        self
    }
}

// ============================================================================
// Derived URLs
// ============================================================================

impl ViewerOptions {
    /// WHEP signaling endpoint.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the base cannot carry path segments.
    pub fn whep_url(&self) -> Result<Url> {
        child(&self.whep_base, "whep")
    }

    /// HLS manifest URL.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the base cannot carry path segments.
    pub fn manifest_url(&self) -> Result<Url> {
        child(&self.hls_base, "index.m3u8")
    }

    /// Checks the options for values that can never work.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("WHEP base", &self.whep_base), ("HLS base", &self.hls_base)] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::config(format!(
                    "{name} must be an http or https URL, got {url}"
                )));
            }
        }

        if self.gathering_timeout.is_zero() {
            return Err(Error::config("gathering timeout must be non-zero"));
        }
        if self.signaling_timeout.is_zero() {
            return Err(Error::config("signaling timeout must be non-zero"));
        }

        self.reconnect.validate().map_err(Error::config)?;

        self.whep_url()?;
        self.manifest_url()?;
        Ok(())
    }
}

fn child(base: &Url, leaf: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::config(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .push(leaf);
    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_host_defaults() {
        let options = ViewerOptions::for_host("cam.local").unwrap();

        assert_eq!(
            options.whep_url().unwrap().as_str(),
            "http://cam.local:8889/cam/whep"
        );
        assert_eq!(
            options.manifest_url().unwrap().as_str(),
            "http://cam.local:8888/cam/index.m3u8"
        );
        assert_eq!(options.gathering_timeout, Duration::from_millis(3000));
        assert!(options.ice_servers.is_empty());
        assert_eq!(options.reconnect, ReconnectPolicy::new());
        options.validate().unwrap();
    }

    #[test]
    fn test_trailing_slash_base() {
        let options = ViewerOptions::new(
            Url::parse("https://origin.example/live/").unwrap(),
            Url::parse("https://origin.example/hls/live").unwrap(),
        );

        assert_eq!(
            options.whep_url().unwrap().as_str(),
            "https://origin.example/live/whep"
        );
        assert_eq!(
            options.manifest_url().unwrap().as_str(),
            "https://origin.example/hls/live/index.m3u8"
        );
    }

    #[test]
    fn test_validate_rejects_scheme() {
        let options = ViewerOptions::new(
            Url::parse("rtsp://cam.local/cam").unwrap(),
            Url::parse("http://cam.local:8888/cam").unwrap(),
        );

        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("WHEP base"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let options = ViewerOptions::for_host("cam.local")
            .unwrap()
            .with_gathering_timeout(Duration::ZERO);

        assert!(matches!(options.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_builder_methods() {
        let options = ViewerOptions::for_host("cam.local")
            .unwrap()
            .with_ice_server("stun:stun.example:3478")
            .with_signaling_timeout(Duration::from_secs(2));

        assert_eq!(options.ice_servers, vec!["stun:stun.example:3478"]);
        assert_eq!(options.signaling_timeout, Duration::from_secs(2));
    }
}
