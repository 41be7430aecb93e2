//! Screen wake lock.
//!
//! The user toggles a "wanted" flag. While it is set and the page is visible
//! a wake lock is held. The platform may revoke the lock at any time (it
//! always does on hide); that clears the handle but keeps the flag, so the
//! lock is re-acquired the next time the page is shown.
//!
//! Acquisition is asynchronous. [`WakeLock`] only tracks state and hands out
//! [`AcquireRequest`]s; the caller runs them and reports back through
//! [`WakeLock::on_acquired`]. Each request carries an epoch so a result that
//! arrives after the situation changed is released instead of kept.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::Result;

// ============================================================================
// Provider Traits
// ============================================================================

/// Platform wake-lock primitive.
#[async_trait]
pub trait WakeLockProvider: Send + Sync {
    /// Whether the platform supports wake locks at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Requests a screen wake lock.
    async fn acquire(&self) -> Result<Box<dyn WakeLockSentinel>>;
}

/// A held wake lock.
pub trait WakeLockSentinel: Send + Sync {
    /// Releases the lock.
    fn release(self: Box<Self>);
}

// ============================================================================
// AcquireRequest
// ============================================================================

/// An acquisition the caller should run.
#[derive(Clone)]
pub struct AcquireRequest {
    /// Epoch to report back with the result.
    pub epoch: u64,
    /// Provider to acquire from.
    pub provider: Arc<dyn WakeLockProvider>,
}

impl fmt::Debug for AcquireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireRequest")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WakeLock
// ============================================================================

/// Wake-lock state tracker.
#[derive(Default)]
pub struct WakeLock {
    provider: Option<Arc<dyn WakeLockProvider>>,
    wanted: bool,
    held: Option<Box<dyn WakeLockSentinel>>,
    pending: bool,
    epoch: u64,
}

impl fmt::Debug for WakeLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeLock")
            .field("supported", &self.is_supported())
            .field("wanted", &self.wanted)
            .field("held", &self.held.is_some())
            .field("pending", &self.pending)
            .finish()
    }
}

impl WakeLock {
    /// Creates a tracker; `None` means the platform has no wake lock.
    #[must_use]
    pub fn new(provider: Option<Arc<dyn WakeLockProvider>>) -> Self {
        Self {
            provider,
            ..Self::default()
        }
    }

    /// Whether a usable provider is present.
    #[inline]
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.provider.as_ref().is_some_and(|p| p.is_supported())
    }

    /// Whether the user asked for the screen to stay on.
    #[inline]
    #[must_use]
    pub fn is_wanted(&self) -> bool {
        self.wanted
    }

    /// Whether a lock is currently held.
    #[inline]
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Updates the user's choice.
    pub fn set_wanted(&mut self, wanted: bool, visible: bool) -> Option<AcquireRequest> {
        if !self.is_supported() {
            debug!(wanted, "Wake lock unsupported, ignoring toggle");
            return None;
        }

        self.wanted = wanted;
        if wanted {
            if visible { self.request() } else { None }
        } else {
            self.drop_held();
            None
        }
    }

    /// Page became visible: re-acquire if still wanted.
    pub fn on_visible(&mut self) -> Option<AcquireRequest> {
        if self.wanted && self.is_supported() {
            self.request()
        } else {
            None
        }
    }

    /// Page was hidden: the lock goes away, the wish stays.
    pub fn on_hidden(&mut self) {
        self.drop_held();
    }

    /// The platform revoked the lock on its own.
    pub fn on_revoked(&mut self) {
        if self.held.take().is_some() {
            debug!(wanted = self.wanted, "Wake lock revoked by platform");
        }
    }

    /// Reports the outcome of an [`AcquireRequest`].
    pub fn on_acquired(
        &mut self,
        epoch: u64,
        result: Result<Box<dyn WakeLockSentinel>>,
        visible: bool,
    ) {
        if epoch != self.epoch {
            if let Ok(sentinel) = result {
                debug!(epoch, current = self.epoch, "Releasing wake lock from stale request");
                sentinel.release();
            }
            return;
        }

        self.pending = false;

        match result {
            Ok(sentinel) if self.wanted && visible && self.held.is_none() => {
                info!("Wake lock acquired");
                self.held = Some(sentinel);
            }
            Ok(sentinel) => sentinel.release(),
            Err(e) => warn!(error = %e, "Wake lock request failed"),
        }
    }

    /// Releases everything, including the wish.
    pub fn shutdown(&mut self) {
        self.wanted = false;
        self.drop_held();
    }

    fn request(&mut self) -> Option<AcquireRequest> {
        if self.held.is_some() || self.pending {
            return None;
        }

        let provider = self.provider.clone()?;
        self.pending = true;
        Some(AcquireRequest {
            epoch: self.epoch,
            provider,
        })
    }

    fn drop_held(&mut self) {
        // A result still in flight must not be kept.
        self.epoch = self.epoch.wrapping_add(1);
        self.pending = false;

        if let Some(sentinel) = self.held.take() {
            debug!("Releasing wake lock");
            sentinel.release();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::Error;

    #[derive(Default)]
    struct Counter {
        released: AtomicUsize,
    }

    struct Sentinel(Arc<Counter>);

    impl WakeLockSentinel for Sentinel {
        fn release(self: Box<Self>) {
            self.0.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Provider;

    #[async_trait]
    impl WakeLockProvider for Provider {
        async fn acquire(&self) -> Result<Box<dyn WakeLockSentinel>> {
            Err(Error::Unsupported)
        }
    }

    fn tracker() -> WakeLock {
        WakeLock::new(Some(Arc::new(Provider)))
    }

    #[test]
    fn test_unsupported_is_noop() {
        let mut lock = WakeLock::new(None);
        assert!(lock.set_wanted(true, true).is_none());
        assert!(!lock.is_wanted());
    }

    #[test]
    fn test_acquire_only_when_visible() {
        let mut lock = tracker();
        assert!(lock.set_wanted(true, false).is_none());
        assert!(lock.is_wanted());

        let request = lock.on_visible().unwrap();
        assert!(lock.on_visible().is_none(), "one request in flight at a time");

        let counter = Arc::new(Counter::default());
        lock.on_acquired(request.epoch, Ok(Box::new(Sentinel(counter.clone()))), true);
        assert!(lock.is_held());
    }

    #[test]
    fn test_revoke_keeps_wish_and_reacquires() {
        let mut lock = tracker();
        let counter = Arc::new(Counter::default());

        let request = lock.set_wanted(true, true).unwrap();
        lock.on_acquired(request.epoch, Ok(Box::new(Sentinel(counter.clone()))), true);

        lock.on_revoked();
        assert!(!lock.is_held());
        assert!(lock.is_wanted());
        assert!(lock.on_visible().is_some());
    }

    #[test]
    fn test_hide_releases_and_discards_late_result() {
        let mut lock = tracker();
        let counter = Arc::new(Counter::default());

        let request = lock.set_wanted(true, true).unwrap();
        lock.on_hidden();
        lock.on_acquired(request.epoch, Ok(Box::new(Sentinel(counter.clone()))), false);

        assert!(!lock.is_held());
        assert_eq!(counter.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_is_not_fatal() {
        let mut lock = tracker();
        let request = lock.set_wanted(true, true).unwrap();
        lock.on_acquired(request.epoch, Err(Error::Unsupported), true);

        assert!(!lock.is_held());
        assert!(lock.is_wanted());
        assert!(lock.on_visible().is_some());
    }

    #[test]
    fn test_unwanted_releases() {
        let mut lock = tracker();
        let counter = Arc::new(Counter::default());

        let request = lock.set_wanted(true, true).unwrap();
        lock.on_acquired(request.epoch, Ok(Box::new(Sentinel(counter.clone()))), true);
        lock.set_wanted(false, true);

        assert!(!lock.is_held());
        assert_eq!(counter.released.load(Ordering::SeqCst), 1);
    }
}
