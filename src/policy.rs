//! Reconnect backoff policy.
//!
//! `delay(attempt) = min(base * growth^attempt, max)`

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Multiplier applied per failed attempt.
pub const DEFAULT_GROWTH: f64 = 1.5;

/// Upper bound for any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Exponential backoff with a hard cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay for attempt 0.
    pub base_delay: Duration,
    /// Growth factor per attempt (must be >= 1.0).
    pub growth: f64,
    /// Cap on the delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectPolicy {
    /// Creates the default policy: 2s base, 1.5x growth, 30s cap.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            growth: DEFAULT_GROWTH,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Sets the base delay.
    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the growth factor.
    #[inline]
    #[must_use]
    pub fn with_growth(mut self, growth: f64) -> Self {
        self.growth = growth;
        self
    }

    /// Sets the delay cap.
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Returns the delay to wait before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw_ms = self.base_delay.as_secs_f64() * 1000.0 * self.growth.powi(exponent);

        // powi saturates to infinity for large attempts; min() folds that into the cap
        let ms = if raw_ms.is_nan() { max_ms } else { raw_ms.min(max_ms) };
        Duration::from_millis(ms.round() as u64)
    }

    /// Checks that the policy is usable.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if !(self.growth.is_finite() && self.growth >= 1.0) {
            return Err(format!("growth must be a finite value >= 1.0, got {}", self.growth));
        }
        if self.base_delay > self.max_delay {
            return Err(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
