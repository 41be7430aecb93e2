//! Type-safe identifiers.
//!
//! Newtype wrappers keep counters with different meanings from being mixed
//! up at compile time.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Generation
// ============================================================================

/// Liveness generation of a transport.
///
/// Every transport the manager creates is stamped with a fresh generation.
/// Deferred completions (negotiation results, loss notifications, sink
/// bindings) carry their generation and are ignored unless it is still the
/// current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(u64);

impl Generation {
    /// The generation before any transport has been created.
    pub const ZERO: Self = Self(0);

    /// Creates a generation from a raw counter value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the generation that follows this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_increments() {
        assert_eq!(Generation::ZERO.next(), Generation::new(1));
        assert!(Generation::new(5) < Generation::new(5).next());
    }

    #[test]
    fn test_display() {
        assert_eq!(Generation::new(7).to_string(), "gen-7");
    }
}
