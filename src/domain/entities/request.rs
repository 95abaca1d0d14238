//! Request-scoped value types: tiers, priorities, and caller identity.

use std::sync::Arc;

/// One of the two LRU-bounded partitions of the in-memory cache.
///
/// An entry lives in exactly one tier at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    /// Small, hot partition for latency-sensitive images.
    High,
    /// Larger partition for everything else.
    Low,
}

/// Caller-supplied hint about how urgently an image is needed.
///
/// The hint decides which cache tier a resolved image lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyHint {
    /// The image is about to be shown; cache it in the high tier.
    #[default]
    Foreground,
    /// The image is speculative or off-screen; cache it in the low tier.
    Background,
}

impl LatencyHint {
    /// Returns the cache tier implied by this hint.
    #[must_use]
    pub const fn tier(self) -> CacheTier {
        match self {
            Self::Foreground => CacheTier::High,
            Self::Background => CacheTier::Low,
        }
    }
}

/// Scheduling priority of a download.
///
/// High-priority requests are served from the pending queue before any
/// low-priority request; within a class the order is FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Jump ahead of low-priority queued downloads.
    #[default]
    High,
    /// Queue behind all high-priority downloads.
    Low,
}

/// Opaque identity of a requesting caller.
///
/// The engine holds callers weakly: dropping every strong reference makes
/// the associated waiters eligible for reaping, so a caller that no longer
/// exists never receives a callback and never leaks a registry slot.
#[derive(Debug, Default)]
pub struct CallerToken {
    _private: (),
}

impl CallerToken {
    /// Creates a fresh caller identity.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { _private: () })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_maps_to_tier() {
        assert_eq!(LatencyHint::Foreground.tier(), CacheTier::High);
        assert_eq!(LatencyHint::Background.tier(), CacheTier::Low);
    }

    #[test]
    fn test_caller_tokens_are_distinct() {
        let a = CallerToken::new();
        let b = CallerToken::new();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
