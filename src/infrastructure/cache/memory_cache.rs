//! In-memory two-tier LRU image cache with download sentinels.

use std::collections::HashMap;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheTier, DecodedImage, ResourceKey};

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// A ready image is cached; it has been promoted to most recently used.
    Hit(DecodedImage),
    /// A download for this key is already promised; the caller should wait
    /// for its completion instead of starting another one.
    Wait,
    /// Nothing is cached. A pending sentinel has been installed atomically,
    /// so every concurrent lookup for the same key now observes [`Lookup::Wait`].
    Miss,
}

/// Ready entries of one tier, LRU-ordered with a manual bound.
///
/// The underlying `LruCache` is unbounded; eviction runs explicitly after
/// each insert so that pending sentinels (kept outside this structure) can
/// never be evicted and a zero limit fully disables the tier.
struct TierState {
    entries: LruCache<ResourceKey, DecodedImage>,
    limit: usize,
}

impl TierState {
    fn new(limit: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            limit,
        }
    }

    fn insert(&mut self, key: ResourceKey, image: DecodedImage) {
        self.entries.put(key, image);
        while self.entries.len() > self.limit {
            if let Some((evicted, _)) = self.entries.pop_lru() {
                trace!(key = %evicted, "evicted least recently used entry");
            }
        }
    }
}

struct CacheState {
    high: TierState,
    low: TierState,
    /// Coalescing sentinels: keys with a promised download, and the tier
    /// the eventual image should land in. Exempt from eviction.
    pending: HashMap<ResourceKey, CacheTier>,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn tier_mut(&mut self, tier: CacheTier) -> &mut TierState {
        match tier {
            CacheTier::High => &mut self.high,
            CacheTier::Low => &mut self.low,
        }
    }

    /// A tier with limit zero is disabled; ready entries land in the other
    /// tier instead of being inserted and immediately evicted.
    fn effective_tier(&self, tier: CacheTier) -> CacheTier {
        match tier {
            CacheTier::High if self.high.limit == 0 => CacheTier::Low,
            other => other,
        }
    }

    fn remove_ready(&mut self, key: &ResourceKey) -> Option<DecodedImage> {
        self.high
            .entries
            .pop(key)
            .or_else(|| self.low.entries.pop(key))
    }
}

/// Snapshot of cache counters for diagnostics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of lookups that returned a ready image.
    pub hits: u64,
    /// Number of lookups that installed a pending sentinel.
    pub misses: u64,
    /// Hit rate as a percentage of terminal lookups.
    pub hit_rate: f64,
    /// Ready entries currently in the high tier.
    pub high_len: usize,
    /// Ready entries currently in the low tier.
    pub low_len: usize,
}

/// Two-tier bounded mapping from resource key to decoded image.
///
/// All operations serialize on one internal lock and perform no I/O, so
/// the cache itself cannot fail. A `Miss` atomically installs a pending
/// sentinel, which is what guarantees that at most one download job ever
/// exists per key.
pub struct MemoryCache {
    state: Mutex<CacheState>,
}

impl MemoryCache {
    /// Creates a cache with the given per-tier entry limits.
    #[must_use]
    pub fn new(high_limit: usize, low_limit: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                high: TierState::new(high_limit),
                low: TierState::new(low_limit),
                pending: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Looks up `key`, promoting a hit to most recently used within its
    /// tier. On miss, a pending sentinel is installed under the same lock
    /// acquisition, so a concurrent lookup for the same key returns
    /// [`Lookup::Wait`] rather than a second [`Lookup::Miss`].
    pub fn lookup(&self, key: &ResourceKey, tier: CacheTier) -> Lookup {
        let mut state = self.state.lock();
        if let Some(image) = state.high.entries.get(key) {
            let image = image.clone();
            state.hits += 1;
            trace!(key = %key, tier = "high", "memory cache hit");
            return Lookup::Hit(image);
        }
        if let Some(image) = state.low.entries.get(key) {
            let image = image.clone();
            state.hits += 1;
            trace!(key = %key, tier = "low", "memory cache hit");
            return Lookup::Hit(image);
        }
        if state.pending.contains_key(key) {
            trace!(key = %key, "memory cache wait");
            return Lookup::Wait;
        }
        state.misses += 1;
        state.pending.insert(key.clone(), tier);
        trace!(key = %key, "memory cache miss, sentinel installed");
        Lookup::Miss
    }

    /// Inserts a ready image, replacing any pending sentinel for `key`.
    ///
    /// The entry becomes most recently used in its tier; if the tier then
    /// exceeds its limit, least-recently-used entries are evicted before
    /// this call returns. Sentinels for other keys are never evicted.
    pub fn insert(&self, key: ResourceKey, image: DecodedImage, tier: CacheTier) {
        let mut state = self.state.lock();
        state.pending.remove(&key);
        // A key lives in exactly one tier.
        state.remove_ready(&key);
        let tier = state.effective_tier(tier);
        debug!(key = %key, tier = ?tier, "storing image in memory cache");
        state.tier_mut(tier).insert(key, image);
    }

    /// Removes any entry for `key`, ready or pending.
    ///
    /// Called on terminal download failure so a later request may retry.
    pub fn remove(&self, key: &ResourceKey) {
        let mut state = self.state.lock();
        state.pending.remove(key);
        if state.remove_ready(key).is_some() {
            debug!(key = %key, "removed image from memory cache");
        }
    }

    /// Removes only the pending sentinel for `key`, leaving any ready
    /// entry in place. Used by the waiter sweep to unwedge keys whose
    /// promised download never materialized.
    pub fn remove_pending(&self, key: &ResourceKey) {
        self.state.lock().pending.remove(key);
    }

    /// Moves a ready entry to `tier`, making it most recently used there.
    ///
    /// Eviction rules apply to the destination tier. A key that is absent
    /// or pending is left untouched.
    pub fn promote(&self, key: &ResourceKey, tier: CacheTier) {
        let mut state = self.state.lock();
        let tier = state.effective_tier(tier);
        if state.tier_mut(tier).entries.contains(key) {
            state.tier_mut(tier).entries.promote(key);
            return;
        }
        if let Some(image) = state.remove_ready(key) {
            debug!(key = %key, tier = ?tier, "promoted image between tiers");
            state.tier_mut(tier).insert(key.clone(), image);
        }
    }

    /// Drops all ready entries in one tier. Pending sentinels are retained;
    /// dropping them would orphan an in-flight download.
    pub fn clear_tier(&self, tier: CacheTier) {
        let mut state = self.state.lock();
        state.tier_mut(tier).entries.clear();
        debug!(tier = ?tier, "cleared memory cache tier");
    }

    /// Drops all ready entries in both tiers, retaining pending sentinels.
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        state.high.entries.clear();
        state.low.entries.clear();
        debug!("cleared memory cache");
    }

    /// Returns the number of ready entries in `tier`.
    #[must_use]
    pub fn len(&self, tier: CacheTier) -> usize {
        let mut state = self.state.lock();
        state.tier_mut(tier).entries.len()
    }

    /// Returns true if neither tier holds a ready entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.high.entries.is_empty() && state.low.entries.is_empty()
    }

    /// Returns true if a ready entry exists for `key` in either tier.
    #[must_use]
    pub fn contains(&self, key: &ResourceKey) -> bool {
        let state = self.state.lock();
        state.high.entries.contains(key) || state.low.entries.contains(key)
    }

    /// Returns true if a pending sentinel exists for `key`.
    #[must_use]
    pub fn has_pending(&self, key: &ResourceKey) -> bool {
        self.state.lock().pending.contains_key(key)
    }

    /// Returns a snapshot of the cache counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let total = state.hits + state.misses;
        let hit_rate = if total > 0 {
            (state.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            hit_rate,
            high_len: state.high.entries.len(),
            low_len: state.low.entries.len(),
        }
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("MemoryCache")
            .field("high_len", &stats.high_len)
            .field("low_len", &stats.low_len)
            .finish_non_exhaustive()
    }
}
