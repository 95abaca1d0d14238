//! Registry of callers awaiting terminal delivery for a key.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::domain::entities::{CallerToken, DeliveredImage, ResourceKey};
use crate::domain::errors::FetchResult;

/// One registered caller: weak identity, completion channel, optional
/// progress channel. The weak reference must never prolong the caller's
/// lifetime; a waiter whose caller died is equivalent to no waiter.
pub(crate) struct Waiter {
    pub caller: Weak<CallerToken>,
    pub completion: oneshot::Sender<FetchResult<DeliveredImage>>,
    pub progress: Option<mpsc::UnboundedSender<f64>>,
}

impl Waiter {
    pub fn new(
        caller: &Arc<CallerToken>,
        completion: oneshot::Sender<FetchResult<DeliveredImage>>,
        progress: Option<mpsc::UnboundedSender<f64>>,
    ) -> Self {
        Self {
            caller: Arc::downgrade(caller),
            completion,
            progress,
        }
    }

    fn is_live(&self) -> bool {
        self.caller.strong_count() > 0
    }

    /// Sends the terminal result, unless the caller is already gone.
    pub fn deliver(self, result: FetchResult<DeliveredImage>) {
        if self.is_live() {
            let _ = self.completion.send(result);
        }
    }
}

/// Mapping from key to the waiters attached to it.
///
/// Insertions and drains serialize on one lock; callbacks are always
/// invoked outside it. Dead waiters are dropped opportunistically on
/// drain and wholesale by the periodic sweep.
#[derive(Default)]
pub(crate) struct WaiterRegistry {
    buckets: Mutex<HashMap<ResourceKey, Vec<Waiter>>>,
}

impl WaiterRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, key: ResourceKey, waiter: Waiter) {
        trace!(key = %key, "registered waiter");
        self.buckets.lock().entry(key).or_default().push(waiter);
    }

    /// Atomically removes and returns every waiter for `key`, dropping
    /// the dead ones.
    pub fn drain(&self, key: &ResourceKey) -> Vec<Waiter> {
        let bucket = self.buckets.lock().remove(key).unwrap_or_default();
        bucket.into_iter().filter(Waiter::is_live).collect()
    }

    /// Removes the waiter registered under `key` by `caller`, if any.
    pub fn remove_caller(&self, key: &ResourceKey, caller: &Arc<CallerToken>) -> Option<Waiter> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.get_mut(key)?;
        let position = bucket
            .iter()
            .position(|w| std::ptr::eq(w.caller.as_ptr(), Arc::as_ptr(caller)))?;
        let waiter = bucket.remove(position);
        if bucket.is_empty() {
            buckets.remove(key);
        }
        Some(waiter)
    }

    /// Number of live waiters registered for `key`.
    pub fn live_count(&self, key: &ResourceKey) -> usize {
        self.buckets
            .lock()
            .get(key)
            .map_or(0, |bucket| bucket.iter().filter(|w| w.is_live()).count())
    }

    /// Forwards a progress value to every live waiter for `key`. A waiter
    /// registered after this call only observes later values.
    pub fn forward_progress(&self, key: &ResourceKey, value: f64) {
        let sinks: Vec<mpsc::UnboundedSender<f64>> = {
            let buckets = self.buckets.lock();
            let Some(bucket) = buckets.get(key) else {
                return;
            };
            bucket
                .iter()
                .filter(|w| w.is_live())
                .filter_map(|w| w.progress.clone())
                .collect()
        };
        for sink in sinks {
            let _ = sink.send(value);
        }
    }

    /// Drops every dead waiter. Returns the keys whose buckets became
    /// empty (and were removed), so the caller can tear down downloads
    /// nobody is waiting for anymore.
    pub fn reap(&self) -> Vec<ResourceKey> {
        let mut buckets = self.buckets.lock();
        let mut orphaned = Vec::new();
        buckets.retain(|key, bucket| {
            bucket.retain(Waiter::is_live);
            if bucket.is_empty() {
                orphaned.push(key.clone());
                false
            } else {
                true
            }
        });
        if !orphaned.is_empty() {
            trace!(count = orphaned.len(), "reaped waiter buckets with dead callers");
        }
        orphaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{DeliveredImage, ImageSource};
    use crate::test_support::test_image;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new(name)
    }

    fn waiter_for(
        caller: &Arc<CallerToken>,
    ) -> (Waiter, oneshot::Receiver<FetchResult<DeliveredImage>>) {
        let (tx, rx) = oneshot::channel();
        (Waiter::new(caller, tx, None), rx)
    }

    #[tokio::test]
    async fn test_drain_delivers_to_live_waiters() {
        let registry = WaiterRegistry::new();
        let caller = CallerToken::new();
        let (waiter, rx) = waiter_for(&caller);
        registry.register(key("k"), waiter);

        let drained = registry.drain(&key("k"));
        assert_eq!(drained.len(), 1);
        for waiter in drained {
            waiter.deliver(Ok(DeliveredImage::new(test_image(2, 2), ImageSource::Memory)));
        }
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(registry.live_count(&key("k")), 0);
    }

    #[tokio::test]
    async fn test_dead_caller_receives_nothing() {
        let registry = WaiterRegistry::new();
        let caller = CallerToken::new();
        let (waiter, mut rx) = waiter_for(&caller);
        registry.register(key("k"), waiter);
        drop(caller);

        let drained = registry.drain(&key("k"));
        assert!(drained.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reap_reports_orphaned_keys() {
        let registry = WaiterRegistry::new();
        let dead = CallerToken::new();
        let (waiter, _rx) = waiter_for(&dead);
        registry.register(key("orphaned"), waiter);
        drop(dead);

        let live = CallerToken::new();
        let (waiter, _rx2) = waiter_for(&live);
        registry.register(key("kept"), waiter);

        let orphaned = registry.reap();
        assert_eq!(orphaned, vec![key("orphaned")]);
        assert_eq!(registry.live_count(&key("kept")), 1);
    }

    #[tokio::test]
    async fn test_remove_caller_targets_one_waiter() {
        let registry = WaiterRegistry::new();
        let first = CallerToken::new();
        let second = CallerToken::new();
        let (waiter_a, _rx_a) = waiter_for(&first);
        let (waiter_b, _rx_b) = waiter_for(&second);
        registry.register(key("k"), waiter_a);
        registry.register(key("k"), waiter_b);

        let removed = registry.remove_caller(&key("k"), &first);
        assert!(removed.is_some());
        assert_eq!(registry.live_count(&key("k")), 1);
        assert!(registry.remove_caller(&key("k"), &first).is_none());
    }

    #[tokio::test]
    async fn test_progress_reaches_only_current_waiters() {
        let registry = WaiterRegistry::new();
        let caller = CallerToken::new();
        let (tx, rx) = oneshot::channel();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        registry.register(key("k"), Waiter::new(&caller, tx, Some(progress_tx)));
        drop(rx);

        registry.forward_progress(&key("k"), 0.5);
        assert_eq!(progress_rx.try_recv().unwrap(), 0.5);

        let late = CallerToken::new();
        let (late_tx, _late_rx) = oneshot::channel();
        let (late_progress_tx, mut late_progress_rx) = mpsc::unbounded_channel();
        registry.register(key("k"), Waiter::new(&late, late_tx, Some(late_progress_tx)));

        registry.forward_progress(&key("k"), 0.75);
        assert_eq!(late_progress_rx.try_recv().unwrap(), 0.75);
        assert!(late_progress_rx.try_recv().is_err());
    }
}
