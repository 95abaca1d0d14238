//! Weakly-held observer fan-out.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::domain::entities::ImageSource;
use crate::domain::errors::FetchError;
use crate::domain::ports::FetchObserver;

/// Holds observers weakly and notifies them in registration order.
///
/// Registration is idempotent by pointer identity. A panicking observer
/// is isolated: the panic is caught and the remaining observers still run.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: Mutex<Vec<Weak<dyn FetchObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `observer` unless it is already registered.
    pub fn add(&self, observer: &Arc<dyn FetchObserver>) {
        let mut observers = self.observers.lock();
        observers.retain(|w| w.strong_count() > 0);
        let already = observers
            .iter()
            .any(|w| w.upgrade().is_some_and(|existing| Arc::ptr_eq(&existing, observer)));
        if !already {
            observers.push(Arc::downgrade(observer));
        }
    }

    /// Unregisters `observer`; unknown observers are ignored.
    pub fn remove(&self, observer: &Arc<dyn FetchObserver>) {
        self.observers.lock().retain(|w| {
            w.upgrade()
                .is_some_and(|existing| !Arc::ptr_eq(&existing, observer))
        });
    }

    /// Number of currently live observers.
    pub fn len(&self) -> usize {
        self.observers
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn notify_start(&self, url: &str) {
        self.each(|observer| observer.on_start(url));
    }

    pub fn notify_progress(&self, url: &str, value: f64) {
        self.each(|observer| observer.on_progress(url, value));
    }

    pub fn notify_success(&self, url: &str, source: ImageSource) {
        self.each(|observer| observer.on_success(url, source));
    }

    pub fn notify_failure(&self, url: &str, error: &FetchError) {
        self.each(|observer| observer.on_failure(url, error));
    }

    /// Snapshots the live observers under the lock, then invokes `f` on
    /// each outside it, isolating panics per observer.
    fn each(&self, f: impl Fn(&dyn FetchObserver)) {
        let snapshot: Vec<Arc<dyn FetchObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|w| w.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))).is_err() {
                warn!("observer panicked during notification");
            }
        }
    }
}
