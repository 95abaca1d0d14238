//! Request routing: cache, disk, download, and delivery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::config::RequestOptions;
use crate::application::observers::ObserverRegistry;
use crate::application::waiters::{Waiter, WaiterRegistry};
use crate::domain::entities::{
    CacheTier, CallerToken, DeliveredImage, ImageSource, Priority, ResourceKey,
};
use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::{IdProvider, ProgressFn};
use crate::infrastructure::cache::{Lookup, MemoryCache};
use crate::infrastructure::download::{CompletionFn, Downloader};
use crate::infrastructure::storage::DiskStore;

/// Cadence of the sweep that drops waiters whose callers died.
const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Routes each request through cache, disk, and download, and owns the
/// waiter registry through which every result is delivered.
pub(crate) struct Coordinator {
    cache: Arc<MemoryCache>,
    store: Option<Arc<DiskStore>>,
    downloader: Arc<Downloader>,
    ids: Arc<dyn IdProvider>,
    waiters: Arc<WaiterRegistry>,
    observers: Arc<ObserverRegistry>,
    reaper: JoinHandle<()>,
}

impl Coordinator {
    /// Creates a coordinator and starts its periodic waiter sweep.
    pub fn new(
        cache: Arc<MemoryCache>,
        store: Option<Arc<DiskStore>>,
        downloader: Arc<Downloader>,
        ids: Arc<dyn IdProvider>,
    ) -> Arc<Self> {
        let waiters = WaiterRegistry::new();
        let observers = ObserverRegistry::new();
        let reaper = tokio::spawn(Self::reap_loop(
            waiters.clone(),
            downloader.clone(),
            cache.clone(),
        ));
        Arc::new(Self {
            cache,
            store,
            downloader,
            ids,
            waiters,
            observers,
            reaper,
        })
    }

    async fn reap_loop(
        waiters: Arc<WaiterRegistry>,
        downloader: Arc<Downloader>,
        cache: Arc<MemoryCache>,
    ) {
        loop {
            tokio::time::sleep(REAP_INTERVAL).await;
            Self::sweep(&waiters, &downloader, &cache);
        }
    }

    /// One reap pass: drop dead waiters and tear down downloads that no
    /// live caller is waiting for anymore. A key left with neither
    /// waiters nor a job also loses its cache sentinel, in case a caller
    /// vanished between installing it and submitting the download.
    fn sweep(
        waiters: &Arc<WaiterRegistry>,
        downloader: &Arc<Downloader>,
        cache: &Arc<MemoryCache>,
    ) {
        for key in waiters.reap() {
            if downloader.has_job(&key) {
                debug!(key = %key, "all waiters gone, cancelling orphaned download");
                downloader.cancel(&key);
            } else {
                cache.remove_pending(&key);
            }
        }
    }

    /// Routes one request. Returns the channel on which the terminal
    /// result will arrive; the caller may drop it at any time, in which
    /// case the registered waiter is reaped instead of notified.
    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
        caller: &Arc<CallerToken>,
        progress: Option<mpsc::UnboundedSender<f64>>,
    ) -> oneshot::Receiver<FetchResult<DeliveredImage>> {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter::new(caller, tx, progress);

        if let Err(error) = validate_url(url) {
            self.observers.notify_failure(url, &error);
            waiter.deliver(Err(error));
            return rx;
        }

        let key = self.ids.key_for(url);
        let tier = options.latency_hint.tier();
        self.observers.notify_start(url);

        if !options.force_reload {
            match self.cache.lookup(&key, tier) {
                Lookup::Hit(image) => {
                    self.observers.notify_success(url, ImageSource::Memory);
                    waiter.deliver(Ok(DeliveredImage::new(image, ImageSource::Memory)));
                    return rx;
                }
                Lookup::Wait => {
                    // A download is already promised; join it.
                    self.waiters.register(key.clone(), waiter);
                    // The job may have terminated between the lookup and
                    // the registration. Every delivery path updates the
                    // cache before draining the registry, so a re-lookup
                    // now disambiguates: Wait means the drain is still
                    // ahead and will pick this waiter up; Hit or Miss
                    // means it already happened and this waiter must be
                    // handled here.
                    match self.cache.lookup(&key, tier) {
                        Lookup::Wait => {}
                        Lookup::Hit(image) => {
                            if let Some(waiter) = self.waiters.remove_caller(&key, caller) {
                                self.observers.notify_success(url, ImageSource::Memory);
                                waiter
                                    .deliver(Ok(DeliveredImage::new(image, ImageSource::Memory)));
                            }
                        }
                        Lookup::Miss => {
                            // The promised download failed and took its
                            // sentinel with it; the re-lookup just
                            // installed a fresh one. If the failure drain
                            // already delivered to this caller (and to any
                            // other joiner), a resubmit would fetch for
                            // nobody. Only start over while someone is
                            // still registered; otherwise drop the fresh
                            // sentinel so the key is not left promising a
                            // download that no job backs.
                            if self.waiters.live_count(&key) > 0 {
                                self.submit_download(url, key, tier, options.priority);
                            } else {
                                self.cache.remove_pending(&key);
                            }
                        }
                    }
                    return rx;
                }
                Lookup::Miss => {}
            }
        }

        // This caller waits in the registry like any coalesced joiner, so
        // every delivery path finds it there.
        self.waiters.register(key.clone(), waiter);

        if !options.force_reload
            && let Some(store) = &self.store
            && let Some(image) = store.read(url, &key).await
        {
            self.cache.insert(key.clone(), image.clone(), tier);
            // Insert happens before delivery; drain also picks up any
            // waiter that raced in behind our sentinel.
            let drained = self.waiters.drain(&key);
            self.observers.notify_success(url, ImageSource::Disk);
            for waiter in drained {
                waiter.deliver(Ok(DeliveredImage::new(image.clone(), ImageSource::Disk)));
            }
            return rx;
        }

        self.submit_download(url, key, tier, options.priority);
        rx
    }

    /// Detaches the waiter registered by `caller` for `url`, delivering
    /// it `Cancelled`. The download itself continues unless no live
    /// waiter remains.
    pub fn cancel(&self, url: &str, caller: &Arc<CallerToken>) {
        let key = self.ids.key_for(url);
        if let Some(waiter) = self.waiters.remove_caller(&key, caller) {
            waiter.deliver(Err(FetchError::Cancelled));
        }
        if self.waiters.live_count(&key) == 0 && self.downloader.has_job(&key) {
            debug!(key = %key, "last waiter cancelled, tearing down download");
            self.downloader.cancel(&key);
        }
    }

    /// Cancels every waiter for `url` and the underlying download.
    pub fn cancel_all(&self, url: &str) {
        let key = self.ids.key_for(url);
        for waiter in self.waiters.drain(&key) {
            waiter.deliver(Err(FetchError::Cancelled));
        }
        if self.downloader.has_job(&key) {
            self.downloader.cancel(&key);
        }
    }

    fn submit_download(
        &self,
        url: &str,
        key: ResourceKey,
        tier: CacheTier,
        priority: Priority,
    ) {
        let relay = self.progress_relay(url.to_owned(), key.clone());
        let hook = self.termination_hook(url.to_owned(), key.clone(), tier);
        self.downloader
            .submit(key, url.to_owned(), priority, Some(relay), hook);
    }

    /// Fans download progress out to the registry and the observers. The
    /// registry is snapshotted per event, so a subscriber that joins
    /// mid-download only observes future values.
    fn progress_relay(&self, url: String, key: ResourceKey) -> ProgressFn {
        let waiters = self.waiters.clone();
        let observers = self.observers.clone();
        Arc::new(move |value| {
            waiters.forward_progress(&key, value);
            observers.notify_progress(&url, value);
        })
    }

    /// The downloader's terminal hook. On success the image is cached
    /// before any waiter is notified, and the storage write happens on a
    /// spawned task, off the delivery path. On failure the cache sentinel
    /// is removed so a later request may retry.
    fn termination_hook(&self, url: String, key: ResourceKey, tier: CacheTier) -> CompletionFn {
        let cache = self.cache.clone();
        let store = self.store.clone();
        let waiters = self.waiters.clone();
        let observers = self.observers.clone();
        Box::new(move |outcome| match outcome {
            Ok(image) => {
                cache.insert(key.clone(), image.clone(), tier);
                if let Some(store) = store {
                    let image = image.clone();
                    let url = url.clone();
                    let key = key.clone();
                    tokio::spawn(async move {
                        if let Err(error) = store.write(&url, &key, &image).await {
                            warn!(key = %key, error = %error, "failed to persist downloaded image");
                        }
                    });
                }
                let drained = waiters.drain(&key);
                observers.notify_success(&url, ImageSource::Network);
                for waiter in drained {
                    waiter.deliver(Ok(DeliveredImage::new(image.clone(), ImageSource::Network)));
                }
            }
            Err(error) => {
                cache.remove(&key);
                let drained = waiters.drain(&key);
                observers.notify_failure(&url, &error);
                for waiter in drained {
                    waiter.deliver(Err(error.clone()));
                }
            }
        })
    }

    pub fn key_for(&self, url: &str) -> ResourceKey {
        self.ids.key_for(url)
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    pub fn store(&self) -> Option<&Arc<DiskStore>> {
        self.store.as_ref()
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    #[cfg(test)]
    pub fn sweep_now(&self) {
        Self::sweep(&self.waiters, &self.downloader, &self.cache);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

fn validate_url(url: &str) -> FetchResult<()> {
    let parsed =
        url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(FetchError::InvalidUrl(format!(
            "unsupported scheme {other:?}"
        ))),
    }
}
