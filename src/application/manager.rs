//! Public facade over the request-coordination engine.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, LazyLock, OnceLock};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::info;

use crate::application::config::{ImageConfig, RequestOptions};
use crate::application::coordinator::Coordinator;
use crate::domain::entities::{CacheTier, CallerToken, DeliveredImage};
use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::{FetchObserver, ImageDecoder, NetworkTransport, Sleeper};
use crate::infrastructure::cache::{CacheStats, MemoryCache};
use crate::infrastructure::clock::TokioSleeper;
use crate::infrastructure::decoder::DefaultDecoder;
use crate::infrastructure::download::Downloader;
use crate::infrastructure::storage::DiskStore;
use crate::infrastructure::transport::HttpTransport;

static SHARED: OnceLock<Arc<ImageManager>> = OnceLock::new();
static INSTANCES: LazyLock<Mutex<HashMap<String, Arc<ImageManager>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Future resolving to the terminal outcome of one request.
///
/// The future owns its caller identity: dropping it abandons the request,
/// and the engine reaps the abandoned waiter instead of notifying it.
/// Results are sent over a oneshot channel, so the completion runs on
/// whatever executor awaits this future.
pub struct RequestFuture {
    caller: Arc<CallerToken>,
    inner: Pin<Box<dyn Future<Output = FetchResult<DeliveredImage>> + Send>>,
}

impl RequestFuture {
    /// The caller identity of this request, usable with
    /// [`ImageManager::cancel`].
    #[must_use]
    pub fn caller(&self) -> Arc<CallerToken> {
        self.caller.clone()
    }
}

impl Future for RequestFuture {
    type Output = FetchResult<DeliveredImage>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

/// Stream of fractional progress values for one request.
///
/// Values are non-decreasing in `[0.0, 1.0]` and end when the request
/// terminates.
pub struct ProgressStream {
    receiver: mpsc::UnboundedReceiver<f64>,
}

impl futures_util::Stream for ProgressStream {
    type Item = f64;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// The engine's public entry point.
///
/// One manager per configuration; [`ImageManager::instance_for`] memoizes
/// managers by the configuration's structural fingerprint, so two configs
/// that fingerprint equal share caches, storage, and scheduler state.
///
/// Constructors spawn background tasks and must run inside a tokio
/// runtime.
pub struct ImageManager {
    config: ImageConfig,
    coordinator: Arc<Coordinator>,
}

impl ImageManager {
    /// Creates an independent engine with the bundled transport, decoder,
    /// and clock.
    #[must_use]
    pub fn new(config: ImageConfig) -> Self {
        Self::with_components(
            config,
            Arc::new(HttpTransport::new()),
            Arc::new(DefaultDecoder),
            Arc::new(TokioSleeper),
        )
    }

    /// Creates an engine with injected ports. Tests use this to swap in a
    /// scripted transport and a recording sleeper.
    #[must_use]
    pub fn with_components(
        config: ImageConfig,
        transport: Arc<dyn NetworkTransport>,
        decoder: Arc<dyn ImageDecoder>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let cache = Arc::new(MemoryCache::new(
            config.cache.high_tier_limit,
            config.cache.low_tier_limit,
        ));
        let store = config.storage.enabled.then(|| {
            let root = config
                .storage
                .root_path
                .clone()
                .unwrap_or_else(DiskStore::default_root);
            Arc::new(DiskStore::new(
                root,
                config.storage.path_provider.clone(),
                config.storage.compression_provider.clone(),
            ))
        });
        let downloader = Downloader::new(
            config.network.max_concurrent_downloads,
            config.network.retry_policy,
            config.network.template(),
            transport,
            decoder,
            sleeper,
        );
        let coordinator = Coordinator::new(
            cache,
            store,
            downloader,
            config.storage.id_provider.clone(),
        );
        info!(fingerprint = %config.fingerprint(), "image engine created");
        Self {
            config,
            coordinator,
        }
    }

    /// Process-wide singleton with default configuration.
    pub fn shared() -> Arc<Self> {
        SHARED
            .get_or_init(|| Arc::new(Self::new(ImageConfig::default())))
            .clone()
    }

    /// Returns the memoized engine for `config`, creating it on first use.
    ///
    /// Memoization keys on [`ImageConfig::fingerprint`]; see its docs for
    /// what the fingerprint does and does not capture.
    pub fn instance_for(config: &ImageConfig) -> Arc<Self> {
        let mut instances = INSTANCES.lock();
        instances
            .entry(config.fingerprint())
            .or_insert_with(|| Arc::new(Self::new(config.clone())))
            .clone()
    }

    /// The configuration this engine was built from.
    #[must_use]
    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Requests the image at `url`.
    ///
    /// Served from memory, disk, or network, in that order; concurrent
    /// requests for the same resource share one download. Dropping the
    /// returned future abandons the request.
    pub fn request(&self, url: &str, options: RequestOptions) -> RequestFuture {
        self.request_as(url, options, &CallerToken::new())
    }

    /// Like [`ImageManager::request`], with an explicit caller identity
    /// for later [`ImageManager::cancel`] calls.
    pub fn request_as(
        &self,
        url: &str,
        options: RequestOptions,
        caller: &Arc<CallerToken>,
    ) -> RequestFuture {
        self.build_future(url, options, caller.clone(), None)
    }

    /// Requests the image at `url` and additionally streams download
    /// progress. A request resolved from cache or disk terminates without
    /// emitting progress.
    pub fn request_with_progress(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> (ProgressStream, RequestFuture) {
        let (tx, rx) = mpsc::unbounded_channel();
        let future = self.build_future(url, options, CallerToken::new(), Some(tx));
        (ProgressStream { receiver: rx }, future)
    }

    fn build_future(
        &self,
        url: &str,
        options: RequestOptions,
        caller: Arc<CallerToken>,
        progress: Option<mpsc::UnboundedSender<f64>>,
    ) -> RequestFuture {
        let coordinator = self.coordinator.clone();
        let url = url.to_owned();
        let task_caller = caller.clone();
        RequestFuture {
            caller,
            inner: Box::pin(async move {
                let rx = coordinator
                    .request(&url, options, &task_caller, progress)
                    .await;
                rx.await.unwrap_or(Err(FetchError::Cancelled))
            }),
        }
    }

    /// Fetches and caches the image at `url`, discarding the handle.
    ///
    /// The prefetch holds its own caller identity until the request
    /// terminates, so it is never reaped early.
    pub fn prefetch(&self, url: &str, options: RequestOptions) {
        let coordinator = self.coordinator.clone();
        let url = url.to_owned();
        tokio::spawn(async move {
            let caller = CallerToken::new();
            let rx = coordinator.request(&url, options, &caller, None).await;
            let _ = rx.await;
            drop(caller);
        });
    }

    /// Cancels the waiter registered for `url` by `caller`. The download
    /// continues while other live waiters remain; the last cancellation
    /// tears it down.
    pub fn cancel(&self, url: &str, caller: &Arc<CallerToken>) {
        self.coordinator.cancel(url, caller);
    }

    /// Cancels every waiter for `url` and the underlying download.
    pub fn cancel_all(&self, url: &str) {
        self.coordinator.cancel_all(url);
    }

    /// Moves the cached entry for `url` into `tier`, for callers whose
    /// latency needs changed after the image was first resolved. No-op if
    /// the entry is absent or still downloading.
    pub fn promote_cached(&self, url: &str, tier: CacheTier) {
        let key = self.coordinator.key_for(url);
        self.coordinator.cache().promote(&key, tier);
    }

    /// Removes the cached entry for `url` from memory.
    pub fn remove_cached(&self, url: &str) {
        let key = self.coordinator.key_for(url);
        self.coordinator.cache().remove(&key);
    }

    /// Drops every ready entry in one cache tier.
    pub fn clear_cache_tier(&self, tier: CacheTier) {
        self.coordinator.cache().clear_tier(tier);
    }

    /// Drops every ready entry in both cache tiers.
    pub fn clear_cache(&self) {
        self.coordinator.cache().clear_all();
    }

    /// Number of ready entries in one cache tier.
    #[must_use]
    pub fn cache_size(&self, tier: CacheTier) -> usize {
        self.coordinator.cache().len(tier)
    }

    /// Snapshot of the cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.coordinator.cache().stats()
    }

    /// Applies the configured memory-pressure policy: drop everything,
    /// drop the low tier, or keep both.
    pub fn handle_memory_warning(&self) {
        if self.config.cache.clear_all_on_memory_warning {
            self.coordinator.cache().clear_all();
        } else if self.config.cache.clear_low_on_memory_warning {
            self.coordinator.cache().clear_tier(CacheTier::Low);
        }
    }

    /// Total size in bytes of the disk store; zero when storage is
    /// disabled.
    pub async fn storage_size_bytes(&self) -> u64 {
        match self.coordinator.store() {
            Some(store) => store.size_bytes().await,
            None => 0,
        }
    }

    /// Number of entries in the disk store; zero when storage is disabled.
    pub async fn storage_count(&self) -> usize {
        match self.coordinator.store() {
            Some(store) => store.count().await,
            None => 0,
        }
    }

    /// Deletes every entry in the disk store.
    pub async fn clear_storage(&self) {
        if let Some(store) = self.coordinator.store() {
            store.clear().await;
        }
    }

    /// The on-disk path an image for `url` is (or would be) stored at,
    /// or `None` when storage is disabled.
    #[must_use]
    pub fn file_path_for(&self, url: &str) -> Option<PathBuf> {
        let key = self.coordinator.key_for(url);
        self.coordinator
            .store()
            .map(|store| store.file_path(url, &key))
    }

    /// Registers a lifecycle observer. Observers are held weakly and
    /// registration is idempotent.
    pub fn add_observer(&self, observer: &Arc<dyn FetchObserver>) {
        self.coordinator.observers().add(observer);
    }

    /// Unregisters a lifecycle observer.
    pub fn remove_observer(&self, observer: &Arc<dyn FetchObserver>) {
        self.coordinator.observers().remove(observer);
    }

    /// Raises or lowers the download concurrency ceiling; raising it
    /// drains queued downloads into the new slots.
    pub fn set_max_concurrent_downloads(&self, max_concurrent: u32) {
        self.coordinator.downloader().set_max_concurrent(max_concurrent);
    }
}

impl std::fmt::Debug for ImageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
