//! Engine configuration and per-request options.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::entities::{LatencyHint, Priority};
use crate::domain::ports::{
    AuthHook, CompressionProvider, IdProvider, PathProvider, RequestTemplate,
};
use crate::infrastructure::download::retry::RetryPolicy;
use crate::infrastructure::storage::{
    AdaptiveCompression, FlatPathProvider, LosslessCompression, LossyCompression, Md5IdProvider,
};

/// Network-facing options.
#[derive(Clone)]
pub struct NetworkConfig {
    /// Concurrency ceiling of the download scheduler. Zero queues every
    /// submission until the ceiling is raised.
    pub max_concurrent_downloads: u32,
    /// Per-attempt timeout. Total wall time of a request may exceed it by
    /// up to `max_retries * max_delay`.
    pub timeout: Duration,
    /// Whether requests may go out over metered cellular interfaces.
    pub allows_cellular_access: bool,
    /// Retry parameterization for download attempts.
    pub retry_policy: RetryPolicy,
    /// Headers merged into every outgoing request.
    pub custom_headers: Vec<(String, String)>,
    /// Hook that may mutate each outgoing request, once per attempt.
    pub authentication_hook: Option<AuthHook>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
            timeout: Duration::from_secs(30),
            allows_cellular_access: true,
            retry_policy: RetryPolicy::standard(),
            custom_headers: Vec::new(),
            authentication_hook: None,
        }
    }
}

impl NetworkConfig {
    /// Builds the per-attempt request template from these options.
    #[must_use]
    pub fn template(&self) -> RequestTemplate {
        RequestTemplate::new(
            self.custom_headers.clone(),
            self.timeout,
            self.allows_cellular_access,
            self.authentication_hook.clone(),
        )
    }
}

impl std::fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("max_concurrent_downloads", &self.max_concurrent_downloads)
            .field("timeout", &self.timeout)
            .field("allows_cellular_access", &self.allows_cellular_access)
            .field("retry_policy", &self.retry_policy)
            .field("custom_headers", &self.custom_headers)
            .field("authentication_hook", &self.authentication_hook.is_some())
            .finish()
    }
}

/// In-memory cache options.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry limit of the high tier. Zero disables the tier; ready
    /// entries land in the low tier instead.
    pub high_tier_limit: usize,
    /// Entry limit of the low tier.
    pub low_tier_limit: usize,
    /// Drop the low tier when the host signals memory pressure.
    pub clear_low_on_memory_warning: bool,
    /// Drop both tiers when the host signals memory pressure.
    pub clear_all_on_memory_warning: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            high_tier_limit: 50,
            low_tier_limit: 100,
            clear_low_on_memory_warning: true,
            clear_all_on_memory_warning: false,
        }
    }
}

/// Persistent storage options.
#[derive(Clone)]
pub struct StorageConfig {
    /// Whether downloads are persisted and the disk probed on miss.
    pub enabled: bool,
    /// Override of the default storage root.
    pub root_path: Option<PathBuf>,
    /// Key derivation for cache and storage addressing.
    pub id_provider: Arc<dyn IdProvider>,
    /// On-disk layout.
    pub path_provider: Arc<dyn PathProvider>,
    /// Storage codec.
    pub compression_provider: Arc<dyn CompressionProvider>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root_path: None,
            id_provider: Arc::new(Md5IdProvider),
            path_provider: Arc::new(FlatPathProvider),
            compression_provider: Arc::new(LosslessCompression),
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("enabled", &self.enabled)
            .field("root_path", &self.root_path)
            .field("id_provider", &self.id_provider.name())
            .field("path_provider", &self.path_provider.name())
            .field("compression_provider", &self.compression_provider.name())
            .finish()
    }
}

/// Full engine configuration.
///
/// Two configurations with equal [`ImageConfig::fingerprint`] values are
/// treated as the same instance by
/// [`ImageManager::instance_for`](crate::application::manager::ImageManager::instance_for)
/// and share caches, storage, and scheduler state.
#[derive(Debug, Clone, Default)]
pub struct ImageConfig {
    /// Network-facing options.
    pub network: NetworkConfig,
    /// In-memory cache options.
    pub cache: CacheConfig,
    /// Persistent storage options.
    pub storage: StorageConfig,
}

impl ImageConfig {
    /// Preset tuned for throughput: more parallelism, bigger cache,
    /// eager retries, lossy storage.
    #[must_use]
    pub fn high_performance() -> Self {
        Self {
            network: NetworkConfig {
                max_concurrent_downloads: 8,
                retry_policy: RetryPolicy::aggressive(),
                ..NetworkConfig::default()
            },
            cache: CacheConfig {
                high_tier_limit: 100,
                low_tier_limit: 200,
                ..CacheConfig::default()
            },
            storage: StorageConfig {
                compression_provider: Arc::new(LossyCompression::default()),
                ..StorageConfig::default()
            },
        }
    }

    /// Preset tuned for constrained hosts: little parallelism, small cache.
    #[must_use]
    pub fn low_memory() -> Self {
        Self {
            network: NetworkConfig {
                max_concurrent_downloads: 2,
                ..NetworkConfig::default()
            },
            cache: CacheConfig {
                high_tier_limit: 20,
                low_tier_limit: 50,
                ..CacheConfig::default()
            },
            storage: StorageConfig::default(),
        }
    }

    /// Preset tuned for flaky connectivity: cellular off, generous caches,
    /// adaptive storage codec.
    #[must_use]
    pub fn offline_first() -> Self {
        Self {
            network: NetworkConfig {
                max_concurrent_downloads: 2,
                allows_cellular_access: false,
                ..NetworkConfig::default()
            },
            cache: CacheConfig {
                high_tier_limit: 200,
                low_tier_limit: 500,
                ..CacheConfig::default()
            },
            storage: StorageConfig {
                compression_provider: Arc::new(AdaptiveCompression::default()),
                ..StorageConfig::default()
            },
        }
    }

    /// Normalized structural identity of the public options.
    ///
    /// Providers contribute their stable names; the authentication hook
    /// contributes only its presence, since closures have no structural
    /// identity.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut headers = self.network.custom_headers.clone();
        headers.sort();
        let headers = headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(",");
        let retry = &self.network.retry_policy;
        format!(
            "net(conc={},timeout_ms={},cell={},retry={}/{}/{}/{},headers=[{}],auth={})|\
             cache(high={},low={},clear_low={},clear_all={})|\
             store(on={},root={:?},id={},path={},comp={})",
            self.network.max_concurrent_downloads,
            self.network.timeout.as_millis(),
            self.network.allows_cellular_access,
            retry.max_retries,
            retry.base_delay.as_millis(),
            retry.backoff_multiplier,
            retry.max_delay.as_millis(),
            headers,
            self.network.authentication_hook.is_some(),
            self.cache.high_tier_limit,
            self.cache.low_tier_limit,
            self.cache.clear_low_on_memory_warning,
            self.cache.clear_all_on_memory_warning,
            self.storage.enabled,
            self.storage.root_path,
            self.storage.id_provider.name(),
            self.storage.path_provider.name(),
            self.storage.compression_provider.name(),
        )
    }
}

/// Per-request options, frozen for the duration of the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Urgency hint; decides the cache tier of the resolved image.
    pub latency_hint: LatencyHint,
    /// Scheduling priority of the download, if one is needed.
    pub priority: Priority,
    /// Skip the memory and disk lookups and fetch fresh bytes. The result
    /// still lands in the cache, and storage writes follow the storage
    /// configuration as usual.
    pub force_reload: bool,
}

impl RequestOptions {
    /// Options for speculative or off-screen loads: background hint,
    /// low scheduling priority.
    #[must_use]
    pub fn background() -> Self {
        Self {
            latency_hint: LatencyHint::Background,
            priority: Priority::Low,
            force_reload: false,
        }
    }
}
