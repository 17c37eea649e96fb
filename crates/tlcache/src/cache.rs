//! Two-level memoizing cache
//!
//! [`TlCache`] puts a [`MemoryTier`] in front of a [`DiskTier`]. Memoized
//! calls are answered from memory while live; misses run the wrapped function
//! and write the result through to both tiers. When the function fails, the
//! last value found in either tier is served instead and republished with a
//! short TTL, so a failing dependency is not hammered on every call.
//!
//! One task-reentrant lock covers every memoized call on a cache, from the
//! memory lookup to the write-through. Calls for different keys are
//! serialized too; in exchange there is no stampede or lost update for any
//! key. A memoized function may call other functions memoized on the same
//! cache, and a [`RefreshScope`] holds the lock for its whole lifetime.

use std::{
    fmt,
    future::Future,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    config::{TlCacheBuilder, TlCacheConfig},
    disk::DiskTier,
    key::{CacheArgs, CacheKey, CallArgs, Signature},
    lock::{ReentrantGuard, ReentrantLock},
    memory::MemoryTier,
    metrics::{CacheMetrics, CacheStats},
    Result,
};

/// Stored form of a memoized result; `Absent` records that the function
/// produced no value.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Memo<T> {
    Value(T),
    Absent,
}

fn encode_memo<T: Serialize>(value: Option<&T>) -> serde_json::Result<serde_json::Value> {
    match value {
        Some(value) => serde_json::to_value(Memo::Value(value)),
        None => serde_json::to_value(Memo::<&T>::Absent),
    }
}

fn decode_memo<T: DeserializeOwned>(raw: &serde_json::Value) -> serde_json::Result<Option<T>> {
    Memo::<T>::deserialize(raw).map(|memo| match memo {
        Memo::Value(value) => Some(value),
        Memo::Absent => None,
    })
}

// Only touched with `lock` held, and never across an await.
struct CacheState {
    memory: MemoryTier,
    refreshing: bool,
}

/// Memory + disk cache with memoization
pub struct TlCache {
    lock: ReentrantLock,
    state: Mutex<CacheState>,
    disk: DiskTier,
    config: TlCacheConfig,
    metrics: CacheMetrics,
}

impl TlCache {
    /// Open a cache in `cache_dir` with the given memory tier settings
    ///
    /// # Errors
    ///
    /// Returns error if the cache directory cannot be created
    pub async fn new(
        cache_dir: impl AsRef<Path>,
        memory_threshold: usize,
        default_timeout: Duration,
    ) -> Result<Self> {
        TlCacheBuilder::new(cache_dir.as_ref())
            .memory_threshold(memory_threshold)
            .default_timeout(default_timeout)
            .build()
            .await
    }

    /// Open a cache from a full configuration
    pub async fn with_config(config: TlCacheConfig) -> Result<Self> {
        config.validate()?;

        let disk = DiskTier::open(&config.cache_dir, config.disk_threshold, config.disk_timeout)
            .await?
            .with_mode(config.file_mode);
        let memory = MemoryTier::new(config.memory_threshold, config.default_timeout);

        Ok(Self {
            lock: ReentrantLock::new(),
            state: Mutex::new(CacheState {
                memory,
                refreshing: false,
            }),
            disk,
            config,
            metrics: CacheMetrics::new(),
        })
    }

    pub fn config(&self) -> &TlCacheConfig {
        &self.config
    }

    /// The disk tier, which is safe to use directly
    pub fn disk(&self) -> &DiskTier {
        &self.disk
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Wrap `func` so its results are cached under `signature`
    pub fn memoize<F>(self: &Arc<Self>, signature: impl Into<Signature>, func: F) -> Memoized<F> {
        Memoized {
            cache: Arc::clone(self),
            signature: signature.into(),
            namespace: None,
            timeout: None,
            func,
        }
    }

    /// Write a value through to both tiers
    ///
    /// The memory tier gets `timeout`, the disk tier its own default. Returns
    /// whether the disk write succeeded.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, timeout: Option<Duration>) -> bool {
        let raw = match encode_memo(Some(value)) {
            Ok(raw) => raw,
            Err(err) => {
                debug!("Refusing to cache unserializable value for {}: {}", key, err);
                return false;
            }
        };
        let _guard = self.lock.lock().await;
        self.publish(key, raw, timeout).await
    }

    /// Read a value from memory, falling back to disk
    ///
    /// A cached absent result reads as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let _guard = self.lock.lock().await;
        self.recover(key).await.and_then(|(_, value)| value)
    }

    /// Remove a key from both tiers
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let _guard = self.lock.lock().await;
        let in_memory = self.state().memory.delete(key);
        let on_disk = self.disk.delete(key).await;
        in_memory || on_disk
    }

    /// Empty both tiers, returning whether the disk tier was fully cleared
    pub async fn clear_all(&self) -> bool {
        let _guard = self.lock.lock().await;
        self.state().memory.clear();
        self.disk.clear().await
    }

    /// Number of entries held by the memory tier
    pub async fn memory_len(&self) -> usize {
        let _guard = self.lock.lock().await;
        self.state().memory.len()
    }

    /// Enter forced-refresh mode
    ///
    /// Until the returned scope is dropped, memoized calls made by the
    /// current task recompute and republish even when a live value exists,
    /// and memoized calls from every other task wait.
    pub async fn forced_refresh(&self) -> RefreshScope<'_> {
        let guard = self.lock.lock().await;
        let previous = std::mem::replace(&mut self.state().refreshing, true);
        debug!("Forced refresh scope opened on {}", self.disk.path().display());
        RefreshScope {
            cache: self,
            previous,
            _guard: guard,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn publish(&self, key: &CacheKey, raw: serde_json::Value, timeout: Option<Duration>) -> bool {
        self.state().memory.set(key, raw.clone(), timeout);
        let stored = self.disk.set(key, &raw, None).await;
        if !stored {
            self.metrics.record_store_failure();
        }
        stored
    }

    // Republish a recovered value with the degraded TTL. A disk copy that
    // cannot be rewritten is removed so it does not outlive the TTL.
    async fn republish_degraded(&self, key: &CacheKey, raw: serde_json::Value, ttl: Duration) {
        self.state().memory.set(key, raw.clone(), Some(ttl));
        if self.disk.set(key, &raw, Some(ttl)).await {
            return;
        }
        self.metrics.record_store_failure();
        if self.disk.delete(key).await {
            debug!("Dropped disk copy of {} after failed rewrite", key);
        } else if self.disk.has(key).await {
            warn!("Disk copy of {} could not be rewritten or removed", key);
        }
    }

    async fn recover<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<(serde_json::Value, Option<T>)> {
        let in_memory = self.state().memory.get(key);
        if let Some(raw) = in_memory {
            match decode_memo(&raw) {
                Ok(value) => return Some((raw, value)),
                Err(err) => debug!("Undecodable memory entry for {}: {}", key, err),
            }
        }

        let raw = self.disk.get(key).await?;
        match decode_memo(&raw) {
            Ok(value) => Some((raw, value)),
            Err(err) => {
                debug!("Undecodable disk entry for {}: {}", key, err);
                None
            }
        }
    }

    // Caller holds `lock`.
    async fn resolve<T, E, Fut, C>(
        &self,
        key: &CacheKey,
        signature: &Signature,
        args: &CallArgs,
        timeout: Option<Duration>,
        compute: C,
    ) -> std::result::Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: fmt::Display,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
        C: FnOnce() -> Fut,
    {
        let refreshing = self.state().refreshing;
        if refreshing {
            self.metrics.record_refresh();
        } else {
            let cached = self.state().memory.get(key);
            if let Some(value) = cached.and_then(|raw| decode_memo::<T>(&raw).ok()) {
                self.metrics.record_hit();
                return Ok(value);
            }
            self.metrics.record_miss();
        }

        self.metrics.record_computation();
        match compute().await {
            Ok(result) => {
                match encode_memo(result.as_ref()) {
                    Ok(raw) => {
                        self.publish(key, raw, timeout).await;
                    }
                    Err(err) => {
                        warn!("Result of {} cannot be cached: {}", signature.name(), err);
                        self.metrics.record_store_failure();
                    }
                }
                Ok(result)
            }
            Err(err) => {
                warn!(
                    "function: {} failed: {}, args: {:?}",
                    signature.name(),
                    err,
                    args
                );
                let Some((raw, value)) = self.recover::<T>(key).await else {
                    self.metrics.record_failure();
                    return Err(err);
                };

                let ttl = self.config.degraded_ttl(timeout);
                warn!(
                    "Serving cached value of {} for up to {:?} after failure",
                    signature.name(),
                    ttl
                );
                self.republish_degraded(key, raw, ttl).await;
                self.metrics.record_stale_served();
                Ok(value)
            }
        }
    }
}

/// A function whose results are cached by a [`TlCache`]
///
/// The wrapped function returns `Ok(Some(value))`, `Ok(None)` for "no value"
/// (cached as such), or an error, which is only surfaced when neither tier
/// holds a value for the call.
pub struct Memoized<F> {
    cache: Arc<TlCache>,
    signature: Signature,
    namespace: Option<String>,
    timeout: Option<Duration>,
    func: F,
}

impl<F> Memoized<F> {
    /// Prefix keys with a namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Memory tier TTL for results; zero never expires
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn name(&self) -> &str {
        self.signature.name()
    }

    pub fn cache(&self) -> &Arc<TlCache> {
        &self.cache
    }

    /// Key a call with `args` is cached under
    pub fn key_for<A: CacheArgs>(&self, args: &A) -> CacheKey {
        CacheKey::derive(
            self.namespace.as_deref(),
            &self.signature,
            &args.cache_args(),
        )
    }

    /// Call through the cache
    ///
    /// Safe to await from inside another function memoized on the same
    /// cache, or while this task holds a [`RefreshScope`].
    pub async fn call<A, T, E, Fut>(&self, args: A) -> std::result::Result<Option<T>, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
        A: CacheArgs,
        T: Serialize + DeserializeOwned,
        E: fmt::Display,
    {
        let call_args = args.cache_args();
        let key = CacheKey::derive(self.namespace.as_deref(), &self.signature, &call_args);

        let _guard = self.cache.lock.lock().await;
        self.cache
            .resolve(
                &key,
                &self.signature,
                &call_args,
                self.timeout,
                || (self.func)(args),
            )
            .await
    }
}

impl<F> fmt::Debug for Memoized<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("signature", &self.signature)
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Forced-refresh mode, held until dropped
///
/// Holds the cache lock, so only the task that opened the scope can make
/// memoized calls on the cache until it is dropped. Scopes may nest.
pub struct RefreshScope<'a> {
    cache: &'a TlCache,
    previous: bool,
    _guard: ReentrantGuard<'a>,
}

impl Drop for RefreshScope<'_> {
    fn drop(&mut self) {
        self.cache.state().refreshing = self.previous;
        debug!(
            "Forced refresh scope closed on {}",
            self.cache.disk.path().display()
        );
    }
}
