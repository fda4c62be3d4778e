//! Model pool
//!
//! A cache of logical models keyed by name. Loading is lazy and exclusive
//! per key; eviction is LRU augmented with TTL tiers derived from the
//! access history of the last five minutes. Reads are lock-free once a
//! handle is resolved; reference counts are atomic and a handle holds its
//! entry alive against the sweeper.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use voice_router_config::PoolConfig;
use voice_router_core::{
    CancellationToken, GenerateRequest, GenerationResult, ModelPrewarm, TokenStream,
};

use crate::backend::{BackendFactory, GenerationBackend};
use crate::quant::{context_window_for, estimate_tokens, Quantization};
use crate::LlmError;

/// TTL tier derived from recent access history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlTier {
    /// ≥ hot_access_count accesses in the window
    Hot,
    /// At least one access in the window
    Warm,
    /// No recent accesses
    Cold,
}

/// Options for acquiring a model
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Expected output size, drives quantization at first load
    pub expected_tokens: u32,
    /// Required context window; `None` derives one from the prompt size
    pub context_window: Option<u32>,
    /// Caller override for the quantization level
    pub quantization: Option<Quantization>,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            expected_tokens: 256,
            context_window: None,
            quantization: None,
        }
    }
}

impl AcquireOptions {
    pub fn for_request(request: &GenerateRequest) -> Self {
        let prompt_tokens =
            estimate_tokens(&request.prompt) + estimate_tokens(&request.system);
        Self {
            expected_tokens: request.expected_tokens,
            context_window: Some(context_window_for(prompt_tokens, request.max_tokens)),
            quantization: None,
        }
    }
}

/// Recorded when a substitute served a request instead of the primary
#[derive(Debug, Clone)]
pub struct DegradationEvent {
    pub requested: String,
    pub served_by: String,
    pub reason: String,
}

struct ModelEntry {
    name: String,
    backend: Arc<dyn GenerationBackend>,
    quantization: Quantization,
    context_window: u32,
    refcount: AtomicUsize,
    last_used: Mutex<Instant>,
    accesses: Mutex<VecDeque<Instant>>,
}

impl ModelEntry {
    fn touch(&self, window: Duration) {
        let now = Instant::now();
        *self.last_used.lock() = now;
        let mut accesses = self.accesses.lock();
        accesses.push_back(now);
        while accesses
            .front()
            .map(|t| now.duration_since(*t) > window)
            .unwrap_or(false)
        {
            accesses.pop_front();
        }
    }
}

/// RAII guard over a pooled model
///
/// Holding a handle keeps the entry's reference count above zero, which
/// the sweeper respects. Dropping the handle releases the reference.
pub struct ModelHandle {
    entry: Arc<ModelEntry>,
}

impl ModelHandle {
    pub fn backend(&self) -> Arc<dyn GenerationBackend> {
        self.entry.backend.clone()
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn quantization(&self) -> Quantization {
        self.entry.quantization
    }

    pub fn context_window(&self) -> u32 {
        self.entry.context_window
    }

    pub fn refcount(&self) -> usize {
        self.entry.refcount.load(Ordering::SeqCst)
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        self.entry.refcount.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Read-only counter snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub loads: u64,
    pub reloads: u64,
    pub hits: u64,
    pub evictions: u64,
    pub fallbacks: u64,
    pub resident_models: usize,
}

#[derive(Default)]
struct Counters {
    loads: AtomicU64,
    reloads: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
    fallbacks: AtomicU64,
}

/// Lazy-loading, TTL-evicting model cache with fallback chains
pub struct ModelPool {
    config: PoolConfig,
    factory: Arc<dyn BackendFactory>,
    entries: DashMap<String, Arc<ModelEntry>>,
    load_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    counters: Counters,
    degradation_tx: broadcast::Sender<DegradationEvent>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ModelPool {
    pub fn new(config: PoolConfig, factory: Arc<dyn BackendFactory>) -> Arc<Self> {
        let (degradation_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            config,
            factory,
            entries: DashMap::new(),
            load_locks: DashMap::new(),
            counters: Counters::default(),
            degradation_tx,
            sweeper: Mutex::new(None),
        })
    }

    /// Subscribe to `fallback_used` degradation events
    pub fn subscribe_degradations(&self) -> broadcast::Receiver<DegradationEvent> {
        self.degradation_tx.subscribe()
    }

    /// Acquire a handle, loading or reloading the backend as needed
    ///
    /// At most one load runs per name at any time; concurrent acquirers
    /// wait on the per-key lock and then reuse the fresh entry.
    pub async fn acquire(
        &self,
        name: &str,
        opts: AcquireOptions,
    ) -> Result<ModelHandle, LlmError> {
        let requested_window = opts.context_window.unwrap_or(512);

        if let Some(handle) = self.try_reuse(name, requested_window) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(handle);
        }

        let lock = self
            .load_locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another acquirer may have loaded while we waited.
        if let Some(handle) = self.try_reuse(name, requested_window) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(handle);
        }

        // Reloads preserve the quantization picked at first load.
        let existing = self.entries.get(name).map(|e| e.quantization);
        let quantization = opts
            .quantization
            .or(existing)
            .unwrap_or_else(|| Quantization::for_expected_tokens(opts.expected_tokens));
        let context_window = requested_window.max(512);

        let backend = self
            .factory
            .load(name, quantization, context_window)
            .await?;

        let entry = Arc::new(ModelEntry {
            name: name.to_string(),
            backend,
            quantization,
            context_window,
            refcount: AtomicUsize::new(1),
            last_used: Mutex::new(Instant::now()),
            accesses: Mutex::new(VecDeque::from([Instant::now()])),
        });

        if existing.is_some() {
            self.counters.reloads.fetch_add(1, Ordering::Relaxed);
            tracing::info!(model = name, context_window, "Reloaded at larger context window");
        } else {
            self.counters.loads.fetch_add(1, Ordering::Relaxed);
            tracing::info!(model = name, %quantization, context_window, "Loaded model");
        }

        self.entries.insert(name.to_string(), entry.clone());
        Ok(ModelHandle { entry })
    }

    /// Reuse the resident entry when its context window covers the request.
    /// The refcount is bumped while the map guard is held, so the sweeper
    /// can never observe the entry as evictable in between.
    fn try_reuse(&self, name: &str, requested_window: u32) -> Option<ModelHandle> {
        let entry_ref = self.entries.get(name)?;
        if entry_ref.context_window < requested_window {
            return None;
        }
        entry_ref.refcount.fetch_add(1, Ordering::SeqCst);
        let entry = entry_ref.value().clone();
        drop(entry_ref);
        entry.touch(Duration::from_secs(self.config.access_window_s));
        Some(ModelHandle { entry })
    }

    /// Generate a streaming response from `name`, walking the fallback
    /// chain when the primary fails. Returns the serving model's name with
    /// the stream; the returned stream keeps the pool entry referenced
    /// until it is dropped.
    pub async fn generate_stream_with_fallback(
        &self,
        name: &str,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<(String, TokenStream), LlmError> {
        let chain = self.chain_for(name);
        let mut last_error: Option<LlmError> = None;

        for (idx, candidate) in chain.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            match self
                .try_stream(candidate, request.clone(), cancel.clone())
                .await
            {
                Ok(stream) => {
                    if idx > 0 {
                        self.record_degradation(name, candidate, &last_error);
                    }
                    return Ok((candidate.clone(), stream));
                }
                Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        model = %candidate,
                        error = %e,
                        "Backend failed, consulting fallback chain"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(LlmError::Unavailable)
    }

    /// Non-streaming variant of the fallback walk
    pub async fn generate_with_fallback(
        &self,
        name: &str,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<(String, GenerationResult), LlmError> {
        let chain = self.chain_for(name);
        let mut last_error: Option<LlmError> = None;

        for (idx, candidate) in chain.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            let handle = match self
                .acquire(candidate, AcquireOptions::for_request(&request))
                .await
            {
                Ok(h) => h,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            match handle
                .backend()
                .generate(request.clone(), cancel.clone())
                .await
            {
                Ok(result) => {
                    if idx > 0 {
                        self.record_degradation(name, candidate, &last_error);
                    }
                    return Ok((candidate.clone(), result));
                }
                Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
                Err(e) => {
                    tracing::warn!(model = %candidate, error = %e, "Generation failed");
                    last_error = Some(e);
                }
            }
        }

        Err(LlmError::Unavailable)
    }

    async fn try_stream(
        &self,
        name: &str,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        let handle = self
            .acquire(name, AcquireOptions::for_request(&request))
            .await?;
        let inner = handle.backend().generate_stream(request, cancel).await?;

        // The handle rides inside the stream so the entry stays referenced
        // for as long as tokens are being consumed.
        let stream = async_stream::stream! {
            let _handle = handle;
            let mut inner = inner;
            while let Some(item) = inner.next().await {
                yield item;
            }
        };
        Ok(Box::pin(stream))
    }

    fn chain_for(&self, name: &str) -> Vec<String> {
        let mut chain = vec![name.to_string()];
        if let Some(substitutes) = self.config.fallback_chains.get(name) {
            for substitute in substitutes {
                if !chain.contains(substitute) {
                    chain.push(substitute.clone());
                }
            }
        }
        chain
    }

    fn record_degradation(&self, requested: &str, served_by: &str, error: &Option<LlmError>) {
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        let event = DegradationEvent {
            requested: requested.to_string(),
            served_by: served_by.to_string(),
            reason: error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        };
        tracing::warn!(
            requested = %event.requested,
            served_by = %event.served_by,
            reason = %event.reason,
            "Fallback served the request"
        );
        let _ = self.degradation_tx.send(event);
    }

    /// Start the background TTL sweeper; idempotent
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }
        let pool = Arc::clone(self);
        let cadence = Duration::from_millis(self.config.sweep_interval_ms);
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(cadence);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                pool.sweep_now().await;
            }
        }));
    }

    /// Stop the background sweeper; idempotent
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// One sweep pass: unload expired entries whose refcount is zero
    pub async fn sweep_now(&self) {
        let window = Duration::from_secs(self.config.access_window_s);
        let mut expired = Vec::new();

        for entry in self.entries.iter() {
            let tier = self.tier_of(&entry, window);
            let ttl = self.ttl_for(tier);
            let idle = entry.last_used.lock().elapsed();
            if idle >= ttl {
                expired.push((entry.key().clone(), tier));
            }
        }

        for (name, tier) in expired {
            // remove_if holds the shard write lock, so a racing acquire
            // either completes its refcount bump first or finds no entry.
            let removed = self
                .entries
                .remove_if(&name, |_, e| e.refcount.load(Ordering::SeqCst) == 0);
            if let Some((_, entry)) = removed {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::info!(model = %name, tier = ?tier, "Evicting idle model");
                entry.backend.unload().await;
            }
        }
    }

    fn tier_of(&self, entry: &ModelEntry, window: Duration) -> TtlTier {
        let now = Instant::now();
        let recent = entry
            .accesses
            .lock()
            .iter()
            .filter(|t| now.duration_since(**t) <= window)
            .count();
        if recent >= self.config.hot_access_count {
            TtlTier::Hot
        } else if recent >= 1 {
            TtlTier::Warm
        } else {
            TtlTier::Cold
        }
    }

    fn ttl_for(&self, tier: TtlTier) -> Duration {
        match tier {
            TtlTier::Hot => Duration::from_secs(self.config.ttl_hot_s),
            TtlTier::Warm => Duration::from_secs(self.config.ttl_warm_s),
            TtlTier::Cold => Duration::from_secs(self.config.ttl_cold_s),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            loads: self.counters.loads.load(Ordering::Relaxed),
            reloads: self.counters.reloads.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            resident_models: self.entries.len(),
        }
    }

    /// Whether a model is currently resident
    pub fn is_resident(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

/// `ModelPrewarm` adapter handed to the eager input processor
pub struct PoolPrewarm(pub Arc<ModelPool>);

impl ModelPrewarm for PoolPrewarm {
    fn prewarm(&self, name: &str) {
        let pool = self.0.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            match pool.acquire(&name, AcquireOptions::default()).await {
                Ok(handle) => {
                    tracing::debug!(model = %name, "Prewarmed");
                    drop(handle);
                }
                Err(e) => tracing::debug!(model = %name, error = %e, "Prewarm failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubFactory;

    fn pool_with(factory: Arc<StubFactory>, config: PoolConfig) -> Arc<ModelPool> {
        ModelPool::new(config, factory)
    }

    fn quick_config() -> PoolConfig {
        PoolConfig {
            ttl_hot_s: 0,
            ttl_warm_s: 0,
            ttl_cold_s: 0,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_lazy_load_then_hit() {
        let factory = Arc::new(StubFactory::new(Duration::ZERO, "ok"));
        let pool = pool_with(factory.clone(), PoolConfig::default());

        let first = pool.acquire("tier-fast", AcquireOptions::default()).await.unwrap();
        drop(first);
        let second = pool.acquire("tier-fast", AcquireOptions::default()).await.unwrap();
        drop(second);

        assert_eq!(factory.load_count(), 1);
        let stats = pool.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_refcount_balance() {
        let factory = Arc::new(StubFactory::new(Duration::ZERO, "ok"));
        let pool = pool_with(factory, PoolConfig::default());

        let handle = pool.acquire("m", AcquireOptions::default()).await.unwrap();
        assert_eq!(handle.refcount(), 1);
        let second = pool.acquire("m", AcquireOptions::default()).await.unwrap();
        assert_eq!(handle.refcount(), 2);
        drop(second);
        assert_eq!(handle.refcount(), 1);
        drop(handle);
    }

    #[tokio::test]
    async fn test_sweeper_respects_refcount() {
        let factory = Arc::new(StubFactory::new(Duration::ZERO, "ok"));
        let pool = pool_with(factory, quick_config());

        let handle = pool.acquire("m", AcquireOptions::default()).await.unwrap();
        pool.sweep_now().await;
        assert!(pool.is_resident("m"), "held handles must not be evicted");

        drop(handle);
        pool.sweep_now().await;
        assert!(!pool.is_resident("m"));
        assert_eq!(pool.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_context_window_reuse_and_reload() {
        let factory = Arc::new(StubFactory::new(Duration::ZERO, "ok"));
        let pool = pool_with(factory.clone(), PoolConfig::default());

        let opts = |window| AcquireOptions {
            context_window: Some(window),
            ..AcquireOptions::default()
        };

        let h = pool.acquire("m", opts(1_024)).await.unwrap();
        assert_eq!(h.context_window(), 1_024);
        let quant = h.quantization();
        drop(h);

        // Smaller request is covered; no reload.
        let h = pool.acquire("m", opts(512)).await.unwrap();
        drop(h);
        assert_eq!(factory.load_count(), 1);

        // Larger request forces a reload that preserves quantization.
        let h = pool.acquire("m", opts(4_096)).await.unwrap();
        assert_eq!(h.context_window(), 4_096);
        assert_eq!(h.quantization(), quant);
        drop(h);
        assert_eq!(factory.load_count(), 2);
        assert_eq!(pool.stats().reloads, 1);
    }

    #[tokio::test]
    async fn test_quantization_from_expected_tokens() {
        let factory = Arc::new(StubFactory::new(Duration::ZERO, "ok"));
        let pool = pool_with(factory, PoolConfig::default());

        let handle = pool
            .acquire(
                "m",
                AcquireOptions {
                    expected_tokens: 1_000,
                    ..AcquireOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(handle.quantization(), Quantization::Q5);
    }

    #[tokio::test]
    async fn test_fallback_chain_serves_substitute() {
        let factory = Arc::new(StubFactory::new(Duration::ZERO, "respuesta"));
        factory.fail_loads_of("tier-deep");
        let pool = pool_with(factory, PoolConfig::default());
        let mut degradations = pool.subscribe_degradations();

        let (served_by, result) = pool
            .generate_with_fallback(
                "tier-deep",
                GenerateRequest::new("hola"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(served_by, "tier-balanced");
        assert_eq!(result.text, "respuesta");
        assert_eq!(pool.stats().fallbacks, 1);

        let event = degradations.try_recv().unwrap();
        assert_eq!(event.requested, "tier-deep");
        assert_eq!(event.served_by, "tier-balanced");
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_unavailable() {
        let factory = Arc::new(StubFactory::new(Duration::ZERO, "x"));
        factory.fail_loads_of("tier-deep");
        factory.fail_loads_of("tier-balanced");
        factory.fail_loads_of("tier-fast");
        let pool = pool_with(factory, PoolConfig::default());

        let err = pool
            .generate_with_fallback(
                "tier-deep",
                GenerateRequest::new("hola"),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Unavailable));
    }

    #[tokio::test]
    async fn test_stream_holds_entry_alive() {
        let factory = Arc::new(StubFactory::new(Duration::ZERO, "uno dos"));
        let pool = pool_with(factory, quick_config());

        let (_name, mut stream) = pool
            .generate_stream_with_fallback(
                "m",
                GenerateRequest::new("hola"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        pool.sweep_now().await;
        assert!(pool.is_resident("m"), "streaming keeps the entry referenced");

        while stream.next().await.is_some() {}
        drop(stream);
        pool.sweep_now().await;
        assert!(!pool.is_resident("m"));
    }

    #[tokio::test]
    async fn test_hot_tier_classification() {
        let factory = Arc::new(StubFactory::new(Duration::ZERO, "ok"));
        let pool = pool_with(factory, PoolConfig::default());

        for _ in 0..3 {
            let h = pool.acquire("m", AcquireOptions::default()).await.unwrap();
            drop(h);
        }
        let entry = pool.entries.get("m").unwrap().value().clone();
        let tier = pool.tier_of(&entry, Duration::from_secs(300));
        assert_eq!(tier, TtlTier::Hot);
    }

    #[tokio::test]
    async fn test_sweeper_lifecycle_idempotent() {
        let factory = Arc::new(StubFactory::new(Duration::ZERO, "ok"));
        let pool = pool_with(factory, PoolConfig::default());
        pool.start_sweeper();
        pool.start_sweeper();
        pool.stop_sweeper();
        pool.stop_sweeper();
    }
}
