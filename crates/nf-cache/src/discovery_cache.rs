//! Discovery cache with TTL and recency-based size bound
//!
//! One cache instance is shared by every resource class the engine fetches
//! or derives. Features:
//! - Per-record expiry (`now < expires_at` is a hit, anything else a miss)
//! - `max_size` across all classes, enforced by LRU eviction
//! - Selective invalidation by class and key pattern
//! - A maintenance task that purges expired records and, under the eager
//!   warming strategy, re-fetches records nearing expiry while readers keep
//!   getting the old value

use async_trait::async_trait;
use lru::LruCache;
use nf_core::config::CacheSettings;
use nf_core::{Result, WarmingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::health::{assess, HealthInputs, HealthReport};
use crate::pattern::KeyPattern;

/// Hit-rate samples kept for trend detection
const HIT_RATE_SAMPLES: usize = 12;

/// Resource classes sharing the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Nodes,
    Workflows,
    CredentialTypes,
    Schemas,
    Selections,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 5] = [
        ResourceClass::Nodes,
        ResourceClass::Workflows,
        ResourceClass::CredentialTypes,
        ResourceClass::Schemas,
        ResourceClass::Selections,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Nodes => "nodes",
            ResourceClass::Workflows => "workflows",
            ResourceClass::CredentialTypes => "credential_types",
            ResourceClass::Schemas => "schemas",
            ResourceClass::Selections => "selections",
        }
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn storage_key(class: ResourceClass, key: &str) -> String {
    format!("{}:{}", class.as_str(), key)
}

/// Re-fetches a record during eager warming.
///
/// `Ok(None)` leaves the record to expire normally.
#[async_trait]
pub trait CacheRefresher<V>: Send + Sync {
    async fn refresh(&self, class: ResourceClass, key: &str) -> Result<Option<V>>;
}

struct CacheRecord<V> {
    key: String,
    class: ResourceClass,
    value: V,
    ttl: Duration,
    expires_at: Instant,
}

impl<V> CacheRecord<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub writes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub invalidations: u64,
    pub by_class: BTreeMap<String, usize>,
}

struct CacheState<V> {
    records: LruCache<String, CacheRecord<V>>,
    stats: CacheStats,
    window_hits: u64,
    window_misses: u64,
    hit_rate_samples: VecDeque<f64>,
}

/// Keyed TTL cache shared by all discovery resource classes
pub struct DiscoveryCache<V> {
    state: Mutex<CacheState<V>>,
    config: CacheSettings,
    maintenance: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<V> DiscoveryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheSettings) -> Self {
        let capacity = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                records: LruCache::new(capacity),
                stats: CacheStats {
                    max_size: capacity.get(),
                    ..Default::default()
                },
                window_hits: 0,
                window_misses: 0,
                hit_rate_samples: VecDeque::with_capacity(HIT_RATE_SAMPLES),
            }),
            config,
            maintenance: std::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheSettings {
        &self.config
    }

    /// Read a record; expired records count as misses and are dropped
    pub async fn get(&self, class: ResourceClass, key: &str) -> Option<V> {
        let storage_key = storage_key(class, key);
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let lookup = state
            .records
            .get(&storage_key)
            .map(|record| (record.is_expired(now), record.value.clone()));

        match lookup {
            Some((false, value)) => {
                state.stats.hits += 1;
                state.window_hits += 1;
                Some(value)
            }
            Some((true, _)) => {
                state.records.pop(&storage_key);
                state.stats.expirations += 1;
                state.stats.misses += 1;
                state.window_misses += 1;
                debug!("Cache entry expired: {}", storage_key);
                None
            }
            None => {
                state.stats.misses += 1;
                state.window_misses += 1;
                None
            }
        }
    }

    /// Write with the default TTL
    pub async fn set(&self, class: ResourceClass, key: &str, value: V) {
        self.set_with_ttl(class, key, value, self.config.default_ttl)
            .await
    }

    /// Write with an explicit TTL
    pub async fn set_with_ttl(&self, class: ResourceClass, key: &str, value: V, ttl: Duration) {
        let storage_key = storage_key(class, key);
        let record = CacheRecord {
            key: key.to_string(),
            class,
            value,
            ttl,
            expires_at: Instant::now() + ttl,
        };

        let mut state = self.state.lock().await;
        state.stats.writes += 1;
        if let Some((evicted_key, _)) = state.records.push(storage_key.clone(), record) {
            if evicted_key != storage_key {
                state.stats.evictions += 1;
                debug!("Evicted least recently used cache entry: {}", evicted_key);
            }
        }
    }

    /// Return the cached value or fetch, store and return it.
    ///
    /// The check and the insert are not atomic across the fetch: concurrent
    /// callers may both fetch, and the last write wins.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        class: ResourceClass,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(class, key).await {
            return Ok(value);
        }

        let value = fetch().await?;
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        self.set_with_ttl(class, key, value.clone(), ttl).await;
        Ok(value)
    }

    /// Whether an unexpired record exists; does not affect recency or counters
    pub async fn contains(&self, class: ResourceClass, key: &str) -> bool {
        let now = Instant::now();
        let state = self.state.lock().await;
        state
            .records
            .peek(&storage_key(class, key))
            .is_some_and(|record| !record.is_expired(now))
    }

    /// Keys of one class currently resident (expired or not)
    pub async fn keys(&self, class: ResourceClass) -> Vec<String> {
        let state = self.state.lock().await;
        let mut keys: Vec<String> = state
            .records
            .iter()
            .filter(|(_, record)| record.class == class)
            .map(|(_, record)| record.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remove records matching the pattern, optionally restricted to one class.
    ///
    /// A pattern matches either the bare key or the `class:key` form. With
    /// neither a pattern nor a class every record is removed.
    pub async fn invalidate(
        &self,
        pattern: Option<&KeyPattern>,
        class: Option<ResourceClass>,
    ) -> usize {
        let mut state = self.state.lock().await;

        let doomed: Vec<String> = state
            .records
            .iter()
            .filter(|(_, record)| class.map_or(true, |c| record.class == c))
            .filter(|(storage_key, record)| {
                pattern.map_or(true, |p| p.matches(&record.key) || p.matches(storage_key))
            })
            .map(|(storage_key, _)| storage_key.clone())
            .collect();

        for storage_key in &doomed {
            state.records.pop(storage_key);
        }
        state.stats.invalidations += doomed.len() as u64;

        info!(
            "Invalidated {} cache entries (pattern: {}, class: {})",
            doomed.len(),
            pattern.map_or_else(|| "*".to_string(), |p| p.to_string()),
            class.map_or("all", |c| c.as_str())
        );
        doomed.len()
    }

    /// Drop every record
    pub async fn clear(&self) -> usize {
        self.invalidate(None, None).await
    }

    /// Drop expired records, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        Self::purge_expired(&mut state, now)
    }

    fn purge_expired(state: &mut CacheState<V>, now: Instant) -> usize {
        let expired: Vec<String> = state
            .records
            .iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(storage_key, _)| storage_key.clone())
            .collect();

        for storage_key in &expired {
            state.records.pop(storage_key);
        }
        state.stats.expirations += expired.len() as u64;
        expired.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        let mut stats = state.stats.clone();
        stats.size = state.records.len();
        let lookups = stats.hits + stats.misses;
        stats.hit_rate = if lookups == 0 {
            0.0
        } else {
            stats.hits as f64 / lookups as f64
        };
        for class in ResourceClass::ALL {
            stats.by_class.insert(class.as_str().to_string(), 0);
        }
        for (_, record) in state.records.iter() {
            *stats
                .by_class
                .entry(record.class.as_str().to_string())
                .or_insert(0) += 1;
        }
        stats
    }

    pub async fn health(&self) -> HealthReport {
        let now = Instant::now();
        let state = self.state.lock().await;
        let lookups = state.stats.hits + state.stats.misses;

        assess(&HealthInputs {
            size: state.records.len(),
            max_size: state.stats.max_size,
            lookups,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.stats.hits as f64 / lookups as f64
            },
            hit_rate_samples: state.hit_rate_samples.iter().copied().collect(),
            stale: state
                .records
                .iter()
                .filter(|(_, record)| record.is_expired(now))
                .count(),
        })
    }

    /// One maintenance pass: purge, sample the hit rate, and under eager
    /// warming re-fetch records that will expire within the refresh window.
    pub async fn run_maintenance(&self, refresher: &dyn CacheRefresher<V>) {
        let now = Instant::now();
        let eager = self.config.warming_strategy == WarmingStrategy::Eager;

        let candidates: Vec<(ResourceClass, String, Duration)> = {
            let mut state = self.state.lock().await;
            let purged = Self::purge_expired(&mut state, now);
            if purged > 0 {
                debug!("Maintenance purged {} expired cache entries", purged);
            }

            let window = state.window_hits + state.window_misses;
            if window > 0 {
                let rate = state.window_hits as f64 / window as f64;
                if state.hit_rate_samples.len() == HIT_RATE_SAMPLES {
                    state.hit_rate_samples.pop_front();
                }
                state.hit_rate_samples.push_back(rate);
            }
            state.window_hits = 0;
            state.window_misses = 0;

            if eager {
                let ratio = self.config.refresh_ahead_ratio;
                state
                    .records
                    .iter()
                    .filter(|(_, record)| {
                        let remaining = record.expires_at.saturating_duration_since(now);
                        remaining <= record.ttl.mul_f64(ratio)
                    })
                    .map(|(_, record)| (record.class, record.key.clone(), record.ttl))
                    .collect()
            } else {
                Vec::new()
            }
        };

        // The lock is released while fetching; readers keep the old value.
        for (class, key, ttl) in candidates {
            match refresher.refresh(class, &key).await {
                Ok(Some(value)) => {
                    self.set_with_ttl(class, &key, value, ttl).await;
                    self.state.lock().await.stats.refreshes += 1;
                    debug!("Refreshed cache entry {}:{}", class, key);
                }
                Ok(None) => {}
                Err(e) => {
                    self.state.lock().await.stats.refresh_failures += 1;
                    warn!("Background refresh of {}:{} failed: {}", class, key, e);
                }
            }
        }
    }

    /// Spawn the periodic maintenance task if background refresh is enabled.
    ///
    /// Replaces a task started earlier.
    pub fn start_maintenance(self: &Arc<Self>, refresher: Arc<dyn CacheRefresher<V>>) {
        if !self.config.background_refresh {
            debug!("Background refresh disabled; maintenance task not started");
            return;
        }
        let period = self.config.cleanup_interval;
        if period.is_zero() {
            warn!("Cache cleanup interval is zero; maintenance task not started");
            return;
        }

        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                cache.run_maintenance(refresher.as_ref()).await;
            }
        });

        if let Ok(mut slot) = self.maintenance.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
        info!(
            "Cache maintenance started (interval {:?}, warming {})",
            period, self.config.warming_strategy
        );
    }

    /// Whether a maintenance task is live
    pub fn maintenance_running(&self) -> bool {
        self.maintenance
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Abort the maintenance task, if any
    pub fn stop_maintenance(&self) {
        if let Ok(mut slot) = self.maintenance.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
                debug!("Cache maintenance stopped");
            }
        }
    }
}

impl<V> Drop for DiscoveryCache<V> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.maintenance.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_core::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(max_size: usize) -> CacheSettings {
        CacheSettings {
            default_ttl: Duration::from_secs(60),
            max_size,
            ..Default::default()
        }
    }

    struct CountingRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheRefresher<String> for CountingRefresher {
        async fn refresh(&self, _class: ResourceClass, key: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(format!("{}-fresh", key)))
        }
    }

    struct NoRefresh;

    #[async_trait]
    impl CacheRefresher<u32> for NoRefresh {
        async fn refresh(&self, _: ResourceClass, _: &str) -> Result<Option<u32>> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_law() {
        let cache = DiscoveryCache::new(settings(10));
        let ttl = Duration::from_millis(1000);
        cache
            .set_with_ttl(ResourceClass::Nodes, "all", "v1".to_string(), ttl)
            .await;

        tokio::time::advance(ttl - Duration::from_millis(1)).await;
        assert_eq!(
            cache.get(ResourceClass::Nodes, "all").await.as_deref(),
            Some("v1")
        );

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(cache.get(ResourceClass::Nodes, "all").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test]
    async fn test_classes_do_not_collide() {
        let cache = DiscoveryCache::new(settings(10));
        cache.set(ResourceClass::Nodes, "all", 1u32).await;
        cache.set(ResourceClass::Workflows, "all", 2u32).await;

        assert_eq!(cache.get(ResourceClass::Nodes, "all").await, Some(1));
        assert_eq!(cache.get(ResourceClass::Workflows, "all").await, Some(2));
        assert_eq!(cache.get(ResourceClass::CredentialTypes, "all").await, None);
    }

    #[tokio::test]
    async fn test_max_size_evicts_least_recent() {
        let cache = DiscoveryCache::new(settings(2));
        cache.set(ResourceClass::Schemas, "a", 1u32).await;
        cache.set(ResourceClass::Schemas, "b", 2u32).await;
        // touch "a" so "b" becomes least recent
        assert!(cache.get(ResourceClass::Schemas, "a").await.is_some());
        cache.set(ResourceClass::Schemas, "c", 3u32).await;

        assert!(cache.contains(ResourceClass::Schemas, "a").await);
        assert!(!cache.contains(ResourceClass::Schemas, "b").await);
        assert!(cache.contains(ResourceClass::Schemas, "c").await);
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_overwrite_is_not_an_eviction() {
        let cache = DiscoveryCache::new(settings(2));
        cache.set(ResourceClass::Nodes, "all", 1u32).await;
        cache.set(ResourceClass::Nodes, "all", 2u32).await;
        assert_eq!(cache.get(ResourceClass::Nodes, "all").await, Some(2));
        assert_eq!(cache.stats().await.evictions, 0);
    }

    #[tokio::test]
    async fn test_selective_invalidation() {
        let cache = DiscoveryCache::new(settings(10));
        for key in ["categoryA", "categoryB", "categoryC"] {
            cache
                .set(ResourceClass::Selections, key, key.to_string())
                .await;
        }

        let pattern = KeyPattern::parse("categoryA*").unwrap();
        let removed = cache.invalidate(Some(&pattern), None).await;

        assert_eq!(removed, 1);
        assert!(!cache.contains(ResourceClass::Selections, "categoryA").await);
        assert!(cache.contains(ResourceClass::Selections, "categoryB").await);
        assert!(cache.contains(ResourceClass::Selections, "categoryC").await);
    }

    #[tokio::test]
    async fn test_invalidate_by_class_prefix_and_class_filter() {
        let cache = DiscoveryCache::new(settings(10));
        cache.set(ResourceClass::Schemas, "slack", 1u32).await;
        cache.set(ResourceClass::Schemas, "gmail", 2u32).await;
        cache.set(ResourceClass::Nodes, "all", 3u32).await;

        let pattern = KeyPattern::parse("schemas:*").unwrap();
        assert_eq!(cache.invalidate(Some(&pattern), None).await, 2);
        assert!(cache.contains(ResourceClass::Nodes, "all").await);

        cache.set(ResourceClass::Schemas, "slack", 1u32).await;
        assert_eq!(cache.invalidate(None, Some(ResourceClass::Nodes)).await, 1);
        assert_eq!(cache.keys(ResourceClass::Schemas).await, vec!["slack"]);

        assert_eq!(cache.clear().await, 1);
        assert_eq!(cache.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_get_or_fetch_only_fetches_on_miss() {
        let cache = DiscoveryCache::new(settings(10));
        let fetches = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_fetch(ResourceClass::Nodes, "all", None, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["slack".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(value, vec!["slack".to_string()]);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_propagates_errors_without_caching() {
        let cache: DiscoveryCache<u32> = DiscoveryCache::new(settings(10));
        let result = cache
            .get_or_fetch(ResourceClass::Nodes, "all", None, || async {
                Err(Error::source_unavailable("connection refused"))
            })
            .await;
        assert!(matches!(result, Err(Error::SourceUnavailable(_))));
        assert!(!cache.contains(ResourceClass::Nodes, "all").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eager_maintenance_refreshes_before_expiry() {
        let cache = DiscoveryCache::new(CacheSettings {
            default_ttl: Duration::from_secs(100),
            max_size: 10,
            warming_strategy: WarmingStrategy::Eager,
            refresh_ahead_ratio: 0.2,
            ..Default::default()
        });
        let refresher = CountingRefresher {
            calls: AtomicUsize::new(0),
        };
        cache
            .set(ResourceClass::Nodes, "all", "old".to_string())
            .await;

        // Outside the refresh window: nothing happens.
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.run_maintenance(&refresher).await;
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);

        // Inside the window: readers still see the old value until the refresh lands.
        tokio::time::advance(Duration::from_secs(35)).await;
        assert_eq!(
            cache.get(ResourceClass::Nodes, "all").await.as_deref(),
            Some("old")
        );
        cache.run_maintenance(&refresher).await;
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.get(ResourceClass::Nodes, "all").await.as_deref(),
            Some("all-fresh")
        );

        // The refreshed record got a full new TTL.
        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(cache.contains(ResourceClass::Nodes, "all").await);
        assert_eq!(cache.stats().await.refreshes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_maintenance_only_purges() {
        let cache = DiscoveryCache::new(settings(10));
        let refresher = CountingRefresher {
            calls: AtomicUsize::new(0),
        };
        cache
            .set_with_ttl(
                ResourceClass::Selections,
                "ctx",
                "sel".to_string(),
                Duration::from_secs(5),
            )
            .await;
        cache.set(ResourceClass::Nodes, "all", "nodes".to_string()).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        cache.run_maintenance(&refresher).await;

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        let stats = cache.stats().await;
        assert_eq!(stats.size, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_runs_on_interval() {
        let cache = Arc::new(DiscoveryCache::new(CacheSettings {
            default_ttl: Duration::from_secs(10),
            max_size: 10,
            cleanup_interval: Duration::from_secs(30),
            ..Default::default()
        }));
        cache.set(ResourceClass::Nodes, "all", 1u32).await;

        cache.start_maintenance(Arc::new(NoRefresh));
        assert!(cache.maintenance_running());
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(cache.stats().await.size, 0);
        cache.stop_maintenance();
        assert!(!cache.maintenance_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_starts_no_task() {
        let cache = Arc::new(DiscoveryCache::new(CacheSettings {
            default_ttl: Duration::from_secs(10),
            max_size: 10,
            cleanup_interval: Duration::ZERO,
            background_refresh: true,
            ..Default::default()
        }));
        cache.set(ResourceClass::Nodes, "all", 1u32).await;

        cache.start_maintenance(Arc::new(NoRefresh));
        assert!(!cache.maintenance_running());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.get(ResourceClass::Nodes, "all").await, Some(1));
    }

    #[tokio::test]
    async fn test_health_reports_size_pressure() {
        let cache = DiscoveryCache::new(settings(4));
        for key in ["a", "b", "c", "d"] {
            cache.set(ResourceClass::Schemas, key, 0u8).await;
        }
        let report = cache.health().await;
        assert_eq!(report.status, crate::health::HealthStatus::Critical);
        assert!(!report.issues.is_empty());
    }
}
