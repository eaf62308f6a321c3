//! Lazy-load cache (tier 2)
//!
//! Bounded map of fully materialized tools. Entries are created on first
//! load and dropped under pressure; the metadata they were built from stays
//! in the registry.
//!
//! Cleanup runs before an insert when the cache holds more than
//! `max_cache_size × cleanup_threshold` entries (or is full), and removes
//! `max_cache_size × eviction_fraction` entries, oldest `last_accessed` first.

use chrono::{DateTime, Utc};
use nf_core::config::LazyLoadSettings;
use nf_core::{AgentRole, GeneratedTool};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Externally facing schema view of a materialized tool
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolView {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub agent_recommendation: AgentRole,
}

/// A materialized tool
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub tool: Arc<GeneratedTool>,
    pub schema: ToolView,
    pub loaded: bool,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    /// Orders accesses that share a timestamp
    #[serde(skip)]
    touch_seq: u64,
}

pub struct LazyToolCache {
    entries: HashMap<String, CacheEntry>,
    settings: LazyLoadSettings,
    seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheEntry {
    /// Entry handed to a caller without being stored
    pub fn uncached(tool: Arc<GeneratedTool>, schema: ToolView) -> Self {
        Self {
            tool,
            schema,
            loaded: true,
            last_accessed: Utc::now(),
            access_count: 1,
            touch_seq: 0,
        }
    }
}

impl LazyToolCache {
    pub fn new(settings: LazyLoadSettings) -> Self {
        Self {
            entries: HashMap::new(),
            settings,
            seq: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn settings(&self) -> &LazyLoadSettings {
        &self.settings
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Fetch a cached entry, recording the access
    pub fn get(&mut self, id: &str) -> Option<CacheEntry> {
        let seq = self.next_seq();
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.last_accessed = Utc::now();
                entry.access_count += 1;
                entry.touch_seq = seq;
                self.hits += 1;
                Some(entry.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Entry without recording an access
    pub fn peek(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert a freshly materialized tool.
    ///
    /// If another load raced this one in, the existing entry wins and is
    /// touched instead.
    pub fn insert(&mut self, tool: Arc<GeneratedTool>, schema: ToolView) -> CacheEntry {
        if self.entries.contains_key(&tool.id) {
            if let Some(existing) = self.get(&tool.id) {
                return existing;
            }
        }

        if self.settings.max_cache_size == 0 {
            return CacheEntry::uncached(tool, schema);
        }
        self.cleanup_if_needed();

        let entry = CacheEntry {
            touch_seq: self.next_seq(),
            ..CacheEntry::uncached(Arc::clone(&tool), schema)
        };
        self.entries.insert(tool.id.clone(), entry.clone());
        debug!("Materialized tool {} ({} cached)", tool.id, self.entries.len());
        entry
    }

    fn cleanup_if_needed(&mut self) -> usize {
        let max = self.settings.max_cache_size;
        let watermark = (max as f64 * self.settings.cleanup_threshold).floor() as usize;
        let len = self.entries.len();
        if len <= watermark && len < max {
            return 0;
        }

        let count = ((max as f64 * self.settings.eviction_fraction).floor() as usize).max(1);
        self.evict_oldest(count)
    }

    /// Remove the `count` least recently accessed entries
    pub fn evict_oldest(&mut self, count: usize) -> usize {
        let mut by_age: Vec<(DateTime<Utc>, u64, String)> = self
            .entries
            .iter()
            .map(|(id, e)| (e.last_accessed, e.touch_seq, id.clone()))
            .collect();
        by_age.sort();

        let victims: Vec<String> = by_age.into_iter().take(count).map(|(_, _, id)| id).collect();
        for id in &victims {
            self.entries.remove(id);
        }
        self.evictions += victims.len() as u64;

        if !victims.is_empty() {
            warn!(
                "Lazy cache cleanup evicted {} tools ({} remain)",
                victims.len(),
                self.entries.len()
            );
        }
        victims.len()
    }

    pub fn remove(&mut self, id: &str) -> Option<CacheEntry> {
        self.entries.remove(id)
    }

    /// Drop every entry whose id matches `predicate`
    pub fn evict_where(&mut self, predicate: impl Fn(&str) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, _| !predicate(id));
        before - self.entries.len()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn cached_footprint(&self) -> usize {
        self.entries.values().map(|e| e.tool.memory_footprint).sum()
    }

    pub fn total_accesses(&self) -> u64 {
        self.entries.values().map(|e| e.access_count).sum()
    }

    /// `cache size / total accesses across cached entries`.
    ///
    /// A coarse indicator rather than a true hit ratio: 1.0 means every cached
    /// tool was loaded once, lower values mean repeated use.
    pub fn hit_rate(&self) -> f64 {
        match self.total_accesses() {
            0 => 0.0,
            total => self.entries.len() as f64 / total as f64,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}
