//! Two-tier Tool Registry
//!
//! Tier 1 keeps lightweight metadata for every generated tool and is only
//! ever replaced wholesale by a new generation. Tier 2 is the bounded
//! [`LazyToolCache`] of materialized tools, filled through a
//! [`ToolMaterializer`] on first load.

use async_trait::async_trait;
use nf_core::config::LazyLoadSettings;
use nf_core::{GeneratedTool, Result, SchemaRef, ToolType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::builtin;
use crate::generator::operations;
use crate::lazy_cache::{CacheEntry, LazyToolCache, ToolView};

/// Builds the full view of a tool from its metadata (may be expensive)
#[async_trait]
pub trait ToolMaterializer: Send + Sync {
    async fn materialize(&self, tool: &GeneratedTool) -> Result<ToolView>;
}

/// Materializer that only uses the verb and builtin tables; node parameters
/// stay a free-form bag
#[derive(Debug, Default)]
pub struct BasicMaterializer;

#[async_trait]
impl ToolMaterializer for BasicMaterializer {
    async fn materialize(&self, tool: &GeneratedTool) -> Result<ToolView> {
        Ok(build_view(tool, None))
    }
}

/// View of `tool`, embedding `node_shape` as its node parameters when known
pub fn build_view(tool: &GeneratedTool, node_shape: Option<&Value>) -> ToolView {
    let (input_schema, output_schema) = match &tool.schema {
        SchemaRef::NodeParameters { .. } => (
            operations::general_input_schema(node_shape),
            operations::generic_output(),
        ),
        SchemaRef::Operation { verb, .. } => (
            operations::operation_input_schema(*verb, node_shape),
            operations::output_shape(*verb),
        ),
        SchemaRef::CategoryQuery { category } => (
            operations::category_input_schema(category),
            operations::category_output_schema(),
        ),
        SchemaRef::Builtin { tool } => (builtin::input_schema(tool), builtin::output_schema(tool)),
    };

    ToolView {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema,
        output_schema,
        agent_recommendation: tool.agent_recommendation,
    }
}

/// Statistics about the registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStats {
    pub total_tools: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub total_memory_footprint: usize,
    pub cached_tools: usize,
    pub cached_memory_footprint: usize,
    pub max_cache_size: usize,
    /// Cached tools divided by accesses to them; see [`LazyToolCache::hit_rate`]
    pub hit_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
}

/// One immutable generation of tool metadata
#[derive(Debug, Default)]
pub struct ToolIndex {
    tools: Vec<Arc<GeneratedTool>>,
    by_id: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl ToolIndex {
    fn build(tools: Vec<GeneratedTool>) -> Self {
        let mut index = ToolIndex::default();
        for tool in tools {
            if index.by_id.contains_key(&tool.id) || index.by_name.contains_key(&tool.name) {
                warn!("Duplicate tool {} ({}) ignored", tool.name, tool.id);
                continue;
            }
            let position = index.tools.len();
            index.by_id.insert(tool.id.clone(), position);
            index.by_name.insert(tool.name.clone(), position);
            index.tools.push(Arc::new(tool));
        }
        index
    }

    pub fn tools(&self) -> &[Arc<GeneratedTool>] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up by id, then by name
    pub fn resolve(&self, key: &str) -> Option<&Arc<GeneratedTool>> {
        self.by_id
            .get(key)
            .or_else(|| self.by_name.get(key))
            .and_then(|&i| self.tools.get(i))
    }
}

pub struct ToolRegistry {
    index: RwLock<Arc<ToolIndex>>,
    lazy: Mutex<LazyToolCache>,
    materializer: Arc<dyn ToolMaterializer>,
}

impl ToolRegistry {
    pub fn new(settings: LazyLoadSettings, materializer: Arc<dyn ToolMaterializer>) -> Self {
        Self {
            index: RwLock::new(Arc::new(ToolIndex::default())),
            lazy: Mutex::new(LazyToolCache::new(settings)),
            materializer,
        }
    }

    /// Swap in a new generation.
    ///
    /// Readers holding the previous snapshot keep it until they drop it.
    /// Materialized entries belong to the previous generation and are cleared.
    pub async fn replace_generation(&self, tools: Vec<GeneratedTool>) -> usize {
        let index = Arc::new(ToolIndex::build(tools));
        let count = index.len();

        *self.index.write().await = index;
        let dropped = self.lazy.lock().await.clear();

        info!(
            "Registry now holds {} tools ({} materialized entries dropped)",
            count, dropped
        );
        count
    }

    /// Current generation
    pub async fn snapshot(&self) -> Arc<ToolIndex> {
        Arc::clone(&*self.index.read().await)
    }

    pub async fn get_all_tools(&self) -> Vec<Arc<GeneratedTool>> {
        self.snapshot().await.tools().to_vec()
    }

    pub async fn get_tools_by_category(&self, category: &str) -> Vec<Arc<GeneratedTool>> {
        let wanted = category.to_lowercase();
        self.snapshot()
            .await
            .tools()
            .iter()
            .filter(|t| t.category.to_lowercase() == wanted)
            .cloned()
            .collect()
    }

    /// Tool by id or name
    pub async fn get_tool(&self, key: &str) -> Option<Arc<GeneratedTool>> {
        self.snapshot().await.resolve(key).cloned()
    }

    /// Materialized form of a tool, loading it on first use.
    ///
    /// `None` when no tool has this id (or name). A failing materializer
    /// degrades to the table-only view rather than failing the load.
    pub async fn load_tool(&self, key: &str) -> Option<CacheEntry> {
        let tool = self.get_tool(key).await?;

        if let Some(entry) = self.lazy.lock().await.get(&tool.id) {
            return Some(entry);
        }

        let view = match self.materializer.materialize(&tool).await {
            Ok(view) => view,
            Err(e) => {
                warn!("Materializing {} failed, using basic view: {}", tool.id, e);
                build_view(&tool, None)
            }
        };

        // A new generation may have been swapped in while materializing;
        // an entry cached now would outlive its metadata
        let mut lazy = self.lazy.lock().await;
        let current = self.snapshot().await;
        if !current
            .resolve(&tool.id)
            .is_some_and(|resolved| Arc::ptr_eq(resolved, &tool))
        {
            debug!("Tool {} changed generation while loading, not cached", tool.id);
            return Some(CacheEntry::uncached(tool, view));
        }

        debug!("Loaded tool {}", tool.id);
        Some(lazy.insert(tool, view))
    }

    /// Whether a tool is currently materialized
    pub async fn is_loaded(&self, id: &str) -> bool {
        self.lazy.lock().await.contains(id)
    }

    /// Stamp a use on the tool's metadata; false when unknown
    pub async fn touch(&self, key: &str) -> bool {
        match self.get_tool(key).await {
            Some(tool) => {
                tool.touch();
                true
            }
            None => false,
        }
    }

    /// Case-insensitive substring search over names, descriptions and categories
    pub async fn search(&self, query: &str, limit: usize) -> Vec<Arc<GeneratedTool>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        self.snapshot()
            .await
            .tools()
            .iter()
            .filter(|t| {
                t.name.to_lowercase().contains(&needle)
                    || t.description.to_lowercase().contains(&needle)
                    || t.category.to_lowercase().contains(&needle)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop materialized entries whose id matches `predicate`
    pub async fn evict_where(&self, predicate: impl Fn(&str) -> bool) -> usize {
        self.lazy.lock().await.evict_where(predicate)
    }

    /// Drop every materialized entry; metadata is untouched
    pub async fn clear_loaded(&self) -> usize {
        self.lazy.lock().await.clear()
    }

    pub async fn loaded_count(&self) -> usize {
        self.lazy.lock().await.len()
    }

    pub async fn stats(&self) -> ToolStats {
        let index = self.snapshot().await;
        let mut stats = ToolStats {
            total_tools: index.len(),
            ..Default::default()
        };

        for kind in [
            ToolType::General,
            ToolType::OperationSpecific,
            ToolType::Category,
            ToolType::Builtin,
        ] {
            stats.by_type.insert(kind.to_string(), 0);
        }
        for tool in index.tools() {
            *stats.by_type.entry(tool.tool_type.to_string()).or_default() += 1;
            *stats.by_category.entry(tool.category.clone()).or_default() += 1;
            stats.total_memory_footprint += tool.memory_footprint;
        }

        let lazy = self.lazy.lock().await;
        stats.cached_tools = lazy.len();
        stats.cached_memory_footprint = lazy.cached_footprint();
        stats.max_cache_size = lazy.settings().max_cache_size;
        stats.hit_rate = lazy.hit_rate();
        stats.cache_hits = lazy.hits();
        stats.cache_misses = lazy.misses();
        stats.evictions = lazy.evictions();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ToolGenerator;
    use crate::schema::SchemaGenerator;
    use nf_core::{Error, NodeDescriptor, Verb};
    use serde_json::json;
    use tokio::sync::Notify;

    fn settings(max: usize) -> LazyLoadSettings {
        LazyLoadSettings {
            max_cache_size: max,
            ..Default::default()
        }
    }

    fn node_tools(count: usize) -> Vec<GeneratedTool> {
        let nodes: Vec<NodeDescriptor> = (0..count)
            .map(|i| NodeDescriptor::new(format!("n8n-nodes-base.node{}", i), format!("Node {}", i)))
            .collect();
        let schemas = SchemaGenerator::default().generate(&nodes);
        ToolGenerator::new().generate(&nodes, &schemas).tools
    }

    async fn registry(max: usize, tools: Vec<GeneratedTool>) -> ToolRegistry {
        let registry = ToolRegistry::new(settings(max), Arc::new(BasicMaterializer));
        registry.replace_generation(tools).await;
        registry
    }

    #[tokio::test]
    async fn test_lookup_by_id_and_name() {
        let registry = registry(10, node_tools(2)).await;

        let by_id = registry.get_tool("general:n8n-nodes-base.node0").await.unwrap();
        let by_name = registry.get_tool("node0").await.unwrap();
        assert_eq!(by_id.id, by_name.id);
        assert!(registry.get_tool("nope").await.is_none());
        assert_eq!(registry.get_tools_by_category("miscellaneous").await.len(), 5);
    }

    #[tokio::test]
    async fn test_load_unknown_tool_is_none() {
        let registry = registry(10, node_tools(1)).await;
        assert!(registry.load_tool("general:missing").await.is_none());
    }

    #[tokio::test]
    async fn test_load_materializes_once() {
        let registry = registry(10, node_tools(1)).await;
        let id = "operation:n8n-nodes-base.node0:execute";

        let first = registry.load_tool(id).await.unwrap();
        assert!(first.loaded);
        assert_eq!(first.access_count, 1);
        assert!(first.schema.input_schema["properties"].get("nodeParameters").is_some());

        let second = registry.load_tool(id).await.unwrap();
        assert_eq!(second.access_count, 2);
        assert_eq!(registry.loaded_count().await, 1);
    }

    #[tokio::test]
    async fn test_eviction_keeps_metadata() {
        let registry = registry(4, node_tools(10)).await;
        let ids: Vec<String> = registry
            .get_all_tools()
            .await
            .iter()
            .map(|t| t.id.clone())
            .collect();

        for id in &ids {
            registry.load_tool(id).await.unwrap();
            assert!(registry.loaded_count().await <= 4);
        }

        let stats = registry.stats().await;
        assert!(stats.evictions > 0);
        assert!(!registry.is_loaded(&ids[0]).await);
        // Evicted from tier 2, still resident in tier 1
        assert!(registry.get_tool(&ids[0]).await.is_some());
        assert_eq!(stats.total_tools, ids.len());
    }

    #[tokio::test]
    async fn test_new_generation_clears_loaded_entries() {
        let registry = registry(10, node_tools(2)).await;
        registry.load_tool("node0").await.unwrap();
        assert_eq!(registry.loaded_count().await, 1);

        let old = registry.snapshot().await;
        registry.replace_generation(node_tools(1)).await;
        assert_eq!(registry.loaded_count().await, 0);
        // Old snapshot stays valid for whoever holds it
        assert!(old.resolve("node1").is_some());
        assert!(registry.get_tool("node1").await.is_none());
    }

    #[tokio::test]
    async fn test_stats_breakdown() {
        let registry = registry(10, node_tools(3)).await;
        registry.load_tool("node0").await.unwrap();

        let stats = registry.stats().await;
        assert_eq!(stats.total_tools, 1 + 3 + 3);
        assert_eq!(stats.by_type["category"], 1);
        assert_eq!(stats.by_type["general"], 3);
        assert_eq!(stats.by_type["operation_specific"], 3);
        assert_eq!(stats.by_type["builtin"], 0);
        assert_eq!(stats.by_category["Miscellaneous"], 7);
        assert_eq!(stats.cached_tools, 1);
        assert_eq!(stats.hit_rate, 1.0);
    }

    #[tokio::test]
    async fn test_search() {
        let registry = registry(10, node_tools(12)).await;
        let found = registry.search("NODE1", 100).await;
        // node1, node10, node11: general + execute each
        assert_eq!(found.len(), 6);
        assert_eq!(registry.search("node", 3).await.len(), 3);
        assert!(registry.search("  ", 10).await.is_empty());
    }

    #[derive(Default)]
    struct GatedMaterializer {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ToolMaterializer for GatedMaterializer {
        async fn materialize(&self, tool: &GeneratedTool) -> Result<ToolView> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(build_view(tool, None))
        }
    }

    #[tokio::test]
    async fn test_load_racing_new_generation_is_not_cached() {
        let gate = Arc::new(GatedMaterializer::default());
        let materializer: Arc<dyn ToolMaterializer> = Arc::clone(&gate) as _;
        let registry = Arc::new(ToolRegistry::new(settings(10), materializer));
        registry.replace_generation(node_tools(1)).await;

        let loader = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.load_tool("node0").await })
        };
        gate.entered.notified().await;
        registry.replace_generation(node_tools(1)).await;
        gate.release.notify_one();

        let entry = loader.await.unwrap().unwrap();
        assert!(entry.loaded);
        assert_eq!(registry.loaded_count().await, 0);

        // Loads against the current generation are cached as usual
        gate.release.notify_one();
        registry.load_tool("node0").await.unwrap();
        assert!(registry.is_loaded("general:n8n-nodes-base.node0").await);
    }

    struct FailingMaterializer;

    #[async_trait]
    impl ToolMaterializer for FailingMaterializer {
        async fn materialize(&self, _tool: &GeneratedTool) -> Result<ToolView> {
            Err(Error::internal("schema store offline"))
        }
    }

    #[tokio::test]
    async fn test_failing_materializer_degrades() {
        let registry = ToolRegistry::new(settings(10), Arc::new(FailingMaterializer));
        registry.replace_generation(node_tools(1)).await;

        let entry = registry.load_tool("node0_execute").await.unwrap();
        assert_eq!(entry.tool.operation_name, Some(Verb::Execute));
        assert_eq!(
            entry.schema.input_schema["properties"]["nodeParameters"],
            json!({"type": "object"})
        );
    }
}
