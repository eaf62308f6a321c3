use chrono::Utc;
use nf_cache::{CacheStats, DiscoveryCache, HealthReport, KeyPattern, ResourceClass};
use nf_core::{
    CredentialTypeDescriptor, EngineConfig, Error, GeneratedSchema, GeneratedTool, NodeCatalog,
    Result, ToolContext, ToolSelection, WarmingStrategy, WorkflowDescriptor,
};
use nf_tools::{
    builtin, CacheEntry, CapabilitySource, ContextSelector, GenerationStats, SchemaGenerator,
    SchemaOptions, SelectorStats, ToolGenerator, ToolRegistry, ToolStats,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cached_value::{CachedValue, ALL_KEY};
use crate::materializer::{cached_schema, CacheBackedMaterializer};
use crate::refresher::DiscoveryRefresher;

/// Everything `get_statistics` reports
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatistics {
    pub source: String,
    pub tools: ToolStats,
    pub cache: CacheStats,
    pub health: HealthReport,
    pub selector: SelectorStats,
    pub last_run: Option<GenerationStats>,
}

/// Dynamic tool registry: the engine behind the tool-registry contract
pub struct DynamicToolRegistry {
    config: EngineConfig,
    source: Arc<dyn CapabilitySource>,
    cache: Arc<DiscoveryCache<CachedValue>>,
    schema_generator: Arc<SchemaGenerator>,
    tool_generator: ToolGenerator,
    registry: ToolRegistry,
    selector: ContextSelector,
    last_run: RwLock<Option<GenerationStats>>,
    /// Whether a discovery run has ever succeeded
    discovered: AtomicBool,
    /// Serializes discovery runs
    run_lock: Mutex<()>,
}

impl DynamicToolRegistry {
    /// Build the engine; fails when `config` does not pass validation
    pub fn new(config: EngineConfig, source: Arc<dyn CapabilitySource>) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(DiscoveryCache::new(config.cache.clone()));
        let schema_generator = Arc::new(SchemaGenerator::new(SchemaOptions::from(&config.schema)));
        let materializer = Arc::new(CacheBackedMaterializer::new(
            Arc::clone(&cache),
            Arc::clone(&schema_generator),
        ));
        let registry = ToolRegistry::new(config.lazy_load.clone(), materializer);

        Ok(Self {
            config,
            source,
            cache,
            schema_generator,
            tool_generator: ToolGenerator::new(),
            registry,
            selector: ContextSelector::new(),
            last_run: RwLock::new(None),
            discovered: AtomicBool::new(false),
            run_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// First discovery run plus background maintenance.
    ///
    /// A failed discovery is not fatal here: the fallback tool set is
    /// installed and the returned statistics say so.
    pub async fn initialize(&self) -> Result<GenerationStats> {
        info!("Initializing tool engine with source '{}'", self.source.name());

        let stats = match self.generate_all_tools().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Discovery failed, serving fallback tools: {}", e);
                self.last_run.read().await.clone().unwrap_or_default()
            }
        };

        if self.config.cache.warming_strategy == WarmingStrategy::Eager && !stats.fallback_active {
            let (workflows, credentials) = futures::join!(
                self.discover_workflows(),
                self.discover_credential_types()
            );
            if let Err(e) = workflows {
                warn!("Warming workflows failed: {}", e);
            }
            if let Err(e) = credentials {
                warn!("Warming credential types failed: {}", e);
            }
        }

        let refresher = Arc::new(DiscoveryRefresher::new(
            Arc::clone(&self.source),
            Arc::clone(&self.schema_generator),
            &self.cache,
        ));
        self.cache.start_maintenance(refresher);

        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    pub async fn discover_nodes(&self) -> Result<Arc<NodeCatalog>> {
        let source = Arc::clone(&self.source);
        self.cache
            .get_or_fetch(ResourceClass::Nodes, ALL_KEY, None, || async move {
                Ok(CachedValue::Nodes(Arc::new(source.get_nodes().await?)))
            })
            .await?
            .into_nodes()
            .ok_or_else(|| Error::internal("nodes record holds another resource"))
    }

    pub async fn discover_workflows(&self) -> Result<Arc<Vec<WorkflowDescriptor>>> {
        let source = Arc::clone(&self.source);
        self.cache
            .get_or_fetch(ResourceClass::Workflows, ALL_KEY, None, || async move {
                Ok(CachedValue::Workflows(Arc::new(source.get_workflows().await?)))
            })
            .await?
            .into_workflows()
            .ok_or_else(|| Error::internal("workflows record holds another resource"))
    }

    pub async fn discover_credential_types(&self) -> Result<Arc<Vec<CredentialTypeDescriptor>>> {
        let source = Arc::clone(&self.source);
        self.cache
            .get_or_fetch(ResourceClass::CredentialTypes, ALL_KEY, None, || async move {
                Ok(CachedValue::CredentialTypes(Arc::new(
                    source.get_credential_types().await?,
                )))
            })
            .await?
            .into_credential_types()
            .ok_or_else(|| Error::internal("credential types record holds another resource"))
    }

    /// Schema of one node, discovering nodes first if none are cached
    pub async fn node_schema(&self, node: &str) -> Result<Option<Arc<GeneratedSchema>>> {
        if let Some(schema) = cached_schema(&self.cache, &self.schema_generator, node).await? {
            return Ok(Some(schema));
        }

        let nodes = self.discover_nodes().await?;
        match nodes.find(node) {
            Some(descriptor) => {
                let schema = Arc::new(self.schema_generator.generate_one(descriptor)?);
                self.cache
                    .set(
                        ResourceClass::Schemas,
                        node,
                        CachedValue::Schema(Arc::clone(&schema)),
                    )
                    .await;
                Ok(Some(schema))
            }
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------

    /// One discovery run: nodes → schemas → tools → new registry generation.
    ///
    /// Per-node failures, undecodable catalogue entries included, are counted
    /// in the statistics. A failed node discovery ends the run with an error;
    /// if nothing was ever discovered the fallback tools are installed first,
    /// otherwise the previous generation stays.
    pub async fn generate_all_tools(&self) -> Result<GenerationStats> {
        let _run = self.run_lock.lock().await;
        let started = Instant::now();

        let catalog = match self.discover_nodes().await {
            Ok(catalog) => catalog,
            Err(e) => {
                self.install_fallback(started).await;
                return Err(e);
            }
        };
        let nodes = &catalog.nodes;

        let schemas = self.schema_generator.generate(nodes);
        for (node, schema) in &schemas.schemas {
            self.cache
                .set(
                    ResourceClass::Schemas,
                    node,
                    CachedValue::Schema(Arc::new(schema.clone())),
                )
                .await;
        }

        let batch = self.tool_generator.generate(nodes, &schemas);
        let mut tools = builtin::system_tools();
        tools.extend(batch.tools);
        self.registry.replace_generation(tools).await;

        // Memoized selections were ranked against the previous generation
        self.cache
            .invalidate(None, Some(ResourceClass::Selections))
            .await;

        let mut stats = batch.stats;
        stats.skipped = catalog.rejected.len();
        stats.errors += stats.skipped;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        self.discovered.store(true, Ordering::SeqCst);
        *self.last_run.write().await = Some(stats.clone());

        info!(
            "Discovery run complete: {} nodes, {} tools, {} errors ({} descriptors skipped)",
            stats.nodes_processed, stats.tools_generated, stats.errors, stats.skipped
        );
        Ok(stats)
    }

    async fn install_fallback(&self, started: Instant) {
        if self.discovered.load(Ordering::SeqCst) {
            warn!("Discovery failed; keeping the previous tool generation");
            return;
        }

        let mut tools = builtin::system_tools();
        tools.extend(builtin::fallback_tools());
        self.registry.replace_generation(tools).await;

        let stats = GenerationStats {
            fallback_active: true,
            duration_ms: started.elapsed().as_millis() as u64,
            generated_at: Some(Utc::now()),
            ..Default::default()
        };
        *self.last_run.write().await = Some(stats);
        warn!("Capability source unavailable; fallback tool set installed");
    }

    // ------------------------------------------------------------------
    // Tool registry contract
    // ------------------------------------------------------------------

    pub async fn get_all_tools(&self) -> Vec<Arc<GeneratedTool>> {
        self.registry.get_all_tools().await
    }

    pub async fn get_tools_by_category(&self, category: &str) -> Vec<Arc<GeneratedTool>> {
        self.registry.get_tools_by_category(category).await
    }

    /// Tool by name (or id); `None` when unknown
    pub async fn get_tool(&self, name: &str) -> Option<Arc<GeneratedTool>> {
        self.registry.get_tool(name).await
    }

    /// Materialized tool; `None` when unknown
    pub async fn load_tool(&self, id: &str) -> Option<CacheEntry> {
        self.registry.load_tool(id).await
    }

    /// Substring search, as offered by the `search_tools` system tool
    pub async fn search_tools(&self, query: &str, limit: usize) -> Vec<Arc<GeneratedTool>> {
        self.registry.search(query, limit).await
    }

    /// Ranked subset of tools for a context, memoized per context
    pub async fn select_tools_for_context(&self, context: &ToolContext) -> Result<ToolSelection> {
        let key = context.cache_key()?;

        if let Some(selection) = self
            .cache
            .get(ResourceClass::Selections, &key)
            .await
            .and_then(CachedValue::into_selection)
        {
            debug!("Selection memo hit for '{}'", context.query);
            return Ok((*selection).clone());
        }

        let tools = self.registry.get_all_tools().await;
        let selection = self.selector.select(&tools, context).await;
        self.cache
            .set_with_ttl(
                ResourceClass::Selections,
                &key,
                CachedValue::Selection(Arc::new(selection.clone())),
                self.config.selection_ttl,
            )
            .await;
        Ok(selection)
    }

    /// Feed back the outcome of one invocation
    pub async fn record_tool_usage(&self, name: &str, success: bool) {
        let resolved = match self.registry.get_tool(name).await {
            Some(tool) => {
                tool.touch();
                tool.name.clone()
            }
            None => name.to_string(),
        };
        self.selector.record_usage(&resolved, success).await;
    }

    /// Remember which tools a context ended up using
    pub async fn learn_context_pattern(&self, context: &ToolContext, tools: &[String]) {
        self.selector.learn_pattern(context, tools).await;
    }

    pub async fn get_statistics(&self) -> EngineStatistics {
        EngineStatistics {
            source: self.source.name().to_string(),
            tools: self.registry.stats().await,
            cache: self.cache.stats().await,
            health: self.cache.health().await,
            selector: self.selector.stats().await,
            last_run: self.last_run.read().await.clone(),
        }
    }

    /// Drop cache records matching `pattern` (glob, or `/regex/`), along with
    /// materialized tools whose id matches. Without a pattern everything
    /// cached is dropped; tool metadata is never touched.
    pub async fn invalidate_cache(&self, pattern: Option<&str>) -> Result<usize> {
        match pattern {
            None => {
                let removed = self.cache.clear().await;
                self.registry.clear_loaded().await;
                Ok(removed)
            }
            Some(pattern) => {
                let pattern = KeyPattern::parse(pattern)?;
                let removed = self.cache.invalidate(Some(&pattern), None).await;
                let unloaded = self.registry.evict_where(|id| pattern.matches(id)).await;
                debug!("Invalidation also unloaded {} tools", unloaded);
                Ok(removed)
            }
        }
    }

    /// Forget cached discovery data and run discovery again
    pub async fn refresh_discovery_cache(&self) -> Result<GenerationStats> {
        for class in [
            ResourceClass::Nodes,
            ResourceClass::Workflows,
            ResourceClass::CredentialTypes,
            ResourceClass::Schemas,
        ] {
            self.cache.invalidate(None, Some(class)).await;
        }
        self.generate_all_tools().await
    }

    /// Stop background work and drop cached state
    pub async fn destroy(&self) {
        self.cache.stop_maintenance();
        let records = self.cache.clear().await;
        let loaded = self.registry.clear_loaded().await;
        info!(
            "Tool engine stopped ({} cache records, {} loaded tools released)",
            records, loaded
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_tools::StaticCapabilitySource;
    use nf_core::NodeDescriptor;

    fn engine(source: StaticCapabilitySource) -> DynamicToolRegistry {
        DynamicToolRegistry::new(EngineConfig::default(), Arc::new(source)).unwrap()
    }

    #[tokio::test]
    async fn test_discovery_is_cached() {
        let source = Arc::new(StaticCapabilitySource::new(vec![NodeDescriptor::new(
            "n8n-nodes-base.slack",
            "Slack",
        )]));
        let engine = DynamicToolRegistry::new(EngineConfig::default(), source.clone()).unwrap();

        engine.discover_nodes().await.unwrap();
        engine.discover_nodes().await.unwrap();
        assert_eq!(source.node_fetches(), 1);
    }

    #[tokio::test]
    async fn test_node_schema_regenerates_after_invalidation() {
        let engine = engine(StaticCapabilitySource::new(vec![NodeDescriptor::new(
            "n8n-nodes-base.slack",
            "Slack",
        )]));
        engine.generate_all_tools().await.unwrap();

        engine.invalidate_cache(Some("schemas:*")).await.unwrap();
        let schema = engine.node_schema("n8n-nodes-base.slack").await.unwrap();
        assert!(schema.is_some());
        assert!(engine.node_schema("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_an_error() {
        let engine = engine(StaticCapabilitySource::new(Vec::new()));
        let result = engine.invalidate_cache(Some("/([unclosed/")).await;
        assert!(matches!(result, Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let source = Arc::new(StaticCapabilitySource::new(Vec::new()));

        let mut config = EngineConfig::default();
        config.lazy_load.max_cache_size = 0;
        assert!(matches!(
            DynamicToolRegistry::new(config, source.clone()),
            Err(Error::Config(_))
        ));

        let mut config = EngineConfig::default();
        config.lazy_load.cleanup_threshold = f64::NAN;
        assert!(DynamicToolRegistry::new(config, source.clone()).is_err());

        let mut config = EngineConfig::default();
        config.cache.cleanup_interval = std::time::Duration::ZERO;
        assert!(DynamicToolRegistry::new(config, source).is_err());
    }
}
