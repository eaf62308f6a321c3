//! Materializes tools with node schemas taken from the discovery cache

use async_trait::async_trait;
use nf_cache::{DiscoveryCache, ResourceClass};
use nf_core::{GeneratedSchema, GeneratedTool, Result};
use nf_tools::{build_view, SchemaGenerator, ToolMaterializer, ToolView};
use std::sync::Arc;
use tracing::debug;

use crate::cached_value::{CachedValue, ALL_KEY};

/// Schema of `node` from the cache, regenerated from cached descriptors
/// when it has been evicted. Never calls the capability source.
pub async fn cached_schema(
    cache: &DiscoveryCache<CachedValue>,
    generator: &SchemaGenerator,
    node: &str,
) -> Result<Option<Arc<GeneratedSchema>>> {
    if let Some(schema) = cache
        .get(ResourceClass::Schemas, node)
        .await
        .and_then(CachedValue::into_schema)
    {
        return Ok(Some(schema));
    }

    let Some(nodes) = cache
        .get(ResourceClass::Nodes, ALL_KEY)
        .await
        .and_then(CachedValue::into_nodes)
    else {
        return Ok(None);
    };
    let Some(descriptor) = nodes.find(node) else {
        return Ok(None);
    };

    let schema = Arc::new(generator.generate_one(descriptor)?);
    cache
        .set(
            ResourceClass::Schemas,
            node,
            CachedValue::Schema(Arc::clone(&schema)),
        )
        .await;
    debug!("Regenerated schema for {}", node);
    Ok(Some(schema))
}

pub struct CacheBackedMaterializer {
    cache: Arc<DiscoveryCache<CachedValue>>,
    generator: Arc<SchemaGenerator>,
}

impl CacheBackedMaterializer {
    pub fn new(cache: Arc<DiscoveryCache<CachedValue>>, generator: Arc<SchemaGenerator>) -> Self {
        Self { cache, generator }
    }
}

#[async_trait]
impl ToolMaterializer for CacheBackedMaterializer {
    async fn materialize(&self, tool: &GeneratedTool) -> Result<ToolView> {
        let schema = match &tool.source_node {
            Some(node) => cached_schema(&self.cache, &self.generator, node).await?,
            None => None,
        };
        Ok(build_view(tool, schema.as_ref().map(|s| &s.shape)))
    }
}
