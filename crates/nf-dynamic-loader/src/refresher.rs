//! Background refresh of discovery records

use async_trait::async_trait;
use nf_cache::{CacheRefresher, DiscoveryCache, ResourceClass};
use nf_core::Result;
use nf_tools::{CapabilitySource, SchemaGenerator};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::cached_value::{CachedValue, ALL_KEY};

/// Re-fetches records nearing expiry under the eager warming strategy.
///
/// Descriptor lists are fetched again from the source; schemas are
/// regenerated from the cached node list. Selections are left to expire,
/// they depend on the registry rather than the source.
pub struct DiscoveryRefresher {
    source: Arc<dyn CapabilitySource>,
    generator: Arc<SchemaGenerator>,
    cache: Weak<DiscoveryCache<CachedValue>>,
}

impl DiscoveryRefresher {
    pub fn new(
        source: Arc<dyn CapabilitySource>,
        generator: Arc<SchemaGenerator>,
        cache: &Arc<DiscoveryCache<CachedValue>>,
    ) -> Self {
        Self {
            source,
            generator,
            cache: Arc::downgrade(cache),
        }
    }
}

#[async_trait]
impl CacheRefresher<CachedValue> for DiscoveryRefresher {
    async fn refresh(&self, class: ResourceClass, key: &str) -> Result<Option<CachedValue>> {
        let value = match class {
            ResourceClass::Nodes => CachedValue::Nodes(Arc::new(self.source.get_nodes().await?)),
            ResourceClass::Workflows => {
                CachedValue::Workflows(Arc::new(self.source.get_workflows().await?))
            }
            ResourceClass::CredentialTypes => {
                CachedValue::CredentialTypes(Arc::new(self.source.get_credential_types().await?))
            }
            ResourceClass::Schemas => {
                let Some(cache) = self.cache.upgrade() else {
                    return Ok(None);
                };
                let Some(nodes) = cache
                    .get(ResourceClass::Nodes, ALL_KEY)
                    .await
                    .and_then(CachedValue::into_nodes)
                else {
                    return Ok(None);
                };
                match nodes.find(key) {
                    Some(node) => CachedValue::Schema(Arc::new(self.generator.generate_one(node)?)),
                    None => return Ok(None),
                }
            }
            ResourceClass::Selections => return Ok(None),
        };
        debug!(
            "Refreshed {} record {} from {}",
            value.kind(),
            key,
            self.source.name()
        );
        Ok(Some(value))
    }
}
