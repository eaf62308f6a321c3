//! nf-cache: discovery cache for nodeforge
//!
//! Features:
//! - TTL records keyed by resource class
//! - Recency-bounded total size
//! - Glob/regex selective invalidation
//! - Background maintenance with eager warming
//! - Health reporting

pub mod discovery_cache;
pub mod health;
pub mod pattern;

pub use discovery_cache::{CacheRefresher, CacheStats, DiscoveryCache, ResourceClass};
pub use health::{HealthReport, HealthStatus};
pub use pattern::KeyPattern;

/// Prelude for convenient imports
pub mod prelude {
    pub use super::discovery_cache::{CacheRefresher, DiscoveryCache, ResourceClass};
    pub use super::pattern::KeyPattern;
}
