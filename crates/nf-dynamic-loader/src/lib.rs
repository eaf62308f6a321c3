//! nf-dynamic-loader - the tool engine service object
//!
//! Wires a capability source, the discovery cache, schema and tool
//! generation, the two-tier registry and the selector behind one
//! [`DynamicToolRegistry`]. Construct one per engine connection and pass it
//! to whatever exposes tools to callers.

pub mod cached_value;
pub mod dynamic_registry;
pub mod materializer;
pub mod refresher;

pub use cached_value::CachedValue;
pub use dynamic_registry::{DynamicToolRegistry, EngineStatistics};
pub use materializer::CacheBackedMaterializer;
pub use refresher::DiscoveryRefresher;
