//! nf-tools: capability sources, schema and tool generation, the two-tier
//! tool registry and context-aware selection for nodeforge.
//!
//! ```text
//! CapabilitySource → SchemaGenerator → ToolGenerator → ToolRegistry → ContextSelector
//! ```

pub mod builtin;
pub mod generator;
pub mod lazy_cache;
pub mod registry;
pub mod schema;
pub mod selector;
pub mod source;

pub use generator::{GenerationStats, ToolBatch, ToolGenerator};
pub use lazy_cache::{CacheEntry, LazyToolCache, ToolView};
pub use registry::{build_view, BasicMaterializer, ToolIndex, ToolMaterializer, ToolRegistry, ToolStats};
pub use schema::{SchemaBatch, SchemaGenerator, SchemaOptions, SkippedNode};
pub use selector::{ContextSelector, SelectionWeights, SelectorStats, UsageCounter};
pub use source::{CapabilitySource, HttpCapabilitySource, StaticCapabilitySource};
