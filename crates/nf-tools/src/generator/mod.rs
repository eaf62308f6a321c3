//! Tool Generator
//!
//! Produces three kinds of tools from discovered nodes:
//! - one category tool per distinct category (generated first)
//! - one general tool per node
//! - up to five operation-specific tools per node
//!
//! A failure on one node or operation is counted and skipped; the batch
//! always completes.

pub mod operations;
pub mod routing;

use chrono::{DateTime, Utc};
use nf_core::{
    Error, GeneratedTool, NodeDescriptor, Result, SchemaRef, ToolType, Verb,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::schema::SchemaBatch;

pub use operations::{extract_operations, MAX_OPERATIONS_PER_NODE};
pub use routing::{category_route, route};

/// Declared priority of the built-in system tools
pub const PRIORITY_SYSTEM: u8 = 90;
/// Declared priority of operation-specific tools
pub const PRIORITY_OPERATION: u8 = 60;
/// Declared priority of general node tools
pub const PRIORITY_GENERAL: u8 = 50;
/// Declared priority of category tools
pub const PRIORITY_CATEGORY: u8 = 40;

/// Base estimate for any materialized tool
pub const BASE_FOOTPRINT: usize = 1000;
const PER_PROPERTY_FOOTPRINT: usize = 50;
const PER_CREDENTIAL_FOOTPRINT: usize = 100;
const PER_CATEGORY_NODE_FOOTPRINT: usize = 50;

const PACKAGE_PREFIXES: [&str; 2] = ["n8n-nodes-base.", "@n8n/n8n-nodes-langchain."];

/// Statistics of one generation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    pub nodes_processed: usize,
    pub tools_generated: usize,
    /// Per-item failures, `skipped` included
    pub errors: usize,
    /// Catalogue entries rejected before generation because they could not be decoded
    #[serde(default)]
    pub skipped: usize,
    pub general_tools: usize,
    pub operation_tools: usize,
    pub category_tools: usize,
    pub duration_ms: u64,
    /// Whether the minimal fallback set replaced discovery
    pub fallback_active: bool,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Tools of one generation run, in generation order
#[derive(Debug, Default)]
pub struct ToolBatch {
    pub tools: Vec<GeneratedTool>,
    pub stats: GenerationStats,
}

#[derive(Debug, Default)]
pub struct ToolGenerator;

impl ToolGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate every tool for `nodes`.
    ///
    /// Nodes whose schema was skipped still get their tools; the skip is
    /// counted as an error.
    pub fn generate(&self, nodes: &[NodeDescriptor], schemas: &SchemaBatch) -> ToolBatch {
        let started = Instant::now();
        let mut batch = ToolBatch::default();
        let mut names: HashSet<String> = HashSet::new();

        batch.stats.errors += schemas.skipped.len();

        // Categories must be complete before node tools reference them
        let mut categories: BTreeMap<&str, usize> = BTreeMap::new();
        for node in nodes {
            *categories.entry(node.primary_category()).or_default() += 1;
        }
        for (category, node_count) in &categories {
            match self.category_tool(category, *node_count) {
                Ok(tool) => push_unique(&mut batch, &mut names, tool),
                Err(e) => {
                    warn!("Category tool for {} failed: {}", category, e);
                    batch.stats.errors += 1;
                }
            }
        }

        let mut seen_nodes: HashSet<&str> = HashSet::new();
        for node in nodes {
            batch.stats.nodes_processed += 1;
            if !seen_nodes.insert(node.name.as_str()) {
                warn!("Duplicate node {} skipped", node.name);
                batch.stats.errors += 1;
                continue;
            }

            match self.general_tool(node) {
                Ok(tool) => push_unique(&mut batch, &mut names, tool),
                Err(e) => {
                    warn!("General tool for {} failed: {}", node.name, e);
                    batch.stats.errors += 1;
                    continue;
                }
            }

            for verb in extract_operations(node) {
                match self.operation_tool(node, verb) {
                    Ok(tool) => push_unique(&mut batch, &mut names, tool),
                    Err(e) => {
                        warn!("Operation tool {} for {} failed: {}", verb, node.name, e);
                        batch.stats.errors += 1;
                    }
                }
            }
        }

        batch.stats.duration_ms = started.elapsed().as_millis() as u64;
        batch.stats.generated_at = Some(Utc::now());
        info!(
            "Generated {} tools from {} nodes ({} general, {} operation, {} category, {} errors) in {}ms",
            batch.stats.tools_generated,
            batch.stats.nodes_processed,
            batch.stats.general_tools,
            batch.stats.operation_tools,
            batch.stats.category_tools,
            batch.stats.errors,
            batch.stats.duration_ms
        );
        batch
    }

    pub fn general_tool(&self, node: &NodeDescriptor) -> Result<GeneratedTool> {
        let slug = node_slug(node)?;
        let description = if node.description.is_empty() {
            format!("Run the {} node", node.label())
        } else {
            format!("{}: {}", node.label(), node.description)
        };

        Ok(GeneratedTool::new(
            general_id(&node.name),
            slug,
            description,
            SchemaRef::NodeParameters {
                node: node.name.clone(),
            },
            ToolType::General,
            node.primary_category(),
            route(node.primary_category(), None),
            node_footprint(node),
            PRIORITY_GENERAL,
        ))
    }

    pub fn operation_tool(&self, node: &NodeDescriptor, verb: Verb) -> Result<GeneratedTool> {
        let slug = node_slug(node)?;
        Ok(GeneratedTool::new(
            operation_id(&node.name, verb),
            format!("{}_{}", slug, verb),
            format!("{} via {}", capitalize(verb.as_str()), node.label()),
            SchemaRef::Operation {
                node: node.name.clone(),
                verb,
            },
            ToolType::OperationSpecific,
            node.primary_category(),
            route(node.primary_category(), Some(verb)),
            node_footprint(node) + operations::overhead(verb),
            PRIORITY_OPERATION,
        ))
    }

    pub fn category_tool(&self, category: &str, node_count: usize) -> Result<GeneratedTool> {
        let category_slug = slug(category);
        if category_slug.is_empty() {
            return Err(Error::generation(format!(
                "category '{}' has no usable name",
                category
            )));
        }

        debug!("Category tool for {} ({} nodes)", category, node_count);
        Ok(GeneratedTool::new(
            category_id(category),
            format!("category_{}_tools", category_slug),
            format!(
                "List, search, recommend or compare the {} {} nodes",
                node_count, category
            ),
            SchemaRef::CategoryQuery {
                category: category.to_string(),
            },
            ToolType::Category,
            category,
            category_route(category),
            BASE_FOOTPRINT + node_count * PER_CATEGORY_NODE_FOOTPRINT,
            PRIORITY_CATEGORY,
        ))
    }
}

fn push_unique(batch: &mut ToolBatch, names: &mut HashSet<String>, tool: GeneratedTool) {
    if !names.insert(tool.name.clone()) {
        warn!("Tool name {} already generated, skipping {}", tool.name, tool.id);
        batch.stats.errors += 1;
        return;
    }

    match tool.tool_type {
        ToolType::General => batch.stats.general_tools += 1,
        ToolType::OperationSpecific => batch.stats.operation_tools += 1,
        ToolType::Category => batch.stats.category_tools += 1,
        ToolType::Builtin => {}
    }
    batch.stats.tools_generated += 1;
    batch.tools.push(tool);
}

pub fn general_id(node: &str) -> String {
    format!("general:{}", node)
}

pub fn operation_id(node: &str, verb: Verb) -> String {
    format!("operation:{}:{}", node, verb)
}

pub fn category_id(category: &str) -> String {
    format!("category:{}", category)
}

/// Estimated footprint of a node's general tool
pub fn node_footprint(node: &NodeDescriptor) -> usize {
    BASE_FOOTPRINT
        + node.property_count() * PER_PROPERTY_FOOTPRINT
        + node.credentials.len() * PER_CREDENTIAL_FOOTPRINT
}

fn node_slug(node: &NodeDescriptor) -> Result<String> {
    let s = slug(&node.name);
    if s.is_empty() {
        Err(Error::generation(format!(
            "node name '{}' yields an empty tool name",
            node.name
        )))
    } else {
        Ok(s)
    }
}

/// Snake-case tool name stem: package prefix removed, camelCase split,
/// everything that is not ASCII alphanumeric folded into single underscores
pub fn slug(name: &str) -> String {
    let base = PACKAGE_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name);

    let mut out = String::with_capacity(base.len() + 4);
    let mut prev_lower = false;
    for ch in base.chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaGenerator;
    use nf_core::AgentRole;
    use serde_json::json;

    fn nodes() -> Vec<NodeDescriptor> {
        vec![
            NodeDescriptor::new("n8n-nodes-base.slack", "Slack")
                .with_category("Communication")
                .with_credential("slackApi", true)
                .with_properties(json!([{
                    "name": "operation",
                    "type": "options",
                    "options": [{"value": "send"}, {"value": "update"}, {"value": "archive"}]
                }])),
            NodeDescriptor::new("n8n-nodes-base.postgres", "Postgres").with_category("Data & Storage"),
            NodeDescriptor::new("@n8n/n8n-nodes-langchain.lmChatOpenAi", "OpenAI Chat Model")
                .with_category("AI"),
        ]
    }

    fn generate(nodes: &[NodeDescriptor]) -> ToolBatch {
        let schemas = SchemaGenerator::default().generate(nodes);
        ToolGenerator::new().generate(nodes, &schemas)
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("n8n-nodes-base.googleSheets"), "google_sheets");
        assert_eq!(slug("@n8n/n8n-nodes-langchain.lmChatOpenAi"), "lm_chat_open_ai");
        assert_eq!(slug("Data & Storage"), "data_storage");
        assert_eq!(slug("..."), "");
    }

    #[test]
    fn test_generate_all_kinds() {
        let batch = generate(&nodes());
        let stats = &batch.stats;

        assert_eq!(stats.nodes_processed, 3);
        assert_eq!(stats.category_tools, 3);
        assert_eq!(stats.general_tools, 3);
        // slack: send, update; postgres: CRUD + list defaults; openai: execute
        assert_eq!(stats.operation_tools, 2 + 5 + 1);
        assert_eq!(stats.tools_generated, batch.tools.len());
        assert_eq!(stats.errors, 0);

        // Category tools lead the batch
        assert!(batch.tools[..3].iter().all(|t| t.tool_type == ToolType::Category));
    }

    #[test]
    fn test_ids_names_and_routing() {
        let batch = generate(&nodes());
        let find = |id: &str| batch.tools.iter().find(|t| t.id == id).unwrap();

        let send = find("operation:n8n-nodes-base.slack:send");
        assert_eq!(send.name, "slack_send");
        assert_eq!(send.agent_recommendation, AgentRole::Connector);
        assert_eq!(send.priority, PRIORITY_OPERATION);
        assert_eq!(send.memory_footprint, 1000 + 50 + 100 + 150);

        let update = find("operation:n8n-nodes-base.slack:update");
        assert_eq!(update.agent_recommendation, AgentRole::ScriptGuard);

        let category = find("category:Data & Storage");
        assert_eq!(category.name, "category_data_storage_tools");
        assert!(category.source_node.is_none());
        assert_eq!(category.memory_footprint, 1050);

        let general = find("general:@n8n/n8n-nodes-langchain.lmChatOpenAi");
        assert_eq!(general.name, "lm_chat_open_ai");
        assert_eq!(general.agent_recommendation, AgentRole::NodeExpert);
    }

    #[test]
    fn test_generation_is_idempotent() {
        let first: Vec<String> = generate(&nodes()).tools.into_iter().map(|t| t.id).collect();
        let second: Vec<String> = generate(&nodes()).tools.into_iter().map(|t| t.id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_input() {
        let batch = generate(&[]);
        assert_eq!(batch.stats.tools_generated, 0);
        assert_eq!(batch.stats.errors, 0);
        assert!(batch.tools.is_empty());
    }

    #[test]
    fn test_bad_nodes_are_counted_not_fatal() {
        let mut input = nodes();
        input.push(NodeDescriptor::new("n8n-nodes-base.slack", "Slack again"));
        input.push(NodeDescriptor::new("???", "Unnamed"));
        input.push(NodeDescriptor::new("broken", "Broken").with_properties(json!("oops")));

        let batch = generate(&input);
        // duplicate, empty slug, skipped schema
        assert_eq!(batch.stats.errors, 3);
        assert!(batch.tools.iter().any(|t| t.id == "general:broken"));
        assert_eq!(batch.stats.general_tools, 4);
    }
}
