//! Built-in tools
//!
//! System tools are registered with every generation. The fallback set
//! stands in for discovery when the capability source cannot be reached.

use nf_core::{AgentRole, GeneratedTool, SchemaRef, ToolType, SYSTEM_CATEGORY};
use serde_json::{json, Value};

use crate::generator::{BASE_FOOTPRINT, PRIORITY_SYSTEM};

/// Declared priority of the fallback tools
pub const PRIORITY_FALLBACK: u8 = 70;

struct Builtin {
    name: &'static str,
    description: &'static str,
    agent: AgentRole,
}

const SYSTEM_TOOLS: &[Builtin] = &[
    Builtin {
        name: "get_system_status",
        description: "Report discovery, cache and registry health",
        agent: AgentRole::Guide,
    },
    Builtin {
        name: "get_tool_statistics",
        description: "Tool counts by type and category with cache statistics",
        agent: AgentRole::Guide,
    },
    Builtin {
        name: "search_tools",
        description: "Search tools by name or description",
        agent: AgentRole::Guide,
    },
    Builtin {
        name: "refresh_tool_discovery",
        description: "Re-run node discovery and regenerate tools",
        agent: AgentRole::Orchestrator,
    },
];

const FALLBACK_TOOLS: &[Builtin] = &[
    Builtin {
        name: "list_nodes",
        description: "List available node types",
        agent: AgentRole::NodeExpert,
    },
    Builtin {
        name: "get_node_info",
        description: "Describe one node type and its parameters",
        agent: AgentRole::NodeExpert,
    },
    Builtin {
        name: "list_workflows",
        description: "List workflows defined on the automation engine",
        agent: AgentRole::Orchestrator,
    },
    Builtin {
        name: "execute_workflow",
        description: "Execute a workflow by id",
        agent: AgentRole::Orchestrator,
    },
];

pub fn builtin_id(name: &str) -> String {
    format!("builtin:{}", name)
}

fn build(builtin: &Builtin, priority: u8) -> GeneratedTool {
    GeneratedTool::new(
        builtin_id(builtin.name),
        builtin.name,
        builtin.description,
        SchemaRef::Builtin {
            tool: builtin.name.to_string(),
        },
        ToolType::Builtin,
        SYSTEM_CATEGORY,
        builtin.agent,
        BASE_FOOTPRINT,
        priority,
    )
}

/// Tools present in every generation
pub fn system_tools() -> Vec<GeneratedTool> {
    SYSTEM_TOOLS
        .iter()
        .map(|b| build(b, PRIORITY_SYSTEM))
        .collect()
}

/// Minimal core set used when discovery fails
pub fn fallback_tools() -> Vec<GeneratedTool> {
    FALLBACK_TOOLS
        .iter()
        .map(|b| build(b, PRIORITY_FALLBACK))
        .collect()
}

/// Input shape of a built-in tool
pub fn input_schema(tool: &str) -> Value {
    match tool {
        "search_tools" => json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "number", "default": 20}
            },
            "required": ["query"]
        }),
        "refresh_tool_discovery" => json!({
            "type": "object",
            "properties": {"force": {"type": "boolean", "default": false}}
        }),
        "list_nodes" => json!({
            "type": "object",
            "properties": {"category": {"type": "string"}}
        }),
        "get_node_info" => json!({
            "type": "object",
            "properties": {"nodeType": {"type": "string"}},
            "required": ["nodeType"]
        }),
        "list_workflows" => json!({
            "type": "object",
            "properties": {"active": {"type": "boolean"}}
        }),
        "execute_workflow" => json!({
            "type": "object",
            "properties": {
                "workflowId": {"type": "string"},
                "data": {"type": "object"}
            },
            "required": ["workflowId"]
        }),
        _ => json!({"type": "object", "properties": {}}),
    }
}

/// Output shape of a built-in tool
pub fn output_schema(tool: &str) -> Value {
    match tool {
        "search_tools" | "list_nodes" | "list_workflows" => json!({
            "type": "object",
            "properties": {
                "items": {"type": "array", "items": {"type": "object"}},
                "count": {"type": "number"}
            }
        }),
        _ => json!({"type": "object"}),
    }
}
