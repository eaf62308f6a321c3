//! Common types used across nodeforge
//!
//! Descriptors fetched from the automation engine, the schemas and tools
//! derived from them, and the request/result values of tool selection.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::error::{Error, Result};
use crate::hashing::stable_hash_of;

/// Category used when a node declares neither codex categories nor groups
pub const DEFAULT_CATEGORY: &str = "Miscellaneous";

/// Category of the built-in tools
pub const SYSTEM_CATEGORY: &str = "system";

// ============================================================================
// DESCRIPTORS (owned by the capability source)
// ============================================================================

/// Node type version: engines report either one number or every supported one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeVersion {
    Single(f64),
    Multiple(Vec<f64>),
}

impl Default for NodeVersion {
    fn default() -> Self {
        NodeVersion::Single(1.0)
    }
}

impl NodeVersion {
    /// Highest declared version
    pub fn latest(&self) -> f64 {
        match self {
            NodeVersion::Single(v) => *v,
            NodeVersion::Multiple(vs) => vs.iter().copied().reduce(f64::max).unwrap_or(1.0),
        }
    }
}

/// Codex metadata (categorisation used by the engine's node panel)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCodex {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub alias: Vec<String>,
}

/// Credential requirement declared by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRef {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

/// External capability description of one node type.
///
/// `properties` is kept as raw JSON: its shape is only trusted after the
/// schema generator has parsed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub group: Vec<String>,
    #[serde(default)]
    pub codex: Option<NodeCodex>,
    #[serde(default)]
    pub version: NodeVersion,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub credentials: Vec<CredentialRef>,
}

impl NodeDescriptor {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: String::new(),
            group: Vec::new(),
            codex: None,
            version: NodeVersion::default(),
            properties: Value::Array(Vec::new()),
            credentials: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group.push(group.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.codex
            .get_or_insert_with(NodeCodex::default)
            .categories
            .push(category.into());
        self
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_credential(mut self, name: impl Into<String>, required: bool) -> Self {
        self.credentials.push(CredentialRef {
            name: name.into(),
            required,
        });
        self
    }

    /// First codex category, else first group, else [`DEFAULT_CATEGORY`]
    pub fn primary_category(&self) -> &str {
        self.codex
            .as_ref()
            .and_then(|c| c.categories.first())
            .or_else(|| self.group.first())
            .map(String::as_str)
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
    }

    /// Number of top-level property definitions
    pub fn property_count(&self) -> usize {
        match &self.properties {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            _ => 0,
        }
    }

    /// Display name, or the technical name when none was reported
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// Catalogue entry that could not be decoded into a [`NodeDescriptor`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedDescriptor {
    /// `name` of the entry, when it had a readable one
    pub name: Option<String>,
    pub reason: String,
}

/// Node types as delivered by a capability source.
///
/// Entries are decoded one by one, so a single malformed descriptor is
/// rejected on its own instead of failing the whole catalogue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeCatalog {
    pub nodes: Vec<NodeDescriptor>,
    pub rejected: Vec<RejectedDescriptor>,
}

impl NodeCatalog {
    pub fn new(nodes: Vec<NodeDescriptor>) -> Self {
        Self {
            nodes,
            rejected: Vec::new(),
        }
    }

    /// Decode a raw catalogue body, which must be a JSON array
    pub fn from_json(body: Value) -> Result<Self> {
        let Value::Array(entries) = body else {
            return Err(Error::source_unavailable(
                "node catalogue is not a JSON array",
            ));
        };

        let mut catalog = NodeCatalog::default();
        for entry in entries {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string);
            match serde_json::from_value::<NodeDescriptor>(entry) {
                Ok(node) => catalog.nodes.push(node),
                Err(e) => {
                    warn!(
                        "Skipping node descriptor {}: {}",
                        name.as_deref().unwrap_or("<unnamed>"),
                        e
                    );
                    catalog.rejected.push(RejectedDescriptor {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(catalog)
    }

    pub fn find(&self, name: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Workflow tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTag {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

/// Workflow summary as listed by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub tags: Vec<WorkflowTag>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Credential type definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialTypeDescriptor {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub documentation_url: Option<String>,
}

// ============================================================================
// GENERATED SCHEMA
// ============================================================================

/// Typed parameter schema derived from one node descriptor.
///
/// Never authoritative: it can be regenerated from the descriptor at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSchema {
    pub node_name: String,
    pub required: Vec<String>,
    pub optional: Vec<String>,
    /// JSON Schema object for the node's parameters
    pub shape: Value,
    pub documentation: String,
    /// Stable hash of the source descriptor
    pub fingerprint: String,
}

impl GeneratedSchema {
    /// Check caller parameters against the shape.
    ///
    /// Returns every violation found rather than stopping at the first.
    pub fn validate(&self, params: &Value) -> std::result::Result<(), Vec<String>> {
        let Some(object) = params.as_object() else {
            return Err(vec!["parameters must be a JSON object".to_string()]);
        };

        let mut violations = Vec::new();

        for field in &self.required {
            if object.get(field).map_or(true, Value::is_null) {
                violations.push(format!("missing required parameter '{}'", field));
            }
        }

        if let Some(properties) = self.shape.get("properties").and_then(Value::as_object) {
            for (key, value) in object {
                let Some(schema) = properties.get(key) else {
                    continue;
                };
                if value.is_null() {
                    continue;
                }
                if !json_type_matches(schema, value) {
                    violations.push(format!(
                        "parameter '{}' expected type {}",
                        key,
                        schema.get("type").and_then(Value::as_str).unwrap_or("any")
                    ));
                    continue;
                }
                if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
                    if !allowed.contains(value) {
                        violations.push(format!("parameter '{}' is not an allowed value", key));
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

fn json_type_matches(schema: &Value, value: &Value) -> bool {
    match schema.get("type").and_then(Value::as_str) {
        Some("string") => value.is_string(),
        Some("number") => value.is_number(),
        Some("integer") => value.is_i64() || value.is_u64(),
        Some("boolean") => value.is_boolean(),
        Some("object") => value.is_object(),
        Some("array") => value.is_array(),
        _ => true,
    }
}

// ============================================================================
// GENERATED TOOLS
// ============================================================================

/// Kind of generated tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    General,
    OperationSpecific,
    Category,
    /// System and fallback tools that exist without discovery
    Builtin,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::General => "general",
            ToolType::OperationSpecific => "operation_specific",
            ToolType::Category => "category",
            ToolType::Builtin => "builtin",
        }
    }
}

impl std::fmt::Display for ToolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation verbs a node may expose as a dedicated tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
    List,
    Get,
    Send,
    Search,
    Upload,
    Download,
    Execute,
    Trigger,
    Webhook,
    Poll,
}

impl Verb {
    /// The allow-list, in canonical order
    pub const ALL: [Verb; 14] = [
        Verb::Create,
        Verb::Read,
        Verb::Update,
        Verb::Delete,
        Verb::List,
        Verb::Get,
        Verb::Send,
        Verb::Search,
        Verb::Upload,
        Verb::Download,
        Verb::Execute,
        Verb::Trigger,
        Verb::Webhook,
        Verb::Poll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Read => "read",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::List => "list",
            Verb::Get => "get",
            Verb::Send => "send",
            Verb::Search => "search",
            Verb::Upload => "upload",
            Verb::Download => "download",
            Verb::Execute => "execute",
            Verb::Trigger => "trigger",
            Verb::Webhook => "webhook",
            Verb::Poll => "poll",
        }
    }

    /// Case-insensitive lookup; `None` for verbs outside the allow-list
    pub fn parse(value: &str) -> Option<Verb> {
        let value = value.trim().to_lowercase();
        Verb::ALL.into_iter().find(|v| v.as_str() == value)
    }

    /// Verbs that change remote state
    pub fn is_mutating(&self) -> bool {
        matches!(self, Verb::Create | Verb::Update | Verb::Delete)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downstream agent persona a tool is best handled by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    #[serde(rename = "n8n-node-expert")]
    NodeExpert,
    #[serde(rename = "n8n-scriptguard")]
    ScriptGuard,
    #[serde(rename = "n8n-connector")]
    Connector,
    #[serde(rename = "n8n-builder")]
    Builder,
    #[serde(rename = "n8n-orchestrator")]
    Orchestrator,
    #[serde(rename = "n8n-guide")]
    Guide,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::NodeExpert => "n8n-node-expert",
            AgentRole::ScriptGuard => "n8n-scriptguard",
            AgentRole::Connector => "n8n-connector",
            AgentRole::Builder => "n8n-builder",
            AgentRole::Orchestrator => "n8n-orchestrator",
            AgentRole::Guide => "n8n-guide",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from which a tool's input and output schemas are materialized
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaRef {
    /// Free-form parameters of a node, shaped by its generated schema when known
    NodeParameters { node: String },
    /// Canonical verb shape with the node's parameters nested inside
    Operation { node: String, verb: Verb },
    /// Aggregate query over the nodes of one category
    CategoryQuery { category: String },
    /// Fixed shape of a built-in tool
    Builtin { tool: String },
}

/// Lightweight tool metadata: the unit kept resident for every tool.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTool {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schema: SchemaRef,
    pub source_node: Option<String>,
    pub tool_type: ToolType,
    pub operation_name: Option<Verb>,
    pub category: String,
    pub agent_recommendation: AgentRole,
    /// Estimated bytes once materialized; accounting only
    pub memory_footprint: usize,
    /// Declared priority (0-100), used for scoring and tie-breaking
    pub priority: u8,
    #[serde(skip)]
    last_used_ms: AtomicI64,
}

impl Clone for GeneratedTool {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            schema: self.schema.clone(),
            source_node: self.source_node.clone(),
            tool_type: self.tool_type,
            operation_name: self.operation_name,
            category: self.category.clone(),
            agent_recommendation: self.agent_recommendation,
            memory_footprint: self.memory_footprint,
            priority: self.priority,
            last_used_ms: AtomicI64::new(self.last_used_ms.load(Ordering::Relaxed)),
        }
    }
}

impl GeneratedTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: SchemaRef,
        tool_type: ToolType,
        category: impl Into<String>,
        agent_recommendation: AgentRole,
        memory_footprint: usize,
        priority: u8,
    ) -> Self {
        let source_node = match &schema {
            SchemaRef::NodeParameters { node } | SchemaRef::Operation { node, .. } => {
                Some(node.clone())
            }
            SchemaRef::CategoryQuery { .. } | SchemaRef::Builtin { .. } => None,
        };
        let operation_name = match &schema {
            SchemaRef::Operation { verb, .. } => Some(*verb),
            _ => None,
        };

        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            schema,
            source_node,
            tool_type,
            operation_name,
            category: category.into(),
            agent_recommendation,
            memory_footprint,
            priority,
            last_used_ms: AtomicI64::new(0),
        }
    }

    /// When the tool was last reported as used
    pub fn last_used(&self) -> Option<DateTime<Utc>> {
        match self.last_used_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    /// Record a use now
    pub fn touch(&self) {
        self.last_used_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn is_system(&self) -> bool {
        self.category == SYSTEM_CATEGORY
    }
}

// ============================================================================
// SELECTION
// ============================================================================

fn default_max_tools() -> usize {
    10
}

fn default_priority_threshold() -> f64 {
    0.1
}

/// Request-scoped selection context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContext {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub user_intent: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_max_tools")]
    pub max_tools: usize,
    #[serde(default = "default_priority_threshold")]
    pub priority_threshold: f64,
    #[serde(default)]
    pub previous_tools: Vec<String>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            query: String::new(),
            user_intent: None,
            category: None,
            max_tools: default_max_tools(),
            priority_threshold: default_priority_threshold(),
            previous_tools: Vec::new(),
        }
    }
}

impl ToolContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.user_intent = Some(intent.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_max_tools(mut self, max_tools: usize) -> Self {
        self.max_tools = max_tools;
        self
    }

    pub fn with_priority_threshold(mut self, threshold: f64) -> Self {
        self.priority_threshold = threshold;
        self
    }

    pub fn with_previous_tools(mut self, tools: Vec<String>) -> Self {
        self.previous_tools = tools;
        self
    }

    /// Memoization key, independent of field and `previous_tools` order
    pub fn cache_key(&self) -> Result<String> {
        stable_hash_of(self)
    }
}

/// Result of scoring tools against a [`ToolContext`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSelection {
    pub selected_tools: Vec<Arc<GeneratedTool>>,
    /// Score of every selected tool, by name
    pub scores: BTreeMap<String, f64>,
    pub total_score: f64,
    /// `total_score / selected count`, or 0 when nothing was selected
    pub token_efficiency: f64,
    pub reasoning: Vec<String>,
}

impl ToolSelection {
    /// A selection with no tools and an explanation why
    pub fn empty(reason: impl Into<String>) -> Self {
        Self {
            reasoning: vec![reason.into()],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selected_tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.selected_tools.iter().map(|t| t.name.as_str()).collect()
    }
}
