//! Values stored in the shared discovery cache

use nf_core::{
    CredentialTypeDescriptor, GeneratedSchema, NodeCatalog, ToolSelection, WorkflowDescriptor,
};
use std::sync::Arc;

/// Key under which whole descriptor lists are cached
pub const ALL_KEY: &str = "all";

/// One record of the discovery cache. Cloning only bumps reference counts.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Nodes(Arc<NodeCatalog>),
    Workflows(Arc<Vec<WorkflowDescriptor>>),
    CredentialTypes(Arc<Vec<CredentialTypeDescriptor>>),
    Schema(Arc<GeneratedSchema>),
    Selection(Arc<ToolSelection>),
}

impl CachedValue {
    pub fn kind(&self) -> &'static str {
        match self {
            CachedValue::Nodes(_) => "nodes",
            CachedValue::Workflows(_) => "workflows",
            CachedValue::CredentialTypes(_) => "credential_types",
            CachedValue::Schema(_) => "schema",
            CachedValue::Selection(_) => "selection",
        }
    }

    pub fn into_nodes(self) -> Option<Arc<NodeCatalog>> {
        match self {
            CachedValue::Nodes(nodes) => Some(nodes),
            _ => None,
        }
    }

    pub fn into_workflows(self) -> Option<Arc<Vec<WorkflowDescriptor>>> {
        match self {
            CachedValue::Workflows(workflows) => Some(workflows),
            _ => None,
        }
    }

    pub fn into_credential_types(self) -> Option<Arc<Vec<CredentialTypeDescriptor>>> {
        match self {
            CachedValue::CredentialTypes(types) => Some(types),
            _ => None,
        }
    }

    pub fn into_schema(self) -> Option<Arc<GeneratedSchema>> {
        match self {
            CachedValue::Schema(schema) => Some(schema),
            _ => None,
        }
    }

    pub fn into_selection(self) -> Option<Arc<ToolSelection>> {
        match self {
            CachedValue::Selection(selection) => Some(selection),
            _ => None,
        }
    }
}
