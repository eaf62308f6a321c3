//! In-memory capability source
//!
//! Serves a fixed descriptor set. Used when embedding the engine with
//! pre-fetched metadata and throughout the tests.

use async_trait::async_trait;
use nf_core::{
    CredentialTypeDescriptor, Error, NodeCatalog, NodeDescriptor, Result, WorkflowDescriptor,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::CapabilitySource;

pub struct StaticCapabilitySource {
    nodes: RwLock<NodeCatalog>,
    workflows: RwLock<Vec<WorkflowDescriptor>>,
    credential_types: RwLock<Vec<CredentialTypeDescriptor>>,
    available: AtomicBool,
    node_fetches: AtomicUsize,
}

impl StaticCapabilitySource {
    pub fn new(nodes: Vec<NodeDescriptor>) -> Self {
        Self::from_catalog(NodeCatalog::new(nodes))
    }

    /// A source serving a raw node catalogue body, decoded the way the
    /// engine's `/types/nodes.json` is
    pub fn from_json(body: Value) -> Result<Self> {
        Ok(Self::from_catalog(NodeCatalog::from_json(body)?))
    }

    fn from_catalog(catalog: NodeCatalog) -> Self {
        Self {
            nodes: RwLock::new(catalog),
            workflows: RwLock::new(Vec::new()),
            credential_types: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            node_fetches: AtomicUsize::new(0),
        }
    }

    /// A source whose every call fails
    pub fn unavailable() -> Self {
        let source = Self::new(Vec::new());
        source.available.store(false, Ordering::SeqCst);
        source
    }

    pub fn with_workflows(mut self, workflows: Vec<WorkflowDescriptor>) -> Self {
        self.workflows = RwLock::new(workflows);
        self
    }

    pub fn with_credential_types(mut self, credential_types: Vec<CredentialTypeDescriptor>) -> Self {
        self.credential_types = RwLock::new(credential_types);
        self
    }

    /// Replace the node set, as if the engine had installed or removed nodes
    pub async fn set_nodes(&self, nodes: Vec<NodeDescriptor>) {
        *self.nodes.write().await = NodeCatalog::new(nodes);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// How many times `get_nodes` has been called
    pub fn node_fetches(&self) -> usize {
        self.node_fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::source_unavailable("static source marked unavailable"))
        }
    }
}

#[async_trait]
impl CapabilitySource for StaticCapabilitySource {
    fn name(&self) -> &str {
        "static"
    }

    async fn get_nodes(&self) -> Result<NodeCatalog> {
        self.node_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.nodes.read().await.clone())
    }

    async fn get_workflows(&self) -> Result<Vec<WorkflowDescriptor>> {
        self.check_available()?;
        Ok(self.workflows.read().await.clone())
    }

    async fn get_credential_types(&self) -> Result<Vec<CredentialTypeDescriptor>> {
        self.check_available()?;
        Ok(self.credential_types.read().await.clone())
    }
}
