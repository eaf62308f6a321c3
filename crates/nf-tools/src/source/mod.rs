//! Capability Sources
//!
//! A capability source supplies raw node, workflow and credential-type
//! descriptors. It may be slow or unavailable; implementations enforce their
//! own timeouts and retries and report failure as an error.

use async_trait::async_trait;
use nf_core::{CredentialTypeDescriptor, NodeCatalog, Result, WorkflowDescriptor};

pub mod http;
pub mod memory;

pub use http::HttpCapabilitySource;
pub use memory::StaticCapabilitySource;

/// Trait for descriptor sources
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    /// Source name, for logs and statistics
    fn name(&self) -> &str;

    /// Every node type the engine offers.
    ///
    /// Entries that cannot be decoded are reported in the catalogue rather
    /// than failing the call.
    async fn get_nodes(&self) -> Result<NodeCatalog>;

    /// Workflows defined on the engine
    async fn get_workflows(&self) -> Result<Vec<WorkflowDescriptor>>;

    /// Credential types the engine knows about
    async fn get_credential_types(&self) -> Result<Vec<CredentialTypeDescriptor>>;
}
