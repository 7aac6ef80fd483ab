//! Management client traits
//!
//! The orchestrator only talks to these traits; [`crate::redfish`] provides
//! the production implementation.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BootTarget, InsertMedia, ManagedSystem, ResetType, VirtualMediaResource};

/// Opens authenticated sessions against a management endpoint
#[async_trait]
pub trait ManagementConnector: Send + Sync {
    async fn connect(&self, target: &BootTarget) -> Result<Box<dyn ManagementClient>>;
}

/// Capabilities the boot sequence needs from an authenticated session
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Resolve the managed system at `path`, or the first system when `None`
    async fn get_system(&self, path: Option<&str>) -> Result<ManagedSystem>;

    /// Virtual media of one manager, in the order the manager lists them
    async fn list_virtual_media(&self, manager: &str) -> Result<Vec<VirtualMediaResource>>;

    async fn eject_media(&self, media: &VirtualMediaResource) -> Result<()>;

    async fn insert_media(&self, media: &VirtualMediaResource, request: &InsertMedia)
        -> Result<()>;

    async fn reset_system(&self, system: &ManagedSystem, reset: ResetType) -> Result<()>;
}
