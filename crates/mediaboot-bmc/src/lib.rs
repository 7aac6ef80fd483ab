//! Mediaboot BMC Control
//!
//! This crate drives a server's baseboard management controller to boot it
//! from a network-served image mounted as virtual media.
//!
//! The [`Orchestrator`] talks to the BMC only through the
//! [`ManagementConnector`] and [`ManagementClient`] traits. [`RedfishConnector`]
//! is the production implementation, speaking Redfish over HTTPS with basic
//! credentials.
//!
//! # Example
//!
//! ```no_run
//! use mediaboot_bmc::{BootTarget, Credentials, Orchestrator, RedfishConfig, RedfishConnector};
//! use std::time::Duration;
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let target = BootTarget::from_address(
//!     "https://10.0.0.2/redfish/v1/Systems/System.Embedded.1",
//!     Credentials::new("root", "calvin"),
//!     Url::parse("http://10.0.0.5:8080/images/test-config.iso")?,
//! )?;
//!
//! let connector = RedfishConnector::new(RedfishConfig::new().with_insecure(true));
//! let orchestrator = Orchestrator::new(connector, Some(Duration::from_secs(300)));
//!
//! let report = orchestrator.orchestrate(&target).await?;
//! println!("booted {} from {}", report.system, report.media);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod orchestrator;
pub mod redfish;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use client::{ManagementClient, ManagementConnector};
pub use error::{BmcError, OrchestrationError, Result};
pub use orchestrator::{BootReport, BootStage, CleanupOutcome, Delay, Orchestrator, TokioDelay};
pub use redfish::{RedfishClient, RedfishConnector};
pub use types::{
    BootTarget, Credentials, InsertMedia, ManagedSystem, MediaKind, RedfishConfig, ResetType,
    VirtualMediaResource,
};
