//! Virtual media boot orchestration
//!
//! One run walks a linear sequence of stages:
//!
//! ```text
//! Connect -> SystemResolved -> MediaDiscovered -> MediaSelected
//!   -> [MediaEjected] -> MediaReady -> MediaInserted -> BootIssued -> Done
//! ```
//!
//! Discovery walks the system's managers in order and, within each manager,
//! its virtual media in order. The first slot that can emulate a CD wins and
//! enumeration stops there. Any failure before `BootIssued` aborts the run;
//! nothing is retried.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::client::{ManagementClient, ManagementConnector};
use crate::error::OrchestrationError;
use crate::types::{
    BootTarget, InsertMedia, ManagedSystem, MediaKind, ResetType, VirtualMediaResource,
};

/// Stages of a boot run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    Connect,
    SystemResolved,
    MediaDiscovered,
    MediaSelected,
    MediaEjected,
    MediaReady,
    MediaInserted,
    BootIssued,
    Done,
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootStage::Connect => "connect",
            BootStage::SystemResolved => "system-resolved",
            BootStage::MediaDiscovered => "media-discovered",
            BootStage::MediaSelected => "media-selected",
            BootStage::MediaEjected => "media-ejected",
            BootStage::MediaReady => "media-ready",
            BootStage::MediaInserted => "media-inserted",
            BootStage::BootIssued => "boot-issued",
            BootStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Waits out the dwell period
#[async_trait]
pub trait Delay: Send + Sync {
    async fn wait(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// What happened to the media after the boot was issued
#[derive(Debug)]
pub enum CleanupOutcome {
    /// Dwell disabled; the media stays inserted
    Skipped,
    /// Media ejected after the dwell
    Ejected,
    /// The final eject failed; the boot itself still succeeded
    Failed(OrchestrationError),
}

/// Summary of a successful run
#[derive(Debug)]
pub struct BootReport {
    pub system: String,
    pub media: String,
    pub image_url: String,
    /// Whether previously inserted media had to be ejected first
    pub ejected_first: bool,
    pub cleanup: CleanupOutcome,
}

/// Drives one virtual media boot
pub struct Orchestrator<C, D = TokioDelay> {
    connector: C,
    delay: D,
    dwell: Option<Duration>,
}

impl<C: ManagementConnector> Orchestrator<C, TokioDelay> {
    /// `dwell` of `None` or zero leaves the media inserted after the reset
    pub fn new(connector: C, dwell: Option<Duration>) -> Self {
        Self {
            connector,
            delay: TokioDelay,
            dwell: dwell.filter(|d| !d.is_zero()),
        }
    }
}

impl<C: ManagementConnector, D: Delay> Orchestrator<C, D> {
    /// Replace the dwell timer
    pub fn with_delay<D2: Delay>(self, delay: D2) -> Orchestrator<C, D2> {
        Orchestrator {
            connector: self.connector,
            delay,
            dwell: self.dwell,
        }
    }

    /// Dwell before the final eject, `None` when disabled
    pub fn dwell(&self) -> Option<Duration> {
        self.dwell
    }

    /// Run the boot sequence once against `target`
    pub async fn orchestrate(
        &self,
        target: &BootTarget,
    ) -> Result<BootReport, OrchestrationError> {
        let endpoint = target.endpoint.to_string();
        let image_url = target.image_url.to_string();

        let client = self.connector.connect(target).await.map_err(|source| {
            OrchestrationError::ConnectFailed {
                endpoint: endpoint.clone(),
                source,
            }
        })?;
        transition(BootStage::Connect);
        info!(endpoint = %endpoint, "Connected to management endpoint");

        let system = client
            .get_system(target.system_path.as_deref())
            .await
            .map_err(|source| OrchestrationError::SystemNotFound {
                system: target.system_label().to_string(),
                source,
            })?;
        transition(BootStage::SystemResolved);
        info!(
            system = %system.id,
            managers = system.manager_refs.len(),
            "Resolved managed system"
        );

        let media = discover(client.as_ref(), &system).await?;
        transition(BootStage::MediaDiscovered);
        info!(
            media = %media.id,
            inserted = media.inserted,
            current_image = media.current_image_url.as_deref().unwrap_or("-"),
            "Found CD virtual media"
        );

        transition(BootStage::MediaSelected);
        let ejected_first = media.inserted;
        if ejected_first {
            client.eject_media(&media).await.map_err(|source| {
                OrchestrationError::EjectFailed {
                    media: media.id.clone(),
                    source,
                }
            })?;
            transition(BootStage::MediaEjected);
            info!(media = %media.id, "Ejected previously inserted media");
        }

        transition(BootStage::MediaReady);
        client
            .insert_media(&media, &InsertMedia::new(image_url.clone()))
            .await
            .map_err(|source| OrchestrationError::InsertFailed {
                media: media.id.clone(),
                image_url: image_url.clone(),
                source,
            })?;
        transition(BootStage::MediaInserted);
        info!(media = %media.id, image = %image_url, "Inserted image");

        client
            .reset_system(&system, ResetType::On)
            .await
            .map_err(|source| OrchestrationError::ResetFailed {
                system: system.id.clone(),
                source,
            })?;
        transition(BootStage::BootIssued);
        info!(system = %system.id, reset = %ResetType::On, "Reset issued");

        let cleanup = match self.dwell {
            None => CleanupOutcome::Skipped,
            Some(dwell) => {
                info!(
                    media = %media.id,
                    dwell_secs = dwell.as_secs(),
                    "Holding media before final eject"
                );
                self.delay.wait(dwell).await;
                match client.eject_media(&media).await {
                    Ok(()) => {
                        info!(media = %media.id, "Ejected media after dwell");
                        CleanupOutcome::Ejected
                    }
                    Err(source) => {
                        let err = OrchestrationError::PostDwellEjectFailed {
                            media: media.id.clone(),
                            source,
                        };
                        warn!(error = %err, "Media left inserted");
                        CleanupOutcome::Failed(err)
                    }
                }
            }
        };

        transition(BootStage::Done);
        Ok(BootReport {
            system: system.id,
            media: media.id,
            image_url,
            ejected_first,
            cleanup,
        })
    }
}

fn transition(stage: BootStage) {
    debug!(stage = %stage, "Boot stage reached");
}

/// First CD-capable media, managers then media in listed order
async fn discover(
    client: &dyn ManagementClient,
    system: &ManagedSystem,
) -> Result<VirtualMediaResource, OrchestrationError> {
    let mut examined = 0;
    for manager in &system.manager_refs {
        let media = client.list_virtual_media(manager).await.map_err(|source| {
            OrchestrationError::DiscoveryFailed {
                manager: manager.clone(),
                source,
            }
        })?;
        debug!(manager = %manager, count = media.len(), "Enumerated virtual media");
        examined += media.len();

        if let Some(found) = media.into_iter().find(|m| m.supports(&MediaKind::Cd)) {
            return Ok(found);
        }
    }

    Err(OrchestrationError::NoCompatibleMedia {
        system: system.id.clone(),
        managers: system.manager_refs.len(),
        examined,
    })
}
