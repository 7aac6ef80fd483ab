//! Redfish protocol implementation
//!
//! Only the resources the boot sequence touches are modelled: the service
//! root, systems, managers, virtual media and three actions. Every request
//! carries basic credentials; there is no session token.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, trace};
use url::Url;

use crate::client::{ManagementClient, ManagementConnector};
use crate::error::{BmcError, Result};
use crate::types::{
    BootTarget, Credentials, InsertMedia, ManagedSystem, MediaKind, RedfishConfig, ResetType,
    VirtualMediaResource,
};

const SERVICE_ROOT: &str = "/redfish/v1/";
const DEFAULT_SYSTEMS: &str = "/redfish/v1/Systems";

const ACTION_EJECT: &str = "VirtualMedia.EjectMedia";
const ACTION_INSERT: &str = "VirtualMedia.InsertMedia";
const ACTION_RESET: &str = "ComputerSystem.Reset";

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@odata.id")]
    odata_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceRoot {
    systems: Option<Link>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Collection {
    #[serde(default)]
    members: Vec<Link>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SystemLinks {
    #[serde(default)]
    managed_by: Vec<Link>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ComputerSystem {
    #[serde(rename = "@odata.id")]
    odata_id: Option<String>,
    id: String,
    #[serde(default)]
    links: SystemLinks,
    #[serde(default)]
    actions: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Manager {
    virtual_media: Option<Link>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VirtualMedia {
    #[serde(rename = "@odata.id")]
    odata_id: Option<String>,
    id: String,
    #[serde(default)]
    media_types: Vec<String>,
    #[serde(default)]
    inserted: Option<bool>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    actions: Map<String, Value>,
}

/// `{"#VirtualMedia.EjectMedia": {"target": "..."}}` -> `{"VirtualMedia.EjectMedia": "..."}`
fn action_targets(actions: &Map<String, Value>) -> HashMap<String, String> {
    actions
        .iter()
        .filter_map(|(name, action)| {
            let name = name.strip_prefix('#')?;
            let target = action.get("target")?.as_str()?;
            Some((name.to_string(), target.to_string()))
        })
        .collect()
}

fn action_target(targets: &HashMap<String, String>, resource: &str, action: &str) -> String {
    targets
        .get(action)
        .cloned()
        .unwrap_or_else(|| format!("{}/Actions/{}", resource.trim_end_matches('/'), action))
}

/// Opens [`RedfishClient`] sessions
#[derive(Debug, Clone, Default)]
pub struct RedfishConnector {
    config: RedfishConfig,
}

impl RedfishConnector {
    /// Create a connector using `config` for every session
    pub fn new(config: RedfishConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ManagementConnector for RedfishConnector {
    async fn connect(&self, target: &BootTarget) -> Result<Box<dyn ManagementClient>> {
        let client = RedfishClient::connect(&self.config, target).await?;
        Ok(Box::new(client))
    }
}

/// Authenticated Redfish session
#[derive(Debug)]
pub struct RedfishClient {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Credentials,
    systems_path: String,
}

impl RedfishClient {
    /// Build the HTTP client and verify credentials against the service root
    pub async fn connect(config: &RedfishConfig, target: &BootTarget) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| BmcError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        let mut client = Self {
            http,
            endpoint: target.endpoint.clone(),
            credentials: target.credentials.clone(),
            systems_path: DEFAULT_SYSTEMS.to_string(),
        };

        let root: ServiceRoot = client.get(SERVICE_ROOT).await?;
        if let Some(systems) = root.systems {
            client.systems_path = systems.odata_id;
        }
        debug!(endpoint = %client.endpoint, "Redfish session established");
        Ok(client)
    }

    /// Base URL of the BMC
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| BmcError::InvalidResponse(format!("bad resource path {}: {}", path, e)))
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<String> {
        let url = self.url(path)?;
        let what = format!("{} {}", method, url.path());

        let mut request = self
            .http
            .request(method, url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password));
        if let Some(body) = &body {
            trace!(request = %what, body = %body, "Redfish request");
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BmcError::Timeout(what.clone())
            } else {
                BmcError::ConnectionFailed(format!("{}: {}", what, e))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BmcError::ConnectionFailed(format!("{}: {}", what, e)))?;
        trace!(request = %what, status = status.as_u16(), body = %text, "Redfish response");

        match status {
            s if s.is_success() => Ok(text),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                BmcError::AuthenticationFailed(format!("{} returned {}", what, status)),
            ),
            StatusCode::NOT_FOUND => Err(BmcError::NotFound(what)),
            _ => Err(BmcError::CommandFailed(format!(
                "{} returned {}: {}",
                what,
                status,
                text.trim()
            ))),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let text = self.send(reqwest::Method::GET, path, None).await?;
        serde_json::from_str(&text)
            .map_err(|e| BmcError::InvalidResponse(format!("GET {}: {}", path, e)))
    }

    async fn post_action(&self, target: &str, body: Value) -> Result<()> {
        self.send(reqwest::Method::POST, target, Some(body)).await?;
        Ok(())
    }
}

#[async_trait]
impl ManagementClient for RedfishClient {
    async fn get_system(&self, path: Option<&str>) -> Result<ManagedSystem> {
        let path = match path {
            Some(path) => path.to_string(),
            None => {
                let systems: Collection = self.get(&self.systems_path).await?;
                systems
                    .members
                    .into_iter()
                    .next()
                    .map(|m| m.odata_id)
                    .ok_or_else(|| {
                        BmcError::NotFound(format!("{} has no members", self.systems_path))
                    })?
            }
        };

        let system: ComputerSystem = self.get(&path).await?;
        Ok(ManagedSystem {
            endpoint: self.endpoint.clone(),
            id: system.id,
            resource_path: system.odata_id.unwrap_or(path),
            manager_refs: system
                .links
                .managed_by
                .into_iter()
                .map(|m| m.odata_id)
                .collect(),
            action_targets: action_targets(&system.actions),
        })
    }

    async fn list_virtual_media(&self, manager: &str) -> Result<Vec<VirtualMediaResource>> {
        let doc: Manager = self.get(manager).await?;
        let Some(collection) = doc.virtual_media else {
            return Ok(Vec::new());
        };

        let collection: Collection = self.get(&collection.odata_id).await?;
        let mut media = Vec::with_capacity(collection.members.len());
        for member in collection.members {
            let vm: VirtualMedia = self.get(&member.odata_id).await?;
            media.push(VirtualMediaResource {
                resource_path: vm.odata_id.unwrap_or(member.odata_id),
                id: vm.id,
                supported_media_kinds: vm
                    .media_types
                    .iter()
                    .map(|t| MediaKind::from_redfish(t))
                    .collect::<BTreeSet<_>>(),
                inserted: vm.inserted.unwrap_or(false),
                current_image_url: vm.image.filter(|i| !i.is_empty()),
                action_targets: action_targets(&vm.actions),
            });
        }
        Ok(media)
    }

    async fn eject_media(&self, media: &VirtualMediaResource) -> Result<()> {
        let target = action_target(&media.action_targets, &media.resource_path, ACTION_EJECT);
        self.post_action(&target, json!({})).await
    }

    async fn insert_media(
        &self,
        media: &VirtualMediaResource,
        request: &InsertMedia,
    ) -> Result<()> {
        let target = action_target(&media.action_targets, &media.resource_path, ACTION_INSERT);
        self.post_action(
            &target,
            json!({
                "Image": request.image_url,
                "Inserted": request.inserted,
                "WriteProtected": request.write_protected,
            }),
        )
        .await
    }

    async fn reset_system(&self, system: &ManagedSystem, reset: ResetType) -> Result<()> {
        let target = action_target(&system.action_targets, &system.resource_path, ACTION_RESET);
        self.post_action(&target, json!({ "ResetType": reset.as_str() }))
            .await
    }
}
