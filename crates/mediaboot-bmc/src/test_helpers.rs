//! Test doubles for the management traits and a fake Redfish service

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use url::Url;

use crate::client::{ManagementClient, ManagementConnector};
use crate::error::{BmcError, Result};
use crate::orchestrator::Delay;
use crate::types::{
    BootTarget, Credentials, InsertMedia, ManagedSystem, MediaKind, ResetType,
    VirtualMediaResource,
};

pub(crate) const IMAGE_URL: &str = "http://10.0.0.5:8080/images/test-config.iso";

pub(crate) fn boot_target() -> BootTarget {
    BootTarget::from_address(
        "https://bmc.local/redfish/v1/Systems/1",
        Credentials::new("admin", "password"),
        Url::parse(IMAGE_URL).unwrap(),
    )
    .unwrap()
}

pub(crate) fn media(id: &str, kinds: &[MediaKind], inserted: bool) -> VirtualMediaResource {
    VirtualMediaResource {
        id: id.to_string(),
        resource_path: format!("/redfish/v1/Managers/1/VirtualMedia/{}", id),
        supported_media_kinds: kinds.iter().cloned().collect::<BTreeSet<_>>(),
        inserted,
        current_image_url: inserted.then(|| "http://old/image.iso".to_string()),
        action_targets: HashMap::new(),
    }
}

/// One observed call on a [`RecordingBmc`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Connect,
    GetSystem(Option<String>),
    ListMedia(String),
    Eject(String),
    Insert(String, String),
    Reset(String, ResetType),
    Wait(Duration),
}

/// In-memory BMC that records every call in order
#[derive(Clone)]
pub(crate) struct RecordingBmc {
    managers: Arc<Vec<(String, Vec<VirtualMediaResource>)>>,
    calls: Arc<Mutex<Vec<Call>>>,
    fail_on: Option<&'static str>,
}

impl RecordingBmc {
    pub(crate) fn new(managers: Vec<(&str, Vec<VirtualMediaResource>)>) -> Self {
        Self {
            managers: Arc::new(
                managers
                    .into_iter()
                    .map(|(path, media)| (path.to_string(), media))
                    .collect(),
            ),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_on: None,
        }
    }

    /// Make one operation (`connect`, `get_system`, `list`, `eject`, `insert`, `reset`) fail
    pub(crate) fn failing(mut self, op: &'static str) -> Self {
        self.fail_on = Some(op);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &str, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail_on == Some(op) {
            return Err(BmcError::CommandFailed(format!("injected {} failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl ManagementConnector for RecordingBmc {
    async fn connect(&self, _target: &BootTarget) -> Result<Box<dyn ManagementClient>> {
        self.record("connect", Call::Connect)?;
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl ManagementClient for RecordingBmc {
    async fn get_system(&self, path: Option<&str>) -> Result<ManagedSystem> {
        self.record("get_system", Call::GetSystem(path.map(str::to_string)))?;
        Ok(ManagedSystem {
            endpoint: Url::parse("https://bmc.local/").unwrap(),
            id: "1".to_string(),
            resource_path: path.unwrap_or("/redfish/v1/Systems/1").to_string(),
            manager_refs: self.managers.iter().map(|(path, _)| path.clone()).collect(),
            action_targets: HashMap::new(),
        })
    }

    async fn list_virtual_media(&self, manager: &str) -> Result<Vec<VirtualMediaResource>> {
        self.record("list", Call::ListMedia(manager.to_string()))?;
        self.managers
            .iter()
            .find(|(path, _)| path == manager)
            .map(|(_, media)| media.clone())
            .ok_or_else(|| BmcError::NotFound(manager.to_string()))
    }

    async fn eject_media(&self, media: &VirtualMediaResource) -> Result<()> {
        self.record("eject", Call::Eject(media.id.clone()))
    }

    async fn insert_media(
        &self,
        media: &VirtualMediaResource,
        request: &InsertMedia,
    ) -> Result<()> {
        self.record(
            "insert",
            Call::Insert(media.id.clone(), request.image_url.clone()),
        )
    }

    async fn reset_system(&self, system: &ManagedSystem, reset: ResetType) -> Result<()> {
        self.record("reset", Call::Reset(system.id.clone(), reset))
    }
}

/// Delay that returns immediately and logs itself into a [`RecordingBmc`]
pub(crate) struct RecordingDelay {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingDelay {
    pub(crate) fn new(bmc: &RecordingBmc) -> Self {
        Self {
            calls: bmc.calls.clone(),
        }
    }
}

#[async_trait]
impl Delay for RecordingDelay {
    async fn wait(&self, duration: Duration) {
        self.calls.lock().unwrap().push(Call::Wait(duration));
    }
}

/// Minimal Redfish service answering from a table of JSON documents
///
/// GETs are served from `documents`; POSTs to any path are recorded and
/// answered with 204. Every request must carry `admin:password` basic auth.
pub(crate) struct FakeBmc {
    documents: HashMap<String, Value>,
    posts: Mutex<Vec<(String, Value)>>,
    rejected_actions: Vec<String>,
}

impl FakeBmc {
    /// One system, one manager, a Floppy slot followed by an empty CD slot
    pub(crate) fn standard() -> Self {
        let mut documents = HashMap::new();
        documents.insert(
            "/redfish/v1".to_string(),
            json!({
                "@odata.id": "/redfish/v1",
                "Systems": { "@odata.id": "/redfish/v1/Systems" },
                "Managers": { "@odata.id": "/redfish/v1/Managers" }
            }),
        );
        documents.insert(
            "/redfish/v1/Systems".to_string(),
            json!({ "Members": [ { "@odata.id": "/redfish/v1/Systems/1" } ] }),
        );
        documents.insert(
            "/redfish/v1/Systems/1".to_string(),
            json!({
                "@odata.id": "/redfish/v1/Systems/1",
                "Id": "1",
                "Links": { "ManagedBy": [ { "@odata.id": "/redfish/v1/Managers/bmc" } ] },
                "Actions": {
                    "#ComputerSystem.Reset": {
                        "target": "/redfish/v1/Systems/1/Actions/ComputerSystem.Reset",
                        "ResetType@Redfish.AllowableValues": ["On", "ForceOff"]
                    }
                }
            }),
        );
        documents.insert(
            "/redfish/v1/Managers/bmc".to_string(),
            json!({
                "@odata.id": "/redfish/v1/Managers/bmc",
                "Id": "bmc",
                "VirtualMedia": { "@odata.id": "/redfish/v1/Managers/bmc/VirtualMedia" }
            }),
        );
        documents.insert(
            "/redfish/v1/Managers/bmc/VirtualMedia".to_string(),
            json!({
                "Members": [
                    { "@odata.id": "/redfish/v1/Managers/bmc/VirtualMedia/Floppy1" },
                    { "@odata.id": "/redfish/v1/Managers/bmc/VirtualMedia/Cd1" }
                ]
            }),
        );
        documents.insert(
            "/redfish/v1/Managers/bmc/VirtualMedia/Floppy1".to_string(),
            json!({
                "@odata.id": "/redfish/v1/Managers/bmc/VirtualMedia/Floppy1",
                "Id": "Floppy1",
                "MediaTypes": ["Floppy", "USBStick"],
                "Inserted": false
            }),
        );
        // No Actions object: the client must fall back to the conventional path
        documents.insert(
            "/redfish/v1/Managers/bmc/VirtualMedia/Cd1".to_string(),
            json!({
                "@odata.id": "/redfish/v1/Managers/bmc/VirtualMedia/Cd1",
                "Id": "Cd1",
                "MediaTypes": ["CD", "DVD"],
                "Inserted": false,
                "Image": null
            }),
        );

        Self {
            documents,
            posts: Mutex::new(Vec::new()),
            rejected_actions: Vec::new(),
        }
    }

    pub(crate) fn with_document(mut self, path: &str, document: Value) -> Self {
        self.documents.insert(path.to_string(), document);
        self
    }

    /// Answer POSTs to paths ending in `action` with 400
    pub(crate) fn rejecting(mut self, action: &str) -> Self {
        self.rejected_actions.push(action.to_string());
        self
    }

    pub(crate) fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().unwrap().clone()
    }

    /// Serve on an ephemeral port, returning the base URL
    pub(crate) async fn spawn(self: Arc<Self>) -> Url {
        let app = Router::new().fallback(handle).with_state(self);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{}/", addr)).unwrap()
    }
}

async fn handle(
    State(bmc): State<Arc<FakeBmc>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // base64("admin:password")
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Basic YWRtaW46cGFzc3dvcmQ=");
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let path = uri.path().trim_end_matches('/');
    if method == Method::GET {
        return match bmc.documents.get(path) {
            Some(doc) => Json(doc.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }
    if method == Method::POST {
        let payload = serde_json::from_slice(&body).unwrap_or(Value::Null);
        bmc.posts.lock().unwrap().push((path.to_string(), payload));
        if bmc.rejected_actions.iter().any(|a| path.ends_with(a.as_str())) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "message": "action rejected" } })),
            )
                .into_response();
        }
        return StatusCode::NO_CONTENT.into_response();
    }
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}
