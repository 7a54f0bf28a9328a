//! Minimal vim25 JSON endpoint for exercising `VimClient` and
//! `VcenterSession` over real HTTP.
//!
//! Serves service content, Login, Logout and `RetrievePropertiesEx` for a
//! fixed object table and counts what it was asked.

use crate::vim::SESSION_HEADER;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const SESSION_TOKEN: &str = "52b5c3d4-fake-session";
const ROOT_FOLDER: &str = "group-d1";

fn moref(type_: &str, value: &str) -> Value {
    json!({ "_typeName": "ManagedObjectReference", "type": type_, "value": value })
}

/// `anyType` values are boxed on the wire.
fn boxed(value: &Value) -> Value {
    match value {
        Value::String(_) => json!({ "_typeName": "string", "_value": value }),
        Value::Array(_) => json!({ "_typeName": "ArrayOfAnyType", "_value": value }),
        Value::Number(_) => json!({ "_typeName": "long", "_value": value }),
        other => other.clone(),
    }
}

fn fault(type_name: &str, message: &str) -> Response {
    let body = json!({
        "_typeName": type_name,
        "faultMessage": [{ "_typeName": "LocalizableMessage", "key": "", "message": message }],
    });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// Object table and behaviour of a fake vCenter, before it is started.
pub(crate) struct FakeVcenter {
    objects: HashMap<String, Map<String, Value>>,
    datacenters: usize,
    cancel_on_login: Option<CancellationToken>,
}

/// A running fake vCenter.
pub(crate) struct FakeHandle {
    pub endpoint: String,
    state: Arc<FakeState>,
}

struct FakeState {
    objects: HashMap<String, Map<String, Value>>,
    cancel_on_login: Option<CancellationToken>,
    requests: AtomicUsize,
    logins: AtomicUsize,
    logouts: AtomicUsize,
}

impl FakeVcenter {
    pub const PASSWORD: &'static str = "VMware1!";
    /// Retrieving this object answers 200 with an empty body.
    pub const EMPTY_OBJECT: &'static str = "vm-empty";
    /// Retrieving this object answers 200 with a `null` body.
    pub const NULL_OBJECT: &'static str = "vm-null";

    pub fn new() -> Self {
        let mut root = Map::new();
        root.insert("name".into(), json!("Datacenters"));
        root.insert("childEntity".into(), json!([]));
        let mut objects = HashMap::new();
        objects.insert(ROOT_FOLDER.to_string(), root);
        Self {
            objects,
            datacenters: 0,
            cancel_on_login: None,
        }
    }

    /// Add a datacenter whose VM folder holds one VM per name: 2 vCPU,
    /// 4096 MB, 50 GiB committed, one NIC on "VM Network".
    pub fn with_datacenter(mut self, name: &str, vms: &[&str]) -> Self {
        self.datacenters += 1;
        let n = self.datacenters;
        let dc = format!("datacenter-{n}");
        let folder = format!("group-v{n}");

        let mut children = Vec::new();
        for (i, vm_name) in vms.iter().enumerate() {
            let vm = format!("vm-{n}{i}");
            let mut props = Map::new();
            props.insert("name".into(), json!(vm_name));
            props.insert(
                "summary".into(),
                json!({
                    "_typeName": "VirtualMachineSummary",
                    "config": { "numCpu": 2, "memorySizeMB": 4096 },
                    "storage": { "committed": 53_687_091_200_i64 },
                }),
            );
            props.insert(
                "config.hardware.device".into(),
                json!([{
                    "_typeName": "VirtualVmxnet3",
                    "key": 4000,
                    "backing": {
                        "_typeName": "VirtualEthernetCardNetworkBackingInfo",
                        "deviceName": "VM Network",
                    },
                }]),
            );
            self.objects.insert(vm.clone(), props);
            children.push(moref("VirtualMachine", &vm));
        }

        let mut folder_props = Map::new();
        folder_props.insert("name".into(), json!("vm"));
        folder_props.insert("childEntity".into(), Value::Array(children));
        self.objects.insert(folder.clone(), folder_props);

        let mut dc_props = Map::new();
        dc_props.insert("name".into(), json!(name));
        dc_props.insert("vmFolder".into(), moref("Folder", &folder));
        self.objects.insert(dc.clone(), dc_props);

        if let Some(list) = self
            .objects
            .get_mut(ROOT_FOLDER)
            .and_then(|root| root.get_mut("childEntity"))
            .and_then(Value::as_array_mut)
        {
            list.push(moref("Datacenter", &dc));
        }
        self
    }

    /// Cancel `token` once a login succeeds.
    pub fn cancel_on_login(mut self, token: CancellationToken) -> Self {
        self.cancel_on_login = Some(token);
        self
    }

    pub async fn start(self) -> FakeHandle {
        let state = Arc::new(FakeState {
            objects: self.objects,
            cancel_on_login: self.cancel_on_login,
            requests: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route(
                "/sdk/vim25/:release/ServiceInstance/ServiceInstance/content",
                get(service_content),
            )
            .route("/sdk/vim25/:release/SessionManager/:id/Login", post(login))
            .route("/sdk/vim25/:release/SessionManager/:id/Logout", post(logout))
            .route(
                "/sdk/vim25/:release/PropertyCollector/:id/RetrievePropertiesEx",
                post(retrieve_properties_ex),
            )
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        FakeHandle {
            endpoint: format!("http://{addr}"),
            state,
        }
    }
}

impl FakeHandle {
    /// Every request received, authenticated or not.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.state.logouts.load(Ordering::SeqCst)
    }

    /// Wait up to two seconds for the logout count to reach `n`.
    pub async fn wait_for_logouts(&self, n: usize) -> bool {
        for _ in 0..200 {
            if self.logouts() >= n {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }
}

fn authenticated(headers: &HeaderMap) -> bool {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) == Some(SESSION_TOKEN)
}

async fn service_content(State(state): State<Arc<FakeState>>) -> Json<Value> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "_typeName": "ServiceContent",
        "rootFolder": moref("Folder", ROOT_FOLDER),
        "propertyCollector": moref("PropertyCollector", "propertyCollector"),
        "sessionManager": moref("SessionManager", "SessionManager"),
        "about": {
            "_typeName": "AboutInfo",
            "fullName": "VMware vCenter Server 8.0.1 build-21560480",
            "apiVersion": "8.0.1.0",
        },
    }))
}

async fn login(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if body["password"] != FakeVcenter::PASSWORD {
        return fault(
            "InvalidLogin",
            "Cannot complete login due to an incorrect user name or password.",
        );
    }
    state.logins.fetch_add(1, Ordering::SeqCst);
    if let Some(token) = &state.cancel_on_login {
        token.cancel();
    }
    let session = json!({ "_typeName": "UserSession", "userName": body["userName"] });
    ([(SESSION_HEADER, SESSION_TOKEN)], Json(session)).into_response()
}

async fn logout(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if !authenticated(&headers) {
        return fault("NotAuthenticated", "The session is not authenticated.");
    }
    state.logouts.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT.into_response()
}

async fn retrieve_properties_ex(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if !authenticated(&headers) {
        return fault("NotAuthenticated", "The session is not authenticated.");
    }

    let obj = body
        .pointer("/specSet/0/objectSet/0/obj")
        .cloned()
        .unwrap_or(Value::Null);
    let value = obj["value"].as_str().unwrap_or_default();
    if value == FakeVcenter::EMPTY_OBJECT {
        return (StatusCode::OK, "").into_response();
    }
    if value == FakeVcenter::NULL_OBJECT {
        return (StatusCode::OK, "null").into_response();
    }
    let Some(props) = state.objects.get(value) else {
        return fault("ManagedObjectNotFound", "The object has already been deleted.");
    };

    let paths = body
        .pointer("/specSet/0/propSet/0/pathSet")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let prop_set: Vec<Value> = paths
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|path| {
            props.get(path).map(|val| {
                json!({ "_typeName": "DynamicProperty", "name": path, "val": boxed(val) })
            })
        })
        .collect();

    Json(json!({
        "_typeName": "RetrieveResult",
        "objects": [{ "_typeName": "ObjectContent", "obj": obj, "propSet": prop_set }],
    }))
    .into_response()
}
