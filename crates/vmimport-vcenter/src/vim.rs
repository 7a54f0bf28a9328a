//! vSphere Web Services (vim25) JSON API client with session-based auth.
//!
//! Communicates with vCenter via `https://{host}/sdk/vim25/{release}/...`.
//! Only the calls the inventory snapshot needs are implemented: service
//! content, login / logout and `RetrievePropertiesEx`.

use crate::error::{VcenterError, VcenterErrorKind, VcenterResult};
use crate::property::PropertySet;
use crate::types::{ManagedObjectReference, ServiceContent, SessionOptions};

use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Header carrying the session token on every authenticated call.
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// Faults in a missing-property entry that make the whole retrieval fail.
const FATAL_MISSING_FAULTS: &[&str] = &["NoPermission", "NotAuthenticated"];

/// Normalise a user-supplied endpoint: assume `https://` when no scheme is
/// given, then parse.
pub fn normalize_endpoint(raw: &str) -> VcenterResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(VcenterError::connection("Endpoint is empty"));
    }
    let full = if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&full)?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(VcenterError::connection(format!("Endpoint has no host: {raw}")));
    }
    Ok(url)
}

/// API root for an endpoint. Any path or userinfo on the endpoint is
/// dropped (`https://vc/sdk` and `vc` address the same API).
pub fn api_base(endpoint: &Url, release: &str) -> VcenterResult<String> {
    let host = endpoint
        .host_str()
        .ok_or_else(|| VcenterError::connection(format!("Endpoint has no host: {endpoint}")))?;
    let port = endpoint.port().map(|p| format!(":{p}")).unwrap_or_default();
    Ok(format!("{}://{host}{port}/sdk/vim25/{release}", endpoint.scheme()))
}

/// A server-side fault decoded from an error response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VimFault {
    pub type_name: String,
    pub message: Option<String>,
}

impl VimFault {
    pub fn parse(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        let type_name = value.get("_typeName")?.as_str()?.to_string();
        let message = value
            .get("faultMessage")
            .and_then(Value::as_array)
            .and_then(|msgs| msgs.first())
            .and_then(|m| m.get("message"))
            .or_else(|| value.get("msg"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self { type_name, message })
    }
}

impl std::fmt::Display for VimFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(m) => write!(f, "{}: {m}", self.type_name),
            None => f.write_str(&self.type_name),
        }
    }
}

/// Request body of `RetrievePropertiesEx` for one object.
pub fn retrieve_request(obj: &ManagedObjectReference, paths: &[&str]) -> Value {
    serde_json::json!({
        "specSet": [{
            "_typeName": "PropertyFilterSpec",
            "propSet": [{
                "_typeName": "PropertySpec",
                "type": obj.type_,
                "pathSet": paths,
            }],
            "objectSet": [{
                "_typeName": "ObjectSpec",
                "obj": obj.to_wire(),
                "skip": false,
            }],
        }],
        "options": { "_typeName": "RetrieveOptions" },
    })
}

/// `DynamicProperty.val` is `anyType`: primitives and arrays arrive boxed
/// as `{"_typeName": "...", "_value": ...}`.
fn unbox_any(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("_value") => {
            map.remove("_value").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Turn a `RetrieveResult` into the properties of `obj`.
pub fn parse_retrieve_result(
    obj: &ManagedObjectReference,
    result: Value,
) -> VcenterResult<PropertySet> {
    let content = result
        .get("objects")
        .and_then(Value::as_array)
        .and_then(|objects| objects.first())
        .ok_or_else(|| VcenterError::property(format!("{obj}: object no longer exists")))?;

    if let Some(missing) = content.get("missingSet").and_then(Value::as_array) {
        for entry in missing {
            let fault_type = entry
                .pointer("/fault/fault/_typeName")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if FATAL_MISSING_FAULTS.contains(&fault_type) {
                let path = entry.get("path").and_then(Value::as_str).unwrap_or("?");
                return Err(VcenterError::property(format!(
                    "{obj}: '{path}' not readable ({fault_type})"
                )));
            }
        }
    }

    let mut set = PropertySet::new(obj.clone());
    if let Some(props) = content.get("propSet").and_then(Value::as_array) {
        for prop in props {
            let Some(name) = prop.get("name").and_then(Value::as_str) else {
                continue;
            };
            let val = prop.get("val").cloned().unwrap_or(Value::Null);
            set.insert(name, unbox_any(val));
        }
    }
    Ok(set)
}

/// vim25 JSON API client.
pub struct VimClient {
    client: Client,
    base_url: String,
    session_id: Option<String>,
    content: Option<ServiceContent>,
}

impl VimClient {
    /// Build a new client (does NOT create a session yet).
    pub fn new(endpoint: &Url, options: &SessionOptions) -> VcenterResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(options.insecure_skip_verify)
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| VcenterError::connection(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: api_base(endpoint, &options.api_release)?,
            session_id: None,
            content: None,
        })
    }

    /// Base URL for API calls.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether we have an active session.
    pub fn is_connected(&self) -> bool {
        self.session_id.is_some()
    }

    /// Service content loaded by `fetch_service_content`.
    pub fn service_content(&self) -> VcenterResult<&ServiceContent> {
        self.content
            .as_ref()
            .ok_or_else(|| VcenterError::connection("Service content not loaded"))
    }

    // ── Session management ──────────────────────────────────────────

    /// Fetch the service content (GET ServiceInstance/ServiceInstance/content).
    pub async fn fetch_service_content(&mut self) -> VcenterResult<ServiceContent> {
        let url = format!("{}/ServiceInstance/ServiceInstance/content", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let resp = Self::check_status(resp, VcenterErrorKind::ConnectionError).await?;
        let content: ServiceContent = resp
            .json()
            .await
            .map_err(|e| VcenterError::connection(format!("Unexpected service content: {e}")))?;
        self.content = Some(content.clone());
        Ok(content)
    }

    /// Create a session (POST SessionManager/{id}/Login).
    pub async fn login(&mut self, username: &str, password: &SecretString) -> VcenterResult<()> {
        let session_manager = self.service_content()?.session_manager.value.clone();
        let url = format!("{}/SessionManager/{session_manager}/Login", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "userName": username,
                "password": password.expose_secret(),
            }))
            .send()
            .await?;
        let resp = Self::check_status(resp, VcenterErrorKind::ConnectionError).await?;

        let session_id = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| VcenterError::connection("Login response carried no session token"))?;

        self.session_id = Some(session_id);
        Ok(())
    }

    /// Delete the current session (POST SessionManager/{id}/Logout).
    pub async fn logout(&mut self) -> VcenterResult<()> {
        if let (Some(sid), Some(content)) = (self.session_id.take(), self.content.as_ref()) {
            let url = format!(
                "{}/SessionManager/{}/Logout",
                self.base_url, content.session_manager.value
            );
            let result = self
                .client
                .post(&url)
                .header(SESSION_HEADER, sid.as_str())
                .send()
                .await;
            if let Err(e) = result {
                log::debug!("vCenter logout request failed: {e}");
            }
        }
        Ok(())
    }

    /// Take the session token out so teardown can run from a detached task.
    pub(crate) fn detach(&mut self) -> Option<Self> {
        let session_id = self.session_id.take()?;
        Some(Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            session_id: Some(session_id),
            content: self.content.clone(),
        })
    }

    // ── Property retrieval ──────────────────────────────────────────

    fn require_session(&self) -> VcenterResult<&str> {
        self.session_id
            .as_deref()
            .ok_or_else(|| VcenterError::connection("Not logged in: no active session"))
    }

    /// Batched property fetch (POST PropertyCollector/{id}/RetrievePropertiesEx).
    pub async fn retrieve_properties(
        &self,
        obj: &ManagedObjectReference,
        paths: &[&str],
    ) -> VcenterResult<PropertySet> {
        let sid = self.require_session()?;
        let collector = &self.service_content()?.property_collector.value;
        let url = format!("{}/PropertyCollector/{collector}/RetrievePropertiesEx", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header(SESSION_HEADER, sid)
            .json(&retrieve_request(obj, paths))
            .send()
            .await
            .map_err(|e| VcenterError::property(format!("{obj}: request failed: {e}")))?;
        let resp = Self::check_status(resp, VcenterErrorKind::PropertyRetrieval)
            .await
            .map_err(|e| VcenterError::new(e.kind, format!("{obj}: {}", e.message)))?;

        let text = resp
            .text()
            .await
            .map_err(|e| VcenterError::property(format!("{obj}: failed to read response: {e}")))?;
        if text.trim().is_empty() {
            return Err(VcenterError::property(format!("{obj}: object no longer exists")));
        }
        let result: Value = serde_json::from_str(&text)
            .map_err(|e| VcenterError::property(format!("{obj}: JSON parse error: {e}")))?;
        if result.is_null() {
            return Err(VcenterError::property(format!("{obj}: object no longer exists")));
        }
        parse_retrieve_result(obj, result)
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn check_status(resp: Response, kind: VcenterErrorKind) -> VcenterResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let code = status.as_u16();
        let body = resp.text().await.unwrap_or_default();
        let detail = match VimFault::parse(&body) {
            Some(fault) => fault.to_string(),
            None => body.chars().take(500).collect(),
        };

        let message = if code == 401 || detail.starts_with("InvalidLogin") {
            format!("Authentication rejected: {detail}")
        } else {
            format!("API error {code}: {detail}")
        };
        Err(VcenterError::new(kind, message))
    }
}
