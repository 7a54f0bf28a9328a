//! Shared types for the vCenter inventory snapshot.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection / Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Credentials for one inventory request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcenterCredentials {
    /// vCenter URL or bare hostname (e.g. "vcenter.lab.local")
    pub endpoint: String,
    /// Username (e.g. "administrator@vsphere.local")
    pub username: String,
    /// Password (redacted in `Debug`)
    pub password: SecretString,
    /// Datacenter name, needed only when several are visible
    #[serde(default)]
    pub datacenter: Option<String>,
}

/// Transport options for a vCenter session.
///
/// There is no `Default`: relaxing certificate validation must be an
/// explicit decision of whoever builds the options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Accept self-signed / untrusted management-plane certificates
    pub insecure_skip_verify: bool,
    /// Per-HTTP-request timeout in seconds
    pub timeout_secs: u64,
    /// Release segment of the vim25 JSON API path (e.g. "8.0.1.0")
    pub api_release: String,
}

impl SessionOptions {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_API_RELEASE: &'static str = "8.0.1.0";

    pub fn new(insecure_skip_verify: bool) -> Self {
        Self {
            insecure_skip_verify,
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            api_release: Self::DEFAULT_API_RELEASE.to_string(),
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_api_release(mut self, release: impl Into<String>) -> Self {
        self.api_release = release.into();
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Managed objects
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stable address of a managed object (e.g. `Folder:group-v4`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedObjectReference {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl ManagedObjectReference {
    pub fn new(type_: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            value: value.into(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        EntityKind::from_type(&self.type_)
    }

    /// JSON-binding form with the `_typeName` discriminator the API expects.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "_typeName": "ManagedObjectReference",
            "type": self.type_,
            "value": self.value,
        })
    }
}

impl fmt::Display for ManagedObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_, self.value)
    }
}

/// The managed-object kinds the traversal cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    VirtualMachine,
    Folder,
    Cluster,
    /// Datastores, networks, bare resource pools, vApps, ...
    Other(String),
}

impl EntityKind {
    pub fn from_type(type_: &str) -> Self {
        match type_ {
            "VirtualMachine" => Self::VirtualMachine,
            "Folder" => Self::Folder,
            "ClusterComputeResource" => Self::Cluster,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Subset of `ServiceContent` needed to log in and query properties.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContent {
    pub root_folder: ManagedObjectReference,
    pub property_collector: ManagedObjectReference,
    pub session_manager: ManagedObjectReference,
    #[serde(default)]
    pub about: Option<AboutInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutInfo {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  VM properties
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `VirtualMachine.summary`, reduced to the footprint fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSummary {
    #[serde(default)]
    pub config: Option<VmConfigSummary>,
    #[serde(default)]
    pub storage: Option<VmStorageSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmConfigSummary {
    #[serde(default)]
    pub num_cpu: i32,
    #[serde(default, rename = "memorySizeMB")]
    pub memory_size_mb: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmStorageSummary {
    /// Bytes committed on datastores
    #[serde(default)]
    pub committed: i64,
}

/// One entry of `config.hardware.device`.
#[derive(Debug, Clone, Deserialize)]
pub struct VirtualDevice {
    #[serde(rename = "_typeName")]
    pub type_name: String,
    #[serde(default)]
    pub key: i32,
    #[serde(default)]
    pub backing: Option<DeviceBacking>,
}

/// Device types deriving from `VirtualEthernetCard`.
pub const ETHERNET_CARD_TYPES: &[&str] = &[
    "VirtualE1000",
    "VirtualE1000e",
    "VirtualPCNet32",
    "VirtualVmxnet",
    "VirtualVmxnet2",
    "VirtualVmxnet3",
    "VirtualVmxnet3Vrdma",
    "VirtualSriovEthernetCard",
];

impl VirtualDevice {
    pub fn is_ethernet_card(&self) -> bool {
        ETHERNET_CARD_TYPES.contains(&self.type_name.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "_typeName")]
pub enum DeviceBacking {
    /// Standard vSwitch port group
    #[serde(rename = "VirtualEthernetCardNetworkBackingInfo")]
    Network(NetworkBacking),
    /// Distributed vSwitch port
    #[serde(rename = "VirtualEthernetCardDistributedVirtualPortBackingInfo")]
    DistributedPort(DistributedPortBacking),
    /// Opaque (NSX) networks, disk files, ...
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBacking {
    #[serde(default)]
    pub device_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedPortBacking {
    pub port: DistributedPortConnection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedPortConnection {
    #[serde(default)]
    pub switch_uuid: Option<String>,
    #[serde(default)]
    pub portgroup_key: Option<String>,
    #[serde(default)]
    pub port_key: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Inventory tree
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Node kinds of the normalised tree.
///
/// The serialized names are the ones the web UI switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryKind {
    #[serde(rename = "datacenter")]
    Datacenter,
    #[serde(rename = "Folder")]
    Folder,
    #[serde(rename = "ClusterComputeResource")]
    Cluster,
    #[serde(rename = "VirtualMachine")]
    VirtualMachine,
}

impl InventoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Datacenter => "datacenter",
            Self::Folder => "folder",
            Self::Cluster => "cluster",
            Self::VirtualMachine => "virtual-machine",
        }
    }
}

impl fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute / storage / network footprint of one VM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmFootprint {
    pub networks: Vec<String>,
    pub cpu_count: i32,
    pub memory_mb: i32,
    pub disk_committed_gb: i64,
}

/// One node of the inventory tree handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InventoryKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<InventoryNode>,
    /// Port group names (standard switches) or port group keys
    /// (distributed switches); consumers must accept both.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    #[serde(default, rename = "cpu", skip_serializing_if = "is_zero_i32")]
    pub cpu_count: i32,
    #[serde(default, rename = "memoryMB", skip_serializing_if = "is_zero_i32")]
    pub memory_mb: i32,
    #[serde(default, rename = "diskSizeGB", skip_serializing_if = "is_zero_i64")]
    pub disk_committed_gb: i64,
    #[serde(default, rename = "folder", skip_serializing_if = "String::is_empty")]
    pub folder_path: String,
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

impl InventoryNode {
    fn container(
        kind: InventoryKind,
        name: String,
        folder_path: String,
        children: Vec<InventoryNode>,
    ) -> Self {
        Self {
            name,
            kind,
            children,
            networks: Vec::new(),
            cpu_count: 0,
            memory_mb: 0,
            disk_committed_gb: 0,
            folder_path,
        }
    }

    pub fn datacenter(name: impl Into<String>, children: Vec<InventoryNode>) -> Self {
        Self::container(InventoryKind::Datacenter, name.into(), String::new(), children)
    }

    pub fn folder(
        name: impl Into<String>,
        folder_path: impl Into<String>,
        children: Vec<InventoryNode>,
    ) -> Self {
        Self::container(InventoryKind::Folder, name.into(), folder_path.into(), children)
    }

    pub fn cluster(
        name: impl Into<String>,
        folder_path: impl Into<String>,
        children: Vec<InventoryNode>,
    ) -> Self {
        Self::container(InventoryKind::Cluster, name.into(), folder_path.into(), children)
    }

    pub fn virtual_machine(
        name: impl Into<String>,
        folder_path: impl Into<String>,
        footprint: VmFootprint,
    ) -> Self {
        Self {
            name: name.into(),
            kind: InventoryKind::VirtualMachine,
            children: Vec::new(),
            networks: footprint.networks,
            cpu_count: footprint.cpu_count,
            memory_mb: footprint.memory_mb,
            disk_committed_gb: footprint.disk_committed_gb,
            folder_path: folder_path.into(),
        }
    }

    pub fn is_virtual_machine(&self) -> bool {
        self.kind == InventoryKind::VirtualMachine
    }

    /// Depth-first, pre-order list of every VM below (and including) this node.
    pub fn virtual_machines(&self) -> Vec<&InventoryNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.is_virtual_machine() {
                out.push(node);
            }
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Direct child by name.
    pub fn child(&self, name: &str) -> Option<&InventoryNode> {
        self.children.iter().find(|c| c.name == name)
    }
}
