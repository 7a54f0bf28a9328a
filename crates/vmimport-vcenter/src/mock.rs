//! In-memory managed-object graph.
//!
//! Backs the "use mock data" demo mode and the traversal tests. Objects
//! carry the same property paths a real vCenter returns, so the demo goes
//! through the real traversal engine.

use crate::error::{VcenterError, VcenterResult};
use crate::property::{PropertySet, PropertySource};
use crate::session::ManagedSession;
use crate::types::ManagedObjectReference;

use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const BYTES_PER_GB: i64 = 1 << 30;

/// Network attachment of a mock VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockNic {
    /// Standard vSwitch port group name
    Standard(String),
    /// Distributed port group key
    Distributed(String),
}

/// Footprint of a mock VM.
#[derive(Debug, Clone, Default)]
pub struct MockVm {
    pub cpu: i32,
    pub memory_mb: i32,
    pub committed_bytes: i64,
    pub nics: Vec<MockNic>,
}

impl MockVm {
    pub fn new(cpu: i32, memory_mb: i32, disk_gb: i64) -> Self {
        Self {
            cpu,
            memory_mb,
            committed_bytes: disk_gb * BYTES_PER_GB,
            nics: Vec::new(),
        }
    }

    pub fn with_committed_bytes(mut self, bytes: i64) -> Self {
        self.committed_bytes = bytes;
        self
    }

    pub fn with_nic(mut self, nic: MockNic) -> Self {
        self.nics.push(nic);
        self
    }

    fn summary(&self) -> Value {
        json!({
            "_typeName": "VirtualMachineSummary",
            "config": {
                "_typeName": "VirtualMachineConfigSummary",
                "numCpu": self.cpu,
                "memorySizeMB": self.memory_mb,
            },
            "storage": {
                "_typeName": "VirtualMachineStorageSummary",
                "committed": self.committed_bytes,
                "uncommitted": 0,
            },
        })
    }

    fn devices(&self) -> Value {
        let mut devices = vec![json!({
            "_typeName": "VirtualDisk",
            "key": 2000,
            "backing": {
                "_typeName": "VirtualDiskFlatVer2BackingInfo",
                "fileName": "[datastore1] disk.vmdk",
            },
            "capacityInBytes": self.committed_bytes,
        })];
        for (i, nic) in self.nics.iter().enumerate() {
            let backing = match nic {
                MockNic::Standard(name) => json!({
                    "_typeName": "VirtualEthernetCardNetworkBackingInfo",
                    "deviceName": name,
                }),
                MockNic::Distributed(key) => json!({
                    "_typeName": "VirtualEthernetCardDistributedVirtualPortBackingInfo",
                    "port": {
                        "_typeName": "DistributedVirtualSwitchPortConnection",
                        "switchUuid": "50 36 6b 2e 9f 6a 11 c4-8a 3c 1f 9f 1a 2b 3c 4d",
                        "portgroupKey": key,
                    },
                }),
            };
            devices.push(json!({
                "_typeName": "VirtualVmxnet3",
                "key": 4000 + i as i32,
                "backing": backing,
            }));
        }
        Value::Array(devices)
    }
}

/// In-memory stand-in for a vCenter object graph.
pub struct MockInventory {
    objects: HashMap<ManagedObjectReference, Map<String, Value>>,
    failing: HashSet<ManagedObjectReference>,
    root_folder: ManagedObjectReference,
    next_id: usize,
    retrievals: AtomicUsize,
    released: Arc<AtomicBool>,
}

impl Default for MockInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInventory {
    /// An empty inventory: just the root folder.
    pub fn new() -> Self {
        let root_folder = ManagedObjectReference::new("Folder", "group-d1");
        let mut objects = HashMap::new();
        objects.insert(root_folder.clone(), Self::props("Datacenters", Some(json!([]))));
        Self {
            objects,
            failing: HashSet::new(),
            root_folder,
            next_id: 1,
            retrievals: AtomicUsize::new(0),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The "Mock-Datacenter" demo inventory served in mock mode.
    pub fn demo() -> (Self, ManagedObjectReference) {
        let mut inv = Self::new();
        let dc = inv.add_datacenter("Mock-Datacenter");
        let vm_folder = inv.vm_folder(&dc).unwrap_or_else(|| inv.root_folder.clone());
        let cluster = inv.add_cluster(&vm_folder, "Mock-Cluster");
        inv.add_vm(
            &cluster,
            "Mock-VM-01",
            MockVm::new(2, 4096, 50).with_nic(MockNic::Standard("Mock-Network".into())),
        );
        inv.add_vm(
            &cluster,
            "Mock-VM-02",
            MockVm::new(4, 8192, 100).with_nic(MockNic::Standard("Mock-Network".into())),
        );
        (inv, dc)
    }

    fn props(name: &str, children: Option<Value>) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("name".into(), Value::from(name));
        if let Some(children) = children {
            map.insert("childEntity".into(), children);
        }
        map
    }

    fn alloc(&mut self, type_: &str, prefix: &str) -> ManagedObjectReference {
        let r = ManagedObjectReference::new(type_, format!("{prefix}-{}", self.next_id));
        self.next_id += 1;
        r
    }

    fn push_ref(
        &mut self,
        owner: &ManagedObjectReference,
        path: &str,
        child: &ManagedObjectReference,
    ) {
        if let Some(props) = self.objects.get_mut(owner) {
            let list = props.entry(path.to_string()).or_insert_with(|| json!([]));
            if let Some(items) = list.as_array_mut() {
                items.push(child.to_wire());
            }
        }
    }

    /// Attach `child` below a folder, or to a cluster's root resource pool.
    fn attach(&mut self, parent: &ManagedObjectReference, child: &ManagedObjectReference) {
        if parent.type_ == "ClusterComputeResource" {
            if let Some(pool) = self.resource_pool(parent) {
                self.push_ref(&pool, "vm", child);
            }
        } else {
            self.push_ref(parent, "childEntity", child);
        }
    }

    pub fn root_folder(&self) -> &ManagedObjectReference {
        &self.root_folder
    }

    /// Add a datacenter with its VM folder under the root folder.
    pub fn add_datacenter(&mut self, name: &str) -> ManagedObjectReference {
        let dc = self.alloc("Datacenter", "datacenter");
        let vm_folder = self.alloc("Folder", "group-v");
        self.objects.insert(vm_folder.clone(), Self::props("vm", Some(json!([]))));
        let mut props = Self::props(name, None);
        props.insert("vmFolder".into(), vm_folder.to_wire());
        self.objects.insert(dc.clone(), props);
        let root = self.root_folder.clone();
        self.push_ref(&root, "childEntity", &dc);
        dc
    }

    pub fn vm_folder(&self, datacenter: &ManagedObjectReference) -> Option<ManagedObjectReference> {
        let value = self.objects.get(datacenter)?.get("vmFolder")?.clone();
        serde_json::from_value(value).ok()
    }

    pub fn add_folder(
        &mut self,
        parent: &ManagedObjectReference,
        name: &str,
    ) -> ManagedObjectReference {
        let folder = self.alloc("Folder", "group-v");
        self.objects.insert(folder.clone(), Self::props(name, Some(json!([]))));
        self.attach(parent, &folder);
        folder
    }

    /// Add a cluster with an empty root resource pool.
    pub fn add_cluster(
        &mut self,
        parent: &ManagedObjectReference,
        name: &str,
    ) -> ManagedObjectReference {
        let cluster = self.alloc("ClusterComputeResource", "domain-c");
        let pool = self.alloc("ResourcePool", "resgroup");
        let mut pool_props = Self::props("Resources", None);
        pool_props.insert("vm".into(), json!([]));
        self.objects.insert(pool.clone(), pool_props);
        let mut props = Self::props(name, None);
        props.insert("resourcePool".into(), pool.to_wire());
        self.objects.insert(cluster.clone(), props);
        self.attach(parent, &cluster);
        cluster
    }

    pub fn resource_pool(
        &self,
        cluster: &ManagedObjectReference,
    ) -> Option<ManagedObjectReference> {
        let value = self.objects.get(cluster)?.get("resourcePool")?.clone();
        serde_json::from_value(value).ok()
    }

    /// Add a VM to a folder, or to a cluster's resource pool.
    pub fn add_vm(
        &mut self,
        parent: &ManagedObjectReference,
        name: &str,
        vm: MockVm,
    ) -> ManagedObjectReference {
        let r = self.alloc("VirtualMachine", "vm");
        let mut props = Self::props(name, None);
        props.insert("summary".into(), vm.summary());
        props.insert("config.hardware.device".into(), vm.devices());
        self.objects.insert(r.clone(), props);
        self.attach(parent, &r);
        r
    }

    /// Add an object of a kind the traversal does not represent.
    pub fn add_object(
        &mut self,
        parent: &ManagedObjectReference,
        type_: &str,
        name: &str,
    ) -> ManagedObjectReference {
        let r = self.alloc(type_, "obj");
        self.objects.insert(r.clone(), Self::props(name, None));
        self.attach(parent, &r);
        r
    }

    /// Make every retrieval of `obj` fail as if it had vanished.
    pub fn fail_on(&mut self, obj: &ManagedObjectReference) {
        self.failing.insert(obj.clone());
    }

    /// Drop a property, as a server does for unset values.
    pub fn unset(&mut self, obj: &ManagedObjectReference, path: &str) {
        if let Some(props) = self.objects.get_mut(obj) {
            props.remove(path);
        }
    }

    /// Number of retrieval round-trips served so far.
    pub fn retrievals(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }

    /// Flag set once the session has been released.
    pub fn release_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

#[async_trait::async_trait]
impl PropertySource for MockInventory {
    async fn retrieve(
        &self,
        obj: &ManagedObjectReference,
        paths: &[&str],
    ) -> VcenterResult<PropertySet> {
        if self.released.load(Ordering::SeqCst) {
            return Err(VcenterError::connection("Not logged in: no active session"));
        }
        self.retrievals.fetch_add(1, Ordering::SeqCst);

        let props = match self.objects.get(obj) {
            Some(props) if !self.failing.contains(obj) => props,
            _ => {
                return Err(VcenterError::property(format!(
                    "{obj}: API error 500: ManagedObjectNotFound"
                )))
            }
        };
        let mut set = PropertySet::new(obj.clone());
        for path in paths {
            if let Some(value) = props.get(*path) {
                set.insert(*path, value.clone());
            }
        }
        Ok(set)
    }
}

#[async_trait::async_trait]
impl ManagedSession for MockInventory {
    async fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
