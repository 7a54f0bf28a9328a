//! Inventory traversal and normalisation.
//!
//! Walks the managed-object graph from a datacenter's VM folder and builds
//! an [`InventoryNode`] tree. The walk is sequential: one property
//! round-trip at a time, depth first, in source enumeration order.
//!
//! Failure policy: a child that cannot be resolved is logged and left out
//! of its parent; only the datacenter and its VM folder are mandatory.
//! Cancellation always aborts the whole walk.

use crate::error::{VcenterError, VcenterErrorKind, VcenterResult};
use crate::property::{PropertySet, PropertySource};
use crate::types::*;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Properties fetched for a VM in one batched call.
pub const VM_PROPERTIES: &[&str] = &["config.hardware.device", "summary"];

const BYTES_PER_GB: i64 = 1 << 30;

/// Join a folder path and a folder name with `/` (no leading separator).
pub fn join_folder_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Committed bytes to whole GiB, truncating.
pub fn committed_gb(bytes: i64) -> i64 {
    bytes.max(0) / BYTES_PER_GB
}

/// Network identifiers of a VM's ethernet cards, in device order.
///
/// A standard backing gives the port group *name*, a distributed backing
/// gives the port group *key*. The two are different namespaces that end up
/// in the same list.
pub fn network_attachments(devices: &[VirtualDevice]) -> Vec<String> {
    devices
        .iter()
        .filter(|d| d.is_ethernet_card())
        .filter_map(|d| match &d.backing {
            Some(DeviceBacking::Network(b)) => Some(b.device_name.clone()),
            Some(DeviceBacking::DistributedPort(b)) => b.port.portgroup_key.clone(),
            _ => None,
        })
        .collect()
}

/// Cancellation signal and optional deadline, checked before every
/// property retrieval.
#[derive(Debug, Clone, Default)]
pub struct TraversalControl {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl TraversalControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn check(&self) -> VcenterResult<()> {
        if self.cancel.is_cancelled() {
            return Err(VcenterError::cancelled("Inventory traversal cancelled"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(VcenterError::cancelled("Inventory traversal deadline exceeded"));
        }
        Ok(())
    }
}

/// Builds the inventory tree from a property source.
pub struct InventoryWalker<'a, S: PropertySource + ?Sized> {
    source: &'a S,
    control: TraversalControl,
}

impl<'a, S: PropertySource + ?Sized> InventoryWalker<'a, S> {
    pub fn new(source: &'a S, control: TraversalControl) -> Self {
        Self { source, control }
    }

    async fn fetch(
        &self,
        obj: &ManagedObjectReference,
        paths: &[&str],
    ) -> VcenterResult<PropertySet> {
        self.control.check()?;
        self.source.retrieve(obj, paths).await
    }

    /// Walk the datacenter's VM folder. Failing to read the datacenter or
    /// its VM folder is fatal; everything below is best effort.
    pub async fn build(&self, datacenter: &ManagedObjectReference) -> VcenterResult<InventoryNode> {
        let dc = self.fetch(datacenter, &["name", "vmFolder"]).await?;
        let dc_name: String = dc.get("name")?;
        let vm_folder: ManagedObjectReference = dc.get("vmFolder")?;

        let root = self.fetch(&vm_folder, &["childEntity"]).await?;
        let children: Vec<ManagedObjectReference> = root.get_list("childEntity")?;

        let nodes = self.visit_children(&children, "", &dc_name).await?;
        log::debug!(
            "Built inventory for datacenter '{dc_name}': {} top-level entries",
            nodes.len()
        );
        Ok(InventoryNode::datacenter(dc_name, nodes))
    }

    /// Resolve one entity. `None` for kinds the tree does not represent.
    pub fn visit<'b>(
        &'b self,
        entity: &'b ManagedObjectReference,
        folder_path: &'b str,
    ) -> BoxFuture<'b, VcenterResult<Option<InventoryNode>>> {
        async move {
            let props = self.fetch(entity, &["name"]).await?;
            let name: String = props.get("name")?;

            match entity.kind() {
                EntityKind::VirtualMachine => {
                    self.visit_vm(entity, name, folder_path).await.map(Some)
                }
                EntityKind::Folder => self.visit_folder(entity, name, folder_path).await.map(Some),
                EntityKind::Cluster => {
                    self.visit_cluster(entity, name, folder_path).await.map(Some)
                }
                EntityKind::Other(type_) => {
                    log::debug!("Skipping {type_} '{name}' ({entity})");
                    Ok(None)
                }
            }
        }
        .boxed()
    }

    async fn visit_vm(
        &self,
        entity: &ManagedObjectReference,
        name: String,
        folder_path: &str,
    ) -> VcenterResult<InventoryNode> {
        let props = self.fetch(entity, VM_PROPERTIES).await?;

        let devices: Vec<VirtualDevice> = props
            .get_list::<Value>("config.hardware.device")?
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<VirtualDevice>(raw) {
                Ok(device) => Some(device),
                Err(e) => {
                    log::debug!("Ignoring undecodable device on VM '{name}': {e}");
                    None
                }
            })
            .collect();
        let summary: VmSummary = props.get_opt("summary")?.unwrap_or_default();

        let config = summary.config.unwrap_or_default();
        let footprint = VmFootprint {
            networks: network_attachments(&devices),
            cpu_count: config.num_cpu,
            memory_mb: config.memory_size_mb,
            disk_committed_gb: committed_gb(summary.storage.map_or(0, |s| s.committed)),
        };
        log::debug!("Found networks for VM '{name}': {:?}", footprint.networks);

        Ok(InventoryNode::virtual_machine(name, folder_path, footprint))
    }

    async fn visit_folder(
        &self,
        entity: &ManagedObjectReference,
        name: String,
        folder_path: &str,
    ) -> VcenterResult<InventoryNode> {
        let child_path = join_folder_path(folder_path, &name);
        let props = self.fetch(entity, &["childEntity"]).await?;
        let children: Vec<ManagedObjectReference> = props.get_list("childEntity")?;

        let nodes = self.visit_children(&children, &child_path, &name).await?;
        Ok(InventoryNode::folder(name, folder_path, nodes))
    }

    /// A cluster is not a folder level: its VMs keep the incoming path.
    async fn visit_cluster(
        &self,
        entity: &ManagedObjectReference,
        name: String,
        folder_path: &str,
    ) -> VcenterResult<InventoryNode> {
        let members = match self.pool_members(entity).await {
            Ok(members) => members,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                log::warn!(
                    "Could not resolve resource pool of cluster '{name}' ({entity}) \
                     at '{folder_path}': {e}"
                );
                Vec::new()
            }
        };

        let nodes = self.visit_children(&members, folder_path, &name).await?;
        Ok(InventoryNode::cluster(name, folder_path, nodes))
    }

    async fn pool_members(
        &self,
        cluster: &ManagedObjectReference,
    ) -> VcenterResult<Vec<ManagedObjectReference>> {
        let props = self
            .fetch(cluster, &["resourcePool"])
            .await
            .map_err(|e| e.into_kind(VcenterErrorKind::PoolResolution))?;
        let pool: ManagedObjectReference = props
            .get_opt("resourcePool")
            .map_err(|e| e.into_kind(VcenterErrorKind::PoolResolution))?
            .ok_or_else(|| VcenterError::pool(format!("{cluster}: no resource pool")))?;

        let props = self
            .fetch(&pool, &["vm"])
            .await
            .map_err(|e| e.into_kind(VcenterErrorKind::PoolResolution))?;
        props
            .get_list("vm")
            .map_err(|e| e.into_kind(VcenterErrorKind::PoolResolution))
    }

    /// Visit siblings in order, dropping the ones that fail.
    async fn visit_children(
        &self,
        children: &[ManagedObjectReference],
        folder_path: &str,
        parent: &str,
    ) -> VcenterResult<Vec<InventoryNode>> {
        let mut nodes = Vec::with_capacity(children.len());
        for child in children {
            match self.visit(child, folder_path).await {
                Ok(Some(node)) => nodes.push(node),
                Ok(None) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => log::warn!(
                    "Could not process child entity {child} of '{parent}' at '{folder_path}': {e}"
                ),
            }
        }
        Ok(nodes)
    }
}

/// Build the inventory tree rooted at `datacenter`.
pub async fn build_inventory<S: PropertySource + ?Sized>(
    source: &S,
    datacenter: &ManagedObjectReference,
    control: TraversalControl,
) -> VcenterResult<InventoryNode> {
    InventoryWalker::new(source, control).build(datacenter).await
}
