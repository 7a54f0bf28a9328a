//! Inventory service façade.
//!
//! `InventoryService` is the single entry point the HTTP layer calls. Each
//! call opens its own vCenter session, walks the inventory and logs out;
//! nothing is shared between requests.

use crate::error::VcenterResult;
use crate::inventory::{build_inventory, TraversalControl};
use crate::mock::MockInventory;
use crate::session::{open_session, run_scoped};
use crate::types::*;

use futures::FutureExt;

/// Fetches inventory trees from vCenter, or from the demo fixture.
#[derive(Debug, Clone)]
pub struct InventoryService {
    options: SessionOptions,
    use_mock_data: bool,
}

impl InventoryService {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            use_mock_data: false,
        }
    }

    /// Serve the demo inventory instead of contacting vCenter.
    pub fn with_mock_data(mut self, enabled: bool) -> Self {
        self.use_mock_data = enabled;
        self
    }

    pub fn uses_mock_data(&self) -> bool {
        self.use_mock_data
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    // ── Inventory ───────────────────────────────────────────────────

    /// Snapshot the inventory of the datacenter behind `credentials`.
    pub async fn fetch_inventory(
        &self,
        credentials: &VcenterCredentials,
        control: TraversalControl,
    ) -> VcenterResult<InventoryNode> {
        control.check()?;
        if self.use_mock_data {
            log::info!("Using mock data for vCenter inventory");
            return mock_inventory(control).await;
        }

        let (session, datacenter) = open_session(credentials, &self.options, &control).await?;
        let host = session.host().to_string();
        let tree = run_scoped(session, datacenter, |s, dc| {
            async move { build_inventory(s, &dc, control).await }.boxed()
        })
        .await?;

        log::info!(
            "Fetched inventory of '{}' from {host}: {} virtual machines",
            tree.name,
            tree.virtual_machines().len()
        );
        Ok(tree)
    }
}

/// The demo tree, produced by the regular traversal over the mock graph.
pub async fn mock_inventory(control: TraversalControl) -> VcenterResult<InventoryNode> {
    let (inventory, datacenter) = MockInventory::demo();
    build_inventory(&inventory, &datacenter, control).await
}
