//! # VM Import – vCenter Inventory
//!
//! Read-only snapshot of a vCenter datacenter for VM migration planning:
//! folders, clusters and virtual machines with their network attachments
//! and CPU / memory / disk footprint.
//!
//! ## Modules
//!
//! - **types** — Credentials, managed-object references, vim25 property shapes, inventory tree
//! - **error** — Crate-specific error types
//! - **property** — `PropertySource` retrieval trait and decoded property sets
//! - **vim** — vim25 JSON API HTTP client (service content, login, property collector)
//! - **session** — Session lifecycle, datacenter resolution, scoped release
//! - **inventory** — Traversal engine and normalisation
//! - **mock** — In-memory object graph for demo mode and tests
//! - **service** — Aggregate facade used by the HTTP layer

pub mod types;
pub mod error;
pub mod property;
pub mod vim;
pub mod session;
pub mod inventory;
pub mod mock;
pub mod service;

#[cfg(test)]
mod fake_vcenter;

pub use error::{VcenterError, VcenterErrorKind, VcenterResult};
pub use inventory::TraversalControl;
pub use service::InventoryService;
pub use types::{InventoryKind, InventoryNode, SessionOptions, VcenterCredentials};
