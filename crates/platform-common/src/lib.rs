//! Common types for the platform operator
//!
//! This crate holds everything the quota engine and its collaborators share:
//! the `ClusterResourceQuota` custom resource, exact resource quantity
//! arithmetic, namespace label selectors, the error type and telemetry setup.

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod quantity;
pub mod resources;
pub mod retry;
pub mod selector;
pub mod telemetry;

pub use error::Error;
pub use quantity::ResourceQuantity;
pub use resources::ResourceList;

/// Result type alias using our custom Error type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Field manager name used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "platform-operator";
