//! Namespace garbage collection
//!
//! Namespaces labelled `auto-delete=<lifetime>` (`90m`, `24h`, `7d`) are
//! deleted once that much time has passed since their creation.

pub mod controller;
pub mod duration;
pub mod error;

pub use controller::{error_policy, reconcile, CleanupContext, KubeNamespaceApi, NamespaceApi};
pub use duration::parse_lifetime;
pub use error::CleanupError;

/// Label carrying a namespace's lifetime
pub const AUTO_DELETE_LABEL: &str = "auto-delete";
