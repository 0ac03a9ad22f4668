//! Hierarchical resource quota engine
//!
//! A `ClusterResourceQuota` caps the summed hard limits of the ResourceQuotas
//! in every namespace its selector matches. This crate holds the pieces that
//! enforce and report that cap:
//!
//! - [`store`]: the read/update surface against the API server
//! - [`collector`]: lists matched namespaces and sums their quotas
//! - [`controller`]: recomputes `status` from live quotas
//! - [`admission`]: allow/deny gates for quota writes

pub mod admission;
pub mod collector;
pub mod controller;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use admission::{Decision, QuotaAdmission};
pub use collector::{find_matching, MatchedQuotas, QuotaId};
pub use controller::{error_policy, reconcile, QuotaContext};
pub use store::{KubeQuotaStore, QuotaStore};
