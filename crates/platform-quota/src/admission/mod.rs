//! Admission gates for quota writes
//!
//! Two gates share one [`QuotaAdmission`]:
//!
//! - a ClusterResourceQuota may not be set below the hard limits already
//!   committed by the ResourceQuotas it selects
//! - a ResourceQuota may not push the summed hard limits of its owning
//!   ClusterResourceQuota over the ceiling
//!
//! Each decision is a read-then-decide sequence over live listings. To keep
//! two concurrent requests from both seeing the old aggregate, decisions for
//! the same ClusterResourceQuota run under a per-quota lock, and every
//! admitted ResourceQuota is remembered in a short-lived ledger until the
//! API server has persisted it.

mod cluster_quota;
mod ledger;
mod lock;
mod namespace_quota;

use std::sync::Arc;
use std::time::Duration;

use platform_common::resources::{self, ResourceList};

use crate::collector::{MatchedQuotas, QuotaId};
use crate::store::QuotaStore;

pub use ledger::PendingAdmissions;
pub use lock::KeyedLock;

/// How long an admitted ResourceQuota counts before the store shows it
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(30);

/// Outcome of an admission check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Let the write through
    Allow,
    /// Reject the write with a reason for the requester
    Deny(String),
}

impl Decision {
    /// True for [`Decision::Allow`]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Shared state for both quota gates
pub struct QuotaAdmission {
    store: Arc<dyn QuotaStore>,
    enabled: bool,
    locks: KeyedLock,
    pending: PendingAdmissions,
}

impl QuotaAdmission {
    /// Gates that validate every request
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self::with_options(store, true, DEFAULT_PENDING_TTL)
    }

    /// Gates with explicit settings
    ///
    /// With `enabled == false` every request is allowed without reading the
    /// store.
    pub fn with_options(store: Arc<dyn QuotaStore>, enabled: bool, pending_ttl: Duration) -> Self {
        Self {
            store,
            enabled,
            locks: KeyedLock::new(),
            pending: PendingAdmissions::new(pending_ttl),
        }
    }

    /// Sum of `hard` over matched quotas plus admitted-but-unpersisted ones
    ///
    /// Must be called while holding the lock for the owning quota.
    fn committed_hard(&self, matched: &mut MatchedQuotas, skip: Option<&QuotaId>) -> ResourceList {
        self.pending.reconcile_with(matched);
        for (id, hard) in self.pending.snapshot() {
            if skip != Some(&id) {
                matched.upsert_hard(&id, &hard);
            }
        }
        matched.total_hard()
    }
}

/// Render `name(actual > limit)` for each exceeded resource
fn violations(actual: &ResourceList, limit: &ResourceList) -> Option<String> {
    let (exceeds, names) = resources::greater_than(actual, limit);
    exceeds.then(|| resources::describe_violations(actual, limit, &names))
}
