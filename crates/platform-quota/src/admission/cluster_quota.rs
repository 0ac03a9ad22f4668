use kube::ResourceExt;
use tracing::{debug, info};

use platform_common::crd::ClusterResourceQuota;
use platform_common::{Error, Result};

use super::{violations, Decision, QuotaAdmission};
use crate::collector::find_matching;

impl QuotaAdmission {
    /// Decide a create/update of a ClusterResourceQuota
    ///
    /// Denied when the ResourceQuotas it would select already commit more
    /// than the proposed ceiling, or when its selector or limits are
    /// malformed. An admitted ceiling is enforced on ResourceQuota decisions
    /// until the store shows it, unless the request is a `dry_run`.
    pub async fn review_cluster_quota(&self, quota: &ClusterResourceQuota, dry_run: bool) -> Result<Decision> {
        if !self.enabled {
            return Ok(Decision::Allow);
        }
        let name = quota.name_any();

        if let Err(e) = quota.spec.selector.validate() {
            return Ok(Decision::Deny(format!(
                "invalid selector on ClusterResourceQuota/{}: {}",
                name, e
            )));
        }
        let limit = match quota.spec.hard_list() {
            Ok(limit) => limit,
            Err(e @ Error::InvalidQuantity { .. }) => {
                return Ok(Decision::Deny(format!(
                    "invalid hard limits on ClusterResourceQuota/{}: {}",
                    name, e
                )));
            }
            Err(e) => return Err(e),
        };

        let _guard = self.locks.lock(&name).await;

        let mut matched = find_matching(self.store.as_ref(), &quota.spec.selector, None).await?;
        let committed = self.committed_hard(&mut matched, None);

        match violations(&committed, &limit) {
            Some(detail) => {
                info!(quota = %name, %detail, "denying ClusterResourceQuota below current usage");
                Ok(Decision::Deny(format!(
                    "cannot update ClusterResourceQuota/{}, it would be below current usage: {}",
                    name, detail
                )))
            }
            None => {
                if !dry_run {
                    self.pending.record_ceiling(&name, limit);
                }
                debug!(quota = %name, namespaces = matched.namespaces.len(), dry_run, "ClusterResourceQuota admitted");
                Ok(Decision::Allow)
            }
        }
    }
}
