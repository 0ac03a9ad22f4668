use k8s_openapi::api::core::v1::ResourceQuota;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use platform_common::crd::ClusterResourceQuota;
use platform_common::resources::{self, ResourceList};
use platform_common::{Error, Result};

use super::{violations, Decision, QuotaAdmission};
use crate::collector::{find_matching, QuotaId};

impl QuotaAdmission {
    /// Decide a create/update of a ResourceQuota
    ///
    /// Allowed outright when no ClusterResourceQuota selects the namespace.
    /// Denied when the namespace is selected by more than one, or when the
    /// summed hard limits with this quota in place would exceed the owner's
    /// ceiling. A missing namespace is [`Error::NotFound`]. A `dry_run`
    /// request is decided the same way but reserves nothing.
    pub async fn review_resource_quota(&self, rq: &ResourceQuota, dry_run: bool) -> Result<Decision> {
        if !self.enabled {
            return Ok(Decision::Allow);
        }
        let id = QuotaId::of(rq);

        let ns = self
            .store
            .get_namespace(&id.namespace)
            .await?
            .ok_or_else(|| Error::not_found("Namespace", &id.namespace))?;

        let quotas = self.store.list_cluster_quotas().await?;
        let owners: Vec<&ClusterResourceQuota> = quotas
            .iter()
            .filter(|q| q.spec.selector.matches(ns.labels()))
            .collect();

        let owner_name = match owners.as_slice() {
            [] => {
                debug!(quota = %id, "no ClusterResourceQuota selects namespace, allowing");
                return Ok(Decision::Allow);
            }
            [owner] => owner.name_any(),
            many => {
                let mut names: Vec<String> = many.iter().map(|q| q.name_any()).collect();
                names.sort();
                warn!(namespace = %id.namespace, owners = ?names, "namespace selected by several ClusterResourceQuotas");
                return Ok(Decision::Deny(format!(
                    "namespace {} matches multiple ClusterResourceQuotas ({}); fix the selectors",
                    id.namespace,
                    names.join(", ")
                )));
            }
        };

        let proposed = ResourceList::from_k8s_opt(rq.spec.as_ref().and_then(|s| s.hard.as_ref()))?;

        let _guard = self.locks.lock(&owner_name).await;

        // The owner may have been updated or removed while we waited
        let Some(owner) = self.store.get_cluster_quota(&owner_name).await? else {
            debug!(quota = %id, cluster_quota = %owner_name, "ClusterResourceQuota gone, allowing");
            return Ok(Decision::Allow);
        };
        let limit = self
            .pending
            .effective_ceiling(&owner_name, &owner.spec.hard_list()?);

        // Everything else under the owner, read fresh, plus this quota's new value
        let mut matched =
            find_matching(self.store.as_ref(), &owner.spec.selector, Some(&id)).await?;
        let others = self.committed_hard(&mut matched, Some(&id));
        let total = resources::add(&others, &proposed);

        if let Some(detail) = violations(&total, &limit) {
            info!(quota = %id, cluster_quota = %owner_name, %detail, "denying ResourceQuota over cluster ceiling");
            return Ok(Decision::Deny(format!(
                "ResourceQuota/{} would exceed ClusterResourceQuota/{}: {}",
                id, owner_name, detail
            )));
        }

        if dry_run {
            debug!(quota = %id, cluster_quota = %owner_name, "ResourceQuota admitted (dry run)");
        } else {
            self.pending.record(id.clone(), proposed);
            debug!(quota = %id, cluster_quota = %owner_name, "ResourceQuota admitted");
        }
        Ok(Decision::Allow)
    }
}
