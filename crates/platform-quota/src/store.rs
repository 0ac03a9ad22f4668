//! Store access for the quota engine
//!
//! Every read the collector, reconciler and validators make goes through
//! [`QuotaStore`], so tests can swap the API server for a mock or an
//! in-memory double.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, ResourceQuota};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use platform_common::crd::{ClusterResourceQuota, ClusterResourceQuotaStatus};
use platform_common::selector::NamespaceSelector;
use platform_common::{Error, Result, FIELD_MANAGER};

const CRQ_KIND: &str = "ClusterResourceQuota";

/// Read and status-update operations used by the quota engine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Fetch a ClusterResourceQuota by name, `None` if it doesn't exist
    async fn get_cluster_quota(&self, name: &str) -> Result<Option<ClusterResourceQuota>>;

    /// List every ClusterResourceQuota
    async fn list_cluster_quotas(&self) -> Result<Vec<ClusterResourceQuota>>;

    /// Fetch a namespace by name, `None` if it doesn't exist
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// List namespaces matched by a selector
    async fn list_namespaces(&self, selector: &NamespaceSelector) -> Result<Vec<Namespace>>;

    /// List the ResourceQuotas in one namespace
    async fn list_resource_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>>;

    /// Replace the status of a ClusterResourceQuota
    ///
    /// Guarded by the quota's `resourceVersion`: a concurrent writer yields
    /// [`Error::Conflict`], a deleted quota [`Error::NotFound`].
    async fn update_cluster_quota_status(
        &self,
        quota: &ClusterResourceQuota,
        status: &ClusterResourceQuotaStatus,
    ) -> Result<()>;
}

/// [`QuotaStore`] backed by the Kubernetes API
pub struct KubeQuotaStore {
    client: Client,
}

impl KubeQuotaStore {
    /// Create a store on top of a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QuotaStore for KubeQuotaStore {
    async fn get_cluster_quota(&self, name: &str) -> Result<Option<ClusterResourceQuota>> {
        let api: Api<ClusterResourceQuota> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_cluster_quotas(&self) -> Result<Vec<ClusterResourceQuota>> {
        let api: Api<ClusterResourceQuota> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_namespaces(&self, selector: &NamespaceSelector) -> Result<Vec<Namespace>> {
        let query = selector.to_query()?;
        let mut params = ListParams::default();
        if !query.is_empty() {
            params = params.labels(&query);
        }
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&params).await?.items)
    }

    async fn list_resource_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>> {
        let api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn update_cluster_quota_status(
        &self,
        quota: &ClusterResourceQuota,
        status: &ClusterResourceQuotaStatus,
    ) -> Result<()> {
        let name = quota.name_any();
        let api: Api<ClusterResourceQuota> = Api::all(self.client.clone());

        let patch = status_patch(quota, status)?;
        api.patch_status(
            &name,
            &PatchParams {
                field_manager: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            },
            &Patch::<()>::Json(patch),
        )
        .await
        .map_err(|e| Error::from_kube(CRQ_KIND, &name, e))?;

        debug!(quota = %name, "updated ClusterResourceQuota status");
        Ok(())
    }
}

/// JSON patch that swaps in `status` as a whole
///
/// A merge patch would keep namespaces and resources the new status leaves
/// out, so the whole `status` member is replaced instead. Pinning
/// `resourceVersion` to the observed value makes the API server answer 409
/// if anyone wrote the object since it was read.
pub fn status_patch(
    quota: &ClusterResourceQuota,
    status: &ClusterResourceQuotaStatus,
) -> Result<json_patch::Patch> {
    let ops = serde_json::json!([
        { "op": "replace", "path": "/metadata/resourceVersion", "value": quota.resource_version() },
        { "op": "add", "path": "/status", "value": status },
    ]);
    serde_json::from_value(ops).map_err(|e| Error::serialization_for_kind(CRQ_KIND, e.to_string()))
}
