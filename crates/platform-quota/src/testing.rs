//! In-memory store and fixtures for tests

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, ResourceQuota, ResourceQuotaSpec, ResourceQuotaStatus};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use platform_common::crd::{ClusterResourceQuota, ClusterResourceQuotaSpec, ClusterResourceQuotaStatus};
use platform_common::resources::ResourceList;
use platform_common::selector::NamespaceSelector;
use platform_common::{Error, Result};

use crate::store::{status_patch, QuotaStore};

/// A ResourceList holding only cpu
pub fn cpu(value: &str) -> ResourceList {
    ResourceList::new().with("cpu", value.parse().unwrap())
}

fn cpu_map(value: &str) -> BTreeMap<String, Quantity> {
    [("cpu".to_string(), Quantity(value.to_string()))]
        .into_iter()
        .collect()
}

pub fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn resource_quota(ns: &str, name: &str, hard_cpu: &str, used_cpu: &str) -> ResourceQuota {
    ResourceQuota {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        spec: Some(ResourceQuotaSpec {
            hard: Some(cpu_map(hard_cpu)),
            ..Default::default()
        }),
        status: Some(ResourceQuotaStatus {
            hard: Some(cpu_map(hard_cpu)),
            used: Some(cpu_map(used_cpu)),
        }),
    }
}

pub fn cluster_quota(name: &str, labels: &[(&str, &str)], hard_cpu: &str) -> ClusterResourceQuota {
    let mut crq = ClusterResourceQuota::new(
        name,
        ClusterResourceQuotaSpec {
            selector: NamespaceSelector::from_labels(labels.iter().copied()),
            hard: cpu_map(hard_cpu),
        },
    );
    crq.metadata.resource_version = Some("1".to_string());
    crq
}

#[derive(Default)]
struct State {
    namespaces: Vec<Namespace>,
    quotas: Vec<ResourceQuota>,
    cluster_quotas: Vec<ClusterResourceQuota>,
    status_writes: Vec<(String, ClusterResourceQuotaStatus)>,
    resource_version: u64,
}

/// A [`QuotaStore`] over in-memory objects
///
/// Status updates honour `resourceVersion` like the API server does, and every
/// call yields to the runtime so concurrent tasks interleave.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                resource_version: 1,
                ..Default::default()
            }),
        }
    }

    pub fn add_namespace(&self, ns: Namespace) {
        self.state.lock().unwrap().namespaces.push(ns);
    }

    pub fn add_quota(&self, rq: ResourceQuota) {
        let mut state = self.state.lock().unwrap();
        state.quotas.retain(|q| !(q.namespace() == rq.namespace() && q.name_any() == rq.name_any()));
        state.quotas.push(rq);
    }

    pub fn remove_quota(&self, ns: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .quotas
            .retain(|q| !(q.namespace().as_deref() == Some(ns) && q.name_any() == name));
    }

    pub fn add_cluster_quota(&self, crq: ClusterResourceQuota) {
        self.state.lock().unwrap().cluster_quotas.push(crq);
    }

    pub fn cluster_quota(&self, name: &str) -> ClusterResourceQuota {
        self.state
            .lock()
            .unwrap()
            .cluster_quotas
            .iter()
            .find(|c| c.name_any() == name)
            .cloned()
            .unwrap()
    }

    /// Simulate another writer touching the object
    pub fn bump_resource_version(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.resource_version += 1;
        let rv = state.resource_version.to_string();
        if let Some(crq) = state.cluster_quotas.iter_mut().find(|c| c.name_any() == name) {
            crq.metadata.resource_version = Some(rv);
        }
    }

    pub fn status_writes(&self) -> Vec<(String, ClusterResourceQuotaStatus)> {
        self.state.lock().unwrap().status_writes.clone()
    }
}

#[async_trait]
impl QuotaStore for FakeStore {
    async fn get_cluster_quota(&self, name: &str) -> Result<Option<ClusterResourceQuota>> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        Ok(state.cluster_quotas.iter().find(|c| c.name_any() == name).cloned())
    }

    async fn list_cluster_quotas(&self) -> Result<Vec<ClusterResourceQuota>> {
        tokio::task::yield_now().await;
        Ok(self.state.lock().unwrap().cluster_quotas.clone())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        Ok(state.namespaces.iter().find(|n| n.name_any() == name).cloned())
    }

    async fn list_namespaces(&self, selector: &NamespaceSelector) -> Result<Vec<Namespace>> {
        tokio::task::yield_now().await;
        selector.validate()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .namespaces
            .iter()
            .filter(|n| selector.matches(n.labels()))
            .cloned()
            .collect())
    }

    async fn list_resource_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        Ok(state
            .quotas
            .iter()
            .filter(|q| q.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn update_cluster_quota_status(
        &self,
        quota: &ClusterResourceQuota,
        status: &ClusterResourceQuotaStatus,
    ) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        let name = quota.name_any();
        state.resource_version += 1;
        let next_rv = state.resource_version.to_string();

        let stored = state
            .cluster_quotas
            .iter_mut()
            .find(|c| c.name_any() == name)
            .ok_or_else(|| Error::not_found("ClusterResourceQuota", &name))?;
        if stored.metadata.resource_version != quota.metadata.resource_version {
            return Err(Error::conflict("ClusterResourceQuota", &name));
        }
        // Persist through the same patch body the API server receives
        let mut doc = serde_json::to_value(&*stored).map_err(|e| Error::serialization(e.to_string()))?;
        json_patch::patch(&mut doc, &status_patch(quota, status)?)
            .map_err(|e| Error::internal(e.to_string()))?;
        *stored = serde_json::from_value(doc).map_err(|e| Error::serialization(e.to_string()))?;
        stored.metadata.resource_version = Some(next_rv);
        let persisted = stored.status.clone().unwrap_or_default();
        state.status_writes.push((name, persisted));
        Ok(())
    }
}
