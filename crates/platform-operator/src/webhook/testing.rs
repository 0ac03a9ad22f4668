//! In-memory collaborators for webhook tests

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, ResourceQuota, Service};
use kube::ResourceExt;
use serde_json::{json, Value};

use platform_common::crd::{ClusterResourceQuota, ClusterResourceQuotaStatus};
use platform_common::selector::NamespaceSelector;
use platform_common::{Error, Result};
use platform_ingress::IngressApi;
use platform_pod::PodClient;
use platform_quota::{QuotaAdmission, QuotaStore};

use super::WebhookState;

#[derive(Default)]
struct Objects {
    namespaces: Vec<Namespace>,
    quotas: Vec<ResourceQuota>,
    cluster_quotas: Vec<ClusterResourceQuota>,
    services: Vec<Service>,
}

/// Cluster state held in memory
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<Objects>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(self, name: &str, labels: &[(&str, &str)]) -> Self {
        let ns: Namespace = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name, "labels": to_map(labels) },
        }))
        .unwrap();
        self.objects.lock().unwrap().namespaces.push(ns);
        self
    }

    pub fn with_quota(self, namespace: &str, name: &str, hard_cpu: &str) -> Self {
        let rq: ResourceQuota =
            serde_json::from_value(resource_quota_json(namespace, name, hard_cpu)).unwrap();
        self.objects.lock().unwrap().quotas.push(rq);
        self
    }

    pub fn with_cluster_quota(self, name: &str, labels: &[(&str, &str)], hard_cpu: &str) -> Self {
        let crq: ClusterResourceQuota =
            serde_json::from_value(cluster_quota_json(name, labels, hard_cpu)).unwrap();
        self.objects.lock().unwrap().cluster_quotas.push(crq);
        self
    }

    pub fn with_service(self, namespace: &str, name: &str, cluster_ip: &str) -> Self {
        let svc: Service = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": name, "namespace": namespace },
            "spec": { "clusterIP": cluster_ip },
        }))
        .unwrap();
        self.objects.lock().unwrap().services.push(svc);
        self
    }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn get_cluster_quota(&self, name: &str) -> Result<Option<ClusterResourceQuota>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects.cluster_quotas.iter().find(|q| q.name_any() == name).cloned())
    }

    async fn list_cluster_quotas(&self) -> Result<Vec<ClusterResourceQuota>> {
        Ok(self.objects.lock().unwrap().cluster_quotas.clone())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects.namespaces.iter().find(|ns| ns.name_any() == name).cloned())
    }

    async fn list_namespaces(&self, selector: &NamespaceSelector) -> Result<Vec<Namespace>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .namespaces
            .iter()
            .filter(|ns| selector.matches(ns.labels()))
            .cloned()
            .collect())
    }

    async fn list_resource_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .quotas
            .iter()
            .filter(|rq| rq.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn update_cluster_quota_status(
        &self,
        quota: &ClusterResourceQuota,
        _status: &ClusterResourceQuotaStatus,
    ) -> Result<()> {
        Err(Error::internal(format!(
            "unexpected status write for {}",
            quota.name_any()
        )))
    }
}

#[async_trait]
impl PodClient for MemoryStore {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        QuotaStore::get_namespace(self, name).await
    }

    async fn list_pods(&self, _namespace: &str) -> Result<Vec<Pod>> {
        Ok(Vec::new())
    }

    async fn patch_pod_annotations(
        &self,
        _namespace: &str,
        name: &str,
        _annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        Err(Error::internal(format!("unexpected pod patch for {}", name)))
    }
}

#[async_trait]
impl IngressApi for MemoryStore {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .services
            .iter()
            .find(|s| s.name_any() == name && s.namespace().as_deref() == Some(namespace))
            .cloned())
    }

    async fn patch_ingress_annotations(
        &self,
        _namespace: &str,
        name: &str,
        _annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        Err(Error::internal(format!("unexpected ingress patch for {}", name)))
    }
}

/// Webhook state serving only the quota routes
pub fn quota_state(store: MemoryStore, validation: bool) -> Arc<WebhookState> {
    let admission = QuotaAdmission::with_options(
        Arc::new(store),
        validation,
        platform_quota::admission::DEFAULT_PENDING_TTL,
    );
    Arc::new(WebhookState {
        quota: Arc::new(admission),
        serve_quota: true,
        pods: None,
        sso: None,
    })
}

pub fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn resource_quota_json(namespace: &str, name: &str, hard_cpu: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ResourceQuota",
        "metadata": { "name": name, "namespace": namespace },
        "spec": { "hard": { "cpu": hard_cpu } },
    })
}

pub fn cluster_quota_json(name: &str, labels: &[(&str, &str)], hard_cpu: &str) -> Value {
    json!({
        "apiVersion": "platform.dev/v1",
        "kind": "ClusterResourceQuota",
        "metadata": { "name": name, "resourceVersion": "1" },
        "spec": {
            "matchLabels": to_map(labels),
            "hard": { "cpu": hard_cpu },
        },
    })
}

/// An AdmissionReview body for `object`
pub fn review(operation: &str, kind: (&str, &str, &str), namespace: Option<&str>, object: Option<Value>) -> String {
    let (group, version, kind) = kind;
    let mut request = json!({
        "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
        "kind": { "group": group, "version": version, "kind": kind },
        "resource": { "group": group, "version": version, "resource": format!("{}s", kind.to_lowercase()) },
        "operation": operation,
        "userInfo": { "username": "alice" },
        "dryRun": false,
    });
    if let Some(ns) = namespace {
        request["namespace"] = json!(ns);
    }
    if let Some(obj) = object {
        request["object"] = obj;
    }
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": request,
    })
    .to_string()
}
