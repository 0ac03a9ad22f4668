//! Annotation inheritance for pods that already exist
//!
//! The webhook only sees pods at admission. These reconcilers catch pods
//! created before the operator ran and re-apply inheritance when namespace
//! annotations change.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, error, info};

use platform_common::{Error, Result, FIELD_MANAGER};

use crate::mutate::PodMutator;

/// Default interval between namespace sweeps
pub const DEFAULT_ANNOTATION_INTERVAL: Duration = Duration::from_secs(600);

/// API operations the pod reconcilers need
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodClient: Send + Sync {
    /// Fetch a namespace, `None` if it doesn't exist
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// List pods in a namespace
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;

    /// Merge annotations into a pod
    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// [`PodClient`] backed by the Kubernetes API
pub struct KubePodClient {
    client: Client,
}

impl KubePodClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "metadata": { "annotations": annotations } });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube("Pod", name, e))?;
        Ok(())
    }
}

/// Shared state for the pod and namespace reconcilers
pub struct PodContext {
    /// API access
    pub client: Arc<dyn PodClient>,
    /// Rules to apply
    pub mutator: PodMutator,
    /// Requeue interval for namespace sweeps
    pub interval: Duration,
}

impl PodContext {
    /// Create a context
    pub fn new(client: Arc<dyn PodClient>, mutator: PodMutator, interval: Duration) -> Self {
        Self {
            client,
            mutator,
            interval,
        }
    }
}

/// Inherit namespace annotations on one pod
pub async fn reconcile_pod(pod: Arc<Pod>, ctx: Arc<PodContext>) -> Result<Action> {
    let ns_name = pod.namespace().unwrap_or_default();
    let Some(ns) = ctx.client.get_namespace(&ns_name).await? else {
        // Namespace is going away along with the pod
        return Ok(Action::await_change());
    };
    sync_pod(&ctx, &ns, &pod).await?;
    Ok(Action::await_change())
}

/// Inherit namespace annotations on every pod in a namespace
pub async fn reconcile_namespace(ns: Arc<Namespace>, ctx: Arc<PodContext>) -> Result<Action> {
    let ns_name = ns.name_any();
    let pods = ctx.client.list_pods(&ns_name).await?;
    let mut updated = 0usize;
    for pod in &pods {
        if sync_pod(&ctx, &ns, pod).await? {
            updated += 1;
        }
    }
    if updated > 0 {
        info!(namespace = %ns_name, updated, "inherited namespace annotations");
    }
    Ok(Action::requeue(ctx.interval))
}

async fn sync_pod(ctx: &PodContext, ns: &Namespace, pod: &Pod) -> Result<bool> {
    let mut desired = pod.clone();
    if !ctx.mutator.inherit_annotations(ns, &mut desired) {
        debug!(pod = %pod.name_any(), "annotations up to date");
        return Ok(false);
    }
    let added: BTreeMap<String, String> = desired
        .annotations()
        .iter()
        .filter(|(k, _)| !pod.annotations().contains_key(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let namespace = pod.namespace().unwrap_or_default();
    match ctx
        .client
        .patch_pod_annotations(&namespace, &pod.name_any(), &added)
        .await
    {
        Ok(()) => Ok(true),
        // Pod finished and was deleted in between
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Log and retry shortly
pub fn error_policy<K: ResourceExt>(obj: Arc<K>, error: &Error, _ctx: Arc<PodContext>) -> Action {
    error!(?error, object = %obj.name_any(), "annotation reconciliation failed");
    Action::requeue(Duration::from_secs(5))
}
