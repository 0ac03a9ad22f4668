//! Controller runner - builds controller futures for each feature
//!
//! Each `build_*` function returns a Vec of boxed futures that can be composed
//! by the caller. This keeps controller construction pure and testable.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod, ResourceQuota};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use platform_cleanup::{CleanupContext, KubeNamespaceApi};
use platform_common::crd::ClusterResourceQuota;
use platform_ingress::{IngressContext, KubeIngressApi, SsoAnnotator};
use platform_pod::{KubePodClient, PodContext, PodMutator};
use platform_quota::QuotaContext;

use crate::config::OperatorConfig;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller future ready to be polled
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Every ClusterResourceQuota currently known, as reconcile requests
///
/// A ResourceQuota or Namespace event can change the totals of whichever
/// ClusterResourceQuota selects it, and the selection itself may be what
/// changed, so every quota is re-evaluated.
fn all_cluster_quotas(store: &Store<ClusterResourceQuota>) -> Vec<ObjectRef<ClusterResourceQuota>> {
    store
        .state()
        .iter()
        .map(|quota| ObjectRef::from_obj(quota.as_ref()))
        .collect()
}

/// Build the ClusterResourceQuota controller
pub fn build_quota_controllers(client: Client, config: &OperatorConfig) -> Vec<ControllerFuture> {
    let ctx = Arc::new(QuotaContext::new(client.clone(), config.quota_resync()));
    let quotas: Api<ClusterResourceQuota> = Api::all(client.clone());
    let resource_quotas: Api<ResourceQuota> = Api::all(client.clone());
    let namespaces: Api<Namespace> = Api::all(client);

    let controller = Controller::new(quotas, watcher_config());
    let store_for_quotas = controller.store();
    let store_for_namespaces = controller.store();

    tracing::info!("- ClusterResourceQuota controller");

    vec![Box::pin(
        controller
            .watches(resource_quotas, watcher_config(), move |_rq| {
                all_cluster_quotas(&store_for_quotas)
            })
            .watches(namespaces, watcher_config(), move |_ns| {
                all_cluster_quotas(&store_for_namespaces)
            })
            .shutdown_on_signal()
            .run(platform_quota::reconcile, platform_quota::error_policy, ctx)
            .for_each(log_reconcile_result("ClusterResourceQuota")),
    )]
}

/// Build the pod and namespace annotation controllers
pub fn build_pod_controllers(
    client: Client,
    mutator: PodMutator,
    config: &OperatorConfig,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(PodContext::new(
        Arc::new(KubePodClient::new(client.clone())),
        mutator,
        config.annotation_interval(),
    ));
    let pods: Api<Pod> = Api::all(client.clone());
    let namespaces: Api<Namespace> = Api::all(client);

    let pod_ctrl = Controller::new(pods, watcher_config())
        .shutdown_on_signal()
        .run(
            platform_pod::reconcile_pod,
            platform_pod::error_policy,
            ctx.clone(),
        )
        .for_each(log_reconcile_result("Pod"));

    let ns_ctrl = Controller::new(namespaces, watcher_config())
        .shutdown_on_signal()
        .run(
            platform_pod::reconcile_namespace,
            platform_pod::error_policy,
            ctx,
        )
        .for_each(log_reconcile_result("NamespaceAnnotations"));

    tracing::info!("- Pod annotation controller");
    tracing::info!("- Namespace annotation controller");

    vec![Box::pin(pod_ctrl), Box::pin(ns_ctrl)]
}

/// Build the ingress SSO controller
pub fn build_ingress_controllers(client: Client, config: &OperatorConfig) -> Vec<ControllerFuture> {
    let ctx = Arc::new(IngressContext {
        annotator: SsoAnnotator::new(
            Arc::new(KubeIngressApi::new(client.clone())),
            config.sso_config(),
        ),
    });
    let ingresses: Api<Ingress> = Api::all(client);

    tracing::info!("- Ingress SSO controller");

    vec![Box::pin(
        Controller::new(ingresses, watcher_config())
            .shutdown_on_signal()
            .run(platform_ingress::reconcile, platform_ingress::error_policy, ctx)
            .for_each(log_reconcile_result("Ingress")),
    )]
}

/// Build the namespace cleanup controller
pub fn build_cleanup_controllers(client: Client, config: &OperatorConfig) -> Vec<ControllerFuture> {
    let ctx = Arc::new(CleanupContext {
        api: Arc::new(KubeNamespaceApi::new(client.clone())),
        interval: config.cleanup_interval(),
    });
    let namespaces: Api<Namespace> = Api::all(client);

    tracing::info!("- Namespace cleanup controller");

    vec![Box::pin(
        Controller::new(namespaces, watcher_config())
            .shutdown_on_signal()
            .run(platform_cleanup::reconcile, platform_cleanup::error_policy, ctx)
            .for_each(log_reconcile_result("NamespaceCleanup")),
    )]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::runtime::reflector::store::Writer;
    use kube::runtime::watcher::Event;

    fn quota(name: &str) -> ClusterResourceQuota {
        let mut q = ClusterResourceQuota::new(name, Default::default());
        q.metadata.resource_version = Some("1".to_string());
        q
    }

    #[test]
    fn every_known_quota_is_requeued() {
        let mut writer: Writer<ClusterResourceQuota> = Writer::default();
        writer.apply_watcher_event(&Event::Apply(quota("team-a")));
        writer.apply_watcher_event(&Event::Apply(quota("team-b")));
        let store = writer.as_reader();

        let mut names: Vec<String> = all_cluster_quotas(&store)
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["team-a", "team-b"]);
    }

    #[test]
    fn empty_store_requeues_nothing() {
        let writer: Writer<ClusterResourceQuota> = Writer::default();
        assert!(all_cluster_quotas(&writer.as_reader()).is_empty());
    }
}
