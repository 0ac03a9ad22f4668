//! ClusterResourceQuota controller
//!
//! Level-triggered: every run recomputes the whole status from the live
//! ResourceQuotas in the selected namespaces, so coalesced or dropped events
//! never leave the status drifting.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use platform_common::crd::{
    ClusterResourceQuota, ClusterResourceQuotaStatus, NamespaceUsage, QuotaUsage,
};
use platform_common::resources::{self, ResourceList};
use platform_common::retry::conflict_backoff;
use platform_common::{Error, Result};

use crate::collector::{find_matching, NamespaceTotals};
use crate::store::{KubeQuotaStore, QuotaStore};

/// Default interval between full resyncs of a ClusterResourceQuota
pub const DEFAULT_RESYNC: Duration = Duration::from_secs(300);

/// Delay before retrying after a reconcile error
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Controller context
pub struct QuotaContext {
    /// Store access (trait object for testability)
    pub store: Arc<dyn QuotaStore>,
    /// Requeue interval after a successful reconcile
    pub resync: Duration,
}

impl QuotaContext {
    /// Context backed by the Kubernetes API
    pub fn new(client: kube::Client, resync: Duration) -> Self {
        Self {
            store: Arc::new(KubeQuotaStore::new(client)),
            resync,
        }
    }

    /// Context with a custom store, for tests
    pub fn for_testing(store: Arc<dyn QuotaStore>) -> Self {
        Self {
            store,
            resync: DEFAULT_RESYNC,
        }
    }
}

/// Reconcile one ClusterResourceQuota
///
/// The triggering object may be stale, so the quota is fetched again before
/// anything is computed. Losing a write race requeues after a short random
/// delay instead of failing.
#[instrument(skip(quota, ctx), fields(quota = %quota.name_any()))]
pub async fn reconcile(quota: Arc<ClusterResourceQuota>, ctx: Arc<QuotaContext>) -> Result<Action> {
    let name = quota.name_any();

    let Some(current) = ctx.store.get_cluster_quota(&name).await? else {
        debug!("ClusterResourceQuota no longer exists");
        return Ok(Action::await_change());
    };

    let matched = find_matching(ctx.store.as_ref(), &current.spec.selector, None).await?;
    let status = compute_status(
        current.status.as_ref(),
        &current.spec.hard_list()?,
        &matched.by_namespace(),
    );

    if status.total.used_list()?.has_negative() {
        return Err(Error::validation(format!(
            "refusing to record negative usage {:?}",
            status.total.used
        )));
    }

    if current.status.as_ref() == Some(&status) {
        debug!("status unchanged");
        return Ok(Action::requeue(ctx.resync));
    }

    match ctx
        .store
        .update_cluster_quota_status(&current, &status)
        .await
    {
        Ok(()) => {
            info!(
                namespaces = status.by_namespace.len(),
                "ClusterResourceQuota status updated"
            );
            Ok(Action::requeue(ctx.resync))
        }
        Err(e) if e.is_conflict() => {
            let delay = conflict_backoff();
            info!(delay_secs = delay.as_secs(), "status write conflicted, requeueing");
            Ok(Action::requeue(delay))
        }
        Err(e) if e.is_not_found() => {
            debug!("ClusterResourceQuota deleted during reconcile");
            Ok(Action::await_change())
        }
        Err(e) => Err(e),
    }
}

/// Log a failed reconcile and retry shortly
pub fn error_policy(quota: Arc<ClusterResourceQuota>, error: &Error, _ctx: Arc<QuotaContext>) -> Action {
    error!(
        ?error,
        quota = %quota.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Project the matched namespaces onto a new status
///
/// Entries for namespaces that no longer hold quotas (or are no longer
/// selected) are dropped, surviving entries are replaced in their slot and
/// new ones appended, then the list is ordered by namespace. Totals are
/// summed from the resulting entries, never adjusted incrementally.
pub fn compute_status(
    previous: Option<&ClusterResourceQuotaStatus>,
    hard: &ResourceList,
    current: &[NamespaceTotals],
) -> ClusterResourceQuotaStatus {
    let mut entries: Vec<NamespaceUsage> = previous
        .map(|s| s.by_namespace.clone())
        .unwrap_or_default();

    entries.retain(|e| current.iter().any(|c| c.namespace == e.namespace));

    let mut used_parts = Vec::with_capacity(current.len());
    for totals in current {
        let usage = QuotaUsage::from_lists(&totals.hard, &totals.used);
        match entries.iter_mut().find(|e| e.namespace == totals.namespace) {
            Some(entry) => entry.status = usage,
            None => entries.push(NamespaceUsage {
                namespace: totals.namespace.clone(),
                status: usage,
            }),
        }
        used_parts.push(&totals.used);
    }
    entries.sort_by(|a, b| a.namespace.cmp(&b.namespace));

    ClusterResourceQuotaStatus {
        total: QuotaUsage::from_lists(hard, &resources::sum(used_parts)),
        by_namespace: entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockQuotaStore;
    use crate::testing::{cluster_quota, cpu, namespace, resource_quota, FakeStore};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn team_a_store() -> Arc<FakeStore> {
        let store = Arc::new(FakeStore::new());
        store.add_namespace(namespace("ns1", &[("team", "a")]));
        store.add_namespace(namespace("ns2", &[("team", "a")]));
        store.add_namespace(namespace("other", &[("team", "b")]));
        store.add_cluster_quota(cluster_quota("q", &[("team", "a")], "2"));
        store
    }

    fn ctx(store: Arc<FakeStore>) -> Arc<QuotaContext> {
        Arc::new(QuotaContext::for_testing(store))
    }

    fn cpu_used(status: &ClusterResourceQuotaStatus) -> Option<&Quantity> {
        status.total.used.get("cpu")
    }

    fn q(value: &str) -> Quantity {
        Quantity(value.to_string())
    }

    mod status_projection {
        use super::*;

        fn totals(ns: &str, hard: &str, used: &str) -> NamespaceTotals {
            NamespaceTotals {
                namespace: ns.to_string(),
                hard: cpu(hard),
                used: cpu(used),
            }
        }

        #[test]
        fn totals_are_summed_and_hard_is_passed_through() {
            let status = compute_status(
                None,
                &cpu("2"),
                &[totals("ns1", "900m", "300m"), totals("ns2", "1", "200m")],
            );
            assert_eq!(status.total.hard.get("cpu"), Some(&q("2")));
            assert_eq!(cpu_used(&status), Some(&q("500m")));
            assert_eq!(status.by_namespace.len(), 2);
        }

        #[test]
        fn entries_are_sorted_and_unique() {
            let previous = compute_status(None, &cpu("2"), &[totals("b", "1", "1")]);
            let status = compute_status(
                Some(&previous),
                &cpu("2"),
                &[totals("c", "1", "0"), totals("a", "1", "0"), totals("b", "2", "1")],
            );
            let names: Vec<_> = status.by_namespace.iter().map(|e| e.namespace.as_str()).collect();
            assert_eq!(names, vec!["a", "b", "c"]);
            assert_eq!(status.namespace("b").unwrap().status.hard.get("cpu"), Some(&q("2")));
        }

        #[test]
        fn stale_namespace_is_removed_exactly_once() {
            let previous = compute_status(
                None,
                &cpu("2"),
                &[totals("ns1", "1", "400m"), totals("ns2", "1", "300m")],
            );
            assert_eq!(cpu_used(&previous), Some(&q("700m")));

            let after = compute_status(Some(&previous), &cpu("2"), &[totals("ns2", "1", "300m")]);
            assert!(after.namespace("ns1").is_none());
            assert_eq!(cpu_used(&after), Some(&q("300m")));

            // Feeding the result back in changes nothing
            let again = compute_status(Some(&after), &cpu("2"), &[totals("ns2", "1", "300m")]);
            assert_eq!(again, after);
        }

        #[test]
        fn no_quotas_anywhere_yields_empty_usage() {
            let status = compute_status(None, &cpu("2"), &[]);
            assert!(status.by_namespace.is_empty());
            assert!(status.total.used.is_empty());
        }
    }

    mod reconcile_loop {
        use super::*;

        #[tokio::test]
        async fn writes_aggregate_status() {
            let store = team_a_store();
            store.add_quota(resource_quota("ns1", "rq", "900m", "400m"));
            store.add_quota(resource_quota("ns2", "rq", "1", "250m"));
            store.add_quota(resource_quota("other", "rq", "8", "8"));

            let action = reconcile(Arc::new(store.cluster_quota("q")), ctx(store.clone()))
                .await
                .unwrap();
            assert_eq!(action, Action::requeue(DEFAULT_RESYNC));

            let writes = store.status_writes();
            assert_eq!(writes.len(), 1);
            let status = &writes[0].1;
            assert_eq!(cpu_used(status), Some(&q("650m")));
            assert_eq!(status.total.hard.get("cpu"), Some(&q("2")));
            assert!(status.namespace("other").is_none());
        }

        #[tokio::test]
        async fn second_run_is_idempotent() {
            let store = team_a_store();
            store.add_quota(resource_quota("ns1", "rq", "900m", "400m"));

            reconcile(Arc::new(store.cluster_quota("q")), ctx(store.clone()))
                .await
                .unwrap();
            let first = store.cluster_quota("q").status;

            reconcile(Arc::new(store.cluster_quota("q")), ctx(store.clone()))
                .await
                .unwrap();
            let second = store.cluster_quota("q").status;

            assert_eq!(first, second);
            // Unchanged status is not rewritten
            assert_eq!(store.status_writes().len(), 1);
        }

        #[tokio::test]
        async fn deleted_namespace_quota_leaves_status_once() {
            let store = team_a_store();
            store.add_quota(resource_quota("ns1", "rq", "900m", "400m"));
            store.add_quota(resource_quota("ns2", "rq", "1", "250m"));
            reconcile(Arc::new(store.cluster_quota("q")), ctx(store.clone()))
                .await
                .unwrap();
            let before = store.cluster_quota("q").status.unwrap();
            assert_eq!(cpu_used(&before), Some(&q("650m")));

            store.remove_quota("ns1", "rq");
            for _ in 0..3 {
                reconcile(Arc::new(store.cluster_quota("q")), ctx(store.clone()))
                    .await
                    .unwrap();
            }

            let after = store.cluster_quota("q").status.unwrap();
            assert!(after.namespace("ns1").is_none());
            // 650m - 400m, no matter how many runs
            assert_eq!(cpu_used(&after), Some(&q("250m")));
            assert_eq!(store.status_writes().len(), 2);
        }

        #[tokio::test]
        async fn last_quota_gone_clears_status_and_settles() {
            let store = team_a_store();
            store.add_quota(resource_quota("ns1", "rq", "1", "400m"));
            reconcile(Arc::new(store.cluster_quota("q")), ctx(store.clone()))
                .await
                .unwrap();

            store.remove_quota("ns1", "rq");
            reconcile(Arc::new(store.cluster_quota("q")), ctx(store.clone()))
                .await
                .unwrap();

            let after = store.cluster_quota("q").status.unwrap();
            assert!(after.by_namespace.is_empty());
            assert!(after.total.used.is_empty());

            // The persisted status now equals the projection, so no further writes
            for _ in 0..3 {
                reconcile(Arc::new(store.cluster_quota("q")), ctx(store.clone()))
                    .await
                    .unwrap();
            }
            assert_eq!(store.status_writes().len(), 2);
        }

        #[tokio::test]
        async fn negative_usage_is_never_written() {
            let store = team_a_store();
            store.add_quota(resource_quota("ns1", "rq", "1", "-300m"));

            let err = reconcile(Arc::new(store.cluster_quota("q")), ctx(store.clone()))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation { .. }), "{:?}", err);
            assert!(store.status_writes().is_empty());
        }

        #[tokio::test]
        async fn uses_fresh_object_not_the_trigger() {
            let store = team_a_store();
            store.add_quota(resource_quota("ns1", "rq", "1", "1"));
            let stale = store.cluster_quota("q");
            // Someone else updated the object since the event was queued
            store.bump_resource_version("q");

            let action = reconcile(Arc::new(stale), ctx(store.clone())).await.unwrap();
            assert_eq!(action, Action::requeue(DEFAULT_RESYNC));
            assert_eq!(store.status_writes().len(), 1);
        }

        #[tokio::test]
        async fn missing_quota_is_terminal() {
            let store = Arc::new(FakeStore::new());
            let ghost = cluster_quota("ghost", &[("team", "a")], "1");
            let action = reconcile(Arc::new(ghost), ctx(store)).await.unwrap();
            assert_eq!(action, Action::await_change());
        }
    }

    mod write_failures {
        use super::*;

        fn mock_reading_one_quota() -> MockQuotaStore {
            let mut store = MockQuotaStore::new();
            store
                .expect_get_cluster_quota()
                .returning(|name| Ok(Some(cluster_quota(name, &[("team", "a")], "2"))));
            store
                .expect_list_namespaces()
                .returning(|_| Ok(vec![namespace("ns1", &[("team", "a")])]));
            store
                .expect_list_resource_quotas()
                .returning(|ns| Ok(vec![resource_quota(ns, "rq", "1", "500m")]));
            store
        }

        #[tokio::test]
        async fn conflict_requeues_with_jitter_and_no_error() {
            let mut store = mock_reading_one_quota();
            store
                .expect_update_cluster_quota_status()
                .times(1)
                .returning(|q, _| Err(Error::conflict("ClusterResourceQuota", q.name_any())));
            let ctx = Arc::new(QuotaContext::for_testing(Arc::new(store)));

            let action = reconcile(Arc::new(cluster_quota("q", &[], "2")), ctx)
                .await
                .unwrap();
            let jittered: Vec<Action> = (1..=5)
                .map(|s| Action::requeue(Duration::from_secs(s)))
                .collect();
            assert!(jittered.contains(&action), "unexpected {:?}", action);
        }

        #[tokio::test]
        async fn not_found_on_write_is_terminal() {
            let mut store = mock_reading_one_quota();
            store
                .expect_update_cluster_quota_status()
                .returning(|q, _| Err(Error::not_found("ClusterResourceQuota", q.name_any())));
            let ctx = Arc::new(QuotaContext::for_testing(Arc::new(store)));

            let action = reconcile(Arc::new(cluster_quota("q", &[], "2")), ctx)
                .await
                .unwrap();
            assert_eq!(action, Action::await_change());
        }

        #[tokio::test]
        async fn other_write_errors_propagate() {
            let mut store = mock_reading_one_quota();
            store
                .expect_update_cluster_quota_status()
                .returning(|_, _| Err(Error::internal("etcd leader changed")));
            let ctx = Arc::new(QuotaContext::for_testing(Arc::new(store)));

            let quota = Arc::new(cluster_quota("q", &[], "2"));
            let err = reconcile(quota.clone(), ctx.clone()).await.unwrap_err();
            assert_eq!(error_policy(quota, &err, ctx), Action::requeue(ERROR_REQUEUE));
        }

        #[tokio::test]
        async fn listing_errors_propagate() {
            let mut store = MockQuotaStore::new();
            store
                .expect_get_cluster_quota()
                .returning(|name| Ok(Some(cluster_quota(name, &[("team", "a")], "2"))));
            store
                .expect_list_namespaces()
                .returning(|_| Err(Error::internal("watch cache not ready")));
            store.expect_update_cluster_quota_status().never();
            let ctx = Arc::new(QuotaContext::for_testing(Arc::new(store)));

            let result = reconcile(Arc::new(cluster_quota("q", &[], "2")), ctx).await;
            assert!(result.is_err());
        }
    }
}
