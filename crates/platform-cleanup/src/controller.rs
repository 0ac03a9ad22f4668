//! Namespace cleanup controller

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::DeleteParams;
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, error, info};

use platform_common::Error;

use crate::duration::parse_lifetime;
use crate::error::CleanupError;
use crate::AUTO_DELETE_LABEL;

/// Default interval between checks of a labelled namespace
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

/// API operations the cleanup controller needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NamespaceApi: Send + Sync {
    /// Delete a namespace
    async fn delete_namespace(&self, name: &str) -> Result<(), Error>;
}

/// [`NamespaceApi`] backed by the Kubernetes API
pub struct KubeNamespaceApi {
    client: Client,
}

impl KubeNamespaceApi {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NamespaceApi for KubeNamespaceApi {
    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube("Namespace", name, e))?;
        Ok(())
    }
}

/// Controller context
pub struct CleanupContext {
    /// API access
    pub api: Arc<dyn NamespaceApi>,
    /// Longest wait between checks
    pub interval: Duration,
}

/// What to do with a namespace right now
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    /// Not managed by cleanup
    Ignore,
    /// Lifetime is over
    Delete,
    /// Check again after this long
    Wait(Duration),
}

fn evaluate(ns: &Namespace, now: DateTime<Utc>) -> Result<Verdict, CleanupError> {
    let is_terminating = ns
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Terminating");
    if is_terminating || ns.metadata.deletion_timestamp.is_some() {
        return Ok(Verdict::Ignore);
    }

    let Some(value) = ns.labels().get(AUTO_DELETE_LABEL).filter(|v| !v.is_empty()) else {
        return Ok(Verdict::Ignore);
    };
    let lifetime = parse_lifetime(value).map_err(|message| CleanupError::InvalidLifetime {
        namespace: ns.name_any(),
        value: value.clone(),
        message,
    })?;
    let Some(created) = ns.metadata.creation_timestamp.as_ref() else {
        return Ok(Verdict::Ignore);
    };

    let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::MAX);
    let expires_at = created.0.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC);
    if expires_at <= now {
        Ok(Verdict::Delete)
    } else {
        Ok(Verdict::Wait((expires_at - now).to_std().unwrap_or_default()))
    }
}

/// Delete the namespace if its lifetime is over, otherwise wake up in time
pub async fn reconcile(ns: Arc<Namespace>, ctx: Arc<CleanupContext>) -> Result<Action, CleanupError> {
    let name = ns.name_any();
    match evaluate(&ns, Utc::now())? {
        Verdict::Ignore => Ok(Action::await_change()),
        Verdict::Wait(remaining) => {
            debug!(namespace = %name, remaining_secs = remaining.as_secs(), "namespace not expired yet");
            // Wake up at expiry, but not later than the regular interval
            Ok(Action::requeue(remaining.min(ctx.interval)))
        }
        Verdict::Delete => {
            info!(namespace = %name, "deleting expired namespace");
            match ctx.api.delete_namespace(&name).await {
                Ok(()) => Ok(Action::await_change()),
                Err(e) if e.is_not_found() => Ok(Action::await_change()),
                Err(e) => Err(e.into()),
            }
        }
    }
}

/// Log and retry after the regular interval
pub fn error_policy(ns: Arc<Namespace>, error: &CleanupError, ctx: Arc<CleanupContext>) -> Action {
    error!(?error, namespace = %ns.name_any(), "namespace cleanup failed");
    Action::requeue(ctx.interval)
}
