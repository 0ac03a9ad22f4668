//! Ingress reconciler
//!
//! Applies the same SSO annotations as the webhook to ingresses that were
//! created before the webhook existed or while it was unavailable.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info};

use crate::annotator::SsoAnnotator;
use crate::error::IngressError;

/// Controller context
pub struct IngressContext {
    /// Annotation rules and API access
    pub annotator: SsoAnnotator,
}

/// Annotate one ingress if it needs it
pub async fn reconcile(ingress: Arc<Ingress>, ctx: Arc<IngressContext>) -> Result<Action, IngressError> {
    let Some(updated) = ctx.annotator.annotate(&ingress).await? else {
        return Ok(Action::await_change());
    };

    let namespace = ingress.namespace().unwrap_or_default();
    let name = ingress.name_any();
    let annotations = updated.annotations();
    match ctx
        .annotator
        .api()
        .patch_ingress_annotations(&namespace, &name, annotations)
        .await
        .map_err(IngressError::from)
    {
        Ok(()) => {
            info!(ingress = %name, namespace = %namespace, "applied SSO annotations");
            Ok(Action::await_change())
        }
        Err(e) if e.is_not_found() => Ok(Action::await_change()),
        Err(e) => Err(e),
    }
}

/// Log and retry shortly
pub fn error_policy(ingress: Arc<Ingress>, error: &IngressError, _ctx: Arc<IngressContext>) -> Action {
    error!(?error, ingress = %ingress.name_any(), "ingress annotation failed");
    Action::requeue(Duration::from_secs(5))
}
