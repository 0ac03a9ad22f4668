//! Admission webhook server
//!
//! Validating webhooks guard ClusterResourceQuota and ResourceQuota writes;
//! mutating webhooks rewrite pods and annotate ingresses. All of them share
//! one axum router behind one listener.

mod error;
mod ingress;
mod pod;
mod quota;

#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use platform_ingress::SsoAnnotator;
use platform_pod::{PodClient, PodMutator};
use platform_quota::QuotaAdmission;

pub use error::WebhookError;

/// Pod mutation rules plus the namespace lookup they need
pub struct PodWebhook {
    /// Rules to apply
    pub mutator: PodMutator,
    /// Namespace access
    pub client: Arc<dyn PodClient>,
}

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Quota gates; built in disabled mode when validation is off
    pub quota: Arc<QuotaAdmission>,
    /// Whether the quota routes are served at all
    pub serve_quota: bool,
    /// Pod mutation, `None` when disabled
    pub pods: Option<PodWebhook>,
    /// Ingress SSO annotation, `None` when disabled
    pub sso: Option<SsoAnnotator>,
}

/// Build the webhook router
pub fn router(state: Arc<WebhookState>) -> Router {
    let mut app: Router<Arc<WebhookState>> = Router::new().route("/healthz", get(|| async { "ok" }));

    if state.serve_quota {
        app = app
            .route(
                "/validate-clusterresourcequota",
                post(quota::validate_cluster_quota_handler),
            )
            .route(
                "/validate-resourcequota",
                post(quota::validate_resource_quota_handler),
            );
    }
    if state.pods.is_some() {
        app = app.route("/mutate-v1-pod", post(pod::mutate_handler));
    }
    if state.sso.is_some() {
        app = app.route("/mutate-v1-ingress", post(ingress::mutate_handler));
    }

    app.with_state(state)
}

/// Serve the router until the process is told to stop
///
/// HTTPS when a certificate and key are given, plain HTTP otherwise.
pub async fn serve(
    addr: SocketAddr,
    tls: Option<(&Path, &Path)>,
    app: Router,
) -> anyhow::Result<()> {
    match tls {
        Some((cert, key)) => {
            let tls_config = RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| anyhow::anyhow!("TLS config error: {}", e))?;
            info!(%addr, "Starting webhook server (HTTPS)");
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .map_err(|e| anyhow::anyhow!("webhook server error: {}", e))?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| anyhow::anyhow!("failed to bind webhook server to {}: {}", addr, e))?;
            info!(%addr, "Starting webhook server (HTTP)");
            axum::serve(listener, app)
                .await
                .map_err(|e| anyhow::anyhow!("webhook server error: {}", e))?;
        }
    }
    Ok(())
}

/// Unwrap the request from a review body
fn parse_review(
    body: Result<Json<AdmissionReview<DynamicObject>>, JsonRejection>,
) -> Result<AdmissionRequest<DynamicObject>, WebhookError> {
    let Json(review) = body.map_err(|e| WebhookError::InvalidReview(e.body_text()))?;
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => return Err(WebhookError::InvalidReview(e.to_string())),
    };
    Ok(request)
}

/// The object being written, or `None` when there is nothing to check
fn admitted_object(request: &AdmissionRequest<DynamicObject>) -> Option<&DynamicObject> {
    if matches!(request.operation, Operation::Delete) {
        return None;
    }
    request.object.as_ref()
}

/// Decode the raw object into its typed form
fn decode_object<K: DeserializeOwned>(obj: &DynamicObject, kind: &str) -> Result<K, WebhookError> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| WebhookError::InvalidReview(format!("cannot decode {}: {}", kind, e)))
}

/// JSON patch turning `original` into `mutated`
fn diff_patch<T: Serialize>(original: &T, mutated: &T) -> Result<json_patch::Patch, WebhookError> {
    let before = serde_json::to_value(original)?;
    let after = serde_json::to_value(mutated)?;
    Ok(json_patch::diff(&before, &after))
}

/// Allowed response carrying `patch`, or plain allowed when it is empty
fn patched_response(
    request: &AdmissionRequest<DynamicObject>,
    patch: json_patch::Patch,
) -> Result<AdmissionResponse, WebhookError> {
    let response = AdmissionResponse::from(request);
    if patch.0.is_empty() {
        return Ok(response);
    }
    response.with_patch(patch).map_err(|e| {
        WebhookError::Internal(platform_common::Error::serialization(e.to_string()))
    })
}
