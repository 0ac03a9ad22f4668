//! Pod mutation webhook

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::ResourceExt;
use tracing::debug;

use super::{
    admitted_object, decode_object, diff_patch, parse_review, patched_response, PodWebhook,
    WebhookError, WebhookState,
};

/// Handle mutating admission review for Pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    body: Result<Json<AdmissionReview<DynamicObject>>, JsonRejection>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let request = parse_review(body)?;
    let response = match &state.pods {
        Some(pods) => mutate_pod(pods, &request).await?,
        None => AdmissionResponse::from(&request),
    };
    Ok(Json(response.into_review()))
}

async fn mutate_pod(
    pods: &PodWebhook,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<AdmissionResponse, WebhookError> {
    let Some(obj) = admitted_object(request) else {
        return Ok(AdmissionResponse::from(request));
    };
    let pod: Pod = decode_object(obj, "Pod")?;

    let ns_name = request
        .namespace
        .clone()
        .or_else(|| pod.namespace())
        .unwrap_or_default();
    let ns = pods
        .client
        .get_namespace(&ns_name)
        .await?
        .ok_or_else(|| WebhookError::BadRequest(format!("cannot find namespace for pod: {}", ns_name)))?;

    let mutated = pods.mutator.mutate(&ns, pod.clone());
    let patch = diff_patch(&pod, &mutated)?;
    debug!(
        uid = %request.uid,
        pod = %pod.metadata.name.as_deref().or(pod.metadata.generate_name.as_deref()).unwrap_or_default(),
        namespace = %ns_name,
        patch_ops = patch.0.len(),
        "mutated pod"
    );
    patched_response(request, patch)
}
