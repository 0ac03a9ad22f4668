//! Ingress SSO mutation webhook

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use platform_ingress::SsoAnnotator;
use tracing::info;

use super::{
    admitted_object, decode_object, diff_patch, parse_review, patched_response, WebhookError,
    WebhookState,
};

/// Handle mutating admission review for Ingresses
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    body: Result<Json<AdmissionReview<DynamicObject>>, JsonRejection>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let request = parse_review(body)?;
    let response = match &state.sso {
        Some(annotator) => mutate_ingress(annotator, &request).await?,
        None => AdmissionResponse::from(&request),
    };
    Ok(Json(response.into_review()))
}

async fn mutate_ingress(
    annotator: &SsoAnnotator,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<AdmissionResponse, WebhookError> {
    let Some(obj) = admitted_object(request) else {
        return Ok(AdmissionResponse::from(request));
    };
    let ingress: Ingress = decode_object(obj, "Ingress")?;

    match annotator.annotate(&ingress).await? {
        Some(updated) => {
            info!(uid = %request.uid, ingress = ?ingress.metadata.name, "adding SSO annotations");
            patched_response(request, diff_patch(&ingress, &updated)?)
        }
        None => Ok(AdmissionResponse::from(request)),
    }
}
