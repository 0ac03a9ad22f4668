//! Quota validation webhooks
//!
//! Thin HTTP adapters around [`QuotaAdmission`]: decode the object, ask the
//! gate, and turn the decision into an admission response.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use k8s_openapi::api::core::v1::ResourceQuota;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::ResourceExt;
use tracing::{debug, info};

use platform_common::crd::ClusterResourceQuota;
use platform_common::Error;
use platform_quota::{Decision, QuotaAdmission};

use super::{admitted_object, decode_object, parse_review, WebhookError, WebhookState};

/// Validate a ClusterResourceQuota create/update
pub async fn validate_cluster_quota_handler(
    State(state): State<Arc<WebhookState>>,
    body: Result<Json<AdmissionReview<DynamicObject>>, JsonRejection>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let request = parse_review(body)?;
    let response = validate_cluster_quota(&state.quota, &request).await?;
    Ok(Json(response.into_review()))
}

/// Validate a ResourceQuota create/update
pub async fn validate_resource_quota_handler(
    State(state): State<Arc<WebhookState>>,
    body: Result<Json<AdmissionReview<DynamicObject>>, JsonRejection>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let request = parse_review(body)?;
    let response = validate_resource_quota(&state.quota, &request).await?;
    Ok(Json(response.into_review()))
}

async fn validate_cluster_quota(
    admission: &QuotaAdmission,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<AdmissionResponse, WebhookError> {
    let Some(obj) = admitted_object(request) else {
        debug!(uid = %request.uid, "nothing to validate, allowing");
        return Ok(AdmissionResponse::from(request));
    };
    let quota: ClusterResourceQuota = decode_object(obj, "ClusterResourceQuota")?;

    let decision = admission
        .review_cluster_quota(&quota, request.dry_run)
        .await
        .map_err(|err| match err {
            Error::InvalidQuantity { .. } => WebhookError::BadRequest(err.to_string()),
            err => WebhookError::Internal(err),
        })?;
    Ok(respond(request, &quota.name_any(), decision))
}

async fn validate_resource_quota(
    admission: &QuotaAdmission,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<AdmissionResponse, WebhookError> {
    let Some(obj) = admitted_object(request) else {
        debug!(uid = %request.uid, "nothing to validate, allowing");
        return Ok(AdmissionResponse::from(request));
    };
    let mut quota: ResourceQuota = decode_object(obj, "ResourceQuota")?;
    // Objects being created may not carry their namespace yet
    if quota.metadata.namespace.is_none() {
        quota.metadata.namespace = request.namespace.clone();
    }
    let namespace = quota.namespace().unwrap_or_default();

    let decision = admission
        .review_resource_quota(&quota, request.dry_run)
        .await
        .map_err(|err| resource_quota_error(err, &namespace))?;
    Ok(respond(request, &format!("{}/{}", namespace, quota.name_any()), decision))
}

/// Only a missing namespace or a malformed quantity is the caller's fault
fn resource_quota_error(err: Error, namespace: &str) -> WebhookError {
    match err {
        Error::NotFound { ref kind, .. } if kind == "Namespace" => WebhookError::BadRequest(format!(
            "cannot find namespace for resource quota: {}",
            namespace
        )),
        Error::InvalidQuantity { .. } => WebhookError::BadRequest(err.to_string()),
        err => WebhookError::Internal(err),
    }
}

fn respond(request: &AdmissionRequest<DynamicObject>, object: &str, decision: Decision) -> AdmissionResponse {
    match decision {
        Decision::Allow => AdmissionResponse::from(request),
        Decision::Deny(reason) => {
            info!(uid = %request.uid, %object, %reason, "admission denied");
            AdmissionResponse::from(request).deny(reason)
        }
    }
}
