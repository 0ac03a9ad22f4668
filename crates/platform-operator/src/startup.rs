//! CRD installation on startup
//!
//! The operator applies its own CRDs with server-side apply, so the schema
//! in the cluster always matches the running binary.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use platform_common::crd::ClusterResourceQuota;
use platform_common::retry::{retry_with_backoff, RetryConfig};
use platform_common::FIELD_MANAGER;

/// Attempts before startup gives up on the API server
const CRD_INSTALL_ATTEMPTS: u32 = 10;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn operator_crds() -> Vec<CrdDef> {
    vec![CrdDef {
        name: "clusterresourcequotas.platform.dev",
        crd: ClusterResourceQuota::crd(),
    }]
}

/// Install or update every CRD the operator serves
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let retry = RetryConfig::with_max_attempts(CRD_INSTALL_ATTEMPTS);

    for def in operator_crds() {
        tracing::info!("Installing {} CRD...", def.name);
        let patch = Patch::Apply(&def.crd);
        retry_with_backoff(&retry, def.name, || crds.patch(def.name, &params, &patch))
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("All CRDs installed/updated");
    Ok(())
}
