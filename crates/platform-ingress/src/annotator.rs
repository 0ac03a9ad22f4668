//! oauth2-proxy annotations for nginx ingresses

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, warn};

use platform_common::{Error, FIELD_MANAGER};

use crate::error::IngressError;

/// Semicolon-separated groups allowed through
pub const GROUPS_ANNOTATION: &str = "platform.dev/restrict-to-groups";
/// Extra nginx configuration appended to the generated snippet
pub const EXTRA_SNIPPET_ANNOTATION: &str = "platform.dev/extra-configuration-snippet";
/// Set to "false" to keep auth headers from reaching the backend
pub const PASS_AUTH_HEADERS_ANNOTATION: &str = "platform.dev/pass-auth-headers";

const AUTH_URL: &str = "nginx.ingress.kubernetes.io/auth-url";
const AUTH_SIGNIN: &str = "nginx.ingress.kubernetes.io/auth-signin";
const CONFIGURATION_SNIPPET: &str = "nginx.ingress.kubernetes.io/configuration-snippet";

const OAUTH2_PROXY_PORT: u16 = 4180;

const PASS_HEADERS_SNIPPET: &str = r#"
proxy_set_header 'x-auth-request-user' $authHeader0;
proxy_set_header 'x-auth-request-email' $authHeader1;
proxy_set_header 'authorization' $authHeader2;
"#;

/// Where oauth2-proxy lives
#[derive(Clone, Debug)]
pub struct SsoConfig {
    /// oauth2-proxy Service name
    pub service_name: String,
    /// oauth2-proxy Service namespace
    pub service_namespace: String,
    /// Platform domain; sign-in goes to `oauth2.<domain>`
    pub domain: String,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            service_name: "oauth2-proxy".to_string(),
            service_namespace: "ingress-nginx".to_string(),
            domain: String::new(),
        }
    }
}

/// API operations the annotator needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IngressApi: Send + Sync {
    /// Fetch a Service, `None` if it doesn't exist
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Merge annotations into an ingress
    async fn patch_ingress_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), Error>;
}

/// [`IngressApi`] backed by the Kubernetes API
pub struct KubeIngressApi {
    client: Client,
}

impl KubeIngressApi {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IngressApi for KubeIngressApi {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_ingress_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "metadata": { "annotations": annotations } });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube("Ingress", name, e))?;
        Ok(())
    }
}

/// Adds oauth2-proxy auth annotations to group-restricted ingresses
pub struct SsoAnnotator {
    api: Arc<dyn IngressApi>,
    config: SsoConfig,
}

impl SsoAnnotator {
    /// Create an annotator
    pub fn new(api: Arc<dyn IngressApi>, config: SsoConfig) -> Self {
        Self { api, config }
    }

    /// API handle shared with the reconciler
    pub fn api(&self) -> &Arc<dyn IngressApi> {
        &self.api
    }

    /// Annotated copy of the ingress, or `None` when nothing changes
    ///
    /// Ingresses without the groups annotation are left alone, as are all
    /// ingresses while the oauth2-proxy Service has no cluster IP.
    pub async fn annotate(&self, ingress: &Ingress) -> Result<Option<Ingress>, IngressError> {
        let annotations = ingress.annotations();
        let Some(groups) = annotations.get(GROUPS_ANNOTATION).filter(|g| !g.is_empty()) else {
            return Ok(None);
        };

        let Some(ip) = self.proxy_cluster_ip().await? else {
            warn!(
                service = %self.config.service_name,
                namespace = %self.config.service_namespace,
                "oauth2-proxy service has no cluster IP, skipping ingress"
            );
            return Ok(None);
        };

        let pass_headers = annotations
            .get(PASS_AUTH_HEADERS_ANNOTATION)
            .map_or(true, |v| v != "false");
        let extra = annotations
            .get(EXTRA_SNIPPET_ANNOTATION)
            .map(String::as_str)
            .unwrap_or_default();

        let mut desired = annotations.clone();
        desired.insert(
            AUTH_URL.to_string(),
            format!("http://{}:{}/oauth2/auth", ip, OAUTH2_PROXY_PORT),
        );
        desired.insert(
            AUTH_SIGNIN.to_string(),
            format!(
                "https://oauth2.{}/oauth2/start?rd=https://$host$request_uri$is_args$args",
                self.config.domain
            ),
        );
        desired.insert(
            CONFIGURATION_SNIPPET.to_string(),
            configuration_snippet(groups, pass_headers, extra),
        );

        if &desired == annotations {
            debug!(ingress = %ingress.name_any(), "SSO annotations up to date");
            return Ok(None);
        }
        let mut updated = ingress.clone();
        updated.metadata.annotations = Some(desired);
        Ok(Some(updated))
    }

    async fn proxy_cluster_ip(&self) -> Result<Option<String>, IngressError> {
        let SsoConfig {
            service_name,
            service_namespace,
            ..
        } = &self.config;
        let service = self
            .api
            .get_service(service_namespace, service_name)
            .await
            .and_then(|svc| svc.ok_or_else(|| Error::not_found("Service", service_name)))
            .map_err(|source| IngressError::ServiceLookup {
                name: service_name.clone(),
                namespace: service_namespace.clone(),
                source,
            })?;
        Ok(service
            .spec
            .and_then(|s| s.cluster_ip)
            .filter(|ip| !ip.is_empty() && ip != "None"))
    }
}

/// nginx snippet restricting access to `groups` (`;`-separated)
pub fn configuration_snippet(groups: &str, pass_headers: bool, extra: &str) -> String {
    let quoted = groups
        .split(';')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(|g| format!("\"{}\"", g.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(", ");

    let mut snippet = format!(
        r#"
auth_request_set $authHeader0 $upstream_http_x_auth_request_user;
auth_request_set $authHeader1 $upstream_http_x_auth_request_email;
auth_request_set $authHeader2 $upstream_http_authorization;

access_by_lua_block {{
	local authorizedGroups = {{ {} }}
	local oauth2GroupAccess = require "oauth2_group_access"

	oauth2GroupAccess:verify_authorization(ngx.var.authHeader2, authorizedGroups)
}}
"#,
        quoted
    );
    if pass_headers {
        snippet.push('\n');
        snippet.push_str(PASS_HEADERS_SNIPPET);
    }
    if !extra.is_empty() {
        snippet.push('\n');
        snippet.push_str(extra);
    }
    snippet
}
