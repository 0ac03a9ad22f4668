//! Operator command-line configuration
//!
//! Every flag can also be set through a `PLATFORM_*` environment variable,
//! which is how the Deployment manifest configures the operator.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Args};

use platform_common::telemetry::LogFormat;
use platform_ingress::SsoConfig;
use platform_pod::config::DEFAULT_TOLERATIONS_ANNOTATION;
use platform_pod::PodMutatorConfig;

/// Runtime settings for the controller and webhook server
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Log line encoding (json or text)
    #[arg(long, env = "PLATFORM_LOG_FORMAT", default_value = "json", global = true)]
    pub log_format: LogFormat,

    /// Address the admission webhook server listens on
    #[arg(long, env = "PLATFORM_WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    pub webhook_addr: SocketAddr,

    /// PEM certificate for the webhook server
    #[arg(long, env = "PLATFORM_TLS_CERT_FILE")]
    pub tls_cert_file: Option<PathBuf>,

    /// PEM private key for the webhook server
    #[arg(long, env = "PLATFORM_TLS_KEY_FILE")]
    pub tls_key_file: Option<PathBuf>,

    /// Run the ClusterResourceQuota controller and webhooks
    #[arg(long, env = "PLATFORM_ENABLE_CLUSTER_RESOURCE_QUOTA", default_value_t = true, action = ArgAction::Set)]
    pub enable_cluster_resource_quota: bool,

    /// Enforce ClusterResourceQuota ceilings at admission
    #[arg(long, env = "PLATFORM_QUOTA_VALIDATION", default_value_t = true, action = ArgAction::Set)]
    pub quota_validation: bool,

    /// Seconds between full ClusterResourceQuota resyncs
    #[arg(long, env = "PLATFORM_QUOTA_RESYNC_SECS", default_value_t = 300)]
    pub quota_resync_secs: u64,

    /// Seconds an admitted ResourceQuota counts before the API shows it
    #[arg(long, env = "PLATFORM_PENDING_ADMISSION_TTL_SECS", default_value_t = 30)]
    pub pending_admission_ttl_secs: u64,

    /// Run the pod mutation webhook and annotation reconcilers
    #[arg(long, env = "PLATFORM_ENABLE_POD_MUTATIONS", default_value_t = true, action = ArgAction::Set)]
    pub enable_pod_mutations: bool,

    /// Namespace annotation prefixes inherited by pods (comma separated)
    #[arg(long, env = "PLATFORM_ANNOTATIONS", value_delimiter = ',')]
    pub annotations: Vec<String>,

    /// Registry mirror prepended to pod images
    #[arg(long, env = "PLATFORM_DEFAULT_REGISTRY_PREFIX")]
    pub default_registry_prefix: Option<String>,

    /// Pull secret added to pods without one
    #[arg(long, env = "PLATFORM_DEFAULT_IMAGE_PULL_SECRET")]
    pub default_image_pull_secret: Option<String>,

    /// Image prefixes never rewritten (comma separated)
    #[arg(long, env = "PLATFORM_REGISTRY_WHITELIST", value_delimiter = ',')]
    pub registry_whitelist: Vec<String>,

    /// Namespace annotation holding pod tolerations
    #[arg(long, env = "PLATFORM_TOLERATIONS_ANNOTATION", default_value = DEFAULT_TOLERATIONS_ANNOTATION)]
    pub tolerations_annotation: String,

    /// Seconds between namespace-wide annotation sweeps
    #[arg(long, env = "PLATFORM_ANNOTATION_INTERVAL_SECS", default_value_t = 600)]
    pub annotation_interval_secs: u64,

    /// Run the ingress SSO webhook and reconciler
    #[arg(long, env = "PLATFORM_ENABLE_INGRESS_SSO", default_value_t = false, action = ArgAction::Set)]
    pub enable_ingress_sso: bool,

    /// oauth2-proxy Service name
    #[arg(long, env = "PLATFORM_OAUTH2_PROXY_SERVICE_NAME", default_value = "oauth2-proxy")]
    pub oauth2_proxy_service_name: String,

    /// oauth2-proxy Service namespace
    #[arg(long, env = "PLATFORM_OAUTH2_PROXY_SERVICE_NAMESPACE", default_value = "ingress-nginx")]
    pub oauth2_proxy_service_namespace: String,

    /// Platform domain, used for the oauth2 sign-in host
    #[arg(long, env = "PLATFORM_DOMAIN", default_value = "")]
    pub domain: String,

    /// Delete namespaces whose auto-delete lifetime has passed
    #[arg(long, env = "PLATFORM_ENABLE_CLEANUP", default_value_t = true, action = ArgAction::Set)]
    pub enable_cleanup: bool,

    /// Longest wait between checks of a labelled namespace
    #[arg(long, env = "PLATFORM_CLEANUP_INTERVAL_SECS", default_value_t = 600)]
    pub cleanup_interval_secs: u64,
}

impl OperatorConfig {
    /// Certificate and key, only when both are set
    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert_file, &self.tls_key_file) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    /// Exactly one of the TLS files was given
    pub fn tls_incomplete(&self) -> bool {
        self.tls_cert_file.is_some() != self.tls_key_file.is_some()
    }

    /// ClusterResourceQuota resync interval
    pub fn quota_resync(&self) -> Duration {
        Duration::from_secs(self.quota_resync_secs)
    }

    /// Lifetime of a pending admission
    pub fn pending_admission_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_admission_ttl_secs)
    }

    /// Namespace annotation sweep interval
    pub fn annotation_interval(&self) -> Duration {
        Duration::from_secs(self.annotation_interval_secs)
    }

    /// Namespace cleanup check interval
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Pod mutation rules
    pub fn pod_mutator_config(&self) -> PodMutatorConfig {
        PodMutatorConfig {
            annotations: non_empty(&self.annotations),
            default_registry_prefix: self
                .default_registry_prefix
                .clone()
                .filter(|p| !p.is_empty()),
            registry_whitelist: non_empty(&self.registry_whitelist),
            default_image_pull_secret: self
                .default_image_pull_secret
                .clone()
                .filter(|s| !s.is_empty()),
            tolerations_annotation: self.tolerations_annotation.clone(),
        }
    }

    /// Where to find oauth2-proxy
    pub fn sso_config(&self) -> SsoConfig {
        SsoConfig {
            service_name: self.oauth2_proxy_service_name.clone(),
            service_namespace: self.oauth2_proxy_service_namespace.clone(),
            domain: self.domain.clone(),
        }
    }
}

fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
