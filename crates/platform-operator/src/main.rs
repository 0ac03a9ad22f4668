//! Platform operator - ClusterResourceQuota enforcement and namespace housekeeping

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};

use platform_common::crd::ClusterResourceQuota;
use platform_common::telemetry::{init_telemetry, TelemetryConfig};
use platform_ingress::{KubeIngressApi, SsoAnnotator};
use platform_operator::config::OperatorConfig;
use platform_operator::controller_runner::{
    build_cleanup_controllers, build_ingress_controllers, build_pod_controllers,
    build_quota_controllers, ControllerFuture,
};
use platform_operator::startup::ensure_crds_installed;
use platform_operator::webhook::{self, PodWebhook, WebhookState};
use platform_pod::{KubePodClient, PodMutator};
use platform_quota::{KubeQuotaStore, QuotaAdmission};

/// Platform operator - quota aggregation, admission webhooks and namespace housekeeping
#[derive(Parser, Debug)]
#[command(name = "platform-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run controllers and the webhook server (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&ClusterResourceQuota::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.config.log_format,
        default_filter: None,
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;

    if config.enable_cluster_resource_quota {
        ensure_crds_installed(&client).await?;
    }

    tracing::info!("Starting platform operator");

    let mutator = PodMutator::new(config.pod_mutator_config());
    let mut controllers: Vec<ControllerFuture> = Vec::new();
    if config.enable_cluster_resource_quota {
        controllers.extend(build_quota_controllers(client.clone(), &config));
    }
    if config.enable_pod_mutations {
        controllers.extend(build_pod_controllers(client.clone(), mutator.clone(), &config));
    }
    if config.enable_ingress_sso {
        controllers.extend(build_ingress_controllers(client.clone(), &config));
    }
    if config.enable_cleanup {
        controllers.extend(build_cleanup_controllers(client.clone(), &config));
    }

    let state = Arc::new(WebhookState {
        quota: Arc::new(QuotaAdmission::with_options(
            Arc::new(KubeQuotaStore::new(client.clone())),
            config.quota_validation,
            config.pending_admission_ttl(),
        )),
        serve_quota: config.enable_cluster_resource_quota,
        pods: config.enable_pod_mutations.then(|| PodWebhook {
            mutator,
            client: Arc::new(KubePodClient::new(client.clone())),
        }),
        sso: config.enable_ingress_sso.then(|| {
            SsoAnnotator::new(
                Arc::new(KubeIngressApi::new(client.clone())),
                config.sso_config(),
            )
        }),
    });

    if config.tls_incomplete() {
        tracing::warn!("only one of --tls-cert-file and --tls-key-file given, serving plain HTTP");
    }
    let server = webhook::serve(config.webhook_addr, config.tls_files(), webhook::router(state));

    if controllers.is_empty() {
        return server.await;
    }

    // Controllers stop on SIGTERM; the server goes down with the process
    tokio::select! {
        _ = futures::future::join_all(controllers) => {
            tracing::info!("All controllers stopped");
        }
        result = server => {
            result?;
            tracing::info!("Webhook server stopped");
        }
    }

    Ok(())
}
