//! Tyk route operator - publishes TykRoute API definitions to a Tyk gateway

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use tyk_route_operator::config::OperatorConfig;
use tyk_route_operator::controller::{error_policy, reconcile, Context};
use tyk_route_operator::crd::TykRoute;
use tyk_route_operator::health::start_health_server;
use tyk_route_operator::telemetry::{init_tracing, LogFormat};
use tyk_route_operator::HEARTBEAT_INTERVAL_SECS;

/// Watch timeout, kept under typical load balancer idle timeouts
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Tyk route operator - reconciles TykRoute resources into a shared gateway ConfigMap
#[derive(Parser, Debug)]
#[command(name = "tyk-route-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&TykRoute::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_tracing(LogFormat::from_flag(cli.config.log_json))?;
    run_controller(cli.config).await
}

/// Run the TykRoute controller until a shutdown signal arrives
async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = config.watch_namespace().unwrap_or("<all>"),
        health_port = config.health_port,
        resync_secs = config.resync_secs,
        sync_attempts = config.sync_attempts,
        "Starting Tyk route operator"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    tokio::spawn(start_health_server(config.health_port));
    tokio::spawn(heartbeat());

    let ctx = Arc::new(
        Context::builder(client.clone())
            .resync_interval(config.resync_interval())
            .sync_retry(config.sync_retry())
            .build(),
    );
    let routes: Api<TykRoute> = match config.watch_namespace() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    tracing::info!("- TykRoute controller");

    Controller::new(routes, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok(action) => tracing::debug!(?action, "TykRoute reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "TykRoute reconciliation error"),
            }
            std::future::ready(())
        })
        .await;

    tracing::info!("Tyk route operator stopped");
    Ok(())
}

/// Periodically log that the operator is alive
async fn heartbeat() {
    let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    // The first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        tracing::info!("Operator is alive and watching for TykRoute changes");
    }
}
