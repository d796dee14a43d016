use std::sync::Arc;

use anyhow::Context;
use asec_cloud::{S3Config, S3ObjectStore};
use asec_eaas::{ComponentsClient, QemuControlConnector};
use asec_pipeline::conversion::EmulatorRegistry;
use asec_pipeline::digitization::ToolRepository;
use asec_pipeline::emulation::display::SysfsDisplayProbe;
use asec_pipeline::emulation::EmulationServices;
use asec_worker::{Host, JsonPackageCatalog, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "asec_worker=info,asec_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(dirs_base = %config.dirs_base.display(), "Loaded worker configuration");

    let tools = ToolRepository::load(&config.tools_config)
        .context("Failed to load digitization tools")?;
    let emulators = EmulatorRegistry::load(&config.emulators_config)
        .context("Failed to load emulators")?;
    let catalog = match JsonPackageCatalog::load(&config.packages_config) {
        Ok(catalog) => catalog,
        Err(e) => {
            tracing::warn!(error = %e, "No package catalog, emulation sessions cannot resolve packages");
            JsonPackageCatalog::default()
        }
    };

    // --- Collaborators ---
    let storage = S3ObjectStore::connect(&S3Config::from_env()).await;
    let http = reqwest::Client::new();
    let services = EmulationServices {
        catalog: Arc::new(catalog),
        components: Arc::new(ComponentsClient::with_client(
            http.clone(),
            config.eaas_base_url.clone(),
        )),
        device_control: Arc::new(QemuControlConnector::new(http)),
        display: Arc::new(SysfsDisplayProbe::default()),
    };

    let shutdown_timeout = config.shutdown_timeout;
    let host = Host::new(config, tools, emulators, Arc::new(storage), services);
    host.initialize().await;
    tracing::info!("Worker ready");

    shutdown_signal().await;

    // --- Drain ---
    if tokio::time::timeout(shutdown_timeout, host.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Jobs did not drain in time"
        );
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
