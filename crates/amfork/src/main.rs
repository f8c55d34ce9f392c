mod http;
mod sync;

use std::sync::Arc;

use amfork_config::RouterConfig;
use amfork_core::Alertmanager;
use amfork_local::MemoryAlertmanager;
use amfork_remote::{RemoteAlertmanager, RemoteSettings};
use amfork_router_runtime::{ForkedAlertmanager, RouterEvent};
use anyhow::Context;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::sync::SyncSettings;

const DEFAULT_CONFIG_PATH: &str = "config/amfork.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("AMFORK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config: RouterConfig = amfork_config::load_config(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    // Initialize logging
    amfork_logging::init_with(&config.log_level, config.log_format);

    // Register metrics
    amfork_metrics::register_metrics();

    info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.mode,
        "Starting alertmanager router"
    );

    // バックエンド構築
    let local: Box<dyn Alertmanager> = match &config.local.data_dir {
        Some(dir) => Box::new(
            MemoryAlertmanager::open(config.org_id, dir)
                .with_context(|| format!("opening local state in {}", dir.display()))?,
        ),
        None => Box::new(MemoryAlertmanager::new(config.org_id)),
    };
    let remote = Arc::new(RemoteAlertmanager::new(RemoteSettings {
        url: config.remote.url.clone(),
        tenant_id: config.remote.tenant_id.clone(),
        password: config.remote.password.clone(),
        timeout: config.remote.timeout(),
    })?);
    info!(url = %remote.base_url(), tenant = %config.remote.tenant_id, "Remote alertmanager configured");

    let router = Arc::new(ForkedAlertmanager::new(local, remote, config.mode));
    let events = tokio::spawn(log_events(router.subscribe()));

    let shutdown = CancellationToken::new();
    let driver = tokio::spawn(sync::run(
        router.clone(),
        SyncSettings {
            org_id: config.org_id,
            interval: config.sync_interval(),
            config_path: config.alertmanager_config_path.clone(),
        },
        shutdown.child_token(),
    ));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.listen_port))
        .await
        .with_context(|| format!("binding port {}", config.listen_port))?;
    info!(port = config.listen_port, "Serving /-/ready and /metrics");
    let http_shutdown = CancellationToken::new();
    let server = tokio::spawn(http::serve(listener, router.clone(), http_shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("Shutting down");

    // 停止順序: 同期タスク -> HTTP -> バックエンド
    shutdown.cancel();
    if let Err(e) = driver.await {
        error!(error = %e, "Sync driver panicked");
    }
    http_shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server panicked"),
    }
    router.stop_and_wait().await;
    events.abort();

    info!("Shutdown complete");
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<RouterEvent>) {
    loop {
        match events.recv().await {
            Ok(RouterEvent::RemoteConfigSeeded) => {
                info!("Remote alertmanager received the initial configuration")
            }
            Ok(RouterEvent::RemoteConfigSeedFailed { error }) => {
                warn!(error = %error, "Initial configuration push to remote alertmanager failed")
            }
            Ok(RouterEvent::Diverged { operation, error }) => {
                error!(operation = operation.as_str(), error = %error, "Backends diverged")
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Router event log fell behind")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
