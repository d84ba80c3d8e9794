// src/server/mod.rs

use crate::config::Config;
use crate::core::BridgeService;
use crate::core::handler::{Request, SetGetHandler};
use anyhow::{Result, anyhow};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub mod dispatcher;
mod metrics_server;

pub use dispatcher::{DispatchResult, Dispatcher};

/// Starts the service, runs one request per value through the reference
/// dispatcher, prints each response body, and shuts down. With no values the
/// service stays up until Ctrl-C.
pub async fn run(config: Config, values: Vec<String>) -> Result<()> {
    // 1. Event loop + backend connection. Failure here aborts startup.
    let init_config = config.clone();
    let service = tokio::task::spawn_blocking(move || BridgeService::init(init_config))
        .await
        .map_err(|e| anyhow!("service initialization panicked: {e}"))?
        .map_err(|e| anyhow!("failed to initialize bridge service: {e}"))?;

    // 2. Optional metrics exporter.
    let (shutdown_tx, _) = broadcast::channel(1);
    let mut background_tasks = JoinSet::new();
    if config.metrics.enabled {
        let shutdown_rx = shutdown_tx.subscribe();
        let port = config.metrics.port;
        background_tasks.spawn(metrics_server::run_metrics_server(port, shutdown_rx));
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // 3. Requests, each on its own blocking thread.
    if values.is_empty() {
        info!("No request values given; serving until Ctrl-C.");
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
        }
    } else {
        run_requests(&service, values).await;
    }

    // 4. Shutdown.
    let _ = shutdown_tx.send(());
    while background_tasks.join_next().await.is_some() {}
    tokio::task::spawn_blocking(move || service.shutdown())
        .await
        .map_err(|e| anyhow!("service shutdown panicked: {e}"))?;
    Ok(())
}

async fn run_requests(service: &Arc<BridgeService>, values: Vec<String>) {
    let handler = Arc::new(SetGetHandler::new(service.clone()));
    let mut requests = JoinSet::new();
    for value in values {
        let handler = handler.clone();
        let request = Request::new(service.next_request_id(), vec![Bytes::from(value)]);
        requests.spawn_blocking(move || {
            let result = Dispatcher::default().run(handler.as_ref(), &request);
            (request.id, result)
        });
    }

    while let Some(joined) = requests.join_next().await {
        match joined {
            Ok((id, Ok(result))) => {
                println!("{id}: {}", String::from_utf8_lossy(&result.reply).escape_debug());
            }
            Ok((id, Err(e))) => error!("{}: request failed: {}", id, e),
            Err(e) => error!("Request task panicked: {:?}", e),
        }
    }
}
