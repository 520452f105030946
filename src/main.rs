//! Clashpool - Entry Point
//!
//! Connects to the Clash controller, reports the node pool, then fetches every
//! URL given on the command line through the retrier.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clashpool::config::LogConfig;
use clashpool::{Config, ProxyPool, RequestRetrier, RetryRequest};

/// Fetches running at the same time
const CONCURRENCY: usize = 4;

#[tokio::main]
async fn main() -> clashpool::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting clashpool");

    let pool = Arc::new(ProxyPool::connect(&config.control, config.pool.clone()).await?);
    info!("Egress proxy: {}", pool.egress_url()?);
    for node in pool.list_nodes() {
        info!(
            node = %node.id,
            failures = node.failures,
            healthy = node.healthy,
            current = node.current,
            "Node"
        );
    }

    match pool.public_ip().await {
        Ok(ip) => info!("Egress IP: {}", ip),
        Err(e) => warn!("Egress IP probe failed: {}", e),
    }

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        info!("No URLs given, nothing to fetch");
        return Ok(());
    }

    let retrier = RequestRetrier::new(Some(pool.clone()), config.retry.clone(), config.request_timeout)?;

    tokio::select! {
        _ = fetch_all(&retrier, &urls) => {},
        _ = shutdown_signal() => info!("Shutdown signal received, abandoning pending requests"),
    }

    info!("clashpool stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("clashpool={}", log.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if log.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn fetch_all(retrier: &RequestRetrier, urls: &[String]) {
    stream::iter(urls)
        .map(|url| async move { (url, fetch(retrier, url).await) })
        .buffer_unordered(CONCURRENCY)
        .for_each(|(url, result)| async move {
            match result {
                Ok((status, bytes)) => info!("{} -> {} ({} bytes)", url, status, bytes),
                Err(e) => error!("{} failed: {}", url, e),
            }
        })
        .await;
}

async fn fetch(retrier: &RequestRetrier, url: &str) -> clashpool::Result<(reqwest::StatusCode, usize)> {
    let request = RetryRequest::get(url)?;
    let response = retrier.send(&request).await?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| clashpool::PoolError::from_send(url, e))?;
    Ok((status, body.len()))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
