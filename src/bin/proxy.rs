//! SMS offline caching proxy
//!
//! Serves the portal through the caching worker: static assets are
//! pre-cached on start, API and page requests fall back to cached copies
//! when the upstream is unreachable.
//!
//! # Configuration
//!
//! Shares the config file with the `sms-offline` CLI. Relevant settings:
//! - `proxy.port` / `SMS_OFFLINE_PROXY_PORT`: port to listen on (default: 8787)
//! - `proxy.upstream_url` / `SMS_OFFLINE_UPSTREAM_URL`: portal origin
//!   (default: `api_url`)
//! - `cache_path` / `SMS_OFFLINE_CACHE_PATH`: response cache database
//! - `probe.periodic_sync_secs`: how often a periodic sync event is raised

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sms_offline::cache::{
    CacheStorage, HttpNetwork, Network, RefreshOutcome, ServiceWorker, PERIODIC_SYNC_TAG,
};
use sms_offline::config::Config;
use sms_offline::db::init_cache_db;
use sms_offline::server::router;

const INSTALL_RETRY_DELAY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sms_offline=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(std::env::var("SMS_OFFLINE_CONFIG").ok().map(PathBuf::from))?;
    let upstream = config.upstream_url()?.to_string();

    tracing::info!("Upstream: {}", upstream);
    tracing::info!("Cache database: {}", config.cache_path.value.display());

    let pool = init_cache_db(&config.cache_path.value).await?;
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
    let worker = Arc::new(
        ServiceWorker::new(HttpNetwork::new(upstream)?, CacheStorage::new(pool))
            .with_static_assets(config.proxy.static_assets.clone())
            .with_refresh_events(refresh_tx),
    );

    // With the upstream down, a cache from an earlier run is served until install succeeds
    if let Err(e) = worker.start().await {
        tracing::warn!(
            "Install failed ({}), controlling requests: {}",
            e,
            worker.is_controlling()
        );
        tokio::spawn(retry_install(worker.clone(), INSTALL_RETRY_DELAY));
    }

    tokio::spawn(log_refreshes(refresh_rx));
    tokio::spawn(periodic_sync(worker.clone(), config.probe.periodic_sync()));

    let app = router(worker);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.proxy.port));
    tracing::info!("Starting proxy on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Retries the install until it succeeds.
async fn retry_install<N: Network>(worker: Arc<ServiceWorker<N>>, delay: Duration) {
    loop {
        tokio::time::sleep(delay).await;
        match worker.start().await {
            Ok(()) => {
                tracing::info!("Worker installed after retry");
                return;
            }
            Err(e) => tracing::debug!("Install retry failed: {}", e),
        }
    }
}

/// Raises the periodic sync event on a fixed interval.
async fn periodic_sync<N: Network>(worker: Arc<ServiceWorker<N>>, every: Duration) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;

    loop {
        tick.tick().await;
        if let Some(clients) = worker.periodic_sync_event(PERIODIC_SYNC_TAG) {
            tracing::debug!("Periodic sync sent to {} client(s)", clients);
        }
    }
}

async fn log_refreshes(mut events: mpsc::UnboundedReceiver<RefreshOutcome>) {
    while let Some(outcome) = events.recv().await {
        match outcome {
            RefreshOutcome::Updated { url } => tracing::debug!("Refreshed {}", url),
            RefreshOutcome::Skipped { url, status } => {
                tracing::debug!("Kept cached {} (upstream answered {})", url, status)
            }
            RefreshOutcome::Failed { url, error } => {
                tracing::debug!("Refresh of {} failed: {}", url, error)
            }
        }
    }
}
