//! Connectivity detection and sync triggers.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};

use super::error::RemoteError;

pub const HEALTH_PATH: &str = "/api/health";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns true when `<base_url>/api/health` answers 200 within the probe timeout.
pub async fn check_server(base_url: &str) -> bool {
    match probe_client() {
        Ok(client) => check_with(&client, base_url).await,
        Err(e) => {
            tracing::warn!("Could not build probe client: {}", e);
            false
        }
    }
}

fn probe_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()
}

async fn check_with(client: &reqwest::Client, base_url: &str) -> bool {
    let url = format!("{}{}", base_url.trim_end_matches('/'), HEALTH_PATH);
    match client.get(&url).send().await {
        Ok(response) => response.status() == reqwest::StatusCode::OK,
        Err(e) => {
            tracing::debug!("Health check failed: {}", e);
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        *self == Connectivity::Online
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connectivity::Online => write!(f, "online"),
            Connectivity::Offline => write!(f, "offline"),
        }
    }
}

/// Why a sync run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Connectivity came back.
    Reconnected,
    /// Periodic timer fired while online.
    Periodic,
    /// The caching proxy broadcast `SYNC_QUEUE`.
    WorkerRequested,
    /// Started by the user.
    Manual,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncTrigger::Reconnected => write!(f, "reconnected"),
            SyncTrigger::Periodic => write!(f, "periodic"),
            SyncTrigger::WorkerRequested => write!(f, "worker"),
            SyncTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Polls the API health endpoint and publishes connectivity changes.
///
/// Starts out offline, so the first successful probe emits
/// [`SyncTrigger::Reconnected`].
pub struct NetworkProbe {
    base_url: String,
    client: reqwest::Client,
    probe_interval: Duration,
    periodic_sync: Duration,
    state: watch::Sender<Connectivity>,
}

impl NetworkProbe {
    pub fn new(
        base_url: impl Into<String>,
        probe_interval: Duration,
        periodic_sync: Duration,
    ) -> Result<Self, RemoteError> {
        let (state, _) = watch::channel(Connectivity::Offline);
        Ok(Self {
            base_url: base_url.into(),
            client: probe_client()?,
            probe_interval,
            periodic_sync,
            state,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.state.borrow()
    }

    /// Records a probe result. Returns `Reconnected` on an offline to online edge.
    pub fn observe(&self, online: bool) -> Option<SyncTrigger> {
        let next = if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        let previous = self.state.send_replace(next);

        if previous != next {
            tracing::info!("Connectivity changed: {} -> {}", previous, next);
        }
        (previous == Connectivity::Offline && next == Connectivity::Online)
            .then_some(SyncTrigger::Reconnected)
    }

    pub async fn probe_once(&self) -> Option<SyncTrigger> {
        let online = check_with(&self.client, &self.base_url).await;
        self.observe(online)
    }

    /// Probes until `triggers` is closed.
    pub async fn run(self, triggers: mpsc::Sender<SyncTrigger>) {
        let mut probe_tick = interval(self.probe_interval);
        probe_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut periodic_tick = interval(self.periodic_sync);
        periodic_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; the probe already covers startup
        periodic_tick.tick().await;

        loop {
            let trigger = tokio::select! {
                _ = probe_tick.tick() => self.probe_once().await,
                _ = periodic_tick.tick() => {
                    self.connectivity().is_online().then_some(SyncTrigger::Periodic)
                }
                _ = triggers.closed() => break,
            };

            if let Some(trigger) = trigger {
                if triggers.send(trigger).await.is_err() {
                    break;
                }
            }
        }
        tracing::debug!("Network probe stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn probe(base_url: &str) -> NetworkProbe {
        NetworkProbe::new(base_url, Duration::from_millis(20), Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn test_observe_emits_reconnected_only_on_edge() {
        let probe = probe("http://localhost");
        assert_eq!(probe.connectivity(), Connectivity::Offline);

        assert_eq!(probe.observe(false), None);
        assert_eq!(probe.observe(true), Some(SyncTrigger::Reconnected));
        assert_eq!(probe.observe(true), None);
        assert_eq!(probe.observe(false), None);
        assert_eq!(probe.connectivity(), Connectivity::Offline);
        assert_eq!(probe.observe(true), Some(SyncTrigger::Reconnected));
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let probe = probe("http://localhost");
        let mut rx = probe.subscribe();

        probe.observe(true);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Connectivity::Online);
    }

    #[tokio::test]
    async fn test_check_server() {
        let healthy = serve(Router::new().route("/api/health", get(|| async { "ok" }))).await;
        assert!(check_server(&healthy).await);

        let failing = serve(Router::new().route(
            "/api/health",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        assert!(!check_server(&failing).await);

        let missing = serve(Router::new()).await;
        assert!(!check_server(&missing).await);
    }

    #[tokio::test]
    async fn test_run_sends_reconnected_trigger() {
        let base = serve(Router::new().route("/api/health", get(|| async { "ok" }))).await;
        let (tx, mut rx) = mpsc::channel(4);

        let handle = tokio::spawn(probe(&base).run(tx));
        assert_eq!(rx.recv().await, Some(SyncTrigger::Reconnected));

        drop(rx);
        handle.await.unwrap();
    }
}
