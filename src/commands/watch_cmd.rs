use clap::Args;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::mpsc;

use sms_offline::config::Config;
use sms_offline::state::SyncStore;
use sms_offline::sync::{clients_url, listen, NetworkProbe, RemoteApi, SyncTrigger};

use super::engine;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Sync whenever connectivity returns, on a timer, or when the proxy asks
#[derive(Args)]
pub struct WatchCommand {
    /// Proxy base URL to listen on for sync requests [default: configured proxy port]
    #[arg(long)]
    proxy_url: Option<String>,

    /// Don't listen to the proxy
    #[arg(long)]
    no_proxy: bool,

    /// Run one sync right away instead of waiting for the first trigger
    #[arg(long)]
    now: bool,
}

impl WatchCommand {
    pub async fn run(
        &self,
        pool: SqlitePool,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let api_url = config.require_api_url()?.to_string();
        let store = SyncStore::new(engine(pool, config)?);
        store.load().await?;

        let probe = NetworkProbe::new(
            &api_url,
            config.probe.interval(),
            config.probe.periodic_sync(),
        )?;
        let mut connectivity = probe.subscribe();

        let (triggers, mut rx) = mpsc::channel(16);
        if self.now {
            triggers.send(SyncTrigger::Manual).await?;
        }
        tokio::spawn(probe.run(triggers.clone()));
        if !self.no_proxy {
            let proxy_url = self
                .proxy_url
                .clone()
                .unwrap_or_else(|| config.proxy.local_url());
            tokio::spawn(listen_forever(clients_url(&proxy_url), triggers.clone()));
        }
        drop(triggers);

        println!(
            "Watching {} with {} pending change(s). Press Ctrl-C to stop.",
            api_url,
            store.state().status.pending_changes
        );

        loop {
            tokio::select! {
                trigger = rx.recv() => {
                    let Some(trigger) = trigger else { break };
                    if trigger != SyncTrigger::Manual && !connectivity.borrow().is_online() {
                        tracing::debug!("Ignoring {} trigger while offline", trigger);
                        continue;
                    }
                    self.sync(&store, trigger).await;
                }
                Ok(()) = connectivity.changed() => {
                    println!("Server is {}", *connectivity.borrow_and_update());
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        println!("Stopped.");
        Ok(())
    }

    async fn sync<R: RemoteApi>(&self, store: &SyncStore<R>, trigger: SyncTrigger) {
        tracing::info!("Sync triggered: {}", trigger);
        match store.sync_data().await {
            Ok(report) if report.skipped => {}
            Ok(report) => {
                let state = store.state();
                println!(
                    "[{}] synced {}, failed {}, {} pending",
                    trigger,
                    report.succeeded.len(),
                    report.failed.len(),
                    state.status.pending_changes
                );
            }
            Err(e) => tracing::error!("Sync failed: {}", e),
        }
    }
}

/// Keeps a connection to the proxy's client channel open, reconnecting after drops.
async fn listen_forever(url: String, triggers: mpsc::Sender<SyncTrigger>) {
    while !triggers.is_closed() {
        if let Err(e) = listen(&url, triggers.clone()).await {
            tracing::debug!("Proxy channel unavailable: {}", e);
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
