//! WebSocket client for the caching proxy's broadcast channel.
//!
//! The proxy never replays the queue itself; it tells connected clients to
//! do it by sending `SYNC_QUEUE`.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::error::RemoteError;
use super::probe::SyncTrigger;
use crate::cache::ClientMessage;

pub const CLIENTS_PATH: &str = "/__worker/clients";

/// Builds the websocket URL of a proxy's client channel from its HTTP base URL.
pub fn clients_url(proxy_url: &str) -> String {
    let base = proxy_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}{}", ws_base, CLIENTS_PATH)
}

/// Forwards `SYNC_QUEUE` broadcasts as [`SyncTrigger::WorkerRequested`].
///
/// Returns when the proxy closes the connection or `triggers` is dropped.
pub async fn listen(url: &str, triggers: mpsc::Sender<SyncTrigger>) -> Result<(), RemoteError> {
    let (mut ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| RemoteError::Network(e.to_string()))?;
    tracing::info!("Listening for worker messages on {}", url);

    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::SyncQueue { timestamp }) => {
                    tracing::debug!("Worker requested sync at {}", timestamp);
                    if triggers.send(SyncTrigger::WorkerRequested).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Ignoring unknown worker message: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(RemoteError::Network(e.to_string())),
        }
    }

    tracing::info!("Worker channel closed");
    Ok(())
}
