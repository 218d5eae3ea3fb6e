//! HTTP surface of the caching proxy.
//!
//! Everything outside `/__worker/` goes through the worker's fetch
//! handling against the upstream portal.
//!
//! # Endpoints
//!
//! - `POST /__worker/message`: page to worker message (`SKIP_WAITING`, `CACHE_URLS`)
//! - `POST /__worker/sync/{tag}`: background sync event
//! - `POST /__worker/periodicsync/{tag}`: periodic sync event
//! - `GET /__worker/clients`: websocket receiving worker to page messages
//! - `GET /__worker/health`: health check

use axum::{
    body::{to_bytes, Body},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Request, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::trace::TraceLayer;

use crate::cache::{CacheRequest, CachedResponse, ClientMessage, Network, ServiceWorker, WorkerMessage};

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

pub fn router<N: Network>(worker: Arc<ServiceWorker<N>>) -> Router {
    let control = Router::new()
        .route("/message", post(message::<N>))
        .route("/sync/{tag}", post(sync_event::<N>))
        .route("/periodicsync/{tag}", post(periodic_sync_event::<N>))
        .route("/clients", get(clients::<N>))
        .route("/health", get(health::<N>));

    Router::new()
        .nest("/__worker", control)
        .fallback(proxy::<N>)
        .with_state(worker)
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: String) -> Response {
    (status, Json(ErrorBody { error, message })).into_response()
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    worker: String,
    version: &'static str,
}

async fn health<N: Network>(State(worker): State<Arc<ServiceWorker<N>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        worker: worker.state().to_string(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn message<N: Network>(
    State(worker): State<Arc<ServiceWorker<N>>>,
    Json(message): Json<WorkerMessage>,
) -> Response {
    match worker.handle_message(message).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            tracing::warn!("Worker message failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, "message_failed", e.to_string())
        }
    }
}

#[derive(Serialize)]
struct SyncEventResponse {
    tag: String,
    clients: usize,
}

fn sync_event_response(tag: String, notified: Option<usize>) -> Response {
    match notified {
        Some(clients) => Json(SyncEventResponse { tag, clients }).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "unknown_tag",
            format!("No handler for sync tag '{}'", tag),
        ),
    }
}

async fn sync_event<N: Network>(
    State(worker): State<Arc<ServiceWorker<N>>>,
    Path(tag): Path<String>,
) -> Response {
    let notified = worker.sync_event(&tag);
    sync_event_response(tag, notified)
}

async fn periodic_sync_event<N: Network>(
    State(worker): State<Arc<ServiceWorker<N>>>,
    Path(tag): Path<String>,
) -> Response {
    let notified = worker.periodic_sync_event(&tag);
    sync_event_response(tag, notified)
}

async fn clients<N: Network>(
    State(worker): State<Arc<ServiceWorker<N>>>,
    ws: WebSocketUpgrade,
) -> Response {
    // Subscribe before upgrading so no broadcast is missed after the handshake
    let receiver = worker.subscribe();
    ws.on_upgrade(move |socket| forward_messages(socket, receiver))
}

async fn forward_messages(mut socket: WebSocket, mut receiver: broadcast::Receiver<ClientMessage>) {
    tracing::debug!("Client connected");
    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Ok(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!("Failed to encode client message: {}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Client lagged, skipped {} message(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("Client disconnected");
}

async fn proxy<N: Network>(State(worker): State<Arc<ServiceWorker<N>>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "body_too_large", e.to_string())
        }
    };

    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let request = CacheRequest::from_parts(parts.method, url, parts.headers, body.to_vec());

    match worker.fetch(&request).await {
        Ok(response) => into_response(response),
        Err(e) => {
            tracing::warn!("{} {} failed: {}", request.method, request.url, e);
            error_response(StatusCode::BAD_GATEWAY, "upstream_unavailable", e.to_string())
        }
    }
}

fn into_response(cached: CachedResponse) -> Response {
    let mut builder = Response::builder().status(cached.status);
    for (name, value) in &cached.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(Body::from(cached.body)).unwrap_or_else(|e| {
        error_response(StatusCode::BAD_GATEWAY, "invalid_response", e.to_string())
    })
}
