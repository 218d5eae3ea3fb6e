//! HTTP client that replays queued mutations against the portal REST API.
//!
//! Each `(EntityType, Operation)` pair maps to one route; see [`route_for`].

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use super::conflict::ConflictStrategy;
use super::error::RemoteError;
use crate::models::{EntityType, Operation, PendingUpload, QueueItem};
use crate::photo;

/// Request timeout for a single replayed mutation.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote side of the sync engine.
///
/// Implemented over HTTP by [`HttpRemoteApi`]; tests plug in fakes.
pub trait RemoteApi: Send + Sync {
    /// Applies one queued mutation.
    fn apply(&self, item: &QueueItem) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Uploads one offline photo.
    fn upload(
        &self,
        upload: &PendingUpload,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Collection path for each entity type.
const COLLECTIONS: [(EntityType, &str); 4] = [
    (EntityType::Location, "/api/locations"),
    (EntityType::Equipment, "/api/equipment"),
    (EntityType::Part, "/api/spare-parts"),
    (EntityType::Photo, "/api/photos"),
];

const UPLOAD_PATH: &str = "/api/photos/upload";

pub fn collection_path(entity_type: EntityType) -> &'static str {
    COLLECTIONS
        .iter()
        .find(|(t, _)| *t == entity_type)
        .map(|(_, path)| *path)
        .unwrap_or("/api")
}

/// Method and path of a replayed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

/// Resolves the route for a queued item.
///
/// Updates and deletes need `payload.id`; creates post to the collection.
pub fn route_for(item: &QueueItem) -> Result<Route, RemoteError> {
    let collection = collection_path(item.entity_type);

    match item.operation {
        Operation::Create => Ok(Route {
            method: Method::POST,
            path: collection.to_string(),
        }),
        Operation::Update => Ok(Route {
            method: Method::PUT,
            path: member_path(collection, item)?,
        }),
        Operation::Delete => Ok(Route {
            method: Method::DELETE,
            path: member_path(collection, item)?,
        }),
    }
}

fn member_path(collection: &str, item: &QueueItem) -> Result<String, RemoteError> {
    let id = match item.payload.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(RemoteError::InvalidPayload(format!(
                "{} {} requires payload.id",
                item.operation, item.entity_type
            )))
        }
    };
    Ok(format!("{}/{}", collection, urlencoding::encode(&id)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadBody<'a> {
    entity_type: EntityType,
    entity_id: &'a str,
    filename: &'a str,
    data: String,
}

/// [`RemoteApi`] over the portal's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    conflict_strategy: ConflictStrategy,
}

impl HttpRemoteApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: None,
            conflict_strategy: ConflictStrategy::default(),
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.api_token = token;
        self
    }

    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn fetch_remote(&self, path: &str) -> Result<Value, RemoteError> {
        let response = self.request(Method::GET, path).send().await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn send_update(&self, item: &QueueItem, route: Route) -> Result<(), RemoteError> {
        let body = match self.conflict_strategy {
            ConflictStrategy::Local => item.payload.clone(),
            strategy => {
                let remote = self.fetch_remote(&route.path).await?;
                strategy.resolve(item.base.as_ref(), &remote, &item.payload)
            }
        };

        let response = self.request(route.method, &route.path).json(&body).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

impl RemoteApi for HttpRemoteApi {
    async fn apply(&self, item: &QueueItem) -> Result<(), RemoteError> {
        let route = route_for(item)?;
        tracing::debug!("{} {} for queue item {}", route.method, route.path, item.id);

        match item.operation {
            Operation::Create => {
                let response = self
                    .request(route.method, &route.path)
                    .json(&item.payload)
                    .send()
                    .await?;
                check_status(response).await?;
                Ok(())
            }
            Operation::Update => self.send_update(item, route).await,
            Operation::Delete => {
                let response = self.request(route.method, &route.path).send().await?;
                // Already gone counts as applied
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(());
                }
                check_status(response).await?;
                Ok(())
            }
        }
    }

    async fn upload(&self, upload: &PendingUpload) -> Result<(), RemoteError> {
        let body = UploadBody {
            entity_type: upload.entity_type,
            entity_id: &upload.entity_id,
            filename: &upload.filename,
            data: photo::to_data_url(upload.upload_bytes(), &upload.mime_type),
        };

        let response = self
            .request(Method::POST, UPLOAD_PATH)
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut message = response.text().await.unwrap_or_default();
    if message.len() > 200 {
        let mut cut = 200;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }

    Err(RemoteError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewQueueItem;
    use axum::{
        extract::{Path, State},
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn item(entity_type: EntityType, operation: Operation, payload: Value) -> QueueItem {
        NewQueueItem::new(entity_type, operation, payload).into_item()
    }

    #[test]
    fn test_route_table() {
        let create = route_for(&item(EntityType::Location, Operation::Create, json!({}))).unwrap();
        assert_eq!(create.method, Method::POST);
        assert_eq!(create.path, "/api/locations");

        let update = route_for(&item(
            EntityType::Equipment,
            Operation::Update,
            json!({"id": "eq-1"}),
        ))
        .unwrap();
        assert_eq!(update.method, Method::PUT);
        assert_eq!(update.path, "/api/equipment/eq-1");

        let delete =
            route_for(&item(EntityType::Part, Operation::Delete, json!({"id": 42}))).unwrap();
        assert_eq!(delete.method, Method::DELETE);
        assert_eq!(delete.path, "/api/spare-parts/42");
    }

    #[test]
    fn test_route_encodes_id() {
        let route = route_for(&item(
            EntityType::Photo,
            Operation::Delete,
            json!({"id": "a b/c"}),
        ))
        .unwrap();
        assert_eq!(route.path, "/api/photos/a%20b%2Fc");
    }

    #[test]
    fn test_update_without_id_is_invalid() {
        let err = route_for(&item(EntityType::Equipment, Operation::Update, json!({}))).unwrap_err();
        assert!(matches!(err, RemoteError::InvalidPayload(_)));
    }

    #[derive(Clone, Default)]
    struct Recorded {
        puts: Arc<Mutex<Vec<Value>>>,
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_apply_create_and_rejection() {
        let app = Router::new().route(
                "/api/equipment",
                post(|Json(body): Json<Value>| async move {
                    if body["name"] == "bad" {
                        (AxumStatus::INTERNAL_SERVER_ERROR, "boom")
                    } else {
                        (AxumStatus::CREATED, "")
                    }
                }),
            );
        let base = serve(app).await;
        let api = HttpRemoteApi::new(base).unwrap();

        api.apply(&item(
            EntityType::Equipment,
            Operation::Create,
            json!({"name": "Pump"}),
        ))
        .await
        .unwrap();

        let err = api
            .apply(&item(
                EntityType::Equipment,
                Operation::Create,
                json!({"name": "bad"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Rejected {
                status: 500,
                message: "boom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_apply_update_merges_with_remote() {
        let recorded = Recorded::default();
        let app = Router::new()
            .route(
                "/api/equipment/{id}",
                get(|Path(id): Path<String>| async move {
                    Json(json!({"id": id, "name": "Pump", "status": "ACTIVE"}))
                })
                .put(
                    |State(recorded): State<Recorded>, Json(body): Json<Value>| async move {
                        recorded.puts.lock().unwrap().push(body);
                        AxumStatus::OK
                    },
                ),
            )
            .with_state(recorded.clone());
        let base = serve(app).await;
        let api = HttpRemoteApi::new(base).unwrap();

        api.apply(&item(
            EntityType::Equipment,
            Operation::Update,
            json!({"id": "eq-1", "name": "Main pump"}),
        ))
        .await
        .unwrap();

        let puts = recorded.puts.lock().unwrap();
        assert_eq!(
            puts[0],
            json!({"id": "eq-1", "name": "Main pump", "status": "ACTIVE"})
        );
    }

    #[tokio::test]
    async fn test_delete_of_missing_entity_succeeds() {
        let base = serve(Router::new()).await;
        let api = HttpRemoteApi::new(base).unwrap();
        api.apply(&item(
            EntityType::Location,
            Operation::Delete,
            json!({"id": "loc-1"}),
        ))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let api = HttpRemoteApi::new(format!("http://{}", addr)).unwrap();
        let err = api
            .apply(&item(EntityType::Part, Operation::Create, json!({})))
            .await
            .unwrap_err();
        assert!(err.is_network());
    }
}
