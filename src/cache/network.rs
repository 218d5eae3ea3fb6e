//! The upstream side of the cache layer.

use axum::http::header;
use std::future::Future;
use std::time::Duration;

use super::error::CacheError;
use super::request::{CacheRequest, CachedResponse};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches requests from the upstream origin.
///
/// Implemented over HTTP by [`HttpNetwork`]; tests plug in fakes.
pub trait Network: Send + Sync + 'static {
    fn fetch(
        &self,
        request: &CacheRequest,
    ) -> impl Future<Output = Result<CachedResponse, CacheError>> + Send;
}

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: [header::HeaderName; 6] = [
    header::CONNECTION,
    header::HOST,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TE,
    header::CONTENT_LENGTH,
];

#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
    upstream_url: String,
}

impl HttpNetwork {
    pub fn new(upstream_url: impl Into<String>) -> Result<Self, CacheError> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            upstream_url: upstream_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }
}

impl Network for HttpNetwork {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse, CacheError> {
        let url = format!("{}{}", self.upstream_url, request.url);

        let mut builder = self.client.request(request.method.clone(), &url);
        for (name, value) in request.headers.iter() {
            if !HOP_BY_HOP.contains(name) {
                builder = builder.header(name, value);
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP.contains(name))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(CachedResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap, Method},
        routing::get,
        Router,
    };

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_fetch_forwards_method_headers_and_body() {
        let app = Router::new().route(
            "/api/echo",
            get(|| async { ([("content-type", "text/plain")], "got") }).post(
                |headers: HeaderMap, body: String| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    format!("{}|{}", auth, body)
                },
            ),
        );
        let network = HttpNetwork::new(serve(app).await).unwrap();

        let got = network.fetch(&CacheRequest::get("/api/echo")).await.unwrap();
        assert_eq!(got.status, 200);
        assert_eq!(got.body, b"got");
        assert_eq!(got.header("content-type"), Some("text/plain"));

        let mut post = CacheRequest::get("/api/echo").with_method(Method::POST);
        post.headers
            .insert("authorization", "Bearer t".parse().unwrap());
        post.body = b"payload".to_vec();
        let echoed = network.fetch(&post).await.unwrap();
        assert_eq!(echoed.body, b"Bearer t|payload");
    }

    #[tokio::test]
    async fn test_fetch_unreachable_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let network = HttpNetwork::new(format!("http://{}", addr)).unwrap();
        let err = network.fetch(&CacheRequest::get("/")).await.unwrap_err();
        assert!(err.is_network());
    }
}
