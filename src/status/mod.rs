// src/status/mod.rs
pub mod server;

use crate::domain::errors::{AppError, AppResult};
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, Uri};
use serde_json::Value;
use tokio::time::{timeout, Duration};

pub use server::StatusBoard;

/// Best-effort sink for dashboard updates.
///
/// Implementations never fail and never block longer than their own timeout;
/// a lost update is simply dropped.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, update: Value);
}

/// Discards every update
pub struct NoopStatusPublisher;

#[async_trait]
impl StatusPublisher for NoopStatusPublisher {
    async fn publish(&self, _update: Value) {}
}

/// POSTs updates as JSON to a remote status board
pub struct HttpStatusPublisher {
    client: Client<HttpConnector>,
    url: Uri,
    timeout: Duration,
}

impl HttpStatusPublisher {
    pub fn new(url: &str, timeout_ms: u64) -> AppResult<Self> {
        let url: Uri = url
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid status URL {}: {}", url, e)))?;

        Ok(Self {
            client: Client::new(),
            url,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    async fn post(&self, body: String) -> Result<(), String> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.url.clone())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .map_err(|e| e.to_string())?;

        let response = timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| format!("timed out after {}ms", self.timeout.as_millis()))?
            .map_err(|e| e.to_string())?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("status board replied {}", response.status()))
        }
    }
}

#[async_trait]
impl StatusPublisher for HttpStatusPublisher {
    async fn publish(&self, update: Value) {
        let body = match serde_json::to_string(&update) {
            Ok(body) => body,
            Err(e) => {
                log::debug!("Status update not serializable: {}", e);
                return;
            }
        };

        if let Err(e) = self.post(body).await {
            log::debug!("Status update to {} dropped: {}", self.url, e);
        }
    }
}
