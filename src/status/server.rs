// src/status/server.rs
use crate::domain::errors::{AppError, AppResult};
use crate::ledger::TradeLedger;
use crate::status::StatusPublisher;
use async_trait::async_trait;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Latest merged status snapshot, shared between the bot and the HTTP server
#[derive(Clone, Default)]
pub struct StatusBoard {
    snapshot: Arc<RwLock<Map<String, Value>>>,
    ledger: Option<Arc<TradeLedger>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve the trade ledger at `GET /api/trades`
    pub fn with_ledger<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.ledger = Some(Arc::new(TradeLedger::new(path)));
        self
    }

    /// Ledger rows as JSON; `[]` when no ledger is configured or written yet
    pub async fn trades(&self) -> AppResult<Value> {
        let Some(ledger) = self.ledger.clone() else {
            return Ok(json!([]));
        };
        let records = tokio::task::spawn_blocking(move || ledger.records())
            .await
            .map_err(|e| AppError::Status(e.to_string()))??;
        Ok(serde_json::to_value(records)?)
    }

    /// Shallow-merge a JSON object into the snapshot; anything else is rejected
    pub async fn merge(&self, update: Value) -> Result<(), String> {
        match update {
            Value::Object(fields) => {
                let mut snapshot = self.snapshot.write().await;
                for (key, value) in fields {
                    snapshot.insert(key, value);
                }
                Ok(())
            }
            other => Err(format!("expected a JSON object, got {}", type_name(&other))),
        }
    }

    pub async fn snapshot(&self) -> Value {
        Value::Object(self.snapshot.read().await.clone())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// In-process publishing skips the HTTP round trip
#[async_trait]
impl StatusPublisher for StatusBoard {
    async fn publish(&self, update: Value) {
        if let Err(e) = self.merge(update).await {
            log::debug!("Status update dropped: {}", e);
        }
    }
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Route one request: `POST /api/update`, `GET /api/status` and `GET /api/trades`
pub async fn handle(board: StatusBoard, request: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match (request.method(), request.uri().path()) {
        (&Method::POST, "/api/update") => {
            let bytes = match hyper::body::to_bytes(request.into_body()).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        json!({"error": e.to_string()}),
                    ))
                }
            };

            let parsed = serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string());
            match parsed {
                Ok(update) => match board.merge(update).await {
                    Ok(()) => json_response(StatusCode::OK, json!({"status": "ok"})),
                    Err(e) => json_response(StatusCode::BAD_REQUEST, json!({"error": e})),
                },
                Err(e) => json_response(StatusCode::BAD_REQUEST, json!({"error": e})),
            }
        }
        (&Method::GET, "/api/status") => json_response(StatusCode::OK, board.snapshot().await),
        (&Method::GET, "/api/trades") => match board.trades().await {
            Ok(trades) => json_response(StatusCode::OK, trades),
            Err(e) => {
                log::warn!("Failed to read trades: {}", e);
                json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": e.to_string()}))
            }
        },
        _ => json_response(StatusCode::NOT_FOUND, json!({"error": "not found"})),
    };

    Ok(response)
}

/// Serve the board on an already-bound listener until `shutdown` resolves
pub async fn serve_listener<F>(listener: TcpListener, board: StatusBoard, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()>,
{
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let make_service = make_service_fn(move |_conn| {
        let board = board.clone();
        async move { Ok::<_, Infallible>(service_fn(move |request| handle(board.clone(), request))) }
    });

    let server = Server::from_tcp(listener)
        .map_err(|e| AppError::Status(e.to_string()))?
        .serve(make_service);

    log::info!("Status board listening on http://{}", local_addr);
    server
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::Status(e.to_string()))
}

pub async fn serve<F>(addr: SocketAddr, board: StatusBoard, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(addr)?;
    serve_listener(listener, board, shutdown).await
}
