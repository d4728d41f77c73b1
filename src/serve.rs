//! Purpose: Provide the HTTP/JSON server in front of one shared `MessageStore`.
//! Exports: `ServeConfig`, `serve`, defaults for the serve flags.
//! Role: Axum-based loopback server implementing the v0 publish/delete/list routes.
//! Invariants: The store is created here once and injected into handlers by `Arc`.
//! Invariants: List responses are JSONL fed through a bounded channel from a blocking task.
//! Invariants: A client that goes away closes the channel, which aborts the store's delivery.
//! Invariants: Loopback-only unless explicitly allowed.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path as AxumPath, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use murmur::api::{Error, ErrorKind, Message, MessageStore, StreamSender};

pub const DEFAULT_BIND: &str = "127.0.0.1:50051";
pub const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_MAX_LIST_CONCURRENCY: usize = 64;
const LIST_CHANNEL_CAPACITY: usize = 16;

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
    pub max_concurrent_lists: usize,
}

struct AppState {
    store: Arc<MessageStore>,
    list_semaphore: Arc<Semaphore>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let state = Arc::new(AppState {
        store: Arc::new(MessageStore::new()),
        list_semaphore: Arc::new(Semaphore::new(config.max_concurrent_lists)),
    });
    let app = router(state, max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    let local_addr = listener.local_addr().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read bound address")
            .with_source(err)
    })?;
    info!(addr = %local_addr, "listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            info!("shutting down");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v0/messages", get(list_messages).post(publish_message))
        .route("/v0/messages/:prefix", delete(delete_message))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

pub(crate) fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 1048576."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    if config.max_concurrent_lists == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-list-concurrency must be greater than zero")
            .with_hint("Use a positive value like 64."));
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    #[serde(default)]
    sender_username: String,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

/// Feeds list output into the response body channel, one JSON line per message.
struct JsonlSender {
    tx: mpsc::Sender<Result<Bytes, Error>>,
}

impl StreamSender for JsonlSender {
    fn send(&mut self, message: &Message) -> Result<(), Error> {
        let mut line = serde_json::to_vec(message).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode message")
                .with_id(message.id.clone())
                .with_source(err)
        })?;
        line.push(b'\n');
        self.tx
            .blocking_send(Ok(Bytes::from(line)))
            .map_err(|_| Error::new(ErrorKind::Io).with_message("list stream receiver closed"))
    }
}

async fn healthz() -> Response {
    json_response(json!({ "ok": true }))
}

async fn publish_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PublishRequest>,
) -> Response {
    let id = state.store.publish(payload.sender_username, payload.body);
    json_response(json!({ "id": id }))
}

async fn delete_message(
    State(state): State<Arc<AppState>>,
    AxumPath(prefix): AxumPath<String>,
) -> Response {
    match state.store.delete(&prefix).into_result(&prefix) {
        Ok(message) => json_response(json!({ "deleted": message.id })),
        Err(err) => error_response(
            err.with_hint("Run `murmur listen` to see current message ids."),
        ),
    }
}

async fn list_messages(State(state): State<Arc<AppState>>) -> Response {
    let permit = match state.list_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            return error_response(
                Error::new(ErrorKind::Busy)
                    .with_message("too many concurrent list requests")
                    .with_hint("Try again later or raise --max-list-concurrency."),
            );
        }
    };
    let store = Arc::clone(&state.store);

    let (tx, rx) = mpsc::channel::<Result<Bytes, Error>>(LIST_CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let mut sender = JsonlSender { tx };
        if let Err(err) = store.list(&mut sender) {
            if err.kind() != ErrorKind::Io {
                let _ = sender.tx.blocking_send(Err(err));
            }
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|result| result.map_err(|err| std::io::Error::other(err.to_string())));

    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("application/jsonl"),
    );
    response
        .headers_mut()
        .insert("murmur-version", HeaderValue::from_static("0"));
    response
}

fn json_response(payload: serde_json::Value) -> Response {
    let mut response = Json(payload).into_response();
    response
        .headers_mut()
        .insert("murmur-version", HeaderValue::from_static("0"));
    response
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Busy => StatusCode::LOCKED,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(err.kind());
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            id: err.id().map(str::to_string),
        },
    };
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert("murmur-version", HeaderValue::from_static("0"));
    response
}
