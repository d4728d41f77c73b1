//! Purpose: Provide a blocking HTTP client for the murmur v0 protocol (JSON + JSONL).
//! Exports: `RemoteClient`, `RemoteList`.
//! Role: Mirrors `MessageStore` operations against a running `murmur serve`.
//! Invariants: Request/response envelopes match the handlers in `serve.rs`.
//! Invariants: Server errors come back as `Error` with the server's kind preserved.
//! Invariants: List streams are JSONL, read one message per line.
#![allow(clippy::result_large_err)]

use crate::core::error::{Error, ErrorKind};
use crate::core::message::Message;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

type ApiResult<T> = Result<T, Error>;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<RemoteClientInner>,
}

struct RemoteClientInner {
    base_url: Url,
    agent: ureq::Agent,
}

pub struct RemoteList {
    reader: Option<BufReader<Box<dyn std::io::Read + Send + Sync>>>,
}

#[derive(Deserialize)]
struct PublishEnvelope {
    id: String,
}

#[derive(Deserialize)]
struct DeleteEnvelope {
    deleted: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Deserialize)]
struct RemoteError {
    kind: String,
    message: Option<String>,
    hint: Option<String>,
    id: Option<String>,
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    sender_username: &'a str,
    body: &'a str,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            inner: Arc::new(RemoteClientInner {
                base_url,
                agent: build_agent(DEFAULT_TIMEOUT),
            }),
        })
    }

    /// Replaces the overall per-request timeout (connect, send, and body read).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let agent = build_agent(timeout);
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.agent = agent;
        } else {
            self.inner = Arc::new(RemoteClientInner {
                base_url: self.inner.base_url.clone(),
                agent,
            });
        }
        self
    }

    pub fn publish(&self, sender_username: &str, body: &str) -> ApiResult<String> {
        let url = build_url(&self.inner.base_url, &["v0", "messages"])?;
        let payload = PublishRequest {
            sender_username,
            body,
        };
        let envelope: PublishEnvelope = self.request_json("POST", &url, &payload)?;
        Ok(envelope.id)
    }

    /// Deletes the oldest message whose id starts with `id_prefix` and returns its full id.
    pub fn delete(&self, id_prefix: &str) -> ApiResult<String> {
        if id_prefix.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("message id prefix must not be empty")
                .with_hint("Pass the first 4 - 8 characters of the message id."));
        }
        let url = build_url(&self.inner.base_url, &["v0", "messages", id_prefix])?;
        let envelope: DeleteEnvelope = self
            .request_json::<(), _>("DELETE", &url, &())
            .map_err(|err| {
                if err.id().is_some() {
                    err
                } else {
                    err.with_id(id_prefix)
                }
            })?;
        Ok(envelope.deleted)
    }

    pub fn list(&self) -> ApiResult<RemoteList> {
        let url = build_url(&self.inner.base_url, &["v0", "messages"])?;
        let response = self
            .inner
            .agent
            .request("GET", url.as_str())
            .set("Accept", "application/jsonl")
            .call();
        match response {
            Ok(resp) => Ok(RemoteList {
                reader: Some(BufReader::new(resp.into_reader())),
            }),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Io)
                .with_message("request failed")
                .with_source(err)),
        }
    }

    fn request_json<T, R>(&self, method: &str, url: &Url, body: &T) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = self
            .inner
            .agent
            .request(method, url.as_str())
            .set("Accept", "application/json");
        let response = if method == "GET" || method == "DELETE" {
            request.call()
        } else {
            let payload = serde_json::to_string(body).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode request json")
                    .with_source(err)
            })?;
            request
                .set("Content-Type", "application/json")
                .send_string(&payload)
        };

        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Io)
                .with_message("request failed")
                .with_source(err)),
        }
    }
}

impl RemoteList {
    pub fn next_message(&mut self) -> ApiResult<Option<Message>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        loop {
            let mut line = String::new();
            let bytes = reader.read_line(&mut line).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read message stream")
                    .with_source(err)
            })?;
            if bytes == 0 {
                self.reader = None;
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(&line).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("invalid message json in stream")
                    .with_source(err)
            })?;
            return Ok(Some(message));
        }
    }

    /// Drops the connection; the server sees a failed send and stops streaming.
    pub fn cancel(&mut self) {
        self.reader = None;
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid server url")
            .with_hint("Use a url like http://127.0.0.1:50051.")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(
            Error::new(ErrorKind::Usage).with_message("server url must use http or https scheme")
        );
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("server url must not include a path"));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("server url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return error_from_remote(envelope.error);
    }
    let kind = error_kind_from_status(status);
    Error::new(kind).with_message(format!("server error status {status}"))
}

fn error_from_remote(remote: RemoteError) -> Error {
    let mut err = Error::new(parse_error_kind(&remote.kind));
    if let Some(message) = remote.message {
        err = err.with_message(message);
    }
    if let Some(hint) = remote.hint {
        err = err.with_hint(hint);
    }
    if let Some(id) = remote.id {
        err = err.with_id(id);
    }
    err
}

fn parse_error_kind(kind: &str) -> ErrorKind {
    match kind {
        "Internal" => ErrorKind::Internal,
        "Usage" => ErrorKind::Usage,
        "NotFound" => ErrorKind::NotFound,
        "Busy" => ErrorKind::Busy,
        "Io" => ErrorKind::Io,
        _ => ErrorKind::Internal,
    }
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 413 | 422 => ErrorKind::Usage,
        404 => ErrorKind::NotFound,
        423 => ErrorKind::Busy,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Io,
    }
}
