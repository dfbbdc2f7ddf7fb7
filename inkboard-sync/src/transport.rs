//! Transport seam.
//!
//! The coordinator speaks `http::Request<Vec<u8>>` / `http::Response<Vec<u8>>`
//! with path-only URIs. [`HttpTransport`] resolves them against a base URL
//! with `reqwest`; [`MemoryTransport`] answers from a script and records what
//! it was sent.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use serde_json::Value;

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, TransportError>;

    /// Fire-and-forget send. Returns whether the beacon was queued.
    fn send_beacon(&self, path: &str, body: Vec<u8>) -> bool;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn build(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, TransportError> {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .ok_or_else(|| TransportError::InvalidRequest(format!("no path in {}", parts.uri)))?;

        let response = self
            .build(parts.method, &path)
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let mut out = Response::new(bytes.to_vec());
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        Ok(out)
    }

    fn send_beacon(&self, path: &str, body: Vec<u8>) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("No runtime available for beacon to {path}");
            return false;
        };
        let request = self
            .build(Method::POST, path)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body);
        let path = path.to_string();
        handle.spawn(async move {
            if let Err(e) = request.send().await {
                log::debug!("Beacon to {path} failed: {e}");
            }
        });
        true
    }
}

// ── In-memory transport ──────────────────────────────────────────────

/// A canned reply for [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    outcome: Result<(StatusCode, HeaderMap, Vec<u8>), TransportError>,
    delay: Duration,
}

impl ScriptedResponse {
    pub fn status(status: u16) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            outcome: Ok((status, HeaderMap::new(), Vec::new())),
            delay: Duration::ZERO,
        }
    }

    pub fn ok() -> Self {
        Self::status(200)
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(TransportError::Network(message.into())),
            delay: Duration::ZERO,
        }
    }

    /// Invalid header names or values are skipped with a warning.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .ok()
            .zip(HeaderValue::from_str(value).ok());
        match (self.outcome.as_mut(), parsed) {
            (Ok((_, headers, _)), Some((name, value))) => {
                headers.insert(name, value);
            }
            (Ok(_), None) => log::warn!("Skipping invalid scripted header {name:?}"),
            (Err(_), _) => {}
        }
        self
    }

    pub fn etag(self, token: &str) -> Self {
        self.header("etag", token)
    }

    pub fn json(mut self, body: Value) -> Self {
        if let Ok((_, _, bytes)) = self.outcome.as_mut() {
            *bytes = body.to_string().into_bytes();
        }
        self
    }

    /// Hold the reply for `delay` before answering.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Scripted transport. Replies are consumed in order; once the script runs
/// out every request gets `200 {}`.
#[derive(Default)]
pub struct MemoryTransport {
    script: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    beacons: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: ScriptedResponse) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn beacons(&self) -> Vec<(String, Vec<u8>)> {
        self.beacons.lock().map(|b| b.clone()).unwrap_or_default()
    }

    fn next_response(&self) -> ScriptedResponse {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| ScriptedResponse::ok().json(serde_json::json!({})))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, TransportError> {
        let (parts, body) = request.into_parts();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                method: parts.method,
                path: parts.uri.to_string(),
                headers: parts.headers,
                body,
            });
        }

        let scripted = self.next_response();
        if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }
        let (status, headers, body) = scripted.outcome?;
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    fn send_beacon(&self, path: &str, body: Vec<u8>) -> bool {
        match self.beacons.lock() {
            Ok(mut beacons) => {
                beacons.push((path.to_string(), body));
                true
            }
            Err(_) => false,
        }
    }
}
