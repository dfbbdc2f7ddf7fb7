//! Save wire format.
//!
//! Two write endpoints, chosen per save by serialized size:
//!
//! ```text
//!  ops non-empty && |{rev, ops, client_ts}| <= diff limit   ──► PATCH .../diff/
//!  else |{state}| <= stream limit                           ──► POST  .../save-stream/
//!  else                                                     ──► PayloadTooLarge (no request)
//! ```
//!
//! Both carry a precondition: `If-Match: <revision token>` when a token is
//! known, otherwise `X-Rev: <sequence number>`.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use http::HeaderMap;
use inkboard_core::DiffOp;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CoordinatorConfig;
use crate::error::{Endpoint, ErrorPayload, SaveError};

pub const HEADER_IF_MATCH: &str = "If-Match";
pub const HEADER_REV: &str = "X-Rev";
pub const HEADER_ETAG: &str = "ETag";
pub const HEADER_REQUEST_ID: &str = "X-Request-ID";
pub const HEADER_BACKOFF_MS: &str = "X-Backoff-Ms";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

static REV_TOKEN_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)rev:(\d+)").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Diff,
    Stream,
}

impl Protocol {
    pub fn endpoint(self) -> Endpoint {
        match self {
            Self::Diff => Endpoint::Diff,
            Self::Stream => Endpoint::SaveStream,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DiffSaveBody<'a> {
    pub rev: u64,
    pub ops: &'a [DiffOp],
    pub client_ts: String,
}

#[derive(Debug, Serialize)]
pub struct StreamSaveBody<'a> {
    pub state: &'a Value,
}

/// Success body of either write endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SaveResponseBody {
    pub server_ts: Option<String>,
    pub updated_at: Option<String>,
    pub next_rev: Option<u64>,
}

impl SaveResponseBody {
    /// Server timestamp, falling back to `updated_at`, then to now.
    pub fn server_time(&self) -> DateTime<Utc> {
        self.server_ts
            .as_deref()
            .or(self.updated_at.as_deref())
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }
}

/// Body of the session-create request: the board name and its full state.
#[derive(Debug, Serialize)]
pub struct CreateSessionBody<'a> {
    pub name: &'a str,
    pub state: &'a Value,
}

/// Success body of the session-create endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedSessionBody {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(flatten)]
    pub save: SaveResponseBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResyncBody {
    pub state: Value,
}

/// Page-exit beacon. Never carries document state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub last_local_rev: u64,
    pub version: String,
}

impl Heartbeat {
    pub fn new(last_local_rev: u64, version: impl Into<String>) -> Self {
        Self {
            kind: "heartbeat",
            last_local_rev,
            version: version.into(),
        }
    }
}

/// A serialized save body and the endpoint it goes to.
#[derive(Debug, Clone)]
pub struct EncodedSave {
    pub protocol: Protocol,
    pub body: Vec<u8>,
}

pub fn client_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn encode_diff(rev: u64, ops: &[DiffOp]) -> Result<Vec<u8>, SaveError> {
    let body = DiffSaveBody {
        rev,
        ops,
        client_ts: client_timestamp(),
    };
    Ok(serde_json::to_vec(&body)?)
}

pub fn encode_stream(state: &Value) -> Result<Vec<u8>, SaveError> {
    Ok(serde_json::to_vec(&StreamSaveBody { state })?)
}

/// Session-create body, held to the stream-save size limit.
pub fn encode_create(
    config: &CoordinatorConfig,
    name: &str,
    state: &Value,
) -> Result<Vec<u8>, SaveError> {
    let body = serde_json::to_vec(&CreateSessionBody { name, state })?;
    if body.len() > config.stream_limit_bytes {
        log::error!(
            "New session state is {} bytes, over the {} byte limit",
            body.len(),
            config.stream_limit_bytes
        );
        return Err(SaveError::PayloadTooLarge {
            endpoint: Endpoint::Create,
            size: body.len(),
            limit: config.stream_limit_bytes,
        });
    }
    Ok(body)
}

/// Pick the save protocol by serialized size.
pub fn select_protocol(
    config: &CoordinatorConfig,
    rev: u64,
    ops: &[DiffOp],
    state: &Value,
) -> Result<EncodedSave, SaveError> {
    if !ops.is_empty() {
        let body = encode_diff(rev, ops)?;
        if body.len() <= config.diff_limit_bytes {
            log::debug!("Diff save: {} op(s), {} bytes", ops.len(), body.len());
            return Ok(EncodedSave {
                protocol: Protocol::Diff,
                body,
            });
        }
        log::debug!(
            "Diff payload {} bytes exceeds {} byte limit, using stream save",
            body.len(),
            config.diff_limit_bytes
        );
    }

    let body = encode_stream(state)?;
    if body.len() > config.stream_limit_bytes {
        log::error!(
            "Full state is {} bytes, over the {} byte stream limit",
            body.len(),
            config.stream_limit_bytes
        );
        return Err(SaveError::PayloadTooLarge {
            endpoint: Endpoint::SaveStream,
            size: body.len(),
            limit: config.stream_limit_bytes,
        });
    }
    log::debug!("Stream save: {} bytes", body.len());
    Ok(EncodedSave {
        protocol: Protocol::Stream,
        body,
    })
}

/// Extract the numeric revision embedded in a token such as `W/"rev:42"`.
pub fn parse_rev_from_token(token: &str) -> Option<u64> {
    let re = REV_TOKEN_RE.as_ref()?;
    re.captures(token)?.get(1)?.as_str().parse().ok()
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Parse an error body and fill `request_id` / `backoff_ms` from headers
/// when the body omits them.
pub fn error_payload(body: &[u8], headers: &HeaderMap) -> ErrorPayload {
    let mut payload: ErrorPayload = serde_json::from_slice(body).unwrap_or_default();
    if payload.request_id.is_none() {
        payload.request_id = header_str(headers, HEADER_REQUEST_ID).map(str::to_string);
    }
    if payload.backoff_ms.is_none() {
        payload.backoff_ms = backoff_from_headers(headers);
    }
    payload
}

fn backoff_from_headers(headers: &HeaderMap) -> Option<u64> {
    if let Some(ms) = header_str(headers, HEADER_BACKOFF_MS).and_then(|v| v.trim().parse::<f64>().ok()) {
        if ms.is_finite() && ms > 0.0 {
            return Some(ms as u64);
        }
    }
    let secs = header_str(headers, HEADER_RETRY_AFTER)?.trim().parse::<f64>().ok()?;
    (secs.is_finite() && secs > 0.0).then(|| (secs * 1000.0).round() as u64)
}

/// Backoff for a 429 response.
pub fn rate_limit_backoff(payload: &ErrorPayload, default: Duration) -> Duration {
    payload
        .backoff_ms
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(default)
}
