use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which save endpoint produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoint {
    Diff,
    SaveStream,
    Resync,
    Create,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Diff => "diff",
            Self::SaveStream => "save-stream",
            Self::Resync => "resync",
            Self::Create => "create",
        })
    }
}

/// Error body returned by the remote store, completed from response headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    pub error: Option<String>,
    pub limit: Option<u64>,
    pub request_id: Option<String>,
    pub backoff_ms: Option<u64>,
    pub server_rev: Option<u64>,
    pub detail: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Why a save attempt failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SaveError {
    #[error("Revision conflict on {endpoint} (status {status})")]
    Conflict {
        endpoint: Endpoint,
        status: u16,
        payload: ErrorPayload,
    },
    #[error("Payload too large for {endpoint}: {size} bytes (limit {limit})")]
    PayloadTooLarge {
        endpoint: Endpoint,
        size: usize,
        limit: usize,
    },
    #[error("Unsupported media type on {endpoint}")]
    UnsupportedMedia {
        endpoint: Endpoint,
        payload: ErrorPayload,
    },
    #[error("Invalid operations rejected by {endpoint}")]
    InvalidOperations {
        endpoint: Endpoint,
        payload: ErrorPayload,
    },
    #[error("Rate limited on {endpoint}, retry in {backoff:?}")]
    RateLimited {
        endpoint: Endpoint,
        backoff: Duration,
        payload: ErrorPayload,
    },
    #[error("Session expired (status {status})")]
    SessionExpired { status: u16 },
    #[error("Unexpected status {status} from {endpoint}")]
    Http {
        endpoint: Endpoint,
        status: u16,
        payload: ErrorPayload,
    },
    #[error("Resync failed: {0}")]
    ResyncFailed(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Save was abandoned before it completed")]
    Abandoned,
}

impl From<serde_json::Error> for SaveError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// How the scheduler should react to a failed save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry on the normal debounce cycle.
    Retriable,
    /// Retry once after the given delay.
    RetryAfter(Duration),
    /// Do not retry automatically.
    Terminal,
}

impl SaveError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::RateLimited { backoff, .. } => FailureClass::RetryAfter(*backoff),
            Self::Transport(_) | Self::ResyncFailed(_) | Self::Abandoned => FailureClass::Retriable,
            Self::Http { status, .. } if *status >= 500 => FailureClass::Retriable,
            Self::Conflict { .. }
            | Self::PayloadTooLarge { .. }
            | Self::UnsupportedMedia { .. }
            | Self::InvalidOperations { .. }
            | Self::SessionExpired { .. }
            | Self::Http { .. }
            | Self::Serialization(_) => FailureClass::Terminal,
        }
    }

    /// HTTP status reported by the server, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Conflict { status, .. }
            | Self::SessionExpired { status }
            | Self::Http { status, .. } => Some(*status),
            Self::PayloadTooLarge { .. } => Some(413),
            Self::UnsupportedMedia { .. } => Some(415),
            Self::InvalidOperations { .. } => Some(422),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Conflict { payload, .. }
            | Self::UnsupportedMedia { payload, .. }
            | Self::InvalidOperations { payload, .. }
            | Self::RateLimited { payload, .. }
            | Self::Http { payload, .. } => payload.request_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        let rate_limited = SaveError::RateLimited {
            endpoint: Endpoint::Diff,
            backoff: Duration::from_millis(2500),
            payload: ErrorPayload::default(),
        };
        assert_eq!(
            rate_limited.class(),
            FailureClass::RetryAfter(Duration::from_millis(2500))
        );
        assert_eq!(
            SaveError::Transport(TransportError::Network("reset".into())).class(),
            FailureClass::Retriable
        );
        assert_eq!(
            SaveError::PayloadTooLarge {
                endpoint: Endpoint::SaveStream,
                size: 3,
                limit: 2
            }
            .class(),
            FailureClass::Terminal
        );
        let server = SaveError::Http {
            endpoint: Endpoint::Diff,
            status: 503,
            payload: ErrorPayload::default(),
        };
        assert_eq!(server.class(), FailureClass::Retriable);
        assert_eq!(server.status(), Some(503));
    }

    #[test]
    fn test_error_payload_tolerates_unknown_fields() {
        let payload: ErrorPayload =
            serde_json::from_str(r#"{"error":"rate_limited","backoff_ms":800,"extra":1}"#).unwrap();
        assert_eq!(payload.backoff_ms, Some(800));
        assert_eq!(payload.error.as_deref(), Some("rate_limited"));
    }
}
