//! Save coordinator.
//!
//! Owns the write protocol for one session:
//!
//! - **Routing**: diff save or stream save by serialized size
//!   ([`select_protocol`]).
//! - **Preconditions**: `If-Match` with the revision token, else `X-Rev`.
//! - **Conflicts**: on 409/412, resync once; retry once after a short jitter
//!   only if the resynced token differs from the one that was rejected.
//! - **Single flight**: one request on the wire at a time. Calls that arrive
//!   meanwhile collapse into one queued slot (latest wins) and every caller
//!   waiting on that slot gets the result of the run that used it.
//! - **Creation**: a board that has never been stored is POSTed whole to
//!   the sessions collection, which assigns its id.
//!
//! ```text
//!  save(S1) ──► run(S1) ─────────► run(S3) ──► idle
//!  save(S2) ──► queued=S2 ─┐          │
//!  save(S3) ──► queued=S3 ─┴─ waiters ┴──► S2, S3 resolved with run(S3)
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::{header, Method, Request, Response, StatusCode};
use inkboard_core::{DiffOp, SaveAck};
use rand::Rng;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::CoordinatorConfig;
use crate::error::{Endpoint, SaveError};
use crate::protocol::{
    encode_create, encode_diff, error_payload, header_str, parse_rev_from_token,
    rate_limit_backoff, select_protocol, CreatedSessionBody, Heartbeat, Protocol, ResyncBody,
    SaveResponseBody, HEADER_ETAG, HEADER_IF_MATCH, HEADER_REQUEST_ID, HEADER_REV,
};
use crate::transport::Transport;

pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(1000);

/// Everything one save attempt needs, captured when the save starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub session_id: String,
    pub revision_token: Option<String>,
    pub sequence_number: u64,
    pub ops: Vec<DiffOp>,
    pub state: Value,
    /// Draws blocked during the previous save window, for logging.
    pub extra_draws: u64,
}

/// A save the remote store accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReceipt {
    pub server_ts: DateTime<Utc>,
    pub next_sequence_number: Option<u64>,
    pub revision_token: Option<String>,
    pub protocol: Protocol,
    pub rtt: Duration,
    pub retried_after_resync: bool,
    pub request_id: Option<String>,
}

impl SaveReceipt {
    pub fn to_ack(&self) -> SaveAck {
        SaveAck {
            revision_token: self.revision_token.clone(),
            next_sequence_number: self.next_sequence_number,
            saved_at: self.server_ts,
        }
    }
}

/// Authoritative server state fetched after a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ResyncResult {
    pub state: Value,
    pub revision_token: Option<String>,
    pub sequence_number: Option<u64>,
}

/// A remote session created for a board that had none.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSession {
    pub session_id: String,
    pub name: Option<String>,
    pub receipt: SaveReceipt,
}

type Waiter = oneshot::Sender<Result<SaveReceipt, SaveError>>;

#[derive(Default)]
struct FlightState {
    in_flight: bool,
    queued: Option<SaveRequest>,
    waiters: Vec<Waiter>,
}

/// Clears the in-flight flag if the driving future is dropped mid-drain.
/// Waiters still queued are dropped and observe [`SaveError::Abandoned`].
struct FlightGuard<'a> {
    flight: &'a Mutex<FlightState>,
    armed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut flight = lock(self.flight);
            flight.in_flight = false;
            flight.queued = None;
            flight.waiters.clear();
        }
    }
}

fn lock(flight: &Mutex<FlightState>) -> MutexGuard<'_, FlightState> {
    flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SaveCoordinator<T> {
    transport: Arc<T>,
    config: CoordinatorConfig,
    rate_limit_default: Duration,
    flight: Mutex<FlightState>,
}

impl<T: Transport> SaveCoordinator<T> {
    pub fn new(transport: Arc<T>, config: CoordinatorConfig) -> Self {
        Self {
            transport,
            config,
            rate_limit_default: DEFAULT_RATE_LIMIT_BACKOFF,
            flight: Mutex::new(FlightState::default()),
        }
    }

    /// Backoff used for 429 responses that name none.
    pub fn with_rate_limit_default(mut self, backoff: Duration) -> Self {
        self.rate_limit_default = backoff;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn is_in_flight(&self) -> bool {
        lock(&self.flight).in_flight
    }

    pub fn has_queued(&self) -> bool {
        lock(&self.flight).queued.is_some()
    }

    /// Save `request`, or queue it behind the save already in flight.
    pub async fn save(&self, request: SaveRequest) -> Result<SaveReceipt, SaveError> {
        let waiter = {
            let mut flight = lock(&self.flight);
            if flight.in_flight {
                if flight.queued.replace(request).is_some() {
                    log::debug!("Replacing queued save (latest wins)");
                } else {
                    log::debug!("Save in flight, queueing");
                }
                let (tx, rx) = oneshot::channel();
                flight.waiters.push(tx);
                Err(rx)
            } else {
                flight.in_flight = true;
                Ok(request)
            }
        };

        let request = match waiter {
            Ok(request) => request,
            Err(rx) => return rx.await.unwrap_or(Err(SaveError::Abandoned)),
        };

        let mut guard = FlightGuard {
            flight: &self.flight,
            armed: true,
        };
        let result = self.run(request).await;

        loop {
            let next = {
                let mut flight = lock(&self.flight);
                match flight.queued.take() {
                    Some(queued) => Some((queued, std::mem::take(&mut flight.waiters))),
                    None => {
                        flight.in_flight = false;
                        None
                    }
                }
            };
            let Some((queued, waiters)) = next else {
                break;
            };
            let queued_result = self.run(queued).await;
            for waiter in waiters {
                let _ = waiter.send(queued_result.clone());
            }
        }
        guard.armed = false;
        result
    }

    /// Fetch the authoritative server state and revision token.
    pub async fn resync_session(&self, session_id: &str) -> Result<ResyncResult, SaveError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(self.config.session_path(session_id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Vec::new())
            .map_err(|e| SaveError::ResyncFailed(e.to_string()))?;

        let response = self.transport.send(request).await?;
        if !response.status().is_success() {
            return Err(SaveError::ResyncFailed(format!("status {}", response.status())));
        }
        let body: ResyncBody = serde_json::from_slice(response.body())
            .map_err(|e| SaveError::ResyncFailed(e.to_string()))?;
        let revision_token = header_str(response.headers(), HEADER_ETAG).map(str::to_string);
        let sequence_number = revision_token.as_deref().and_then(parse_rev_from_token);
        log::info!("Resynced {session_id}: token {revision_token:?}, rev {sequence_number:?}");
        Ok(ResyncResult {
            state: body.state,
            revision_token,
            sequence_number,
        })
    }

    /// Create a remote session holding `state`. Used for boards that were
    /// never loaded from the store.
    pub async fn create_session(&self, name: &str, state: &Value) -> Result<CreatedSession, SaveError> {
        let started = Instant::now();
        let body = encode_create(&self.config, name, state)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.config.sessions_path())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .map_err(|e| SaveError::Serialization(e.to_string()))?;
        let sent = request.body().len();

        let response = self.transport.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let err = self.failure(Endpoint::Create, self.config.stream_limit_bytes, &response, sent);
            log::warn!("Session create failed: {err}");
            return Err(err);
        }

        let created: CreatedSessionBody = serde_json::from_slice(response.body())?;
        let headers = response.headers();
        let revision_token = header_str(headers, HEADER_ETAG).map(str::to_string);
        let receipt = SaveReceipt {
            server_ts: created.save.server_time(),
            next_sequence_number: created
                .save
                .next_rev
                .or_else(|| revision_token.as_deref().and_then(parse_rev_from_token)),
            revision_token,
            protocol: Protocol::Stream,
            rtt: started.elapsed(),
            retried_after_resync: false,
            request_id: header_str(headers, HEADER_REQUEST_ID).map(str::to_string),
        };
        log::info!("Created session {} ({sent} bytes, rtt {:?})", created.id, receipt.rtt);
        Ok(CreatedSession {
            session_id: created.id,
            name: created.name,
            receipt,
        })
    }

    /// Page-exit heartbeat. Skipped when it would exceed the beacon cap.
    pub fn send_heartbeat(&self, session_id: &str, last_local_rev: u64) -> bool {
        let beat = Heartbeat::new(last_local_rev, self.config.client_version.clone());
        let body = match serde_json::to_vec(&beat) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Heartbeat not serializable: {e}");
                return false;
            }
        };
        if body.len() > self.config.beacon_limit_bytes {
            log::warn!(
                "Heartbeat is {} bytes, over the {} byte beacon cap; not sent",
                body.len(),
                self.config.beacon_limit_bytes
            );
            return false;
        }
        let sent = self
            .transport
            .send_beacon(&self.config.beacon_path(session_id), body);
        log::debug!("Heartbeat for {session_id} at rev {last_local_rev}: queued={sent}");
        sent
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn run(&self, request: SaveRequest) -> Result<SaveReceipt, SaveError> {
        let started = Instant::now();
        let encoded = select_protocol(
            &self.config,
            request.sequence_number,
            &request.ops,
            &request.state,
        )?;
        let protocol = encoded.protocol;
        let result = self.save_with_resync(&request, protocol, encoded.body).await;
        let rtt = started.elapsed();

        match &result {
            Ok(receipt) => log::info!(
                "Saved {} via {}: rtt {:?}, extra draws {}, retried {}",
                request.session_id,
                protocol.endpoint(),
                rtt,
                request.extra_draws,
                receipt.retried_after_resync
            ),
            Err(e) => log::warn!(
                "Save of {} via {} failed after {:?}: {e}",
                request.session_id,
                protocol.endpoint(),
                rtt
            ),
        }
        result.map(|receipt| SaveReceipt { rtt, ..receipt })
    }

    async fn save_with_resync(
        &self,
        request: &SaveRequest,
        protocol: Protocol,
        body: Vec<u8>,
    ) -> Result<SaveReceipt, SaveError> {
        let token = request.revision_token.as_deref();
        let conflict = match self
            .attempt(protocol, &request.session_id, token, request.sequence_number, &body)
            .await
        {
            Err(conflict @ SaveError::Conflict { .. }) => conflict,
            other => return other,
        };

        let resync = self.resync_session(&request.session_id).await?;
        let Some(new_token) = resync.revision_token.filter(|t| Some(t.as_str()) != token) else {
            log::warn!("Resync returned the same revision token; not retrying");
            return Err(conflict);
        };

        let (rev, retry_body) = match protocol {
            Protocol::Diff => {
                let Some(rev) = resync.sequence_number else {
                    log::warn!("Resynced token {new_token} carries no revision; not retrying diff");
                    return Err(conflict);
                };
                (rev, encode_diff(rev, &request.ops)?)
            }
            Protocol::Stream => (resync.sequence_number.unwrap_or(request.sequence_number), body),
        };

        let jitter = self.retry_jitter();
        log::info!("Retrying {} after resync in {jitter:?}", protocol.endpoint());
        tokio::time::sleep(jitter).await;

        let receipt = self
            .attempt(protocol, &request.session_id, Some(&new_token), rev, &retry_body)
            .await?;
        // Without a rev in the ack, the server moved one past the resynced rev.
        let next_sequence_number = receipt
            .next_sequence_number
            .or(resync.sequence_number.map(|r| r + 1));
        Ok(SaveReceipt {
            next_sequence_number,
            retried_after_resync: true,
            ..receipt
        })
    }

    fn retry_jitter(&self) -> Duration {
        let min = self.config.retry_jitter_min_ms;
        let max = self.config.retry_jitter_max_ms.max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    async fn attempt(
        &self,
        protocol: Protocol,
        session_id: &str,
        token: Option<&str>,
        rev: u64,
        body: &[u8],
    ) -> Result<SaveReceipt, SaveError> {
        let (method, path) = match protocol {
            Protocol::Diff => (Method::PATCH, self.config.diff_path(session_id)),
            Protocol::Stream => (Method::POST, self.config.stream_path(session_id)),
        };
        let builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        let builder = match token {
            Some(token) => builder.header(HEADER_IF_MATCH, token),
            None => builder.header(HEADER_REV, rev.to_string()),
        };
        let request = builder
            .body(body.to_vec())
            .map_err(|e| SaveError::Serialization(e.to_string()))?;

        let response = self.transport.send(request).await?;
        self.interpret(protocol, response, body)
    }

    fn interpret(
        &self,
        protocol: Protocol,
        response: Response<Vec<u8>>,
        sent: &[u8],
    ) -> Result<SaveReceipt, SaveError> {
        let endpoint = protocol.endpoint();
        let status = response.status();
        let headers = response.headers();

        if status == StatusCode::OK || status == StatusCode::NO_CONTENT {
            let body: SaveResponseBody = if response.body().is_empty() {
                SaveResponseBody::default()
            } else {
                serde_json::from_slice(response.body()).unwrap_or_default()
            };
            let revision_token = header_str(headers, HEADER_ETAG).map(str::to_string);
            return Ok(SaveReceipt {
                server_ts: body.server_time(),
                next_sequence_number: body
                    .next_rev
                    .or_else(|| revision_token.as_deref().and_then(parse_rev_from_token)),
                revision_token,
                protocol,
                rtt: Duration::ZERO,
                retried_after_resync: false,
                request_id: header_str(headers, HEADER_REQUEST_ID).map(str::to_string),
            });
        }

        let limit = match protocol {
            Protocol::Diff => self.config.diff_limit_bytes,
            Protocol::Stream => self.config.stream_limit_bytes,
        };
        let err = self.failure(endpoint, limit, &response, sent.len());
        if matches!(
            err,
            SaveError::UnsupportedMedia { .. } | SaveError::InvalidOperations { .. }
        ) {
            log::error!(
                "{endpoint} rejected payload (request {:?}): {}",
                err.request_id(),
                String::from_utf8_lossy(sent)
            );
        }
        Err(err)
    }

    /// Map a non-success response to a [`SaveError`].
    fn failure(
        &self,
        endpoint: Endpoint,
        limit: usize,
        response: &Response<Vec<u8>>,
        sent: usize,
    ) -> SaveError {
        let payload = error_payload(response.body(), response.headers());
        let code = response.status().as_u16();
        let err = match code {
            409 | 412 => SaveError::Conflict {
                endpoint,
                status: code,
                payload,
            },
            413 => SaveError::PayloadTooLarge {
                endpoint,
                size: sent,
                limit: payload.limit.map_or(limit, |l| l as usize),
            },
            415 => SaveError::UnsupportedMedia { endpoint, payload },
            422 => SaveError::InvalidOperations { endpoint, payload },
            429 => SaveError::RateLimited {
                endpoint,
                backoff: rate_limit_backoff(&payload, self.rate_limit_default),
                payload,
            },
            401 | 403 => SaveError::SessionExpired { status: code },
            _ => SaveError::Http {
                endpoint,
                status: code,
                payload,
            },
        };
        if let Some(request_id) = err.request_id() {
            log::debug!("{endpoint} failure request id: {request_id}");
        }
        err
    }
}
