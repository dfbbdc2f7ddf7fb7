//! # inkboard-sync
//!
//! Keeps a locally edited board saved to the remote store without visible
//! glitches.
//!
//! ```text
//!  Board edit ──► AutosaveScheduler ──(deadline)──► BoardSession::run_save
//!                                                        │
//!                       RenderIsolation.begin_save ◀─────┤
//!                                                        ▼
//!                                    SaveCoordinator ──► Transport
//!                                      │  diff / stream by size
//!                                      │  If-Match / X-Rev
//!                                      └─ 409/412 ─► resync ─► retry once
//! ```
//!
//! ## Modules
//!
//! - [`config`]: autosave, coordinator and session settings
//! - [`error`]: save failure taxonomy
//! - [`protocol`]: wire bodies, routing by size, header parsing
//! - [`transport`]: transport trait, `reqwest` and in-memory implementations
//! - [`coordinator`]: single-flight save with conflict resync
//! - [`scheduler`]: debounce / idle / backoff state machine
//! - [`session`]: the per-board actor wiring it all together

pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use config::{AutosaveConfig, CoordinatorConfig, SchedulePolicy, SessionConfig};
pub use coordinator::{CreatedSession, ResyncResult, SaveCoordinator, SaveReceipt, SaveRequest};
pub use error::{Endpoint, ErrorPayload, FailureClass, SaveError, TransportError};
pub use protocol::{select_protocol, Heartbeat, Protocol};
pub use scheduler::{AutosaveScheduler, SchedulerState, TimerKind};
pub use session::{
    BoardSession, SaveOutcome, SessionClosed, SessionCommand, SessionHandle, SessionStatus,
};
pub use transport::{HttpTransport, MemoryTransport, RecordedRequest, ScriptedResponse, Transport};
