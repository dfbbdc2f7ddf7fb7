//! # inkboard-core: Board document model and edit log
//!
//! ```text
//!   user edit
//!       │
//!       ▼
//!   Board::add_stroke / undo / …      ◀─── synchronous, never fails
//!       │
//!       ├──► History      (inverse entries, undo/redo stacks)
//!       ├──► OpBuffer     (diff ops for the next diff save)
//!       └──► SyncState    (dirty flag, revision token, sequence number)
//! ```
//!
//! ## Modules
//!
//! - [`document`]: pages, strokes and assets (opaque payloads)
//! - [`history`]: undo/redo operation log
//! - [`ops`]: diff operations and the sync buffer
//! - [`sync_state`]: concurrency token and save status
//! - [`board`]: the document state manager tying them together

pub mod board;
pub mod document;
pub mod error;
pub mod history;
pub mod ops;
pub mod sync_state;

pub use board::Board;
pub use document::{Asset, Document, Element, Page, Stroke};
pub use error::BoardError;
pub use history::{History, HistoryEntry, DEFAULT_HISTORY_LIMIT};
pub use ops::{DiffKind, DiffOp, DiffOpType, OpBuffer, PendingOps};
pub use sync_state::{SaveAck, SyncState, SyncStatus};
