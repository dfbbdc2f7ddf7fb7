//! Concurrency token and save status for a board session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Saved,
    Error,
}

/// What the remote store acknowledged for one save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveAck {
    pub revision_token: Option<String>,
    pub next_sequence_number: Option<u64>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    revision_token: Option<String>,
    sequence_number: u64,
    is_dirty: bool,
    status: SyncStatus,
    last_saved_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a document freshly loaded from the remote store.
    pub fn loaded(revision_token: Option<String>, sequence_number: u64) -> Self {
        Self {
            revision_token,
            sequence_number,
            status: SyncStatus::Saved,
            ..Self::default()
        }
    }

    pub fn revision_token(&self) -> Option<&str> {
        self.revision_token.as_deref()
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_syncing(&mut self) {
        self.status = SyncStatus::Syncing;
    }

    /// Apply an acknowledged save. The acknowledged token replaces the old
    /// one (an absent token falls back to sequence-number preconditions).
    /// `still_dirty` is set when edits landed while the save was in flight.
    pub fn record_success(&mut self, ack: SaveAck, still_dirty: bool) {
        self.revision_token = ack.revision_token;
        self.sequence_number = match ack.next_sequence_number {
            Some(next) => next.max(self.sequence_number),
            None => self.sequence_number + 1,
        };
        self.is_dirty = still_dirty;
        self.status = SyncStatus::Saved;
        self.last_saved_at = Some(ack.saved_at);
        self.last_error = None;
    }

    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.is_dirty = true;
        self.status = SyncStatus::Error;
        self.last_error = Some(message.into());
    }
}
