//! Document state manager.
//!
//! `Board` is the only writer of the document. Every mutating method:
//!
//! 1. records the inverse [`HistoryEntry`] (clearing redo),
//! 2. appends the matching [`DiffOp`]s to the sync buffer, or forces a
//!    full-state save when an element cannot be serialized,
//! 3. marks the board dirty and bumps the edit generation.
//!
//! Methods return `true` when the document changed, which is the caller's
//! cue to ask the autosave scheduler for a save. Nothing here does I/O and
//! nothing here fails.

use serde_json::Value;

use crate::document::{Asset, Document, Element, Page, Stroke};
use crate::error::BoardError;
use crate::history::{History, HistoryEntry, DEFAULT_HISTORY_LIMIT};
use crate::ops::{DiffKind, DiffOp, OpBuffer, PendingOps};
use crate::sync_state::{SaveAck, SyncState};

pub struct Board {
    session_id: Option<String>,
    name: String,
    document: Document,
    history: History,
    pending: OpBuffer,
    sync: SyncState,
    /// Incremented on every mutation. Lets a finished save tell whether
    /// edits happened while it was in flight.
    generation: u64,
    exporting: bool,
}

impl Default for Board {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl Board {
    pub fn new(history_limit: usize) -> Self {
        Self {
            session_id: None,
            name: "Untitled".to_string(),
            document: Document::new(),
            history: History::new(history_limit),
            pending: OpBuffer::new(),
            sync: SyncState::new(),
            generation: 0,
            exporting: false,
        }
    }

    /// Replace the board with state loaded from the remote store.
    pub fn hydrate(
        &mut self,
        session_id: impl Into<String>,
        name: impl Into<String>,
        state: &Value,
        sync: SyncState,
    ) -> Result<(), BoardError> {
        let document = Document::from_state(state)?;
        self.session_id = Some(session_id.into());
        self.name = name.into();
        self.document = document;
        self.history.clear();
        self.pending = OpBuffer::new();
        self.sync = sync;
        log::info!(
            "Hydrated board {:?} with {} page(s)",
            self.session_id,
            self.document.pages.len()
        );
        Ok(())
    }

    /// Discard everything: default document, empty history and op buffer,
    /// fresh sync state and no session. The history depth is kept.
    pub fn reset(&mut self) {
        log::info!("Resetting board {:?}", self.session_id);
        *self = Self::new(self.history.limit());
    }

    /// Bind the board to a session the remote store just created.
    pub fn adopt_session(&mut self, session_id: impl Into<String>, name: Option<String>) {
        self.session_id = Some(session_id.into());
        if let Some(name) = name {
            self.name = name;
        }
        log::info!("Board bound to new session {:?}", self.session_id);
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn pages(&self) -> &[Page] {
        &self.document.pages
    }

    pub fn current_page_index(&self) -> usize {
        self.document.current_page_index
    }

    pub fn current_page(&self) -> &Page {
        self.document.current_page()
    }

    pub fn current_strokes(&self) -> &[Stroke] {
        &self.document.current_page().strokes
    }

    pub fn current_assets(&self) -> &[Asset] {
        &self.document.current_page().assets
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn pending_ops(&self) -> &OpBuffer {
        &self.pending
    }

    pub fn sync(&self) -> &SyncState {
        &self.sync
    }

    pub fn is_dirty(&self) -> bool {
        self.sync.is_dirty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_exporting(&self) -> bool {
        self.exporting
    }

    pub fn set_exporting(&mut self, exporting: bool) {
        self.exporting = exporting;
    }

    // ── Strokes ──────────────────────────────────────────────────────

    pub fn add_stroke(&mut self, stroke: Stroke) -> bool {
        let page = self.document.current_page_mut();
        let index = page.strokes.len();
        let op = DiffOp::add(DiffKind::Stroke, &page.id, &stroke);
        page.strokes.push(stroke.clone());
        self.commit(HistoryEntry::AddStroke { stroke, index }, op.map(|op| vec![op]));
        true
    }

    /// Replace the stroke with the same id. Unknown ids are ignored.
    pub fn update_stroke(&mut self, next: Stroke) -> bool {
        let page = self.document.current_page_mut();
        let Some(index) = page.stroke_index(&next.id) else {
            return false;
        };
        let prev = std::mem::replace(&mut page.strokes[index], next.clone());
        let op = DiffOp::update(DiffKind::Stroke, &page.id, &prev, &next);
        self.commit(HistoryEntry::UpdateStroke { prev, next, index }, op.map(|op| vec![op]));
        true
    }

    pub fn delete_stroke(&mut self, id: &str) -> bool {
        let page = self.document.current_page_mut();
        let Some(index) = page.stroke_index(id) else {
            return false;
        };
        let stroke = page.strokes.remove(index);
        let op = DiffOp::remove(DiffKind::Stroke, &page.id, id);
        self.commit(HistoryEntry::DeleteStroke { stroke, index }, Ok(vec![op]));
        true
    }

    // ── Assets ───────────────────────────────────────────────────────

    pub fn add_asset(&mut self, asset: Asset) -> bool {
        let page = self.document.current_page_mut();
        let index = page.assets.len();
        let op = DiffOp::add(DiffKind::Asset, &page.id, &asset);
        page.assets.push(asset.clone());
        log::debug!("Asset added: {}", asset.id);
        self.commit(HistoryEntry::AddAsset { asset, index }, op.map(|op| vec![op]));
        true
    }

    /// Place an image on the current page above existing assets.
    pub fn add_image_asset(&mut self, src: impl Into<String>, width: f64, height: f64) -> String {
        let z_index = self.current_assets().len() + 1;
        let asset = Asset::image(src, width, height, z_index);
        let id = asset.id.clone();
        self.add_asset(asset);
        id
    }

    pub fn update_asset(&mut self, next: Asset) -> bool {
        let page = self.document.current_page_mut();
        let Some(index) = page.asset_index(&next.id) else {
            return false;
        };
        let prev = std::mem::replace(&mut page.assets[index], next.clone());
        let op = DiffOp::update(DiffKind::Asset, &page.id, &prev, &next);
        self.commit(HistoryEntry::UpdateAsset { prev, next, index }, op.map(|op| vec![op]));
        true
    }

    pub fn delete_asset(&mut self, id: &str) -> bool {
        let page = self.document.current_page_mut();
        let Some(index) = page.asset_index(id) else {
            return false;
        };
        let asset = page.assets.remove(index);
        let op = DiffOp::remove(DiffKind::Asset, &page.id, id);
        log::debug!("Asset deleted: {id}");
        self.commit(HistoryEntry::DeleteAsset { asset, index }, Ok(vec![op]));
        true
    }

    /// Remove every stroke and asset from the current page.
    pub fn clear_board(&mut self) -> bool {
        let page = self.document.current_page_mut();
        if page.is_empty() {
            return false;
        }
        let prev_strokes = std::mem::take(&mut page.strokes);
        let prev_assets = std::mem::take(&mut page.assets);

        let mut ops: Vec<DiffOp> = prev_strokes
            .iter()
            .map(|s| DiffOp::remove(DiffKind::Stroke, &page.id, s.id()))
            .collect();
        ops.extend(
            prev_assets
                .iter()
                .map(|a| DiffOp::remove(DiffKind::Asset, &page.id, a.id())),
        );

        self.commit(
            HistoryEntry::ClearBoard {
                prev_strokes,
                prev_assets,
            },
            Ok(ops),
        );
        true
    }

    // ── Undo / redo ──────────────────────────────────────────────────

    /// Step back one entry. The diff buffer is discarded: positional
    /// replay makes earlier ops ambiguous, so the next save is full-state.
    pub fn undo(&mut self) -> bool {
        let page = self.document.current_page_mut();
        if !self.history.undo(page) {
            return false;
        }
        self.pending.force_full_save();
        self.touch();
        true
    }

    pub fn redo(&mut self) -> bool {
        let page = self.document.current_page_mut();
        if !self.history.redo(page) {
            return false;
        }
        self.pending.force_full_save();
        self.touch();
        true
    }

    // ── Pages ────────────────────────────────────────────────────────

    /// Switch pages. History is page-local, so it is cleared.
    pub fn go_to_page(&mut self, index: usize) -> bool {
        if index >= self.document.pages.len() || index == self.document.current_page_index {
            return false;
        }
        self.document.current_page_index = index;
        self.history.clear();
        true
    }

    /// Append a page and make it current. Returns its index.
    pub fn add_page(&mut self) -> usize {
        let page = Page::numbered(self.document.pages.len() + 1);
        self.document.pages.push(page);
        self.document.current_page_index = self.document.pages.len() - 1;
        self.history.clear();
        self.pending.force_full_save();
        self.touch();
        self.document.current_page_index
    }

    /// Remove a page. The last remaining page is never removed.
    pub fn delete_page(&mut self, index: usize) -> bool {
        if self.document.pages.len() <= 1 || index >= self.document.pages.len() {
            return false;
        }
        self.document.pages.remove(index);
        if self.document.current_page_index >= self.document.pages.len() {
            self.document.current_page_index = self.document.pages.len() - 1;
        }
        self.history.clear();
        self.pending.force_full_save();
        self.touch();
        true
    }

    pub fn rename_page(&mut self, index: usize, name: impl Into<String>) -> bool {
        let Some(page) = self.document.pages.get_mut(index) else {
            return false;
        };
        page.name = name.into();
        self.pending.force_full_save();
        self.touch();
        true
    }

    // ── Save hand-off ────────────────────────────────────────────────

    /// Drain the diff buffer for a save attempt.
    pub fn take_pending(&mut self) -> PendingOps {
        self.pending.drain()
    }

    /// Return ops from a failed save to the front of the buffer.
    pub fn restore_pending(&mut self, pending: PendingOps) {
        self.pending.restore(pending);
    }

    pub fn mark_syncing(&mut self) {
        self.sync.mark_syncing();
    }

    /// Record a successful save that started at edit generation `started_at`.
    pub fn mark_saved(&mut self, ack: SaveAck, started_at: u64) {
        let still_dirty = self.generation != started_at;
        self.sync.record_success(ack, still_dirty);
    }

    pub fn mark_save_failed(&mut self, message: impl Into<String>) {
        self.sync.record_failure(message);
    }

    // ── Internals ────────────────────────────────────────────────────

    fn commit(&mut self, entry: HistoryEntry, ops: Result<Vec<DiffOp>, serde_json::Error>) {
        self.history.push(entry);
        match ops {
            Ok(ops) => ops.into_iter().for_each(|op| self.pending.push(op)),
            Err(e) => {
                log::warn!("Element not serializable as a diff op, forcing full save: {e}");
                self.pending.force_full_save();
            }
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.sync.mark_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::DiffOpType;
    use chrono::Utc;

    fn ack() -> SaveAck {
        SaveAck {
            revision_token: None,
            next_sequence_number: None,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_add_stroke_records_history_and_op() {
        let mut board = Board::default();
        assert!(board.add_stroke(Stroke::new("s1")));

        assert_eq!(board.current_strokes().len(), 1);
        assert_eq!(board.history().undo_depth(), 1);
        assert_eq!(board.pending_ops().len(), 1);
        assert_eq!(board.pending_ops().ops()[0].op, DiffOpType::Add);
        assert!(board.is_dirty());
    }

    #[test]
    fn test_update_unknown_stroke_is_noop() {
        let mut board = Board::default();
        assert!(!board.update_stroke(Stroke::new("missing")));
        assert!(!board.delete_stroke("missing"));
        assert!(!board.is_dirty());
        assert_eq!(board.generation(), 0);
    }

    #[test]
    fn test_undo_forces_full_save() {
        let mut board = Board::default();
        board.add_stroke(Stroke::new("s1"));
        board.add_stroke(Stroke::new("s2"));
        assert_eq!(board.pending_ops().len(), 2);

        assert!(board.undo());
        assert!(board.pending_ops().is_empty());
        assert!(board.pending_ops().is_full_save_forced());
    }

    #[test]
    fn test_clear_board_emits_remove_per_element() {
        let mut board = Board::default();
        board.add_stroke(Stroke::new("s1"));
        board.add_asset(Asset::new("a1"));
        board.take_pending();

        assert!(board.clear_board());
        let ops = board.pending_ops().ops();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.op == DiffOpType::Remove));
        assert!(!board.clear_board());
    }

    #[test]
    fn test_page_switch_clears_history() {
        let mut board = Board::default();
        board.add_stroke(Stroke::new("s1"));
        let index = board.add_page();
        assert_eq!(index, 1);
        assert!(!board.can_undo());
        assert!(board.current_strokes().is_empty());

        assert!(board.go_to_page(0));
        assert_eq!(board.current_strokes().len(), 1);
        assert!(!board.go_to_page(5));
    }

    #[test]
    fn test_delete_page_keeps_one() {
        let mut board = Board::default();
        assert!(!board.delete_page(0));
        board.add_page();
        assert!(board.delete_page(1));
        assert_eq!(board.pages().len(), 1);
        assert_eq!(board.current_page_index(), 0);
    }

    #[test]
    fn test_saved_while_editing_stays_dirty() {
        let mut board = Board::default();
        board.add_stroke(Stroke::new("s1"));
        let started = board.generation();
        board.add_stroke(Stroke::new("s2"));

        board.mark_saved(ack(), started);
        assert!(board.is_dirty());

        let started = board.generation();
        board.mark_saved(ack(), started);
        assert!(!board.is_dirty());
    }

    #[test]
    fn test_image_asset_stacks_above_existing() {
        let mut board = Board::default();
        board.add_asset(Asset::new("a1"));
        let id = board.add_image_asset("https://cdn.example/x.png", 10.0, 20.0);
        let asset = board.current_assets().iter().find(|a| a.id == id).unwrap();
        assert_eq!(asset.props["zIndex"], 2);
    }

    #[test]
    fn test_reset_restores_fresh_board() {
        let mut board = Board::new(7);
        board.set_session_id("sess");
        board.add_stroke(Stroke::new("s1"));
        board.add_page();
        board.undo();
        board.mark_save_failed("offline");

        board.reset();
        assert_eq!(board.session_id(), None);
        assert_eq!(board.pages().len(), 1);
        assert!(board.current_strokes().is_empty());
        assert!(!board.can_undo() && !board.can_redo());
        assert!(board.pending_ops().is_empty());
        assert!(!board.pending_ops().is_full_save_forced());
        assert_eq!(board.generation(), 0);
        assert_eq!(board.sync(), &SyncState::new());
        assert_eq!(board.history().limit(), 7);
    }

    #[test]
    fn test_adopt_session_after_create() {
        let mut board = Board::default();
        board.add_stroke(Stroke::new("s1"));
        let started = board.generation();
        board.adopt_session("new-1", Some("Sketch".into()));
        board.mark_saved(ack(), started);
        assert_eq!(board.session_id(), Some("new-1"));
        assert_eq!(board.name(), "Sketch");
        assert!(!board.is_dirty());
    }
}
