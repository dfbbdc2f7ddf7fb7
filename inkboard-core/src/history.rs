//! Undo/redo operation log.
//!
//! Each entry records enough to move the current page one step backward
//! ([`HistoryEntry::revert`]) or forward ([`HistoryEntry::apply`]). Entries
//! are positional: they assume the page looks exactly as it did when the
//! entry was recorded, which is why the board clears history on page
//! switches and forces a full-state save after every undo/redo.

use serde::{Deserialize, Serialize};

use crate::document::{position_of, Asset, Element, Page, Stroke};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEntry {
    AddStroke { stroke: Stroke, index: usize },
    DeleteStroke { stroke: Stroke, index: usize },
    UpdateStroke { prev: Stroke, next: Stroke, index: usize },
    AddAsset { asset: Asset, index: usize },
    DeleteAsset { asset: Asset, index: usize },
    UpdateAsset { prev: Asset, next: Asset, index: usize },
    ClearBoard { prev_strokes: Vec<Stroke>, prev_assets: Vec<Asset> },
}

impl HistoryEntry {
    /// Undo this entry against `page`.
    pub fn revert(&self, page: &mut Page) {
        match self {
            Self::AddStroke { stroke, index } => remove_at(&mut page.strokes, *index, stroke.id()),
            Self::DeleteStroke { stroke, index } => insert_at(&mut page.strokes, *index, stroke),
            Self::UpdateStroke { prev, index, .. } => replace_at(&mut page.strokes, *index, prev),
            Self::AddAsset { asset, index } => remove_at(&mut page.assets, *index, asset.id()),
            Self::DeleteAsset { asset, index } => insert_at(&mut page.assets, *index, asset),
            Self::UpdateAsset { prev, index, .. } => replace_at(&mut page.assets, *index, prev),
            Self::ClearBoard {
                prev_strokes,
                prev_assets,
            } => {
                page.strokes = prev_strokes.clone();
                page.assets = prev_assets.clone();
            }
        }
    }

    /// Redo this entry against `page`.
    pub fn apply(&self, page: &mut Page) {
        match self {
            Self::AddStroke { stroke, index } => insert_at(&mut page.strokes, *index, stroke),
            Self::DeleteStroke { stroke, index } => remove_at(&mut page.strokes, *index, stroke.id()),
            Self::UpdateStroke { next, index, .. } => replace_at(&mut page.strokes, *index, next),
            Self::AddAsset { asset, index } => insert_at(&mut page.assets, *index, asset),
            Self::DeleteAsset { asset, index } => remove_at(&mut page.assets, *index, asset.id()),
            Self::UpdateAsset { next, index, .. } => replace_at(&mut page.assets, *index, next),
            Self::ClearBoard { .. } => {
                page.strokes.clear();
                page.assets.clear();
            }
        }
    }
}

fn insert_at<E: Element>(items: &mut Vec<E>, index: usize, item: &E) {
    items.insert(index.min(items.len()), item.clone());
}

// Index first; fall back to an id lookup if the slot no longer matches.
fn resolve<E: Element>(items: &[E], index: usize, id: &str) -> Option<usize> {
    match items.get(index) {
        Some(item) if item.id() == id => Some(index),
        _ => {
            let found = position_of(items, id);
            if found.is_none() {
                log::warn!("History entry for {id} no longer matches page contents");
            }
            found
        }
    }
}

fn remove_at<E: Element>(items: &mut Vec<E>, index: usize, id: &str) {
    if let Some(i) = resolve(items, index, id) {
        items.remove(i);
    }
}

fn replace_at<E: Element>(items: &mut [E], index: usize, item: &E) {
    if let Some(i) = resolve(items, index, item.id()) {
        items[i] = item.clone();
    }
}

/// Bounded undo and redo stacks.
#[derive(Debug)]
pub struct History {
    undo_stack: Vec<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Record a new entry. Invalidates everything on the redo stack.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.redo_stack.clear();
        self.undo_stack.push(entry);
        if self.undo_stack.len() > self.limit {
            let overflow = self.undo_stack.len() - self.limit;
            self.undo_stack.drain(..overflow);
        }
    }

    /// Revert the most recent entry. Returns `false` if there is nothing to undo.
    pub fn undo(&mut self, page: &mut Page) -> bool {
        let Some(entry) = self.undo_stack.pop() else {
            return false;
        };
        entry.revert(page);
        self.redo_stack.push(entry);
        true
    }

    /// Re-apply the most recently undone entry.
    pub fn redo(&mut self, page: &mut Page) -> bool {
        let Some(entry) = self.redo_stack.pop() else {
            return false;
        };
        entry.apply(page);
        self.undo_stack.push(entry);
        true
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
