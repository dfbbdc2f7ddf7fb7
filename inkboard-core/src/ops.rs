//! Diff operations: the sync unit sent by a diff save.
//!
//! Distinct from the undo unit in [`crate::history`]. Ops accumulate in an
//! [`OpBuffer`] between saves and are drained when a save starts. Once a
//! full-state save is forced the buffer stops collecting: the next save
//! replaces the whole document anyway.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::Element;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOpType {
    Add,
    Update,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Stroke,
    Asset,
}

/// One add/update/remove against a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffOp {
    pub op: DiffOpType,
    pub kind: DiffKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub page_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Value>,
}

impl DiffOp {
    /// An `add` op carrying the full serialized element.
    pub fn add<E: Element>(kind: DiffKind, page_id: &str, item: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op: DiffOpType::Add,
            kind,
            id: Some(item.id().to_string()),
            page_id: page_id.to_string(),
            value: Some(serde_json::to_value(item)?),
            patch: None,
        })
    }

    /// An `update` op carrying only the changed top-level fields.
    pub fn update<E: Element>(
        kind: DiffKind,
        page_id: &str,
        prev: &E,
        next: &E,
    ) -> Result<Self, serde_json::Error> {
        let before = serde_json::to_value(prev)?;
        let after = serde_json::to_value(next)?;
        Ok(Self {
            op: DiffOpType::Update,
            kind,
            id: Some(next.id().to_string()),
            page_id: page_id.to_string(),
            value: None,
            patch: Some(Value::Object(shallow_patch(&before, &after))),
        })
    }

    pub fn remove(kind: DiffKind, page_id: &str, id: &str) -> Self {
        Self {
            op: DiffOpType::Remove,
            kind,
            id: Some(id.to_string()),
            page_id: page_id.to_string(),
            value: None,
            patch: None,
        }
    }
}

/// Top-level fields of `after` that differ from `before`.
/// Fields dropped in `after` appear as `null`.
pub fn shallow_patch(before: &Value, after: &Value) -> Map<String, Value> {
    let empty = Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);

    let mut patch = Map::new();
    for (key, value) in after {
        if before.get(key) != Some(value) {
            patch.insert(key.clone(), value.clone());
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    patch
}

/// Ops drained from the buffer for one save attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingOps {
    pub ops: Vec<DiffOp>,
    /// When set, the save must replace the full state.
    pub force_full: bool,
}

impl PendingOps {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && !self.force_full
    }
}

#[derive(Debug, Default)]
pub struct OpBuffer {
    ops: Vec<DiffOp>,
    force_full: bool,
}

impl OpBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: DiffOp) {
        if !self.force_full {
            self.ops.push(op);
        }
    }

    /// Discard buffered ops and force the next save to send full state.
    pub fn force_full_save(&mut self) {
        if !self.ops.is_empty() {
            log::debug!("Discarding {} buffered diff ops, next save is full-state", self.ops.len());
        }
        self.ops.clear();
        self.force_full = true;
    }

    pub fn drain(&mut self) -> PendingOps {
        PendingOps {
            ops: std::mem::take(&mut self.ops),
            force_full: std::mem::replace(&mut self.force_full, false),
        }
    }

    /// Put back ops from a failed save, ahead of anything buffered since.
    pub fn restore(&mut self, pending: PendingOps) {
        if pending.force_full || self.force_full {
            self.ops.clear();
            self.force_full = true;
            return;
        }
        let newer = std::mem::replace(&mut self.ops, pending.ops);
        self.ops.extend(newer);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn is_full_save_forced(&self) -> bool {
        self.force_full
    }

    pub fn ops(&self) -> &[DiffOp] {
        &self.ops
    }
}
