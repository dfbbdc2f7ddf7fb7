//! Board document model: pages holding strokes and assets.
//!
//! Strokes and assets are opaque to the sync engine. Only the stable `id`
//! is interpreted; every other field rides along in `props` and is
//! serialized back untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::BoardError;

/// Anything placed on a page that can be addressed by id.
pub trait Element: Clone + Serialize {
    fn id(&self) -> &str;
}

/// A freehand stroke. Shape, points and style live in `props`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: String,
    #[serde(flatten)]
    pub props: Map<String, Value>,
}

impl Stroke {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            props: Map::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }
}

impl Element for Stroke {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A placed asset, most commonly an image reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    #[serde(flatten)]
    pub props: Map<String, Value>,
}

impl Asset {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            props: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// An unlocked image placed at (100, 100), stacked above `z_index - 1` others.
    pub fn image(src: impl Into<String>, width: f64, height: f64, z_index: usize) -> Self {
        Self::new(format!("asset-{}", Uuid::new_v4()))
            .with("type", "image")
            .with("src", src.into())
            .with("x", 100.0)
            .with("y", 100.0)
            .with("width", width)
            .with("height", height)
            .with("zIndex", z_index as u64)
            .with("locked", false)
    }
}

impl Element for Asset {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub strokes: Vec<Stroke>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl Page {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            strokes: Vec::new(),
            assets: Vec::new(),
        }
    }

    /// A fresh page with a generated id.
    pub fn numbered(number: usize) -> Self {
        Self::new(format!("page-{}", Uuid::new_v4()), format!("Page {number}"))
    }

    pub fn stroke_index(&self, id: &str) -> Option<usize> {
        position_of(&self.strokes, id)
    }

    pub fn asset_index(&self, id: &str) -> Option<usize> {
        position_of(&self.assets, id)
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty() && self.assets.is_empty()
    }
}

pub(crate) fn position_of<E: Element>(items: &[E], id: &str) -> Option<usize> {
    items.iter().position(|item| item.id() == id)
}

/// The full board state. Always holds at least one page, and
/// `current_page_index` always points at one of them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub pages: Vec<Page>,
    pub current_page_index: usize,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            pages: vec![Page::new("page-1", "Page 1")],
            current_page_index: 0,
        }
    }
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a remote `state` object.
    ///
    /// Accepts the paged format (`{pages, currentPageIndex}`) and the legacy
    /// format with `strokes`/`assets` at the root, which is migrated into a
    /// single page. An out-of-range page index is clamped.
    pub fn from_state(state: &Value) -> Result<Self, BoardError> {
        let object = state.as_object().ok_or(BoardError::InvalidState("state is not an object"))?;

        let mut pages: Vec<Page> = match object.get("pages") {
            Some(pages @ Value::Array(_)) => serde_json::from_value(pages.clone())?,
            Some(_) => return Err(BoardError::InvalidState("pages is not an array")),
            None => {
                let strokes = match object.get("strokes") {
                    Some(v) => serde_json::from_value(v.clone())?,
                    None => Vec::new(),
                };
                let assets = match object.get("assets") {
                    Some(v) => serde_json::from_value(v.clone())?,
                    None => Vec::new(),
                };
                log::debug!("Migrating legacy root-level board state into a single page");
                vec![Page {
                    id: "page-1".to_string(),
                    name: "Page 1".to_string(),
                    strokes,
                    assets,
                }]
            }
        };

        if pages.is_empty() {
            pages.push(Page::new("page-1", "Page 1"));
        }

        let requested = object
            .get("currentPageIndex")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let current_page_index = requested.min(pages.len() - 1);

        Ok(Self {
            pages,
            current_page_index,
        })
    }

    pub fn current_page(&self) -> &Page {
        &self.pages[self.current_page_index]
    }

    pub fn current_page_mut(&mut self) -> &mut Page {
        &mut self.pages[self.current_page_index]
    }

    pub fn to_value(&self) -> Result<Value, BoardError> {
        Ok(serde_json::to_value(self)?)
    }
}
