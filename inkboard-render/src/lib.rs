//! # inkboard-render
//!
//! Render isolation for Inkboard saves.
//!
//! ## Architecture
//!
//! ```text
//!  BoardSession (inkboard-sync)
//!       │
//!       ▼
//!  RenderIsolation.begin_save()     ◀─── flush, capture overlay, guard on
//!       │
//!       ▼
//!  GuardedSurface<DrawBackend>      ◀─── draws absorbed and counted
//!       │
//!       ▼
//!  SaveWindowGuard.finish() / drop  ◀─── guard off, overlay fades
//! ```
//!
//! ## Crate modules
//!
//! - [`surface`]: draw backend seam and the guarded surface
//! - [`guard`]: render guard (drawing + hit-testing + handles)
//! - [`overlay`]: frozen-frame snapshot overlay with fade
//! - [`metrics`]: save-window ring buffer and latency counters
//! - [`isolation`]: the save-window sequence tying it together
//! - [`headless`]: windowless backend

pub mod error;
pub mod guard;
pub mod headless;
pub mod isolation;
pub mod metrics;
pub mod overlay;
pub mod surface;

pub use error::RenderError;
pub use guard::RenderGuard;
pub use headless::HeadlessBackend;
pub use isolation::{RenderIsolation, SaveWindowGuard, DEFAULT_FADE};
pub use metrics::{MetricsSnapshot, SaveWindow, SaveWindowMetrics, WindowResult};
pub use overlay::{OverlayState, SnapshotOverlay};
pub use surface::{DrawBackend, FrameBitmap, GuardedSurface, HandleBinding, RenderSurface};
