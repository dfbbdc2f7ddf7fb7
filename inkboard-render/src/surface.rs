//! Rendering surface capability.
//!
//! The drawing library is external. It is reached through [`DrawBackend`],
//! which exposes the three primitives the isolation layer needs: draw now,
//! schedule a batched draw, and render a frame to a bitmap.
//!
//! [`GuardedSurface`] wraps a backend and is what the application's render
//! path calls. While drawing is disabled every draw request is absorbed and
//! counted instead of reaching the backend.
//!
//! ```text
//!  app render path ──► GuardedSurface::draw()
//!                           │
//!                 enabled?  ├── yes ──► DrawBackend::draw()
//!                           └── no  ──► blocked_draws += 1
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::RenderError;

/// A captured frame, RGBA8, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBitmap {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: u32,
    pub pixels: Vec<u8>,
}

impl FrameBitmap {
    pub fn new(width: u32, height: u32, pixel_ratio: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixel_ratio,
            pixels,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// A selection/transform handle and the nodes it was attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleBinding {
    pub handle_id: u64,
    pub node_ids: Vec<u64>,
}

/// Primitives provided by the external drawing library.
pub trait DrawBackend {
    /// Draw synchronously.
    fn draw(&self);
    /// Schedule a coalesced draw for the next frame.
    fn batch_draw(&self);
    fn has_pending_batch(&self) -> bool;
    fn cancel_pending_batch(&self);
    /// Render the current scene into a bitmap.
    fn render_to_bitmap(&self) -> Result<FrameBitmap, RenderError>;

    /// Toggle pointer hit-testing on all layers.
    fn set_hit_testing(&self, _enabled: bool) {}

    /// Detach active selection/transform handles so they cannot force a draw.
    fn detach_handles(&self) -> Vec<HandleBinding> {
        Vec::new()
    }

    fn reattach_handles(&self, _bindings: Vec<HandleBinding>) {}
}

/// What the isolation layer needs from a surface.
pub trait RenderSurface {
    /// Execute any scheduled batch now, then drop the schedule.
    fn flush_pending(&self);
    fn capture_frame(&self) -> Result<FrameBitmap, RenderError>;
    fn set_drawing_enabled(&self, enabled: bool);
    fn is_drawing_enabled(&self) -> bool;
    /// Draw requests absorbed since the last reset.
    fn blocked_draws(&self) -> u64;
    fn reset_blocked_draws(&self);
    fn set_hit_testing(&self, enabled: bool);
    fn detach_handles(&self) -> Vec<HandleBinding>;
    fn reattach_handles(&self, bindings: Vec<HandleBinding>);
}

pub struct GuardedSurface<B> {
    backend: B,
    drawing_enabled: AtomicBool,
    blocked: AtomicU64,
}

impl<B: DrawBackend> GuardedSurface<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            drawing_enabled: AtomicBool::new(true),
            blocked: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Draw now, unless a save window has drawing disabled.
    pub fn draw(&self) {
        if self.drawing_enabled.load(Ordering::Acquire) {
            self.backend.draw();
        } else {
            let blocked = self.blocked.fetch_add(1, Ordering::Relaxed) + 1;
            log::debug!("Blocked draw() during save ({blocked} so far)");
        }
    }

    /// Schedule a batched draw, unless drawing is disabled.
    pub fn batch_draw(&self) {
        if self.drawing_enabled.load(Ordering::Acquire) {
            self.backend.batch_draw();
        } else {
            let blocked = self.blocked.fetch_add(1, Ordering::Relaxed) + 1;
            log::debug!("Blocked batch_draw() during save ({blocked} so far)");
        }
    }
}

impl<B: DrawBackend> RenderSurface for GuardedSurface<B> {
    fn flush_pending(&self) {
        if self.backend.has_pending_batch() {
            log::debug!("Flushing pending batch before freezing the surface");
            self.backend.draw();
        }
        self.backend.cancel_pending_batch();
    }

    fn capture_frame(&self) -> Result<FrameBitmap, RenderError> {
        self.backend.render_to_bitmap()
    }

    fn set_drawing_enabled(&self, enabled: bool) {
        self.drawing_enabled.store(enabled, Ordering::Release);
    }

    fn is_drawing_enabled(&self) -> bool {
        self.drawing_enabled.load(Ordering::Acquire)
    }

    fn blocked_draws(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }

    fn reset_blocked_draws(&self) {
        self.blocked.store(0, Ordering::Relaxed);
    }

    fn set_hit_testing(&self, enabled: bool) {
        self.backend.set_hit_testing(enabled);
    }

    fn detach_handles(&self) -> Vec<HandleBinding> {
        self.backend.detach_handles()
    }

    fn reattach_handles(&self, bindings: Vec<HandleBinding>) {
        self.backend.reattach_handles(bindings);
    }
}
