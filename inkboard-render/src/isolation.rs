//! Render isolation around a save.
//!
//! ```text
//!  begin_save()                                      finish() / drop
//!     │                                                    │
//!     ├─ start_save_window ─ flush pending batch           ├─ stop_render_guard
//!     ├─ show_snapshot_overlay (capture visible frame)     ├─ hide_snapshot_overlay(fade)
//!     └─ start_render_guard ───────── save ──────────────► └─ end_save_window(result)
//! ```
//!
//! [`SaveWindowGuard`] is the only way the session opens a window. Dropping
//! it without calling [`SaveWindowGuard::finish`] (a failed or cancelled
//! save) still releases the guard and the overlay.

use std::time::{Duration, Instant};

use crate::error::RenderError;
use crate::guard::RenderGuard;
use crate::metrics::{SaveWindow, SaveWindowMetrics, WindowResult};
use crate::overlay::SnapshotOverlay;
use crate::surface::RenderSurface;

pub const DEFAULT_FADE: Duration = Duration::from_millis(150);

pub struct RenderIsolation {
    guard: RenderGuard,
    overlay: SnapshotOverlay,
    metrics: SaveWindowMetrics,
    fade: Duration,
}

impl Default for RenderIsolation {
    fn default() -> Self {
        Self::new(DEFAULT_FADE, SaveWindowMetrics::default())
    }
}

impl RenderIsolation {
    pub fn new(fade: Duration, metrics: SaveWindowMetrics) -> Self {
        Self {
            guard: RenderGuard::new(),
            overlay: SnapshotOverlay::new(),
            metrics,
            fade,
        }
    }

    pub fn guard(&self) -> &RenderGuard {
        &self.guard
    }

    pub fn overlay(&self) -> &SnapshotOverlay {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut SnapshotOverlay {
        &mut self.overlay
    }

    pub fn metrics(&self) -> &SaveWindowMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut SaveWindowMetrics {
        &mut self.metrics
    }

    pub fn fade(&self) -> Duration {
        self.fade
    }

    pub fn start_save_window(&mut self, session_id: &str, target_seq: u64, now: Instant) {
        self.metrics.start_window(session_id, target_seq, now);
    }

    pub fn end_save_window(&mut self, result: WindowResult, now: Instant) -> Option<SaveWindow> {
        self.metrics.end_window(result, now)
    }

    pub fn start_render_guard<S: RenderSurface + ?Sized>(&mut self, surface: &S) {
        self.guard.start(surface);
    }

    pub fn stop_render_guard<S: RenderSurface + ?Sized>(&mut self, surface: &S) -> u64 {
        let blocked = self.guard.stop(surface);
        self.metrics.record_extra_draws(blocked);
        blocked
    }

    pub fn show_snapshot_overlay<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &S,
    ) -> Result<Duration, RenderError> {
        let elapsed = self.overlay.show(surface)?;
        self.metrics.record_overlay_copy(elapsed);
        Ok(elapsed)
    }

    pub fn hide_snapshot_overlay(&mut self, fade: Duration, now: Instant) {
        self.overlay.hide(fade, now);
    }

    /// Open a save window and freeze the surface.
    ///
    /// Capture failure is logged and the save proceeds guarded but without
    /// an overlay.
    pub fn begin_save<'a, S: RenderSurface + ?Sized>(
        &'a mut self,
        surface: &'a S,
        session_id: &str,
        target_seq: u64,
        now: Instant,
    ) -> SaveWindowGuard<'a, S> {
        self.start_save_window(session_id, target_seq, now);
        surface.flush_pending();
        if let Err(e) = self.show_snapshot_overlay(surface) {
            log::warn!("Snapshot overlay unavailable for this save: {e}");
        }
        self.start_render_guard(surface);
        SaveWindowGuard {
            isolation: self,
            surface,
            finished: false,
        }
    }

    fn thaw<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &S,
        result: WindowResult,
        now: Instant,
    ) -> Option<SaveWindow> {
        self.stop_render_guard(surface);
        self.hide_snapshot_overlay(self.fade, now);
        self.end_save_window(result, now)
    }
}

/// An open save window. Thaws the surface on [`finish`](Self::finish) or drop.
pub struct SaveWindowGuard<'a, S: RenderSurface + ?Sized> {
    isolation: &'a mut RenderIsolation,
    surface: &'a S,
    finished: bool,
}

impl<S: RenderSurface + ?Sized> SaveWindowGuard<'_, S> {
    pub fn record_save_rtt(&mut self, rtt: Duration) {
        self.isolation.metrics.record_save_rtt(rtt);
    }

    pub fn finish(mut self, result: WindowResult, now: Instant) -> Option<SaveWindow> {
        self.finished = true;
        self.isolation.thaw(self.surface, result, now)
    }
}

impl<S: RenderSurface + ?Sized> Drop for SaveWindowGuard<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!("Save window dropped before completion, thawing surface");
            self.isolation
                .thaw(self.surface, WindowResult::Error, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;
    use crate::surface::GuardedSurface;

    #[test]
    fn test_begin_save_freezes_surface() {
        let surface = GuardedSurface::new(HeadlessBackend::new(2, 2));
        surface.batch_draw();
        let mut isolation = RenderIsolation::default();
        let now = Instant::now();

        let window = isolation.begin_save(&surface, "s1", 4, now);
        assert!(!surface.is_drawing_enabled());
        assert_eq!(surface.backend().draw_count(), 1);
        surface.draw();
        window.finish(WindowResult::Success, now);

        assert!(surface.is_drawing_enabled());
        assert!(!isolation.guard().is_active());
        let last = isolation.metrics().windows().last().unwrap();
        assert_eq!(last.extra_draws, 1);
        assert_eq!(last.result, Some(WindowResult::Success));
        assert!(last.overlay_copy.is_some());
    }

    #[test]
    fn test_dropped_window_thaws() {
        let surface = GuardedSurface::new(HeadlessBackend::new(2, 2));
        let mut isolation = RenderIsolation::default();
        {
            let _window = isolation.begin_save(&surface, "s1", 1, Instant::now());
            assert!(!surface.is_drawing_enabled());
        }
        assert!(surface.is_drawing_enabled());
        assert_eq!(isolation.guard().activations(), isolation.guard().releases());
        assert_eq!(isolation.metrics().snapshot().errors, 1);
    }

    #[test]
    fn test_capture_failure_still_guards() {
        let surface = GuardedSurface::new(HeadlessBackend::new(2, 2));
        surface.backend().set_fail_capture(true);
        let mut isolation = RenderIsolation::default();
        let window = isolation.begin_save(&surface, "s1", 1, Instant::now());
        assert!(!surface.is_drawing_enabled());
        window.finish(WindowResult::Error, Instant::now());
        assert!(!isolation.overlay().is_visible());
    }
}
