//! Render guard.
//!
//! While active, the surface's draw entry points are switched off (draws are
//! counted, not executed), pointer hit-testing is disabled, and any
//! selection/transform handles are detached so they cannot re-attach and
//! force a draw.

use crate::surface::{HandleBinding, RenderSurface};

#[derive(Debug, Default)]
pub struct RenderGuard {
    active: bool,
    detached: Vec<HandleBinding>,
    activations: u64,
    releases: u64,
}

impl RenderGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of `start` calls that actually engaged the guard.
    pub fn activations(&self) -> u64 {
        self.activations
    }

    pub fn releases(&self) -> u64 {
        self.releases
    }

    /// Engage the guard. Idempotent while already active.
    pub fn start<S: RenderSurface + ?Sized>(&mut self, surface: &S) {
        if self.active {
            log::debug!("Render guard already active");
            return;
        }
        surface.reset_blocked_draws();
        self.detached = surface.detach_handles();
        surface.set_hit_testing(false);
        surface.set_drawing_enabled(false);
        self.active = true;
        self.activations += 1;
        log::debug!(
            "Render guard started ({} handle(s) detached)",
            self.detached.len()
        );
    }

    /// Release the guard and return the number of draws absorbed while it
    /// was active. Returns 0 when the guard was not active.
    pub fn stop<S: RenderSurface + ?Sized>(&mut self, surface: &S) -> u64 {
        if !self.active {
            return 0;
        }
        surface.set_drawing_enabled(true);
        surface.set_hit_testing(true);
        surface.reattach_handles(std::mem::take(&mut self.detached));
        self.active = false;
        self.releases += 1;

        let blocked = surface.blocked_draws();
        if blocked > 0 {
            log::warn!("Render guard blocked {blocked} draw call(s) during save");
        } else {
            log::debug!("Render guard stopped, no draws blocked");
        }
        blocked
    }
}
