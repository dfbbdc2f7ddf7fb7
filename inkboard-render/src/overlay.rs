//! Snapshot overlay.
//!
//! Holds a bitmap of the last visible frame, painted opaquely above the live
//! surface for the duration of a save, then faded out. Opacity is computed
//! from the fade start time, so the host polls [`SnapshotOverlay::poll`]
//! from its frame loop.

use std::time::{Duration, Instant};

use crate::error::RenderError;
use crate::surface::{FrameBitmap, RenderSurface};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlayState {
    Hidden,
    Visible,
    Fading { started: Instant, duration: Duration },
}

#[derive(Debug)]
pub struct SnapshotOverlay {
    bitmap: Option<FrameBitmap>,
    state: OverlayState,
}

impl Default for SnapshotOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotOverlay {
    pub fn new() -> Self {
        Self {
            bitmap: None,
            state: OverlayState::Hidden,
        }
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn bitmap(&self) -> Option<&FrameBitmap> {
        self.bitmap.as_ref()
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self.state, OverlayState::Hidden)
    }

    /// Capture the current frame and show it at full opacity. Returns how
    /// long the capture took.
    pub fn show<S: RenderSurface + ?Sized>(&mut self, surface: &S) -> Result<Duration, RenderError> {
        let started = Instant::now();
        let bitmap = surface.capture_frame()?;
        let elapsed = started.elapsed();
        log::debug!(
            "Snapshot overlay captured {}x{} in {:?}",
            bitmap.width,
            bitmap.height,
            elapsed
        );
        self.bitmap = Some(bitmap);
        self.state = OverlayState::Visible;
        Ok(elapsed)
    }

    /// Begin fading out. A zero duration hides immediately.
    pub fn hide(&mut self, fade: Duration, now: Instant) {
        if !self.is_visible() {
            return;
        }
        if fade.is_zero() {
            self.hide_immediate();
            return;
        }
        self.state = OverlayState::Fading {
            started: now,
            duration: fade,
        };
    }

    /// Remove the overlay and release the bitmap without fading.
    pub fn hide_immediate(&mut self) {
        self.bitmap = None;
        self.state = OverlayState::Hidden;
    }

    /// Current opacity in `[0, 1]`. Releases the bitmap once a fade ends.
    pub fn poll(&mut self, now: Instant) -> f32 {
        match self.state {
            OverlayState::Hidden => 0.0,
            OverlayState::Visible => 1.0,
            OverlayState::Fading { started, duration } => {
                let elapsed = now.saturating_duration_since(started);
                if elapsed >= duration {
                    self.hide_immediate();
                    0.0
                } else {
                    1.0 - elapsed.as_secs_f32() / duration.as_secs_f32()
                }
            }
        }
    }

    /// When the running fade completes, if one is running.
    pub fn fade_deadline(&self) -> Option<Instant> {
        match self.state {
            OverlayState::Fading { started, duration } => Some(started + duration),
            _ => None,
        }
    }
}
