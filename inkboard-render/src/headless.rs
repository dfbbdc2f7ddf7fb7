//! Headless draw backend.
//!
//! No window, no GPU. Frames are deterministic: every pixel byte is the
//! low byte of the number of completed draws, so two captures of the same
//! frame are identical and any draw in between changes them. Used for
//! tests, benchmarks and server-side runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::RenderError;
use crate::surface::{DrawBackend, FrameBitmap, HandleBinding};

pub struct HeadlessBackend {
    width: u32,
    height: u32,
    draws: AtomicU64,
    pending_batch: AtomicBool,
    hit_testing: AtomicBool,
    fail_capture: AtomicBool,
    attached: Mutex<Vec<HandleBinding>>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            draws: AtomicU64::new(0),
            pending_batch: AtomicBool::new(false),
            hit_testing: AtomicBool::new(true),
            fail_capture: AtomicBool::new(false),
            attached: Mutex::new(Vec::new()),
        }
    }

    /// Attach a transform handle to `node_ids`.
    pub fn attach_handle(&self, handle_id: u64, node_ids: Vec<u64>) {
        if let Ok(mut attached) = self.attached.lock() {
            attached.push(HandleBinding { handle_id, node_ids });
        }
    }

    pub fn attached_handles(&self) -> Vec<HandleBinding> {
        self.attached.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn draw_count(&self) -> u64 {
        self.draws.load(Ordering::SeqCst)
    }

    pub fn is_hit_testing(&self) -> bool {
        self.hit_testing.load(Ordering::SeqCst)
    }

    /// Make subsequent captures fail.
    pub fn set_fail_capture(&self, fail: bool) {
        self.fail_capture.store(fail, Ordering::SeqCst);
    }
}

impl DrawBackend for HeadlessBackend {
    fn draw(&self) {
        self.pending_batch.store(false, Ordering::SeqCst);
        self.draws.fetch_add(1, Ordering::SeqCst);
    }

    fn batch_draw(&self) {
        self.pending_batch.store(true, Ordering::SeqCst);
    }

    fn has_pending_batch(&self) -> bool {
        self.pending_batch.load(Ordering::SeqCst)
    }

    fn cancel_pending_batch(&self) {
        self.pending_batch.store(false, Ordering::SeqCst);
    }

    fn render_to_bitmap(&self) -> Result<FrameBitmap, RenderError> {
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(RenderError::Capture("capture disabled".to_string()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::EmptySurface);
        }
        let fill = (self.draw_count() & 0xFF) as u8;
        let len = self.width as usize * self.height as usize * 4;
        Ok(FrameBitmap::new(self.width, self.height, 1, vec![fill; len]))
    }

    fn set_hit_testing(&self, enabled: bool) {
        self.hit_testing.store(enabled, Ordering::SeqCst);
    }

    fn detach_handles(&self) -> Vec<HandleBinding> {
        self.attached
            .lock()
            .map(|mut attached| std::mem::take(&mut *attached))
            .unwrap_or_default()
    }

    fn reattach_handles(&self, bindings: Vec<HandleBinding>) {
        if let Ok(mut attached) = self.attached.lock() {
            attached.extend(bindings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_reflects_draw_count() {
        let backend = HeadlessBackend::new(2, 2);
        let first = backend.render_to_bitmap().unwrap();
        assert_eq!(first, backend.render_to_bitmap().unwrap());
        assert_eq!(first.byte_len(), 16);

        backend.draw();
        assert_ne!(first, backend.render_to_bitmap().unwrap());
    }

    #[test]
    fn test_zero_size_capture_fails() {
        let backend = HeadlessBackend::new(0, 10);
        assert_eq!(backend.render_to_bitmap(), Err(RenderError::EmptySurface));
    }

    #[test]
    fn test_detach_and_reattach_handles() {
        let backend = HeadlessBackend::new(2, 2);
        backend.attach_handle(1, vec![10, 11]);
        let detached = backend.detach_handles();
        assert_eq!(detached.len(), 1);
        assert!(backend.attached_handles().is_empty());

        backend.reattach_handles(detached);
        assert_eq!(backend.attached_handles()[0].node_ids, vec![10, 11]);
    }
}
