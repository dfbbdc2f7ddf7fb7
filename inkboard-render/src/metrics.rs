//! Save-window instrumentation.
//!
//! One [`SaveWindow`] is opened per save attempt and closed with its result.
//! Closed windows go into a bounded ring buffer (oldest dropped first) and
//! are handed to any registered listeners. Nothing is persisted.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowResult {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveWindow {
    pub session_id: String,
    pub target_seq: u64,
    pub started_at: Instant,
    pub ended_at: Option<Instant>,
    pub extra_draws: u64,
    pub overlay_copy: Option<Duration>,
    pub save_rtt: Option<Duration>,
    /// Pointer event to next frame flush.
    pub input_latency: Option<Duration>,
    pub max_main_thread_block: Duration,
    pub result: Option<WindowResult>,
}

impl SaveWindow {
    fn open(session_id: &str, target_seq: u64, now: Instant) -> Self {
        Self {
            session_id: session_id.to_string(),
            target_seq,
            started_at: now,
            ended_at: None,
            extra_draws: 0,
            overlay_copy: None,
            save_rtt: None,
            input_latency: None,
            max_main_thread_block: Duration::ZERO,
            result: None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.ended_at
            .map(|end| end.saturating_duration_since(self.started_at))
    }
}

/// Aggregates over the windows currently in the ring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub windows: usize,
    pub errors: usize,
    pub total_extra_draws: u64,
    pub avg_overlay_copy: Option<Duration>,
    pub avg_save_rtt: Option<Duration>,
    pub max_input_latency: Option<Duration>,
    pub max_main_thread_block: Duration,
}

type Listener = Box<dyn Fn(&SaveWindow) + Send + Sync>;

pub struct SaveWindowMetrics {
    capacity: usize,
    windows: VecDeque<SaveWindow>,
    active: Option<SaveWindow>,
    pending_pointer: Option<Instant>,
    listeners: Vec<(u64, Listener)>,
    next_listener: u64,
}

impl Default for SaveWindowMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl SaveWindowMetrics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            windows: VecDeque::with_capacity(capacity),
            active: None,
            pending_pointer: None,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active(&self) -> Option<&SaveWindow> {
        self.active.as_ref()
    }

    /// Open a window. A window that was never closed is closed as an error.
    pub fn start_window(&mut self, session_id: &str, target_seq: u64, now: Instant) {
        if self.active.is_some() {
            log::warn!("Save window started while another was open; closing it as error");
            self.end_window(WindowResult::Error, now);
        }
        log::debug!("Save window opened for {session_id} at seq {target_seq}");
        self.active = Some(SaveWindow::open(session_id, target_seq, now));
    }

    pub fn end_window(&mut self, result: WindowResult, now: Instant) -> Option<SaveWindow> {
        let mut window = self.active.take()?;
        window.result = Some(result);
        window.ended_at = Some(now);
        log::info!(
            "Save window closed: {:?}, seq {}, {} blocked draw(s), overlay {:?}, rtt {:?}",
            result,
            window.target_seq,
            window.extra_draws,
            window.overlay_copy,
            window.save_rtt
        );

        if self.windows.len() == self.capacity {
            self.windows.pop_front();
        }
        self.windows.push_back(window.clone());
        for (_, listener) in &self.listeners {
            listener(&window);
        }
        Some(window)
    }

    pub fn record_extra_draws(&mut self, count: u64) {
        if let Some(w) = self.active.as_mut() {
            w.extra_draws += count;
        }
    }

    pub fn record_overlay_copy(&mut self, elapsed: Duration) {
        if let Some(w) = self.active.as_mut() {
            w.overlay_copy = Some(elapsed);
        }
    }

    pub fn record_save_rtt(&mut self, rtt: Duration) {
        if let Some(w) = self.active.as_mut() {
            w.save_rtt = Some(rtt);
        }
    }

    pub fn record_pointer_event(&mut self, at: Instant) {
        self.pending_pointer = Some(at);
    }

    /// Pairs with the last pointer event to measure input-to-render latency.
    pub fn record_frame_flush(&mut self, at: Instant) {
        let Some(pointer_at) = self.pending_pointer.take() else {
            return;
        };
        let latency = at.saturating_duration_since(pointer_at);
        if let Some(w) = self.active.as_mut() {
            w.input_latency = Some(w.input_latency.map_or(latency, |l| l.max(latency)));
        }
    }

    pub fn record_main_thread_block(&mut self, blocked: Duration) {
        if let Some(w) = self.active.as_mut() {
            w.max_main_thread_block = w.max_main_thread_block.max(blocked);
        }
    }

    pub fn windows(&self) -> impl Iterator<Item = &SaveWindow> {
        self.windows.iter()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let n = self.windows.len();
        let avg = |values: Vec<Duration>| -> Option<Duration> {
            if values.is_empty() {
                None
            } else {
                let total: Duration = values.iter().sum();
                Some(total / values.len() as u32)
            }
        };

        MetricsSnapshot {
            windows: n,
            errors: self
                .windows
                .iter()
                .filter(|w| w.result == Some(WindowResult::Error))
                .count(),
            total_extra_draws: self.windows.iter().map(|w| w.extra_draws).sum(),
            avg_overlay_copy: avg(self.windows.iter().filter_map(|w| w.overlay_copy).collect()),
            avg_save_rtt: avg(self.windows.iter().filter_map(|w| w.save_rtt).collect()),
            max_input_latency: self.windows.iter().filter_map(|w| w.input_latency).max(),
            max_main_thread_block: self
                .windows
                .iter()
                .map(|w| w.max_main_thread_block)
                .max()
                .unwrap_or_default(),
        }
    }

    /// Register a listener for closed windows. Returns an id for
    /// [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe<F>(&mut self, listener: F) -> u64
    where
        F: Fn(&SaveWindow) + Send + Sync + 'static,
    {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }
}
