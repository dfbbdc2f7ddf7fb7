//! Autosave scheduler.
//!
//! A pure state machine: it never sleeps and never saves. The session asks
//! it for the next deadline, sleeps until then, and calls [`poll`] to learn
//! whether a save is due.
//!
//! ```text
//!            mark_dirty                 deadline
//!   Idle ───────────────► Debouncing ───────────► Saving
//!    ▲        gate on │        ▲ gate on │            │ success / failure
//!    │                ▼        │         ▼            ▼
//!    │           InputDeferred ┘   (timers suspended) Idle | Debouncing
//!    │                │  last gate clears
//!    └────────────────┘  (idle timer armed)
//! ```
//!
//! The debounce delay adapts to round-trip time: slow saves push it up,
//! fast saves pull it back down, failures multiply it.
//!
//! [`poll`]: AutosaveScheduler::poll

use std::time::Duration;

use tokio::time::Instant;

use crate::config::{AutosaveConfig, SchedulePolicy};
use crate::error::FailureClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Debouncing,
    InputDeferred,
    Saving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Debounce,
    /// Armed when input ends with a save still owed.
    Idle,
    /// One-shot retry after a rate-limit response.
    Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timer {
    kind: TimerKind,
    deadline: Instant,
}

#[derive(Debug)]
pub struct AutosaveScheduler {
    config: AutosaveConfig,
    current_delay: Duration,
    timer: Option<Timer>,
    pointer_active: bool,
    text_editing: bool,
    saving: bool,
    /// A change arrived while saving.
    dirty_during_save: bool,
    /// A save is owed once the input gates clear.
    owed_after_input: bool,
}

impl AutosaveScheduler {
    pub fn new(config: AutosaveConfig) -> Self {
        Self {
            current_delay: config.min_delay(),
            config,
            timer: None,
            pointer_active: false,
            text_editing: false,
            saving: false,
            dirty_during_save: false,
            owed_after_input: false,
        }
    }

    pub fn config(&self) -> &AutosaveConfig {
        &self.config
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn state(&self) -> SchedulerState {
        if self.saving {
            SchedulerState::Saving
        } else if self.is_gated() {
            SchedulerState::InputDeferred
        } else if self.timer.is_some() {
            SchedulerState::Debouncing
        } else {
            SchedulerState::Idle
        }
    }

    pub fn armed_timer(&self) -> Option<TimerKind> {
        self.timer.map(|t| t.kind)
    }

    pub fn is_gated(&self) -> bool {
        self.pointer_active || self.text_editing
    }

    /// The board changed.
    pub fn mark_dirty(&mut self, now: Instant) {
        if self.saving {
            self.dirty_during_save = true;
        } else if self.is_gated() {
            self.owed_after_input = true;
        } else {
            self.arm(TimerKind::Debounce, self.current_delay, now);
        }
    }

    pub fn set_pointer_active(&mut self, active: bool, now: Instant) {
        let was_gated = self.is_gated();
        self.pointer_active = active;
        self.on_gate_change(was_gated, now);
    }

    pub fn set_text_editing(&mut self, active: bool, now: Instant) {
        let was_gated = self.is_gated();
        self.text_editing = active;
        self.on_gate_change(was_gated, now);
    }

    fn on_gate_change(&mut self, was_gated: bool, now: Instant) {
        match (was_gated, self.is_gated()) {
            (false, true) => {
                if self.timer.take().is_some() {
                    log::debug!("Input started, suspending autosave timer");
                    self.owed_after_input = true;
                }
            }
            (true, false) => {
                if std::mem::take(&mut self.owed_after_input) && !self.saving {
                    log::debug!("Input ended, arming idle save");
                    self.arm(TimerKind::Idle, self.config.idle_after_input(), now);
                }
            }
            _ => {}
        }
    }

    /// Returns the timer that just fired, if a save is due at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<TimerKind> {
        if self.saving || self.is_gated() {
            return None;
        }
        match self.timer {
            Some(timer) if timer.deadline <= now => {
                self.timer = None;
                Some(timer.kind)
            }
            _ => None,
        }
    }

    /// When the armed timer fires. `None` while gated, saving, or disarmed.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.saving || self.is_gated() {
            return None;
        }
        self.timer.map(|t| t.deadline)
    }

    /// A save is starting (timer-driven or manual).
    pub fn begin_save(&mut self) {
        self.timer = None;
        self.saving = true;
    }

    /// Explicit user save: drop every scheduled timer and save now.
    pub fn begin_manual_save(&mut self) {
        self.owed_after_input = false;
        self.begin_save();
    }

    pub fn on_save_success(&mut self, rtt: Duration, now: Instant) {
        self.saving = false;
        let previous = self.current_delay;
        if rtt > Duration::from_millis(self.config.slow_rtt_ms) {
            self.current_delay =
                (self.current_delay + Duration::from_millis(self.config.slow_step_ms)).min(self.config.max_delay());
        } else if rtt < Duration::from_millis(self.config.fast_rtt_ms) {
            self.current_delay = self
                .current_delay
                .saturating_sub(Duration::from_millis(self.config.fast_step_ms))
                .max(self.config.min_delay());
        }
        if previous != self.current_delay {
            log::debug!(
                "Autosave delay {:?} -> {:?} (rtt {:?})",
                previous,
                self.current_delay,
                rtt
            );
        }
        self.resume_after_save(now);
    }

    pub fn on_save_failure(&mut self, class: FailureClass, now: Instant) {
        self.saving = false;
        self.current_delay = self
            .current_delay
            .mul_f64(self.config.failure_factor)
            .min(self.config.max_delay());
        log::debug!("Save failed ({class:?}), autosave delay now {:?}", self.current_delay);

        match class {
            FailureClass::Retriable => self.arm_retry(TimerKind::Debounce, self.current_delay, now),
            FailureClass::RetryAfter(backoff) => self.arm_retry(TimerKind::Backoff, backoff, now),
            FailureClass::Terminal => self.resume_after_save(now),
        }
    }

    /// Drop every timer and any owed save.
    pub fn cancel(&mut self) {
        self.timer = None;
        self.owed_after_input = false;
    }

    fn resume_after_save(&mut self, now: Instant) {
        if std::mem::take(&mut self.dirty_during_save) {
            self.mark_dirty(now);
        }
    }

    /// Retries after a failure wait the full delay under every policy.
    fn arm_retry(&mut self, kind: TimerKind, delay: Duration, now: Instant) {
        self.dirty_during_save = false;
        if self.is_gated() {
            self.owed_after_input = true;
        } else {
            self.set_timer(kind, delay, now);
        }
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration, now: Instant) {
        let delay = match self.config.policy {
            SchedulePolicy::Timed => delay,
            SchedulePolicy::Immediate => Duration::ZERO,
        };
        self.set_timer(kind, delay, now);
    }

    fn set_timer(&mut self, kind: TimerKind, delay: Duration, now: Instant) {
        self.timer = Some(Timer {
            kind,
            deadline: now + delay,
        });
    }
}
