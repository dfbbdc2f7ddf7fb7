//! Session, autosave and coordinator configuration.
//!
//! All structs deserialize with defaults for missing fields, so a host can
//! load a partial JSON document and get the stock values for the rest.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the scheduler turns a dirty board into a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePolicy {
    /// Debounce, idle and backoff timers.
    #[default]
    Timed,
    /// Save on the next poll after every change. For harnesses.
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Lower bound and starting value of the debounce delay.
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub slow_rtt_ms: u64,
    pub slow_step_ms: u64,
    pub fast_rtt_ms: u64,
    pub fast_step_ms: u64,
    /// Delay multiplier applied after a failed save.
    pub failure_factor: f64,
    /// Fixed delay armed when the last input gate clears.
    pub idle_after_input_ms: u64,
    /// Backoff used when a rate-limit response names none.
    pub default_backoff_ms: u64,
    pub policy: SchedulePolicy,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 3000,
            max_delay_ms: 5000,
            slow_rtt_ms: 400,
            slow_step_ms: 500,
            fast_rtt_ms: 200,
            fast_step_ms: 200,
            failure_factor: 1.5,
            idle_after_input_ms: 10_000,
            default_backoff_ms: 1000,
            policy: SchedulePolicy::Timed,
        }
    }
}

impl AutosaveConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms))
    }

    pub fn idle_after_input(&self) -> Duration {
        Duration::from_millis(self.idle_after_input_ms)
    }

    pub fn default_backoff(&self) -> Duration {
        Duration::from_millis(self.default_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Path prefix for session endpoints, without trailing slash.
    pub base_path: String,
    pub diff_limit_bytes: usize,
    pub stream_limit_bytes: usize,
    pub beacon_limit_bytes: usize,
    pub retry_jitter_min_ms: u64,
    pub retry_jitter_max_ms: u64,
    /// Sent in heartbeats.
    pub client_version: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            base_path: "/api/v1/solo/sessions".to_string(),
            diff_limit_bytes: 512 * 1024,
            stream_limit_bytes: 2 * 1024 * 1024,
            beacon_limit_bytes: 64 * 1024,
            retry_jitter_min_ms: 50,
            retry_jitter_max_ms: 150,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Collection path that new sessions are created under.
    pub fn sessions_path(&self) -> String {
        format!("{}/", self.base_path.trim_end_matches('/'))
    }

    pub fn session_path(&self, session_id: &str) -> String {
        format!("{}/{}/", self.base_path.trim_end_matches('/'), session_id)
    }

    pub fn diff_path(&self, session_id: &str) -> String {
        format!("{}diff/", self.session_path(session_id))
    }

    pub fn stream_path(&self, session_id: &str) -> String {
        format!("{}save-stream/", self.session_path(session_id))
    }

    pub fn beacon_path(&self, session_id: &str) -> String {
        format!("{}beacon/", self.session_path(session_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub autosave: AutosaveConfig,
    pub coordinator: CoordinatorConfig,
    pub history_limit: usize,
    pub overlay_fade_ms: u64,
    pub metrics_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave: AutosaveConfig::default(),
            coordinator: CoordinatorConfig::default(),
            history_limit: inkboard_core::DEFAULT_HISTORY_LIMIT,
            overlay_fade_ms: 150,
            metrics_capacity: inkboard_render::metrics::DEFAULT_WINDOW_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn overlay_fade(&self) -> Duration {
        Duration::from_millis(self.overlay_fade_ms)
    }
}
