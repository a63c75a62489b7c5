//! Health monitor configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Health monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Whether the monitor runs at all
    pub enabled: bool,
    /// Seconds between probes
    pub check_interval_secs: u64,
    /// How long to wait for a probe response
    pub response_timeout_ms: u64,
    /// Average TPS below which the server is restarted
    pub tps_min: f64,
    /// Command that makes the server print its TPS line
    pub tps_command: String,
    /// Consecutive unanswered probes before a forced restart
    pub unresponsive_threshold: u32,
    /// Minimum seconds between two monitor-initiated restarts
    pub min_time_between_restarts_secs: u64,
    /// Restart when the average TPS drops below `tps_min`
    pub restart_on_low_tps: bool,
    /// Restart on a fixed schedule regardless of health
    pub enable_periodic_restart: bool,
    /// Days between periodic restarts
    pub periodic_restart_days: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 60,
            response_timeout_ms: 5000,
            tps_min: 18.0,
            tps_command: "world perf".to_string(),
            unresponsive_threshold: 3,
            min_time_between_restarts_secs: 60,
            restart_on_low_tps: true,
            enable_periodic_restart: false,
            periodic_restart_days: 7,
        }
    }
}

impl MonitorConfig {
    /// Probe period, never shorter than one second
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.min_time_between_restarts_secs)
    }

    /// Periodic restart interval in milliseconds, if periodic restarts are on
    pub fn periodic_interval_ms(&self) -> Option<i64> {
        if !self.enable_periodic_restart || self.periodic_restart_days == 0 {
            return None;
        }
        let days = i64::try_from(self.periodic_restart_days).ok()?;
        days.checked_mul(24 * 60 * 60 * 1000)
    }
}
