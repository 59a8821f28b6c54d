//! Runtime settings of the clock service.
//!
//! Settings are deserialized with `serde` through the `config` crate: an
//! optional TOML file, overridden by `NIXIE_*` environment variables. They
//! tune the engine and pick the host collaborators; the device configuration
//! the user edits (timezone, sleep schedule) lives in the config store.

use crate::common::{
    DEFAULT_DRIFT_THRESHOLD_SECS, DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_STORE_LOCK_TIMEOUT_MS, DEFAULT_TRANSITIONS_RECHECK_SECS,
};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The top-level settings for the clock service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Pending messages the bus can hold before ticks start being dropped.
    pub queue_capacity: usize,

    /// Liveness timeout of the engine's receive call.
    pub idle_timeout_ms: u64,

    /// Discrepancy, in seconds, above which a network time is applied.
    pub drift_threshold_secs: i64,

    /// Delay between two transitions refresh checks.
    pub transitions_recheck_secs: i64,

    /// Longest wait for the config store lock before a save is dropped.
    pub store_lock_timeout_ms: u64,

    /// Directory of the file-backed config store.
    pub store_dir: PathBuf,

    /// Period of the simulated RTC square wave.
    pub tick_period_ms: u64,

    /// Boot the simulated RTC as if its backup battery had died.
    pub rtc_unset: bool,

    /// Simulated round-trip latency of the time service.
    pub service_latency_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            drift_threshold_secs: DEFAULT_DRIFT_THRESHOLD_SECS,
            transitions_recheck_secs: DEFAULT_TRANSITIONS_RECHECK_SECS,
            store_lock_timeout_ms: DEFAULT_STORE_LOCK_TIMEOUT_MS,
            store_dir: PathBuf::from("nixie-store"),
            tick_period_ms: 1_000,
            rtc_unset: false,
            service_latency_ms: 250,
        }
    }
}

impl Settings {
    /// Loads settings from `path` (if given and present) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder
            .add_source(Environment::with_prefix("NIXIE"))
            .build()?
            .try_deserialize()
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn store_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.store_lock_timeout_ms)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }

    pub fn service_latency(&self) -> Duration {
        Duration::from_millis(self.service_latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_match_the_firmware() {
        let settings = Settings::default();
        assert_eq!(settings.queue_capacity, 10);
        assert_eq!(settings.drift_threshold_secs, 60);
        assert_eq!(settings.transitions_recheck_secs, 15 * 86_400);
        assert_eq!(settings.idle_timeout(), Duration::from_millis(11_001));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("nixie-settings-does-not-exist.toml");
        let settings = Settings::load(Some(path.as_path())).unwrap();
        assert_eq!(settings.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = std::env::temp_dir().join(format!("nixie-settings-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("nixie.toml");
        fs::write(&path, "queue_capacity = 32\nrtc_unset = true\nstore_dir = \"/var/lib/nixie\"\n").unwrap();

        let settings = Settings::load(Some(path.as_path())).unwrap();
        assert_eq!(settings.queue_capacity, 32);
        assert!(settings.rtc_unset);
        assert_eq!(settings.store_dir, PathBuf::from("/var/lib/nixie"));
        assert_eq!(settings.drift_threshold_secs, DEFAULT_DRIFT_THRESHOLD_SECS);

        fs::remove_dir_all(&dir).ok();
    }
}
