//! Configuration management for Newsmill.
//!
//! Settings are loaded from a TOML file (`newsmill.toml` next to the data
//! directory by default) and overlaid with environment variables. Paths in
//! the file are resolved relative to the file location.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default number of task-level retries before a task is left failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default age in days after which completed tasks are garbage-collected.
pub const DEFAULT_CLEANUP_DAYS: u32 = 7;

/// Worker polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Interval between polls during the startup drain phase.
    #[serde(default = "default_startup_interval_ms")]
    pub startup_interval_ms: u64,
    /// Interval after a handful of empty polls.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Interval once the queue has stayed empty.
    #[serde(default = "default_backoff_interval_ms")]
    pub backoff_interval_ms: u64,
}

fn default_startup_interval_ms() -> u64 {
    100
}

fn default_idle_interval_ms() -> u64 {
    1_000
}

fn default_backoff_interval_ms() -> u64 {
    5_000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            startup_interval_ms: default_startup_interval_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            backoff_interval_ms: default_backoff_interval_ms(),
        }
    }
}

/// Watchdog recovery thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Requeue transcribe tasks stuck in processing longer than this.
    #[serde(default = "default_stale_hours")]
    pub transcribe_stale_hours: f64,
    /// Requeue process_content tasks stuck in processing longer than this.
    #[serde(default = "default_stale_hours")]
    pub process_content_stale_hours: f64,
    /// Alert only when the touched-row total reaches this count.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u64,
    /// Optional webhook for recovery alerts.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_stale_hours() -> f64 {
    2.0
}

fn default_alert_threshold() -> u64 {
    1
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            transcribe_stale_hours: default_stale_hours(),
            process_content_stale_hours: default_stale_hours(),
            alert_threshold: default_alert_threshold(),
            webhook_url: None,
        }
    }
}

/// Endpoints for the external worker services the pipeline delegates to.
///
/// Each entry is the base URL of a sidecar that owns the heavy dependency
/// (LLM providers, whisper, headless browser). Unset endpoints disable the
/// corresponding pipeline stage with a terminal error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    #[serde(default)]
    pub llm_url: Option<String>,
    #[serde(default)]
    pub transcriber_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub discussion_url: Option<String>,
    #[serde(default)]
    pub discovery_url: Option<String>,
    #[serde(default)]
    pub integration_url: Option<String>,
    #[serde(default)]
    pub chat_url: Option<String>,
    #[serde(default)]
    pub tweet_url: Option<String>,
}

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the database and downloaded media.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Database file. Relative paths resolve against `data_dir`.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Budget for a single handler invocation, advisory only; enforcement
    /// happens through the watchdog stale threshold.
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_seconds: u64,
    #[serde(default = "default_checkout_timeout")]
    pub checkout_timeout_minutes: i64,
    #[serde(default = "default_cleanup_days")]
    pub cleanup_days: u32,
    /// HTTP connect/read timeout for outbound fetches.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,

    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub services: ServiceEndpoints,

    /// Feature gate for the X bookmark sync integration.
    #[serde(default)]
    pub x_bookmark_sync_enabled: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_database() -> PathBuf {
    PathBuf::from("newsmill.db")
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_worker_timeout() -> u64 {
    600
}

fn default_checkout_timeout() -> i64 {
    30
}

fn default_cleanup_days() -> u32 {
    DEFAULT_CLEANUP_DAYS
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: default_database(),
            max_retries: default_max_retries(),
            worker_timeout_seconds: default_worker_timeout(),
            checkout_timeout_minutes: default_checkout_timeout(),
            cleanup_days: default_cleanup_days(),
            http_timeout_seconds: default_http_timeout(),
            poll: PollConfig::default(),
            watchdog: WatchdogConfig::default(),
            services: ServiceEndpoints::default(),
            x_bookmark_sync_enabled: false,
        }
    }
}

impl Settings {
    /// Load settings from an explicit config file, or fall back to
    /// `newsmill.toml` in the current directory, or defaults.
    pub fn load(config_path: Option<&Path>, target: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match resolve_config_path(config_path) {
            Some(path) => {
                let raw = fs::read_to_string(&path)?;
                let mut parsed: Settings = toml::from_str(&raw)?;
                // Paths in the file resolve against the file's directory.
                if let Some(base) = path.parent() {
                    if parsed.data_dir.is_relative() {
                        parsed.data_dir = base.join(&parsed.data_dir);
                    }
                }
                parsed
            }
            None => Settings::default(),
        };

        // `--target` points at a data directory or a .db file directly.
        if let Some(target) = target {
            if target.extension().is_some_and(|ext| ext == "db") {
                settings.database = target.to_path_buf();
                if let Some(parent) = target.parent() {
                    settings.data_dir = parent.to_path_buf();
                }
            } else {
                settings.data_dir = target.to_path_buf();
            }
        }

        settings.apply_env();
        Ok(settings)
    }

    /// Overlay settings from environment variables.
    fn apply_env(&mut self) {
        if let Some(value) = env_parse::<u32>("NEWSMILL_MAX_RETRIES") {
            self.max_retries = value;
        }
        if let Some(value) = env_parse::<u32>("NEWSMILL_CLEANUP_DAYS") {
            self.cleanup_days = value;
        }
        if let Some(value) = env_parse::<i64>("NEWSMILL_CHECKOUT_TIMEOUT_MINUTES") {
            self.checkout_timeout_minutes = value;
        }
        if let Some(value) = env_parse::<f64>("NEWSMILL_WATCHDOG_TRANSCRIBE_STALE_HOURS") {
            self.watchdog.transcribe_stale_hours = value;
        }
        if let Some(value) = env_parse::<f64>("NEWSMILL_WATCHDOG_PROCESS_CONTENT_STALE_HOURS") {
            self.watchdog.process_content_stale_hours = value;
        }
        if let Some(value) = env_parse::<u64>("NEWSMILL_WATCHDOG_ALERT_THRESHOLD") {
            self.watchdog.alert_threshold = value;
        }
        if let Ok(value) = env::var("NEWSMILL_WATCHDOG_WEBHOOK_URL") {
            if !value.trim().is_empty() {
                self.watchdog.webhook_url = Some(value);
            }
        }
        if let Ok(value) = env::var("NEWSMILL_X_BOOKMARK_SYNC_ENABLED") {
            self.x_bookmark_sync_enabled = matches!(value.as_str(), "1" | "true" | "yes");
        }
    }

    /// Absolute path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        if self.database.is_absolute() {
            self.database.clone()
        } else {
            self.data_dir.join(&self.database)
        }
    }

    /// Directory where downloaded podcast audio lands.
    pub fn audio_dir(&self) -> PathBuf {
        self.data_dir.join("audio")
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let default = PathBuf::from("newsmill.toml");
    default.exists().then_some(default)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.cleanup_days, 7);
        assert_eq!(settings.poll.startup_interval_ms, 100);
        assert_eq!(settings.poll.backoff_interval_ms, 5_000);
        assert_eq!(settings.watchdog.alert_threshold, 1);
        assert!((settings.watchdog.transcribe_stale_hours - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn target_db_file_overrides_database_path() {
        let settings =
            Settings::load(None, Some(Path::new("/tmp/millspace/custom.db"))).unwrap();
        assert_eq!(settings.database_path(), PathBuf::from("/tmp/millspace/custom.db"));
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/millspace"));
    }

    #[test]
    fn target_directory_sets_data_dir() {
        let settings = Settings::load(None, Some(Path::new("/tmp/millspace"))).unwrap();
        assert_eq!(
            settings.database_path(),
            PathBuf::from("/tmp/millspace/newsmill.db")
        );
    }

    #[test]
    fn parses_partial_toml() {
        let parsed: Settings = toml::from_str(
            r#"
            max_retries = 5

            [watchdog]
            alert_threshold = 10
            "#,
        )
        .unwrap();
        assert_eq!(parsed.max_retries, 5);
        assert_eq!(parsed.watchdog.alert_threshold, 10);
        assert_eq!(parsed.cleanup_days, 7);
    }
}
