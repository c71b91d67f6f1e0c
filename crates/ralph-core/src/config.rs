//! Per-user registry preferences loaded from `{home}/.config/ralph-admin/config.toml`.
//!
//! The config file is optional. If it is absent every field falls back to
//! [`RegistryConfig::default()`]. If it cannot be read or parsed a warning is
//! logged and the defaults are used, so a formatting mistake never stops the
//! dashboard from starting.
//!
//! # Example configuration
//!
//! ```toml
//! # ~/.config/ralph-admin/config.toml
//! registry_dir = "/tmp/ralph-sessions"
//! retention = "24h"        # descriptors older than this are removed
//! stale_after = "5m"       # live sessions without a heartbeat this long are "stale"
//! log_tail_bytes = 32768   # how much of the live log to read
//! log_tail_lines = 200
//! progress_lines = 50
//! ```

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

use crate::paths::{config_file_path, get_home_dir, resolve_registry_dir};

/// Descriptors whose heartbeat is older than this are removed.
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Live sessions without a heartbeat for this long are shown as stale.
pub const DEFAULT_STALE_MINUTES: i64 = 5;

/// Registry and tail-reading preferences.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Registry directory. `RALPH_REGISTRY_DIR` still takes precedence.
    #[serde(default)]
    pub registry_dir: Option<PathBuf>,

    /// Retention window measured against `last_heartbeat`.
    #[serde(default = "default_retention", deserialize_with = "deserialize_duration")]
    pub retention: Duration,

    /// Heartbeat age after which a live, running session is `stale`.
    #[serde(default = "default_stale_after", deserialize_with = "deserialize_duration")]
    pub stale_after: Duration,

    /// Maximum number of trailing bytes read from a live log.
    #[serde(default = "default_log_tail_bytes")]
    pub log_tail_bytes: u64,

    /// Maximum number of lines returned from a live log.
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,

    /// Maximum number of lines returned from a progress file.
    #[serde(default = "default_progress_lines")]
    pub progress_lines: usize,
}

fn default_retention() -> Duration {
    Duration::hours(DEFAULT_RETENTION_HOURS)
}

fn default_stale_after() -> Duration {
    Duration::minutes(DEFAULT_STALE_MINUTES)
}

fn default_log_tail_bytes() -> u64 {
    32 * 1024
}

fn default_log_tail_lines() -> usize {
    200
}

fn default_progress_lines() -> usize {
    50
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_dir: None,
            retention: default_retention(),
            stale_after: default_stale_after(),
            log_tail_bytes: default_log_tail_bytes(),
            log_tail_lines: default_log_tail_lines(),
            progress_lines: default_progress_lines(),
        }
    }
}

impl RegistryConfig {
    /// Defaults pointed at an explicit registry directory.
    pub fn with_registry_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            registry_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// The registry directory after applying the environment override.
    pub fn resolved_registry_dir(&self) -> PathBuf {
        resolve_registry_dir(self.registry_dir.as_deref())
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Parse a duration string into `chrono::Duration`.
///
/// Supports formats like:
/// - "90s" -> 90 seconds
/// - "5m" -> 5 minutes
/// - "24h" -> 24 hours
/// - "7d" -> 7 days
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    let (num_part, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(0) => anyhow::bail!("Duration must start with a number: {s}"),
        Some(idx) => s.split_at(idx),
        None => anyhow::bail!("Duration must have a unit (s, m, h or d): {s}"),
    };

    let num: i64 = num_part
        .parse()
        .with_context(|| format!("Invalid number in duration: {s}"))?;

    let duration = match unit {
        "s" => Duration::try_seconds(num),
        "m" => Duration::try_minutes(num),
        "h" => Duration::try_hours(num),
        "d" => Duration::try_days(num),
        _ => anyhow::bail!("Unknown duration unit '{unit}'. Use s, m, h or d"),
    };
    duration.with_context(|| format!("Duration out of range: {s}"))
}

/// Load registry configuration from an explicit file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid TOML for
/// [`RegistryConfig`].
pub fn load_config_from(path: &Path) -> Result<RegistryConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config at {}", path.display()))
}

/// Load registry configuration from `{home}/.config/ralph-admin/config.toml`.
///
/// Returns [`RegistryConfig::default()`] if the home directory cannot be
/// determined, the file does not exist, or the file is unreadable or
/// malformed. The last two cases are logged.
pub fn load_config() -> RegistryConfig {
    let Ok(home) = get_home_dir() else {
        return RegistryConfig::default();
    };
    let path = config_file_path(&home);
    if !path.exists() {
        return RegistryConfig::default();
    }
    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("{e:#}; using default settings");
            RegistryConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::minutes(5));
        assert_eq!(parse_duration("24h").unwrap(), Duration::hours(24));
        assert_eq!(parse_duration(" 7d ").unwrap(), Duration::days(7));
    }

    #[test]
    fn test_parse_duration_rejects_bad_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("24").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("-5m").is_err());
        assert!(parse_duration("3w").is_err());
    }

    #[test]
    fn test_parse_duration_out_of_range_is_error() {
        assert!(parse_duration("9999999999999999h").is_err());
        assert!(parse_duration("9999999999999999d").is_err());
        // Overflows i64 before the unit is applied
        assert!(parse_duration("99999999999999999999s").is_err());
    }

    #[test]
    fn test_load_config_from_out_of_range_duration_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "retention = \"9999999999999999h\"\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Duration out of range"));
    }

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.retention, Duration::hours(24));
        assert_eq!(config.stale_after, Duration::minutes(5));
        assert_eq!(config.log_tail_bytes, 32 * 1024);
        assert!(config.registry_dir.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config: RegistryConfig = toml::from_str(
            r#"
            stale_after = "2m"
            progress_lines = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.stale_after, Duration::minutes(2));
        assert_eq!(config.progress_lines, 10);
        assert_eq!(config.retention, Duration::hours(24));
        assert_eq!(config.log_tail_lines, 200);
    }

    #[test]
    fn test_load_config_from_invalid_duration_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "retention = \"forever\"\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config"));
    }

    #[test]
    fn test_load_config_from_registry_dir() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "registry_dir = \"/srv/ralph\"\n").unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.registry_dir, Some(PathBuf::from("/srv/ralph")));
    }
}
