//! Directory resolution for ralph-admin
//!
//! # Precedence
//!
//! Registry directory:
//!
//! 1. `RALPH_REGISTRY_DIR` environment variable (if set and non-empty)
//! 2. `registry_dir` from the user config file
//! 3. `{temp_dir}/ralph-sessions` (user-scoped on macOS, where `$TMPDIR` is
//!    per-user)
//!
//! Home directory (only used to locate the config file):
//!
//! 1. `RALPH_ADMIN_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default
//!
//! # Testing
//!
//! Integration tests point both variables at a `TempDir`:
//!
//! ```ignore
//! use assert_cmd::Command;
//! use tempfile::TempDir;
//!
//! let temp_dir = TempDir::new().unwrap();
//! let mut cmd = Command::cargo_bin("ralph-admin").unwrap();
//! cmd.env("RALPH_REGISTRY_DIR", temp_dir.path());
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment override for the registry directory.
pub const REGISTRY_DIR_ENV: &str = "RALPH_REGISTRY_DIR";

/// Environment override for the home directory.
pub const HOME_ENV: &str = "RALPH_ADMIN_HOME";

/// Subdirectory of the system temp root that ralph writes descriptors into.
pub const REGISTRY_SUBDIR: &str = "ralph-sessions";

fn env_path(var: &str) -> Option<PathBuf> {
    let value = std::env::var(var).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

/// Get the home directory used to locate ralph-admin's config file.
///
/// # Errors
///
/// Returns an error if `RALPH_ADMIN_HOME` is unset and the platform home
/// directory cannot be determined.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Some(home) = env_path(HOME_ENV) {
        return Ok(home);
    }
    dirs::home_dir().context("Could not determine home directory")
}

/// Path of the user config file under `home`.
pub fn config_file_path(home: &Path) -> PathBuf {
    home.join(".config/ralph-admin/config.toml")
}

/// The directory ralph writes to when nothing overrides it.
pub fn default_registry_dir() -> PathBuf {
    std::env::temp_dir().join(REGISTRY_SUBDIR)
}

/// Resolve the registry directory from the environment, the configured
/// value, and the default, in that order.
pub fn resolve_registry_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = env_path(REGISTRY_DIR_ENV) {
        return dir;
    }
    match configured {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => default_registry_dir(),
    }
}
