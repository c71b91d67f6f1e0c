//! Session descriptor schema and observation-time classification
//!
//! A ralph loop writes one descriptor per session to
//! `{registry_dir}/{session_id}.json`:
//!
//! ```json
//! {
//!   "pid": 48213,
//!   "tool": "claude",
//!   "project": "billing-api",
//!   "work_dir": "/home/dev/billing-api",
//!   "branch": "ralph/invoice-export",
//!   "prd_description": "Add CSV export for invoices",
//!   "current_iteration": 3,
//!   "max_iterations": 100,
//!   "use_worktree": false,
//!   "worktree_dir": "",
//!   "started_at": "2026-10-19T10:00:00Z",
//!   "last_heartbeat": "2026-10-19T10:14:31Z",
//!   "status": "running",
//!   "log_file": "/tmp/ralph-sessions/billing-api-48213.log"
//! }
//! ```
//!
//! [`Descriptor`] is the parsed file. [`SessionRecord`] wraps it with the
//! session id (the file stem) and the fields computed each time the registry
//! looks at it: liveness, display status, and the canonical work directory.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::tail::progress_path;

/// Status value written into a descriptor by the worker or by a lifecycle
/// action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeclaredStatus {
    Running,
    Paused,
    Completed,
    MaxIterationsReached,
    Interrupted,
    /// Written when a stop request finds the process already gone.
    Dead,
    /// A value this version does not know. Kept verbatim, never terminal.
    Other(String),
}

impl DeclaredStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::MaxIterationsReached => "max_iterations_reached",
            Self::Interrupted => "interrupted",
            Self::Dead => "dead",
            Self::Other(raw) => raw,
        }
    }

    /// Terminal statuses mean the worker exited by design.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::MaxIterationsReached | Self::Interrupted
        )
    }
}

impl From<String> for DeclaredStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "max_iterations_reached" => Self::MaxIterationsReached,
            "interrupted" => Self::Interrupted,
            "dead" => Self::Dead,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for DeclaredStatus {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<DeclaredStatus> for String {
    fn from(status: DeclaredStatus) -> Self {
        match status {
            DeclaredStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for DeclaredStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective status shown to observers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum DisplayStatus {
    Running,
    Paused,
    /// Alive, but the heartbeat is older than the staleness threshold.
    Stale,
    /// Non-terminal, but the process no longer exists.
    Dead,
    Completed,
    MaxIterationsReached,
    Interrupted,
    Other(String),
}

impl DisplayStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stale => "stale",
            Self::Dead => "dead",
            Self::Completed => "completed",
            Self::MaxIterationsReached => "max_iterations_reached",
            Self::Interrupted => "interrupted",
            Self::Other(raw) => raw,
        }
    }
}

impl From<&DeclaredStatus> for DisplayStatus {
    fn from(status: &DeclaredStatus) -> Self {
        match status {
            DeclaredStatus::Running => Self::Running,
            DeclaredStatus::Paused => Self::Paused,
            DeclaredStatus::Completed => Self::Completed,
            DeclaredStatus::MaxIterationsReached => Self::MaxIterationsReached,
            DeclaredStatus::Interrupted => Self::Interrupted,
            DeclaredStatus::Dead => Self::Dead,
            DeclaredStatus::Other(raw) => Self::Other(raw.clone()),
        }
    }
}

impl From<DisplayStatus> for String {
    fn from(status: DisplayStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the effective status of a session.
///
/// Rules, first match wins:
/// 1. terminal declared status is shown as-is
/// 2. a missing process is `dead`
/// 3. declared `paused` stays `paused` (a frozen worker cannot heartbeat)
/// 4. a heartbeat older than `stale_after` is `stale`
/// 5. otherwise the declared status
pub fn classify(
    declared: &DeclaredStatus,
    alive: bool,
    heartbeat_age: Duration,
    stale_after: Duration,
) -> DisplayStatus {
    if declared.is_terminal() {
        return declared.into();
    }
    if !alive {
        return DisplayStatus::Dead;
    }
    if *declared == DeclaredStatus::Paused {
        return DisplayStatus::Paused;
    }
    if heartbeat_age > stale_after {
        return DisplayStatus::Stale;
    }
    declared.into()
}

/// Treat an explicit `null` like a missing key.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parsed content of one descriptor file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    /// Worker process id.
    pub pid: i32,

    #[serde(default, deserialize_with = "nullable")]
    pub tool: String,

    #[serde(default, deserialize_with = "nullable")]
    pub project: String,

    /// Absolute path the worker operates on.
    pub work_dir: PathBuf,

    #[serde(default, deserialize_with = "nullable")]
    pub branch: String,

    #[serde(default, deserialize_with = "nullable")]
    pub prd_description: String,

    #[serde(default, deserialize_with = "nullable")]
    pub current_iteration: i64,

    #[serde(default, deserialize_with = "nullable")]
    pub max_iterations: i64,

    #[serde(default, deserialize_with = "nullable")]
    pub use_worktree: bool,

    /// Empty when the session does not use a worktree.
    #[serde(default, deserialize_with = "nullable")]
    pub worktree_dir: String,

    pub started_at: DateTime<Utc>,

    pub last_heartbeat: DateTime<Utc>,

    pub status: DeclaredStatus,

    /// Empty when the worker does not tee its output.
    #[serde(default, deserialize_with = "nullable")]
    pub log_file: String,

    /// Keys this version does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Descriptor {
    /// Decode and validate descriptor bytes.
    ///
    /// Returns a human-readable reason on failure.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let descriptor: Self = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), String> {
        if self.pid <= 0 {
            return Err(format!("invalid pid {}", self.pid));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err("empty work_dir".to_string());
        }
        Ok(())
    }
}

/// A session as observed by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    /// Descriptor file name without the `.json` extension.
    pub session_id: String,

    /// Full path of the descriptor file.
    pub descriptor_path: PathBuf,

    #[serde(flatten)]
    pub descriptor: Descriptor,

    /// Whether the pid existed when the record was last observed.
    pub is_alive: bool,

    pub display_status: DisplayStatus,

    /// `work_dir` with symlinks resolved; the literal path if resolution fails.
    pub canonical_key: PathBuf,
}

impl SessionRecord {
    /// Wrap a parsed descriptor. The record starts unobserved: not alive,
    /// display status equal to the declared status.
    pub fn new(session_id: String, descriptor_path: PathBuf, descriptor: Descriptor) -> Self {
        let canonical_key = canonical_work_dir(&descriptor.work_dir);
        let display_status = DisplayStatus::from(&descriptor.status);
        Self {
            session_id,
            descriptor_path,
            descriptor,
            is_alive: false,
            display_status,
            canonical_key,
        }
    }

    /// Record the result of a liveness probe and reclassify.
    pub fn observe(&mut self, alive: bool, now: DateTime<Utc>, stale_after: Duration) {
        self.is_alive = alive;
        self.reclassify(now, stale_after);
    }

    /// Recompute the display status from the current fields.
    pub fn reclassify(&mut self, now: DateTime<Utc>, stale_after: Duration) {
        self.display_status = classify(
            &self.descriptor.status,
            self.is_alive,
            self.heartbeat_age(now),
            stale_after,
        );
    }

    pub fn pid(&self) -> i32 {
        self.descriptor.pid
    }

    pub fn status(&self) -> &DeclaredStatus {
        &self.descriptor.status
    }

    pub fn is_terminal(&self) -> bool {
        self.descriptor.status.is_terminal()
    }

    /// Dedup and ordering priority, higher wins.
    ///
    /// - 2: alive and not terminal (actively working)
    /// - 1: alive but terminal
    /// - 0: not alive
    pub fn priority(&self) -> u8 {
        match (self.is_alive, self.is_terminal()) {
            (true, false) => 2,
            (true, true) => 1,
            (false, _) => 0,
        }
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.descriptor.last_heartbeat)
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.descriptor.started_at)
    }

    /// Whether the heartbeat has fallen outside the retention window.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.heartbeat_age(now) > retention
    }

    pub fn log_file(&self) -> Option<&Path> {
        non_empty_path(&self.descriptor.log_file)
    }

    pub fn worktree_dir(&self) -> Option<&Path> {
        non_empty_path(&self.descriptor.worktree_dir)
    }

    /// `{work_dir}/.ralph/progress.txt`
    pub fn progress_path(&self) -> PathBuf {
        progress_path(&self.descriptor.work_dir)
    }

    /// Iteration counter as `"3/100"`.
    pub fn iteration_progress(&self) -> String {
        format!(
            "{}/{}",
            self.descriptor.current_iteration, self.descriptor.max_iterations
        )
    }

    pub fn format_uptime(&self, now: DateTime<Utc>) -> String {
        format_duration(self.uptime(now))
    }

    pub fn format_heartbeat(&self, now: DateTime<Utc>) -> String {
        let age = self.heartbeat_age(now);
        if age < Duration::seconds(5) {
            return "just now".to_string();
        }
        format!("{} ago", format_duration(age))
    }
}

fn non_empty_path(raw: &str) -> Option<&Path> {
    if raw.is_empty() {
        None
    } else {
        Some(Path::new(raw))
    }
}

/// Resolve symlinks in `work_dir`, falling back to the literal path.
pub fn canonical_work_dir(work_dir: &Path) -> PathBuf {
    std::fs::canonicalize(work_dir).unwrap_or_else(|_| work_dir.to_path_buf())
}

/// Compact duration: `42s`, `3m7s`, `5h12m`. Negative ages (clock skew)
/// render as `0s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs / 60) % 60)
    }
}
