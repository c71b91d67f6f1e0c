//! Integration tests for the session registry against real descriptor files
//! and, on Unix, real worker processes.

use chrono::{Duration, Utc};
use ralph_admin_core::{
    DeclaredStatus, DisplayStatus, OsProcessControl, Registry, RegistryConfig, RegistryError,
    RemovalReason, StopOutcome,
};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Pid that cannot exist on Linux or macOS.
const MISSING_PID: i64 = 99_999_999;

struct Session<'a> {
    id: &'a str,
    pid: i64,
    project: &'a str,
    work_dir: PathBuf,
    status: &'a str,
    started_ago: Duration,
    heartbeat_ago: Duration,
}

impl<'a> Session<'a> {
    fn new(id: &'a str, pid: i64, work_dir: &Path) -> Self {
        Self {
            id,
            pid,
            project: "app",
            work_dir: work_dir.to_path_buf(),
            status: "running",
            started_ago: Duration::minutes(10),
            heartbeat_ago: Duration::seconds(1),
        }
    }

    fn status(mut self, status: &'a str) -> Self {
        self.status = status;
        self
    }

    fn started_ago(mut self, ago: Duration) -> Self {
        self.started_ago = ago;
        self
    }

    fn heartbeat_ago(mut self, ago: Duration) -> Self {
        self.heartbeat_ago = ago;
        self
    }

    /// Write `{id}.json` and `{id}.log` into `dir`. Returns the descriptor path.
    fn write(&self, dir: &Path) -> PathBuf {
        let now = Utc::now();
        let log = dir.join(format!("{}.log", self.id));
        fs::write(&log, "iteration 1\niteration 2\n").unwrap();
        let doc = json!({
            "pid": self.pid,
            "tool": "claude",
            "project": self.project,
            "work_dir": self.work_dir,
            "branch": "ralph/feature",
            "prd_description": "Ship it",
            "current_iteration": 2,
            "max_iterations": 20,
            "use_worktree": false,
            "worktree_dir": "",
            "started_at": (now - self.started_ago).to_rfc3339(),
            "last_heartbeat": (now - self.heartbeat_ago).to_rfc3339(),
            "status": self.status,
            "log_file": log,
        });
        let path = dir.join(format!("{}.json", self.id));
        fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
        path
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

fn self_pid() -> i64 {
    i64::from(std::process::id())
}

#[test]
fn test_expired_session_removed_with_log() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    let path = Session::new("old", self_pid(), tmp.path())
        .started_ago(Duration::hours(30))
        .heartbeat_ago(Duration::hours(25))
        .write(tmp.path());

    let report = registry.list_report().unwrap();
    assert!(report.sessions.is_empty());
    assert_eq!(report.removals.len(), 1);
    assert_eq!(report.removals[0].reason, RemovalReason::Expired);
    assert!(!path.exists());
    assert!(!tmp.path().join("old.log").exists());
}

#[test]
fn test_cleanup_expired_at_startup() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    Session::new("old", MISSING_PID, tmp.path())
        .heartbeat_ago(Duration::hours(48))
        .write(tmp.path());
    Session::new("fresh", MISSING_PID, &tmp.path().join("other")).write(tmp.path());
    fs::write(tmp.path().join("garbage.json"), "]]").unwrap();

    assert_eq!(registry.cleanup_expired().unwrap(), 2);
    assert!(!tmp.path().join("old.json").exists());
    assert!(!tmp.path().join("old.log").exists());
    assert!(!tmp.path().join("garbage.json").exists());
    assert!(tmp.path().join("fresh.json").exists());
}

#[test]
fn test_retention_is_configurable() {
    let tmp = TempDir::new().unwrap();
    let config = RegistryConfig {
        retention: Duration::minutes(30),
        ..RegistryConfig::default()
    };
    let registry = Registry::with_process_control(tmp.path(), config, OsProcessControl);
    Session::new("hour-old", MISSING_PID, tmp.path())
        .heartbeat_ago(Duration::hours(1))
        .write(tmp.path());
    assert!(registry.list().unwrap().is_empty());
}

#[test]
fn test_duplicate_work_dir_keeps_newer_session() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    let work_dir = tmp.path().join("project");
    fs::create_dir(&work_dir).unwrap();

    // Both "alive": this test process stands in for both workers.
    let a = Session::new("A", self_pid(), &work_dir)
        .started_ago(Duration::minutes(15))
        .write(tmp.path());
    let b = Session::new("B", self_pid(), &work_dir)
        .started_ago(Duration::minutes(10))
        .write(tmp.path());

    let sessions = registry.list().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, "B");
    assert!(sessions[0].is_alive);
    assert!(!a.exists());
    assert!(!tmp.path().join("A.log").exists());
    assert!(b.exists());
}

#[cfg(unix)]
#[test]
fn test_duplicate_through_symlink() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    let real = tmp.path().join("real");
    fs::create_dir(&real).unwrap();
    let link = tmp.path().join("alias");
    std::os::unix::fs::symlink(&real, &link).unwrap();

    Session::new("direct", self_pid(), &real)
        .started_ago(Duration::minutes(3))
        .write(tmp.path());
    Session::new("linked", self_pid(), &link)
        .started_ago(Duration::minutes(30))
        .write(tmp.path());

    let sessions = registry.list().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, "direct");
}

#[test]
fn test_missing_process_is_dead_but_not_rewritten() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    let path = Session::new("ghost", MISSING_PID, tmp.path()).write(tmp.path());

    let sessions = registry.list().unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].is_alive);
    assert_eq!(sessions[0].display_status, DisplayStatus::Dead);
    assert_eq!(read_json(&path)["status"], "running");
}

#[test]
fn test_corrupt_descriptor_self_heals() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    Session::new("ok", self_pid(), tmp.path()).write(tmp.path());
    let bad = tmp.path().join("half-written.json");
    fs::write(&bad, "{\"pid\": 4").unwrap();

    let sessions = registry.list().unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(!bad.exists());
}

#[test]
fn test_audit_previews_without_deleting() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    let old = Session::new("old", MISSING_PID, tmp.path())
        .heartbeat_ago(Duration::hours(30))
        .write(tmp.path());

    let report = registry.audit().unwrap();
    assert!(report.sessions.is_empty());
    assert_eq!(report.removals.len(), 1);
    assert!(old.exists());
    assert_eq!(registry.cleanup_expired_dry_run().unwrap(), 1);
    assert!(old.exists());
}

#[test]
fn test_stop_completed_session_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    let path = Session::new("done", self_pid(), tmp.path())
        .status("completed")
        .write(tmp.path());

    let mut record = registry.get_session("done").unwrap();
    let err = registry.stop(&mut record).unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyTerminal { .. }));
    assert_eq!(read_json(&path)["status"], "completed");
}

#[test]
fn test_stop_dead_process_marks_dead() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    let path = Session::new("crashed", MISSING_PID, tmp.path()).write(tmp.path());

    let mut record = registry.get_session("crashed").unwrap();
    assert_eq!(registry.stop(&mut record).unwrap(), StopOutcome::MarkedDead);
    let doc = read_json(&path);
    assert_eq!(doc["status"], "dead");
    assert_eq!(doc["branch"], "ralph/feature");
    assert_eq!(doc["pid"], MISSING_PID);
}

#[test]
fn test_pause_dead_process_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    let path = Session::new("crashed", MISSING_PID, tmp.path()).write(tmp.path());
    let before = fs::read(&path).unwrap();

    let mut record = registry.get_session("crashed").unwrap();
    let err = registry.pause(&mut record).unwrap_err();
    assert!(matches!(err, RegistryError::NotAlive { .. }));
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn test_get_session_unknown_id() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    assert!(matches!(
        registry.get_session("nobody"),
        Err(RegistryError::NotFound { .. })
    ));
}

#[test]
fn test_tail_log_and_progress() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::with_dir(tmp.path());
    let work_dir = tmp.path().join("w");
    fs::create_dir_all(work_dir.join(".ralph")).unwrap();
    fs::write(
        work_dir.join(".ralph").join("progress.txt"),
        "## Iteration 1\ndone: parser\n",
    )
    .unwrap();
    Session::new("s", self_pid(), &work_dir).write(tmp.path());

    let record = registry.get_session("s").unwrap();
    assert_eq!(registry.tail_log(&record).unwrap(), "iteration 1\niteration 2");
    assert_eq!(
        registry.tail_progress(&record).unwrap(),
        "## Iteration 1\ndone: parser"
    );
}

#[cfg(unix)]
mod live_process {
    use super::*;
    use std::os::unix::process::{CommandExt, ExitStatusExt};
    use std::process::{Child, Command};

    /// A `sleep` worker leading its own process group.
    struct Worker(Child);

    impl Worker {
        fn spawn() -> Self {
            let child = Command::new("sleep")
                .arg("30")
                .process_group(0)
                .spawn()
                .unwrap();
            Self(child)
        }

        fn pid(&self) -> i64 {
            i64::from(self.0.id())
        }

        /// Scheduler state from `/proc`, where available.
        fn state(&self) -> Option<char> {
            let stat = fs::read_to_string(format!("/proc/{}/stat", self.0.id())).ok()?;
            let after_name = stat.rsplit_once(')')?.1;
            after_name.trim_start().chars().next()
        }
    }

    impl Drop for Worker {
        fn drop(&mut self) {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }

    #[test]
    fn test_pause_resume_stop_live_worker() {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::with_dir(tmp.path());
        let mut worker = Worker::spawn();
        let path = Session::new("live", worker.pid(), tmp.path()).write(tmp.path());

        let mut record = registry.get_session("live").unwrap();
        assert!(record.is_alive);

        registry.pause(&mut record).unwrap();
        assert_eq!(read_json(&path)["status"], "paused");
        assert_eq!(record.display_status, DisplayStatus::Paused);
        if let Some(state) = worker.state() {
            assert_eq!(state, 'T');
        }

        registry.resume(&mut record).unwrap();
        assert_eq!(read_json(&path)["status"], "running");
        if let Some(state) = worker.state() {
            assert_ne!(state, 'T');
        }

        let toggled = registry.toggle_pause(&mut record).unwrap();
        assert_eq!(toggled, DeclaredStatus::Paused);
        let toggled = registry.toggle_pause(&mut record).unwrap();
        assert_eq!(toggled, DeclaredStatus::Running);

        assert_eq!(registry.stop(&mut record).unwrap(), StopOutcome::Signalled);
        let status = worker.0.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
        // The worker is responsible for its own terminal status
        assert_eq!(read_json(&path)["status"], "running");
    }
}
