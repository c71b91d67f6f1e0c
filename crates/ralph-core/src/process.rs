//! Liveness probing and signal delivery for ralph worker processes.
//!
//! ## Liveness
//!
//! Liveness is checked using `kill(pid, 0)` on Unix, which probes whether the
//! process exists without sending an actual signal. Any failure, including
//! `EPERM`, counts as not alive. On non-Unix platforms the check always
//! returns `false` (conservative: treat as dead).
//!
//! ## Process groups
//!
//! A ralph loop runs its AI tool as a child process. Suspending only the
//! loop leaves the child running, so pause and resume address the whole
//! process group (`kill(-pid, sig)`) and fall back to the single pid when
//! the group cannot be signalled.

use std::fmt;
use std::io;

/// Control signals the registry can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Graceful termination (`SIGTERM`).
    Terminate,
    /// Freeze execution (`SIGSTOP`).
    Suspend,
    /// Thaw a frozen process (`SIGCONT`).
    Continue,
}

impl ControlSignal {
    pub fn name(self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Suspend => "SIGSTOP",
            Self::Continue => "SIGCONT",
        }
    }

    #[cfg(unix)]
    fn raw(self) -> libc::c_int {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Suspend => libc::SIGSTOP,
            Self::Continue => libc::SIGCONT,
        }
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Who receives a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    /// A single process.
    Process(i32),
    /// Every process in the group led by this pid.
    Group(i32),
}

/// Process-level operations the registry depends on.
///
/// [`OsProcessControl`] talks to the kernel; tests substitute a scripted
/// implementation.
pub trait ProcessControl {
    /// Whether a process with this pid exists and can be signalled.
    fn is_alive(&self, pid: i32) -> bool;

    /// Deliver `signal` to `target`.
    ///
    /// # Errors
    ///
    /// Returns the OS error on failure. Use [`is_no_such_process`] to tell
    /// a vanished target apart from other failures.
    fn signal(&self, target: SignalTarget, signal: ControlSignal) -> io::Result<()>;
}

/// [`ProcessControl`] backed by `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessControl;

impl ProcessControl for OsProcessControl {
    fn is_alive(&self, pid: i32) -> bool {
        is_pid_alive(pid)
    }

    fn signal(&self, target: SignalTarget, signal: ControlSignal) -> io::Result<()> {
        send_signal(target, signal)
    }
}

/// Whether an error from [`ProcessControl::signal`] means the target does
/// not exist.
pub fn is_no_such_process(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ESRCH)
    }

    #[cfg(not(unix))]
    {
        err.kind() == io::ErrorKind::NotFound
    }
}

/// The error [`is_no_such_process`] recognises.
pub fn no_such_process_error() -> io::Error {
    #[cfg(unix)]
    {
        io::Error::from_raw_os_error(libc::ESRCH)
    }

    #[cfg(not(unix))]
    {
        io::Error::from(io::ErrorKind::NotFound)
    }
}

// ── Platform-specific implementation ─────────────────────────────────────────

/// Check whether an OS process with the given PID is alive.
///
/// Non-positive pids are never alive: `kill(0, 0)` and `kill(-1, 0)` address
/// groups, not a process.
pub fn is_pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }

    #[cfg(unix)]
    {
        // SAFETY: kill with sig=0 never sends a signal; it only checks PID existence.
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(unix)]
fn send_signal(target: SignalTarget, signal: ControlSignal) -> io::Result<()> {
    let raw_pid = match target {
        SignalTarget::Process(pid) if pid > 0 => pid,
        // -1 would address every process we may signal; 0 our own group.
        SignalTarget::Group(pid) if pid > 1 => -pid,
        _ => return Err(no_such_process_error()),
    };
    // SAFETY: kill has no memory-safety preconditions; raw_pid is never 0 or -1.
    let result = unsafe { libc::kill(raw_pid as libc::pid_t, signal.raw()) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_signal(_target: SignalTarget, signal: ControlSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{signal} is not supported on this platform"),
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Liveness check: the current process must be alive.
    #[cfg(unix)]
    #[test]
    fn test_is_pid_alive_current_process() {
        let pid = std::process::id() as i32;
        assert!(is_pid_alive(pid));
        assert!(OsProcessControl.is_alive(pid));
    }

    /// Liveness check: an impossible PID should be dead.
    #[cfg(unix)]
    #[test]
    fn test_is_pid_alive_nonexistent_pid() {
        // i32::MAX exceeds kernel PID range on Linux/macOS; kill() returns ESRCH.
        assert!(!is_pid_alive(i32::MAX));
        assert!(!is_pid_alive(99_999_999));
    }

    #[test]
    fn test_is_pid_alive_rejects_group_pids() {
        assert!(!is_pid_alive(0));
        assert!(!is_pid_alive(-1));
        assert!(!is_pid_alive(-42));
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_nonexistent_pid_is_esrch() {
        let err = OsProcessControl
            .signal(SignalTarget::Process(i32::MAX), ControlSignal::Continue)
            .unwrap_err();
        assert!(is_no_such_process(&err));
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_refuses_broadcast_group() {
        let err = OsProcessControl
            .signal(SignalTarget::Group(1), ControlSignal::Suspend)
            .unwrap_err();
        assert!(is_no_such_process(&err));
        let err = OsProcessControl
            .signal(SignalTarget::Process(0), ControlSignal::Suspend)
            .unwrap_err();
        assert!(is_no_such_process(&err));
    }

    /// SIGCONT to a running process is harmless, so it can target ourselves.
    #[cfg(unix)]
    #[test]
    fn test_continue_self() {
        let pid = std::process::id() as i32;
        OsProcessControl
            .signal(SignalTarget::Process(pid), ControlSignal::Continue)
            .unwrap();
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(ControlSignal::Terminate.to_string(), "SIGTERM");
        assert_eq!(ControlSignal::Suspend.name(), "SIGSTOP");
        assert_eq!(ControlSignal::Continue.name(), "SIGCONT");
    }
}
