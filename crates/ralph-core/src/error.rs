//! Error types for registry operations

use std::path::PathBuf;
use thiserror::Error;

use crate::process::ControlSignal;

/// Errors that can occur while reading or controlling ralph sessions
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Descriptor file could not be read or decoded
    ///
    /// Never escapes [`Registry::list`](crate::Registry::list): the registry
    /// deletes the offending file and moves on.
    #[error("Corrupt session descriptor {path}: {reason}")]
    CorruptDescriptor { path: PathBuf, reason: String },

    /// No readable descriptor exists for the requested session id
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    /// Lifecycle action requested on a session that already finished
    #[error("Session {session_id} is already in terminal state: {status}")]
    AlreadyTerminal { session_id: String, status: String },

    /// Lifecycle action requires a live process but the pid is gone
    #[error("Session {session_id}: PID {pid} is not alive")]
    NotAlive { session_id: String, pid: i32 },

    /// The OS refused to deliver a signal (e.g. permission denied)
    #[error("Sending {signal} to PID {pid} failed: {source}")]
    SignalDeliveryFailed {
        pid: i32,
        signal: ControlSignal,
        source: std::io::Error,
    },

    /// Directory-level or companion-file I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl RegistryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CorruptDescriptor {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
