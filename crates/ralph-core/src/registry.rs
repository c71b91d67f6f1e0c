//! Session registry: discovery, classification, deduplication, and lifecycle
//! control for ralph sessions.
//!
//! ## Listing
//!
//! [`Registry::list`] re-reads the registry directory on every call:
//!
//! 1. corrupt descriptors are deleted
//! 2. descriptors whose heartbeat is past the retention window are deleted
//!    together with their log file
//! 3. each remaining session's pid is probed and its display status computed
//! 4. sessions sharing a canonical work directory are reduced to one winner
//!    (highest [`SessionRecord::priority`], then latest `started_at`); the
//!    losers' files are deleted
//! 5. winners are ordered by priority, project name, then newest first
//!
//! [`Registry::audit`] runs the same pipeline without deleting anything and
//! reports what `list` would remove.
//!
//! ## Lifecycle
//!
//! [`Registry::stop`], [`Registry::pause`], and [`Registry::resume`] re-probe
//! the pid, check their precondition, signal the worker, and then rewrite the
//! declared status best-effort. A delivered signal is the success condition;
//! the status rewrite never turns success into failure.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::process::{
    ControlSignal, OsProcessControl, ProcessControl, SignalTarget, is_no_such_process,
};
use crate::session::{DeclaredStatus, DisplayStatus, SessionRecord};
use crate::store::{DescriptorStore, session_id_from_path};
use crate::tail;

/// Why a descriptor was (or would be) removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemovalReason {
    /// The file could not be read or decoded.
    Corrupt { detail: String },
    /// `last_heartbeat` is older than the retention window.
    Expired,
    /// Another session for the same work directory outranked this one.
    Duplicate { winner: String },
}

/// A descriptor removed by a scan, or that an audit would remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub session_id: String,
    pub descriptor_path: PathBuf,
    pub log_file: Option<PathBuf>,
    pub reason: RemovalReason,
}

impl Removal {
    fn corrupt(path: &Path, err: RegistryError) -> Self {
        let detail = match err {
            RegistryError::CorruptDescriptor { reason, .. } => reason,
            other => other.to_string(),
        };
        Self {
            session_id: session_id_from_path(path)
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            descriptor_path: path.to_path_buf(),
            log_file: None,
            reason: RemovalReason::Corrupt { detail },
        }
    }

    fn of(record: &SessionRecord, reason: RemovalReason) -> Self {
        Self {
            session_id: record.session_id.clone(),
            descriptor_path: record.descriptor_path.clone(),
            log_file: record.log_file().map(Path::to_path_buf),
            reason,
        }
    }
}

/// Result of a full scan: the visible sessions and the removals.
#[derive(Debug, Clone, Serialize)]
pub struct ListReport {
    pub sessions: Vec<SessionRecord>,
    pub removals: Vec<Removal>,
}

/// What a stop request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// `SIGTERM` was delivered; the worker records its own terminal status.
    Signalled,
    /// The process was already gone; the descriptor was marked `dead`.
    MarkedDead,
}

/// Registry over one descriptor directory.
///
/// Holds no session state between calls; every operation re-derives its
/// view from disk.
#[derive(Debug, Clone)]
pub struct Registry<P: ProcessControl = OsProcessControl> {
    store: DescriptorStore,
    config: RegistryConfig,
    process: P,
}

impl Registry<OsProcessControl> {
    /// Registry over the default directory (`RALPH_REGISTRY_DIR` or
    /// `$TMPDIR/ralph-sessions`) with default thresholds.
    pub fn new() -> Self {
        Self::from_config(RegistryConfig::default())
    }

    /// Registry using the given preferences; the directory is resolved with
    /// the environment override applied.
    pub fn from_config(config: RegistryConfig) -> Self {
        let dir = config.resolved_registry_dir();
        Self::with_process_control(dir, config, OsProcessControl)
    }

    /// Registry over exactly `dir`, ignoring environment overrides.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self::with_process_control(dir, RegistryConfig::default(), OsProcessControl)
    }
}

impl Default for Registry<OsProcessControl> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ProcessControl> Registry<P> {
    pub fn with_process_control(
        dir: impl Into<PathBuf>,
        config: RegistryConfig,
        process: P,
    ) -> Self {
        Self {
            store: DescriptorStore::new(dir),
            config,
            process,
        }
    }

    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn process(&self) -> &P {
        &self.process
    }

    // ── Listing ──────────────────────────────────────────────────────────────

    /// Deduplicated, classified, ordered sessions.
    ///
    /// Deletes corrupt, expired, and duplicate descriptors as a side effect.
    ///
    /// # Errors
    ///
    /// Only directory-level I/O errors are returned; per-file problems are
    /// healed by deletion.
    pub fn list(&self) -> Result<Vec<SessionRecord>, RegistryError> {
        Ok(self.list_report()?.sessions)
    }

    /// Like [`list`](Self::list), also returning what was removed.
    ///
    /// # Errors
    ///
    /// Same as [`list`](Self::list).
    pub fn list_report(&self) -> Result<ListReport, RegistryError> {
        let report = self.audit()?;
        for removal in &report.removals {
            self.apply_removal(removal);
        }
        Ok(report)
    }

    /// Run the listing pipeline without modifying the registry directory.
    ///
    /// # Errors
    ///
    /// Same as [`list`](Self::list).
    pub fn audit(&self) -> Result<ListReport, RegistryError> {
        self.scan(Utc::now())
    }

    fn scan(&self, now: DateTime<Utc>) -> Result<ListReport, RegistryError> {
        let mut removals = Vec::new();
        let mut winners: BTreeMap<PathBuf, SessionRecord> = BTreeMap::new();
        let mut losers: Vec<SessionRecord> = Vec::new();

        for path in self.store.enumerate()? {
            let mut record = match self.triage(&path, now) {
                Ok(record) => record,
                Err(removal) => {
                    removals.push(removal);
                    continue;
                }
            };

            let alive = self.process.is_alive(record.pid());
            record.observe(alive, now, self.config.stale_after);

            match winners.entry(record.canonical_key.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(mut slot) => {
                    if outranks(&record, slot.get()) {
                        losers.push(slot.insert(record));
                    } else {
                        losers.push(record);
                    }
                }
            }
        }

        for loser in losers {
            let winner = winners
                .get(&loser.canonical_key)
                .map(|w| w.session_id.clone())
                .unwrap_or_default();
            removals.push(Removal::of(&loser, RemovalReason::Duplicate { winner }));
        }

        let mut sessions: Vec<SessionRecord> = winners.into_values().collect();
        sessions.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.descriptor.project.cmp(&b.descriptor.project))
                .then_with(|| b.descriptor.started_at.cmp(&a.descriptor.started_at))
        });

        Ok(ListReport { sessions, removals })
    }

    /// Parse one descriptor and reject it if corrupt or expired.
    fn triage(&self, path: &Path, now: DateTime<Utc>) -> Result<SessionRecord, Removal> {
        let record = self
            .store
            .read_and_parse(path)
            .map_err(|e| Removal::corrupt(path, e))?;
        if record.is_expired(now, self.config.retention) {
            return Err(Removal::of(&record, RemovalReason::Expired));
        }
        Ok(record)
    }

    fn apply_removal(&self, removal: &Removal) {
        tracing::debug!(
            session = %removal.session_id,
            reason = ?removal.reason,
            "Removing session files"
        );
        let result = match &removal.log_file {
            Some(log) => self.store.delete_path(log),
            None => Ok(()),
        }
        .and(self.store.delete_path(&removal.descriptor_path));
        if let Err(e) = result {
            tracing::warn!(session = %removal.session_id, "Failed to remove session files: {e}");
        }
    }

    /// Delete corrupt and expired descriptors without probing or deduping.
    ///
    /// Intended to run once at startup. Returns how many descriptors were
    /// removed.
    ///
    /// # Errors
    ///
    /// Only directory-level I/O errors are returned.
    pub fn cleanup_expired(&self) -> Result<usize, RegistryError> {
        self.sweep(true)
    }

    /// Count what [`cleanup_expired`](Self::cleanup_expired) would remove.
    ///
    /// # Errors
    ///
    /// Only directory-level I/O errors are returned.
    pub fn cleanup_expired_dry_run(&self) -> Result<usize, RegistryError> {
        self.sweep(false)
    }

    fn sweep(&self, apply: bool) -> Result<usize, RegistryError> {
        let now = Utc::now();
        let mut removed = 0;
        for path in self.store.enumerate()? {
            if let Err(removal) = self.triage(&path, now) {
                if apply {
                    self.apply_removal(&removal);
                }
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Read one session by id, bypassing deduplication.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no readable descriptor exists
    /// for `session_id`.
    pub fn get_session(&self, session_id: &str) -> Result<SessionRecord, RegistryError> {
        let not_found = || RegistryError::NotFound {
            session_id: session_id.to_string(),
        };
        if !is_valid_session_id(session_id) {
            return Err(not_found());
        }

        let path = self.store.path_for(session_id);
        let mut record = self.store.read_and_parse(&path).map_err(|e| {
            tracing::debug!(session = %session_id, "Lookup failed: {e}");
            not_found()
        })?;
        let alive = self.process.is_alive(record.pid());
        record.observe(alive, Utc::now(), self.config.stale_after);
        Ok(record)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Ask the worker to stop with `SIGTERM`.
    ///
    /// A session whose process is already gone is reconciled instead: its
    /// declared status is rewritten to `dead` and no signal is sent.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::AlreadyTerminal`] if the declared status is terminal
    /// - [`RegistryError::SignalDeliveryFailed`] if the OS refused the signal
    pub fn stop(&self, record: &mut SessionRecord) -> Result<StopOutcome, RegistryError> {
        let now = Utc::now();
        self.reprobe(record, now);

        if record.is_terminal() {
            return Err(already_terminal(record));
        }
        if record.display_status == DisplayStatus::Dead {
            self.mark_dead(record, now);
            return Ok(StopOutcome::MarkedDead);
        }

        let pid = record.pid();
        match self
            .process
            .signal(SignalTarget::Process(pid), ControlSignal::Terminate)
        {
            Ok(()) => {
                tracing::info!(session = %record.session_id, pid, "Sent SIGTERM");
                Ok(StopOutcome::Signalled)
            }
            Err(e) if is_no_such_process(&e) => {
                record.is_alive = false;
                self.mark_dead(record, now);
                Ok(StopOutcome::MarkedDead)
            }
            Err(source) => Err(RegistryError::SignalDeliveryFailed {
                pid,
                signal: ControlSignal::Terminate,
                source,
            }),
        }
    }

    /// Freeze the worker and its children with `SIGSTOP`, then mark it
    /// `paused`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotAlive`] if the process does not exist
    /// - [`RegistryError::AlreadyTerminal`] if the declared status is terminal
    /// - [`RegistryError::SignalDeliveryFailed`] if the OS refused the signal
    pub fn pause(&self, record: &mut SessionRecord) -> Result<(), RegistryError> {
        self.transition(record, ControlSignal::Suspend, DeclaredStatus::Paused)
    }

    /// Thaw a paused worker and its children with `SIGCONT`, then mark it
    /// `running`.
    ///
    /// # Errors
    ///
    /// Same as [`pause`](Self::pause).
    pub fn resume(&self, record: &mut SessionRecord) -> Result<(), RegistryError> {
        self.transition(record, ControlSignal::Continue, DeclaredStatus::Running)
    }

    /// Resume a paused session, pause anything else. Returns the new
    /// declared status.
    ///
    /// # Errors
    ///
    /// Same as [`pause`](Self::pause).
    pub fn toggle_pause(
        &self,
        record: &mut SessionRecord,
    ) -> Result<DeclaredStatus, RegistryError> {
        if *record.status() == DeclaredStatus::Paused {
            self.resume(record)?;
        } else {
            self.pause(record)?;
        }
        Ok(record.status().clone())
    }

    fn transition(
        &self,
        record: &mut SessionRecord,
        signal: ControlSignal,
        status: DeclaredStatus,
    ) -> Result<(), RegistryError> {
        let now = Utc::now();
        self.reprobe(record, now);

        if !record.is_alive {
            return Err(not_alive(record));
        }
        if record.is_terminal() {
            return Err(already_terminal(record));
        }

        self.signal_group_or_process(record, signal)?;
        if !self.store.rewrite_status(record, status.clone()) {
            // Signal was delivered; the record reflects it even if the file
            // could not be patched.
            record.descriptor.status = status;
        }
        record.reclassify(now, self.config.stale_after);
        Ok(())
    }

    /// Signal the process group, falling back to the single pid.
    fn signal_group_or_process(
        &self,
        record: &mut SessionRecord,
        signal: ControlSignal,
    ) -> Result<(), RegistryError> {
        let pid = record.pid();
        if let Err(group_err) = self.process.signal(SignalTarget::Group(pid), signal) {
            tracing::debug!(pid, "{signal} to process group failed ({group_err}); signalling PID");
            if let Err(e) = self.process.signal(SignalTarget::Process(pid), signal) {
                if is_no_such_process(&e) {
                    record.is_alive = false;
                    return Err(not_alive(record));
                }
                return Err(RegistryError::SignalDeliveryFailed {
                    pid,
                    signal,
                    source: e,
                });
            }
        }
        tracing::info!(session = %record.session_id, pid, "Sent {signal}");
        Ok(())
    }

    fn reprobe(&self, record: &mut SessionRecord, now: DateTime<Utc>) {
        let alive = self.process.is_alive(record.pid());
        record.observe(alive, now, self.config.stale_after);
    }

    fn mark_dead(&self, record: &mut SessionRecord, now: DateTime<Utc>) {
        tracing::info!(
            session = %record.session_id,
            pid = record.pid(),
            "Process already gone; marking session dead"
        );
        self.store.rewrite_status(record, DeclaredStatus::Dead);
        record.reclassify(now, self.config.stale_after);
    }

    // ── Tail reading ─────────────────────────────────────────────────────────

    /// Trailing lines of the session's live log, bounded by the configured
    /// byte and line limits.
    ///
    /// # Errors
    ///
    /// See [`tail::tail_log`].
    pub fn tail_log(&self, record: &SessionRecord) -> Result<String, RegistryError> {
        tail::tail_log(
            record.log_file(),
            self.config.log_tail_bytes,
            self.config.log_tail_lines,
        )
    }

    /// Trailing lines of the session's progress file.
    ///
    /// # Errors
    ///
    /// See [`tail::tail_progress`].
    pub fn tail_progress(&self, record: &SessionRecord) -> Result<String, RegistryError> {
        tail::tail_progress(&record.descriptor.work_dir, self.config.progress_lines)
    }
}

/// Whether `candidate` should replace `incumbent` for the same work directory.
fn outranks(candidate: &SessionRecord, incumbent: &SessionRecord) -> bool {
    match candidate.priority().cmp(&incumbent.priority()) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            candidate.descriptor.started_at > incumbent.descriptor.started_at
        }
    }
}

/// Ids are plain file stems; anything that could escape the directory is
/// rejected.
fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && !session_id.contains(['/', '\\', '\0'])
}

fn already_terminal(record: &SessionRecord) -> RegistryError {
    RegistryError::AlreadyTerminal {
        session_id: record.session_id.clone(),
        status: record.status().to_string(),
    }
}

fn not_alive(record: &SessionRecord) -> RegistryError {
    RegistryError::NotAlive {
        session_id: record.session_id.clone(),
        pid: record.pid(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
