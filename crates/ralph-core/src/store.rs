//! Directory-backed descriptor store
//!
//! One `{session_id}.json` file per session in a flat directory shared with
//! the ralph workers that write it. Everything here tolerates the workers
//! racing us: a vanished file is "already deleted", a half-written file is
//! corrupt, and a status rewrite that cannot complete is dropped.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::RegistryError;
use crate::session::{DeclaredStatus, Descriptor, SessionRecord};

/// Extension identifying descriptor files.
pub const DESCRIPTOR_EXTENSION: &str = "json";

/// Access to the descriptor files in one registry directory.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    dir: PathBuf,
}

impl DescriptorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the descriptor for `session_id`.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.{DESCRIPTOR_EXTENSION}"))
    }

    /// List descriptor files, sorted by file name.
    ///
    /// Non-recursive; subdirectories and files with other extensions are
    /// skipped. A missing registry directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Io`] if the directory exists but cannot be
    /// read.
    pub fn enumerate(&self) -> Result<Vec<PathBuf>, RegistryError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RegistryError::io(&self.dir, e)),
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
            .map(|entry| entry.path())
            .filter(|path| is_descriptor_path(path))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Read and decode one descriptor.
    ///
    /// The returned record is unobserved; the registry fills in liveness and
    /// display status.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CorruptDescriptor`] if the file cannot be
    /// read or decoded. The caller decides whether to delete it.
    pub fn read_and_parse(&self, path: &Path) -> Result<SessionRecord, RegistryError> {
        let session_id = session_id_from_path(path)
            .ok_or_else(|| RegistryError::corrupt(path, "file name is not a session id"))?;
        let bytes = fs::read(path).map_err(|e| RegistryError::corrupt(path, e))?;
        let descriptor =
            Descriptor::parse(&bytes).map_err(|reason| RegistryError::corrupt(path, reason))?;
        Ok(SessionRecord::new(session_id, path.to_path_buf(), descriptor))
    }

    /// Replace the `status` key of a descriptor, leaving every other key and
    /// their order untouched.
    ///
    /// Best-effort: any read, decode, or write failure is logged and the
    /// record is left unchanged. Returns whether the new status was written.
    /// On success `record`'s declared status is updated too.
    pub fn rewrite_status(&self, record: &mut SessionRecord, status: DeclaredStatus) -> bool {
        match patch_status(&record.descriptor_path, &status) {
            Ok(()) => {
                tracing::info!(
                    session = %record.session_id,
                    status = %status,
                    "Rewrote session status"
                );
                record.descriptor.status = status;
                true
            }
            Err(reason) => {
                tracing::warn!(
                    session = %record.session_id,
                    status = %status,
                    "Status rewrite skipped: {reason}"
                );
                false
            }
        }
    }

    /// Remove a session's descriptor and its log file.
    ///
    /// Files that are already gone are not an error.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistryError::Io`] for a removal that failed for
    /// another reason. Both removals are always attempted.
    pub fn delete(&self, record: &SessionRecord) -> Result<(), RegistryError> {
        delete_files(&record.descriptor_path, record.log_file())
    }

    /// Remove a descriptor file that could not be parsed.
    ///
    /// # Errors
    ///
    /// Same as [`delete`](Self::delete).
    pub fn delete_path(&self, path: &Path) -> Result<(), RegistryError> {
        delete_files(path, None)
    }
}

fn is_descriptor_path(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(DESCRIPTOR_EXTENSION)
}

/// Session id is the descriptor file name minus its extension.
pub fn session_id_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

fn patch_status(path: &Path, status: &DeclaredStatus) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|e| format!("read {}: {e}", path.display()))?;
    let mut doc: Value =
        serde_json::from_slice(&bytes).map_err(|e| format!("decode {}: {e}", path.display()))?;
    let Some(fields) = doc.as_object_mut() else {
        return Err(format!("{} is not a JSON object", path.display()));
    };
    fields.insert("status".to_string(), Value::String(status.as_str().to_string()));

    let mut updated =
        serde_json::to_vec_pretty(&doc).map_err(|e| format!("encode {}: {e}", path.display()))?;
    updated.push(b'\n');
    write_replace(path, &updated)
}

/// Write `content` to a hidden sibling and rename it over `path`.
///
/// The temp name ends in `.tmp` so enumeration never picks it up.
fn write_replace(path: &Path, content: &[u8]) -> Result<(), String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("invalid descriptor path {}", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    if let Err(e) = fs::write(&tmp_path, content) {
        let _ = fs::remove_file(&tmp_path);
        return Err(format!("write {}: {e}", tmp_path.display()));
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(format!("rename onto {}: {e}", path.display()));
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), RegistryError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RegistryError::io(path, e)),
    }
}

fn delete_files(descriptor: &Path, log_file: Option<&Path>) -> Result<(), RegistryError> {
    let log_result = log_file.map_or(Ok(()), remove_if_present);
    let descriptor_result = remove_if_present(descriptor);
    log_result.and(descriptor_result)
}
