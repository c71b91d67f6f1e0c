//! Bounded reads of a session's live log and progress file.
//!
//! Both artifacts are appended to by the running worker while we read them.
//! Neither function ever reads more than it needs from the live log, and a
//! file that shrinks or grows between `stat` and `read` is not an error: a
//! short read is simply the content that was available.
//!
//! Missing or unconfigured artifacts are reported as sentinel strings rather
//! than errors so a detail pane can always render something.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::RegistryError;

pub const NO_LOG_CONFIGURED: &str = "(no log file configured)";
pub const LOG_NOT_FOUND: &str = "(log file not found)";
pub const LOG_EMPTY: &str = "(empty log)";
pub const NO_PROGRESS_FILE: &str = "(no progress file)";

/// `{work_dir}/.ralph/progress.txt`
pub fn progress_path(work_dir: &Path) -> PathBuf {
    work_dir.join(".ralph").join("progress.txt")
}

/// Return the last `max_lines` lines found in the trailing `max_bytes` of a log.
///
/// If the read starts past byte 0 the first line is dropped, since the byte
/// cut almost always lands mid-line.
///
/// # Errors
///
/// Returns [`RegistryError::Io`] for failures other than the file being
/// absent (permissions, a directory at the path, read errors).
pub fn tail_log(
    log_file: Option<&Path>,
    max_bytes: u64,
    max_lines: usize,
) -> Result<String, RegistryError> {
    let Some(path) = log_file else {
        return Ok(NO_LOG_CONFIGURED.to_string());
    };

    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LOG_NOT_FOUND.to_string()),
        Err(e) => return Err(RegistryError::io(path, e)),
    };

    let metadata = file.metadata().map_err(|e| RegistryError::io(path, e))?;
    if metadata.is_dir() {
        return Err(RegistryError::io(path, ErrorKind::IsADirectory.into()));
    }
    let size = metadata.len();
    if size == 0 {
        return Ok(LOG_EMPTY.to_string());
    }

    let read_size = max_bytes.min(size);
    let offset = size - read_size;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| RegistryError::io(path, e))?;

    let mut buf = Vec::with_capacity(read_size as usize);
    file.take(read_size)
        .read_to_end(&mut buf)
        .map_err(|e| RegistryError::io(path, e))?;

    let content = String::from_utf8_lossy(&buf);
    let skip = usize::from(offset > 0);
    Ok(last_lines(content.lines().skip(skip), max_lines))
}

/// Return the last `max_lines` lines of `{work_dir}/.ralph/progress.txt`.
///
/// The progress file is small and read whole.
///
/// # Errors
///
/// Returns [`RegistryError::Io`] for failures other than the file being
/// absent.
pub fn tail_progress(work_dir: &Path, max_lines: usize) -> Result<String, RegistryError> {
    let path = progress_path(work_dir);
    let data = match std::fs::read(&path) {
        Ok(d) => d,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(NO_PROGRESS_FILE.to_string()),
        Err(e) => return Err(RegistryError::io(path, e)),
    };
    Ok(last_lines(String::from_utf8_lossy(&data).lines(), max_lines))
}

fn last_lines<'a>(lines: impl Iterator<Item = &'a str>, max_lines: usize) -> String {
    let lines: Vec<&str> = lines.collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
