//! Log and progress tail commands

use anyhow::Result;
use clap::Args;
use ralph_admin_core::{Registry, tail};

/// Print the tail of a session's live log
#[derive(Args, Debug)]
pub struct LogArgs {
    /// Session id (descriptor file name without `.json`)
    session_id: String,

    /// Number of lines to show (default from config)
    #[arg(short = 'n', long)]
    lines: Option<usize>,

    /// Maximum number of trailing bytes to read (default from config)
    #[arg(long)]
    bytes: Option<u64>,
}

/// Print the tail of a session's progress notes
#[derive(Args, Debug)]
pub struct ProgressArgs {
    /// Session id (descriptor file name without `.json`)
    session_id: String,

    /// Number of lines to show (default from config)
    #[arg(short = 'n', long)]
    lines: Option<usize>,
}

pub fn log(registry: &Registry, args: LogArgs) -> Result<()> {
    let record = registry.get_session(&args.session_id)?;
    let config = registry.config();
    let text = tail::tail_log(
        record.log_file(),
        args.bytes.unwrap_or(config.log_tail_bytes),
        args.lines.unwrap_or(config.log_tail_lines),
    )?;
    println!("{text}");
    Ok(())
}

pub fn progress(registry: &Registry, args: ProgressArgs) -> Result<()> {
    let record = registry.get_session(&args.session_id)?;
    let text = match args.lines {
        Some(n) => tail::tail_progress(&record.descriptor.work_dir, n)?,
        None => registry.tail_progress(&record)?,
    };
    println!("{text}");
    Ok(())
}
