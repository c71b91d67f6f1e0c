//! Lifecycle commands: stop, pause, resume, toggle

use anyhow::Result;
use clap::Args;
use ralph_admin_core::{DeclaredStatus, Registry, SessionRecord, StopOutcome};

/// Target of a lifecycle command
#[derive(Args, Debug)]
pub struct ControlArgs {
    /// Session id (descriptor file name without `.json`)
    session_id: String,
}

/// Send SIGTERM; a worker that is already gone is marked dead instead
pub fn stop(registry: &Registry, args: ControlArgs) -> Result<()> {
    let mut record = registry.get_session(&args.session_id)?;
    match registry.stop(&mut record)? {
        StopOutcome::Signalled => println!("Sent SIGTERM to {}", describe(&record)),
        StopOutcome::MarkedDead => {
            println!("{} was not running; marked dead", describe(&record));
        }
    }
    Ok(())
}

pub fn pause(registry: &Registry, args: ControlArgs) -> Result<()> {
    let mut record = registry.get_session(&args.session_id)?;
    registry.pause(&mut record)?;
    println!("Paused {}", describe(&record));
    Ok(())
}

pub fn resume(registry: &Registry, args: ControlArgs) -> Result<()> {
    let mut record = registry.get_session(&args.session_id)?;
    registry.resume(&mut record)?;
    println!("Resumed {}", describe(&record));
    Ok(())
}

pub fn toggle(registry: &Registry, args: ControlArgs) -> Result<()> {
    let mut record = registry.get_session(&args.session_id)?;
    let verb = match registry.toggle_pause(&mut record)? {
        DeclaredStatus::Paused => "Paused",
        _ => "Resumed",
    };
    println!("{verb} {}", describe(&record));
    Ok(())
}

/// `"billing-api (PID 48213)"`, falling back to the session id when the
/// descriptor names no project.
fn describe(record: &SessionRecord) -> String {
    let name = if record.descriptor.project.is_empty() {
        &record.session_id
    } else {
        &record.descriptor.project
    };
    format!("{name} (PID {})", record.pid())
}
