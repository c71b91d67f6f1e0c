//! Show command implementation

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use ralph_admin_core::Registry;

/// Show every field of one session
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Session id (descriptor file name without `.json`)
    session_id: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the show command
pub fn execute(registry: &Registry, args: ShowArgs) -> Result<()> {
    let record = registry.get_session(&args.session_id)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let now = Utc::now();
    let d = &record.descriptor;

    println!("Session:     {}", record.session_id);
    println!("Project:     {}", or_dash(&d.project));
    println!("Tool:        {}", or_dash(&d.tool));
    let liveness = if record.is_alive {
        "alive"
    } else {
        "not running"
    };
    println!("PID:         {} ({liveness})", d.pid);
    let (shown, declared) = (&record.display_status, &d.status);
    println!("Status:      {shown} (declared {declared})");
    println!("Iteration:   {}", record.iteration_progress());
    println!("Branch:      {}", or_dash(&d.branch));
    println!("Work dir:    {}", d.work_dir.display());
    if let Some(worktree) = record.worktree_dir() {
        println!("Worktree:    {}", worktree.display());
    }
    println!("Task:        {}", or_dash(&d.prd_description));
    let (started, uptime) = (d.started_at.to_rfc3339(), record.format_uptime(now));
    println!("Started:     {started} ({uptime} ago)");
    let (beat, age) = (d.last_heartbeat.to_rfc3339(), record.format_heartbeat(now));
    println!("Heartbeat:   {beat} ({age})");
    match record.log_file() {
        Some(log) => println!("Log:         {}", log.display()),
        None => println!("Log:         -"),
    }
    println!("Progress:    {}", record.progress_path().display());
    for (key, value) in &d.extra {
        println!("{:<12} {value}", format!("{key}:"));
    }

    Ok(())
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}
