//! List command implementation

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use ralph_admin_core::{Registry, Removal, RemovalReason, SessionRecord};

/// List sessions in the registry
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Show what would be removed without deleting anything
    #[arg(long)]
    pub(super) dry_run: bool,
}

/// Execute the list command
pub fn execute(registry: &Registry, args: ListArgs) -> Result<()> {
    let report = if args.dry_run {
        registry.audit()?
    } else {
        registry.list_report()?
    };

    if args.json {
        let output = if args.dry_run {
            serde_json::to_value(&report)?
        } else {
            serde_json::to_value(&report.sessions)?
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if report.sessions.is_empty() {
        println!("No ralph sessions in {}", registry.dir().display());
    } else {
        print_table(&report.sessions);
    }

    if args.dry_run {
        println!();
        if report.removals.is_empty() {
            println!("DRY RUN - nothing would be removed");
        } else {
            println!("DRY RUN - would remove:");
            for removal in &report.removals {
                println!("  {}", describe_removal(removal));
            }
        }
    }

    Ok(())
}

fn print_table(sessions: &[SessionRecord]) {
    let now = Utc::now();
    println!(
        "{:<28} {:<18} {:<24} {:<8} {:>7} {:<12} {:>12} {:>8}",
        "Session", "Project", "Branch", "Tool", "Iter", "Status", "Heartbeat", "Uptime"
    );
    println!("{}", "─".repeat(124));

    for s in sessions {
        let d = &s.descriptor;
        println!(
            "{:<28} {:<18} {:<24} {:<8} {:>7} {:<12} {:>12} {:>8}",
            truncate(&s.session_id, 28),
            truncate(&d.project, 18),
            truncate(&d.branch, 24),
            truncate(&d.tool, 8),
            s.iteration_progress(),
            s.display_status.as_str(),
            s.format_heartbeat(now),
            s.format_uptime(now),
        );
    }
}

fn describe_removal(removal: &Removal) -> String {
    let why = match &removal.reason {
        RemovalReason::Corrupt { detail } => format!("corrupt ({detail})"),
        RemovalReason::Expired => "expired".to_string(),
        RemovalReason::Duplicate { winner } => format!("duplicate of {winner}"),
    };
    format!("{:<28} {why}", removal.session_id)
}

/// Shorten to `max` characters, marking the cut with `…`.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}
