//! Run history for `catsync runs`.
//!
//! Prints the most recent sync runs for the configured source, newest
//! first, with counters and the first error line of anything that did not
//! succeed cleanly.

use anyhow::Result;
use chrono::{DateTime, Utc};

use catalog_sync_core::run::{RunStatus, SyncRun};
use catalog_sync_core::store::RunLog;

pub async fn run_history(runs: &dyn RunLog, source: &str, limit: i64, json: bool) -> Result<()> {
    let recent = runs.recent_runs(source, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recent)?);
        return Ok(());
    }

    if recent.is_empty() {
        println!("No sync runs recorded for source '{}'.", source);
        return Ok(());
    }

    println!(
        "  {:>5}  {:<12} {:<8} {:>8} {:>8} {:>8} {:>9} {:>7}  {}",
        "ID", "KIND", "STATUS", "PROCESSED", "CREATED", "UPDATED", "UNCHANGED", "FAILED", "STARTED"
    );
    println!("  {}", "-".repeat(96));
    for run in &recent {
        print_row(run);
    }
    println!();
    Ok(())
}

fn print_row(run: &SyncRun) {
    println!(
        "  {:>5}  {:<12} {:<8} {:>8} {:>8} {:>8} {:>9} {:>7}  {}{}",
        run.id,
        run.kind.as_str(),
        run.status.as_str(),
        run.records_processed,
        run.records_created,
        run.records_updated,
        run.records_unchanged,
        run.records_failed,
        format_relative(run.started_at, Utc::now()),
        run.duration_seconds
            .map(|d| format!(" ({:.1}s)", d))
            .unwrap_or_default(),
    );
    if run.status != RunStatus::Success {
        if let Some(first) = run.error_summary.first() {
            println!("         ↳ {}", first);
        }
    }
}

/// "3 hours ago" for recent timestamps, an absolute date otherwise.
fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        format_absolute(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_absolute(ts)
    }
}

fn format_absolute(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}
