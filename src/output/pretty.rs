use chrono::Utc;
use colored::Colorize;

use crate::queue::{DrainOutcome, DrainReport, EntryStatus, QueueEntry, QueueStats};

/// Format queue counts as a status panel
pub fn format_stats_pretty(stats: &QueueStats) -> String {
    let mut lines = Vec::new();

    lines.push("Sync Queue Status".bold().to_string());
    lines.push("─".repeat(40));

    lines.push(format!(
        "  Pending:       {} {}",
        stats.pending,
        if stats.pending > 0 {
            "entries waiting".dimmed()
        } else {
            "".dimmed()
        }
    ));
    lines.push(format!("  Syncing:       {}", stats.syncing));
    lines.push(format!(
        "  Failed:        {} {}",
        stats.failed,
        if stats.failed > 0 {
            "will retry".yellow()
        } else {
            "".normal()
        }
    ));
    lines.push(format!(
        "  Dead-lettered: {} {}",
        stats.dead_letters,
        if stats.dead_letters > 0 {
            "entries need attention".red()
        } else {
            "".normal()
        }
    ));

    if let Some(oldest) = stats.oldest_pending {
        lines.push(format!("  Oldest:        {}", format_age(oldest).dimmed()));
    }

    if stats.dead_letters > 0 {
        lines.push(String::new());
        lines.push(
            "Run 'estate-sync clear-failed' to discard dead-lettered entries"
                .dimmed()
                .to_string(),
        );
    } else if stats.pending + stats.failed > 0 {
        lines.push(String::new());
        lines.push(
            "Run 'estate-sync run' to replay pending entries"
                .dimmed()
                .to_string(),
        );
    }

    lines.join("\n")
}

/// Format queue entries as a table
pub fn format_entries_pretty(entries: &[QueueEntry], title: &str, max_retries: u32) -> String {
    if entries.is_empty() {
        return format!("{title} (0 entries)\n  No entries");
    }

    let mut lines = Vec::new();
    lines.push(format!("{} ({} entries)", title.bold(), entries.len()));
    lines.push("─".repeat(72));
    lines.push(format!(
        "{:<10} {:<7} {:<11} {:<14} {:<17} {}",
        "ID", "Op", "Collection", "Record", "Enqueued", "Status"
    ));
    lines.push("─".repeat(72));

    for entry in entries {
        let short_id: String = entry.id.chars().take(8).collect();
        let enqueued = entry
            .enqueued_at_utc()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();

        lines.push(format!(
            "{:<10} {:<7} {:<11} {:<14} {:<17} {}",
            short_id,
            entry.operation.as_str(),
            entry.collection.as_str(),
            truncate(&entry.record_id, 14),
            enqueued,
            status_badge(entry, max_retries)
        ));

        if let Some(error) = &entry.error_message {
            lines.push(format!("           {}", truncate(error, 60).red()));
        }
    }

    lines.join("\n")
}

/// Format a drain outcome as a summary
pub fn format_outcome_pretty(outcome: &DrainOutcome) -> String {
    match outcome {
        DrainOutcome::Completed(report)
            if report.total() == 0 && report.dead_lettered.is_empty() =>
        {
            "No pending entries to sync.".to_string()
        }
        DrainOutcome::Completed(report) => format_report(report),
        DrainOutcome::AlreadyRunning => "A drain is already running.".yellow().to_string(),
        DrainOutcome::Offline => "Offline; queue left untouched.".yellow().to_string(),
    }
}

fn format_report(report: &DrainReport) -> String {
    let mut lines = Vec::new();

    let header = format!("Sync completed: {} entries", report.total());
    if report.all_succeeded() {
        lines.push(header.green().to_string());
    } else {
        lines.push(header.yellow().to_string());
    }
    lines.push("─".repeat(40));

    if report.success > 0 {
        lines.push(format!(
            "  {} {}",
            "✓".green(),
            format!("{} succeeded", report.success).green()
        ));
    }

    if report.failed > 0 {
        lines.push(format!(
            "  {} {}",
            "✗".red(),
            format!("{} failed", report.failed).red()
        ));
    }

    if !report.dead_lettered.is_empty() {
        lines.push(String::new());
        lines.push("Dead-lettered:".to_string());
        for id in &report.dead_lettered {
            lines.push(format!("  {}", id.red()));
        }
    }

    lines.join("\n")
}

fn status_badge(entry: &QueueEntry, max_retries: u32) -> String {
    if entry.is_dead_letter(max_retries) {
        return format!("☠ dead ({})", entry.retry_count).red().bold().to_string();
    }
    match entry.status {
        EntryStatus::Pending => "⏳ pending".to_string(),
        EntryStatus::Syncing => "▶ syncing".cyan().to_string(),
        EntryStatus::Completed => "✓ completed".green().to_string(),
        EntryStatus::Failed => format!("✗ failed ({})", entry.retry_count)
            .yellow()
            .to_string(),
    }
}

fn format_age(time: chrono::DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(time);
    if age.num_hours() > 0 {
        format!("{} hours ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{} minutes ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        s.to_string()
    }
}
