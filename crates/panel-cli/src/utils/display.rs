use colored::*;
use panel_sync::{SnapshotStats, Summary};

pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn info(message: &str) {
    println!("{} {}", "•".cyan(), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "!".yellow(), message.yellow());
}

/// Byte count for humans. Negative values mean no limit.
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes < 0 {
        return "unlimited".to_string();
    }
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn print_summary(title: &str, summary: &Summary) {
    println!();
    println!("{}", title.cyan().bold());
    println!("{}", "=".repeat(title.chars().count()).cyan());
    println!("  Created: {}", summary.created.to_string().green());
    println!("  Updated: {}", summary.updated.to_string().blue());
    let failed = summary.failed.to_string();
    println!(
        "  Failed:  {}",
        if summary.failed > 0 { failed.red() } else { failed.normal() }
    );
    println!("  Total:   {}", summary.total);

    for outcome in summary.failures() {
        if let panel_sync::RecordState::Failed { error } = &outcome.state {
            println!("    {} #{} {}: {}", "✗".red(), outcome.index + 1, outcome.username, error);
        }
    }
}

pub fn print_stats(stats: &SnapshotStats) {
    println!();
    println!("{}", "Traffic Statistics".cyan().bold());
    println!("{}", "==================".cyan());
    println!("  Accounts:  {} ({} active)", stats.total, stats.active);
    println!("  Used:      {}", format_bytes(stats.total_used));
    println!("  Limit:     {}", format_bytes(stats.total_limit));
    println!("  Remaining: {}", format_bytes(stats.total_remaining));
    if stats.total_limit > 0 {
        println!("  Usage:     {:.1}%", stats.usage_percent);
    }
    if !stats.top_consumers.is_empty() {
        println!("\n  Top consumers:");
        for (name, used) in &stats.top_consumers {
            println!("    {:<24} {}", name, format_bytes(*used));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
        assert_eq!(format_bytes(-1), "unlimited");
    }
}
