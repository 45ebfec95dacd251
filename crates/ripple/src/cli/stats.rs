//! `ripple stats` command implementation.

use colored::Colorize;

use super::Context;

/// Run the stats command.
pub fn run(context: &Context) -> Result<(), ripple::Error> {
    let ripple = context.open()?;

    let db_size_str = match ripple.db_path().map(std::fs::metadata) {
        Some(Ok(meta)) => format_size(meta.len()),
        Some(Err(e)) => match e.kind() {
            std::io::ErrorKind::NotFound => {
                tracing::debug!("Database file not found");
                "not created".to_string()
            }
            _ => {
                tracing::debug!(error = %e, "Failed to get database file size");
                "size unknown".to_string()
            }
        },
        None => "in memory".to_string(),
    };

    let stats = ripple.stats()?;

    println!("{}", "Ripple Graph Statistics".cyan().bold());
    println!();

    if let Some(path) = ripple.db_path() {
        println!(
            "  {}: {} ({})",
            "Database".white().bold(),
            path.display(),
            db_size_str
        );
        println!();
    }

    println!(
        "  {}: {}",
        "Files".white().bold(),
        stats.files.to_string().green()
    );
    println!();

    println!(
        "  {}: {} total",
        "Entities".white().bold(),
        stats.entities.to_string().green()
    );
    // Sort by count descending, then by kind for deterministic output
    let mut kind_counts: Vec<_> = stats.entities_by_kind.into_iter().collect();
    kind_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (kind, count) in kind_counts {
        println!("    {}: {}", kind.as_str().dimmed(), count);
    }
    println!();

    println!(
        "  {}: {} total",
        "Edges".white().bold(),
        stats.edges.to_string().green()
    );
    for (dimension, count) in &stats.edges_by_dimension {
        println!("    {}: {}", dimension.as_str().dimmed(), count);
    }
    if stats.unresolved_edges > 0 {
        println!(
            "    {}: {} (waiting for a retracted entity)",
            "unresolved".yellow(),
            stats.unresolved_edges
        );
    }

    let gaps = ripple.scan_gaps()?;
    if !gaps.excluded.is_empty() || !gaps.rejected.is_empty() {
        println!();
        println!(
            "  {}: {} excluded, {} rejected (see `ripple report`)",
            "Gaps".red().bold(),
            gaps.excluded.len(),
            gaps.rejected.len()
        );
    }

    if stats.cycles > 0 {
        println!();
        println!(
            "  {}: {} dependency cycles",
            "Note".yellow().bold(),
            stats.cycles.to_string().yellow()
        );
    }

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
