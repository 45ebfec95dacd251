//! Common display utilities for CLI commands.

use colored::Colorize;
use ripple::contracts::{ContractPair, Finding, FindingSeverity, Mismatch};
use ripple::{Diagnostic, ImpactedEntity, MergeError, ScanStats};

const MAX_DISPLAY_ITEMS: usize = 10;

/// Print the outcome of an ingest or rebuild.
pub fn print_scan_stats(stats: &ScanStats) {
    println!(
        "{} {} files, {} entities, {} edges",
        "Merged".green().bold(),
        stats.files_merged,
        stats.entities,
        stats.edges
    );
    println!("{}: {:.2?}", "Duration".dimmed(), stats.duration);

    if stats.files_unchanged > 0 {
        println!("{}: {} files", "Unchanged".dimmed(), stats.files_unchanged);
    }
    if stats.files_unsupported > 0 {
        println!(
            "{}: {} files (no extractor accepts them)",
            "Skipped".yellow(),
            stats.files_unsupported
        );
    }
    if stats.cascaded_edges > 0 {
        println!(
            "{}: {} edges pointing at retracted entities",
            "Unresolved".yellow(),
            stats.cascaded_edges
        );
    }
    if stats.completion.is_partial() {
        println!(
            "{} ({} files not scanned)",
            "Scan was cancelled; results are partial".yellow().bold(),
            stats.files_skipped_cancelled
        );
    }

    print_diagnostics(&stats.diagnostics);
    print_rejections(&stats.rejected);
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    println!();
    println!("{} ({}):", "Diagnostics".red().bold(), diagnostics.len());
    for diagnostic in diagnostics.iter().take(MAX_DISPLAY_ITEMS) {
        let bullet = if diagnostic.is_error() {
            "•".red()
        } else {
            "•".yellow()
        };
        println!("  {bullet} {diagnostic}");
    }
    print_more(diagnostics.len());
}

fn print_rejections(rejected: &[MergeError]) {
    if rejected.is_empty() {
        return;
    }
    println!();
    println!("{} ({}):", "Rejected".red().bold(), rejected.len());
    for error in rejected.iter().take(MAX_DISPLAY_ITEMS) {
        let bullet = if error.violation.is_input_error() {
            "•".red()
        } else {
            "•".yellow()
        };
        println!("  {bullet} {error}");
    }
    print_more(rejected.len());
}

/// Print impacted entities with their distance and the entity they were reached from.
pub fn print_impacted(entities: &[&ImpactedEntity]) {
    if entities.is_empty() {
        println!("    {}", "(nothing impacted)".dimmed());
        return;
    }
    for entity in entities {
        println!(
            "    {} {} {} {}",
            format!("L{}", entity.layer).dimmed(),
            entity.id.as_str().white().bold(),
            format!("[{}]", entity.dimension).cyan(),
            format!("via {}", entity.via).dimmed()
        );
    }
}

/// Print one contract pair and its mismatches.
pub fn print_pair(pair: &ContractPair) {
    let marker = if pair.has_mismatches() {
        "✗".red()
    } else {
        "✓".green()
    };
    println!(
        "  {marker} {} {} {} {}",
        pair.family.to_string().white().bold(),
        pair.frontend,
        "↔".dimmed(),
        pair.backend
    );
    for mismatch in &pair.mismatches {
        print_mismatch(mismatch);
    }
}

fn print_mismatch(mismatch: &Mismatch) {
    let field = mismatch
        .field
        .as_deref()
        .map(|f| format!(" `{f}`"))
        .unwrap_or_default();
    let side = |label: &str, detail: &Option<String>| {
        detail
            .as_deref()
            .map(|d| format!(" {label}: {d}"))
            .unwrap_or_default()
    };
    println!(
        "      {} {}{field}{}{}",
        "•".dimmed(),
        mismatch.kind.as_str().yellow(),
        side("frontend", &mismatch.frontend_detail).dimmed(),
        side("backend", &mismatch.backend_detail).dimmed()
    );
}

/// Print a family-level finding.
pub fn print_finding(finding: &Finding) {
    let severity = match finding.severity {
        FindingSeverity::High => "high".red().bold(),
        FindingSeverity::Low => "low".dimmed(),
    };
    println!("  {} [{severity}] {}", "•".dimmed(), finding.message);
}

fn print_more(total: usize) {
    if total > MAX_DISPLAY_ITEMS {
        println!("  ... and {} more", total - MAX_DISPLAY_ITEMS);
    }
}
