//! `ripple ingest` command implementation.

use std::path::PathBuf;

use colored::Colorize;
use ripple::CancellationToken;

use super::Context;
use super::display::print_scan_stats;

/// Run the ingest command.
pub fn run(context: &Context, docs: &[PathBuf]) -> Result<(), ripple::Error> {
    println!(
        "{} {} documents into {}...",
        "Ingesting".cyan().bold(),
        docs.len(),
        context.workspace().display()
    );

    let ripple = context.open()?;
    let files = context.read_docs(docs)?;
    let stats = ripple.scan(&files, &CancellationToken::new())?;

    println!();
    print_scan_stats(&stats);
    Ok(())
}
