//! `ripple rebuild` command implementation.

use std::path::PathBuf;

use colored::Colorize;
use ripple::CancellationToken;

use super::Context;
use super::display::print_scan_stats;

/// Run the rebuild command.
pub fn run(context: &Context, docs: &[PathBuf]) -> Result<(), ripple::Error> {
    println!("{}", "Rebuilding graph from scratch".yellow());

    let ripple = context.open()?;
    let files = context.read_docs(docs)?;
    let stats = ripple.rebuild(&files, &CancellationToken::new())?;

    println!();
    print_scan_stats(&stats);
    Ok(())
}
