//! `ripple report` command implementation.

use std::path::Path;

use colored::Colorize;
use ripple::{CancellationToken, ImpactRequest};

use super::{Context, parse_changes};

/// Run the report command.
pub fn run(
    context: &Context,
    change_sets: &[String],
    output: Option<&Path>,
) -> Result<(), ripple::Error> {
    let requests: Vec<ImpactRequest> = change_sets
        .iter()
        .map(|set| {
            let ids: Vec<String> = set.split(',').map(str::to_string).collect();
            ImpactRequest::new(parse_changes(&ids))
        })
        .filter(|request| !request.changes.is_empty())
        .collect();

    let ripple = context.open()?;
    let report = ripple.report(&requests, &CancellationToken::new())?;
    let json = report.to_json()?;

    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            eprintln!(
                "{} report to {} ({} entities, {} analyses)",
                "Wrote".green().bold(),
                path.display(),
                report.graph.entities.len(),
                report.analyses.len()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}
