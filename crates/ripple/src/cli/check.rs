//! `ripple check` command implementation.

use colored::Colorize;
use ripple::Perspective;

use super::Context;
use super::display::{print_finding, print_pair};

/// Run the check command.
pub fn run(context: &Context, perspective: &str, json: bool) -> Result<(), ripple::Error> {
    let perspective = match perspective.to_ascii_lowercase().as_str() {
        "frontend" | "fe" => Perspective::Frontend,
        "backend" | "be" => Perspective::Backend,
        other => {
            return Err(ripple::Error::Config(format!(
                "unknown perspective `{other}` (expected frontend or backend)"
            )));
        }
    };

    let ripple = context.open()?;
    let report = ripple.check_consistency(perspective)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Contract Consistency".cyan().bold());
    println!();

    if report.pairs.is_empty() {
        println!("  {}", "(no contract pairs)".dimmed());
    }
    for pair in &report.pairs {
        print_pair(pair);
    }

    if !report.findings.is_empty() {
        println!();
        println!(
            "{} ({}):",
            "Findings".yellow().bold(),
            report.findings.len()
        );
        for finding in &report.findings {
            print_finding(finding);
        }
    }

    let mismatched = report.pairs.iter().filter(|p| p.has_mismatches()).count();
    println!();
    println!(
        "{}: {} pairs, {} with mismatches",
        "Total".white().bold(),
        report.pairs.len().to_string().green(),
        mismatched.to_string().red()
    );
    Ok(())
}
