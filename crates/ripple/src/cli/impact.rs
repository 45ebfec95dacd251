//! `ripple impact` command implementation.

use colored::Colorize;
use ripple::{CancellationToken, ChangePlan, ImpactRequest, ImpactResult, Traversal};

use super::display::{print_impacted, print_pair};
use super::{Context, parse_changes, parse_dimensions};

/// Arguments of the impact command.
pub struct Options {
    pub changes: Vec<String>,
    pub dimensions: Vec<String>,
    pub depth: Option<usize>,
    pub traversal: String,
    pub contract_links: bool,
    pub plan: bool,
    pub json: bool,
}

/// Run the impact command.
pub fn run(context: &Context, options: &Options) -> Result<(), ripple::Error> {
    let traversal = Traversal::parse(&options.traversal).ok_or_else(|| {
        ripple::Error::Config(format!("unknown traversal `{}`", options.traversal))
    })?;

    let mut request = ImpactRequest::new(parse_changes(&options.changes))
        .with_traversal(traversal)
        .with_contract_links(options.contract_links);
    if !options.dimensions.is_empty() {
        request = request.with_dimensions(parse_dimensions(&options.dimensions)?);
    }
    if let Some(depth) = options.depth {
        request = request.with_max_depth(depth);
    }

    let ripple = context.open()?;
    let impact = ripple.analyze_impact(&request, &CancellationToken::new())?;
    let plan = if options.plan {
        Some(ripple.plan(&impact)?)
    } else {
        None
    };

    if options.json {
        let value = serde_json::json!({ "impact": impact, "plan": plan });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    print_impact(&impact);
    if let Some(plan) = &plan {
        println!();
        print_plan(plan);
    }
    Ok(())
}

fn print_impact(impact: &ImpactResult) {
    let names: Vec<String> = impact
        .changes
        .iter()
        .map(|change| change.id.to_string())
        .collect();
    println!("Impact analysis for {}:", names.join(", ").cyan().bold());

    for id in &impact.unknown {
        println!(
            "  {}: {} is not in the graph",
            "warning".yellow(),
            id.as_str().bold()
        );
    }
    println!();

    if impact.by_dimension.is_empty() {
        println!("  {}", "(nothing impacted)".dimmed());
    }
    for (dimension, entities) in &impact.by_dimension {
        println!(
            "  {} ({}):",
            dimension.to_string().white().bold(),
            entities.len()
        );
        let refs: Vec<_> = entities.iter().collect();
        print_impacted(&refs);
    }

    println!();
    println!(
        "{}: {} entities, deepest layer {}",
        "Total".white().bold(),
        impact.impacted_count().to_string().green(),
        impact.max_layer
    );
    if impact.completion.is_partial() {
        println!("{}", "Analysis was cancelled; results are partial".yellow().bold());
    }
}

fn print_plan(plan: &ChangePlan) {
    println!(
        "{}: {}",
        "Strategy".white().bold(),
        plan.strategy.as_str().cyan().bold()
    );
    println!("  {}", plan.rationale.reason.dimmed());
    println!(
        "  {}",
        format!(
            "{} impacted (limit {}), {}/{} pairs mismatched (limit {:.0}%)",
            plan.rationale.impacted,
            plan.rationale.max_impacted_entities,
            plan.rationale.mismatched_pairs,
            plan.rationale.pairs,
            plan.rationale.pervasive_mismatch_fraction * 100.0
        )
        .dimmed()
    );

    for stage in plan.stages() {
        println!();
        println!("  {}:", stage.as_str().white().bold());
        for (n, step) in plan.stage(stage).enumerate() {
            println!(
                "    {}. {} {}",
                n + 1,
                step.id,
                format!("[{}, via {}]", step.dimension, step.via).dimmed()
            );
        }
    }

    if !plan.consistency.pairs.is_empty() {
        println!();
        println!("  {}:", "Contracts".white().bold());
        for pair in &plan.consistency.pairs {
            print_pair(pair);
        }
    }
}
