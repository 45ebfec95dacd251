//! Ripple CLI - change-impact analysis from the command line.
//!
//! Ripple ingests extraction documents into a persistent dependency graph
//! and answers impact, consistency and planning queries against it.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod cli;

/// Ripple: multi-dimensional change-impact analysis.
#[derive(Parser)]
#[command(name = "ripple")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Workspace root directory (defaults to current directory)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Configuration file (defaults to .ripple/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge extraction documents (JSON) into the graph
    Ingest {
        /// Extraction documents, relative to the workspace
        #[arg(required = true)]
        docs: Vec<PathBuf>,
    },

    /// Clear the graph and ingest documents from scratch
    Rebuild {
        /// Extraction documents, relative to the workspace
        docs: Vec<PathBuf>,
    },

    /// Analyze what a set of changes reaches
    Impact {
        /// Changed entity ids, optionally suffixed with `:added`, `:removed` or `:modified`
        #[arg(required = true)]
        changes: Vec<String>,

        /// Only follow these dimensions (reference, data_flow, contract, config, consistency)
        #[arg(short, long)]
        dimension: Vec<String>,

        /// Maximum traversal depth
        #[arg(long)]
        depth: Option<usize>,

        /// Edge orientation to follow (both, outgoing, incoming)
        #[arg(short, long, default_value = "both")]
        traversal: String,

        /// Follow derived frontend/backend contract links
        #[arg(long)]
        contract_links: bool,

        /// Also print the change plan
        #[arg(short, long)]
        plan: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Pair frontend and backend contracts and list mismatches
    Check {
        /// Side treated as declared when naming missing/extra fields (frontend, backend)
        #[arg(short, long, default_value = "frontend")]
        perspective: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Write the full versioned report as JSON
    Report {
        /// Change sets to analyze; ids separated by commas
        #[arg(short = 'C', long = "changes")]
        change_sets: Vec<String>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show graph statistics
    Stats,

    /// Print the JSON Schema of the report format
    Schema,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Determine workspace root
    let workspace = match cli.workspace {
        Some(w) => w,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!(
                    "{}: failed to get current directory: {e}",
                    "error".red().bold()
                );
                return ExitCode::FAILURE;
            }
        },
    };
    let context = cli::Context::new(workspace, cli.config);

    let result = match cli.command {
        Commands::Ingest { docs } => cli::ingest::run(&context, &docs),
        Commands::Rebuild { docs } => cli::rebuild::run(&context, &docs),
        Commands::Impact {
            changes,
            dimension,
            depth,
            traversal,
            contract_links,
            plan,
            json,
        } => cli::impact::run(
            &context,
            &cli::impact::Options {
                changes,
                dimensions: dimension,
                depth,
                traversal,
                contract_links,
                plan,
                json,
            },
        ),
        Commands::Check { perspective, json } => cli::check::run(&context, &perspective, json),
        Commands::Report {
            change_sets,
            output,
        } => cli::report::run(&context, &change_sets, output.as_deref()),
        Commands::Stats => cli::stats::run(&context),
        Commands::Schema => cli::schema::run(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            // Show cause chain for nested errors
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("  {}: {cause}", "caused by".dimmed());
                source = std::error::Error::source(cause);
            }
            ExitCode::FAILURE
        }
    }
}
