//! CLI command implementations.

mod display;

pub mod check;
pub mod impact;
pub mod ingest;
pub mod rebuild;
pub mod report;
pub mod schema;
pub mod stats;

use std::path::{Path, PathBuf};

use ripple::{AnalysisConfig, Change, Dimension, Ripple, SourceFile};

/// Workspace and configuration shared by every command.
pub struct Context {
    workspace: PathBuf,
    config: Option<PathBuf>,
}

impl Context {
    pub fn new(workspace: PathBuf, config: Option<PathBuf>) -> Self {
        Self { workspace, config }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Open the workspace, honoring `--config`.
    pub fn open(&self) -> Result<Ripple, ripple::Error> {
        match &self.config {
            Some(path) => {
                let config = AnalysisConfig::load(path)?;
                Ripple::open_with_config(&self.workspace, config)
            }
            None => Ripple::open(&self.workspace),
        }
    }

    /// Read extraction documents given relative to the workspace (or absolute).
    pub fn read_docs(&self, docs: &[PathBuf]) -> Result<Vec<SourceFile>, ripple::Error> {
        docs.iter()
            .map(|doc| {
                let relative = doc.strip_prefix(&self.workspace).unwrap_or(doc);
                SourceFile::read(&self.workspace, relative)
            })
            .collect()
    }
}

/// Parse `id[:kind]` arguments.
pub fn parse_changes(args: &[String]) -> Vec<Change> {
    args.iter()
        .map(|arg| arg.trim())
        .filter(|arg| !arg.is_empty())
        .map(Change::parse)
        .collect()
}

/// Parse dimension names, rejecting unknown ones.
pub fn parse_dimensions(args: &[String]) -> Result<Vec<Dimension>, ripple::Error> {
    args.iter()
        .map(|arg| {
            Dimension::parse(&arg.to_ascii_lowercase())
                .ok_or_else(|| ripple::Error::Config(format!("unknown dimension `{arg}`")))
        })
        .collect()
}
