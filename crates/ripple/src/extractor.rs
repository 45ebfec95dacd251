//! Extractor adapters.
//!
//! Ripple never parses source itself. Each language or framework plugs in an
//! implementation of [`Extractor`], which turns one file's content into
//! entities, edges and diagnostics. Implementations are interchangeable
//! variants of the same contract.
//!
//! ## Contract
//!
//! - `extract` is pure: the same content and path always give the same output.
//! - It never panics across the boundary. Problems are reported as
//!   [`Diagnostic`]s; a file with an error-severity diagnostic is excluded from
//!   the merge and its previous contribution is kept.
//! - Edges may point at entities declared by other files.
//!
//! ## Adding an Extractor
//!
//! 1. Implement [`Extractor`] (declare its [`AdapterRole`]s and `accepts`)
//! 2. Register it with [`crate::Ripple::register_extractor`]

use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{Edge, Entity};

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The file could not be extracted; its contribution is not merged
    Error,
    /// Something was skipped, the rest of the file is fine
    Warning,
}

/// A per-file extraction problem. Never fatal to a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Diagnostic {
    /// File the diagnostic belongs to (filled in from the scanned path when omitted)
    #[serde(default)]
    pub path: PathBuf,
    /// Error or warning
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Line number, when known (1-indexed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Diagnostic {
    /// An error diagnostic: the file will not be merged.
    #[must_use]
    pub fn error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            severity: Severity::Error,
            message: message.into(),
            line: None,
        }
    }

    /// A warning diagnostic.
    #[must_use]
    pub fn warning(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            severity: Severity::Warning,
            message: message.into(),
            line: None,
        }
    }

    /// Attach a line number.
    #[must_use]
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// `true` for error severity.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.line {
            Some(line) => write!(f, "{}:{line}: {level}: {}", self.path.display(), self.message),
            None => write!(f, "{}: {level}: {}", self.path.display(), self.message),
        }
    }
}

/// Everything one extractor found in one file.
///
/// This is also the interchange document read by [`JsonExtractor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Extraction {
    /// Declared entities
    pub entities: Vec<Entity>,
    /// Relations, possibly pointing into other files
    pub edges: Vec<Edge>,
    /// Problems encountered
    pub diagnostics: Vec<Diagnostic>,
}

impl Extraction {
    /// An extraction that only reports a problem.
    #[must_use]
    pub fn failed(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: vec![diagnostic],
            ..Self::default()
        }
    }

    /// `true` if any diagnostic is an error.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Append another extractor's output for the same file.
    pub fn absorb(&mut self, other: Extraction) {
        self.entities.extend(other.entities);
        self.edges.extend(other.edges);
        self.diagnostics.extend(other.diagnostics);
    }
}

/// The dependency dimension an extractor contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdapterRole {
    /// Symbol references (calls, imports, type uses)
    Reference,
    /// Data flowing into sinks
    DataFlow,
    /// Route and shared-type declarations
    Contract,
    /// Configuration key reads
    Config,
    /// Test-to-code links
    Test,
}

/// A pluggable source extractor.
///
/// Implementations must be thread-safe: files are extracted in parallel.
pub trait Extractor: Send + Sync {
    /// Short name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// The dimensions this extractor contributes.
    fn roles(&self) -> &[AdapterRole];

    /// Whether this extractor handles `path`.
    fn accepts(&self, _path: &Path) -> bool {
        true
    }

    /// Extract entities and edges from one file.
    fn extract(&self, content: &str, path: &Path) -> Extraction;
}

/// Reads pre-extracted `Extraction` documents serialized as JSON.
///
/// Lets any out-of-process extractor feed the engine, and is what the CLI
/// `ingest` command uses.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExtractor;

const JSON_ROLES: [AdapterRole; 5] = [
    AdapterRole::Reference,
    AdapterRole::DataFlow,
    AdapterRole::Contract,
    AdapterRole::Config,
    AdapterRole::Test,
];

impl Extractor for JsonExtractor {
    fn name(&self) -> &str {
        "json"
    }

    fn roles(&self) -> &[AdapterRole] {
        &JSON_ROLES
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "json")
    }

    fn extract(&self, content: &str, path: &Path) -> Extraction {
        match serde_json::from_str::<Extraction>(content) {
            Ok(mut extraction) => {
                for diagnostic in &mut extraction.diagnostics {
                    if diagnostic.path.as_os_str().is_empty() {
                        diagnostic.path = path.to_path_buf();
                    }
                }
                extraction
            }
            Err(e) => {
                let line = u32::try_from(e.line()).ok().filter(|l| *l > 0);
                let mut diagnostic =
                    Diagnostic::error(path, format!("malformed extraction document: {e}"));
                diagnostic.line = line;
                Extraction::failed(diagnostic)
            }
        }
    }
}
