//! Error types for Ripple operations.
//!
//! Errors are split by blast radius:
//!
//! - **`Error`**: Top-level errors that halt an operation (storage failures,
//!   malformed configuration).
//! - **`ModelViolation`**: A single file's contribution broke a graph invariant.
//!   The file is rejected as a whole; the rest of the scan proceeds.
//! - **`MergeError`**: A `ModelViolation` tagged with the file it came from,
//!   collected into scan statistics and reports.
//!
//! ## Error Philosophy
//!
//! Analysis is best effort. One broken file never poisons the shared graph,
//! and per-file failures are values that end up in the report. Only
//! configuration and storage problems are returned as `Err`.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::EntityId;

/// Result type for Ripple operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Ripple operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Persistent graph storage failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration or arguments
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant broken (poisoned lock, corrupted row)
    #[error("internal error: {0}")]
    Internal(String),
}

/// A graph invariant broken by one file's contribution.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelViolation {
    /// An entity id was already declared with a different `(kind, language)`.
    #[error("duplicate entity id `{id}`: declared as {existing}, redeclared as {incoming}")]
    DuplicateId {
        /// The colliding id
        id: EntityId,
        /// `kind/language` of the entity already holding the id
        existing: String,
        /// `kind/language` of the rejected declaration
        incoming: String,
    },

    /// An edge endpoint does not exist in the graph.
    #[error("dangling edge `{from}` -> `{to}`: `{missing}` is not in the graph")]
    DanglingEdge {
        /// Edge source
        from: EntityId,
        /// Edge target
        to: EntityId,
        /// The endpoint that could not be found
        missing: EntityId,
    },

    /// An edge failed field validation (confidence range, exact references).
    #[error("invalid edge `{from}` -> `{to}`: {reason}")]
    InvalidEdge {
        /// Edge source
        from: EntityId,
        /// Edge target
        to: EntityId,
        /// What was wrong
        reason: String,
    },

    /// An entity failed field validation.
    #[error("invalid entity `{id}`: {reason}")]
    InvalidEntity {
        /// The offending entity
        id: EntityId,
        /// What was wrong
        reason: String,
    },

    /// A merge arrived with a scan version that is not newer than the committed one.
    #[error("stale scan: version {attempted} is not newer than committed version {committed}")]
    StaleScanVersion {
        /// Version currently in the graph
        committed: u64,
        /// Version of the rejected merge
        attempted: u64,
    },
}

impl ModelViolation {
    /// Returns `true` if the violation comes from the extracted input itself.
    ///
    /// Stale versions are a scheduling problem, not an input problem.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::StaleScanVersion { .. })
    }
}

/// A rejected per-file merge.
///
/// Collected during scans and surfaced in reports; never returned as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MergeError {
    /// File whose contribution was rejected
    pub path: PathBuf,
    /// The invariant it broke
    pub violation: ModelViolation,
}

impl MergeError {
    /// Create a new merge error.
    #[must_use]
    pub fn new(path: PathBuf, violation: ModelViolation) -> Self {
        Self { path, violation }
    }
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.violation)
    }
}

impl std::error::Error for MergeError {}
