//! The versioned report document.
//!
//! A report gathers everything one run derived: the graph, contract pairs and
//! findings, impact results with their change plans, and every per-file
//! problem. Downstream tools read it as JSON; [`report_schema`] describes the
//! format and [`REPORT_SCHEMA_VERSION`] changes whenever it does.

use std::path::PathBuf;

use schemars::{JsonSchema, Schema, schema_for};
use serde::{Deserialize, Serialize};

use crate::cancel::Completion;
use crate::contracts::ConsistencyReport;
use crate::error::{MergeError, Result};
use crate::extractor::Diagnostic;
use crate::impact::ImpactResult;
use crate::parallel::{ScanGaps, ScanStats};
use crate::plan::ChangePlan;
use crate::store::{GraphSnapshot, GraphStats};
use crate::types::{Edge, Entity};

/// Version of the report format.
pub const REPORT_SCHEMA_VERSION: u32 = 2;

/// The graph as of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphSection {
    /// Snapshot generation the report was built from
    pub generation: u64,
    /// Summary counts
    pub stats: GraphStats,
    /// Every entity, ordered by id
    pub entities: Vec<Entity>,
    /// Every edge, in canonical order
    pub edges: Vec<Edge>,
}

impl GraphSection {
    fn from_snapshot(snapshot: &GraphSnapshot) -> Self {
        Self {
            generation: snapshot.generation(),
            stats: snapshot.stats(),
            entities: snapshot.entities().cloned().collect(),
            edges: snapshot.edges(),
        }
    }
}

/// One analyzed change set and its plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Analysis {
    /// What the changes reach
    pub impact: ImpactResult,
    /// How to roll them out
    pub plan: ChangePlan,
}

/// The full report document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Report {
    /// Always [`REPORT_SCHEMA_VERSION`] when produced by this build
    pub schema_version: u32,
    /// RFC 3339 creation time
    pub generated_at: String,
    /// Entities and edges
    pub graph: GraphSection,
    /// Contract pairs, mismatches and findings over the whole graph
    pub consistency: ConsistencyReport,
    /// Impact results and change plans, one per requested change set
    pub analyses: Vec<Analysis>,
    /// Per-file extraction problems
    pub diagnostics: Vec<Diagnostic>,
    /// Files left out of the graph because extraction failed
    #[serde(default)]
    pub excluded: Vec<PathBuf>,
    /// Per-file merges that were rejected
    pub rejections: Vec<MergeError>,
    /// `Cancelled` if any part of the run stopped early
    pub completion: Completion,
}

impl Report {
    /// Start a report from a snapshot and its consistency check.
    #[must_use]
    pub fn new(snapshot: &GraphSnapshot, consistency: ConsistencyReport) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            generated_at: chrono::Utc::now().to_rfc3339(),
            graph: GraphSection::from_snapshot(snapshot),
            consistency,
            analyses: Vec::new(),
            diagnostics: Vec::new(),
            excluded: Vec::new(),
            rejections: Vec::new(),
            completion: Completion::Complete,
        }
    }

    /// Include files the graph is missing or holding back.
    #[must_use]
    pub fn with_gaps(mut self, gaps: &ScanGaps) -> Self {
        self.diagnostics.extend(gaps.diagnostics.iter().cloned());
        self.excluded.extend(gaps.excluded.iter().cloned());
        self.rejections.extend(gaps.rejected.iter().cloned());
        self
    }

    /// Include the problems a scan ran into.
    #[must_use]
    pub fn with_scan(mut self, stats: &ScanStats) -> Self {
        self.mark(stats.completion);
        self.with_gaps(&stats.gaps())
    }

    /// Add an analyzed change set.
    #[must_use]
    pub fn with_analysis(mut self, impact: ImpactResult, plan: ChangePlan) -> Self {
        self.mark(impact.completion);
        self.analyses.push(Analysis { impact, plan });
        self
    }

    /// `true` unless some part of the run was cancelled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.completion.is_partial()
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a report previously written by [`Report::to_json`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the document does not match the format.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn mark(&mut self, completion: Completion) {
        if completion.is_partial() {
            self.completion = Completion::Cancelled;
        }
    }
}

/// JSON Schema of [`Report`].
#[must_use]
pub fn report_schema() -> Schema {
    schema_for!(Report)
}
