//! Parallel extraction.
//!
//! Extraction is the only CPU-heavy stage of a scan and every file is
//! independent, so files are handed to rayon one per task:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Ripple::scan                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Phase 1 (Parallel):    rayon::par_iter() extraction         │
//! │  Phase 2 (Sequential):  GraphStore::merge_batch (one writer) │
//! │  Phase 3 (Sequential):  GraphDatabase::apply (one tx)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Workers share nothing mutable. Each one checks the cancellation token
//! before starting its file, fingerprints the content, and skips files whose
//! fingerprint matches the committed contribution.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{error, trace, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::cancel::{CancellationToken, Completion};
use crate::error::{MergeError, Result};
use crate::extractor::{Diagnostic, Extraction, Extractor};
use crate::store::GraphSnapshot;

/// A file's content, already read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Full text
    pub content: String,
}

impl SourceFile {
    /// Wrap content that is already in memory.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Read `relative` under `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read as UTF-8.
    pub fn read(root: &Path, relative: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(root.join(relative))?;
        Ok(Self::new(relative, content))
    }

    /// xxh3 fingerprint of the content.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        xxh3_64(self.content.as_bytes())
    }
}

/// Statistics from a scan.
///
/// Returned by [`crate::Ripple::scan`]. Per-file problems are collected here
/// rather than returned as errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    /// Files an extractor ran on
    pub files_scanned: usize,
    /// Files skipped because their content fingerprint was unchanged
    pub files_unchanged: usize,
    /// Files no registered extractor accepts
    pub files_unsupported: usize,
    /// Files never started because the scan was cancelled
    pub files_skipped_cancelled: usize,
    /// Files whose new contribution was committed
    pub files_merged: usize,
    /// Entities in the committed contributions
    pub entities: usize,
    /// Edges in the committed contributions
    pub edges: usize,
    /// Every diagnostic reported by an extractor
    pub diagnostics: Vec<Diagnostic>,
    /// Files left out of the merge because of error diagnostics
    pub excluded: Vec<PathBuf>,
    /// Files whose merge broke a graph invariant
    pub rejected: Vec<MergeError>,
    /// Edges of other files removed by cascade
    pub cascaded_edges: usize,
    /// Fix-point passes the merge needed
    pub passes: usize,
    /// How long the scan took
    pub duration: Duration,
    /// `Cancelled` if some files were never extracted
    pub completion: Completion,
}

impl ScanStats {
    /// `true` if nothing was excluded or rejected and the scan finished.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.excluded.is_empty() && self.rejected.is_empty() && !self.completion.is_partial()
    }

    /// The problems of this scan alone.
    #[must_use]
    pub fn gaps(&self) -> ScanGaps {
        ScanGaps {
            diagnostics: self.diagnostics.clone(),
            excluded: self.excluded.clone(),
            rejected: self.rejected.clone(),
        }
    }
}

/// Problems the most recent scan of one file ran into.
///
/// Kept until the file is scanned cleanly, retracted, or the graph rebuilt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileGaps {
    /// Diagnostics reported for the file
    pub diagnostics: Vec<Diagnostic>,
    /// Left out of the merge because of error diagnostics
    pub excluded: bool,
    /// Why the merge of the file was rejected
    pub rejection: Option<MergeError>,
}

impl FileGaps {
    /// `true` if there is nothing to report.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty() && !self.excluded && self.rejection.is_none()
    }
}

/// Every file the graph is missing or holding back, in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScanGaps {
    /// Extraction problems
    pub diagnostics: Vec<Diagnostic>,
    /// Files whose contribution is stale or missing because extraction failed
    pub excluded: Vec<PathBuf>,
    /// Files whose merge broke a graph invariant
    pub rejected: Vec<MergeError>,
}

impl ScanGaps {
    /// Flatten per-file gaps.
    pub fn collect<'a>(files: impl IntoIterator<Item = (&'a PathBuf, &'a FileGaps)>) -> Self {
        let mut gaps = Self::default();
        for (path, file) in files {
            gaps.diagnostics.extend(file.diagnostics.iter().cloned());
            if file.excluded {
                gaps.excluded.push(path.clone());
            }
            gaps.rejected.extend(file.rejection.iter().cloned());
        }
        gaps
    }

    /// `true` if the graph reflects every scanned file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty() && self.excluded.is_empty() && self.rejected.is_empty()
    }
}

/// What happened to one file during extraction.
#[derive(Debug)]
pub(crate) enum FileOutcome {
    /// Content fingerprint matches the committed contribution
    Unchanged(PathBuf),
    /// No registered extractor accepts the file
    Unsupported(PathBuf),
    /// Extraction ran
    Extracted {
        path: PathBuf,
        content_hash: u64,
        extraction: Extraction,
    },
}

/// Run every accepting extractor over every file.
///
/// Outcomes are returned in input order. Files not started before
/// cancellation are left out and counted.
pub(crate) fn extract_all(
    files: &[SourceFile],
    extractors: &[Arc<dyn Extractor>],
    committed: &GraphSnapshot,
    force: bool,
    cancel: &CancellationToken,
) -> (Vec<FileOutcome>, usize) {
    let outcomes: Vec<Option<FileOutcome>> = files
        .par_iter()
        .map(|file| {
            if cancel.is_cancelled() {
                return None;
            }
            Some(extract_one(file, extractors, committed, force))
        })
        .collect();

    let total = outcomes.len();
    let outcomes: Vec<FileOutcome> = outcomes.into_iter().flatten().collect();
    let skipped = total - outcomes.len();
    if skipped > 0 {
        warn!(skipped, extracted = outcomes.len(), "Scan cancelled");
    }
    (outcomes, skipped)
}

fn extract_one(
    file: &SourceFile,
    extractors: &[Arc<dyn Extractor>],
    committed: &GraphSnapshot,
    force: bool,
) -> FileOutcome {
    let content_hash = file.content_hash();
    let unchanged = committed
        .file(&file.path)
        .and_then(|contribution| contribution.content_hash)
        == Some(content_hash);
    if unchanged && !force {
        trace!(file = %file.path.display(), "Content unchanged, skipping");
        return FileOutcome::Unchanged(file.path.clone());
    }

    let mut accepted = extractors
        .iter()
        .filter(|extractor| extractor.accepts(&file.path))
        .peekable();
    if accepted.peek().is_none() {
        return FileOutcome::Unsupported(file.path.clone());
    }

    let mut extraction = Extraction::default();
    for extractor in accepted {
        extraction.absorb(run_extractor(extractor.as_ref(), file));
    }
    trace!(
        file = %file.path.display(),
        entities = extraction.entities.len(),
        edges = extraction.edges.len(),
        diagnostics = extraction.diagnostics.len(),
        "Extracted file"
    );
    FileOutcome::Extracted {
        path: file.path.clone(),
        content_hash,
        extraction,
    }
}

/// Run one extractor, turning a panic into an error diagnostic.
fn run_extractor(extractor: &dyn Extractor, file: &SourceFile) -> Extraction {
    match catch_unwind(AssertUnwindSafe(|| {
        extractor.extract(&file.content, &file.path)
    })) {
        Ok(extraction) => extraction,
        Err(panic_payload) => {
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                format!("extractor `{}` panicked: {s}", extractor.name())
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                format!("extractor `{}` panicked: {s}", extractor.name())
            } else {
                format!("extractor `{}` panicked with unknown payload", extractor.name())
            };
            error!(file = %file.path.display(), panic_msg = %msg, "Extractor panicked");
            Extraction::failed(Diagnostic::error(&file.path, msg))
        }
    }
}
