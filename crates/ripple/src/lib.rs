//! # Ripple: Multi-Dimensional Change-Impact Analysis
//!
//! Ripple keeps a typed dependency graph of a multi-language codebase and
//! answers "if this changes, what else must change, and in what order?"
//! across several dimensions at once: code references, data flow, API
//! contracts, configuration and frontend/backend consistency.
//!
//! ## Design Philosophy
//!
//! - **Extractors are plug-ins** - Ripple never parses source; language adapters implement [`Extractor`]
//! - **Snapshots, not globals** - every query runs against an immutable [`GraphSnapshot`]
//! - **Confidence, not guesses** - heuristic edges carry a score and traversal gates on it
//! - **Best effort** - one broken file never blocks the rest of a scan
//!
//! ## Quick Start
//!
//! ```no_run
//! use ripple::{CancellationToken, Change, ChangeKind, ImpactRequest, Ripple, SourceFile};
//! use std::path::Path;
//!
//! let ripple = Ripple::open(Path::new("/path/to/workspace"))?;
//!
//! // Feed extraction documents (or register your own extractors)
//! let files = vec![SourceFile::read(Path::new("/path/to/workspace"), Path::new("api.json"))?];
//! let stats = ripple.scan(&files, &CancellationToken::new())?;
//! println!("merged {} files", stats.files_merged);
//!
//! // What does changing the user DTO reach?
//! let request = ImpactRequest::new(vec![Change::new("type:UpdateUserDTO", ChangeKind::Modified)]);
//! let impact = ripple.analyze_impact(&request, &CancellationToken::new())?;
//! let plan = ripple.plan(&impact)?;
//! println!("{} entities, strategy {}", impact.impacted_count(), plan.strategy);
//! # Ok::<(), ripple::Error>(())
//! ```

pub mod cancel;
pub mod config;
pub mod contracts;
mod error;
pub mod extractor;
pub mod impact;
mod parallel;
pub mod plan;
pub mod report;
pub mod store;
mod types;

pub use cancel::{CancellationToken, Completion};
pub use config::AnalysisConfig;
pub use contracts::{ConsistencyChecker, ConsistencyReport, Perspective};
pub use error::{Error, MergeError, ModelViolation, Result};
pub use extractor::{AdapterRole, Diagnostic, Extraction, Extractor, JsonExtractor, Severity};
pub use impact::{ImpactAnalyzer, ImpactRequest, ImpactResult, ImpactedEntity, Traversal};
pub use parallel::{FileGaps, ScanGaps, ScanStats, SourceFile};
pub use plan::{ChangePlan, PlanGenerator, PlanStage, Strategy};
pub use report::{REPORT_SCHEMA_VERSION, Report};
pub use store::{GraphDatabase, GraphSnapshot, GraphStats, GraphStore, MergeOutcome, ScanResult};
pub use types::{
    Change, ChangeKind, ContractDecl, ContractInfo, Dimension, Direction, Edge, Entity, EntityId,
    EntityKind, FieldSource, Location, RouteDecl, ShapeField, Side, Span,
};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, info, warn};

use config::{DATABASE_FILE_NAME, RIPPLE_DIR_NAME};
use parallel::FileOutcome;
use store::FileContribution;

/// Change-impact engine over one workspace.
///
/// `Ripple` owns the graph store, its optional `SQLite` persistence, the
/// analysis configuration and the registered extractors. Scans write;
/// every other operation reads an immutable snapshot.
pub struct Ripple {
    config: AnalysisConfig,
    store: GraphStore,
    db: Option<GraphDatabase>,
    extractors: Vec<Arc<dyn Extractor>>,
    gaps: RwLock<BTreeMap<PathBuf, FileGaps>>,
}

impl std::fmt::Debug for Ripple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.extractors.iter().map(|e| e.name()).collect();
        f.debug_struct("Ripple")
            .field("config", &self.config)
            .field("db", &self.db)
            .field("extractors", &names)
            .finish_non_exhaustive()
    }
}

impl Ripple {
    /// Create an in-memory engine with the [`JsonExtractor`] registered.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `config` is invalid.
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store: GraphStore::new(),
            db: None,
            extractors: vec![Arc::new(JsonExtractor)],
            gaps: RwLock::new(BTreeMap::new()),
        })
    }

    /// Open a workspace: load `.ripple/config.yaml` (if any) and restore the
    /// graph from `.ripple/graph.db`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is malformed or the database
    /// cannot be opened.
    pub fn open(workspace: &Path) -> Result<Self> {
        let config = AnalysisConfig::load_or_default(workspace)?;
        Self::open_with_config(workspace, config)
    }

    /// Open a workspace with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub fn open_with_config(workspace: &Path, config: AnalysisConfig) -> Result<Self> {
        let db_path = workspace.join(RIPPLE_DIR_NAME).join(DATABASE_FILE_NAME);
        let db = GraphDatabase::open(&db_path)?;
        Self::new(config)?.with_database(db)
    }

    /// Persist to `db`, restoring whatever it already holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored contributions cannot be read.
    pub fn with_database(mut self, db: GraphDatabase) -> Result<Self> {
        let files = db.load()?;
        let gaps = db.load_gaps()?;
        let file_count = files.len();
        let (store, unresolved) = GraphStore::restore(files);
        info!(
            files = file_count,
            unresolved_edges = unresolved,
            files_with_gaps = gaps.len(),
            db = ?db.path(),
            "Restored graph"
        );
        self.store = store;
        self.gaps = RwLock::new(gaps);
        self.db = Some(db);
        Ok(self)
    }

    /// Add an extractor. Every extractor that accepts a file runs on it.
    pub fn register_extractor(&mut self, extractor: Arc<dyn Extractor>) {
        debug!(extractor = extractor.name(), roles = ?extractor.roles(), "Registered extractor");
        self.extractors.push(extractor);
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    // === Scanning ===

    /// Extract `files` in parallel and merge the results.
    ///
    /// Files whose content is unchanged since their last merge are skipped.
    /// Files with error diagnostics keep their previous contribution.
    ///
    /// # Errors
    ///
    /// Only storage failures are errors; per-file problems are reported in
    /// [`ScanStats`].
    pub fn scan(&self, files: &[SourceFile], cancel: &CancellationToken) -> Result<ScanStats> {
        self.scan_files(files, false, cancel)
    }

    /// Drop the whole graph and scan `files` from scratch.
    ///
    /// # Errors
    ///
    /// Only storage failures are errors.
    pub fn rebuild(&self, files: &[SourceFile], cancel: &CancellationToken) -> Result<ScanStats> {
        self.store.clear()?;
        self.gaps_mut()?.clear();
        if let Some(db) = &self.db {
            db.clear()?;
        }
        info!(files = files.len(), "Rebuilding graph");
        self.scan_files(files, true, cancel)
    }

    fn scan_files(
        &self,
        files: &[SourceFile],
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<ScanStats> {
        let start = Instant::now();
        let committed = self.store.snapshot()?;
        let (outcomes, skipped) =
            parallel::extract_all(files, &self.extractors, &committed, force, cancel);

        let mut stats = ScanStats {
            files_skipped_cancelled: skipped,
            completion: if skipped > 0 {
                Completion::Cancelled
            } else {
                Completion::Complete
            },
            ..ScanStats::default()
        };
        let mut gaps: BTreeMap<PathBuf, FileGaps> = BTreeMap::new();
        let mut scans = Vec::new();
        for outcome in outcomes {
            match outcome {
                FileOutcome::Unchanged(_) => stats.files_unchanged += 1,
                FileOutcome::Unsupported(path) => {
                    debug!(file = %path.display(), "No extractor accepts file");
                    stats.files_unsupported += 1;
                }
                FileOutcome::Extracted {
                    path,
                    content_hash,
                    extraction,
                } => {
                    stats.files_scanned += 1;
                    let broken = extraction.is_broken();
                    stats.diagnostics.extend(extraction.diagnostics.iter().cloned());
                    gaps.insert(
                        path.clone(),
                        FileGaps {
                            diagnostics: extraction.diagnostics,
                            excluded: broken,
                            rejection: None,
                        },
                    );
                    if broken {
                        warn!(file = %path.display(), "Extraction failed, keeping previous contribution");
                        stats.excluded.push(path);
                        continue;
                    }
                    let version = committed.file_version(&path).unwrap_or(0) + 1;
                    scans.push(
                        ScanResult::new(path, version, extraction.entities, extraction.edges)
                            .with_content_hash(content_hash),
                    );
                }
            }
        }

        if !scans.is_empty() {
            let outcome = self.store.merge_batch(scans)?;
            self.persist(&outcome)?;

            let snapshot = self.store.snapshot()?;
            for path in &outcome.merged {
                if let Some(contribution) = snapshot.file(path) {
                    stats.entities += contribution.entities.len();
                    stats.edges += contribution.edges.len();
                }
            }
            stats.files_merged = outcome.merged.len();
            stats.cascaded_edges = outcome.cascaded_edges;
            stats.passes = outcome.passes;
            for rejection in &outcome.rejected {
                gaps.entry(rejection.path.clone()).or_default().rejection = Some(rejection.clone());
            }
            stats.rejected = outcome.rejected;
        }
        self.record_gaps(gaps)?;

        stats.duration = start.elapsed();
        info!(
            scanned = stats.files_scanned,
            unchanged = stats.files_unchanged,
            merged = stats.files_merged,
            excluded = stats.excluded.len(),
            rejected = stats.rejected.len(),
            skipped_cancelled = stats.files_skipped_cancelled,
            duration_ms = u64::try_from(stats.duration.as_millis()).unwrap_or(u64::MAX),
            "Scan finished"
        );
        Ok(stats)
    }

    /// Merge one pre-extracted contribution directly.
    ///
    /// # Errors
    ///
    /// Only storage failures are errors; invariant violations are reported
    /// in [`MergeOutcome::rejected`].
    pub fn merge(&self, scan: ScanResult) -> Result<MergeOutcome> {
        let outcome = self.store.merge(scan)?;
        self.persist(&outcome)?;
        Ok(outcome)
    }

    /// Remove a deleted file's contribution.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting the change fails.
    pub fn retract_file(&self, path: &Path) -> Result<MergeOutcome> {
        let outcome = self.store.retract_file(path)?;
        self.persist(&outcome)?;
        self.record_gaps(BTreeMap::from([(path.to_path_buf(), FileGaps::default())]))?;
        Ok(outcome)
    }

    /// Replace the recorded gaps of every file in `updates`.
    fn record_gaps(&self, updates: BTreeMap<PathBuf, FileGaps>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        if let Some(db) = &self.db {
            let rows: Vec<(PathBuf, Option<&FileGaps>)> = updates
                .iter()
                .map(|(path, gaps)| (path.clone(), Some(gaps)))
                .collect();
            db.record_gaps(&rows)?;
        }
        let mut recorded = self.gaps_mut()?;
        for (path, gaps) in updates {
            if gaps.is_empty() {
                recorded.remove(&path);
            } else {
                recorded.insert(path, gaps);
            }
        }
        Ok(())
    }

    fn gaps_mut(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<PathBuf, FileGaps>>> {
        self.gaps
            .write()
            .map_err(|e| Error::Internal(format!("scan gaps lock poisoned: {e}")))
    }

    /// Write every file a merge touched in one transaction.
    fn persist(&self, outcome: &MergeOutcome) -> Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        if outcome.touched.is_empty() && outcome.removed.is_empty() {
            return Ok(());
        }
        let snapshot = self.store.snapshot()?;
        let replaced: Vec<(PathBuf, &FileContribution)> = outcome
            .touched
            .iter()
            .filter_map(|path| snapshot.file(path).map(|c| (path.clone(), c)))
            .collect();
        db.apply(&replaced, &outcome.removed)
    }

    // === Queries ===

    /// The current immutable snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the snapshot lock was poisoned.
    pub fn snapshot(&self) -> Result<Arc<GraphSnapshot>> {
        self.store.snapshot()
    }

    /// Edges touching `id`, in canonical order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the snapshot lock was poisoned.
    pub fn neighbors(
        &self,
        id: &EntityId,
        dimension: Option<Dimension>,
        direction: Option<Direction>,
    ) -> Result<Vec<Edge>> {
        self.store.neighbors(id, dimension, direction)
    }

    /// Summary counts.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the snapshot lock was poisoned.
    pub fn stats(&self) -> Result<GraphStats> {
        self.store.stats()
    }

    /// Files the graph is missing or holding back, as of each file's latest scan.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the gaps lock was poisoned.
    pub fn scan_gaps(&self) -> Result<ScanGaps> {
        let gaps = self
            .gaps
            .read()
            .map_err(|e| Error::Internal(format!("scan gaps lock poisoned: {e}")))?;
        Ok(ScanGaps::collect(gaps.iter()))
    }

    /// Pair contract entities and compare them.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the snapshot lock was poisoned.
    pub fn check_consistency(&self, perspective: Perspective) -> Result<ConsistencyReport> {
        let snapshot = self.store.snapshot()?;
        Ok(ConsistencyChecker::new(&self.config)
            .with_perspective(perspective)
            .check(&snapshot))
    }

    /// Run impact analysis on the current snapshot.
    ///
    /// With [`ImpactRequest::include_contract_links`], matched frontend and
    /// backend contracts are linked by derived `Consistency` edges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the snapshot lock was poisoned.
    pub fn analyze_impact(
        &self,
        request: &ImpactRequest,
        cancel: &CancellationToken,
    ) -> Result<ImpactResult> {
        let snapshot = self.store.snapshot()?;
        let consistency = request
            .include_contract_links
            .then(|| ConsistencyChecker::new(&self.config).check(&snapshot));
        Ok(self.analyze_on(&snapshot, consistency.as_ref(), request, cancel))
    }

    fn analyze_on(
        &self,
        snapshot: &GraphSnapshot,
        consistency: Option<&ConsistencyReport>,
        request: &ImpactRequest,
        cancel: &CancellationToken,
    ) -> ImpactResult {
        let mut analyzer = ImpactAnalyzer::new(snapshot, &self.config);
        if let Some(report) = consistency.filter(|_| request.include_contract_links) {
            analyzer = analyzer.with_overlay(report.consistency_edges());
        }
        analyzer.analyze(request, cancel)
    }

    /// Order and classify an impact result.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the snapshot lock was poisoned.
    pub fn plan(&self, impact: &ImpactResult) -> Result<ChangePlan> {
        let snapshot = self.store.snapshot()?;
        if snapshot.generation() != impact.generation {
            warn!(
                impact = impact.generation,
                current = snapshot.generation(),
                "Planning against a newer graph than the impact was computed on"
            );
        }
        let consistency = ConsistencyChecker::new(&self.config).check(&snapshot);
        Ok(PlanGenerator::new(&self.config).generate(impact, &consistency))
    }

    /// Build a report of the current graph, the given change sets and every
    /// recorded scan gap.
    ///
    /// All sections are derived from one snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if a lock was poisoned.
    pub fn report(
        &self,
        requests: &[ImpactRequest],
        cancel: &CancellationToken,
    ) -> Result<Report> {
        let snapshot = self.store.snapshot()?;
        let consistency = ConsistencyChecker::new(&self.config).check(&snapshot);
        let planner = PlanGenerator::new(&self.config);
        let mut report = Report::new(&snapshot, consistency.clone()).with_gaps(&self.scan_gaps()?);
        for request in requests {
            let impact = self.analyze_on(&snapshot, Some(&consistency), request, cancel);
            let plan = planner.generate(&impact, &consistency);
            report = report.with_analysis(impact, plan);
        }
        Ok(report)
    }

    /// Location of the database, when persisted to a file.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db.as_ref().and_then(GraphDatabase::path)
    }
}
