//! The graph store: per-file merges into copy-on-write snapshots.
//!
//! ## Module Structure
//!
//! - `snapshot` - Immutable `GraphSnapshot` views and `GraphStats`
//! - `database` - `SQLite` persistence of per-file contributions
//! - `schema` - Database schema (DDL)
//!
//! ## Concurrency
//!
//! Writers are serialized by a single writer mutex. Each merge builds a new
//! snapshot from the current one and publishes it with a pointer swap, so
//! readers holding an `Arc<GraphSnapshot>` never observe a partial merge.
//!
//! ## Merge Semantics
//!
//! A file's contribution is replaced as a whole or not at all. A batch of
//! files is checked in fix-point passes: the set of accepted files shrinks
//! until every accepted file is consistent with every other accepted file and
//! with the committed contributions of the files not being replaced. The
//! outcome never depends on the order scans were submitted in.
//!
//! Retracting an entity never rewrites another file's contribution. Edges
//! into it become unresolved: they stay stored with their file, drop out of
//! the adjacency graph, and come back when the entity is declared again.

mod database;
mod schema;
mod snapshot;

pub use database::GraphDatabase;
pub use snapshot::{FileContribution, GraphSnapshot, GraphStats};

pub(crate) use snapshot::sort_edges;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, MergeError, ModelViolation, Result};
use crate::types::{Dimension, Direction, Edge, Entity, EntityId};

/// One file's extraction output, ready to merge.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// File the contribution belongs to, relative to the workspace root
    pub path: PathBuf,
    /// Must be strictly greater than the file's committed version
    pub scan_version: u64,
    /// Fingerprint of the scanned content
    pub content_hash: Option<u64>,
    /// Declared entities
    pub entities: Vec<Entity>,
    /// Declared edges
    pub edges: Vec<Edge>,
}

impl ScanResult {
    /// Create a scan result without a content fingerprint.
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        scan_version: u64,
        entities: Vec<Entity>,
        edges: Vec<Edge>,
    ) -> Self {
        Self {
            path: path.into(),
            scan_version,
            content_hash: None,
            entities,
            edges,
        }
    }

    /// Attach a content fingerprint.
    #[must_use]
    pub fn with_content_hash(mut self, hash: u64) -> Self {
        self.content_hash = Some(hash);
        self
    }
}

/// What a merge, retraction or restore did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeOutcome {
    /// Files whose new contribution was committed
    pub merged: Vec<PathBuf>,
    /// Files whose contribution was rejected (previous contribution kept)
    pub rejected: Vec<MergeError>,
    /// Edges of other files left unresolved because their endpoint was retracted
    pub cascaded_edges: usize,
    /// Unresolved edges of other files whose endpoint was declared again
    pub restored_edges: usize,
    /// Every file whose stored contribution changed
    pub touched: Vec<PathBuf>,
    /// Files whose contribution was removed entirely
    pub removed: Vec<PathBuf>,
    /// Fix-point passes needed to settle the batch
    pub passes: usize,
}

/// Thread-safe graph store with a single writer and snapshot readers.
#[derive(Debug, Default)]
pub struct GraphStore {
    current: RwLock<Arc<GraphSnapshot>>,
    writer: Mutex<()>,
}

impl GraphStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from previously persisted contributions.
    ///
    /// Returns the store and the number of stored edges that do not resolve.
    #[must_use]
    pub fn restore(files: Vec<(PathBuf, FileContribution)>) -> (Self, usize) {
        let files = files
            .into_iter()
            .map(|(path, contribution)| (path, Arc::new(contribution)))
            .collect();
        let (snapshot, unresolved) = GraphSnapshot::from_files(1, files);
        if unresolved > 0 {
            warn!(edges = unresolved, "Restored graph has unresolved edges");
        }
        (
            Self {
                current: RwLock::new(Arc::new(snapshot)),
                writer: Mutex::new(()),
            },
            unresolved,
        )
    }

    /// The current immutable snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the snapshot lock was poisoned.
    pub fn snapshot(&self) -> Result<Arc<GraphSnapshot>> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|e| Error::Internal(format!("snapshot lock poisoned: {e}")))
    }

    /// Edges touching `id` in the current snapshot.
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
        Ok(self.snapshot()?.neighbors(id, dimension, direction))
    }

    /// Committed scan version of `path` (0 if never merged).
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the snapshot lock was poisoned.
    pub fn file_version(&self, path: &Path) -> Result<u64> {
        Ok(self.snapshot()?.file_version(path).unwrap_or(0))
    }

    /// Summary counts of the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the snapshot lock was poisoned.
    pub fn stats(&self) -> Result<GraphStats> {
        Ok(self.snapshot()?.stats())
    }

    /// Merge one file's contribution.
    ///
    /// # Errors
    ///
    /// Only lock poisoning is an error; invariant violations are reported in
    /// [`MergeOutcome::rejected`].
    pub fn merge(&self, scan: ScanResult) -> Result<MergeOutcome> {
        self.merge_batch(vec![scan])
    }

    /// Merge many files' contributions as one publication.
    ///
    /// # Errors
    ///
    /// Only lock poisoning is an error; invariant violations are reported in
    /// [`MergeOutcome::rejected`].
    pub fn merge_batch(&self, scans: Vec<ScanResult>) -> Result<MergeOutcome> {
        let _writer = self.lock_writer()?;
        let base = self.snapshot()?;

        let mut outcome = MergeOutcome::default();
        let candidates = precheck(&base, scans, &mut outcome.rejected);
        let accepted = settle(&base, candidates, &mut outcome);

        if accepted.is_empty() {
            debug!(rejected = outcome.rejected.len(), "Merge committed nothing");
            outcome.rejected.sort_by(|a, b| a.path.cmp(&b.path));
            return Ok(outcome);
        }

        let mut files = base.contributions().clone();
        for candidate in accepted {
            outcome.merged.push(candidate.path.clone());
            files.insert(
                candidate.path,
                Arc::new(FileContribution {
                    scan_version: candidate.scan_version,
                    content_hash: candidate.content_hash,
                    entities: candidate.entities,
                    edges: candidate.edges,
                }),
            );
        }

        self.publish(&base, files, &mut outcome)?;
        outcome.rejected.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            merged = outcome.merged.len(),
            rejected = outcome.rejected.len(),
            cascaded = outcome.cascaded_edges,
            restored = outcome.restored_edges,
            passes = outcome.passes,
            "Merged batch"
        );
        Ok(outcome)
    }

    /// Remove a file's contribution (the file was deleted).
    ///
    /// Edges of other files pointing at entities only this file declared
    /// become unresolved.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if a lock was poisoned.
    pub fn retract_file(&self, path: &Path) -> Result<MergeOutcome> {
        let _writer = self.lock_writer()?;
        let base = self.snapshot()?;
        let mut outcome = MergeOutcome::default();

        if base.file(path).is_none() {
            return Ok(outcome);
        }

        let mut files = base.contributions().clone();
        files.remove(path);
        outcome.removed.push(path.to_path_buf());
        self.publish(&base, files, &mut outcome)?;
        debug!(file = %path.display(), cascaded = outcome.cascaded_edges, "Retracted file");
        Ok(outcome)
    }

    /// Drop every contribution.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if a lock was poisoned.
    pub fn clear(&self) -> Result<()> {
        let _writer = self.lock_writer()?;
        let generation = self.snapshot()?.generation() + 1;
        let (empty, _) = GraphSnapshot::from_files(generation, BTreeMap::new());
        self.swap(empty)
    }

    fn publish(
        &self,
        base: &GraphSnapshot,
        files: BTreeMap<PathBuf, Arc<FileContribution>>,
        outcome: &mut MergeOutcome,
    ) -> Result<()> {
        let (next, _) = GraphSnapshot::from_files(base.generation() + 1, files);

        // Contributions carried over unchanged may gain or lose resolved edges.
        for (path, contribution) in next.contributions() {
            let carried = base
                .contributions()
                .get(path)
                .is_some_and(|previous| Arc::ptr_eq(previous, contribution));
            if !carried {
                continue;
            }
            for edge in &contribution.edges {
                match (base.resolves(edge), next.resolves(edge)) {
                    (true, false) => outcome.cascaded_edges += 1,
                    (false, true) => outcome.restored_edges += 1,
                    _ => {}
                }
            }
        }
        if outcome.cascaded_edges > 0 {
            warn!(
                edges = outcome.cascaded_edges,
                "Edges left unresolved by retracted entities"
            );
        }

        let touched: BTreeSet<PathBuf> = outcome.merged.iter().cloned().collect();
        outcome.touched = touched.into_iter().collect();

        self.swap(next)
    }

    fn swap(&self, next: GraphSnapshot) -> Result<()> {
        let mut current = self
            .current
            .write()
            .map_err(|e| Error::Internal(format!("snapshot lock poisoned: {e}")))?;
        *current = Arc::new(next);
        Ok(())
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|e| Error::Internal(format!("writer lock poisoned: {e}")))
    }
}

/// Per-file checks that do not depend on other files.
///
/// Returns the surviving candidates sorted by path.
fn precheck(
    base: &GraphSnapshot,
    scans: Vec<ScanResult>,
    rejected: &mut Vec<MergeError>,
) -> Vec<ScanResult> {
    // Several scans of one path in a batch: only the newest may proceed.
    let mut newest: BTreeMap<PathBuf, ScanResult> = BTreeMap::new();
    for scan in scans {
        match newest.remove(&scan.path) {
            Some(existing) if existing.scan_version >= scan.scan_version => {
                rejected.push(stale(&scan, existing.scan_version));
                newest.insert(existing.path.clone(), existing);
            }
            Some(existing) => {
                rejected.push(stale(&existing, scan.scan_version));
                newest.insert(scan.path.clone(), scan);
            }
            None => {
                newest.insert(scan.path.clone(), scan);
            }
        }
    }

    let mut candidates = Vec::with_capacity(newest.len());
    for (path, scan) in newest {
        match check_file(base, scan) {
            Ok(scan) => candidates.push(scan),
            Err(violation) => {
                warn!(file = %path.display(), error = %violation, "Rejected file contribution");
                rejected.push(MergeError::new(path, violation));
            }
        }
    }
    candidates
}

fn stale(scan: &ScanResult, committed: u64) -> MergeError {
    MergeError::new(
        scan.path.clone(),
        ModelViolation::StaleScanVersion {
            committed,
            attempted: scan.scan_version,
        },
    )
}

/// Version, field validation and intra-file duplicate checks.
fn check_file(
    base: &GraphSnapshot,
    mut scan: ScanResult,
) -> std::result::Result<ScanResult, ModelViolation> {
    let committed = base.file_version(&scan.path).unwrap_or(0);
    if scan.scan_version <= committed {
        return Err(ModelViolation::StaleScanVersion {
            committed,
            attempted: scan.scan_version,
        });
    }

    let mut seen: HashMap<EntityId, &Entity> = HashMap::new();
    let mut duplicates = Vec::new();
    for (index, entity) in scan.entities.iter().enumerate() {
        entity.validate()?;
        match seen.get(&entity.id) {
            Some(existing) if *existing == entity => duplicates.push(index),
            Some(existing) if existing.identity() != entity.identity() => {
                return Err(ModelViolation::DuplicateId {
                    id: entity.id.clone(),
                    existing: existing.identity(),
                    incoming: entity.identity(),
                });
            }
            Some(_) => {
                return Err(ModelViolation::InvalidEntity {
                    id: entity.id.clone(),
                    reason: "declared twice in one file with different data".to_string(),
                });
            }
            None => {
                seen.insert(entity.id.clone(), entity);
            }
        }
    }
    for index in duplicates.into_iter().rev() {
        scan.entities.remove(index);
    }

    for edge in &scan.edges {
        edge.validate()?;
    }
    sort_edges(&mut scan.edges);

    Ok(scan)
}

/// Fix-point over the batch: reject candidates until the rest agree.
///
/// Each pass rebuilds the id universe from scratch: committed contributions of
/// files not being replaced (including files rejected in earlier passes), then
/// accepted candidates in path order.
fn settle(
    base: &GraphSnapshot,
    mut accepted: Vec<ScanResult>,
    outcome: &mut MergeOutcome,
) -> Vec<ScanResult> {
    loop {
        outcome.passes += 1;
        let replacing: BTreeSet<&Path> = accepted.iter().map(|s| s.path.as_path()).collect();

        // id -> (kind/language, declaring file)
        let mut universe: HashMap<EntityId, (String, PathBuf)> = HashMap::new();
        for (path, contribution) in base.contributions() {
            if replacing.contains(path.as_path()) {
                continue;
            }
            for entity in &contribution.entities {
                universe
                    .entry(entity.id.clone())
                    .or_insert_with(|| (entity.identity(), path.clone()));
            }
        }

        let mut failed: BTreeMap<PathBuf, ModelViolation> = BTreeMap::new();
        let mut declared_by_accepted: HashMap<EntityId, (String, PathBuf)> = HashMap::new();
        for scan in &accepted {
            let conflict = scan.entities.iter().find_map(|entity| {
                let existing = universe
                    .get(&entity.id)
                    .or_else(|| declared_by_accepted.get(&entity.id))?;
                (existing.0 != entity.identity()).then(|| ModelViolation::DuplicateId {
                    id: entity.id.clone(),
                    existing: existing.0.clone(),
                    incoming: entity.identity(),
                })
            });
            if let Some(violation) = conflict {
                failed.insert(scan.path.clone(), violation);
                continue;
            }
            for entity in &scan.entities {
                declared_by_accepted
                    .entry(entity.id.clone())
                    .or_insert_with(|| (entity.identity(), scan.path.clone()));
            }
        }

        for scan in &accepted {
            if failed.contains_key(&scan.path) {
                continue;
            }
            let dangling = scan.edges.iter().find_map(|edge| {
                [&edge.from, &edge.to]
                    .into_iter()
                    .find(|id| {
                        !universe.contains_key(*id) && !declared_by_accepted.contains_key(*id)
                    })
                    .map(|missing| ModelViolation::DanglingEdge {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: missing.clone(),
                    })
            });
            if let Some(violation) = dangling {
                failed.insert(scan.path.clone(), violation);
            }
        }

        if failed.is_empty() {
            return accepted;
        }

        accepted.retain(|scan| !failed.contains_key(&scan.path));
        for (path, violation) in failed {
            warn!(
                file = %path.display(),
                error = %violation,
                pass = outcome.passes,
                "Rejected file contribution"
            );
            outcome.rejected.push(MergeError::new(path, violation));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;

    fn function(id: &str, file: &str) -> Entity {
        Entity::new(id, EntityKind::Function, id, "rust", file)
    }

    #[test]
    fn stale_version_is_rejected_and_previous_contribution_kept() {
        let store = GraphStore::new();
        store
            .merge(ScanResult::new("a.rs", 2, vec![function("a", "a.rs")], vec![]))
            .expect("merge");

        let outcome = store
            .merge(ScanResult::new("a.rs", 2, vec![function("b", "a.rs")], vec![]))
            .expect("merge");

        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(
            outcome.rejected[0].violation,
            ModelViolation::StaleScanVersion {
                committed: 2,
                attempted: 2
            }
        );
        let snapshot = store.snapshot().expect("snapshot");
        assert!(snapshot.contains(&EntityId::new("a")));
        assert!(!snapshot.contains(&EntityId::new("b")));
    }

    #[test]
    fn older_duplicate_in_batch_is_stale() {
        let store = GraphStore::new();
        let outcome = store
            .merge_batch(vec![
                ScanResult::new("a.rs", 3, vec![function("new", "a.rs")], vec![]),
                ScanResult::new("a.rs", 1, vec![function("old", "a.rs")], vec![]),
            ])
            .expect("merge");

        assert_eq!(outcome.merged, vec![PathBuf::from("a.rs")]);
        assert_eq!(outcome.rejected.len(), 1);
        assert!(store.snapshot().expect("snapshot").contains(&EntityId::new("new")));
    }

    #[test]
    fn exact_duplicate_entities_in_one_file_are_collapsed() {
        let store = GraphStore::new();
        let outcome = store
            .merge(ScanResult::new(
                "a.rs",
                1,
                vec![function("a", "a.rs"), function("a", "a.rs")],
                vec![],
            ))
            .expect("merge");

        assert!(outcome.rejected.is_empty());
        let snapshot = store.snapshot().expect("snapshot");
        assert_eq!(snapshot.file(Path::new("a.rs")).expect("file").entities.len(), 1);
    }

    #[test]
    fn rejection_cascades_through_fix_point_passes() {
        // b.rs conflicts with committed a.rs; c.rs needs b.rs; d.rs needs c.rs.
        let store = GraphStore::new();
        store
            .merge(ScanResult::new("a.rs", 1, vec![function("x", "a.rs")], vec![]))
            .expect("merge");

        let conflicting = Entity::new("x", EntityKind::Type, "x", "rust", "b.rs");
        let outcome = store
            .merge_batch(vec![
                ScanResult::new(
                    "d.rs",
                    1,
                    vec![function("w", "d.rs")],
                    vec![Edge::reference("w", "z")],
                ),
                ScanResult::new(
                    "c.rs",
                    1,
                    vec![function("z", "c.rs")],
                    vec![Edge::reference("z", "y")],
                ),
                ScanResult::new("b.rs", 1, vec![conflicting, function("y", "b.rs")], vec![]),
                ScanResult::new("e.rs", 1, vec![function("v", "e.rs")], vec![]),
            ])
            .expect("merge");

        assert_eq!(outcome.merged, vec![PathBuf::from("e.rs")]);
        assert_eq!(outcome.passes, 3);
        let rejected: Vec<_> = outcome.rejected.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            rejected,
            vec![
                PathBuf::from("b.rs"),
                PathBuf::from("c.rs"),
                PathBuf::from("d.rs")
            ]
        );
        assert!(matches!(
            outcome.rejected[0].violation,
            ModelViolation::DuplicateId { .. }
        ));
        assert!(matches!(
            outcome.rejected[2].violation,
            ModelViolation::DanglingEdge { .. }
        ));
    }

    #[test]
    fn retracting_a_file_leaves_edges_of_other_files_unresolved() {
        let store = GraphStore::new();
        store
            .merge_batch(vec![
                ScanResult::new("callee.rs", 1, vec![function("callee", "callee.rs")], vec![]),
                ScanResult::new(
                    "caller.rs",
                    1,
                    vec![function("caller", "caller.rs")],
                    vec![Edge::reference("caller", "callee")],
                ),
            ])
            .expect("merge");

        let outcome = store.retract_file(Path::new("callee.rs")).expect("retract");

        assert_eq!(outcome.cascaded_edges, 1);
        assert_eq!(outcome.removed, vec![PathBuf::from("callee.rs")]);
        assert!(outcome.touched.is_empty());
        let snapshot = store.snapshot().expect("snapshot");
        assert_eq!(snapshot.edge_count(), 0);
        assert!(snapshot.contains(&EntityId::new("caller")));
        assert_eq!(
            snapshot
                .file(Path::new("caller.rs"))
                .expect("caller contribution")
                .edges
                .len(),
            1
        );
    }

    #[test]
    fn redeclared_entity_restores_edges_of_other_files() {
        let store = GraphStore::new();
        store
            .merge_batch(vec![
                ScanResult::new("callee.rs", 1, vec![function("callee", "callee.rs")], vec![]),
                ScanResult::new(
                    "caller.rs",
                    1,
                    vec![function("caller", "caller.rs")],
                    vec![Edge::reference("caller", "callee")],
                ),
            ])
            .expect("merge");
        store
            .merge(ScanResult::new("callee.rs", 2, vec![], vec![]))
            .expect("merge");
        assert_eq!(store.snapshot().expect("snapshot").edge_count(), 0);

        let outcome = store
            .merge(ScanResult::new("callee.rs", 3, vec![function("callee", "callee.rs")], vec![]))
            .expect("merge");

        assert_eq!(outcome.restored_edges, 1);
        assert_eq!(outcome.touched, vec![PathBuf::from("callee.rs")]);
        let snapshot = store.snapshot().expect("snapshot");
        assert_eq!(
            snapshot.neighbors(&EntityId::new("callee"), None, None),
            vec![Edge::reference("caller", "callee")]
        );
    }

    #[test]
    fn readers_keep_their_snapshot_across_merges() {
        let store = GraphStore::new();
        let before = store.snapshot().expect("snapshot");

        store
            .merge(ScanResult::new("a.rs", 1, vec![function("a", "a.rs")], vec![]))
            .expect("merge");

        assert_eq!(before.entity_count(), 0);
        assert_eq!(store.snapshot().expect("snapshot").entity_count(), 1);
    }

    #[test]
    fn clear_empties_the_store() {
        let store = GraphStore::new();
        store
            .merge(ScanResult::new("a.rs", 1, vec![function("a", "a.rs")], vec![]))
            .expect("merge");

        store.clear().expect("clear");

        assert_eq!(store.stats().expect("stats"), GraphStats::default());
        assert_eq!(store.file_version(Path::new("a.rs")).expect("version"), 0);
    }
}
