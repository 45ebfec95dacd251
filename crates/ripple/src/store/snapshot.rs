//! Immutable graph snapshots.
//!
//! A snapshot is the unit readers work against. It is derived entirely from
//! the per-file contributions it holds: the entity table, the ownership index
//! and the petgraph adjacency are rebuilt whenever a new snapshot is published,
//! so a snapshot can never disagree with its own contributions.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use petgraph::Direction as Adjacency;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{Dimension, Direction, Edge, Entity, EntityId, EntityKind};

/// Everything one file contributed to the graph, tagged with its scan version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileContribution {
    /// Monotonic per-file version of the scan that produced this contribution
    pub scan_version: u64,
    /// Fingerprint of the source content, when known
    pub content_hash: Option<u64>,
    /// Entities declared by the file
    pub entities: Vec<Entity>,
    /// Edges declared by the file
    pub edges: Vec<Edge>,
}

/// Edge weight stored in the adjacency graph.
#[derive(Debug, Clone)]
struct StoredEdge {
    edge: Edge,
    file: PathBuf,
}

/// Counts describing a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GraphStats {
    /// Number of distinct entities
    pub entities: usize,
    /// Number of edges (including identical edges contributed by different files)
    pub edges: usize,
    /// Number of files with a contribution
    pub files: usize,
    /// Entity count per kind
    pub entities_by_kind: BTreeMap<EntityKind, usize>,
    /// Edge count per dimension
    pub edges_by_dimension: BTreeMap<Dimension, usize>,
    /// Number of dependency cycles (strongly connected components)
    pub cycles: usize,
    /// Stored edges waiting for an endpoint to be declared again
    #[serde(default)]
    pub unresolved_edges: usize,
}

/// An immutable, internally consistent view of the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    generation: u64,
    files: BTreeMap<PathBuf, Arc<FileContribution>>,
    entities: BTreeMap<EntityId, Entity>,
    owners: BTreeMap<EntityId, BTreeSet<PathBuf>>,
    graph: DiGraph<EntityId, StoredEdge>,
    node_map: HashMap<EntityId, NodeIndex>,
}

impl GraphSnapshot {
    /// Build a snapshot from per-file contributions.
    ///
    /// Edges whose endpoints are not declared by any contribution stay in
    /// their owning contribution but are left out of the adjacency graph, so
    /// they resolve again once the endpoint is declared. Returns the snapshot
    /// and the number of unresolved edges.
    pub(crate) fn from_files(
        generation: u64,
        files: BTreeMap<PathBuf, Arc<FileContribution>>,
    ) -> (Self, usize) {
        let snapshot = Self::index(generation, files);
        let unresolved = snapshot.unresolved_edge_count();
        (snapshot, unresolved)
    }

    fn index(generation: u64, files: BTreeMap<PathBuf, Arc<FileContribution>>) -> Self {
        let mut entities = BTreeMap::new();
        let mut owners: BTreeMap<EntityId, BTreeSet<PathBuf>> = BTreeMap::new();

        // Files iterate in path order, so the first owner's declaration wins.
        for (path, contribution) in &files {
            for entity in &contribution.entities {
                entities
                    .entry(entity.id.clone())
                    .or_insert_with(|| entity.clone());
                owners
                    .entry(entity.id.clone())
                    .or_default()
                    .insert(path.clone());
            }
        }

        let mut graph = DiGraph::with_capacity(entities.len(), 0);
        let mut node_map = HashMap::with_capacity(entities.len());
        for id in entities.keys() {
            let idx = graph.add_node(id.clone());
            node_map.insert(id.clone(), idx);
        }

        for (path, contribution) in &files {
            for edge in &contribution.edges {
                if let (Some(&from), Some(&to)) = (node_map.get(&edge.from), node_map.get(&edge.to))
                {
                    graph.add_edge(
                        from,
                        to,
                        StoredEdge {
                            edge: edge.clone(),
                            file: path.clone(),
                        },
                    );
                }
            }
        }

        Self {
            generation,
            files,
            entities,
            owners,
            graph,
            node_map,
        }
    }

    /// Publication counter; increases with every merge.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether both endpoints of `edge` are declared.
    #[must_use]
    pub fn resolves(&self, edge: &Edge) -> bool {
        self.node_map.contains_key(&edge.from) && self.node_map.contains_key(&edge.to)
    }

    /// Stored edges with an undeclared endpoint, by owning file.
    #[must_use]
    pub fn unresolved_edges(&self) -> Vec<(&Path, &Edge)> {
        self.files
            .iter()
            .flat_map(|(path, c)| c.edges.iter().map(move |e| (path.as_path(), e)))
            .filter(|(_, edge)| !self.resolves(edge))
            .collect()
    }

    fn unresolved_edge_count(&self) -> usize {
        self.files
            .values()
            .flat_map(|c| c.edges.iter())
            .filter(|edge| !self.resolves(edge))
            .count()
    }

    /// Look up an entity.
    #[must_use]
    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Whether an entity exists.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// All entities, ordered by id.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// All edges in canonical order.
    #[must_use]
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .graph
            .edge_weights()
            .map(|stored| stored.edge.clone())
            .collect();
        sort_edges(&mut edges);
        edges
    }

    /// Number of distinct entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of stored edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Files declaring `id`, in path order.
    #[must_use]
    pub fn owners(&self, id: &EntityId) -> Vec<&Path> {
        self.owners
            .get(id)
            .map(|paths| paths.iter().map(PathBuf::as_path).collect())
            .unwrap_or_default()
    }

    /// Files with a contribution, in path order.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    /// One file's contribution.
    #[must_use]
    pub fn file(&self, path: &Path) -> Option<&FileContribution> {
        self.files.get(path).map(|c| &**c)
    }

    /// Committed scan version of a file (`None` if never merged).
    #[must_use]
    pub fn file_version(&self, path: &Path) -> Option<u64> {
        self.files.get(path).map(|c| c.scan_version)
    }

    /// Shared handles to every contribution.
    pub(crate) fn contributions(&self) -> &BTreeMap<PathBuf, Arc<FileContribution>> {
        &self.files
    }

    /// Edges touching `id`, optionally filtered, in canonical order.
    ///
    /// `Direction::Forward` keeps edges along which a change to `id` propagates
    /// outward; `Direction::Backward` keeps edges carrying a change into `id`.
    /// Identical edges contributed by several files appear once, with the
    /// highest confidence.
    #[must_use]
    pub fn neighbors(
        &self,
        id: &EntityId,
        dimension: Option<Dimension>,
        direction: Option<Direction>,
    ) -> Vec<Edge> {
        let Some(&idx) = self.node_map.get(id) else {
            return Vec::new();
        };

        let mut edges: Vec<Edge> = self
            .graph
            .edges_directed(idx, Adjacency::Outgoing)
            .chain(self.graph.edges_directed(idx, Adjacency::Incoming))
            .map(|e| &e.weight().edge)
            .filter(|edge| dimension.is_none_or(|d| edge.dimension == d))
            .filter(|edge| match direction {
                None => true,
                Some(Direction::Forward) => edge.upstream() == id,
                Some(Direction::Backward) => edge.downstream() == id,
            })
            .cloned()
            .collect();
        sort_edges(&mut edges);
        edges
    }

    /// The file that contributed each edge touching `id`.
    #[must_use]
    pub fn edge_sources(&self, id: &EntityId) -> Vec<(Edge, PathBuf)> {
        let Some(&idx) = self.node_map.get(id) else {
            return Vec::new();
        };
        let mut sources: Vec<(Edge, PathBuf)> = self
            .graph
            .edges_directed(idx, Adjacency::Outgoing)
            .chain(self.graph.edges_directed(idx, Adjacency::Incoming))
            .map(|e| (e.weight().edge.clone(), e.weight().file.clone()))
            .collect();
        sources.sort_by(|a, b| a.0.sort_key().cmp(&b.0.sort_key()).then(a.1.cmp(&b.1)));
        sources.dedup_by(|a, b| a.0.sort_key() == b.0.sort_key() && a.1 == b.1);
        sources
    }

    /// Strongly connected components with more than one member, or a self-loop.
    ///
    /// Members are sorted by id and components by their first member.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<EntityId>> {
        let mut cycles: Vec<Vec<EntityId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&n| self.graph.contains_edge(n, n))
            })
            .map(|component| {
                let mut ids: Vec<EntityId> = component
                    .into_iter()
                    .map(|n| self.graph[n].clone())
                    .collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Summary counts.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let mut entities_by_kind = BTreeMap::new();
        for entity in self.entities.values() {
            *entities_by_kind.entry(entity.kind).or_insert(0) += 1;
        }
        let mut edges_by_dimension = BTreeMap::new();
        for stored in self.graph.edge_weights() {
            *edges_by_dimension.entry(stored.edge.dimension).or_insert(0) += 1;
        }
        GraphStats {
            entities: self.entities.len(),
            edges: self.graph.edge_count(),
            files: self.files.len(),
            entities_by_kind,
            edges_by_dimension,
            cycles: self.cycles().len(),
            unresolved_edges: self.unresolved_edge_count(),
        }
    }
}

/// Sort edges canonically and collapse identical ones, keeping the most confident.
pub(crate) fn sort_edges(edges: &mut Vec<Edge>) {
    edges.sort_by(|a, b| {
        a.sort_key()
            .cmp(&b.sort_key())
            .then(b.confidence.total_cmp(&a.confidence))
    });
    edges.dedup_by(|later, earlier| later.sort_key() == earlier.sort_key());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(id: &str, file: &str) -> Entity {
        Entity::new(id, EntityKind::Function, id, "rust", file)
    }

    fn contribution(entities: Vec<Entity>, edges: Vec<Edge>) -> Arc<FileContribution> {
        Arc::new(FileContribution {
            scan_version: 1,
            content_hash: None,
            entities,
            edges,
        })
    }

    fn snapshot(files: Vec<(&str, Arc<FileContribution>)>) -> (GraphSnapshot, usize) {
        GraphSnapshot::from_files(
            1,
            files
                .into_iter()
                .map(|(p, c)| (PathBuf::from(p), c))
                .collect(),
        )
    }

    #[test]
    fn edges_into_missing_entities_are_kept_but_not_indexed() {
        let (snapshot, unresolved) = snapshot(vec![(
            "a.rs",
            contribution(
                vec![function("a", "a.rs")],
                vec![Edge::reference("a", "gone")],
            ),
        )]);

        assert_eq!(unresolved, 1);
        assert_eq!(snapshot.edge_count(), 0);
        assert!(snapshot.edges().is_empty());
        assert_eq!(snapshot.file(Path::new("a.rs")).expect("file").edges.len(), 1);
        assert_eq!(snapshot.stats().unresolved_edges, 1);
        assert_eq!(
            snapshot.unresolved_edges(),
            vec![(Path::new("a.rs"), &Edge::reference("a", "gone"))]
        );
    }

    #[test]
    fn unresolved_edges_resolve_when_the_endpoint_returns() {
        let caller = contribution(
            vec![function("a", "a.rs")],
            vec![Edge::reference("a", "b")],
        );
        let (without, _) = snapshot(vec![("a.rs", Arc::clone(&caller))]);
        assert_eq!(without.edge_count(), 0);

        let (with, unresolved) = snapshot(vec![
            ("a.rs", caller),
            ("b.rs", contribution(vec![function("b", "b.rs")], vec![])),
        ]);
        assert_eq!(unresolved, 0);
        assert_eq!(with.edges(), vec![Edge::reference("a", "b")]);
    }

    #[test]
    fn first_owner_in_path_order_provides_entity_data() {
        let mut a = function("shared", "a.rs");
        a.name = "from_a".to_string();
        let mut b = function("shared", "b.rs");
        b.name = "from_b".to_string();

        let (snapshot, _) = snapshot(vec![
            ("b.rs", contribution(vec![b], vec![])),
            ("a.rs", contribution(vec![a], vec![])),
        ]);

        let id = EntityId::new("shared");
        assert_eq!(snapshot.entity(&id).expect("entity").name, "from_a");
        assert_eq!(
            snapshot.owners(&id),
            vec![Path::new("a.rs"), Path::new("b.rs")]
        );
    }

    #[test]
    fn neighbors_filter_by_propagation_direction() {
        // caller -> callee as a backward reference: changes flow callee => caller
        let (snapshot, _) = snapshot(vec![(
            "a.rs",
            contribution(
                vec![function("caller", "a.rs"), function("callee", "a.rs")],
                vec![Edge::reference("caller", "callee")],
            ),
        )]);
        let callee = EntityId::new("callee");
        let caller = EntityId::new("caller");

        assert_eq!(snapshot.neighbors(&callee, None, Some(Direction::Forward)).len(), 1);
        assert!(snapshot.neighbors(&callee, None, Some(Direction::Backward)).is_empty());
        assert_eq!(snapshot.neighbors(&caller, None, Some(Direction::Backward)).len(), 1);
        assert!(
            snapshot
                .neighbors(&caller, Some(Dimension::DataFlow), None)
                .is_empty()
        );
    }

    #[test]
    fn identical_edges_from_two_files_are_reported_once() {
        let edge = Edge::new("a", "b", Dimension::DataFlow).with_confidence(0.6);
        let (snapshot, _) = snapshot(vec![
            (
                "a.rs",
                contribution(vec![function("a", "a.rs")], vec![edge.clone()]),
            ),
            (
                "b.rs",
                contribution(
                    vec![function("b", "b.rs")],
                    vec![edge.with_confidence(0.9)],
                ),
            ),
        ]);

        let neighbors = snapshot.neighbors(&EntityId::new("a"), None, None);
        assert_eq!(neighbors.len(), 1);
        assert!((neighbors[0].confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(snapshot.edge_count(), 2);
    }

    #[test]
    fn cycles_are_reported_sorted() {
        let (snapshot, _) = snapshot(vec![(
            "a.rs",
            contribution(
                vec![
                    function("x", "a.rs"),
                    function("y", "a.rs"),
                    function("z", "a.rs"),
                ],
                vec![
                    Edge::reference("y", "x"),
                    Edge::reference("x", "y"),
                    Edge::reference("z", "z"),
                ],
            ),
        )]);

        let cycles = snapshot.cycles();
        assert_eq!(
            cycles,
            vec![
                vec![EntityId::new("x"), EntityId::new("y")],
                vec![EntityId::new("z")],
            ]
        );
        assert_eq!(snapshot.stats().cycles, 2);
    }
}
