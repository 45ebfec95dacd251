//! Property tests for merge determinism, incremental replacement, traversal
//! layering and perspective symmetry.

mod common;

use std::collections::{BTreeSet, HashMap, VecDeque};

use common::{function, shape};
use proptest::prelude::*;
use ripple::contracts::MismatchKind;
use ripple::{
    AnalysisConfig, CancellationToken, Change, ChangeKind, ConsistencyChecker, Edge, EntityId,
    GraphStore, ImpactAnalyzer, ImpactRequest, Perspective, ScanResult, Side,
};

const FILES: usize = 3;

fn node(i: usize) -> String {
    format!("n{i:02}")
}

fn file_of(i: usize) -> String {
    format!("src/f{}.json", i % FILES)
}

/// One scan per file: each node lives in file `i % FILES` and each edge in
/// the file of its caller.
fn scans(nodes: usize, edges: &[(usize, usize)]) -> Vec<ScanResult> {
    (0..FILES)
        .map(|f| {
            let path = format!("src/f{f}.json");
            let entities = (0..nodes)
                .filter(|i| file_of(*i) == path)
                .map(|i| function(&node(i), &path))
                .collect();
            let edges = edges
                .iter()
                .filter(|(from, _)| file_of(*from) == path)
                .map(|(from, to)| Edge::reference(node(*from), node(*to)))
                .collect();
            ScanResult::new(path, 1, entities, edges)
        })
        .collect()
}

fn fields(names: &BTreeSet<String>) -> Vec<(&str, &str, bool)> {
    names.iter().map(|n| (n.as_str(), "string", true)).collect()
}

fn graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2usize..16).prop_flat_map(|n| (Just(n), prop::collection::vec((0..n, 0..n), 0..40)))
}

/// Undirected shortest distances from `root` over `edges`.
fn distances(root: usize, edges: &[(usize, usize)]) -> HashMap<usize, usize> {
    let mut adjacent: HashMap<usize, Vec<usize>> = HashMap::new();
    for (a, b) in edges {
        adjacent.entry(*a).or_default().push(*b);
        adjacent.entry(*b).or_default().push(*a);
    }
    let mut dist = HashMap::from([(root, 0)]);
    let mut queue = VecDeque::from([root]);
    while let Some(current) = queue.pop_front() {
        let d = dist[&current];
        for next in adjacent.get(&current).into_iter().flatten() {
            if !dist.contains_key(next) {
                dist.insert(*next, d + 1);
                queue.push_back(*next);
            }
        }
    }
    dist
}

proptest! {
    #[test]
    fn merge_order_does_not_change_the_graph((nodes, edges) in graph(), root in 0usize..16) {
        let forward = GraphStore::new();
        forward.merge_batch(scans(nodes, &edges)).expect("merge");

        let mut reversed = scans(nodes, &edges);
        reversed.reverse();
        let batch = GraphStore::new();
        batch.merge_batch(reversed).expect("merge");

        let a = forward.snapshot().expect("snapshot");
        let b = batch.snapshot().expect("snapshot");
        prop_assert_eq!(a.edges(), b.edges());
        prop_assert_eq!(
            a.entities().map(|e| e.id.clone()).collect::<Vec<_>>(),
            b.entities().map(|e| e.id.clone()).collect::<Vec<_>>()
        );

        let request = ImpactRequest::new(vec![Change::new(node(root % nodes), ChangeKind::Modified)]);
        let config = AnalysisConfig::default();
        let cancel = CancellationToken::new();
        let first = ImpactAnalyzer::new(&a, &config).analyze(&request, &cancel);
        let second = ImpactAnalyzer::new(&b, &config).analyze(&request, &cancel);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn remerge_changes_exactly_the_symmetric_difference(
        old in prop::collection::btree_set(0usize..20, 0..12),
        new in prop::collection::btree_set(0usize..20, 0..12),
    ) {
        let store = GraphStore::new();
        let entities = |set: &BTreeSet<usize>| {
            set.iter().map(|i| function(&node(*i), "a.ts")).collect::<Vec<_>>()
        };
        store
            .merge_batch(vec![
                ScanResult::new("a.json", 1, entities(&old), vec![]),
                ScanResult::new("b.json", 1, vec![function("stable", "b.ts")], vec![]),
            ])
            .expect("merge");
        let before: BTreeSet<EntityId> =
            store.snapshot().expect("snapshot").entities().map(|e| e.id.clone()).collect();

        let outcome = store
            .merge(ScanResult::new("a.json", 2, entities(&new), vec![]))
            .expect("merge");
        prop_assert!(outcome.rejected.is_empty());
        let after: BTreeSet<EntityId> =
            store.snapshot().expect("snapshot").entities().map(|e| e.id.clone()).collect();

        let added: BTreeSet<EntityId> = after.difference(&before).cloned().collect();
        let removed: BTreeSet<EntityId> = before.difference(&after).cloned().collect();
        let expected_added: BTreeSet<EntityId> =
            new.difference(&old).map(|i| EntityId::new(node(*i))).collect();
        let expected_removed: BTreeSet<EntityId> =
            old.difference(&new).map(|i| EntityId::new(node(*i))).collect();
        prop_assert_eq!(added, expected_added);
        prop_assert_eq!(removed, expected_removed);
        prop_assert!(after.contains(&EntityId::new("stable")));
    }

    #[test]
    fn impact_layers_are_shortest_distances((nodes, edges) in graph(), root in 0usize..16) {
        let root = root % nodes;
        let store = GraphStore::new();
        let outcome = store.merge_batch(scans(nodes, &edges)).expect("merge");
        prop_assert!(outcome.rejected.is_empty());
        let snapshot = store.snapshot().expect("snapshot");

        let result = ImpactAnalyzer::new(&snapshot, &AnalysisConfig::default()).analyze(
            &ImpactRequest::new(vec![Change::new(node(root), ChangeKind::Modified)]),
            &CancellationToken::new(),
        );

        let expected = distances(root, &edges);
        prop_assert_eq!(result.impacted_count(), expected.len() - 1);
        for (i, distance) in expected {
            if i == root {
                continue;
            }
            let impacted = result.get(&EntityId::new(node(i)));
            prop_assert!(impacted.is_some(), "{} not reached", node(i));
            if let Some(impacted) = impacted {
                prop_assert_eq!(impacted.layer, distance);
                prop_assert_eq!(impacted.chain.len(), distance);
            }
        }
    }

    #[test]
    fn perspectives_mirror_missing_and_extra(
        frontend in prop::collection::btree_set("[a-f]", 0..6),
        backend in prop::collection::btree_set("[a-f]", 0..6),
    ) {
        let store = GraphStore::new();
        store
            .merge(ScanResult::new(
                "types.json",
                1,
                vec![
                    shape("fe:Thing", Side::Frontend, "Thing", &fields(&frontend), "web/thing.ts"),
                    shape("be:Thing", Side::Backend, "Thing", &fields(&backend), "api/Thing.cs"),
                ],
                vec![],
            ))
            .expect("merge");
        let snapshot = store.snapshot().expect("snapshot");
        let config = AnalysisConfig::default();

        let count = |perspective: Perspective, kind: MismatchKind| {
            ConsistencyChecker::new(&config)
                .with_perspective(perspective)
                .check(&snapshot)
                .mismatches()
                .filter(|m| m.kind == kind)
                .count()
        };

        let frontend_only = frontend.difference(&backend).count();
        let backend_only = backend.difference(&frontend).count();
        prop_assert_eq!(count(Perspective::Frontend, MismatchKind::MissingField), frontend_only);
        prop_assert_eq!(count(Perspective::Frontend, MismatchKind::ExtraField), backend_only);
        prop_assert_eq!(count(Perspective::Backend, MismatchKind::MissingField), backend_only);
        prop_assert_eq!(count(Perspective::Backend, MismatchKind::ExtraField), frontend_only);
    }
}
