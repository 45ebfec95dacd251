//! Impact analysis: which entities a set of changes reaches.
//!
//! Traversal is a layered breadth-first search over one immutable
//! [`GraphSnapshot`]. Each entity is reported once, at the first layer it is
//! reached, together with the chain of edges leading back to the change that
//! reached it. Edges are visited in canonical order, so the result depends
//! only on the snapshot and the request.
//!
//! Cancellation is checked before every layer; a cancelled analysis keeps the
//! layers already completed.

mod types;

pub use types::{ImpactRequest, ImpactResult, ImpactedEntity, Traversal};

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace, warn};

use crate::cancel::{CancellationToken, Completion};
use crate::config::{AnalysisConfig, ConfidenceThresholds};
use crate::store::{GraphSnapshot, sort_edges};
use crate::types::{Direction, Edge, EntityId};

/// A node of the current BFS frontier.
struct Frontier {
    id: EntityId,
    origin: EntityId,
    chain: Vec<Edge>,
}

/// Breadth-first impact traversal over one snapshot.
pub struct ImpactAnalyzer<'a> {
    snapshot: &'a GraphSnapshot,
    thresholds: ConfidenceThresholds,
    overlay: HashMap<EntityId, Vec<Edge>>,
    on_layer: Option<&'a dyn Fn(usize)>,
}

impl std::fmt::Debug for ImpactAnalyzer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpactAnalyzer")
            .field("generation", &self.snapshot.generation())
            .field("thresholds", &self.thresholds)
            .field("overlay", &self.overlay.len())
            .finish_non_exhaustive()
    }
}

impl<'a> ImpactAnalyzer<'a> {
    /// Analyze against `snapshot` with the configured confidence thresholds.
    #[must_use]
    pub fn new(snapshot: &'a GraphSnapshot, config: &AnalysisConfig) -> Self {
        Self {
            snapshot,
            thresholds: config.confidence,
            overlay: HashMap::new(),
            on_layer: None,
        }
    }

    /// Call `observer` with the layer number each time a layer completes.
    #[must_use]
    pub fn on_layer(mut self, observer: &'a dyn Fn(usize)) -> Self {
        self.on_layer = Some(observer);
        self
    }

    /// Also follow derived edges that are not stored in the snapshot.
    ///
    /// Used for contract links projected from a consistency report.
    #[must_use]
    pub fn with_overlay(mut self, edges: Vec<Edge>) -> Self {
        for edge in edges {
            if edge.from != edge.to {
                self.overlay
                    .entry(edge.to.clone())
                    .or_default()
                    .push(edge.clone());
            }
            self.overlay.entry(edge.from.clone()).or_default().push(edge);
        }
        self
    }

    /// Run the traversal.
    ///
    /// Changed ids that are not in the snapshot are listed in
    /// [`ImpactResult::unknown`] and otherwise ignored.
    #[must_use]
    pub fn analyze(&self, request: &ImpactRequest, cancel: &CancellationToken) -> ImpactResult {
        let mut changes = request.changes.clone();
        changes.sort();
        changes.dedup_by(|later, earlier| later.id == earlier.id);

        let mut result = ImpactResult {
            generation: self.snapshot.generation(),
            ..ImpactResult::default()
        };
        let mut visited: HashSet<EntityId> = HashSet::new();
        let mut frontier: Vec<Frontier> = Vec::new();

        for change in &changes {
            if self.snapshot.contains(&change.id) {
                visited.insert(change.id.clone());
                frontier.push(Frontier {
                    id: change.id.clone(),
                    origin: change.id.clone(),
                    chain: Vec::new(),
                });
            } else {
                result.unknown.push(change.id.clone());
            }
        }
        result.changes = changes;

        let mut layer = 0;
        while !frontier.is_empty() {
            if request.max_depth.is_some_and(|max| layer >= max) {
                break;
            }
            if cancel.is_cancelled() {
                warn!(layer, "Impact analysis cancelled");
                result.completion = Completion::Cancelled;
                break;
            }
            layer += 1;

            let mut next = Vec::new();
            for node in &frontier {
                for edge in self.edges_from(&node.id, request) {
                    let target = match request.traversal {
                        Traversal::Outgoing => edge.downstream(),
                        Traversal::Incoming => edge.upstream(),
                        Traversal::Both => edge.other_end(&node.id),
                    };
                    if !visited.insert(target.clone()) {
                        continue;
                    }

                    let mut chain = node.chain.clone();
                    chain.push(edge.clone());
                    result
                        .by_dimension
                        .entry(edge.dimension)
                        .or_default()
                        .push(ImpactedEntity {
                            id: target.clone(),
                            kind: self.snapshot.entity(target).map(|e| e.kind),
                            dimension: edge.dimension,
                            layer,
                            via: node.id.clone(),
                            origin: node.origin.clone(),
                            chain: chain.clone(),
                        });
                    next.push(Frontier {
                        id: target.clone(),
                        origin: node.origin.clone(),
                        chain,
                    });
                }
            }

            trace!(layer, reached = next.len(), "Impact layer done");
            if !next.is_empty() {
                result.max_layer = layer;
            }
            frontier = next;
            if let Some(observer) = self.on_layer {
                observer(layer);
            }
        }

        debug!(
            changes = result.changes.len(),
            impacted = result.impacted_count(),
            unknown = result.unknown.len(),
            max_layer = result.max_layer,
            "Impact analysis finished"
        );
        result
    }

    /// Followable edges touching `id`, in canonical order.
    fn edges_from(&self, id: &EntityId, request: &ImpactRequest) -> Vec<Edge> {
        let direction = match request.traversal {
            Traversal::Both => None,
            Traversal::Outgoing => Some(Direction::Forward),
            Traversal::Incoming => Some(Direction::Backward),
        };

        let mut edges = self.snapshot.neighbors(id, None, direction);
        if let Some(derived) = self.overlay.get(id) {
            edges.extend(
                derived
                    .iter()
                    .filter(|edge| match direction {
                        None => true,
                        Some(Direction::Forward) => edge.upstream() == id,
                        Some(Direction::Backward) => edge.downstream() == id,
                    })
                    .cloned(),
            );
            sort_edges(&mut edges);
        }

        edges.retain(|edge| {
            request.follows(edge.dimension)
                && edge.confidence >= self.thresholds.for_dimension(edge.dimension)
        });
        edges
    }
}
