//! Impact analysis request and result types.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cancel::Completion;
use crate::types::{Change, Dimension, Edge, EntityId, EntityKind};

/// Which way edges are followed from a changed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Traversal {
    /// Along and against propagation
    #[default]
    Both,
    /// Only where a change propagates to ("who will I affect")
    Outgoing,
    /// Only where a change could come from ("what do I depend on")
    Incoming,
}

impl Traversal {
    /// Parse a user-supplied traversal name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "both" => Some(Self::Both),
            "outgoing" | "out" | "forward" => Some(Self::Outgoing),
            "incoming" | "in" | "backward" => Some(Self::Incoming),
            _ => None,
        }
    }
}

/// Input to impact analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImpactRequest {
    /// Changed entities
    pub changes: Vec<Change>,
    /// Dimensions to follow (`None` follows all)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<BTreeSet<Dimension>>,
    /// Maximum BFS layer (`None` is bounded only by the visited set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    /// Edge orientation to follow
    #[serde(default)]
    pub traversal: Traversal,
    /// Also follow derived frontend/backend contract links
    #[serde(default)]
    pub include_contract_links: bool,
}

impl ImpactRequest {
    /// Analyze `changes` across every dimension.
    #[must_use]
    pub fn new(changes: Vec<Change>) -> Self {
        Self {
            changes,
            ..Self::default()
        }
    }

    /// Only follow the given dimensions.
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: impl IntoIterator<Item = Dimension>) -> Self {
        self.dimensions = Some(dimensions.into_iter().collect());
        self
    }

    /// Stop after `depth` layers.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Follow edges in one orientation only.
    #[must_use]
    pub fn with_traversal(mut self, traversal: Traversal) -> Self {
        self.traversal = traversal;
        self
    }

    /// Follow derived contract links as `Consistency` edges.
    #[must_use]
    pub fn with_contract_links(mut self, include: bool) -> Self {
        self.include_contract_links = include;
        self
    }

    /// Whether edges of `dimension` are followed.
    #[must_use]
    pub fn follows(&self, dimension: Dimension) -> bool {
        self.dimensions
            .as_ref()
            .is_none_or(|dimensions| dimensions.contains(&dimension))
    }
}

/// One entity reached from the changed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImpactedEntity {
    /// The impacted entity
    pub id: EntityId,
    /// Its kind, when the entity is in the graph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    /// Dimension of the edge it was reached through
    pub dimension: Dimension,
    /// BFS layer (1 = direct neighbor of a changed entity)
    pub layer: usize,
    /// Entity it was reached from
    pub via: EntityId,
    /// Changed entity the chain starts at
    pub origin: EntityId,
    /// Edges from `origin` to this entity, in traversal order
    pub chain: Vec<Edge>,
}

/// Output of impact analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImpactResult {
    /// Changes analyzed, sorted by id
    pub changes: Vec<Change>,
    /// Impacted entities per dimension, ordered by layer then discovery
    pub by_dimension: BTreeMap<Dimension, Vec<ImpactedEntity>>,
    /// Changed ids not present in the graph
    pub unknown: Vec<EntityId>,
    /// Deepest layer reached
    pub max_layer: usize,
    /// Whether the traversal finished
    pub completion: Completion,
    /// Generation of the snapshot that was traversed
    #[serde(default)]
    pub generation: u64,
}

impl ImpactResult {
    /// Total number of impacted entities.
    #[must_use]
    pub fn impacted_count(&self) -> usize {
        self.by_dimension.values().map(Vec::len).sum()
    }

    /// Impacted entities in one dimension.
    #[must_use]
    pub fn in_dimension(&self, dimension: Dimension) -> &[ImpactedEntity] {
        self.by_dimension
            .get(&dimension)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every impacted entity, ordered by layer, then dimension, then discovery.
    #[must_use]
    pub fn all(&self) -> Vec<&ImpactedEntity> {
        let mut all: Vec<&ImpactedEntity> = self.by_dimension.values().flatten().collect();
        all.sort_by_key(|entity| entity.layer);
        all
    }

    /// Look up an impacted entity.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&ImpactedEntity> {
        self.by_dimension.values().flatten().find(|e| &e.id == id)
    }

    /// Ids of every impacted entity, sorted.
    #[must_use]
    pub fn impacted_ids(&self) -> BTreeSet<EntityId> {
        self.by_dimension
            .values()
            .flatten()
            .map(|e| e.id.clone())
            .collect()
    }
}
