//! Contract pairing types: families, pairs, mismatches and findings.

use std::collections::BTreeSet;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{Dimension, Edge, EntityId, Side};

/// Key that groups frontend and backend contract entities into one family.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum FamilyKey {
    /// An HTTP route, by normalized path and upper-case method
    Route {
        /// Upper-case HTTP method
        method: String,
        /// Normalized path (`/users/{}`)
        path: String,
    },
    /// A shared shape, by canonical type name
    Shape {
        /// Canonical name after mapping and convention rules
        name: String,
    },
}

impl fmt::Display for FamilyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Route { method, path } => write!(f, "{method} {path}"),
            Self::Shape { name } => write!(f, "shape {name}"),
        }
    }
}

/// Which side's declaration is treated as the reference when naming
/// missing/extra fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    /// Fields the frontend declares and the backend lacks are missing
    #[default]
    Frontend,
    /// Fields the backend declares and the frontend lacks are missing
    Backend,
}

impl Perspective {
    /// The side whose declaration is the reference.
    #[must_use]
    pub fn declared_side(&self) -> Side {
        match self {
            Self::Frontend => Side::Frontend,
            Self::Backend => Side::Backend,
        }
    }
}

/// Kinds of disagreement between the two sides of a contract pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// Declared side has a field the other side lacks
    MissingField,
    /// Other side has a field the declared side lacks
    ExtraField,
    /// Same field, types not equivalent
    TypeMismatch,
    /// Same field, required on one side only
    ValidationMismatch,
    /// Same path, different HTTP method
    RouteMismatch,
    /// Status code known to one side only
    StatusCodeMismatch,
}

impl MismatchKind {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::ExtraField => "extra_field",
            Self::TypeMismatch => "type_mismatch",
            Self::ValidationMismatch => "validation_mismatch",
            Self::RouteMismatch => "route_mismatch",
            Self::StatusCodeMismatch => "status_code_mismatch",
        }
    }

    /// Missing and extra fields can be rolled out additively.
    #[must_use]
    pub fn is_additive(&self) -> bool {
        matches!(self, Self::MissingField | Self::ExtraField)
    }

    /// Type and route disagreements need both sides changed together.
    #[must_use]
    pub fn is_breaking(&self) -> bool {
        matches!(self, Self::TypeMismatch | Self::RouteMismatch)
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One disagreement inside a contract pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Mismatch {
    /// What kind of disagreement
    pub kind: MismatchKind,
    /// Field name, for shape mismatches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// What the frontend declares (`None` when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_detail: Option<String>,
    /// What the backend declares (`None` when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_detail: Option<String>,
}

/// How a pair's two members were matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchBasis {
    /// Same normalized path and method
    RouteKey,
    /// Same normalized path, different method
    RoutePath,
    /// Explicit frontend-to-backend name mapping
    ExplicitMapping,
    /// Identical declared type names
    ExactName,
    /// Names equal after prefix/suffix/case rules
    NamingConvention,
}

/// A matched frontend/backend pair and its disagreements.
///
/// Derived on every query, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContractPair {
    /// Family both members belong to (the backend's key for route-path pairs)
    pub family: FamilyKey,
    /// Frontend member
    pub frontend: EntityId,
    /// Backend member
    pub backend: EntityId,
    /// How the members were matched
    pub basis: MatchBasis,
    /// Certainty that the members really correspond
    pub match_confidence: f64,
    /// Disagreements, empty when the pair is consistent
    pub mismatches: Vec<Mismatch>,
}

impl ContractPair {
    /// `true` if any mismatch was found.
    #[must_use]
    pub fn has_mismatches(&self) -> bool {
        !self.mismatches.is_empty()
    }

    /// Whether `id` is one of the two members.
    #[must_use]
    pub fn involves(&self, id: &EntityId) -> bool {
        &self.frontend == id || &self.backend == id
    }
}

/// Severity of a finding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    /// Possibly intentional (internal-only route)
    Low,
    /// Ambiguity that must be resolved by a human
    High,
}

/// Family-level problems that are not pair mismatches.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Only one side declares the family
    OrphanContract,
    /// More than one backend member claims the family; no pair is formed
    DuplicateRoute,
}

/// A family-level finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    /// What was found
    pub kind: FindingKind,
    /// How serious it is
    pub severity: FindingSeverity,
    /// Affected family
    pub family: FamilyKey,
    /// The only side present, for orphans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    /// Members of the family, sorted
    pub entities: Vec<EntityId>,
    /// Human-readable summary
    pub message: String,
}

/// Result of a consistency check over one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConsistencyReport {
    /// Perspective used for missing/extra classification
    pub perspective: Perspective,
    /// Matched pairs, ordered by family then members
    pub pairs: Vec<ContractPair>,
    /// Orphan and duplicate findings, ordered by family
    pub findings: Vec<Finding>,
}

impl ConsistencyReport {
    /// Fraction of pairs with at least one mismatch (0.0 without pairs).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mismatch_fraction(&self) -> f64 {
        if self.pairs.is_empty() {
            return 0.0;
        }
        let affected = self.pairs.iter().filter(|p| p.has_mismatches()).count();
        affected as f64 / self.pairs.len() as f64
    }

    /// Every mismatch of every pair.
    pub fn mismatches(&self) -> impl Iterator<Item = &Mismatch> {
        self.pairs.iter().flat_map(|p| p.mismatches.iter())
    }

    /// Findings of one kind.
    pub fn findings_of(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    /// Restrict to pairs and findings touching `ids`.
    #[must_use]
    pub fn scoped_to(&self, ids: &BTreeSet<EntityId>) -> Self {
        Self {
            perspective: self.perspective,
            pairs: self
                .pairs
                .iter()
                .filter(|p| ids.contains(&p.frontend) || ids.contains(&p.backend))
                .cloned()
                .collect(),
            findings: self
                .findings
                .iter()
                .filter(|f| f.entities.iter().any(|id| ids.contains(id)))
                .cloned()
                .collect(),
        }
    }

    /// Project pairs into derived `Consistency` edges, one per direction.
    ///
    /// These are an overlay for impact analysis and are never stored.
    #[must_use]
    pub fn consistency_edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .pairs
            .iter()
            .flat_map(|pair| {
                [
                    Edge::new(pair.frontend.clone(), pair.backend.clone(), Dimension::Consistency)
                        .with_confidence(pair.match_confidence),
                    Edge::new(pair.backend.clone(), pair.frontend.clone(), Dimension::Consistency)
                        .with_confidence(pair.match_confidence),
                ]
            })
            .collect();
        crate::store::sort_edges(&mut edges);
        edges
    }
}
