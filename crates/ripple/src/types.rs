//! Entity/edge model shared by extractors, the graph store and every analysis.
//!
//! - **Entities**: `Entity` (a function, type, route, config key, test or data sink)
//! - **Relations**: `Edge` (typed by `Dimension`, scored by confidence)
//! - **Changes**: `Change` (an entity id plus `ChangeKind`, input to impact analysis)
//!
//! ## Design Decisions
//!
//! | Decision | Choice | Rationale |
//! |----------|--------|-----------|
//! | Entity id | String newtype | Stable across re-scans, not a memory address |
//! | Language | String | Extractors are external; the core never enumerates languages |
//! | Shape | Ordered `Vec` | Field order is part of what extractors report |
//! | Contract membership | Optional descriptor | Only routes and shared shapes take part |

use std::fmt;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ModelViolation;

// ============================================================================
// Identifiers
// ============================================================================

/// Globally unique, stable entity identifier.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an extractor-provided id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a stable id from the facts that identify an entity.
    ///
    /// The same `(language, file, kind, name)` always yields the same id, so
    /// re-scanning unchanged source reproduces the graph exactly.
    #[must_use]
    pub fn derive(language: &str, file: &str, kind: EntityKind, name: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [language, file, kind.as_str(), name] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest = format!("{:x}", hasher.finalize());
        Self(format!("{}:{}", kind.as_str(), &digest[..16]))
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Kinds of entities tracked by the graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Function or method
    Function,
    /// Type, interface, DTO or schema declaration
    Type,
    /// HTTP route declaration (backend) or call site (frontend)
    ApiRoute,
    /// Configuration key declaration
    ConfigKey,
    /// Test case
    Test,
    /// Serialization or persistence sink
    DataSink,
}

impl EntityKind {
    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Type => "type",
            Self::ApiRoute => "api_route",
            Self::ConfigKey => "config_key",
            Self::Test => "test",
            Self::DataSink => "data_sink",
        }
    }

    /// Parse the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "type" => Some(Self::Type),
            "api_route" => Some(Self::ApiRoute),
            "config_key" => Some(Self::ConfigKey),
            "test" => Some(Self::Test),
            "data_sink" => Some(Self::DataSink),
            _ => None,
        }
    }

    /// Only types and routes carry a field shape.
    #[must_use]
    pub fn has_shape(&self) -> bool {
        matches!(self, Self::Type | Self::ApiRoute)
    }
}

/// The kind of dependency an edge represents.
///
/// Declaration order is the canonical ordering used for deterministic output.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Interface contract (route/type declaration to its users)
    Contract,
    /// Data flowing into a sink or consumer, usually heuristic
    DataFlow,
    /// Exact symbol reference (call, import, type use)
    Reference,
    /// Configuration key usage
    Config,
    /// Frontend/backend agreement link, usually heuristic
    Consistency,
}

impl Dimension {
    /// All dimensions in canonical order.
    pub const ALL: [Dimension; 5] = [
        Self::Contract,
        Self::DataFlow,
        Self::Reference,
        Self::Config,
        Self::Consistency,
    ];

    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::DataFlow => "data_flow",
            Self::Reference => "reference",
            Self::Config => "config",
            Self::Consistency => "consistency",
        }
    }

    /// Parse the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contract" => Some(Self::Contract),
            "data_flow" | "dataflow" => Some(Self::DataFlow),
            "reference" => Some(Self::Reference),
            "config" => Some(Self::Config),
            "consistency" => Some(Self::Consistency),
            _ => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orientation of a dependency relative to an edge's `from`/`to`.
///
/// - `Forward`: a change to `from` propagates to `to` (producer feeds consumer).
/// - `Backward`: a change to `to` propagates to `from` (caller depends on callee).
///
/// When used as a query filter, `Forward` selects edges along which a change to
/// the queried node propagates outward ("who will I affect") and `Backward`
/// selects edges that carry a change into it ("what do I depend on").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Propagates from `from` to `to`
    Forward,
    /// Propagates from `to` to `from`
    Backward,
}

impl Direction {
    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }

    /// Parse the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "forward" => Some(Self::Forward),
            "backward" => Some(Self::Backward),
            _ => None,
        }
    }
}

/// How a changed entity was changed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Newly introduced
    Added,
    /// Deleted
    Removed,
    /// Edited in place
    Modified,
}

impl ChangeKind {
    /// Parse a user-supplied change kind.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "added" | "add" => Some(Self::Added),
            "removed" | "remove" | "deleted" => Some(Self::Removed),
            "modified" | "modify" | "changed" => Some(Self::Modified),
            _ => None,
        }
    }
}

// ============================================================================
// Locations and shapes
// ============================================================================

/// A start/end position span in a file.
///
/// Positions are 1-indexed to match editor conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Span {
    /// Starting line (1-indexed)
    pub start_line: u32,
    /// Starting column (1-indexed)
    pub start_column: u32,
    /// Ending line (1-indexed, inclusive)
    pub end_line: u32,
    /// Ending column (1-indexed, exclusive)
    pub end_column: u32,
}

impl Span {
    /// Create a new span with validation.
    ///
    /// Returns `None` if the end position is before the start position.
    #[must_use]
    pub fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Option<Self> {
        if end_line < start_line || (end_line == start_line && end_column < start_column) {
            return None;
        }
        Some(Self {
            start_line,
            start_column,
            end_line,
            end_column,
        })
    }
}

/// Where an entity is declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Location {
    /// Source file, relative to the workspace root
    pub file: PathBuf,
    /// Declaration range, when the extractor knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

/// Where a shape field was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Type or interface declaration
    #[default]
    Declaration,
    /// Validation schema (zod, class-validator, pydantic, ...)
    Validation,
    /// Inferred from usage, e.g. object literal keys
    Inferred,
}

/// One field of a type or route body shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ShapeField {
    /// Field name as written on the wire
    pub name: String,
    /// Declared type name
    pub field_type: String,
    /// Whether the field must be present
    pub required: bool,
    /// Where the field was learned from
    #[serde(default)]
    pub source: FieldSource,
}

impl ShapeField {
    /// A declared field.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            required,
            source: FieldSource::Declaration,
        }
    }

    /// Override where the field was learned from.
    #[must_use]
    pub fn with_source(mut self, source: FieldSource) -> Self {
        self.source = source;
        self
    }
}

// ============================================================================
// Contract membership
// ============================================================================

/// Which side of the frontend/backend boundary an entity lives on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Client code: API calls, request types
    Frontend,
    /// Server code: route handlers, DTOs
    Backend,
}

impl Side {
    /// The opposite side.
    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Self::Frontend => Self::Backend,
            Self::Backend => Self::Frontend,
        }
    }
}

/// Route metadata carried by `ApiRoute` contract entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct RouteDecl {
    /// HTTP method (`GET`, `POST`, ...)
    pub method: String,
    /// Route path as written (`/users/:id`, `/users/{id}`, `` `/users/${id}` ``)
    pub path: String,
    /// Declared response codes (backend) or handled codes (frontend)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_codes: Vec<u16>,
}

/// What contract family an entity declares membership of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ContractDecl {
    /// An HTTP route
    Route(RouteDecl),
    /// A shared shape, keyed by its declared type name
    Shape {
        /// Declared type name (`UserInput`, `UpdateUserDTO`)
        name: String,
    },
}

/// Contract membership descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ContractInfo {
    /// Frontend or backend
    pub side: Side,
    /// Route or shape family declaration
    pub decl: ContractDecl,
}

// ============================================================================
// Entities and edges
// ============================================================================

/// A uniquely identified code, contract or config artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Entity {
    /// Stable id
    pub id: EntityId,
    /// What the entity is
    pub kind: EntityKind,
    /// Human-readable qualified name
    pub name: String,
    /// Source language as reported by the extractor
    pub language: String,
    /// Declaration site
    pub location: Location,
    /// Field shape, only for types and routes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<ShapeField>>,
    /// Contract family membership
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<ContractInfo>,
}

impl Entity {
    /// Create an entity declared in `file`.
    #[must_use]
    pub fn new(
        id: impl Into<EntityId>,
        kind: EntityKind,
        name: impl Into<String>,
        language: impl Into<String>,
        file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            language: language.into(),
            location: Location {
                file: file.into(),
                span: None,
            },
            shape: None,
            contract: None,
        }
    }

    /// Attach a declaration span.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.location.span = Some(span);
        self
    }

    /// Attach a field shape.
    #[must_use]
    pub fn with_shape(mut self, shape: Vec<ShapeField>) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Declare contract family membership.
    #[must_use]
    pub fn with_contract(mut self, side: Side, decl: ContractDecl) -> Self {
        self.contract = Some(ContractInfo { side, decl });
        self
    }

    /// `kind/language`, the pair duplicate-id detection compares.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}/{}", self.kind.as_str(), self.language)
    }

    /// Check field-level invariants.
    ///
    /// # Errors
    ///
    /// Returns `ModelViolation::InvalidEntity` describing the first problem found.
    pub fn validate(&self) -> Result<(), ModelViolation> {
        let invalid = |reason: &str| ModelViolation::InvalidEntity {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.as_str().trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if let Some(shape) = &self.shape {
            if !self.kind.has_shape() {
                return Err(invalid("only type and api_route entities carry a shape"));
            }
            let mut seen = std::collections::HashSet::new();
            for field in shape {
                if !seen.insert(field.name.as_str()) {
                    return Err(invalid(&format!("shape declares `{}` twice", field.name)));
                }
            }
        }
        match self.contract.as_ref().map(|c| &c.decl) {
            Some(ContractDecl::Route(_)) if self.kind != EntityKind::ApiRoute => {
                Err(invalid("route contracts are only valid on api_route entities"))
            }
            Some(ContractDecl::Shape { .. }) if self.kind != EntityKind::Type => {
                Err(invalid("shape contracts are only valid on type entities"))
            }
            _ => Ok(()),
        }
    }
}

/// A typed, scored relation between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Edge {
    /// Source endpoint
    pub from: EntityId,
    /// Target endpoint
    pub to: EntityId,
    /// Kind of dependency
    pub dimension: Dimension,
    /// Which way a change propagates
    pub direction: Direction,
    /// Certainty in `[0, 1]`; exact references are always 1.0
    pub confidence: f64,
}

impl Edge {
    /// Create an exact (confidence 1.0) forward edge.
    #[must_use]
    pub fn new(from: impl Into<EntityId>, to: impl Into<EntityId>, dimension: Dimension) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            dimension,
            direction: Direction::Forward,
            confidence: 1.0,
        }
    }

    /// A call/import: `caller` depends on `callee`, so changes flow backward.
    #[must_use]
    pub fn reference(caller: impl Into<EntityId>, callee: impl Into<EntityId>) -> Self {
        Self::new(caller, callee, Dimension::Reference).with_direction(Direction::Backward)
    }

    /// Set the propagation direction.
    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the confidence score.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// The endpoint a change propagates from.
    #[must_use]
    pub fn upstream(&self) -> &EntityId {
        match self.direction {
            Direction::Forward => &self.from,
            Direction::Backward => &self.to,
        }
    }

    /// The endpoint a change propagates to.
    #[must_use]
    pub fn downstream(&self) -> &EntityId {
        match self.direction {
            Direction::Forward => &self.to,
            Direction::Backward => &self.from,
        }
    }

    /// The endpoint opposite to `id`.
    #[must_use]
    pub fn other_end(&self, id: &EntityId) -> &EntityId {
        if &self.from == id { &self.to } else { &self.from }
    }

    /// Key used to order edges deterministically.
    pub(crate) fn sort_key(&self) -> (Dimension, &EntityId, &EntityId, Direction) {
        (self.dimension, &self.from, &self.to, self.direction)
    }

    /// Check field-level invariants.
    ///
    /// # Errors
    ///
    /// Returns `ModelViolation::InvalidEdge` describing the first problem found.
    pub fn validate(&self) -> Result<(), ModelViolation> {
        let invalid = |reason: String| ModelViolation::InvalidEdge {
            from: self.from.clone(),
            to: self.to.clone(),
            reason,
        };

        if self.from.as_str().is_empty() || self.to.as_str().is_empty() {
            return Err(invalid("endpoints must not be empty".to_string()));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(invalid(format!(
                "confidence {} is outside [0, 1]",
                self.confidence
            )));
        }
        #[allow(clippy::float_cmp)] // exact references are stored as the literal 1.0
        let inexact = self.confidence != 1.0;
        if self.dimension == Dimension::Reference && inexact {
            return Err(invalid(format!(
                "reference edges are exact, got confidence {}",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// One changed entity fed to impact analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct Change {
    /// The changed entity
    pub id: EntityId,
    /// How it changed
    pub kind: ChangeKind,
}

impl Change {
    /// Create a change record.
    #[must_use]
    pub fn new(id: impl Into<EntityId>, kind: ChangeKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    /// Parse `id` or `id:kind` (kind defaults to `modified`).
    ///
    /// Ids may themselves contain `:`, so only a recognised trailing kind is split off.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        if let Some((id, kind)) = spec.rsplit_once(':') {
            if let Some(kind) = ChangeKind::parse(kind) {
                return Self::new(id, kind);
            }
        }
        Self::new(spec, ChangeKind::Modified)
    }
}
