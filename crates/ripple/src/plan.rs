//! Change plans: impact results ordered into an edit sequence and classified.
//!
//! Steps are grouped into stages that follow the direction changes travel
//! across a stack: contracts first, then data flow, then logic references,
//! then tests. Configuration entities do not form a stage of their own; each
//! is placed directly after the entity that reads it.
//!
//! The strategy is a pure function of counts and thresholds, recorded in a
//! [`PlanRationale`] so callers can see why a plan was classified as it was.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::Completion;
use crate::config::{AnalysisConfig, PlanThresholds};
use crate::contracts::{ConsistencyReport, FindingKind};
use crate::impact::{ImpactResult, ImpactedEntity};
use crate::types::{Change, ChangeKind, Dimension, EntityId, EntityKind};

/// Ordered stages of a change plan.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PlanStage {
    /// API contracts and their frontend/backend counterparts
    Contract,
    /// Data flowing between layers
    DataFlow,
    /// Code referencing the changed entities
    Reference,
    /// Tests covering the above
    Test,
}

impl PlanStage {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::DataFlow => "data_flow",
            Self::Reference => "reference",
            Self::Test => "test",
        }
    }

    fn of(entity: &ImpactedEntity) -> Self {
        if entity.kind == Some(EntityKind::Test) {
            return Self::Test;
        }
        match entity.dimension {
            Dimension::Contract | Dimension::Consistency => Self::Contract,
            Dimension::DataFlow => Self::DataFlow,
            Dimension::Reference | Dimension::Config => Self::Reference,
        }
    }
}

impl std::fmt::Display for PlanStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the change should be rolled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Small, non-breaking: synchronize every layer now
    FullSync,
    /// Additive only: roll out with optional fields first
    ProgressiveCompatibility,
    /// Too large or too inconsistent: extract shared contract definitions
    RefactorFlagged,
}

impl Strategy {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullSync => "full_sync",
            Self::ProgressiveCompatibility => "progressive_compatibility",
            Self::RefactorFlagged => "refactor_flagged",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entity to revisit, in plan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanStep {
    /// Stage the step belongs to
    pub stage: PlanStage,
    /// Entity to revisit
    pub id: EntityId,
    /// Its kind, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    /// Dimension it was reached through
    pub dimension: Dimension,
    /// Distance from the change
    pub layer: usize,
    /// Entity it was reached from
    pub via: EntityId,
}

impl PlanStep {
    fn from_impact(entity: &ImpactedEntity, stage: PlanStage) -> Self {
        Self {
            stage,
            id: entity.id.clone(),
            kind: entity.kind,
            dimension: entity.dimension,
            layer: entity.layer,
            via: entity.via.clone(),
        }
    }
}

/// The counts a strategy was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanRationale {
    /// Number of impacted entities
    pub impacted: usize,
    /// Threshold above which impact is too large
    pub max_impacted_entities: usize,
    /// Contract pairs touching the change
    pub pairs: usize,
    /// Of those, pairs with at least one mismatch
    pub mismatched_pairs: usize,
    /// `mismatched_pairs / pairs` (0.0 without pairs)
    pub mismatch_fraction: f64,
    /// Fraction above which mismatches are pervasive
    pub pervasive_mismatch_fraction: f64,
    /// Total mismatches
    pub mismatches: usize,
    /// Type and route mismatches
    pub breaking_mismatches: usize,
    /// Whether every mismatch is a missing or extra field
    pub additive_only: bool,
    /// Changes that remove an entity
    pub removals: usize,
    /// Duplicate route findings touching the change
    pub duplicate_routes: usize,
    /// Human-readable reason for the strategy
    pub reason: String,
}

/// An ordered, classified change plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChangePlan {
    /// Changes the plan was made for
    pub changes: Vec<Change>,
    /// Rollout strategy
    pub strategy: Strategy,
    /// Steps in the order they should be taken
    pub steps: Vec<PlanStep>,
    /// Why the strategy was chosen
    pub rationale: PlanRationale,
    /// Contract pairs and findings touching the change
    pub consistency: ConsistencyReport,
    /// Whether the underlying impact analysis finished
    pub completion: Completion,
}

impl ChangePlan {
    /// Steps of one stage, in order.
    pub fn stage(&self, stage: PlanStage) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(move |step| step.stage == stage)
    }

    /// Stages that have at least one step, in plan order.
    #[must_use]
    pub fn stages(&self) -> Vec<PlanStage> {
        let stages: BTreeSet<PlanStage> = self.steps.iter().map(|step| step.stage).collect();
        stages.into_iter().collect()
    }
}

/// Classify a change from its counts.
///
/// Rules are applied in order:
/// 1. too many impacted entities, or pervasive mismatches: refactor
/// 2. only additive mismatches and nothing removed: progressive rollout
/// 3. no type or route mismatch: synchronize everything now
/// 4. otherwise: refactor
#[must_use]
pub fn classify(
    impacted: usize,
    changes: &[Change],
    consistency: &ConsistencyReport,
    thresholds: &PlanThresholds,
) -> (Strategy, PlanRationale) {
    let mismatched_pairs = consistency
        .pairs
        .iter()
        .filter(|pair| pair.has_mismatches())
        .count();
    let mismatch_fraction = consistency.mismatch_fraction();
    let mismatches = consistency.mismatches().count();
    let breaking_mismatches = consistency
        .mismatches()
        .filter(|m| m.kind.is_breaking())
        .count();
    let additive_only = consistency.mismatches().all(|m| m.kind.is_additive());
    let removals = changes
        .iter()
        .filter(|change| change.kind == ChangeKind::Removed)
        .count();

    let (strategy, reason) = if impacted > thresholds.max_impacted_entities {
        (
            Strategy::RefactorFlagged,
            format!(
                "{impacted} impacted entities exceed the limit of {}",
                thresholds.max_impacted_entities
            ),
        )
    } else if mismatch_fraction > thresholds.pervasive_mismatch_fraction {
        (
            Strategy::RefactorFlagged,
            format!(
                "{mismatched_pairs} of {} contract pairs disagree",
                consistency.pairs.len()
            ),
        )
    } else if mismatches > 0 && additive_only && removals == 0 {
        (
            Strategy::ProgressiveCompatibility,
            format!("{mismatches} mismatches are all missing or extra fields"),
        )
    } else if breaking_mismatches == 0 {
        (
            Strategy::FullSync,
            "no type or route mismatches".to_string(),
        )
    } else {
        (
            Strategy::RefactorFlagged,
            format!("{breaking_mismatches} type or route mismatches"),
        )
    };

    let rationale = PlanRationale {
        impacted,
        max_impacted_entities: thresholds.max_impacted_entities,
        pairs: consistency.pairs.len(),
        mismatched_pairs,
        mismatch_fraction,
        pervasive_mismatch_fraction: thresholds.pervasive_mismatch_fraction,
        mismatches,
        breaking_mismatches,
        additive_only,
        removals,
        duplicate_routes: consistency.findings_of(FindingKind::DuplicateRoute).count(),
        reason,
    };
    (strategy, rationale)
}

/// Turns impact results into change plans.
#[derive(Debug, Clone)]
pub struct PlanGenerator {
    thresholds: PlanThresholds,
}

impl PlanGenerator {
    /// Create a generator with the configured thresholds.
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            thresholds: config.plan,
        }
    }

    /// Build the plan for `impact`.
    ///
    /// `consistency` may cover the whole graph; only pairs and findings
    /// touching a changed or impacted entity are considered.
    #[must_use]
    pub fn generate(&self, impact: &ImpactResult, consistency: &ConsistencyReport) -> ChangePlan {
        let mut scope = impact.impacted_ids();
        scope.extend(impact.changes.iter().map(|change| change.id.clone()));
        let consistency = consistency.scoped_to(&scope);

        let (strategy, rationale) = classify(
            impact.impacted_count(),
            &impact.changes,
            &consistency,
            &self.thresholds,
        );
        let steps = order_steps(impact);

        debug!(
            strategy = strategy.as_str(),
            steps = steps.len(),
            pairs = rationale.pairs,
            "Generated change plan"
        );
        ChangePlan {
            changes: impact.changes.clone(),
            strategy,
            steps,
            rationale,
            consistency,
            completion: impact.completion,
        }
    }
}

/// Order impacted entities by stage, then layer, then id, with configuration
/// entities placed after their readers.
fn order_steps(impact: &ImpactResult) -> Vec<PlanStep> {
    let roots: BTreeSet<&EntityId> = impact.changes.iter().map(|change| &change.id).collect();

    let mut steps: Vec<PlanStep> = Vec::new();
    let mut config: Vec<&ImpactedEntity> = Vec::new();
    for entity in impact.by_dimension.values().flatten() {
        let stage = PlanStage::of(entity);
        if entity.dimension == Dimension::Config
            && stage != PlanStage::Test
            && !roots.contains(&entity.via)
        {
            config.push(entity);
        } else {
            steps.push(PlanStep::from_impact(entity, stage));
        }
    }
    steps.sort_by(|a, b| (a.stage, a.layer, &a.id).cmp(&(b.stage, b.layer, &b.id)));

    // A reader is always discovered one layer before what it reads.
    config.sort_by(|a, b| (a.layer, &a.id).cmp(&(b.layer, &b.id)));
    for entity in config {
        match steps.iter().position(|step| step.id == entity.via) {
            Some(reader) => {
                let stage = steps[reader].stage;
                let mut at = reader + 1;
                while steps
                    .get(at)
                    .is_some_and(|s| s.dimension == Dimension::Config && s.via == entity.via)
                {
                    at += 1;
                }
                steps.insert(at, PlanStep::from_impact(entity, stage));
            }
            None => steps.push(PlanStep::from_impact(entity, PlanStage::Reference)),
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ContractPair, FamilyKey, MatchBasis, Mismatch, MismatchKind};

    fn impacted(id: &str, dimension: Dimension, layer: usize, via: &str) -> ImpactedEntity {
        ImpactedEntity {
            id: EntityId::new(id),
            kind: Some(EntityKind::Function),
            dimension,
            layer,
            via: EntityId::new(via),
            origin: EntityId::new("root"),
            chain: Vec::new(),
        }
    }

    fn impact(entities: Vec<ImpactedEntity>) -> ImpactResult {
        let mut result = ImpactResult {
            changes: vec![Change::new("root", ChangeKind::Modified)],
            ..ImpactResult::default()
        };
        for entity in entities {
            result
                .by_dimension
                .entry(entity.dimension)
                .or_default()
                .push(entity);
        }
        result
    }

    fn pair(n: usize, mismatches: Vec<Mismatch>) -> ContractPair {
        ContractPair {
            family: FamilyKey::Shape {
                name: format!("Shape{n}"),
            },
            frontend: EntityId::new(format!("fe{n}")),
            backend: EntityId::new(format!("be{n}")),
            basis: MatchBasis::ExactName,
            match_confidence: 1.0,
            mismatches,
        }
    }

    fn mismatch(kind: MismatchKind) -> Mismatch {
        Mismatch {
            kind,
            field: Some("field".to_string()),
            frontend_detail: None,
            backend_detail: None,
        }
    }

    fn report(pairs: Vec<ContractPair>) -> ConsistencyReport {
        ConsistencyReport {
            pairs,
            ..ConsistencyReport::default()
        }
    }

    fn modified() -> Vec<Change> {
        vec![Change::new("root", ChangeKind::Modified)]
    }

    #[test]
    fn small_clean_change_is_full_sync() {
        let (strategy, rationale) =
            classify(2, &modified(), &report(vec![]), &PlanThresholds::default());
        assert_eq!(strategy, Strategy::FullSync);
        assert_eq!(rationale.impacted, 2);
    }

    #[test]
    fn additive_mismatches_are_progressive() {
        let pairs = vec![
            pair(0, vec![mismatch(MismatchKind::MissingField)]),
            pair(1, vec![]),
        ];
        let (strategy, _) = classify(3, &modified(), &report(pairs), &PlanThresholds::default());
        assert_eq!(strategy, Strategy::ProgressiveCompatibility);
    }

    #[test]
    fn removals_are_not_progressive() {
        let pairs = vec![
            pair(0, vec![mismatch(MismatchKind::ExtraField)]),
            pair(1, vec![]),
        ];
        let changes = vec![Change::new("root", ChangeKind::Removed)];
        let (strategy, rationale) =
            classify(3, &changes, &report(pairs), &PlanThresholds::default());
        assert_eq!(strategy, Strategy::FullSync);
        assert_eq!(rationale.removals, 1);
    }

    #[test]
    fn breaking_mismatch_is_flagged() {
        let pairs = vec![
            pair(0, vec![mismatch(MismatchKind::TypeMismatch)]),
            pair(1, vec![]),
            pair(2, vec![]),
        ];
        let (strategy, rationale) =
            classify(3, &modified(), &report(pairs), &PlanThresholds::default());
        assert_eq!(strategy, Strategy::RefactorFlagged);
        assert_eq!(rationale.breaking_mismatches, 1);
    }

    #[test]
    fn large_pervasive_change_is_flagged() {
        let pairs = (0..10)
            .map(|n| {
                if n < 8 {
                    pair(n, vec![mismatch(MismatchKind::MissingField)])
                } else {
                    pair(n, vec![])
                }
            })
            .collect();
        let (strategy, rationale) =
            classify(50, &modified(), &report(pairs), &PlanThresholds::default());
        assert_eq!(strategy, Strategy::RefactorFlagged);
        assert!((rationale.mismatch_fraction - 0.8).abs() < 1e-9);
    }

    #[test]
    fn stages_follow_precedence() {
        let mut test = impacted("t", Dimension::Reference, 1, "root");
        test.kind = Some(EntityKind::Test);
        let plan = PlanGenerator::new(&AnalysisConfig::default()).generate(
            &impact(vec![
                impacted("r", Dimension::Reference, 1, "root"),
                test,
                impacted("d", Dimension::DataFlow, 2, "r"),
                impacted("c", Dimension::Contract, 1, "root"),
            ]),
            &ConsistencyReport::default(),
        );

        let order: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["c", "d", "r", "t"]);
        assert_eq!(
            plan.stages(),
            vec![
                PlanStage::Contract,
                PlanStage::DataFlow,
                PlanStage::Reference,
                PlanStage::Test
            ]
        );
    }

    #[test]
    fn config_follows_its_reader() {
        let plan = PlanGenerator::new(&AnalysisConfig::default()).generate(
            &impact(vec![
                impacted("a", Dimension::Reference, 1, "root"),
                impacted("b", Dimension::Reference, 1, "root"),
                impacted("a.timeout", Dimension::Config, 2, "a"),
                impacted("a.retries", Dimension::Config, 2, "a"),
            ]),
            &ConsistencyReport::default(),
        );

        let order: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["a", "a.retries", "a.timeout", "b"]);
    }

    #[test]
    fn consistency_is_scoped_to_the_change() {
        let plan = PlanGenerator::new(&AnalysisConfig::default()).generate(
            &impact(vec![impacted("fe0", Dimension::Consistency, 1, "root")]),
            &report(vec![
                pair(0, vec![]),
                pair(1, vec![mismatch(MismatchKind::TypeMismatch)]),
            ]),
        );
        assert_eq!(plan.consistency.pairs.len(), 1);
        assert_eq!(plan.strategy, Strategy::FullSync);
    }
}
