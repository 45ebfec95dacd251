//! Integration tests for change-plan ordering and strategy classification.

mod common;

use common::{
    function, shape, source, update_user_dto, user_input, user_mapping_config, user_workspace,
};
use ripple::{
    AnalysisConfig, CancellationToken, Change, ChangeKind, Edge, Entity, ImpactRequest, PlanStage,
    Ripple, Side, SourceFile, Strategy, Traversal,
};

fn ripple_with(config: AnalysisConfig, files: &[SourceFile]) -> Ripple {
    let ripple = Ripple::new(config).expect("ripple");
    let stats = ripple.scan(files, &CancellationToken::new()).expect("scan");
    assert!(stats.is_clean(), "{stats:?}");
    ripple
}

fn plan_for(ripple: &Ripple, request: &ImpactRequest) -> ripple::ChangePlan {
    let impact = ripple
        .analyze_impact(request, &CancellationToken::new())
        .expect("impact");
    ripple.plan(&impact).expect("plan")
}

/// `pairs` frontend/backend shape pairs, the first `mismatched` of them
/// disagreeing on one field, all referencing a shared `core:Schema` type.
fn shared_schema_workspace(pairs: usize, mismatched: usize) -> Vec<SourceFile> {
    let mut entities: Vec<Entity> = vec![function("core:Schema", "core/schema.ts")];
    let mut edges = Vec::new();
    for n in 0..pairs {
        let name = format!("Model{n}");
        let mut fe_fields = vec![("id", "number", true)];
        if n < mismatched {
            fe_fields.push(("label", "string", false));
        }
        entities.push(shape(&format!("fe:{name}"), Side::Frontend, &name, &fe_fields, "web/models.ts"));
        entities.push(shape(
            &format!("be:{name}"),
            Side::Backend,
            &name,
            &[("id", "number", true)],
            "api/Models.cs",
        ));
        edges.push(Edge::reference(format!("fe:{name}"), "core:Schema"));
        edges.push(Edge::reference(format!("be:{name}"), "core:Schema"));
    }
    vec![source("extract/models.json", entities, edges)]
}

// -- Classification --

#[test]
fn small_clean_change_is_full_sync() {
    let ripple = ripple_with(
        AnalysisConfig::default(),
        &[source(
            "extract/lib.json",
            vec![function("caller", "a.ts"), function("callee", "b.ts")],
            vec![Edge::reference("caller", "callee")],
        )],
    );

    let plan = plan_for(
        &ripple,
        &ImpactRequest::new(vec![Change::new("callee", ChangeKind::Modified)]),
    );

    assert_eq!(plan.strategy, Strategy::FullSync);
    assert_eq!(plan.rationale.impacted, 1);
    assert_eq!(plan.rationale.mismatches, 0);
    assert_eq!(plan.steps.len(), 1);
}

#[test]
fn pervasive_mismatches_across_fifty_entities_flag_a_refactor() {
    let ripple = ripple_with(AnalysisConfig::default(), &shared_schema_workspace(25, 20));

    let plan = plan_for(
        &ripple,
        &ImpactRequest::new(vec![Change::new("core:Schema", ChangeKind::Modified)]),
    );

    assert_eq!(plan.strategy, Strategy::RefactorFlagged);
    assert_eq!(plan.rationale.impacted, 50);
    assert_eq!(plan.rationale.pairs, 25);
    assert_eq!(plan.rationale.mismatched_pairs, 20);
    assert!((plan.rationale.mismatch_fraction - 0.8).abs() < f64::EPSILON);
}

#[test]
fn pervasive_mismatches_alone_flag_a_refactor() {
    let mut config = AnalysisConfig::default();
    config.plan.max_impacted_entities = 1_000;
    let ripple = ripple_with(config, &shared_schema_workspace(25, 20));

    let plan = plan_for(
        &ripple,
        &ImpactRequest::new(vec![Change::new("core:Schema", ChangeKind::Modified)]),
    );

    assert_eq!(plan.strategy, Strategy::RefactorFlagged);
    assert!(plan.rationale.reason.contains("20 of 25"));
}

#[test]
fn added_frontend_field_rolls_out_progressively() {
    let ripple = ripple_with(
        user_mapping_config(),
        &[source(
            "extract/types.json",
            vec![user_input(&[("phone", "string", true)]), update_user_dto()],
            vec![],
        )],
    );

    let plan = plan_for(
        &ripple,
        &ImpactRequest::new(vec![Change::new("fe:UserInput", ChangeKind::Modified)])
            .with_contract_links(true),
    );

    assert_eq!(plan.strategy, Strategy::ProgressiveCompatibility);
    assert!(plan.rationale.additive_only);
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].stage, PlanStage::Contract);
    assert_eq!(plan.steps[0].id.as_str(), "be:UpdateUserDTO");
}

#[test]
fn removing_a_contract_is_not_progressive() {
    let ripple = ripple_with(
        user_mapping_config(),
        &[source(
            "extract/types.json",
            vec![user_input(&[("phone", "string", true)]), update_user_dto()],
            vec![],
        )],
    );

    let plan = plan_for(
        &ripple,
        &ImpactRequest::new(vec![Change::new("fe:UserInput", ChangeKind::Removed)]),
    );

    assert_eq!(plan.rationale.removals, 1);
    assert_ne!(plan.strategy, Strategy::ProgressiveCompatibility);
}

// -- Ordering --

#[test]
fn steps_run_contracts_then_data_flow_then_references_then_tests() {
    let ripple = ripple_with(user_mapping_config(), &user_workspace());

    let plan = plan_for(
        &ripple,
        &ImpactRequest::new(vec![Change::new("be:UpdateUserDTO", ChangeKind::Modified)])
            .with_contract_links(true),
    );

    assert_eq!(
        plan.stages(),
        vec![
            PlanStage::Contract,
            PlanStage::DataFlow,
            PlanStage::Reference,
            PlanStage::Test
        ]
    );
    assert!(plan
        .steps
        .windows(2)
        .all(|pair| (pair[0].stage, pair[0].layer) <= (pair[1].stage, pair[1].layer)));

    let contract: Vec<&str> = plan.stage(PlanStage::Contract).map(|s| s.id.as_str()).collect();
    assert_eq!(contract, vec!["fe:UserInput", "fe:PUT /users/:id"]);
    let tests: Vec<&str> = plan.stage(PlanStage::Test).map(|s| s.id.as_str()).collect();
    assert_eq!(tests, vec!["test:profile saves user"]);
}

#[test]
fn plan_carries_only_the_consistency_it_touches() {
    let ripple = ripple_with(user_mapping_config(), &user_workspace());

    let plan = plan_for(
        &ripple,
        &ImpactRequest::new(vec![Change::new("be:UserRepository.Save", ChangeKind::Modified)])
            .with_traversal(Traversal::Outgoing),
    );

    assert_eq!(plan.steps.len(), 1);
    assert!(plan.consistency.pairs.is_empty());
    assert_eq!(plan.strategy, Strategy::FullSync);
}
