//! Shared fixtures for ripple integration tests.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::sync::Arc;

use ripple::{
    AnalysisConfig, ContractDecl, Edge, Entity, EntityKind, Extraction, GraphSnapshot, GraphStore,
    RouteDecl, ScanResult, ShapeField, Side, SourceFile,
};

/// A function entity declared in `file`.
pub fn function(id: &str, file: &str) -> Entity {
    Entity::new(id, EntityKind::Function, id, "typescript", file)
}

/// A test entity declared in `file`.
pub fn test_case(id: &str, file: &str) -> Entity {
    Entity::new(id, EntityKind::Test, id, "typescript", file)
}

/// A shape contract entity.
pub fn shape(id: &str, side: Side, name: &str, fields: &[(&str, &str, bool)], file: &str) -> Entity {
    let language = match side {
        Side::Frontend => "typescript",
        Side::Backend => "csharp",
    };
    Entity::new(id, EntityKind::Type, name, language, file)
        .with_shape(
            fields
                .iter()
                .map(|(name, ty, required)| ShapeField::new(*name, *ty, *required))
                .collect(),
        )
        .with_contract(
            side,
            ContractDecl::Shape {
                name: name.to_string(),
            },
        )
}

/// A route contract entity.
pub fn route(id: &str, side: Side, method: &str, path: &str, codes: &[u16], file: &str) -> Entity {
    Entity::new(id, EntityKind::ApiRoute, format!("{method} {path}"), "http", file).with_contract(
        side,
        ContractDecl::Route(RouteDecl {
            method: method.to_string(),
            path: path.to_string(),
            status_codes: codes.to_vec(),
        }),
    )
}

/// `UserInput` as the frontend declares it.
pub fn user_input(extra: &[(&str, &str, bool)]) -> Entity {
    let mut fields = vec![("name", "string", true), ("email", "string", true)];
    fields.extend_from_slice(extra);
    shape(
        "fe:UserInput",
        Side::Frontend,
        "UserInput",
        &fields,
        "web/types.ts",
    )
}

/// `UpdateUserDTO` as the backend declares it.
pub fn update_user_dto() -> Entity {
    shape(
        "be:UpdateUserDTO",
        Side::Backend,
        "UpdateUserDTO",
        &[("name", "String", true), ("email", "String", true)],
        "api/Dtos.cs",
    )
}

/// Configuration mapping `UserInput` to `UpdateUserDTO`.
pub fn user_mapping_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config
        .naming
        .mappings
        .insert("UserInput".to_string(), "UpdateUserDTO".to_string());
    config
}

/// Serialize an extraction as a JSON document the `JsonExtractor` reads.
pub fn document(entities: Vec<Entity>, edges: Vec<Edge>) -> String {
    serde_json::to_string(&Extraction {
        entities,
        edges,
        diagnostics: Vec::new(),
    })
    .expect("failed to serialize extraction")
}

/// A JSON source file holding an extraction document.
pub fn source(path: &str, entities: Vec<Entity>, edges: Vec<Edge>) -> SourceFile {
    SourceFile::new(path, document(entities, edges))
}

/// A small full-stack workspace: a backend route handler, its DTO, a
/// frontend call site and form type, the functions using them, and a test.
pub fn user_workspace() -> Vec<SourceFile> {
    vec![
        source(
            "extract/api.json",
            vec![
                route("be:PUT /users/{id}", Side::Backend, "PUT", "/users/{id}", &[200, 404], "api/UsersController.cs"),
                update_user_dto(),
                function("be:UsersController.Update", "api/UsersController.cs"),
                function("be:UserRepository.Save", "api/UserRepository.cs"),
            ],
            vec![
                Edge::reference("be:UsersController.Update", "be:UserRepository.Save"),
                Edge::reference("be:UsersController.Update", "be:UpdateUserDTO"),
            ],
        ),
        source(
            "extract/web.json",
            vec![
                route("fe:PUT /users/:id", Side::Frontend, "put", "/users/:id", &[200, 404], "web/api.ts"),
                user_input(&[]),
                function("fe:saveUser", "web/api.ts"),
                function("fe:ProfileForm", "web/ProfileForm.tsx"),
            ],
            vec![
                Edge::reference("fe:saveUser", "fe:UserInput"),
                Edge::reference("fe:ProfileForm", "fe:saveUser"),
                Edge::new("fe:saveUser", "be:PUT /users/{id}", ripple::Dimension::DataFlow)
                    .with_confidence(0.9),
            ],
        ),
        source(
            "extract/tests.json",
            vec![test_case("test:profile saves user", "web/ProfileForm.test.tsx")],
            vec![Edge::reference("test:profile saves user", "fe:ProfileForm")],
        ),
    ]
}

/// Merge one file's entities and edges at `version`, asserting it is accepted.
pub fn merge(store: &GraphStore, path: &str, version: u64, entities: Vec<Entity>, edges: Vec<Edge>) {
    let outcome = store
        .merge(ScanResult::new(path, version, entities, edges))
        .expect("merge failed");
    assert!(
        outcome.rejected.is_empty(),
        "unexpected rejection: {:?}",
        outcome.rejected
    );
}

/// A snapshot of a single file's contribution.
pub fn snapshot_of(entities: Vec<Entity>, edges: Vec<Edge>) -> Arc<GraphSnapshot> {
    let store = GraphStore::new();
    merge(&store, "src/all.json", 1, entities, edges);
    store.snapshot().expect("snapshot failed")
}
