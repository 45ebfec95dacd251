//! Frontend/backend contract matching and consistency checking.
//!
//! Contract entities (routes and shared shapes) are grouped into families by
//! a [`FamilyKey`]. Within a family, each frontend member is paired with the
//! backend member and the two declarations are compared.
//!
//! ## Module Structure
//!
//! - `types` - Families, pairs, mismatches, findings and the report
//! - `family` - Route path normalization and shape-name correspondence
//! - `shape` - Type equivalence and shape/status-code comparison
//!
//! Ambiguity is never resolved silently: a family claimed by more than one
//! backend member yields a `DuplicateRoute` finding instead of a pair.

mod family;
mod shape;
mod types;

pub use family::{canonical_shape_name, normalize_route_path, route_key};
pub use shape::{TypeEquivalence, compare_shapes, compare_status_codes};
pub use types::{
    ConsistencyReport, ContractPair, FamilyKey, Finding, FindingKind, FindingSeverity, MatchBasis,
    Mismatch, MismatchKind, Perspective,
};

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::{AnalysisConfig, NamingRules};
use crate::store::GraphSnapshot;
use crate::types::{ContractDecl, Entity, EntityId, RouteDecl, Side};

/// A contract entity placed in its family.
#[derive(Debug, Clone, Copy)]
struct Member<'a> {
    entity: &'a Entity,
    basis: Option<MatchBasis>,
}

impl Member<'_> {
    fn route(&self) -> Option<&RouteDecl> {
        match self.entity.contract.as_ref().map(|c| &c.decl) {
            Some(ContractDecl::Route(route)) => Some(route),
            _ => None,
        }
    }

    fn shape_name(&self) -> Option<&str> {
        match self.entity.contract.as_ref().map(|c| &c.decl) {
            Some(ContractDecl::Shape { name }) => Some(name.trim()),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Family<'a> {
    frontend: Vec<Member<'a>>,
    backend: Vec<Member<'a>>,
}

impl<'a> Family<'a> {
    fn members(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .frontend
            .iter()
            .chain(&self.backend)
            .map(|m| m.entity.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn single_backend(&self) -> Option<Member<'a>> {
        match self.backend.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}

/// Pairs contract entities and reports where the two sides disagree.
#[derive(Debug, Clone)]
pub struct ConsistencyChecker {
    equivalence: TypeEquivalence,
    naming: NamingRules,
    perspective: Perspective,
}

impl ConsistencyChecker {
    /// Create a checker from analysis configuration.
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            equivalence: TypeEquivalence::from_groups(&config.type_equivalence),
            naming: config.naming.clone(),
            perspective: Perspective::default(),
        }
    }

    /// Classify missing/extra fields from the given side.
    #[must_use]
    pub fn with_perspective(mut self, perspective: Perspective) -> Self {
        self.perspective = perspective;
        self
    }

    /// Check every contract family in `snapshot`.
    #[must_use]
    pub fn check(&self, snapshot: &GraphSnapshot) -> ConsistencyReport {
        let mut families: BTreeMap<FamilyKey, Family<'_>> = BTreeMap::new();
        for entity in snapshot.entities() {
            let Some(contract) = &entity.contract else {
                continue;
            };
            let (key, basis) = family::family_key(contract, &self.naming);
            let family = families.entry(key).or_default();
            let member = Member { entity, basis };
            match contract.side {
                Side::Frontend => family.frontend.push(member),
                Side::Backend => family.backend.push(member),
            }
        }

        let mut report = ConsistencyReport {
            perspective: self.perspective,
            ..ConsistencyReport::default()
        };
        let mut orphans: Vec<(&FamilyKey, &Family<'_>)> = Vec::new();

        for (key, family) in &families {
            if family.backend.len() > 1 {
                report.findings.push(Finding {
                    kind: FindingKind::DuplicateRoute,
                    severity: FindingSeverity::High,
                    family: key.clone(),
                    side: None,
                    entities: family.members(),
                    message: format!(
                        "{} backend declarations claim {key}; no pair formed",
                        family.backend.len()
                    ),
                });
                continue;
            }
            match (family.frontend.is_empty(), family.single_backend()) {
                (false, Some(backend)) => {
                    for frontend in &family.frontend {
                        report.pairs.push(self.pair(key, *frontend, backend, None));
                    }
                }
                _ => orphans.push((key, family)),
            }
        }

        let paired_by_path = self.pair_by_path(&orphans, &mut report);
        for (key, family) in orphans {
            if paired_by_path.contains(&key) {
                continue;
            }
            let side = if family.frontend.is_empty() {
                Side::Backend
            } else {
                Side::Frontend
            };
            let other = match side {
                Side::Frontend => "backend",
                Side::Backend => "frontend",
            };
            report.findings.push(Finding {
                kind: FindingKind::OrphanContract,
                severity: FindingSeverity::Low,
                family: key.clone(),
                side: Some(side),
                entities: family.members(),
                message: format!("{key} has no {other} counterpart"),
            });
        }

        report.pairs.sort_by(|a, b| {
            (&a.family, &a.frontend, &a.backend).cmp(&(&b.family, &b.frontend, &b.backend))
        });
        report
            .findings
            .sort_by(|a, b| (&a.family, a.kind).cmp(&(&b.family, b.kind)));

        debug!(
            pairs = report.pairs.len(),
            findings = report.findings.len(),
            mismatched = report.pairs.iter().filter(|p| p.has_mismatches()).count(),
            "Checked contract consistency"
        );
        report
    }

    /// Pair single-sided route families that share a normalized path.
    ///
    /// Only unambiguous cases pair: one frontend-only family and one
    /// backend-only family on the path. Returns the families consumed.
    fn pair_by_path<'k>(
        &self,
        orphans: &[(&'k FamilyKey, &Family<'_>)],
        report: &mut ConsistencyReport,
    ) -> Vec<&'k FamilyKey> {
        // path -> (frontend-only orphan indexes, backend-only orphan indexes)
        let mut by_path: BTreeMap<&str, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
        for (index, (key, family)) in orphans.iter().enumerate() {
            if let FamilyKey::Route { path, .. } = key {
                let sides = by_path.entry(path.as_str()).or_default();
                if family.frontend.is_empty() {
                    sides.1.push(index);
                } else {
                    sides.0.push(index);
                }
            }
        }

        let mut consumed = Vec::new();
        for (frontend_only, backend_only) in by_path.values() {
            let ([fe], [be]) = (frontend_only.as_slice(), backend_only.as_slice()) else {
                continue;
            };
            let (fe_key, fe_family) = orphans[*fe];
            let (be_key, be_family) = orphans[*be];
            let Some(backend) = be_family.single_backend() else {
                continue;
            };
            for frontend in &fe_family.frontend {
                report.pairs.push(self.pair(
                    be_key,
                    *frontend,
                    backend,
                    Some(MatchBasis::RoutePath),
                ));
            }
            consumed.push(fe_key);
            consumed.push(be_key);
        }
        consumed
    }

    fn pair(
        &self,
        key: &FamilyKey,
        frontend: Member<'_>,
        backend: Member<'_>,
        basis_override: Option<MatchBasis>,
    ) -> ContractPair {
        let basis = basis_override.or(frontend.basis).unwrap_or_else(|| {
            if frontend.shape_name() == backend.shape_name() {
                MatchBasis::ExactName
            } else {
                MatchBasis::NamingConvention
            }
        });
        let match_confidence = match basis {
            MatchBasis::NamingConvention => self.naming.convention_confidence,
            _ => 1.0,
        };

        let mut mismatches = Vec::new();
        if let (Some(fe_route), Some(be_route)) = (frontend.route(), backend.route()) {
            if basis == MatchBasis::RoutePath {
                mismatches.push(shape::route_mismatch(fe_route, be_route));
            }
        }
        if let (Some(fe_shape), Some(be_shape)) = (&frontend.entity.shape, &backend.entity.shape) {
            mismatches.extend(compare_shapes(
                fe_shape,
                be_shape,
                &self.equivalence,
                self.perspective,
            ));
        }
        if let (Some(fe_route), Some(be_route)) = (frontend.route(), backend.route()) {
            mismatches.extend(compare_status_codes(fe_route, be_route));
        }

        ContractPair {
            family: key.clone(),
            frontend: frontend.entity.id.clone(),
            backend: backend.entity.id.clone(),
            basis,
            match_confidence,
            mismatches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GraphStore, ScanResult};
    use crate::types::{EntityKind, ShapeField};

    fn route(id: &str, side: Side, method: &str, path: &str, codes: Vec<u16>) -> Entity {
        Entity::new(id, EntityKind::ApiRoute, id, "ts", format!("{id}.ts")).with_contract(
            side,
            ContractDecl::Route(RouteDecl {
                method: method.to_string(),
                path: path.to_string(),
                status_codes: codes,
            }),
        )
    }

    fn shape(id: &str, side: Side, name: &str, fields: Vec<ShapeField>) -> Entity {
        Entity::new(id, EntityKind::Type, name, "ts", format!("{id}.ts"))
            .with_shape(fields)
            .with_contract(
                side,
                ContractDecl::Shape {
                    name: name.to_string(),
                },
            )
    }

    fn snapshot(entities: Vec<Entity>) -> std::sync::Arc<GraphSnapshot> {
        let store = GraphStore::new();
        let scans = entities
            .into_iter()
            .map(|e| ScanResult::new(e.location.file.clone(), 1, vec![e], vec![]))
            .collect();
        let outcome = store.merge_batch(scans).expect("merge");
        assert!(outcome.rejected.is_empty(), "{:?}", outcome.rejected);
        store.snapshot().expect("snapshot")
    }

    fn checker() -> ConsistencyChecker {
        ConsistencyChecker::new(&AnalysisConfig::default())
    }

    #[test]
    fn routes_pair_across_path_syntaxes() {
        let snapshot = snapshot(vec![
            route("fe_get", Side::Frontend, "get", "`/users/${id}`", vec![]),
            route("be_get", Side::Backend, "GET", "/users/:id", vec![]),
        ]);

        let report = checker().check(&snapshot);

        assert_eq!(report.pairs.len(), 1);
        assert_eq!(report.pairs[0].basis, MatchBasis::RouteKey);
        assert!(!report.pairs[0].has_mismatches());
        assert!(report.findings.is_empty());
    }

    #[test]
    fn same_path_different_method_is_a_route_mismatch() {
        let snapshot = snapshot(vec![
            route("fe", Side::Frontend, "PUT", "/users/:id", vec![]),
            route("be", Side::Backend, "PATCH", "/users/{id}", vec![]),
        ]);

        let report = checker().check(&snapshot);

        assert_eq!(report.pairs.len(), 1);
        assert_eq!(report.pairs[0].basis, MatchBasis::RoutePath);
        assert_eq!(report.pairs[0].mismatches.len(), 1);
        assert_eq!(
            report.pairs[0].mismatches[0].kind,
            MismatchKind::RouteMismatch
        );
        assert!(report.findings.is_empty());
    }

    #[test]
    fn duplicate_backend_routes_form_no_pair() {
        let snapshot = snapshot(vec![
            route("fe", Side::Frontend, "GET", "/users", vec![]),
            route("be1", Side::Backend, "GET", "/users", vec![]),
            route("be2", Side::Backend, "GET", "/users/", vec![]),
        ]);

        let report = checker().check(&snapshot);

        assert!(report.pairs.is_empty());
        let duplicates: Vec<_> = report.findings_of(FindingKind::DuplicateRoute).collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].severity, FindingSeverity::High);
        assert_eq!(duplicates[0].entities.len(), 3);
    }

    #[test]
    fn single_sided_families_are_orphans() {
        let snapshot = snapshot(vec![
            route("internal", Side::Backend, "POST", "/internal/reindex", vec![]),
            route("fe", Side::Frontend, "GET", "/health", vec![]),
        ]);

        let report = checker().check(&snapshot);

        assert!(report.pairs.is_empty());
        let orphans: Vec<_> = report.findings_of(FindingKind::OrphanContract).collect();
        assert_eq!(orphans.len(), 2);
        assert!(orphans.iter().all(|f| f.severity == FindingSeverity::Low));
    }

    #[test]
    fn many_frontend_callers_pair_with_one_backend() {
        let snapshot = snapshot(vec![
            route("fe1", Side::Frontend, "GET", "/users", vec![]),
            route("fe2", Side::Frontend, "GET", "/users?active=1", vec![]),
            route("be", Side::Backend, "GET", "/users", vec![]),
        ]);

        let report = checker().check(&snapshot);

        assert_eq!(report.pairs.len(), 2);
        assert_eq!(report.pairs[0].frontend.as_str(), "fe1");
        assert_eq!(report.pairs[1].frontend.as_str(), "fe2");
    }

    #[test]
    fn convention_matches_carry_configured_confidence() {
        let mut config = AnalysisConfig::default();
        config.naming.strip_suffixes = vec!["DTO".to_string()];
        config.naming.convention_confidence = 0.7;
        let fields = || vec![ShapeField::new("name", "string", true)];
        let snapshot = snapshot(vec![
            shape("fe", Side::Frontend, "User", fields()),
            shape("be", Side::Backend, "UserDTO", fields()),
        ]);

        let report = ConsistencyChecker::new(&config).check(&snapshot);

        assert_eq!(report.pairs.len(), 1);
        assert_eq!(report.pairs[0].basis, MatchBasis::NamingConvention);
        assert!((report.pairs[0].match_confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn route_pairs_compare_status_codes_and_bodies() {
        let fe = route("fe", Side::Frontend, "POST", "/users", vec![201, 422])
            .with_shape(vec![ShapeField::new("age", "number", true)]);
        let be = route("be", Side::Backend, "POST", "/users", vec![201])
            .with_shape(vec![ShapeField::new("age", "Integer", true)]);
        let snapshot = snapshot(vec![fe, be]);

        let report = checker().check(&snapshot);

        let kinds: Vec<_> = report.pairs[0].mismatches.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MismatchKind::StatusCodeMismatch]);
    }
}
