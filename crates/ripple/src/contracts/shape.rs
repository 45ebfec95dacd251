//! Shape and route metadata comparison.

use std::collections::{BTreeSet, HashMap};

use crate::types::{RouteDecl, ShapeField, Side};

use super::types::{Mismatch, MismatchKind, Perspective};

/// Configurable table of interchangeable type names.
///
/// Names compare equal when identical or listed in the same group.
#[derive(Debug, Clone, Default)]
pub struct TypeEquivalence {
    group_of: HashMap<String, usize>,
}

impl TypeEquivalence {
    /// Build the table from validated groups.
    #[must_use]
    pub fn from_groups(groups: &[Vec<String>]) -> Self {
        let mut group_of = HashMap::new();
        for (index, group) in groups.iter().enumerate() {
            for name in group {
                group_of.insert(name.trim().to_string(), index);
            }
        }
        Self { group_of }
    }

    /// Whether two declared types are interchangeable.
    #[must_use]
    pub fn equivalent(&self, a: &str, b: &str) -> bool {
        let (a, b) = (a.trim(), b.trim());
        if a == b {
            return true;
        }
        match (self.group_of.get(a), self.group_of.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

fn describe(field: &ShapeField) -> String {
    let presence = if field.required { "required" } else { "optional" };
    format!("{}: {} ({presence})", field.name, field.field_type)
}

fn mismatch(kind: MismatchKind, field: &str) -> Mismatch {
    Mismatch {
        kind,
        field: Some(field.to_string()),
        frontend_detail: None,
        backend_detail: None,
    }
}

/// Compare a frontend shape with a backend shape.
///
/// Fields of the declared side come first, in declaration order, followed by
/// fields only the other side has. Missing and extra are decided relative to
/// `perspective`, so swapping perspective turns every `MissingField` into an
/// `ExtraField` and back.
#[must_use]
pub fn compare_shapes(
    frontend: &[ShapeField],
    backend: &[ShapeField],
    equivalence: &TypeEquivalence,
    perspective: Perspective,
) -> Vec<Mismatch> {
    let (declared, other) = match perspective.declared_side() {
        Side::Frontend => (frontend, backend),
        Side::Backend => (backend, frontend),
    };
    let declared_side = perspective.declared_side();

    // Attach a detail string to the side it came from.
    let with_details = |mut m: Mismatch, d: Option<&ShapeField>, o: Option<&ShapeField>| {
        let (fe, be) = match declared_side {
            Side::Frontend => (d, o),
            Side::Backend => (o, d),
        };
        m.frontend_detail = fe.map(describe);
        m.backend_detail = be.map(describe);
        m
    };

    let other_by_name: HashMap<&str, &ShapeField> =
        other.iter().map(|f| (f.name.as_str(), f)).collect();
    let declared_names: BTreeSet<&str> = declared.iter().map(|f| f.name.as_str()).collect();

    let mut mismatches = Vec::new();
    for field in declared {
        match other_by_name.get(field.name.as_str()) {
            None => mismatches.push(with_details(
                mismatch(MismatchKind::MissingField, &field.name),
                Some(field),
                None,
            )),
            Some(counterpart) => {
                if !equivalence.equivalent(&field.field_type, &counterpart.field_type) {
                    mismatches.push(with_details(
                        mismatch(MismatchKind::TypeMismatch, &field.name),
                        Some(field),
                        Some(counterpart),
                    ));
                }
                if field.required != counterpart.required {
                    mismatches.push(with_details(
                        mismatch(MismatchKind::ValidationMismatch, &field.name),
                        Some(field),
                        Some(counterpart),
                    ));
                }
            }
        }
    }

    for field in other {
        if !declared_names.contains(field.name.as_str()) {
            mismatches.push(with_details(
                mismatch(MismatchKind::ExtraField, &field.name),
                None,
                Some(field),
            ));
        }
    }

    mismatches
}

/// One `StatusCodeMismatch` per code known to only one side.
///
/// Only compared when both sides declare codes; a side that declares none
/// makes no claim.
#[must_use]
pub fn compare_status_codes(frontend: &RouteDecl, backend: &RouteDecl) -> Vec<Mismatch> {
    if frontend.status_codes.is_empty() || backend.status_codes.is_empty() {
        return Vec::new();
    }
    let fe: BTreeSet<u16> = frontend.status_codes.iter().copied().collect();
    let be: BTreeSet<u16> = backend.status_codes.iter().copied().collect();

    fe.symmetric_difference(&be)
        .map(|code| Mismatch {
            kind: MismatchKind::StatusCodeMismatch,
            field: None,
            frontend_detail: fe.contains(code).then(|| format!("handles {code}")),
            backend_detail: be.contains(code).then(|| format!("declares {code}")),
        })
        .collect()
}

/// A `RouteMismatch` for two routes on the same path with different methods.
#[must_use]
pub fn route_mismatch(frontend: &RouteDecl, backend: &RouteDecl) -> Mismatch {
    Mismatch {
        kind: MismatchKind::RouteMismatch,
        field: None,
        frontend_detail: Some(format!("{} {}", frontend.method, frontend.path)),
        backend_detail: Some(format!("{} {}", backend.method, backend.path)),
    }
}
