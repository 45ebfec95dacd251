//! Family keys: route path normalization and shape-name correspondence.

use crate::config::NamingRules;
use crate::types::{ContractDecl, ContractInfo, RouteDecl, Side};

use super::types::{FamilyKey, MatchBasis};

/// Placeholder every path parameter is normalized to.
const PARAM: &str = "{}";

/// Normalize a route path so frontend call sites and backend declarations compare equal.
///
/// - `:id`, `{id}`, `[id]`, `<int:id>` and `${expr}` segments become `{}`
/// - scheme and host of absolute URLs, query strings and fragments are dropped
/// - empty segments and trailing slashes are dropped
/// - literal segments are lower-cased
#[must_use]
pub fn normalize_route_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches(['`', '"', '\'']);

    let without_origin = ["https://", "http://"]
        .iter()
        .find_map(|scheme| trimmed.strip_prefix(*scheme))
        .map_or(trimmed, |rest| rest.find('/').map_or("", |i| &rest[i..]));

    let end = without_origin
        .find(['?', '#'])
        .unwrap_or(without_origin.len());

    let segments: Vec<String> = without_origin[..end]
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(normalize_segment)
        .collect();

    format!("/{}", segments.join("/"))
}

fn normalize_segment(segment: &str) -> String {
    let is_param = segment.starts_with(':')
        || (segment.starts_with('{') && segment.ends_with('}'))
        || (segment.starts_with('[') && segment.ends_with(']'))
        || (segment.starts_with('<') && segment.ends_with('>'))
        || segment.contains("${");
    if is_param {
        PARAM.to_string()
    } else {
        segment.to_lowercase()
    }
}

/// Family key of a route declaration.
#[must_use]
pub fn route_key(route: &RouteDecl) -> FamilyKey {
    FamilyKey::Route {
        method: route.method.trim().to_uppercase(),
        path: normalize_route_path(&route.path),
    }
}

/// Reduce a type name by the configured convention rules.
///
/// A prefix is only stripped when what follows starts a new capitalized
/// word (`IUser` loses `I`, `Item` does not). At most one prefix and one
/// suffix are removed, and never the whole name.
#[must_use]
pub fn canonical_shape_name(name: &str, rules: &NamingRules) -> String {
    let mut reduced = name.trim();

    if let Some(rest) = rules.strip_prefixes.iter().find_map(|prefix| {
        reduced
            .strip_prefix(prefix.as_str())
            .filter(|rest| rest.chars().next().is_some_and(char::is_uppercase))
    }) {
        reduced = rest;
    }

    if let Some(rest) = rules.strip_suffixes.iter().find_map(|suffix| {
        reduced
            .strip_suffix(suffix.as_str())
            .filter(|rest| !rest.is_empty())
    }) {
        reduced = rest;
    }

    if rules.case_insensitive {
        reduced.to_lowercase()
    } else {
        reduced.to_string()
    }
}

/// Family key of a shape declaration and how a frontend member reached it.
///
/// Backend names are only reduced by convention. Frontend names go through
/// the explicit mapping table first.
#[must_use]
pub fn shape_key(side: Side, name: &str, rules: &NamingRules) -> (FamilyKey, Option<MatchBasis>) {
    let mapped = match side {
        Side::Frontend => rules.mappings.get(name.trim()),
        Side::Backend => None,
    };
    match mapped {
        Some(backend_name) => (
            FamilyKey::Shape {
                name: canonical_shape_name(backend_name, rules),
            },
            Some(MatchBasis::ExplicitMapping),
        ),
        None => (
            FamilyKey::Shape {
                name: canonical_shape_name(name, rules),
            },
            None,
        ),
    }
}

/// Family key of any contract descriptor.
#[must_use]
pub fn family_key(contract: &ContractInfo, rules: &NamingRules) -> (FamilyKey, Option<MatchBasis>) {
    match &contract.decl {
        ContractDecl::Route(route) => (route_key(route), Some(MatchBasis::RouteKey)),
        ContractDecl::Shape { name } => shape_key(contract.side, name, rules),
    }
}
