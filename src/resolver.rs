//! # Class ancestry resolution
//!
//! Post-order depth-first walk of a node's class graph: every class's own
//! parent classes are fully resolved (and merged) before the class itself
//! is merged on top, and a single `seen` set shared across the whole walk
//! ensures a class reachable through two different paths contributes its
//! parameters exactly once, at its first (most-ancestral) encounter — a
//! direct port of `original_source/reclass/core.py::_recurse_entity`'s
//! algorithm.
//!
//! Relative class names (`.sibling`, `..cousin.child`) are resolved
//! against the referencing class's own dotted namespace before lookup.

use crate::entity::{merge_applications, RawEntity, ResolvedAncestry};
use crate::error::{NamingError, NotFoundError};
use crate::settings::Settings;
use crate::storage::Storage;
use std::collections::HashSet;

/// Resolve `classname`'s own ancestry (used both for a node's top-level
/// `classes:` list and recursively for each class's own `classes:` list),
/// merging into `acc` in post-order. `storage_name` labels errors.
#[allow(clippy::too_many_arguments)]
pub fn recurse_entity(
    storage: &dyn Storage,
    storage_name: &str,
    environment: &str,
    classname: &str,
    context: Option<&str>,
    referencing_nodename: &str,
    seen: &mut HashSet<String>,
    acc: &mut ResolvedAncestry,
    settings: &Settings,
) -> Result<(), crate::error::ReclassError> {
    let resolved_name = resolve_relative(classname, context)?;
    if seen.contains(&resolved_name) {
        return Ok(());
    }
    seen.insert(resolved_name.clone());

    let doc = match storage.get_class(environment, &resolved_name)? {
        Some(doc) => doc,
        None => {
            if settings.should_ignore_missing_class(&resolved_name) {
                return Ok(());
            }
            return Err(NotFoundError::Class {
                storage: storage_name.to_string(),
                classname: resolved_name,
                uri: environment.to_string(),
                nodename: referencing_nodename.to_string(),
            }
            .into());
        }
    };

    if let Some(bad) = resolved_name.chars().find(|c| c.is_whitespace()) {
        return Err(NamingError::InvalidClassname {
            invalid_character: bad,
            classname: resolved_name.clone(),
        }
        .into());
    }

    let raw = RawEntity::from_document(&doc.value);

    for parent in &raw.classes {
        recurse_entity(
            storage,
            storage_name,
            environment,
            parent,
            Some(resolved_name.as_str()),
            referencing_nodename,
            seen,
            acc,
            settings,
        )?;
    }

    acc.classes.push(resolved_name);
    merge_applications(&mut acc.applications, &raw.applications, settings);
    acc.parameters
        .merge(&raw.parameters, settings)
        .map_err(crate::error::ReclassError::from)?;
    acc.exports
        .merge(&raw.exports, settings)
        .map_err(crate::error::ReclassError::from)?;
    acc.adopt_environment(&raw.environment);
    Ok(())
}

/// Expand a leading `.`/`..` run into an absolute dotted class name,
/// relative to the namespace of `context`, the class currently being
/// resolved (`None` at the node's own top level, where relative names are
/// not meaningful and are returned unchanged). Fails if the climb would
/// walk above the root of `context`'s own namespace, per spec §4.5 ("Invalid
/// relative resolution (climbing above the root) is a parse-time error").
fn resolve_relative(classname: &str, context: Option<&str>) -> Result<String, NamingError> {
    let dots = classname.chars().take_while(|c| *c == '.').count();
    if dots == 0 {
        return Ok(classname.to_string());
    }
    let Some(context) = context else {
        return Ok(classname.trim_start_matches('.').to_string());
    };
    let mut base: Vec<&str> = context.split('.').collect();
    // `.` means "my own parent's namespace" (one level up from `context`);
    // each additional `.` climbs one level further.
    let climb = dots;
    if climb > base.len() {
        return Err(NamingError::RelativeClassAboveRoot {
            classname: classname.to_string(),
            context: context.to_string(),
        });
    }
    for _ in 0..climb {
        base.pop();
    }
    let rest = &classname[dots..];
    Ok(if rest.is_empty() {
        base.join(".")
    } else if base.is_empty() {
        rest.to_string()
    } else {
        format!("{}.{}", base.join("."), rest)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_class_name_is_unchanged() {
        assert_eq!(
            resolve_relative("role.web", Some("site.alpha")).unwrap(),
            "role.web"
        );
    }

    #[test]
    fn single_dot_climbs_one_level() {
        assert_eq!(
            resolve_relative(".sibling", Some("site.alpha")).unwrap(),
            "site.sibling"
        );
    }

    #[test]
    fn double_dot_climbs_two_levels() {
        assert_eq!(
            resolve_relative("..cousin.child", Some("site.alpha.leaf")).unwrap(),
            "site.cousin.child"
        );
    }

    #[test]
    fn climbing_above_the_root_namespace_is_an_error() {
        let err = resolve_relative("..x", Some("a")).unwrap_err();
        assert!(matches!(err, NamingError::RelativeClassAboveRoot { .. }));
    }

    #[test]
    fn climbing_to_exactly_the_root_namespace_is_not_an_error() {
        assert_eq!(resolve_relative(".x", Some("a")).unwrap(), "x");
    }
}
