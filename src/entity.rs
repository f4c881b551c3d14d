//! # Entity — one class or node document, raw and resolved
//!
//! `RawEntity` is what a single YAML document (one class file or the node
//! file) parses into. `Entity` is the fully resolved node: the flattened
//! class ancestry, deduplicated applications, and merged `parameters`/
//! `exports` trees, built by `resolver`/`core` walking the class DAG.
//!
//! Grounded on `original_source/reclass/datatypes/entity.py` and
//! `core.py::_recurse_entity`'s construction of the per-node entity.

use crate::parameters::Parameters;
use crate::settings::Settings;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct RawEntity {
    pub classes: Vec<String>,
    pub applications: Vec<String>,
    pub parameters: Value,
    pub exports: Value,
    pub environment: Option<String>,
}

impl RawEntity {
    pub fn from_document(doc: &Value) -> RawEntity {
        let map = doc.as_map();
        let get_list = |key: &str| -> Vec<String> {
            map.and_then(|m| m.get(key))
                .and_then(Value::as_list)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };
        let get_map = |key: &str| -> Value {
            map.and_then(|m| m.get(key)).cloned().unwrap_or_else(Value::map)
        };
        RawEntity {
            classes: get_list("classes"),
            applications: get_list("applications"),
            parameters: get_map("parameters"),
            exports: get_map("exports"),
            environment: map
                .and_then(|m| m.get("environment"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Fully resolved and interpolated node.
#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub short_name: String,
    pub uri: String,
    pub environment: String,
    pub classes: Vec<String>,
    pub applications: Vec<String>,
    pub parameters: Value,
    pub exports: Value,
}

/// Ongoing (pre-interpolation) merge state threaded through
/// `resolver::recurse_entity`.
pub struct ResolvedAncestry {
    pub classes: Vec<String>,
    pub applications: Vec<String>,
    pub parameters: Parameters,
    pub exports: Parameters,
    /// The most recently merged-in non-empty `environment:` tag, post-order
    /// (so a descendant class's tag wins over an ancestor's, per §3's
    /// "inherits from merged-in Entity if that Entity's env is non-empty").
    pub environment: Option<String>,
}

impl Default for ResolvedAncestry {
    fn default() -> Self {
        ResolvedAncestry {
            classes: Vec::new(),
            applications: Vec::new(),
            parameters: Parameters::default(),
            exports: Parameters::default(),
            environment: None,
        }
    }
}

impl ResolvedAncestry {
    /// Adopt `environment` as the ancestry's environment tag if it is
    /// present and non-empty, overriding any earlier (more-ancestral) tag.
    pub fn adopt_environment(&mut self, environment: &Option<String>) {
        if let Some(env) = environment {
            if !env.is_empty() {
                self.environment = Some(env.clone());
            }
        }
    }
}

/// Append `incoming` to `acc`, deduplicating and honoring the
/// `~`-prefixed removal sentinel (`~foo` removes a previously-added `foo`
/// rather than adding a literal `~foo` entry).
pub fn merge_applications(acc: &mut Vec<String>, incoming: &[String], settings: &Settings) {
    for app in incoming {
        if let Some(stripped) = app.strip_prefix(settings.application_removal_sentinel) {
            acc.retain(|existing| existing != stripped);
            continue;
        }
        if !acc.contains(app) {
            acc.push(app.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_removal_sentinel_strips_earlier_entry() {
        let settings = Settings::default();
        let mut acc = vec!["a".to_string(), "b".to_string()];
        merge_applications(&mut acc, &["~a".to_string(), "c".to_string()], &settings);
        assert_eq!(acc, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn application_append_is_unique() {
        let settings = Settings::default();
        let mut acc = vec!["a".to_string()];
        merge_applications(&mut acc, &["a".to_string(), "b".to_string()], &settings);
        assert_eq!(acc, vec!["a".to_string(), "b".to_string()]);
    }
}
