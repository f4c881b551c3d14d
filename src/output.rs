//! # Output rendering
//!
//! Assembles the `nodeinfo`/`inventory` documents the CLI prints, and
//! serializes them as YAML or JSON. Grounded on
//! `original_source/reclass/output.py`'s tree construction; `Value`'s
//! `IndexMap`-backed maps already give the stable key ordering that module
//! calls for.

use crate::entity::Entity;
use crate::value::Value;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

/// `time.strftime('%c')`'s locale-default rendering, approximated with a
/// fixed `chrono` format string (`Tue Jul 28 09:41:12 2026`).
fn build_timestamp() -> String {
    chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

/// Build the document for a single `--nodeinfo` call.
pub fn nodeinfo_document(entity: &Entity, include_exports: bool) -> Value {
    let mut out = IndexMap::new();
    out.insert(
        "classes".to_string(),
        Value::List(entity.classes.iter().cloned().map(Value::String).collect()),
    );
    out.insert(
        "applications".to_string(),
        Value::List(entity.applications.iter().cloned().map(Value::String).collect()),
    );
    out.insert("environment".to_string(), Value::String(entity.environment.clone()));
    out.insert("parameters".to_string(), entity.parameters.clone());
    if include_exports {
        out.insert("exports".to_string(), entity.exports.clone());
    }
    out.insert("__reclass__".to_string(), reclass_meta(entity));

    Value::Map(out)
}

/// The `__reclass__` metadata block: `node`/`name` (both the resolved node
/// name — this implementation never composes a separate display name from
/// the queried one), `uri`, `environment`, and a build timestamp. Grounded
/// on `original_source/reclass/core.py::Core._nodeinfo_as_dict`.
fn reclass_meta(entity: &Entity) -> Value {
    let mut meta = IndexMap::new();
    meta.insert("node".to_string(), Value::String(entity.name.clone()));
    meta.insert("name".to_string(), Value::String(entity.name.clone()));
    meta.insert("uri".to_string(), Value::String(entity.uri.clone()));
    meta.insert("environment".to_string(), Value::String(entity.environment.clone()));
    meta.insert("timestamp".to_string(), Value::String(build_timestamp()));
    Value::Map(meta)
}

/// Build the document for a full `--inventory` call: one `nodeinfo`
/// document per node, keyed by node name, plus the reverse indices
/// `applications`/`classes` (app/class name → the ordered list of nodes
/// that carry it — not the other way around, per
/// `original_source/reclass/core.py::Core.inventory`'s `applications`/
/// `classes` accumulation loop).
pub fn inventory_document(nodes: &IndexMap<String, Entity>, include_exports: bool) -> Value {
    let mut applications: IndexMap<String, Vec<Value>> = IndexMap::new();
    let mut classes: IndexMap<String, Vec<Value>> = IndexMap::new();
    let mut node_docs = IndexMap::new();

    for (name, entity) in nodes {
        for app in &entity.applications {
            applications
                .entry(app.clone())
                .or_default()
                .push(Value::String(name.clone()));
        }
        for class in &entity.classes {
            classes
                .entry(class.clone())
                .or_default()
                .push(Value::String(name.clone()));
        }
        node_docs.insert(name.clone(), nodeinfo_document(entity, include_exports));
    }

    let applications = applications
        .into_iter()
        .map(|(k, v)| (k, Value::List(v)))
        .collect();
    let classes = classes.into_iter().map(|(k, v)| (k, Value::List(v))).collect();

    let mut meta = IndexMap::new();
    meta.insert("timestamp".to_string(), Value::String(build_timestamp()));

    let mut out = IndexMap::new();
    out.insert("__reclass__".to_string(), Value::Map(meta));
    out.insert("applications".to_string(), Value::Map(applications));
    out.insert("classes".to_string(), Value::Map(classes));
    out.insert("nodes".to_string(), Value::Map(node_docs));
    Value::Map(out)
}

/// Drop every `__reclass__` metadata block from a document — the top-level
/// one, and (for an `--inventory` document) the one nested under each
/// entry of `nodes`. Used for `--no-refs`, which hides internal
/// bookkeeping (including the non-deterministic build timestamp) from a
/// diff rather than touching the actual cross-references, which are
/// already fully resolved by the time a document reaches the output
/// layer.
pub fn strip_meta(mut doc: Value) -> Value {
    if let Some(map) = doc.as_map_mut() {
        map.shift_remove("__reclass__");
        if let Some(nodes) = map.get_mut("nodes").and_then(Value::as_map_mut) {
            for node_doc in nodes.values_mut() {
                if let Some(node_map) = node_doc.as_map_mut() {
                    node_map.shift_remove("__reclass__");
                }
            }
        }
    }
    doc
}

pub fn render(doc: &Value, format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Yaml => serde_yaml::to_string(&doc.to_yaml()).map_err(|e| e.to_string()),
        OutputFormat::Json => serde_json::to_string_pretty(&doc.to_json()).map_err(|e| e.to_string()),
    }
}
