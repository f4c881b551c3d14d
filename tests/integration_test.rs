//! End-to-end scenarios driving `Core::nodeinfo`/`Core::inventory` over an
//! in-memory `Storage`, covering the class-ancestry/merge/interpolation
//! pipeline as a whole rather than any one module in isolation.

mod support;

use reclass_rs::error::{InterpolationError, ReclassError};
use reclass_rs::storage::{ClassMappingRule, MappingPattern};
use reclass_rs::{Core, Settings, Value};
use support::MemoryStorage;

fn int(v: &Value, path: &[&str]) -> i64 {
    let mut cur = v;
    for p in path {
        cur = cur.as_map().unwrap().get(*p).unwrap();
    }
    match cur {
        Value::Int(n) => *n,
        other => panic!("expected int at {path:?}, got {other:?}"),
    }
}

fn get<'a>(v: &'a Value, path: &[&str]) -> &'a Value {
    let mut cur = v;
    for p in path {
        cur = cur.as_map().unwrap().get(*p).unwrap_or(&Value::Null);
    }
    cur
}

/// A plain reference to a sibling scalar renders to its value.
#[test]
fn simple_reference_renders_sibling_value() {
    let storage = MemoryStorage::new().node("n", "parameters:\n  a: 1\n  b: \"${a}\"\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "n").unwrap();
    assert_eq!(int(&entity.parameters, &["a"]), 1);
    assert_eq!(int(&entity.parameters, &["b"]), 1);
}

/// A reference whose own body is itself a reference (`${${z}}`) resolves
/// the inner reference first, then looks up the resulting path.
#[test]
fn nested_reference_resolves_inner_reference_first() {
    let storage = MemoryStorage::new().node(
        "n",
        "parameters:\n  a: \"${${z}}\"\n  b: 2\n  z: b\n",
    );
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "n").unwrap();
    assert_eq!(int(&entity.parameters, &["a"]), 2);
    assert_eq!(int(&entity.parameters, &["b"]), 2);
}

/// A direct two-node reference cycle fails with `InfiniteRecursion` naming
/// at least one path on the cycle.
#[test]
fn direct_reference_cycle_fails_with_infinite_recursion() {
    let storage = MemoryStorage::new().node("n", "parameters:\n  a: \"${b}\"\n  b: \"${a}\"\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let err = core.nodeinfo("base", "n").unwrap_err();
    match err {
        ReclassError::Interpolation(InterpolationError::InfiniteRecursion { path, reference }) => {
            assert!(path == "a" || path == "b");
            assert!(reference == "a" || reference == "b");
        }
        other => panic!("expected InfiniteRecursion, got {other:?}"),
    }
}

/// A reference to a dict is deep-merged against what the referring key was
/// already carrying, across three ancestry layers.
#[test]
fn referenced_dict_deep_merges_against_existing_key() {
    let storage = MemoryStorage::new()
        .class(
            "parent",
            "parameters:\n  alpha:\n    one:\n      a: 1\n      b: 2\n",
        )
        .class(
            "child",
            "classes:\n  - parent\nparameters:\n  beta: \"${alpha}\"\n",
        )
        .node(
            "n",
            "classes:\n  - child\nparameters:\n  alpha:\n    one:\n      c: 3\n  beta:\n    one:\n      a: 99\n",
        );
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "n").unwrap();

    assert_eq!(int(&entity.parameters, &["alpha", "one", "a"]), 1);
    assert_eq!(int(&entity.parameters, &["alpha", "one", "b"]), 2);
    assert_eq!(int(&entity.parameters, &["alpha", "one", "c"]), 3);

    assert_eq!(int(&entity.parameters, &["beta", "one", "a"]), 99);
    assert_eq!(int(&entity.parameters, &["beta", "one", "b"]), 2);
    assert_eq!(int(&entity.parameters, &["beta", "one", "c"]), 3);
}

/// A value-query projects `{node: value}` across the inventory, restricted
/// to nodes whose exports satisfy the predicate.
#[test]
fn filtered_value_query_projects_matching_nodes() {
    let storage = MemoryStorage::new()
        .node("n1", "exports:\n  a: 1\n  b: 2\n")
        .node("n2", "exports:\n  a: 3\n  b: 4\nparameters:\n  exp: \"$[ exports:a if exports:b == 4 ]\"\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let inventory = core.inventory("base").unwrap();
    let n2 = &inventory["n2"];
    let exp = get(&n2.parameters, &["exp"]);
    let map = exp.as_map().unwrap();
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("n2"), Some(&Value::Int(3)));
}

/// A list-filter query (`$[ if ... ]`) returns the ordered list of matching
/// node names rather than a value projection.
#[test]
fn list_filter_query_returns_ordered_matching_names() {
    let storage = MemoryStorage::new()
        .node("n1", "exports:\n  b: 2\n")
        .node("n3", "exports:\n  b: 2\n")
        .node(
            "n2",
            "exports:\n  b: 9\nparameters:\n  exp: \"$[ if exports:b == 2 ]\"\n",
        );
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let inventory = core.inventory("base").unwrap();
    let exp = get(&inventory["n2"].parameters, &["exp"]);
    let names: Vec<&str> = exp.as_list().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    assert_eq!(names, vec!["n1", "n3"]);
}

/// A class reachable through two different parents contributes its values
/// exactly once, and the node's own body always wins over any class
/// regardless of which parent listed it first.
#[test]
fn post_order_dominance_and_diamond_suppression() {
    let storage = MemoryStorage::new()
        .class("common", "parameters:\n  v: from-common\n")
        .class("a", "classes:\n  - common\nparameters:\n  v: from-a\n")
        .class("b", "classes:\n  - common\nparameters:\n  v: from-b\n")
        .node(
            "n",
            "classes:\n  - a\n  - b\nparameters:\n  v: from-node\n",
        );
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "n").unwrap();
    assert_eq!(get(&entity.parameters, &["v"]).as_str(), Some("from-node"));
    // `common` is only merged once even though both `a` and `b` list it.
    assert_eq!(storage.load_count("common"), 1);
    assert_eq!(entity.classes, vec!["common", "a", "b"]);
}

/// The `~key` override prefix discards the existing value at `key` before
/// merging in the incoming one, rather than deep-merging.
#[test]
fn override_prefix_replaces_rather_than_merges() {
    let storage = MemoryStorage::new()
        .class("parent", "parameters:\n  a:\n    b: 1\n")
        .node("n", "classes:\n  - parent\nparameters:\n  ~a:\n    c: 2\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "n").unwrap();
    let a = entity.parameters.as_map().unwrap().get("a").unwrap().as_map().unwrap();
    assert_eq!(a.get("b"), None);
    assert_eq!(a.get("c"), Some(&Value::Int(2)));
}

/// Sequences extend (existing entries first) rather than replace.
#[test]
fn list_extension_semantics() {
    let storage = MemoryStorage::new()
        .class("parent", "parameters:\n  l:\n    - 1\n    - 2\n")
        .node("n", "classes:\n  - parent\nparameters:\n  l:\n    - 3\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "n").unwrap();
    let l = entity.parameters.as_map().unwrap().get("l").unwrap().as_list().unwrap();
    assert_eq!(l, &vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

/// Relative class names resolve against the referencing class's own
/// dotted namespace.
#[test]
fn relative_class_resolution() {
    let storage = MemoryStorage::new()
        .class("x.y.k", "parameters:\n  from_dot: yes_k\n")
        .class("x.k", "parameters:\n  from_dotdot: yes_k\n")
        .class("x.y.z", "classes:\n  - .k\n  - ..k\n")
        .node("n", "classes:\n  - x.y.z\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "n").unwrap();
    assert_eq!(get(&entity.parameters, &["from_dot"]).as_str(), Some("yes_k"));
    assert_eq!(get(&entity.parameters, &["from_dotdot"]).as_str(), Some("yes_k"));
}

/// Class-not-found fails unless configured to ignore, per an optional
/// regexp allowlist.
#[test]
fn class_not_found_is_an_error_by_default() {
    let storage = MemoryStorage::new().node("n", "classes:\n  - missing\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let err = core.nodeinfo("base", "n").unwrap_err();
    assert!(matches!(err, ReclassError::NotFound(_)));
}

#[test]
fn class_not_found_is_ignored_when_configured() {
    let storage = MemoryStorage::new().node("n", "classes:\n  - missing\n");
    let mut settings = Settings::default();
    settings.ignore_class_notfound = true;
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "n").unwrap();
    assert_eq!(entity.classes, Vec::<String>::new());
}

/// Applications: unique-append plus `~name` removal.
#[test]
fn applications_unique_append_and_removal() {
    let storage = MemoryStorage::new()
        .class("base_role", "applications:\n  - nginx\n  - monitoring\n")
        .node(
            "n",
            "classes:\n  - base_role\napplications:\n  - nginx\n  - ~monitoring\n  - app\n",
        );
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "n").unwrap();
    assert_eq!(entity.applications, vec!["nginx".to_string(), "app".to_string()]);
}

/// Class mappings: a glob rule prepends classes ahead of the node's own
/// explicit list.
#[test]
fn class_mappings_prepend_classes() {
    let storage = MemoryStorage::new()
        .class("role.web", "parameters:\n  role: web\n")
        .node("web01", "parameters:\n  own: yes\n")
        .mapping(ClassMappingRule {
            pattern: MappingPattern::glob("web*").unwrap(),
            classes: vec!["role.web".to_string()],
        });
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "web01").unwrap();
    assert_eq!(get(&entity.parameters, &["role"]).as_str(), Some("web"));
    assert_eq!(get(&entity.parameters, &["own"]), &Value::Bool(true));
}

/// A node's own `environment:` key overrides the default environment tag
/// in the resulting document, winning over any class's.
#[test]
fn node_environment_key_overrides_default() {
    let storage = MemoryStorage::new()
        .class("role.web", "environment: staging\nparameters:\n  a: 1\n")
        .node("web01", "classes:\n  - role.web\nenvironment: prod\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "web01").unwrap();
    assert_eq!(entity.environment, "prod");
}

/// A class's `environment:` key, absent any override on the node itself,
/// still surfaces onto the resolved document.
#[test]
fn class_environment_key_surfaces_without_node_override() {
    let storage = MemoryStorage::new()
        .class("role.web", "environment: staging\nparameters:\n  a: 1\n")
        .node("web01", "classes:\n  - role.web\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "web01").unwrap();
    assert_eq!(entity.environment, "staging");
}

/// A `/regex/` class-mappings rule back-references its capture groups into
/// the class names it contributes, e.g. `web(\d+)` capturing the node's
/// numeric suffix into `role.web.\1`.
#[test]
fn regex_class_mapping_expands_backreferences() {
    let storage = MemoryStorage::new()
        .class("role.web.01", "parameters:\n  shard: one\n")
        .node("web01", "parameters:\n  own: yes\n")
        .mapping(ClassMappingRule {
            pattern: MappingPattern::regex(r"web(\d+)").unwrap(),
            classes: vec![r"role.web.\1".to_string()],
        });
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "web01").unwrap();
    assert_eq!(get(&entity.parameters, &["shard"]).as_str(), Some("one"));
}

/// Duplicate node names across storage fail the whole inventory build.
#[test]
fn inventory_exposes_applications_and_classes_indices() {
    let storage = MemoryStorage::new()
        .class("role.web", "applications:\n  - nginx\n")
        .node("web01", "classes:\n  - role.web\n")
        .node("web02", "classes:\n  - role.web\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let inventory = core.inventory("base").unwrap();
    assert_eq!(inventory.len(), 2);
    assert!(inventory["web01"].applications.contains(&"nginx".to_string()));
    assert!(inventory["web02"].applications.contains(&"nginx".to_string()));
}

/// Automatic `_reclass_.name.{full,short}` parameters are always present.
#[test]
fn automatic_parameters_expose_node_name() {
    let storage = MemoryStorage::new().node("site.alpha.web01", "parameters: {}\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "site.alpha.web01").unwrap();
    assert_eq!(
        get(&entity.parameters, &["_reclass_", "name", "full"]).as_str(),
        Some("site.alpha.web01")
    );
    assert_eq!(
        get(&entity.parameters, &["_reclass_", "name", "short"]).as_str(),
        Some("web01")
    );
}

/// A class listed in the node's own `classes:` is merged after the
/// automatic `_reclass_` parameters, so it can legitimately override
/// `_reclass_.name.short` — only the node's own top-level body always wins.
#[test]
fn node_classes_can_override_automatic_parameters() {
    let storage = MemoryStorage::new()
        .class(
            "overrides_name",
            "parameters:\n  _reclass_:\n    name:\n      short: overridden\n",
        )
        .node("site.alpha.web01", "classes:\n  - overrides_name\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let entity = core.nodeinfo("base", "site.alpha.web01").unwrap();
    assert_eq!(
        get(&entity.parameters, &["_reclass_", "name", "short"]).as_str(),
        Some("overridden")
    );
}

/// `inventory_ignore_failed_node` lets every node finish building before a
/// failure is reported, but it must not make the failure disappear: the
/// good node's result is discarded too once the whole call fails.
#[test]
fn inventory_ignore_failed_node_still_surfaces_the_failure() {
    let storage = MemoryStorage::new()
        .node("good", "parameters:\n  a: 1\n")
        .node("bad", "classes:\n  - missing\n");
    let mut settings = Settings::default();
    settings.inventory_ignore_failed_node = true;
    let core = Core::new(&storage, &settings);
    let err = core.inventory("base").unwrap_err();
    assert!(matches!(err, ReclassError::NotFound(_)));
}

/// With `group_errors` set, every failed node's error is folded into one
/// aggregate rather than only the first being reported.
#[test]
fn inventory_group_errors_aggregates_every_failure() {
    let storage = MemoryStorage::new()
        .node("bad1", "classes:\n  - missing1\n")
        .node("bad2", "classes:\n  - missing2\n");
    let mut settings = Settings::default();
    settings.inventory_ignore_failed_node = true;
    settings.group_errors = true;
    let core = Core::new(&storage, &settings);
    let err = core.inventory("base").unwrap_err();
    match err {
        ReclassError::Aggregate(count, message) => {
            assert_eq!(count, 2);
            assert!(message.contains("missing1"));
            assert!(message.contains("missing2"));
        }
        other => panic!("expected Aggregate, got {other:?}"),
    }
}

/// Global input data is merged into every node's base Entity, ahead of the
/// node's own explicit `classes:` list, so a class the node lists can
/// still override it.
#[test]
fn global_input_data_merges_into_base_entity() {
    let storage = MemoryStorage::new()
        .class("override", "parameters:\n  region: from-class\n")
        .node("n", "classes:\n  - override\n");
    let mut input_data = indexmap::IndexMap::new();
    input_data.insert("region".to_string(), Value::String("from-input-data".into()));
    input_data.insert("tier".to_string(), Value::String("from-input-data".into()));
    let settings = Settings::default();
    let core = Core::new_with_input_data(&storage, &settings, Value::Map(input_data));
    let entity = core.nodeinfo("base", "n").unwrap();
    assert_eq!(get(&entity.parameters, &["region"]).as_str(), Some("from-class"));
    assert_eq!(
        get(&entity.parameters, &["tier"]).as_str(),
        Some("from-input-data")
    );
}

/// A malformed `$[...]` body in a node's own parameters fails the whole
/// build with an `Expression` error rather than being silently kept as a
/// literal string.
#[test]
fn malformed_query_fails_the_build() {
    let storage = MemoryStorage::new().node("n", "parameters:\n  a: \"$[ not a query ]\"\n");
    let settings = Settings::default();
    let core = Core::new(&storage, &settings);
    let err = core.nodeinfo("base", "n").unwrap_err();
    match err {
        ReclassError::Interpolation(InterpolationError::Expression(_))
        | ReclassError::Interpolation(InterpolationError::Parse { .. }) => {}
        other => panic!("expected an Expression/Parse interpolation error, got {other:?}"),
    }
}
