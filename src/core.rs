//! # Core — node and inventory orchestration
//!
//! `Core::nodeinfo` builds and interpolates a single node; `Core::inventory`
//! builds every node, handling the two-pass exports/query dependency.
//! Per-node work runs across a `rayon` thread pool since nodes are
//! independent once class mapping is known.
//!
//! Grounded on `original_source/reclass/core.py`'s `Core.nodeinfo` /
//! `Core.inventory` pair, with `rayon::par_iter` driving independent
//! per-node work.

use crate::entity::{merge_applications, Entity, RawEntity, ResolvedAncestry};
use crate::error::{NamingError, ReclassError};
use crate::resolver::recurse_entity;
use crate::settings::Settings;
use crate::storage::{ClassMappingRule, MappingPattern, NodeRef, Storage};
use crate::value::Value;
use indexmap::IndexMap;
use rayon::prelude::*;
use std::collections::HashSet;

pub struct Core<'a> {
    storage: &'a dyn Storage,
    settings: &'a Settings,
    /// Global input data (spec §4.5 item (b)): a literal parameters mapping
    /// merged into every node's base Entity ahead of the node's own
    /// explicit `classes:` list, between the class-mappings recursion and
    /// the automatic `_reclass_` parameters. Grounded on
    /// `original_source/reclass/core.py::Core.__init__`'s `input_data`
    /// constructor argument and `_get_input_data_entity`.
    input_data: Option<Value>,
}

impl<'a> Core<'a> {
    pub fn new(storage: &'a dyn Storage, settings: &'a Settings) -> Self {
        Core {
            storage,
            settings,
            input_data: None,
        }
    }

    /// Build a `Core` that also merges `input_data` into every node's base
    /// Entity, mirroring the original's `Core(storage, class_mappings,
    /// input_data=...)` constructor argument.
    pub fn new_with_input_data(
        storage: &'a dyn Storage,
        settings: &'a Settings,
        input_data: Value,
    ) -> Self {
        Core {
            storage,
            settings,
            input_data: Some(input_data),
        }
    }

    /// Build and fully interpolate a single node. Builds the whole
    /// inventory first only if this node's tree actually contains a query —
    /// the common case of a query-free node avoids that cost entirely.
    pub fn nodeinfo(&self, environment: &str, nodename: &str) -> Result<Entity, ReclassError> {
        let (ancestry, raw, uri) = self.build_ancestry(environment, nodename)?;

        if ancestry.parameters.has_any_query() {
            let inventory = self.build_exports_inventory(environment)?;
            self.finish_entity(ancestry, raw, nodename, environment, uri, Some(&inventory))
        } else {
            self.finish_entity(ancestry, raw, nodename, environment, uri, None)
        }
    }

    /// Build every node's inventory-of-exports, then every node's full,
    /// interpolated parameters, in two passes.
    pub fn inventory(&self, environment: &str) -> Result<IndexMap<String, Entity>, ReclassError> {
        let exports = self.build_exports_inventory(environment)?;
        let node_refs = self.sorted_node_refs(environment)?;

        let results: Vec<Result<(String, Entity), ReclassError>> = node_refs
            .par_iter()
            .map(|node_ref| {
                let (ancestry, raw, uri) = self.build_ancestry(environment, &node_ref.name)?;
                let entity = self.finish_entity(
                    ancestry,
                    raw,
                    &node_ref.name,
                    environment,
                    uri,
                    Some(&exports),
                )?;
                Ok((node_ref.name.clone(), entity))
            })
            .collect();

        let mut out = IndexMap::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok((name, entity)) => {
                    out.insert(name, entity);
                }
                Err(e) => {
                    if self.settings.inventory_ignore_failed_node
                        || self.settings.inventory_ignore_failed_render
                    {
                        failures.push(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        // `inventory_ignore_failed_node`/`inventory_ignore_failed_render` let every
        // node finish building before any failure is reported, rather than
        // aborting at the first one; they don't make the failures disappear.
        if !failures.is_empty() {
            if self.settings.group_errors {
                let joined = failures.iter().map(ReclassError::to_string).collect::<Vec<_>>().join("\n");
                return Err(ReclassError::Aggregate(failures.len(), joined));
            }
            return Err(failures.into_iter().next().expect("checked non-empty above"));
        }
        Ok(out)
    }

    /// List every node in `environment`, sorted by name, rejecting
    /// duplicate node names (two documents addressable under the same
    /// node name). Per `original_source/reclass/core.py::Core._get_nodes`,
    /// which raises `DuplicateNodeNameError` the moment a second URI maps
    /// to an already-seen name.
    fn sorted_node_refs(&self, environment: &str) -> Result<Vec<NodeRef>, ReclassError> {
        let mut node_refs = self.storage.nodes(environment)?;
        node_refs.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in node_refs.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(NamingError::DuplicateNodeName {
                    storage: "nodes".to_string(),
                    name: pair[0].name.clone(),
                    uri1: pair[0].uri.clone(),
                    uri2: pair[1].uri.clone(),
                }
                .into());
            }
        }
        Ok(node_refs)
    }

    /// Render the self-only exports tree for every node (pass one).
    fn build_exports_inventory(&self, environment: &str) -> Result<IndexMap<String, Value>, ReclassError> {
        let node_refs = self.sorted_node_refs(environment)?;
        let results: Vec<Result<(String, Value), ReclassError>> = node_refs
            .par_iter()
            .map(|node_ref| {
                let (mut ancestry, _raw, _uri) = self.build_ancestry(environment, &node_ref.name)?;
                let rendered = ancestry
                    .exports
                    .interpolate(self.settings, None, &node_ref.name)
                    .map_err(ReclassError::from)?;
                Ok((node_ref.name.clone(), rendered))
            })
            .collect();

        let mut out = IndexMap::with_capacity(results.len());
        for result in results {
            let (name, value) = result?;
            out.insert(name, value);
        }
        Ok(out)
    }

    /// Walk the class ancestry for `nodename`, merging every layer but not
    /// yet interpolating. Returns the merge accumulator, the node's own raw
    /// document, and its storage URI.
    fn build_ancestry(
        &self,
        environment: &str,
        nodename: &str,
    ) -> Result<(ResolvedAncestry, RawEntity, String), ReclassError> {
        let doc = self.storage.get_node(environment, nodename)?;
        let raw = RawEntity::from_document(&doc.value);

        let match_target = if self.settings.class_mappings_match_path {
            doc.path.as_str()
        } else {
            nodename
        };
        let mapped = self.class_mappings_for(environment, match_target)?;

        let mut seen = HashSet::new();
        let mut acc = ResolvedAncestry::default();

        // Base Entity, per spec §4.5: (a) class-mapping classes, then
        // (b)/(c) automatic parameters, merged *before* the node's own
        // explicit `classes:` list is descended into — matching
        // `original_source/reclass/core.py::_node_entity`'s ordering, so
        // that a class the node lists explicitly can still legitimately
        // override `_reclass_.name.*`.
        for classname in &mapped {
            recurse_entity(
                self.storage,
                "nodes",
                environment,
                classname,
                Some(nodename),
                nodename,
                &mut seen,
                &mut acc,
                self.settings,
            )?;
        }

        if let Some(input_data) = &self.input_data {
            acc.parameters
                .merge(input_data, self.settings)
                .map_err(ReclassError::from)?;
        }

        if self.settings.automatic_parameters {
            acc.parameters
                .merge(&automatic_parameters_document(nodename), self.settings)
                .map_err(ReclassError::from)?;
        }

        for classname in &raw.classes {
            recurse_entity(
                self.storage,
                "nodes",
                environment,
                classname,
                Some(nodename),
                nodename,
                &mut seen,
                &mut acc,
                self.settings,
            )?;
        }
        Ok((acc, raw, doc.uri))
    }

    fn finish_entity(
        &self,
        mut ancestry: ResolvedAncestry,
        raw: RawEntity,
        nodename: &str,
        environment: &str,
        uri: String,
        inventory: Option<&IndexMap<String, Value>>,
    ) -> Result<Entity, ReclassError> {
        merge_applications(&mut ancestry.applications, &raw.applications, self.settings);
        // The node's own `environment:` key is merged last and so wins over
        // any class's, per §3's "inherits from merged-in Entity if that
        // Entity's env is non-empty".
        ancestry.adopt_environment(&raw.environment);

        ancestry
            .parameters
            .merge(&raw.parameters, self.settings)
            .map_err(ReclassError::from)?;
        ancestry
            .exports
            .merge(&raw.exports, self.settings)
            .map_err(ReclassError::from)?;

        let parameters = ancestry
            .parameters
            .interpolate(self.settings, inventory, nodename)
            .map_err(ReclassError::from)?;
        let exports = ancestry
            .exports
            .interpolate(self.settings, inventory, nodename)
            .map_err(ReclassError::from)?;

        let short_name = nodename.rsplit('.').next().unwrap_or(nodename).to_string();
        Ok(Entity {
            name: nodename.to_string(),
            short_name,
            uri,
            environment: ancestry.environment.unwrap_or_else(|| environment.to_string()),
            classes: ancestry.classes,
            applications: ancestry.applications,
            parameters,
            exports,
        })
    }

    /// Evaluate class-mappings rules against `nodename`,
    /// producing the classes to prepend ahead of the node's own explicit
    /// `classes:` list, in rule file order.
    fn class_mappings_for(
        &self,
        environment: &str,
        nodename: &str,
    ) -> Result<Vec<String>, ReclassError> {
        let rules = self.storage.class_mappings(environment)?;
        let mut out = Vec::new();
        for rule in &rules {
            out.extend(mapping_classes(&rule.pattern, &rule.classes, nodename));
        }
        Ok(out)
    }
}

/// Evaluate one class-mappings rule against `nodename`, returning the class
/// names it contributes (empty if the pattern doesn't match). Both pattern
/// kinds are already compiled (`storage::parse_mapping_pattern` runs once
/// at rule-load time), so this is pure matching with no fallible step. A
/// `Regex` pattern's capture groups are available to its class-name
/// templates as `\1`, `\2`, … back-references, per spec §4.6.
fn mapping_classes(pattern: &MappingPattern, classes: &[String], nodename: &str) -> Vec<String> {
    match pattern {
        MappingPattern::Glob(matcher) => {
            if matcher.is_match(nodename) {
                classes.to_vec()
            } else {
                Vec::new()
            }
        }
        MappingPattern::Regex(re) => match re.captures(nodename) {
            Some(caps) => classes.iter().map(|tmpl| expand_backreferences(tmpl, &caps)).collect(),
            None => Vec::new(),
        },
    }
}

/// Substitute `\1`, `\2`, … in `template` with the corresponding capture
/// group from `caps` (a literal `\0` or an out-of-range index is left
/// unchanged, since `regex::Captures` has no notion of a malformed
/// back-reference to reject).
fn expand_backreferences(template: &str, caps: &regex::Captures) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                chars.next();
                let idx: usize = d.to_digit(10).unwrap() as usize;
                if let Some(m) = caps.get(idx) {
                    out.push_str(m.as_str());
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// The synthetic `_reclass_.name.{full,short}` parameters injected per node
/// when `automatic_parameters` is enabled.
fn automatic_parameters_document(nodename: &str) -> Value {
    let short = nodename.rsplit('.').next().unwrap_or(nodename);
    let mut name = IndexMap::new();
    name.insert("full".to_string(), Value::String(nodename.to_string()));
    name.insert("short".to_string(), Value::String(short.to_string()));
    let mut reclass = IndexMap::new();
    reclass.insert("name".to_string(), Value::Map(name));
    let mut root = IndexMap::new();
    root.insert("_reclass_".to_string(), Value::Map(reclass));
    Value::Map(root)
}
