//! # Parameters tree — merge engine and two-phase interpolator
//!
//! `RawNode` is the shape a single class/node YAML document parses into
//! (one merge layer); `Node` is the accumulated tree after merging every
//! layer in class-ancestry order. Only mapping-shaped values merge eagerly,
//! key by key (`Node::Dict`); everything else — scalars, references,
//! queries, and literal lists/dicts arriving on top of an incompatible
//! prior layer — collapses into a `ValueList` (`Node::Leaf`) and is
//! combined lazily at render time.
//!
//! Grounded on `original_source/reclass/datatypes/parameters.py`
//! (`_merge_dict`, `_update_value`, `interpolate`) and `core.py`'s
//! post-order resolution driver.

use crate::error::InterpolationError;
use crate::item::{Item, RenderContext, RenderOutcome};
use crate::path::Path;
use crate::settings::Settings;
use crate::value::Value;
use crate::valuelist::ValueList;
use indexmap::IndexMap;
use std::collections::HashSet;

/// A single merge layer, as produced directly by the parser for one
/// class/node document.
#[derive(Debug, Clone)]
pub enum RawNode {
    Dict(IndexMap<String, RawNode>),
    Leaf(Item),
}

impl RawNode {
    pub fn from_value(value: &Value, settings: &Settings) -> Result<RawNode, InterpolationError> {
        Ok(match value {
            Value::Map(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), RawNode::from_value(v, settings)?);
                }
                RawNode::Dict(out)
            }
            Value::List(items) => RawNode::Leaf(Item::List(
                items
                    .iter()
                    .map(|v| item_from_scalar_value(v, settings))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Value::String(s) => RawNode::Leaf(crate::parser::parse_item(s, settings)?),
            other => RawNode::Leaf(Item::Scalar(other.clone())),
        })
    }
}

fn item_from_scalar_value(value: &Value, settings: &Settings) -> Result<Item, InterpolationError> {
    Ok(match value {
        Value::String(s) => crate::parser::parse_item(s, settings)?,
        Value::Map(map) => Item::Dict(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), item_from_scalar_value(v, settings)?)))
                .collect::<Result<IndexMap<_, _>, InterpolationError>>()?,
        ),
        Value::List(items) => Item::List(
            items
                .iter()
                .map(|v| item_from_scalar_value(v, settings))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        other => Item::Scalar(other.clone()),
    })
}

/// Convert a whole `RawNode` subtree into a single deferred `Item` — used
/// when a literal mapping must be layered on top of an existing,
/// not-yet-rendered leaf — a reference-valued leaf later merged against a
/// literal dict override.
fn raw_to_item(raw: &RawNode) -> Item {
    match raw {
        RawNode::Leaf(item) => item.clone(),
        RawNode::Dict(map) => Item::Dict(
            map.iter()
                .map(|(k, v)| (k.clone(), raw_to_item(v)))
                .collect(),
        ),
    }
}

fn raw_to_node(raw: RawNode) -> Node {
    match raw {
        RawNode::Leaf(item) => Node::Leaf(ValueList::new(item)),
        RawNode::Dict(map) => {
            Node::Dict(map.into_iter().map(|(k, v)| (k, raw_to_node(v))).collect())
        }
    }
}

/// The accumulated, merged parameters tree for one node, prior to
/// interpolation.
#[derive(Debug, Clone)]
pub enum Node {
    Dict(IndexMap<String, Node>),
    Leaf(ValueList),
    Rendered(Value),
}

impl Node {
    pub fn empty_dict() -> Node {
        Node::Dict(IndexMap::new())
    }
}

/// Owns the merged tree for one node plus the set of dict keys locked by a
/// `=`-prefixed (constant) definition.
#[derive(Debug, Clone)]
pub struct Parameters {
    pub root: Node,
    constants: HashSet<String>,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            root: Node::empty_dict(),
            constants: HashSet::new(),
        }
    }
}

impl Parameters {
    /// Merge one class/node's parsed document on top of the accumulated
    /// tree, honoring the `~`/`=` key prefixes.
    pub fn merge(
        &mut self,
        incoming: &Value,
        settings: &Settings,
    ) -> Result<(), InterpolationError> {
        let raw = RawNode::from_value(incoming, settings)?;
        let prefix = Path::root(settings.delimiter);
        merge_node(&mut self.root, raw, &prefix, settings, &mut self.constants)
    }

    /// Whether any leaf in the tree contains a `$[...]` query, meaning
    /// interpolation must wait for the frozen inventory-of-exports produced
    /// by the orchestrator's two-pass build.
    pub fn has_any_query(&self) -> bool {
        fn walk(node: &Node) -> bool {
            match node {
                Node::Leaf(vl) => vl.layers().iter().any(Item::has_query),
                Node::Rendered(_) => false,
                Node::Dict(map) => map.values().any(walk),
            }
        }
        walk(&self.root)
    }

    /// Run the interpolator to completion, returning the fully rendered
    /// tree. `inventory` must be `Some` if any leaf contains a query item
    /// (Core builds it before the second inventory pass).
    pub fn interpolate(
        &mut self,
        settings: &Settings,
        inventory: Option<&IndexMap<String, Value>>,
        nodename: &str,
    ) -> Result<Value, InterpolationError> {
        let ctx = Ctx {
            settings,
            inventory,
            nodename,
        };
        let mut in_progress = HashSet::new();
        let leaf_paths = collect_leaf_paths(&self.root, &Path::root(settings.delimiter));
        for path in &leaf_paths {
            resolve_path(&mut self.root, path, &ctx, &mut in_progress)?;
        }
        read_value(&self.root, &Path::root(settings.delimiter))
            .map_err(|p| InterpolationError::Resolve {
                reference: p.to_string(),
                context: format!(" (in node '{nodename}')"),
            })
    }
}

fn merge_node(
    existing: &mut Node,
    incoming: RawNode,
    prefix: &Path,
    settings: &Settings,
    constants: &mut HashSet<String>,
) -> Result<(), InterpolationError> {
    match (existing, incoming) {
        (Node::Dict(emap), RawNode::Dict(imap)) => {
            for (key, value) in imap {
                let (key, is_override, is_constant) = strip_key_prefixes(&key, settings);
                let path_str = prefix.new_subpath(&key).to_string();

                if constants.contains(&path_str) {
                    if settings.strict_constant_parameters {
                        return Err(InterpolationError::Expression(format!(
                            "cannot override constant parameter '{path_str}'"
                        )));
                    }
                    continue;
                }

                if is_override || !emap.contains_key(&key) {
                    emap.insert(key.clone(), raw_to_node(value));
                } else {
                    let child = emap.get_mut(&key).expect("checked contains_key");
                    let child_prefix = prefix.new_subpath(&key);
                    merge_node(child, value, &child_prefix, settings, constants)?;
                }

                if is_constant {
                    constants.insert(path_str);
                }
            }
            Ok(())
        }
        (Node::Dict(_), RawNode::Leaf(Item::Scalar(Value::Null))) => {
            // A literal `null` layered over a mapping leaves the mapping
            // untouched, independent of `allow_scalar_over_dict`.
            Ok(())
        }
        (existing @ Node::Dict(_), RawNode::Leaf(item)) => {
            if item.is_container() {
                return Err(InterpolationError::Expression(
                    "cannot merge a list and a mapping for the same key".into(),
                ));
            }
            if !settings.allow_scalar_over_dict {
                return Err(InterpolationError::Expression(format!(
                    "mapping at '{prefix}' cannot be overwritten by a scalar"
                )));
            }
            *existing = Node::Leaf(ValueList::new(item));
            Ok(())
        }
        (Node::Leaf(vl), RawNode::Dict(imap)) => {
            vl.push(raw_to_item(&RawNode::Dict(imap)), settings)
        }
        (Node::Leaf(vl), RawNode::Leaf(item)) => vl.push(item, settings),
        (existing @ Node::Rendered(_), incoming) => {
            // Interpolation hasn't started yet when merging; a `Rendered`
            // node here only occurs if merge is mistakenly called after
            // interpolation. Treat it as a fresh Leaf to stay total.
            let mut fresh = Node::Leaf(ValueList::new(Item::Scalar(match existing {
                Node::Rendered(v) => v.clone(),
                _ => unreachable!(),
            })));
            merge_node(&mut fresh, incoming, prefix, settings, constants)?;
            *existing = fresh;
            Ok(())
        }
    }
}

/// Split a `~`/`=`-prefixed dict key into `(bare_key, is_override,
/// is_constant)`.
fn strip_key_prefixes(key: &str, settings: &Settings) -> (String, bool, bool) {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c == settings.dict_key_override_prefix => {
            (chars.as_str().to_string(), true, false)
        }
        Some(c) if c == settings.dict_key_constant_prefix => {
            (chars.as_str().to_string(), false, true)
        }
        _ => (key.to_string(), false, false),
    }
}

struct Ctx<'a> {
    settings: &'a Settings,
    inventory: Option<&'a IndexMap<String, Value>>,
    nodename: &'a str,
}

struct TreeRenderContext<'a> {
    root: &'a Node,
    ctx: &'a Ctx<'a>,
}

impl<'a> RenderContext for TreeRenderContext<'a> {
    fn get(&self, path: &Path) -> Result<Option<Value>, Path> {
        match locate(self.root, path.parts()) {
            LocateResult::Found(node) => match read_value(node, path) {
                Ok(v) => Ok(Some(v)),
                Err(needs) => Err(needs),
            },
            LocateResult::NeedsAncestor(depth) => Err(Path::from_parts(
                path.delimiter(),
                path.parts()[..depth].to_vec(),
            )),
            LocateResult::NotFound => Ok(None),
        }
    }

    fn settings(&self) -> &Settings {
        self.ctx.settings
    }

    fn inventory(&self) -> Option<&IndexMap<String, Value>> {
        self.ctx.inventory
    }

    fn current_node(&self) -> &str {
        self.ctx.nodename
    }
}

enum LocateResult<'t> {
    Found(&'t Node),
    NeedsAncestor(usize),
    NotFound,
}

fn locate<'t>(node: &'t Node, parts: &[String]) -> LocateResult<'t> {
    if parts.is_empty() {
        return LocateResult::Found(node);
    }
    match node {
        Node::Dict(map) => match map.get(&parts[0]) {
            Some(child) => match locate(child, &parts[1..]) {
                LocateResult::Found(n) => LocateResult::Found(n),
                LocateResult::NeedsAncestor(d) => LocateResult::NeedsAncestor(d + 1),
                LocateResult::NotFound => LocateResult::NotFound,
            },
            None => LocateResult::NotFound,
        },
        Node::Leaf(_) | Node::Rendered(_) => LocateResult::NeedsAncestor(0),
    }
}

fn locate_mut<'t>(node: &'t mut Node, parts: &[String]) -> Option<&'t mut Node> {
    if parts.is_empty() {
        return Some(node);
    }
    match node {
        Node::Dict(map) => map.get_mut(&parts[0]).and_then(|child| locate_mut(child, &parts[1..])),
        Node::Leaf(_) | Node::Rendered(_) => None,
    }
}

fn read_value(node: &Node, prefix: &Path) -> Result<Value, Path> {
    match node {
        Node::Rendered(v) => Ok(v.clone()),
        Node::Leaf(_) => Err(prefix.clone()),
        Node::Dict(map) => {
            let mut out = IndexMap::with_capacity(map.len());
            for (k, child) in map {
                out.insert(k.clone(), read_value(child, &prefix.new_subpath(k))?);
            }
            Ok(Value::Map(out))
        }
    }
}

fn collect_leaf_paths(node: &Node, prefix: &Path) -> Vec<Path> {
    match node {
        Node::Leaf(_) => vec![prefix.clone()],
        Node::Rendered(_) => Vec::new(),
        Node::Dict(map) => {
            let mut out = Vec::new();
            for (k, child) in map {
                out.extend(collect_leaf_paths(child, &prefix.new_subpath(k)));
            }
            out
        }
    }
}

const MAX_RESOLVE_ATTEMPTS: usize = 4096;

fn resolve_path(
    root: &mut Node,
    path: &Path,
    ctx: &Ctx,
    in_progress: &mut HashSet<String>,
) -> Result<(), InterpolationError> {
    if matches!(locate(root, path.parts()), LocateResult::Found(Node::Rendered(_))) {
        return Ok(());
    }
    let key = path.to_string();
    if in_progress.contains(&key) {
        return Err(InterpolationError::InfiniteRecursion {
            path: key.clone(),
            reference: key,
        });
    }
    in_progress.insert(key.clone());

    let mut attempts = 0usize;
    let result = loop {
        attempts += 1;
        if attempts > MAX_RESOLVE_ATTEMPTS {
            break Err(InterpolationError::BadReferenceCount { path: key.clone() });
        }

        let outcome = {
            let tree_ctx = TreeRenderContext { root: &*root, ctx };
            let vl = match locate(&*root, path.parts()) {
                LocateResult::Found(Node::Leaf(vl)) => vl,
                LocateResult::Found(Node::Rendered(_)) => break Ok(()),
                _ => {
                    break Err(InterpolationError::Resolve {
                        reference: key.clone(),
                        context: String::new(),
                    })
                }
            };
            vl.render(&tree_ctx)
        };

        match outcome {
            Ok(RenderOutcome::Value(v)) => {
                if let Some(slot) = locate_mut(root, path.parts()) {
                    *slot = Node::Rendered(v);
                }
                break Ok(());
            }
            Ok(RenderOutcome::NeedsPath(target)) => {
                resolve_path(root, &target, ctx, in_progress)?;
                continue;
            }
            Err(e) => break Err(e),
        }
    };

    in_progress.remove(&key);
    result
}
