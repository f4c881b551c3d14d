//! # Item tree
//!
//! Typed value nodes produced by the parser: scalar, composite, reference,
//! query, list, dict. A single `match`-based `render` routine replaces the
//! original's per-subclass `isinstance` dispatch (DESIGN NOTES §9).
//!
//! Grounded on `original_source/reclass/values/{scaitem,compitem,refitem,
//! invitem,item}.py`.

use crate::error::InterpolationError;
use crate::path::Path;
use crate::query::QueryExpr;
use crate::settings::Settings;
use crate::value::Value;
use indexmap::IndexMap;

/// A parsed leaf value. `Composite`/`Reference` hold the sub-items produced
/// by the parser for a single `${...}` body or a mixed string/reference
/// value; `List`/`Dict` hold a raw literal container whose elements are
/// themselves Items (so references nested inside a literal value are still
/// reachable).
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Scalar(Value),
    Composite(Vec<Item>),
    Reference(Vec<Item>),
    Query(QueryExpr),
    List(Vec<Item>),
    Dict(IndexMap<String, Item>),
}

impl Item {
    pub fn scalar(v: impl Into<Value>) -> Item {
        Item::Scalar(v.into())
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Item::List(_) | Item::Dict(_))
    }

    /// Whether this item (or anything nested within it) contains a
    /// `Reference` or `Query` that must be resolved before it can render to
    /// a concrete value.
    pub fn is_complex(&self) -> bool {
        self.has_references() || self.has_query()
    }

    pub fn has_references(&self) -> bool {
        match self {
            Item::Reference(_) => true,
            Item::Scalar(_) | Item::Query(_) => false,
            Item::Composite(items) => items.iter().any(Item::has_references),
            Item::List(items) => items.iter().any(Item::has_references),
            Item::Dict(map) => map.values().any(Item::has_references),
        }
    }

    pub fn has_query(&self) -> bool {
        match self {
            Item::Query(_) => true,
            Item::Scalar(_) | Item::Reference(_) => {
                if let Item::Reference(items) = self {
                    items.iter().any(Item::has_query)
                } else {
                    false
                }
            }
            Item::Composite(items) => items.iter().any(Item::has_query),
            Item::List(items) => items.iter().any(Item::has_query),
            Item::Dict(map) => map.values().any(Item::has_query),
        }
    }

    /// Assembled string form of a composite/reference's sub-items, used both
    /// to print the item and to build the path a `Reference` names. Only
    /// valid once all sub-items are scalar-renderable (no remaining
    /// references/queries).
    pub fn assembled_string(items: &[Item]) -> Option<String> {
        let mut out = String::new();
        for item in items {
            match item {
                Item::Scalar(v) => out.push_str(&v.to_string()),
                _ => return None,
            }
        }
        Some(out)
    }
}

/// Signal returned by `render` when evaluation cannot proceed until another
/// path in the tree has been resolved. The caller (the interpolator's
/// Phase B driver) resolves that path first, then retries.
pub enum RenderOutcome {
    Value(Value),
    NeedsPath(Path),
}

/// Context available while rendering an `Item`: the delimiter/sentinels from
/// `Settings`, a read accessor into the (partially rendered) merged tree,
/// and — once built — the inventory-of-exports view for queries.
pub trait RenderContext {
    /// Fetch an already-rendered value at `path`, or signal that `path`
    /// needs to be resolved first.
    fn get(&self, path: &Path) -> Result<Option<Value>, Path>;
    fn settings(&self) -> &Settings;
    fn inventory(&self) -> Option<&IndexMap<String, Value>>;
    fn current_node(&self) -> &str;
}

impl Item {
    pub fn render(
        &self,
        ctx: &dyn RenderContext,
    ) -> Result<RenderOutcome, InterpolationError> {
        match self {
            Item::Scalar(v) => Ok(RenderOutcome::Value(v.clone())),

            Item::Composite(items) => render_join(items, ctx),

            Item::Reference(items) => {
                let assembled = match render_join(items, ctx)? {
                    RenderOutcome::NeedsPath(p) => return Ok(RenderOutcome::NeedsPath(p)),
                    RenderOutcome::Value(v) => v,
                };
                let path_str = assembled.to_string();
                let target = Path::parse(ctx.settings().delimiter, &path_str);
                match ctx.get(&target) {
                    Ok(Some(v)) => Ok(RenderOutcome::Value(v)),
                    Ok(None) => Err(InterpolationError::Resolve {
                        reference: path_str,
                        context: String::new(),
                    }),
                    Err(needs) => Ok(RenderOutcome::NeedsPath(needs)),
                }
            }

            Item::Query(expr) => match expr.eval(ctx) {
                Ok(crate::query::QueryOutcome::Value(v)) => Ok(RenderOutcome::Value(v)),
                Ok(crate::query::QueryOutcome::NeedsPath(p)) => Ok(RenderOutcome::NeedsPath(p)),
                Err(e) => Err(e),
            },

            Item::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item.render(ctx)? {
                        RenderOutcome::Value(v) => out.push(v),
                        RenderOutcome::NeedsPath(p) => return Ok(RenderOutcome::NeedsPath(p)),
                    }
                }
                Ok(RenderOutcome::Value(Value::List(out)))
            }

            Item::Dict(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, item) in map {
                    match item.render(ctx)? {
                        RenderOutcome::Value(v) => {
                            out.insert(k.clone(), v);
                        }
                        RenderOutcome::NeedsPath(p) => return Ok(RenderOutcome::NeedsPath(p)),
                    }
                }
                Ok(RenderOutcome::Value(Value::Map(out)))
            }
        }
    }
}

/// Render each item to its string form and concatenate — the
/// multiple-items-or-mixed-STR+REF case of the type-preservation rule: a
/// single item's native type is preserved by the caller (it simply
/// doesn't call through `render_join` for a length-1 item list at the
/// top-level `Item::render` — composite/reference handle that via the
/// general loop, since a 1-element composite/reference degenerates to a
/// single render call with no concatenation needed).
fn render_join(
    items: &[Item],
    ctx: &dyn RenderContext,
) -> Result<RenderOutcome, InterpolationError> {
    if items.len() == 1 {
        return items[0].render(ctx);
    }
    let mut out = String::new();
    for item in items {
        match item.render(ctx)? {
            RenderOutcome::Value(v) => out.push_str(&v.to_string()),
            RenderOutcome::NeedsPath(p) => return Ok(RenderOutcome::NeedsPath(p)),
        }
    }
    Ok(RenderOutcome::Value(Value::String(out)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeCtx {
        settings: Settings,
        values: RefCell<HashMap<String, Value>>,
    }

    impl RenderContext for FakeCtx {
        fn get(&self, path: &Path) -> Result<Option<Value>, Path> {
            Ok(self.values.borrow().get(&path.to_string()).cloned())
        }
        fn settings(&self) -> &Settings {
            &self.settings
        }
        fn inventory(&self) -> Option<&IndexMap<String, Value>> {
            None
        }
        fn current_node(&self) -> &str {
            "n"
        }
    }

    #[test]
    fn scalar_renders_to_itself() {
        let ctx = FakeCtx {
            settings: Settings::default(),
            values: RefCell::new(HashMap::new()),
        };
        let item = Item::Scalar(Value::Int(5));
        match item.render(&ctx).unwrap() {
            RenderOutcome::Value(v) => assert_eq!(v, Value::Int(5)),
            RenderOutcome::NeedsPath(_) => panic!("unexpected"),
        }
    }

    #[test]
    fn reference_preserves_native_type() {
        let mut values = HashMap::new();
        values.insert("x".to_string(), Value::List(vec![Value::Int(1)]));
        let ctx = FakeCtx {
            settings: Settings::default(),
            values: RefCell::new(values),
        };
        let item = Item::Reference(vec![Item::Scalar(Value::String("x".into()))]);
        match item.render(&ctx).unwrap() {
            RenderOutcome::Value(v) => assert_eq!(v, Value::List(vec![Value::Int(1)])),
            RenderOutcome::NeedsPath(_) => panic!("unexpected"),
        }
    }

    #[test]
    fn composite_concatenates_as_string() {
        let ctx = FakeCtx {
            settings: Settings::default(),
            values: RefCell::new(HashMap::new()),
        };
        let item = Item::Composite(vec![
            Item::Scalar(Value::String("prefix-".into())),
            Item::Scalar(Value::Int(5)),
        ]);
        match item.render(&ctx).unwrap() {
            RenderOutcome::Value(v) => assert_eq!(v, Value::String("prefix-5".into())),
            RenderOutcome::NeedsPath(_) => panic!("unexpected"),
        }
    }
}
