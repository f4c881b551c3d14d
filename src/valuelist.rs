//! # ValueList — deferred merge layers
//!
//! A `ValueList` holds the ordered stack of `Item`s assigned to one path
//! across the class ancestry (and, last, the node itself). Combination is
//! deferred to render time: only once every layer has been rendered to a
//! concrete `Value` do dict-recursion and list-extension happen, mirroring
//! `original_source/reclass/values/valuelist.py::render()`'s
//! merge-via-temporary-`Parameters` trick — reimplemented here as a direct
//! `Value`-level combinator instead of round-tripping through a scratch
//! tree.

use crate::error::InterpolationError;
use crate::item::{Item, RenderContext, RenderOutcome};
use crate::settings::Settings;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueList {
    layers: Vec<Item>,
}

impl ValueList {
    pub fn new(first: Item) -> Self {
        ValueList {
            layers: vec![first],
        }
    }

    pub fn layers(&self) -> &[Item] {
        &self.layers
    }

    pub fn is_complex(&self) -> bool {
        self.layers.iter().any(Item::is_complex)
    }

    /// Append a layer on top of the stack, checking type compatibility
    /// against `Settings`'s `allow_*` merge overrides. `~`-prefixed
    /// (override) assignment is handled by the caller
    /// replacing the whole `ValueList` rather than calling this.
    pub fn push(&mut self, incoming: Item, settings: &Settings) -> Result<(), InterpolationError> {
        if let Some(top) = self.layers.last() {
            check_shape_compatible(top, &incoming, settings)?;
        }
        self.layers.push(incoming);
        Ok(())
    }

    /// Render every layer in order, combining adjacent results per the
    /// deferred dict-merge/list-extend rule. If any layer's render needs a
    /// path resolved first, that request propagates immediately — the
    /// caller resolves it and retries the whole `ValueList`.
    pub fn render(
        &self,
        ctx: &dyn RenderContext,
    ) -> Result<RenderOutcome, InterpolationError> {
        let mut acc: Option<Value> = None;
        let last_index = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let rendered = match layer.render(ctx) {
                Ok(RenderOutcome::Value(v)) => v,
                Ok(RenderOutcome::NeedsPath(p)) => return Ok(RenderOutcome::NeedsPath(p)),
                Err(e) => {
                    if i != last_index && settings_ignore(ctx, &e) {
                        Value::Null
                    } else {
                        return Err(e);
                    }
                }
            };
            acc = Some(match acc {
                None => rendered,
                Some(base) => merge_rendered(base, rendered, ctx.settings())?,
            });
        }
        Ok(RenderOutcome::Value(acc.unwrap_or(Value::Null)))
    }
}

fn settings_ignore(ctx: &dyn RenderContext, err: &InterpolationError) -> bool {
    matches!(err, InterpolationError::Resolve { .. }) && ctx.settings().ignore_overwritten_missing_references
}

/// Whether `incoming` is allowed to be layered on top of `existing` without
/// having been rendered yet — a coarse, type-shape-only precheck (the
/// `allow_*_over_*` flags only become meaningful once both sides are known
/// to be concrete containers or scalars, but a `Reference`/`Query` layer's
/// eventual shape is unknown until render time, so those are always
/// admitted and re-checked during `merge_rendered`).
fn check_shape_compatible(
    existing: &Item,
    incoming: &Item,
    settings: &Settings,
) -> Result<(), InterpolationError> {
    use Item::*;
    match (existing, incoming) {
        (Dict(_), List(_)) | (List(_), Dict(_)) => Err(InterpolationError::Expression(
            "cannot merge a list and a mapping for the same key".into(),
        )),
        // A literal `null` layered on top of a container always leaves it
        // untouched, independent of the `allow_*_over_*` permissions.
        (Dict(_) | List(_), Scalar(Value::Null)) => Ok(()),
        // Symmetric case: an existing `null` is treated as absent, so a
        // mapping/list layered over it always wins — per spec.md §4.3's
        // `mapping ⊕ scalar(null) → mapping wins` row.
        (Scalar(Value::Null), Dict(_) | List(_)) => Ok(()),
        (Dict(_), Scalar(_)) if !settings.allow_scalar_over_dict => Err(
            InterpolationError::Expression("mapping cannot be overwritten by a scalar".into()),
        ),
        (List(_), Scalar(_)) if !settings.allow_scalar_over_list => Err(
            InterpolationError::Expression("list cannot be overwritten by a scalar".into()),
        ),
        (Scalar(_), List(_)) if !settings.allow_list_over_scalar => Err(
            InterpolationError::Expression("scalar cannot be overwritten by a list".into()),
        ),
        (Scalar(_), Dict(_)) if !settings.allow_dict_over_scalar => Err(
            InterpolationError::Expression("scalar cannot be overwritten by a mapping".into()),
        ),
        _ => Ok(()),
    }
}

/// Combine two already-rendered values: dict recurses key-by-key, list
/// extends, anything else overrides subject to the
/// `allow_*` permissions.
pub fn merge_rendered(
    base: Value,
    incoming: Value,
    settings: &Settings,
) -> Result<Value, InterpolationError> {
    match (base, incoming) {
        (Value::Map(mut a), Value::Map(b)) => {
            for (k, v) in b {
                match a.shift_remove(&k) {
                    Some(existing) => {
                        a.insert(k, merge_rendered(existing, v, settings)?);
                    }
                    None => {
                        a.insert(k, v);
                    }
                }
            }
            Ok(Value::Map(a))
        }
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        // A `null` layered over a mapping or list leaves the container
        // untouched — the override only ever applies to a scalar base.
        (base @ Value::Map(_), Value::Null) | (base @ Value::List(_), Value::Null) => Ok(base),
        // Existing `null` is treated as absent: a mapping/list always wins
        // over it, independent of the `allow_*_over_*` permissions.
        (Value::Null, incoming @ (Value::Map(_) | Value::List(_))) => Ok(incoming),
        (_, Value::Null) if !settings.allow_none_override => Err(
            InterpolationError::Expression("None may not override a previous value here".into()),
        ),
        (_, Value::Null) => Ok(Value::Null),
        (Value::Map(_), incoming) if incoming.is_scalar() => {
            if settings.allow_scalar_over_dict {
                Ok(incoming)
            } else {
                Err(InterpolationError::Expression(
                    "mapping cannot be overwritten by a scalar".into(),
                ))
            }
        }
        (Value::List(_), incoming) if incoming.is_scalar() => {
            if settings.allow_scalar_over_list {
                Ok(incoming)
            } else {
                Err(InterpolationError::Expression(
                    "list cannot be overwritten by a scalar".into(),
                ))
            }
        }
        (base, incoming @ Value::List(_)) if base.is_scalar() => {
            if settings.allow_list_over_scalar {
                Ok(incoming)
            } else {
                Err(InterpolationError::Expression(
                    "scalar cannot be overwritten by a list".into(),
                ))
            }
        }
        (base, incoming @ Value::Map(_)) if base.is_scalar() => {
            if settings.allow_dict_over_scalar {
                Ok(incoming)
            } else {
                Err(InterpolationError::Expression(
                    "scalar cannot be overwritten by a mapping".into(),
                ))
            }
        }
        (_, incoming) => Ok(incoming),
    }
}
