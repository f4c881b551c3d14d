//! # Query language
//!
//! The small `$[...]` mini-language evaluated against the frozen
//! inventory-of-exports view (and, for `self:`-prefixed predicate terms,
//! against the current node's own tree). Grounded on
//! `original_source/reclass/values/invitem.py` and the parser-function
//! sentinel conventions in `values/parser_funcs.py`.

use crate::error::InterpolationError;
use crate::item::RenderContext;
use crate::path::Path;
use crate::value::Value;
use indexmap::IndexMap;

/// Leading `+Option` flags a query body may carry before its expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// `+IgnoreErrors` — suppress a `self:` resolution failure for an
    /// individual node rather than aborting the whole query.
    pub ignore_errors: bool,
    /// `+AllEnvs` — disable environment filtering. A single `Core::inventory`
    /// call already only ever builds one environment's worth of nodes, so
    /// this flag is parsed and carried for forward compatibility but has no
    /// effect on the single-environment inventory view built here (see
    /// DESIGN.md's Open Question decisions).
    pub all_envs: bool,
}

/// A parsed `$[...]` body.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    /// `$[ exports:path ]` → a mapping `{node: value}` for every node whose
    /// exports contain `path`.
    Value { path: Path, options: QueryOptions },

    /// `$[ exports:path if predicate ]` → the same projection, restricted to
    /// nodes whose exports satisfy `predicate`.
    Filtered {
        path: Path,
        predicate: Predicate,
        options: QueryOptions,
    },

    /// `$[ if predicate ]` → an ordered list of node names whose exports
    /// satisfy `predicate`.
    ListFilter {
        predicate: Predicate,
        options: QueryOptions,
    },
}

/// A boolean test combining one or more terms with `and`/`or`, left to
/// right, no operator precedence (matches the original grammar).
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub terms: Vec<Term>,
    pub operators: Vec<BoolOp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// Which tree a predicate term's path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSource {
    /// Resolved against the exports of the node currently being tested.
    Exports,
    /// Resolved against the parameters of the node the query itself lives
    /// in, regardless of which node is currently being tested.
    SelfRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// `source:path` truthy-check: the value at `path` exists and is not
    /// false/empty/null.
    Truthy { source: TermSource, path: Path },
    /// `source:path == literal` / `source:path != literal`.
    Equals {
        source: TermSource,
        path: Path,
        value: Value,
        negate: bool,
    },
}

pub enum QueryOutcome {
    Value(Value),
    NeedsPath(Path),
}

/// Intermediate result of evaluating one term or a whole predicate: either a
/// verdict, or a signal that a `self:` path must be resolved first.
enum Verdict {
    Bool(bool),
    NeedsPath(Path),
}

impl QueryExpr {
    pub fn eval(&self, ctx: &dyn RenderContext) -> Result<QueryOutcome, InterpolationError> {
        match self {
            QueryExpr::Value { path, options } => eval_value(path, *options, ctx),
            QueryExpr::Filtered {
                path,
                predicate,
                options,
            } => eval_filtered(path, predicate, *options, ctx),
            QueryExpr::ListFilter { predicate, options } => {
                eval_list_filter(predicate, *options, ctx)
            }
        }
    }
}

fn sorted_inventory<'a>(
    ctx: &'a dyn RenderContext,
) -> Result<Vec<(&'a String, &'a Value)>, InterpolationError> {
    let inv = ctx.inventory().ok_or_else(|| {
        InterpolationError::Expression("inventory not yet available for query".into())
    })?;
    let mut entries: Vec<(&String, &Value)> = inv.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    Ok(entries)
}

fn eval_value(
    path: &Path,
    options: QueryOptions,
    ctx: &dyn RenderContext,
) -> Result<QueryOutcome, InterpolationError> {
    let entries = sorted_inventory(ctx)?;
    let mut out = IndexMap::new();
    for (name, exports) in entries {
        if let Ok(v) = path.get_value(exports) {
            out.insert(name.clone(), v.clone());
        }
    }
    let _ = options;
    Ok(QueryOutcome::Value(Value::Map(out)))
}

fn eval_filtered(
    path: &Path,
    predicate: &Predicate,
    options: QueryOptions,
    ctx: &dyn RenderContext,
) -> Result<QueryOutcome, InterpolationError> {
    let entries = sorted_inventory(ctx)?;
    let mut out = IndexMap::new();
    for (name, exports) in entries {
        match predicate_holds(predicate, exports, ctx, options)? {
            Verdict::NeedsPath(p) => return Ok(QueryOutcome::NeedsPath(p)),
            Verdict::Bool(false) => continue,
            Verdict::Bool(true) => {}
        }
        if let Ok(v) = path.get_value(exports) {
            out.insert(name.clone(), v.clone());
        }
    }
    Ok(QueryOutcome::Value(Value::Map(out)))
}

fn eval_list_filter(
    predicate: &Predicate,
    options: QueryOptions,
    ctx: &dyn RenderContext,
) -> Result<QueryOutcome, InterpolationError> {
    let entries = sorted_inventory(ctx)?;
    let mut out = Vec::new();
    for (name, exports) in entries {
        match predicate_holds(predicate, exports, ctx, options)? {
            Verdict::NeedsPath(p) => return Ok(QueryOutcome::NeedsPath(p)),
            Verdict::Bool(true) => out.push(Value::String(name.clone())),
            Verdict::Bool(false) => {}
        }
    }
    Ok(QueryOutcome::Value(Value::List(out)))
}

/// Fold a predicate's terms left to right with its `and`/`or` operators,
/// short-circuiting on the first `self:` term that isn't resolvable yet.
fn predicate_holds(
    predicate: &Predicate,
    exports: &Value,
    ctx: &dyn RenderContext,
    options: QueryOptions,
) -> Result<Verdict, InterpolationError> {
    let mut acc = match eval_term(&predicate.terms[0], exports, ctx, options)? {
        Verdict::Bool(b) => b,
        needs @ Verdict::NeedsPath(_) => return Ok(needs),
    };
    for (op, term) in predicate.operators.iter().zip(predicate.terms.iter().skip(1)) {
        let next = match eval_term(term, exports, ctx, options)? {
            Verdict::Bool(b) => b,
            needs @ Verdict::NeedsPath(_) => return Ok(needs),
        };
        acc = match op {
            BoolOp::And => acc && next,
            BoolOp::Or => acc || next,
        };
    }
    Ok(Verdict::Bool(acc))
}

fn eval_term(
    term: &Term,
    exports: &Value,
    ctx: &dyn RenderContext,
    options: QueryOptions,
) -> Result<Verdict, InterpolationError> {
    match term {
        Term::Truthy { source, path } => match resolve_term_value(*source, path, exports, ctx, options)? {
            TermValue::Missing => Ok(Verdict::Bool(false)),
            TermValue::Value(v) => Ok(Verdict::Bool(is_truthy(v))),
            TermValue::NeedsPath(p) => Ok(Verdict::NeedsPath(p)),
        },
        Term::Equals {
            source,
            path,
            value,
            negate,
        } => match resolve_term_value(*source, path, exports, ctx, options)? {
            TermValue::Missing => Ok(Verdict::Bool(*negate)),
            TermValue::Value(v) => Ok(Verdict::Bool((&v == value) != *negate)),
            TermValue::NeedsPath(p) => Ok(Verdict::NeedsPath(p)),
        },
    }
}

enum TermValue {
    Value(Value),
    Missing,
    NeedsPath(Path),
}

fn resolve_term_value(
    source: TermSource,
    path: &Path,
    exports: &Value,
    ctx: &dyn RenderContext,
    options: QueryOptions,
) -> Result<TermValue, InterpolationError> {
    match source {
        TermSource::Exports => Ok(match path.get_value(exports) {
            Ok(v) => TermValue::Value(v.clone()),
            Err(_) => TermValue::Missing,
        }),
        TermSource::SelfRef => match ctx.get(path) {
            Ok(Some(v)) => Ok(TermValue::Value(v)),
            Ok(None) => {
                if options.ignore_errors {
                    Ok(TermValue::Missing)
                } else {
                    Err(InterpolationError::Resolve {
                        reference: format!("self:{path}"),
                        context: format!(" (query in node '{}')", ctx.current_node()),
                    })
                }
            }
            Err(needs) => Ok(TermValue::NeedsPath(needs)),
        },
    }
}

fn is_truthy(v: Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Int(i) => i != 0,
        Value::Float(f) => f != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::List(l) => !l.is_empty(),
        Value::Map(m) => !m.is_empty(),
    }
}

/// Parse a `$[...]` body (sentinels already stripped by the tokenizer) into
/// a `QueryExpr`. Grammar:
///   `[+IgnoreErrors] [+AllEnvs] exports:<path>[ if <predicate>]`
///   `[+IgnoreErrors] [+AllEnvs] if <predicate>`
pub fn parse(body: &str, delimiter: char) -> Result<QueryExpr, InterpolationError> {
    let mut rest = body.trim();
    let mut options = QueryOptions::default();
    loop {
        if let Some(r) = rest.strip_prefix("+IgnoreErrors") {
            options.ignore_errors = true;
            rest = r.trim_start();
            continue;
        }
        if let Some(r) = rest.strip_prefix("+AllEnvs") {
            options.all_envs = true;
            rest = r.trim_start();
            continue;
        }
        break;
    }

    if let Some(r) = rest.strip_prefix("if ") {
        let predicate = parse_predicate(r.trim(), delimiter)?;
        return Ok(QueryExpr::ListFilter { predicate, options });
    }

    let r = rest.strip_prefix("exports:").ok_or_else(|| {
        InterpolationError::Expression(format!(
            "query must start with 'exports:' or 'if ': {rest}"
        ))
    })?;

    if let Some(idx) = r.find(" if ") {
        let path = Path::parse(delimiter, r[..idx].trim());
        let predicate = parse_predicate(r[idx + 4..].trim(), delimiter)?;
        Ok(QueryExpr::Filtered {
            path,
            predicate,
            options,
        })
    } else {
        let path = Path::parse(delimiter, r.trim());
        Ok(QueryExpr::Value { path, options })
    }
}

fn parse_predicate(text: &str, delimiter: char) -> Result<Predicate, InterpolationError> {
    let mut terms = Vec::new();
    let mut operators = Vec::new();
    let mut rest = text;
    loop {
        let (term_text, op, remainder) = split_next_operator(rest);
        terms.push(parse_term(term_text.trim(), delimiter)?);
        match op {
            Some(op) => {
                operators.push(op);
                rest = remainder;
            }
            None => break,
        }
    }
    if terms.is_empty() {
        return Err(InterpolationError::Expression("empty predicate".into()));
    }
    Ok(Predicate { terms, operators })
}

fn split_next_operator(text: &str) -> (&str, Option<BoolOp>, &str) {
    if let Some(idx) = text.find(" and ") {
        (&text[..idx], Some(BoolOp::And), &text[idx + 5..])
    } else if let Some(idx) = text.find(" or ") {
        (&text[..idx], Some(BoolOp::Or), &text[idx + 4..])
    } else {
        (text, None, "")
    }
}

fn parse_term(text: &str, delimiter: char) -> Result<Term, InterpolationError> {
    if let Some(idx) = text.find("!=") {
        let (source, path) = parse_source_path(text[..idx].trim(), delimiter)?;
        let value = Value::parse_literal(strip_quotes(text[idx + 2..].trim()));
        return Ok(Term::Equals {
            source,
            path,
            value,
            negate: true,
        });
    }
    if let Some(idx) = text.find("==") {
        let (source, path) = parse_source_path(text[..idx].trim(), delimiter)?;
        let value = Value::parse_literal(strip_quotes(text[idx + 2..].trim()));
        return Ok(Term::Equals {
            source,
            path,
            value,
            negate: false,
        });
    }
    let (source, path) = parse_source_path(text, delimiter)?;
    Ok(Term::Truthy { source, path })
}

/// Split a predicate term's left-hand side into its source tag
/// (`exports:`/`self:`) and the remaining path.
fn parse_source_path(text: &str, delimiter: char) -> Result<(TermSource, Path), InterpolationError> {
    if let Some(rest) = text.strip_prefix("exports:") {
        Ok((TermSource::Exports, Path::parse(delimiter, rest.trim())))
    } else if let Some(rest) = text.strip_prefix("self:") {
        Ok((TermSource::SelfRef, Path::parse(delimiter, rest.trim())))
    } else {
        Err(InterpolationError::Expression(format!(
            "predicate term must start with 'exports:' or 'self:': {text}"
        )))
    }
}

fn strip_quotes(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')))
    {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
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
        inventory: IndexMap<String, Value>,
    }

    impl RenderContext for FakeCtx {
        fn get(&self, path: &Path) -> Result<Option<Value>, Path> {
            Ok(self.values.borrow().get(&path.to_string()).cloned())
        }
        fn settings(&self) -> &Settings {
            &self.settings
        }
        fn inventory(&self) -> Option<&IndexMap<String, Value>> {
            Some(&self.inventory)
        }
        fn current_node(&self) -> &str {
            "n1"
        }
    }

    fn exports_map(pairs: &[(&str, i64)]) -> Value {
        let mut m = IndexMap::new();
        for (k, v) in pairs {
            m.insert((*k).to_string(), Value::Int(*v));
        }
        Value::Map(m)
    }

    fn sample_inventory() -> IndexMap<String, Value> {
        let mut inv = IndexMap::new();
        inv.insert("n1".to_string(), exports_map(&[("a", 1), ("b", 2)]));
        inv.insert("n2".to_string(), exports_map(&[("a", 3), ("b", 4)]));
        inv
    }

    #[test]
    fn parses_plain_exports_lookup() {
        let expr = parse("exports:role", ':').unwrap();
        match expr {
            QueryExpr::Value { path, .. } => assert_eq!(path.to_string(), "role"),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_filtered_exports_with_equality() {
        let expr = parse("exports:a if exports:b == 4", ':').unwrap();
        match expr {
            QueryExpr::Filtered { path, predicate, .. } => {
                assert_eq!(path.to_string(), "a");
                assert_eq!(predicate.terms.len(), 1);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_and_chain() {
        let expr = parse("exports:a if exports:b == 2 and exports:a == 1", ':').unwrap();
        match expr {
            QueryExpr::Filtered { predicate, .. } => {
                assert_eq!(predicate.terms.len(), 2);
                assert_eq!(predicate.operators, vec![BoolOp::And]);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_leading_options() {
        let expr = parse("+IgnoreErrors exports:a", ':').unwrap();
        match expr {
            QueryExpr::Value { options, .. } => assert!(options.ignore_errors),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    /// `exports:a if exports:b == 4` over
    /// `{n1: {a:1,b:2}, n2: {a:3,b:4}}` → `{n2: 3}`.
    #[test]
    fn s5_filtered_value_projection() {
        let ctx = FakeCtx {
            settings: Settings::default(),
            values: RefCell::new(HashMap::new()),
            inventory: sample_inventory(),
        };
        let expr = parse("exports:a if exports:b == 4", ':').unwrap();
        match expr.eval(&ctx).unwrap() {
            QueryOutcome::Value(Value::Map(m)) => {
                assert_eq!(m.len(), 1);
                assert_eq!(m.get("n2"), Some(&Value::Int(3)));
            }
            _ => panic!("expected a map"),
        }
    }

    /// `if exports:b == 2` over the same exports with
    /// neither node matching → `[]`.
    #[test]
    fn s6_list_filter_no_match() {
        let ctx = FakeCtx {
            settings: Settings::default(),
            values: RefCell::new(HashMap::new()),
            inventory: sample_inventory(),
        };
        let expr = parse("if exports:b == 2", ':').unwrap();
        match expr.eval(&ctx).unwrap() {
            QueryOutcome::Value(Value::List(items)) => assert!(items.is_empty()),
            _ => panic!("expected a list"),
        }
    }

    /// `if exports:b == 2` with `{n1: {b:2}, n3: {b:2}}` →
    /// `["n1", "n3"]`.
    #[test]
    fn s6_list_filter_matches_in_sorted_order() {
        let mut inv = IndexMap::new();
        inv.insert("n3".to_string(), exports_map(&[("b", 2)]));
        inv.insert("n1".to_string(), exports_map(&[("b", 2)]));
        let ctx = FakeCtx {
            settings: Settings::default(),
            values: RefCell::new(HashMap::new()),
            inventory: inv,
        };
        let expr = parse("if exports:b == 2", ':').unwrap();
        match expr.eval(&ctx).unwrap() {
            QueryOutcome::Value(Value::List(items)) => {
                assert_eq!(
                    items,
                    vec![Value::String("n1".into()), Value::String("n3".into())]
                );
            }
            _ => panic!("expected a list"),
        }
    }

    #[test]
    fn self_term_reads_current_node_context_not_candidate() {
        let mut values = HashMap::new();
        values.insert("role".to_string(), Value::String("db".into()));
        let ctx = FakeCtx {
            settings: Settings::default(),
            values: RefCell::new(values),
            inventory: sample_inventory(),
        };
        let expr = parse("exports:a if self:role == 'db'", ':').unwrap();
        match expr.eval(&ctx).unwrap() {
            QueryOutcome::Value(Value::Map(m)) => assert_eq!(m.len(), 2),
            _ => panic!("expected a map"),
        }
    }

    #[test]
    fn missing_self_without_ignore_errors_fails() {
        let ctx = FakeCtx {
            settings: Settings::default(),
            values: RefCell::new(HashMap::new()),
            inventory: sample_inventory(),
        };
        let expr = parse("exports:a if self:role == 'db'", ':').unwrap();
        let err = expr.eval(&ctx).unwrap_err();
        assert!(matches!(err, InterpolationError::Resolve { .. }));
    }

    #[test]
    fn missing_self_with_ignore_errors_is_suppressed() {
        let ctx = FakeCtx {
            settings: Settings::default(),
            values: RefCell::new(HashMap::new()),
            inventory: sample_inventory(),
        };
        let expr = parse("+IgnoreErrors exports:a if self:role == 'db'", ':').unwrap();
        match expr.eval(&ctx).unwrap() {
            QueryOutcome::Value(Value::Map(m)) => assert!(m.is_empty()),
            _ => panic!("expected a map"),
        }
    }
}
