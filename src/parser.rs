//! # Sentinel tokenizer
//!
//! Hand-rolled scanner that turns a raw string value into an `Item` tree,
//! splitting on the configured reference/query sentinels and honoring the
//! escape character. A value with no sentinel at all takes the cheap path
//! straight to `Item::Scalar` — mirroring the sentinel-count fast path in
//! `original_source/reclass/values/parser.py`, reimplemented by hand
//! instead of via `pyparsing`.

use crate::error::InterpolationError;
use crate::item::Item;
use crate::settings::Settings;
use crate::value::Value;

/// Parse one raw string value into an `Item`. A value containing exactly
/// one segment returns that segment directly (preserving e.g. a bare
/// `${a}` as `Item::Reference` rather than wrapping it in a
/// single-element `Composite`, so its native type survives rendering).
pub fn parse_item(s: &str, settings: &Settings) -> Result<Item, InterpolationError> {
    let mut items = tokenize(s, settings)?;
    Ok(if items.len() == 1 {
        items.remove(0)
    } else {
        Item::Composite(items)
    })
}

fn tokenize(s: &str, settings: &Settings) -> Result<Vec<Item>, InterpolationError> {
    let chars: Vec<char> = s.chars().collect();
    let (ref_open, ref_close) = (&settings.reference_sentinels.0, &settings.reference_sentinels.1);
    let (q_open, q_close) = (&settings.query_sentinels.0, &settings.query_sentinels.1);

    let mut out = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == settings.escape_character {
            // `\\$` (two escape chars right before a sentinel open) is a
            // *double* escape: it collapses to one literal backslash and
            // leaves the sentinel itself untouched, so it still opens a
            // real reference/query below — not `\${` escaping, which
            // swallows the sentinel as plain text instead.
            if is_double_escape(&chars, i, settings.escape_character, ref_open)
                || is_double_escape(&chars, i, settings.escape_character, q_open)
            {
                literal.push(settings.escape_character);
                i += 2;
                continue;
            }
            if matches_at(&chars, i + 1, ref_open) {
                literal.push_str(ref_open);
                i += 1 + char_len(ref_open);
                continue;
            }
            if matches_at(&chars, i + 1, q_open) {
                literal.push_str(q_open);
                i += 1 + char_len(q_open);
                continue;
            }
            // A backslash not directly escaping a sentinel-open is passed
            // through unchanged, one character at a time — it never merges
            // with whatever follows.
            literal.push(chars[i]);
            i += 1;
            continue;
        }
        if matches_at(&chars, i, ref_open) {
            flush_literal(&mut out, &mut literal);
            let (inner, next_i) = extract_balanced(s, &chars, i, i + char_len(ref_open), ref_open, ref_close, settings)?;
            out.push(Item::Reference(tokenize(&inner, settings)?));
            i = next_i;
            continue;
        }
        if matches_at(&chars, i, q_open) {
            flush_literal(&mut out, &mut literal);
            let (inner, next_i) = extract_balanced(s, &chars, i, i + char_len(q_open), q_open, q_close, settings)?;
            out.push(Item::Query(crate::query::parse(&inner, settings.delimiter)?));
            i = next_i;
            continue;
        }
        literal.push(chars[i]);
        i += 1;
    }
    flush_literal(&mut out, &mut literal);
    if out.is_empty() {
        out.push(Item::Scalar(Value::String(String::new())));
    }
    Ok(out)
}

fn flush_literal(out: &mut Vec<Item>, literal: &mut String) {
    if !literal.is_empty() {
        out.push(Item::Scalar(Value::String(std::mem::take(literal))));
    }
}

fn char_len(pat: &str) -> usize {
    pat.chars().count()
}

/// `chars[i]` and `chars[i+1]` are both the escape character and `pat`
/// (a sentinel open or close) immediately follows — `\\${` collapses to a
/// literal `\` while leaving `${` itself to open a real sentinel,
/// mirroring `parser_funcs.py`'s `double_escape` rule.
fn is_double_escape(chars: &[char], i: usize, escape: char, pat: &str) -> bool {
    chars.get(i) == Some(&escape) && chars.get(i + 1) == Some(&escape) && matches_at(chars, i + 2, pat)
}

fn matches_at(chars: &[char], i: usize, pat: &str) -> bool {
    let pat_chars: Vec<char> = pat.chars().collect();
    if i + pat_chars.len() > chars.len() {
        return false;
    }
    chars[i..i + pat_chars.len()] == pat_chars[..]
}

/// Consume from `start` (just past the opening sentinel) to the matching
/// closing sentinel, tracking nesting of the same sentinel pair. Returns
/// the inner text and the index just past the closing sentinel.
/// `sentinel_start` is the index of the opening sentinel itself, used only
/// to report a `ParseError` location if the sentinel never closes.
fn extract_balanced(
    full: &str,
    chars: &[char],
    sentinel_start: usize,
    start: usize,
    open: &str,
    close: &str,
    settings: &Settings,
) -> Result<(String, usize), InterpolationError> {
    let mut depth = 1usize;
    let mut i = start;
    let mut inner = String::new();

    while i < chars.len() {
        if chars[i] == settings.escape_character {
            // Raw text is copied through unchanged here — the recursive
            // `tokenize` call on `inner` (for a Reference body) is what
            // actually collapses escapes, exactly once. This scan only
            // needs to know whether an occurrence of `open`/`close` counts
            // towards nesting depth: a double-escaped one is a real,
            // live sentinel once collapsed (depth-affecting); a
            // single-escaped one is a literal (not depth-affecting).
            if is_double_escape(chars, i, settings.escape_character, open) {
                depth += 1;
                inner.push(chars[i]);
                inner.push(chars[i]);
                inner.push_str(open);
                i += 2 + char_len(open);
                continue;
            }
            if is_double_escape(chars, i, settings.escape_character, close) {
                depth -= 1;
                if depth == 0 {
                    // The collapsed literal backslash belongs to this
                    // level's content; the close sentinel itself terminates
                    // it and is not part of `inner`.
                    inner.push(chars[i]);
                    return Ok((inner, i + 2 + char_len(close)));
                }
                inner.push(chars[i]);
                inner.push(chars[i]);
                inner.push_str(close);
                i += 2 + char_len(close);
                continue;
            }
            if matches_at(chars, i + 1, open) || matches_at(chars, i + 1, close) {
                inner.push(chars[i]);
                inner.push_str(if matches_at(chars, i + 1, open) { open } else { close });
                i += 1 + char_len(if matches_at(chars, i + 1, open) { open } else { close });
                continue;
            }
            inner.push(chars[i]);
            i += 1;
            continue;
        }
        if matches_at(chars, i, open) {
            depth += 1;
            inner.push_str(open);
            i += char_len(open);
            continue;
        }
        if matches_at(chars, i, close) {
            depth -= 1;
            if depth == 0 {
                return Ok((inner, i + char_len(close)));
            }
            inner.push_str(close);
            i += char_len(close);
            continue;
        }
        inner.push(chars[i]);
        i += 1;
    }
    Err(unterminated_sentinel_error(full, chars, sentinel_start, open))
}

/// Build the `ParseError` for a sentinel opened at `sentinel_start` that
/// never finds its matching close, mirroring
/// `original_source/reclass/values/parser.py`'s `ParseError` on an
/// unbalanced `${`/`$[`.
fn unterminated_sentinel_error(full: &str, chars: &[char], sentinel_start: usize, open: &str) -> InterpolationError {
    let consumed: String = chars[..sentinel_start].iter().collect();
    let lineno = consumed.matches('\n').count() + 1;
    let col = match consumed.rfind('\n') {
        Some(pos) => consumed[pos + 1..].chars().count() + 1,
        None => sentinel_start + 1,
    };
    InterpolationError::Parse {
        message: format!("unbalanced sentinel '{open}'"),
        line: full.lines().nth(lineno - 1).unwrap_or(full).to_string(),
        col,
        lineno,
    }
}
