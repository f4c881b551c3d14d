//! # Path — dotted-key navigation
//!
//! Ordered sequence of key parts separated by a configurable delimiter,
//! supporting navigation, ancestor enumeration, and deletion over nested
//! `Value` trees with integer-indexable sequences.
//!
//! Grounded on `original_source/reclass/utils/dictpath.py`'s call sites
//! (`get_value`, `new_subpath`, `drop_first`, `exists_in`), re-derived since
//! the file itself was filtered out of the retrieval pack.

use crate::value::Value;
use std::fmt;

/// A dotted (or otherwise delimited) path into a nested `Value` tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    delimiter: char,
    parts: Vec<String>,
}

impl Path {
    pub fn root(delimiter: char) -> Self {
        Path {
            delimiter,
            parts: Vec::new(),
        }
    }

    pub fn parse(delimiter: char, s: &str) -> Self {
        if s.is_empty() {
            return Path::root(delimiter);
        }
        Path {
            delimiter,
            parts: s.split(delimiter).map(str::to_string).collect(),
        }
    }

    pub fn from_parts(delimiter: char, parts: Vec<String>) -> Self {
        Path { delimiter, parts }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Append a key, returning a new child path.
    pub fn new_subpath(&self, key: &str) -> Path {
        let mut parts = self.parts.clone();
        parts.push(key.to_string());
        Path {
            delimiter: self.delimiter,
            parts,
        }
    }

    /// All proper ancestors, from the root (exclusive of self) down to the
    /// immediate parent, shortest first.
    pub fn ancestors(&self) -> Vec<Path> {
        (0..self.parts.len())
            .map(|i| Path {
                delimiter: self.delimiter,
                parts: self.parts[..i].to_vec(),
            })
            .collect()
    }

    pub fn parent(&self) -> Option<Path> {
        if self.parts.is_empty() {
            None
        } else {
            Some(Path {
                delimiter: self.delimiter,
                parts: self.parts[..self.parts.len() - 1].to_vec(),
            })
        }
    }

    /// Drop the first component (used to strip the leading `exports`/`self`
    /// tag from a query-language path before resolving it).
    #[must_use]
    pub fn drop_first(&self) -> Path {
        if self.parts.is_empty() {
            self.clone()
        } else {
            Path {
                delimiter: self.delimiter,
                parts: self.parts[1..].to_vec(),
            }
        }
    }

    pub fn first(&self) -> Option<&str> {
        self.parts.first().map(String::as_str)
    }

    pub fn exists_in(&self, root: &Value) -> bool {
        resolve(root, &self.parts).is_some()
    }

    pub fn get_value<'a>(&self, root: &'a Value) -> Result<&'a Value, PathError> {
        resolve(root, &self.parts).ok_or_else(|| PathError::NotFound(self.to_string()))
    }

    pub fn get_value_mut<'a>(&self, root: &'a mut Value) -> Result<&'a mut Value, PathError> {
        resolve_mut(root, &self.parts).ok_or_else(|| PathError::NotFound(self.to_string()))
    }

    /// Set the value at this path, creating intermediate maps as needed.
    pub fn set_value(&self, root: &mut Value, value: Value) -> Result<(), PathError> {
        if self.parts.is_empty() {
            *root = value;
            return Ok(());
        }
        let mut cur = root;
        for key in &self.parts[..self.parts.len() - 1] {
            cur = step_create(cur, key)?;
        }
        let last = &self.parts[self.parts.len() - 1];
        match cur {
            Value::Map(m) => {
                m.insert(last.clone(), value);
                Ok(())
            }
            Value::List(l) => {
                let idx: usize = last
                    .parse()
                    .map_err(|_| PathError::NotAnIndex(last.clone()))?;
                if idx >= l.len() {
                    l.resize(idx + 1, Value::Null);
                }
                l[idx] = value;
                Ok(())
            }
            _ => Err(PathError::NotFound(self.to_string())),
        }
    }

    /// Remove the value at this path, if present.
    pub fn delete(&self, root: &mut Value) -> Option<Value> {
        if self.parts.is_empty() {
            return None;
        }
        let mut cur = root;
        for key in &self.parts[..self.parts.len() - 1] {
            cur = step_get_mut(cur, key)?;
        }
        let last = &self.parts[self.parts.len() - 1];
        match cur {
            Value::Map(m) => m.shift_remove(last),
            Value::List(l) => {
                let idx: usize = last.parse().ok()?;
                if idx < l.len() {
                    Some(l.remove(idx))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.parts
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(&self.delimiter.to_string())
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("not an integer index: {0}")]
    NotAnIndex(String),
}

fn resolve<'a>(root: &'a Value, parts: &[String]) -> Option<&'a Value> {
    let mut cur = root;
    for key in parts {
        cur = step_get(cur, key)?;
    }
    Some(cur)
}

fn resolve_mut<'a>(root: &'a mut Value, parts: &[String]) -> Option<&'a mut Value> {
    let mut cur = root;
    for key in parts {
        cur = step_get_mut(cur, key)?;
    }
    Some(cur)
}

fn step_get<'a>(cur: &'a Value, key: &str) -> Option<&'a Value> {
    match cur {
        Value::Map(m) => m.get(key),
        Value::List(l) => key.parse::<usize>().ok().and_then(|i| l.get(i)),
        _ => None,
    }
}

fn step_get_mut<'a>(cur: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match cur {
        Value::Map(m) => m.get_mut(key),
        Value::List(l) => key.parse::<usize>().ok().and_then(move |i| l.get_mut(i)),
        _ => None,
    }
}

fn step_create<'a>(cur: &'a mut Value, key: &str) -> Result<&'a mut Value, PathError> {
    if matches!(cur, Value::Null) {
        *cur = Value::map();
    }
    match cur {
        Value::Map(m) => Ok(m.entry(key.to_string()).or_insert(Value::Null)),
        Value::List(l) => {
            let idx: usize = key.parse().map_err(|_| PathError::NotAnIndex(key.to_string()))?;
            if idx >= l.len() {
                l.resize(idx + 1, Value::Null);
            }
            Ok(&mut l[idx])
        }
        _ => Err(PathError::NotFound(key.to_string())),
    }
}
