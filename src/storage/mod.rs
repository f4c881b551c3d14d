//! # Storage backends
//!
//! A `Storage` implementation resolves node/class names to parsed YAML
//! documents under a single environment (branch, in the VCS backend).
//! `filesystem` walks a directory tree with `walkdir`; `git` reads blobs out
//! of a repository with `git2`, treating branches as environments;
//! `cache` wraps either in an at-most-once-per-key load cache.
//!
//! Grounded on `original_source/reclass/storage/{loader,yaml_fs}.py`'s
//! node/class lookup contract and `core.py`'s class-mappings application.

pub mod cache;
pub mod error;
pub mod filesystem;
pub mod git;

pub use cache::CachedStorage;
pub use error::{StorageError, StorageResult};
pub use filesystem::FilesystemStorage;
pub use git::GitStorage;

use crate::value::Value;

/// A parsed class or node document, together with the URI it was loaded
/// from (used in error messages and `_reclass_.name.*` bookkeeping).
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub uri: String,
    pub value: Value,
    /// Slash-separated path of the node relative to the nodes root, minus
    /// its file extension (e.g. `alpha/node1`) — independent of
    /// `compose_node_name`'s dotted display name. Used when
    /// `class_mappings_match_path` asks for class-mapping patterns to be
    /// matched against storage layout rather than the node's short name.
    pub path: String,
}

/// One entry of a node inventory: the node's addressable name, the URI its
/// document was loaded from, and its storage-relative path (see
/// [`RawDocument::path`]).
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub name: String,
    pub uri: String,
    pub path: String,
}

/// A single class-mappings rule: a glob or regex pattern matched against a
/// node name, expanding to one or more class names to prepend ahead of the
/// node's own explicit `classes:` list.
#[derive(Debug, Clone)]
pub struct ClassMappingRule {
    pub pattern: MappingPattern,
    pub classes: Vec<String>,
}

/// A compiled class-mappings pattern. Both variants are compiled once, at
/// rule-load time, so repeated per-node evaluation (`Core::class_mappings_for`
/// runs once per node in the inventory) never re-parses the pattern text.
#[derive(Debug, Clone)]
pub enum MappingPattern {
    Glob(globset::GlobMatcher),
    Regex(regex::Regex),
}

impl MappingPattern {
    /// Compile `pattern` as a glob.
    pub fn glob(pattern: &str) -> StorageResult<MappingPattern> {
        let matcher = globset::Glob::new(pattern)
            .map_err(|e| StorageError::InvalidPattern(pattern.to_string(), e.to_string()))?
            .compile_matcher();
        Ok(MappingPattern::Glob(matcher))
    }

    /// Compile `pattern` (without its delimiting `/…/`) as a regex.
    pub fn regex(pattern: &str) -> StorageResult<MappingPattern> {
        let re = regex::Regex::new(pattern)
            .map_err(|e| StorageError::InvalidPattern(pattern.to_string(), e.to_string()))?;
        Ok(MappingPattern::Regex(re))
    }
}

/// Parse one `class_mappings.yml` key into a glob or `/regex/` pattern. A
/// key starting with `/` must also end with `/`; a missing closing slash
/// is a malformed rule rather than a glob with a literal leading slash.
/// Both kinds are compiled here so a bad pattern is reported when the
/// mapping file is loaded, not silently treated as a non-match later.
pub fn parse_mapping_pattern(raw: &str) -> StorageResult<MappingPattern> {
    if let Some(rest) = raw.strip_prefix('/') {
        let body = rest.strip_suffix('/').ok_or_else(|| {
            StorageError::MalformedMapping(format!("'{raw}' starts with '/' but has no closing '/'"))
        })?;
        MappingPattern::regex(body)
    } else {
        MappingPattern::glob(raw)
    }
}

/// Storage contract: look up nodes and classes for one environment.
/// Implementations are shared across a `rayon` worker pool, so they must be
/// `Send + Sync`.
pub trait Storage: Send + Sync {
    /// List every node available in `environment`.
    fn nodes(&self, environment: &str) -> StorageResult<Vec<NodeRef>>;

    /// Load a single node's raw document.
    fn get_node(&self, environment: &str, name: &str) -> StorageResult<RawDocument>;

    /// Load a single class's raw document, or `None` if it doesn't exist
    /// (the caller decides whether that's an error via
    /// `Settings::should_ignore_missing_class`).
    fn get_class(&self, environment: &str, classname: &str) -> StorageResult<Option<RawDocument>>;

    /// Class-mappings rules declared for `environment`, in file order.
    fn class_mappings(&self, environment: &str) -> StorageResult<Vec<ClassMappingRule>>;

    /// Every environment this backend knows about (branches for `git`, the
    /// single configured environment for `filesystem`).
    fn environments(&self) -> StorageResult<Vec<String>>;
}
