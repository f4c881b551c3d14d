//! # Error taxonomy
//!
//! One `thiserror`-derived enum per failure domain, each carrying
//! structured context and a POSIX-style exit code. Grounded on
//! `original_source/reclass/errors.py` (`ReclassException` hierarchy, `rc`
//! attribute per subclass) and the same `#[error(...)]`/`#[from]` pattern
//! used throughout this crate's other error enums.

use thiserror::Error;

/// Exit codes shared with the CLI.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const USAGE: i32 = 64;
    pub const DATA: i32 = 65;
    pub const IO: i32 = 66;
    pub const PERMISSION: i32 = 77;
    pub const CONFIG: i32 = 78;
}

/// Configuration-level errors: duplicate/overlapping storage URIs, invalid
/// option combinations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the inventory URIs must not be the same for nodes and classes: {0}")]
    DuplicateUri(String),

    #[error("the URIs for the nodes and classes inventories must not overlap, but {0} and {1} do")]
    OverlappingUri(String, String),

    #[error("invalid option combination: {0}")]
    InvalidOptionCombination(String),

    #[error(transparent)]
    Figment(#[from] figment::Error),
}

/// Not-found errors: node, class.
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("node '{name}' not found under {storage}://{uri}")]
    Node {
        storage: String,
        name: String,
        uri: String,
    },

    #[error("class '{classname}' (in ancestry of node '{nodename}') not found under {storage}://{uri}")]
    Class {
        storage: String,
        classname: String,
        uri: String,
        nodename: String,
    },
}

/// Naming errors: invalid characters in class names, duplicate node names.
#[derive(Debug, Error)]
pub enum NamingError {
    #[error("invalid character '{invalid_character}' in class name '{classname}'")]
    InvalidClassname {
        invalid_character: char,
        classname: String,
    },

    #[error("{storage}: definition of node '{name}' in '{uri2}' collides with definition in '{uri1}'. Nodes can only be defined once per inventory")]
    DuplicateNodeName {
        storage: String,
        name: String,
        uri1: String,
        uri2: String,
    },

    #[error("relative class name '{classname}' (referenced from '{context}') climbs above the root namespace")]
    RelativeClassAboveRoot { classname: String, context: String },
}

/// Parse/resolve/interpolation errors, the `InterpolationError` family.
#[derive(Debug, Error)]
pub enum InterpolationError {
    #[error("parse error: {message} at char {col} (line {lineno})")]
    Parse {
        message: String,
        line: String,
        col: usize,
        lineno: usize,
    },

    #[error("cannot resolve {reference}{context}")]
    Resolve {
        reference: String,
        context: String,
    },

    #[error("infinite recursion while resolving {reference} at {path}")]
    InfiniteRecursion { path: String, reference: String },

    #[error("bad reference count for path: {path}")]
    BadReferenceCount { path: String },

    #[error("expression error: {0}")]
    Expression(String),

    #[error("failed inv query {query}{context} --> {node}: {source}")]
    Query {
        query: String,
        node: String,
        context: String,
        #[source]
        source: Box<InterpolationError>,
    },
}

impl InterpolationError {
    /// Annotate with the node name and uri being built, mirroring
    /// `errors.py::InterpolationError._get_message`'s `=> node` / `in uri`
    /// framing.
    pub fn headline(&self, nodename: &str) -> String {
        format!("=> {nodename}\n   {self}")
    }
}

/// Top-level error type returned by `Core` and the storage layer.
#[derive(Debug, Error)]
pub enum ReclassError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error("{0}")]
    Interpolation(#[source] InterpolationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),

    #[error("{0} error(s) occurred:\n{1}")]
    Aggregate(usize, String),
}

impl From<InterpolationError> for ReclassError {
    fn from(e: InterpolationError) -> Self {
        ReclassError::Interpolation(e)
    }
}

impl ReclassError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ReclassError::Config(_) => exit_code::CONFIG,
            ReclassError::NotFound(_) => exit_code::IO,
            ReclassError::Naming(_) => exit_code::DATA,
            ReclassError::Interpolation(_) => exit_code::DATA,
            ReclassError::Io(_) => exit_code::IO,
            ReclassError::Yaml(_) => exit_code::DATA,
            ReclassError::Git(_) => exit_code::IO,
            ReclassError::Storage(e) => match e {
                crate::storage::StorageError::NodeNotFound(_) => exit_code::IO,
                crate::storage::StorageError::Io(_) => exit_code::IO,
                crate::storage::StorageError::Git(_) => exit_code::IO,
                _ => exit_code::DATA,
            },
            ReclassError::Aggregate(..) => exit_code::DATA,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReclassError>;
