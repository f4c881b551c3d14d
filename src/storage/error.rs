//! Storage Engine Error Types

use std::io;
use thiserror::Error;

/// Storage engine errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parse error
    #[error("YAML error in {uri}: {source}")]
    Yaml {
        uri: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Git error (VCS backend)
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// Invalid glob/regex pattern in a class-mappings rule
    #[error("invalid class-mappings pattern '{0}': {1}")]
    InvalidPattern(String, String),

    /// Malformed class-mappings rule (unterminated quote, bad token count)
    #[error("malformed class-mappings rule: {0}")]
    MalformedMapping(String),

    /// Node not found
    #[error("node '{0}' not found")]
    NodeNotFound(String),

    /// Two storage backends (or inventory base dirs) claim the same URI
    #[error("duplicate definition of '{name}': '{uri1}' and '{uri2}'")]
    DuplicateDefinition {
        name: String,
        uri1: String,
        uri2: String,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
