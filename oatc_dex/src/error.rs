//! Module model errors.

use thiserror::Error;

/// Error raised while loading or validating a module.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// A constant-pool index points past the end of its table.
    #[error("{location}: {table} index {index} out of range (table has {len} entries)")]
    IndexOutOfRange {
        location: String,
        table: &'static str,
        index: u32,
        len: usize,
    },

    /// A class is defined twice in the same module.
    #[error("{location}: duplicate class definition for {descriptor}")]
    DuplicateClassDef {
        location: String,
        descriptor: String,
    },

    /// A type descriptor is not well formed.
    #[error("{location}: malformed type descriptor {descriptor:?}")]
    MalformedDescriptor {
        location: String,
        descriptor: String,
    },

    /// The module does not fit the 16-bit class-def index space.
    #[error("{location}: too many class definitions ({count})")]
    TooManyClassDefs { location: String, count: usize },

    /// JSON (de)serialization failed.
    #[error("invalid module JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;
