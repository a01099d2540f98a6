//! Linking and resolution errors.
//!
//! None of these abort a compilation run: the driver treats every
//! `LinkError` as "unresolved" and falls back to runtime checks.

use oatc_dex::{InvokeType, ModuleId};
use thiserror::Error;

/// Error raised while looking up, linking or resolving a class member.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// No module on the class path defines the descriptor.
    #[error("NoClassDefFoundError: {0}")]
    ClassNotFound(String),

    /// Array and primitive classes are not modelled by the linker.
    #[error("unsupported class {0}: array and primitive classes are not linked")]
    UnsupportedClass(String),

    /// Field lookup failed.
    #[error("NoSuchFieldError: {class}.{name}")]
    NoSuchField { class: String, name: String },

    /// Method lookup failed.
    #[error("NoSuchMethodError: {class}.{name}{signature}")]
    NoSuchMethod {
        class: String,
        name: String,
        signature: String,
    },

    /// The member exists but does not match the way it is referenced.
    #[error("IncompatibleClassChangeError: {0}")]
    IncompatibleClassChange(String),

    /// The class is its own superclass, directly or transitively.
    #[error("ClassCircularityError: {0}")]
    ClassCircularity(String),

    /// A previous link attempt of the class failed.
    #[error("class {0} is erroneous")]
    Erroneous(String),

    /// A constant-pool index is out of range.
    #[error("{module}: {table} index {index} out of range")]
    InvalidIndex {
        module: ModuleId,
        table: &'static str,
        index: u32,
    },

    /// The module id is not on the class path.
    #[error("unknown module {0}")]
    UnknownModule(ModuleId),
}

impl LinkError {
    pub fn class_not_found(descriptor: impl Into<String>) -> Self {
        LinkError::ClassNotFound(descriptor.into())
    }

    pub fn no_such_field(class: impl Into<String>, name: impl Into<String>) -> Self {
        LinkError::NoSuchField {
            class: class.into(),
            name: name.into(),
        }
    }

    pub fn no_such_method(
        class: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        LinkError::NoSuchMethod {
            class: class.into(),
            name: name.into(),
            signature: signature.into(),
        }
    }

    /// A method was referenced with an invoke kind it cannot satisfy.
    pub fn incompatible_invoke(method: &str, expected: InvokeType) -> Self {
        LinkError::IncompatibleClassChange(format!(
            "method {method} does not support invoke-{expected}"
        ))
    }

    pub fn invalid_index(module: ModuleId, table: &'static str, index: u32) -> Self {
        LinkError::InvalidIndex {
            module,
            table,
            index,
        }
    }
}

/// Result type for linker operations
pub type LinkResult<T> = Result<T, LinkError>;
