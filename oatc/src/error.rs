//! Driver error types.
//!
//! Every variant is a broken pipeline invariant or bad configuration and
//! aborts the run. Unresolved references, failed verification and declined
//! fast paths are state, not errors, and never show up here.

use crate::backend::BackendError;
use oatc_dex::{ClassReference, MethodReference, ModuleId};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal driver error
#[derive(Debug, Error)]
pub enum DriverError {
    /// Invalid compiler options.
    #[error("invalid compiler options: {0}")]
    Config(String),

    /// Options file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A compiled class was installed twice.
    #[error("duplicate compiled class for {class}")]
    DuplicateClass { class: ClassReference },

    /// A compiled method was installed twice.
    #[error("duplicate compiled method for {method}")]
    DuplicateMethod { method: MethodReference },

    /// A patch points outside the code it patches.
    #[error("patch at literal offset {literal_offset} is outside the {code_size}-byte code of {method}")]
    PatchOutOfBounds {
        method: MethodReference,
        literal_offset: u32,
        code_size: usize,
    },

    /// A patch was recorded for a method that has no compiled code.
    #[error("patch recorded for {method}, which has no compiled code")]
    PatchWithoutCode { method: MethodReference },

    /// A module id is not on the class path.
    #[error("unknown module {0}")]
    UnknownModule(ModuleId),

    /// `compile_one` was asked for a method no class declares.
    #[error("no class declares {0}")]
    MethodNotFound(MethodReference),

    /// The worker threads could not be started.
    #[error("cannot start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The backend could not produce a runtime stub.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl DriverError {
    pub fn config(message: impl Into<String>) -> Self {
        DriverError::Config(message.into())
    }
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;
