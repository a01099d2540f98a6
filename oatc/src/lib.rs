//! # oatc
//!
//! Orchestration core of an ahead-of-time compiler for dex-style bytecode.
//!
//! A run takes the modules of a [`oatc_runtime::ClassPath`] through five
//! phases (image-class discovery, resolution, verification, class
//! initialization and compilation) and leaves behind:
//!
//! - [`ArtifactTables`]: compiled classes and methods
//! - [`DedupeStores`]: one canonical buffer per distinct code or metadata blob
//! - [`PatchLedger`]: relocations for the image writer to apply
//! - a [`CompileReport`] with per-method failures and [`StatsSnapshot`]
//!
//! Code generation and verification are plugged in through
//! [`CompilerBackend`] and [`Verifier`].
//!
//! ```ignore
//! let driver = CompilerDriver::builder(options, Arc::new(linker), Box::new(backend))
//!     .verifier(Box::new(verifier))
//!     .build()?;
//! let mut timings = TimingLogger::new("compile");
//! let report = driver.compile_all(&[app], &mut timings)?;
//! driver.patches().validate_patches(driver.tables())?;
//! ```

// Library code logs through `tracing`; never to stderr.
#![deny(clippy::print_stderr)]

pub mod arena;
pub mod backend;
pub mod compiled;
pub mod dedupe;
pub mod driver;
pub mod error;
pub mod image_classes;
pub mod options;
pub mod patch;
mod pipeline;
pub mod query;
pub mod report;
pub mod stats;
pub mod tables;
pub mod thread_pool;
pub mod timing;
pub mod verifier;

pub use arena::{ArenaGuard, ArenaPool};
pub use backend::{
    BackendError, BackendKind, BackendResult, CompilationUnit, CompileContext, CompilerBackend,
    DexToDexLevel, TrampolineKind,
};
pub use compiled::{CompiledClass, CompiledMethod, CompiledMethodResult, PatchRequest};
pub use dedupe::{dedupe_hash, Blob, DedupeStore, DedupeStores};
pub use driver::{CompilerDriver, CompilerDriverBuilder};
pub use error::{DriverError, DriverResult};
pub use image_classes::ImageClasses;
pub use options::{CompilerOptions, InstructionSet, InstructionSetFeatures};
pub use patch::{CallPatch, PatchInformation, PatchLedger, PatchReferrer, TypePatch};
pub use query::{
    DirectTarget, EmbeddedType, InstanceFieldInfo, InvokeInfo, StaticFieldInfo, TypeAccess,
};
pub use report::{CompileReport, MethodFailure};
pub use stats::{CompilationStats, Counter, StatsSnapshot};
pub use tables::ArtifactTables;
pub use thread_pool::{ThreadPool, WorkerPool};
pub use timing::{CumulativeLogger, TimingLogger};
pub use verifier::{
    PermissiveVerifier, VerificationResults, VerificationStatus, VerificationUnit, VerifiedMethod,
    VerifiedMethodResult, Verifier,
};
