//! # oatc_runtime
//!
//! The slice of a managed runtime the `oatc` driver compiles against:
//!
//! - [`ClassPath`]: ordered modules, first definition wins
//! - [`ClassLinker`]: class lookup, linking (field layout, vtables) and
//!   constant-pool resolution through per-module [`DexCache`]s
//! - [`LinkedClass`] with its lifecycle [`ClassStatus`]
//! - compile-time initialization behind [`InitializationPolicy`]
//! - [`ImageSpace`]: addresses of an existing boot image
//!
//! Nothing here executes bytecode. Array and primitive classes are not
//! modelled; references to them fail to resolve, which callers treat like
//! any other unresolved reference.

#![deny(clippy::print_stderr)]

pub mod class;
pub mod class_path;
pub mod dex_cache;
pub mod error;
pub mod image;
pub mod init;
pub mod linker;
pub mod status;

pub use class::{LinkedClass, LinkedField, LinkedMethod, OBJECT_HEADER_SIZE};
pub use class_path::{ClassPath, ClassPathEntry, ModuleOrigin};
pub use dex_cache::DexCache;
pub use error::{LinkError, LinkResult};
pub use image::{ImageMethod, ImageSpace};
pub use init::{InitializationPolicy, NeverInitializePolicy, TrivialInitializerPolicy};
pub use linker::{ClassLinker, OBJECT_DESCRIPTOR};
pub use status::ClassStatus;
