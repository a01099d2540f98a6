//! # oatc_dex
//!
//! In-memory model of the bytecode modules compiled by the `oatc` driver.
//!
//! A module is an archive of class definitions plus the constant pools their
//! code refers to. This crate provides:
//!
//! - stable identities ([`ClassReference`], [`MethodReference`], [`FieldReference`])
//! - [`AccessFlags`] and [`InvokeType`]
//! - the [`Instruction`] set and [`CodeItem`] bodies
//! - [`Module`] with lookups, validation, JSON loading and a content checksum
//! - [`ModuleBuilder`] for building modules programmatically

#![deny(clippy::print_stderr)]

pub mod access;
pub mod builder;
pub mod error;
pub mod ids;
pub mod instruction;
pub mod invoke;
pub mod module;

pub use access::AccessFlags;
pub use builder::{ClassDefBuilder, ModuleBuilder};
pub use error::{ModuleError, ModuleResult};
pub use ids::{ClassReference, FieldReference, MethodReference, ModuleId};
pub use instruction::{CodeItem, CodeReference, Instruction};
pub use invoke::InvokeType;
pub use module::{
    descriptor_package, field_size, ClassDef, EncodedField, EncodedMethod, FieldId, MethodId,
    Module, CLASS_INITIALIZER_NAME, CONSTRUCTOR_NAME,
};
