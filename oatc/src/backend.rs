//! The code-generation seam.
//!
//! The driver never generates machine code itself. For every compilable
//! method it builds a [`CompilationUnit`] and hands it to a
//! [`CompilerBackend`] together with a [`CompileContext`], through which the
//! backend asks the driver's query surface what it may assume (see
//! [`crate::CompilerDriver::compute_invoke_info`] and friends).

use crate::compiled::CompiledMethodResult;
use crate::driver::CompilerDriver;
use crate::options::InstructionSet;
use crate::patch::PatchReferrer;
use crate::verifier::VerifiedMethod;
use bumpalo::Bump;
use oatc_dex::{AccessFlags, ClassReference, CodeItem, InvokeType, MethodId, MethodReference, Module, ModuleId};
use std::fmt::{self, Debug};
use std::sync::Arc;
use thiserror::Error;

/// How much bytecode-level rewriting the fallback path may do for a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DexToDexLevel {
    /// Leave the bytecode alone.
    DontCompile,
    /// Only the rewrites the runtime depends on.
    Required,
    /// Everything, the class verified cleanly.
    Optimize,
}

/// Runtime stubs the backend can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrampolineKind {
    InterpreterToInterpreterBridge,
    InterpreterToCompiledCodeBridge,
    JniDlsymLookup,
    ImtConflict,
    Resolution,
    ToInterpreterBridge,
}

impl TrampolineKind {
    pub const ALL: [TrampolineKind; 6] = [
        TrampolineKind::InterpreterToInterpreterBridge,
        TrampolineKind::InterpreterToCompiledCodeBridge,
        TrampolineKind::JniDlsymLookup,
        TrampolineKind::ImtConflict,
        TrampolineKind::Resolution,
        TrampolineKind::ToInterpreterBridge,
    ];
}

/// Family of a backend; affects which direct pointers the driver hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Generates code straight from bytecode.
    Quick,
    /// Goes through an external IR; always dispatches through the dex cache.
    Portable,
}

/// Errors reported by a backend for one method. They never abort the run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl BackendError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        BackendError::Unsupported(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        BackendError::Internal(message.into())
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// One method handed to the backend.
#[derive(Clone)]
pub struct CompilationUnit<'a> {
    pub module_id: ModuleId,
    pub module: &'a Module,
    pub class_def_index: u16,
    pub method_index: u32,
    pub access_flags: AccessFlags,
    /// How the method itself is invoked: static, direct or virtual.
    pub invoke_type: InvokeType,
    pub code: Option<&'a CodeItem>,
    pub dex_to_dex_level: DexToDexLevel,
    /// What the verifier proved, when it accepted the method.
    pub verified_method: Option<Arc<VerifiedMethod>>,
}

impl Debug for CompilationUnit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationUnit")
            .field("method", &self.method_reference())
            .field("name", &self.name())
            .field("invoke_type", &self.invoke_type)
            .field("dex_to_dex_level", &self.dex_to_dex_level)
            .finish_non_exhaustive()
    }
}

impl CompilationUnit<'_> {
    pub fn method_reference(&self) -> MethodReference {
        MethodReference::new(self.module_id, self.method_index)
    }

    pub fn class_reference(&self) -> ClassReference {
        ClassReference::new(self.module_id, self.class_def_index)
    }

    pub fn referrer(&self) -> PatchReferrer {
        PatchReferrer::new(self.module_id, self.class_def_index, self.method_index)
    }

    pub fn method_id(&self) -> Option<&MethodId> {
        self.module.method_id(self.method_index)
    }

    pub fn name(&self) -> &str {
        self.method_id().map_or("<unknown>", |id| id.name.as_str())
    }

    /// `Lpkg/Class;->name(sig)` for diagnostics.
    pub fn pretty_method(&self) -> String {
        match self.method_id() {
            Some(id) => format!(
                "{}->{}{}",
                self.module.type_descriptor(id.class_idx).unwrap_or("<unknown>"),
                id.name,
                id.signature
            ),
            None => format!("{}", self.method_reference()),
        }
    }
}

/// Per-call state the driver lends to the backend.
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    driver: &'a CompilerDriver,
    arena: &'a Bump,
}

impl<'a> CompileContext<'a> {
    pub(crate) fn new(driver: &'a CompilerDriver, arena: &'a Bump) -> Self {
        Self { driver, arena }
    }

    pub fn driver(&self) -> &'a CompilerDriver {
        self.driver
    }

    /// Scratch memory, reset after the call returns.
    pub fn arena(&self) -> &'a Bump {
        self.arena
    }

    pub fn instruction_set(&self) -> InstructionSet {
        self.driver.options().instruction_set
    }
}

/// Instruction selection and code generation.
pub trait CompilerBackend: Send + Sync + Debug {
    fn kind(&self) -> BackendKind {
        BackendKind::Quick
    }

    /// Compile a verified method with bytecode.
    fn compile(
        &self,
        unit: &CompilationUnit<'_>,
        cx: &CompileContext<'_>,
    ) -> BackendResult<CompiledMethodResult>;

    /// Compile the native-call stub of a native method. `Ok(None)` skips it.
    fn compile_jni(
        &self,
        _unit: &CompilationUnit<'_>,
        _cx: &CompileContext<'_>,
    ) -> BackendResult<Option<CompiledMethodResult>> {
        Ok(None)
    }

    /// Safe compilation of a method the verifier did not accept. `Ok(None)`
    /// leaves it to the interpreter.
    fn compile_dex_to_dex(
        &self,
        _unit: &CompilationUnit<'_>,
        _cx: &CompileContext<'_>,
    ) -> BackendResult<Option<CompiledMethodResult>> {
        Ok(None)
    }

    fn create_trampoline(
        &self,
        kind: TrampolineKind,
        _instruction_set: InstructionSet,
    ) -> BackendResult<Vec<u8>> {
        Err(BackendError::unsupported(format!("{kind:?} trampoline")))
    }
}
