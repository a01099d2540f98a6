//! Compile-time class initialization.
//!
//! Running a static initializer while compiling is only sound when it has no
//! observable side effects. Which initializers qualify is a policy decision,
//! so it sits behind [`InitializationPolicy`].

use crate::class::LinkedClass;
use crate::linker::ClassLinker;
use crate::status::ClassStatus;
use oatc_dex::{CodeItem, Instruction, Module};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::trace;

/// Decides whether a static initializer may run at compile time.
pub trait InitializationPolicy: Send + Sync + Debug {
    fn may_run_initializer(&self, class: &LinkedClass, clinit: &CodeItem, module: &Module) -> bool;
}

/// Accepts initializers that only store constants into the class's own
/// static fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrivialInitializerPolicy;

/// Holder classes that exist to defer initialization to run time.
const NO_PRELOAD_HOLDER_SUFFIX: &str = "$NoPreloadHolder;";

impl InitializationPolicy for TrivialInitializerPolicy {
    fn may_run_initializer(&self, class: &LinkedClass, clinit: &CodeItem, module: &Module) -> bool {
        if class.descriptor().ends_with(NO_PRELOAD_HOLDER_SUFFIX) {
            return false;
        }
        clinit.insns.iter().all(|insn| match insn {
            Instruction::Nop
            | Instruction::Const { .. }
            | Instruction::Move { .. }
            | Instruction::ConstString { .. }
            | Instruction::ReturnVoid => true,
            Instruction::SPut { field_idx, .. } => module
                .field_id(*field_idx)
                .and_then(|f| module.type_descriptor(f.class_idx))
                .is_some_and(|owner| owner == class.descriptor()),
            _ => false,
        })
    }
}

/// Never runs an initializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverInitializePolicy;

impl InitializationPolicy for NeverInitializePolicy {
    fn may_run_initializer(&self, _: &LinkedClass, _: &CodeItem, _: &Module) -> bool {
        false
    }
}

impl ClassLinker {
    /// Try to move `class` to [`ClassStatus::Initialized`].
    ///
    /// The class must be verified and its superclass and interfaces must be
    /// initializable. A class with a static initializer is only initialized
    /// when `can_init_statics` is set and `policy` accepts the initializer.
    /// Returns whether the class ended up initialized.
    pub fn ensure_initialized(
        &self,
        class: &Arc<LinkedClass>,
        can_init_statics: bool,
        policy: &dyn InitializationPolicy,
    ) -> bool {
        if class.is_initialized() {
            return true;
        }
        if !class.status().is_verified() {
            return false;
        }
        if let Some(superclass) = class.superclass() {
            if !self.ensure_initialized(superclass, can_init_statics, policy) {
                return false;
            }
        }
        for iface in class.interfaces() {
            if !self.ensure_initialized(iface, can_init_statics, policy) {
                return false;
            }
        }

        let _guard = class.lock();
        if class.is_initialized() {
            return true;
        }
        if class.class_initializer().is_some() {
            if !can_init_statics {
                return false;
            }
            let Some((module, code)) = self.class_initializer_code(class) else {
                return false;
            };
            if !policy.may_run_initializer(class, code, module) {
                trace!(class = class.descriptor(), "initializer rejected by policy");
                return false;
            }
        }
        class.set_status(ClassStatus::Initialized)
    }
}
