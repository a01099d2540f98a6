use crate::driver::CompilerDriver;
use crate::error::DriverResult;
use crate::stats::Counter;
use crate::verifier::{VerificationStatus, VerificationUnit};
use oatc_dex::{ClassDef, ClassReference, MethodReference, Module, ModuleId};
use oatc_runtime::{ClassStatus, LinkedClass};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl CompilerDriver {
    pub(crate) fn verify_modules(&self, modules: &[ModuleId]) {
        self.for_all_classes(modules, "verify", |module_id, module, index| {
            self.verify_class(module_id, module, index)
        });
        info!(
            verified = self.stats.get(Counter::ClassVerified),
            soft_failed = self.stats.get(Counter::ClassSoftFailed),
            hard_failed = self.stats.get(Counter::ClassHardFailed),
            "verify done"
        );
    }

    fn verify_class(&self, module_id: ModuleId, module: &Module, index: u16) -> DriverResult<()> {
        let class_ref = ClassReference::new(module_id, index);
        if self.skip_class(class_ref) {
            return Ok(());
        }
        match self.linker.linked_class(class_ref) {
            Some(class) => {
                let status = self.ensure_verified(&class);
                self.tables.update_class_status(class_ref, status);
            }
            None => {
                // Methods of an unlinked class are still checked so that the
                // broken ones stay away from the backend.
                if let Some(def) = module.class_def(index) {
                    self.verify_methods(module_id, module, class_ref, def, None);
                }
            }
        }
        Ok(())
    }

    /// Verify `class` after its superclass, once. Classes outside the
    /// modules being compiled are verified too when a compiled class
    /// extends them.
    fn ensure_verified(&self, class: &Arc<LinkedClass>) -> ClassStatus {
        let status = class.status();
        if status.is_erroneous() || status >= ClassStatus::RetryVerificationAtRuntime {
            return status;
        }
        let superclass_failed = class
            .superclass()
            .is_some_and(|superclass| self.ensure_verified(superclass).is_erroneous());

        let _guard = class.lock();
        let status = class.status();
        if status.is_erroneous() || status >= ClassStatus::RetryVerificationAtRuntime {
            return status;
        }
        if superclass_failed {
            debug!(class = class.descriptor(), "superclass is erroneous");
            class.set_status(ClassStatus::Error);
            self.stats.inc(Counter::ClassHardFailed);
            return class.status();
        }
        let reference = class.reference();
        let Ok(module) = self.linker.module(reference.module) else {
            return status;
        };
        let Some(def) = module.class_def(reference.class_def_index) else {
            return status;
        };
        let outcome = self.verify_methods(reference.module, module, reference, def, Some(class));
        let next = match outcome {
            VerificationStatus::Verified => {
                self.stats.inc(Counter::ClassVerified);
                ClassStatus::Verified
            }
            VerificationStatus::SoftFailure => {
                self.stats.inc(Counter::ClassSoftFailed);
                ClassStatus::RetryVerificationAtRuntime
            }
            VerificationStatus::HardFailure => {
                warn!(class = class.descriptor(), "verification failed");
                self.stats.inc(Counter::ClassHardFailed);
                ClassStatus::Error
            }
        };
        class.set_status(next);
        class.status()
    }

    /// Run the verifier over every method of a class definition and record
    /// the results. Returns the worst outcome.
    fn verify_methods(
        &self,
        module_id: ModuleId,
        module: &Module,
        class_ref: ClassReference,
        def: &ClassDef,
        linked_class: Option<&Arc<LinkedClass>>,
    ) -> VerificationStatus {
        let mut worst = VerificationStatus::Verified;
        for (method, _) in def.methods() {
            let method_ref = MethodReference::new(module_id, method.method_idx);
            let unit = VerificationUnit {
                linker: &self.linker,
                module_id,
                module,
                class: class_ref,
                linked_class: linked_class.map(Arc::as_ref),
                method: method_ref,
                access_flags: method.access_flags,
                code: method.code.as_ref(),
            };
            let result = self.verifier.verify(&unit);
            if let Some(message) = &result.message {
                debug!(method = %method_ref, status = ?result.status, %message, "verifier finding");
            }
            self.verification_results.record(method_ref, &result);
            worst = worst.max(result.status);
        }
        worst
    }
}
