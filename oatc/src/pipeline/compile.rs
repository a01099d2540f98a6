use crate::backend::{CompilationUnit, CompileContext, DexToDexLevel};
use crate::compiled::CompiledMethod;
use crate::driver::CompilerDriver;
use crate::error::DriverResult;
use crate::report::MethodFailure;
use crate::stats::Counter;
use oatc_dex::{ClassReference, EncodedMethod, InvokeType, MethodReference, Module, ModuleId};
use oatc_runtime::ClassStatus;
use rustc_hash::FxHashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Compiles slower than this are worth a log line.
const SLOW_METHOD_THRESHOLD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompileKind {
    Jni,
    Optimized,
    DexToDex,
}

impl CompilerDriver {
    pub(crate) fn compile_modules(&self, modules: &[ModuleId]) {
        self.for_all_classes(modules, "compile", |module_id, module, index| {
            self.compile_class(module_id, module, index)
        });
        info!(
            compiled = self.stats.get(Counter::MethodCompiled),
            jni = self.stats.get(Counter::JniMethodCompiled),
            dex_to_dex = self.stats.get(Counter::DexToDexCompiled),
            failed = self.stats.get(Counter::MethodFailed),
            "compile phase done"
        );
    }

    fn compile_class(&self, module_id: ModuleId, module: &Module, index: u16) -> DriverResult<()> {
        let class_ref = ClassReference::new(module_id, index);
        if self.skip_class(class_ref) {
            return Ok(());
        }
        let Some(def) = module.class_def(index) else {
            return Ok(());
        };
        if !def.has_methods() {
            return Ok(());
        }
        // Old modules can list a method twice; compile it once.
        let mut seen = FxHashSet::default();
        for (method, is_direct) in def.methods() {
            if !seen.insert(method.method_idx) {
                continue;
            }
            self.compile_method(module_id, module, index, method, is_direct)?;
        }
        Ok(())
    }

    /// How far the fallback path may rewrite the bytecode of `class`.
    pub fn dex_to_dex_level(&self, class: ClassReference) -> DexToDexLevel {
        let Some(linked) = self.linker.linked_class(class) else {
            return DexToDexLevel::DontCompile;
        };
        if linked.is_boot() {
            // The runtime relies on the rewrites for boot classes.
            return DexToDexLevel::Required;
        }
        match linked.status() {
            ClassStatus::Verified | ClassStatus::Initialized => DexToDexLevel::Optimize,
            ClassStatus::RetryVerificationAtRuntime => DexToDexLevel::Required,
            _ => DexToDexLevel::DontCompile,
        }
    }

    pub(crate) fn compile_method(
        &self,
        module_id: ModuleId,
        module: &Module,
        class_def_index: u16,
        method: &EncodedMethod,
        is_direct: bool,
    ) -> DriverResult<()> {
        if self.is_aborted() {
            return Ok(());
        }
        let method_ref = MethodReference::new(module_id, method.method_idx);
        let flags = method.access_flags;
        let invoke_type = if !is_direct {
            InvokeType::Virtual
        } else if flags.is_static() {
            InvokeType::Static
        } else {
            InvokeType::Direct
        };
        let unit = CompilationUnit {
            module_id,
            module,
            class_def_index,
            method_index: method.method_idx,
            access_flags: flags,
            invoke_type,
            code: method.code.as_ref(),
            dex_to_dex_level: self.dex_to_dex_level(ClassReference::new(module_id, class_def_index)),
            verified_method: self.verification_results.verified_method(method_ref),
        };

        let arena = self.arenas.acquire();
        let cx = CompileContext::new(self, &arena);
        let start = Instant::now();
        let (kind, outcome) = if flags.is_native() {
            (CompileKind::Jni, self.backend.compile_jni(&unit, &cx))
        } else if flags.is_abstract() || unit.code.is_none() {
            self.stats.inc(Counter::MethodSkipped);
            return Ok(());
        } else if unit.verified_method.is_some()
            && self
                .verification_results
                .is_candidate_for_compilation(method_ref, flags)
        {
            (CompileKind::Optimized, self.backend.compile(&unit, &cx).map(Some))
        } else if unit.dex_to_dex_level != DexToDexLevel::DontCompile {
            (CompileKind::DexToDex, self.backend.compile_dex_to_dex(&unit, &cx))
        } else {
            debug!(method = %unit.pretty_method(), "left to the interpreter");
            self.stats.inc(Counter::MethodSkipped);
            return Ok(());
        };
        let elapsed = start.elapsed();
        if elapsed > SLOW_METHOD_THRESHOLD {
            warn!(method = %unit.pretty_method(), ?elapsed, "slow compile");
        }

        let result = match outcome {
            Ok(Some(result)) => result,
            Ok(None) => {
                self.stats.inc(Counter::MethodSkipped);
                return Ok(());
            }
            Err(err) => {
                warn!(method = %unit.pretty_method(), error = %err, "backend failed");
                self.stats.inc(Counter::MethodFailed);
                self.failures.lock().push(MethodFailure {
                    method: method_ref,
                    pretty_method: unit.pretty_method(),
                    message: err.to_string(),
                });
                return Ok(());
            }
        };

        let compiled = CompiledMethod::intern(&result, &self.dedupe);
        self.tables.put_method(method_ref, compiled)?;
        self.patches
            .record_patches(unit.referrer(), invoke_type, &result.patches);
        self.stats.inc(match kind {
            CompileKind::Jni => Counter::JniMethodCompiled,
            CompileKind::Optimized => Counter::MethodCompiled,
            CompileKind::DexToDex => Counter::DexToDexCompiled,
        });
        Ok(())
    }
}
