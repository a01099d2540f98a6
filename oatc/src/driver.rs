//! The compilation driver.
//!
//! A [`CompilerDriver`] owns everything a run produces: the artifact tables,
//! the patch ledger, the dedupe stores and the statistics. The phases in
//! [`crate::pipeline`] fill them, the queries in [`crate::query`] read them.

use crate::arena::ArenaPool;
use crate::backend::{CompilerBackend, TrampolineKind};
use crate::compiled::CompiledMethod;
use crate::dedupe::{Blob, DedupeStores};
use crate::error::{DriverError, DriverResult};
use crate::image_classes::ImageClasses;
use crate::options::CompilerOptions;
use crate::patch::PatchLedger;
use crate::report::{CompileReport, MethodFailure};
use crate::stats::CompilationStats;
use crate::tables::ArtifactTables;
use crate::thread_pool::{ThreadPool, WorkerPool};
use crate::timing::{CumulativeLogger, TimingLogger};
use crate::verifier::{PermissiveVerifier, VerificationResults, Verifier};
use oatc_dex::{ClassReference, MethodReference, ModuleId};
use oatc_runtime::{ClassLinker, InitializationPolicy, TrivialInitializerPolicy};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

pub struct CompilerDriver {
    pub(crate) options: CompilerOptions,
    pub(crate) linker: Arc<ClassLinker>,
    pub(crate) backend: Box<dyn CompilerBackend>,
    pub(crate) verifier: Box<dyn Verifier>,
    pub(crate) thread_pool: Box<dyn ThreadPool>,
    pub(crate) init_policy: Box<dyn InitializationPolicy>,
    cumulative_timings: Option<Arc<CumulativeLogger>>,

    pub(crate) image_classes: ImageClasses,
    pub(crate) tables: ArtifactTables,
    pub(crate) patches: PatchLedger,
    pub(crate) dedupe: DedupeStores,
    pub(crate) verification_results: VerificationResults,
    pub(crate) stats: CompilationStats,
    pub(crate) arenas: ArenaPool,
    constructor_barriers: RwLock<BTreeSet<ClassReference>>,
    pub(crate) failures: Mutex<Vec<MethodFailure>>,
    aborted: AtomicBool,
    fatal: Mutex<Option<DriverError>>,
}

impl fmt::Debug for CompilerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerDriver")
            .field("options", &self.options)
            .field("backend", &self.backend)
            .field("threads", &self.thread_pool.thread_count())
            .field("classes", &self.tables.class_count())
            .field("methods", &self.tables.method_count())
            .finish_non_exhaustive()
    }
}

/// Builder for [`CompilerDriver`].
#[derive(Debug)]
pub struct CompilerDriverBuilder {
    options: CompilerOptions,
    linker: Arc<ClassLinker>,
    backend: Box<dyn CompilerBackend>,
    verifier: Option<Box<dyn Verifier>>,
    thread_pool: Option<Box<dyn ThreadPool>>,
    init_policy: Option<Box<dyn InitializationPolicy>>,
    cumulative_timings: Option<Arc<CumulativeLogger>>,
}

impl CompilerDriverBuilder {
    /// Defaults to [`PermissiveVerifier`].
    pub fn verifier(mut self, verifier: Box<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Defaults to a [`WorkerPool`] of `options.thread_count` threads.
    pub fn thread_pool(mut self, pool: Box<dyn ThreadPool>) -> Self {
        self.thread_pool = Some(pool);
        self
    }

    /// Defaults to [`TrivialInitializerPolicy`].
    pub fn initialization_policy(mut self, policy: Box<dyn InitializationPolicy>) -> Self {
        self.init_policy = Some(policy);
        self
    }

    /// Every run's timings are added to `logger`.
    pub fn cumulative_timings(mut self, logger: Arc<CumulativeLogger>) -> Self {
        self.cumulative_timings = Some(logger);
        self
    }

    pub fn build(self) -> DriverResult<CompilerDriver> {
        self.options.validate()?;
        let thread_pool: Box<dyn ThreadPool> = match self.thread_pool {
            Some(pool) => pool,
            None => Box::new(WorkerPool::new(self.options.thread_count)?),
        };
        let image_classes = if self.options.image {
            ImageClasses::new(self.options.image_classes.clone())
        } else {
            ImageClasses::new(None)
        };
        Ok(CompilerDriver {
            linker: self.linker,
            backend: self.backend,
            verifier: self.verifier.unwrap_or_else(|| Box::new(PermissiveVerifier)),
            thread_pool,
            init_policy: self
                .init_policy
                .unwrap_or_else(|| Box::new(TrivialInitializerPolicy)),
            cumulative_timings: self.cumulative_timings,
            image_classes,
            tables: ArtifactTables::new(),
            patches: PatchLedger::new(),
            dedupe: DedupeStores::new(),
            verification_results: VerificationResults::new(),
            stats: CompilationStats::new(),
            arenas: ArenaPool::new(),
            constructor_barriers: RwLock::new(BTreeSet::new()),
            failures: Mutex::new(Vec::new()),
            aborted: AtomicBool::new(false),
            fatal: Mutex::new(None),
            options: self.options,
        })
    }
}

impl CompilerDriver {
    pub fn builder(
        options: CompilerOptions,
        linker: Arc<ClassLinker>,
        backend: Box<dyn CompilerBackend>,
    ) -> CompilerDriverBuilder {
        CompilerDriverBuilder {
            options,
            linker,
            backend,
            verifier: None,
            thread_pool: None,
            init_policy: None,
            cumulative_timings: None,
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn linker(&self) -> &ClassLinker {
        &self.linker
    }

    pub fn backend(&self) -> &dyn CompilerBackend {
        self.backend.as_ref()
    }

    pub fn tables(&self) -> &ArtifactTables {
        &self.tables
    }

    pub fn patches(&self) -> &PatchLedger {
        &self.patches
    }

    pub fn dedupe(&self) -> &DedupeStores {
        &self.dedupe
    }

    pub fn stats(&self) -> &CompilationStats {
        &self.stats
    }

    pub fn verification_results(&self) -> &VerificationResults {
        &self.verification_results
    }

    pub fn image_classes(&self) -> &ImageClasses {
        &self.image_classes
    }

    pub fn arenas(&self) -> &ArenaPool {
        &self.arenas
    }

    pub fn is_image(&self) -> bool {
        self.options.image
    }

    /// Outside image builds every class counts as an image class.
    pub fn is_image_class(&self, descriptor: &str) -> bool {
        !self.options.image || self.image_classes.contains(descriptor)
    }

    // ---- constructor barriers ---------------------------------------------

    /// Constructors of `class` must publish their writes with a barrier.
    pub fn add_requires_constructor_barrier(&self, class: ClassReference) {
        self.constructor_barriers.write().insert(class);
    }

    pub fn requires_constructor_barrier(&self, class: ClassReference) -> bool {
        self.constructor_barriers.read_recursive().contains(&class)
    }

    // ---- run state --------------------------------------------------------

    /// Record a contract violation. Only the first one is kept; every unit
    /// started afterwards does nothing.
    pub(crate) fn abort(&self, err: DriverError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            error!(error = %err, "aborting compilation");
            *fatal = Some(err);
        }
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn take_fatal(&self) -> DriverResult<()> {
        match self.fatal.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_modules(&self, modules: &[ModuleId]) -> DriverResult<Vec<ModuleId>> {
        let mut ordered = Vec::with_capacity(modules.len());
        for &id in modules {
            if self.linker.module(id).is_err() {
                return Err(DriverError::UnknownModule(id));
            }
            ordered.push(id);
        }
        // Class-path order is precedence order.
        ordered.sort_unstable();
        ordered.dedup();
        Ok(ordered)
    }

    // ---- entry points -----------------------------------------------------

    /// Compile every method of `modules`.
    pub fn compile_all(
        &self,
        modules: &[ModuleId],
        timings: &mut TimingLogger,
    ) -> DriverResult<CompileReport> {
        let modules = self.check_modules(modules)?;
        info!(
            modules = modules.len(),
            threads = self.thread_pool.thread_count(),
            image = self.options.image,
            isa = %self.options.instruction_set,
            "compile start"
        );
        self.pre_compile(&modules, timings)?;
        timings.split("compile", || self.compile_modules(&modules));
        self.take_fatal()?;

        let report = self.report();
        info!(
            classes = report.classes,
            methods = report.compiled_methods,
            failures = report.failures.len(),
            patches = report.patches,
            "compile done"
        );
        self.finish_run(timings);
        Ok(report)
    }

    /// Prepare the module of `method` and compile only that method.
    pub fn compile_one(
        &self,
        method: MethodReference,
        timings: &mut TimingLogger,
    ) -> DriverResult<Option<Arc<CompiledMethod>>> {
        let module = self
            .linker
            .module(method.module)
            .map_err(|_| DriverError::UnknownModule(method.module))?;
        let (class_def_index, encoded, is_direct) = module
            .find_encoded_method(method.method_index)
            .ok_or(DriverError::MethodNotFound(method))?;
        self.pre_compile(&[method.module], timings)?;
        timings.split("compile", || {
            self.compile_method(method.module, module, class_def_index, encoded, is_direct)
        })?;
        self.take_fatal()?;
        self.finish_run(timings);
        Ok(self.tables.get_method(method))
    }

    /// Generate a runtime stub and intern it in the code store.
    pub fn create_trampoline(&self, kind: TrampolineKind) -> DriverResult<Blob> {
        let code = self
            .backend
            .create_trampoline(kind, self.options.instruction_set)?;
        Ok(self.dedupe.code.intern(&code))
    }

    fn pre_compile(&self, modules: &[ModuleId], timings: &mut TimingLogger) -> DriverResult<()> {
        timings.split("load image classes", || self.load_image_classes());
        timings.split("resolve", || self.resolve_modules(modules));
        self.take_fatal()?;
        timings.split("verify", || self.verify_modules(modules));
        self.take_fatal()?;
        timings.split("initialize", || self.initialize_modules(modules));
        self.take_fatal()
    }

    fn finish_run(&self, timings: &mut TimingLogger) {
        timings.end_split();
        if self.options.dump_stats {
            self.stats.dump();
        }
        if self.options.dump_passes {
            timings.dump();
        }
        if let Some(cumulative) = &self.cumulative_timings {
            cumulative.add_logger(timings);
        }
    }

    fn report(&self) -> CompileReport {
        let mut failures = self.failures.lock().clone();
        failures.sort_by_key(|f| f.method);
        CompileReport {
            classes: self.tables.class_count(),
            compiled_methods: self.tables.method_count(),
            patches: self.patches.len(),
            unique_code_blobs: self.dedupe.code.len(),
            failures,
            stats: self.stats.snapshot(),
        }
    }
}
