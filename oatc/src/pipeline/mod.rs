//! The phases of a run.
//!
//! Each phase is a barrier: it fans its units out over the thread pool and
//! returns only when all of them are done. Units of a phase share nothing
//! but the driver's locked tables.

mod compile;
mod image_classes;
mod initialize;
mod resolve;
mod verify;

use crate::driver::CompilerDriver;
use crate::error::DriverResult;
use oatc_dex::{ClassReference, Module, ModuleId};
use tracing::debug;

impl CompilerDriver {
    /// Run `work(i)` for `i < count` on the pool. The first error aborts the
    /// run; units that start after that return immediately.
    pub(crate) fn for_all(&self, count: usize, work: impl Fn(usize) -> DriverResult<()> + Sync) {
        self.thread_pool.run(count, &|index| {
            if self.is_aborted() {
                return;
            }
            if let Err(err) = work(index) {
                self.abort(err);
            }
        });
    }

    /// Run `work` for every class definition of every module, one module at
    /// a time in class-path order.
    pub(crate) fn for_all_classes(
        &self,
        modules: &[ModuleId],
        phase: &'static str,
        work: impl Fn(ModuleId, &Module, u16) -> DriverResult<()> + Sync,
    ) {
        for &module_id in modules {
            let Ok(module) = self.linker.module(module_id) else {
                continue;
            };
            debug!(phase, module = %module.location, classes = module.num_class_defs(), "phase over module");
            self.for_all(module.num_class_defs(), |index| {
                work(module_id, module, index as u16)
            });
        }
    }

    /// The class is hidden by a definition earlier on the class path.
    pub(crate) fn skip_class(&self, class: ClassReference) -> bool {
        let shadowed = self.linker.is_shadowed(class);
        if shadowed {
            debug!(%class, "skipping shadowed class");
        }
        shadowed
    }
}
