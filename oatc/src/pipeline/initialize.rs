use crate::driver::CompilerDriver;
use crate::error::DriverResult;
use crate::stats::Counter;
use oatc_dex::{ClassReference, Module, ModuleId};
use tracing::{info, trace};

impl CompilerDriver {
    pub(crate) fn initialize_modules(&self, modules: &[ModuleId]) {
        self.for_all_classes(modules, "initialize", |module_id, module, index| {
            self.initialize_class(module_id, module, index)
        });
        info!(
            initialized = self.stats.get(Counter::ClassInitialized),
            "initialize done"
        );
    }

    fn initialize_class(&self, module_id: ModuleId, _module: &Module, index: u16) -> DriverResult<()> {
        let class_ref = ClassReference::new(module_id, index);
        if self.skip_class(class_ref) {
            return Ok(());
        }
        let Some(class) = self.linker.linked_class(class_ref) else {
            return Ok(());
        };
        if !class.status().is_verified() {
            return Ok(());
        }
        // Static initializers only run for classes that end up in the image.
        let can_init_statics = self.options.image && self.is_image_class(class.descriptor());
        if self
            .linker
            .ensure_initialized(&class, can_init_statics, self.init_policy.as_ref())
        {
            self.stats.inc(Counter::ClassInitialized);
        } else {
            trace!(class = class.descriptor(), "left uninitialized");
        }
        self.tables.update_class_status(class_ref, class.status());
        Ok(())
    }
}
