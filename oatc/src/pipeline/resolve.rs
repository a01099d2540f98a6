use crate::compiled::CompiledClass;
use crate::driver::CompilerDriver;
use crate::error::DriverResult;
use crate::stats::Counter;
use oatc_dex::{ClassReference, CodeReference, InvokeType, Module, ModuleId};
use oatc_runtime::ClassStatus;
use tracing::{debug, info};

impl CompilerDriver {
    pub(crate) fn resolve_modules(&self, modules: &[ModuleId]) {
        for &module_id in modules {
            // Image builds resolve every type up front so the image's dex
            // caches are as full as possible.
            if self.options.image {
                if let Ok(module) = self.linker.module(module_id) {
                    self.for_all(module.num_types(), |type_idx| {
                        self.resolve_type_id(module_id, type_idx as u32);
                        Ok(())
                    });
                }
            }
            self.for_all_classes(&[module_id], "resolve", |module_id, module, index| {
                self.resolve_class(module_id, module, index)
            });
        }
        info!(
            resolved = self.stats.get(Counter::ClassResolved),
            unresolved = self.stats.get(Counter::ClassUnresolved),
            "resolve done"
        );
    }

    fn resolve_type_id(&self, module_id: ModuleId, type_idx: u32) {
        if let Err(err) = self.linker.resolve_type(module_id, type_idx) {
            debug!(module = %module_id, type_idx, error = %err, "type left unresolved");
        }
    }

    fn resolve_class(&self, module_id: ModuleId, module: &Module, index: u16) -> DriverResult<()> {
        let class_ref = ClassReference::new(module_id, index);
        if self.skip_class(class_ref) {
            return Ok(());
        }
        let Some(def) = module.class_def(index) else {
            return Ok(());
        };

        // Known from the definition alone, even when linking fails.
        if def
            .instance_fields
            .iter()
            .any(|field| field.access_flags.is_final())
        {
            self.add_requires_constructor_barrier(class_ref);
        }

        let class = match self.linker.link_class(class_ref) {
            Ok(class) => class,
            Err(err) => {
                debug!(class = %class_ref, error = %err, "class left unresolved");
                self.stats.inc(Counter::ClassUnresolved);
                return self.tables.put_class(class_ref, CompiledClass::new(ClassStatus::NotReady));
            }
        };
        self.stats.inc(Counter::ClassResolved);
        self.tables.put_class(class_ref, CompiledClass::new(class.status()))?;

        for field in &def.static_fields {
            self.resolve_reference(module_id, CodeReference::Field { field_idx: field.field_idx, is_static: true });
        }
        for field in &def.instance_fields {
            self.resolve_reference(module_id, CodeReference::Field { field_idx: field.field_idx, is_static: false });
        }
        for (method, is_direct) in def.methods() {
            let kind = if !is_direct {
                InvokeType::Virtual
            } else if method.access_flags.is_static() {
                InvokeType::Static
            } else {
                InvokeType::Direct
            };
            self.resolve_reference(module_id, CodeReference::Method { method_idx: method.method_idx, kind });
            if let Some(code) = &method.code {
                for (_, reference) in code.references() {
                    self.resolve_reference(module_id, reference);
                }
            }
        }
        Ok(())
    }

    /// Resolve one constant-pool entry. Failures stay in the dex cache as
    /// holes and are handled by the code that needs the entry.
    fn resolve_reference(&self, module_id: ModuleId, reference: CodeReference) {
        let result = match reference {
            CodeReference::Type(type_idx) => self.linker.resolve_type(module_id, type_idx).map(drop),
            CodeReference::String(string_idx) => self.linker.resolve_string(module_id, string_idx),
            CodeReference::Field { field_idx, is_static } => {
                self.linker.resolve_field(module_id, field_idx, is_static).map(drop)
            }
            CodeReference::Method { method_idx, kind } => {
                self.linker.resolve_method(module_id, method_idx, kind).map(drop)
            }
        };
        if let Err(err) = result {
            debug!(module = %module_id, ?reference, error = %err, "reference left unresolved");
        }
    }
}
