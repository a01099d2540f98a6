use crate::driver::CompilerDriver;
use oatc_dex::{CodeReference, Module};
use oatc_runtime::LinkedClass;
use std::sync::Arc;
use tracing::{info, warn};

impl CompilerDriver {
    /// Close the image-class allowlist over what the listed classes need at
    /// run time. Only image builds with an allowlist do anything here.
    pub(crate) fn load_image_classes(&self) {
        if !self.options.image {
            return;
        }
        let Some(requested) = self.image_classes.snapshot() else {
            return;
        };

        let mut worklist = Vec::new();
        for descriptor in &requested {
            match self.linker.find_class(descriptor) {
                Ok(class) => worklist.push(class),
                Err(err) => {
                    warn!(%descriptor, error = %err, "dropping unresolvable image class");
                    self.image_classes.remove(descriptor);
                }
            }
        }

        while let Some(class) = worklist.pop() {
            for related in self.classes_needed_by(&class) {
                if self.image_classes.insert(related.descriptor()) {
                    worklist.push(related);
                }
            }
        }

        info!(
            requested = requested.len(),
            total = self.image_classes.len().unwrap_or_default(),
            "image classes loaded"
        );
    }

    /// Superclass, direct interfaces and classes the static initializer
    /// names.
    fn classes_needed_by(&self, class: &LinkedClass) -> Vec<Arc<LinkedClass>> {
        let mut needed: Vec<Arc<LinkedClass>> = class.superclass().into_iter().cloned().collect();
        needed.extend(class.interfaces().iter().cloned());

        let Some((module, code)) = self.linker.class_initializer_code(class) else {
            return needed;
        };
        for (_, reference) in code.references() {
            let Some(descriptor) = referenced_class(module, reference) else {
                continue;
            };
            // Arrays and missing classes never make it into the image.
            if let Ok(referenced) = self.linker.find_class(descriptor) {
                needed.push(referenced);
            }
        }
        needed
    }
}

fn referenced_class(module: &Module, reference: CodeReference) -> Option<&str> {
    match reference {
        CodeReference::Type(type_idx) => module.type_descriptor(type_idx),
        CodeReference::Field { field_idx, .. } => {
            module.type_descriptor(module.field_id(field_idx)?.class_idx)
        }
        CodeReference::Method { method_idx, .. } => module.method_class_descriptor(method_idx),
        CodeReference::String(_) => None,
    }
}
