//! What compiled code may assume.
//!
//! Backends call these while generating code for a [`CompilationUnit`].
//! Every answer is conservative: `false` or `None` means "emit the slow
//! path with run-time checks" and is never an error. The queries only read
//! state the earlier phases built, plus statistics.

use crate::backend::{BackendKind, CompilationUnit};
use crate::driver::CompilerDriver;
use crate::stats::Counter;
use crate::verifier::VerifiedMethod;
use oatc_dex::{FieldReference, InvokeType, MethodReference, ModuleId};
use oatc_runtime::{LinkedClass, LinkedField, LinkedMethod};
use std::sync::Arc;
use tracing::debug;

/// Answer of [`CompilerDriver::can_access_type_without_checks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeAccess {
    /// The access check can be elided.
    pub without_checks: bool,
    pub is_final: bool,
    pub is_abstract: bool,
    /// The type is the class declaring the referrer.
    pub is_referrers_class: bool,
}

/// A class pointer compiled code may embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedType {
    pub is_initialized: bool,
    /// Known address, or `None` when the pointer goes through a type patch.
    pub direct_type_ptr: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceFieldInfo {
    pub field: FieldReference,
    pub offset: u32,
    pub is_volatile: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticFieldInfo {
    pub field: FieldReference,
    pub offset: u32,
    pub is_volatile: bool,
    /// The field belongs to the referrer's own class, which is necessarily
    /// initialized when its code runs.
    pub is_referrers_class: bool,
    /// Type index of the field's class in the referrer's module, used to
    /// find the static storage. `None` for the referrer's own class.
    pub storage_index: Option<u32>,
    pub is_initialized: bool,
}

/// A code or method address for a direct call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectTarget {
    /// Go through the dex cache.
    #[default]
    Unknown,
    /// Fixed at link time; the backend must record a patch.
    NeedsPatch,
    Known(u64),
}

impl DirectTarget {
    pub fn is_unknown(self) -> bool {
        self == DirectTarget::Unknown
    }
}

/// Answer of [`CompilerDriver::compute_invoke_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeInfo {
    /// The invoke kind to emit; `Direct` after sharpening.
    pub invoke_type: InvokeType,
    pub target_method: MethodReference,
    /// Vtable (or interface) index for dispatched calls.
    pub vtable_index: Option<u32>,
    pub direct_code: DirectTarget,
    pub direct_method: DirectTarget,
}

/// Outcome of pinning down a direct call target.
#[derive(Debug, Clone, Copy)]
struct DirectCall {
    target: MethodReference,
    code: DirectTarget,
    method: DirectTarget,
}

impl CompilerDriver {
    // ---- dex cache ---------------------------------------------------------

    /// The type will be resolved in the dex cache when the code runs.
    pub fn can_assume_type_is_present_in_dex_cache(&self, module: ModuleId, type_idx: u32) -> bool {
        let present = self.options.image
            && self
                .linker
                .module(module)
                .ok()
                .and_then(|m| m.type_descriptor(type_idx))
                .is_some_and(|descriptor| self.is_image_class(descriptor));
        self.stats.inc(if present {
            Counter::TypeInDexCache
        } else {
            Counter::TypeNotInDexCache
        });
        present
    }

    pub fn can_assume_string_is_present_in_dex_cache(&self, module: ModuleId, string_idx: u32) -> bool {
        // Image builds resolve every string code refers to.
        let present = self.options.image && self.linker.resolve_string(module, string_idx).is_ok();
        self.stats.inc(if present {
            Counter::StringInDexCache
        } else {
            Counter::StringNotInDexCache
        });
        present
    }

    // ---- types -------------------------------------------------------------

    /// Class declaring a method id, from the dex cache only.
    fn cached_referrer_class(&self, module: ModuleId, method_idx: u32) -> Option<Arc<LinkedClass>> {
        let id = self.linker.module(module).ok()?.method_id(method_idx)?;
        self.linker.resolved_type(module, id.class_idx)
    }

    /// Can code in `referrer_method_idx` use `type_idx` without an access
    /// check?
    pub fn can_access_type_without_checks(
        &self,
        module: ModuleId,
        referrer_method_idx: u32,
        type_idx: u32,
    ) -> TypeAccess {
        let mut access = TypeAccess::default();
        if let Some(resolved) = self.linker.resolved_type(module, type_idx) {
            access.is_final = resolved.is_final();
            access.is_abstract = resolved.is_abstract();
            if let Some(referrer) = self.cached_referrer_class(module, referrer_method_idx) {
                access.is_referrers_class = referrer.reference() == resolved.reference();
                access.without_checks = referrer.can_access(&resolved);
            }
        }
        self.count_type_access(access.without_checks);
        access
    }

    /// Like [`Self::can_access_type_without_checks`], and the type can be
    /// instantiated.
    pub fn can_access_instantiable_type_without_checks(
        &self,
        module: ModuleId,
        referrer_method_idx: u32,
        type_idx: u32,
    ) -> bool {
        let ok = match (
            self.linker.resolved_type(module, type_idx),
            self.cached_referrer_class(module, referrer_method_idx),
        ) {
            (Some(resolved), Some(referrer)) => {
                referrer.can_access(&resolved) && resolved.is_instantiable()
            }
            _ => false,
        };
        self.count_type_access(ok);
        ok
    }

    fn count_type_access(&self, without_checks: bool) {
        self.stats.inc(if without_checks {
            Counter::ResolvedType
        } else {
            Counter::UnresolvedType
        });
    }

    /// Can compiled code hold a pointer to the class `type_idx` names?
    ///
    /// Boot builds embed image classes through a type patch. Application
    /// builds embed classes that live in the boot image by address.
    pub fn can_embed_type_in_code(&self, module: ModuleId, type_idx: u32) -> Option<EmbeddedType> {
        let resolved = self.linker.resolved_type(module, type_idx)?;
        if self.options.image {
            let embeddable =
                self.is_image_class(resolved.descriptor()) && self.options.support_boot_image_fixup;
            embeddable.then(|| EmbeddedType {
                is_initialized: resolved.is_initialized(),
                direct_type_ptr: None,
            })
        } else {
            let address = self.linker.image().class_address(resolved.reference())?;
            Some(EmbeddedType {
                is_initialized: resolved.is_initialized(),
                direct_type_ptr: Some(address),
            })
        }
    }

    // ---- fields ------------------------------------------------------------

    /// Class declaring the method being compiled.
    fn compiling_class(&self, unit: &CompilationUnit<'_>) -> Option<Arc<LinkedClass>> {
        let id = unit.method_id()?;
        self.linker.resolve_type(unit.module_id, id.class_idx).ok()
    }

    /// Resolve a field and the class it is named through.
    fn field_with_access_class(
        &self,
        unit: &CompilationUnit<'_>,
        field_idx: u32,
        is_static: bool,
    ) -> Option<(Arc<LinkedField>, Arc<LinkedClass>)> {
        let field = self
            .linker
            .resolve_field(unit.module_id, field_idx, is_static)
            .ok()?;
        let class_idx = unit.module.field_id(field_idx)?.class_idx;
        let access_to = self.linker.resolve_type(unit.module_id, class_idx).ok()?;
        Some((field, access_to))
    }

    /// Fast-path facts for an instance field get or put.
    pub fn compute_instance_field_info(
        &self,
        unit: &CompilationUnit<'_>,
        field_idx: u32,
        is_put: bool,
    ) -> Option<InstanceFieldInfo> {
        let info = self.fast_instance_field(unit, field_idx, is_put);
        self.stats.inc(if info.is_some() {
            Counter::ResolvedInstanceField
        } else {
            Counter::UnresolvedInstanceField
        });
        info
    }

    fn fast_instance_field(
        &self,
        unit: &CompilationUnit<'_>,
        field_idx: u32,
        is_put: bool,
    ) -> Option<InstanceFieldInfo> {
        let (field, access_to) = self.field_with_access_class(unit, field_idx, false)?;
        let referrer = self.compiling_class(unit)?;
        if !referrer.can_access_resolved_field(&access_to, &field) {
            return None;
        }
        // Final fields are only written by their own class's constructors.
        if is_put && field.is_final() && field.declaring_class != referrer.reference() {
            return None;
        }
        Some(InstanceFieldInfo {
            field: field.reference,
            offset: field.offset,
            is_volatile: field.is_volatile(),
        })
    }

    /// Fast-path facts for a static field get or put.
    pub fn compute_static_field_info(
        &self,
        unit: &CompilationUnit<'_>,
        field_idx: u32,
        is_put: bool,
    ) -> Option<StaticFieldInfo> {
        let info = self.fast_static_field(unit, field_idx, is_put);
        self.stats.inc(match info {
            Some(info) if info.is_referrers_class => Counter::ResolvedLocalStaticField,
            Some(_) => Counter::ResolvedStaticField,
            None => Counter::UnresolvedStaticField,
        });
        info
    }

    fn fast_static_field(
        &self,
        unit: &CompilationUnit<'_>,
        field_idx: u32,
        is_put: bool,
    ) -> Option<StaticFieldInfo> {
        let (field, access_to) = self.field_with_access_class(unit, field_idx, true)?;
        let referrer = self.compiling_class(unit)?;
        if field.declaring_class == referrer.reference() {
            return Some(StaticFieldInfo {
                field: field.reference,
                offset: field.offset,
                is_volatile: field.is_volatile(),
                is_referrers_class: true,
                storage_index: None,
                is_initialized: true,
            });
        }
        if !referrer.can_access_resolved_field(&access_to, &field) {
            return None;
        }
        if is_put && field.is_final() {
            return None;
        }
        // The storage base is found through a type id of the referrer's
        // module; without one there is nothing to load it from.
        let storage_index = unit.module.find_type_index(&field.declaring_descriptor)?;
        let declaring = self.linker.linked_class(field.declaring_class)?;
        let is_initialized = declaring.is_initialized()
            && self.can_assume_type_is_present_in_dex_cache(unit.module_id, storage_index);
        Some(StaticFieldInfo {
            field: field.reference,
            offset: field.offset,
            is_volatile: field.is_volatile(),
            is_referrers_class: false,
            storage_index: Some(storage_index),
            is_initialized,
        })
    }

    // ---- invokes -----------------------------------------------------------

    /// Fast-path facts for the call at `dex_pc` of `unit`, which invokes
    /// `method_idx` with `invoke_type`.
    ///
    /// With `enable_devirtualization`, virtual calls to methods that cannot
    /// be overridden and calls the verifier pinned to one receiver type are
    /// made direct. Super calls that cannot be made direct take the slow
    /// path.
    pub fn compute_invoke_info(
        &self,
        unit: &CompilationUnit<'_>,
        dex_pc: u32,
        update_stats: bool,
        enable_devirtualization: bool,
        invoke_type: InvokeType,
        method_idx: u32,
    ) -> Option<InvokeInfo> {
        let info = self.fast_invoke(
            unit,
            dex_pc,
            update_stats,
            enable_devirtualization,
            invoke_type,
            method_idx,
        );
        if info.is_none() && update_stats {
            self.stats.unresolved_method(invoke_type);
        }
        info
    }

    fn fast_invoke(
        &self,
        unit: &CompilationUnit<'_>,
        dex_pc: u32,
        update_stats: bool,
        enable_devirtualization: bool,
        invoke_type: InvokeType,
        method_idx: u32,
    ) -> Option<InvokeInfo> {
        let target = MethodReference::new(unit.module_id, method_idx);
        let resolved = match self.linker.resolve_method(unit.module_id, method_idx, invoke_type) {
            Ok(method) => method,
            Err(err) => {
                debug!(method = %target, error = %err, "invoke target unresolved");
                return None;
            }
        };
        let referrer = self.compiling_class(unit)?;
        let methods_class = self.linker.linked_class(resolved.declaring_class)?;
        let class_idx = unit.module.method_id(method_idx)?.class_idx;
        let access_to = self.linker.resolve_type(unit.module_id, class_idx).ok()?;
        if !referrer.can_access_resolved_method(&access_to, &resolved) {
            return None;
        }

        let vtable_index = matches!(
            invoke_type,
            InvokeType::Virtual | InvokeType::Super | InvokeType::Interface
        )
        .then_some(resolved.method_index);
        let dispatched = InvokeInfo {
            invoke_type,
            target_method: target,
            vtable_index,
            direct_code: DirectTarget::Unknown,
            direct_method: DirectTarget::Unknown,
        };
        let sharpened = |call: DirectCall| InvokeInfo {
            invoke_type: InvokeType::Direct,
            target_method: call.target,
            vtable_index: None,
            direct_code: call.code,
            direct_method: call.method,
        };

        if enable_devirtualization {
            let final_virtual = invoke_type == InvokeType::Virtual && resolved.is_effectively_final();
            // The super call must land on the vtable slot it names.
            let exact_super = invoke_type == InvokeType::Super
                && referrer.reference() != methods_class.reference()
                && referrer.is_subclass_of(methods_class.reference())
                && methods_class
                    .vtable_entry(resolved.method_index)
                    .is_some_and(|entry| entry.reference == resolved.reference);
            if final_virtual || exact_super {
                if let Some(call) = self.direct_call(
                    invoke_type,
                    InvokeType::Direct,
                    false,
                    unit,
                    &referrer,
                    &resolved,
                    update_stats,
                    target,
                ) {
                    if update_stats {
                        self.stats.resolved_method(invoke_type);
                        self.stats.virtual_made_direct(invoke_type);
                    }
                    return Some(sharpened(call));
                }
            }

            if matches!(invoke_type, InvokeType::Virtual | InvokeType::Interface) {
                let devirt = unit
                    .verified_method
                    .as_deref()
                    .and_then(|verified| verified.devirt_target(dex_pc));
                if let Some(devirt) = devirt {
                    if let Some(call) = self.devirtualize(invoke_type, unit, &referrer, devirt, update_stats, target) {
                        if update_stats {
                            self.stats.resolved_method(invoke_type);
                            self.stats.virtual_made_direct(invoke_type);
                            self.stats.inc(Counter::TypeBasedDevirtualization);
                        }
                        return Some(sharpened(call));
                    }
                }
            }
        }

        if invoke_type == InvokeType::Super {
            debug!(method = %target, "unsharpened super call");
            return None;
        }
        if update_stats {
            self.stats.resolved_method(invoke_type);
        }
        let call = self.direct_call(
            invoke_type,
            invoke_type,
            false,
            unit,
            &referrer,
            &resolved,
            update_stats,
            target,
        );
        Some(match call {
            Some(call) => InvokeInfo {
                target_method: call.target,
                direct_code: call.code,
                direct_method: call.method,
                ..dispatched
            },
            None => dispatched,
        })
    }

    /// Direct call to the receiver type the verifier proved.
    fn devirtualize(
        &self,
        invoke_type: InvokeType,
        unit: &CompilationUnit<'_>,
        referrer: &LinkedClass,
        devirt: MethodReference,
        update_stats: bool,
        target: MethodReference,
    ) -> Option<DirectCall> {
        let called = self
            .linker
            .resolve_method(devirt.module, devirt.method_index, InvokeType::Virtual)
            .ok()?;
        if called.is_abstract() {
            return None;
        }
        self.direct_call(
            invoke_type,
            InvokeType::Direct,
            true,
            unit,
            referrer,
            &called,
            update_stats,
            target,
        )
    }

    /// Pin down code and method pointers for a call made as `sharp_type`.
    ///
    /// `None` when the call cannot be made as `sharp_type`. With
    /// `no_guarantee_of_dex_cache_entry`, `method` may not be named by any
    /// method id of the referrer's module.
    fn direct_call(
        &self,
        invoke_type: InvokeType,
        sharp_type: InvokeType,
        no_guarantee_of_dex_cache_entry: bool,
        unit: &CompilationUnit<'_>,
        referrer: &LinkedClass,
        method: &LinkedMethod,
        update_stats: bool,
        mut target: MethodReference,
    ) -> Option<DirectCall> {
        if !matches!(sharp_type, InvokeType::Static | InvokeType::Direct) {
            return None;
        }
        let compiling_boot = self.options.image;
        let mut use_dex_cache = match self.backend.kind() {
            BackendKind::Portable => true,
            BackendKind::Quick => compiling_boot && !self.options.support_boot_image_fixup,
        };
        let method_code_in_boot = self.linker.is_boot_module(method.declaring_class.module);
        if !use_dex_cache {
            if !method_code_in_boot {
                use_dex_cache = true;
            } else {
                // Calls into an uninitialized class must go through the
                // initialization trampoline, except from the class itself.
                let has_clinit_trampoline = method.is_static()
                    && !self
                        .linker
                        .linked_class(method.declaring_class)
                        .is_some_and(|class| class.is_initialized());
                if has_clinit_trampoline && method.declaring_class != referrer.reference() {
                    return None;
                }
            }
        }
        if update_stats && method_code_in_boot {
            self.stats.direct_call_to_boot(invoke_type);
            self.stats.direct_method_to_boot(invoke_type);
        }
        if !use_dex_cache && compiling_boot && !self.is_image_class(&method.declaring_descriptor) {
            // Only image classes have their methods in the image's dex caches.
            use_dex_cache = true;
        }

        let mut must_use_direct_pointers = false;
        if target.module == method.reference.module {
            target.method_index = method.reference.method_index;
        } else if no_guarantee_of_dex_cache_entry {
            match unit.module.find_method_index(
                &method.declaring_descriptor,
                &method.name,
                &method.signature,
            ) {
                Some(index) => target.method_index = index,
                None => {
                    if compiling_boot {
                        target = method.reference;
                    }
                    must_use_direct_pointers = true;
                }
            }
        }

        if use_dex_cache {
            if must_use_direct_pointers {
                debug!(method = %method.reference, "dex cache devirtualization failed");
                return None;
            }
            return Some(DirectCall {
                target,
                code: DirectTarget::Unknown,
                method: DirectTarget::Unknown,
            });
        }
        if compiling_boot {
            return Some(DirectCall {
                target,
                code: DirectTarget::NeedsPatch,
                method: DirectTarget::NeedsPatch,
            });
        }
        match self.linker.image().method(method.reference) {
            Some(image) if !method.is_abstract() => Some(DirectCall {
                target: method.reference,
                code: DirectTarget::Known(image.code_address),
                method: DirectTarget::Known(image.method_address),
            }),
            _ if !must_use_direct_pointers => Some(DirectCall {
                target,
                code: DirectTarget::Unknown,
                method: DirectTarget::Unknown,
            }),
            _ => {
                debug!(method = %method.reference, "no direct pointers available");
                None
            }
        }
    }

    // ---- verifier facts ----------------------------------------------------

    pub fn verified_method(&self, method: MethodReference) -> Option<Arc<VerifiedMethod>> {
        self.verification_results.verified_method(method)
    }

    /// The `check-cast` at `dex_pc` of `unit` can never fail.
    pub fn is_safe_cast(&self, unit: &CompilationUnit<'_>, dex_pc: u32) -> bool {
        let safe = unit
            .verified_method
            .as_deref()
            .is_some_and(|verified| verified.is_safe_cast(dex_pc));
        self.stats.inc(if safe {
            Counter::SafeCast
        } else {
            Counter::NotSafeCast
        });
        safe
    }
}
