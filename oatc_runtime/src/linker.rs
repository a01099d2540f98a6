//! Class lookup, linking and constant-pool resolution.
//!
//! The linker answers "which class does this descriptor name" with class-path
//! precedence, links class definitions (hierarchy, field layout, vtable) on
//! demand and resolves constant-pool entries through the per-module
//! [`DexCache`]s. All operations take `&self` and are safe to call from many
//! worker threads at once: link slots and cache slots are write-once, so
//! racing resolvers converge on the first published value.

use crate::class::{LinkedClass, LinkedField, LinkedMethod, OBJECT_HEADER_SIZE};
use crate::class_path::ClassPath;
use crate::dex_cache::DexCache;
use crate::error::{LinkError, LinkResult};
use crate::image::ImageSpace;
use crate::status::ClassStatus;
use oatc_dex::{
    field_size, AccessFlags, ClassReference, CodeItem, EncodedField, EncodedMethod, FieldReference, InvokeType,
    MethodReference, Module, ModuleId,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use tracing::{debug, trace};

/// Root of every class hierarchy.
pub const OBJECT_DESCRIPTOR: &str = "Ljava/lang/Object;";

type LinkSlot = OnceCell<LinkResult<Arc<LinkedClass>>>;

pub struct ClassLinker {
    class_path: ClassPath,
    image: ImageSpace,
    /// First definition of every descriptor, in class-path order.
    definitions: FxHashMap<String, ClassReference>,
    /// Definitions whose superclass/interface graph loops back on itself.
    circular: FxHashSet<ClassReference>,
    classes: Vec<Box<[LinkSlot]>>,
    dex_caches: Vec<DexCache>,
}

impl fmt::Debug for ClassLinker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassLinker")
            .field("modules", &self.class_path.len())
            .field("classes", &self.definitions.len())
            .field("circular", &self.circular.len())
            .finish_non_exhaustive()
    }
}

impl ClassLinker {
    pub fn new(class_path: ClassPath) -> Self {
        let mut definitions = FxHashMap::default();
        for (id, entry) in class_path.iter() {
            for (idx, def) in entry.module.class_defs.iter().enumerate() {
                if let Some(descriptor) = entry.module.type_descriptor(def.class_idx) {
                    definitions
                        .entry(descriptor.to_string())
                        .or_insert_with(|| ClassReference::new(id, idx as u16));
                }
            }
        }
        let circular = CycleFinder::new(&class_path, &definitions).run();
        let classes = class_path
            .iter()
            .map(|(_, e)| (0..e.module.num_class_defs()).map(|_| OnceCell::new()).collect())
            .collect();
        let dex_caches = class_path
            .iter()
            .map(|(_, e)| DexCache::new(&e.module))
            .collect();
        debug!(
            modules = class_path.len(),
            classes = definitions.len(),
            circular = circular.len(),
            "class linker ready"
        );
        Self {
            class_path,
            image: ImageSpace::default(),
            definitions,
            circular,
            classes,
            dex_caches,
        }
    }

    /// Compile against an existing boot image.
    pub fn with_image(mut self, image: ImageSpace) -> Self {
        self.image = image;
        self
    }

    pub fn class_path(&self) -> &ClassPath {
        &self.class_path
    }

    pub fn image(&self) -> &ImageSpace {
        &self.image
    }

    pub fn module(&self, id: ModuleId) -> LinkResult<&Arc<Module>> {
        self.class_path
            .module(id)
            .ok_or(LinkError::UnknownModule(id))
    }

    pub fn is_boot_module(&self, id: ModuleId) -> bool {
        self.class_path.entry(id).is_some_and(|e| e.is_boot())
    }

    pub fn dex_cache(&self, id: ModuleId) -> LinkResult<&DexCache> {
        self.dex_caches
            .get(id.index())
            .ok_or(LinkError::UnknownModule(id))
    }

    // ---- lookup -----------------------------------------------------------

    /// The definition a descriptor names, honouring class-path precedence.
    pub fn lookup_definition(&self, descriptor: &str) -> Option<ClassReference> {
        self.definitions.get(descriptor).copied()
    }

    /// Descriptor defined by a class def.
    pub fn class_descriptor(&self, class: ClassReference) -> Option<&str> {
        self.class_path
            .module(class.module)?
            .class_descriptor(class.class_def_index)
    }

    /// An earlier module on the class path defines the same descriptor.
    pub fn is_shadowed(&self, class: ClassReference) -> bool {
        match self.class_descriptor(class) {
            Some(descriptor) => self.lookup_definition(descriptor) != Some(class),
            None => false,
        }
    }

    /// Find and link the class a descriptor names.
    pub fn find_class(&self, descriptor: &str) -> LinkResult<Arc<LinkedClass>> {
        if descriptor.starts_with('[') || descriptor.len() == 1 {
            return Err(LinkError::UnsupportedClass(descriptor.to_string()));
        }
        let class = self
            .lookup_definition(descriptor)
            .ok_or_else(|| LinkError::class_not_found(descriptor))?;
        self.link_class(class)
    }

    /// The linked class of a definition, if linking already succeeded.
    pub fn linked_class(&self, class: ClassReference) -> Option<Arc<LinkedClass>> {
        match self.link_slot(class).ok()?.get() {
            Some(Ok(linked)) => Some(Arc::clone(linked)),
            _ => None,
        }
    }

    /// Class declaring a method id, when its declaring class is linked.
    pub fn declaring_class_of(&self, method: MethodReference) -> Option<Arc<LinkedClass>> {
        let module = self.class_path.module(method.module)?;
        let (def_idx, _, _) = module.find_encoded_method(method.method_index)?;
        self.linked_class(ClassReference::new(method.module, def_idx))
    }

    // ---- linking ----------------------------------------------------------

    fn link_slot(&self, class: ClassReference) -> LinkResult<&LinkSlot> {
        self.classes
            .get(class.module.index())
            .ok_or(LinkError::UnknownModule(class.module))?
            .get(class.class_def_index as usize)
            .ok_or_else(|| {
                LinkError::invalid_index(class.module, "class_def", class.class_def_index as u32)
            })
    }

    /// Link a class definition. The outcome, success or failure, is
    /// remembered.
    pub fn link_class(&self, class: ClassReference) -> LinkResult<Arc<LinkedClass>> {
        let slot = self.link_slot(class)?;
        if let Some(result) = slot.get() {
            return result.clone();
        }
        let result = self.link(class);
        if let Err(err) = &result {
            debug!(class = %class, error = %err, "link failed");
        }
        match slot.try_insert(result) {
            Ok(stored) => stored.clone(),
            Err((existing, _)) => existing.clone(),
        }
    }

    fn link(&self, class: ClassReference) -> LinkResult<Arc<LinkedClass>> {
        let entry = self
            .class_path
            .entry(class.module)
            .ok_or(LinkError::UnknownModule(class.module))?;
        let module = &entry.module;
        let def = module.class_def(class.class_def_index).ok_or_else(|| {
            LinkError::invalid_index(class.module, "class_def", class.class_def_index as u32)
        })?;
        let descriptor = self.type_descriptor(class.module, def.class_idx)?.to_string();
        if self.circular.contains(&class) {
            return Err(LinkError::ClassCircularity(descriptor));
        }

        let superclass = match def.superclass_idx {
            Some(idx) => {
                let super_descriptor = self.type_descriptor(class.module, idx)?;
                let superclass = self.find_class(super_descriptor)?;
                if superclass.is_interface() || superclass.is_final() {
                    return Err(LinkError::IncompatibleClassChange(format!(
                        "{descriptor} cannot extend {super_descriptor}"
                    )));
                }
                Some(superclass)
            }
            None => None,
        };
        let mut interfaces = Vec::with_capacity(def.interfaces.len());
        for &idx in &def.interfaces {
            let iface = self.find_class(self.type_descriptor(class.module, idx)?)?;
            if !iface.is_interface() {
                return Err(LinkError::IncompatibleClassChange(format!(
                    "{descriptor} implements non-interface {}",
                    iface.descriptor()
                )));
            }
            interfaces.push(iface);
        }

        let instance_start = superclass
            .as_ref()
            .map_or(OBJECT_HEADER_SIZE, |s| s.object_size());
        let (instance_fields, object_size) =
            self.layout_fields(class, &descriptor, module, &def.instance_fields, instance_start)?;
        let (static_fields, _) =
            self.layout_fields(class, &descriptor, module, &def.static_fields, 0)?;

        let mut direct_methods = Vec::with_capacity(def.direct_methods.len());
        for (i, m) in def.direct_methods.iter().enumerate() {
            direct_methods.push(Arc::new(self.linked_method(
                class, &descriptor, module, m, i as u32, true, def.access_flags,
            )?));
        }

        let mut vtable = match (&superclass, def.is_interface()) {
            (Some(s), false) => s.vtable().to_vec(),
            _ => Vec::new(),
        };
        let mut virtual_methods = Vec::with_capacity(def.virtual_methods.len());
        for (i, m) in def.virtual_methods.iter().enumerate() {
            let id = module
                .method_id(m.method_idx)
                .ok_or_else(|| LinkError::invalid_index(class.module, "method", m.method_idx))?;
            let index = if def.is_interface() {
                i
            } else {
                vtable
                    .iter()
                    .position(|v| v.matches(&id.name, &id.signature))
                    .unwrap_or(vtable.len())
            };
            let method = Arc::new(self.linked_method(
                class, &descriptor, module, m, index as u32, false, def.access_flags,
            )?);
            if !def.is_interface() {
                if index < vtable.len() {
                    vtable[index] = Arc::clone(&method);
                } else {
                    vtable.push(Arc::clone(&method));
                }
            }
            virtual_methods.push(method);
        }

        let class_initializer = def
            .class_initializer(module)
            .map(|m| MethodReference::new(class.module, m.method_idx));

        trace!(class = %descriptor, object_size, vtable = vtable.len(), "linked");
        Ok(Arc::new(LinkedClass {
            reference: class,
            descriptor,
            access_flags: def.access_flags,
            is_boot: entry.is_boot(),
            superclass,
            interfaces,
            instance_fields,
            static_fields,
            object_size,
            direct_methods,
            virtual_methods,
            vtable,
            class_initializer,
            status: AtomicU8::new(ClassStatus::Resolved as u8),
            monitor: Mutex::new(()),
        }))
    }

    /// Lay fields out largest first, each aligned to its own size.
    fn layout_fields(
        &self,
        class: ClassReference,
        descriptor: &str,
        module: &Module,
        fields: &[EncodedField],
        start: u32,
    ) -> LinkResult<(Vec<Arc<LinkedField>>, u32)> {
        let mut pending = Vec::with_capacity(fields.len());
        for field in fields {
            let id = module
                .field_id(field.field_idx)
                .ok_or_else(|| LinkError::invalid_index(class.module, "field", field.field_idx))?;
            let type_descriptor = self.type_descriptor(class.module, id.type_idx)?;
            pending.push((field, id, type_descriptor, field_size(type_descriptor)));
        }
        pending.sort_by(|a, b| b.3.cmp(&a.3));

        let mut offset = start;
        let mut linked = Vec::with_capacity(pending.len());
        for (field, id, type_descriptor, size) in pending {
            offset = offset.next_multiple_of(size);
            linked.push(Arc::new(LinkedField {
                reference: FieldReference::new(class.module, field.field_idx),
                declaring_class: class,
                declaring_descriptor: descriptor.to_string(),
                name: id.name.clone(),
                type_descriptor: type_descriptor.to_string(),
                access_flags: field.access_flags,
                offset,
            }));
            offset += size;
        }
        Ok((linked, offset))
    }

    #[allow(clippy::too_many_arguments)]
    fn linked_method(
        &self,
        class: ClassReference,
        descriptor: &str,
        module: &Module,
        method: &EncodedMethod,
        method_index: u32,
        is_direct: bool,
        class_flags: AccessFlags,
    ) -> LinkResult<LinkedMethod> {
        let id = module
            .method_id(method.method_idx)
            .ok_or_else(|| LinkError::invalid_index(class.module, "method", method.method_idx))?;
        Ok(LinkedMethod {
            reference: MethodReference::new(class.module, method.method_idx),
            declaring_class: class,
            declaring_descriptor: descriptor.to_string(),
            name: id.name.clone(),
            signature: id.signature.clone(),
            access_flags: method.access_flags,
            method_index,
            is_direct,
            has_code: method.code.is_some(),
            in_final_class: class_flags.is_final(),
            in_interface: class_flags.is_interface(),
        })
    }

    fn type_descriptor(&self, module: ModuleId, type_idx: u32) -> LinkResult<&str> {
        self.module(module)?
            .type_descriptor(type_idx)
            .ok_or_else(|| LinkError::invalid_index(module, "type", type_idx))
    }

    // ---- resolution -------------------------------------------------------

    /// Resolve a type id of `module` to a linked class.
    pub fn resolve_type(&self, module: ModuleId, type_idx: u32) -> LinkResult<Arc<LinkedClass>> {
        let cache = self.dex_cache(module)?;
        if let Some(class) = cache.resolved_type(type_idx) {
            return Ok(class);
        }
        let class = self.find_class(self.type_descriptor(module, type_idx)?)?;
        Ok(cache.set_resolved_type(type_idx, class))
    }

    /// Cached resolution only; never links anything.
    pub fn resolved_type(&self, module: ModuleId, type_idx: u32) -> Option<Arc<LinkedClass>> {
        self.dex_caches.get(module.index())?.resolved_type(type_idx)
    }

    pub fn resolve_string(&self, module: ModuleId, string_idx: u32) -> LinkResult<()> {
        let cache = self.dex_cache(module)?;
        if self.module(module)?.string(string_idx).is_none() {
            return Err(LinkError::invalid_index(module, "string", string_idx));
        }
        cache.set_string_resolved(string_idx);
        Ok(())
    }

    pub fn is_string_resolved(&self, module: ModuleId, string_idx: u32) -> bool {
        self.dex_caches
            .get(module.index())
            .is_some_and(|c| c.is_string_resolved(string_idx))
    }

    /// Resolve a field id of `module`, accessed as static or instance field.
    pub fn resolve_field(
        &self,
        module: ModuleId,
        field_idx: u32,
        is_static: bool,
    ) -> LinkResult<Arc<LinkedField>> {
        let cache = self.dex_cache(module)?;
        if let Some(field) = cache.resolved_field(field_idx) {
            check_field_kind(&field, is_static)?;
            return Ok(field);
        }
        let id = self
            .module(module)?
            .field_id(field_idx)
            .ok_or_else(|| LinkError::invalid_index(module, "field", field_idx))?;
        let class = self.resolve_type(module, id.class_idx)?;
        let found = if is_static {
            class.find_static_field(&id.name)
        } else {
            class.find_instance_field(&id.name)
        };
        let field = match found {
            Some(field) => field,
            None => {
                let other_kind = if is_static {
                    class.find_instance_field(&id.name)
                } else {
                    class.find_static_field(&id.name)
                };
                return Err(match other_kind {
                    Some(field) => incompatible_field(&field, is_static),
                    None => LinkError::no_such_field(class.descriptor(), &id.name),
                });
            }
        };
        Ok(cache.set_resolved_field(field_idx, field))
    }

    pub fn resolved_field(&self, module: ModuleId, field_idx: u32) -> Option<Arc<LinkedField>> {
        self.dex_caches.get(module.index())?.resolved_field(field_idx)
    }

    /// Resolve a method id of `module` as the target of an `invoke-<kind>`.
    pub fn resolve_method(
        &self,
        module: ModuleId,
        method_idx: u32,
        kind: InvokeType,
    ) -> LinkResult<Arc<LinkedMethod>> {
        let cache = self.dex_cache(module)?;
        if let Some(method) = cache.resolved_method(method_idx) {
            check_invoke_kind(&method, kind)?;
            return Ok(method);
        }
        let id = self
            .module(module)?
            .method_id(method_idx)
            .ok_or_else(|| LinkError::invalid_index(module, "method", method_idx))?;
        let class = self.resolve_type(module, id.class_idx)?;
        let (name, signature) = (id.name.as_str(), id.signature.as_str());

        let found = match kind {
            InvokeType::Interface => {
                if !class.is_interface() {
                    return Err(LinkError::IncompatibleClassChange(format!(
                        "{} is not an interface",
                        class.descriptor()
                    )));
                }
                class.find_interface_method(name, signature).or_else(|| {
                    self.find_class(OBJECT_DESCRIPTOR)
                        .ok()
                        .and_then(|o| o.find_declared_virtual_method(name, signature).cloned())
                })
            }
            InvokeType::Virtual | InvokeType::Super if class.is_interface() => {
                return Err(LinkError::IncompatibleClassChange(format!(
                    "{} is an interface",
                    class.descriptor()
                )));
            }
            InvokeType::Static | InvokeType::Direct => class
                .find_direct_method(name, signature)
                .or_else(|| class.find_virtual_method(name, signature)),
            InvokeType::Virtual | InvokeType::Super => class
                .find_virtual_method(name, signature)
                .or_else(|| class.find_direct_method(name, signature)),
        };
        let method =
            found.ok_or_else(|| LinkError::no_such_method(class.descriptor(), name, signature))?;
        check_invoke_kind(&method, kind)?;
        Ok(cache.set_resolved_method(method_idx, method))
    }

    pub fn resolved_method(&self, module: ModuleId, method_idx: u32) -> Option<Arc<LinkedMethod>> {
        self.dex_caches.get(module.index())?.resolved_method(method_idx)
    }

    /// Code of a class's static initializer, with the module it lives in.
    pub fn class_initializer_code(&self, class: &LinkedClass) -> Option<(&Module, &CodeItem)> {
        let clinit = class.class_initializer()?;
        let module = self.class_path.module(clinit.module)?;
        let (_, method, _) = module.find_encoded_method(clinit.method_index)?;
        Some((module.as_ref(), method.code.as_ref()?))
    }
}

fn check_field_kind(field: &LinkedField, is_static: bool) -> LinkResult<()> {
    if field.is_static() == is_static {
        Ok(())
    } else {
        Err(incompatible_field(field, is_static))
    }
}

fn incompatible_field(field: &LinkedField, expected_static: bool) -> LinkError {
    let expected = if expected_static { "static" } else { "instance" };
    LinkError::IncompatibleClassChange(format!(
        "expected {expected} field {}.{}",
        field.declaring_descriptor, field.name
    ))
}

fn check_invoke_kind(method: &LinkedMethod, kind: InvokeType) -> LinkResult<()> {
    let compatible = match kind {
        InvokeType::Static => method.is_static(),
        InvokeType::Direct => method.is_direct && !method.is_static(),
        InvokeType::Virtual | InvokeType::Super => !method.is_direct,
        InvokeType::Interface => {
            !method.is_direct
                && (method.in_interface || method.declaring_descriptor == OBJECT_DESCRIPTOR)
        }
    };
    if compatible {
        Ok(())
    } else {
        let name = format!("{}.{}{}", method.declaring_descriptor, method.name, method.signature);
        Err(LinkError::incompatible_invoke(&name, kind))
    }
}

/// Finds definitions that take part in a superclass/interface cycle.
struct CycleFinder<'a> {
    class_path: &'a ClassPath,
    definitions: &'a FxHashMap<String, ClassReference>,
    visiting: FxHashSet<ClassReference>,
    done: FxHashSet<ClassReference>,
    stack: Vec<ClassReference>,
    circular: FxHashSet<ClassReference>,
}

impl<'a> CycleFinder<'a> {
    fn new(class_path: &'a ClassPath, definitions: &'a FxHashMap<String, ClassReference>) -> Self {
        Self {
            class_path,
            definitions,
            visiting: FxHashSet::default(),
            done: FxHashSet::default(),
            stack: Vec::new(),
            circular: FxHashSet::default(),
        }
    }

    fn run(mut self) -> FxHashSet<ClassReference> {
        for (id, entry) in self.class_path.iter() {
            for idx in 0..entry.module.num_class_defs() {
                self.visit(ClassReference::new(id, idx as u16));
            }
        }
        self.circular
    }

    fn edges(&self, class: ClassReference) -> Vec<ClassReference> {
        let Some(module) = self.class_path.module(class.module) else {
            return Vec::new();
        };
        let Some(def) = module.class_def(class.class_def_index) else {
            return Vec::new();
        };
        def.superclass_idx
            .iter()
            .chain(&def.interfaces)
            .filter_map(|&idx| module.type_descriptor(idx))
            .filter_map(|d| self.definitions.get(d).copied())
            .collect()
    }

    fn visit(&mut self, class: ClassReference) {
        if self.done.contains(&class) {
            return;
        }
        if self.visiting.contains(&class) {
            if let Some(pos) = self.stack.iter().position(|&c| c == class) {
                self.circular.extend(self.stack[pos..].iter().copied());
            }
            return;
        }
        self.visiting.insert(class);
        self.stack.push(class);
        for next in self.edges(class) {
            self.visit(next);
        }
        self.stack.pop();
        self.visiting.remove(&class);
        self.done.insert(class);
    }
}
