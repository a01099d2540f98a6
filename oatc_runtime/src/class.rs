//! Linked classes, fields and methods.
//!
//! A [`LinkedClass`] is produced once per class definition by the
//! [`crate::ClassLinker`]. Everything except its status is immutable after
//! linking, so the driver shares it freely across worker threads.

use crate::status::ClassStatus;
use oatc_dex::{descriptor_package, AccessFlags, ClassReference, FieldReference, MethodReference};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Bytes taken by the object header before the first instance field.
pub const OBJECT_HEADER_SIZE: u32 = 8;

/// A field after linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedField {
    pub reference: FieldReference,
    pub declaring_class: ClassReference,
    pub declaring_descriptor: String,
    pub name: String,
    pub type_descriptor: String,
    pub access_flags: AccessFlags,
    /// Byte offset inside the object (instance) or the class statics (static).
    pub offset: u32,
}

impl LinkedField {
    pub fn is_static(&self) -> bool {
        self.access_flags.is_static()
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.is_final()
    }

    pub fn is_volatile(&self) -> bool {
        self.access_flags.is_volatile()
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self.type_descriptor.as_bytes().first(), Some(b'L' | b'['))
    }
}

/// A method after linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedMethod {
    pub reference: MethodReference,
    pub declaring_class: ClassReference,
    pub declaring_descriptor: String,
    pub name: String,
    pub signature: String,
    pub access_flags: AccessFlags,
    /// Vtable index for virtual methods of classes, position among the
    /// interface's methods for interface methods, declaration index for
    /// direct methods.
    pub method_index: u32,
    pub is_direct: bool,
    pub has_code: bool,
    /// The declaring class is final.
    pub in_final_class: bool,
    /// The declaring class is an interface.
    pub in_interface: bool,
}

impl LinkedMethod {
    pub fn is_static(&self) -> bool {
        self.access_flags.is_static()
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.is_abstract()
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.is_native()
    }

    pub fn is_constructor(&self) -> bool {
        self.access_flags.is_constructor()
    }

    /// No override of this method can exist: it or its class is final.
    pub fn is_effectively_final(&self) -> bool {
        self.access_flags.is_final() || self.in_final_class
    }

    pub fn is_class_initializer(&self) -> bool {
        self.name == oatc_dex::CLASS_INITIALIZER_NAME
    }

    pub fn matches(&self, name: &str, signature: &str) -> bool {
        self.name == name && self.signature == signature
    }
}

/// A class after linking.
pub struct LinkedClass {
    pub(crate) reference: ClassReference,
    pub(crate) descriptor: String,
    pub(crate) access_flags: AccessFlags,
    pub(crate) is_boot: bool,
    pub(crate) superclass: Option<Arc<LinkedClass>>,
    pub(crate) interfaces: Vec<Arc<LinkedClass>>,
    pub(crate) instance_fields: Vec<Arc<LinkedField>>,
    pub(crate) static_fields: Vec<Arc<LinkedField>>,
    pub(crate) object_size: u32,
    pub(crate) direct_methods: Vec<Arc<LinkedMethod>>,
    pub(crate) virtual_methods: Vec<Arc<LinkedMethod>>,
    pub(crate) vtable: Vec<Arc<LinkedMethod>>,
    pub(crate) class_initializer: Option<MethodReference>,
    pub(crate) status: AtomicU8,
    pub(crate) monitor: Mutex<()>,
}

impl fmt::Debug for LinkedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedClass")
            .field("reference", &self.reference)
            .field("descriptor", &self.descriptor)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl LinkedClass {
    pub fn reference(&self) -> ClassReference {
        self.reference
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    /// Defined by a boot class path module.
    pub fn is_boot(&self) -> bool {
        self.is_boot
    }

    pub fn superclass(&self) -> Option<&Arc<LinkedClass>> {
        self.superclass.as_ref()
    }

    pub fn interfaces(&self) -> &[Arc<LinkedClass>] {
        &self.interfaces
    }

    pub fn instance_fields(&self) -> &[Arc<LinkedField>] {
        &self.instance_fields
    }

    pub fn static_fields(&self) -> &[Arc<LinkedField>] {
        &self.static_fields
    }

    /// Size of an instance, header included.
    pub fn object_size(&self) -> u32 {
        self.object_size
    }

    pub fn direct_methods(&self) -> &[Arc<LinkedMethod>] {
        &self.direct_methods
    }

    pub fn virtual_methods(&self) -> &[Arc<LinkedMethod>] {
        &self.virtual_methods
    }

    pub fn vtable(&self) -> &[Arc<LinkedMethod>] {
        &self.vtable
    }

    pub fn vtable_entry(&self, index: u32) -> Option<&Arc<LinkedMethod>> {
        self.vtable.get(index as usize)
    }

    pub fn class_initializer(&self) -> Option<MethodReference> {
        self.class_initializer
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.is_final()
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.is_abstract()
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.is_interface()
    }

    pub fn is_public(&self) -> bool {
        self.access_flags.is_public()
    }

    /// Objects of this class can be allocated with `new-instance`.
    pub fn is_instantiable(&self) -> bool {
        !self.is_interface() && !self.is_abstract()
    }

    /// Declares at least one final instance field.
    pub fn has_final_instance_fields(&self) -> bool {
        self.instance_fields.iter().any(|f| f.is_final())
    }

    // ---- status -----------------------------------------------------------

    pub fn status(&self) -> ClassStatus {
        ClassStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Move the class to `next`. Returns `false` (and leaves the status
    /// untouched) when that would move it backwards.
    pub fn set_status(&self, next: ClassStatus) -> bool {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            if !ClassStatus::from_u8(current).can_transition_to(next) {
                return false;
            }
            match self.status.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.status().is_initialized()
    }

    pub fn is_erroneous(&self) -> bool {
        self.status().is_erroneous()
    }

    /// Per-class monitor held while verifying or initializing the class.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.monitor.lock()
    }

    // ---- hierarchy --------------------------------------------------------

    /// `self` is `other` or extends it.
    pub fn is_subclass_of(&self, other: ClassReference) -> bool {
        if self.reference == other {
            return true;
        }
        let mut current = self.superclass.as_ref();
        while let Some(class) = current {
            if class.reference == other {
                return true;
            }
            current = class.superclass.as_ref();
        }
        false
    }

    /// `self` implements `iface`, directly, through a superinterface or
    /// through a superclass.
    pub fn implements(&self, iface: ClassReference) -> bool {
        let direct = self
            .interfaces
            .iter()
            .any(|i| i.reference == iface || i.implements(iface));
        direct || self.superclass.as_ref().is_some_and(|s| s.implements(iface))
    }

    /// A value of `self` can be stored into a location of type `target`.
    pub fn is_assignable_to(&self, target: &LinkedClass) -> bool {
        if target.is_interface() {
            self.reference == target.reference || self.implements(target.reference)
        } else {
            self.is_subclass_of(target.reference)
        }
    }

    pub fn in_same_package(&self, descriptor: &str) -> bool {
        descriptor_package(&self.descriptor) == descriptor_package(descriptor)
    }

    // ---- access checks ----------------------------------------------------

    /// Code in `self` may name `other`.
    pub fn can_access(&self, other: &LinkedClass) -> bool {
        other.is_public() || self.in_same_package(&other.descriptor)
    }

    /// Code in `self` may use a member with `flags` declared by `declaring`.
    pub fn can_access_member(
        &self,
        declaring: ClassReference,
        declaring_descriptor: &str,
        flags: AccessFlags,
    ) -> bool {
        if flags.is_public() {
            return true;
        }
        if flags.is_private() {
            return self.reference == declaring;
        }
        if flags.is_protected() && !self.is_interface() && self.is_subclass_of(declaring) {
            return true;
        }
        self.in_same_package(declaring_descriptor)
    }

    /// Code in `self` may use `field`, reached through the class `access_to`.
    pub fn can_access_resolved_field(&self, access_to: &LinkedClass, field: &LinkedField) -> bool {
        self.can_access(access_to)
            && self.can_access_member(
                field.declaring_class,
                &field.declaring_descriptor,
                field.access_flags,
            )
    }

    /// Code in `self` may call `method`, reached through the class `access_to`.
    pub fn can_access_resolved_method(
        &self,
        access_to: &LinkedClass,
        method: &LinkedMethod,
    ) -> bool {
        self.can_access(access_to)
            && self.can_access_member(
                method.declaring_class,
                &method.declaring_descriptor,
                method.access_flags,
            )
    }

    // ---- member lookup ----------------------------------------------------

    pub fn find_declared_instance_field(&self, name: &str) -> Option<&Arc<LinkedField>> {
        self.instance_fields.iter().find(|f| f.name == name)
    }

    pub fn find_declared_static_field(&self, name: &str) -> Option<&Arc<LinkedField>> {
        self.static_fields.iter().find(|f| f.name == name)
    }

    /// Instance field lookup through the superclass chain.
    pub fn find_instance_field(&self, name: &str) -> Option<Arc<LinkedField>> {
        if let Some(field) = self.find_declared_instance_field(name) {
            return Some(Arc::clone(field));
        }
        self.superclass.as_ref()?.find_instance_field(name)
    }

    /// Static field lookup: declared, then interfaces, then superclass.
    pub fn find_static_field(&self, name: &str) -> Option<Arc<LinkedField>> {
        if let Some(field) = self.find_declared_static_field(name) {
            return Some(Arc::clone(field));
        }
        for iface in &self.interfaces {
            if let Some(field) = iface.find_static_field(name) {
                return Some(field);
            }
        }
        self.superclass.as_ref()?.find_static_field(name)
    }

    pub fn find_declared_direct_method(&self, name: &str, signature: &str) -> Option<&Arc<LinkedMethod>> {
        self.direct_methods.iter().find(|m| m.matches(name, signature))
    }

    pub fn find_declared_virtual_method(&self, name: &str, signature: &str) -> Option<&Arc<LinkedMethod>> {
        self.virtual_methods.iter().find(|m| m.matches(name, signature))
    }

    /// Direct method lookup through the superclass chain.
    pub fn find_direct_method(&self, name: &str, signature: &str) -> Option<Arc<LinkedMethod>> {
        if let Some(m) = self.find_declared_direct_method(name, signature) {
            return Some(Arc::clone(m));
        }
        self.superclass.as_ref()?.find_direct_method(name, signature)
    }

    /// Virtual method lookup through the superclass chain, then interfaces.
    pub fn find_virtual_method(&self, name: &str, signature: &str) -> Option<Arc<LinkedMethod>> {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(m) = class.find_declared_virtual_method(name, signature) {
                return Some(Arc::clone(m));
            }
            current = class.superclass.as_deref();
        }
        self.find_interface_method(name, signature)
    }

    /// Lookup through declared and inherited interfaces.
    pub fn find_interface_method(&self, name: &str, signature: &str) -> Option<Arc<LinkedMethod>> {
        if self.is_interface() {
            if let Some(m) = self.find_declared_virtual_method(name, signature) {
                return Some(Arc::clone(m));
            }
        }
        for iface in &self.interfaces {
            if let Some(m) = iface.find_interface_method(name, signature) {
                return Some(m);
            }
        }
        self.superclass
            .as_ref()
            .and_then(|s| s.find_interface_method(name, signature))
    }

    /// The vtable entry implementing `method` for receivers of this class.
    pub fn find_virtual_implementation(&self, method: &LinkedMethod) -> Option<&Arc<LinkedMethod>> {
        self.vtable
            .iter()
            .find(|m| m.matches(&method.name, &method.signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oatc_dex::ModuleId;

    fn class(reference: ClassReference, descriptor: &str, flags: AccessFlags, superclass: Option<Arc<LinkedClass>>) -> Arc<LinkedClass> {
        Arc::new(LinkedClass {
            reference,
            descriptor: descriptor.to_string(),
            access_flags: flags,
            is_boot: false,
            superclass,
            interfaces: Vec::new(),
            instance_fields: Vec::new(),
            static_fields: Vec::new(),
            object_size: OBJECT_HEADER_SIZE,
            direct_methods: Vec::new(),
            virtual_methods: Vec::new(),
            vtable: Vec::new(),
            class_initializer: None,
            status: AtomicU8::new(ClassStatus::Resolved as u8),
            monitor: Mutex::new(()),
        })
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let c = class(ClassReference::new(ModuleId(0), 0), "LA;", AccessFlags::PUBLIC, None);
        assert!(c.set_status(ClassStatus::Verified));
        assert!(!c.set_status(ClassStatus::Resolved));
        assert_eq!(c.status(), ClassStatus::Verified);
        assert!(c.set_status(ClassStatus::Error));
        assert!(c.is_erroneous());
    }

    #[test]
    fn test_member_access() {
        let base_ref = ClassReference::new(ModuleId(0), 0);
        let base = class(base_ref, "Lp/Base;", AccessFlags::PUBLIC, None);
        let sub = class(ClassReference::new(ModuleId(0), 1), "Lq/Sub;", AccessFlags::PUBLIC, Some(base.clone()));
        let other = class(ClassReference::new(ModuleId(0), 2), "Lq/Other;", AccessFlags::empty(), None);

        assert!(sub.is_subclass_of(base_ref));
        assert!(!base.is_subclass_of(sub.reference()));

        assert!(sub.can_access_member(base_ref, "Lp/Base;", AccessFlags::PROTECTED));
        assert!(!other.can_access_member(base_ref, "Lp/Base;", AccessFlags::PROTECTED));
        assert!(!sub.can_access_member(base_ref, "Lp/Base;", AccessFlags::PRIVATE));
        assert!(!sub.can_access_member(base_ref, "Lp/Base;", AccessFlags::empty()));
        assert!(base.can_access_member(base_ref, "Lp/Base;", AccessFlags::PRIVATE));

        // package-private class is only visible inside its package
        assert!(sub.can_access(&other));
        assert!(!base.can_access(&other));
    }
}
