//! Shared tables of compiled classes and methods.
//!
//! Two independent locks, one per table. No operation holds both, so class
//! status bookkeeping during verification never waits on method installs.

use crate::compiled::{CompiledClass, CompiledMethod};
use crate::error::{DriverError, DriverResult};
use oatc_dex::{ClassReference, MethodReference};
use oatc_runtime::ClassStatus;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ArtifactTables {
    classes: RwLock<BTreeMap<ClassReference, CompiledClass>>,
    methods: RwLock<BTreeMap<MethodReference, Arc<CompiledMethod>>>,
}

impl ArtifactTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a class. Inserting the same reference twice is a contract
    /// violation.
    pub fn put_class(&self, class: ClassReference, compiled: CompiledClass) -> DriverResult<()> {
        let mut classes = self.classes.write();
        if classes.contains_key(&class) {
            return Err(DriverError::DuplicateClass { class });
        }
        classes.insert(class, compiled);
        Ok(())
    }

    pub fn get_class(&self, class: ClassReference) -> Option<CompiledClass> {
        self.classes.read().get(&class).copied()
    }

    /// Record `status` for `class`, inserting the entry if needed. An
    /// existing status only moves forward or to `Error`.
    pub fn update_class_status(&self, class: ClassReference, status: ClassStatus) {
        let mut classes = self.classes.write();
        match classes.get_mut(&class) {
            Some(compiled) => {
                if compiled.status().can_transition_to(status) {
                    compiled.set_status(status);
                }
            }
            None => {
                classes.insert(class, CompiledClass::new(status));
            }
        }
    }

    /// Insert a method. Inserting the same reference twice is a contract
    /// violation.
    pub fn put_method(&self, method: MethodReference, compiled: CompiledMethod) -> DriverResult<()> {
        let mut methods = self.methods.write();
        if methods.contains_key(&method) {
            return Err(DriverError::DuplicateMethod { method });
        }
        methods.insert(method, Arc::new(compiled));
        Ok(())
    }

    pub fn get_method(&self, method: MethodReference) -> Option<Arc<CompiledMethod>> {
        self.methods.read().get(&method).cloned()
    }

    pub fn contains_method(&self, method: MethodReference) -> bool {
        self.methods.read().contains_key(&method)
    }

    /// Snapshot of the class table in reference order.
    pub fn classes(&self) -> Vec<(ClassReference, CompiledClass)> {
        self.classes.read().iter().map(|(k, v)| (*k, *v)).collect()
    }

    /// Snapshot of the method table in reference order.
    pub fn methods(&self) -> Vec<(MethodReference, Arc<CompiledMethod>)> {
        self.methods
            .read()
            .iter()
            .map(|(k, v)| (*k, Arc::clone(v)))
            .collect()
    }

    pub fn class_count(&self) -> usize {
        self.classes.read().len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.read().len()
    }
}
