//! Address map of an already-built boot image.
//!
//! When compiling an application against a boot image, classes and methods
//! that live in the image have fixed addresses the compiler may embed
//! directly. Boot builds start from an empty space.

use oatc_dex::{ClassReference, MethodReference};
use rustc_hash::FxHashMap;

/// Addresses of a method in the boot image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMethod {
    /// Address of the method object.
    pub method_address: u64,
    /// Address of the method's compiled code.
    pub code_address: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ImageSpace {
    classes: FxHashMap<ClassReference, u64>,
    methods: FxHashMap<MethodReference, ImageMethod>,
}

impl ImageSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_class(&mut self, class: ClassReference, address: u64) {
        self.classes.insert(class, address);
    }

    pub fn insert_method(&mut self, method: MethodReference, addresses: ImageMethod) {
        self.methods.insert(method, addresses);
    }

    pub fn class_address(&self, class: ClassReference) -> Option<u64> {
        self.classes.get(&class).copied()
    }

    pub fn method(&self, method: MethodReference) -> Option<ImageMethod> {
        self.methods.get(&method).copied()
    }

    pub fn contains_class(&self, class: ClassReference) -> bool {
        self.classes.contains_key(&class)
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.methods.is_empty()
    }
}
