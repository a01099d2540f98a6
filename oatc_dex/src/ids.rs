//! Stable identities for modules, classes, methods and fields.
//!
//! These identify entities independently of any linked runtime state, so they
//! can be used as map keys by the driver and handed to the linker untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a module in the class path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

impl ModuleId {
    /// Index into the class path.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// A class definition inside a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassReference {
    pub module: ModuleId,
    pub class_def_index: u16,
}

impl ClassReference {
    pub fn new(module: ModuleId, class_def_index: u16) -> Self {
        Self {
            module,
            class_def_index,
        }
    }
}

impl fmt::Display for ClassReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/class_def#{}", self.module, self.class_def_index)
    }
}

/// A method id inside a module.
///
/// Ordering is module first, then method index, which gives the driver a
/// total and stable iteration order over compiled methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodReference {
    pub module: ModuleId,
    pub method_index: u32,
}

impl MethodReference {
    pub fn new(module: ModuleId, method_index: u32) -> Self {
        Self {
            module,
            method_index,
        }
    }
}

impl fmt::Display for MethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/method#{}", self.module, self.method_index)
    }
}

/// A field id inside a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldReference {
    pub module: ModuleId,
    pub field_index: u32,
}

impl FieldReference {
    pub fn new(module: ModuleId, field_index: u32) -> Self {
        Self {
            module,
            field_index,
        }
    }
}

impl fmt::Display for FieldReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/field#{}", self.module, self.field_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_reference_order_is_module_major() {
        let a = MethodReference::new(ModuleId(0), 9);
        let b = MethodReference::new(ModuleId(1), 0);
        let c = MethodReference::new(ModuleId(1), 3);
        let mut refs = vec![c, a, b];
        refs.sort();
        assert_eq!(refs, vec![a, b, c]);
    }

    #[test]
    fn test_display() {
        let r = ClassReference::new(ModuleId(2), 7);
        assert_eq!(r.to_string(), "module#2/class_def#7");
        let m = MethodReference::new(ModuleId(0), 4);
        assert_eq!(m.to_string(), "module#0/method#4");
    }
}
