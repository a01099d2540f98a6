//! The ordered list of modules classes are looked up in.
//!
//! Order is precedence: when two modules define the same descriptor the one
//! pushed first wins, exactly like a class-loader search path.

use oatc_dex::{Module, ModuleId};
use std::sync::Arc;

/// Where a module comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleOrigin {
    /// Part of the boot class path; its classes may end up in the boot image.
    BootClassPath,
    Application,
}

/// A module on the class path.
#[derive(Debug, Clone)]
pub struct ClassPathEntry {
    pub module: Arc<Module>,
    pub origin: ModuleOrigin,
}

impl ClassPathEntry {
    pub fn is_boot(&self) -> bool {
        self.origin == ModuleOrigin::BootClassPath
    }
}

/// Ordered module list.
#[derive(Debug, Clone, Default)]
pub struct ClassPath {
    entries: Vec<ClassPathEntry>,
}

impl ClassPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a boot class path module.
    pub fn push_boot(&mut self, module: impl Into<Arc<Module>>) -> ModuleId {
        self.push(module.into(), ModuleOrigin::BootClassPath)
    }

    /// Append an application module.
    pub fn push_app(&mut self, module: impl Into<Arc<Module>>) -> ModuleId {
        self.push(module.into(), ModuleOrigin::Application)
    }

    pub fn push(&mut self, module: Arc<Module>, origin: ModuleOrigin) -> ModuleId {
        let id = ModuleId(self.entries.len() as u32);
        self.entries.push(ClassPathEntry { module, origin });
        id
    }

    pub fn entry(&self, id: ModuleId) -> Option<&ClassPathEntry> {
        self.entries.get(id.index())
    }

    pub fn module(&self, id: ModuleId) -> Option<&Arc<Module>> {
        self.entry(id).map(|e| &e.module)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in precedence order.
    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &ClassPathEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (ModuleId(i as u32), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_push_order() {
        let mut cp = ClassPath::new();
        let a = cp.push_boot(Module::new("core.dex"));
        let b = cp.push_app(Module::new("app.dex"));
        assert_eq!(a, ModuleId(0));
        assert_eq!(b, ModuleId(1));
        assert!(cp.entry(a).unwrap().is_boot());
        assert!(!cp.entry(b).unwrap().is_boot());
        assert_eq!(cp.module(b).unwrap().location, "app.dex");
        assert!(cp.module(ModuleId(2)).is_none());
    }
}
