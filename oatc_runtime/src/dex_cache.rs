//! Per-module resolution caches.
//!
//! One slot per constant-pool entry. Only successful resolutions are cached:
//! a reference that failed to resolve is retried the next time it is asked
//! for. Slots are write-once, so concurrent resolvers of the same entry all
//! observe the first stored value.

use crate::class::{LinkedClass, LinkedField, LinkedMethod};
use oatc_dex::Module;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct DexCache {
    types: Box<[OnceCell<Arc<LinkedClass>>]>,
    strings: Box<[AtomicBool]>,
    fields: Box<[OnceCell<Arc<LinkedField>>]>,
    methods: Box<[OnceCell<Arc<LinkedMethod>>]>,
}

fn slots<T>(len: usize) -> Box<[OnceCell<T>]> {
    (0..len).map(|_| OnceCell::new()).collect()
}

/// Store `value` unless the slot is already filled; return what the slot holds.
fn publish<T: Clone>(slot: &OnceCell<T>, value: T) -> T {
    match slot.try_insert(value) {
        Ok(stored) => stored.clone(),
        Err((existing, _)) => existing.clone(),
    }
}

impl DexCache {
    pub fn new(module: &Module) -> Self {
        Self {
            types: slots(module.types.len()),
            strings: (0..module.strings.len()).map(|_| AtomicBool::new(false)).collect(),
            fields: slots(module.fields.len()),
            methods: slots(module.methods.len()),
        }
    }

    pub fn resolved_type(&self, type_idx: u32) -> Option<Arc<LinkedClass>> {
        self.types.get(type_idx as usize)?.get().cloned()
    }

    pub(crate) fn set_resolved_type(&self, type_idx: u32, class: Arc<LinkedClass>) -> Arc<LinkedClass> {
        match self.types.get(type_idx as usize) {
            Some(slot) => publish(slot, class),
            None => class,
        }
    }

    pub fn is_string_resolved(&self, string_idx: u32) -> bool {
        self.strings
            .get(string_idx as usize)
            .is_some_and(|s| s.load(Ordering::Acquire))
    }

    pub(crate) fn set_string_resolved(&self, string_idx: u32) {
        if let Some(slot) = self.strings.get(string_idx as usize) {
            slot.store(true, Ordering::Release);
        }
    }

    pub fn resolved_field(&self, field_idx: u32) -> Option<Arc<LinkedField>> {
        self.fields.get(field_idx as usize)?.get().cloned()
    }

    pub(crate) fn set_resolved_field(&self, field_idx: u32, field: Arc<LinkedField>) -> Arc<LinkedField> {
        match self.fields.get(field_idx as usize) {
            Some(slot) => publish(slot, field),
            None => field,
        }
    }

    pub fn resolved_method(&self, method_idx: u32) -> Option<Arc<LinkedMethod>> {
        self.methods.get(method_idx as usize)?.get().cloned()
    }

    pub(crate) fn set_resolved_method(&self, method_idx: u32, method: Arc<LinkedMethod>) -> Arc<LinkedMethod> {
        match self.methods.get(method_idx as usize) {
            Some(slot) => publish(slot, method),
            None => method,
        }
    }

    /// Number of type slots filled so far.
    pub fn num_resolved_types(&self) -> usize {
        self.types.iter().filter(|s| s.get().is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_slots() {
        let mut module = Module::new("s.dex");
        module.strings = vec!["a".into(), "b".into()];
        let cache = DexCache::new(&module);
        assert!(!cache.is_string_resolved(1));
        cache.set_string_resolved(1);
        assert!(cache.is_string_resolved(1));
        assert!(!cache.is_string_resolved(0));
        // out of range is never resolved
        cache.set_string_resolved(9);
        assert!(!cache.is_string_resolved(9));
    }

    #[test]
    fn test_first_published_value_wins() {
        let slot = OnceCell::new();
        assert_eq!(publish(&slot, 1), 1);
        assert_eq!(publish(&slot, 2), 1);
    }
}
