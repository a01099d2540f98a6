//! The set of classes that go into the image being built.

use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Descriptors of image classes. `None` means every class is eligible.
///
/// Queries take a recursive read lock so a worker that already reads the
/// set can query it again while discovery is waiting to write.
#[derive(Debug, Default)]
pub struct ImageClasses {
    descriptors: RwLock<Option<BTreeSet<String>>>,
}

impl ImageClasses {
    pub fn new(descriptors: Option<BTreeSet<String>>) -> Self {
        Self {
            descriptors: RwLock::new(descriptors),
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.descriptors.read_recursive().is_some()
    }

    pub fn contains(&self, descriptor: &str) -> bool {
        self.descriptors
            .read_recursive()
            .as_ref()
            .map_or(true, |set| set.contains(descriptor))
    }

    /// Add a descriptor to a restricted set. Returns whether it was new.
    pub fn insert(&self, descriptor: &str) -> bool {
        match self.descriptors.write().as_mut() {
            Some(set) => set.insert(descriptor.to_owned()),
            None => false,
        }
    }

    pub fn remove(&self, descriptor: &str) -> bool {
        self.descriptors
            .write()
            .as_mut()
            .is_some_and(|set| set.remove(descriptor))
    }

    pub fn snapshot(&self) -> Option<BTreeSet<String>> {
        self.descriptors.read_recursive().clone()
    }

    pub fn len(&self) -> Option<usize> {
        self.descriptors.read_recursive().as_ref().map(BTreeSet::len)
    }
}
