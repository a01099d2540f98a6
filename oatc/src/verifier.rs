//! Verifier seam and the cache of its per-method results.

use oatc_dex::{AccessFlags, ClassReference, CodeItem, MethodReference, Module, ModuleId};
use oatc_runtime::{ClassLinker, LinkedClass};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VerificationStatus {
    Verified,
    /// Not provably safe; the class is re-verified at run time.
    SoftFailure,
    /// Provably broken; the class is erroneous.
    HardFailure,
}

/// What the verifier proved about an accepted method, keyed by dex pc.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifiedMethod {
    devirt_targets: BTreeMap<u32, MethodReference>,
    safe_casts: BTreeSet<u32>,
}

impl VerifiedMethod {
    pub fn new() -> Self {
        Self::default()
    }

    /// The receiver type at `dex_pc` is known precisely enough to call
    /// `target` directly.
    pub fn with_devirt_target(mut self, dex_pc: u32, target: MethodReference) -> Self {
        self.devirt_targets.insert(dex_pc, target);
        self
    }

    /// The `check-cast` at `dex_pc` can never fail.
    pub fn with_safe_cast(mut self, dex_pc: u32) -> Self {
        self.safe_casts.insert(dex_pc);
        self
    }

    pub fn devirt_target(&self, dex_pc: u32) -> Option<MethodReference> {
        self.devirt_targets.get(&dex_pc).copied()
    }

    pub fn is_safe_cast(&self, dex_pc: u32) -> bool {
        self.safe_casts.contains(&dex_pc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedMethodResult {
    pub status: VerificationStatus,
    /// Present when the method was accepted.
    pub method: Option<VerifiedMethod>,
    pub message: Option<String>,
}

impl VerifiedMethodResult {
    pub fn verified(method: VerifiedMethod) -> Self {
        Self {
            status: VerificationStatus::Verified,
            method: Some(method),
            message: None,
        }
    }

    pub fn soft_failure(message: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::SoftFailure,
            method: None,
            message: Some(message.into()),
        }
    }

    pub fn hard_failure(message: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::HardFailure,
            method: None,
            message: Some(message.into()),
        }
    }
}

/// One method handed to the verifier.
#[derive(Debug, Clone, Copy)]
pub struct VerificationUnit<'a> {
    pub linker: &'a ClassLinker,
    pub module_id: ModuleId,
    pub module: &'a Module,
    pub class: ClassReference,
    /// `None` when the class failed to link.
    pub linked_class: Option<&'a LinkedClass>,
    pub method: MethodReference,
    pub access_flags: AccessFlags,
    pub code: Option<&'a CodeItem>,
}

pub trait Verifier: Send + Sync + Debug {
    fn verify(&self, unit: &VerificationUnit<'_>) -> VerifiedMethodResult;
}

/// Accepts every method and proves nothing about it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveVerifier;

impl Verifier for PermissiveVerifier {
    fn verify(&self, _unit: &VerificationUnit<'_>) -> VerifiedMethodResult {
        VerifiedMethodResult::verified(VerifiedMethod::new())
    }
}

/// Verifier results of a run.
///
/// Accepted methods keep their [`VerifiedMethod`]; any failure puts the
/// method in the rejected set, which keeps it away from the optimizing
/// backend.
#[derive(Debug, Default)]
pub struct VerificationResults {
    verified: RwLock<BTreeMap<MethodReference, Arc<VerifiedMethod>>>,
    rejected: RwLock<BTreeSet<MethodReference>>,
}

impl VerificationResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, method: MethodReference, result: &VerifiedMethodResult) {
        match (&result.status, &result.method) {
            (VerificationStatus::Verified, Some(verified)) => {
                // A method is verified at most once; keep the first record.
                self.verified
                    .write()
                    .entry(method)
                    .or_insert_with(|| Arc::new(verified.clone()));
            }
            _ => self.add_rejected(method),
        }
    }

    pub fn verified_method(&self, method: MethodReference) -> Option<Arc<VerifiedMethod>> {
        self.verified.read().get(&method).cloned()
    }

    pub fn add_rejected(&self, method: MethodReference) {
        self.rejected.write().insert(method);
    }

    pub fn is_rejected(&self, method: MethodReference) -> bool {
        self.rejected.read().contains(&method)
    }

    /// Static class initializers run once and are never compiled.
    pub fn is_candidate_for_compilation(&self, method: MethodReference, access_flags: AccessFlags) -> bool {
        !access_flags.is_class_initializer() && !self.is_rejected(method)
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(idx: u32) -> MethodReference {
        MethodReference::new(ModuleId(1), idx)
    }

    #[test]
    fn test_failures_are_rejected() {
        let results = VerificationResults::new();
        results.record(method(0), &VerifiedMethodResult::verified(VerifiedMethod::new().with_safe_cast(3)));
        results.record(method(1), &VerifiedMethodResult::soft_failure("unknown type"));
        results.record(method(2), &VerifiedMethodResult::hard_failure("bad register"));

        assert!(results.verified_method(method(0)).unwrap().is_safe_cast(3));
        assert!(results.is_candidate_for_compilation(method(0), AccessFlags::PUBLIC));
        assert!(!results.is_candidate_for_compilation(method(1), AccessFlags::PUBLIC));
        assert!(!results.is_candidate_for_compilation(method(2), AccessFlags::PUBLIC));
        assert_eq!(results.rejected_count(), 2);
    }

    #[test]
    fn test_class_initializer_is_never_a_candidate() {
        let results = VerificationResults::new();
        results.record(method(0), &VerifiedMethodResult::verified(VerifiedMethod::new()));
        let clinit = AccessFlags::STATIC | AccessFlags::CONSTRUCTOR;
        assert!(!results.is_candidate_for_compilation(method(0), clinit));
        assert!(results.is_candidate_for_compilation(method(0), AccessFlags::CONSTRUCTOR));
    }

    #[test]
    fn test_devirt_targets() {
        let target = MethodReference::new(ModuleId(0), 9);
        let verified = VerifiedMethod::new().with_devirt_target(4, target);
        assert_eq!(verified.devirt_target(4), Some(target));
        assert_eq!(verified.devirt_target(5), None);
    }
}
