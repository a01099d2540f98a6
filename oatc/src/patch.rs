//! Deferred relocations.
//!
//! While compiling, the backend often emits a placeholder where the address
//! of another method or of a class object belongs, because that address is
//! only fixed once the image is laid out. Each placeholder is recorded here
//! and applied by the image writer after the run.
//!
//! The ledger is append-only. Records are immutable once created and appear
//! in the order they were appended; the patches of one method are appended
//! together so they stay contiguous.

use crate::compiled::PatchRequest;
use crate::error::{DriverError, DriverResult};
use crate::tables::ArtifactTables;
use oatc_dex::{InvokeType, MethodReference, ModuleId};
use parking_lot::Mutex;

/// The method whose code contains a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchReferrer {
    pub module: ModuleId,
    pub class_def_index: u16,
    pub method_index: u32,
}

impl PatchReferrer {
    pub fn new(module: ModuleId, class_def_index: u16, method_index: u32) -> Self {
        Self {
            module,
            class_def_index,
            method_index,
        }
    }

    pub fn method_reference(&self) -> MethodReference {
        MethodReference::new(self.module, self.method_index)
    }
}

/// A call (or method pointer) site to patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPatch {
    referrer: PatchReferrer,
    referrer_kind: InvokeType,
    target_method: MethodReference,
    target_kind: InvokeType,
    literal_offset: u32,
    pc_relative_offset: Option<i32>,
}

impl CallPatch {
    pub fn referrer(&self) -> PatchReferrer {
        self.referrer
    }

    pub fn referrer_kind(&self) -> InvokeType {
        self.referrer_kind
    }

    /// The called method; may live in another module than the referrer.
    pub fn target_method(&self) -> MethodReference {
        self.target_method
    }

    pub fn target_kind(&self) -> InvokeType {
        self.target_kind
    }

    pub fn literal_offset(&self) -> u32 {
        self.literal_offset
    }

    /// Displacement for PC-relative calls; `None` for absolute ones.
    pub fn pc_relative_offset(&self) -> Option<i32> {
        self.pc_relative_offset
    }

    pub fn is_relative(&self) -> bool {
        self.pc_relative_offset.is_some()
    }
}

/// An embedded class pointer to patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypePatch {
    referrer: PatchReferrer,
    target_type: u32,
    literal_offset: u32,
}

impl TypePatch {
    pub fn referrer(&self) -> PatchReferrer {
        self.referrer
    }

    /// Target type index in the referrer's module.
    pub fn target_type(&self) -> u32 {
        self.target_type
    }

    pub fn literal_offset(&self) -> u32 {
        self.literal_offset
    }
}

/// Any recorded patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchInformation {
    Call(CallPatch),
    Type(TypePatch),
}

impl PatchInformation {
    pub fn referrer(&self) -> PatchReferrer {
        match self {
            PatchInformation::Call(p) => p.referrer,
            PatchInformation::Type(p) => p.referrer,
        }
    }

    pub fn literal_offset(&self) -> u32 {
        match self {
            PatchInformation::Call(p) => p.literal_offset,
            PatchInformation::Type(p) => p.literal_offset,
        }
    }
}

/// Append-only patch lists of a run.
#[derive(Debug, Default)]
pub struct PatchLedger {
    calls: Mutex<Vec<CallPatch>>,
    methods: Mutex<Vec<CallPatch>>,
    types: Mutex<Vec<TypePatch>>,
}

impl PatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call site. `pc_relative_offset` selects the relative form.
    pub fn record_call_patch(
        &self,
        referrer: PatchReferrer,
        referrer_kind: InvokeType,
        target_method: MethodReference,
        target_kind: InvokeType,
        literal_offset: u32,
        pc_relative_offset: Option<i32>,
    ) {
        self.calls.lock().push(CallPatch {
            referrer,
            referrer_kind,
            target_method,
            target_kind,
            literal_offset,
            pc_relative_offset,
        });
    }

    /// Record an embedded method pointer.
    pub fn record_method_patch(
        &self,
        referrer: PatchReferrer,
        referrer_kind: InvokeType,
        target_method: MethodReference,
        target_kind: InvokeType,
        literal_offset: u32,
    ) {
        self.methods.lock().push(CallPatch {
            referrer,
            referrer_kind,
            target_method,
            target_kind,
            literal_offset,
            pc_relative_offset: None,
        });
    }

    /// Record an embedded class pointer.
    pub fn record_type_patch(&self, referrer: PatchReferrer, target_type: u32, literal_offset: u32) {
        self.types.lock().push(TypePatch {
            referrer,
            target_type,
            literal_offset,
        });
    }

    /// Append every patch one method asked for, keeping them contiguous.
    pub fn record_patches(
        &self,
        referrer: PatchReferrer,
        referrer_kind: InvokeType,
        requests: &[PatchRequest],
    ) {
        let mut calls = Vec::new();
        let mut methods = Vec::new();
        let mut types = Vec::new();
        for request in requests {
            match *request {
                PatchRequest::Call {
                    literal_offset,
                    target_method,
                    target_kind,
                } => calls.push(CallPatch {
                    referrer,
                    referrer_kind,
                    target_method,
                    target_kind,
                    literal_offset,
                    pc_relative_offset: None,
                }),
                PatchRequest::RelativeCall {
                    literal_offset,
                    target_method,
                    target_kind,
                    pc_relative_offset,
                } => calls.push(CallPatch {
                    referrer,
                    referrer_kind,
                    target_method,
                    target_kind,
                    literal_offset,
                    pc_relative_offset: Some(pc_relative_offset),
                }),
                PatchRequest::Method {
                    literal_offset,
                    target_method,
                    target_kind,
                } => methods.push(CallPatch {
                    referrer,
                    referrer_kind,
                    target_method,
                    target_kind,
                    literal_offset,
                    pc_relative_offset: None,
                }),
                PatchRequest::Type {
                    literal_offset,
                    target_type,
                } => types.push(TypePatch {
                    referrer,
                    target_type,
                    literal_offset,
                }),
            }
        }
        if !calls.is_empty() {
            self.calls.lock().extend(calls);
        }
        if !methods.is_empty() {
            self.methods.lock().extend(methods);
        }
        if !types.is_empty() {
            self.types.lock().extend(types);
        }
    }

    pub fn list_call_patches(&self) -> Vec<CallPatch> {
        self.calls.lock().clone()
    }

    pub fn list_method_patches(&self) -> Vec<CallPatch> {
        self.methods.lock().clone()
    }

    pub fn list_type_patches(&self) -> Vec<TypePatch> {
        self.types.lock().clone()
    }

    /// Every patch: calls, then method pointers, then types.
    pub fn list_all(&self) -> Vec<PatchInformation> {
        let mut all: Vec<PatchInformation> = self
            .list_call_patches()
            .into_iter()
            .chain(self.list_method_patches())
            .map(PatchInformation::Call)
            .collect();
        all.extend(self.list_type_patches().into_iter().map(PatchInformation::Type));
        all
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len() + self.methods.lock().len() + self.types.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check every literal offset against the code of its referrer.
    pub fn validate_patches(&self, tables: &ArtifactTables) -> DriverResult<()> {
        for patch in self.list_all() {
            let method = patch.referrer().method_reference();
            let compiled = tables
                .get_method(method)
                .ok_or(DriverError::PatchWithoutCode { method })?;
            let code_size = compiled.code_size();
            if patch.literal_offset() as usize >= code_size {
                return Err(DriverError::PatchOutOfBounds {
                    method,
                    literal_offset: patch.literal_offset(),
                    code_size,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiled::{CompiledMethod, CompiledMethodResult};
    use crate::dedupe::DedupeStores;
    use crate::options::InstructionSet;

    fn referrer(method_index: u32) -> PatchReferrer {
        PatchReferrer::new(ModuleId(0), 0, method_index)
    }

    fn target(module: u32, method_index: u32) -> MethodReference {
        MethodReference::new(ModuleId(module), method_index)
    }

    #[test]
    fn test_records_keep_insertion_order() {
        let ledger = PatchLedger::new();
        ledger.record_call_patch(referrer(1), InvokeType::Static, target(0, 5), InvokeType::Static, 4, None);
        ledger.record_call_patch(referrer(2), InvokeType::Direct, target(3, 6), InvokeType::Direct, 8, Some(-12));
        ledger.record_type_patch(referrer(1), 3, 0);

        let calls = ledger.list_call_patches();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].target_method(), target(0, 5));
        assert!(!calls[0].is_relative());
        assert_eq!(calls[1].pc_relative_offset(), Some(-12));
        // Targets keep their own module, not the referrer's.
        assert_eq!(calls[1].target_method(), target(3, 6));
        assert_eq!(ledger.list_type_patches()[0].target_type(), 3);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_record_patches_splits_by_kind() {
        let ledger = PatchLedger::new();
        ledger.record_patches(
            referrer(7),
            InvokeType::Virtual,
            &[
                PatchRequest::Call { literal_offset: 0, target_method: target(0, 1), target_kind: InvokeType::Direct },
                PatchRequest::Type { literal_offset: 4, target_type: 2 },
                PatchRequest::Method { literal_offset: 8, target_method: target(2, 1), target_kind: InvokeType::Direct },
                PatchRequest::RelativeCall {
                    literal_offset: 12,
                    target_method: target(0, 3),
                    target_kind: InvokeType::Static,
                    pc_relative_offset: 16,
                },
            ],
        );
        let calls = ledger.list_call_patches();
        assert_eq!(calls.iter().map(CallPatch::literal_offset).collect::<Vec<_>>(), vec![0, 12]);
        assert!(calls.iter().all(|c| c.referrer_kind() == InvokeType::Virtual));
        assert_eq!(ledger.list_method_patches()[0].target_method(), target(2, 1));
        assert_eq!(ledger.list_type_patches().len(), 1);
        assert_eq!(ledger.list_all().len(), 4);
    }

    #[test]
    fn test_validate_patches() {
        let stores = DedupeStores::new();
        let tables = ArtifactTables::new();
        let result = CompiledMethodResult::new(InstructionSet::Arm64, vec![0; 8]);
        tables
            .put_method(referrer(1).method_reference(), CompiledMethod::intern(&result, &stores))
            .unwrap();

        let ok = PatchLedger::new();
        ok.record_type_patch(referrer(1), 0, 7);
        assert!(ok.validate_patches(&tables).is_ok());

        let out_of_bounds = PatchLedger::new();
        out_of_bounds.record_call_patch(referrer(1), InvokeType::Static, target(0, 0), InvokeType::Static, 8, None);
        assert!(matches!(
            out_of_bounds.validate_patches(&tables),
            Err(DriverError::PatchOutOfBounds { literal_offset: 8, code_size: 8, .. })
        ));

        let orphan = PatchLedger::new();
        orphan.record_type_patch(referrer(2), 0, 0);
        assert!(matches!(
            orphan.validate_patches(&tables),
            Err(DriverError::PatchWithoutCode { .. })
        ));
    }
}
