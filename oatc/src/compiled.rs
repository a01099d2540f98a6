//! Compiled artifacts.

use crate::dedupe::{Blob, DedupeStores};
use crate::options::InstructionSet;
use oatc_dex::{InvokeType, MethodReference};
use oatc_runtime::ClassStatus;

/// Per-class outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledClass {
    status: ClassStatus,
}

impl CompiledClass {
    pub fn new(status: ClassStatus) -> Self {
        Self { status }
    }

    pub fn status(&self) -> ClassStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: ClassStatus) {
        self.status = status;
    }
}

/// Per-method outcome of a run. Buffers are shared with every other method
/// that produced identical bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMethod {
    instruction_set: InstructionSet,
    frame_size_in_bytes: u32,
    core_spill_mask: u32,
    fp_spill_mask: u32,
    code: Blob,
    mapping_table: Blob,
    vmap_table: Blob,
    gc_map: Blob,
}

impl CompiledMethod {
    /// Intern a backend result into the run's stores.
    pub fn intern(result: &CompiledMethodResult, stores: &DedupeStores) -> Self {
        Self {
            instruction_set: result.instruction_set,
            frame_size_in_bytes: result.frame_size_in_bytes,
            core_spill_mask: result.core_spill_mask,
            fp_spill_mask: result.fp_spill_mask,
            code: stores.code.intern(&result.code),
            mapping_table: stores.mapping_table.intern(&result.mapping_table),
            vmap_table: stores.vmap_table.intern(&result.vmap_table),
            gc_map: stores.gc_map.intern(&result.gc_map),
        }
    }

    pub fn instruction_set(&self) -> InstructionSet {
        self.instruction_set
    }

    pub fn frame_size_in_bytes(&self) -> u32 {
        self.frame_size_in_bytes
    }

    pub fn core_spill_mask(&self) -> u32 {
        self.core_spill_mask
    }

    pub fn fp_spill_mask(&self) -> u32 {
        self.fp_spill_mask
    }

    pub fn code(&self) -> &Blob {
        &self.code
    }

    pub fn mapping_table(&self) -> &Blob {
        &self.mapping_table
    }

    pub fn vmap_table(&self) -> &Blob {
        &self.vmap_table
    }

    pub fn gc_map(&self) -> &Blob {
        &self.gc_map
    }

    pub fn code_size(&self) -> usize {
        self.code.len()
    }
}

/// A relocation the backend asks for, relative to the method being compiled.
///
/// Method targets carry their module, since a sharpened call can land in
/// another module. Type targets are type indices of the referrer's module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchRequest {
    /// Absolute address of the target's code.
    Call {
        literal_offset: u32,
        target_method: MethodReference,
        target_kind: InvokeType,
    },
    /// PC-relative branch to the target's code.
    RelativeCall {
        literal_offset: u32,
        target_method: MethodReference,
        target_kind: InvokeType,
        pc_relative_offset: i32,
    },
    /// Address of the target's method object.
    Method {
        literal_offset: u32,
        target_method: MethodReference,
        target_kind: InvokeType,
    },
    /// Address of a class object.
    Type { literal_offset: u32, target_type: u32 },
}

impl PatchRequest {
    pub fn literal_offset(&self) -> u32 {
        match *self {
            PatchRequest::Call { literal_offset, .. }
            | PatchRequest::RelativeCall { literal_offset, .. }
            | PatchRequest::Method { literal_offset, .. }
            | PatchRequest::Type { literal_offset, .. } => literal_offset,
        }
    }
}

/// What a backend produces for one method, before interning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledMethodResult {
    pub instruction_set: InstructionSet,
    pub code: Vec<u8>,
    pub frame_size_in_bytes: u32,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
    /// Native pc to dex pc.
    pub mapping_table: Vec<u8>,
    /// Register and stack slot map.
    pub vmap_table: Vec<u8>,
    /// GC root map.
    pub gc_map: Vec<u8>,
    pub patches: Vec<PatchRequest>,
}

impl CompiledMethodResult {
    pub fn new(instruction_set: InstructionSet, code: Vec<u8>) -> Self {
        Self {
            instruction_set,
            code,
            ..Self::default()
        }
    }
}
