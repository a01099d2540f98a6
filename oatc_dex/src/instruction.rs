//! Register-based bytecode instructions.
//!
//! Only the shape that matters to the driver is modelled: which constant-pool
//! entries (types, strings, fields, methods) an instruction refers to. The
//! position of an instruction in its code item is its dex pc.

use crate::invoke::InvokeType;
use serde::{Deserialize, Serialize};

/// One bytecode instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Instruction {
    Nop,
    Const { dest: u16, value: i64 },
    Move { dest: u16, src: u16 },
    ConstString { dest: u16, string_idx: u32 },
    ConstClass { dest: u16, type_idx: u32 },
    NewInstance { dest: u16, type_idx: u32 },
    CheckCast { reg: u16, type_idx: u32 },
    InstanceOf { dest: u16, src: u16, type_idx: u32 },
    IGet { dest: u16, object: u16, field_idx: u32 },
    IPut { src: u16, object: u16, field_idx: u32 },
    SGet { dest: u16, field_idx: u32 },
    SPut { src: u16, field_idx: u32 },
    Invoke {
        kind: InvokeType,
        method_idx: u32,
        #[serde(default)]
        args: Vec<u16>,
    },
    MoveResult { dest: u16 },
    Return { src: u16 },
    ReturnVoid,
    Throw { src: u16 },
}

/// A constant-pool reference made by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeReference {
    Type(u32),
    String(u32),
    Field { field_idx: u32, is_static: bool },
    Method { method_idx: u32, kind: InvokeType },
}

impl Instruction {
    /// The constant-pool entry this instruction refers to, if any.
    pub fn reference(&self) -> Option<CodeReference> {
        match *self {
            Instruction::ConstString { string_idx, .. } => Some(CodeReference::String(string_idx)),
            Instruction::ConstClass { type_idx, .. }
            | Instruction::NewInstance { type_idx, .. }
            | Instruction::CheckCast { type_idx, .. }
            | Instruction::InstanceOf { type_idx, .. } => Some(CodeReference::Type(type_idx)),
            Instruction::IGet { field_idx, .. } | Instruction::IPut { field_idx, .. } => {
                Some(CodeReference::Field {
                    field_idx,
                    is_static: false,
                })
            }
            Instruction::SGet { field_idx, .. } | Instruction::SPut { field_idx, .. } => {
                Some(CodeReference::Field {
                    field_idx,
                    is_static: true,
                })
            }
            Instruction::Invoke {
                kind, method_idx, ..
            } => Some(CodeReference::Method { method_idx, kind }),
            _ => None,
        }
    }

    /// Highest register number this instruction touches.
    pub fn max_register(&self) -> Option<u16> {
        match self {
            Instruction::Nop | Instruction::ReturnVoid => None,
            Instruction::Const { dest, .. }
            | Instruction::ConstString { dest, .. }
            | Instruction::ConstClass { dest, .. }
            | Instruction::NewInstance { dest, .. }
            | Instruction::SGet { dest, .. }
            | Instruction::MoveResult { dest } => Some(*dest),
            Instruction::Move { dest, src } | Instruction::InstanceOf { dest, src, .. } => {
                Some(*dest.max(src))
            }
            Instruction::CheckCast { reg, .. } => Some(*reg),
            Instruction::IGet { dest, object, .. } => Some(*dest.max(object)),
            Instruction::IPut { src, object, .. } => Some(*src.max(object)),
            Instruction::SPut { src, .. } | Instruction::Return { src } | Instruction::Throw { src } => {
                Some(*src)
            }
            Instruction::Invoke { args, .. } => args.iter().copied().max(),
        }
    }

    pub fn is_invoke(&self) -> bool {
        matches!(self, Instruction::Invoke { .. })
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Instruction::Return { .. } | Instruction::ReturnVoid)
    }
}

/// The body of a method.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeItem {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub insns: Vec<Instruction>,
}

impl CodeItem {
    /// Build a code item, sizing the register file from the instructions.
    pub fn new(insns: Vec<Instruction>) -> Self {
        let registers_size = insns
            .iter()
            .filter_map(Instruction::max_register)
            .max()
            .map_or(0, |r| r + 1);
        let outs_size = insns
            .iter()
            .map(|insn| match insn {
                Instruction::Invoke { args, .. } => args.len() as u16,
                _ => 0,
            })
            .max()
            .unwrap_or(0);
        Self {
            registers_size,
            ins_size: 0,
            outs_size,
            insns,
        }
    }

    pub fn with_ins(mut self, ins_size: u16) -> Self {
        self.ins_size = ins_size;
        self.registers_size = self.registers_size.max(ins_size);
        self
    }

    /// Iterate `(dex_pc, reference)` pairs.
    pub fn references(&self) -> impl Iterator<Item = (u32, CodeReference)> + '_ {
        self.insns
            .iter()
            .enumerate()
            .filter_map(|(pc, insn)| insn.reference().map(|r| (pc as u32, r)))
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }
}
