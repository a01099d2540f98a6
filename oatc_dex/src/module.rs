//! The bytecode container.
//!
//! A [`Module`] is an archive of classes together with the constant pools
//! their code refers to: type descriptors, strings, field ids and method ids.
//! All cross references are indices into those pools, exactly as the on-disk
//! format stores them, so identities such as [`crate::MethodReference`] stay
//! meaningful without any linked runtime state.

use crate::access::AccessFlags;
use crate::error::{ModuleError, ModuleResult};
use crate::instruction::{CodeItem, CodeReference, Instruction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Name of the static class initializer.
pub const CLASS_INITIALIZER_NAME: &str = "<clinit>";

/// Name of instance constructors.
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// A field id: declaring type, field type and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId {
    pub class_idx: u32,
    pub type_idx: u32,
    pub name: String,
}

/// A method id: declaring type, name and signature (e.g. `(IJ)V`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId {
    pub class_idx: u32,
    pub name: String,
    pub signature: String,
}

/// A field declared by a class definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedField {
    pub field_idx: u32,
    pub access_flags: AccessFlags,
}

/// A method declared by a class definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedMethod {
    pub method_idx: u32,
    pub access_flags: AccessFlags,
    #[serde(default)]
    pub code: Option<CodeItem>,
}

/// A class definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    pub class_idx: u32,
    pub access_flags: AccessFlags,
    #[serde(default)]
    pub superclass_idx: Option<u32>,
    #[serde(default)]
    pub interfaces: Vec<u32>,
    #[serde(default)]
    pub static_fields: Vec<EncodedField>,
    #[serde(default)]
    pub instance_fields: Vec<EncodedField>,
    #[serde(default)]
    pub direct_methods: Vec<EncodedMethod>,
    #[serde(default)]
    pub virtual_methods: Vec<EncodedMethod>,
}

impl ClassDef {
    pub fn is_interface(&self) -> bool {
        self.access_flags.is_interface()
    }

    /// Direct methods followed by virtual methods, tagged with directness.
    pub fn methods(&self) -> impl Iterator<Item = (&EncodedMethod, bool)> + '_ {
        self.direct_methods
            .iter()
            .map(|m| (m, true))
            .chain(self.virtual_methods.iter().map(|m| (m, false)))
    }

    pub fn has_methods(&self) -> bool {
        !self.direct_methods.is_empty() || !self.virtual_methods.is_empty()
    }

    /// The static class initializer, if the class declares one.
    pub fn class_initializer<'a>(&'a self, module: &Module) -> Option<&'a EncodedMethod> {
        self.direct_methods.iter().find(|m| {
            module
                .method_id(m.method_idx)
                .is_some_and(|id| id.name == CLASS_INITIALIZER_NAME)
        })
    }
}

/// A bytecode container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Module {
    /// Where the module was loaded from; used in diagnostics only.
    pub location: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub strings: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldId>,
    #[serde(default)]
    pub methods: Vec<MethodId>,
    #[serde(default)]
    pub class_defs: Vec<ClassDef>,
}

impl Module {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }

    /// Parse a module from its JSON description and validate it.
    pub fn from_json(json: &str) -> ModuleResult<Self> {
        let module: Module = serde_json::from_str(json)?;
        module.validate()?;
        Ok(module)
    }

    pub fn to_json(&self) -> ModuleResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// SHA-256 over the canonical JSON encoding, as lowercase hex.
    ///
    /// Identifies the module's content in diagnostics and lets hosts detect
    /// a stale module set between runs.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        // Serializing plain data structures into a Vec cannot fail.
        if let Ok(bytes) = serde_json::to_vec(self) {
            hasher.update(&bytes);
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    // ---- constant pools -------------------------------------------------

    pub fn type_descriptor(&self, type_idx: u32) -> Option<&str> {
        self.types.get(type_idx as usize).map(String::as_str)
    }

    pub fn string(&self, string_idx: u32) -> Option<&str> {
        self.strings.get(string_idx as usize).map(String::as_str)
    }

    pub fn field_id(&self, field_idx: u32) -> Option<&FieldId> {
        self.fields.get(field_idx as usize)
    }

    pub fn method_id(&self, method_idx: u32) -> Option<&MethodId> {
        self.methods.get(method_idx as usize)
    }

    pub fn class_def(&self, class_def_index: u16) -> Option<&ClassDef> {
        self.class_defs.get(class_def_index as usize)
    }

    pub fn num_class_defs(&self) -> usize {
        self.class_defs.len()
    }

    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    /// Descriptor of the class a class def defines.
    pub fn class_descriptor(&self, class_def_index: u16) -> Option<&str> {
        self.class_def(class_def_index)
            .and_then(|def| self.type_descriptor(def.class_idx))
    }

    /// Descriptor of the class declaring a method id.
    pub fn method_class_descriptor(&self, method_idx: u32) -> Option<&str> {
        self.method_id(method_idx)
            .and_then(|id| self.type_descriptor(id.class_idx))
    }

    // ---- lookups ----------------------------------------------------------

    pub fn find_type_index(&self, descriptor: &str) -> Option<u32> {
        self.types
            .iter()
            .position(|t| t == descriptor)
            .map(|i| i as u32)
    }

    pub fn find_string_index(&self, value: &str) -> Option<u32> {
        self.strings
            .iter()
            .position(|s| s == value)
            .map(|i| i as u32)
    }

    /// Find the method id for `class.name signature` in this module.
    pub fn find_method_index(&self, class_descriptor: &str, name: &str, signature: &str) -> Option<u32> {
        let class_idx = self.find_type_index(class_descriptor)?;
        self.methods
            .iter()
            .position(|m| m.class_idx == class_idx && m.name == name && m.signature == signature)
            .map(|i| i as u32)
    }

    pub fn find_field_index(&self, class_descriptor: &str, name: &str) -> Option<u32> {
        let class_idx = self.find_type_index(class_descriptor)?;
        self.fields
            .iter()
            .position(|f| f.class_idx == class_idx && f.name == name)
            .map(|i| i as u32)
    }

    pub fn find_class_def(&self, descriptor: &str) -> Option<u16> {
        let type_idx = self.find_type_index(descriptor)?;
        self.class_defs
            .iter()
            .position(|def| def.class_idx == type_idx)
            .map(|i| i as u16)
    }

    /// Locate the class def and encoded method declaring `method_idx`.
    pub fn find_encoded_method(&self, method_idx: u32) -> Option<(u16, &EncodedMethod, bool)> {
        self.class_defs
            .iter()
            .enumerate()
            .find_map(|(def_idx, def)| {
                def.methods()
                    .find(|(m, _)| m.method_idx == method_idx)
                    .map(|(m, direct)| (def_idx as u16, m, direct))
            })
    }

    // ---- validation -------------------------------------------------------

    /// Check every cross reference and descriptor.
    pub fn validate(&self) -> ModuleResult<()> {
        if self.class_defs.len() > u16::MAX as usize {
            return Err(ModuleError::TooManyClassDefs {
                location: self.location.clone(),
                count: self.class_defs.len(),
            });
        }
        for descriptor in &self.types {
            if !is_valid_descriptor(descriptor) {
                return Err(ModuleError::MalformedDescriptor {
                    location: self.location.clone(),
                    descriptor: descriptor.clone(),
                });
            }
        }
        for field in &self.fields {
            self.check_index("type", field.class_idx, self.types.len())?;
            self.check_index("type", field.type_idx, self.types.len())?;
        }
        for method in &self.methods {
            self.check_index("type", method.class_idx, self.types.len())?;
        }

        let mut defined = HashSet::new();
        for def in &self.class_defs {
            self.check_index("type", def.class_idx, self.types.len())?;
            if !defined.insert(def.class_idx) {
                return Err(ModuleError::DuplicateClassDef {
                    location: self.location.clone(),
                    descriptor: self.types[def.class_idx as usize].clone(),
                });
            }
            if let Some(super_idx) = def.superclass_idx {
                self.check_index("type", super_idx, self.types.len())?;
            }
            for &iface in &def.interfaces {
                self.check_index("type", iface, self.types.len())?;
            }
            for field in def.static_fields.iter().chain(&def.instance_fields) {
                self.check_index("field", field.field_idx, self.fields.len())?;
            }
            for (method, _) in def.methods() {
                self.check_index("method", method.method_idx, self.methods.len())?;
                if let Some(code) = &method.code {
                    self.validate_code(code)?;
                }
            }
        }
        Ok(())
    }

    fn validate_code(&self, code: &CodeItem) -> ModuleResult<()> {
        for (_, reference) in code.references() {
            match reference {
                CodeReference::Type(idx) => self.check_index("type", idx, self.types.len())?,
                CodeReference::String(idx) => self.check_index("string", idx, self.strings.len())?,
                CodeReference::Field { field_idx, .. } => {
                    self.check_index("field", field_idx, self.fields.len())?
                }
                CodeReference::Method { method_idx, .. } => {
                    self.check_index("method", method_idx, self.methods.len())?
                }
            }
        }
        Ok(())
    }

    fn check_index(&self, table: &'static str, index: u32, len: usize) -> ModuleResult<()> {
        if (index as usize) < len {
            Ok(())
        } else {
            Err(ModuleError::IndexOutOfRange {
                location: self.location.clone(),
                table,
                index,
                len,
            })
        }
    }

    /// Every instruction of every method, with its declaring method index.
    pub fn instructions(&self) -> impl Iterator<Item = (u32, &Instruction)> + '_ {
        self.class_defs
            .iter()
            .flat_map(|def| def.methods())
            .filter_map(|(m, _)| m.code.as_ref().map(|c| (m.method_idx, c)))
            .flat_map(|(idx, code)| code.insns.iter().map(move |insn| (idx, insn)))
    }
}

/// Package part of a class descriptor: `Ljava/lang/Object;` -> `Ljava/lang`.
pub fn descriptor_package(descriptor: &str) -> &str {
    match descriptor.rfind('/') {
        Some(pos) => &descriptor[..pos],
        None => "",
    }
}

fn is_valid_descriptor(descriptor: &str) -> bool {
    let element = descriptor.trim_start_matches('[');
    match element.as_bytes() {
        [b'V'] => descriptor.len() == 1,
        [b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D'] => true,
        [b'L', .., b';'] => element.len() > 2,
        _ => false,
    }
}

/// Size in bytes of a field of the given type in an object layout.
pub fn field_size(type_descriptor: &str) -> u32 {
    match type_descriptor.as_bytes().first() {
        Some(b'J' | b'D') => 8,
        Some(b'Z' | b'B') => 1,
        Some(b'S' | b'C') => 2,
        // ints, floats and compressed references
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_validation() {
        assert!(is_valid_descriptor("Ljava/lang/Object;"));
        assert!(is_valid_descriptor("[[I"));
        assert!(is_valid_descriptor("V"));
        assert!(!is_valid_descriptor("[V"));
        assert!(!is_valid_descriptor("L;"));
        assert!(!is_valid_descriptor("Lfoo"));
        assert!(!is_valid_descriptor(""));
    }

    #[test]
    fn test_descriptor_package() {
        assert_eq!(descriptor_package("Ljava/lang/Object;"), "Ljava/lang");
        assert_eq!(descriptor_package("LMain;"), "");
    }

    #[test]
    fn test_validate_rejects_bad_index() {
        let mut module = Module::new("bad.dex");
        module.types.push("LA;".to_string());
        module.class_defs.push(ClassDef {
            class_idx: 0,
            access_flags: AccessFlags::PUBLIC,
            superclass_idx: Some(4),
            interfaces: vec![],
            static_fields: vec![],
            instance_fields: vec![],
            direct_methods: vec![],
            virtual_methods: vec![],
        });
        let err = module.validate().unwrap_err();
        assert!(matches!(
            err,
            ModuleError::IndexOutOfRange {
                table: "type",
                index: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_field_sizes() {
        assert_eq!(field_size("J"), 8);
        assert_eq!(field_size("Z"), 1);
        assert_eq!(field_size("C"), 2);
        assert_eq!(field_size("Ljava/lang/String;"), 4);
    }
}
