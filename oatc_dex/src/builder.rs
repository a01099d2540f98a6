//! Programmatic module construction.
//!
//! Hosts that synthesize modules (and most tests) use [`ModuleBuilder`]
//! instead of writing constant pools by hand. Pool entries are interned, so
//! asking twice for the same descriptor, string, field or method returns the
//! same index.
//!
//! ```
//! use oatc_dex::{AccessFlags, Instruction, ModuleBuilder};
//!
//! let mut builder = ModuleBuilder::new("app.dex");
//! builder
//!     .class("LMain;")
//!     .superclass("Ljava/lang/Object;")
//!     .direct_method(
//!         "main",
//!         "()V",
//!         AccessFlags::PUBLIC | AccessFlags::STATIC,
//!         Some(vec![Instruction::ReturnVoid]),
//!     )
//!     .finish();
//! let module = builder.build();
//! assert_eq!(module.num_class_defs(), 1);
//! ```

use crate::access::AccessFlags;
use crate::instruction::{CodeItem, Instruction};
use crate::module::{ClassDef, EncodedField, EncodedMethod, FieldId, MethodId, Module};
use std::collections::HashMap;

/// Incrementally builds a [`Module`].
#[derive(Debug)]
pub struct ModuleBuilder {
    module: Module,
    type_index: HashMap<String, u32>,
    string_index: HashMap<String, u32>,
    field_index: HashMap<FieldId, u32>,
    method_index: HashMap<MethodId, u32>,
}

impl ModuleBuilder {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            module: Module::new(location),
            type_index: HashMap::new(),
            string_index: HashMap::new(),
            field_index: HashMap::new(),
            method_index: HashMap::new(),
        }
    }

    /// Intern a type descriptor.
    pub fn type_index(&mut self, descriptor: &str) -> u32 {
        if let Some(&idx) = self.type_index.get(descriptor) {
            return idx;
        }
        let idx = self.module.types.len() as u32;
        self.module.types.push(descriptor.to_string());
        self.type_index.insert(descriptor.to_string(), idx);
        idx
    }

    /// Intern a string constant.
    pub fn string_index(&mut self, value: &str) -> u32 {
        if let Some(&idx) = self.string_index.get(value) {
            return idx;
        }
        let idx = self.module.strings.len() as u32;
        self.module.strings.push(value.to_string());
        self.string_index.insert(value.to_string(), idx);
        idx
    }

    /// Intern a field id `class.name:type`.
    pub fn field_index(&mut self, class: &str, name: &str, type_descriptor: &str) -> u32 {
        let id = FieldId {
            class_idx: self.type_index(class),
            type_idx: self.type_index(type_descriptor),
            name: name.to_string(),
        };
        if let Some(&idx) = self.field_index.get(&id) {
            return idx;
        }
        let idx = self.module.fields.len() as u32;
        self.module.fields.push(id.clone());
        self.field_index.insert(id, idx);
        idx
    }

    /// Intern a method id `class.name signature`.
    pub fn method_index(&mut self, class: &str, name: &str, signature: &str) -> u32 {
        let id = MethodId {
            class_idx: self.type_index(class),
            name: name.to_string(),
            signature: signature.to_string(),
        };
        if let Some(&idx) = self.method_index.get(&id) {
            return idx;
        }
        let idx = self.module.methods.len() as u32;
        self.module.methods.push(id.clone());
        self.method_index.insert(id, idx);
        idx
    }

    /// Start a class definition. Call [`ClassDefBuilder::finish`] to add it.
    pub fn class(&mut self, descriptor: &str) -> ClassDefBuilder<'_> {
        let class_idx = self.type_index(descriptor);
        ClassDefBuilder {
            descriptor: descriptor.to_string(),
            def: ClassDef {
                class_idx,
                access_flags: AccessFlags::PUBLIC,
                superclass_idx: None,
                interfaces: Vec::new(),
                static_fields: Vec::new(),
                instance_fields: Vec::new(),
                direct_methods: Vec::new(),
                virtual_methods: Vec::new(),
            },
            builder: self,
        }
    }

    pub fn build(self) -> Module {
        self.module
    }
}

/// Builds one [`ClassDef`] inside a [`ModuleBuilder`].
#[derive(Debug)]
pub struct ClassDefBuilder<'a> {
    builder: &'a mut ModuleBuilder,
    descriptor: String,
    def: ClassDef,
}

impl ClassDefBuilder<'_> {
    /// Replace the class access flags (default `PUBLIC`).
    pub fn access(mut self, flags: AccessFlags) -> Self {
        self.def.access_flags = flags;
        self
    }

    pub fn superclass(mut self, descriptor: &str) -> Self {
        self.def.superclass_idx = Some(self.builder.type_index(descriptor));
        self
    }

    pub fn interface(mut self, descriptor: &str) -> Self {
        let idx = self.builder.type_index(descriptor);
        self.def.interfaces.push(idx);
        self
    }

    pub fn static_field(mut self, name: &str, type_descriptor: &str, flags: AccessFlags) -> Self {
        let field_idx = self
            .builder
            .field_index(&self.descriptor, name, type_descriptor);
        self.def.static_fields.push(EncodedField {
            field_idx,
            access_flags: flags | AccessFlags::STATIC,
        });
        self
    }

    pub fn instance_field(mut self, name: &str, type_descriptor: &str, flags: AccessFlags) -> Self {
        let field_idx = self
            .builder
            .field_index(&self.descriptor, name, type_descriptor);
        self.def.instance_fields.push(EncodedField {
            field_idx,
            access_flags: flags,
        });
        self
    }

    /// Add a direct (static, private or constructor) method.
    pub fn direct_method(
        mut self,
        name: &str,
        signature: &str,
        flags: AccessFlags,
        code: Option<Vec<Instruction>>,
    ) -> Self {
        let method = self.encode_method(name, signature, flags, code);
        self.def.direct_methods.push(method);
        self
    }

    /// Add a virtual method.
    pub fn virtual_method(
        mut self,
        name: &str,
        signature: &str,
        flags: AccessFlags,
        code: Option<Vec<Instruction>>,
    ) -> Self {
        let method = self.encode_method(name, signature, flags, code);
        self.def.virtual_methods.push(method);
        self
    }

    fn encode_method(
        &mut self,
        name: &str,
        signature: &str,
        flags: AccessFlags,
        code: Option<Vec<Instruction>>,
    ) -> EncodedMethod {
        let method_idx = self.builder.method_index(&self.descriptor, name, signature);
        EncodedMethod {
            method_idx,
            access_flags: flags,
            code: code.map(CodeItem::new),
        }
    }

    /// Add the class def to the module and return its class-def index.
    pub fn finish(self) -> u16 {
        let index = self.builder.module.class_defs.len() as u16;
        self.builder.module.class_defs.push(self.def);
        index
    }
}
