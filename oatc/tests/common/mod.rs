//! Shared fixtures for driver integration tests
#![allow(dead_code)]

use oatc::{
    BackendError, BackendResult, CompilationUnit, CompileContext, CompiledMethodResult,
    CompilerBackend, CompilerDriver, CompilerOptions, DirectTarget, InstructionSet, PatchRequest,
    TimingLogger, TrampolineKind, VerificationUnit, VerifiedMethod, VerifiedMethodResult, Verifier,
};
use oatc_dex::{
    AccessFlags, ClassReference, Instruction, InvokeType, MethodReference, Module, ModuleBuilder,
    ModuleId,
};
use oatc_runtime::{ClassLinker, ClassPath, ImageSpace, OBJECT_DESCRIPTOR};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const CORE: &str = "core.dex";

pub const CORE_ID: ModuleId = ModuleId(0);

/// First module after the core module.
pub const FIRST: ModuleId = ModuleId(1);

/// A boot module defining `java.lang.Object`.
pub fn core_module() -> Module {
    let mut b = ModuleBuilder::new(CORE);
    b.class(OBJECT_DESCRIPTOR)
        .direct_method(
            "<init>",
            "()V",
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
            Some(vec![Instruction::ReturnVoid]),
        )
        .virtual_method(
            "toString",
            "()Ljava/lang/String;",
            AccessFlags::PUBLIC,
            Some(vec![Instruction::Return { src: 0 }]),
        )
        .virtual_method("hashCode", "()I", AccessFlags::PUBLIC | AccessFlags::NATIVE, None)
        .finish();
    b.build()
}

/// Core module (boot, `ModuleId(0)`) followed by `boot` then `app` modules.
pub fn linker(boot: Vec<Module>, app: Vec<Module>, image: Option<ImageSpace>) -> Arc<ClassLinker> {
    let mut class_path = ClassPath::new();
    class_path.push_boot(core_module());
    for module in boot {
        class_path.push_boot(module);
    }
    for module in app {
        class_path.push_app(module);
    }
    let linker = ClassLinker::new(class_path);
    Arc::new(match image {
        Some(image) => linker.with_image(image),
        None => linker,
    })
}

pub fn app_linker(app: Vec<Module>) -> Arc<ClassLinker> {
    linker(Vec::new(), app, None)
}

pub fn options(threads: usize) -> CompilerOptions {
    CompilerOptions::new()
        .with_threads(threads)
        .with_instruction_set(InstructionSet::Arm64)
}

pub fn driver(linker: Arc<ClassLinker>, options: CompilerOptions) -> CompilerDriver {
    CompilerDriver::builder(options, linker, Box::new(TemplateBackend))
        .verifier(Box::new(ScriptedVerifier::default()))
        .build()
        .unwrap()
}

pub fn driver_with(
    linker: Arc<ClassLinker>,
    options: CompilerOptions,
    verifier: ScriptedVerifier,
) -> CompilerDriver {
    CompilerDriver::builder(options, linker, Box::new(TemplateBackend))
        .verifier(Box::new(verifier))
        .build()
        .unwrap()
}

pub fn timings() -> TimingLogger {
    TimingLogger::new("test")
}

/// Look a method up by class, name and signature.
pub fn method(
    driver: &CompilerDriver,
    module: ModuleId,
    class: &str,
    name: &str,
    signature: &str,
) -> MethodReference {
    let index = driver
        .linker()
        .module(module)
        .unwrap()
        .find_method_index(class, name, signature)
        .unwrap_or_else(|| panic!("no method {class}->{name}{signature}"));
    MethodReference::new(module, index)
}

pub fn class(driver: &CompilerDriver, module: ModuleId, descriptor: &str) -> ClassReference {
    let index = driver
        .linker()
        .module(module)
        .unwrap()
        .find_class_def(descriptor)
        .unwrap_or_else(|| panic!("no class {descriptor}"));
    ClassReference::new(module, index)
}

pub fn type_index(driver: &CompilerDriver, module: ModuleId, descriptor: &str) -> u32 {
    driver
        .linker()
        .module(module)
        .unwrap()
        .find_type_index(descriptor)
        .unwrap_or_else(|| panic!("no type {descriptor}"))
}

pub fn code_of(driver: &CompilerDriver, method: MethodReference) -> Vec<u8> {
    driver
        .tables()
        .get_method(method)
        .unwrap_or_else(|| panic!("{method} was not compiled"))
        .code()
        .as_bytes()
        .to_vec()
}

/// The unit the compile phase builds for `method`.
pub fn unit(driver: &CompilerDriver, method: MethodReference) -> CompilationUnit<'_> {
    let module: &Module = driver.linker().module(method.module).unwrap();
    let (class_def_index, encoded, is_direct) = module.find_encoded_method(method.method_index).unwrap();
    let invoke_type = if !is_direct {
        InvokeType::Virtual
    } else if encoded.access_flags.is_static() {
        InvokeType::Static
    } else {
        InvokeType::Direct
    };
    CompilationUnit {
        module_id: method.module,
        module,
        class_def_index,
        method_index: method.method_index,
        access_flags: encoded.access_flags,
        invoke_type,
        code: encoded.code.as_ref(),
        dex_to_dex_level: driver.dex_to_dex_level(ClassReference::new(method.module, class_def_index)),
        verified_method: driver.verified_method(method),
    }
}

// ============================================================================
// Modules
// ============================================================================

fn constructor_body(object_init: u32) -> Vec<Instruction> {
    vec![
        Instruction::Invoke {
            kind: InvokeType::Direct,
            method_idx: object_init,
            args: vec![0],
        },
        Instruction::ReturnVoid,
    ]
}

/// `LMain;` calling into the final class `LHelper;`, with two identical
/// bodies and a native method.
pub fn app_module() -> Module {
    let mut b = ModuleBuilder::new("app.dex");
    let object_init = b.method_index(OBJECT_DESCRIPTOR, "<init>", "()V");
    let helper_type = b.type_index("LHelper;");
    let helper_init = b.method_index("LHelper;", "<init>", "()V");
    let helper_value = b.method_index("LHelper;", "value", "()I");
    let public_static = AccessFlags::PUBLIC | AccessFlags::STATIC;
    let ctor = AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR;

    b.class("LHelper;")
        .access(AccessFlags::PUBLIC | AccessFlags::FINAL)
        .superclass(OBJECT_DESCRIPTOR)
        .direct_method("<init>", "()V", ctor, Some(constructor_body(object_init)))
        .virtual_method(
            "value",
            "()I",
            AccessFlags::PUBLIC,
            Some(vec![
                Instruction::Const { dest: 0, value: 7 },
                Instruction::Return { src: 0 },
            ]),
        )
        .finish();
    b.class("LMain;")
        .superclass(OBJECT_DESCRIPTOR)
        .direct_method("<init>", "()V", ctor, Some(constructor_body(object_init)))
        .direct_method(
            "run",
            "()I",
            public_static,
            Some(vec![
                Instruction::NewInstance { dest: 0, type_idx: helper_type },
                Instruction::Invoke {
                    kind: InvokeType::Direct,
                    method_idx: helper_init,
                    args: vec![0],
                },
                Instruction::Invoke {
                    kind: InvokeType::Virtual,
                    method_idx: helper_value,
                    args: vec![0],
                },
                Instruction::MoveResult { dest: 1 },
                Instruction::Return { src: 1 },
            ]),
        )
        .direct_method(
            "same1",
            "()V",
            public_static,
            Some(vec![Instruction::Const { dest: 0, value: 1 }, Instruction::ReturnVoid]),
        )
        .direct_method(
            "same2",
            "()V",
            public_static,
            Some(vec![Instruction::Const { dest: 0, value: 1 }, Instruction::ReturnVoid]),
        )
        .direct_method("nativeOp", "()V", public_static | AccessFlags::NATIVE, None)
        .finish();
    b.build()
}

/// `LBase;`/`LImpl;` with an overridden `work`, and `LCaller;` calling it
/// through the base class.
pub fn hierarchy_module() -> Module {
    let mut b = ModuleBuilder::new("hierarchy.dex");
    let object_init = b.method_index(OBJECT_DESCRIPTOR, "<init>", "()V");
    let base_work = b.method_index("LBase;", "work", "()V");
    let ctor = AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR;
    let work = || Some(vec![Instruction::ReturnVoid]);

    b.class("LBase;")
        .superclass(OBJECT_DESCRIPTOR)
        .direct_method("<init>", "()V", ctor, Some(constructor_body(object_init)))
        .virtual_method("work", "()V", AccessFlags::PUBLIC, work())
        .finish();
    b.class("LImpl;")
        .superclass("LBase;")
        .virtual_method("work", "()V", AccessFlags::PUBLIC, work())
        .virtual_method(
            "callSuper",
            "()V",
            AccessFlags::PUBLIC,
            Some(vec![
                Instruction::Invoke {
                    kind: InvokeType::Super,
                    method_idx: base_work,
                    args: vec![0],
                },
                Instruction::ReturnVoid,
            ]),
        )
        .finish();
    b.class("LCaller;")
        .superclass(OBJECT_DESCRIPTOR)
        .direct_method(
            "run",
            "(LBase;)V",
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            Some(vec![
                Instruction::Invoke {
                    kind: InvokeType::Virtual,
                    method_idx: base_work,
                    args: vec![0],
                },
                Instruction::ReturnVoid,
            ]),
        )
        .finish();
    b.build()
}

/// `LPoint;` with final and plain instance fields and statics, and
/// `LUser;` touching them from outside.
pub fn fields_module() -> Module {
    let mut b = ModuleBuilder::new("fields.dex");
    let point_type = b.type_index("LPoint;");
    let x = b.field_index("LPoint;", "x", "I");
    let y = b.field_index("LPoint;", "y", "I");
    let origin = b.field_index("LPoint;", "ORIGIN", "I");
    let limit = b.field_index("LPoint;", "LIMIT", "I");
    let public = AccessFlags::PUBLIC;
    let public_static = AccessFlags::PUBLIC | AccessFlags::STATIC;

    b.class("LPoint;")
        .superclass(OBJECT_DESCRIPTOR)
        .instance_field("x", "I", public | AccessFlags::FINAL)
        .instance_field("y", "I", public)
        .static_field("ORIGIN", "I", public)
        .static_field("LIMIT", "I", public | AccessFlags::FINAL)
        .direct_method(
            "<init>",
            "()V",
            public | AccessFlags::CONSTRUCTOR,
            Some(vec![
                Instruction::Const { dest: 1, value: 3 },
                Instruction::IPut { src: 1, object: 0, field_idx: x },
                Instruction::ReturnVoid,
            ]),
        )
        .direct_method(
            "getOrigin",
            "()I",
            public_static,
            Some(vec![
                Instruction::SGet { dest: 0, field_idx: origin },
                Instruction::Return { src: 0 },
            ]),
        )
        .finish();
    b.class("LUser;")
        .superclass(OBJECT_DESCRIPTOR)
        .direct_method(
            "touch",
            "(LPoint;)V",
            public_static,
            Some(vec![
                Instruction::IGet { dest: 1, object: 0, field_idx: y },
                Instruction::IPut { src: 1, object: 0, field_idx: y },
                Instruction::IPut { src: 1, object: 0, field_idx: x },
                Instruction::SGet { dest: 1, field_idx: origin },
                Instruction::SPut { src: 1, field_idx: limit },
                Instruction::CheckCast { reg: 0, type_idx: point_type },
                Instruction::CheckCast { reg: 1, type_idx: point_type },
                Instruction::ReturnVoid,
            ]),
        )
        .finish();
    b.build()
}

// ============================================================================
// Backend
// ============================================================================

/// Emits one 4-byte word per instruction and asks the driver the questions a
/// real backend would. Methods named `explode` fail.
#[derive(Debug, Default)]
pub struct TemplateBackend;

/// Code produced by [`TemplateBackend::compile_dex_to_dex`].
pub const DEX_TO_DEX_CODE: [u8; 4] = [0xdd; 4];

/// Code produced by [`TemplateBackend::compile_jni`].
pub const JNI_STUB_CODE: [u8; 8] = [0x4a; 8];

fn opcode(insn: &Instruction) -> u8 {
    match insn {
        Instruction::Nop => 0x00,
        Instruction::Const { .. } => 0x01,
        Instruction::Move { .. } => 0x02,
        Instruction::ConstString { .. } => 0x03,
        Instruction::ConstClass { .. } => 0x04,
        Instruction::NewInstance { .. } => 0x05,
        Instruction::CheckCast { .. } => 0x06,
        Instruction::InstanceOf { .. } => 0x07,
        Instruction::IGet { .. } => 0x08,
        Instruction::IPut { .. } => 0x09,
        Instruction::SGet { .. } => 0x0a,
        Instruction::SPut { .. } => 0x0b,
        Instruction::Invoke { .. } => 0x0c,
        Instruction::MoveResult { .. } => 0x0d,
        Instruction::Return { .. } => 0x0e,
        Instruction::ReturnVoid => 0x0f,
        Instruction::Throw { .. } => 0x10,
    }
}

impl CompilerBackend for TemplateBackend {
    fn compile(
        &self,
        unit: &CompilationUnit<'_>,
        cx: &CompileContext<'_>,
    ) -> BackendResult<CompiledMethodResult> {
        if unit.name() == "explode" {
            return Err(BackendError::internal("cannot compile explode"));
        }
        let code = unit
            .code
            .ok_or_else(|| BackendError::unsupported("no code"))?;
        let driver = cx.driver();
        let mut words = bumpalo::collections::Vec::new_in(cx.arena());
        let mut patches = Vec::new();
        let mut mapping = Vec::new();

        for (pc, insn) in code.insns.iter().enumerate() {
            let pc = pc as u32;
            let literal_offset = (words.len() * 4) as u32;
            let mut word = [opcode(insn), 0, 0, 0];
            match *insn {
                Instruction::Invoke { kind, method_idx, .. } => {
                    if let Some(info) =
                        driver.compute_invoke_info(unit, pc, true, true, kind, method_idx)
                    {
                        word[1] = info.invoke_type.index() as u8 + 1;
                        if info.direct_code == DirectTarget::NeedsPatch {
                            patches.push(PatchRequest::Call {
                                literal_offset,
                                target_method: info.target_method,
                                target_kind: info.invoke_type,
                            });
                        }
                        if info.direct_method == DirectTarget::NeedsPatch {
                            patches.push(PatchRequest::Method {
                                literal_offset: literal_offset + 2,
                                target_method: info.target_method,
                                target_kind: info.invoke_type,
                            });
                        }
                    }
                }
                Instruction::ConstClass { type_idx, .. } | Instruction::NewInstance { type_idx, .. } => {
                    if let Some(embedded) = driver.can_embed_type_in_code(unit.module_id, type_idx) {
                        word[1] = 1;
                        if embedded.direct_type_ptr.is_none() {
                            patches.push(PatchRequest::Type {
                                literal_offset,
                                target_type: type_idx,
                            });
                        }
                    }
                }
                Instruction::CheckCast { .. } => {
                    word[1] = driver.is_safe_cast(unit, pc) as u8;
                }
                Instruction::ConstString { string_idx, .. } => {
                    word[1] = driver.can_assume_string_is_present_in_dex_cache(unit.module_id, string_idx) as u8;
                }
                Instruction::IGet { field_idx, .. } | Instruction::IPut { field_idx, .. } => {
                    let is_put = matches!(insn, Instruction::IPut { .. });
                    if let Some(info) = driver.compute_instance_field_info(unit, field_idx, is_put) {
                        word[1] = info.offset as u8;
                    }
                }
                Instruction::SGet { field_idx, .. } | Instruction::SPut { field_idx, .. } => {
                    let is_put = matches!(insn, Instruction::SPut { .. });
                    if let Some(info) = driver.compute_static_field_info(unit, field_idx, is_put) {
                        word[1] = info.offset as u8;
                    }
                }
                _ => {}
            }
            mapping.push(pc as u8);
            words.push(word);
        }

        let mut result = CompiledMethodResult::new(
            cx.instruction_set(),
            words.iter().flatten().copied().collect(),
        );
        result.frame_size_in_bytes = 16 * (u32::from(code.registers_size) + 1);
        result.mapping_table = mapping;
        result.patches = patches;
        Ok(result)
    }

    fn compile_jni(
        &self,
        _unit: &CompilationUnit<'_>,
        cx: &CompileContext<'_>,
    ) -> BackendResult<Option<CompiledMethodResult>> {
        Ok(Some(CompiledMethodResult::new(cx.instruction_set(), JNI_STUB_CODE.to_vec())))
    }

    fn compile_dex_to_dex(
        &self,
        _unit: &CompilationUnit<'_>,
        cx: &CompileContext<'_>,
    ) -> BackendResult<Option<CompiledMethodResult>> {
        Ok(Some(CompiledMethodResult::new(cx.instruction_set(), DEX_TO_DEX_CODE.to_vec())))
    }

    fn create_trampoline(
        &self,
        kind: TrampolineKind,
        instruction_set: InstructionSet,
    ) -> BackendResult<Vec<u8>> {
        match kind {
            TrampolineKind::ImtConflict => Err(BackendError::unsupported("imt conflict")),
            _ => Ok(vec![kind as u8; instruction_set.code_alignment()]),
        }
    }
}

// ============================================================================
// Verifier
// ============================================================================

/// Verifies by method name: `soft*` soft-fails, `hard*` hard-fails, the rest
/// verifies with whatever facts were registered for the name.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    facts: BTreeMap<String, VerifiedMethod>,
}

impl ScriptedVerifier {
    pub fn with_facts(mut self, method_name: &str, facts: VerifiedMethod) -> Self {
        self.facts.insert(method_name.to_string(), facts);
        self
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, unit: &VerificationUnit<'_>) -> VerifiedMethodResult {
        let name = unit
            .module
            .method_id(unit.method.method_index)
            .map(|id| id.name.as_str())
            .unwrap_or_default();
        if name.starts_with("soft") {
            VerifiedMethodResult::soft_failure("unresolved type")
        } else if name.starts_with("hard") {
            VerifiedMethodResult::hard_failure("register type mismatch")
        } else {
            VerifiedMethodResult::verified(self.facts.get(name).cloned().unwrap_or_default())
        }
    }
}
