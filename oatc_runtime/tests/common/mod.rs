//! Shared helpers for linker integration tests
#![allow(dead_code)]

use oatc_dex::{AccessFlags, Instruction, Module, ModuleBuilder};
use oatc_runtime::{ClassLinker, ClassPath, OBJECT_DESCRIPTOR};

/// A boot module defining `java.lang.Object` with `toString` and `hashCode`.
pub fn core_module() -> Module {
    let mut b = ModuleBuilder::new("core.dex");
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
        .virtual_method(
            "hashCode",
            "()I",
            AccessFlags::PUBLIC | AccessFlags::NATIVE,
            None,
        )
        .finish();
    b.build()
}

/// Linker over the core module followed by `app` modules.
pub fn linker_with(app: Vec<Module>) -> ClassLinker {
    let mut class_path = ClassPath::new();
    class_path.push_boot(core_module());
    for module in app {
        class_path.push_app(module);
    }
    ClassLinker::new(class_path)
}
