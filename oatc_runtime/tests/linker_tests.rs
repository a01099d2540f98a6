//! Class lookup, linking and resolution.

mod common;

use common::linker_with;
use oatc_dex::{AccessFlags, ClassReference, Instruction, InvokeType, ModuleBuilder, ModuleId};
use oatc_runtime::{ClassStatus, LinkError, OBJECT_HEADER_SIZE};
use pretty_assertions::assert_eq;
use std::sync::Arc;

// ============================================================================
// Lookup and precedence
// ============================================================================

#[test]
fn test_first_module_wins() {
    let mut a = ModuleBuilder::new("a.dex");
    a.class("LL;").superclass("Ljava/lang/Object;").instance_field("a", "I", AccessFlags::empty()).finish();
    let mut b = ModuleBuilder::new("b.dex");
    b.class("LL;").superclass("Ljava/lang/Object;").finish();
    let linker = linker_with(vec![a.build(), b.build()]);

    let expected = ClassReference::new(ModuleId(1), 0);
    assert_eq!(linker.lookup_definition("LL;"), Some(expected));
    assert!(linker.is_shadowed(ClassReference::new(ModuleId(2), 0)));
    assert!(!linker.is_shadowed(expected));

    let class = linker.find_class("LL;").unwrap();
    assert_eq!(class.reference(), expected);
    assert!(class.find_instance_field("a").is_some());
}

#[test]
fn test_resolution_from_third_module_uses_first_definition() {
    let mut a = ModuleBuilder::new("a.dex");
    a.class("LL;").superclass("Ljava/lang/Object;").finish();
    let mut b = ModuleBuilder::new("b.dex");
    b.class("LL;").superclass("Ljava/lang/Object;").finish();
    let mut c = ModuleBuilder::new("c.dex");
    let type_idx = c.type_index("LL;");
    let linker = linker_with(vec![a.build(), b.build(), c.build()]);

    let resolved = linker.resolve_type(ModuleId(3), type_idx).unwrap();
    assert_eq!(resolved.reference(), ClassReference::new(ModuleId(1), 0));
    // cached
    assert!(Arc::ptr_eq(
        &resolved,
        &linker.resolved_type(ModuleId(3), type_idx).unwrap()
    ));
}

#[test]
fn test_concurrent_resolution_converges() {
    let mut a = ModuleBuilder::new("a.dex");
    let type_idx = a.type_index("LShared;");
    a.class("LShared;").superclass("Ljava/lang/Object;").finish();
    let linker = linker_with(vec![a.build()]);

    let classes: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| linker.resolve_type(ModuleId(1), type_idx).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for class in &classes[1..] {
        assert!(Arc::ptr_eq(&classes[0], class));
    }
}

#[test]
fn test_missing_and_unsupported_classes() {
    let linker = linker_with(vec![]);
    assert_eq!(
        linker.find_class("LMissing;").unwrap_err(),
        LinkError::ClassNotFound("LMissing;".to_string())
    );
    assert!(matches!(
        linker.find_class("[I"),
        Err(LinkError::UnsupportedClass(_))
    ));
    assert!(matches!(linker.find_class("I"), Err(LinkError::UnsupportedClass(_))));
}

// ============================================================================
// Linking
// ============================================================================

#[test]
fn test_field_layout() {
    let mut a = ModuleBuilder::new("a.dex");
    a.class("LBase;")
        .superclass("Ljava/lang/Object;")
        .instance_field("flag", "Z", AccessFlags::empty())
        .finish();
    a.class("LPoint;")
        .superclass("LBase;")
        .instance_field("tag", "B", AccessFlags::empty())
        .instance_field("x", "J", AccessFlags::FINAL)
        .instance_field("name", "Ljava/lang/String;", AccessFlags::empty())
        .static_field("COUNT", "I", AccessFlags::empty())
        .finish();
    let linker = linker_with(vec![a.build()]);

    let base = linker.find_class("LBase;").unwrap();
    assert_eq!(base.find_declared_instance_field("flag").unwrap().offset, OBJECT_HEADER_SIZE);
    assert_eq!(base.object_size(), OBJECT_HEADER_SIZE + 1);

    let point = linker.find_class("LPoint;").unwrap();
    // largest first, each aligned to its size, after the superclass fields
    assert_eq!(point.find_declared_instance_field("x").unwrap().offset, 16);
    assert_eq!(point.find_declared_instance_field("name").unwrap().offset, 24);
    assert_eq!(point.find_declared_instance_field("tag").unwrap().offset, 28);
    assert_eq!(point.object_size(), 29);
    assert_eq!(point.find_declared_static_field("COUNT").unwrap().offset, 0);
    assert!(point.has_final_instance_fields());
    assert!(!base.has_final_instance_fields());
    // inherited lookup
    assert_eq!(point.find_instance_field("flag").unwrap().offset, OBJECT_HEADER_SIZE);
    assert_eq!(point.status(), ClassStatus::Resolved);
}

#[test]
fn test_vtable_overrides_in_place() {
    let mut a = ModuleBuilder::new("a.dex");
    a.class("LAnimal;")
        .superclass("Ljava/lang/Object;")
        .virtual_method("speak", "()V", AccessFlags::PUBLIC, Some(vec![Instruction::ReturnVoid]))
        .finish();
    a.class("LDog;")
        .superclass("LAnimal;")
        .access(AccessFlags::PUBLIC | AccessFlags::FINAL)
        .virtual_method("toString", "()Ljava/lang/String;", AccessFlags::PUBLIC, Some(vec![Instruction::Return { src: 0 }]))
        .virtual_method("fetch", "()V", AccessFlags::PUBLIC, Some(vec![Instruction::ReturnVoid]))
        .finish();
    let linker = linker_with(vec![a.build()]);

    let object = linker.find_class("Ljava/lang/Object;").unwrap();
    let animal = linker.find_class("LAnimal;").unwrap();
    let dog = linker.find_class("LDog;").unwrap();

    assert_eq!(object.vtable().len(), 2);
    assert_eq!(animal.vtable().len(), 3);
    assert_eq!(dog.vtable().len(), 4);

    let to_string = dog.find_declared_virtual_method("toString", "()Ljava/lang/String;").unwrap();
    assert_eq!(to_string.method_index, 0);
    assert_eq!(dog.vtable_entry(0).unwrap().declaring_descriptor, "LDog;");
    assert_eq!(object.vtable_entry(0).unwrap().declaring_descriptor, "Ljava/lang/Object;");
    assert_eq!(dog.find_declared_virtual_method("fetch", "()V").unwrap().method_index, 3);
    assert!(to_string.is_effectively_final());
    assert!(!animal.vtable_entry(2).unwrap().is_effectively_final());
}

#[test]
fn test_circular_hierarchy_fails_to_link() {
    let mut a = ModuleBuilder::new("a.dex");
    a.class("LA;").superclass("LB;").finish();
    a.class("LB;").superclass("LA;").finish();
    a.class("LC;").superclass("LA;").finish();
    let linker = linker_with(vec![a.build()]);

    assert!(matches!(linker.find_class("LA;"), Err(LinkError::ClassCircularity(_))));
    assert!(matches!(linker.find_class("LB;"), Err(LinkError::ClassCircularity(_))));
    // C is not on the cycle but cannot link either
    assert!(linker.find_class("LC;").is_err());
}

#[test]
fn test_extending_final_class_is_incompatible() {
    let mut a = ModuleBuilder::new("a.dex");
    a.class("LSealed;")
        .superclass("Ljava/lang/Object;")
        .access(AccessFlags::PUBLIC | AccessFlags::FINAL)
        .finish();
    a.class("LSub;").superclass("LSealed;").finish();
    let linker = linker_with(vec![a.build()]);
    assert!(matches!(
        linker.find_class("LSub;"),
        Err(LinkError::IncompatibleClassChange(_))
    ));
}

// ============================================================================
// Member resolution
// ============================================================================

#[test]
fn test_field_resolution_checks_staticness() {
    let mut a = ModuleBuilder::new("a.dex");
    let x = a.field_index("LBox;", "x", "I");
    let count = a.field_index("LBox;", "COUNT", "I");
    a.class("LBox;")
        .superclass("Ljava/lang/Object;")
        .instance_field("x", "I", AccessFlags::PUBLIC)
        .static_field("COUNT", "I", AccessFlags::PUBLIC)
        .finish();
    let linker = linker_with(vec![a.build()]);
    let m = ModuleId(1);

    let field = linker.resolve_field(m, x, false).unwrap();
    assert_eq!(field.name, "x");
    assert!(linker.resolved_field(m, x).is_some());
    // cached hit is still checked
    assert!(matches!(
        linker.resolve_field(m, x, true),
        Err(LinkError::IncompatibleClassChange(_))
    ));
    assert!(matches!(
        linker.resolve_field(m, count, false),
        Err(LinkError::IncompatibleClassChange(_))
    ));
    assert!(linker.resolve_field(m, count, true).unwrap().is_static());
}

#[test]
fn test_method_resolution_by_invoke_kind() {
    let mut a = ModuleBuilder::new("a.dex");
    let helper = a.method_index("LUtil;", "helper", "()V");
    let run = a.method_index("LUtil;", "run", "()V");
    let inherited = a.method_index("LUtil;", "toString", "()Ljava/lang/String;");
    let missing = a.method_index("LUtil;", "nope", "()V");
    a.class("LUtil;")
        .superclass("Ljava/lang/Object;")
        .direct_method("helper", "()V", AccessFlags::STATIC, Some(vec![Instruction::ReturnVoid]))
        .virtual_method("run", "()V", AccessFlags::PUBLIC, Some(vec![Instruction::ReturnVoid]))
        .finish();
    let linker = linker_with(vec![a.build()]);
    let m = ModuleId(1);

    assert!(linker.resolve_method(m, helper, InvokeType::Static).unwrap().is_static());
    assert!(matches!(
        linker.resolve_method(m, helper, InvokeType::Virtual),
        Err(LinkError::IncompatibleClassChange(_))
    ));
    let run_method = linker.resolve_method(m, run, InvokeType::Virtual).unwrap();
    assert!(!run_method.is_direct);
    assert!(matches!(
        linker.resolve_method(m, run, InvokeType::Static),
        Err(LinkError::IncompatibleClassChange(_))
    ));
    let to_string = linker.resolve_method(m, inherited, InvokeType::Virtual).unwrap();
    assert_eq!(to_string.declaring_descriptor, "Ljava/lang/Object;");
    assert!(matches!(
        linker.resolve_method(m, missing, InvokeType::Virtual),
        Err(LinkError::NoSuchMethod { .. })
    ));
    assert!(matches!(
        linker.resolve_method(m, run, InvokeType::Interface),
        Err(LinkError::IncompatibleClassChange(_))
    ));
}

#[test]
fn test_interface_resolution() {
    let mut a = ModuleBuilder::new("a.dex");
    let call = a.method_index("LRunnable;", "run", "()V");
    a.class("LRunnable;")
        .access(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
        .superclass("Ljava/lang/Object;")
        .virtual_method("run", "()V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT, None)
        .finish();
    a.class("LTask;")
        .superclass("Ljava/lang/Object;")
        .interface("LRunnable;")
        .virtual_method("run", "()V", AccessFlags::PUBLIC, Some(vec![Instruction::ReturnVoid]))
        .finish();
    let linker = linker_with(vec![a.build()]);

    let iface_method = linker.resolve_method(ModuleId(1), call, InvokeType::Interface).unwrap();
    assert_eq!(iface_method.method_index, 0);
    let task = linker.find_class("LTask;").unwrap();
    let runnable = linker.find_class("LRunnable;").unwrap();
    assert!(task.implements(runnable.reference()));
    assert!(task.is_assignable_to(&runnable));
    let implementation = task.find_virtual_implementation(&iface_method).unwrap();
    assert_eq!(implementation.declaring_descriptor, "LTask;");
}

#[test]
fn test_string_resolution() {
    let mut a = ModuleBuilder::new("a.dex");
    let s = a.string_index("hello");
    let linker = linker_with(vec![a.build()]);
    assert!(!linker.is_string_resolved(ModuleId(1), s));
    linker.resolve_string(ModuleId(1), s).unwrap();
    assert!(linker.is_string_resolved(ModuleId(1), s));
    assert!(linker.resolve_string(ModuleId(1), 42).is_err());
    assert_eq!(
        linker.resolve_string(ModuleId(9), 0).unwrap_err(),
        LinkError::UnknownModule(ModuleId(9))
    );
}
