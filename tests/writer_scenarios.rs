//! End-to-end scenarios driving `ClassWriter`/`MethodWriter` through their
//! public API the way a caller would, checked against the resulting bytes.
//!
//! There's no reader in this crate, so scenarios that would otherwise
//! round-trip through one instead assert on the byte structure the writer
//! itself produced.

use ka_pi::access_flag::{ClassAccessFlags, MethodAccessFlags};
use ka_pi::class::{ClassWriter, JavaVersion};
use ka_pi::frame::CommonSuperClass;
use ka_pi::handle::Handle;
use ka_pi::method::ComputeMode;
use ka_pi::opcodes::*;
use ka_pi::symbol::{Constant, SymbolTable};

struct NoHierarchy;
impl CommonSuperClass for NoHierarchy {
    fn common_super_class(&self, _a: &str, _b: &str) -> String {
        "java/lang/Object".to_string()
    }
}

/// `method_info`'s fixed-width header written ahead of its attribute list:
/// access_flags(2) + name_index(2) + descriptor_index(2) + attributes_count(2).
const METHOD_INFO_HEADER: usize = 8;

fn empty_class(name: &str, version: JavaVersion) -> ClassWriter {
    let mut writer = ClassWriter::new(version);
    writer
        .visit(
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            name,
            None,
            "java/lang/Object",
            &[],
        )
        .unwrap();
    writer
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

/// Walks the `constant_pool` of a `ClassFile` byte stream and returns the
/// offset immediately after it (where `access_flags` begins).
fn skip_constant_pool(bytes: &[u8]) -> usize {
    let count = u16_at(bytes, 8);
    let mut offset = 10usize;
    let mut index = 1u16;
    while index < count {
        let tag = bytes[offset];
        let (size, width) = match tag {
            1 => (3 + u16_at(bytes, offset + 1) as usize, 1), // Utf8: length prefix + bytes
            3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => (5, 1),      // Integer/Float/ref pairs
            5 | 6 => (9, 2),                                   // Long/Double
            7 | 8 | 16 | 19 | 20 => (3, 1),                    // Class/String/MethodType/Module/Package
            15 => (4, 1),                                      // MethodHandle
            other => panic!("unexpected constant pool tag {other}"),
        };
        offset += size;
        index += width;
    }
    offset
}

/// S1 — an empty class begins with the standard header, declares the
/// expected constant-pool count, and carries no fields, methods, or
/// attributes.
#[test]
fn s1_empty_class_has_expected_header_and_pool_count() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut writer = empty_class("p/Foo", JavaVersion::V1_8);
    let bytes = writer.to_bytes().unwrap();

    assert_eq!(&bytes[0..8], &[0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34]);
    // Constant pool holds Utf8+Class for both p/Foo and java/lang/Object: 4
    // live entries plus the unused index 0 makes a declared count of 5.
    assert_eq!(&bytes[8..10], &[0x00, 0x05]);

    let after_pool = skip_constant_pool(&bytes);
    let access_flags = u16_at(&bytes, after_pool);
    assert_eq!(
        access_flags,
        (ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER).bits()
    );
    let interfaces_count = u16_at(&bytes, after_pool + 6);
    assert_eq!(interfaces_count, 0);
    let fields_count = u16_at(&bytes, after_pool + 8);
    assert_eq!(fields_count, 0);
    let methods_count = u16_at(&bytes, after_pool + 10);
    assert_eq!(methods_count, 0);
    let attributes_count = u16_at(&bytes, after_pool + 12);
    assert_eq!(attributes_count, 0);
    assert_eq!(bytes.len(), after_pool + 14);
}

/// S2 — a static method under `MaxStackAndLocals` gets the right
/// `max_stack`/`max_locals` without the writer needing frame computation.
#[test]
fn s2_static_method_tracks_max_stack_and_locals() {
    let mut writer = empty_class("p/Foo", JavaVersion::V1_8);
    {
        let method = writer
            .visit_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                "sum",
                "(II)I",
                ComputeMode::MaxStackAndLocals,
            )
            .unwrap();
        method.visit_var_insn(ILOAD, 0).unwrap();
        method.visit_var_insn(ILOAD, 1).unwrap();
        method.visit_insn(IADD).unwrap();
        method.visit_insn(IRETURN).unwrap();
        assert_eq!(method.max_stack(), 2);
        assert_eq!(method.max_locals(), 2);
    }
    let bytes = writer.to_bytes().unwrap();
    assert!(!bytes.is_empty());
}

/// S3 — a forward `goto` over a gap wide enough to overflow `i16` must widen
/// to `goto_w`, and the resulting `Code` attribute must still assemble to
/// completion with the correct `code_length`.
///
/// Driven through a standalone `MethodWriter` rather than `ClassWriter`: the
/// jump-tracking calls need the same `SymbolTable` `visit_end` ultimately
/// writes with, and `ClassWriter` keeps its pool private.
#[test]
fn s3_wide_forward_goto_widens_to_goto_w() {
    let mut symbols = SymbolTable::new();
    let mut method = ka_pi::method::MethodWriter::new(
        JavaVersion::V1_8.encode(),
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "skip",
        "()V",
        ComputeMode::MaxStackAndLocals,
    )
    .unwrap();
    let target = method.new_label();
    method.visit_jump_insn(GOTO, target, &mut symbols).unwrap();
    for _ in 0..40_000 {
        method.visit_insn(NOP).unwrap();
    }
    method.visit_label(target, &mut symbols).unwrap();
    method.visit_insn(RETURN).unwrap();

    let mut out = ka_pi::byte_vec::ByteVector::new();
    method.visit_end(&mut symbols, &NoHierarchy, &mut out).unwrap();
    let code_attribute_body = &out.as_slice()[METHOD_INFO_HEADER + 6..];
    assert_eq!(u32_at(code_attribute_body, 4), 40_006); // goto_w(5) + 40000 nops(1 each) + return(1)
    let (code, _tail) = code_attribute_tail(code_attribute_body);
    assert_eq!(code[0], GOTO_W);
}

/// Splits a `Code` attribute body (the bytes right after its name index and
/// length) into its `code` slice and the slice covering everything from its
/// `attributes_count` onward, to let a test reach a specific attribute
/// without re-implementing the whole reader this crate deliberately omits.
fn code_attribute_tail(code_attribute_body: &[u8]) -> (&[u8], &[u8]) {
    let code_length = u32_at(code_attribute_body, 4) as usize;
    let code = &code_attribute_body[8..8 + code_length];
    let exception_table_offset = 8 + code_length;
    let handler_count = u16_at(code_attribute_body, exception_table_offset) as usize;
    let attributes_offset = exception_table_offset + 2 + handler_count * 8;
    (code, &code_attribute_body[attributes_offset..])
}

/// S4 — an if/else diamond under `AllFrames` carries a `StackMapTable` with
/// a `SAME_FRAME` at the join after the `iconst_0` branch and a
/// `SAME_LOCALS_1_STACK_ITEM(INTEGER)` at the final join.
#[test]
fn s4_if_else_diamond_emits_stack_map_frames() {
    let mut writer = empty_class("p/Foo", JavaVersion::V1_8);
    let method = writer
        .visit_method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "f",
            "(I)Z",
            ComputeMode::AllFrames,
        )
        .unwrap();
    let mut symbols = SymbolTable::new();
    let l1 = method.new_label();
    let l2 = method.new_label();
    method.visit_var_insn(ILOAD, 0).unwrap();
    method.visit_jump_insn(IFEQ, l1, &mut symbols).unwrap();
    method.visit_insn(ICONST_1).unwrap();
    method.visit_jump_insn(GOTO, l2, &mut symbols).unwrap();
    method.visit_label(l1, &mut symbols).unwrap();
    method.visit_insn(ICONST_0).unwrap();
    method.visit_label(l2, &mut symbols).unwrap();
    method.visit_insn(IRETURN).unwrap();

    let mut out = ka_pi::byte_vec::ByteVector::new();
    method.visit_end(&mut symbols, &NoHierarchy, &mut out).unwrap();
    let code_attribute_body = &out.as_slice()[METHOD_INFO_HEADER + 6..];
    let (_code, tail) = code_attribute_tail(code_attribute_body);

    let attribute_count = u16_at(tail, 0);
    assert_eq!(attribute_count, 1);
    let stack_map_name = symbols.get_utf8_index("StackMapTable").unwrap();
    assert_eq!(u16_at(tail, 2), stack_map_name);
    let body = &tail[2 + 2 + 4..];

    let entry_count = u16_at(body, 0);
    assert_eq!(entry_count, 2);

    // First entry: SAME_FRAME at l1 (unchanged locals, empty stack).
    assert!(body[2] <= SAME_FRAME_MAX);

    // Second entry: SAME_LOCALS_1_STACK_ITEM(INTEGER) at l2.
    let second_tag = body[3];
    assert!((SAME_LOCALS_1_STACK_ITEM_MIN..=SAME_LOCALS_1_STACK_ITEM_MAX).contains(&second_tag));
    assert_eq!(body[4], ITEM_INTEGER);
}

/// S5 — a try/catch whose handler immediately rethrows must record the
/// exception on the stack (`max_stack >= 1`) and its `StackMapTable` frame
/// at the handler must hold exactly one operand: the caught exception type.
#[test]
fn s5_try_catch_handler_frame_holds_the_exception_type() {
    let mut writer = empty_class("p/Foo", JavaVersion::V1_8);
    let method = writer
        .visit_method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "guarded",
            "()V",
            ComputeMode::AllFrames,
        )
        .unwrap();
    let mut symbols = SymbolTable::new();
    let try_start = method.new_label();
    let try_end = method.new_label();
    let handler_pc = method.new_label();
    let done = method.new_label();

    method
        .visit_try_catch_block(
            try_start,
            try_end,
            handler_pc,
            Some("java/lang/NullPointerException"),
            &mut symbols,
        )
        .unwrap();
    method.visit_label(try_start, &mut symbols).unwrap();
    method
        .visit_method_insn(INVOKESTATIC, "p/Foo", "mayThrow", "()V", false)
        .unwrap();
    method.visit_label(try_end, &mut symbols).unwrap();
    method.visit_jump_insn(GOTO, done, &mut symbols).unwrap();
    method.visit_label(handler_pc, &mut symbols).unwrap();
    method.visit_var_insn(ASTORE, 0).unwrap();
    method.visit_var_insn(ALOAD, 0).unwrap();
    method.visit_insn(ATHROW).unwrap();
    method.visit_label(done, &mut symbols).unwrap();
    method.visit_insn(RETURN).unwrap();

    assert!(method.max_stack() >= 1);

    let mut out = ka_pi::byte_vec::ByteVector::new();
    method.visit_end(&mut symbols, &NoHierarchy, &mut out).unwrap();
    let code_attribute_body = &out.as_slice()[METHOD_INFO_HEADER + 6..];
    let (_code, tail) = code_attribute_tail(code_attribute_body);

    assert_eq!(u16_at(tail, 0), 1);
    let body = &tail[2 + 2 + 4..];
    assert_eq!(u16_at(body, 0), 1);

    let tag = body[2];
    assert!((SAME_LOCALS_1_STACK_ITEM_MIN..=SAME_LOCALS_1_STACK_ITEM_MAX).contains(&tag));
    assert_eq!(body[3], ITEM_OBJECT);
    let npe_class_index = symbols.add_class("java/lang/NullPointerException").unwrap();
    assert_eq!(u16_at(body, 4), npe_class_index);
}

/// S6 — an `invokedynamic` call site targeting a bootstrap method with two
/// `ConstantDynamic` arguments interns exactly one `InvokeDynamic` constant
/// and one `BootstrapMethods` entry for it, whose own arguments reference
/// two further bootstrap entries; re-adding the identical call site doesn't
/// duplicate anything.
#[test]
fn s6_invoke_dynamic_shares_bootstrap_entries_on_repeat() {
    let mut symbols = SymbolTable::new();

    let condy_handle = Handle::new(
        ka_pi::opcodes::ReferenceKind::InvokeStatic,
        "p/Boot",
        "condy",
        "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/Class;)Ljava/lang/Object;",
        false,
    );
    let condy_bootstrap_a = symbols.add_bootstrap_method(&condy_handle, &[]).unwrap();
    let condy_bootstrap_b = symbols
        .add_bootstrap_method(&condy_handle, &[Constant::Integer(1)])
        .unwrap();
    assert_ne!(condy_bootstrap_a, condy_bootstrap_b);

    let name_and_type_a = symbols.add_name_and_type("a", "Ljava/lang/Object;").unwrap();
    let name_and_type_b = symbols.add_name_and_type("b", "Ljava/lang/Object;").unwrap();
    let dynamic_a = Constant::Dynamic(condy_bootstrap_a, name_and_type_a);
    let dynamic_b = Constant::Dynamic(condy_bootstrap_b, name_and_type_b);

    let indy_handle = Handle::new(
        ka_pi::opcodes::ReferenceKind::InvokeStatic,
        "p/Boot",
        "bootstrap",
        "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/invoke/CallSite;",
        false,
    );
    let arguments = vec![dynamic_a, dynamic_b];
    let indy_bootstrap = symbols.add_bootstrap_method(&indy_handle, &arguments).unwrap();
    let first_index = symbols.add_invoke_dynamic(indy_bootstrap, "call", "()V").unwrap();

    // Re-adding the identical call site must reuse both the constant and the
    // bootstrap entry rather than duplicating either.
    let indy_bootstrap_again = symbols.add_bootstrap_method(&indy_handle, &arguments).unwrap();
    let second_index = symbols.add_invoke_dynamic(indy_bootstrap_again, "call", "()V").unwrap();
    assert_eq!(indy_bootstrap, indy_bootstrap_again);
    assert_eq!(first_index, second_index);

    // Three bootstrap entries total: the two condy ones (distinguished by
    // their arguments) and the invokedynamic's own, which references both.
    assert_eq!(symbols.bootstrap_method_count(), 3);
    let indy_handle_index = symbols.add_handle(&indy_handle).unwrap();
    let indy_entry = symbols
        .bootstrap_methods()
        .find(|entry| entry.handle_index == indy_handle_index)
        .unwrap();
    assert_eq!(indy_entry.argument_indices.len(), 2);
}
