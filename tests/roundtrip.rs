//! End-to-end checks of the assemble/serialize/deserialize/disassemble pipeline

use jasm::jvm::class_file::{ClassFile, Code};
use jasm::jvm::code::{
    AssembleOptions, AssignmentCheck, BranchKind, CodeBody, Instruction, SwitchTable, VarKind,
};
use jasm::jvm::model::{Class, Field, Method};
use jasm::jvm::{
    CapacityError, ClassAccessFlags, Constant, ConstantPool, ContractError, Error,
    FieldAccessFlags, MemberRef, MethodAccessFlags, Version,
};
use std::io::Cursor;

fn member(class: &str, name: &str, descriptor: &str) -> MemberRef {
    MemberRef {
        class: class.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    }
}

/// The `Point` class from the crate documentation: two int fields and a constructor
fn point_class() -> Class {
    let mut class = Class::new(
        "me/alec/Point",
        "java/lang/Object",
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        Version::JAVA8,
    );
    class.source_file = Some("Point.java".to_string());
    class.add_field(Field::new(
        "x",
        "I",
        FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL,
    ));
    class.add_field(Field::new(
        "y",
        "I",
        FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL,
    ));

    let mut code = CodeBody::new();
    (|| -> Result<(), Error> {
        code.begin()?;
        let this = code.declare(VarKind::Reference, None)?;
        let x = code.declare(VarKind::Int, None)?;
        let y = code.declare(VarKind::Int, None)?;
        code.push(Instruction::Load(this))?;
        code.push(Instruction::InvokeSpecial(member(
            "java/lang/Object",
            "<init>",
            "()V",
        )))?;
        code.push(Instruction::Load(this))?;
        code.push(Instruction::Load(x))?;
        code.push(Instruction::PutField(member("me/alec/Point", "x", "I")))?;
        code.push(Instruction::Load(this))?;
        code.push(Instruction::Load(y))?;
        code.push(Instruction::PutField(member("me/alec/Point", "y", "I")))?;
        code.push(Instruction::Return)?;
        code.end()?;
        Ok(())
    })()
    .unwrap();

    let mut constructor = Method::new("<init>", "(II)V", MethodAccessFlags::PUBLIC);
    constructor.code = Some(code);
    class.add_method(constructor);
    class
}

/// Assemble one body against a pool containing exactly its own constants
fn assemble(body: &CodeBody, descriptor: &str, is_static: bool) -> Result<Vec<u8>, Error> {
    let mut pool = ConstantPool::new(Version::JAVA8);
    body.register_constants(&mut pool)?;
    pool.freeze()?;
    let output = body.assemble(descriptor, is_static, &pool, &AssembleOptions::default())?;
    Ok(output.bytes)
}

#[test]
fn class_serialization_round_trips() {
    let class_file = point_class().assemble(&AssembleOptions::default()).unwrap();

    let mut bytes = vec![];
    class_file.serialize(&mut bytes).unwrap();

    let reread = ClassFile::deserialize(&mut Cursor::new(&bytes)).unwrap();
    assert_eq!(
        reread.pool.get_class_name(reread.this_class).unwrap(),
        "me/alec/Point"
    );
    assert_eq!(reread.fields.len(), 2);
    assert_eq!(reread.methods.len(), 1);

    let mut bytes2 = vec![];
    reread.serialize(&mut bytes2).unwrap();
    assert_eq!(bytes, bytes2);
}

#[test]
fn disassembled_constructor_reencodes_to_the_same_bytes() {
    let class_file = point_class().assemble(&AssembleOptions::default()).unwrap();
    let code_attr: Code = class_file.methods[0].attributes[0]
        .decode_as(&class_file.pool)
        .unwrap()
        .expect("constructor carries a Code attribute");

    let body = CodeBody::disassemble(
        &code_attr.code,
        &code_attr.exception_table,
        &class_file.pool,
    )
    .unwrap();
    let output = body
        .assemble("(II)V", false, &class_file.pool, &AssembleOptions::default())
        .unwrap();

    assert_eq!(output.bytes, code_attr.code);
    assert_eq!(output.max_stack, code_attr.max_stack);
    assert_eq!(output.max_locals, code_attr.max_locals);
}

#[test]
fn literal_pushes_take_their_smallest_encoding() {
    let mut body = CodeBody::new();
    for value in [3, 127, 1000, 100_000] {
        body.push(Instruction::Push(Constant::Integer(value))).unwrap();
        body.push(Instruction::Pop).unwrap();
    }
    body.push(Instruction::Return).unwrap();

    let bytes = assemble(&body, "()V", true).unwrap();
    assert_eq!(
        bytes,
        vec![
            0x06, 0x57, // iconst_3
            0x10, 0x7f, 0x57, // bipush 127
            0x11, 0x03, 0xe8, 0x57, // sipush 1000
            0x12, 0x01, 0x57, // ldc #1
            0xb1,
        ]
    );
}

#[test]
fn ldc_widens_only_when_the_index_does_not_fit_a_byte() {
    let mut body = CodeBody::new();
    body.push(Instruction::Push(Constant::Integer(100_000))).unwrap();
    body.push(Instruction::Pop).unwrap();
    body.push(Instruction::Return).unwrap();

    // Claim the first 256 pool slots so the pushed literal lands past the ldc range
    let mut pool = ConstantPool::new(Version::JAVA8);
    for value in 0..256 {
        pool.register_loadable(&Constant::Integer(1_000_000 + value)).unwrap();
    }
    body.register_constants(&mut pool).unwrap();
    pool.freeze().unwrap();

    let output = body
        .assemble("()V", true, &pool, &AssembleOptions::default())
        .unwrap();
    assert_eq!(output.bytes, vec![0x13, 0x01, 0x01, 0x57, 0xb1]); // ldc_w #257
}

#[test]
fn guarded_section_becomes_one_exception_row() {
    let mut body = CodeBody::new();
    let handler = body.fresh_label();
    let start = body.try_start().unwrap();
    body.push(Instruction::Nop).unwrap();
    body.catch(start, Some("java/lang/Exception"), handler).unwrap();
    body.push(Instruction::Return).unwrap();
    body.place(handler).unwrap();
    body.push(Instruction::AThrow).unwrap();

    let mut pool = ConstantPool::new(Version::JAVA8);
    body.register_constants(&mut pool).unwrap();
    pool.freeze().unwrap();
    let output = body
        .assemble("()V", true, &pool, &AssembleOptions::default())
        .unwrap();

    assert_eq!(output.exception_table.len(), 1);
    let row = &output.exception_table[0];
    assert_eq!((row.start, row.end, row.handler), (0, 1, 2));
    assert_eq!(row.class.as_deref(), Some("java/lang/Exception"));
}

#[test]
fn unreachable_guarded_section_emits_no_row() {
    let mut body = CodeBody::new();
    let skip = body.fresh_label();
    let handler = body.fresh_label();
    body.push(Instruction::Branch(BranchKind::Goto, skip)).unwrap();
    let start = body.try_start().unwrap();
    body.push(Instruction::Nop).unwrap();
    body.catch(start, None, handler).unwrap();
    body.place(skip).unwrap();
    body.push(Instruction::Return).unwrap();
    body.place(handler).unwrap();
    body.push(Instruction::AThrow).unwrap();

    let bytes_and_rows = {
        let mut pool = ConstantPool::new(Version::JAVA8);
        body.register_constants(&mut pool).unwrap();
        pool.freeze().unwrap();
        body.assemble("()V", true, &pool, &AssembleOptions::default()).unwrap()
    };

    assert!(bytes_and_rows.exception_table.is_empty());
    // The dead nop and handler are dropped too
    assert_eq!(bytes_and_rows.bytes, vec![0xa7, 0x00, 0x03, 0xb1]);
}

#[test]
fn dense_cases_select_tableswitch_and_sparse_select_lookupswitch() {
    let dense: Vec<i32> = (0..100).collect();
    let sparse = vec![0, 1000, 2000];

    for (keys, opcode) in [(dense, 0xaau8), (sparse, 0xabu8)] {
        let mut body = CodeBody::new();
        let target = body.fresh_label();
        let default = body.fresh_label();
        body.push(Instruction::Push(Constant::Integer(0))).unwrap();
        body.push(Instruction::Switch(SwitchTable {
            default,
            cases: keys.iter().map(|key| (*key, target)).collect(),
        }))
        .unwrap();
        body.place(target).unwrap();
        body.push(Instruction::Return).unwrap();
        body.place(default).unwrap();
        body.push(Instruction::Return).unwrap();

        let bytes = assemble(&body, "()V", true).unwrap();
        assert_eq!(bytes[1], opcode);
    }
}

/// Builds nested subroutines: main calls `sub`, whose body calls `inner`
fn nested_subroutines() -> CodeBody {
    let mut body = CodeBody::new();
    (|| -> Result<(), Error> {
        let sub = body.fresh_label();
        let inner = body.fresh_label();

        body.begin()?;
        let a = body.declare(VarKind::Int, None)?;
        body.push(Instruction::Push(Constant::Integer(0)))?;
        body.push(Instruction::Store(a))?;
        body.push(Instruction::Jsr(sub))?;
        body.push(Instruction::Return)?;

        body.place(sub)?;
        body.begin()?;
        let ra = body.declare(VarKind::ReturnAddress, None)?;
        body.push(Instruction::Store(ra))?;
        body.push(Instruction::Jsr(inner))?;
        body.push(Instruction::Ret(ra))?;
        body.end()?;

        body.place(inner)?;
        body.begin()?;
        let rb = body.declare(VarKind::ReturnAddress, None)?;
        body.push(Instruction::Store(rb))?;
        body.push(Instruction::Ret(rb))?;
        body.end()?;
        body.end()?;
        Ok(())
    })()
    .unwrap();
    body
}

#[test]
fn nested_subroutines_get_disjoint_slots() {
    let body = nested_subroutines();
    let mut pool = ConstantPool::new(Version::JAVA8);
    body.register_constants(&mut pool).unwrap();
    pool.freeze().unwrap();
    let output = body
        .assemble("()V", true, &pool, &AssembleOptions::default())
        .unwrap();

    // The outer variable keeps slot 0; the two return addresses land in slots 1 and 2
    assert_eq!(
        output.bytes,
        vec![
            0x03, 0x3b, // iconst_0; istore_0
            0xa8, 0x00, 0x04, // jsr -> sub
            0xb1, // return
            0x4c, // astore_1
            0xa8, 0x00, 0x05, // jsr -> inner
            0xa9, 0x01, // ret 1
            0x4d, // astore_2
            0xa9, 0x02, // ret 2
        ]
    );
    assert_eq!(output.max_locals, 3);
    assert_eq!(output.max_stack, 1);
}

#[test]
fn layout_is_a_fixed_point() {
    let body = nested_subroutines();
    let mut pool = ConstantPool::new(Version::JAVA8);
    body.register_constants(&mut pool).unwrap();
    pool.freeze().unwrap();

    let first = body
        .assemble("()V", true, &pool, &AssembleOptions::default())
        .unwrap();
    let second = body
        .assemble("()V", true, &pool, &AssembleOptions::default())
        .unwrap();
    assert_eq!(first.bytes, second.bytes);
}

#[test]
fn strict_mode_rejects_a_possibly_unassigned_load() {
    let build = || {
        let mut body = CodeBody::new();
        body.begin().unwrap();
        let x = body.declare(VarKind::Int, None).unwrap();
        body.push(Instruction::Load(x)).unwrap();
        body.push(Instruction::IReturn).unwrap();
        body.end().unwrap();
        body
    };

    let assemble_with = |assignment: AssignmentCheck| {
        let body = build();
        let mut pool = ConstantPool::new(Version::JAVA8);
        body.register_constants(&mut pool).unwrap();
        pool.freeze().unwrap();
        body.assemble("()I", true, &pool, &AssembleOptions { assignment })
    };

    assert!(matches!(
        assemble_with(AssignmentCheck::Strict),
        Err(Error::Contract(ContractError::UnassignedVariable(_)))
    ));
    assert!(assemble_with(AssignmentCheck::Lenient).is_ok());
}

#[test]
fn too_distant_branch_is_a_capacity_error() {
    let mut body = CodeBody::new();
    let start = body.fresh_label();
    body.place(start).unwrap();
    for _ in 0..33_000 {
        body.push(Instruction::Nop).unwrap();
    }
    body.push(Instruction::Branch(BranchKind::Goto, start)).unwrap();

    assert!(matches!(
        assemble(&body, "()V", true),
        Err(Error::Capacity(CapacityError::BranchOutOfRange { .. }))
    ));
}

#[test]
fn oversized_method_is_a_capacity_error() {
    let mut body = CodeBody::new();
    for _ in 0..70_000 {
        body.push(Instruction::Nop).unwrap();
    }
    body.push(Instruction::Return).unwrap();

    assert!(matches!(
        assemble(&body, "()V", true),
        Err(Error::Capacity(CapacityError::CodeTooLarge(_)))
    ));
}
