//! Rebuilding an instruction arena from bytecode
//!
//! Going backwards loses structure the class file never stored: scopes are gone, variables exist
//! only as bare slots, and labels exist only as jump targets. The decode therefore runs in two
//! passes: the first walks the bytes into raw operations with their offsets, and the second
//! materializes labels at every target offset, `Try`/`Catch` markers from the exception table,
//! and one variable per (kind, slot) pair, then pushes everything into a fresh [`CodeBody`].
//!
//! `wide` prefixes, both switch forms, and the `goto_w`/`jsr_w` encodings are accepted on input;
//! re-assembly always picks the minimal encoding again, so byte-for-byte round-trips hold
//! exactly when the input was minimally encoded to begin with.

use crate::jvm::class_file::ExceptionHandler;
use crate::jvm::code::{
    BaseType, BranchKind, CodeBody, InsnIdx, Instruction, LabelId, SwitchTable, VarId, VarKind,
};
use crate::jvm::{Constant, ConstantPool, Deserialize, Error, FormatError, MemberRef};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;

impl CodeBody {
    /// Decode bytecode (and its exception table) back into an instruction arena
    ///
    /// The pool is the decoded class file's own pool, so every operand index resolves to the
    /// constants the original compiler put there.
    pub fn disassemble(
        code: &[u8],
        exception_table: &[ExceptionHandler],
        pool: &ConstantPool,
    ) -> Result<CodeBody, Error> {
        let decoded = decode(code, pool)?;
        let code_len = code.len() as u32;
        let boundaries: HashSet<u32> = decoded.iter().map(|d| d.at).collect();

        let mut body = CodeBody::new();

        // A label at every branch, switch, and handler target
        let mut targets: Vec<u32> = Vec::new();
        for d in &decoded {
            match &d.op {
                RawOp::Branch(_, target) | RawOp::Jsr(target) => targets.push(*target),
                RawOp::Switch { default, cases, .. } => {
                    targets.push(*default);
                    targets.extend(cases.iter().map(|(_, target)| *target));
                }
                _ => {}
            }
        }
        targets.extend(exception_table.iter().map(|row| row.handler_pc as u32));
        targets.sort_unstable();
        targets.dedup();

        let mut labels: HashMap<u32, LabelId> = HashMap::new();
        for target in targets {
            if !boundaries.contains(&target) {
                return Err(FormatError::BadJumpTarget(target as i64).into());
            }
            labels.insert(target, body.fresh_label());
        }

        // One Try/Catch marker pair per exception-table row
        struct Guard {
            class: Option<String>,
            handler: LabelId,
            try_idx: Option<InsnIdx>,
        }
        let mut guards: Vec<Guard> = Vec::new();
        let mut tries_at: HashMap<u32, Vec<usize>> = HashMap::new();
        let mut catches_at: HashMap<u32, Vec<usize>> = HashMap::new();
        for row in exception_table {
            if row.start_pc >= row.end_pc {
                return Err(FormatError::BadGuardRange {
                    start: row.start_pc,
                    end: row.end_pc,
                }
                .into());
            }
            for pc in [row.start_pc as u32, row.end_pc as u32] {
                if !boundaries.contains(&pc) && pc != code_len {
                    return Err(FormatError::BadJumpTarget(pc as i64).into());
                }
            }
            let class = if row.catch_type == 0 {
                None
            } else {
                Some(pool.get_class_name(row.catch_type)?.to_string())
            };
            let guard = guards.len();
            guards.push(Guard {
                class,
                handler: labels[&(row.handler_pc as u32)],
                try_idx: None,
            });
            tries_at.entry(row.start_pc as u32).or_default().push(guard);
            catches_at.entry(row.end_pc as u32).or_default().push(guard);
        }

        // Variables materialize per (kind, slot); no scope information survives disassembly
        let mut vars: HashMap<(VarKind, u16), VarId> = HashMap::new();
        let mut var_for = |body: &mut CodeBody, kind: VarKind, slot: u16| -> VarId {
            *vars
                .entry((kind, slot))
                .or_insert_with(|| body.var_at(kind, slot))
        };

        let boundary_markers = |body: &mut CodeBody,
                                    guards: &mut Vec<Guard>,
                                    at: u32|
         -> Result<(), Error> {
            // Close guards first so a range ending here excludes this instruction, then place
            // the label so branches land outside any guard opening here
            if let Some(rows) = catches_at.get(&at) {
                for &guard in rows {
                    let start = guards[guard]
                        .try_idx
                        .expect("guard starts strictly before it ends");
                    body.catch(start, guards[guard].class.as_deref(), guards[guard].handler)?;
                }
            }
            if let Some(label) = labels.get(&at) {
                body.place(*label)?;
            }
            if let Some(rows) = tries_at.get(&at) {
                for &guard in rows {
                    guards[guard].try_idx = Some(body.try_start()?);
                }
            }
            Ok(())
        };

        for d in &decoded {
            boundary_markers(&mut body, &mut guards, d.at)?;
            let insn = match &d.op {
                RawOp::Plain(insn) => insn.clone(),
                RawOp::Load(kind, slot) => Instruction::Load(var_for(&mut body, *kind, *slot)),
                RawOp::Store(kind, slot) => Instruction::Store(var_for(&mut body, *kind, *slot)),
                RawOp::Inc(slot, delta) => {
                    Instruction::Inc(var_for(&mut body, VarKind::Int, *slot), *delta)
                }
                RawOp::Ret(slot) => {
                    Instruction::Ret(var_for(&mut body, VarKind::ReturnAddress, *slot))
                }
                RawOp::Branch(kind, target) => Instruction::Branch(*kind, labels[target]),
                RawOp::Jsr(target) => Instruction::Jsr(labels[target]),
                RawOp::Switch { default, cases, .. } => Instruction::Switch(SwitchTable {
                    default: labels[default],
                    cases: cases
                        .iter()
                        .map(|(key, target)| (*key, labels[target]))
                        .collect(),
                }),
            };
            body.push(insn)?;
        }
        boundary_markers(&mut body, &mut guards, code_len)?;

        Ok(body)
    }
}

/// Textual listing of bytecode, one `(offset, rendering)` row per instruction
///
/// Pool operands are resolved to readable text; this is what the command-line dump prints.
pub fn listing(code: &[u8], pool: &ConstantPool) -> Result<Vec<(u32, String)>, Error> {
    Ok(decode(code, pool)?
        .iter()
        .map(|d| (d.at, render(&d.op)))
        .collect())
}

/// One decoded operation, cross-references still raw byte offsets and slot numbers
enum RawOp {
    /// Operations with no label or variable operands decode straight to an [`Instruction`]
    Plain(Instruction),
    Load(VarKind, u16),
    Store(VarKind, u16),
    Inc(u16, i16),
    Ret(u16),
    Branch(BranchKind, u32),
    Jsr(u32),
    Switch {
        dense: bool,
        default: u32,
        cases: Vec<(i32, u32)>,
    },
}

struct Decoded {
    at: u32,
    op: RawOp,
}

fn decode(code: &[u8], pool: &ConstantPool) -> Result<Vec<Decoded>, Error> {
    let mut reader = Cursor::new(code);
    let mut ops = Vec::new();
    while (reader.position() as usize) < code.len() {
        let at = reader.position() as u32;
        let op = decode_op(&mut reader, at, pool)?;
        ops.push(Decoded { at, op });
    }
    Ok(ops)
}

fn decode_op(
    reader: &mut Cursor<&[u8]>,
    at: u32,
    pool: &ConstantPool,
) -> Result<RawOp, Error> {
    let opcode = u8::deserialize(reader)?;
    if let Some(insn) = simple_instruction(opcode) {
        return Ok(RawOp::Plain(insn));
    }

    use Instruction::*;
    Ok(match opcode {
        // iconst_m1 .. iconst_5
        0x02..=0x08 => RawOp::Plain(Push(Constant::Integer(opcode as i32 - 0x03))),
        0x09 | 0x0a => RawOp::Plain(Push(Constant::Long((opcode - 0x09) as i64))),
        0x0b..=0x0d => RawOp::Plain(Push(Constant::Float((opcode - 0x0b) as f32))),
        0x0e | 0x0f => RawOp::Plain(Push(Constant::Double((opcode - 0x0e) as f64))),

        0x10 => RawOp::Plain(Push(Constant::Integer(i8::deserialize(reader)? as i32))),
        0x11 => RawOp::Plain(Push(Constant::Integer(i16::deserialize(reader)? as i32))),

        0x12 => {
            let index = u8::deserialize(reader)? as u16;
            RawOp::Plain(Push(narrow_constant(pool, index)?))
        }
        0x13 => {
            let index = u16::deserialize(reader)?;
            RawOp::Plain(Push(narrow_constant(pool, index)?))
        }
        0x14 => {
            let index = u16::deserialize(reader)?;
            let constant = pool.get(index)?;
            if !constant.loads_wide() {
                return Err(FormatError::WrongConstantKind {
                    index,
                    expected: "loadable category-2 constant",
                }
                .into());
            }
            RawOp::Plain(Push(constant.clone()))
        }

        0x15..=0x19 => RawOp::Load(var_kind(opcode - 0x15), u8::deserialize(reader)? as u16),
        0x1a..=0x2d => RawOp::Load(var_kind((opcode - 0x1a) / 4), ((opcode - 0x1a) % 4) as u16),
        0x36..=0x3a => RawOp::Store(var_kind(opcode - 0x36), u8::deserialize(reader)? as u16),
        0x3b..=0x4e => RawOp::Store(var_kind((opcode - 0x3b) / 4), ((opcode - 0x3b) % 4) as u16),

        0x84 => {
            let slot = u8::deserialize(reader)? as u16;
            let delta = i8::deserialize(reader)? as i16;
            RawOp::Inc(slot, delta)
        }

        0x99..=0xa7 | 0xc6 | 0xc7 => {
            let kind = branch_kind(opcode);
            let target = jump_target(at, i16::deserialize(reader)? as i64)?;
            RawOp::Branch(kind, target)
        }
        0xa8 => RawOp::Jsr(jump_target(at, i16::deserialize(reader)? as i64)?),
        0xa9 => RawOp::Ret(u8::deserialize(reader)? as u16),

        0xaa => {
            skip_switch_padding(reader, at)?;
            let default = jump_target(at, i32::deserialize(reader)? as i64)?;
            let low = i32::deserialize(reader)?;
            let high = i32::deserialize(reader)?;
            if low > high {
                return Err(FormatError::BadOpcode {
                    opcode,
                    offset: at as usize,
                }
                .into());
            }
            let mut cases = Vec::new();
            let mut key = low as i64;
            while key <= high as i64 {
                let target = jump_target(at, i32::deserialize(reader)? as i64)?;
                cases.push((key as i32, target));
                key += 1;
            }
            RawOp::Switch {
                dense: true,
                default,
                cases,
            }
        }
        0xab => {
            skip_switch_padding(reader, at)?;
            let default = jump_target(at, i32::deserialize(reader)? as i64)?;
            let npairs = i32::deserialize(reader)?;
            if npairs < 0 {
                return Err(FormatError::BadOpcode {
                    opcode,
                    offset: at as usize,
                }
                .into());
            }
            let mut cases = Vec::new();
            for _ in 0..npairs {
                let key = i32::deserialize(reader)?;
                let target = jump_target(at, i32::deserialize(reader)? as i64)?;
                cases.push((key, target));
            }
            RawOp::Switch {
                dense: false,
                default,
                cases,
            }
        }

        0xb2 => RawOp::Plain(GetStatic(field_ref(pool, u16::deserialize(reader)?)?)),
        0xb3 => RawOp::Plain(PutStatic(field_ref(pool, u16::deserialize(reader)?)?)),
        0xb4 => RawOp::Plain(GetField(field_ref(pool, u16::deserialize(reader)?)?)),
        0xb5 => RawOp::Plain(PutField(field_ref(pool, u16::deserialize(reader)?)?)),
        0xb6 => RawOp::Plain(InvokeVirtual(method_ref(pool, u16::deserialize(reader)?)?)),
        0xb7 => RawOp::Plain(InvokeSpecial(method_ref(pool, u16::deserialize(reader)?)?)),
        0xb8 => RawOp::Plain(InvokeStatic(method_ref(pool, u16::deserialize(reader)?)?)),
        0xb9 => {
            let member = interface_method_ref(pool, u16::deserialize(reader)?)?;
            // The count and trailing zero are redundant with the descriptor
            let _count = u8::deserialize(reader)?;
            let _zero = u8::deserialize(reader)?;
            RawOp::Plain(InvokeInterface(member))
        }
        0xba => {
            let index = u16::deserialize(reader)?;
            let _zeros = u16::deserialize(reader)?;
            match pool.get(index)? {
                Constant::InvokeDynamic {
                    bootstrap_method,
                    name,
                    descriptor,
                } => RawOp::Plain(InvokeDynamic {
                    bootstrap_method: *bootstrap_method,
                    name: name.clone(),
                    descriptor: descriptor.clone(),
                }),
                _ => {
                    return Err(FormatError::WrongConstantKind {
                        index,
                        expected: "InvokeDynamic",
                    }
                    .into())
                }
            }
        }

        0xbb => RawOp::Plain(New(class_name(pool, u16::deserialize(reader)?)?)),
        0xbc => {
            let atype = u8::deserialize(reader)?;
            let base = BaseType::from_atype(atype).ok_or(FormatError::BadOpcode {
                opcode: atype,
                offset: at as usize,
            })?;
            RawOp::Plain(NewArray(base))
        }
        0xbd => RawOp::Plain(ANewArray(class_name(pool, u16::deserialize(reader)?)?)),
        0xc0 => RawOp::Plain(CheckCast(class_name(pool, u16::deserialize(reader)?)?)),
        0xc1 => RawOp::Plain(InstanceOf(class_name(pool, u16::deserialize(reader)?)?)),

        0xc4 => {
            let modified = u8::deserialize(reader)?;
            match modified {
                0x15..=0x19 => RawOp::Load(var_kind(modified - 0x15), u16::deserialize(reader)?),
                0x36..=0x3a => RawOp::Store(var_kind(modified - 0x36), u16::deserialize(reader)?),
                0x84 => {
                    let slot = u16::deserialize(reader)?;
                    let delta = i16::deserialize(reader)?;
                    RawOp::Inc(slot, delta)
                }
                0xa9 => RawOp::Ret(u16::deserialize(reader)?),
                other => {
                    return Err(FormatError::BadOpcode {
                        opcode: other,
                        offset: at as usize,
                    }
                    .into())
                }
            }
        }

        0xc5 => {
            let class = class_name(pool, u16::deserialize(reader)?)?;
            let dimensions = u8::deserialize(reader)?;
            RawOp::Plain(MultiANewArray { class, dimensions })
        }

        // goto_w and jsr_w; never re-emitted, but accepted on input
        0xc8 => RawOp::Branch(
            BranchKind::Goto,
            jump_target(at, i32::deserialize(reader)? as i64)?,
        ),
        0xc9 => RawOp::Jsr(jump_target(at, i32::deserialize(reader)? as i64)?),

        other => {
            return Err(FormatError::BadOpcode {
                opcode: other,
                offset: at as usize,
            }
            .into())
        }
    })
}

fn jump_target(at: u32, displacement: i64) -> Result<u32, FormatError> {
    let target = at as i64 + displacement;
    u32::try_from(target).map_err(|_| FormatError::BadJumpTarget(target))
}

fn skip_switch_padding(reader: &mut Cursor<&[u8]>, at: u32) -> Result<(), Error> {
    for _ in 0..(3 - at % 4) {
        u8::deserialize(reader)?;
    }
    Ok(())
}

/// Kind index in the per-type opcode families (iload, lload, fload, dload, aload, ...)
fn var_kind(index: u8) -> VarKind {
    match index {
        0 => VarKind::Int,
        1 => VarKind::Long,
        2 => VarKind::Float,
        3 => VarKind::Double,
        _ => VarKind::Reference,
    }
}

fn branch_kind(opcode: u8) -> BranchKind {
    match opcode {
        0x99 => BranchKind::IfEq,
        0x9a => BranchKind::IfNe,
        0x9b => BranchKind::IfLt,
        0x9c => BranchKind::IfGe,
        0x9d => BranchKind::IfGt,
        0x9e => BranchKind::IfLe,
        0x9f => BranchKind::IfICmpEq,
        0xa0 => BranchKind::IfICmpNe,
        0xa1 => BranchKind::IfICmpLt,
        0xa2 => BranchKind::IfICmpGe,
        0xa3 => BranchKind::IfICmpGt,
        0xa4 => BranchKind::IfICmpLe,
        0xa5 => BranchKind::IfACmpEq,
        0xa6 => BranchKind::IfACmpNe,
        0xa7 => BranchKind::Goto,
        0xc6 => BranchKind::IfNull,
        _ => BranchKind::IfNonNull,
    }
}

fn narrow_constant(pool: &ConstantPool, index: u16) -> Result<Constant, Error> {
    let constant = pool.get(index)?;
    if !constant.is_loadable() || constant.loads_wide() {
        return Err(FormatError::WrongConstantKind {
            index,
            expected: "loadable category-1 constant",
        }
        .into());
    }
    Ok(constant.clone())
}

fn class_name(pool: &ConstantPool, index: u16) -> Result<String, Error> {
    Ok(pool.get_class_name(index)?.to_string())
}

fn field_ref(pool: &ConstantPool, index: u16) -> Result<MemberRef, Error> {
    match pool.get(index)? {
        Constant::FieldRef(member) => Ok(member.clone()),
        _ => Err(FormatError::WrongConstantKind {
            index,
            expected: "Fieldref",
        }
        .into()),
    }
}

fn method_ref(pool: &ConstantPool, index: u16) -> Result<MemberRef, Error> {
    match pool.get(index)? {
        Constant::MethodRef(member) => Ok(member.clone()),
        _ => Err(FormatError::WrongConstantKind {
            index,
            expected: "Methodref",
        }
        .into()),
    }
}

fn interface_method_ref(pool: &ConstantPool, index: u16) -> Result<MemberRef, Error> {
    match pool.get(index)? {
        Constant::InterfaceMethodRef(member) => Ok(member.clone()),
        _ => Err(FormatError::WrongConstantKind {
            index,
            expected: "InterfaceMethodref",
        }
        .into()),
    }
}

/// Inverse of the assembler's one-byte opcode table
fn simple_instruction(opcode: u8) -> Option<Instruction> {
    use Instruction::*;
    Some(match opcode {
        0x00 => Nop,
        0x01 => AConstNull,
        0x2e => IALoad,
        0x2f => LALoad,
        0x30 => FALoad,
        0x31 => DALoad,
        0x32 => AALoad,
        0x33 => BALoad,
        0x34 => CALoad,
        0x35 => SALoad,
        0x4f => IAStore,
        0x50 => LAStore,
        0x51 => FAStore,
        0x52 => DAStore,
        0x53 => AAStore,
        0x54 => BAStore,
        0x55 => CAStore,
        0x56 => SAStore,
        0x57 => Pop,
        0x58 => Pop2,
        0x59 => Dup,
        0x5a => DupX1,
        0x5b => DupX2,
        0x5c => Dup2,
        0x5d => Dup2X1,
        0x5e => Dup2X2,
        0x5f => Swap,
        0x60 => IAdd,
        0x61 => LAdd,
        0x62 => FAdd,
        0x63 => DAdd,
        0x64 => ISub,
        0x65 => LSub,
        0x66 => FSub,
        0x67 => DSub,
        0x68 => IMul,
        0x69 => LMul,
        0x6a => FMul,
        0x6b => DMul,
        0x6c => IDiv,
        0x6d => LDiv,
        0x6e => FDiv,
        0x6f => DDiv,
        0x70 => IRem,
        0x71 => LRem,
        0x72 => FRem,
        0x73 => DRem,
        0x74 => INeg,
        0x75 => LNeg,
        0x76 => FNeg,
        0x77 => DNeg,
        0x78 => IShl,
        0x79 => LShl,
        0x7a => IShr,
        0x7b => LShr,
        0x7c => IUShr,
        0x7d => LUShr,
        0x7e => IAnd,
        0x7f => LAnd,
        0x80 => IOr,
        0x81 => LOr,
        0x82 => IXor,
        0x83 => LXor,
        0x85 => I2L,
        0x86 => I2F,
        0x87 => I2D,
        0x88 => L2I,
        0x89 => L2F,
        0x8a => L2D,
        0x8b => F2I,
        0x8c => F2L,
        0x8d => F2D,
        0x8e => D2I,
        0x8f => D2L,
        0x90 => D2F,
        0x91 => I2B,
        0x92 => I2C,
        0x93 => I2S,
        0x94 => LCmp,
        0x95 => FCmpL,
        0x96 => FCmpG,
        0x97 => DCmpL,
        0x98 => DCmpG,
        0xac => IReturn,
        0xad => LReturn,
        0xae => FReturn,
        0xaf => DReturn,
        0xb0 => AReturn,
        0xb1 => Return,
        0xbe => ArrayLength,
        0xbf => AThrow,
        0xc2 => MonitorEnter,
        0xc3 => MonitorExit,
        _ => return None,
    })
}

fn render(op: &RawOp) -> String {
    match op {
        RawOp::Plain(insn) => render_plain(insn),
        RawOp::Load(kind, slot) => format!("{}load {}", kind_prefix(*kind), slot),
        RawOp::Store(kind, slot) => format!("{}store {}", kind_prefix(*kind), slot),
        RawOp::Inc(slot, delta) => format!("iinc {} {}", slot, delta),
        RawOp::Ret(slot) => format!("ret {}", slot),
        RawOp::Branch(kind, target) => format!("{} {}", kind.mnemonic(), target),
        RawOp::Jsr(target) => format!("jsr {}", target),
        RawOp::Switch {
            dense,
            default,
            cases,
        } => {
            let mut out = String::from(if *dense { "tableswitch {" } else { "lookupswitch {" });
            for (key, target) in cases {
                out.push_str(&format!(" {}: {},", key, target));
            }
            out.push_str(&format!(" default: {} }}", default));
            out
        }
    }
}

fn render_plain(insn: &Instruction) -> String {
    let member = |m: &MemberRef| format!("{}.{}:{}", m.class, m.name, m.descriptor);
    match insn {
        Instruction::Push(constant) => format!("push {}", constant),
        Instruction::GetStatic(m)
        | Instruction::PutStatic(m)
        | Instruction::GetField(m)
        | Instruction::PutField(m)
        | Instruction::InvokeVirtual(m)
        | Instruction::InvokeSpecial(m)
        | Instruction::InvokeStatic(m)
        | Instruction::InvokeInterface(m) => format!("{} {}", insn.mnemonic(), member(m)),
        Instruction::InvokeDynamic {
            bootstrap_method,
            name,
            descriptor,
        } => format!("invokedynamic #{} {}:{}", bootstrap_method, name, descriptor),
        Instruction::New(class)
        | Instruction::ANewArray(class)
        | Instruction::CheckCast(class)
        | Instruction::InstanceOf(class) => format!("{} {}", insn.mnemonic(), class),
        Instruction::NewArray(base) => format!("newarray {}", base_name(*base)),
        Instruction::MultiANewArray { class, dimensions } => {
            format!("multianewarray {} {}", class, dimensions)
        }
        other => other.mnemonic().to_string(),
    }
}

fn kind_prefix(kind: VarKind) -> char {
    match kind {
        VarKind::Int => 'i',
        VarKind::Long => 'l',
        VarKind::Float => 'f',
        VarKind::Double => 'd',
        VarKind::Reference | VarKind::ReturnAddress => 'a',
    }
}

fn base_name(base: BaseType) -> &'static str {
    match base {
        BaseType::Boolean => "boolean",
        BaseType::Char => "char",
        BaseType::Float => "float",
        BaseType::Double => "double",
        BaseType::Byte => "byte",
        BaseType::Short => "short",
        BaseType::Int => "int",
        BaseType::Long => "long",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Version;

    fn empty_pool() -> ConstantPool {
        ConstantPool::from_entries(vec![], Version::JAVA8)
    }

    #[test]
    fn straight_line_code_decodes() {
        // iconst_2; bipush 100; iadd; ireturn
        let code = [0x05, 0x10, 0x64, 0x60, 0xac];
        let body = CodeBody::disassemble(&code, &[], &empty_pool()).unwrap();
        assert_eq!(
            body.instructions(),
            &[
                Instruction::Push(Constant::Integer(2)),
                Instruction::Push(Constant::Integer(100)),
                Instruction::IAdd,
                Instruction::IReturn,
            ]
        );
    }

    #[test]
    fn branch_targets_become_labels() {
        // iconst_0; ifeq +5 (-> return); iconst_1; pop; return
        let code = [0x03, 0x99, 0x00, 0x05, 0x04, 0x57, 0xb1];
        let body = CodeBody::disassemble(&code, &[], &empty_pool()).unwrap();
        // The label lands right before the final return
        assert!(matches!(
            body.instructions()[1],
            Instruction::Branch(BranchKind::IfEq, _)
        ));
        assert!(matches!(body.instructions()[4], Instruction::Label(_)));
        assert!(matches!(body.instructions()[5], Instruction::Return));
    }

    #[test]
    fn wide_forms_decode() {
        // wide iload 256; wide iinc 256 300; return
        let code = [
            0xc4, 0x15, 0x01, 0x00, 0xc4, 0x84, 0x01, 0x00, 0x01, 0x2c, 0xb1,
        ];
        let body = CodeBody::disassemble(&code, &[], &empty_pool()).unwrap();
        assert!(matches!(body.instructions()[0], Instruction::Load(_)));
        assert!(matches!(body.instructions()[1], Instruction::Inc(_, 300)));
    }

    #[test]
    fn ldc_resolves_through_the_pool() {
        let pool = ConstantPool::from_entries(
            vec![Constant::String("hi".to_string()), Constant::Utf8("hi".to_string())],
            Version::JAVA8,
        );
        // ldc #1; pop; return
        let code = [0x12, 0x01, 0x57, 0xb1];
        let body = CodeBody::disassemble(&code, &[], &pool).unwrap();
        assert_eq!(
            body.instructions()[0],
            Instruction::Push(Constant::String("hi".to_string()))
        );
    }

    #[test]
    fn exception_rows_become_try_catch_markers() {
        let pool = ConstantPool::from_entries(
            vec![
                Constant::Class("java/lang/Exception".to_string()),
                Constant::Utf8("java/lang/Exception".to_string()),
            ],
            Version::JAVA8,
        );
        // nop; nop; return | athrow handler at 3
        let code = [0x00, 0x00, 0xb1, 0xbf];
        let rows = [ExceptionHandler {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 3,
            catch_type: 1,
        }];
        let body = CodeBody::disassemble(&code, &rows, &pool).unwrap();
        assert!(matches!(body.instructions()[0], Instruction::Try));
        assert!(matches!(
            &body.instructions()[3],
            Instruction::Catch { start: 0, class: Some(class), .. }
                if class == "java/lang/Exception"
        ));
    }

    #[test]
    fn unknown_opcode_is_a_format_error() {
        let code = [0xcb];
        assert!(matches!(
            CodeBody::disassemble(&code, &[], &empty_pool()),
            Err(Error::Format(FormatError::BadOpcode {
                opcode: 0xcb,
                offset: 0
            }))
        ));
    }

    #[test]
    fn branch_into_an_operand_is_rejected() {
        // goto +2 lands in the middle of the bipush
        let code = [0xa7, 0x00, 0x02, 0x10, 0x07, 0xb1];
        assert!(matches!(
            CodeBody::disassemble(&code, &[], &empty_pool()),
            Err(Error::Format(FormatError::BadJumpTarget(2)))
        ));
    }

    #[test]
    fn lookupswitch_decodes_with_padding() {
        // iconst_0 at 0, lookupswitch at 1: two padding bytes, one pair; the return sits at
        // offset 20, so every displacement is 19 relative to the switch opcode
        let mut code = vec![0x03, 0xab, 0, 0];
        code.extend_from_slice(&19i32.to_be_bytes()); // default
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&7i32.to_be_bytes());
        code.extend_from_slice(&19i32.to_be_bytes());
        code.push(0xb1);
        let body = CodeBody::disassemble(&code, &[], &empty_pool()).unwrap();
        match &body.instructions()[1] {
            Instruction::Switch(table) => assert_eq!(table.cases.len(), 1),
            other => panic!("expected a switch, got {:?}", other),
        }
    }
}
