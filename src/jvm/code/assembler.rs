//! Turning a verified body into byte code
//!
//! Assembly runs in the three passes the engine promises:
//!
//! 1. *registration* (see [`CodeBody::register_constants`]) feeds the constant pool;
//! 2. *layout* repeatedly assigns offsets as running size sums and recomputes every
//!    instruction's size against the frozen pool, the assigned variable slots, and the current
//!    offsets, until a whole pass changes nothing;
//! 3. *emission* writes the final bytes and derives the exception table and debug tables.
//!
//! Sizes never shrink across layout passes (encodings only widen as real offsets and indices
//! replace optimistic guesses), so the fixed point is reached quickly; switch padding is the only
//! offset-dependent width.

use crate::jvm::code::{
    check_assignment, AssignmentCheck, CodeBody, FlowInfo, InsnIdx, Instruction, LabelId,
    SwitchTable, VarDecl, VarId, VarKind,
};
use crate::jvm::{descriptors, CapacityError, Constant, ContractError, Error};
use std::collections::HashSet;

/// Knobs for the assembly pipeline
#[derive(Copy, Clone, Debug)]
pub struct AssembleOptions {
    /// What to do when a variable may be read before every path assigned it
    pub assignment: AssignmentCheck,
}

impl Default for AssembleOptions {
    fn default() -> AssembleOptions {
        AssembleOptions {
            assignment: AssignmentCheck::Lenient,
        }
    }
}

/// One emitted exception-table row, still carrying the class by name
pub struct ExceptionRow {
    pub start: u16,
    pub end: u16,
    pub handler: u16,
    pub class: Option<String>,
}

/// One emitted local-variable debug row
pub struct LocalVarRow {
    pub start: u16,
    pub length: u16,
    pub name: String,
    pub descriptor: String,
    pub slot: u16,
}

/// Everything a `Code` attribute needs, fully resolved
pub struct CodeOutput {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytes: Vec<u8>,
    pub exception_table: Vec<ExceptionRow>,
    pub line_numbers: Vec<(u16, u16)>,
    pub local_vars: Vec<LocalVarRow>,
}

impl CodeBody {
    /// Registration pass: enter every constant this body's instructions need into the pool
    pub fn register_constants(
        &self,
        pool: &mut crate::jvm::ConstantPool,
    ) -> Result<(), Error> {
        for insn in &self.insns {
            insn.register_constants(pool)?;
        }
        Ok(())
    }

    /// Verify, lay out, and emit this body against an already-frozen pool
    ///
    /// The method descriptor and staticness decide how many leading local slots the caller fills
    /// in, which the definite-assignment pass treats as assigned.
    pub fn assemble(
        &self,
        method_descriptor: &str,
        is_static: bool,
        pool: &crate::jvm::ConstantPool,
        options: &AssembleOptions,
    ) -> Result<CodeOutput, Error> {
        assemble_method(self, method_descriptor, is_static, pool, options)
    }
}

/// Verify, lay out, and emit one method body
fn assemble_method(
    body: &CodeBody,
    method_descriptor: &str,
    is_static: bool,
    pool: &crate::jvm::ConstantPool,
    options: &AssembleOptions,
) -> Result<CodeOutput, Error> {
    check_labels_placed(body)?;

    let mut flow = FlowInfo::analyze(body)?;
    let mut slots = assign_slots(body, &mut flow)?;
    let param_words = descriptors::parameter_words(method_descriptor, is_static)?;

    // Definite assignment only means something for bodies with in-stream declarations;
    // disassembled code carries bare slots and no scope information
    if body.insns.iter().any(|insn| matches!(insn, Instruction::Declare(_))) {
        check_assignment(
            body,
            &flow,
            &mut slots.label_scopes,
            &slots.slot,
            param_words,
            options.assignment,
        )?;
    }

    let (offsets, sizes, code_len) = layout(body, &flow, &slots.slot, pool)?;
    let bytes = emit(body, &slots.slot, pool, &offsets, &sizes)?;
    debug_assert_eq!(bytes.len(), code_len as usize);

    let exception_table = exception_rows(body, &flow, &offsets)?;
    let line_numbers = line_rows(body, &sizes, &offsets);
    let local_vars = local_var_rows(body, &flow, &slots, &offsets, &sizes, code_len, param_words);

    let max_stack = u16::try_from(flow.max_stack)
        .map_err(|_| CapacityError::MaxStackOverflow(flow.max_stack as usize))?;

    Ok(CodeOutput {
        max_stack,
        max_locals: slots.max_locals,
        bytes,
        exception_table,
        line_numbers,
        local_vars,
    })
}

/// Every branch, switch, call, and handler target must be a placed label
fn check_labels_placed(body: &CodeBody) -> Result<(), Error> {
    let check = |label: LabelId| -> Result<(), Error> {
        if body.label_position(label).is_some() {
            Ok(())
        } else {
            Err(ContractError::UnplacedLabel(label).into())
        }
    };
    for insn in &body.insns {
        match insn {
            Instruction::Branch(_, label) | Instruction::Jsr(label) => check(*label)?,
            Instruction::Catch { handler, .. } => check(*handler)?,
            Instruction::Switch(table) => {
                check(table.default)?;
                for (_, label) in &table.cases {
                    check(*label)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

struct SlotInfo {
    /// Absolute slot per variable
    slot: Vec<u16>,
    max_locals: u16,
    /// In-scope declared variables at each label, snapshotted in program order
    label_scopes: Vec<Option<HashSet<VarId>>>,
    /// The `End` closing each in-stream declaration's scope
    scope_end: Vec<Option<InsnIdx>>,
}

/// Scope-stack walk assigning local-variable slots
///
/// Slots are handed out *relative to the code context* the declaration executes in; a `Begin`
/// snapshots all context counters and the matching `End` restores them, so sibling scopes reuse
/// slots. Subroutine contexts then get a base slot past anything live at any call site, in depth
/// order, and absolute slot = base + relative.
fn assign_slots(body: &CodeBody, flow: &mut FlowInfo) -> Result<SlotInfo, Error> {
    let context_count = flow.contexts.len();
    let var_count = body.vars.len();

    let mut counters = vec![0u32; context_count];
    let mut scope_stack: Vec<(Vec<u32>, Vec<VarId>)> = Vec::new();
    let mut relative: Vec<Option<u32>> = vec![None; var_count];
    let mut open: Vec<bool> = vec![false; var_count];
    let mut in_scope: HashSet<VarId> = HashSet::new();
    let mut jsr_first: Vec<Option<u32>> = vec![None; body.insns.len()];
    let mut label_scopes: Vec<Option<HashSet<VarId>>> = vec![None; body.labels.len()];
    let mut scope_end: Vec<Option<InsnIdx>> = vec![None; var_count];

    for (idx, insn) in body.insns.iter().enumerate() {
        match insn {
            Instruction::Begin => {
                scope_stack.push((counters.clone(), Vec::new()));
            }

            Instruction::End => {
                let (snapshot, declared) = scope_stack
                    .pop()
                    .ok_or(ContractError::EndWithoutBegin)?;
                for var in declared {
                    in_scope.remove(&var);
                    open[var.0 as usize] = false;
                    scope_end[var.0 as usize] = Some(idx);
                }
                counters = snapshot;
            }

            Instruction::Declare(var) => {
                let slot = var.0 as usize;
                let ctx = flow.var_ctx[slot];
                relative[slot] = Some(counters[ctx]);
                counters[ctx] += body.vars[slot].kind.width() as u32;

                let frame = scope_stack
                    .last_mut()
                    .ok_or(ContractError::DeclareOutsideScope(*var))?;
                frame.1.push(*var);
                in_scope.insert(*var);
                open[slot] = true;
            }

            Instruction::Load(var)
            | Instruction::Store(var)
            | Instruction::Inc(var, _)
            | Instruction::Ret(var) => {
                let slot = var.0 as usize;
                if body.vars[slot].preset_slot.is_none() && !open[slot] {
                    return Err(ContractError::VariableOutOfScope(*var).into());
                }
            }

            Instruction::Jsr(_) => {
                if let Some(ctx) = flow.jsr_ctx[idx] {
                    jsr_first[idx] = Some(counters[ctx]);
                }
            }

            Instruction::Label(label) => {
                label_scopes[label.0 as usize] = Some(in_scope.clone());
            }

            _ => {}
        }
    }
    if !scope_stack.is_empty() {
        return Err(ContractError::BeginWithoutEnd.into());
    }

    // Base slot per context: past everything live at any call site, resolved shallowest first
    let mut order: Vec<usize> = (0..context_count).collect();
    order.sort_by_key(|ctx| flow.contexts[*ctx].depth);
    for ctx in order {
        if flow.contexts[ctx].entry.is_none() {
            continue;
        }
        let mut first: u32 = 0;
        let callers = flow.contexts[ctx].callers.clone();
        for jsr in callers {
            let caller_ctx = flow.jsr_ctx[jsr].expect("recorded caller is reachable");
            let base = flow.contexts[caller_ctx].first_slot as u32
                + jsr_first[jsr].expect("caller seen in slot pass");
            first = first.max(base);
        }
        flow.contexts[ctx].first_slot = u16::try_from(first)
            .map_err(|_| CapacityError::MaxLocalsOverflow(first as usize))?;
    }

    let mut slot = vec![0u16; var_count];
    let mut max_locals: u32 = 0;
    for (index, decl) in body.vars.iter().enumerate() {
        let width = decl.kind.width() as u32;
        let absolute: u32 = if let Some(preset) = decl.preset_slot {
            preset as u32
        } else if let Some(relative_slot) = relative[index] {
            flow.contexts[flow.var_ctx[index]].first_slot as u32 + relative_slot
        } else {
            // Created but never declared or used; it occupies nothing
            continue;
        };
        if absolute + width > 0xFFFF {
            return Err(CapacityError::MaxLocalsOverflow((absolute + width) as usize).into());
        }
        slot[index] = absolute as u16;
        max_locals = max_locals.max(absolute + width);
    }

    Ok(SlotInfo {
        slot,
        max_locals: max_locals as u16,
        label_scopes,
        scope_end,
    })
}

/// Fixed-point offset/size resolution
fn layout(
    body: &CodeBody,
    flow: &FlowInfo,
    slots: &[u16],
    pool: &crate::jvm::ConstantPool,
) -> Result<(Vec<u32>, Vec<u32>, u32), Error> {
    let insn_count = body.insns.len();
    let mut offsets = vec![0u32; insn_count];
    let mut sizes = vec![0u32; insn_count];
    let mut passes = 0usize;

    let code_len = loop {
        passes += 1;
        let mut changed = false;
        let mut offset: u32 = 0;
        for idx in 0..insn_count {
            if offsets[idx] != offset {
                offsets[idx] = offset;
                changed = true;
            }
            let insn = &body.insns[idx];
            // Unreachable real instructions are dead code and emit nothing
            let size = if insn.is_discardable() && !flow.reachable(idx) {
                0
            } else {
                encoded_size(insn, pool, slots, offset)?
            };
            if sizes[idx] != size {
                sizes[idx] = size;
                changed = true;
            }
            offset += size;
        }
        if !changed {
            break offset;
        }
    };
    log::debug!("code layout converged after {} passes", passes);

    if code_len > 0xFFFF {
        return Err(CapacityError::CodeTooLarge(code_len as usize).into());
    }
    Ok((offsets, sizes, code_len))
}

fn emit(
    body: &CodeBody,
    slots: &[u16],
    pool: &crate::jvm::ConstantPool,
    offsets: &[u32],
    sizes: &[u32],
) -> Result<Vec<u8>, Error> {
    let mut out: Vec<u8> = Vec::with_capacity(offsets.len());
    let label_offset = |label: LabelId| -> u32 {
        offsets[body.label_position(label).expect("labels checked placed")]
    };

    for (idx, insn) in body.insns.iter().enumerate() {
        if sizes[idx] == 0 {
            continue;
        }
        encode_insn(
            insn,
            offsets[idx],
            pool,
            slots,
            &body.vars,
            &label_offset,
            &mut out,
        )?;
    }
    Ok(out)
}

fn exception_rows(
    body: &CodeBody,
    flow: &FlowInfo,
    offsets: &[u32],
) -> Result<Vec<ExceptionRow>, Error> {
    let mut rows = Vec::new();
    for (idx, insn) in body.insns.iter().enumerate() {
        if let Instruction::Catch {
            start,
            class,
            handler,
        } = insn
        {
            // A row guards nothing unless its section start survived verification
            if !flow.reachable(*start) {
                continue;
            }
            let handler_idx = body.label_position(*handler).expect("handler placed");
            rows.push(ExceptionRow {
                start: offsets[*start] as u16,
                end: offsets[idx] as u16,
                handler: offsets[handler_idx] as u16,
                class: class.clone(),
            });
        }
    }
    Ok(rows)
}

fn line_rows(body: &CodeBody, sizes: &[u32], offsets: &[u32]) -> Vec<(u16, u16)> {
    let mut rows = Vec::new();
    let mut previous: u16 = 0;
    for (idx, line) in body.lines.iter().enumerate() {
        if *line != previous && *line > 0 && sizes[idx] > 0 {
            rows.push((offsets[idx] as u16, *line));
            previous = *line;
        }
    }
    rows
}

fn local_var_rows(
    body: &CodeBody,
    flow: &FlowInfo,
    slots: &SlotInfo,
    offsets: &[u32],
    sizes: &[u32],
    code_len: u32,
    param_words: u16,
) -> Vec<LocalVarRow> {
    let mut rows = Vec::new();
    for (index, decl) in body.vars.iter().enumerate() {
        let debug = match (&decl.debug, decl.preset_slot) {
            (Some(debug), None) => debug,
            _ => continue,
        };
        let var = VarId(index as u32);

        // The variable is observable from its first definite assignment onwards
        let declare_at = body
            .insns
            .iter()
            .position(|insn| matches!(insn, Instruction::Declare(v) if *v == var));
        let first_store = body.insns.iter().enumerate().position(|(idx, insn)| {
            matches!(insn, Instruction::Store(v) if *v == var) && flow.reachable(idx)
        });

        let start = if slots.slot[index] < param_words {
            declare_at.map(|idx| offsets[idx])
        } else {
            first_store.map(|idx| offsets[idx] + sizes[idx])
        };
        let start = match start {
            Some(start) => start,
            None => continue,
        };
        let end = slots.scope_end[index]
            .map(|idx| offsets[idx])
            .unwrap_or(code_len);
        if end < start {
            continue;
        }
        rows.push(LocalVarRow {
            start: start as u16,
            length: (end - start) as u16,
            name: debug.name.clone(),
            descriptor: debug.descriptor.clone(),
            slot: slots.slot[index],
        });
    }
    rows
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// How a pushed literal will be encoded, given the frozen pool
enum LiteralForm {
    IConst(i32),
    BiPush(i8),
    SiPush(i16),
    LConst(u8),
    FConst(u8),
    DConst(u8),
    Ldc(u8),
    LdcW(u16),
    Ldc2W(u16),
}

impl LiteralForm {
    fn size(&self) -> u32 {
        match self {
            LiteralForm::IConst(_)
            | LiteralForm::LConst(_)
            | LiteralForm::FConst(_)
            | LiteralForm::DConst(_) => 1,
            LiteralForm::BiPush(_) | LiteralForm::Ldc(_) => 2,
            LiteralForm::SiPush(_) | LiteralForm::LdcW(_) | LiteralForm::Ldc2W(_) => 3,
        }
    }
}

/// Pick the smallest encoding of a literal load
///
/// The pool-reference forms depend on the constant's *final* index, which is why layout runs
/// against a frozen pool.
fn literal_form(
    constant: &Constant,
    pool: &crate::jvm::ConstantPool,
) -> Result<LiteralForm, Error> {
    Ok(match constant {
        Constant::Integer(value) => {
            if (-1..=5).contains(value) {
                LiteralForm::IConst(*value)
            } else if let Ok(byte) = i8::try_from(*value) {
                LiteralForm::BiPush(byte)
            } else if let Ok(short) = i16::try_from(*value) {
                LiteralForm::SiPush(short)
            } else {
                narrow_ldc(pool.index_of(constant)?)
            }
        }
        Constant::Float(value) => {
            let bits = value.to_bits();
            if bits == 0f32.to_bits() {
                LiteralForm::FConst(0)
            } else if bits == 1f32.to_bits() {
                LiteralForm::FConst(1)
            } else if bits == 2f32.to_bits() {
                LiteralForm::FConst(2)
            } else {
                narrow_ldc(pool.index_of(constant)?)
            }
        }
        Constant::Long(value) => match value {
            0 => LiteralForm::LConst(0),
            1 => LiteralForm::LConst(1),
            _ => LiteralForm::Ldc2W(pool.index_of(constant)?),
        },
        Constant::Double(value) => {
            let bits = value.to_bits();
            if bits == 0f64.to_bits() {
                LiteralForm::DConst(0)
            } else if bits == 1f64.to_bits() {
                LiteralForm::DConst(1)
            } else {
                LiteralForm::Ldc2W(pool.index_of(constant)?)
            }
        }
        other if other.loads_wide() => LiteralForm::Ldc2W(pool.index_of(other)?),
        other => narrow_ldc(pool.index_of(other)?),
    })
}

fn narrow_ldc(index: u16) -> LiteralForm {
    match u8::try_from(index) {
        Ok(byte) => LiteralForm::Ldc(byte),
        Err(_) => LiteralForm::LdcW(index),
    }
}

/// Single-byte opcode for the instructions that have one
fn simple_opcode(insn: &Instruction) -> Option<u8> {
    use Instruction::*;
    Some(match insn {
        Nop => 0x00,
        AConstNull => 0x01,
        IALoad => 0x2e,
        LALoad => 0x2f,
        FALoad => 0x30,
        DALoad => 0x31,
        AALoad => 0x32,
        BALoad => 0x33,
        CALoad => 0x34,
        SALoad => 0x35,
        IAStore => 0x4f,
        LAStore => 0x50,
        FAStore => 0x51,
        DAStore => 0x52,
        AAStore => 0x53,
        BAStore => 0x54,
        CAStore => 0x55,
        SAStore => 0x56,
        Pop => 0x57,
        Pop2 => 0x58,
        Dup => 0x59,
        DupX1 => 0x5a,
        DupX2 => 0x5b,
        Dup2 => 0x5c,
        Dup2X1 => 0x5d,
        Dup2X2 => 0x5e,
        Swap => 0x5f,
        IAdd => 0x60,
        LAdd => 0x61,
        FAdd => 0x62,
        DAdd => 0x63,
        ISub => 0x64,
        LSub => 0x65,
        FSub => 0x66,
        DSub => 0x67,
        IMul => 0x68,
        LMul => 0x69,
        FMul => 0x6a,
        DMul => 0x6b,
        IDiv => 0x6c,
        LDiv => 0x6d,
        FDiv => 0x6e,
        DDiv => 0x6f,
        IRem => 0x70,
        LRem => 0x71,
        FRem => 0x72,
        DRem => 0x73,
        INeg => 0x74,
        LNeg => 0x75,
        FNeg => 0x76,
        DNeg => 0x77,
        IShl => 0x78,
        LShl => 0x79,
        IShr => 0x7a,
        LShr => 0x7b,
        IUShr => 0x7c,
        LUShr => 0x7d,
        IAnd => 0x7e,
        LAnd => 0x7f,
        IOr => 0x80,
        LOr => 0x81,
        IXor => 0x82,
        LXor => 0x83,
        I2L => 0x85,
        I2F => 0x86,
        I2D => 0x87,
        L2I => 0x88,
        L2F => 0x89,
        L2D => 0x8a,
        F2I => 0x8b,
        F2L => 0x8c,
        F2D => 0x8d,
        D2I => 0x8e,
        D2L => 0x8f,
        D2F => 0x90,
        I2B => 0x91,
        I2C => 0x92,
        I2S => 0x93,
        LCmp => 0x94,
        FCmpL => 0x95,
        FCmpG => 0x96,
        DCmpL => 0x97,
        DCmpG => 0x98,
        IReturn => 0xac,
        LReturn => 0xad,
        FReturn => 0xae,
        DReturn => 0xaf,
        AReturn => 0xb0,
        Return => 0xb1,
        ArrayLength => 0xbe,
        AThrow => 0xbf,
        MonitorEnter => 0xc2,
        MonitorExit => 0xc3,
        _ => return None,
    })
}

fn var_access_size(slot: u16) -> u32 {
    match slot {
        0..=3 => 1,
        4..=255 => 2,
        _ => 4,
    }
}

/// Encoded width of one instruction at a given offset, against the frozen pool
fn encoded_size(
    insn: &Instruction,
    pool: &crate::jvm::ConstantPool,
    slots: &[u16],
    at: u32,
) -> Result<u32, Error> {
    Ok(match insn {
        _ if insn.is_pseudo() => 0,
        _ if simple_opcode(insn).is_some() => 1,

        Instruction::Push(constant) => literal_form(constant, pool)?.size(),

        Instruction::Load(var) | Instruction::Store(var) => {
            var_access_size(slots[var.0 as usize])
        }
        Instruction::Inc(var, delta) => {
            if slots[var.0 as usize] <= 255 && i8::try_from(*delta).is_ok() {
                3
            } else {
                6
            }
        }
        Instruction::Ret(var) => {
            if slots[var.0 as usize] <= 255 {
                2
            } else {
                4
            }
        }

        Instruction::Branch(_, _) | Instruction::Jsr(_) => 3,
        Instruction::Switch(table) => switch_size(table, at),

        Instruction::GetStatic(_)
        | Instruction::PutStatic(_)
        | Instruction::GetField(_)
        | Instruction::PutField(_)
        | Instruction::InvokeVirtual(_)
        | Instruction::InvokeSpecial(_)
        | Instruction::InvokeStatic(_)
        | Instruction::New(_)
        | Instruction::ANewArray(_)
        | Instruction::CheckCast(_)
        | Instruction::InstanceOf(_) => 3,

        Instruction::InvokeInterface(_) | Instruction::InvokeDynamic { .. } => 5,
        Instruction::NewArray(_) => 2,
        Instruction::MultiANewArray { .. } => 4,

        other => unreachable!("instruction {:?} has no encoding", other),
    })
}

/// Dense (`tableswitch`) vs sparse (`lookupswitch`) selection: dense wins when the value range
/// is at most four times the case count. Degenerate tables always take the sparse form.
fn switch_is_dense(table: &SwitchTable) -> bool {
    if table.cases.len() <= 1 {
        return false;
    }
    let low = table.cases.first().expect("nonempty").0 as i64;
    let high = table.cases.last().expect("nonempty").0 as i64;
    let range = high - low + 1;
    range as f64 / table.cases.len() as f64 <= 4.0
}

fn switch_size(table: &SwitchTable, at: u32) -> u32 {
    let padding = 3 - (at % 4);
    if switch_is_dense(table) {
        let low = table.cases.first().expect("nonempty").0 as i64;
        let high = table.cases.last().expect("nonempty").0 as i64;
        let range = (high - low + 1) as u32;
        1 + padding + 12 + 4 * range
    } else {
        1 + padding + 8 + 8 * table.cases.len() as u32
    }
}

fn encode_insn(
    insn: &Instruction,
    at: u32,
    pool: &crate::jvm::ConstantPool,
    slots: &[u16],
    vars: &[VarDecl],
    label_offset: &dyn Fn(LabelId) -> u32,
    out: &mut Vec<u8>,
) -> Result<(), Error> {
    if let Some(opcode) = simple_opcode(insn) {
        out.push(opcode);
        return Ok(());
    }

    match insn {
        Instruction::Push(constant) => match literal_form(constant, pool)? {
            LiteralForm::IConst(value) => out.push((0x03 + value) as u8),
            LiteralForm::BiPush(value) => {
                out.push(0x10);
                out.push(value as u8);
            }
            LiteralForm::SiPush(value) => {
                out.push(0x11);
                out.extend_from_slice(&value.to_be_bytes());
            }
            LiteralForm::LConst(which) => out.push(0x09 + which),
            LiteralForm::FConst(which) => out.push(0x0b + which),
            LiteralForm::DConst(which) => out.push(0x0e + which),
            LiteralForm::Ldc(index) => {
                out.push(0x12);
                out.push(index);
            }
            LiteralForm::LdcW(index) => {
                out.push(0x13);
                out.extend_from_slice(&index.to_be_bytes());
            }
            LiteralForm::Ldc2W(index) => {
                out.push(0x14);
                out.extend_from_slice(&index.to_be_bytes());
            }
        },

        Instruction::Load(var) => {
            let opcodes = load_store_opcodes(vars[var.0 as usize].kind, true);
            encode_var_access(opcodes, slots[var.0 as usize], out);
        }
        Instruction::Store(var) => {
            let opcodes = load_store_opcodes(vars[var.0 as usize].kind, false);
            encode_var_access(opcodes, slots[var.0 as usize], out);
        }

        Instruction::Inc(var, delta) => {
            let slot = slots[var.0 as usize];
            match (u8::try_from(slot), i8::try_from(*delta)) {
                (Ok(slot), Ok(delta)) => {
                    out.push(0x84);
                    out.push(slot);
                    out.push(delta as u8);
                }
                _ => {
                    out.push(0xc4);
                    out.push(0x84);
                    out.extend_from_slice(&slot.to_be_bytes());
                    out.extend_from_slice(&delta.to_be_bytes());
                }
            }
        }

        Instruction::Ret(var) => {
            let slot = slots[var.0 as usize];
            match u8::try_from(slot) {
                Ok(slot) => {
                    out.push(0xa9);
                    out.push(slot);
                }
                Err(_) => {
                    out.push(0xc4);
                    out.push(0xa9);
                    out.extend_from_slice(&slot.to_be_bytes());
                }
            }
        }

        Instruction::Branch(kind, label) => {
            out.push(kind.opcode());
            write_branch_offset(label_offset(*label), at, out)?;
        }
        Instruction::Jsr(label) => {
            out.push(0xa8);
            write_branch_offset(label_offset(*label), at, out)?;
        }

        Instruction::Switch(table) => encode_switch(table, at, label_offset, out),

        Instruction::GetStatic(member) => {
            out.push(0xb2);
            write_index(pool.index_of(&Constant::FieldRef(member.clone()))?, out);
        }
        Instruction::PutStatic(member) => {
            out.push(0xb3);
            write_index(pool.index_of(&Constant::FieldRef(member.clone()))?, out);
        }
        Instruction::GetField(member) => {
            out.push(0xb4);
            write_index(pool.index_of(&Constant::FieldRef(member.clone()))?, out);
        }
        Instruction::PutField(member) => {
            out.push(0xb5);
            write_index(pool.index_of(&Constant::FieldRef(member.clone()))?, out);
        }
        Instruction::InvokeVirtual(member) => {
            out.push(0xb6);
            write_index(pool.index_of(&Constant::MethodRef(member.clone()))?, out);
        }
        Instruction::InvokeSpecial(member) => {
            out.push(0xb7);
            write_index(pool.index_of(&Constant::MethodRef(member.clone()))?, out);
        }
        Instruction::InvokeStatic(member) => {
            out.push(0xb8);
            write_index(pool.index_of(&Constant::MethodRef(member.clone()))?, out);
        }
        Instruction::InvokeInterface(member) => {
            out.push(0xb9);
            write_index(
                pool.index_of(&Constant::InterfaceMethodRef(member.clone()))?,
                out,
            );
            let (arg_words, _) = descriptors::method_widths(&member.descriptor)?;
            let count = u8::try_from(1 + arg_words)
                .map_err(|_| ContractError::BadDescriptor(member.descriptor.clone()))?;
            out.push(count);
            out.push(0);
        }
        Instruction::InvokeDynamic {
            bootstrap_method,
            name,
            descriptor,
        } => {
            out.push(0xba);
            write_index(
                pool.index_of(&Constant::InvokeDynamic {
                    bootstrap_method: *bootstrap_method,
                    name: name.clone(),
                    descriptor: descriptor.clone(),
                })?,
                out,
            );
            out.push(0);
            out.push(0);
        }

        Instruction::New(class) => {
            out.push(0xbb);
            write_index(pool.index_of(&Constant::Class(class.clone()))?, out);
        }
        Instruction::NewArray(base) => {
            out.push(0xbc);
            out.push(base.atype());
        }
        Instruction::ANewArray(class) => {
            out.push(0xbd);
            write_index(pool.index_of(&Constant::Class(class.clone()))?, out);
        }
        Instruction::CheckCast(class) => {
            out.push(0xc0);
            write_index(pool.index_of(&Constant::Class(class.clone()))?, out);
        }
        Instruction::InstanceOf(class) => {
            out.push(0xc1);
            write_index(pool.index_of(&Constant::Class(class.clone()))?, out);
        }
        Instruction::MultiANewArray { class, dimensions } => {
            out.push(0xc5);
            write_index(pool.index_of(&Constant::Class(class.clone()))?, out);
            out.push(*dimensions);
        }

        other => debug_assert!(other.is_pseudo(), "unencoded instruction {:?}", other),
    }
    Ok(())
}

/// Load/store opcode pair: (short-form base for slots 0-3, normal one-byte-operand form)
fn load_store_opcodes(kind: VarKind, load: bool) -> (u8, u8) {
    if load {
        match kind {
            VarKind::Int => (0x1a, 0x15),
            VarKind::Long => (0x1e, 0x16),
            VarKind::Float => (0x22, 0x17),
            VarKind::Double => (0x26, 0x18),
            VarKind::Reference | VarKind::ReturnAddress => (0x2a, 0x19),
        }
    } else {
        match kind {
            VarKind::Int => (0x3b, 0x36),
            VarKind::Long => (0x3f, 0x37),
            VarKind::Float => (0x43, 0x38),
            VarKind::Double => (0x47, 0x39),
            VarKind::Reference | VarKind::ReturnAddress => (0x4b, 0x3a),
        }
    }
}

/// The load/store pattern: special bytes for slots 0-3, a one-byte operand up to 255, and the
/// `wide` prefix with a two-byte operand beyond that
fn encode_var_access((short_base, normal): (u8, u8), slot: u16, out: &mut Vec<u8>) {
    match u8::try_from(slot) {
        Ok(n @ 0..=3) => out.push(short_base + n),
        Ok(n) => {
            out.push(normal);
            out.push(n);
        }
        Err(_) => {
            out.push(0xc4);
            out.push(normal);
            out.extend_from_slice(&slot.to_be_bytes());
        }
    }
}

fn write_index(index: u16, out: &mut Vec<u8>) {
    out.extend_from_slice(&index.to_be_bytes());
}

fn write_branch_offset(target: u32, at: u32, out: &mut Vec<u8>) -> Result<(), Error> {
    let displacement = target as i64 - at as i64;
    let narrow = i16::try_from(displacement).map_err(|_| CapacityError::BranchOutOfRange {
        at: at as usize,
        displacement: displacement as isize,
    })?;
    out.extend_from_slice(&narrow.to_be_bytes());
    Ok(())
}

fn encode_switch(
    table: &SwitchTable,
    at: u32,
    label_offset: &dyn Fn(LabelId) -> u32,
    out: &mut Vec<u8>,
) {
    let wide = |label: LabelId| -> i32 { (label_offset(label) as i64 - at as i64) as i32 };
    let padding = 3 - (at % 4);

    if switch_is_dense(table) {
        out.push(0xaa);
        out.extend(std::iter::repeat(0u8).take(padding as usize));
        out.extend_from_slice(&wide(table.default).to_be_bytes());

        let low = table.cases.first().expect("nonempty").0;
        let high = table.cases.last().expect("nonempty").0;
        out.extend_from_slice(&low.to_be_bytes());
        out.extend_from_slice(&high.to_be_bytes());

        // Holes in the value range jump to the default
        let mut next_case = table.cases.iter().peekable();
        let mut value = low as i64;
        while value <= high as i64 {
            let target = match next_case.peek() {
                Some((key, label)) if *key as i64 == value => {
                    next_case.next();
                    *label
                }
                _ => table.default,
            };
            out.extend_from_slice(&wide(target).to_be_bytes());
            value += 1;
        }
    } else {
        out.push(0xab);
        out.extend(std::iter::repeat(0u8).take(padding as usize));
        out.extend_from_slice(&wide(table.default).to_be_bytes());
        out.extend_from_slice(&(table.cases.len() as i32).to_be_bytes());
        for (key, label) in &table.cases {
            out.extend_from_slice(&key.to_be_bytes());
            out.extend_from_slice(&wide(*label).to_be_bytes());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::VarDebug;
    use crate::jvm::{Constant, ConstantPool, Version};

    fn assemble(body: &CodeBody, descriptor: &str) -> Result<CodeOutput, Error> {
        let mut pool = ConstantPool::new(Version::JAVA8);
        body.register_constants(&mut pool)?;
        pool.freeze()?;
        body.assemble(descriptor, true, &pool, &AssembleOptions::default())
    }

    #[test]
    fn using_a_variable_after_its_scope_closed_is_rejected() {
        let mut body = CodeBody::new();
        body.begin().unwrap();
        let x = body.declare(VarKind::Int, None).unwrap();
        body.end().unwrap();
        body.push(Instruction::Load(x)).unwrap();
        body.push(Instruction::IReturn).unwrap();

        assert!(matches!(
            assemble(&body, "()I"),
            Err(Error::Contract(ContractError::VariableOutOfScope(_)))
        ));
    }

    #[test]
    fn line_rows_mark_each_line_change_once() {
        let mut body = CodeBody::new();
        body.set_line(10);
        body.push(Instruction::Push(Constant::Integer(1))).unwrap();
        body.set_line(11);
        body.push(Instruction::Pop).unwrap();
        body.push(Instruction::Return).unwrap();

        let output = assemble(&body, "()V").unwrap();
        assert_eq!(output.line_numbers, vec![(0, 10), (1, 11)]);
    }

    #[test]
    fn debug_variables_span_first_store_to_scope_end() {
        let mut body = CodeBody::new();
        body.begin().unwrap();
        let x = body
            .declare(
                VarKind::Int,
                Some(VarDebug {
                    name: "i".to_string(),
                    descriptor: "I".to_string(),
                }),
            )
            .unwrap();
        body.push(Instruction::Push(Constant::Integer(5))).unwrap();
        body.push(Instruction::Store(x)).unwrap();
        body.push(Instruction::Load(x)).unwrap();
        body.push(Instruction::IReturn).unwrap();
        body.end().unwrap();

        let output = assemble(&body, "()I").unwrap();
        assert_eq!(output.local_vars.len(), 1);
        let row = &output.local_vars[0];
        assert_eq!(row.name, "i");
        assert_eq!(row.descriptor, "I");
        assert_eq!(row.slot, 0);
        // iconst_5 and istore_0 precede the live range; the scope closes after ireturn
        assert_eq!((row.start, row.length), (2, 2));
    }
}
