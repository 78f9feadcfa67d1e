//! Control-flow walk over a method body
//!
//! This walks the code the way the JVM would, following every branch, and computes per
//! instruction the entry stack height (which doubles as reachability) plus the subroutine
//! structure that `jsr`/`ret` imply. A `jsr`'s stack effect is not local: the walk traces the
//! subroutine to its `ret` first, and the height at that `ret` is what the instruction after the
//! `jsr` sees. A subroutine that never reaches a `ret` turns its callers into one-way jumps.

use crate::jvm::code::{CodeBody, InsnIdx, Instruction, LabelId, VarId};
use crate::jvm::{ContractError, Error};
use std::collections::{HashMap, HashSet};

/// One code context: the main body, or one subroutine
pub(crate) struct Context {
    /// Entry label; `None` for the main context
    pub entry: Option<LabelId>,

    /// Every reachable `jsr` that calls this subroutine
    pub callers: Vec<InsnIdx>,

    /// 1 + the deepest enclosing caller context; 0 for main
    pub depth: u32,

    /// The subroutine's single `ret`, if any path reaches one
    pub ret: Option<InsnIdx>,

    /// Stack height when that `ret` executes
    pub ret_height: Option<i32>,

    /// First local slot this context may allocate; resolved during slot assignment
    pub first_slot: u16,
}

/// Everything the flow walk learned about a body
pub(crate) struct FlowInfo {
    /// Stack height on entry to each instruction; `None` = unreachable
    pub entry_height: Vec<Option<i32>>,

    pub max_stack: i32,

    /// Context 0 is the main context
    pub contexts: Vec<Context>,

    /// Context each placed label was reached in
    pub label_ctx: Vec<Option<usize>>,

    /// Context a label is the *entry* of, for subroutine entries
    pub label_sub: Vec<Option<usize>>,

    /// Context each declaration executes in (main for unreachable declarations)
    pub var_ctx: Vec<usize>,

    /// Context containing each reachable `jsr`
    pub jsr_ctx: Vec<Option<usize>>,
}

impl FlowInfo {
    pub fn reachable(&self, idx: InsnIdx) -> bool {
        self.entry_height[idx].is_some()
    }

    pub fn analyze(body: &CodeBody) -> Result<FlowInfo, Error> {
        let insn_count = body.insns.len();

        // Guarded sections, keyed by their opening `Try`
        let mut try_handlers: HashMap<InsnIdx, Vec<LabelId>> = HashMap::new();
        for (idx, insn) in body.insns.iter().enumerate() {
            if let Instruction::Catch { start, handler, .. } = insn {
                try_handlers.entry(*start).or_default().push(*handler);
            }
        }

        let mut walker = Walker {
            body,
            try_handlers,
            info: FlowInfo {
                entry_height: vec![None; insn_count],
                max_stack: 0,
                contexts: vec![Context {
                    entry: None,
                    callers: Vec::new(),
                    depth: 0,
                    ret: None,
                    ret_height: None,
                    first_slot: 0,
                }],
                label_ctx: vec![None; body.labels.len()],
                label_sub: vec![None; body.labels.len()],
                var_ctx: vec![0; body.vars.len()],
                jsr_ctx: vec![None; insn_count],
            },
        };
        walker.walk(0, 0, 0, 0)?;

        let mut info = walker.info;
        resolve_depths(&mut info);
        Ok(info)
    }
}

/// Subroutine nesting depth is 1 + the deepest caller; callers can be discovered after the
/// callee, so iterate to a fixed point (bounded, in case of a recursive call chain)
fn resolve_depths(info: &mut FlowInfo) {
    let context_count = info.contexts.len();
    for _ in 0..context_count {
        let mut changed = false;
        for ctx in 1..context_count {
            let deepest_caller = info.contexts[ctx]
                .callers
                .iter()
                .filter_map(|jsr| info.jsr_ctx[*jsr])
                .map(|caller_ctx| info.contexts[caller_ctx].depth)
                .max();
            if let Some(depth) = deepest_caller {
                if depth + 1 > info.contexts[ctx].depth {
                    info.contexts[ctx].depth = depth + 1;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

struct Walker<'b> {
    body: &'b CodeBody,
    try_handlers: HashMap<InsnIdx, Vec<LabelId>>,
    info: FlowInfo,
}

impl<'b> Walker<'b> {
    fn target(&self, label: LabelId) -> Result<InsnIdx, Error> {
        self.body
            .label_position(label)
            .ok_or_else(|| ContractError::UnplacedLabel(label).into())
    }

    fn bump(&mut self, stack: i32) {
        if stack > self.info.max_stack {
            self.info.max_stack = stack;
        }
    }

    fn walk(
        &mut self,
        start: InsnIdx,
        stack_in: i32,
        ctx: usize,
        depth: u32,
    ) -> Result<(), Error> {
        let body = self.body;
        let mut stack = stack_in;
        self.bump(stack);

        let mut idx = start;
        loop {
            let insn = match body.insns.get(idx) {
                Some(insn) => insn,
                None => return Err(ContractError::MissingTerminator.into()),
            };

            let previous = self.info.entry_height[idx];
            if let Some(height) = previous {
                if height != stack {
                    return Err(ContractError::StackHeightMismatch {
                        at: idx,
                        previous: height,
                        conflicting: stack,
                    }
                    .into());
                }
            } else {
                self.info.entry_height[idx] = Some(stack);
            }

            // Labels are the only merge points (branches target nothing else), so a consistent
            // revisit of any instruction means the rest of this path was already walked
            if let Instruction::Label(label) = insn {
                let slot = label.0 as usize;
                if previous.is_some() {
                    if self.info.label_ctx[slot] != Some(ctx) {
                        return Err(ContractError::LabelContextConflict(*label).into());
                    }
                    return Ok(());
                }
                if let Some(sub) = self.info.label_sub[slot] {
                    if sub != ctx {
                        return Err(ContractError::SubroutineEntryConflict(*label).into());
                    }
                }
                self.info.label_ctx[slot] = Some(ctx);
                idx += 1;
                continue;
            }
            if previous.is_some() {
                return Ok(());
            }

            match insn {
                Instruction::Jsr(label) => {
                    self.info.jsr_ctx[idx] = Some(ctx);
                    let entry = self.target(*label)?;
                    let slot = label.0 as usize;

                    match self.info.label_sub[slot] {
                        Some(sub) => {
                            self.info.contexts[sub].callers.push(idx);
                            // A second call site must present the same height
                            if let Some(height) = self.info.entry_height[entry] {
                                if height != stack + 1 {
                                    return Err(ContractError::StackHeightMismatch {
                                        at: entry,
                                        previous: height,
                                        conflicting: stack + 1,
                                    }
                                    .into());
                                }
                            }
                        }
                        None => {
                            // First reachable call makes the label a subroutine entry; it must
                            // not have been reached any other way
                            if self.info.entry_height[entry].is_some() {
                                return Err(
                                    ContractError::SubroutineEntryConflict(*label).into()
                                );
                            }
                            let sub = self.info.contexts.len();
                            self.info.contexts.push(Context {
                                entry: Some(*label),
                                callers: vec![idx],
                                depth: depth + 1,
                                ret: None,
                                ret_height: None,
                                first_slot: 0,
                            });
                            self.info.label_sub[slot] = Some(sub);

                            // The call pushes the return address before transferring control
                            self.walk(entry, stack + 1, sub, depth + 1)?;
                        }
                    }

                    let sub = self.info.label_sub[slot].expect("subroutine context exists");
                    match self.info.contexts[sub].ret_height {
                        // No reachable `ret`: the call never comes back
                        None => return Ok(()),
                        Some(height) => {
                            stack = height;
                            self.bump(stack);
                            idx += 1;
                        }
                    }
                }

                Instruction::Ret(_) => {
                    if depth == 0 {
                        return Err(ContractError::RetWithoutJsr { at: idx }.into());
                    }
                    let context = &mut self.info.contexts[ctx];
                    if let Some(existing) = context.ret {
                        if existing != idx {
                            let entry = context.entry.expect("subroutine has an entry");
                            return Err(
                                ContractError::MultipleSubroutineReturns(entry).into()
                            );
                        }
                    } else {
                        context.ret = Some(idx);
                        context.ret_height = Some(stack);
                    }
                    return Ok(());
                }

                Instruction::Declare(var) => {
                    self.info.var_ctx[var.0 as usize] = ctx;
                    idx += 1;
                }

                Instruction::Try => {
                    // There is always exactly one word on the stack when a handler is invoked
                    let handlers = self.try_handlers.get(&idx).cloned().unwrap_or_default();
                    for handler in handlers {
                        let entry = self.target(handler)?;
                        self.walk(entry, 1, ctx, depth)?;
                    }
                    idx += 1;
                }

                Instruction::Branch(kind, label) => {
                    stack += kind.stack_effect();
                    if stack < 0 {
                        return Err(ContractError::StackUnderflow { at: idx }.into());
                    }
                    let taken = self.target(*label)?;
                    if kind.falls_through() {
                        self.walk(taken, stack, ctx, depth)?;
                        idx += 1;
                    } else {
                        idx = taken;
                    }
                }

                Instruction::Switch(table) => {
                    stack -= 1;
                    if stack < 0 {
                        return Err(ContractError::StackUnderflow { at: idx }.into());
                    }
                    let mut targets = vec![table.default];
                    targets.extend(table.cases.iter().map(|(_, label)| *label));
                    for label in targets {
                        let entry = self.target(label)?;
                        self.walk(entry, stack, ctx, depth)?;
                    }
                    return Ok(());
                }

                other => {
                    let effect = other
                        .stack_effect(&body.vars)?
                        .expect("only jsr lacks a local stack effect");
                    stack += effect;
                    if stack < 0 {
                        return Err(ContractError::StackUnderflow { at: idx }.into());
                    }
                    self.bump(stack);
                    if other.is_terminator() {
                        return Ok(());
                    }
                    idx += 1;
                }
            }
        }
    }
}

/// How to treat a variable that may be read before every path assigned it
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AssignmentCheck {
    /// Fail assembly
    Strict,
    /// Log a warning and continue
    Lenient,
}

/// Forward definite-assignment walk
///
/// Tracks, along every path, the set of in-scope variables assigned on *all* routes to the
/// current point: intersected at labels, intersected at a subroutine's `ret`, and merged back
/// into the caller after a `jsr`. Reads of variables outside that set are reported according to
/// `mode`. The surviving per-label sets feed the local-variable debug table.
pub(crate) fn check_assignment(
    body: &CodeBody,
    info: &FlowInfo,
    label_scopes: &mut [Option<HashSet<VarId>>],
    slots: &[u16],
    param_words: u16,
    mode: AssignmentCheck,
) -> Result<(), Error> {
    let mut ret_ctx: HashMap<InsnIdx, usize> = HashMap::new();
    for (ctx, context) in info.contexts.iter().enumerate() {
        if let Some(ret) = context.ret {
            ret_ctx.insert(ret, ctx);
        }
    }

    let mut walker = AssignWalker {
        body,
        info,
        label_scopes,
        label_visited: vec![false; body.labels.len()],
        ret_sets: vec![None; info.contexts.len()],
        ret_ctx,
        slots,
        param_words,
        mode,
        warned: HashSet::new(),
    };
    walker.walk(0, HashSet::new())
}

struct AssignWalker<'b> {
    body: &'b CodeBody,
    info: &'b FlowInfo,
    label_scopes: &'b mut [Option<HashSet<VarId>>],
    label_visited: Vec<bool>,
    ret_sets: Vec<Option<HashSet<VarId>>>,
    ret_ctx: HashMap<InsnIdx, usize>,
    slots: &'b [u16],
    param_words: u16,
    mode: AssignmentCheck,
    warned: HashSet<VarId>,
}

impl<'b> AssignWalker<'b> {
    fn check_use(&mut self, var: VarId, assigned: &HashSet<VarId>) -> Result<(), Error> {
        if assigned.contains(&var) {
            return Ok(());
        }
        // Pre-slotted variables come from disassembly; no scope information survives for them
        if self.body.vars[var.0 as usize].preset_slot.is_some() {
            return Ok(());
        }
        match self.mode {
            AssignmentCheck::Strict => Err(ContractError::UnassignedVariable(var).into()),
            AssignmentCheck::Lenient => {
                if self.warned.insert(var) {
                    log::warn!("variable {:?} may be read before it is assigned", var);
                }
                Ok(())
            }
        }
    }

    fn walk(&mut self, start: InsnIdx, mut assigned: HashSet<VarId>) -> Result<(), Error> {
        let body = self.body;
        let mut idx = start;
        loop {
            let insn = match body.insns.get(idx) {
                Some(insn) => insn,
                None => return Ok(()),
            };
            match insn {
                Instruction::Declare(var) => {
                    // Parameters are definitely assigned by the caller
                    let slot = self.slots[var.0 as usize];
                    if slot < self.param_words {
                        assigned.insert(*var);
                    }
                    idx += 1;
                }

                Instruction::Store(var) => {
                    assigned.insert(*var);
                    idx += 1;
                }

                Instruction::Load(var) | Instruction::Inc(var, _) => {
                    self.check_use(*var, &assigned)?;
                    if let Instruction::Inc(var, _) = insn {
                        assigned.insert(*var);
                    }
                    idx += 1;
                }

                Instruction::Label(label) => {
                    let slot = label.0 as usize;
                    let scope_set = self.label_scopes[slot]
                        .as_mut()
                        .expect("placed label has a scope snapshot");
                    let before = scope_set.len();
                    scope_set.retain(|var| assigned.contains(var));
                    let changed = scope_set.len() != before;
                    if !changed && self.label_visited[slot] {
                        return Ok(());
                    }
                    if assigned.len() != scope_set.len() {
                        assigned = scope_set.clone();
                    }
                    self.label_visited[slot] = true;
                    idx += 1;
                }

                Instruction::Jsr(label) => {
                    let entry = body
                        .label_position(*label)
                        .expect("flow walk resolved this label");
                    self.walk(entry, assigned.clone())?;

                    let sub = self.info.label_sub[label.0 as usize]
                        .expect("flow walk discovered this subroutine");
                    if self.info.contexts[sub].ret.is_none() {
                        // Control cannot come back
                        return Ok(());
                    }
                    // Assignments made on every path through the subroutine hold here too
                    if let Some(ret_set) = &self.ret_sets[sub] {
                        assigned.extend(ret_set.iter().copied());
                    }
                    idx += 1;
                }

                Instruction::Ret(_) => {
                    if let Some(ctx) = self.ret_ctx.get(&idx).copied() {
                        match &mut self.ret_sets[ctx] {
                            None => self.ret_sets[ctx] = Some(assigned),
                            Some(set) => set.retain(|var| assigned.contains(var)),
                        }
                    }
                    return Ok(());
                }

                Instruction::Branch(kind, label) => {
                    let taken = body
                        .label_position(*label)
                        .expect("flow walk resolved this label");
                    if kind.falls_through() {
                        self.walk(taken, assigned.clone())?;
                        idx += 1;
                    } else {
                        idx = taken;
                    }
                }

                Instruction::Switch(table) => {
                    for (_, label) in &table.cases {
                        let entry = body
                            .label_position(*label)
                            .expect("flow walk resolved this label");
                        self.walk(entry, assigned.clone())?;
                    }
                    idx = body
                        .label_position(table.default)
                        .expect("flow walk resolved this label");
                }

                Instruction::Try => {
                    for handler in collect_handlers(body, idx) {
                        let entry = body
                            .label_position(handler)
                            .expect("flow walk resolved this label");
                        self.walk(entry, assigned.clone())?;
                    }
                    idx += 1;
                }

                other if other.is_terminator() => return Ok(()),

                _ => idx += 1,
            }
        }
    }
}

fn collect_handlers(body: &CodeBody, try_idx: InsnIdx) -> Vec<LabelId> {
    body.insns
        .iter()
        .filter_map(|insn| match insn {
            Instruction::Catch { start, handler, .. } if *start == try_idx => Some(*handler),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{BranchKind, VarKind};
    use crate::jvm::ContractError;

    #[test]
    fn straight_line_heights() {
        let mut body = CodeBody::new();
        body.push(Instruction::Push(crate::jvm::Constant::Integer(1))).unwrap();
        body.push(Instruction::Push(crate::jvm::Constant::Integer(2))).unwrap();
        body.push(Instruction::IAdd).unwrap();
        body.push(Instruction::IReturn).unwrap();

        let info = FlowInfo::analyze(&body).unwrap();
        assert_eq!(info.entry_height, vec![Some(0), Some(1), Some(2), Some(1)]);
        assert_eq!(info.max_stack, 2);
    }

    #[test]
    fn fall_through_stops_at_goto() {
        let mut body = CodeBody::new();
        let skip = body.fresh_label();
        body.push(Instruction::Branch(BranchKind::Goto, skip)).unwrap();
        body.push(Instruction::Nop).unwrap(); // dead
        body.place(skip).unwrap();
        body.push(Instruction::Return).unwrap();

        let info = FlowInfo::analyze(&body).unwrap();
        assert!(info.reachable(0));
        assert!(!info.reachable(1));
        assert!(info.reachable(3));
    }

    #[test]
    fn stack_underflow_is_reported() {
        let mut body = CodeBody::new();
        body.push(Instruction::Pop).unwrap();
        body.push(Instruction::Return).unwrap();
        assert!(matches!(
            FlowInfo::analyze(&body),
            Err(Error::Contract(ContractError::StackUnderflow { at: 0 }))
        ));
    }

    #[test]
    fn conflicting_heights_are_reported() {
        let mut body = CodeBody::new();
        let join = body.fresh_label();
        let over = body.fresh_label();
        // One path pushes before joining, the other does not
        body.push(Instruction::Push(crate::jvm::Constant::Integer(0))).unwrap();
        body.push(Instruction::Branch(BranchKind::IfEq, over)).unwrap();
        body.push(Instruction::Push(crate::jvm::Constant::Integer(1))).unwrap();
        body.place(join).unwrap();
        body.push(Instruction::Return).unwrap();
        body.place(over).unwrap();
        body.push(Instruction::Branch(BranchKind::Goto, join)).unwrap();

        assert!(matches!(
            FlowInfo::analyze(&body),
            Err(Error::Contract(ContractError::StackHeightMismatch { .. }))
        ));
    }

    #[test]
    fn missing_terminator_is_reported() {
        let mut body = CodeBody::new();
        body.push(Instruction::Nop).unwrap();
        assert!(matches!(
            FlowInfo::analyze(&body),
            Err(Error::Contract(ContractError::MissingTerminator))
        ));
    }

    #[test]
    fn ret_outside_subroutine_is_reported() {
        let mut body = CodeBody::new();
        body.begin().unwrap();
        let var = body.declare(VarKind::ReturnAddress, None).unwrap();
        body.push(Instruction::Ret(var)).unwrap();
        body.end().unwrap();
        assert!(matches!(
            FlowInfo::analyze(&body),
            Err(Error::Contract(ContractError::RetWithoutJsr { .. }))
        ));
    }

    #[test]
    fn subroutine_effect_comes_from_its_ret() {
        // main: jsr sub; return
        // sub:  astore ra; jsr inner; ret ra
        // inner: astore rb; ret rb
        let mut body = CodeBody::new();
        let sub = body.fresh_label();
        let inner = body.fresh_label();

        body.begin().unwrap();
        body.push(Instruction::Jsr(sub)).unwrap();
        body.push(Instruction::Return).unwrap();

        body.place(sub).unwrap();
        body.begin().unwrap();
        let ra = body.declare(VarKind::ReturnAddress, None).unwrap();
        body.push(Instruction::Store(ra)).unwrap();
        body.push(Instruction::Jsr(inner)).unwrap();
        body.push(Instruction::Ret(ra)).unwrap();
        body.end().unwrap();

        body.place(inner).unwrap();
        body.begin().unwrap();
        let rb = body.declare(VarKind::ReturnAddress, None).unwrap();
        body.push(Instruction::Store(rb)).unwrap();
        body.push(Instruction::Ret(rb)).unwrap();
        body.end().unwrap();
        body.end().unwrap();

        let info = FlowInfo::analyze(&body).unwrap();
        assert_eq!(info.contexts.len(), 3);

        let sub_ctx = info.label_sub[sub.0 as usize].unwrap();
        let inner_ctx = info.label_sub[inner.0 as usize].unwrap();
        assert_eq!(info.contexts[sub_ctx].depth, 1);
        assert_eq!(info.contexts[inner_ctx].depth, 2);

        // The return address pushed by each jsr is consumed by the store
        assert_eq!(info.contexts[sub_ctx].ret_height, Some(0));
        assert_eq!(info.contexts[inner_ctx].ret_height, Some(0));
        assert_eq!(info.max_stack, 1);
    }

    #[test]
    fn subroutine_without_ret_ends_the_caller_path() {
        let mut body = CodeBody::new();
        let sub = body.fresh_label();
        body.push(Instruction::Jsr(sub)).unwrap();
        body.push(Instruction::Pop).unwrap(); // would underflow if walked
        body.push(Instruction::Return).unwrap();
        body.place(sub).unwrap();
        body.push(Instruction::Pop).unwrap(); // drop the return address
        body.push(Instruction::Return).unwrap();

        let info = FlowInfo::analyze(&body).unwrap();
        assert!(!info.reachable(1));
        assert!(info.reachable(4));
    }
}
