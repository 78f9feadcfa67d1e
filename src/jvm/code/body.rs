use crate::jvm::code::{Instruction, VarKind};
use crate::jvm::{ContractError, Error};
use std::fmt;

/// Opaque label: an index into the owning body's label table
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct LabelId(pub(crate) u32);

impl fmt::Debug for LabelId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

/// Opaque variable handle: an index into the owning body's declaration table
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct VarId(pub(crate) u32);

impl fmt::Debug for VarId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("v{}", self.0))
    }
}

/// Position of an instruction in its body's arena
pub type InsnIdx = usize;

/// Debug identity of a local variable, feeding the `LocalVariableTable` attribute
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarDebug {
    pub name: String,
    pub descriptor: String,
}

/// A local variable declaration
#[derive(Clone, Debug)]
pub struct VarDecl {
    pub kind: VarKind,
    pub debug: Option<VarDebug>,

    /// Slot fixed up front (disassembled code); in-scope declarations get theirs assigned
    pub(crate) preset_slot: Option<u16>,
}

/// A method body under construction: the instruction arena plus its side tables
///
/// All cross-references between instructions (branch targets, guarded-section pairs, variable
/// uses) are stable indices into this arena, so the sequence can be freely inspected without any
/// ownership cycles.
pub struct CodeBody {
    pub(crate) insns: Vec<Instruction>,

    /// Source line per instruction (0 = unknown), for the `LineNumberTable`
    pub(crate) lines: Vec<u16>,

    /// Where each label has been placed
    pub(crate) labels: Vec<Option<InsnIdx>>,

    pub(crate) vars: Vec<VarDecl>,

    current_line: u16,
    open_scopes: usize,
}

impl CodeBody {
    pub fn new() -> CodeBody {
        CodeBody {
            insns: Vec::new(),
            lines: Vec::new(),
            labels: Vec::new(),
            vars: Vec::new(),
            current_line: 0,
            open_scopes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.insns
    }

    pub fn variables(&self) -> &[VarDecl] {
        &self.vars
    }

    /// Get a fresh, not-yet-placed label
    pub fn fresh_label(&mut self) -> LabelId {
        let label = LabelId(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Where a label was placed, if it has been
    pub fn label_position(&self, label: LabelId) -> Option<InsnIdx> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    /// Mark a position with a label; each label is placed exactly once
    pub fn place(&mut self, label: LabelId) -> Result<InsnIdx, Error> {
        self.push(Instruction::Label(label))
    }

    /// Open a new variable scope
    pub fn begin(&mut self) -> Result<InsnIdx, Error> {
        self.push(Instruction::Begin)
    }

    /// Close the innermost variable scope
    pub fn end(&mut self) -> Result<InsnIdx, Error> {
        self.push(Instruction::End)
    }

    /// Declare a variable in the innermost open scope
    ///
    /// The slot is assigned during assembly, scoped to the declaring `Begin`/`End` pair (and to
    /// the subroutine the declaration executes in).
    pub fn declare(&mut self, kind: VarKind, debug: Option<VarDebug>) -> Result<VarId, Error> {
        let var = VarId(self.vars.len() as u32);
        self.vars.push(VarDecl {
            kind,
            debug,
            preset_slot: None,
        });
        self.push(Instruction::Declare(var))?;
        Ok(var)
    }

    /// Materialize a variable with a fixed slot and no declaration in the instruction stream
    ///
    /// This is how disassembled code refers to its locals: the slots were decided when the class
    /// was first compiled, and no scope information survives in the byte code.
    pub fn var_at(&mut self, kind: VarKind, slot: u16) -> VarId {
        let var = VarId(self.vars.len() as u32);
        self.vars.push(VarDecl {
            kind,
            debug: None,
            preset_slot: Some(slot),
        });
        var
    }

    /// Start a guarded section; the returned index is what `catch` pairs with
    pub fn try_start(&mut self) -> Result<InsnIdx, Error> {
        self.push(Instruction::Try)
    }

    /// End the guarded section opened at `start`, routing `class` (or everything, for `None`) to
    /// `handler`
    pub fn catch(
        &mut self,
        start: InsnIdx,
        class: Option<&str>,
        handler: LabelId,
    ) -> Result<InsnIdx, Error> {
        self.push(Instruction::Catch {
            start,
            class: class.map(str::to_string),
            handler,
        })
    }

    /// Append an instruction, validating its operands against this body
    ///
    /// Switch case tables are put into ascending key order here; duplicate keys are rejected.
    pub fn push(&mut self, insn: Instruction) -> Result<InsnIdx, Error> {
        let mut insn = insn;
        if let Instruction::Switch(table) = &mut insn {
            table.cases.sort_by_key(|(key, _)| *key);
        }
        self.validate(&insn)?;
        let idx = self.insns.len();

        match &insn {
            Instruction::Label(label) => {
                self.labels[label.0 as usize] = Some(idx);
            }
            Instruction::Begin => self.open_scopes += 1,
            Instruction::End => self.open_scopes -= 1,
            _ => {}
        }

        self.insns.push(insn);
        self.lines.push(self.current_line);
        Ok(idx)
    }

    /// Has any pushed instruction been tagged with a source line?
    pub fn tracks_lines(&self) -> bool {
        self.lines.iter().any(|line| *line > 0)
    }

    /// Set the current "source code line"; subsequent instructions are tagged with it
    pub fn set_line(&mut self, line: u16) {
        self.current_line = line;
    }

    /// Advance to the next "source code line"
    pub fn next_line(&mut self) {
        self.current_line += 1;
    }

    fn validate(&self, insn: &Instruction) -> Result<(), Error> {
        match insn {
            Instruction::Label(label) => {
                let slot = self
                    .labels
                    .get(label.0 as usize)
                    .ok_or(ContractError::UnknownLabel(*label))?;
                if slot.is_some() {
                    return Err(ContractError::DuplicateLabel(*label).into());
                }
            }

            Instruction::Branch(_, label) | Instruction::Jsr(label) => {
                self.check_label(*label)?;
            }

            Instruction::Switch(table) => {
                self.check_label(table.default)?;
                let mut previous: Option<i32> = None;
                for (key, label) in &table.cases {
                    self.check_label(*label)?;
                    if previous == Some(*key) {
                        return Err(ContractError::DuplicateCaseKey(*key).into());
                    }
                    previous = Some(*key);
                }
            }

            Instruction::End => {
                if self.open_scopes == 0 {
                    return Err(ContractError::EndWithoutBegin.into());
                }
            }

            Instruction::Declare(var) => {
                self.check_var(*var)?;
                if self.open_scopes == 0 {
                    return Err(ContractError::DeclareOutsideScope(*var).into());
                }
            }

            Instruction::Load(var)
            | Instruction::Store(var)
            | Instruction::Inc(var, _)
            | Instruction::Ret(var) => {
                self.check_var(*var)?;
            }

            Instruction::Catch { start, handler, .. } => {
                self.check_label(*handler)?;
                match self.insns.get(*start) {
                    Some(Instruction::Try) => {}
                    _ => return Err(ContractError::CatchWithoutTry.into()),
                }
            }

            Instruction::MultiANewArray { dimensions, .. } => {
                if *dimensions == 0 {
                    return Err(ContractError::DimensionCount(*dimensions).into());
                }
            }

            Instruction::Push(constant) => {
                if !constant.is_loadable() {
                    return Err(ContractError::NotLoadable(constant.clone()).into());
                }
            }

            _ => {}
        }
        Ok(())
    }

    fn check_label(&self, label: LabelId) -> Result<(), Error> {
        if (label.0 as usize) < self.labels.len() {
            Ok(())
        } else {
            Err(ContractError::UnknownLabel(label).into())
        }
    }

    fn check_var(&self, var: VarId) -> Result<(), Error> {
        if (var.0 as usize) < self.vars.len() {
            Ok(())
        } else {
            Err(ContractError::UnknownVariable(var).into())
        }
    }
}

impl Default for CodeBody {
    fn default() -> CodeBody {
        CodeBody::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::SwitchTable;

    #[test]
    fn labels_place_once() {
        let mut body = CodeBody::new();
        let label = body.fresh_label();
        body.place(label).unwrap();
        assert!(matches!(
            body.place(label),
            Err(Error::Contract(ContractError::DuplicateLabel(_)))
        ));
    }

    #[test]
    fn declarations_need_a_scope() {
        let mut body = CodeBody::new();
        assert!(matches!(
            body.declare(VarKind::Int, None),
            Err(Error::Contract(ContractError::DeclareOutsideScope(_)))
        ));
        body.begin().unwrap();
        body.declare(VarKind::Int, None).unwrap();
        body.end().unwrap();
        assert!(matches!(
            body.end(),
            Err(Error::Contract(ContractError::EndWithoutBegin))
        ));
    }

    #[test]
    fn switch_case_keys_must_ascend() {
        let mut body = CodeBody::new();
        let a = body.fresh_label();
        let b = body.fresh_label();
        let err = body.push(Instruction::Switch(SwitchTable {
            default: a,
            cases: vec![(1, b), (1, b)],
        }));
        assert!(matches!(
            err,
            Err(Error::Contract(ContractError::DuplicateCaseKey(1)))
        ));
    }

    #[test]
    fn catch_requires_a_try() {
        let mut body = CodeBody::new();
        let handler = body.fresh_label();
        assert!(matches!(
            body.catch(0, None, handler),
            Err(Error::Contract(ContractError::CatchWithoutTry))
        ));
        let start = body.try_start().unwrap();
        body.catch(start, Some("java/lang/Exception"), handler).unwrap();
    }
}
