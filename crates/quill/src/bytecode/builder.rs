//! Instruction accumulation and label resolution for one function body.
//!
//! The compiler emits jumps against forward-reference labels; `finalize`
//! patches every recorded reference to the label's marked absolute index.
//! An unmarked-but-referenced label at finalization is a compiler bug and
//! panics rather than surfacing as a runtime exception.

use crate::{
    ast::Loc,
    bytecode::{
        code::{CodeFlags, CodeObject, Instruction},
        op::Op,
    },
};

/// A forward-reference jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpLabel(u32);

/// Builder for one `CodeObject`.
///
/// Name, parameters and flags are fixed at construction; instructions are
/// appended, then frozen by `finalize`.
#[derive(Debug, Clone)]
pub struct CodeBuilder {
    name: String,
    params: Vec<(String, u32)>,
    flags: CodeFlags,
    instructions: Vec<Instruction>,
    /// Marked absolute positions, indexed by label id.
    labels: Vec<Option<u32>>,
    /// Instruction indices whose argument is a label id awaiting patching.
    patches: Vec<(usize, JumpLabel)>,
    /// First slot available to temporaries, above all declared symbols.
    local_base: u32,
    temps_in_use: u32,
    max_locals: u32,
}

impl CodeBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<(String, u32)>, flags: CodeFlags) -> Self {
        let base = params.iter().map(|&(_, slot)| slot + 1).max().unwrap_or(0);
        Self {
            name: name.into(),
            params,
            flags,
            instructions: Vec::new(),
            labels: Vec::new(),
            patches: Vec::new(),
            local_base: base,
            temps_in_use: 0,
            max_locals: base,
        }
    }

    /// Sets the first slot temporaries may use, after the symbol table has
    /// assigned slots to every declared name in the function.
    pub fn set_local_base(&mut self, base: u32) {
        self.local_base = base;
        self.max_locals = self.max_locals.max(base);
    }

    /// Appends an instruction, returning its index.
    pub fn emit(&mut self, op: Op, arg: i32, loc: Option<Loc>) -> usize {
        let index = self.instructions.len();
        self.instructions.push(Instruction::new(op, arg, loc));
        index
    }

    /// Appends a jump against a label, recording a pending patch.
    pub fn emit_jump(&mut self, op: Op, label: JumpLabel, loc: Option<Loc>) -> usize {
        debug_assert!(op.is_jump(), "emit_jump with non-jump opcode {op}");
        let index = self.emit(op, 0, loc);
        self.patches.push((index, label));
        index
    }

    pub fn create_label(&mut self) -> JumpLabel {
        let label = JumpLabel(u32::try_from(self.labels.len()).expect("label count exceeds u32"));
        self.labels.push(None);
        label
    }

    /// Marks a label at the next instruction index.
    ///
    /// # Panics
    /// Panics if the label was already marked.
    pub fn mark_label(&mut self, label: JumpLabel) {
        let position = u32::try_from(self.instructions.len()).expect("instruction count exceeds u32");
        let slot = &mut self.labels[label.0 as usize];
        assert!(slot.is_none(), "label {} marked twice", label.0);
        *slot = Some(position);
    }

    /// Highest slot count observed so far, including live temporaries.
    /// Nested emission contexts start their own slots above this.
    #[must_use]
    pub fn max_locals(&self) -> u32 {
        self.max_locals
    }

    /// Hands out a temporary local slot above every declared symbol.
    pub fn alloc_temp(&mut self) -> u32 {
        let slot = self.local_base + self.temps_in_use;
        self.temps_in_use += 1;
        self.max_locals = self.max_locals.max(slot + 1);
        slot
    }

    /// Releases the most recently allocated temporary.
    pub fn free_temp(&mut self, slot: u32) {
        debug_assert_eq!(slot, self.local_base + self.temps_in_use - 1, "temps freed out of order");
        self.temps_in_use -= 1;
    }

    /// Patches label references and freezes the instruction stream.
    ///
    /// Idempotent: patching resolves each recorded reference to its label's
    /// marked position, so repeated calls produce identical offsets.
    ///
    /// # Panics
    /// Panics if any referenced label was never marked.
    pub fn finalize(&mut self) -> CodeObject {
        for &(index, label) in &self.patches {
            let target = self.labels[label.0 as usize]
                .unwrap_or_else(|| panic!("label {} referenced at instruction {index} but never marked", label.0));
            self.instructions[index].arg =
                i32::try_from(target).expect("jump target exceeds i32");
        }
        CodeObject {
            name: self.name.clone(),
            params: self.params.clone(),
            flags: self.flags,
            local_count: self.max_locals,
            temp_base: self.local_base,
            instructions: self.instructions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn builder() -> CodeBuilder {
        CodeBuilder::new("test", Vec::new(), CodeFlags::default())
    }

    #[test]
    fn test_forward_label_patched_to_absolute_index() {
        let mut b = builder();
        let end = b.create_label();
        b.emit(Op::LoadTrue, 0, None);
        b.emit_jump(Op::JumpIfFalse, end, None);
        b.emit(Op::LoadNull, 0, None);
        b.emit(Op::Pop, 0, None);
        b.mark_label(end);
        b.emit(Op::Return, 0, None);
        let code = b.finalize();
        assert_eq!(code.instructions[1].op, Op::JumpIfFalse);
        assert_eq!(code.instructions[1].arg, 4);
    }

    #[test]
    fn test_backward_label() {
        let mut b = builder();
        let top = b.create_label();
        b.mark_label(top);
        b.emit(Op::LoadTrue, 0, None);
        b.emit_jump(Op::JumpIfTrue, top, None);
        let code = b.finalize();
        assert_eq!(code.instructions[1].arg, 0);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut b = builder();
        let end = b.create_label();
        b.emit_jump(Op::Jump, end, None);
        b.emit(Op::LoadNull, 0, None);
        b.mark_label(end);
        b.emit(Op::Return, 0, None);
        let first = b.finalize();
        let second = b.finalize();
        assert_eq!(first.instructions, second.instructions);
    }

    #[test]
    #[should_panic(expected = "never marked")]
    fn test_unmarked_label_panics() {
        let mut b = builder();
        let dangling = b.create_label();
        b.emit_jump(Op::Jump, dangling, None);
        b.finalize();
    }

    #[test]
    fn test_temp_slots_start_above_declared_symbols() {
        let mut b = CodeBuilder::new("f", vec![("a".to_owned(), 0)], CodeFlags::default());
        b.set_local_base(3);
        let t0 = b.alloc_temp();
        let t1 = b.alloc_temp();
        assert_eq!((t0, t1), (3, 4));
        b.free_temp(t1);
        assert_eq!(b.alloc_temp(), 4);
        b.free_temp(4);
        b.free_temp(t0);
        let code = b.finalize();
        assert_eq!(code.local_count, 5);
    }
}
