//! Compiled code: instructions plus parameter and flag metadata.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{ast::Loc, bytecode::op::Op};

/// One executed instruction. Immutable once emitted; jump arguments are
/// absolute instruction indices after finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Op,
    pub arg: i32,
    pub loc: Option<Loc>,
}

impl Instruction {
    #[must_use]
    pub fn new(op: Op, arg: i32, loc: Option<Loc>) -> Self {
        Self { op, arg, loc }
    }
}

/// Behavior flags fixed when a function declaration is compiled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFlags {
    /// Last parameter collects extra arguments into a tuple.
    pub variadic: bool,
    /// Body contains `yield`; invocation produces a generator.
    pub generator: bool,
    /// Declared in a class body; receives `self`.
    pub instance_method: bool,
}

/// A compiled function, method, or module initializer body.
///
/// Names are stored as plain strings so code objects serialize into the
/// module cache without depending on any particular intern table; they are
/// interned once when the module is registered with a `VmContext`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeObject {
    pub name: String,
    /// Parameter names and the local slot each binds to. Slots continue the
    /// enclosing function's numbering, so nested functions' parameters do
    /// not collide with copied parent locals.
    pub params: Vec<(String, u32)>,
    pub flags: CodeFlags,
    /// Total local slots, parameters and temporaries included.
    pub local_count: u32,
    /// First slot used for compiler temporaries. Every declared name lives
    /// below this; slots at or above it are private to one activation and
    /// never shared with enclosing frames.
    pub temp_base: u32,
    pub instructions: Vec<Instruction>,
}

impl CodeObject {
    /// Renders the instruction listing for diagnostics.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} ({} params, {} locals):", self.name, self.params.len(), self.local_count);
        for (index, instr) in self.instructions.iter().enumerate() {
            if instr.op.has_argument() {
                let _ = writeln!(out, "  {index:4}: {} {}", instr.op, instr.arg);
            } else {
                let _ = writeln!(out, "  {index:4}: {}", instr.op);
            }
        }
        out
    }
}
