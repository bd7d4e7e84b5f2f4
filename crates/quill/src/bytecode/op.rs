//! The instruction set.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, FromRepr, IntoStaticStr};

/// Opcodes executed by the VM loop.
///
/// The meaning of an instruction's argument depends on the opcode:
/// constant-pool index, local slot, absolute jump target, arity, or
/// operator discriminant. Opcodes without an argument ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, FromRepr, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum Op {
    /// Push pool constant `arg`.
    LoadConst,
    LoadNull,
    LoadTrue,
    LoadFalse,
    /// Push the frame's receiver.
    LoadSelf,
    /// Push the exception bound by the innermost active except-block.
    LoadException,
    Pop,
    Dup,
    /// Push local slot `arg`.
    LoadLocal,
    /// Pop into local slot `arg`, writing through to the parent frame when
    /// the slot pre-exists there.
    StoreLocal,
    /// Push the global named by pool constant `arg`, falling back to the
    /// module attribute table.
    LoadGlobal,
    StoreGlobal,
    /// Pop receiver, push its attribute named by pool constant `arg`.
    LoadAttribute,
    /// Pop receiver then value, store into the attribute.
    StoreAttribute,
    /// Pop index then receiver, push `receiver[index]`.
    LoadIndex,
    /// Pop index, receiver, value; store `receiver[index] = value`.
    StoreIndex,
    /// Pop rhs then lhs, push the result; `arg` is the `BinOp` discriminant.
    BinaryOp,
    /// Pop a type value then a subject, push whether the subject is an
    /// instance of it. Used by `match` type patterns.
    IsInstance,
    /// Pop a subject, push whether it is a sequence of exactly `arg`
    /// elements. Used by `match` tuple patterns.
    TestTuple,
    /// Pop operand, push the result; `arg` is the `UnaryOp` discriminant.
    UnaryOp,
    /// Pop callee then `arg` arguments (reversed to source order), invoke.
    Invoke,
    /// Like `Invoke`, but a trailing tuple of extra arguments is unpacked.
    InvokeVar,
    /// Pop base then `arg` arguments, run the base's inherit protocol
    /// against the current receiver.
    InvokeSuper,
    /// Absolute jump to instruction index `arg`.
    Jump,
    JumpIfTrue,
    JumpIfFalse,
    /// Pop the return value, finish the frame.
    Return,
    /// Pop the yielded value, suspend the frame.
    Yield,
    /// Pop `arg` values into a new list (top of stack is the last element).
    BuildList,
    BuildTuple,
    /// Pop `2 * arg` values, alternating key/value, into a new dict.
    BuildHash,
    /// Pair the code constant at pool index `arg` with the current frame.
    BuildClosure,
    /// Materialize the class spec at pool index `arg`; pops its declared
    /// base count off the stack.
    BuildClass,
    BuildInterface,
    BuildEnum,
    /// Push a handler resuming at absolute index `arg`.
    PushExceptionHandler,
    PopExceptionHandler,
    /// Pop `arg` filter values; re-raise unless the active exception
    /// matches one of them.
    BeginExcept,
    /// Pop a value and raise it.
    Raise,
    /// Pop a value, call its `enter`, push it onto the disposables stack,
    /// push `enter`'s result.
    BeginWith,
    /// Pop the innermost disposable and call its `exit`.
    EndWith,
}

impl Op {
    /// Whether the argument is an absolute jump target that label
    /// finalization and the optimizer must patch.
    #[must_use]
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jump | Self::JumpIfTrue | Self::JumpIfFalse | Self::PushExceptionHandler
        )
    }

    /// Whether the argument is meaningful (used by the disassembler).
    #[must_use]
    pub fn has_argument(self) -> bool {
        !matches!(
            self,
            Self::LoadNull
                | Self::LoadTrue
                | Self::LoadFalse
                | Self::LoadSelf
                | Self::LoadException
                | Self::Pop
                | Self::Dup
                | Self::IsInstance
                | Self::Return
                | Self::Yield
                | Self::PopExceptionHandler
                | Self::Raise
                | Self::BeginWith
                | Self::EndWith
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(Op::LoadConst.to_string(), "load_const");
        assert_eq!(Op::PushExceptionHandler.to_string(), "push_exception_handler");
        assert_eq!(Op::BuildHash.to_string(), "build_hash");
    }

    #[test]
    fn test_jump_classification() {
        assert!(Op::Jump.is_jump());
        assert!(Op::PushExceptionHandler.is_jump());
        assert!(!Op::Return.is_jump());
        assert!(!Op::Invoke.is_jump());
    }
}
