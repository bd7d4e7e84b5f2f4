//! Post-finalization peephole passes.
//!
//! Two passes run in fixed order over a finalized instruction array:
//! control-flow simplification (collapse jump-to-jump chains, drop jumps to
//! the immediately following instruction) and instruction combination (drop
//! a side-effect-free push immediately discarded by a pop). Both passes are
//! idempotent and preserve observable behavior; only instruction count and
//! offsets change.

use crate::bytecode::{
    code::{CodeObject, Instruction},
    op::Op,
};

/// Runs both passes over a code object, in order.
pub fn optimize(code: &mut CodeObject) {
    simplify_control_flow(&mut code.instructions);
    combine_instructions(&mut code.instructions);
}

/// Pass 1: retarget jumps whose destination is an unconditional jump, then
/// remove unconditional jumps to the next instruction.
fn simplify_control_flow(instructions: &mut Vec<Instruction>) {
    let len = instructions.len();
    for index in 0..len {
        if !instructions[index].op.is_jump() {
            continue;
        }
        let mut target = instructions[index].arg;
        // Follow jump-to-jump chains, bounded to guard against cycles.
        let mut hops = 0;
        while hops < len {
            let t = target as usize;
            if t >= len || instructions[t].op != Op::Jump || instructions[t].arg == target {
                break;
            }
            target = instructions[t].arg;
            hops += 1;
        }
        instructions[index].arg = target;
    }

    let remove: Vec<bool> = instructions
        .iter()
        .enumerate()
        .map(|(index, instr)| instr.op == Op::Jump && instr.arg as usize == index + 1)
        .collect();
    remove_and_remap(instructions, &remove);
}

/// Pass 2: drop a side-effect-free push whose value the very next
/// instruction pops, unless control flow can enter between the two.
fn combine_instructions(instructions: &mut Vec<Instruction>) {
    let len = instructions.len();
    let mut is_target = vec![false; len.saturating_add(1)];
    for instr in instructions.iter() {
        if instr.op.is_jump() {
            let t = instr.arg as usize;
            if t < is_target.len() {
                is_target[t] = true;
            }
        }
    }

    let mut remove = vec![false; len];
    let mut index = 0;
    while index + 1 < len {
        if pushes_without_effects(instructions[index].op)
            && instructions[index + 1].op == Op::Pop
            && !is_target[index]
            && !is_target[index + 1]
        {
            remove[index] = true;
            remove[index + 1] = true;
            index += 2;
        } else {
            index += 1;
        }
    }
    remove_and_remap(instructions, &remove);
}

/// Pushes exactly one value and cannot raise or touch observable state.
/// `LoadException` does not qualify: outside a handler it raises. A local
/// load does: a missing slot reads as null rather than raising.
fn pushes_without_effects(op: Op) -> bool {
    matches!(
        op,
        Op::LoadConst | Op::LoadNull | Op::LoadTrue | Op::LoadFalse | Op::LoadSelf | Op::LoadLocal | Op::Dup
    )
}

/// Deletes flagged instructions and remaps every absolute jump argument.
/// A target that was itself removed maps to the next surviving instruction.
fn remove_and_remap(instructions: &mut Vec<Instruction>, remove: &[bool]) {
    if !remove.iter().any(|&r| r) {
        return;
    }
    // new_index[i] = index of instruction i after removal; removed entries
    // map to the first survivor at or after them.
    let mut new_index = Vec::with_capacity(remove.len() + 1);
    let mut kept = 0_i32;
    for &removed in remove {
        new_index.push(kept);
        if !removed {
            kept += 1;
        }
    }
    new_index.push(kept);

    let mut out = Vec::with_capacity(kept as usize);
    for (index, instr) in instructions.iter().enumerate() {
        if remove[index] {
            continue;
        }
        let mut instr = *instr;
        if instr.op.is_jump() {
            instr.arg = new_index[instr.arg as usize];
        }
        out.push(instr);
    }
    *instructions = out;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn instr(op: Op, arg: i32) -> Instruction {
        Instruction::new(op, arg, None)
    }

    fn ops(instructions: &[Instruction]) -> Vec<(Op, i32)> {
        instructions.iter().map(|i| (i.op, i.arg)).collect()
    }

    #[test]
    fn test_jump_to_jump_collapses() {
        let mut instructions = vec![
            instr(Op::JumpIfFalse, 2),
            instr(Op::Return, 0),
            instr(Op::Jump, 4),
            instr(Op::Return, 0),
            instr(Op::Return, 0),
        ];
        simplify_control_flow(&mut instructions);
        assert_eq!(instructions[0], instr(Op::JumpIfFalse, 4));
    }

    #[test]
    fn test_jump_to_next_is_removed_and_targets_remap() {
        let mut instructions = vec![
            instr(Op::Jump, 1),
            instr(Op::LoadNull, 0),
            instr(Op::JumpIfTrue, 4),
            instr(Op::LoadTrue, 0),
            instr(Op::Return, 0),
        ];
        simplify_control_flow(&mut instructions);
        assert_eq!(
            ops(&instructions),
            vec![(Op::LoadNull, 0), (Op::JumpIfTrue, 3), (Op::LoadTrue, 0), (Op::Return, 0)]
        );
    }

    #[test]
    fn test_push_pop_pair_is_combined() {
        let mut instructions = vec![
            instr(Op::LoadConst, 7),
            instr(Op::Pop, 0),
            instr(Op::LoadNull, 0),
            instr(Op::Return, 0),
        ];
        combine_instructions(&mut instructions);
        assert_eq!(ops(&instructions), vec![(Op::LoadNull, 0), (Op::Return, 0)]);
    }

    #[test]
    fn test_effectful_push_pop_survives() {
        let mut instructions = vec![
            instr(Op::LoadGlobal, 0),
            instr(Op::Pop, 0),
            instr(Op::Return, 0),
        ];
        let before = instructions.clone();
        combine_instructions(&mut instructions);
        assert_eq!(instructions, before);
    }

    #[test]
    fn test_exception_load_pop_survives() {
        // Discarded or not, reading the current exception outside a handler
        // must still raise, so the pair cannot be elided.
        let mut instructions = vec![
            instr(Op::LoadException, 0),
            instr(Op::Pop, 0),
            instr(Op::Return, 0),
        ];
        let before = instructions.clone();
        combine_instructions(&mut instructions);
        assert_eq!(instructions, before);
    }

    #[test]
    fn test_jump_target_between_pair_blocks_combination() {
        // the pop is a jump target, so removing the pair would change the
        // stack a jumping path observes
        let mut instructions = vec![
            instr(Op::JumpIfTrue, 2),
            instr(Op::LoadNull, 0),
            instr(Op::Pop, 0),
            instr(Op::Return, 0),
        ];
        let before = instructions.clone();
        combine_instructions(&mut instructions);
        assert_eq!(instructions, before);
    }

    #[test]
    fn test_passes_are_idempotent() {
        let mut instructions = vec![
            instr(Op::Jump, 1),
            instr(Op::LoadConst, 0),
            instr(Op::Pop, 0),
            instr(Op::JumpIfFalse, 5),
            instr(Op::LoadTrue, 0),
            instr(Op::Return, 0),
        ];
        simplify_control_flow(&mut instructions);
        combine_instructions(&mut instructions);
        let once = instructions.clone();
        simplify_control_flow(&mut instructions);
        combine_instructions(&mut instructions);
        assert_eq!(instructions, once);
    }

    #[test]
    fn test_self_loop_jump_terminates() {
        let mut instructions = vec![instr(Op::Jump, 0), instr(Op::Return, 0)];
        simplify_control_flow(&mut instructions);
        assert_eq!(instructions[0], instr(Op::Jump, 0));
    }
}
