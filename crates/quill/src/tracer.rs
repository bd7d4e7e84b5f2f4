//! VM execution tracing hooks.
//!
//! The VM carries its tracer as a type parameter, so with [`NoopTracer`]
//! every hook monomorphizes to nothing and the dispatch loop pays no cost.
//! [`StderrTracer`] gives a human-readable execution log for debugging.

use crate::bytecode::op::Op;

/// Trait for VM execution tracing.
///
/// All methods have default no-op implementations; implementations only
/// override the hooks they care about.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each opcode dispatch in the main execution loop.
    ///
    /// This is the hottest hook; implementations should stay lightweight.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _op: Op, _stack_depth: usize, _frame_depth: usize) {}

    /// Called when a call pushes a new frame.
    #[inline(always)]
    fn on_call(&mut self, _name: &str, _depth: usize) {}

    /// Called when a frame finishes (return, yield wrap, or unwind).
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called when a raised exception starts unwinding.
    #[inline(always)]
    fn on_raise(&mut self, _summary: &str) {}

    /// Called when a handler catches the active exception.
    #[inline(always)]
    fn on_catch(&mut self, _resume: usize) {}
}

/// A tracer that does nothing; the production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that prints a human-readable execution log to stderr.
///
/// An optional instruction limit prevents runaway output on hot loops.
#[derive(Debug, Default)]
pub struct StderrTracer {
    limit: Option<usize>,
    count: usize,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            count: 0,
        }
    }
}

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, ip: usize, op: Op, stack_depth: usize, frame_depth: usize) {
        if self.limit.is_some_and(|limit| self.count >= limit) {
            return;
        }
        self.count += 1;
        eprintln!("[{ip:5}] {op:<22} stack={stack_depth}  frames={frame_depth}");
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        eprintln!("  >>> call {name}  depth={depth}");
    }

    fn on_return(&mut self, depth: usize) {
        eprintln!("  <<< return  depth={depth}");
    }

    fn on_raise(&mut self, summary: &str) {
        eprintln!("  !!! raise {summary}");
    }

    fn on_catch(&mut self, resume: usize) {
        eprintln!("  ... caught, resuming at {resume}");
    }
}
