//! Bytecode representation, generation, and execution.

pub mod builder;
pub mod code;
pub mod compiler;
pub mod op;
pub mod optimizer;
pub mod vm;

pub use code::CodeObject;
pub use compiler::{compile_module, CompileError};
pub use op::Op;
