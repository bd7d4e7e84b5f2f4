#![doc = include_str!("../../../README.md")]

pub mod ast;
mod builtins;
mod bytecode;
pub mod cache;
mod exception;
mod frame;
mod heap;
mod intern;
mod io;
mod module;
mod object;
mod symbol;
pub mod tracer;
mod value;

pub use crate::{
    bytecode::{
        compiler::{compile_module, CompileError},
        vm::{AbortHandle, Vm, VmContext, VmOptions},
        CodeObject, Op,
    },
    exception::{ExcKind, Exception},
    heap::{Heap, HeapId},
    intern::{Interns, StringId},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    module::{Constant, Module, ModuleId},
    tracer::{NoopTracer, StderrTracer, VmTracer},
    value::{NativeFn, Value},
};
