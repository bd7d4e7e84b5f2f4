//! Builtin functions and the global registration done at context startup.
//!
//! Builtins are `Value::Native` entries in the VM global table; exception
//! types register under their script-visible names alongside them. Scripts
//! may shadow any of these by assigning the name at module scope.

use std::borrow::Cow;

use strum::IntoEnumIterator;

use crate::{
    bytecode::vm::{Vm, VmContext},
    exception::{ExcKind, RunError, RunResult},
    heap::HeapData,
    io::PrintWriter,
    tracer::VmTracer,
    value::{display_value, repr_value, NativeFn, Value},
};

/// Populates a fresh context's global table.
pub(crate) fn register_globals(ctx: &mut VmContext) {
    for f in NativeFn::iter() {
        let name: &'static str = f.into();
        let id = ctx.interns.intern(name);
        ctx.globals.insert(id, Value::Native(f));
    }
    for kind in ExcKind::iter() {
        let name: &'static str = kind.into();
        let id = ctx.interns.intern(name);
        ctx.globals.insert(id, Value::ExcType(kind));
    }
}

/// Dispatches a call to a native function.
pub(crate) fn call_native<P: PrintWriter, T: VmTracer>(
    vm: &mut Vm<'_, P, T>,
    f: NativeFn,
    args: Vec<Value>,
) -> RunResult<Value> {
    match f {
        NativeFn::Print => {
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    vm.print.stdout_push(' ');
                }
                let text = display_value(arg, &vm.ctx.heap, &vm.ctx.interns);
                vm.print.stdout_write(Cow::Owned(text));
            }
            vm.print.stdout_push('\n');
            Ok(Value::Null)
        }
        NativeFn::Range => match args.as_slice() {
            [Value::Int(end)] => Ok(vm.ctx.heap.allocate_value(HeapData::Range { start: 0, end: *end })),
            [Value::Int(start), Value::Int(end)] => Ok(vm.ctx.heap.allocate_value(HeapData::Range {
                start: *start,
                end: *end,
            })),
            [_] | [_, _] => Err(RunError::type_error("range() bounds must be integers")),
            _ => Err(RunError::argument_error(format!(
                "range() takes 1 or 2 arguments, got {}",
                args.len()
            ))),
        },
        NativeFn::Len => {
            let value = single_arg(f, args)?;
            let len = match &value {
                Value::Str(id) => vm.ctx.interns.get(*id).chars().count(),
                Value::Ref(id) => match vm.ctx.heap.get(*id) {
                    HeapData::Str(s) => s.chars().count(),
                    HeapData::Bytes(b) => b.len(),
                    HeapData::List(items) | HeapData::Tuple(items) => items.len(),
                    HeapData::Dict(dict) => dict.entries.len(),
                    HeapData::Range { start, end } => usize::try_from(end.saturating_sub(*start)).unwrap_or(0),
                    _ => {
                        return Err(RunError::type_error(format!(
                            "object of type '{}' has no length",
                            value.type_name(&vm.ctx.heap)
                        )));
                    }
                },
                _ => {
                    return Err(RunError::type_error(format!(
                        "object of type '{}' has no length",
                        value.type_name(&vm.ctx.heap)
                    )));
                }
            };
            Ok(Value::Int(i64::try_from(len).expect("length exceeds i64")))
        }
        NativeFn::Str => {
            let value = single_arg(f, args)?;
            let text = display_value(&value, &vm.ctx.heap, &vm.ctx.interns);
            Ok(vm.ctx.heap.allocate_value(HeapData::Str(text)))
        }
        NativeFn::Repr => {
            let value = single_arg(f, args)?;
            let text = repr_value(&value, &vm.ctx.heap, &vm.ctx.interns);
            Ok(vm.ctx.heap.allocate_value(HeapData::Str(text)))
        }
        NativeFn::TypeOf => {
            let value = single_arg(f, args)?;
            let name = value.type_name(&vm.ctx.heap);
            Ok(Value::Str(vm.ctx.interns.intern(name)))
        }
    }
}

fn single_arg(f: NativeFn, args: Vec<Value>) -> RunResult<Value> {
    let mut args = args;
    if args.len() == 1 {
        Ok(args.pop().expect("length checked"))
    } else {
        Err(RunError::argument_error(format!(
            "{f}() takes 1 argument, got {}",
            args.len()
        )))
    }
}
