//! The fetch-decode-execute engine.
//!
//! `VmContext` owns all long-lived interpreter state: interns, heap, frame
//! arena, the VM-wide global table, and every registered module and code
//! object. `Vm` borrows a context for one execution, pairing it with a
//! `PrintWriter` and a `VmTracer` chosen by the caller. Multiple contexts
//! are fully independent and may live on different threads.
//!
//! Calls run on the Rust stack: `invoke` pushes a frame and recursively
//! enters the dispatch loop, bounded by `VmOptions::max_call_depth`.
//! Generators re-enter the same loop on a suspended frame.

mod attr;
mod binary;
mod call;
mod exceptions;

use std::{
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use ahash::AHashMap;

use crate::{
    builtins,
    bytecode::{code::CodeObject, op::Op},
    exception::{Exception, RunError, RunResult},
    frame::{Frame, FrameId, Frames, HandlerEntry},
    heap::{Heap, HeapData},
    intern::{Interns, StaticStrings, StringId},
    io::PrintWriter,
    module::{CodeId, Constant, Module, ModuleId},
    object::{Closure, EnumObject, Interface, Object},
    tracer::VmTracer,
    value::{repr_value, Value},
};

/// Tunables fixed at context construction.
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    /// Maximum interpreted call depth before a `RuntimeError`.
    pub max_call_depth: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self { max_call_depth: 200 }
    }
}

/// Cloneable handle that requests cancellation of a running context.
/// The dispatch loop checks the flag on every instruction.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// One registered code object with its resolved runtime identity.
#[derive(Debug)]
pub(crate) struct CodeEntry {
    pub code: Rc<CodeObject>,
    pub module: ModuleId,
    pub name: StringId,
}

/// A module after registration: its compiled form plus the materialized
/// constant pool and the module attribute table globals fall back to.
#[derive(Debug)]
pub(crate) struct RuntimeModule {
    pub module: Module,
    pub pool: Vec<Value>,
    pub attrs: AHashMap<StringId, Value>,
}

/// All long-lived interpreter state.
#[derive(Debug)]
pub struct VmContext {
    pub(crate) interns: Interns,
    pub(crate) heap: Heap,
    pub(crate) frames: Frames,
    pub(crate) globals: AHashMap<StringId, Value>,
    pub(crate) codes: Vec<CodeEntry>,
    pub(crate) modules: Vec<RuntimeModule>,
    pub(crate) options: VmOptions,
    abort: Arc<AtomicBool>,
}

impl Default for VmContext {
    fn default() -> Self {
        Self::new(VmOptions::default())
    }
}

impl VmContext {
    #[must_use]
    pub fn new(options: VmOptions) -> Self {
        let mut ctx = Self {
            interns: Interns::new(),
            heap: Heap::new(),
            frames: Frames::new(),
            globals: AHashMap::new(),
            codes: Vec::new(),
            modules: Vec::new(),
            options,
            abort: Arc::new(AtomicBool::new(false)),
        };
        builtins::register_globals(&mut ctx);
        ctx
    }

    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: Arc::clone(&self.abort),
        }
    }

    pub(crate) fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Interner access for embedders constructing values.
    pub fn interns_mut(&mut self) -> &mut Interns {
        &mut self.interns
    }

    /// Registers a compiled module, materializing its constant pool.
    /// Primitive constants become values up front; code objects are
    /// registered and declaration specs stay in the compiled form for
    /// their build instructions to read.
    pub fn register_module(&mut self, module: Module) -> ModuleId {
        let module_id = ModuleId(u32::try_from(self.modules.len()).expect("module count exceeds u32"));
        let mut pool = Vec::with_capacity(module.pool.len());
        for constant in &module.pool {
            let value = match constant {
                Constant::Int(v) => Value::Int(*v),
                Constant::Float(v) => Value::Float(*v),
                Constant::Str(v) => Value::Str(self.interns.intern(v)),
                Constant::Bytes(v) => self.heap.allocate_value(HeapData::Bytes(v.clone())),
                Constant::Code(code) => {
                    let id = CodeId(u32::try_from(self.codes.len()).expect("code count exceeds u32"));
                    let name = self.interns.intern(&code.name);
                    self.codes.push(CodeEntry {
                        code: Rc::new(code.clone()),
                        module: module_id,
                        name,
                    });
                    Value::Code(id)
                }
                Constant::Class(_) | Constant::Interface(_) | Constant::Enum(_) => Value::Null,
            };
            pool.push(value);
        }
        self.modules.push(RuntimeModule {
            module,
            pool,
            attrs: AHashMap::new(),
        });
        module_id
    }

    /// Reads a global by name, for hosts inspecting results after a run.
    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Value> {
        let id = self.interns.lookup(name)?;
        self.globals.get(&id).cloned()
    }

    /// Renders any value the way `repr` would, for host-side diagnostics.
    #[must_use]
    pub fn describe(&self, value: &Value) -> String {
        repr_value(value, &self.heap, &self.interns)
    }

    pub(crate) fn code(&self, id: CodeId) -> &CodeEntry {
        &self.codes[id.0 as usize]
    }

    pub(crate) fn module(&self, id: ModuleId) -> &RuntimeModule {
        &self.modules[id.0 as usize]
    }

    pub(crate) fn module_mut(&mut self, id: ModuleId) -> &mut RuntimeModule {
        &mut self.modules[id.0 as usize]
    }

    /// Resolves an instruction's pool argument to its materialized value.
    pub(crate) fn pool_value(&self, module: ModuleId, index: i32) -> Value {
        self.module(module).pool[index as usize].clone()
    }

    /// Resolves a pool argument that names something (globals, attributes).
    pub(crate) fn pool_name(&self, module: ModuleId, index: i32) -> StringId {
        match &self.module(module).pool[index as usize] {
            Value::Str(id) => *id,
            other => panic!("pool entry {index} is not a name: {other:?}"),
        }
    }
}

/// How a frame finished.
#[derive(Debug)]
pub(crate) enum FrameExit {
    Return(Value),
    Yield(Value),
}

/// One execution of a context.
#[derive(Debug)]
pub struct Vm<'a, P: PrintWriter, T: VmTracer> {
    pub(crate) ctx: &'a mut VmContext,
    pub(crate) print: &'a mut P,
    pub(crate) tracer: T,
    pub(crate) call_depth: usize,
}

impl<'a, P: PrintWriter, T: VmTracer> Vm<'a, P, T> {
    pub fn new(ctx: &'a mut VmContext, print: &'a mut P, tracer: T) -> Self {
        Self {
            ctx,
            print,
            tracer,
            call_depth: 0,
        }
    }

    /// Runs a registered module's initializer.
    pub fn run_module(&mut self, module: ModuleId) -> Result<(), Exception> {
        let init = self.ctx.module(module).module.init;
        let code_value = self.ctx.pool_value(module, i32::try_from(init).expect("init index exceeds i32"));
        let Value::Code(code_id) = code_value else {
            return Err(self.into_exception(RunError::internal("module initializer is not code")));
        };
        match self.call_code(code_id, None, None, Vec::new()) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.into_exception(err)),
        }
    }

    /// Invokes any callable value with positional arguments.
    pub fn invoke(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, Exception> {
        match self.invoke_value(callee, args) {
            Ok(value) => Ok(value),
            Err(err) => Err(self.into_exception(err)),
        }
    }

    /// Invokes a function value as a method of `receiver`. Code and
    /// closures run with `self` bound to the receiver; any other callable
    /// is invoked plainly with the arguments alone.
    pub fn invoke_method(&mut self, method: Value, receiver: Value, args: Vec<Value>) -> Result<Value, Exception> {
        match self.invoke_with_receiver(method, receiver, args) {
            Ok(value) => Ok(value),
            Err(err) => Err(self.into_exception(err)),
        }
    }

    /// Renders a script value as the host-facing exception raising it
    /// would produce. A value no `raise` statement accepts yields the same
    /// TypeError the statement reports.
    pub fn raise_exception(&mut self, value: Value) -> Exception {
        match self.raise_value(value) {
            Ok(err) | Err(err) => self.into_exception(err),
        }
    }

    fn into_exception(&self, err: RunError) -> Exception {
        Exception::from_run_error(err, &self.ctx.interns, |value| {
            repr_value(value, &self.ctx.heap, &self.ctx.interns)
        })
    }

    // ------------------------------------------------------------------
    // dispatch loop
    // ------------------------------------------------------------------

    /// Runs a frame until it returns, yields, or fails.
    pub(crate) fn execute_frame(&mut self, frame_id: FrameId) -> RunResult<FrameExit> {
        loop {
            if self.ctx.aborted() {
                self.drain_disposables(frame_id, 0);
                return Err(RunError::Aborted);
            }
            let (instr, ip) = {
                let frame = self.ctx.frames.get_mut(frame_id);
                let ip = frame.ip;
                if ip >= frame.code.instructions.len() {
                    self.drain_disposables(frame_id, 0);
                    return Ok(FrameExit::Return(Value::Null));
                }
                let instr = frame.code.instructions[ip];
                frame.ip = ip + 1;
                if let Some(loc) = instr.loc {
                    frame.line = loc.line;
                }
                (instr, ip)
            };
            {
                let frame = self.ctx.frames.get(frame_id);
                self.tracer.on_instruction(ip, instr.op, frame.stack.len(), self.call_depth);
            }
            match self.step(frame_id, instr.op, instr.arg) {
                Ok(None) => {}
                Ok(Some(FrameExit::Return(value))) => {
                    self.drain_disposables(frame_id, 0);
                    return Ok(FrameExit::Return(value));
                }
                Ok(Some(FrameExit::Yield(value))) => return Ok(FrameExit::Yield(value)),
                Err(err) => {
                    if let Some(err) = self.handle_exception(frame_id, err) {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Executes a single instruction. `Some(exit)` finishes the frame.
    fn step(&mut self, frame_id: FrameId, op: Op, arg: i32) -> RunResult<Option<FrameExit>> {
        match op {
            Op::LoadConst => {
                let module = self.ctx.frames.get(frame_id).module;
                let value = self.ctx.pool_value(module, arg);
                self.ctx.frames.get_mut(frame_id).push(value);
            }
            Op::LoadNull => self.ctx.frames.get_mut(frame_id).push(Value::Null),
            Op::LoadTrue => self.ctx.frames.get_mut(frame_id).push(Value::Bool(true)),
            Op::LoadFalse => self.ctx.frames.get_mut(frame_id).push(Value::Bool(false)),
            Op::LoadSelf => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let receiver = frame
                    .self_ref
                    .clone()
                    .ok_or_else(|| RunError::runtime("no receiver in this frame"))?;
                frame.push(receiver);
            }
            Op::LoadException => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let caught = frame
                    .caught
                    .clone()
                    .ok_or_else(|| RunError::runtime("no active exception"))?;
                frame.push(caught);
            }
            Op::Pop => {
                self.ctx.frames.get_mut(frame_id).pop();
            }
            Op::Dup => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let top = frame.stack.last().expect("operand stack underflow").clone();
                frame.push(top);
            }
            Op::LoadLocal => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let slot = slot_of(arg);
                let value = frame.locals.get(&slot).cloned().unwrap_or(Value::Null);
                frame.push(value);
            }
            Op::StoreLocal => {
                let value = self.ctx.frames.get_mut(frame_id).pop();
                self.ctx.frames.store_local(frame_id, slot_of(arg), value);
            }
            Op::LoadGlobal => {
                let (module, name) = self.name_arg(frame_id, arg);
                let value = match self.ctx.globals.get(&name) {
                    Some(value) => value.clone(),
                    None => match self.ctx.module(module).attrs.get(&name) {
                        Some(value) => value.clone(),
                        None => {
                            return Err(RunError::runtime(format!(
                                "name '{}' is not defined",
                                self.ctx.interns.get(name)
                            )));
                        }
                    },
                };
                self.ctx.frames.get_mut(frame_id).push(value);
            }
            Op::StoreGlobal => {
                let (module, name) = self.name_arg(frame_id, arg);
                let value = self.ctx.frames.get_mut(frame_id).pop();
                if let Some(existing) = self.ctx.globals.get_mut(&name) {
                    *existing = value;
                } else {
                    self.ctx.module_mut(module).attrs.insert(name, value);
                }
            }
            Op::LoadAttribute => {
                let (_, name) = self.name_arg(frame_id, arg);
                let receiver = self.ctx.frames.get_mut(frame_id).pop();
                let value = self.get_attribute(&receiver, name)?;
                self.ctx.frames.get_mut(frame_id).push(value);
            }
            Op::StoreAttribute => {
                let (_, name) = self.name_arg(frame_id, arg);
                let frame = self.ctx.frames.get_mut(frame_id);
                let receiver = frame.pop();
                let value = frame.pop();
                self.set_attribute(&receiver, name, value)?;
            }
            Op::LoadIndex => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let index = frame.pop();
                let receiver = frame.pop();
                let value = self.load_index(&receiver, &index)?;
                self.ctx.frames.get_mut(frame_id).push(value);
            }
            Op::StoreIndex => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let index = frame.pop();
                let receiver = frame.pop();
                let value = frame.pop();
                self.store_index(&receiver, &index, value)?;
            }
            Op::BinaryOp => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let rhs = frame.pop();
                let lhs = frame.pop();
                let result = self.binary_op(bin_op_of(arg), &lhs, &rhs)?;
                self.ctx.frames.get_mut(frame_id).push(result);
            }
            Op::IsInstance => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let type_value = frame.pop();
                let subject = frame.pop();
                let result = self.is_instance(&subject, &type_value)?;
                self.ctx.frames.get_mut(frame_id).push(Value::Bool(result));
            }
            Op::TestTuple => {
                let subject = self.ctx.frames.get_mut(frame_id).pop();
                let expected = usize::try_from(arg).expect("negative sequence arity");
                let matches = match &subject {
                    Value::Ref(id) => match self.ctx.heap.get(*id) {
                        HeapData::Tuple(items) | HeapData::List(items) => items.len() == expected,
                        _ => false,
                    },
                    _ => false,
                };
                self.ctx.frames.get_mut(frame_id).push(Value::Bool(matches));
            }
            Op::UnaryOp => {
                let operand = self.ctx.frames.get_mut(frame_id).pop();
                let result = self.unary_op(unary_op_of(arg), &operand)?;
                self.ctx.frames.get_mut(frame_id).push(result);
            }
            Op::Invoke => {
                let (callee, args) = self.pop_call(frame_id, arg, false)?;
                let result = self.invoke_value(callee, args)?;
                self.ctx.frames.get_mut(frame_id).push(result);
            }
            Op::InvokeVar => {
                let (callee, args) = self.pop_call(frame_id, arg, true)?;
                let result = self.invoke_value(callee, args)?;
                self.ctx.frames.get_mut(frame_id).push(result);
            }
            Op::InvokeSuper => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let base = frame.pop();
                let count = usize::try_from(arg).expect("negative arity");
                let args = split_args(frame, count);
                let receiver = self
                    .ctx
                    .frames
                    .get(frame_id)
                    .self_ref
                    .clone()
                    .ok_or_else(|| RunError::runtime("super call outside of a constructor"))?;
                self.inherit(&base, &receiver, args)?;
                self.ctx.frames.get_mut(frame_id).push(Value::Null);
            }
            Op::Jump => {
                self.ctx.frames.get_mut(frame_id).ip = target_of(arg);
            }
            Op::JumpIfTrue => {
                let condition = self.ctx.frames.get_mut(frame_id).pop();
                if condition.is_truthy(&self.ctx.heap, &self.ctx.interns) {
                    self.ctx.frames.get_mut(frame_id).ip = target_of(arg);
                }
            }
            Op::JumpIfFalse => {
                let condition = self.ctx.frames.get_mut(frame_id).pop();
                if !condition.is_truthy(&self.ctx.heap, &self.ctx.interns) {
                    self.ctx.frames.get_mut(frame_id).ip = target_of(arg);
                }
            }
            Op::Return => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let value = frame.pop();
                frame.ip = frame.code.instructions.len();
                return Ok(Some(FrameExit::Return(value)));
            }
            Op::Yield => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let value = frame.pop();
                frame.yielded = true;
                return Ok(Some(FrameExit::Yield(value)));
            }
            Op::BuildList => {
                let count = usize::try_from(arg).expect("negative arity");
                let items = split_args(self.ctx.frames.get_mut(frame_id), count);
                let value = self.ctx.heap.allocate_value(HeapData::List(items));
                self.ctx.frames.get_mut(frame_id).push(value);
            }
            Op::BuildTuple => {
                let count = usize::try_from(arg).expect("negative arity");
                let items = split_args(self.ctx.frames.get_mut(frame_id), count);
                let value = self.ctx.heap.allocate_value(HeapData::Tuple(items));
                self.ctx.frames.get_mut(frame_id).push(value);
            }
            Op::BuildHash => {
                let count = usize::try_from(arg).expect("negative arity");
                let flat = split_args(self.ctx.frames.get_mut(frame_id), count * 2);
                let mut dict = crate::value::Dict::new();
                for pair in flat.chunks_exact(2) {
                    let key = crate::value::DictKey::from_value(&pair[0], &self.ctx.heap, &self.ctx.interns)?;
                    dict.entries.insert(key, pair[1].clone());
                }
                let value = self.ctx.heap.allocate_value(HeapData::Dict(dict));
                self.ctx.frames.get_mut(frame_id).push(value);
            }
            Op::BuildClosure => {
                let module = self.ctx.frames.get(frame_id).module;
                let Value::Code(code_id) = self.ctx.pool_value(module, arg) else {
                    return Err(RunError::internal("build_closure argument is not code"));
                };
                let name = self.ctx.code(code_id).name;
                self.ctx.frames.mark_captured(frame_id);
                let value = self.ctx.heap.allocate_value(HeapData::Closure(Closure {
                    name,
                    code: code_id,
                    parent: Some(frame_id),
                }));
                self.ctx.frames.get_mut(frame_id).push(value);
            }
            Op::BuildClass => {
                let value = self.build_class(frame_id, arg)?;
                self.ctx.frames.get_mut(frame_id).push(value);
            }
            Op::BuildInterface => {
                let module = self.ctx.frames.get(frame_id).module;
                let spec = match &self.ctx.module(module).module.pool[arg as usize] {
                    Constant::Interface(spec) => spec.clone(),
                    other => return Err(RunError::internal(format!("build_interface on {other:?}"))),
                };
                let name = self.ctx.interns.intern(&spec.name);
                let required = spec.required.iter().map(|m| self.ctx.interns.intern(m)).collect();
                let value = self.ctx.heap.allocate_value(HeapData::Interface(Interface {
                    name,
                    kind: spec.kind,
                    required,
                }));
                self.ctx.frames.get_mut(frame_id).push(value);
            }
            Op::BuildEnum => {
                let module = self.ctx.frames.get(frame_id).module;
                let spec = match &self.ctx.module(module).module.pool[arg as usize] {
                    Constant::Enum(spec) => spec.clone(),
                    other => return Err(RunError::internal(format!("build_enum on {other:?}"))),
                };
                let name = self.ctx.interns.intern(&spec.name);
                let enum_id = self.ctx.heap.allocate(HeapData::Enum(EnumObject {
                    name,
                    variants: indexmap::IndexMap::new(),
                }));
                for (ordinal, variant) in spec.variants.iter().enumerate() {
                    let variant_id = self.ctx.interns.intern(variant);
                    let mut object = Object {
                        class: Some(enum_id),
                        ..Object::default()
                    };
                    object.attrs.insert(StaticStrings::Name.into(), Value::Str(variant_id));
                    let ordinal = i64::try_from(ordinal).expect("variant count exceeds i64");
                    object.attrs.insert(StaticStrings::Ordinal.into(), Value::Int(ordinal));
                    let id = self.ctx.heap.allocate(HeapData::Object(object));
                    match self.ctx.heap.get_mut(enum_id) {
                        HeapData::Enum(en) => {
                            en.variants.insert(variant_id, id);
                        }
                        _ => unreachable!("enum allocation changed kind"),
                    }
                }
                self.ctx.frames.get_mut(frame_id).push(Value::Ref(enum_id));
            }
            Op::PushExceptionHandler => {
                let frame = self.ctx.frames.get_mut(frame_id);
                let entry = HandlerEntry {
                    resume: u32::try_from(arg).expect("negative handler target"),
                    stack_depth: u32::try_from(frame.stack.len()).expect("stack exceeds u32"),
                    disposables_depth: u32::try_from(frame.disposables.len()).expect("disposables exceed u32"),
                };
                frame.handlers.push(entry);
            }
            Op::PopExceptionHandler => {
                let frame = self.ctx.frames.get_mut(frame_id);
                frame.handlers.pop().expect("handler stack underflow");
            }
            Op::BeginExcept => {
                let count = usize::try_from(arg).expect("negative filter count");
                self.begin_except(frame_id, count)?;
            }
            Op::Raise => {
                let value = self.ctx.frames.get_mut(frame_id).pop();
                return Err(self.raise_value(value)?);
            }
            Op::BeginWith => {
                let value = self.ctx.frames.get_mut(frame_id).pop();
                let entered = self.enter_disposable(&value)?;
                let frame = self.ctx.frames.get_mut(frame_id);
                frame.disposables.push(value);
                frame.push(entered);
            }
            Op::EndWith => {
                let value = self
                    .ctx
                    .frames
                    .get_mut(frame_id)
                    .disposables
                    .pop()
                    .expect("disposables stack underflow");
                self.exit_disposable(&value)?;
            }
        }
        Ok(None)
    }

    fn name_arg(&self, frame_id: FrameId, arg: i32) -> (ModuleId, StringId) {
        let module = self.ctx.frames.get(frame_id).module;
        (module, self.ctx.pool_name(module, arg))
    }

    /// Pops a call's callee, optional extras tuple, and arguments.
    fn pop_call(&mut self, frame_id: FrameId, arg: i32, variadic: bool) -> RunResult<(Value, Vec<Value>)> {
        let callee = self.ctx.frames.get_mut(frame_id).pop();
        let extras = if variadic {
            let extras = self.ctx.frames.get_mut(frame_id).pop();
            match &extras {
                Value::Ref(id) => match self.ctx.heap.get(*id) {
                    HeapData::Tuple(items) | HeapData::List(items) => items.clone(),
                    _ => {
                        return Err(RunError::type_error(format!(
                            "argument unpacking requires a tuple, got '{}'",
                            extras.type_name(&self.ctx.heap)
                        )));
                    }
                },
                _ => {
                    return Err(RunError::type_error(format!(
                        "argument unpacking requires a tuple, got '{}'",
                        extras.type_name(&self.ctx.heap)
                    )));
                }
            }
        } else {
            Vec::new()
        };
        let count = usize::try_from(arg).expect("negative arity");
        let mut args = split_args(self.ctx.frames.get_mut(frame_id), count);
        args.extend(extras);
        Ok((callee, args))
    }

    /// Calls every pending disposable's `exit`, innermost first, down to
    /// `keep` entries. Runs on return, unwinding, and abort paths alike.
    pub(crate) fn drain_disposables(&mut self, frame_id: FrameId, keep: usize) {
        while self.ctx.frames.get(frame_id).disposables.len() > keep {
            let value = self
                .ctx
                .frames
                .get_mut(frame_id)
                .disposables
                .pop()
                .expect("disposables stack underflow");
            // An exit failure during cleanup cannot preempt the exit of
            // the remaining disposables; it is reported as lost.
            if let Err(err) = self.exit_disposable(&value) {
                self.tracer.on_raise(&format!("{err:?} (suppressed during cleanup)"));
            }
        }
    }
}

/// Pops `count` values, restoring source order.
fn split_args(frame: &mut Frame, count: usize) -> Vec<Value> {
    let start = frame.stack.len().checked_sub(count).expect("operand stack underflow");
    frame.stack.split_off(start)
}

fn slot_of(arg: i32) -> u32 {
    u32::try_from(arg).expect("negative local slot")
}

fn target_of(arg: i32) -> usize {
    usize::try_from(arg).expect("negative jump target")
}

fn bin_op_of(arg: i32) -> crate::ast::BinOp {
    crate::ast::BinOp::from_repr(arg).expect("invalid binary operator discriminant")
}

fn unary_op_of(arg: i32) -> crate::ast::UnaryOp {
    crate::ast::UnaryOp::from_repr(arg).expect("invalid unary operator discriminant")
}
