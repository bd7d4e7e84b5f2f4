//! Invocation: closures, bound methods, classes, natives, generators.
//!
//! `call_code` is the single entry for running compiled code: it builds the
//! frame (copying the lexical parent's locals for closures), checks arity,
//! and recursively enters the dispatch loop. Generator-flagged code runs
//! eagerly to its first yield and returns a generator value wrapping the
//! suspended frame.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    ast::InterfaceKind,
    builtins,
    exception::{ExcKind, RunError, RunResult, SimpleExc},
    frame::{Frame, FrameId},
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    io::PrintWriter,
    module::{CodeId, Constant, ModuleId},
    object::{Class, Closure, GenState, Generator, NativeMethod, Object, Property},
    tracer::VmTracer,
    value::Value,
};

use super::{split_args, FrameExit, Vm};

/// A callable resolved out of the heap so its borrow is released before
/// the call recurses.
enum Callable {
    Closure(Closure),
    Bound(Value, Value),
    BoundNative(Value, NativeMethod),
    Class(HeapId),
    NotCallable,
}

impl<P: PrintWriter, T: VmTracer> Vm<'_, P, T> {
    pub(crate) fn invoke_value(&mut self, callee: Value, args: Vec<Value>) -> RunResult<Value> {
        match callee {
            Value::Code(code) => self.call_code(code, None, None, args),
            Value::Native(f) => builtins::call_native(self, f, args),
            Value::ExcType(kind) => self.construct_exception(kind, args),
            Value::Ref(id) => {
                let callable = match self.ctx.heap.get(id) {
                    HeapData::Closure(c) => Callable::Closure(c.clone()),
                    HeapData::BoundMethod(b) => Callable::Bound(b.function.clone(), b.receiver.clone()),
                    HeapData::BoundNative(b) => Callable::BoundNative(b.receiver.clone(), b.method),
                    HeapData::Class(_) => Callable::Class(id),
                    _ => Callable::NotCallable,
                };
                match callable {
                    Callable::Closure(c) => {
                        // A closure defined inside a method still sees `self`.
                        let self_ref = c.parent.and_then(|p| self.ctx.frames.get(p).self_ref.clone());
                        self.call_code(c.code, c.parent, self_ref, args)
                    }
                    Callable::Bound(function, receiver) => self.invoke_with_receiver(function, receiver, args),
                    Callable::BoundNative(receiver, method) => self.call_native_method(&receiver, method, args),
                    Callable::Class(class_id) => self.construct(class_id, args),
                    Callable::NotCallable => Err(RunError::type_error(format!(
                        "'{}' is not callable",
                        callee.type_name(&self.ctx.heap)
                    ))),
                }
            }
            _ => Err(RunError::type_error(format!(
                "'{}' is not callable",
                callee.type_name(&self.ctx.heap)
            ))),
        }
    }

    /// Calls a function value with an explicit receiver bound as `self`.
    pub(crate) fn invoke_with_receiver(&mut self, function: Value, receiver: Value, args: Vec<Value>) -> RunResult<Value> {
        match &function {
            Value::Code(code) => self.call_code(*code, None, Some(receiver), args),
            Value::Ref(id) => {
                if let HeapData::Closure(c) = self.ctx.heap.get(*id) {
                    let c = c.clone();
                    self.call_code(c.code, c.parent, Some(receiver), args)
                } else {
                    self.invoke_value(function, args)
                }
            }
            _ => self.invoke_value(function, args),
        }
    }

    /// Runs a compiled code object in a fresh frame.
    pub(crate) fn call_code(
        &mut self,
        code: CodeId,
        parent: Option<FrameId>,
        self_ref: Option<Value>,
        args: Vec<Value>,
    ) -> RunResult<Value> {
        if self.call_depth >= self.ctx.options.max_call_depth {
            return Err(RunError::runtime(format!(
                "maximum call depth {} exceeded",
                self.ctx.options.max_call_depth
            )));
        }
        let entry = self.ctx.code(code);
        let code_rc = Rc::clone(&entry.code);
        let module = entry.module;
        let name = entry.name;
        let args = self.bind_arguments(&code_rc, name, args)?;

        let mut locals = match parent {
            Some(parent_id) => self.ctx.frames.snapshot_locals(parent_id),
            None => ahash::AHashMap::new(),
        };
        for ((_, slot), value) in code_rc.params.iter().zip(args) {
            locals.insert(*slot, value);
        }
        let generator = code_rc.flags.generator;
        let frame = Frame::new(code_rc, module, name, self_ref, locals, parent);
        let frame_id = self.ctx.frames.push(frame);

        self.call_depth += 1;
        let label = self.ctx.interns.get(name).to_owned();
        self.tracer.on_call(&label, self.call_depth);
        let result = self.execute_frame(frame_id);
        self.call_depth -= 1;
        self.tracer.on_return(self.call_depth);

        match result {
            Ok(FrameExit::Yield(first)) if generator => {
                self.ctx.frames.mark_captured(frame_id);
                Ok(self
                    .ctx
                    .heap
                    .allocate_value(HeapData::Generator(Generator::suspended(name, frame_id, first))))
            }
            Ok(FrameExit::Yield(_)) => {
                self.ctx.frames.release(frame_id);
                Err(RunError::internal("yield from code not flagged as a generator"))
            }
            Ok(FrameExit::Return(value)) => {
                self.ctx.frames.release(frame_id);
                Ok(value)
            }
            Err(err) => {
                self.ctx.frames.release(frame_id);
                Err(err)
            }
        }
    }

    /// Checks arity and, for variadic code, packs surplus arguments into a
    /// tuple bound to the last parameter.
    fn bind_arguments(
        &mut self,
        code: &crate::bytecode::code::CodeObject,
        name: crate::intern::StringId,
        mut args: Vec<Value>,
    ) -> RunResult<Vec<Value>> {
        if code.flags.variadic {
            let fixed = code.params.len() - 1;
            if args.len() < fixed {
                return Err(RunError::argument_error(format!(
                    "{}() takes at least {} arguments, got {}",
                    self.ctx.interns.get(name),
                    fixed,
                    args.len()
                )));
            }
            let extras = args.split_off(fixed);
            args.push(self.ctx.heap.allocate_value(HeapData::Tuple(extras)));
        } else if args.len() != code.params.len() {
            return Err(RunError::argument_error(format!(
                "{}() takes {} arguments, got {}",
                self.ctx.interns.get(name),
                code.params.len(),
                args.len()
            )));
        }
        Ok(args)
    }

    /// Calling an exception type constructs a builtin exception instance.
    fn construct_exception(&mut self, kind: ExcKind, args: Vec<Value>) -> RunResult<Value> {
        let exc = match args.as_slice() {
            [] => SimpleExc::bare(kind),
            [message] => match message.as_str(&self.ctx.heap, &self.ctx.interns) {
                Some(text) => SimpleExc::new(kind, text),
                None => {
                    return Err(RunError::type_error(format!(
                        "exception message must be a string, got '{}'",
                        message.type_name(&self.ctx.heap)
                    )));
                }
            },
            _ => {
                return Err(RunError::argument_error(format!(
                    "{kind}() takes at most 1 argument, got {}",
                    args.len()
                )));
            }
        };
        Ok(self.ctx.heap.allocate_value(HeapData::Exception(exc)))
    }

    // ------------------------------------------------------------------
    // classes and inheritance
    // ------------------------------------------------------------------

    /// Instantiates a class: a fresh object, then either the declared
    /// constructor or an implicit inherit of every base.
    pub(crate) fn construct(&mut self, class_id: HeapId, args: Vec<Value>) -> RunResult<Value> {
        let (name, constructor, bases) = match self.ctx.heap.get(class_id) {
            HeapData::Class(class) => (class.name, class.constructor.clone(), class.bases.clone()),
            other => return Err(RunError::internal(format!("construct on {other:?}"))),
        };
        let instance = self.ctx.heap.allocate_value(HeapData::Object(Object::instance_of(class_id)));
        if let Some(constructor) = constructor {
            self.invoke_with_receiver(constructor, instance.clone(), args)?;
        } else if !bases.is_empty() {
            for base in &bases {
                self.inherit(base, &instance, args.clone())?;
            }
        } else if !args.is_empty() {
            return Err(RunError::argument_error(format!(
                "{}() takes no arguments, got {}",
                self.ctx.interns.get(name),
                args.len()
            )));
        }
        Ok(instance)
    }

    /// The inherit protocol behind super calls and implicit construction.
    /// Classes append a base instance to the delegate chain; interfaces and
    /// traits mark the object; exception types make it raisable.
    pub(crate) fn inherit(&mut self, base: &Value, receiver: &Value, args: Vec<Value>) -> RunResult<()> {
        let Value::Ref(receiver_id) = receiver else {
            return Err(RunError::type_error("only objects can inherit"));
        };
        if !matches!(self.ctx.heap.get(*receiver_id), HeapData::Object(_)) {
            return Err(RunError::type_error("only objects can inherit"));
        }
        match base {
            Value::Ref(base_id) => match self.ctx.heap.get(*base_id) {
                HeapData::Class(_) => {
                    let Value::Ref(instance_id) = self.construct(*base_id, args)? else {
                        return Err(RunError::internal("construct did not produce an object"));
                    };
                    self.attach_delegate(*receiver_id, instance_id);
                    Ok(())
                }
                HeapData::Interface(interface) => {
                    let kind = interface.kind;
                    let interface_name = interface.name;
                    let required = interface.required.clone();
                    if !args.is_empty() {
                        return Err(RunError::argument_error(format!(
                            "{} takes no arguments, got {}",
                            self.ctx.interns.get(interface_name),
                            args.len()
                        )));
                    }
                    if kind == InterfaceKind::Trait {
                        for method in &required {
                            if !self.has_member(*receiver_id, *method) {
                                return Err(RunError::not_supported(format!(
                                    "'{}' requires method '{}'",
                                    self.ctx.interns.get(interface_name),
                                    self.ctx.interns.get(*method)
                                )));
                            }
                        }
                    }
                    match self.ctx.heap.get_mut(*receiver_id) {
                        HeapData::Object(object) => object.markers.push(*base_id),
                        _ => unreachable!("checked above"),
                    }
                    Ok(())
                }
                _ => Err(RunError::type_error(format!(
                    "cannot inherit from '{}'",
                    base.type_name(&self.ctx.heap)
                ))),
            },
            Value::ExcType(kind) => {
                if args.len() > 1 {
                    return Err(RunError::argument_error(format!(
                        "{kind} takes at most 1 argument, got {}",
                        args.len()
                    )));
                }
                let message = args.into_iter().next();
                match self.ctx.heap.get_mut(*receiver_id) {
                    HeapData::Object(object) => {
                        object.exception_kind = Some(*kind);
                        if let Some(message) = message {
                            object.attrs.insert(StaticStrings::Message.into(), message);
                        }
                    }
                    _ => unreachable!("checked above"),
                }
                Ok(())
            }
            _ => Err(RunError::type_error(format!(
                "cannot inherit from '{}'",
                base.type_name(&self.ctx.heap)
            ))),
        }
    }

    /// Links a freshly constructed base instance at the end of the
    /// receiver's delegate chain.
    fn attach_delegate(&mut self, receiver_id: HeapId, instance_id: HeapId) {
        let mut tail = receiver_id;
        loop {
            match self.ctx.heap.get(tail) {
                HeapData::Object(object) => match object.base {
                    Some(next) => tail = next,
                    None => break,
                },
                _ => break,
            }
        }
        if let HeapData::Object(object) = self.ctx.heap.get_mut(tail) {
            object.base = Some(instance_id);
        }
    }

    /// Builds a class value from its compiled spec, closing every member
    /// over the declaring frame.
    pub(crate) fn build_class(&mut self, frame_id: FrameId, arg: i32) -> RunResult<Value> {
        let module = self.ctx.frames.get(frame_id).module;
        let spec = match &self.ctx.module(module).module.pool[arg as usize] {
            Constant::Class(spec) => spec.clone(),
            other => return Err(RunError::internal(format!("build_class on {other:?}"))),
        };
        let base_count = usize::try_from(spec.base_count).expect("base count exceeds usize");
        let bases = split_args(self.ctx.frames.get_mut(frame_id), base_count);
        self.ctx.frames.mark_captured(frame_id);

        let constructor = match spec.constructor {
            Some(index) => Some(self.member_closure(module, frame_id, index)?),
            None => None,
        };
        let mut methods = IndexMap::new();
        for (method_name, index) in &spec.methods {
            let id = self.ctx.interns.intern(method_name);
            let value = self.member_closure(module, frame_id, *index)?;
            methods.insert(id, value);
        }
        let mut properties = IndexMap::new();
        for (property_name, getter, setter) in &spec.properties {
            let id = self.ctx.interns.intern(property_name);
            let getter = self.member_closure(module, frame_id, *getter)?;
            let setter = match setter {
                Some(index) => Some(self.member_closure(module, frame_id, *index)?),
                None => None,
            };
            properties.insert(id, Property { getter, setter });
        }
        let name = self.ctx.interns.intern(&spec.name);
        Ok(self.ctx.heap.allocate_value(HeapData::Class(Class {
            name,
            bases,
            constructor,
            methods,
            properties,
        })))
    }

    fn member_closure(&mut self, module: ModuleId, frame_id: FrameId, index: u32) -> RunResult<Value> {
        let pool_index = i32::try_from(index).expect("pool index exceeds i32");
        let Value::Code(code) = self.ctx.pool_value(module, pool_index) else {
            return Err(RunError::internal("class member is not code"));
        };
        let name = self.ctx.code(code).name;
        Ok(self.ctx.heap.allocate_value(HeapData::Closure(Closure {
            name,
            code,
            parent: Some(frame_id),
        })))
    }

    // ------------------------------------------------------------------
    // with-blocks
    // ------------------------------------------------------------------

    pub(crate) fn enter_disposable(&mut self, value: &Value) -> RunResult<Value> {
        let callee = self.get_attribute(value, StaticStrings::Enter.into())?;
        self.invoke_value(callee, Vec::new())
    }

    pub(crate) fn exit_disposable(&mut self, value: &Value) -> RunResult<()> {
        let callee = self.get_attribute(value, StaticStrings::Exit.into())?;
        self.invoke_value(callee, Vec::new())?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // native protocol methods
    // ------------------------------------------------------------------

    fn call_native_method(&mut self, receiver: &Value, method: NativeMethod, args: Vec<Value>) -> RunResult<Value> {
        match method {
            NativeMethod::GetIterator => {
                self.check_method_arity(method, 0, &args)?;
                Ok(self.new_seq_iter(receiver.clone()))
            }
            NativeMethod::MoveNext => {
                self.check_method_arity(method, 0, &args)?;
                let Value::Ref(id) = receiver else {
                    return Err(RunError::internal("move_next on a non-heap value"));
                };
                match self.ctx.heap.get(*id) {
                    HeapData::SeqIter(_) => self.seq_iter_advance(*id).map(Value::Bool),
                    HeapData::Generator(_) => self.generator_move_next(*id).map(Value::Bool),
                    other => Err(RunError::internal(format!("move_next on {other:?}"))),
                }
            }
            NativeMethod::GetCurrent => {
                self.check_method_arity(method, 0, &args)?;
                let Value::Ref(id) = receiver else {
                    return Err(RunError::internal("get_current on a non-heap value"));
                };
                match self.ctx.heap.get(*id) {
                    HeapData::SeqIter(it) => {
                        let seq = it.seq.clone();
                        let index = it.index;
                        if index == 0 {
                            return Err(RunError::runtime("get_current before move_next"));
                        }
                        self.seq_element(&seq, index - 1)
                    }
                    HeapData::Generator(gen) => Ok(gen.current.clone()),
                    other => Err(RunError::internal(format!("get_current on {other:?}"))),
                }
            }
            NativeMethod::Reset => {
                self.check_method_arity(method, 0, &args)?;
                let Value::Ref(id) = receiver else {
                    return Err(RunError::internal("reset on a non-heap value"));
                };
                match self.ctx.heap.get_mut(*id) {
                    HeapData::SeqIter(it) => {
                        it.index = 0;
                        Ok(Value::Null)
                    }
                    // A generator that has not been advanced is already at its
                    // start, so the iteration protocol's reset is a no-op; once
                    // consumption begins only a fresh invocation restarts it.
                    HeapData::Generator(gen) => {
                        if gen.state == GenState::Suspended && gen.pending.is_some() {
                            Ok(Value::Null)
                        } else {
                            Err(RunError::runtime("a generator cannot be reset"))
                        }
                    }
                    other => Err(RunError::internal(format!("reset on {other:?}"))),
                }
            }
            NativeMethod::Append => {
                self.check_method_arity(method, 1, &args)?;
                let Value::Ref(id) = receiver else {
                    return Err(RunError::internal("append on a non-heap value"));
                };
                let value = args.into_iter().next().unwrap_or(Value::Null);
                match self.ctx.heap.get_mut(*id) {
                    HeapData::List(items) => {
                        items.push(value);
                        Ok(Value::Null)
                    }
                    other => Err(RunError::internal(format!("append on {other:?}"))),
                }
            }
        }
    }

    fn check_method_arity(&self, method: NativeMethod, expected: usize, args: &[Value]) -> RunResult<()> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(RunError::argument_error(format!(
                "{method}() takes {expected} arguments, got {}",
                args.len()
            )))
        }
    }

    // ------------------------------------------------------------------
    // iteration
    // ------------------------------------------------------------------

    /// Advances a sequence cursor; `index` ends one past the element
    /// `get_current` reads.
    fn seq_iter_advance(&mut self, iter_id: HeapId) -> RunResult<bool> {
        let (seq, index) = match self.ctx.heap.get(iter_id) {
            HeapData::SeqIter(it) => (it.seq.clone(), it.index),
            other => return Err(RunError::internal(format!("advance on {other:?}"))),
        };
        let len = self.seq_len(&seq)?;
        if index < len {
            match self.ctx.heap.get_mut(iter_id) {
                HeapData::SeqIter(it) => it.index = index + 1,
                _ => unreachable!("checked above"),
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn seq_len(&self, seq: &Value) -> RunResult<usize> {
        match seq {
            Value::Str(id) => Ok(self.ctx.interns.get(*id).chars().count()),
            Value::Ref(id) => match self.ctx.heap.get(*id) {
                HeapData::List(items) | HeapData::Tuple(items) => Ok(items.len()),
                HeapData::Str(text) => Ok(text.chars().count()),
                HeapData::Bytes(bytes) => Ok(bytes.len()),
                HeapData::Dict(dict) => Ok(dict.entries.len()),
                HeapData::Range { start, end } => Ok(usize::try_from(end.saturating_sub(*start)).unwrap_or(0)),
                _ => Err(self.not_iterable(seq)),
            },
            _ => Err(self.not_iterable(seq)),
        }
    }

    fn seq_element(&mut self, seq: &Value, index: usize) -> RunResult<Value> {
        match seq {
            Value::Str(id) => {
                let ch = self.ctx.interns.get(*id).chars().nth(index);
                let ch = ch.ok_or_else(|| RunError::internal("iterator cursor out of range"))?;
                Ok(self.ctx.heap.allocate_value(HeapData::Str(ch.to_string())))
            }
            Value::Ref(id) => match self.ctx.heap.get(*id) {
                HeapData::List(items) | HeapData::Tuple(items) => items
                    .get(index)
                    .cloned()
                    .ok_or_else(|| RunError::internal("iterator cursor out of range")),
                HeapData::Str(text) => {
                    let ch = text.chars().nth(index);
                    let ch = ch.ok_or_else(|| RunError::internal("iterator cursor out of range"))?;
                    Ok(self.ctx.heap.allocate_value(HeapData::Str(ch.to_string())))
                }
                HeapData::Bytes(bytes) => bytes
                    .get(index)
                    .map(|&b| Value::Int(i64::from(b)))
                    .ok_or_else(|| RunError::internal("iterator cursor out of range")),
                HeapData::Dict(dict) => {
                    // Dict iteration yields keys in insertion order.
                    let key = dict
                        .entries
                        .get_index(index)
                        .map(|(key, _)| key.clone())
                        .ok_or_else(|| RunError::internal("iterator cursor out of range"))?;
                    Ok(key.to_value(&mut self.ctx.heap))
                }
                HeapData::Range { start, .. } => {
                    let offset = i64::try_from(index).map_err(|_| RunError::internal("iterator cursor out of range"))?;
                    Ok(Value::Int(start + offset))
                }
                _ => Err(self.not_iterable(seq)),
            },
            _ => Err(self.not_iterable(seq)),
        }
    }

    fn not_iterable(&self, value: &Value) -> RunError {
        RunError::type_error(format!("'{}' is not iterable", value.type_name(&self.ctx.heap)))
    }

    // ------------------------------------------------------------------
    // generators
    // ------------------------------------------------------------------

    /// Resumes a generator. The first value was produced eagerly at the
    /// original invocation and sits buffered until this first call.
    fn generator_move_next(&mut self, generator_id: HeapId) -> RunResult<bool> {
        let (state, frame, pending) = match self.ctx.heap.get(generator_id) {
            HeapData::Generator(gen) => (gen.state, gen.frame, gen.pending.clone()),
            other => return Err(RunError::internal(format!("move_next on {other:?}"))),
        };
        match state {
            GenState::Done => Ok(false),
            GenState::Running => Err(RunError::runtime("generator is already running")),
            GenState::Suspended => {
                if let Some(first) = pending {
                    if let HeapData::Generator(gen) = self.ctx.heap.get_mut(generator_id) {
                        gen.pending = None;
                        gen.current = first;
                    }
                    return Ok(true);
                }
                if self.call_depth >= self.ctx.options.max_call_depth {
                    return Err(RunError::runtime(format!(
                        "maximum call depth {} exceeded",
                        self.ctx.options.max_call_depth
                    )));
                }
                if let HeapData::Generator(gen) = self.ctx.heap.get_mut(generator_id) {
                    gen.state = GenState::Running;
                }
                self.call_depth += 1;
                let result = self.execute_frame(frame);
                self.call_depth -= 1;
                match result {
                    Ok(FrameExit::Yield(value)) => {
                        if let HeapData::Generator(gen) = self.ctx.heap.get_mut(generator_id) {
                            gen.state = GenState::Suspended;
                            gen.current = value;
                        }
                        Ok(true)
                    }
                    Ok(FrameExit::Return(_)) => {
                        if let HeapData::Generator(gen) = self.ctx.heap.get_mut(generator_id) {
                            gen.state = GenState::Done;
                        }
                        Ok(false)
                    }
                    Err(err) => {
                        self.poison_generator(generator_id);
                        Err(err)
                    }
                }
            }
        }
    }
}
