//! Raising, unwinding, and handler matching.
//!
//! A raised exception propagates as `RunError::Raised` up the Rust call
//! stack, one interpreted frame per `execute_frame` activation. Each frame
//! checks its own handler stack: a handler truncates the operand and
//! disposables stacks to their recorded depths and resumes at its offset,
//! where the compiled filter sequence decides whether to keep or re-raise.

use crate::{
    exception::{ExcKind, ExcPayload, RaisedException, RunError, RunResult},
    frame::FrameId,
    heap::HeapData,
    io::PrintWriter,
    object::GenState,
    tracer::VmTracer,
    value::Value,
};

use super::Vm;

impl<P: PrintWriter, T: VmTracer> Vm<'_, P, T> {
    /// Converts a raised value into the error that starts unwinding.
    /// Only exception values may be raised: builtin exception instances,
    /// exception types, or objects that inherited an exception type.
    pub(crate) fn raise_value(&mut self, value: Value) -> RunResult<RunError> {
        let raisable = match &value {
            Value::ExcType(kind) => {
                let kind = *kind;
                return Ok(RunError::Raised(Box::new(RaisedException {
                    payload: ExcPayload::Simple(crate::exception::SimpleExc::bare(kind)),
                    frames: Vec::new(),
                })));
            }
            Value::Ref(id) => match self.ctx.heap.get(*id) {
                HeapData::Exception(_) => true,
                HeapData::Object(object) => object.exception_kind.is_some() || self.chain_exception_kind(*id).is_some(),
                _ => false,
            },
            _ => false,
        };
        if raisable {
            self.tracer.on_raise(&self.ctx.describe(&value));
            Ok(RunError::from_value(value))
        } else {
            Err(RunError::type_error(format!(
                "cannot raise a value of type '{}'",
                value.type_name(&self.ctx.heap)
            )))
        }
    }

    /// Gives the frame's handler stack a chance at a raised exception.
    /// Returns `None` when a handler took it (the frame is repositioned),
    /// or the error to propagate with this frame's traceback entry added.
    pub(crate) fn handle_exception(&mut self, frame_id: FrameId, err: RunError) -> Option<RunError> {
        let mut err = err;
        if matches!(err, RunError::Raised(_)) {
            let handler = self.ctx.frames.get_mut(frame_id).handlers.pop();
            if let Some(handler) = handler {
                let keep = handler.disposables_depth as usize;
                self.drain_disposables(frame_id, keep);
                let frame = self.ctx.frames.get_mut(frame_id);
                frame.stack.truncate(handler.stack_depth as usize);
                frame.ip = handler.resume as usize;
                if let RunError::Raised(raised) = err {
                    frame.pending = Some(raised);
                }
                self.tracer.on_catch(handler.resume as usize);
                return None;
            }
        }
        // No handler here: clean up and hand the error to the caller.
        self.drain_disposables(frame_id, 0);
        let frame = self.ctx.frames.get(frame_id);
        err.push_frame(frame.name, frame.line);
        Some(err)
    }

    /// The filter-matching instruction at the head of an except block.
    /// Pops `count` filter values; if any matches the pending exception it
    /// is materialized and bound, otherwise the exception re-raises.
    pub(crate) fn begin_except(&mut self, frame_id: FrameId, count: usize) -> RunResult<()> {
        let filters = {
            let frame = self.ctx.frames.get_mut(frame_id);
            let start = frame.stack.len().checked_sub(count).expect("operand stack underflow");
            frame.stack.split_off(start)
        };
        let raised = self
            .ctx
            .frames
            .get_mut(frame_id)
            .pending
            .take()
            .ok_or_else(|| RunError::internal("begin_except without a pending exception"))?;

        let mut matched = count == 0;
        for filter in &filters {
            if self.matches_filter(&raised, filter)? {
                matched = true;
                break;
            }
        }
        if matched {
            let value = self.materialize(&raised);
            self.ctx.frames.get_mut(frame_id).caught = Some(value);
            Ok(())
        } else {
            Err(RunError::Raised(raised))
        }
    }

    /// Whether a handler filter value catches the raised exception.
    fn matches_filter(&self, raised: &RaisedException, filter: &Value) -> RunResult<bool> {
        match filter {
            Value::ExcType(handler_kind) => {
                let kind = match &raised.payload {
                    ExcPayload::Simple(exc) => Some(exc.kind),
                    ExcPayload::Object(value) => self.exception_kind_of(value),
                };
                Ok(kind.is_some_and(|k| k.matches_handler(*handler_kind)))
            }
            Value::Ref(id) => match self.ctx.heap.get(*id) {
                HeapData::Class(_) | HeapData::Interface(_) => match &raised.payload {
                    ExcPayload::Object(value) => self.is_instance(value, filter),
                    ExcPayload::Simple(_) => Ok(false),
                },
                _ => Err(RunError::type_error(format!(
                    "exception filter must be an exception type, got '{}'",
                    filter.type_name(&self.ctx.heap)
                ))),
            },
            _ => Err(RunError::type_error(format!(
                "exception filter must be an exception type, got '{}'",
                filter.type_name(&self.ctx.heap)
            ))),
        }
    }

    /// Produces the value a handler binds: the original object for user
    /// exceptions, a fresh builtin exception value otherwise.
    fn materialize(&mut self, raised: &RaisedException) -> Value {
        match &raised.payload {
            ExcPayload::Object(value) => value.clone(),
            ExcPayload::Simple(exc) => self.ctx.heap.allocate_value(HeapData::Exception(exc.clone())),
        }
    }

    /// Resolves the builtin kind an exception value carries, walking the
    /// delegation chain of user objects.
    pub(crate) fn exception_kind_of(&self, value: &Value) -> Option<ExcKind> {
        match value {
            Value::ExcType(kind) => Some(*kind),
            Value::Ref(id) => match self.ctx.heap.get(*id) {
                HeapData::Exception(exc) => Some(exc.kind),
                HeapData::Object(_) => self.chain_exception_kind(*id),
                _ => None,
            },
            _ => None,
        }
    }

    /// Walks `base` links looking for an inherited exception kind.
    pub(crate) fn chain_exception_kind(&self, mut id: crate::heap::HeapId) -> Option<ExcKind> {
        loop {
            match self.ctx.heap.get(id) {
                HeapData::Object(object) => {
                    if let Some(kind) = object.exception_kind {
                        return Some(kind);
                    }
                    id = object.base?;
                }
                _ => return None,
            }
        }
    }

    /// Fails a generator permanently when resuming it raised.
    pub(crate) fn poison_generator(&mut self, generator: crate::heap::HeapId) {
        if let HeapData::Generator(gen) = self.ctx.heap.get_mut(generator) {
            gen.state = GenState::Done;
            gen.pending = None;
        }
    }
}
