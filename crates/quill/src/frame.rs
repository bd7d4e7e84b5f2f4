//! Activation records and the frame arena.
//!
//! Frames live in an arena so closures and generators can hold a plain
//! `FrameId` back-reference to their lexical parent or suspended state.
//! Ids of plainly returned frames are recycled; a frame captured by a
//! closure or generator is pinned for the life of the context.

use std::rc::Rc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    bytecode::code::CodeObject,
    exception::RaisedException,
    intern::StringId,
    module::ModuleId,
    value::Value,
};

/// Index of a frame in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u32);

impl FrameId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One entry on a frame's handler stack: where to resume and how much of
/// the operand and disposables stacks to keep when unwinding to it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HandlerEntry {
    pub resume: u32,
    pub stack_depth: u32,
    pub disposables_depth: u32,
}

/// One activation record.
#[derive(Debug)]
pub(crate) struct Frame {
    pub code: Rc<CodeObject>,
    pub module: ModuleId,
    /// Function name for tracebacks.
    pub name: StringId,
    pub self_ref: Option<Value>,
    /// Slot-addressed locals. A closure frame starts from a copy of its
    /// parent's map; membership here is what the write-through check tests.
    pub locals: AHashMap<u32, Value>,
    pub stack: Vec<Value>,
    pub parent: Option<FrameId>,
    pub handlers: SmallVec<[HandlerEntry; 2]>,
    /// Values whose `exit` must run when their with-block is left, on every
    /// exit path including unwinding.
    pub disposables: SmallVec<[Value; 2]>,
    /// Exception bound by the innermost entered except-block.
    pub caught: Option<Value>,
    /// In-flight exception delivered to a handler, consumed by the
    /// handler's filter-matching instruction.
    pub pending: Option<Box<RaisedException>>,
    pub ip: usize,
    pub yielded: bool,
    /// Pinned in the arena: a closure or generator references this frame.
    pub captured: bool,
    /// Source line of the call site currently executing, for tracebacks.
    pub line: u32,
}

impl Frame {
    pub fn new(
        code: Rc<CodeObject>,
        module: ModuleId,
        name: StringId,
        self_ref: Option<Value>,
        locals: AHashMap<u32, Value>,
        parent: Option<FrameId>,
    ) -> Self {
        Self {
            code,
            module,
            name,
            self_ref,
            locals,
            stack: Vec::new(),
            parent,
            handlers: SmallVec::new(),
            disposables: SmallVec::new(),
            caught: None,
            pending: None,
            ip: 0,
            yielded: false,
            captured: false,
            line: 0,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }
}

/// Arena of frames with id recycling for uncaptured frames.
#[derive(Debug, Default)]
pub(crate) struct Frames {
    frames: Vec<Option<Frame>>,
    free: Vec<FrameId>,
}

impl Frames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) -> FrameId {
        if let Some(id) = self.free.pop() {
            self.frames[id.index()] = Some(frame);
            id
        } else {
            let id = FrameId(u32::try_from(self.frames.len()).expect("frame arena exceeds u32"));
            self.frames.push(Some(frame));
            id
        }
    }

    /// # Panics
    /// Panics if the frame was released.
    pub fn get(&self, id: FrameId) -> &Frame {
        self.frames[id.index()].as_ref().expect("frame was released")
    }

    /// # Panics
    /// Panics if the frame was released.
    pub fn get_mut(&mut self, id: FrameId) -> &mut Frame {
        self.frames[id.index()].as_mut().expect("frame was released")
    }

    /// Drops a finished frame unless something captured it.
    pub fn release(&mut self, id: FrameId) {
        let frame = self.frames[id.index()].as_ref().expect("frame was released");
        if frame.captured {
            return;
        }
        self.frames[id.index()] = None;
        self.free.push(id);
    }

    pub fn mark_captured(&mut self, id: FrameId) {
        self.get_mut(id).captured = true;
    }

    /// Copies a frame's locals for a child frame it lexically encloses.
    /// Temporary slots are skipped: they are private to one activation, and
    /// a nested function's own slots may share their numbering.
    pub fn snapshot_locals(&self, id: FrameId) -> AHashMap<u32, Value> {
        let frame = self.get(id);
        let base = frame.code.temp_base;
        frame
            .locals
            .iter()
            .filter(|&(&slot, _)| slot < base)
            .map(|(&slot, value)| (slot, value.clone()))
            .collect()
    }

    /// Stores into a local slot, writing through to every ancestor in which
    /// the slot names a declared variable. The walk stops at the first
    /// ancestor missing the slot, and at any ancestor for which the slot is
    /// in temporary territory; slots first assigned after a child was
    /// created are never propagated.
    pub fn store_local(&mut self, id: FrameId, slot: u32, value: Value) {
        self.get_mut(id).locals.insert(slot, value.clone());
        let mut current = self.get(id).parent;
        while let Some(parent_id) = current {
            let parent = self.get_mut(parent_id);
            if slot >= parent.code.temp_base {
                break;
            }
            if let Some(existing) = parent.locals.get_mut(&slot) {
                *existing = value.clone();
            } else {
                break;
            }
            current = parent.parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{bytecode::code::CodeFlags, intern::Interns};

    fn test_frame(interns: &mut Interns, locals: AHashMap<u32, Value>, parent: Option<FrameId>) -> Frame {
        let code = Rc::new(CodeObject {
            name: "f".to_owned(),
            params: Vec::new(),
            flags: CodeFlags::default(),
            local_count: 8,
            temp_base: 4,
            instructions: Vec::new(),
        });
        Frame::new(code, ModuleId(0), interns.intern("f"), None, locals, parent)
    }

    #[test]
    fn test_release_and_reuse() {
        let mut interns = Interns::new();
        let mut frames = Frames::new();
        let a = frames.push(test_frame(&mut interns, AHashMap::new(), None));
        frames.release(a);
        let b = frames.push(test_frame(&mut interns, AHashMap::new(), None));
        assert_eq!(a, b);
    }

    #[test]
    fn test_captured_frame_is_pinned() {
        let mut interns = Interns::new();
        let mut frames = Frames::new();
        let a = frames.push(test_frame(&mut interns, AHashMap::new(), None));
        frames.mark_captured(a);
        frames.release(a);
        let b = frames.push(test_frame(&mut interns, AHashMap::new(), None));
        assert_ne!(a, b);
    }

    #[test]
    fn test_write_through_to_pre_existing_slot() {
        let mut interns = Interns::new();
        let mut frames = Frames::new();
        let mut outer_locals = AHashMap::new();
        outer_locals.insert(0, Value::Int(1));
        let outer = frames.push(test_frame(&mut interns, outer_locals, None));
        let inner_locals = frames.snapshot_locals(outer);
        let inner = frames.push(test_frame(&mut interns, inner_locals, Some(outer)));

        frames.store_local(inner, 0, Value::Int(5));
        assert!(matches!(frames.get(outer).locals.get(&0), Some(Value::Int(5))));
    }

    #[test]
    fn test_fresh_slot_does_not_propagate() {
        let mut interns = Interns::new();
        let mut frames = Frames::new();
        let outer = frames.push(test_frame(&mut interns, AHashMap::new(), None));
        let inner = frames.push(test_frame(&mut interns, AHashMap::new(), Some(outer)));

        frames.store_local(inner, 3, Value::Int(9));
        assert!(frames.get(outer).locals.get(&3).is_none());
        assert!(matches!(frames.get(inner).locals.get(&3), Some(Value::Int(9))));
    }

    #[test]
    fn test_temp_slot_never_propagates() {
        let mut interns = Interns::new();
        let mut frames = Frames::new();
        let mut outer_locals = AHashMap::new();
        outer_locals.insert(4, Value::Int(1));
        let outer = frames.push(test_frame(&mut interns, outer_locals, None));
        let inner = frames.push(test_frame(&mut interns, AHashMap::new(), Some(outer)));

        // Slot 4 sits at the parent's temp base; a nested function whose own
        // slots begin there must not clobber the parent's live temporary.
        frames.store_local(inner, 4, Value::Int(9));
        assert!(matches!(frames.get(outer).locals.get(&4), Some(Value::Int(1))));
        assert!(matches!(frames.get(inner).locals.get(&4), Some(Value::Int(9))));
    }

    #[test]
    fn test_snapshot_excludes_temp_slots() {
        let mut interns = Interns::new();
        let mut frames = Frames::new();
        let mut locals = AHashMap::new();
        locals.insert(0, Value::Int(10));
        locals.insert(5, Value::Int(99));
        let outer = frames.push(test_frame(&mut interns, locals, None));

        let snapshot = frames.snapshot_locals(outer);
        assert!(matches!(snapshot.get(&0), Some(Value::Int(10))));
        assert!(snapshot.get(&5).is_none());
    }
}
