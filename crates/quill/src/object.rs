//! Heap object shapes: instances, classes, closures, generators.
//!
//! Objects are attribute tables with an optional `base` delegate, so class
//! instances, enum variants and plain dynamic objects all share one shape.
//! Method and operator dispatch walk the object, then its class, then the
//! delegate chain.

use indexmap::IndexMap;

use crate::{
    ast::InterfaceKind,
    frame::FrameId,
    heap::HeapId,
    intern::StringId,
    module::CodeId,
    value::Value,
};

/// A dynamic object: a class instance, enum variant, or bare object.
#[derive(Debug, Clone, Default)]
pub(crate) struct Object {
    /// The class this object instantiates, when it has one.
    pub class: Option<HeapId>,
    /// Own attributes, in assignment order.
    pub attrs: IndexMap<StringId, Value>,
    /// Delegate instance set by the inherit protocol.
    pub base: Option<HeapId>,
    /// Interfaces and traits this object (or an ancestor) inherited.
    pub markers: Vec<HeapId>,
    /// Set when an exception type appears in the inherit chain; such
    /// objects may be raised and matched by handler filters.
    pub exception_kind: Option<crate::exception::ExcKind>,
}

impl Object {
    pub fn instance_of(class: HeapId) -> Self {
        Self {
            class: Some(class),
            ..Self::default()
        }
    }
}

/// A class value: constructor, methods and properties as closures over the
/// defining scope, plus the evaluated base list.
#[derive(Debug, Clone)]
pub(crate) struct Class {
    pub name: StringId,
    /// Base values in declaration order: classes, interfaces, traits, or
    /// builtin exception types.
    pub bases: Vec<Value>,
    pub constructor: Option<Value>,
    pub methods: IndexMap<StringId, Value>,
    pub properties: IndexMap<StringId, Property>,
}

/// An interface or trait declaration as a runtime value.
///
/// Interfaces are satisfied implicitly at `inherit`; traits additionally
/// require every listed method to exist on the inheriting object.
#[derive(Debug, Clone)]
pub(crate) struct Interface {
    pub name: StringId,
    pub kind: InterfaceKind,
    pub required: Vec<StringId>,
}

/// An enum declaration: a namespace of singleton variant objects.
#[derive(Debug, Clone)]
pub(crate) struct EnumObject {
    pub name: StringId,
    pub variants: IndexMap<StringId, HeapId>,
}

/// A computed attribute: getter plus optional setter, both closures.
#[derive(Debug, Clone)]
pub(crate) struct Property {
    pub getter: Value,
    pub setter: Option<Value>,
}

/// A function value closing over its defining frame.
///
/// The parent frame keeps its locals alive; calling the closure copies
/// those locals into the new frame so nested functions see the enclosing
/// scope's slots.
#[derive(Debug, Clone)]
pub(crate) struct Closure {
    pub name: StringId,
    pub code: CodeId,
    pub parent: Option<FrameId>,
}

/// A closure paired with the receiver it was loaded from.
#[derive(Debug, Clone)]
pub(crate) struct BoundMethod {
    pub receiver: Value,
    pub function: Value,
}

/// Native protocol methods available on builtin values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum NativeMethod {
    GetIterator,
    MoveNext,
    GetCurrent,
    Reset,
    Append,
}

/// A native method bound to its receiver, e.g. `list.append`.
#[derive(Debug, Clone)]
pub(crate) struct BoundNative {
    pub receiver: Value,
    pub method: NativeMethod,
}

/// Generator lifecycle.
///
/// Invoking a generator-flagged function runs its frame until the first
/// yield; the generator value wraps the suspended frame with that first
/// value buffered in `pending`, so the move-then-read protocol still sees
/// it on the first `move_next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub(crate) enum GenState {
    Suspended,
    Running,
    Done,
}

/// A suspended frame resumable via `move_next`/`get_current`.
#[derive(Debug, Clone)]
pub(crate) struct Generator {
    pub name: StringId,
    pub frame: FrameId,
    pub state: GenState,
    /// Value yielded before the first `move_next` consumed it.
    pub pending: Option<Value>,
    /// The most recently consumed yield, read by `get_current`.
    pub current: Value,
}

impl Generator {
    pub fn suspended(name: StringId, frame: FrameId, first: Value) -> Self {
        Self {
            name,
            frame,
            state: GenState::Suspended,
            pending: Some(first),
            current: Value::Null,
        }
    }
}

/// Cursor over a builtin sequence (list, tuple, string, range, dict keys).
///
/// `index` is one past the element `get_current` returns, matching the
/// move-then-read iteration protocol.
#[derive(Debug, Clone)]
pub(crate) struct SeqIter {
    pub seq: Value,
    pub index: usize,
}

impl SeqIter {
    pub fn new(seq: Value) -> Self {
        Self { seq, index: 0 }
    }
}
