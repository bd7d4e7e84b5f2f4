//! Arena storage for composite runtime values.
//!
//! Immediate values live inline in [`Value`](crate::value::Value); everything
//! with identity or interior structure is allocated here and addressed by
//! `HeapId`. Objects are never freed individually: the arena lives exactly as
//! long as its `VmContext`, which keeps delegation links and captured frames
//! valid without reference counting.

use crate::{
    exception::SimpleExc,
    object::{BoundMethod, BoundNative, Class, Closure, EnumObject, Generator, Interface, Object, SeqIter},
    value::{Dict, Value},
};

/// Index of a value in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct HeapId(u32);

impl HeapId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Composite runtime data addressed by `HeapId`.
#[derive(Debug, Clone)]
pub(crate) enum HeapData {
    /// A computed (non-interned) string.
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Dict),
    /// A plain dynamic object or class instance.
    Object(Object),
    Class(Class),
    Interface(Interface),
    Enum(EnumObject),
    Closure(Closure),
    BoundMethod(BoundMethod),
    /// A native protocol method bound to a receiver.
    BoundNative(BoundNative),
    Generator(Generator),
    /// A native iterator over a sequence value.
    SeqIter(SeqIter),
    /// Half-open integer range produced by `range(start, end)`.
    Range { start: i64, end: i64 },
    /// A builtin exception materialized as a value.
    Exception(SimpleExc),
}

/// The arena itself.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<HeapData>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates data, returning its id.
    pub(crate) fn allocate(&mut self, data: HeapData) -> HeapId {
        let id = HeapId(u32::try_from(self.slots.len()).expect("heap exceeds u32 slots"));
        self.slots.push(data);
        id
    }

    /// Allocates and wraps in a `Value::Ref` in one step.
    pub(crate) fn allocate_value(&mut self, data: HeapData) -> Value {
        Value::Ref(self.allocate(data))
    }

    /// # Panics
    /// Panics if `id` was not produced by this heap.
    pub(crate) fn get(&self, id: HeapId) -> &HeapData {
        &self.slots[id.index()]
    }

    /// # Panics
    /// Panics if `id` was not produced by this heap.
    pub(crate) fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.slots[id.index()]
    }

    /// Number of live allocations (diagnostics only).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_allocate_and_get() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::Str("hello".to_owned()));
        let b = heap.allocate(HeapData::List(vec![Value::Int(1), Value::Int(2)]));
        assert_ne!(a, b);
        match heap.get(a) {
            HeapData::Str(s) => assert_eq!(s, "hello"),
            other => panic!("unexpected heap data: {other:?}"),
        }
        match heap.get_mut(b) {
            HeapData::List(items) => items.push(Value::Int(3)),
            other => panic!("unexpected heap data: {other:?}"),
        }
        match heap.get(b) {
            HeapData::List(items) => assert_eq!(items.len(), 3),
            other => panic!("unexpected heap data: {other:?}"),
        }
    }
}
