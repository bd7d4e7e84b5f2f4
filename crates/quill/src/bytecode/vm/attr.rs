//! Attribute and index dispatch.
//!
//! Every attribute access funnels through `get_attribute`/`set_attribute`:
//! user objects resolve own attrs, then class members bound to the
//! original receiver, then the delegation chain; builtin values expose
//! their protocol methods as natives bound to the receiver.

use crate::{
    exception::{RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId},
    io::PrintWriter,
    object::{BoundMethod, BoundNative, NativeMethod, Property, SeqIter},
    tracer::VmTracer,
    value::{DictKey, Value},
};

use super::Vm;

/// Non-invoking resolution result; property getters run afterwards so the
/// heap borrow is released first.
enum AttrHit {
    Value(Value),
    Property(Property),
    NotFound,
}

impl<P: PrintWriter, T: VmTracer> Vm<'_, P, T> {
    pub(crate) fn get_attribute(&mut self, receiver: &Value, name: StringId) -> RunResult<Value> {
        if let Some(native) = self.native_attribute(receiver, name)? {
            return Ok(native);
        }
        if let Value::Ref(id) = receiver {
            if let HeapData::Object(_) = self.ctx.heap.get(*id) {
                match self.lookup_object_attr(*id, name, receiver) {
                    AttrHit::Value(value) => return Ok(value),
                    AttrHit::Property(property) => {
                        return self.invoke_with_receiver(property.getter, receiver.clone(), Vec::new());
                    }
                    AttrHit::NotFound => {}
                }
            }
        }
        Err(self.missing_attribute(receiver, name))
    }

    pub(crate) fn set_attribute(&mut self, receiver: &Value, name: StringId, value: Value) -> RunResult<()> {
        let Value::Ref(id) = receiver else {
            return Err(RunError::type_error(format!(
                "cannot set attributes on '{}'",
                receiver.type_name(&self.ctx.heap)
            )));
        };
        if !matches!(self.ctx.heap.get(*id), HeapData::Object(_)) {
            return Err(RunError::type_error(format!(
                "cannot set attributes on '{}'",
                receiver.type_name(&self.ctx.heap)
            )));
        }
        if let Some(property) = self.lookup_property(*id, name) {
            return match property.setter {
                Some(setter) => {
                    self.invoke_with_receiver(setter, receiver.clone(), vec![value])?;
                    Ok(())
                }
                None => Err(RunError::attribute_error(format!(
                    "property '{}' has no setter",
                    self.ctx.interns.get(name)
                ))),
            };
        }
        match self.ctx.heap.get_mut(*id) {
            HeapData::Object(object) => {
                object.attrs.insert(name, value);
                Ok(())
            }
            _ => unreachable!("checked above"),
        }
    }

    /// Walks own attrs, class members, then the delegation chain. Class
    /// methods and properties always bind to the original receiver, so a
    /// base method sees the full derived object through `self`.
    fn lookup_object_attr(&mut self, start: HeapId, name: StringId, root: &Value) -> AttrHit {
        let mut current = Some(start);
        while let Some(id) = current {
            let HeapData::Object(object) = self.ctx.heap.get(id) else {
                return AttrHit::NotFound;
            };
            if let Some(value) = object.attrs.get(&name) {
                return AttrHit::Value(value.clone());
            }
            if let Some(class_id) = object.class {
                if let HeapData::Class(class) = self.ctx.heap.get(class_id) {
                    if let Some(method) = class.methods.get(&name) {
                        let method = method.clone();
                        return AttrHit::Value(self.ctx.heap.allocate_value(HeapData::BoundMethod(BoundMethod {
                            receiver: root.clone(),
                            function: method,
                        })));
                    }
                    if let Some(property) = class.properties.get(&name) {
                        return AttrHit::Property(property.clone());
                    }
                }
            }
            let HeapData::Object(object) = self.ctx.heap.get(id) else {
                unreachable!("checked above")
            };
            current = object.base;
        }
        AttrHit::NotFound
    }

    /// Whether an object or anything on its chain defines `name` as an own
    /// attribute or class method. Used by operator dispatch to distinguish
    /// "no overload" from an error raised while running one.
    pub(crate) fn has_member(&self, start: HeapId, name: StringId) -> bool {
        let mut current = Some(start);
        while let Some(id) = current {
            let HeapData::Object(object) = self.ctx.heap.get(id) else {
                return false;
            };
            if object.attrs.contains_key(&name) {
                return true;
            }
            if let Some(class_id) = object.class {
                if let HeapData::Class(class) = self.ctx.heap.get(class_id) {
                    if class.methods.contains_key(&name) {
                        return true;
                    }
                }
            }
            current = object.base;
        }
        false
    }

    /// Finds a property declaration for `name` anywhere on the chain.
    fn lookup_property(&self, start: HeapId, name: StringId) -> Option<Property> {
        let mut current = Some(start);
        while let Some(id) = current {
            let HeapData::Object(object) = self.ctx.heap.get(id) else {
                return None;
            };
            if let Some(class_id) = object.class {
                if let HeapData::Class(class) = self.ctx.heap.get(class_id) {
                    if let Some(property) = class.properties.get(&name) {
                        return Some(property.clone());
                    }
                }
            }
            current = object.base;
        }
        None
    }

    /// Protocol methods and fixed attributes of builtin values.
    fn native_attribute(&mut self, receiver: &Value, name: StringId) -> RunResult<Option<Value>> {
        let get_iterator: StringId = StaticStrings::GetIterator.into();
        let move_next: StringId = StaticStrings::MoveNext.into();
        let get_current: StringId = StaticStrings::GetCurrent.into();
        let reset: StringId = StaticStrings::Reset.into();
        let append: StringId = StaticStrings::Append.into();
        let message: StringId = StaticStrings::Message.into();
        let attr_name: StringId = StaticStrings::Name.into();

        let bound = |method: NativeMethod, heap: &mut crate::heap::Heap| {
            Some(heap.allocate_value(HeapData::BoundNative(BoundNative {
                receiver: receiver.clone(),
                method,
            })))
        };

        let result = match receiver {
            Value::Str(_) if name == get_iterator => bound(NativeMethod::GetIterator, &mut self.ctx.heap),
            Value::ExcType(kind) if name == attr_name => {
                let text: &'static str = (*kind).into();
                Some(Value::Str(self.ctx.interns.intern(text)))
            }
            Value::Ref(id) => match self.ctx.heap.get(*id) {
                HeapData::List(_) if name == append => bound(NativeMethod::Append, &mut self.ctx.heap),
                HeapData::List(_) | HeapData::Tuple(_) | HeapData::Dict(_) | HeapData::Str(_) | HeapData::Range { .. }
                    if name == get_iterator =>
                {
                    bound(NativeMethod::GetIterator, &mut self.ctx.heap)
                }
                HeapData::SeqIter(_) | HeapData::Generator(_) if name == move_next => {
                    bound(NativeMethod::MoveNext, &mut self.ctx.heap)
                }
                HeapData::SeqIter(_) | HeapData::Generator(_) if name == get_current => {
                    bound(NativeMethod::GetCurrent, &mut self.ctx.heap)
                }
                HeapData::SeqIter(_) | HeapData::Generator(_) if name == reset => {
                    bound(NativeMethod::Reset, &mut self.ctx.heap)
                }
                // A generator is its own iterator.
                HeapData::Generator(_) if name == get_iterator => Some(receiver.clone()),
                HeapData::Exception(exc) if name == message => match &exc.message {
                    Some(text) => {
                        let text = text.clone();
                        Some(self.ctx.heap.allocate_value(HeapData::Str(text)))
                    }
                    None => Some(Value::Null),
                },
                HeapData::Exception(exc) if name == attr_name => {
                    let text: &'static str = exc.kind.into();
                    Some(Value::Str(self.ctx.interns.intern(text)))
                }
                HeapData::Class(class) if name == attr_name => Some(Value::Str(class.name)),
                HeapData::Interface(interface) if name == attr_name => Some(Value::Str(interface.name)),
                HeapData::Enum(en) if name == attr_name => Some(Value::Str(en.name)),
                HeapData::Enum(en) => en.variants.get(&name).map(|&variant| Value::Ref(variant)),
                _ => None,
            },
            _ => None,
        };
        Ok(result)
    }

    /// Shared "fresh cursor over a sequence" allocation.
    pub(crate) fn new_seq_iter(&mut self, seq: Value) -> Value {
        self.ctx.heap.allocate_value(HeapData::SeqIter(SeqIter::new(seq)))
    }

    fn missing_attribute(&self, receiver: &Value, name: StringId) -> RunError {
        RunError::attribute_error(format!(
            "'{}' has no attribute '{}'",
            receiver.type_name(&self.ctx.heap),
            self.ctx.interns.get(name)
        ))
    }

    // ------------------------------------------------------------------
    // indexing
    // ------------------------------------------------------------------

    pub(crate) fn load_index(&mut self, receiver: &Value, index: &Value) -> RunResult<Value> {
        match receiver {
            Value::Str(id) => {
                let text = self.ctx.interns.get(*id).to_owned();
                self.index_str(&text, index)
            }
            Value::Ref(id) => match self.ctx.heap.get(*id) {
                HeapData::List(items) | HeapData::Tuple(items) => {
                    let position = self.seq_position(index, items.len())?;
                    Ok(items[position].clone())
                }
                HeapData::Str(text) => {
                    let text = text.clone();
                    self.index_str(&text, index)
                }
                HeapData::Bytes(bytes) => {
                    let position = self.seq_position(index, bytes.len())?;
                    Ok(Value::Int(i64::from(bytes[position])))
                }
                HeapData::Dict(dict) => {
                    let key = DictKey::from_value(index, &self.ctx.heap, &self.ctx.interns)?;
                    dict.entries.get(&key).cloned().ok_or_else(|| {
                        RunError::key_error(crate::value::repr_value(index, &self.ctx.heap, &self.ctx.interns))
                    })
                }
                HeapData::Object(_) => {
                    let get_index: StringId = StaticStrings::GetIndex.into();
                    let callee = self.get_attribute(receiver, get_index)?;
                    self.invoke_value(callee, vec![index.clone()])
                }
                _ => Err(self.not_indexable(receiver)),
            },
            _ => Err(self.not_indexable(receiver)),
        }
    }

    pub(crate) fn store_index(&mut self, receiver: &Value, index: &Value, value: Value) -> RunResult<()> {
        match receiver {
            Value::Ref(id) => match self.ctx.heap.get(*id) {
                HeapData::List(items) => {
                    let position = self.seq_position(index, items.len())?;
                    match self.ctx.heap.get_mut(*id) {
                        HeapData::List(items) => items[position] = value,
                        _ => unreachable!("checked above"),
                    }
                    Ok(())
                }
                HeapData::Dict(_) => {
                    let key = DictKey::from_value(index, &self.ctx.heap, &self.ctx.interns)?;
                    match self.ctx.heap.get_mut(*id) {
                        HeapData::Dict(dict) => {
                            dict.entries.insert(key, value);
                        }
                        _ => unreachable!("checked above"),
                    }
                    Ok(())
                }
                HeapData::Object(_) => {
                    let set_index: StringId = StaticStrings::SetIndex.into();
                    let callee = self.get_attribute(receiver, set_index)?;
                    self.invoke_value(callee, vec![index.clone(), value])?;
                    Ok(())
                }
                _ => Err(self.not_indexable(receiver)),
            },
            _ => Err(self.not_indexable(receiver)),
        }
    }

    fn index_str(&mut self, text: &str, index: &Value) -> RunResult<Value> {
        let count = text.chars().count();
        let position = self.seq_position(index, count)?;
        let ch = text.chars().nth(position).expect("position checked against length");
        Ok(self.ctx.heap.allocate_value(HeapData::Str(ch.to_string())))
    }

    /// Validates an integer index against a sequence length.
    fn seq_position(&self, index: &Value, len: usize) -> RunResult<usize> {
        let Value::Int(raw) = index else {
            return Err(RunError::type_error(format!(
                "sequence index must be an integer, got '{}'",
                index.type_name(&self.ctx.heap)
            )));
        };
        usize::try_from(*raw)
            .ok()
            .filter(|&position| position < len)
            .ok_or_else(|| RunError::index_error(format!("index {raw} out of range for length {len}")))
    }

    fn not_indexable(&self, receiver: &Value) -> RunError {
        RunError::type_error(format!("'{}' does not support indexing", receiver.type_name(&self.ctx.heap)))
    }
}
