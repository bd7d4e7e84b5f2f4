//! The runtime value type and its core protocols.
//!
//! `Value` uses a hybrid design: small immediate values (integers, floats,
//! booleans, interned strings) are stored inline, while composite values
//! live in the [`Heap`] arena and are referenced via `Value::Ref`.

use std::fmt::Write as _;

use indexmap::IndexMap;

use crate::{
    exception::{ExcKind, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StringId},
    module::CodeId,
};

/// Builtin native functions registered in the VM global table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum NativeFn {
    Print,
    Range,
    Len,
    Str,
    Repr,
    TypeOf,
}

/// Primary runtime value.
///
/// `Clone` is cheap: `Ref` copies share identity through the arena, which is
/// exactly the aliasing the language exposes (lists and objects are
/// reference values; primitives are copied).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// An interned string (literals, names, attribute keys).
    Str(StringId),
    /// A compiled function body registered at module load.
    Code(CodeId),
    /// A builtin native function.
    Native(NativeFn),
    /// A builtin exception type used as a value (handler filters, bases).
    ExcType(ExcKind),
    /// Composite data in the arena.
    Ref(HeapId),
}

impl Value {
    /// Truthiness: `null`, `false`, zero, and empty composites are falsy.
    pub fn is_truthy(&self, heap: &Heap, interns: &Interns) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(id) => !interns.get(*id).is_empty(),
            Self::Code(_) | Self::Native(_) | Self::ExcType(_) => true,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => !s.is_empty(),
                HeapData::Bytes(b) => !b.is_empty(),
                HeapData::List(items) | HeapData::Tuple(items) => !items.is_empty(),
                HeapData::Dict(dict) => !dict.entries.is_empty(),
                _ => true,
            },
        }
    }

    /// Resolves either string representation to borrowed text.
    pub fn as_str<'a>(&self, heap: &'a Heap, interns: &'a Interns) -> Option<&'a str> {
        match self {
            Self::Str(id) => Some(interns.get(*id)),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// A short name for the value's type, used in error messages.
    pub fn type_name(&self, heap: &Heap) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Code(_) => "code",
            Self::Native(_) => "function",
            Self::ExcType(_) => "exception type",
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(_) => "str",
                HeapData::Bytes(_) => "bytes",
                HeapData::List(_) => "list",
                HeapData::Tuple(_) => "tuple",
                HeapData::Dict(_) => "dict",
                HeapData::Object(_) => "object",
                HeapData::Class(_) => "class",
                HeapData::Interface(_) => "interface",
                HeapData::Enum(_) => "enum",
                HeapData::Closure(_) | HeapData::BoundMethod(_) | HeapData::BoundNative(_) => "function",
                HeapData::Generator(_) => "generator",
                HeapData::SeqIter(_) => "iterator",
                HeapData::Range { .. } => "range",
                HeapData::Exception(_) => "exception",
            },
        }
    }
}

/// Hashable dictionary key subset of `Value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DictKey {
    Null,
    Bool(bool),
    Int(i64),
    Str(Box<str>),
}

impl DictKey {
    /// Converts a value to a key, resolving strings through interns/heap.
    ///
    /// Unhashable values (floats, composites) are a `TypeError`.
    pub fn from_value(value: &Value, heap: &Heap, interns: &Interns) -> RunResult<Self> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Str(id) => Ok(Self::Str(interns.get(*id).into())),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => Ok(Self::Str(s.as_str().into())),
                _ => Err(RunError::type_error(format!(
                    "unhashable key of type '{}'",
                    value.type_name(heap)
                ))),
            },
            _ => Err(RunError::type_error(format!(
                "unhashable key of type '{}'",
                value.type_name(heap)
            ))),
        }
    }

    pub fn to_value(&self, heap: &mut Heap) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Str(s) => heap.allocate_value(HeapData::Str(s.to_string())),
        }
    }
}

/// Insertion-ordered dictionary storage.
#[derive(Debug, Clone, Default)]
pub(crate) struct Dict {
    pub entries: IndexMap<DictKey, Value>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Structural equality.
///
/// `Ref` values compare by identity first; lists, tuples and computed
/// strings fall back to structural comparison. Objects without an `==`
/// overload compare by identity (operator dispatch is layered on top of
/// this in the VM's binary-op handler).
pub(crate) fn values_equal(a: &Value, b: &Value, heap: &Heap, interns: &Interns) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Native(x), Value::Native(y)) => x == y,
        (Value::ExcType(x), Value::ExcType(y)) => x == y,
        (Value::Code(x), Value::Code(y)) => x == y,
        _ => {
            // Strings compare textually across both representations.
            if let (Some(x), Some(y)) = (a.as_str(heap, interns), b.as_str(heap, interns)) {
                return x == y;
            }
            match (a, b) {
                (Value::Ref(x), Value::Ref(y)) => {
                    if x == y {
                        return true;
                    }
                    match (heap.get(*x), heap.get(*y)) {
                        (HeapData::List(xs), HeapData::List(ys)) | (HeapData::Tuple(xs), HeapData::Tuple(ys)) => {
                            xs.len() == ys.len()
                                && xs.iter().zip(ys).all(|(xi, yi)| values_equal(xi, yi, heap, interns))
                        }
                        (HeapData::Bytes(xs), HeapData::Bytes(ys)) => xs == ys,
                        (HeapData::Dict(xd), HeapData::Dict(yd)) => {
                            xd.entries.len() == yd.entries.len()
                                && xd.entries.iter().all(|(k, v)| {
                                    yd.entries.get(k).is_some_and(|other| values_equal(v, other, heap, interns))
                                })
                        }
                        (HeapData::Exception(xe), HeapData::Exception(ye)) => xe == ye,
                        _ => false,
                    }
                }
                _ => false,
            }
        }
    }
}

/// Renders a value the way `print` shows it: strings bare, everything else
/// as its repr.
pub(crate) fn display_value(value: &Value, heap: &Heap, interns: &Interns) -> String {
    if let Some(s) = value.as_str(heap, interns) {
        return s.to_owned();
    }
    repr_value(value, heap, interns)
}

/// Renders a value the way `repr` shows it: strings quoted, composites
/// rendered recursively.
pub(crate) fn repr_value(value: &Value, heap: &Heap, interns: &Interns) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(true) => "true".to_owned(),
        Value::Bool(false) => "false".to_owned(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() {
                format!("{f:.1}")
            } else {
                f.to_string()
            }
        }
        Value::Str(id) => format!("'{}'", interns.get(*id)),
        Value::Code(_) => "<code>".to_owned(),
        Value::Native(f) => format!("<native function {f}>"),
        Value::ExcType(kind) => format!("<exception type {kind}>"),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => format!("'{s}'"),
            HeapData::Bytes(b) => format!("<bytes len {}>", b.len()),
            HeapData::List(items) => {
                let mut out = String::from("[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&repr_value(item, heap, interns));
                }
                out.push(']');
                out
            }
            HeapData::Tuple(items) => {
                let mut out = String::from("(");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&repr_value(item, heap, interns));
                }
                out.push(')');
                out
            }
            HeapData::Dict(dict) => {
                let mut out = String::from("{");
                for (i, (key, val)) in dict.entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    match key {
                        DictKey::Null => out.push_str("null"),
                        DictKey::Bool(b) => {
                            let _ = write!(out, "{b}");
                        }
                        DictKey::Int(n) => {
                            let _ = write!(out, "{n}");
                        }
                        DictKey::Str(s) => {
                            let _ = write!(out, "'{s}'");
                        }
                    }
                    out.push_str(": ");
                    out.push_str(&repr_value(val, heap, interns));
                }
                out.push('}');
                out
            }
            HeapData::Object(obj) => match obj.class {
                Some(class_id) => match heap.get(class_id) {
                    HeapData::Class(class) => format!("<{} instance>", interns.get(class.name)),
                    _ => "<object>".to_owned(),
                },
                None => "<object>".to_owned(),
            },
            HeapData::Class(class) => format!("<class {}>", interns.get(class.name)),
            HeapData::Interface(iface) => format!("<interface {}>", interns.get(iface.name)),
            HeapData::Enum(en) => format!("<enum {}>", interns.get(en.name)),
            HeapData::Closure(closure) => format!("<function {}>", interns.get(closure.name)),
            HeapData::BoundMethod(_) | HeapData::BoundNative(_) => "<bound method>".to_owned(),
            HeapData::Generator(_) => "<generator>".to_owned(),
            HeapData::SeqIter(_) => "<iterator>".to_owned(),
            HeapData::Range { start, end } => format!("range({start}, {end})"),
            HeapData::Exception(exc) => exc.to_string(),
        },
    }
}

/// Concatenates two string values without interning the result.
pub(crate) fn concat_strings(a: &Value, b: &Value, heap: &mut Heap, interns: &Interns) -> Option<Value> {
    let joined = {
        let left = a.as_str(heap, interns)?;
        let right = b.as_str(heap, interns)?;
        let mut out = String::with_capacity(left.len() + right.len());
        out.push_str(left);
        out.push_str(right);
        out
    };
    Some(heap.allocate_value(HeapData::Str(joined)))
}
