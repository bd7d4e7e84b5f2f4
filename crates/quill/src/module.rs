//! Compiled modules and their constant pools.
//!
//! A module is the unit of compilation and caching: a name, an
//! index-addressed constant pool, and the pool index of the initializer
//! body that runs top-level statements. Everything here is plain data so
//! the whole module serializes into the bytecode cache.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{ast::InterfaceKind, bytecode::code::CodeObject};

/// Handle to a code object registered with a `VmContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeId(pub(crate) u32);

/// Handle to a module registered with a `VmContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub(crate) u32);

/// A class declaration in compiled form. Method bodies are pool indices of
/// `Constant::Code` entries; bases are evaluated on the stack at
/// `build_class` time, `base_count` of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub name: String,
    pub base_count: u32,
    pub constructor: Option<u32>,
    pub methods: Vec<(String, u32)>,
    /// `(name, getter pool index, setter pool index)`.
    pub properties: Vec<(String, u32, Option<u32>)>,
}

/// An interface or trait declaration in compiled form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub name: String,
    pub kind: InterfaceKind,
    pub required: Vec<String>,
}

/// An enum declaration in compiled form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumSpec {
    pub name: String,
    pub variants: Vec<String>,
}

/// One constant-pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Code(CodeObject),
    Class(ClassSpec),
    Interface(InterfaceSpec),
    Enum(EnumSpec),
}

/// A compiled module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub pool: Vec<Constant>,
    /// Pool index of the module initializer's code object.
    pub init: u32,
}

/// Dedup key for primitive constants. Floats key on their bit pattern so
/// `0.0` and `-0.0` stay distinct pool entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolKey {
    Int(i64),
    Float(u64),
    Str(Box<str>),
    Bytes(Vec<u8>),
}

/// Constant pool under construction, deduplicating primitive entries.
/// Code objects and declaration specs are always appended fresh.
#[derive(Debug, Default)]
pub(crate) struct ConstantPool {
    constants: Vec<Constant>,
    index: AHashMap<PoolKey, u32>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, constant: Constant) -> u32 {
        let key = match &constant {
            Constant::Int(i) => Some(PoolKey::Int(*i)),
            Constant::Float(f) => Some(PoolKey::Float(f.to_bits())),
            Constant::Str(s) => Some(PoolKey::Str(s.as_str().into())),
            Constant::Bytes(b) => Some(PoolKey::Bytes(b.clone())),
            Constant::Code(_) | Constant::Class(_) | Constant::Interface(_) | Constant::Enum(_) => None,
        };
        if let Some(key) = &key {
            if let Some(&existing) = self.index.get(key) {
                return existing;
            }
        }
        let id = u32::try_from(self.constants.len()).expect("constant pool exceeds u32");
        self.constants.push(constant);
        if let Some(key) = key {
            self.index.insert(key, id);
        }
        id
    }

    pub fn into_constants(self) -> Vec<Constant> {
        self.constants
    }
}
