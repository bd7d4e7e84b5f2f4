//! String interning for identifiers, attribute names, and string literals.
//!
//! The compiler and VM both address names through `StringId`, which makes
//! attribute tables and symbol scopes cheap integer-keyed maps. Protocol
//! names (operator attributes, the iteration protocol, etc.) are interned
//! at construction in a fixed order so that `StaticStrings` variants convert
//! directly to their `StringId` without a lookup.

use ahash::AHashMap;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

/// Index into the intern table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Well-known strings interned at a fixed position.
///
/// The discriminant of each variant equals its `StringId`, which is
/// guaranteed by `Interns::new` interning them in declaration order.
/// Operator attributes are named for the operator token itself, so
/// `x + y` dispatches to an attribute literally called `"+"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
#[repr(u32)]
pub(crate) enum StaticStrings {
    #[strum(serialize = "+")]
    OpAdd,
    #[strum(serialize = "-")]
    OpSub,
    #[strum(serialize = "*")]
    OpMul,
    #[strum(serialize = "/")]
    OpDiv,
    #[strum(serialize = "%")]
    OpMod,
    #[strum(serialize = "==")]
    OpEq,
    #[strum(serialize = "!=")]
    OpNe,
    #[strum(serialize = "<")]
    OpLt,
    #[strum(serialize = "<=")]
    OpLe,
    #[strum(serialize = ">")]
    OpGt,
    #[strum(serialize = ">=")]
    OpGe,
    #[strum(serialize = "neg")]
    OpNeg,
    #[strum(serialize = "!")]
    OpNot,
    #[strum(serialize = "get_iterator")]
    GetIterator,
    #[strum(serialize = "move_next")]
    MoveNext,
    #[strum(serialize = "get_current")]
    GetCurrent,
    #[strum(serialize = "reset")]
    Reset,
    #[strum(serialize = "enter")]
    Enter,
    #[strum(serialize = "exit")]
    Exit,
    #[strum(serialize = "inherit")]
    Inherit,
    #[strum(serialize = "get_index")]
    GetIndex,
    #[strum(serialize = "set_index")]
    SetIndex,
    #[strum(serialize = "append")]
    Append,
    #[strum(serialize = "message")]
    Message,
    #[strum(serialize = "name")]
    Name,
    #[strum(serialize = "ordinal")]
    Ordinal,
    #[strum(serialize = "<module>")]
    Module,
    #[strum(serialize = "<lambda>")]
    Lambda,
    #[strum(serialize = "<comprehension>")]
    Comprehension,
}

impl From<StaticStrings> for StringId {
    fn from(s: StaticStrings) -> Self {
        Self(s as u32)
    }
}

/// Append-only intern table mapping strings to stable `StringId`s.
#[derive(Debug)]
pub struct Interns {
    strings: Vec<Box<str>>,
    ids: AHashMap<Box<str>, StringId>,
}

impl Default for Interns {
    fn default() -> Self {
        Self::new()
    }
}

impl Interns {
    /// Creates an intern table with all `StaticStrings` pre-interned.
    #[must_use]
    pub fn new() -> Self {
        let mut interns = Self {
            strings: Vec::new(),
            ids: AHashMap::new(),
        };
        for s in StaticStrings::iter() {
            let text: &'static str = s.into();
            let id = interns.intern(text);
            debug_assert_eq!(id, StringId(s as u32), "static string interned out of order");
        }
        interns
    }

    /// Interns a string, returning the existing id if already present.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("intern table exceeds u32"));
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.ids.insert(boxed, id);
        id
    }

    /// Returns the string for an id.
    ///
    /// # Panics
    /// Panics if `id` was not produced by this table.
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Looks up a string without interning it.
    #[must_use]
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        self.ids.get(s).copied()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_intern_round_trip() {
        let mut interns = Interns::new();
        let a = interns.intern("alpha");
        let b = interns.intern("beta");
        assert_ne!(a, b);
        assert_eq!(interns.intern("alpha"), a);
        assert_eq!(interns.get(a), "alpha");
        assert_eq!(interns.get(b), "beta");
    }

    #[test]
    fn test_static_strings_are_stable() {
        let interns = Interns::new();
        assert_eq!(interns.get(StaticStrings::OpAdd.into()), "+");
        assert_eq!(interns.get(StaticStrings::MoveNext.into()), "move_next");
        assert_eq!(interns.lookup("get_iterator"), Some(StaticStrings::GetIterator.into()));
    }
}
