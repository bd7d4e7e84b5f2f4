//! Scoped name resolution and local slot assignment.
//!
//! Slot numbers are handed out by one monotonic counter that continues
//! across nested function boundaries. A nested function therefore never
//! reuses a slot its enclosing function assigned, which is what lets a
//! closure frame start from a copy of the parent's locals and write through
//! to slots that pre-exist there. The counter restarts only for functions
//! declared directly at module level.
//!
//! Module-level names never get slots; they resolve to globals, as do names
//! explicitly declared `global` inside a function.

use ahash::{AHashMap, AHashSet};

use crate::intern::StringId;

/// Where a resolved name lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Local(u32),
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Module,
    Function,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    slots: AHashMap<StringId, u32>,
    /// Names declared `global` in this function.
    globals: AHashSet<StringId>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            slots: AHashMap::new(),
            globals: AHashSet::new(),
        }
    }
}

/// The compiler's scope stack.
#[derive(Debug)]
pub(crate) struct SymbolTable {
    scopes: Vec<Scope>,
    next_slot: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(ScopeKind::Module)],
            next_slot: 0,
        }
    }

    /// Enters a function scope. Directly under the module scope the slot
    /// counter restarts; nested under another function it continues.
    pub fn enter_function(&mut self) {
        if self.current().kind == ScopeKind::Module {
            self.next_slot = 0;
        }
        self.scopes.push(Scope::new(ScopeKind::Function));
    }

    pub fn exit_function(&mut self) {
        let popped = self.scopes.pop();
        debug_assert!(matches!(popped, Some(Scope { kind: ScopeKind::Function, .. })));
    }

    /// First slot not assigned to any declared name, for the temp allocator.
    pub fn next_slot(&self) -> u32 {
        self.next_slot
    }

    /// Raises the slot counter so fresh declarations land above `floor`.
    /// Called when entering a nested function, with the enclosing emission
    /// context's high-water mark, so nested locals never alias an enclosing
    /// temporary through the closure's copied slot map.
    pub fn bump_to(&mut self, floor: u32) {
        self.next_slot = self.next_slot.max(floor);
    }

    /// Declares a fresh local in the current function (parameters, loop
    /// variables, pattern bindings).
    ///
    /// # Panics
    /// Panics at module scope; top-level names are globals, not slots.
    pub fn declare_local(&mut self, name: StringId) -> u32 {
        assert_eq!(self.current().kind, ScopeKind::Function, "local declared at module scope");
        let slot = self.next_slot;
        self.next_slot += 1;
        self.current_mut().slots.insert(name, slot);
        slot
    }

    /// Marks a name as referring to the global table for the rest of the
    /// current function.
    pub fn declare_global(&mut self, name: StringId) {
        self.current_mut().globals.insert(name);
    }

    /// Resolves a read: a slot if the name is declared anywhere in the
    /// enclosing function chain, else the global table.
    pub fn resolve(&self, name: StringId) -> Resolution {
        for scope in self.scopes.iter().rev() {
            if scope.globals.contains(&name) {
                return Resolution::Global;
            }
            if scope.kind == ScopeKind::Module {
                break;
            }
            if let Some(&slot) = scope.slots.get(&name) {
                return Resolution::Local(slot);
            }
        }
        Resolution::Global
    }

    /// Resolves an assignment target. An undeclared, non-global name inside
    /// a function is implicitly declared as a new local; at module scope it
    /// is a global.
    pub fn resolve_assign(&mut self, name: StringId) -> Resolution {
        match self.resolve(name) {
            Resolution::Local(slot) => Resolution::Local(slot),
            Resolution::Global => {
                if self.current().kind == ScopeKind::Module || self.current().globals.contains(&name) {
                    Resolution::Global
                } else {
                    Resolution::Local(self.declare_local(name))
                }
            }
        }
    }

    fn current(&self) -> &Scope {
        self.scopes.last().expect("scope stack is never empty")
    }

    fn current_mut(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("scope stack is never empty")
    }
}
