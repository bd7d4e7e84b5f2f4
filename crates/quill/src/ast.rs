//! The tree interface consumed by the bytecode compiler.
//!
//! Quill's front-end (lexer/parser) lives outside this crate; embedders hand
//! the compiler a `Module` built from these nodes. Every node carries a
//! source location so the compiler can record it on emitted instructions
//! for traceback generation.

use serde::{Deserialize, Serialize};

/// A source position, tracked per statement/expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Loc {
    pub line: u32,
    pub column: u32,
}

impl Loc {
    #[must_use]
    pub fn line(line: u32) -> Self {
        Self { line, column: 0 }
    }
}

/// A whole compilation unit: the statements of a module body.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub body: Vec<Stmt>,
}

impl Module {
    #[must_use]
    pub fn new(body: Vec<Stmt>) -> Self {
        Self { body }
    }
}

/// Binary operators with native semantics and operator-attribute fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr, Serialize, Deserialize)]
#[repr(i32)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr, Serialize, Deserialize)]
#[repr(i32)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Literal constant values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

/// Assignment targets: plain names, attributes, or indexed slots.
#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(String),
    Attr { obj: Expr, name: String },
    Index { obj: Expr, index: Expr },
}

/// Loop-variable binding for `foreach`: a single name or a tuple pattern.
#[derive(Debug, Clone)]
pub enum ForTarget {
    Name(String),
    Tuple(Vec<String>),
}

/// One arm of a `match` statement.
#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Vec<Stmt>,
    pub loc: Loc,
}

/// Patterns usable in `match` arms.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Always matches, binds nothing.
    Wildcard,
    /// Always matches, binds the subject to a name.
    Binding(String),
    /// Matches when the subject equals the literal.
    Literal(Literal),
    /// Matches when the subject equals the evaluated expression
    /// (enum variants, constants held in names).
    Value(Expr),
    /// Matches when the subject is an instance of the evaluated type
    /// (class, interface, trait, enum, or exception type).
    Type(Expr),
    /// Structural tuple extraction; each element pattern must match.
    Tuple(Vec<Pattern>),
}

/// A function parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
}

impl Param {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }
}

/// A named function or method declaration.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    /// When true, the final parameter collects extra arguments into a tuple.
    pub variadic: bool,
    pub body: Vec<Stmt>,
    pub loc: Loc,
}

/// A property member of a class: a getter body plus an optional setter.
#[derive(Debug, Clone)]
pub struct PropertyDecl {
    pub name: String,
    pub getter: Vec<Stmt>,
    /// Setter parameter name and body.
    pub setter: Option<(String, Vec<Stmt>)>,
    pub loc: Loc,
}

/// A class declaration: bases, optional constructor, methods, properties.
#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: String,
    pub bases: Vec<Expr>,
    pub constructor: Option<FunctionDecl>,
    pub methods: Vec<FunctionDecl>,
    pub properties: Vec<PropertyDecl>,
    pub loc: Loc,
}

/// Interface-like declarations are lists of required method names,
/// verified at inherit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceKind {
    Interface,
    Trait,
}

#[derive(Debug, Clone)]
pub struct InterfaceDecl {
    pub name: String,
    pub kind: InterfaceKind,
    pub required: Vec<String>,
    pub loc: Loc,
}

/// An enum declaration; variants become attribute-accessible singletons.
#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<String>,
    pub loc: Loc,
}

/// Statements.
#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Assign {
        target: AssignTarget,
        value: Expr,
        loc: Loc,
    },
    AugAssign {
        target: AssignTarget,
        op: BinOp,
        value: Expr,
        loc: Loc,
    },
    /// Declares names as resolving through the VM global table.
    Global {
        names: Vec<String>,
        loc: Loc,
    },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        orelse: Vec<Stmt>,
        loc: Loc,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        loc: Loc,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
        loc: Loc,
    },
    /// C-style loop; the step ("after-thought") runs after the body on
    /// every iteration except before the first.
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Vec<Stmt>,
        loc: Loc,
    },
    Foreach {
        target: ForTarget,
        iter: Expr,
        body: Vec<Stmt>,
        loc: Loc,
    },
    Break(Loc),
    Continue(Loc),
    Return {
        value: Option<Expr>,
        loc: Loc,
    },
    Yield {
        value: Expr,
        loc: Loc,
    },
    Raise {
        value: Expr,
        loc: Loc,
    },
    /// `try` with a single handler clause carrying exception-type filters
    /// and an optional binding name.
    Try {
        body: Vec<Stmt>,
        filters: Vec<Expr>,
        binding: Option<String>,
        handler: Vec<Stmt>,
        loc: Loc,
    },
    With {
        target: Expr,
        binding: Option<String>,
        body: Vec<Stmt>,
        loc: Loc,
    },
    Match {
        subject: Expr,
        arms: Vec<MatchArm>,
        loc: Loc,
    },
    FunctionDecl(FunctionDecl),
    ClassDecl(ClassDecl),
    InterfaceDecl(InterfaceDecl),
    EnumDecl(EnumDecl),
}

/// Expressions.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal, Loc),
    Name(String, Loc),
    SelfRef(Loc),
    /// The active exception inside a handler body (bare re-raise support).
    Exception(Loc),
    Attr {
        obj: Box<Expr>,
        name: String,
        loc: Loc,
    },
    Index {
        obj: Box<Expr>,
        index: Box<Expr>,
        loc: Loc,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        /// Trailing tuple of extra arguments, unpacked at the call site.
        var_arg: Option<Box<Expr>>,
        loc: Loc,
    },
    /// Explicit base-inherit invocation inside a constructor.
    SuperCall {
        base: Box<Expr>,
        args: Vec<Expr>,
        loc: Loc,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        loc: Loc,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        loc: Loc,
    },
    And {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        loc: Loc,
    },
    Or {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        loc: Loc,
    },
    List(Vec<Expr>, Loc),
    Tuple(Vec<Expr>, Loc),
    Dict(Vec<(Expr, Expr)>, Loc),
    Lambda {
        params: Vec<Param>,
        body: Vec<Stmt>,
        loc: Loc,
    },
    /// A list comprehension or generator expression, desugared by the
    /// compiler into a nested anonymous function.
    Comprehension {
        kind: ComprehensionKind,
        element: Box<Expr>,
        target: ForTarget,
        iter: Box<Expr>,
        cond: Option<Box<Expr>>,
        loc: Loc,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComprehensionKind {
    List,
    Generator,
}

impl Expr {
    /// Returns the location of this expression.
    #[must_use]
    pub fn loc(&self) -> Loc {
        match self {
            Self::Literal(_, loc)
            | Self::Name(_, loc)
            | Self::SelfRef(loc)
            | Self::Exception(loc)
            | Self::List(_, loc)
            | Self::Tuple(_, loc)
            | Self::Dict(_, loc) => *loc,
            Self::Attr { loc, .. }
            | Self::Index { loc, .. }
            | Self::Call { loc, .. }
            | Self::SuperCall { loc, .. }
            | Self::Binary { loc, .. }
            | Self::Unary { loc, .. }
            | Self::And { loc, .. }
            | Self::Or { loc, .. }
            | Self::Lambda { loc, .. }
            | Self::Comprehension { loc, .. } => *loc,
        }
    }

    // Convenience constructors used by front-ends and tests. Locations
    // default to zero; front-ends set real positions via the struct forms.

    #[must_use]
    pub fn null() -> Self {
        Self::Literal(Literal::Null, Loc::default())
    }

    #[must_use]
    pub fn int(v: i64) -> Self {
        Self::Literal(Literal::Int(v), Loc::default())
    }

    #[must_use]
    pub fn float(v: f64) -> Self {
        Self::Literal(Literal::Float(v), Loc::default())
    }

    #[must_use]
    pub fn bool(v: bool) -> Self {
        Self::Literal(Literal::Bool(v), Loc::default())
    }

    #[must_use]
    pub fn str(v: &str) -> Self {
        Self::Literal(Literal::Str(v.to_owned()), Loc::default())
    }

    #[must_use]
    pub fn name(n: &str) -> Self {
        Self::Name(n.to_owned(), Loc::default())
    }

    #[must_use]
    pub fn attr(obj: Self, name: &str) -> Self {
        Self::Attr {
            obj: Box::new(obj),
            name: name.to_owned(),
            loc: Loc::default(),
        }
    }

    #[must_use]
    pub fn index(obj: Self, index: Self) -> Self {
        Self::Index {
            obj: Box::new(obj),
            index: Box::new(index),
            loc: Loc::default(),
        }
    }

    #[must_use]
    pub fn call(callee: Self, args: Vec<Self>) -> Self {
        Self::Call {
            callee: Box::new(callee),
            args,
            var_arg: None,
            loc: Loc::default(),
        }
    }

    #[must_use]
    pub fn binary(op: BinOp, lhs: Self, rhs: Self) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            loc: Loc::default(),
        }
    }

    #[must_use]
    pub fn unary(op: UnaryOp, operand: Self) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
            loc: Loc::default(),
        }
    }

    #[must_use]
    pub fn and(lhs: Self, rhs: Self) -> Self {
        Self::And {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            loc: Loc::default(),
        }
    }

    #[must_use]
    pub fn or(lhs: Self, rhs: Self) -> Self {
        Self::Or {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            loc: Loc::default(),
        }
    }
}

impl Stmt {
    /// Expression statement.
    #[must_use]
    pub fn expr(e: Expr) -> Self {
        Self::Expr(e)
    }

    /// Assignment to a plain name.
    #[must_use]
    pub fn assign(name: &str, value: Expr) -> Self {
        Self::Assign {
            target: AssignTarget::Name(name.to_owned()),
            value,
            loc: Loc::default(),
        }
    }

    /// `return value`.
    #[must_use]
    pub fn ret(value: Expr) -> Self {
        Self::Return {
            value: Some(value),
            loc: Loc::default(),
        }
    }
}
