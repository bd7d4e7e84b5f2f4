//! Runtime exception machinery.
//!
//! Two taxonomies exist: compiler-fatal conditions (malformed trees, a bug
//! in the front-end or compiler) which panic, and runtime exceptions which
//! are ordinary values flowing through `RunError` and the per-frame handler
//! stacks. Builtin exceptions travel as a lightweight `SimpleExc` until a
//! handler needs them as a value; user-defined exceptions keep their
//! original object so identity is preserved through raise/except.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    intern::{Interns, StringId},
    value::Value,
};

/// Result type for operations that can raise.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Builtin exception kinds.
///
/// The string form matches the name scripts use (e.g. `TypeError`), via
/// strum derives. `Exception` is the root: every kind matches a handler
/// filtering on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ExcKind {
    /// Root of the builtin hierarchy; matches any exception.
    Exception,
    /// Wrong number of arguments in a call.
    ArgumentError,
    /// Operand does not support the requested protocol.
    TypeError,
    /// Sequence index out of range.
    IndexError,
    /// Attribute not found on a value or its base chain.
    AttributeError,
    /// Missing dictionary key.
    KeyError,
    /// Missing operator overload or unsatisfied trait requirement.
    NotSupportedError,
    /// Produced by nested compile/eval entry points.
    SyntaxError,
    /// Host I/O failure surfaced to scripts.
    IoError,
    /// Everything else: bad generator state, division by zero, abort.
    RuntimeError,
}

impl ExcKind {
    /// Returns whether an exception of kind `self` is caught by a handler
    /// filtering on `handler`. Only `Exception` has subkinds.
    #[must_use]
    pub fn matches_handler(self, handler: Self) -> bool {
        self == handler || handler == Self::Exception
    }
}

/// A builtin exception before it is materialized as a heap value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SimpleExc {
    pub kind: ExcKind,
    pub message: Option<String>,
}

impl SimpleExc {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn bare(kind: ExcKind) -> Self {
        Self { kind, message: None }
    }
}

impl fmt::Display for SimpleExc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// The raised payload: a builtin exception or the user's original object.
#[derive(Debug, Clone)]
pub(crate) enum ExcPayload {
    Simple(SimpleExc),
    /// The original exception value, preserved so a handler (and the host,
    /// when unhandled) sees the object that was raised, not a wrapper.
    Object(Value),
}

/// One traceback entry, captured while unwinding.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TraceFrame {
    pub name: StringId,
    pub line: u32,
}

/// A raised, in-flight exception.
#[derive(Debug, Clone)]
pub(crate) struct RaisedException {
    pub payload: ExcPayload,
    /// Innermost first; frames are appended as the stack unwinds.
    pub frames: Vec<TraceFrame>,
}

/// Errors propagating through the VM.
#[derive(Debug)]
pub(crate) enum RunError {
    /// A catchable runtime exception.
    Raised(Box<RaisedException>),
    /// Host requested abort; never caught by script handlers.
    Aborted,
    /// A VM bug. Not catchable, reported verbatim to the host.
    Internal(String),
}

impl RunError {
    pub fn simple(kind: ExcKind, message: impl Into<String>) -> Self {
        Self::Raised(Box::new(RaisedException {
            payload: ExcPayload::Simple(SimpleExc::new(kind, message)),
            frames: Vec::new(),
        }))
    }

    pub fn from_value(value: Value) -> Self {
        Self::Raised(Box::new(RaisedException {
            payload: ExcPayload::Object(value),
            frames: Vec::new(),
        }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::simple(ExcKind::TypeError, message)
    }

    pub fn argument_error(message: impl Into<String>) -> Self {
        Self::simple(ExcKind::ArgumentError, message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::simple(ExcKind::AttributeError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::simple(ExcKind::IndexError, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::simple(ExcKind::KeyError, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::simple(ExcKind::NotSupportedError, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::simple(ExcKind::RuntimeError, message)
    }

    /// Appends a caller frame to the traceback while unwinding.
    pub fn push_frame(&mut self, name: StringId, line: u32) {
        if let Self::Raised(raised) = self {
            raised.frames.push(TraceFrame { name, line });
        }
    }
}

/// Host-facing unhandled exception: a rendered summary plus the traceback
/// string built while unwinding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    summary: String,
    traceback: String,
}

impl Exception {
    pub(crate) fn from_run_error(error: RunError, interns: &Interns, describe: impl Fn(&Value) -> String) -> Self {
        match error {
            RunError::Raised(raised) => {
                let summary = match &raised.payload {
                    ExcPayload::Simple(exc) => exc.to_string(),
                    ExcPayload::Object(value) => describe(value),
                };
                let mut traceback = String::from("traceback (most recent call first):\n");
                for frame in &raised.frames {
                    let _ = writeln!(traceback, "  in {}, line {}", interns.get(frame.name), frame.line);
                }
                Self { summary, traceback }
            }
            RunError::Aborted => Self {
                summary: "RuntimeError: execution aborted by host".to_owned(),
                traceback: String::new(),
            },
            RunError::Internal(msg) => Self {
                summary: format!("internal error: {msg}"),
                traceback: String::new(),
            },
        }
    }

    /// The `Kind: message` summary line.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// The rendered traceback, innermost frame first.
    #[must_use]
    pub fn traceback(&self) -> &str {
        &self.traceback
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.traceback.is_empty() {
            write!(f, "{}", self.summary)
        } else {
            write!(f, "{}{}", self.traceback, self.summary)
        }
    }
}
