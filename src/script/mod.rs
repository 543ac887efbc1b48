//! Execution backends for generated render scripts.
//!
//! The template compiler only produces source text and a position map; a
//! [`Backend`] turns that text into something callable. [`Interpreter`] is
//! the built-in backend.

mod interp;
mod lexer;
mod parser;

use std::fmt;

use thiserror::Error;

use crate::tpl::render_context::RenderContext;

pub use interp::Interpreter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    Syntax,
    Reference,
    Type,
    Range,
    /// Raised by the render context itself, e.g. an unknown filter.
    Error,
}

impl fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScriptErrorKind::Syntax => "SyntaxError",
            ScriptErrorKind::Reference => "ReferenceError",
            ScriptErrorKind::Type => "TypeError",
            ScriptErrorKind::Range => "RangeError",
            ScriptErrorKind::Error => "Error",
        })
    }
}

/// A failure while compiling or running a render script.
///
/// `line` is the 1-based line of the generated source the failure comes
/// from, when the backend can tell.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub message: String,
    pub line: Option<usize>,
}

impl ScriptError {
    pub fn new(kind: ScriptErrorKind, message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
        }
    }
}

/// A compiled render function. Stateless: every call gets its own context.
pub trait RenderFn: Send + Sync {
    fn call(&self, ctx: &mut RenderContext<'_>) -> Result<(), ScriptError>;
}

/// Compiles render-script source into a [`RenderFn`].
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn compile(&self, source: &str) -> Result<Box<dyn RenderFn>, ScriptError>;

    /// Whether errors from this backend carry generated-source line numbers
    /// that can be mapped back to the template.
    fn reports_line_numbers(&self) -> bool {
        true
    }
}
