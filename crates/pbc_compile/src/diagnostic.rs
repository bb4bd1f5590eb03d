//! The single error type every compilation phase converts into.
//!
//! Mirrors the reference implementation's five parallel exception classes
//! (`LexError`, `ParseError`, `TypeError`, `ModuleNotFoundError`, plus an
//! internal-failure case) as one closed enum, the idiomatic Rust shape for
//! "any of several phases can fail and the caller just wants one thing to
//! match on."

use pbc_base::Span;
use pbc_syntax::lexer::LexError;
use pbc_syntax::parser::ParseError;
use std::fmt;

use crate::check::TypeError;
use crate::loader::ModuleNotFoundError;

#[derive(Debug, Clone)]
pub enum CompileError {
    Lex(LexError),
    Parse(ParseError),
    Type(TypeError),
    ModuleNotFound(ModuleNotFoundError),
    /// An otherwise-unimplemented codegen path was reached. Caught at the
    /// codegen entry point so the CLI prints a diagnostic and exits non-zero
    /// instead of unwinding.
    Internal { message: String, span: Option<Span> },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex(e) => write!(f, "lex error: {e}"),
            CompileError::Parse(e) => write!(f, "parse error: {e}"),
            CompileError::Type(e) => write!(f, "type error: {e}"),
            CompileError::ModuleNotFound(e) => write!(f, "module error: {e}"),
            CompileError::Internal { message, span } => match span {
                Some(s) => write!(f, "internal error: {message} at {}..{}", s.start, s.end),
                None => write!(f, "internal error: {message}"),
            },
        }
    }
}

impl std::error::Error for CompileError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl From<TypeError> for CompileError {
    fn from(e: TypeError) -> Self {
        CompileError::Type(e)
    }
}

impl From<ModuleNotFoundError> for CompileError {
    fn from(e: ModuleNotFoundError) -> Self {
        CompileError::ModuleNotFound(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_displays_span_when_present() {
        let err = CompileError::Internal {
            message: "Unsupported(DictExpr)".to_string(),
            span: Some(Span::new(3, 9)),
        };
        assert_eq!(err.to_string(), "internal error: Unsupported(DictExpr) at 3..9");
    }
}
