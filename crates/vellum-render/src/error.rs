//! Error types for template compilation and rendering.
//!
//! Build-time failures roll up into [`CompileError`]; render-time failures
//! against a particular model instance are [`EvalError`]. Both are `Clone` so
//! a failed cache build can be handed to every waiter, and both carry byte
//! offsets into the template source.

use thiserror::Error;
use vellum_parser::{DirectiveError, SyntaxError};

/// A template failed to compile.
///
/// All structural problems are reported here, eagerly, at build time. A
/// template that compiles can never fail mid-render for structural reasons.
// Implemented by hand rather than derived: thiserror treats any field named
// `source` as the error's source, but `MalformedExpression::source` is the
// expression text, not an underlying error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Malformed markup (unterminated headers, bad expressions, ...).
    Syntax(SyntaxError),

    /// Duplicate or malformed `@inherits` directive.
    Directive(DirectiveError),

    /// Control blocks do not nest or balance.
    UnbalancedControl { offset: usize, detail: String },

    /// An embedded expression does not parse.
    MalformedExpression {
        source: String,
        offset: usize,
        detail: String,
    },

    /// An identifier does not resolve against the declared model type.
    Binding {
        name: String,
        offset: usize,
        detail: String,
    },
}

impl core::fmt::Display for CompileError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CompileError::Syntax(err) => core::fmt::Display::fmt(err, f),
            CompileError::Directive(err) => core::fmt::Display::fmt(err, f),
            CompileError::UnbalancedControl { offset, detail } => {
                write!(f, "unbalanced control block at offset {offset}: {detail}")
            }
            CompileError::MalformedExpression {
                source,
                offset,
                detail,
            } => {
                write!(f, "malformed expression `{source}` at offset {offset}: {detail}")
            }
            CompileError::Binding {
                name,
                offset,
                detail,
            } => {
                write!(f, "cannot bind `{name}` at offset {offset}: {detail}")
            }
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Syntax(err) => std::error::Error::source(err),
            CompileError::Directive(err) => std::error::Error::source(err),
            _ => None,
        }
    }
}

impl From<SyntaxError> for CompileError {
    fn from(err: SyntaxError) -> Self {
        CompileError::Syntax(err)
    }
}

impl From<DirectiveError> for CompileError {
    fn from(err: DirectiveError) -> Self {
        CompileError::Directive(err)
    }
}

/// A render failed against a specific model instance.
///
/// These are scoped to the single render call that triggered them; the
/// compiled unit and the cache are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// A member-access chain traversed through a missing or null value.
    #[error("cannot resolve `{expr}` at offset {offset}: {detail}")]
    Traversal {
        expr: String,
        offset: usize,
        detail: String,
    },

    /// A `@foreach` iterable did not evaluate to a sequence.
    #[error("`{expr}` at offset {offset} is not iterable")]
    NotIterable { expr: String, offset: usize },

    /// The model could not be serialized for binding.
    #[error("model serialization failed: {0}")]
    Serialize(String),
}

/// Umbrella error for the compose-and-render convenience path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_errors_convert() {
        let err: CompileError = SyntaxError::ExpectedExpression { offset: 3 }.into();
        assert!(matches!(err, CompileError::Syntax(_)));
        assert!(err.to_string().contains("offset 3"));
    }

    #[test]
    fn binding_error_names_the_identifier() {
        let err = CompileError::Binding {
            name: "Nmae".into(),
            offset: 12,
            detail: "not a member of `Person`".into(),
        };
        let message = err.to_string();
        assert!(message.contains("Nmae"));
        assert!(message.contains("12"));
    }

    #[test]
    fn umbrella_wraps_both_phases() {
        let compile: TemplateError = CompileError::UnbalancedControl {
            offset: 0,
            detail: "unclosed block".into(),
        }
        .into();
        assert!(matches!(compile, TemplateError::Compile(_)));

        let eval: TemplateError = EvalError::NotIterable {
            expr: "Model.Name".into(),
            offset: 0,
        }
        .into();
        assert!(matches!(eval, TemplateError::Eval(_)));
    }
}
