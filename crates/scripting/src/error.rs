//! Error types for the scripting crate

use lslvm_config::ConfigError;
use lslvm_core::{EngineError, ScriptId};
use std::fmt;

/// Compile error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Malformed or unterminated literal or comment, unbalanced bracket
    Lex,
    /// Unexpected token, missing delimiter, malformed declaration
    Syntax,
    /// Undefined, duplicate or reserved name
    Name,
    /// No viable overload, invalid operator or cast
    Type,
    /// Every undefined label of one function
    Label,
    /// Compiler invariant violation
    Internal,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lex => "LexError",
            Self::Syntax => "SyntaxError",
            Self::Name => "NameError",
            Self::Type => "TypeError",
            Self::Label => "LabelError",
            Self::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

/// A compile error with the originating source line
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} at line {line}: {message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub line: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, line: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            message: message.into(),
        }
    }

    pub fn lex(line: usize, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Lex, line, message)
    }

    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Syntax, line, message)
    }

    pub fn name(line: usize, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Name, line, message)
    }

    pub fn type_error(line: usize, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Type, line, message)
    }

    pub fn label(line: usize, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Label, line, message)
    }

    pub fn internal(line: usize, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Internal, line, message)
    }
}

/// Runtime faults raised while a handler runs
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    /// Operand or argument of the wrong type
    #[error("Type error: {0}")]
    Type(String),

    /// A required argument was missing
    #[error("Null argument: {0}")]
    NullArgument(String),

    /// A sandbox limit was exceeded
    #[error("Sandbox limit exceeded: {0}")]
    Sandbox(String),

    /// Deprecated or unimplemented API member
    #[error("{0} is deprecated or not implemented")]
    NotImplemented(String),

    /// Too many nested user-function calls
    #[error("Call depth limit of {limit} exceeded")]
    CallDepthLimitExceeded { limit: usize },

    /// The event exceeded its execution budget or the host aborted it
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Division by zero and friends
    #[error("Math error: {0}")]
    Math(String),

    /// The VM reached an impossible state
    #[error("Internal fault: {0}")]
    Internal(String),
}

impl Fault {
    /// Whether the scheduler may abandon just the current event and carry on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Fault::Type(_)
                | Fault::NullArgument(_)
                | Fault::Sandbox(_)
                | Fault::NotImplemented(_)
                | Fault::CallDepthLimitExceeded { .. }
                | Fault::Aborted(_)
        )
    }
}

/// Script-specific error types
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// Compilation failed
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Runtime fault outside of event dispatch (e.g. variable initialization)
    #[error("Runtime fault: {0}")]
    Fault(#[from] Fault),

    /// Script not registered with the engine
    #[error("Script not found: {0}")]
    NotFound(ScriptId),

    /// Field inspection or restore failed
    #[error("Field error: {0}")]
    Field(String),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<ScriptError> for EngineError {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::Compile(e) => EngineError::Compile(e.to_string()),
            ScriptError::NotFound(id) => EngineError::NotFound(id.to_string()),
            other => EngineError::Script(other.to_string()),
        }
    }
}

/// Result type for scripting operations
pub type Result<T> = std::result::Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_display() {
        let err = CompileError::name(12, "'x' is already declared in this block");
        assert_eq!(err.to_string(), "NameError at line 12: 'x' is already declared in this block");
    }

    #[test]
    fn test_fault_classes() {
        assert!(Fault::Type("x".into()).is_recoverable());
        assert!(Fault::CallDepthLimitExceeded { limit: 4 }.is_recoverable());
        assert!(!Fault::Math("division by zero".into()).is_recoverable());
        assert!(!Fault::Internal("stack underflow".into()).is_recoverable());
    }
}
