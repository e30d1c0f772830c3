//! Pipeline-specific error types.

use crate::pipeline::connection::Closed;
use thiserror::Error;

/// Errors that can occur within the pipeline system.
///
/// Construction-time variants (`Structural`, `DuplicateName`, `Parse`,
/// `AmbiguousPort`, `Config`, `Cycle`) abort before any module starts.
/// Runtime variants raised inside a module's work loop fault only that module.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Duplicate module name: {0}")]
    DuplicateName(String),

    #[error("Parse error in token {token:?}: {reason}")]
    Parse { token: String, reason: String },

    #[error("Ambiguous port on module {module:?}: {count} {direction} ports, name one explicitly")]
    AmbiguousPort {
        module: String,
        direction: &'static str,
        count: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: cannot {operation} while engine is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Cycle detected through module {0:?} (mark a port as feedback to allow it)")]
    Cycle(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Type mismatch for field {field:?}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Missing field {0:?}")]
    MissingField(String),

    #[error("Connection closed")]
    Closed,

    #[error("Module {module:?} error: {message}")]
    Module { module: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Shorthand for a module-local runtime error.
    pub fn module(module: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Module {
            module: module.into(),
            message: message.into(),
        }
    }

    /// True for the end-of-stream signal, which is not a fault.
    pub fn is_closed(&self) -> bool {
        matches!(self, PipelineError::Closed)
    }
}

impl From<Closed> for PipelineError {
    fn from(_: Closed) -> Self {
        PipelineError::Closed
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_display() {
        let err = PipelineError::InvalidState {
            operation: "clean",
            state: "Running".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state: cannot clean while engine is Running"
        );
    }

    #[test]
    fn test_closed_conversion() {
        let err: PipelineError = Closed.into();
        assert!(err.is_closed());
        assert!(!PipelineError::Config("x".into()).is_closed());
    }

    #[test]
    fn test_ambiguous_port_display() {
        let err = PipelineError::AmbiguousPort {
            module: "detector".to_string(),
            direction: "input",
            count: 2,
        };
        assert!(err.to_string().contains("detector"));
        assert!(err.to_string().contains("2 input ports"));
    }
}
