//! Error handling for the vidpipe-rs application layer
//!
//! Pipeline-level failures are [`PipelineError`]s; this module wraps them
//! together with config, I/O and serialization failures for code that loads
//! configuration and drives engines.

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for vidpipe-rs operations
#[derive(Error, Debug)]
pub enum VidPipeError {
    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Errors raised while building or running a pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<VidPipeError>,
    },
}

impl VidPipeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        VidPipeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for vidpipe-rs operations
pub type Result<T> = std::result::Result<T, VidPipeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| VidPipeError::Pipeline(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| VidPipeError::Pipeline(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VidPipeError::Config("missing [engine] table".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing [engine] table");
    }

    #[test]
    fn test_error_with_context() {
        let err = VidPipeError::Serialization("bad toml".to_string());
        let with_ctx = err.with_context("Failed to load pipeline.toml");
        assert!(with_ctx.to_string().contains("Failed to load pipeline.toml"));
        assert!(with_ctx.to_string().contains("bad toml"));
    }

    #[test]
    fn test_pipeline_result_context() {
        let result: std::result::Result<(), PipelineError> =
            Err(PipelineError::Cycle("detector".to_string()));
        let err = result.context("Failed to build engine").unwrap_err();
        assert!(matches!(err, VidPipeError::WithContext { .. }));
        assert!(err.to_string().starts_with("Failed to build engine: "));
    }
}
