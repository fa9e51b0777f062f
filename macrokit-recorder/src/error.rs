use macrokit::MacroError;
use thiserror::Error;

/// Error types for command recording
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The requested transition is not valid in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The recorder task is gone or did not answer
    #[error("Recorder channel closed: {0}")]
    Channel(String),

    #[error(transparent)]
    Macro(#[from] MacroError),
}

/// Result type for recorder operations
pub type Result<T> = std::result::Result<T, RecorderError>;
