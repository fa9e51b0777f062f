use thiserror::Error;

use crate::player::StructuralIssue;
use crate::session::SessionRole;

/// Errors raised by automation engines while locating elements or
/// delivering synthesized input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AutomationError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AutomationError {
    /// Element lookups that came back empty are recoverable; everything else
    /// means the platform could not do what was asked.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AutomationError::ElementNotFound(_) | AutomationError::Timeout(_)
        )
    }
}

/// Errors surfaced by the recording and playback engine to its caller.
#[derive(Debug, Error)]
pub enum MacroError {
    /// The machine is in a state where the requested operation is not allowed.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Another machine currently owns the command sequence.
    #[error("Sequence is held by the {holder}")]
    Busy { holder: SessionRole },

    /// A command failed validation at construction, edit or load time.
    #[error("Invalid command at step {step}: {reason}")]
    InvalidCommand { step: usize, reason: String },

    /// Pre-flight validation rejected the sequence.
    #[error("Structural error: {0}")]
    Structural(StructuralIssue),

    #[error("Sequence file missing: {0}")]
    FileMissing(String),

    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, MacroError>;
