//! Error types for the frame core.
//!
//! Slot and registry misuse is reported as [`Error::InvalidState`] rather than
//! panicking, so the owning stage can log it and unwind.

use crate::pool::SlotState;
use thiserror::Error;

/// Main error type for the frame core.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unsupported feature or format.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Resource exhausted (slots, handles, buffers).
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A slot was asked to do something its current state does not allow.
    #[error("Invalid slot state for {operation}: expected {expected}, found {found}")]
    InvalidState {
        operation: &'static str,
        expected: SlotState,
        found: SlotState,
    },

    /// A slot id no longer refers to a live slot.
    #[error("Stale or unknown slot {index} (generation {generation})")]
    UnknownSlot { index: usize, generation: u32 },

    /// The frame buffer of a slot is checked out by another stage.
    #[error("Frame of slot {0} is checked out")]
    FrameCheckedOut(usize),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// End of stream reached.
    #[error("End of stream")]
    EndOfStream,

    /// Buffer too small for operation.
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Result type alias using the core error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid parameter error.
    #[must_use]
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Create an unsupported error.
    #[must_use]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Check if this is an end of stream error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    /// Check if the error only affects a single frame.
    ///
    /// Protocol violations and exhausted resources abort the run; everything
    /// else can be absorbed by the stage that saw it.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::InvalidState { .. }
                | Error::UnknownSlot { .. }
                | Error::ResourceExhausted(_)
                | Error::Cancelled
                | Error::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidState {
            operation: "release",
            expected: SlotState::Empty,
            found: SlotState::Ready,
        };
        assert_eq!(
            err.to_string(),
            "Invalid slot state for release: expected EMPTY, found READY"
        );

        let err = Error::BufferTooSmall {
            needed: 100,
            available: 50,
        };
        assert_eq!(err.to_string(), "Buffer too small: need 100 bytes, have 50");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::EndOfStream.is_eof());
        assert!(Error::invalid_param("x").is_recoverable());
        assert!(!Error::ResourceExhausted("slots".into()).is_recoverable());
        assert!(!Error::UnknownSlot {
            index: 1,
            generation: 2
        }
        .is_recoverable());
    }
}
