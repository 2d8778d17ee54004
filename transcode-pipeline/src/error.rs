//! Pipeline error types.

use thiserror::Error;
use transcode_core::Error as CoreError;
use transcode_module::Error as ModuleError;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Module error.
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pipeline already running.
    #[error("Pipeline already running")]
    AlreadyRunning,

    /// Pipeline not started, or already stopped.
    #[error("Pipeline not started")]
    NotStarted,

    /// An encode or multiplex call failed; the run was terminated.
    #[error("{stage} stage failed: {message}")]
    StageFailed {
        stage: &'static str,
        message: String,
    },

    /// A stage thread went away without reporting.
    #[error("Pipeline aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Wrap a module error raised at a given stage.
    pub(crate) fn stage(stage: &'static str, err: impl std::fmt::Display) -> Self {
        PipelineError::StageFailed {
            stage,
            message: err.to_string(),
        }
    }

    /// Whether setup was refused because modules do not fit together.
    pub fn is_contract_violation(&self) -> bool {
        match self {
            PipelineError::Module(e) => e.is_contract_violation(),
            _ => false,
        }
    }
}

/// Pipeline result type.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let err: PipelineError = CoreError::invalid_param("bad").into();
        assert!(matches!(err, PipelineError::Core(_)));

        let err: PipelineError = ModuleError::Incompatible {
            producer: "mpeg2".into(),
            consumer: "wav".into(),
        }
        .into();
        assert!(err.is_contract_violation());
        assert!(!PipelineError::NotStarted.is_contract_violation());
    }

    #[test]
    fn test_stage_message() {
        let err = PipelineError::stage("encode", "codec exploded");
        assert_eq!(err.to_string(), "encode stage failed: codec exploded");
    }
}
