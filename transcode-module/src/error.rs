use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown module class '{0}'")]
    UnknownClass(String),

    #[error("Invalid module type '{0}', expected 'class:name'")]
    InvalidType(String),

    #[error("Module '{name}' already registered")]
    AlreadyRegistered { name: String },

    #[error("Module '{name}' not found")]
    NotFound { name: String },

    #[error("Module table full ({max} handles in use)")]
    TableFull { max: usize },

    #[error("Module '{module}' does not provide {operation}")]
    MissingOperation {
        module: String,
        operation: &'static str,
    },

    #[error("Module '{module}' does not support {operation}")]
    Unsupported {
        module: String,
        operation: &'static str,
    },

    #[error("Operation {0} is not implemented")]
    NotImplemented(&'static str),

    #[error("Module '{module}' initialization failed: {message}")]
    InitFailed { module: String, message: String },

    #[error("Module '{module}' returned error: {message}")]
    ModuleError { module: String, message: String },

    #[error("Module '{module}' still has {refcount} live instance(s)")]
    InUse { module: String, refcount: usize },

    #[error("Module '{producer}' output cannot feed '{consumer}'")]
    Incompatible { producer: String, consumer: String },

    #[error("Invalid option string: {0}")]
    InvalidOption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] transcode_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Error reported by a module implementation.
    #[must_use]
    pub fn module(module: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ModuleError {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Whether the error means a module breaks its declared contract and the
    /// session must not start.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::MissingOperation { .. } | Error::Unsupported { .. } | Error::Incompatible { .. }
        )
    }
}
