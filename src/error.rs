//! Error types for the bottleneck detection and mitigation engine.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for engine operations
///
/// どのエラーもホストプロセスにとって致命的ではない。最悪でも
/// 「メトリクスが古い」か「その戦略が実行されなかった」に縮退する。
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown bottleneck or strategy id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate strategy id
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A mitigation action returned an error or panicked
    #[error("Mitigation action '{strategy}' failed: {message}")]
    ActionFailure { strategy: String, message: String },

    /// The metric source could not produce a reading
    #[error("Metric source unavailable: {0}")]
    SourceUnavailable(String),

    /// Invalid configuration or threshold values
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The engine has been shut down and cannot be reused
    #[error("Engine has been shut down")]
    Terminated,

    /// Configuration loading error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Stable machine-readable kind, for hosts that map errors onto status codes
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::ActionFailure { .. } => "action_failure",
            Error::SourceUnavailable(_) => "source_unavailable",
            Error::InvalidConfiguration(_) | Error::Config(_) => "invalid_configuration",
            Error::Terminated => "terminated",
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Error::InvalidConfiguration(errors.to_string())
    }
}
