//! Error types for lockclash with categorization:
//!
//! - **Configuration errors**: bad or unreadable settings (exit code 1)
//! - **System errors**: IO and runtime setup (exit code 2)
//! - **Engine errors**: connecting to or talking with the storage engine (exit code 3)
//!
//! Per-session failures never surface as [`Error`]. A lock conflict is a
//! [`LockFailure`] that gets classified into an outcome, and a failed
//! rollback or close is a [`CleanupError`] attached to that outcome.

use std::fmt;

use thiserror::Error;

/// Top-level error type for everything that can abort a run or a handle.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Configuration value missing, malformed, or out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration source could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// IO failure
    #[error("IO error: {0}")]
    IoError(String),

    /// Could not open a resource handle
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Storage engine rejected a statement outside of lock acquisition
    #[error("Engine error: {0}")]
    Engine(String),
}

impl Error {
    /// Returns the appropriate exit code for this error type.
    ///
    /// Exit code scheme:
    /// - 1: configuration or parse error
    /// - 2: IO error
    /// - 3: storage engine error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig(_) | Self::ParseError(_) => 1,
            Self::IoError(_) => 2,
            Self::Connection(_) | Self::Engine(_) => 3,
        }
    }

    /// True for errors that must stop the run before any session starts.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::ParseError(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::ParseError(format!("Failed to parse config: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

/// Result type alias using the lockclash [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single lock acquisition (or of the commit that follows).
///
/// Carries the raw engine signal. Classification into deadlock, timeout or
/// generic error happens later in [`crate::classify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockFailure {
    /// The engine refused or aborted the request.
    #[error("{message}")]
    Engine {
        /// Raw message as reported by the engine.
        message: String,
        /// Engine state code (SQLSTATE), when the engine provided one.
        code: Option<String>,
    },

    /// The locking query returned no row. Not retryable.
    #[error("target {target} not found in {table}")]
    NotFound {
        /// Table that was queried.
        table: String,
        /// Row id that was requested.
        target: i64,
    },
}

impl LockFailure {
    /// Build an engine failure from a message and optional state code.
    pub fn engine(message: impl Into<String>, code: Option<impl Into<String>>) -> Self {
        Self::Engine {
            message: message.into(),
            code: code.map(Into::into),
        }
    }

    /// The raw failure text.
    pub fn message(&self) -> String {
        match self {
            Self::Engine { message, .. } => message.clone(),
            Self::NotFound { .. } => self.to_string(),
        }
    }

    /// The engine state code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Engine { code, .. } => code.as_deref(),
            Self::NotFound { .. } => None,
        }
    }

    /// Whether another attempt could ever succeed.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }
}

/// Which cleanup step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStage {
    /// Rolling back the transaction
    Rollback,
    /// Releasing the resource handle
    Close,
}

impl fmt::Display for CleanupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rollback => write!(f, "rollback"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// Failure while rolling back or releasing a handle. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
#[error("{stage} failed: {message}")]
pub struct CleanupError {
    /// Step that failed.
    pub stage: CleanupStage,
    /// Engine message.
    pub message: String,
}

impl CleanupError {
    /// Create a cleanup error for the given stage.
    pub fn new(stage: CleanupStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}
