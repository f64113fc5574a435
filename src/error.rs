//! Error types for db-invoke.
//!
//! Defines the error enum returned by every public operation.

use thiserror::Error;

/// Main error type for db-invoke operations.
#[derive(Error, Debug)]
pub enum InvokeError {
    /// Malformed or contradictory caller input, detected before any connection attempt.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced query file does not exist.
    #[error("Input not found: {0}")]
    InputNotFound(String),

    /// A referenced query file exists but holds no query text.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Any failure raised by the driver while opening the connection or executing.
    ///
    /// The driver's message is carried unmodified.
    #[error("Query execution failed: {0}")]
    QueryExecutionFailed(String),

    /// Configuration errors (invalid config file, bad profile values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl InvokeError {
    /// Creates an invalid-argument error with the given message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates an input-not-found error with the given message.
    pub fn input_not_found(msg: impl Into<String>) -> Self {
        Self::InputNotFound(msg.into())
    }

    /// Creates an invalid-input error with the given message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates a query-execution error with the given message.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::QueryExecutionFailed(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "Invalid Argument",
            Self::InputNotFound(_) => "Input Not Found",
            Self::InvalidInput(_) => "Invalid Input",
            Self::QueryExecutionFailed(_) => "Query Execution Failed",
            Self::Config(_) => "Configuration Error",
        }
    }

    /// Returns true if the error was raised before any connection was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::InputNotFound(_) | Self::InvalidInput(_)
        )
    }
}

impl From<sqlx::Error> for InvokeError {
    fn from(error: sqlx::Error) -> Self {
        Self::QueryExecutionFailed(error.to_string())
    }
}

/// Result type alias using InvokeError.
pub type Result<T> = std::result::Result<T, InvokeError>;
