use thiserror::Error;

/// Errors produced by type validation and parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid object name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias for type-level operations.
pub type Result<T> = std::result::Result<T, TypesError>;
