use std::time::Duration;

use tessera_archive::ArchiveError;
use tessera_types::{ObjectName, TypesError, Version};

/// Errors from backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A name or version failed validation before touching storage.
    #[error("invalid identifier: {0}")]
    Invalid(#[from] TypesError),

    /// The referenced object or version does not exist.
    #[error("object not found: {name}{}", version.as_ref().map(|v| format!("@{v}")).unwrap_or_default())]
    NotFound {
        name: String,
        version: Option<String>,
    },

    /// The target of a copy already exists.
    #[error("object already exists: {name}@{version}")]
    AlreadyExists { name: String, version: String },

    /// A blocking lock acquisition gave up.
    #[error("timed out after {waited:?} waiting for lock on {key}")]
    LockTimeout { key: String, waited: Duration },

    /// A stored record (metadata, lock, manifest) could not be decoded.
    #[error("corrupt record at {location}: {reason}")]
    Corrupt { location: String, reason: String },

    /// Archiver registration failed.
    #[error("materializer registration failed: {0}")]
    Archive(#[from] ArchiveError),

    /// The backend could not be configured.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object-store client failure.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// The async runtime driving an object-store client failed.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl BackendError {
    pub fn not_found(name: &ObjectName, version: Option<&Version>) -> Self {
        Self::NotFound {
            name: name.to_string(),
            version: version.map(Version::to_string),
        }
    }

    pub fn corrupt(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// Transport failures and lock timeouts may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ObjectStore(_) | Self::Runtime(_) | Self::LockTimeout { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
