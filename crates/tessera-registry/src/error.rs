use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_archive::ArchiveError;
use tessera_backend::BackendError;
use tessera_types::TypesError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("timed out after {waited:?} waiting for lock on {name}")]
    LockTimeout { name: String, waited: Duration },

    #[error("lock on {name} is held by {}", holder.as_deref().unwrap_or("another writer"))]
    LockAcquisition { name: String, holder: Option<String> },

    #[error("object not found: {name}@{version}")]
    ObjectNotFound { name: String, version: String },

    #[error("version {version} of {name} already exists")]
    VersionConflict { name: String, version: String },

    #[error("{name}@{version} holds {stored}, not {requested}")]
    TypeMismatch {
        name: String,
        version: String,
        stored: String,
        requested: String,
    },

    #[error("corrupt data at {location}: {reason}")]
    Corrupt { location: String, reason: String },

    /// A failed commit could not be rolled back; storage needs attention.
    #[error("inconsistent state for {name}@{version}: {reason}")]
    Inconsistent {
        name: String,
        version: String,
        reason: String,
    },

    #[error("invalid name or version: {0}")]
    InvalidName(#[from] TypesError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No archiver, or an ambiguous one, for a type.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("archive error: {0}")]
    Archive(ArchiveError),

    #[error("backend error: {0}")]
    Backend(BackendError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BackendError> for RegistryError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Invalid(e) => Self::InvalidName(e),
            BackendError::NotFound { name, version } => Self::ObjectNotFound {
                name,
                version: version.unwrap_or_else(|| "any".into()),
            },
            BackendError::AlreadyExists { name, version } => Self::VersionConflict { name, version },
            BackendError::LockTimeout { key, waited } => Self::LockTimeout { name: key, waited },
            BackendError::Corrupt { location, reason } => Self::Corrupt { location, reason },
            BackendError::Archive(e) => e.into(),
            other => Self::Backend(other),
        }
    }
}

impl From<ArchiveError> for RegistryError {
    fn from(e: ArchiveError) -> Self {
        if e.is_configuration() {
            Self::Config(e.to_string())
        } else {
            Self::Archive(e)
        }
    }
}

impl RegistryError {
    /// Lock contention and transport failures may succeed if retried;
    /// everything else needs a change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LockTimeout { .. } | Self::LockAcquisition { .. } | Self::Io(_) => true,
            Self::Backend(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LockTimeout { .. } => ErrorKind::LockTimeout,
            Self::LockAcquisition { .. } => ErrorKind::LockAcquisition,
            Self::ObjectNotFound { .. } => ErrorKind::ObjectNotFound,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::Inconsistent { .. } => ErrorKind::Inconsistent,
            Self::InvalidName(_) => ErrorKind::InvalidName,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Config(_) => ErrorKind::Config,
            Self::Archive(_) => ErrorKind::Archive,
            Self::Backend(_) => ErrorKind::Backend,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Variant tag of a [`RegistryError`], kept in batch results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LockTimeout,
    LockAcquisition,
    ObjectNotFound,
    VersionConflict,
    TypeMismatch,
    Corrupt,
    Inconsistent,
    InvalidName,
    InvalidArgument,
    Config,
    Archive,
    Backend,
    Io,
}

pub type RegistryResult<T> = Result<T, RegistryError>;
