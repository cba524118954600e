use std::path::PathBuf;

/// Errors from archiver registration, dispatch, and (de)serialization.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// No archiver is registered for the type.
    #[error("no archiver registered for type {type_tag}")]
    NoArchiver { type_tag: String },

    /// Two archivers would be equally specific for the same type or tag.
    #[error("ambiguous archiver for {type_tag}: {existing} and {candidate} are equally specific")]
    AmbiguousArchiver {
        type_tag: String,
        existing: String,
        candidate: String,
    },

    /// The value handed to an archiver is not one of its associated types.
    #[error("archiver {archiver} cannot handle {actual}")]
    UnsupportedType { archiver: String, actual: String },

    /// An expected payload file is absent from the work directory.
    #[error("missing payload file: {0}")]
    MissingFile(PathBuf),

    /// A bundle entry would escape the work directory.
    #[error("invalid bundle path: {0}")]
    InvalidPath(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error while reading or writing the work directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Registration and dispatch problems, as opposed to data or I/O failures.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoArchiver { .. } | Self::AmbiguousArchiver { .. }
        )
    }
}

/// Result alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;
