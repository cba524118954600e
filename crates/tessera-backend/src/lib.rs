//! Storage backends for the Tessera registry.
//!
//! A [`Backend`] moves payload directories in and out of storage, keeps one
//! metadata document per version, enumerates names and versions, and
//! provides name-scoped locks that every process sharing the storage
//! observes.
//!
//! # Backends
//!
//! - [`LocalBackend`] -- a directory on local (or shared) disk
//! - [`ObjectStoreBackend`] -- S3, MinIO, GCS, or an in-memory store
//!
//! [`BackendConfig`] selects one from a URI or a TOML document and
//! [`open_backend`] opens it.
//!
//! # Design Rules
//!
//! 1. Payload first, metadata last; a version without metadata does not exist.
//! 2. Deletion removes metadata before payload.
//! 3. Locks are records in storage with a TTL, created and replaced only
//!    through the medium's atomic primitives.
//! 4. Lock contention is a `false`, not an error.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod cloud;
pub mod config;
pub mod error;
pub mod layout;
pub mod local;
pub mod lock;
pub mod traits;

#[cfg(test)]
mod conformance;

pub use cloud::ObjectStoreBackend;
pub use config::{open_backend, BackendConfig, GcsConfig, LocalConfig, S3Config};
pub use error::{BackendError, BackendResult};
pub use local::LocalBackend;
pub use lock::{poll_lock, Backoff, LockRequest, DEFAULT_LOCK_TIMEOUT, DEFAULT_LOCK_TTL, MIN_BACKOFF};
pub use traits::{sort_by_commit, Backend};
