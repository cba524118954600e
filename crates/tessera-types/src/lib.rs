//! Foundation types for the Tessera versioned object registry.
//!
//! Every other Tessera crate depends on `tessera-types`.
//!
//! # Key Types
//!
//! - [`ObjectName`] -- Validated, colon-namespaced object identity
//! - [`Version`] -- Immutable version label with registry ordering
//! - [`VersionSelector`] -- `latest`, one exact version, or `all`
//! - [`Metadata`] -- Per-version key/value document
//! - [`LockEntry`] / [`LockStatus`] -- Name-scoped lock records

pub mod error;
pub mod lock;
pub mod metadata;
pub mod name;
pub mod version;

pub use error::{Result, TypesError};
pub use lock::{LockEntry, LockStatus};
pub use metadata::Metadata;
pub use name::{validate_object_name, ObjectName};
pub use version::{validate_version, Version, VersionSelector};
