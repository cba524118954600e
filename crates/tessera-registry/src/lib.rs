//! Versioned object registry.
//!
//! Save typed values under hierarchical names, load them back by exact or
//! latest version, and delete or copy versions, over any storage
//! [`Backend`](tessera_backend::Backend). This is the main entry point for
//! applications embedding Tessera.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera_backend::LocalBackend;
//! use tessera_registry::Registry;
//! use tessera_types::VersionSelector;
//!
//! let backend = LocalBackend::open("/var/lib/tessera")?;
//! let registry = Registry::with_defaults(Arc::new(backend));
//! let version = registry.save("teams:vision:threshold", &0.75f64)?;
//! let threshold: f64 = registry.load("teams:vision:threshold", VersionSelector::Exact(version))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Design Rules
//!
//! 1. Every write to a name happens under that name's backend lock.
//! 2. Reads never lock; a version is visible only once fully committed.
//! 3. A committed version is never modified in place.
//! 4. A failed commit leaves no discoverable version, or reports
//!    `Inconsistent` if cleanup itself failed.
//! 5. Batch operations record per-item failures and keep going.

pub mod batch;
pub mod config;
pub mod error;
pub mod guard;
pub mod registry;

pub use batch::{BatchError, BatchResult, ObjectRef, NEXT_VERSION_LABEL};
pub use config::RegistryConfig;
pub use error::{ErrorKind, RegistryError, RegistryResult};
pub use guard::LockGuard;
pub use registry::{Registry, SaveItem, SaveOptions};

// Re-export key types
pub use tessera_types::{Metadata, ObjectName, Version, VersionSelector};
