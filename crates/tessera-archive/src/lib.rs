//! Archivers for the Tessera registry.
//!
//! An [`Archiver`] knows how to turn values of one or more Rust types into a
//! self-contained directory of files and back. Archivers are bound to types
//! through an explicit [`DispatchTable`]; the registry consults a backend's
//! override table first and the process-wide [`defaults`] second.
//!
//! # Built-ins
//!
//! - [`BytesArchiver`] -- `Vec<u8>` stored verbatim
//! - [`TextArchiver`] -- `String` stored as UTF-8
//! - [`JsonArchiver`] -- any serde type stored as JSON
//! - [`BundleArchiver`] -- [`FileBundle`], a directory of named files

pub mod archiver;
pub mod builtin;
pub mod defaults;
pub mod digest;
pub mod dispatch;
pub mod error;

pub use archiver::{Archiver, Specificity, TypeKey};
pub use builtin::{BundleArchiver, BytesArchiver, FileBundle, JsonArchiver, TextArchiver};
pub use digest::directory_digest;
pub use dispatch::{Binding, DispatchTable, MaterializerTable};
pub use error::{ArchiveError, ArchiveResult};
