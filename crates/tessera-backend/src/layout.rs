//! Storage key layout shared by every backend.
//!
//! ```text
//! objects/<encoded-name>/<version>/payload/<files...>
//! objects/<encoded-name>/<version>/payload.manifest   (object stores only)
//! objects/<encoded-name>/<version>/metadata.json
//! locks/<encoded-name>.lock
//! ```
//!
//! A version is discoverable only once `metadata.json` exists. Backends
//! write the payload first and the metadata last, and delete in the
//! opposite order.

use tessera_types::{ObjectName, Version};

pub const OBJECTS_DIR: &str = "objects";
pub const LOCKS_DIR: &str = "locks";
pub const PAYLOAD_DIR: &str = "payload";
pub const MANIFEST_FILE: &str = "payload.manifest";
pub const METADATA_FILE: &str = "metadata.json";
pub const LOCK_SUFFIX: &str = ".lock";

/// `objects/<encoded-name>`
pub fn object_prefix(name: &ObjectName) -> String {
    format!("{OBJECTS_DIR}/{}", name.encoded())
}

/// `objects/<encoded-name>/<version>`
pub fn version_prefix(name: &ObjectName, version: &Version) -> String {
    format!("{}/{version}", object_prefix(name))
}

pub fn payload_prefix(name: &ObjectName, version: &Version) -> String {
    format!("{}/{PAYLOAD_DIR}", version_prefix(name, version))
}

pub fn manifest_key(name: &ObjectName, version: &Version) -> String {
    format!("{}/{MANIFEST_FILE}", version_prefix(name, version))
}

pub fn metadata_key(name: &ObjectName, version: &Version) -> String {
    format!("{}/{METADATA_FILE}", version_prefix(name, version))
}

pub fn lock_key(name: &ObjectName) -> String {
    format!("{LOCKS_DIR}/{}{LOCK_SUFFIX}", name.encoded())
}

/// Recover the version from a metadata key under `object_prefix(name)`.
pub fn version_from_metadata_key(name: &ObjectName, key: &str) -> Option<Version> {
    let rest = key.strip_prefix(&object_prefix(name))?.strip_prefix('/')?;
    let (version, file) = rest.split_once('/')?;
    if file != METADATA_FILE {
        return None;
    }
    Version::new(version).ok()
}
