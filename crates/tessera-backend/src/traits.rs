//! The [`Backend`] trait defining the storage interface.

use std::any::TypeId;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tessera_archive::{Archiver, Binding, MaterializerTable};
use tessera_types::{LockStatus, Metadata, ObjectName, Version, VersionSelector};

use crate::error::BackendResult;
use crate::lock::{poll_lock, LockRequest};

/// Storage adapter for one medium (local disk, S3, GCS, ...).
///
/// All implementations must satisfy these invariants:
/// - A version becomes discoverable (`has_object`, `list_versions`) only
///   when its metadata is written, and metadata is written after the
///   payload. Deletion removes metadata first.
/// - `push` is idempotent: retrying with the same bytes leaves the same
///   payload.
/// - Locks live in storage, not in process memory, and are built on the
///   medium's own atomic create/compare-and-swap primitive so that every
///   process sharing the backend sees the same lock state.
/// - Lock contention is reported as `Ok(false)`, never as an error.
/// - All I/O errors are propagated, never silently ignored.
pub trait Backend: Send + Sync {
    /// Human-readable location, e.g. a root path or a bucket URI.
    fn describe(&self) -> String;

    /// This backend's archiver override table.
    fn materializers(&self) -> &MaterializerTable;

    /// Copy every file under `local_path` into the version's payload.
    fn push(&self, name: &ObjectName, version: &Version, local_path: &Path) -> BackendResult<()>;

    /// Materialize the version's payload into `local_path`.
    ///
    /// Fails with `NotFound` if the payload is absent.
    fn pull(&self, name: &ObjectName, version: &Version, local_path: &Path) -> BackendResult<()>;

    /// Remove metadata and payload for the selected version(s).
    ///
    /// Returns the versions that were discoverable before deletion.
    fn delete(&self, name: &ObjectName, selector: &VersionSelector) -> BackendResult<Vec<Version>>;

    fn save_metadata(&self, name: &ObjectName, version: &Version, metadata: &Metadata) -> BackendResult<()>;

    /// Returns `Ok(None)` if the version has no metadata.
    fn fetch_metadata(&self, name: &ObjectName, version: &Version) -> BackendResult<Option<Metadata>>;

    /// Returns `Ok(true)` if metadata existed and was removed.
    fn delete_metadata(&self, name: &ObjectName, version: &Version) -> BackendResult<bool>;

    /// Every name with at least one discoverable version, sorted.
    fn list_objects(&self) -> BackendResult<Vec<ObjectName>>;

    /// Discoverable versions of `name`, in version order.
    fn list_versions(&self, name: &ObjectName) -> BackendResult<Vec<Version>>;

    /// Backend-side copy of the source payload to a new identity, committed
    /// by writing `metadata` as the target's document.
    ///
    /// Fails with `NotFound` if the source is missing and `AlreadyExists`
    /// if the target version is already discoverable.
    fn overwrite(
        &self,
        source_name: &ObjectName,
        source_version: &Version,
        target_name: &ObjectName,
        target_version: &Version,
        metadata: &Metadata,
    ) -> BackendResult<()>;

    /// One attempt at taking the lock for `key`.
    ///
    /// Succeeds if the lock is free, expired, or already held by `lock_id`
    /// (which refreshes its TTL). Returns `Ok(false)` if another live holder
    /// owns it.
    fn try_acquire_lock(&self, key: &ObjectName, lock_id: &str, ttl: Duration) -> BackendResult<bool>;

    /// Release the lock if and only if `lock_id` holds it.
    fn release_lock(&self, key: &ObjectName, lock_id: &str) -> BackendResult<bool>;

    fn check_lock(&self, key: &ObjectName) -> BackendResult<LockStatus>;

    /// Cheap reachability probe.
    fn health_check(&self) -> BackendResult<()>;

    /// Existence check that never transfers payload bytes.
    fn has_object(&self, name: &ObjectName, version: &Version) -> BackendResult<bool> {
        Ok(self.fetch_metadata(name, version)?.is_some())
    }

    /// Discoverable versions of `name` with their metadata, oldest commit
    /// first. See [`sort_by_commit`].
    fn version_history(&self, name: &ObjectName) -> BackendResult<Vec<(Version, Metadata)>> {
        let mut history = Vec::new();
        for version in self.list_versions(name)? {
            // Deleted between listing and fetch.
            if let Some(metadata) = self.fetch_metadata(name, &version)? {
                history.push((version, metadata));
            }
        }
        sort_by_commit(&mut history);
        Ok(history)
    }

    /// The most recently committed version of `name`.
    fn latest_version(&self, name: &ObjectName) -> BackendResult<Option<Version>> {
        Ok(self.version_history(name)?.pop().map(|(version, _)| version))
    }

    /// Validate a raw name before any storage access.
    fn validate_object_name(&self, name: &str) -> BackendResult<ObjectName> {
        Ok(ObjectName::new(name)?)
    }

    /// Take the lock according to `request` (blocking or not).
    fn acquire_lock(&self, key: &ObjectName, lock_id: &str, request: &LockRequest) -> BackendResult<bool> {
        poll_lock(key, request, || self.try_acquire_lock(key, lock_id, request.ttl))
    }

    /// Bind an archiver for this backend only.
    fn register_materializer(&self, archiver: Arc<dyn Archiver>) -> BackendResult<()> {
        Ok(self.materializers().register(archiver)?)
    }

    /// The override binding for a type, if one was registered.
    fn registered_materializer(&self, id: TypeId) -> Option<Binding> {
        self.materializers().resolve(id)
    }

    fn registered_materializers(&self) -> Vec<Binding> {
        self.materializers().bindings()
    }
}

/// Order versions by [`Metadata::commit_order`], then by version.
pub fn sort_by_commit(history: &mut [(Version, Metadata)]) {
    history.sort_by(|(va, ma), (vb, mb)| {
        ma.commit_order()
            .cmp(&mb.commit_order())
            .then_with(|| va.cmp(vb))
    });
}
