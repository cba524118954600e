//! Local filesystem backend.
//!
//! [`LocalBackend`] keeps everything under one root directory using the
//! layout in [`crate::layout`]. Payloads are staged next to their final
//! location and renamed into place; metadata is written to a temporary
//! file and renamed. Locks rely on two filesystem primitives that are
//! atomic across processes sharing the directory: `hard_link` (fails if the
//! target exists) to create a record, and `rename` to move a record aside
//! before removing it.
//!
//! A record moved aside that turns out to be newer than the one inspected
//! is linked back. Until it is, another writer can see the lock as free.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tessera_archive::MaterializerTable;
use tessera_types::{LockEntry, LockStatus, Metadata, ObjectName, Version, VersionSelector};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{BackendError, BackendResult};
use crate::layout::{
    lock_key, metadata_key, object_prefix, payload_prefix, version_prefix, LOCKS_DIR,
    METADATA_FILE, OBJECTS_DIR, PAYLOAD_DIR,
};
use crate::traits::Backend;

/// Bound on create/inspect/take-over rounds within one acquisition attempt.
const MAX_LOCK_ROUNDS: usize = 3;

/// Outcome of moving a lock record aside.
#[derive(Debug, PartialEq, Eq)]
enum Takeover {
    /// The inspected record was removed.
    Removed,
    /// The record had already disappeared.
    Gone,
    /// A different record was in place; it has been put back.
    Contended,
}

/// Backend storing objects, metadata, and locks under a local directory.
pub struct LocalBackend {
    root: PathBuf,
    materializers: MaterializerTable,
}

impl LocalBackend {
    /// Open (or create) a backend rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> BackendResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(LOCKS_DIR))?;
        tracing::debug!(root = %root.display(), "opened local backend");
        Ok(Self {
            root,
            materializers: MaterializerTable::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn metadata_path(&self, name: &ObjectName, version: &Version) -> PathBuf {
        self.path(&metadata_key(name, version))
    }

    fn lock_path(&self, key: &ObjectName) -> PathBuf {
        self.path(&lock_key(key))
    }

    fn read_lock(path: &Path) -> BackendResult<Option<LockEntry>> {
        match fs::read(path) {
            Ok(data) => LockEntry::from_json(&data)
                .map(Some)
                .map_err(|e| BackendError::corrupt(path.display().to_string(), e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Publish `entry` at `path` only if no record exists there.
    ///
    /// The record is written in full to a private file first and then
    /// hard-linked into place, so readers never observe a partial record.
    fn create_lock(path: &Path, entry: &LockEntry) -> BackendResult<bool> {
        let staged = unique_sibling(path, "new");
        fs::write(&staged, entry.to_json()?)?;
        let linked = fs::hard_link(&staged, path);
        remove_quietly(&staged);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the record at `path` if it is still `observed`.
    fn take_over(path: &Path, observed: &LockEntry) -> BackendResult<Takeover> {
        let tombstone = unique_sibling(path, "stale");
        match fs::rename(path, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Takeover::Gone),
            Err(e) => return Err(e.into()),
        }

        let moved = Self::read_lock(&tombstone);
        if matches!(&moved, Ok(Some(entry)) if entry == observed) {
            remove_quietly(&tombstone);
            return Ok(Takeover::Removed);
        }

        // Someone replaced the record between our read and the rename.
        match fs::hard_link(&tombstone, path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::warn!(path = %path.display(), "could not restore displaced lock record");
            }
            Err(e) => {
                remove_quietly(&tombstone);
                return Err(e.into());
            }
        }
        remove_quietly(&tombstone);
        moved?;
        Ok(Takeover::Contended)
    }
}

impl Backend for LocalBackend {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn materializers(&self) -> &MaterializerTable {
        &self.materializers
    }

    fn push(&self, name: &ObjectName, version: &Version, local_path: &Path) -> BackendResult<()> {
        if !local_path.is_dir() {
            return Err(BackendError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("payload directory {} does not exist", local_path.display()),
            )));
        }

        let version_dir = self.path(&version_prefix(name, version));
        fs::create_dir_all(&version_dir)?;

        let staging = version_dir.join(format!(".{PAYLOAD_DIR}-{}", Uuid::now_v7().simple()));
        if let Err(e) = copy_dir(local_path, &staging) {
            remove_dir_quietly(&staging);
            return Err(e);
        }

        let payload = version_dir.join(PAYLOAD_DIR);
        if payload.exists() {
            fs::remove_dir_all(&payload)?;
        }
        fs::rename(&staging, &payload)?;
        tracing::debug!(name = %name, version = %version, "pushed payload");
        Ok(())
    }

    fn pull(&self, name: &ObjectName, version: &Version, local_path: &Path) -> BackendResult<()> {
        let payload = self.path(&payload_prefix(name, version));
        if !payload.is_dir() {
            return Err(BackendError::not_found(name, Some(version)));
        }
        fs::create_dir_all(local_path)?;
        copy_dir(&payload, local_path)?;
        tracing::debug!(name = %name, version = %version, "pulled payload");
        Ok(())
    }

    fn delete(&self, name: &ObjectName, selector: &VersionSelector) -> BackendResult<Vec<Version>> {
        match selector {
            VersionSelector::Exact(version) => {
                let existed = self.delete_metadata(name, version)?;
                remove_dir_if_exists(&self.path(&version_prefix(name, version)))?;
                Ok(if existed { vec![version.clone()] } else { Vec::new() })
            }
            VersionSelector::Latest => match self.latest_version(name)? {
                Some(latest) => self.delete(name, &VersionSelector::Exact(latest)),
                None => Ok(Vec::new()),
            },
            VersionSelector::All => {
                let versions = self.list_versions(name)?;
                for version in &versions {
                    self.delete_metadata(name, version)?;
                }
                remove_dir_if_exists(&self.path(&object_prefix(name)))?;
                tracing::debug!(name = %name, count = versions.len(), "deleted all versions");
                Ok(versions)
            }
        }
    }

    fn save_metadata(&self, name: &ObjectName, version: &Version, metadata: &Metadata) -> BackendResult<()> {
        write_atomic(&self.metadata_path(name, version), &metadata.to_json()?)
    }

    fn fetch_metadata(&self, name: &ObjectName, version: &Version) -> BackendResult<Option<Metadata>> {
        let path = self.metadata_path(name, version);
        match fs::read(&path) {
            Ok(data) => Metadata::from_json(&data)
                .map(Some)
                .map_err(|e| BackendError::corrupt(path.display().to_string(), e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_metadata(&self, name: &ObjectName, version: &Version) -> BackendResult<bool> {
        match fs::remove_file(self.metadata_path(name, version)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_objects(&self) -> BackendResult<Vec<ObjectName>> {
        let mut names = Vec::new();
        for dir in read_dir_names(&self.root.join(OBJECTS_DIR))? {
            let name = match ObjectName::decode(&dir) {
                Ok(name) => name,
                Err(e) => {
                    tracing::warn!(entry = %dir, error = %e, "skipping unrecognized object directory");
                    continue;
                }
            };
            if !self.list_versions(&name)?.is_empty() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn list_versions(&self, name: &ObjectName) -> BackendResult<Vec<Version>> {
        let object_dir = self.path(&object_prefix(name));
        let mut versions: Vec<Version> = read_dir_names(&object_dir)?
            .into_iter()
            .filter_map(|dir| Version::new(dir).ok())
            .filter(|v| object_dir.join(v.as_str()).join(METADATA_FILE).is_file())
            .collect();
        versions.sort();
        Ok(versions)
    }

    fn has_object(&self, name: &ObjectName, version: &Version) -> BackendResult<bool> {
        Ok(self.metadata_path(name, version).is_file())
    }

    fn overwrite(
        &self,
        source_name: &ObjectName,
        source_version: &Version,
        target_name: &ObjectName,
        target_version: &Version,
        metadata: &Metadata,
    ) -> BackendResult<()> {
        let source_payload = self.path(&payload_prefix(source_name, source_version));
        if !self.has_object(source_name, source_version)? || !source_payload.is_dir() {
            return Err(BackendError::not_found(source_name, Some(source_version)));
        }
        if self.has_object(target_name, target_version)? {
            return Err(BackendError::AlreadyExists {
                name: target_name.to_string(),
                version: target_version.to_string(),
            });
        }

        self.push(target_name, target_version, &source_payload)?;
        self.save_metadata(target_name, target_version, metadata)?;
        tracing::debug!(
            source = %source_name, source_version = %source_version,
            target = %target_name, target_version = %target_version,
            "copied version"
        );
        Ok(())
    }

    fn try_acquire_lock(&self, key: &ObjectName, lock_id: &str, ttl: Duration) -> BackendResult<bool> {
        fs::create_dir_all(self.root.join(LOCKS_DIR))?;
        let path = self.lock_path(key);

        for _ in 0..MAX_LOCK_ROUNDS {
            let entry = LockEntry::new(key.as_str(), lock_id, ttl);
            if Self::create_lock(&path, &entry)? {
                tracing::debug!(key = %key, lock_id, "lock acquired");
                return Ok(true);
            }

            let Some(current) = Self::read_lock(&path)? else {
                continue;
            };
            if current.is_held_by(lock_id) {
                write_atomic(&path, &entry.to_json()?)?;
                tracing::trace!(key = %key, lock_id, "lock refreshed");
                return Ok(true);
            }
            if !current.is_expired() {
                return Ok(false);
            }

            tracing::debug!(key = %key, stale_holder = %current.lock_id, "taking over expired lock");
            if Self::take_over(&path, &current)? == Takeover::Contended {
                return Ok(false);
            }
        }
        Ok(false)
    }

    fn release_lock(&self, key: &ObjectName, lock_id: &str) -> BackendResult<bool> {
        let path = self.lock_path(key);
        let Some(current) = Self::read_lock(&path)? else {
            return Ok(false);
        };
        if !current.is_held_by(lock_id) {
            return Ok(false);
        }
        let released = Self::take_over(&path, &current)? == Takeover::Removed;
        if released {
            tracing::debug!(key = %key, lock_id, "lock released");
        }
        Ok(released)
    }

    fn check_lock(&self, key: &ObjectName) -> BackendResult<LockStatus> {
        let entry = Self::read_lock(&self.lock_path(key))?;
        Ok(LockStatus::from_entry(entry.as_ref()))
    }

    fn health_check(&self) -> BackendResult<()> {
        fs::create_dir_all(self.root.join(OBJECTS_DIR))?;
        if fs::metadata(&self.root)?.is_dir() {
            Ok(())
        } else {
            Err(BackendError::Config(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("root", &self.root)
            .field("materializers", &self.materializers)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Filesystem helpers
// ---------------------------------------------------------------------------

/// Hidden, uniquely named path in the same directory as `path`.
fn unique_sibling(path: &Path, tag: &str) -> PathBuf {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file}.{tag}-{}", Uuid::now_v7().simple()))
}

fn write_atomic(path: &Path, data: &[u8]) -> BackendResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let staged = unique_sibling(path, "tmp");
    fs::write(&staged, data)?;
    if let Err(e) = fs::rename(&staged, path) {
        remove_quietly(&staged);
        return Err(e.into());
    }
    Ok(())
}

fn copy_dir(src: &Path, dst: &Path) -> BackendResult<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| BackendError::corrupt(entry.path().display().to_string(), e))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Names of the visible subdirectories of `dir`; empty if `dir` is absent.
fn read_dir_names(dir: &Path) -> BackendResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    Ok(names)
}

fn remove_dir_if_exists(dir: &Path) -> BackendResult<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove temporary file");
        }
    }
}

fn remove_dir_quietly(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove staging directory");
        }
    }
}
