//! Backend over any [`object_store::ObjectStore`]: S3, GCS, or in-memory.
//!
//! Keys follow [`crate::layout`]. Because object stores have no directory
//! rename, a payload is made visible by writing `payload.manifest` after all
//! of its files; `pull` reads only what the manifest lists.
//!
//! Locks use conditional writes: `PutMode::Create` to take a free lock and
//! `PutMode::Update` with the observed e-tag to refresh or take over an
//! expired one. Releasing re-reads the record and then deletes it; the
//! delete itself is unconditional, so a holder whose TTL lapses between the
//! read and the delete can remove a successor's record.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::memory::InMemory;
use object_store::path::Path as StorePath;
use object_store::prefix::PrefixStore;
use object_store::{ObjectStore, PutMode, PutPayload, UpdateVersion};
use serde::{Deserialize, Serialize};
use tessera_archive::MaterializerTable;
use tessera_types::{LockEntry, LockStatus, Metadata, ObjectName, Version, VersionSelector};
use tokio::runtime::{Builder, Handle, Runtime};
use walkdir::WalkDir;

use crate::config::{GcsConfig, S3Config};
use crate::error::{BackendError, BackendResult};
use crate::layout::{
    lock_key, manifest_key, metadata_key, object_prefix, payload_prefix, version_from_metadata_key,
    version_prefix, METADATA_FILE, OBJECTS_DIR,
};
use crate::traits::{sort_by_commit, Backend};

const MAX_LOCK_ROUNDS: usize = 3;

/// File list written after a payload upload completes.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    files: Vec<String>,
}

/// Object-store backed [`Backend`].
///
/// Owns a small Tokio runtime to drive the async client from the
/// synchronous trait. When called from inside another runtime, work is
/// handed to a scoped thread on that runtime's handle instead.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    location: String,
    runtime: Option<Runtime>,
    materializers: MaterializerTable,
}

impl ObjectStoreBackend {
    /// Wrap an already-configured store. `location` is used in logs and
    /// [`Backend::describe`].
    pub fn new(store: Arc<dyn ObjectStore>, location: impl Into<String>) -> BackendResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tessera-object-store")
            .enable_all()
            .build()
            .map_err(|e| BackendError::Runtime(format!("failed to start runtime: {e}")))?;
        Ok(Self {
            store,
            location: location.into(),
            runtime: Some(runtime),
            materializers: MaterializerTable::new(),
        })
    }

    /// A fresh process-local store.
    pub fn in_memory() -> BackendResult<Self> {
        Self::new(Arc::new(InMemory::new()), "memory://")
    }

    /// S3 or an S3-compatible service.
    pub fn s3(config: &S3Config) -> BackendResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_conditional_put(S3ConditionalPut::ETagMatch);
        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false);
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }
        if let Some(key) = &config.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }
        let store = builder
            .build()
            .map_err(|e| BackendError::Config(format!("S3: {e}")))?;
        Self::new(
            wrap_with_prefix(store, &config.prefix)?,
            format!("s3://{}/{}", config.bucket, config.prefix),
        )
    }

    /// Google Cloud Storage.
    pub fn gcs(config: &GcsConfig) -> BackendResult<Self> {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&config.bucket);
        if let Some(path) = &config.service_account_path {
            builder = builder.with_service_account_path(path.to_string_lossy());
        }
        if let Some(key) = &config.service_account_key {
            builder = builder.with_service_account_key(key);
        }
        let store = builder
            .build()
            .map_err(|e| BackendError::Config(format!("GCS: {e}")))?;
        Self::new(
            wrap_with_prefix(store, &config.prefix)?,
            format!("gs://{}/{}", config.bucket, config.prefix),
        )
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn block_on<F, T>(&self, future: F) -> BackendResult<T>
    where
        F: Future<Output = BackendResult<T>> + Send,
        T: Send,
    {
        if let Ok(handle) = Handle::try_current() {
            return std::thread::scope(|s| {
                s.spawn(|| handle.block_on(future))
                    .join()
                    .map_err(|_| BackendError::Runtime("object store worker panicked".into()))?
            });
        }
        match &self.runtime {
            Some(runtime) => runtime.block_on(future),
            None => Err(BackendError::Runtime("runtime has been shut down".into())),
        }
    }

    // ----- raw object access -----

    async fn get_versioned(&self, path: &StorePath) -> BackendResult<Option<(Bytes, UpdateVersion)>> {
        let result = match self.store.get(path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let version = UpdateVersion {
            e_tag: result.meta.e_tag.clone(),
            version: result.meta.version.clone(),
        };
        Ok(Some((result.bytes().await?, version)))
    }

    async fn get_bytes(&self, path: &StorePath) -> BackendResult<Option<Bytes>> {
        Ok(self.get_versioned(path).await?.map(|(data, _)| data))
    }

    async fn exists(&self, path: &StorePath) -> BackendResult<bool> {
        match self.store.head(path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self, prefix: &str) -> BackendResult<Vec<StorePath>> {
        let prefix = StorePath::from(prefix);
        let metas: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        Ok(metas.into_iter().map(|m| m.location).collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> BackendResult<()> {
        for key in self.list_keys(prefix).await? {
            match self.store.delete(&key).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn read_manifest(&self, name: &ObjectName, version: &Version) -> BackendResult<Manifest> {
        let key = manifest_key(name, version);
        let data = self
            .get_bytes(&StorePath::from(key.as_str()))
            .await?
            .ok_or_else(|| BackendError::not_found(name, Some(version)))?;
        let manifest: Manifest =
            serde_json::from_slice(&data).map_err(|e| BackendError::corrupt(key.as_str(), e))?;
        if let Some(bad) = manifest.files.iter().find(|f| !is_relative_file(f)) {
            return Err(BackendError::corrupt(key, format!("unsafe path '{bad}'")));
        }
        Ok(manifest)
    }

    async fn write_manifest(&self, name: &ObjectName, version: &Version, manifest: &Manifest) -> BackendResult<()> {
        let key = manifest_key(name, version);
        let data = serde_json::to_vec(manifest).map_err(|e| BackendError::corrupt(key.as_str(), e))?;
        self.store
            .put(&StorePath::from(key), PutPayload::from(data))
            .await?;
        Ok(())
    }

    // ----- payloads -----

    async fn push_async(&self, name: &ObjectName, version: &Version, local_path: &Path) -> BackendResult<()> {
        let files = local_files(local_path)?;
        let prefix = payload_prefix(name, version);

        match self.store.delete(&StorePath::from(manifest_key(name, version))).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        self.delete_prefix(&prefix).await?;

        let mut manifest = Manifest::default();
        for rel in files {
            let data = std::fs::read(local_path.join(&rel))?;
            self.store
                .put(&StorePath::from(format!("{prefix}/{rel}")), PutPayload::from(data))
                .await?;
            manifest.files.push(rel);
        }
        self.write_manifest(name, version, &manifest).await?;
        tracing::debug!(
            name = %name, version = %version, files = manifest.files.len(),
            location = %self.location, "pushed payload"
        );
        Ok(())
    }

    async fn pull_async(&self, name: &ObjectName, version: &Version, local_path: &Path) -> BackendResult<()> {
        let manifest = self.read_manifest(name, version).await?;
        let prefix = payload_prefix(name, version);
        std::fs::create_dir_all(local_path)?;
        for rel in &manifest.files {
            let key = format!("{prefix}/{rel}");
            let data = self
                .get_bytes(&StorePath::from(key.as_str()))
                .await?
                .ok_or_else(|| BackendError::corrupt(key.as_str(), "listed in manifest but missing"))?;
            let target = local_path.join(rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, &data)?;
        }
        tracing::debug!(name = %name, version = %version, "pulled payload");
        Ok(())
    }

    async fn delete_version(&self, name: &ObjectName, version: &Version) -> BackendResult<bool> {
        let existed = self.delete_metadata_async(name, version).await?;
        self.delete_prefix(&version_prefix(name, version)).await?;
        Ok(existed)
    }

    async fn delete_async(&self, name: &ObjectName, selector: &VersionSelector) -> BackendResult<Vec<Version>> {
        match selector {
            VersionSelector::Exact(version) => Ok(if self.delete_version(name, version).await? {
                vec![version.clone()]
            } else {
                Vec::new()
            }),
            VersionSelector::Latest => match self.version_history_async(name).await?.pop() {
                Some((latest, _)) => {
                    self.delete_version(name, &latest).await?;
                    Ok(vec![latest])
                }
                None => Ok(Vec::new()),
            },
            VersionSelector::All => {
                let versions = self.list_versions_async(name).await?;
                for version in &versions {
                    self.delete_metadata_async(name, version).await?;
                }
                self.delete_prefix(&object_prefix(name)).await?;
                tracing::debug!(name = %name, count = versions.len(), "deleted all versions");
                Ok(versions)
            }
        }
    }

    async fn overwrite_async(
        &self,
        source_name: &ObjectName,
        source_version: &Version,
        target_name: &ObjectName,
        target_version: &Version,
        metadata: &Metadata,
    ) -> BackendResult<()> {
        if !self
            .exists(&StorePath::from(metadata_key(source_name, source_version)))
            .await?
        {
            return Err(BackendError::not_found(source_name, Some(source_version)));
        }
        let manifest = self.read_manifest(source_name, source_version).await?;
        if self
            .exists(&StorePath::from(metadata_key(target_name, target_version)))
            .await?
        {
            return Err(BackendError::AlreadyExists {
                name: target_name.to_string(),
                version: target_version.to_string(),
            });
        }

        let from = payload_prefix(source_name, source_version);
        let to = payload_prefix(target_name, target_version);
        self.delete_prefix(&to).await?;
        for rel in &manifest.files {
            self.store
                .copy(
                    &StorePath::from(format!("{from}/{rel}")),
                    &StorePath::from(format!("{to}/{rel}")),
                )
                .await?;
        }
        self.write_manifest(target_name, target_version, &manifest).await?;
        self.save_metadata_async(target_name, target_version, metadata).await?;
        tracing::debug!(
            source = %source_name, source_version = %source_version,
            target = %target_name, target_version = %target_version,
            "copied version"
        );
        Ok(())
    }

    // ----- metadata -----

    async fn save_metadata_async(&self, name: &ObjectName, version: &Version, metadata: &Metadata) -> BackendResult<()> {
        let data = metadata.to_json()?;
        self.store
            .put(&StorePath::from(metadata_key(name, version)), PutPayload::from(data))
            .await?;
        Ok(())
    }

    async fn fetch_metadata_async(&self, name: &ObjectName, version: &Version) -> BackendResult<Option<Metadata>> {
        let key = metadata_key(name, version);
        match self.get_bytes(&StorePath::from(key.as_str())).await? {
            Some(data) => Metadata::from_json(&data)
                .map(Some)
                .map_err(|e| BackendError::corrupt(key, e)),
            None => Ok(None),
        }
    }

    async fn delete_metadata_async(&self, name: &ObjectName, version: &Version) -> BackendResult<bool> {
        let path = StorePath::from(metadata_key(name, version));
        if !self.exists(&path).await? {
            return Ok(false);
        }
        match self.store.delete(&path).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_versions_async(&self, name: &ObjectName) -> BackendResult<Vec<Version>> {
        let mut versions: Vec<Version> = self
            .list_keys(&object_prefix(name))
            .await?
            .iter()
            .filter_map(|key| version_from_metadata_key(name, key.as_ref()))
            .collect();
        versions.sort();
        Ok(versions)
    }

    async fn version_history_async(&self, name: &ObjectName) -> BackendResult<Vec<(Version, Metadata)>> {
        let mut history = Vec::new();
        for version in self.list_versions_async(name).await? {
            if let Some(metadata) = self.fetch_metadata_async(name, &version).await? {
                history.push((version, metadata));
            }
        }
        sort_by_commit(&mut history);
        Ok(history)
    }

    async fn list_objects_async(&self) -> BackendResult<Vec<ObjectName>> {
        let mut names = BTreeSet::new();
        for key in self.list_keys(OBJECTS_DIR).await? {
            let parts: Vec<&str> = key.as_ref().split('/').collect();
            let [_, encoded, version, file] = parts.as_slice() else {
                continue;
            };
            if *file != METADATA_FILE || Version::new(*version).is_err() {
                continue;
            }
            match ObjectName::decode(encoded) {
                Ok(name) => {
                    names.insert(name);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unrecognized object key");
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    // ----- locks -----

    async fn read_lock(&self, path: &StorePath) -> BackendResult<Option<(LockEntry, UpdateVersion)>> {
        let Some((data, version)) = self.get_versioned(path).await? else {
            return Ok(None);
        };
        let entry = LockEntry::from_json(&data).map_err(|e| BackendError::corrupt(path.to_string(), e))?;
        Ok(Some((entry, version)))
    }

    async fn try_acquire_lock_async(&self, key: &ObjectName, lock_id: &str, ttl: Duration) -> BackendResult<bool> {
        let path = StorePath::from(lock_key(key));
        for _ in 0..MAX_LOCK_ROUNDS {
            let entry = LockEntry::new(key.as_str(), lock_id, ttl);
            let created = self
                .store
                .put_opts(&path, PutPayload::from(entry.to_json()?), PutMode::Create.into())
                .await;
            match created {
                Ok(_) => {
                    tracing::debug!(key = %key, lock_id, "lock acquired");
                    return Ok(true);
                }
                Err(e) if is_contention(&e) => {}
                Err(e) => return Err(e.into()),
            }

            let Some((current, observed)) = self.read_lock(&path).await? else {
                continue;
            };
            let refreshing = current.is_held_by(lock_id);
            if !refreshing && !current.is_expired() {
                return Ok(false);
            }
            if !refreshing {
                tracing::debug!(key = %key, stale_holder = %current.lock_id, "taking over expired lock");
            }

            let swapped = self
                .store
                .put_opts(&path, PutPayload::from(entry.to_json()?), PutMode::Update(observed).into())
                .await;
            match swapped {
                Ok(_) => return Ok(true),
                Err(object_store::Error::NotFound { .. }) => continue,
                Err(e) if is_contention(&e) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    async fn release_lock_async(&self, key: &ObjectName, lock_id: &str) -> BackendResult<bool> {
        let path = StorePath::from(lock_key(key));
        let Some((current, _)) = self.read_lock(&path).await? else {
            return Ok(false);
        };
        if !current.is_held_by(lock_id) {
            return Ok(false);
        }
        match self.store.delete(&path).await {
            Ok(()) => {
                tracing::debug!(key = %key, lock_id, "lock released");
                Ok(true)
            }
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn check_lock_async(&self, key: &ObjectName) -> BackendResult<LockStatus> {
        let entry = self.read_lock(&StorePath::from(lock_key(key))).await?;
        Ok(LockStatus::from_entry(entry.as_ref().map(|(e, _)| e)))
    }
}

impl Backend for ObjectStoreBackend {
    fn describe(&self) -> String {
        self.location.clone()
    }

    fn materializers(&self) -> &MaterializerTable {
        &self.materializers
    }

    fn push(&self, name: &ObjectName, version: &Version, local_path: &Path) -> BackendResult<()> {
        self.block_on(self.push_async(name, version, local_path))
    }

    fn pull(&self, name: &ObjectName, version: &Version, local_path: &Path) -> BackendResult<()> {
        self.block_on(self.pull_async(name, version, local_path))
    }

    fn delete(&self, name: &ObjectName, selector: &VersionSelector) -> BackendResult<Vec<Version>> {
        self.block_on(self.delete_async(name, selector))
    }

    fn save_metadata(&self, name: &ObjectName, version: &Version, metadata: &Metadata) -> BackendResult<()> {
        self.block_on(self.save_metadata_async(name, version, metadata))
    }

    fn fetch_metadata(&self, name: &ObjectName, version: &Version) -> BackendResult<Option<Metadata>> {
        self.block_on(self.fetch_metadata_async(name, version))
    }

    fn delete_metadata(&self, name: &ObjectName, version: &Version) -> BackendResult<bool> {
        self.block_on(self.delete_metadata_async(name, version))
    }

    fn list_objects(&self) -> BackendResult<Vec<ObjectName>> {
        self.block_on(self.list_objects_async())
    }

    fn list_versions(&self, name: &ObjectName) -> BackendResult<Vec<Version>> {
        self.block_on(self.list_versions_async(name))
    }

    fn has_object(&self, name: &ObjectName, version: &Version) -> BackendResult<bool> {
        self.block_on(self.exists(&StorePath::from(metadata_key(name, version))))
    }

    fn overwrite(
        &self,
        source_name: &ObjectName,
        source_version: &Version,
        target_name: &ObjectName,
        target_version: &Version,
        metadata: &Metadata,
    ) -> BackendResult<()> {
        self.block_on(self.overwrite_async(source_name, source_version, target_name, target_version, metadata))
    }

    fn version_history(&self, name: &ObjectName) -> BackendResult<Vec<(Version, Metadata)>> {
        self.block_on(self.version_history_async(name))
    }

    fn try_acquire_lock(&self, key: &ObjectName, lock_id: &str, ttl: Duration) -> BackendResult<bool> {
        self.block_on(self.try_acquire_lock_async(key, lock_id, ttl))
    }

    fn release_lock(&self, key: &ObjectName, lock_id: &str) -> BackendResult<bool> {
        self.block_on(self.release_lock_async(key, lock_id))
    }

    fn check_lock(&self, key: &ObjectName) -> BackendResult<LockStatus> {
        self.block_on(self.check_lock_async(key))
    }

    fn health_check(&self) -> BackendResult<()> {
        self.block_on(async {
            self.store
                .list_with_delimiter(Some(&StorePath::from(OBJECTS_DIR)))
                .await
                .map(|_| ())
                .map_err(BackendError::from)
        })
    }
}

impl Drop for ObjectStoreBackend {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics; shut it down instead.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("location", &self.location)
            .field("materializers", &self.materializers)
            .finish_non_exhaustive()
    }
}

fn is_contention(e: &object_store::Error) -> bool {
    matches!(
        e,
        object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. }
    )
}

/// Wrap a store with a [`PrefixStore`] if `prefix` is non-empty.
fn wrap_with_prefix<T: ObjectStore>(store: T, prefix: &str) -> BackendResult<Arc<dyn ObjectStore>> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return Ok(Arc::new(store));
    }
    let prefix = StorePath::parse(prefix)
        .map_err(|e| BackendError::Config(format!("invalid prefix '{prefix}': {e}")))?;
    Ok(Arc::new(PrefixStore::new(store, prefix)))
}

/// Relative `/`-separated paths of every file under `root`, sorted.
fn local_files(root: &Path) -> BackendResult<Vec<String>> {
    if !root.is_dir() {
        return Err(BackendError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("payload directory {} does not exist", root.display()),
        )));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| BackendError::corrupt(entry.path().display().to_string(), e))?;
        let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
        files.push(parts.join("/"));
    }
    Ok(files)
}

fn is_relative_file(rel: &str) -> bool {
    !rel.is_empty()
        && Path::new(rel)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    fn backend() -> ObjectStoreBackend {
        ObjectStoreBackend::in_memory().unwrap()
    }

    #[test]
    fn payload_roundtrip() {
        conformance::payload_roundtrip(&backend());
    }

    #[test]
    fn pull_missing_is_not_found() {
        conformance::pull_missing_is_not_found(&backend());
    }

    #[test]
    fn push_is_idempotent() {
        conformance::push_is_idempotent(&backend());
    }

    #[test]
    fn metadata_lifecycle() {
        conformance::metadata_lifecycle(&backend());
    }

    #[test]
    fn payload_alone_is_not_discoverable() {
        conformance::payload_alone_is_not_discoverable(&backend());
    }

    #[test]
    fn listing() {
        conformance::listing(&backend());
    }

    #[test]
    fn delete_selectors() {
        conformance::delete_selectors(&backend());
    }

    #[test]
    fn latest_follows_commit_order() {
        conformance::latest_follows_commit_order(&backend());
    }

    #[test]
    fn overwrite_copies_version() {
        conformance::overwrite_copies_version(&backend());
    }

    #[test]
    fn lock_exclusivity_and_ownership() {
        conformance::lock_exclusivity_and_ownership(&backend());
    }

    #[test]
    fn expired_lock_is_taken_over() {
        conformance::expired_lock_is_taken_over(&backend());
    }

    #[test]
    fn materializer_overrides_are_per_instance() {
        conformance::materializer_overrides_are_per_instance(&backend(), &backend());
    }

    #[test]
    fn instances_on_one_store_share_state() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let a = ObjectStoreBackend::new(Arc::clone(&store), "memory://shared").unwrap();
        let b = ObjectStoreBackend::new(store, "memory://shared").unwrap();
        let key = ObjectName::new("teams:shared").unwrap();

        assert!(a.try_acquire_lock(&key, "a", Duration::from_secs(60)).unwrap());
        assert!(!b.try_acquire_lock(&key, "b", Duration::from_secs(60)).unwrap());
        assert_eq!(b.check_lock(&key).unwrap(), LockStatus::held_by("a"));

        a.save_metadata(&key, &Version::initial(), &Metadata::new("bytes", "bytes"))
            .unwrap();
        assert_eq!(b.list_versions(&key).unwrap(), vec![Version::initial()]);
    }

    #[test]
    fn racing_threads_get_exactly_one_lock() {
        use std::sync::Barrier;

        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let backend = ObjectStoreBackend::new(store, "memory://race").unwrap();
                    let key = ObjectName::new("teams:race").unwrap();
                    barrier.wait();
                    backend
                        .try_acquire_lock(&key, &format!("worker-{i}"), Duration::from_secs(60))
                        .unwrap()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn prefix_scopes_keys() {
        let inner: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let scoped = wrap_with_prefix(Arc::clone(&inner), "team/a/").unwrap();
        let backend = ObjectStoreBackend::new(scoped, "memory://team/a").unwrap();
        let name = ObjectName::new("teams:x").unwrap();
        backend
            .save_metadata(&name, &Version::initial(), &Metadata::new("bytes", "bytes"))
            .unwrap();

        let raw = ObjectStoreBackend::new(inner, "memory://").unwrap();
        let keys = raw.block_on(raw.list_keys("team/a")).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].as_ref(), "team/a/objects/teams_x/1/metadata.json");
    }

    #[test]
    fn tampered_manifest_is_corrupt() {
        let b = backend();
        let name = ObjectName::new("teams:evil").unwrap();
        let v = Version::initial();
        b.block_on(b.write_manifest(
            &name,
            &v,
            &Manifest {
                files: vec!["../escape".into()],
            },
        ))
        .unwrap();
        let out = tempfile::tempdir().unwrap();
        let err = b.pull(&name, &v, out.path()).unwrap_err();
        assert!(matches!(err, BackendError::Corrupt { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn usable_inside_a_runtime() {
        let b = backend();
        let key = ObjectName::new("teams:async").unwrap();
        assert!(b.try_acquire_lock(&key, "x", Duration::from_secs(60)).unwrap());
        assert!(b.release_lock(&key, "x").unwrap());
        drop(b);
    }

    #[test]
    fn local_file_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b/c")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("b/c/d.bin"), b"2").unwrap();
        assert_eq!(local_files(dir.path()).unwrap(), vec!["a.txt", "b/c/d.bin"]);
        assert!(is_relative_file("b/c/d.bin"));
        assert!(!is_relative_file("/abs"));
        assert!(!is_relative_file(""));
    }
}
