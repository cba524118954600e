use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;
use tessera_archive::{defaults, directory_digest, ArchiveError, Binding};
use tessera_backend::Backend;
use tessera_types::{LockStatus, Metadata, ObjectName, Version, VersionSelector};
use uuid::Uuid;

use crate::batch::{BatchResult, ObjectRef, NEXT_VERSION_LABEL};
use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::guard::LockGuard;

/// Per-save options.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SaveOptions {
    /// Explicit version; the next integer version is assigned if unset.
    pub version: Option<String>,
    pub tags: Vec<String>,
    /// Caller keys merged into the metadata document.
    pub extra: BTreeMap<String, Value>,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    fn label(&self) -> String {
        self.version
            .clone()
            .unwrap_or_else(|| NEXT_VERSION_LABEL.to_string())
    }
}

/// One entry of [`Registry::save_many`]. Entries may hold different types.
pub struct SaveItem<'a> {
    name: &'a str,
    value: &'a dyn Any,
    type_name: &'static str,
    options: SaveOptions,
}

impl<'a> SaveItem<'a> {
    pub fn new<T: Any>(name: &'a str, value: &'a T) -> Self {
        Self {
            name,
            value,
            type_name: type_name::<T>(),
            options: SaveOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SaveOptions) -> Self {
        self.options = options;
        self
    }
}

/// Versioned object registry over one [`Backend`].
///
/// Writers to a name are serialized by the backend's name-scoped lock;
/// readers never lock. Every committed version is immutable.
#[derive(Clone)]
pub struct Registry {
    backend: Arc<dyn Backend>,
    config: RegistryConfig,
}

impl Registry {
    /// Open a registry. Installs the built-in default archivers on first use.
    pub fn new(backend: Arc<dyn Backend>, config: RegistryConfig) -> Self {
        defaults::init();
        tracing::debug!(backend = %backend.describe(), "registry opened");
        Self { backend, config }
    }

    pub fn with_defaults(backend: Arc<dyn Backend>) -> Self {
        Self::new(backend, RegistryConfig::default())
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ---- Writes ----

    /// Save `value` under the next free version of `name`.
    pub fn save<T: Any>(&self, name: &str, value: &T) -> RegistryResult<Version> {
        self.save_with(name, value, SaveOptions::default())
    }

    pub fn save_with<T: Any>(&self, name: &str, value: &T, options: SaveOptions) -> RegistryResult<Version> {
        self.save_inner(name, value, type_name::<T>(), options)
    }

    /// Save a value whose type is only known at runtime.
    pub fn save_dyn(&self, name: &str, value: &dyn Any, options: SaveOptions) -> RegistryResult<Version> {
        self.save_inner(name, value, "dynamic value", options)
    }

    fn save_inner(
        &self,
        name: &str,
        value: &dyn Any,
        type_name: &str,
        options: SaveOptions,
    ) -> RegistryResult<Version> {
        let name = self.backend.validate_object_name(name)?;
        let explicit = options.version.as_deref().map(Version::new).transpose()?;
        let binding = self.resolve_archiver(value.type_id(), type_name)?;

        let _guard = self.lock(&name)?;
        let (version, sequence) = next_commit(&name, &self.backend.version_history(&name)?, explicit)?;

        let scratch = self.scratch("save")?;
        binding.archiver.save(value, scratch.path())?;
        let metadata = Metadata::new(binding.key.tag(), binding.archiver_name())
            .with_tags(options.tags)
            .with_extra(options.extra)
            .with_checksum(directory_digest(scratch.path())?)
            .with_sequence(sequence);
        self.commit(&name, &version, scratch.path(), &metadata)?;

        tracing::info!(
            name = %name, version = %version, archiver = binding.archiver_name(),
            "saved object"
        );
        Ok(version)
    }

    /// Payload first, then metadata. A metadata failure rolls the payload back.
    fn commit(&self, name: &ObjectName, version: &Version, payload: &Path, metadata: &Metadata) -> RegistryResult<()> {
        self.backend.push(name, version, payload)?;
        let Err(error) = self.backend.save_metadata(name, version, metadata) else {
            return Ok(());
        };

        tracing::warn!(name = %name, version = %version, error = %error, "metadata write failed, rolling back payload");
        match self.backend.delete(name, &VersionSelector::Exact(version.clone())) {
            Ok(_) => Err(error.into()),
            Err(rollback) => {
                tracing::error!(name = %name, version = %version, error = %rollback, "payload rollback failed");
                Err(RegistryError::Inconsistent {
                    name: name.to_string(),
                    version: version.to_string(),
                    reason: format!("metadata write failed ({error}); payload rollback failed ({rollback})"),
                })
            }
        }
    }

    /// Delete one version, the latest, or every version of `name`.
    ///
    /// Deleting `All` also releases the lock record for the name.
    pub fn delete(&self, name: &str, selector: VersionSelector) -> RegistryResult<Vec<Version>> {
        let name = self.backend.validate_object_name(name)?;
        let guard = self.lock(&name)?;

        let removed = if selector.is_all() {
            self.backend.delete(&name, &VersionSelector::All)?
        } else {
            let version = self.resolve_version(&name, &selector)?;
            if !self.backend.has_object(&name, &version)? {
                return Err(not_found(&name, version.as_str()));
            }
            self.backend.delete(&name, &VersionSelector::Exact(version))?
        };

        // The versions are gone either way; a stuck lock record expires with its TTL.
        if selector.is_all() {
            match guard.release() {
                Ok(true) => {}
                Ok(false) => tracing::warn!(name = %name, "lock was lost before delete completed"),
                Err(e) => tracing::warn!(name = %name, error = %e, "failed to release lock after delete"),
            }
        }
        tracing::info!(name = %name, selector = %selector, removed = removed.len(), "deleted");
        Ok(removed)
    }

    /// Copy an existing version to `target` without an archiver round trip.
    ///
    /// The target version is assigned like a save if `target_version` is
    /// `None`, and the copy becomes the target's latest version. Returns the
    /// version written.
    pub fn overwrite(
        &self,
        source: &str,
        source_selector: VersionSelector,
        target: &str,
        target_version: Option<&str>,
    ) -> RegistryResult<Version> {
        let source = self.backend.validate_object_name(source)?;
        let target = self.backend.validate_object_name(target)?;
        let explicit = target_version.map(Version::new).transpose()?;
        let source_version = self.resolve_version(&source, &source_selector)?;
        let source_metadata = self.require_metadata(&source, &source_version)?;

        let _guard = self.lock(&target)?;
        let (version, sequence) = next_commit(&target, &self.backend.version_history(&target)?, explicit)?;
        let metadata = source_metadata.with_sequence(sequence);
        self.backend.overwrite(&source, &source_version, &target, &version, &metadata)?;

        tracing::info!(
            source = %source, source_version = %source_version,
            target = %target, version = %version,
            "copied version"
        );
        Ok(version)
    }

    // ---- Reads ----

    /// Load a version as `T`.
    ///
    /// Fails with `TypeMismatch` if the stored type tag cannot be read back
    /// as `T`, and with `Corrupt` if the payload no longer matches its
    /// recorded checksum.
    pub fn load<T: Any>(&self, name: &str, selector: VersionSelector) -> RegistryResult<T> {
        let name = self.backend.validate_object_name(name)?;
        let version = self.resolve_version(&name, &selector)?;
        let metadata = self.require_metadata(&name, &version)?;

        let id = TypeId::of::<T>();
        let mismatch = || RegistryError::TypeMismatch {
            name: name.to_string(),
            version: version.to_string(),
            stored: metadata.type_tag.clone(),
            requested: type_name::<T>().to_string(),
        };
        let Some(binding) = self
            .backend
            .materializers()
            .resolve_stored(id, &metadata.type_tag)
            .or_else(|| defaults::resolve_stored(id, &metadata.type_tag))
        else {
            self.resolve_archiver(id, type_name::<T>())?;
            return Err(mismatch());
        };

        let value = self.materialize(&name, &version, &metadata, &binding)?;
        value.downcast::<T>().map(|v| *v).map_err(|_| mismatch())
    }

    /// Load a version using the archiver recorded for its stored type tag.
    pub fn load_dyn(&self, name: &str, selector: VersionSelector) -> RegistryResult<Box<dyn Any + Send + Sync>> {
        let name = self.backend.validate_object_name(name)?;
        let version = self.resolve_version(&name, &selector)?;
        let metadata = self.require_metadata(&name, &version)?;
        let binding = self
            .backend
            .materializers()
            .resolve_tag(&metadata.type_tag)
            .or_else(|| defaults::resolve_tag(&metadata.type_tag))
            .ok_or_else(|| ArchiveError::NoArchiver {
                type_tag: metadata.type_tag.clone(),
            })?;
        self.materialize(&name, &version, &metadata, &binding)
    }

    fn materialize(
        &self,
        name: &ObjectName,
        version: &Version,
        metadata: &Metadata,
        binding: &Binding,
    ) -> RegistryResult<Box<dyn Any + Send + Sync>> {
        let scratch = self.scratch("load")?;
        self.backend.pull(name, version, scratch.path())?;

        if let Some(expected) = metadata.checksum.as_deref().filter(|_| self.config.verify_checksums) {
            let actual = directory_digest(scratch.path())?;
            if actual != expected {
                return Err(RegistryError::Corrupt {
                    location: format!("{name}@{version}"),
                    reason: format!("payload checksum {actual} does not match recorded {expected}"),
                });
            }
        }

        let value = binding.archiver.load(scratch.path(), &binding.key)?;
        tracing::debug!(name = %name, version = %version, archiver = binding.archiver_name(), "loaded object");
        Ok(value)
    }

    pub fn fetch_metadata(&self, name: &str, selector: VersionSelector) -> RegistryResult<Metadata> {
        let name = self.backend.validate_object_name(name)?;
        let version = self.resolve_version(&name, &selector)?;
        self.require_metadata(&name, &version)
    }

    // ---- Introspection ----

    /// With `version` unset, whether any version of `name` exists.
    pub fn has_object(&self, name: &str, version: Option<&str>) -> RegistryResult<bool> {
        let name = self.backend.validate_object_name(name)?;
        match version {
            Some(v) => Ok(self.backend.has_object(&name, &Version::new(v)?)?),
            None => Ok(!self.backend.list_versions(&name)?.is_empty()),
        }
    }

    pub fn list_objects(&self) -> RegistryResult<Vec<ObjectName>> {
        Ok(self.backend.list_objects()?)
    }

    pub fn list_versions(&self, name: &str) -> RegistryResult<Vec<Version>> {
        let name = self.backend.validate_object_name(name)?;
        Ok(self.backend.list_versions(&name)?)
    }

    /// The version `Latest` currently resolves to: the most recent commit.
    pub fn latest_version(&self, name: &str) -> RegistryResult<Option<Version>> {
        let name = self.backend.validate_object_name(name)?;
        Ok(self.backend.latest_version(&name)?)
    }

    pub fn lock_status(&self, name: &str) -> RegistryResult<LockStatus> {
        let name = self.backend.validate_object_name(name)?;
        Ok(self.backend.check_lock(&name)?)
    }

    /// Human-readable listing of every object and its versions.
    pub fn dump(&self, latest_only: bool) -> RegistryResult<String> {
        let mut out = format!("registry {}\n", self.backend.describe());
        for name in self.backend.list_objects()? {
            let versions = if latest_only {
                self.backend.latest_version(&name)?.into_iter().collect()
            } else {
                self.backend.list_versions(&name)?
            };
            out.push_str(&format!("{name}\n"));
            for version in versions {
                // Deleted between listing and fetch.
                let Some(meta) = self.backend.fetch_metadata(&name, &version)? else {
                    continue;
                };
                out.push_str(&format!(
                    "  {version}  type={} archiver={} created={} tags=[{}]\n",
                    meta.type_tag,
                    meta.archiver,
                    meta.created_at.to_rfc3339(),
                    meta.tags.join(","),
                ));
            }
        }
        Ok(out)
    }

    // ---- Batch operations ----

    /// Save every item, recording failures instead of stopping.
    ///
    /// Fails as a whole only if the backend is unreachable up front.
    pub fn save_many<'a>(&self, items: impl IntoIterator<Item = SaveItem<'a>>) -> RegistryResult<BatchResult<Version>> {
        self.backend.health_check()?;
        let mut batch = BatchResult::new();
        for item in items {
            let requested = ObjectRef::new(item.name, item.options.label());
            match self.save_inner(item.name, item.value, item.type_name, item.options) {
                Ok(version) => batch.record_success(ObjectRef::new(item.name, version.as_str()), version),
                Err(e) => batch.record_failure(requested, &e),
            }
        }
        tracing::info!(succeeded = batch.success_count(), failed = batch.failure_count(), "batch save finished");
        Ok(batch)
    }

    pub fn load_many<'a, T: Any>(
        &self,
        items: impl IntoIterator<Item = (&'a str, VersionSelector)>,
    ) -> RegistryResult<BatchResult<T>> {
        self.backend.health_check()?;
        let mut batch = BatchResult::new();
        for (name, selector) in items {
            let item = ObjectRef::new(name, selector.to_string());
            batch.record(item, self.load::<T>(name, selector));
        }
        Ok(batch)
    }

    pub fn delete_many<'a>(
        &self,
        items: impl IntoIterator<Item = (&'a str, VersionSelector)>,
    ) -> RegistryResult<BatchResult<Vec<Version>>> {
        self.backend.health_check()?;
        let mut batch = BatchResult::new();
        for (name, selector) in items {
            let item = ObjectRef::new(name, selector.to_string());
            batch.record(item, self.delete(name, selector));
        }
        tracing::info!(succeeded = batch.success_count(), failed = batch.failure_count(), "batch delete finished");
        Ok(batch)
    }

    // ---- Internals ----

    /// Backend override first, then the process-wide defaults.
    fn resolve_archiver(&self, id: TypeId, type_name: &str) -> RegistryResult<Binding> {
        self.backend
            .registered_materializer(id)
            .or_else(|| defaults::resolve(id))
            .ok_or_else(|| {
                ArchiveError::NoArchiver {
                    type_tag: type_name.to_string(),
                }
                .into()
            })
    }

    fn lock(&self, name: &ObjectName) -> RegistryResult<LockGuard> {
        let lock_id = Uuid::now_v7().to_string();
        if self.backend.acquire_lock(name, &lock_id, &self.config.lock_request())? {
            tracing::trace!(name = %name, lock_id = %lock_id, "lock held");
            return Ok(LockGuard::new(Arc::clone(&self.backend), name.clone(), lock_id));
        }
        let holder = match self.backend.check_lock(name) {
            Ok(status) => status.holder,
            Err(e) => {
                tracing::debug!(name = %name, error = %e, "could not inspect contended lock");
                None
            }
        };
        Err(RegistryError::LockAcquisition {
            name: name.to_string(),
            holder,
        })
    }

    fn resolve_version(&self, name: &ObjectName, selector: &VersionSelector) -> RegistryResult<Version> {
        match selector {
            VersionSelector::Exact(version) => Ok(version.clone()),
            VersionSelector::Latest => self
                .backend
                .latest_version(name)?
                .ok_or_else(|| not_found(name, VersionSelector::Latest.to_string())),
            VersionSelector::All => Err(RegistryError::InvalidArgument(format!(
                "'all' is only valid when deleting {name}"
            ))),
        }
    }

    fn require_metadata(&self, name: &ObjectName, version: &Version) -> RegistryResult<Metadata> {
        self.backend
            .fetch_metadata(name, version)?
            .ok_or_else(|| not_found(name, version.as_str()))
    }

    fn scratch(&self, purpose: &str) -> RegistryResult<TempDir> {
        let prefix = format!("tessera-{purpose}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.config.scratch_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("backend", &self.backend.describe())
            .field("config", &self.config)
            .finish()
    }
}

/// Version label and commit sequence for the next write to `name`.
///
/// Auto versions continue after the greatest numeric label. The sequence is
/// one past the highest recorded, so the new version becomes latest.
fn next_commit(
    name: &ObjectName,
    history: &[(Version, Metadata)],
    explicit: Option<Version>,
) -> RegistryResult<(Version, u64)> {
    let version = explicit.unwrap_or_else(|| Version::next_after(history.iter().map(|(v, _)| v)));
    if history.iter().any(|(existing, _)| *existing == version) {
        return Err(RegistryError::VersionConflict {
            name: name.to_string(),
            version: version.to_string(),
        });
    }
    let sequence = history
        .iter()
        .filter_map(|(_, meta)| meta.sequence)
        .max()
        .unwrap_or(0)
        .saturating_add(1);
    Ok((version, sequence))
}

fn not_found(name: &ObjectName, version: impl Into<String>) -> RegistryError {
    RegistryError::ObjectNotFound {
        name: name.to_string(),
        version: version.into(),
    }
}
