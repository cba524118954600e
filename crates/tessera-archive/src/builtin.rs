//! Built-in archivers for common payload types.

use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Component, Path};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::archiver::{downcast_ref, expect_type, Archiver, Specificity, TypeKey};
use crate::error::{ArchiveError, ArchiveResult};

const BYTES_FILE: &str = "data.bin";
const TEXT_FILE: &str = "data.txt";
const JSON_FILE: &str = "data.json";

fn read_required(path: &Path) -> ArchiveResult<Vec<u8>> {
    if !path.exists() {
        return Err(ArchiveError::MissingFile(path.to_path_buf()));
    }
    Ok(fs::read(path)?)
}

// ---------------------------------------------------------------------------
// Bytes
// ---------------------------------------------------------------------------

/// Stores a `Vec<u8>` verbatim as `data.bin`.
#[derive(Clone, Debug)]
pub struct BytesArchiver {
    specificity: Specificity,
}

impl BytesArchiver {
    pub fn new() -> Self {
        Self {
            specificity: Specificity::Exact,
        }
    }

    pub fn generic() -> Self {
        Self {
            specificity: Specificity::Generic,
        }
    }
}

impl Default for BytesArchiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Archiver for BytesArchiver {
    fn name(&self) -> &str {
        "bytes"
    }

    fn associated_types(&self) -> Vec<TypeKey> {
        vec![TypeKey::tagged::<Vec<u8>>("bytes")]
    }

    fn specificity(&self) -> Specificity {
        self.specificity
    }

    fn save(&self, obj: &dyn Any, workdir: &Path) -> ArchiveResult<()> {
        let data = downcast_ref::<Vec<u8>>(obj, self.name())?;
        fs::write(workdir.join(BYTES_FILE), data)?;
        Ok(())
    }

    fn load(&self, workdir: &Path, expected: &TypeKey) -> ArchiveResult<Box<dyn Any + Send + Sync>> {
        expect_type::<Vec<u8>>(expected, self.name())?;
        Ok(Box::new(read_required(&workdir.join(BYTES_FILE))?))
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// Stores a `String` as UTF-8 in `data.txt`.
#[derive(Clone, Debug)]
pub struct TextArchiver {
    specificity: Specificity,
}

impl TextArchiver {
    pub fn new() -> Self {
        Self {
            specificity: Specificity::Exact,
        }
    }

    pub fn generic() -> Self {
        Self {
            specificity: Specificity::Generic,
        }
    }
}

impl Default for TextArchiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Archiver for TextArchiver {
    fn name(&self) -> &str {
        "text"
    }

    fn associated_types(&self) -> Vec<TypeKey> {
        vec![TypeKey::tagged::<String>("string")]
    }

    fn specificity(&self) -> Specificity {
        self.specificity
    }

    fn save(&self, obj: &dyn Any, workdir: &Path) -> ArchiveResult<()> {
        let text = downcast_ref::<String>(obj, self.name())?;
        fs::write(workdir.join(TEXT_FILE), text.as_bytes())?;
        Ok(())
    }

    fn load(&self, workdir: &Path, expected: &TypeKey) -> ArchiveResult<Box<dyn Any + Send + Sync>> {
        expect_type::<String>(expected, self.name())?;
        let bytes = read_required(&workdir.join(TEXT_FILE))?;
        let text = String::from_utf8(bytes).map_err(|e| ArchiveError::Serialization(e.to_string()))?;
        Ok(Box::new(text))
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Stores any serde-serializable `T` as `data.json`.
pub struct JsonArchiver<T> {
    tag: &'static str,
    specificity: Specificity,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonArchiver<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Archiver for `T`, recording `tag` as its type tag.
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            specificity: Specificity::Exact,
            _marker: PhantomData,
        }
    }

    pub fn generic(tag: &'static str) -> Self {
        Self {
            specificity: Specificity::Generic,
            ..Self::new(tag)
        }
    }
}

impl<T> std::fmt::Debug for JsonArchiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonArchiver")
            .field("tag", &self.tag)
            .field("specificity", &self.specificity)
            .finish()
    }
}

impl<T> Archiver for JsonArchiver<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "json"
    }

    fn associated_types(&self) -> Vec<TypeKey> {
        vec![TypeKey::tagged::<T>(self.tag)]
    }

    fn specificity(&self) -> Specificity {
        self.specificity
    }

    fn save(&self, obj: &dyn Any, workdir: &Path) -> ArchiveResult<()> {
        let value = downcast_ref::<T>(obj, self.name())?;
        let data = serde_json::to_vec_pretty(value)
            .map_err(|e| ArchiveError::Serialization(e.to_string()))?;
        fs::write(workdir.join(JSON_FILE), data)?;
        Ok(())
    }

    fn load(&self, workdir: &Path, expected: &TypeKey) -> ArchiveResult<Box<dyn Any + Send + Sync>> {
        expect_type::<T>(expected, self.name())?;
        let data = read_required(&workdir.join(JSON_FILE))?;
        let value: T =
            serde_json::from_slice(&data).map_err(|e| ArchiveError::Serialization(e.to_string()))?;
        Ok(Box::new(value))
    }
}

// ---------------------------------------------------------------------------
// File bundles
// ---------------------------------------------------------------------------

/// A set of named files stored together, e.g. the weights and config of a
/// pre-trained model. Paths are relative and `/`-separated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBundle {
    files: BTreeMap<String, Vec<u8>>,
}

impl FileBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file. Rejects absolute paths and `..` components.
    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> ArchiveResult<()> {
        let path = path.into();
        validate_bundle_path(&path)?;
        self.files.insert(path, data.into());
        Ok(())
    }

    pub fn with_file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> ArchiveResult<Self> {
        self.insert(path, data)?;
        Ok(self)
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total size of all files in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|d| d.len() as u64).sum()
    }
}

fn validate_bundle_path(path: &str) -> ArchiveResult<()> {
    let p = Path::new(path);
    let ok = !path.is_empty()
        && p.components().all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(ArchiveError::InvalidPath(path.to_string()))
    }
}

/// Writes each file of a [`FileBundle`] directly under the work directory.
#[derive(Clone, Debug)]
pub struct BundleArchiver {
    specificity: Specificity,
}

impl BundleArchiver {
    pub fn new() -> Self {
        Self {
            specificity: Specificity::Exact,
        }
    }

    pub fn generic() -> Self {
        Self {
            specificity: Specificity::Generic,
        }
    }
}

impl Default for BundleArchiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Archiver for BundleArchiver {
    fn name(&self) -> &str {
        "bundle"
    }

    fn associated_types(&self) -> Vec<TypeKey> {
        vec![TypeKey::tagged::<FileBundle>("file-bundle")]
    }

    fn specificity(&self) -> Specificity {
        self.specificity
    }

    fn save(&self, obj: &dyn Any, workdir: &Path) -> ArchiveResult<()> {
        let bundle = downcast_ref::<FileBundle>(obj, self.name())?;
        for (rel, data) in &bundle.files {
            let target = workdir.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, data)?;
        }
        Ok(())
    }

    fn load(&self, workdir: &Path, expected: &TypeKey) -> ArchiveResult<Box<dyn Any + Send + Sync>> {
        expect_type::<FileBundle>(expected, self.name())?;
        let mut bundle = FileBundle::new();
        for entry in WalkDir::new(workdir).sort_by_file_name() {
            let entry = entry.map_err(|e| ArchiveError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(workdir)
                .map_err(|_| ArchiveError::InvalidPath(entry.path().display().to_string()))?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            bundle.insert(rel, fs::read(entry.path())?)?;
        }
        Ok(Box::new(bundle))
    }
}

/// The archivers installed by [`crate::defaults::init`], all at
/// [`Specificity::Generic`] so that callers can specialize any of them.
pub fn builtins() -> Vec<Arc<dyn Archiver>> {
    vec![
        Arc::new(BytesArchiver::generic()),
        Arc::new(TextArchiver::generic()),
        Arc::new(BundleArchiver::generic()),
        Arc::new(JsonArchiver::<i32>::generic("i32")),
        Arc::new(JsonArchiver::<i64>::generic("i64")),
        Arc::new(JsonArchiver::<u32>::generic("u32")),
        Arc::new(JsonArchiver::<u64>::generic("u64")),
        Arc::new(JsonArchiver::<f64>::generic("f64")),
        Arc::new(JsonArchiver::<bool>::generic("bool")),
        Arc::new(JsonArchiver::<serde_json::Value>::generic("json")),
    ]
}
