//! Content digests over archived directories.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{ArchiveError, ArchiveResult};

/// BLAKE3 digest (hex) over every file under `dir`.
///
/// Files are visited in sorted path order and each contributes its relative
/// path and its length-prefixed contents, so renames and content changes
/// both alter the digest.
pub fn directory_digest(dir: &Path) -> ArchiveResult<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"tessera-payload-v1:");
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ArchiveError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| ArchiveError::InvalidPath(entry.path().display().to_string()))?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let data = fs::read(entry.path())?;
        hasher.update(&(rel.len() as u64).to_le_bytes());
        hasher.update(rel.as_bytes());
        hasher.update(&(data.len() as u64).to_le_bytes());
        hasher.update(&data);
    }
    Ok(hex::encode(hasher.finalize().as_bytes()))
}
