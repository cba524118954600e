//! Behaviour every [`Backend`] must share, run against each implementation.

use std::any::TypeId;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tessera_archive::BytesArchiver;
use tessera_types::{LockStatus, Metadata, ObjectName, Version, VersionSelector};

use crate::error::BackendError;
use crate::traits::Backend;

const TTL: Duration = Duration::from_secs(60);

fn name(s: &str) -> ObjectName {
    ObjectName::new(s).unwrap()
}

fn v(s: &str) -> Version {
    Version::new(s).unwrap()
}

fn write_payload(dir: &Path, files: &[(&str, &[u8])]) {
    for (path, data) in files {
        let target = dir.join(path);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, data).unwrap();
    }
}

/// Push a one-file payload and its metadata.
fn store(backend: &dyn Backend, n: &ObjectName, version: &Version, body: &[u8]) {
    let src = tempfile::tempdir().unwrap();
    write_payload(src.path(), &[("data.bin", body)]);
    backend.push(n, version, src.path()).unwrap();
    backend
        .save_metadata(n, version, &Metadata::new("bytes", "bytes"))
        .unwrap();
}

pub fn payload_roundtrip(backend: &dyn Backend) {
    let n = name("teams:vision");
    let src = tempfile::tempdir().unwrap();
    write_payload(
        src.path(),
        &[("weights.bin", b"\x00\x01\x02"), ("nested/config.json", b"{}")],
    );
    backend.push(&n, &v("1"), src.path()).unwrap();

    let dst = tempfile::tempdir().unwrap();
    backend.pull(&n, &v("1"), dst.path()).unwrap();
    assert_eq!(fs::read(dst.path().join("weights.bin")).unwrap(), b"\x00\x01\x02");
    assert_eq!(fs::read(dst.path().join("nested/config.json")).unwrap(), b"{}");
}

pub fn pull_missing_is_not_found(backend: &dyn Backend) {
    let dst = tempfile::tempdir().unwrap();
    let err = backend.pull(&name("teams:ghost"), &v("1"), dst.path()).unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}

pub fn push_is_idempotent(backend: &dyn Backend) {
    let n = name("teams:retry");
    let src = tempfile::tempdir().unwrap();
    write_payload(src.path(), &[("a.txt", b"same")]);
    backend.push(&n, &v("1"), src.path()).unwrap();
    backend.push(&n, &v("1"), src.path()).unwrap();

    let dst = tempfile::tempdir().unwrap();
    backend.pull(&n, &v("1"), dst.path()).unwrap();
    let entries: Vec<_> = fs::read_dir(dst.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"same");
}

pub fn metadata_lifecycle(backend: &dyn Backend) {
    let n = name("teams:meta");
    assert_eq!(backend.fetch_metadata(&n, &v("1")).unwrap(), None);

    let meta = Metadata::new("string", "text").with_tags(["prod"]);
    backend.save_metadata(&n, &v("1"), &meta).unwrap();
    assert_eq!(backend.fetch_metadata(&n, &v("1")).unwrap(), Some(meta));
    assert!(backend.has_object(&n, &v("1")).unwrap());

    assert!(backend.delete_metadata(&n, &v("1")).unwrap());
    assert!(!backend.delete_metadata(&n, &v("1")).unwrap());
    assert!(!backend.has_object(&n, &v("1")).unwrap());
}

pub fn payload_alone_is_not_discoverable(backend: &dyn Backend) {
    let n = name("teams:partial");
    let src = tempfile::tempdir().unwrap();
    write_payload(src.path(), &[("data.bin", b"x")]);
    backend.push(&n, &v("1"), src.path()).unwrap();

    assert!(!backend.has_object(&n, &v("1")).unwrap());
    assert!(backend.list_versions(&n).unwrap().is_empty());
    assert!(!backend.list_objects().unwrap().contains(&n));
}

pub fn listing(backend: &dyn Backend) {
    let a = name("teams:alpha");
    let b = name("teams:beta:sub");
    for version in ["10", "2", "1"] {
        store(backend, &a, &v(version), b"a");
    }
    store(backend, &b, &v("1"), b"b");

    assert_eq!(backend.list_versions(&a).unwrap(), vec![v("1"), v("2"), v("10")]);
    assert_eq!(backend.list_objects().unwrap(), vec![a, b]);
    assert!(backend.list_versions(&name("teams:none")).unwrap().is_empty());
}

pub fn delete_selectors(backend: &dyn Backend) {
    let n = name("teams:doomed");
    for version in ["1", "2", "3"] {
        store(backend, &n, &v(version), b"x");
    }

    let removed = backend.delete(&n, &VersionSelector::Exact(v("2"))).unwrap();
    assert_eq!(removed, vec![v("2")]);
    assert_eq!(backend.list_versions(&n).unwrap(), vec![v("1"), v("3")]);

    let removed = backend.delete(&n, &VersionSelector::Latest).unwrap();
    assert_eq!(removed, vec![v("3")]);

    let removed = backend.delete(&n, &VersionSelector::Exact(v("9"))).unwrap();
    assert!(removed.is_empty());

    store(backend, &n, &v("5"), b"x");
    let removed = backend.delete(&n, &VersionSelector::All).unwrap();
    assert_eq!(removed, vec![v("1"), v("5")]);
    assert!(backend.list_versions(&n).unwrap().is_empty());
    assert!(!backend.list_objects().unwrap().contains(&n));

    let dst = tempfile::tempdir().unwrap();
    assert!(backend.pull(&n, &v("1"), dst.path()).unwrap_err().is_not_found());
}

pub fn latest_follows_commit_order(backend: &dyn Backend) {
    let n = name("teams:ordered");
    assert_eq!(backend.latest_version(&n).unwrap(), None);

    for (version, sequence) in [("rc-1", 1), ("1.10", 2), ("1.9", 3)] {
        let src = tempfile::tempdir().unwrap();
        write_payload(src.path(), &[("data.bin", b"x")]);
        backend.push(&n, &v(version), src.path()).unwrap();
        let meta = Metadata::new("bytes", "bytes").with_sequence(sequence);
        backend.save_metadata(&n, &v(version), &meta).unwrap();
    }

    assert_eq!(backend.list_versions(&n).unwrap(), vec![v("1.9"), v("1.10"), v("rc-1")]);
    let history: Vec<Version> = backend
        .version_history(&n)
        .unwrap()
        .into_iter()
        .map(|(version, _)| version)
        .collect();
    assert_eq!(history, vec![v("rc-1"), v("1.10"), v("1.9")]);
    assert_eq!(backend.latest_version(&n).unwrap(), Some(v("1.9")));

    assert_eq!(backend.delete(&n, &VersionSelector::Latest).unwrap(), vec![v("1.9")]);
    assert_eq!(backend.latest_version(&n).unwrap(), Some(v("1.10")));
}

pub fn overwrite_copies_version(backend: &dyn Backend) {
    let src = name("teams:source");
    let dst = name("teams:target");
    store(backend, &src, &v("1"), b"payload");
    let copied = Metadata::new("bytes", "bytes").with_sequence(4);

    backend.overwrite(&src, &v("1"), &dst, &v("7"), &copied).unwrap();
    assert!(backend.has_object(&dst, &v("7")).unwrap());
    assert_eq!(backend.fetch_metadata(&dst, &v("7")).unwrap(), Some(copied.clone()));
    let out = tempfile::tempdir().unwrap();
    backend.pull(&dst, &v("7"), out.path()).unwrap();
    assert_eq!(fs::read(out.path().join("data.bin")).unwrap(), b"payload");
    assert!(backend.has_object(&src, &v("1")).unwrap());

    let err = backend.overwrite(&src, &v("1"), &dst, &v("7"), &copied).unwrap_err();
    assert!(matches!(err, BackendError::AlreadyExists { .. }));

    let err = backend.overwrite(&src, &v("9"), &dst, &v("8"), &copied).unwrap_err();
    assert!(err.is_not_found());
    assert!(!backend.has_object(&dst, &v("8")).unwrap());
}

pub fn lock_exclusivity_and_ownership(backend: &dyn Backend) {
    let key = name("teams:locked");
    assert_eq!(backend.check_lock(&key).unwrap(), LockStatus::unlocked());

    assert!(backend.try_acquire_lock(&key, "owner", TTL).unwrap());
    assert!(!backend.try_acquire_lock(&key, "intruder", TTL).unwrap());
    assert_eq!(backend.check_lock(&key).unwrap(), LockStatus::held_by("owner"));

    // Re-acquiring refreshes.
    assert!(backend.try_acquire_lock(&key, "owner", TTL).unwrap());

    assert!(!backend.release_lock(&key, "intruder").unwrap());
    assert_eq!(backend.check_lock(&key).unwrap(), LockStatus::held_by("owner"));

    assert!(backend.release_lock(&key, "owner").unwrap());
    assert!(!backend.release_lock(&key, "owner").unwrap());
    assert_eq!(backend.check_lock(&key).unwrap(), LockStatus::unlocked());

    assert!(backend.try_acquire_lock(&key, "intruder", TTL).unwrap());
    assert!(backend.release_lock(&key, "intruder").unwrap());
}

pub fn expired_lock_is_taken_over(backend: &dyn Backend) {
    let key = name("teams:stale");
    assert!(backend.try_acquire_lock(&key, "crashed", Duration::ZERO).unwrap());
    assert_eq!(backend.check_lock(&key).unwrap(), LockStatus::unlocked());

    assert!(backend.try_acquire_lock(&key, "next", TTL).unwrap());
    assert_eq!(backend.check_lock(&key).unwrap(), LockStatus::held_by("next"));
    assert!(!backend.release_lock(&key, "crashed").unwrap());
    assert!(backend.release_lock(&key, "next").unwrap());
}

pub fn materializer_overrides_are_per_instance(a: &dyn Backend, b: &dyn Backend) {
    a.register_materializer(Arc::new(BytesArchiver::new())).unwrap();

    let binding = a.registered_materializer(TypeId::of::<Vec<u8>>()).unwrap();
    assert_eq!(binding.archiver_name(), "bytes");
    assert_eq!(a.registered_materializers().len(), 1);
    assert!(b.registered_materializer(TypeId::of::<Vec<u8>>()).is_none());

    let err = a.register_materializer(Arc::new(BytesArchiver::new())).unwrap_err();
    assert!(matches!(err, BackendError::Archive(_)));
}
