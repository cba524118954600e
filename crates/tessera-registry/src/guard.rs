use std::sync::Arc;

use tessera_backend::Backend;
use tessera_types::ObjectName;

use crate::error::RegistryResult;

/// Holds a name's backend lock until released or dropped.
///
/// Dropping the guard releases the lock on every exit path; failures there
/// are logged, since the record expires with its TTL anyway.
pub struct LockGuard {
    backend: Arc<dyn Backend>,
    name: ObjectName,
    lock_id: String,
    released: bool,
}

impl LockGuard {
    pub(crate) fn new(backend: Arc<dyn Backend>, name: ObjectName, lock_id: String) -> Self {
        Self {
            backend,
            name,
            lock_id,
            released: false,
        }
    }

    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    /// Release now and report the outcome.
    ///
    /// Returns `false` if the lock was no longer held by this guard.
    pub fn release(mut self) -> RegistryResult<bool> {
        self.released = true;
        Ok(self.backend.release_lock(&self.name, &self.lock_id)?)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.backend.release_lock(&self.name, &self.lock_id) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                name = %self.name, lock_id = %self.lock_id,
                "lock was no longer held at release"
            ),
            Err(e) => tracing::warn!(
                name = %self.name, lock_id = %self.lock_id, error = %e,
                "failed to release lock"
            ),
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("lock_id", &self.lock_id)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tessera_backend::{LocalBackend, ObjectStoreBackend};
    use tessera_types::LockStatus;

    #[test]
    fn drop_releases() {
        let backend: Arc<dyn Backend> = Arc::new(ObjectStoreBackend::in_memory().unwrap());
        let name = ObjectName::new("teams:guarded").unwrap();
        assert!(backend.try_acquire_lock(&name, "g", Duration::from_secs(60)).unwrap());
        {
            let _guard = LockGuard::new(Arc::clone(&backend), name.clone(), "g".into());
            assert_eq!(backend.check_lock(&name).unwrap(), LockStatus::held_by("g"));
        }
        assert_eq!(backend.check_lock(&name).unwrap(), LockStatus::unlocked());
    }

    #[test]
    fn explicit_release_reports_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::open(dir.path()).unwrap());
        let name = ObjectName::new("teams:guarded").unwrap();
        assert!(backend.try_acquire_lock(&name, "g", Duration::from_secs(60)).unwrap());

        let guard = LockGuard::new(Arc::clone(&backend), name.clone(), "g".into());
        assert!(guard.release().unwrap());

        // A guard for a lock it never held releases nothing.
        assert!(backend.try_acquire_lock(&name, "other", Duration::from_secs(60)).unwrap());
        let stray = LockGuard::new(Arc::clone(&backend), name.clone(), "g".into());
        assert!(!stray.release().unwrap());
        assert_eq!(backend.check_lock(&name).unwrap(), LockStatus::held_by("other"));
    }
}
