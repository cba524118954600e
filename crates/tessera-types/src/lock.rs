//! Lock records shared by every process using a backend.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TypesError};

/// Persisted lock record, keyed by object name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub key: String,
    pub lock_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockEntry {
    /// A record taken now and valid for `ttl`.
    pub fn new(key: impl Into<String>, lock_id: impl Into<String>, ttl: Duration) -> Self {
        let acquired_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            key: key.into(),
            lock_id: lock_id.into(),
            acquired_at,
            expires_at: acquired_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_held_by(&self, lock_id: &str) -> bool {
        self.lock_id == lock_id
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TypesError::Serialization(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| TypesError::Serialization(e.to_string()))
    }
}

/// Result of inspecting a lock.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LockStatus {
    pub is_locked: bool,
    pub holder: Option<String>,
}

impl LockStatus {
    pub fn unlocked() -> Self {
        Self::default()
    }

    pub fn held_by(holder: impl Into<String>) -> Self {
        Self {
            is_locked: true,
            holder: Some(holder.into()),
        }
    }

    /// Status derived from a possibly stale record.
    pub fn from_entry(entry: Option<&LockEntry>) -> Self {
        match entry {
            Some(e) if !e.is_expired() => Self::held_by(e.lock_id.clone()),
            _ => Self::unlocked(),
        }
    }
}
