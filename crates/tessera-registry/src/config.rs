use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_backend::{Backoff, LockRequest, DEFAULT_LOCK_TIMEOUT, DEFAULT_LOCK_TTL};

use crate::error::{RegistryError, RegistryResult};

/// Registry behaviour. Durations are seconds in TOML.
///
/// ```toml
/// lock_timeout = 10
/// lock_ttl = 120
/// non_blocking = false
///
/// [backoff]
/// initial = 25
/// max = 1000
/// multiplier = 2
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long a writer waits for a name's lock.
    #[serde(with = "secs")]
    pub lock_timeout: Duration,
    /// Lifetime of a lock record; a crashed writer blocks others at most this long.
    #[serde(with = "secs")]
    pub lock_ttl: Duration,
    /// Fail immediately with `LockAcquisition` instead of waiting.
    pub non_blocking: bool,
    /// Backoff between lock attempts (milliseconds in TOML).
    pub backoff: Backoff,
    /// Parent directory for scratch payload directories; system temp if unset.
    pub scratch_dir: Option<PathBuf>,
    /// Compare the payload checksum recorded at save time on every load.
    pub verify_checksums: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_ttl: DEFAULT_LOCK_TTL,
            non_blocking: false,
            backoff: Backoff::default(),
            scratch_dir: None,
            verify_checksums: true,
        }
    }
}

impl RegistryConfig {
    pub fn non_blocking() -> Self {
        Self {
            non_blocking: true,
            ..Self::default()
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn lock_request(&self) -> LockRequest {
        let request = if self.non_blocking {
            LockRequest::non_blocking(self.lock_ttl)
        } else {
            LockRequest::blocking(self.lock_timeout, self.lock_ttl)
        };
        request.with_backoff(self.backoff.clone())
    }

    pub fn from_toml_str(s: &str) -> RegistryResult<Self> {
        toml::from_str(s).map_err(|e| RegistryError::Config(format!("invalid registry config: {e}")))
    }

    pub fn from_file(path: &Path) -> RegistryResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
