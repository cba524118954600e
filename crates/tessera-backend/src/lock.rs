//! Lock acquisition policy.
//!
//! Backends implement a single non-blocking attempt
//! ([`crate::Backend::try_acquire_lock`]); this module turns it into a
//! bounded, blocking acquisition with exponential backoff and jitter.

use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tessera_types::ObjectName;

use crate::error::{BackendError, BackendResult};

/// Default time a lock record stays valid without being refreshed.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Default time a blocking acquisition waits before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Shortest sleep between two acquisition attempts.
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Exponential backoff between acquisition attempts.
///
/// The nominal delay starts at `initial` and is multiplied by `multiplier`
/// after every failed attempt, capped at `max`. Each sleep is drawn
/// uniformly from `[delay / 2, delay]` and is never shorter than
/// [`MIN_BACKOFF`], even when `initial` or `max` is zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(with = "millis")]
    pub initial: Duration,
    #[serde(with = "millis")]
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(25),
            max: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl Backoff {
    /// Nominal delay following `current`.
    pub fn next(&self, current: Duration) -> Duration {
        current
            .checked_mul(self.multiplier.max(1))
            .unwrap_or(self.max)
            .min(self.max)
            .max(MIN_BACKOFF)
    }

    /// Randomized sleep for a nominal delay.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let nominal = (delay.as_millis().min(u128::from(u64::MAX)) as u64).max(1);
        let low = (nominal / 2).max(1);
        Duration::from_millis(rand::thread_rng().gen_range(low..=nominal))
    }
}

/// Parameters for one lock acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockRequest {
    /// `None` makes the acquisition non-blocking.
    pub timeout: Option<Duration>,
    /// Lifetime of the lock record once taken.
    pub ttl: Duration,
    pub backoff: Backoff,
}

impl LockRequest {
    /// Single attempt; contention yields `false`.
    pub fn non_blocking(ttl: Duration) -> Self {
        Self {
            timeout: None,
            ttl,
            backoff: Backoff::default(),
        }
    }

    /// Poll until `timeout`, then fail with [`BackendError::LockTimeout`].
    pub fn blocking(timeout: Duration, ttl: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ttl,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for LockRequest {
    fn default() -> Self {
        Self::blocking(DEFAULT_LOCK_TIMEOUT, DEFAULT_LOCK_TTL)
    }
}

/// Drive `attempt` according to `request`.
///
/// Returns `Ok(true)` once an attempt succeeds, `Ok(false)` if the request
/// is non-blocking and the first attempt fails, and
/// [`BackendError::LockTimeout`] when a blocking request runs out of time.
/// A final attempt is always made at the deadline.
pub fn poll_lock<F>(key: &ObjectName, request: &LockRequest, mut attempt: F) -> BackendResult<bool>
where
    F: FnMut() -> BackendResult<bool>,
{
    if attempt()? {
        return Ok(true);
    }
    let Some(timeout) = request.timeout else {
        return Ok(false);
    };

    let start = Instant::now();
    let deadline = start + timeout;
    let mut delay = request.backoff.initial.max(MIN_BACKOFF);
    let mut attempts = 1u32;

    loop {
        let now = Instant::now();
        if now >= deadline {
            tracing::debug!(key = %key, attempts, "lock wait timed out");
            return Err(BackendError::LockTimeout {
                key: key.to_string(),
                waited: now - start,
            });
        }
        thread::sleep(request.backoff.jittered(delay).min(deadline - now));
        attempts += 1;
        if attempt()? {
            tracing::trace!(key = %key, attempts, "lock acquired after waiting");
            return Ok(true);
        }
        delay = request.backoff.next(delay);
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn key() -> ObjectName {
        ObjectName::new("teams:lock").unwrap()
    }

    fn fast() -> Backoff {
        Backoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
            multiplier: 2,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let b = fast();
        assert_eq!(b.next(Duration::from_millis(1)), Duration::from_millis(2));
        assert_eq!(b.next(Duration::from_millis(4)), Duration::from_millis(5));
        assert_eq!(b.next(Duration::from_millis(5)), Duration::from_millis(5));
    }

    #[test]
    fn jitter_stays_in_range() {
        let b = Backoff::default();
        for _ in 0..100 {
            let d = b.jittered(Duration::from_millis(100));
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
        assert_eq!(b.jittered(Duration::ZERO), MIN_BACKOFF);
    }

    #[test]
    fn zero_backoff_still_sleeps() {
        let b: Backoff = serde_json::from_str(r#"{"initial": 0, "max": 0, "multiplier": 0}"#).unwrap();
        assert_eq!(b.next(b.initial), MIN_BACKOFF);
        assert!(b.jittered(b.initial) >= MIN_BACKOFF);

        let calls = Cell::new(0u32);
        let req = LockRequest::blocking(Duration::from_millis(20), DEFAULT_LOCK_TTL).with_backoff(b);
        let err = poll_lock(&key(), &req, || {
            calls.set(calls.get() + 1);
            Ok(false)
        })
        .unwrap_err();
        assert!(matches!(err, BackendError::LockTimeout { .. }));
        assert!(calls.get() <= 25, "{} attempts in 20ms", calls.get());
    }

    #[test]
    fn immediate_success() {
        let req = LockRequest::non_blocking(DEFAULT_LOCK_TTL);
        assert!(poll_lock(&key(), &req, || Ok(true)).unwrap());
    }

    #[test]
    fn non_blocking_contention_returns_false() {
        let calls = Cell::new(0);
        let req = LockRequest::non_blocking(DEFAULT_LOCK_TTL);
        let got = poll_lock(&key(), &req, || {
            calls.set(calls.get() + 1);
            Ok(false)
        })
        .unwrap();
        assert!(!got);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn blocking_succeeds_after_retries() {
        let calls = Cell::new(0);
        let req = LockRequest::blocking(Duration::from_secs(5), DEFAULT_LOCK_TTL).with_backoff(fast());
        let got = poll_lock(&key(), &req, || {
            calls.set(calls.get() + 1);
            Ok(calls.get() >= 4)
        })
        .unwrap();
        assert!(got);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn blocking_times_out() {
        let req = LockRequest::blocking(Duration::from_millis(30), DEFAULT_LOCK_TTL).with_backoff(fast());
        let start = Instant::now();
        let err = poll_lock(&key(), &req, || Ok(false)).unwrap_err();
        assert!(matches!(err, BackendError::LockTimeout { .. }));
        assert!(err.is_retryable());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn attempt_errors_propagate() {
        let req = LockRequest::default();
        let err = poll_lock(&key(), &req, || {
            Err(BackendError::Io(std::io::Error::other("disk gone")))
        })
        .unwrap_err();
        assert!(matches!(err, BackendError::Io(_)));
    }

    #[test]
    fn backoff_serializes_as_millis() {
        let json = serde_json::to_value(Backoff::default()).unwrap();
        assert_eq!(json["initial"], 25);
        assert_eq!(json["max"], 1000);
    }
}
