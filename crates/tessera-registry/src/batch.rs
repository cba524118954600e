//! Aggregated outcome of multi-item registry operations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, RegistryError, RegistryResult};

/// Label used for saves whose version is assigned by the registry.
pub const NEXT_VERSION_LABEL: &str = "next";

/// `(name, version)` as requested by the caller.
///
/// `version` is the requested version, `latest`, `all`, or
/// [`NEXT_VERSION_LABEL`]; successful saves record the assigned version.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub name: String,
    pub version: String,
}

impl ObjectRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Serializable summary of one failed item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&RegistryError> for BatchError {
    fn from(e: &RegistryError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}

/// Per-item results of a batch, in input order.
///
/// `results[i]` is `None` exactly when item `i` failed. When two failed
/// items share an [`ObjectRef`], `errors` keeps the later error while
/// `failed` lists both.
#[derive(Debug)]
pub struct BatchResult<T> {
    pub results: Vec<Option<T>>,
    pub errors: BTreeMap<ObjectRef, BatchError>,
    pub succeeded: Vec<ObjectRef>,
    pub failed: Vec<ObjectRef>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            errors: BTreeMap::new(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, item: ObjectRef, value: T) {
        self.results.push(Some(value));
        self.succeeded.push(item);
    }

    pub fn record_failure(&mut self, item: ObjectRef, error: &RegistryError) {
        tracing::debug!(item = %item, error = %error, "batch item failed");
        self.results.push(None);
        self.errors.insert(item.clone(), BatchError::from(error));
        self.failed.push(item);
    }

    /// Record `outcome` under `item`.
    pub fn record(&mut self, item: ObjectRef, outcome: RegistryResult<T>) {
        match outcome {
            Ok(value) => self.record_success(item, value),
            Err(e) => self.record_failure(item, &e),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn error(&self, item: &ObjectRef) -> Option<&BatchError> {
        self.errors.get(item)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_order() {
        let mut batch = BatchResult::new();
        batch.record(ObjectRef::new("a", "1"), Ok(10));
        batch.record(
            ObjectRef::new("b", "latest"),
            Err(RegistryError::ObjectNotFound {
                name: "b".into(),
                version: "latest".into(),
            }),
        );
        batch.record(ObjectRef::new("c", NEXT_VERSION_LABEL), Ok(30));

        assert_eq!(batch.results, vec![Some(10), None, Some(30)]);
        assert_eq!(batch.success_count(), 2);
        assert_eq!(batch.failure_count(), 1);
        assert!(!batch.all_succeeded());

        let err = batch.error(&ObjectRef::new("b", "latest")).unwrap();
        assert_eq!(err.kind, ErrorKind::ObjectNotFound);
        assert!(!err.retryable);
    }

    #[test]
    fn duplicate_failures_are_all_listed() {
        let mut batch: BatchResult<()> = BatchResult::new();
        let item = ObjectRef::new("a", "1");
        batch.record_failure(
            item.clone(),
            &RegistryError::VersionConflict {
                name: "a".into(),
                version: "1".into(),
            },
        );
        batch.record_failure(
            item.clone(),
            &RegistryError::LockAcquisition {
                name: "a".into(),
                holder: None,
            },
        );
        assert_eq!(batch.failure_count(), 2);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.error(&item).unwrap().kind, ErrorKind::LockAcquisition);
    }

    #[test]
    fn empty_batch_succeeds() {
        let batch: BatchResult<u8> = BatchResult::default();
        assert!(batch.all_succeeded());
        assert!(batch.is_empty());
    }

    #[test]
    fn error_summary_serializes() {
        let e = BatchError::from(&RegistryError::Config("no archiver".into()));
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "config");
        assert_eq!(json["retryable"], false);
    }
}
