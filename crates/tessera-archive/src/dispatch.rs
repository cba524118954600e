//! Explicit type → archiver dispatch.
//!
//! A [`DispatchTable`] is an ordered list of bindings, each pairing one
//! [`TypeKey`] with the archiver responsible for it and the binding's
//! [`Specificity`]. Conflicts are detected when an archiver is registered,
//! never at call time.

use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::archiver::{Archiver, Specificity, TypeKey};
use crate::error::{ArchiveError, ArchiveResult};

/// One type bound to one archiver.
#[derive(Clone)]
pub struct Binding {
    pub key: TypeKey,
    pub specificity: Specificity,
    pub archiver: Arc<dyn Archiver>,
}

impl Binding {
    pub fn archiver_name(&self) -> &str {
        self.archiver.name()
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key)
            .field("specificity", &self.specificity)
            .field("archiver", &self.archiver.name())
            .finish()
    }
}

/// Ordered collection of bindings with most-specific-wins resolution.
#[derive(Clone, Debug, Default)]
pub struct DispatchTable {
    bindings: Vec<Binding>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind every associated type of `archiver`.
    ///
    /// Fails without modifying the table if any of its types is already
    /// bound at the same specificity, or if one of its tags is already used
    /// by a different type.
    pub fn register(&mut self, archiver: Arc<dyn Archiver>) -> ArchiveResult<()> {
        let specificity = archiver.specificity();
        let keys = archiver.associated_types();

        for (i, key) in keys.iter().enumerate() {
            if keys[..i].iter().any(|k| k.id() == key.id()) {
                return Err(ArchiveError::AmbiguousArchiver {
                    type_tag: key.tag().to_string(),
                    existing: archiver.name().to_string(),
                    candidate: archiver.name().to_string(),
                });
            }
            if let Some(existing) = self.bindings.iter().find(|b| {
                (b.key.id() == key.id() && b.specificity == specificity)
                    || (b.key.tag() == key.tag() && b.key.id() != key.id())
            }) {
                return Err(ArchiveError::AmbiguousArchiver {
                    type_tag: key.tag().to_string(),
                    existing: existing.archiver.name().to_string(),
                    candidate: archiver.name().to_string(),
                });
            }
        }

        self.bindings.extend(keys.into_iter().map(|key| Binding {
            key,
            specificity,
            archiver: Arc::clone(&archiver),
        }));
        Ok(())
    }

    /// Most specific binding for a runtime type.
    pub fn resolve(&self, id: TypeId) -> Option<&Binding> {
        self.bindings
            .iter()
            .filter(|b| b.key.id() == id)
            .max_by_key(|b| b.specificity)
    }

    /// Most specific binding whose key carries `tag`.
    pub fn resolve_tag(&self, tag: &str) -> Option<&Binding> {
        self.bindings
            .iter()
            .filter(|b| b.key.tag() == tag)
            .max_by_key(|b| b.specificity)
    }

    /// Binding able to read back data stored under `tag` as type `id`.
    pub fn resolve_stored(&self, id: TypeId, tag: &str) -> Option<&Binding> {
        self.bindings
            .iter()
            .filter(|b| b.key.id() == id && b.key.tag() == tag)
            .max_by_key(|b| b.specificity)
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Thread-safe [`DispatchTable`], shared by reference.
///
/// Used both for the process-wide defaults and for each backend's
/// override table.
#[derive(Default)]
pub struct MaterializerTable {
    table: RwLock<DispatchTable>,
}

impl MaterializerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, archiver: Arc<dyn Archiver>) -> ArchiveResult<()> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.register(archiver)
    }

    pub fn resolve(&self, id: TypeId) -> Option<Binding> {
        self.read().resolve(id).cloned()
    }

    pub fn resolve_tag(&self, tag: &str) -> Option<Binding> {
        self.read().resolve_tag(tag).cloned()
    }

    pub fn resolve_stored(&self, id: TypeId, tag: &str) -> Option<Binding> {
        self.read().resolve_stored(id, tag).cloned()
    }

    /// Snapshot of every binding, in registration order.
    pub fn bindings(&self) -> Vec<Binding> {
        self.read().bindings().to_vec()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DispatchTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MaterializerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializerTable")
            .field("binding_count", &self.len())
            .finish()
    }
}
