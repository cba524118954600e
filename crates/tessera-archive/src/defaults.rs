//! Process-wide default archivers.
//!
//! The defaults table starts empty. [`init`] installs the built-ins exactly
//! once; nothing is registered as a side effect of linking the crate.
//! Backend-scoped override tables take precedence over these defaults and
//! never modify them.

use std::any::TypeId;
use std::sync::{Arc, Once, OnceLock};

use crate::archiver::Archiver;
use crate::builtin::builtins;
use crate::dispatch::{Binding, MaterializerTable};
use crate::error::ArchiveResult;

static DEFAULTS: OnceLock<MaterializerTable> = OnceLock::new();
static INIT: Once = Once::new();

/// The process-wide table.
pub fn table() -> &'static MaterializerTable {
    DEFAULTS.get_or_init(MaterializerTable::new)
}

/// Install the built-in archivers. Safe to call repeatedly.
pub fn init() {
    INIT.call_once(|| {
        for archiver in builtins() {
            let name = archiver.name().to_string();
            if let Err(e) = table().register(archiver) {
                tracing::warn!(archiver = %name, error = %e, "skipping built-in archiver");
            }
        }
        tracing::debug!(bindings = table().len(), "default archivers installed");
    });
}

/// Register an additional process-wide archiver.
pub fn register(archiver: Arc<dyn Archiver>) -> ArchiveResult<()> {
    table().register(archiver)
}

pub fn resolve(id: TypeId) -> Option<Binding> {
    table().resolve(id)
}

pub fn resolve_tag(tag: &str) -> Option<Binding> {
    table().resolve_tag(tag)
}

pub fn resolve_stored(id: TypeId, tag: &str) -> Option<Binding> {
    table().resolve_stored(id, tag)
}
