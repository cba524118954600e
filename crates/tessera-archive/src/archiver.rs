use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use crate::error::{ArchiveError, ArchiveResult};

/// Runtime identity of an archivable type plus the tag recorded in metadata.
///
/// The [`TypeId`] drives dispatch on save; the tag is what survives in the
/// stored metadata and drives dispatch on untyped loads.
#[derive(Clone)]
pub struct TypeKey {
    id: TypeId,
    tag: Cow<'static, str>,
}

impl TypeKey {
    /// Key tagged with the compiler's type name.
    ///
    /// Type names are not guaranteed stable across compiler releases; use
    /// [`TypeKey::tagged`] for anything that is persisted long-term.
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            tag: Cow::Borrowed(std::any::type_name::<T>()),
        }
    }

    /// Key with an explicit, stable tag.
    pub fn tagged<T: Any>(tag: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id: TypeId::of::<T>(),
            tag: tag.into(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.tag == other.tag
    }
}

impl Eq for TypeKey {}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.tag)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

/// How specific a binding is. When several archivers can handle a type, the
/// most specific one wins; two equally specific bindings are rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Specificity {
    /// Catch-all handling, such as the built-in defaults.
    Generic,
    /// Specialized handling for a particular object family.
    Exact,
}

impl fmt::Display for Specificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Exact => write!(f, "exact"),
        }
    }
}

/// Type-specific strategy turning an in-memory value into a directory of
/// files and back.
///
/// Archivers are stateless with respect to the registry: `save` writes only
/// under `workdir` and `load` reads only from it.
pub trait Archiver: Send + Sync {
    /// Short identifier recorded in metadata (e.g. `"json"`).
    fn name(&self) -> &str;

    /// Types this archiver can save and load.
    fn associated_types(&self) -> Vec<TypeKey>;

    /// Specificity of every binding this archiver contributes.
    fn specificity(&self) -> Specificity {
        Specificity::Exact
    }

    /// Write `obj` into `workdir`.
    fn save(&self, obj: &dyn Any, workdir: &Path) -> ArchiveResult<()>;

    /// Reconstruct a value of type `expected` from `workdir`.
    fn load(&self, workdir: &Path, expected: &TypeKey) -> ArchiveResult<Box<dyn Any + Send + Sync>>;
}

impl fmt::Debug for dyn Archiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archiver")
            .field("name", &self.name())
            .field("specificity", &self.specificity())
            .finish()
    }
}

/// Borrow `obj` as `T`, or report which archiver could not handle it.
pub fn downcast_ref<'a, T: Any>(obj: &'a dyn Any, archiver: &str) -> ArchiveResult<&'a T> {
    obj.downcast_ref::<T>()
        .ok_or_else(|| ArchiveError::UnsupportedType {
            archiver: archiver.to_string(),
            actual: format!("{:?}", obj.type_id()),
        })
}

/// Fail unless `expected` is `T`.
pub fn expect_type<T: Any>(expected: &TypeKey, archiver: &str) -> ArchiveResult<()> {
    if expected.is::<T>() {
        Ok(())
    } else {
        Err(ArchiveError::UnsupportedType {
            archiver: archiver.to_string(),
            actual: expected.tag().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_key_identity() {
        let a = TypeKey::of::<u32>();
        let b = TypeKey::of::<u32>();
        assert_eq!(a, b);
        assert!(a.is::<u32>());
        assert!(!a.is::<u64>());
        assert_eq!(a.tag(), "u32");
    }

    #[test]
    fn tagged_keys_differ_by_tag() {
        let a = TypeKey::tagged::<String>("string");
        let b = TypeKey::tagged::<String>("text");
        assert_eq!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn specificity_order() {
        assert!(Specificity::Generic < Specificity::Exact);
    }

    #[test]
    fn downcast_helpers() {
        let value: u8 = 7;
        assert_eq!(*downcast_ref::<u8>(&value, "t").unwrap(), 7);
        let err = downcast_ref::<u16>(&value, "t").unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedType { .. }));

        assert!(expect_type::<u8>(&TypeKey::of::<u8>(), "t").is_ok());
        assert!(expect_type::<u8>(&TypeKey::of::<i8>(), "t").is_err());
    }
}
