//! Object name validation and storage-key encoding.
//!
//! Valid object names:
//! - Must be non-empty
//! - Are one or more segments joined by `:` (e.g. `teams:vision:detector`)
//! - Each segment is non-empty and contains only ASCII letters, digits, or `-`
//! - Must not contain `_`, which is reserved for the storage encoding of `:`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TypesError};

/// Separator between namespace segments.
pub const SEGMENT_SEPARATOR: char = ':';

/// Character used in place of [`SEGMENT_SEPARATOR`] inside storage keys.
pub const ENCODED_SEPARATOR: char = '_';

/// Validate an object name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use tessera_types::name::validate_object_name;
///
/// assert!(validate_object_name("teams:vision:detector").is_ok());
/// assert!(validate_object_name("model-v2").is_ok());
/// assert!(validate_object_name("bad_name").is_err());
/// assert!(validate_object_name("trailing:").is_err());
/// ```
pub fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(name, "object name must not be empty"));
    }

    if name.contains(ENCODED_SEPARATOR) {
        return Err(invalid(
            name,
            "must not contain '_' (reserved for storage encoding)",
        ));
    }

    for segment in name.split(SEGMENT_SEPARATOR) {
        if segment.is_empty() {
            return Err(invalid(name, "namespace segments must not be empty"));
        }
        if let Some(ch) = segment
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        {
            return Err(invalid(name, &format!("contains forbidden character: {ch:?}")));
        }
    }

    Ok(())
}

fn invalid(name: &str, reason: &str) -> TypesError {
    TypesError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// A validated, colon-namespaced object name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectName(String);

impl ObjectName {
    /// Parse and validate a name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_object_name(&name)?;
        Ok(Self(name))
    }

    /// The name as written by the caller.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Flat storage-key form: `teams:vision` becomes `teams_vision`.
    pub fn encoded(&self) -> String {
        self.0.replace(SEGMENT_SEPARATOR, &ENCODED_SEPARATOR.to_string())
    }

    /// Inverse of [`ObjectName::encoded`].
    pub fn decode(encoded: &str) -> Result<Self> {
        Self::new(encoded.replace(ENCODED_SEPARATOR, &SEGMENT_SEPARATOR.to_string()))
    }

    /// Namespace segments, outermost first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEGMENT_SEPARATOR)
    }

    /// The enclosing namespace, if any (`teams:vision` for `teams:vision:detector`).
    pub fn namespace(&self) -> Option<&str> {
        self.0.rsplit_once(SEGMENT_SEPARATOR).map(|(ns, _)| ns)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectName({})", self.0)
    }
}

impl FromStr for ObjectName {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ObjectName {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ObjectName> for String {
    fn from(name: ObjectName) -> Self {
        name.0
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn valid_names() {
        assert!(validate_object_name("model").is_ok());
        assert!(validate_object_name("teams:test").is_ok());
        assert!(validate_object_name("teams:vision:detector").is_ok());
        assert!(validate_object_name("resnet-50:v2").is_ok());
        assert!(validate_object_name("A1:b2:C3").is_ok());
    }

    #[test]
    fn reject_empty() {
        assert!(validate_object_name("").is_err());
    }

    #[test]
    fn reject_underscore() {
        let err = validate_object_name("teams_vision").unwrap_err();
        assert!(matches!(err, TypesError::InvalidName { .. }));
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn reject_empty_segments() {
        assert!(validate_object_name(":leading").is_err());
        assert!(validate_object_name("trailing:").is_err());
        assert!(validate_object_name("a::b").is_err());
    }

    #[test]
    fn reject_forbidden_chars() {
        assert!(validate_object_name("a/b").is_err());
        assert!(validate_object_name("a b").is_err());
        assert!(validate_object_name("a.b").is_err());
        assert!(validate_object_name("caf\u{e9}").is_err());
    }

    #[test]
    fn encode_and_decode() {
        let name = ObjectName::new("teams:vision:detector").unwrap();
        assert_eq!(name.encoded(), "teams_vision_detector");
        assert_eq!(ObjectName::decode("teams_vision_detector").unwrap(), name);
    }

    #[test]
    fn namespace_and_segments() {
        let name = ObjectName::new("teams:vision:detector").unwrap();
        assert_eq!(name.namespace(), Some("teams:vision"));
        assert_eq!(name.segments().collect::<Vec<_>>(), ["teams", "vision", "detector"]);
        assert_eq!(ObjectName::new("flat").unwrap().namespace(), None);
    }

    #[test]
    fn serde_rejects_invalid() {
        let ok: ObjectName = serde_json::from_str("\"teams:test\"").unwrap();
        assert_eq!(ok.as_str(), "teams:test");
        assert!(serde_json::from_str::<ObjectName>("\"bad_name\"").is_err());
    }

    proptest! {
        #[test]
        fn generated_names_roundtrip_through_encoding(
            segments in proptest::collection::vec("[A-Za-z0-9-]{1,8}", 1..5)
        ) {
            let raw = segments.join(":");
            let name = ObjectName::new(raw.clone()).unwrap();
            let decoded = ObjectName::decode(&name.encoded()).unwrap();
            prop_assert_eq!(decoded.as_str(), raw.as_str());
        }

        #[test]
        fn any_underscore_is_rejected(prefix in "[a-z]{0,6}", suffix in "[a-z]{0,6}") {
            let raw = format!("{prefix}_{suffix}");
            prop_assert!(validate_object_name(&raw).is_err());
        }
    }
}
