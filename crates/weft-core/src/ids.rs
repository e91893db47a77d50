//! Model-type and document identifier types.
//!
//! A [`ModelType`] names one indexable type registered by the host
//! application ("page", "image", ...). A [`DocumentId`] is the stable
//! identifier of one indexed object, derived from its model type and
//! primary key, and formats as `"{model_type}:{pk}"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of one indexable model type.
///
/// Normalized to lowercase on construction so lookups and physical index
/// names are consistent regardless of caller casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelType(String);

impl ModelType {
    /// Create a model type name.
    ///
    /// Names must be non-empty and contain only ASCII alphanumerics and
    /// underscores (they become parts of physical table and index names).
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref().trim().to_lowercase();
        if name.is_empty() {
            return Err(Error::invalid_query("model type name must not be empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::operation(format!(
                "model type name '{name}' contains characters outside [a-z0-9_]"
            )));
        }
        Ok(Self(name))
    }

    /// The normalized name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of one indexed object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId {
    /// The object's model type.
    pub model_type: ModelType,
    /// The object's primary key, rendered as a string.
    pub pk: String,
}

impl DocumentId {
    /// Create a document id from a model type and primary key.
    pub fn new(model_type: ModelType, pk: impl Into<String>) -> Self {
        Self {
            model_type,
            pk: pk.into(),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model_type, self.pk)
    }
}

impl FromStr for DocumentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (model_type, pk) = s
            .split_once(':')
            .ok_or_else(|| Error::operation(format!("malformed document id '{s}'")))?;
        if pk.is_empty() {
            return Err(Error::operation(format!("document id '{s}' has empty pk")));
        }
        Ok(Self {
            model_type: ModelType::new(model_type)?,
            pk: pk.to_string(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_type_normalizes_case() {
        let mt = ModelType::new("Page").unwrap();
        assert_eq!(mt.as_str(), "page");
    }

    #[test]
    fn test_model_type_rejects_empty() {
        assert!(ModelType::new("  ").is_err());
    }

    #[test]
    fn test_model_type_rejects_punctuation() {
        assert!(ModelType::new("my-page").is_err());
        assert!(ModelType::new("a.b").is_err());
    }

    #[test]
    fn test_document_id_display() {
        let id = DocumentId::new(ModelType::new("page").unwrap(), "42");
        assert_eq!(id.to_string(), "page:42");
    }

    #[test]
    fn test_document_id_parse_roundtrip() {
        let id: DocumentId = "page:42".parse().unwrap();
        assert_eq!(id.model_type.as_str(), "page");
        assert_eq!(id.pk, "42");
        assert_eq!(id.to_string(), "page:42");
    }

    #[test]
    fn test_document_id_parse_rejects_malformed() {
        assert!("page".parse::<DocumentId>().is_err());
        assert!("page:".parse::<DocumentId>().is_err());
    }

    #[test]
    fn test_document_id_pk_may_contain_colon() {
        // Only the first colon separates type from pk.
        let id: DocumentId = "page:a:b".parse().unwrap();
        assert_eq!(id.pk, "a:b");
    }

    #[test]
    fn test_document_id_serde_roundtrip() {
        let id = DocumentId::new(ModelType::new("image").unwrap(), "7");
        let json = serde_json::to_string(&id).unwrap();
        let restored: DocumentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, restored);
    }
}
