//! Indexed document representation.
//!
//! A [`Document`] is the flat, typed field set extracted from one host
//! object by the [`mapper`](crate::mapper). Documents are immutable value
//! objects: once built they are safely shareable across concurrent callers
//! without locking.
//!
//! # Multi-valued fields
//!
//! Multi-valued text fields are joined with [`MULTI_VALUE_SEPARATOR`], a
//! dedicated boundary marker, before they reach a backend that stores one
//! flat string per field. A plain space would let a phrase query match
//! across two adjacent list elements; the marker token prevents that.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use weft_core::{DocumentId, FieldName};

/// Boundary marker joining elements of a multi-valued field.
///
/// U+241F (symbol for unit separator) never appears in natural text and is
/// treated as a token boundary by both backends' tokenizers.
pub const MULTI_VALUE_SEPARATOR: char = '\u{241F}';

/// One extracted field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    /// Free text.
    Text(String),
    /// Exact keyword.
    Keyword(String),
    /// Numeric value.
    Number(f64),
    /// ISO-8601 date string.
    Date(String),
    /// Multiple values for one field.
    Multi(Vec<FieldValue>),
}

impl FieldValue {
    /// Flatten this value to the single string a flat-field backend stores.
    ///
    /// Multi values join with the boundary marker; numbers render in their
    /// shortest round-trippable form.
    pub fn flatten(&self) -> String {
        match self {
            Self::Text(s) | Self::Keyword(s) | Self::Date(s) => s.clone(),
            Self::Number(n) => format_number(*n),
            Self::Multi(values) => {
                let parts: Vec<String> = values.iter().map(FieldValue::flatten).collect();
                parts.join(&format!(" {MULTI_VALUE_SEPARATOR} "))
            }
        }
    }

    /// The numeric value, if this is (or flattens to) a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Normalize text for backends that require pre-normalized input:
/// case-fold and collapse runs of whitespace to single spaces.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A flat, typed document ready for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier derived from the source object's type and pk.
    pub id: DocumentId,
    /// Field values keyed by declared field name.
    pub values: BTreeMap<FieldName, FieldValue>,
}

impl Document {
    /// Create a document with no values yet.
    pub fn new(id: DocumentId) -> Self {
        Self {
            id,
            values: BTreeMap::new(),
        }
    }

    /// Set one field value.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a valid field name; callers assembling
    /// documents by hand use the same static names they declared in the
    /// field specification.
    pub fn with_value(mut self, name: &str, value: FieldValue) -> Self {
        let name = FieldName::new(name).unwrap_or_else(|e| panic!("{e}"));
        self.values.insert(name, value);
        self
    }

    /// Get one field value.
    pub fn value(&self, name: &FieldName) -> Option<&FieldValue> {
        self.values.get(name)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::ModelType;

    fn id() -> DocumentId {
        DocumentId::new(ModelType::new("page").unwrap(), "1")
    }

    #[test]
    fn test_flatten_scalars() {
        assert_eq!(FieldValue::Text("Red Fox".into()).flatten(), "Red Fox");
        assert_eq!(FieldValue::Number(42.0).flatten(), "42");
        assert_eq!(FieldValue::Number(1.5).flatten(), "1.5");
        assert_eq!(FieldValue::Date("2024-01-01".into()).flatten(), "2024-01-01");
    }

    #[test]
    fn test_flatten_multi_uses_boundary_marker() {
        let value = FieldValue::Multi(vec![
            FieldValue::Text("quick".into()),
            FieldValue::Text("fox".into()),
        ]);
        let flat = value.flatten();
        assert!(flat.contains(MULTI_VALUE_SEPARATOR));
        // A phrase spanning the join must not reconstruct "quick fox".
        assert!(!flat.contains("quick fox"));
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Quick\t Brown\nFOX "), "quick brown fox");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_document_values() {
        let title = FieldName::new("title").unwrap();
        let doc = Document::new(id()).with_value("title", FieldValue::Text("red fox".into()));
        assert_eq!(
            doc.value(&title),
            Some(&FieldValue::Text("red fox".into()))
        );
        assert!(doc.value(&FieldName::new("body").unwrap()).is_none());
    }

    #[test]
    fn test_document_serde_roundtrip() {
        let doc = Document::new(id())
            .with_value("title", FieldValue::Text("x".into()))
            .with_value("views", FieldValue::Number(7.0));
        let json = serde_json::to_string(&doc).unwrap();
        let restored: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, restored);
    }
}
