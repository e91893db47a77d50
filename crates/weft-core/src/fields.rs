//! Declarative searchable-field specifications.
//!
//! The host application declares, per indexable type, which fields are
//! searchable and how: semantic type, indexing mode, and an optional boost
//! weight. Specifications are registered once at startup in a
//! [`SpecRegistry`] and are immutable afterwards; backends derive their
//! physical schemas from them and query validation checks against them.
//!
//! # Example
//!
//! ```
//! use weft_core::{FieldSpec, ModelType, SearchableField, SpecRegistry};
//!
//! let spec = FieldSpec::builder(ModelType::new("page").unwrap())
//!     .field(SearchableField::text("title").with_boost(2.0))
//!     .field(SearchableField::text("body"))
//!     .field(SearchableField::keyword("title_exact"))
//!     .field(SearchableField::date("published_at"))
//!     .field(SearchableField::autocomplete("title_auto"))
//!     .build()
//!     .unwrap();
//!
//! let registry = SpecRegistry::new();
//! registry.register(spec).unwrap();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::ModelType;

/// Validated field name.
///
/// Field names become physical column names in the embedded backend and
/// mapping keys in the remote backend, so they are restricted to
/// `[a-z][a-z0-9_]*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldName(String);

impl FieldName {
    /// Create a validated field name.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        let mut chars = name.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(Error::operation(format!(
                "field name '{name}' must match [a-z][a-z0-9_]*"
            )));
        }
        Ok(Self(name.to_string()))
    }

    /// The field name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Semantic type of a searchable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text, tokenized by the backend.
    Text,
    /// Opaque keyword, matched exactly.
    Keyword,
    /// Numeric value, comparable in range filters.
    Numeric,
    /// ISO-8601 date, comparable in range filters.
    Date,
}

/// How a field is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Tokenized full-text index; participates in relevance scoring.
    FullText,
    /// Exact storage for filtering and ordering; no tokenization.
    Exact,
    /// Prefix-matchable index for autocomplete.
    Autocomplete,
}

/// One declared searchable field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchableField {
    /// Field name.
    pub name: FieldName,
    /// Semantic type.
    pub kind: FieldKind,
    /// Indexing mode.
    pub mode: IndexMode,
    /// Relevance boost weight; only meaningful for full-text fields.
    pub boost: Option<f32>,
}

impl SearchableField {
    /// A full-text field.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a valid field name; specifications are
    /// static startup configuration, so a bad name is a programming error.
    pub fn text(name: &str) -> Self {
        Self {
            name: FieldName::new(name).unwrap_or_else(|e| panic!("{e}")),
            kind: FieldKind::Text,
            mode: IndexMode::FullText,
            boost: None,
        }
    }

    /// An exact-match keyword field, usable in filters.
    pub fn keyword(name: &str) -> Self {
        Self {
            name: FieldName::new(name).unwrap_or_else(|e| panic!("{e}")),
            kind: FieldKind::Keyword,
            mode: IndexMode::Exact,
            boost: None,
        }
    }

    /// A numeric field, usable in range filters.
    pub fn numeric(name: &str) -> Self {
        Self {
            name: FieldName::new(name).unwrap_or_else(|e| panic!("{e}")),
            kind: FieldKind::Numeric,
            mode: IndexMode::Exact,
            boost: None,
        }
    }

    /// A date field, usable in range filters.
    pub fn date(name: &str) -> Self {
        Self {
            name: FieldName::new(name).unwrap_or_else(|e| panic!("{e}")),
            kind: FieldKind::Date,
            mode: IndexMode::Exact,
            boost: None,
        }
    }

    /// A text field indexed for prefix matching (autocomplete).
    pub fn autocomplete(name: &str) -> Self {
        Self {
            name: FieldName::new(name).unwrap_or_else(|e| panic!("{e}")),
            kind: FieldKind::Text,
            mode: IndexMode::Autocomplete,
            boost: None,
        }
    }

    /// Set the boost weight.
    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = Some(boost);
        self
    }

    /// Effective boost weight (declared weight or 1.0).
    pub fn effective_boost(&self) -> f32 {
        self.boost.unwrap_or(1.0)
    }
}

/// Immutable field specification for one model type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// The model type this specification describes.
    pub model_type: ModelType,
    fields: Vec<SearchableField>,
}

impl FieldSpec {
    /// Start building a specification.
    pub fn builder(model_type: ModelType) -> FieldSpecBuilder {
        FieldSpecBuilder {
            model_type,
            fields: Vec::new(),
        }
    }

    /// All declared fields, in declaration order.
    pub fn fields(&self) -> &[SearchableField] {
        &self.fields
    }

    /// Look up one field by name.
    pub fn field(&self, name: &FieldName) -> Option<&SearchableField> {
        self.fields.iter().find(|f| &f.name == name)
    }

    /// Full-text fields (searchable, scored), in declaration order.
    pub fn full_text_fields(&self) -> impl Iterator<Item = &SearchableField> {
        self.fields
            .iter()
            .filter(|f| matches!(f.mode, IndexMode::FullText | IndexMode::Autocomplete))
    }

    /// Exact-mode fields, usable for filtering and ordering.
    pub fn filter_fields(&self) -> impl Iterator<Item = &SearchableField> {
        self.fields.iter().filter(|f| f.mode == IndexMode::Exact)
    }

    /// The designated autocomplete field, if any.
    pub fn autocomplete_field(&self) -> Option<&SearchableField> {
        self.fields.iter().find(|f| f.mode == IndexMode::Autocomplete)
    }
}

/// Builder for [`FieldSpec`].
#[derive(Debug)]
pub struct FieldSpecBuilder {
    model_type: ModelType,
    fields: Vec<SearchableField>,
}

impl FieldSpecBuilder {
    /// Add a field.
    pub fn field(mut self, field: SearchableField) -> Self {
        self.fields.push(field);
        self
    }

    /// Finish the specification.
    ///
    /// Fails if no fields were declared, a name is duplicated, or a boost
    /// weight is not a positive finite number.
    pub fn build(self) -> Result<FieldSpec> {
        if self.fields.is_empty() {
            return Err(Error::operation(format!(
                "field spec for '{}' declares no fields",
                self.model_type
            )));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::operation(format!(
                    "field '{}' declared twice for '{}'",
                    field.name, self.model_type
                )));
            }
            if let Some(boost) = field.boost {
                if !(boost.is_finite() && boost > 0.0) {
                    return Err(Error::operation(format!(
                        "field '{}' has non-positive boost {boost}",
                        field.name
                    )));
                }
            }
        }
        Ok(FieldSpec {
            model_type: self.model_type,
            fields: self.fields,
        })
    }
}

/// Startup registry of field specifications, keyed by model type.
///
/// Registration happens once at startup; specifications are immutable once
/// registered (re-registering a type is an error, matching the contract
/// that a declared specification never changes under a live index).
#[derive(Debug, Default)]
pub struct SpecRegistry {
    inner: RwLock<HashMap<ModelType, Arc<FieldSpec>>>,
}

impl SpecRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a specification.
    pub fn register(&self, spec: FieldSpec) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.contains_key(&spec.model_type) {
            return Err(Error::operation(format!(
                "field spec for '{}' is already registered",
                spec.model_type
            )));
        }
        inner.insert(spec.model_type.clone(), Arc::new(spec));
        Ok(())
    }

    /// Fetch the specification for a model type.
    pub fn get(&self, model_type: &ModelType) -> Result<Arc<FieldSpec>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(model_type)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("field spec for '{model_type}'")))
    }

    /// All registered model types.
    pub fn model_types(&self) -> Vec<ModelType> {
        let mut types: Vec<_> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn page_spec() -> FieldSpec {
        FieldSpec::builder(ModelType::new("page").unwrap())
            .field(SearchableField::text("title").with_boost(2.0))
            .field(SearchableField::text("body"))
            .field(SearchableField::keyword("title_exact"))
            .field(SearchableField::numeric("views"))
            .field(SearchableField::date("published_at"))
            .field(SearchableField::autocomplete("title_auto"))
            .build()
            .unwrap()
    }

    // ------------------------------------------------------------------------
    // FieldName tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_field_name_valid() {
        assert!(FieldName::new("title").is_ok());
        assert!(FieldName::new("title_exact2").is_ok());
    }

    #[test]
    fn test_field_name_invalid() {
        assert!(FieldName::new("Title").is_err());
        assert!(FieldName::new("2title").is_err());
        assert!(FieldName::new("ti-tle").is_err());
        assert!(FieldName::new("").is_err());
    }

    // ------------------------------------------------------------------------
    // FieldSpec tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_spec_accessors() {
        let spec = page_spec();
        assert_eq!(spec.fields().len(), 6);
        assert_eq!(spec.full_text_fields().count(), 3); // title, body, title_auto
        assert_eq!(spec.filter_fields().count(), 3);
        assert_eq!(
            spec.autocomplete_field().unwrap().name.as_str(),
            "title_auto"
        );
    }

    #[test]
    fn test_spec_field_lookup() {
        let spec = page_spec();
        let title = spec.field(&FieldName::new("title").unwrap()).unwrap();
        assert_eq!(title.effective_boost(), 2.0);
        assert!(spec.field(&FieldName::new("missing").unwrap()).is_none());
    }

    #[test]
    fn test_spec_rejects_duplicate_field() {
        let result = FieldSpec::builder(ModelType::new("page").unwrap())
            .field(SearchableField::text("title"))
            .field(SearchableField::keyword("title"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_spec_rejects_bad_boost() {
        let result = FieldSpec::builder(ModelType::new("page").unwrap())
            .field(SearchableField::text("title").with_boost(0.0))
            .build();
        assert!(result.is_err());

        let result = FieldSpec::builder(ModelType::new("page").unwrap())
            .field(SearchableField::text("title").with_boost(-1.5))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_spec_rejects_empty() {
        assert!(FieldSpec::builder(ModelType::new("page").unwrap())
            .build()
            .is_err());
    }

    // ------------------------------------------------------------------------
    // SpecRegistry tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_registry_register_and_get() {
        let registry = SpecRegistry::new();
        registry.register(page_spec()).unwrap();

        let spec = registry.get(&ModelType::new("page").unwrap()).unwrap();
        assert_eq!(spec.fields().len(), 6);
    }

    #[test]
    fn test_registry_rejects_reregistration() {
        let registry = SpecRegistry::new();
        registry.register(page_spec()).unwrap();
        assert!(registry.register(page_spec()).is_err());
    }

    #[test]
    fn test_registry_unknown_type() {
        let registry = SpecRegistry::new();
        let err = registry
            .get(&ModelType::new("image").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_registry_model_types_sorted() {
        let registry = SpecRegistry::new();
        registry.register(page_spec()).unwrap();
        registry
            .register(
                FieldSpec::builder(ModelType::new("image").unwrap())
                    .field(SearchableField::text("title"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let types: Vec<_> = registry
            .model_types()
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        assert_eq!(types, vec!["image", "page"]);
    }
}
