//! Document mapping.
//!
//! The [`DocumentMapper`] turns one host object into a [`Document`] using
//! the object's registered field specification. The host application
//! supplies extraction through the [`Indexable`] trait; the mapper owns
//! type checking and backend-dependent normalization.
//!
//! Mapping failures are per-object: a bad accessor or a type-mismatched
//! value produces [`weft_core::Error::Mapping`] for that object only and
//! never aborts a batch (callers skip and log).

use std::sync::Arc;

use weft_core::{DocumentId, Error, FieldKind, FieldSpec, Result, SearchableField};

use crate::document::{Document, FieldValue, normalize_text};

/// Host-application object that can be indexed.
///
/// Implementations expose a stable primary key and per-field value
/// extraction. Returning `Ok(None)` for a field leaves it out of the
/// document; returning `Err` fails the mapping of this object with the
/// given reason.
pub trait Indexable: Send + Sync {
    /// The object's primary key, rendered as a string.
    fn pk(&self) -> String;

    /// Extract the value for one declared field.
    fn field_value(
        &self,
        field: &SearchableField,
    ) -> std::result::Result<Option<FieldValue>, String>;
}

/// Maps host objects to flat documents under one field specification.
#[derive(Clone)]
pub struct DocumentMapper {
    spec: Arc<FieldSpec>,
}

impl DocumentMapper {
    /// Create a mapper for one model type's specification.
    pub fn new(spec: Arc<FieldSpec>) -> Self {
        Self { spec }
    }

    /// The specification this mapper works from.
    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    /// Map one object to a document.
    ///
    /// `normalize` is set when the target backend requires pre-normalized
    /// text (the embedded relational backend does; the remote engine
    /// normalizes server-side). Normalization touches text values only.
    pub fn map(&self, obj: &dyn Indexable, normalize: bool) -> Result<Document> {
        let id = DocumentId::new(self.spec.model_type.clone(), obj.pk());
        let mut doc = Document::new(id.clone());

        for field in self.spec.fields() {
            let value = obj
                .field_value(field)
                .map_err(|reason| Error::mapping(id.to_string(), reason))?;
            let Some(value) = value else { continue };

            check_kind(&id, field, &value)?;
            let value = if normalize {
                normalize_value(field.kind, value)
            } else {
                value
            };
            doc.values.insert(field.name.clone(), value);
        }

        Ok(doc)
    }
}

fn check_kind(id: &DocumentId, field: &SearchableField, value: &FieldValue) -> Result<()> {
    let ok = match value {
        FieldValue::Multi(members) => members
            .iter()
            .all(|member| scalar_matches(field.kind, member)),
        scalar => scalar_matches(field.kind, scalar),
    };
    if !ok {
        return Err(Error::mapping(
            id.to_string(),
            format!(
                "field '{}' expects {:?}, accessor returned {value:?}",
                field.name, field.kind
            ),
        ));
    }
    Ok(())
}

fn scalar_matches(kind: FieldKind, value: &FieldValue) -> bool {
    matches!(
        (kind, value),
        (FieldKind::Text, FieldValue::Text(_))
            | (FieldKind::Keyword, FieldValue::Keyword(_))
            | (FieldKind::Numeric, FieldValue::Number(_))
            | (FieldKind::Date, FieldValue::Date(_))
    )
}

fn normalize_value(kind: FieldKind, value: FieldValue) -> FieldValue {
    if kind != FieldKind::Text {
        return value;
    }
    match value {
        FieldValue::Text(s) => FieldValue::Text(normalize_text(&s)),
        FieldValue::Multi(members) => FieldValue::Multi(
            members
                .into_iter()
                .map(|member| normalize_value(kind, member))
                .collect(),
        ),
        other => other,
    }
}

// ============================================================================
// Tests
// ============================================================================
