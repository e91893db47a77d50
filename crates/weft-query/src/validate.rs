//! Structural validation of query trees against a field specification.
//!
//! Validation runs before compilation and fails with
//! [`Error::InvalidQuery`] on caller bugs: non-positive boost weights,
//! under-populated boolean nodes, filters on unfilterable or undeclared
//! fields, and filter values whose type does not match the declared
//! field's semantic type.

use weft_core::{Error, FieldKind, FieldName, FieldSpec, IndexMode, Result};

use crate::node::{FilterOperator, FilterValue, QueryNode};

/// Validate a query tree against a model type's field specification.
pub fn validate(query: &QueryNode, spec: &FieldSpec) -> Result<()> {
    match query {
        QueryNode::Term { text, field }
        | QueryNode::Phrase { text, field }
        | QueryNode::Fuzzy { text, field } => {
            if text.trim().is_empty() {
                return Err(Error::invalid_query("term/phrase text must not be blank"));
            }
            if let Some(field) = field {
                let declared = lookup(spec, field)?;
                if !matches!(declared.mode, IndexMode::FullText | IndexMode::Autocomplete) {
                    return Err(Error::invalid_query(format!(
                        "field '{field}' is not full-text searchable; scope terms to full-text fields"
                    )));
                }
            }
            Ok(())
        }
        QueryNode::And(children) | QueryNode::Or(children) => {
            if children.len() < 2 {
                return Err(Error::invalid_query(
                    "boolean And/Or nodes need at least two children",
                ));
            }
            children.iter().try_for_each(|child| validate(child, spec))
        }
        QueryNode::Not(child) => validate(child, spec),
        QueryNode::Boost { weight, query } => {
            if !(weight.is_finite() && *weight > 0.0) {
                return Err(Error::invalid_query(format!(
                    "boost weight must be a positive real, got {weight}"
                )));
            }
            validate(query, spec)
        }
        QueryNode::MatchAll => Ok(()),
        QueryNode::Filter { field, op, value } => {
            let declared = lookup(spec, field)?;
            if declared.mode != IndexMode::Exact {
                return Err(Error::invalid_query(format!(
                    "cannot filter on field '{field}': declare it as an exact (filterable) field"
                )));
            }
            validate_filter_value(field, declared.kind, *op, value)
        }
    }
}

fn lookup<'a>(
    spec: &'a FieldSpec,
    field: &str,
) -> Result<&'a weft_core::SearchableField> {
    let name = FieldName::new(field)
        .map_err(|_| Error::invalid_query(format!("malformed field name '{field}'")))?;
    spec.field(&name).ok_or_else(|| {
        Error::invalid_query(format!(
            "field '{field}' is not declared for model type '{}'",
            spec.model_type
        ))
    })
}

fn validate_filter_value(
    field: &str,
    kind: FieldKind,
    op: FilterOperator,
    value: &FilterValue,
) -> Result<()> {
    match op {
        FilterOperator::Exact => check_scalar(field, kind, value),
        FilterOperator::Range => match value {
            FilterValue::Range { lower, upper } => {
                if lower.is_none() && upper.is_none() {
                    return Err(Error::invalid_query(format!(
                        "range filter on '{field}' needs at least one bound"
                    )));
                }
                if !matches!(kind, FieldKind::Numeric | FieldKind::Date) {
                    return Err(Error::invalid_query(format!(
                        "range filters apply to numeric and date fields; '{field}' is neither"
                    )));
                }
                for bound in [lower, upper].into_iter().flatten() {
                    check_scalar(field, kind, bound)?;
                }
                Ok(())
            }
            _ => Err(Error::invalid_query(format!(
                "range filter on '{field}' requires a range value"
            ))),
        },
        FilterOperator::InSet => match value {
            FilterValue::Set(members) => {
                if members.is_empty() {
                    return Err(Error::invalid_query(format!(
                        "in-set filter on '{field}' needs at least one member"
                    )));
                }
                members
                    .iter()
                    .try_for_each(|member| check_scalar(field, kind, member))
            }
            _ => Err(Error::invalid_query(format!(
                "in-set filter on '{field}' requires a set value"
            ))),
        },
    }
}

fn check_scalar(field: &str, kind: FieldKind, value: &FilterValue) -> Result<()> {
    let matches_kind = matches!(
        (kind, value),
        (FieldKind::Keyword, FilterValue::Keyword(_))
            | (FieldKind::Numeric, FilterValue::Number(_))
            | (FieldKind::Date, FilterValue::Date(_))
            | (FieldKind::Text, FilterValue::Keyword(_))
    );
    if !matches_kind {
        return Err(Error::invalid_query(format!(
            "filter value {value:?} does not match the declared type of field '{field}' ({kind:?})"
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{FieldSpec, ModelType, SearchableField};

    fn spec() -> FieldSpec {
        FieldSpec::builder(ModelType::new("page").unwrap())
            .field(SearchableField::text("title").with_boost(2.0))
            .field(SearchableField::text("body"))
            .field(SearchableField::keyword("title_exact"))
            .field(SearchableField::numeric("views"))
            .field(SearchableField::date("published_at"))
            .build()
            .unwrap()
    }

    fn assert_invalid(query: QueryNode) {
        let err = validate(&query, &spec()).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)), "got {err:?}");
    }

    // ------------------------------------------------------------------------
    // Accepting valid trees
    // ------------------------------------------------------------------------

    #[test]
    fn test_valid_nested_tree() {
        let q = QueryNode::and(vec![
            QueryNode::boost(1.5, QueryNode::phrase_in("title", "quick fox")),
            QueryNode::or(vec![
                QueryNode::term("turtle"),
                QueryNode::not(QueryNode::term_in("body", "slow")),
            ]),
            QueryNode::filter(
                "views",
                FilterOperator::Range,
                FilterValue::Range {
                    lower: Some(Box::new(FilterValue::Number(10.0))),
                    upper: None,
                },
            ),
        ]);
        assert!(validate(&q, &spec()).is_ok());
    }

    #[test]
    fn test_valid_in_set_filter() {
        let q = QueryNode::filter(
            "title_exact",
            FilterOperator::InSet,
            FilterValue::Set(vec![
                FilterValue::Keyword("red fox".into()),
                FilterValue::Keyword("quick fox".into()),
            ]),
        );
        assert!(validate(&q, &spec()).is_ok());
    }

    #[test]
    fn test_match_all_valid() {
        assert!(validate(&QueryNode::match_all(), &spec()).is_ok());
    }

    // ------------------------------------------------------------------------
    // Rejecting invalid trees
    // ------------------------------------------------------------------------

    #[test]
    fn test_rejects_non_positive_boost() {
        assert_invalid(QueryNode::boost(0.0, QueryNode::term("fox")));
        assert_invalid(QueryNode::boost(-2.0, QueryNode::term("fox")));
        assert_invalid(QueryNode::boost(f32::NAN, QueryNode::term("fox")));
        assert_invalid(QueryNode::boost(f32::INFINITY, QueryNode::term("fox")));
    }

    #[test]
    fn test_rejects_underpopulated_boolean() {
        assert_invalid(QueryNode::and(vec![QueryNode::term("fox")]));
        assert_invalid(QueryNode::or(vec![]));
    }

    #[test]
    fn test_rejects_blank_term() {
        assert_invalid(QueryNode::term("  "));
        assert_invalid(QueryNode::fuzzy(""));
    }

    #[test]
    fn test_fuzzy_scoping_follows_term_rules() {
        assert!(validate(&QueryNode::fuzzy_in("title", "fxo"), &spec()).is_ok());
        assert_invalid(QueryNode::fuzzy_in("title_exact", "fxo"));
        assert_invalid(QueryNode::fuzzy_in("missing", "fxo"));
    }

    #[test]
    fn test_rejects_undeclared_field() {
        assert_invalid(QueryNode::term_in("subtitle", "fox"));
        assert_invalid(QueryNode::filter(
            "subtitle",
            FilterOperator::Exact,
            FilterValue::Keyword("x".into()),
        ));
    }

    #[test]
    fn test_rejects_term_scoped_to_filter_field() {
        assert_invalid(QueryNode::term_in("title_exact", "fox"));
    }

    #[test]
    fn test_rejects_filter_on_full_text_field() {
        assert_invalid(QueryNode::filter(
            "title",
            FilterOperator::Exact,
            FilterValue::Keyword("fox".into()),
        ));
    }

    #[test]
    fn test_rejects_type_mismatched_filter_value() {
        // Keyword value against a numeric field
        assert_invalid(QueryNode::filter(
            "views",
            FilterOperator::Exact,
            FilterValue::Keyword("ten".into()),
        ));
        // Number value against a date field
        assert_invalid(QueryNode::filter(
            "published_at",
            FilterOperator::Exact,
            FilterValue::Number(2024.0),
        ));
    }

    #[test]
    fn test_rejects_unbounded_range() {
        assert_invalid(QueryNode::filter(
            "views",
            FilterOperator::Range,
            FilterValue::Range {
                lower: None,
                upper: None,
            },
        ));
    }

    #[test]
    fn test_rejects_range_on_keyword_field() {
        assert_invalid(QueryNode::filter(
            "title_exact",
            FilterOperator::Range,
            FilterValue::Range {
                lower: Some(Box::new(FilterValue::Keyword("a".into()))),
                upper: None,
            },
        ));
    }

    #[test]
    fn test_rejects_empty_set() {
        assert_invalid(QueryNode::filter(
            "title_exact",
            FilterOperator::InSet,
            FilterValue::Set(vec![]),
        ));
    }

    #[test]
    fn test_rejects_operator_value_shape_mismatch() {
        assert_invalid(QueryNode::filter(
            "views",
            FilterOperator::Range,
            FilterValue::Number(3.0),
        ));
        assert_invalid(QueryNode::filter(
            "title_exact",
            FilterOperator::InSet,
            FilterValue::Keyword("x".into()),
        ));
    }
}
