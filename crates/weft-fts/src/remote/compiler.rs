//! Query compilation for the remote JSON engine.
//!
//! Query trees compile to the engine's bool/match DSL. Text leaves score;
//! filter leaves are wrapped in a non-scoring `bool.filter` clause. Boost
//! nodes multiply down the tree and land on the leaves they cover.

use serde_json::{Value, json};
use weft_core::{Error, FieldSpec, Result};
use weft_query::{FilterOperator, FilterValue, QueryNode};

use crate::backend::Ordering;

/// Compile a validated query tree to the engine's query DSL.
pub fn compile(query: &QueryNode, spec: &FieldSpec) -> Result<Value> {
    compile_boosted(query, spec, 1.0)
}

/// Sort clause for a search request. Relevance needs none.
pub fn compile_sort(order: &Ordering) -> Option<Value> {
    match order {
        Ordering::Relevance => None,
        Ordering::Field { name, descending } => {
            let direction = if *descending { "desc" } else { "asc" };
            Some(json!([{ name.as_str(): { "order": direction } }]))
        }
    }
}

fn compile_boosted(query: &QueryNode, spec: &FieldSpec, boost: f32) -> Result<Value> {
    match query {
        QueryNode::Term { text, field } => Ok(match field {
            Some(field) => scoped_match("match", field, text, boost),
            None => multi_match(spec, text, None, boost),
        }),
        QueryNode::Phrase { text, field } => Ok(match field {
            Some(field) => scoped_match("match_phrase", field, text, boost),
            None => multi_match(spec, text, Some("phrase"), boost),
        }),
        QueryNode::Fuzzy { text, field } => Ok(match field {
            Some(field) => {
                let mut clause = scoped_match("match", field, text, boost);
                clause["match"][field.as_str()]["fuzziness"] = json!("AUTO");
                clause
            }
            None => {
                let mut clause = multi_match(spec, text, None, boost);
                clause["multi_match"]["fuzziness"] = json!("AUTO");
                clause
            }
        }),
        QueryNode::And(children) => {
            let clauses = children
                .iter()
                .map(|child| compile_boosted(child, spec, boost))
                .collect::<Result<Vec<_>>>()?;
            Ok(json!({ "bool": { "must": clauses } }))
        }
        QueryNode::Or(children) => {
            let clauses = children
                .iter()
                .map(|child| compile_boosted(child, spec, boost))
                .collect::<Result<Vec<_>>>()?;
            Ok(json!({ "bool": { "should": clauses } }))
        }
        QueryNode::Not(inner) => {
            let clause = compile_boosted(inner, spec, boost)?;
            Ok(json!({ "bool": { "must_not": [clause] } }))
        }
        QueryNode::Boost { weight, query } => compile_boosted(query, spec, boost * weight),
        QueryNode::MatchAll => Ok(json!({ "match_all": {} })),
        QueryNode::Filter { field, op, value } => {
            let predicate = compile_filter(field, *op, value)?;
            Ok(json!({ "bool": { "filter": predicate } }))
        }
    }
}

fn scoped_match(kind: &str, field: &str, text: &str, boost: f32) -> Value {
    let mut body = json!({ "query": text });
    if boost != 1.0 {
        body["boost"] = json!(boost);
    }
    json!({ kind: { field: body } })
}

fn multi_match(spec: &FieldSpec, text: &str, kind: Option<&str>, boost: f32) -> Value {
    let mut body = json!({
        "query": text,
        "fields": boosted_fields(spec),
    });
    if let Some(kind) = kind {
        body["type"] = json!(kind);
    }
    if boost != 1.0 {
        body["boost"] = json!(boost);
    }
    json!({ "multi_match": body })
}

/// Full-text field names with `^boost` markers the engine understands.
fn boosted_fields(spec: &FieldSpec) -> Vec<String> {
    spec.full_text_fields()
        .map(|field| {
            let boost = field.effective_boost();
            if boost == 1.0 {
                field.name.to_string()
            } else {
                format!("{}^{}", field.name, boost)
            }
        })
        .collect()
}

fn compile_filter(field: &str, op: FilterOperator, value: &FilterValue) -> Result<Value> {
    match (op, value) {
        (FilterOperator::Exact, scalar) if scalar.is_scalar() => {
            Ok(json!({ "term": { field: scalar_json(scalar)? } }))
        }
        (FilterOperator::Range, FilterValue::Range { lower, upper }) => {
            let mut bounds = serde_json::Map::new();
            if let Some(lower) = lower {
                bounds.insert("gte".to_string(), scalar_json(lower)?);
            }
            if let Some(upper) = upper {
                bounds.insert("lte".to_string(), scalar_json(upper)?);
            }
            if bounds.is_empty() {
                return Err(Error::invalid_query(format!(
                    "range filter on '{field}' has no bounds"
                )));
            }
            Ok(json!({ "range": { field: bounds } }))
        }
        (FilterOperator::InSet, FilterValue::Set(members)) => {
            if members.is_empty() {
                return Err(Error::invalid_query(format!(
                    "set filter on '{field}' is empty"
                )));
            }
            let members = members
                .iter()
                .map(scalar_json)
                .collect::<Result<Vec<_>>>()?;
            Ok(json!({ "terms": { field: members } }))
        }
        (op, value) => Err(Error::invalid_query(format!(
            "filter on '{field}': operator {op:?} does not accept {value:?}"
        ))),
    }
}

fn scalar_json(value: &FilterValue) -> Result<Value> {
    match value {
        FilterValue::Keyword(s) | FilterValue::Date(s) => Ok(json!(s)),
        FilterValue::Number(n) => Ok(json!(n)),
        other => Err(Error::invalid_query(format!(
            "expected a scalar filter value, got {other:?}"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
