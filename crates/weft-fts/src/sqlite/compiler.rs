//! Query compilation for the embedded relational backend.
//!
//! A query tree compiles to two cooperating pieces of SQL:
//!
//! * a boolean *predicate* over the documents table that decides
//!   membership exactly, with every text leaf expressed as a rowid
//!   subquery against the FTS table, and
//! * an optional *score match*, the OR-union of all non-negated text
//!   leaves, which the backend joins against `bm25()` to rank members.
//!
//! Field boosts become bm25 column weights. Per-clause boost nodes
//! degrade to those field-level weights; they never change membership.

use weft_core::{Error, FieldName, Result};
use weft_query::{FilterOperator, FilterValue, QueryNode};

/// One positional bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlBind {
    Text(String),
    Real(f64),
}

/// The compiled form of one query tree.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Boolean SQL over the documents table, aliased `d`.
    pub predicate: String,
    /// Binds for `predicate`, in placeholder order.
    pub binds: Vec<SqlBind>,
    /// FTS match expression ranking the membership set, when the query
    /// has at least one non-negated text leaf.
    pub score_match: Option<String>,
}

/// Compile a validated query tree against one generation's FTS table.
pub fn compile(query: &QueryNode, fts_table: &str) -> Result<CompiledQuery> {
    let mut cx = Compiler {
        fts_table,
        binds: Vec::new(),
        positives: Vec::new(),
    };
    let predicate = cx.predicate(query, false)?;
    let score_match = if cx.positives.is_empty() {
        None
    } else {
        Some(cx.positives.join(" OR "))
    };
    Ok(CompiledQuery {
        predicate,
        binds: cx.binds,
        score_match,
    })
}

/// FTS match expression for prefix completion on one column.
pub fn autocomplete_match(field: &FieldName, prefix: &str) -> String {
    format!("{} : {} *", field.as_str(), fts_quote(prefix))
}

/// Quote a string for the FTS match grammar.
fn fts_quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

struct Compiler<'a> {
    fts_table: &'a str,
    binds: Vec<SqlBind>,
    positives: Vec<String>,
}

impl Compiler<'_> {
    fn predicate(&mut self, node: &QueryNode, negated: bool) -> Result<String> {
        match node {
            // FTS5 has no edit-distance matcher, so fuzzy terms degrade
            // to exact term matching here.
            QueryNode::Term { text, field }
            | QueryNode::Phrase { text, field }
            | QueryNode::Fuzzy { text, field } => {
                Ok(self.text_leaf(text, field.as_deref(), negated))
            }
            QueryNode::And(children) => self.junction(children, " AND ", negated),
            QueryNode::Or(children) => self.junction(children, " OR ", negated),
            QueryNode::Not(inner) => {
                let inner_sql = self.predicate(inner, !negated)?;
                Ok(format!("NOT ({inner_sql})"))
            }
            QueryNode::Boost { query, .. } => self.predicate(query, negated),
            QueryNode::MatchAll => Ok("1=1".to_string()),
            QueryNode::Filter { field, op, value } => self.filter(field, *op, value),
        }
    }

    fn junction(&mut self, children: &[QueryNode], sep: &str, negated: bool) -> Result<String> {
        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            let sql = self.predicate(child, negated)?;
            parts.push(format!("({sql})"));
        }
        Ok(parts.join(sep))
    }

    fn text_leaf(&mut self, text: &str, field: Option<&str>, negated: bool) -> String {
        let quoted = fts_quote(text);
        let matcher = match field {
            Some(name) => format!("{name} : {quoted}"),
            None => quoted,
        };
        if !negated {
            self.positives.push(format!("({matcher})"));
        }
        self.binds.push(SqlBind::Text(matcher));
        format!(
            "d.rowid IN (SELECT rowid FROM \"{fts}\" WHERE \"{fts}\" MATCH ?)",
            fts = self.fts_table
        )
    }

    fn filter(&mut self, field: &str, op: FilterOperator, value: &FilterValue) -> Result<String> {
        let column = format!("d.\"f_{field}\"");
        match (op, value) {
            (FilterOperator::Exact, scalar) if scalar.is_scalar() => {
                self.bind_scalar(scalar)?;
                Ok(format!("{column} = ?"))
            }
            (FilterOperator::Range, FilterValue::Range { lower, upper }) => {
                let mut parts = Vec::with_capacity(2);
                if let Some(lower) = lower {
                    self.bind_scalar(lower)?;
                    parts.push(format!("{column} >= ?"));
                }
                if let Some(upper) = upper {
                    self.bind_scalar(upper)?;
                    parts.push(format!("{column} <= ?"));
                }
                if parts.is_empty() {
                    return Err(Error::invalid_query(format!(
                        "range filter on '{field}' has no bounds"
                    )));
                }
                Ok(parts.join(" AND "))
            }
            (FilterOperator::InSet, FilterValue::Set(members)) => {
                if members.is_empty() {
                    return Err(Error::invalid_query(format!(
                        "set filter on '{field}' is empty"
                    )));
                }
                for member in members {
                    self.bind_scalar(member)?;
                }
                let holes = vec!["?"; members.len()].join(", ");
                Ok(format!("{column} IN ({holes})"))
            }
            (op, value) => Err(Error::invalid_query(format!(
                "filter on '{field}': operator {op:?} does not accept {value:?}"
            ))),
        }
    }

    fn bind_scalar(&mut self, value: &FilterValue) -> Result<()> {
        match value {
            FilterValue::Keyword(s) | FilterValue::Date(s) => {
                self.binds.push(SqlBind::Text(s.clone()));
            }
            FilterValue::Number(n) => {
                self.binds.push(SqlBind::Real(*n));
            }
            other => {
                return Err(Error::invalid_query(format!(
                    "expected a scalar filter value, got {other:?}"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
