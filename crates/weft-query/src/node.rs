//! Query tree nodes.
//!
//! [`QueryNode`] is a tagged union over the constructs every backend must
//! understand: term and phrase matching, boolean composition, boost
//! multipliers, match-all, and field-scoped filters. Trees are immutable
//! values; construction helpers keep caller code terse.
//!
//! Field names are carried as plain strings here and resolved against the
//! registered field specification during validation and compilation.

use serde::{Deserialize, Serialize};

/// Filter operator; narrows result-set membership without contributing to
/// relevance scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Exact equality on the stored value.
    Exact,
    /// Bounded or half-bounded range (numeric and date fields).
    Range,
    /// Membership in a set of values.
    InSet,
}

/// Filter value.
///
/// Scalar variants pair with [`FilterOperator::Exact`]; `Range` and `Set`
/// pair with their respective operators and hold scalar bounds/members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterValue {
    /// Exact keyword.
    Keyword(String),
    /// Numeric value.
    Number(f64),
    /// ISO-8601 date string.
    Date(String),
    /// Inclusive range; at least one bound must be present.
    Range {
        /// Lower bound (inclusive).
        lower: Option<Box<FilterValue>>,
        /// Upper bound (inclusive).
        upper: Option<Box<FilterValue>>,
    },
    /// Set of scalar values.
    Set(Vec<FilterValue>),
}

impl FilterValue {
    /// Whether this is a scalar (non-composite) value.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Keyword(_) | Self::Number(_) | Self::Date(_))
    }
}

/// Operator used when parsing a plain-text query string into a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlainTextOperator {
    /// Any term may match.
    #[default]
    Or,
    /// All terms must match.
    And,
}

/// One node of a backend-neutral query tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryNode {
    /// Match a single term, optionally scoped to one full-text field.
    Term {
        /// The term text.
        text: String,
        /// Optional field scope; unscoped terms match all full-text fields.
        field: Option<String>,
    },
    /// Match an exact, order-sensitive phrase.
    Phrase {
        /// The phrase text; token order is preserved by every compiler.
        text: String,
        /// Optional field scope.
        field: Option<String>,
    },
    /// Match a term tolerating small edit distances. Engines without a
    /// fuzzy matcher fall back to exact term matching.
    Fuzzy {
        /// The term text.
        text: String,
        /// Optional field scope.
        field: Option<String>,
    },
    /// All children must match. At least two children.
    And(Vec<QueryNode>),
    /// Any child may match. At least two children.
    Or(Vec<QueryNode>),
    /// Negate the child's membership.
    Not(Box<QueryNode>),
    /// Multiply the child's relevance contribution.
    Boost {
        /// Positive multiplier; composes multiplicatively with declared
        /// field boosts and nested boost nodes.
        weight: f32,
        /// The boosted subtree.
        query: Box<QueryNode>,
    },
    /// Match every document.
    MatchAll,
    /// Field-scoped filter; affects membership only, never scoring.
    Filter {
        /// The filterable field.
        field: String,
        /// Filter operator.
        op: FilterOperator,
        /// Filter value.
        value: FilterValue,
    },
}

impl QueryNode {
    /// A term matched against all full-text fields.
    pub fn term(text: impl Into<String>) -> Self {
        Self::Term {
            text: text.into(),
            field: None,
        }
    }

    /// A term scoped to one field.
    pub fn term_in(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Term {
            text: text.into(),
            field: Some(field.into()),
        }
    }

    /// A phrase matched against all full-text fields.
    pub fn phrase(text: impl Into<String>) -> Self {
        Self::Phrase {
            text: text.into(),
            field: None,
        }
    }

    /// A phrase scoped to one field.
    pub fn phrase_in(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Phrase {
            text: text.into(),
            field: Some(field.into()),
        }
    }

    /// A fuzzy term matched against all full-text fields.
    pub fn fuzzy(text: impl Into<String>) -> Self {
        Self::Fuzzy {
            text: text.into(),
            field: None,
        }
    }

    /// A fuzzy term scoped to one field.
    pub fn fuzzy_in(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Fuzzy {
            text: text.into(),
            field: Some(field.into()),
        }
    }

    /// Conjunction of children.
    pub fn and(children: Vec<QueryNode>) -> Self {
        Self::And(children)
    }

    /// Disjunction of children.
    pub fn or(children: Vec<QueryNode>) -> Self {
        Self::Or(children)
    }

    /// Negation of a child.
    #[allow(clippy::should_implement_trait)]
    pub fn not(child: QueryNode) -> Self {
        Self::Not(Box::new(child))
    }

    /// Boost the child's relevance contribution.
    pub fn boost(weight: f32, child: QueryNode) -> Self {
        Self::Boost {
            weight,
            query: Box::new(child),
        }
    }

    /// Match every document.
    pub fn match_all() -> Self {
        Self::MatchAll
    }

    /// A field-scoped filter.
    pub fn filter(
        field: impl Into<String>,
        op: FilterOperator,
        value: FilterValue,
    ) -> Self {
        Self::Filter {
            field: field.into(),
            op,
            value,
        }
    }

    /// Parse a raw user query string into a tree.
    ///
    /// Splits on whitespace and joins the resulting terms with the given
    /// operator. Returns `None` for a blank string: an empty query matches
    /// nothing, by convention, rather than everything.
    pub fn plain_text(text: &str, operator: PlainTextOperator) -> Option<Self> {
        let terms: Vec<QueryNode> = text.split_whitespace().map(QueryNode::term).collect();
        match terms.len() {
            0 => None,
            1 => terms.into_iter().next(),
            _ => Some(match operator {
                PlainTextOperator::Or => Self::Or(terms),
                PlainTextOperator::And => Self::And(terms),
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
