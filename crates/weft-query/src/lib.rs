//! Weft query model.
//!
//! A backend-neutral algebraic representation of search intent. Callers
//! build an immutable [`QueryNode`] tree; each configured backend compiles
//! the tree into its native query language. The model is pure data: no
//! behavior beyond construction helpers and structural validation.
//!
//! # Example
//!
//! ```
//! use weft_query::{FilterOperator, FilterValue, QueryNode};
//!
//! let query = QueryNode::and(vec![
//!     QueryNode::term("fox"),
//!     QueryNode::filter(
//!         "title_exact",
//!         FilterOperator::Exact,
//!         FilterValue::Keyword("red fox".into()),
//!     ),
//! ]);
//! ```

pub mod node;
pub mod validate;

pub use node::{FilterOperator, FilterValue, PlainTextOperator, QueryNode};
pub use validate::validate;
