//! eventql: query compilation core for an event/person analytics model.
//!
//! Takes a parsed query tree over logical tables (`events`, `persons`, …)
//! and produces a concrete tree ready for an external SQL renderer:
//!
//! 1. [`resolver`] replaces lazy tables and joins with subqueries that read
//!    only the columns the query uses. Versioned tables are deduplicated by
//!    the builders in [`database::argmax`].
//! 2. [`predicate`] copies filters that only read a joined entity into that
//!    entity's subquery.
//!
//! [`compile::prepare_query`] runs both.
//!
//! ```ignore
//! let db = Database::default_schema();
//! let ctx = QueryContext::new(team_id);
//! let prepared = prepare_query(&parsed, &db, &ctx)?;
//! ```

pub mod ast;
pub mod compile;
pub mod config;
pub mod database;
pub mod error;
pub mod predicate;
pub mod resolver;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use ast::{Expr, JoinExpr, SelectQuery};
pub use compile::prepare_query;
pub use config::{Modifiers, QueryContext};
pub use database::Database;
pub use error::{QueryError, Result};
pub use predicate::{extract_entity_filter, push_down_joined_filters};
pub use resolver::resolve_lazy_tables;
