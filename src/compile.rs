//! Compilation pipeline: lazy resolution, then joined-filter pushdown.

use crate::ast::SelectQuery;
use crate::config::QueryContext;
use crate::database::Database;
use crate::error::{QueryError, Result};
use crate::predicate::push_down_joined_filters;
use crate::resolver::resolve_lazy_tables;

/// Prepare a parsed query for rendering.
///
/// The result reads only physical tables and subqueries. Entity-local
/// filters are copied into the subqueries of joined entities that accept
/// them, unless `optimize_joined_filters` is off.
#[tracing::instrument(level = "debug", skip_all, fields(team_id = ctx.team_id))]
pub fn prepare_query(query: &SelectQuery, db: &Database, ctx: &QueryContext) -> Result<SelectQuery> {
    let resolved = resolve_lazy_tables(query, db, ctx)?;
    if resolved.has_unresolved_tables() {
        return Err(QueryError::InternalError(
            "logical tables left after resolution".to_string(),
        ));
    }
    let prepared = push_down_joined_filters(&resolved, ctx);
    tracing::debug!("[eventql] prepared: {}", prepared.to_hogql());
    Ok(prepared)
}
