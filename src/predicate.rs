//! Entity-local filter extraction and joined-filter pushdown.
//!
//! [`extract_entity_filter`] finds the part of a `WHERE` expression that
//! only reads columns of one joined entity (e.g. the person joined to an
//! event), so it can also be applied inside that entity's subquery. The
//! rewrite is structural: operands are classified and boolean constants
//! are folded, but AND is never distributed over OR and negations are
//! never pushed inward. When in doubt nothing is extracted.
//!
//! Classification of a node against an alias:
//!
//! | Node                   | Result                                                |
//! |------------------------|-------------------------------------------------------|
//! | `true` / `1`           | always true                                           |
//! | `false` / `0`          | always false                                          |
//! | hidden alias           | classification of the wrapped expression              |
//! | AND                    | AND of the local operands; others stay behind         |
//! | OR                     | OR of the local operands, if none is foreign or true  |
//! | anything else          | local iff it reads fields, all through the alias      |
//!
//! An AND containing `false` still yields its local operands.

use crate::ast::visitor::{
    Rewriter, collect_fields, infallible, remove_hidden_aliases, walk_select_query,
};
use crate::ast::{Expr, ExprMeta, JoinExpr, JoinType, Pushdown, SelectQuery, TableRef};
use crate::config::QueryContext;
use std::convert::Infallible;

/// Classification of a filter node relative to one alias.
#[derive(Debug, Clone, PartialEq)]
enum Extracted {
    /// Reads only the entity; holds the rewritten node.
    Local(Expr),
    True,
    False,
    /// Reads something outside the entity, or cannot be judged.
    Foreign,
}

/// Extract the part of `filter` that reads only fields of `alias`.
///
/// Every chain of the result has the alias prefix stripped, so it can be
/// evaluated against the entity's own columns. Hidden aliases are never
/// reproduced. Returns `None` when no safe, constraining filter exists.
pub fn extract_entity_filter(filter: &Expr, alias: &str) -> Option<Expr> {
    match classify(filter, alias) {
        Extracted::Local(expr) => Some(expr),
        Extracted::True | Extracted::False | Extracted::Foreign => None,
    }
}

fn classify(expr: &Expr, alias: &str) -> Extracted {
    if let Some(b) = expr.as_bool_constant() {
        return if b { Extracted::True } else { Extracted::False };
    }
    match expr {
        Expr::Alias {
            expr, hidden: true, ..
        } => classify(expr, alias),
        Expr::And { exprs, meta } => classify_and(exprs, meta, alias),
        Expr::Or { exprs, meta } => classify_or(exprs, meta, alias),
        leaf => classify_leaf(leaf, alias),
    }
}

fn classify_and(exprs: &[Expr], meta: &ExprMeta, alias: &str) -> Extracted {
    let mut local = Vec::new();
    let mut has_foreign = false;
    let mut has_false = false;
    for operand in exprs {
        match classify(operand, alias) {
            Extracted::Local(e) => local.push(e),
            Extracted::True => {}
            Extracted::False => has_false = true,
            Extracted::Foreign => has_foreign = true,
        }
    }
    if !local.is_empty() {
        combine(local, |exprs| Expr::And { exprs, meta: *meta })
    } else if has_foreign {
        Extracted::Foreign
    } else if has_false {
        Extracted::False
    } else {
        Extracted::True
    }
}

fn classify_or(exprs: &[Expr], meta: &ExprMeta, alias: &str) -> Extracted {
    let mut local = Vec::new();
    for operand in exprs {
        match classify(operand, alias) {
            Extracted::Local(e) => local.push(e),
            Extracted::False => {}
            Extracted::True => return Extracted::True,
            Extracted::Foreign => return Extracted::Foreign,
        }
    }
    if local.is_empty() {
        Extracted::False
    } else {
        combine(local, |exprs| Expr::Or { exprs, meta: *meta })
    }
}

fn combine(mut operands: Vec<Expr>, build: impl FnOnce(Vec<Expr>) -> Expr) -> Extracted {
    if operands.len() == 1 {
        if let Some(single) = operands.pop() {
            return Extracted::Local(single);
        }
    }
    Extracted::Local(build(operands))
}

fn classify_leaf(expr: &Expr, alias: &str) -> Extracted {
    let fields = collect_fields(expr);
    let local = !fields.has_subquery
        && !fields.chains.is_empty()
        && fields
            .chains
            .iter()
            .all(|chain| chain.len() > 1 && chain[0] == alias);
    if local {
        let unwrapped = remove_hidden_aliases(expr);
        Extracted::Local(infallible(StripAlias { alias }.visit_expr(&unwrapped)))
    } else {
        Extracted::Foreign
    }
}

/// Drops the alias prefix from chains.
struct StripAlias<'a> {
    alias: &'a str,
}

impl Rewriter for StripAlias<'_> {
    type Error = Infallible;

    fn visit_field(&mut self, chain: &[String], meta: &ExprMeta) -> Result<Expr, Infallible> {
        let chain = match chain.split_first() {
            Some((head, rest)) if head == self.alias && !rest.is_empty() => rest.to_vec(),
            _ => chain.to_vec(),
        };
        Ok(Expr::Field { chain, meta: *meta })
    }
}

// ── Pushdown ────────────────────────────────────────────────────────────

/// Copy entity-local parts of each query's `WHERE` into the subqueries of
/// its pending inner joins.
///
/// The outer `WHERE` is kept as it is, so the result is equivalent to the
/// input whatever is pushed. Nested queries are handled with their own
/// filters. Processed joins are tagged `Done`; a second run is a no-op.
pub fn push_down_joined_filters(query: &SelectQuery, ctx: &QueryContext) -> SelectQuery {
    if !ctx.modifiers.optimize_joined_filters {
        tracing::trace!("[eventql] joined filter pushdown disabled");
        return query.clone();
    }
    infallible(JoinedFilterPushdown.visit_select_query(query))
}

struct JoinedFilterPushdown;

impl Rewriter for JoinedFilterPushdown {
    type Error = Infallible;

    fn visit_select_query(&mut self, query: &SelectQuery) -> Result<SelectQuery, Infallible> {
        let mut out = walk_select_query(self, query)?;
        if let (Some(filter), Some(from)) = (&out.where_, &mut out.select_from) {
            push_into_chain(from, filter);
        }
        Ok(out)
    }
}

fn push_into_chain(from: &mut JoinExpr, filter: &Expr) {
    let mut link = Some(from);
    while let Some(join) = link {
        let pending = join.join_type == Some(JoinType::Inner)
            && join
                .origin
                .as_ref()
                .is_some_and(|o| o.pushdown == Pushdown::Pending);
        if pending {
            push_into_join(join, filter);
        }
        link = join.next_join.as_deref_mut();
    }
}

fn push_into_join(join: &mut JoinExpr, filter: &Expr) {
    let Some(alias) = join.effective_alias().map(str::to_string) else {
        return;
    };
    if let Some(origin) = join.origin.as_mut() {
        origin.pushdown = Pushdown::Done;
    }
    let Some(extracted) = extract_entity_filter(filter, &alias) else {
        tracing::trace!("[eventql] nothing to push into {alias}");
        return;
    };
    let query = match join.table.take() {
        Some(TableRef::Subquery { query }) => query,
        other => {
            join.table = other;
            return;
        }
    };
    tracing::debug!("[eventql] pushing `{extracted}` into {alias}");
    let columns = query
        .output_columns()
        .iter()
        .map(|c| Expr::field(&[c]))
        .collect();
    join.table = Some(TableRef::subquery(SelectQuery {
        select: columns,
        select_from: Some(JoinExpr::new(TableRef::Subquery { query })),
        where_: Some(extracted),
        ..SelectQuery::default()
    }));
}

/// The filter [`push_down_joined_filters`] placed into `join`, if any.
pub fn pushed_filter(join: &JoinExpr) -> Option<&Expr> {
    let Some(TableRef::Subquery { query }) = &join.table else {
        return None;
    };
    match &query.select_from {
        Some(JoinExpr {
            table: Some(TableRef::Subquery { .. }),
            alias: None,
            next_join: None,
            ..
        }) => query.where_.as_ref(),
        _ => None,
    }
}
