//! Generic traversal and rewriting of query trees.
//!
//! - [`Rewriter`] builds a new tree. Every handler has a default that
//!   recurses structurally through the matching `walk_*` function, so an
//!   implementation only overrides the node kinds it cares about. Every
//!   visited node is rebuilt, never shared with the input.
//! - [`Visitor`] walks a tree by reference without building anything.
//!
//! Both dispatch with exhaustive matches over [`Expr`], so adding a node
//! kind fails to compile until every pass handles it.

use super::{
    CompareOp, Constant, Expr, ExprMeta, JoinExpr, OrderExpr, SelectQuery, TableRef,
};
use std::convert::Infallible;

// ── Rewriter ────────────────────────────────────────────────────────────

/// A tree-to-tree rewrite. Use `Error = Infallible` for rewrites that
/// cannot fail.
pub trait Rewriter {
    type Error;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Expr, Self::Error> {
        walk_expr(self, expr)
    }

    /// Metadata for a rebuilt node. Defaults to a copy.
    fn visit_meta(&mut self, meta: &ExprMeta) -> ExprMeta {
        *meta
    }

    fn visit_field(&mut self, chain: &[String], meta: &ExprMeta) -> Result<Expr, Self::Error> {
        Ok(Expr::Field {
            chain: chain.to_vec(),
            meta: self.visit_meta(meta),
        })
    }

    fn visit_constant(&mut self, value: &Constant, meta: &ExprMeta) -> Result<Expr, Self::Error> {
        Ok(Expr::Constant {
            value: value.clone(),
            meta: self.visit_meta(meta),
        })
    }

    fn visit_compare(
        &mut self,
        op: CompareOp,
        left: &Expr,
        right: &Expr,
        meta: &ExprMeta,
    ) -> Result<Expr, Self::Error> {
        Ok(Expr::Compare {
            op,
            left: Box::new(self.visit_expr(left)?),
            right: Box::new(self.visit_expr(right)?),
            meta: self.visit_meta(meta),
        })
    }

    fn visit_and(&mut self, exprs: &[Expr], meta: &ExprMeta) -> Result<Expr, Self::Error> {
        Ok(Expr::And {
            exprs: walk_exprs(self, exprs)?,
            meta: self.visit_meta(meta),
        })
    }

    fn visit_or(&mut self, exprs: &[Expr], meta: &ExprMeta) -> Result<Expr, Self::Error> {
        Ok(Expr::Or {
            exprs: walk_exprs(self, exprs)?,
            meta: self.visit_meta(meta),
        })
    }

    fn visit_not(&mut self, expr: &Expr, meta: &ExprMeta) -> Result<Expr, Self::Error> {
        Ok(Expr::Not {
            expr: Box::new(self.visit_expr(expr)?),
            meta: self.visit_meta(meta),
        })
    }

    fn visit_alias(
        &mut self,
        alias: &str,
        expr: &Expr,
        hidden: bool,
        meta: &ExprMeta,
    ) -> Result<Expr, Self::Error> {
        Ok(Expr::Alias {
            alias: alias.to_string(),
            expr: Box::new(self.visit_expr(expr)?),
            hidden,
            meta: self.visit_meta(meta),
        })
    }

    fn visit_call(&mut self, name: &str, args: &[Expr], meta: &ExprMeta) -> Result<Expr, Self::Error> {
        Ok(Expr::Call {
            name: name.to_string(),
            args: walk_exprs(self, args)?,
            meta: self.visit_meta(meta),
        })
    }

    fn visit_subquery(&mut self, query: &SelectQuery, meta: &ExprMeta) -> Result<Expr, Self::Error> {
        Ok(Expr::Subquery {
            query: Box::new(self.visit_select_query(query)?),
            meta: self.visit_meta(meta),
        })
    }

    fn visit_select_query(&mut self, query: &SelectQuery) -> Result<SelectQuery, Self::Error> {
        walk_select_query(self, query)
    }

    fn visit_join_expr(&mut self, join: &JoinExpr) -> Result<JoinExpr, Self::Error> {
        walk_join_expr(self, join)
    }

    fn visit_table_ref(&mut self, table: &TableRef) -> Result<TableRef, Self::Error> {
        Ok(match table {
            TableRef::Named { name } => TableRef::Named { name: name.clone() },
            TableRef::Physical { name } => TableRef::Physical { name: name.clone() },
            TableRef::Subquery { query } => TableRef::Subquery {
                query: Box::new(self.visit_select_query(query)?),
            },
        })
    }
}

/// Dispatch an expression to the matching `visit_*` handler.
pub fn walk_expr<R: Rewriter + ?Sized>(r: &mut R, expr: &Expr) -> Result<Expr, R::Error> {
    match expr {
        Expr::Field { chain, meta } => r.visit_field(chain, meta),
        Expr::Constant { value, meta } => r.visit_constant(value, meta),
        Expr::Compare {
            op,
            left,
            right,
            meta,
        } => r.visit_compare(*op, left, right, meta),
        Expr::And { exprs, meta } => r.visit_and(exprs, meta),
        Expr::Or { exprs, meta } => r.visit_or(exprs, meta),
        Expr::Not { expr, meta } => r.visit_not(expr, meta),
        Expr::Alias {
            alias,
            expr,
            hidden,
            meta,
        } => r.visit_alias(alias, expr, *hidden, meta),
        Expr::Call { name, args, meta } => r.visit_call(name, args, meta),
        Expr::Subquery { query, meta } => r.visit_subquery(query, meta),
    }
}

fn walk_exprs<R: Rewriter + ?Sized>(r: &mut R, exprs: &[Expr]) -> Result<Vec<Expr>, R::Error> {
    exprs.iter().map(|e| r.visit_expr(e)).collect()
}

fn walk_opt<R: Rewriter + ?Sized>(r: &mut R, expr: &Option<Expr>) -> Result<Option<Expr>, R::Error> {
    expr.as_ref().map(|e| r.visit_expr(e)).transpose()
}

/// Rebuild every clause of a select.
pub fn walk_select_query<R: Rewriter + ?Sized>(
    r: &mut R,
    query: &SelectQuery,
) -> Result<SelectQuery, R::Error> {
    Ok(SelectQuery {
        select: walk_exprs(r, &query.select)?,
        select_from: query
            .select_from
            .as_ref()
            .map(|j| r.visit_join_expr(j))
            .transpose()?,
        where_: walk_opt(r, &query.where_)?,
        group_by: walk_exprs(r, &query.group_by)?,
        having: walk_opt(r, &query.having)?,
        order_by: query
            .order_by
            .iter()
            .map(|o| {
                Ok(OrderExpr {
                    expr: r.visit_expr(&o.expr)?,
                    order: o.order,
                })
            })
            .collect::<Result<Vec<_>, R::Error>>()?,
        limit: query.limit,
    })
}

/// Rebuild a join link and everything after it.
pub fn walk_join_expr<R: Rewriter + ?Sized>(r: &mut R, join: &JoinExpr) -> Result<JoinExpr, R::Error> {
    Ok(JoinExpr {
        table: join.table.as_ref().map(|t| r.visit_table_ref(t)).transpose()?,
        join_type: join.join_type,
        alias: join.alias.clone(),
        constraint: walk_opt(r, &join.constraint)?,
        next_join: join
            .next_join
            .as_ref()
            .map(|n| r.visit_join_expr(n).map(Box::new))
            .transpose()?,
        origin: join.origin.clone(),
    })
}

/// Unwrap the result of an infallible rewrite.
pub fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

// ── Cloning ─────────────────────────────────────────────────────────────

/// What [`clone_expr`] strips while copying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneOptions {
    pub clear_types: bool,
    pub clear_locations: bool,
}

impl CloneOptions {
    /// Strip both types and locations.
    pub fn bare() -> Self {
        Self {
            clear_types: true,
            clear_locations: true,
        }
    }
}

/// Deep-copying rewriter.
#[derive(Debug, Default)]
pub struct CloningRewriter {
    pub options: CloneOptions,
}

impl Rewriter for CloningRewriter {
    type Error = Infallible;

    fn visit_meta(&mut self, meta: &ExprMeta) -> ExprMeta {
        ExprMeta {
            ty: if self.options.clear_types { None } else { meta.ty },
            span: if self.options.clear_locations {
                None
            } else {
                meta.span
            },
        }
    }
}

/// Deep-copy an expression, optionally stripping annotations.
pub fn clone_expr(expr: &Expr, options: CloneOptions) -> Expr {
    infallible(CloningRewriter { options }.visit_expr(expr))
}

/// Deep-copy a select, optionally stripping annotations.
pub fn clone_select(query: &SelectQuery, options: CloneOptions) -> SelectQuery {
    infallible(CloningRewriter { options }.visit_select_query(query))
}

/// Compare shape and values, ignoring types and source locations.
pub fn structurally_eq(a: &Expr, b: &Expr) -> bool {
    clone_expr(a, CloneOptions::bare()) == clone_expr(b, CloneOptions::bare())
}

/// Replace every hidden alias by the expression it wraps.
#[derive(Debug, Default)]
pub struct HiddenAliasRemover;

impl Rewriter for HiddenAliasRemover {
    type Error = Infallible;

    fn visit_alias(
        &mut self,
        alias: &str,
        expr: &Expr,
        hidden: bool,
        meta: &ExprMeta,
    ) -> Result<Expr, Infallible> {
        if hidden {
            return self.visit_expr(expr);
        }
        Ok(Expr::Alias {
            alias: alias.to_string(),
            expr: Box::new(self.visit_expr(expr)?),
            hidden,
            meta: *meta,
        })
    }
}

pub fn remove_hidden_aliases(expr: &Expr) -> Expr {
    infallible(HiddenAliasRemover.visit_expr(expr))
}

// ── Visitor ─────────────────────────────────────────────────────────────

/// Read-only traversal. Defaults walk into every child, including nested
/// subqueries.
pub trait Visitor {
    fn visit_expr(&mut self, expr: &Expr) {
        visit_children(self, expr);
    }

    fn visit_field(&mut self, _chain: &[String]) {}

    fn visit_subquery(&mut self, query: &SelectQuery) {
        self.visit_select_query(query);
    }

    fn visit_select_query(&mut self, query: &SelectQuery) {
        for e in &query.select {
            self.visit_expr(e);
        }
        if let Some(from) = &query.select_from {
            for join in from.iter() {
                if let Some(TableRef::Subquery { query }) = &join.table {
                    self.visit_subquery(query);
                }
                if let Some(c) = &join.constraint {
                    self.visit_expr(c);
                }
            }
        }
        for e in query
            .where_
            .iter()
            .chain(&query.group_by)
            .chain(query.having.iter())
            .chain(query.order_by.iter().map(|o| &o.expr))
        {
            self.visit_expr(e);
        }
    }
}

/// Visit the direct children of `expr`.
pub fn visit_children<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match expr {
        Expr::Field { chain, .. } => v.visit_field(chain),
        Expr::Constant { .. } => {}
        Expr::Compare { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        Expr::And { exprs, .. } | Expr::Or { exprs, .. } | Expr::Call { args: exprs, .. } => {
            for e in exprs {
                v.visit_expr(e);
            }
        }
        Expr::Not { expr, .. } | Expr::Alias { expr, .. } => v.visit_expr(expr),
        Expr::Subquery { query, .. } => v.visit_subquery(query),
    }
}

/// Field chains referenced by an expression, excluding nested subqueries.
#[derive(Debug, Default)]
pub struct FieldCollector {
    pub chains: Vec<Vec<String>>,
    pub has_subquery: bool,
}

impl Visitor for FieldCollector {
    fn visit_field(&mut self, chain: &[String]) {
        self.chains.push(chain.to_vec());
    }

    fn visit_subquery(&mut self, _query: &SelectQuery) {
        self.has_subquery = true;
    }
}

pub fn collect_fields(expr: &Expr) -> FieldCollector {
    let mut collector = FieldCollector::default();
    collector.visit_expr(expr);
    collector
}
