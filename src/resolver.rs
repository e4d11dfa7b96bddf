//! Lazy table and join resolution.
//!
//! Turns a parsed query whose `FROM` clause names logical tables into a
//! concrete one. Each `SELECT` is its own scope and is processed in two
//! phases:
//!
//! 1. Every field chain in the scope is resolved against the schema. Chains
//!    are qualified with the alias of the table they end up reading, and
//!    each lazy join they cross allocates a join alias
//!    (`<parent alias>__<field>`). Along the way the resolver records, per
//!    alias, exactly which fields are read.
//! 2. Lazy `FROM`/`JOIN` tables are replaced by the subquery their
//!    [`LazySelect`](crate::database::LazySelect) builds for that accessed
//!    set, and the lazy joins discovered in phase 1 are appended to the
//!    chain in dependency order.
//!
//! Subquery links are opaque: chains that start with their alias are left
//! as they are. Since phase 2 only ever produces subqueries and physical
//! tables, running the resolver on its own output changes nothing.

use crate::ast::visitor::{Rewriter, walk_select_query};
use crate::ast::{
    Expr, ExprMeta, JoinExpr, JoinOrigin, JoinType, OrderExpr, Pushdown, SelectQuery, TableRef,
};
use crate::config::QueryContext;
use crate::database::{
    Database, FieldOrTable, FieldsAccessed, LazyJoin, TableSchema, TableSource,
};
use crate::error::{QueryError, Result};
use std::collections::BTreeMap;

/// Traverser chains may point at other traversers; bail out of cycles.
const MAX_TRAVERSAL_DEPTH: usize = 16;

/// Resolve every lazy table and join in `query`, including nested
/// subqueries.
pub fn resolve_lazy_tables(
    query: &SelectQuery,
    db: &Database,
    ctx: &QueryContext,
) -> Result<SelectQuery> {
    let mut scope = Scope::new(db, ctx);
    scope.resolve(query)
}

/// Alias of a lazy join reached from `parent` through `field`.
pub fn join_alias(parent: &str, field: &str) -> String {
    format!("{parent}__{field}")
}

/// A `FROM` link as seen by field resolution. `table` is `None` for
/// opaque links (subqueries, physical relations).
#[derive(Debug)]
struct Binding<'a> {
    alias: String,
    table: Option<&'a TableSchema>,
}

/// A lazy join discovered while resolving chains.
#[derive(Debug)]
struct PendingJoin<'a> {
    alias: String,
    parent_alias: String,
    join: &'a LazyJoin,
    table: &'a TableSchema,
}

struct Scope<'a> {
    db: &'a Database,
    ctx: &'a QueryContext,
    bindings: Vec<Binding<'a>>,
    accessed: BTreeMap<String, FieldsAccessed>,
    joins: Vec<PendingJoin<'a>>,
}

impl<'a> Scope<'a> {
    fn new(db: &'a Database, ctx: &'a QueryContext) -> Self {
        Self {
            db,
            ctx,
            bindings: Vec::new(),
            accessed: BTreeMap::new(),
            joins: Vec::new(),
        }
    }

    fn resolve(&mut self, query: &SelectQuery) -> Result<SelectQuery> {
        let Some(from) = &query.select_from else {
            // No tables in scope; only nested subqueries can need work.
            return walk_select_query(self, query);
        };

        // Nested FROM subqueries are separate scopes, resolved first.
        let mut links = Vec::new();
        for link in from.iter() {
            let table = match &link.table {
                Some(TableRef::Subquery { query }) => Some(TableRef::subquery(
                    resolve_lazy_tables(query, self.db, self.ctx)?,
                )),
                other => other.clone(),
            };
            links.push((link, table));
        }

        for (link, table) in &links {
            let binding = self.bind(link, table.as_ref())?;
            self.bindings.push(binding);
        }

        let select = self.resolve_select_list(&query.select)?;
        let where_ = self.visit_opt(&query.where_)?;
        let group_by = query
            .group_by
            .iter()
            .map(|e| self.visit_expr(e))
            .collect::<Result<Vec<_>>>()?;
        let having = self.visit_opt(&query.having)?;
        let order_by = query
            .order_by
            .iter()
            .map(|o| {
                Ok(OrderExpr {
                    expr: self.visit_expr(&o.expr)?,
                    order: o.order,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let constraints = links
            .iter()
            .map(|(link, _)| self.visit_opt(&link.constraint))
            .collect::<Result<Vec<_>>>()?;

        let mut resolved = Vec::new();
        for (((link, table), constraint), binding) in
            links.into_iter().zip(constraints).zip(&self.bindings)
        {
            resolved.push(self.materialize_link(link, table, constraint, binding)?);
        }
        for pending in &self.joins {
            resolved.push(self.materialize_join(pending)?);
        }

        Ok(SelectQuery {
            select,
            select_from: chain(resolved),
            where_,
            group_by,
            having,
            order_by,
            limit: query.limit,
        })
    }

    fn bind(&self, link: &JoinExpr, table: Option<&TableRef>) -> Result<Binding<'a>> {
        let alias = link.effective_alias().unwrap_or_default().to_string();
        if !alias.is_empty() && self.bindings.iter().any(|b| b.alias == alias) {
            return Err(QueryError::InvalidQuery(format!(
                "alias {alias} is used by more than one table"
            )));
        }
        let table = match table {
            Some(TableRef::Named { name }) => Some(self.db.resolve_table(name)?),
            Some(_) => None,
            None => {
                return Err(QueryError::InvalidQuery(
                    "join without a table".to_string(),
                ));
            }
        };
        Ok(Binding { alias, table })
    }

    fn visit_opt(&mut self, expr: &Option<Expr>) -> Result<Option<Expr>> {
        expr.as_ref().map(|e| self.visit_expr(e)).transpose()
    }

    /// Resolve the select list, expanding a bare `*` to the root table's
    /// columns.
    fn resolve_select_list(&mut self, select: &[Expr]) -> Result<Vec<Expr>> {
        let mut out = Vec::with_capacity(select.len());
        for expr in select {
            let is_star =
                matches!(expr, Expr::Field { chain, .. } if chain.len() == 1 && chain[0] == "*");
            match self.bindings.first().and_then(|b| b.table) {
                Some(root) if is_star => {
                    for column in root.column_names() {
                        out.push(self.visit_expr(&Expr::field(&[column]))?);
                    }
                }
                _ => out.push(self.visit_expr(expr)?),
            }
        }
        Ok(out)
    }

    fn record(&mut self, alias: &str, field: &str) {
        self.accessed
            .entry(alias.to_string())
            .or_default()
            .insert(field.to_string());
    }

    /// Qualify a chain and record what it reads.
    fn resolve_chain(&mut self, chain: &[String]) -> Result<Vec<String>> {
        let Some(root) = self.bindings.first() else {
            return Ok(chain.to_vec());
        };
        let start = match chain {
            [head, _, ..] => self
                .bindings
                .iter()
                .position(|b| &b.alias == head)
                .map(|i| (i, &chain[1..])),
            _ => None,
        };
        let (alias, table, rest) = match start {
            Some((i, rest)) => (self.bindings[i].alias.clone(), self.bindings[i].table, rest),
            None => (root.alias.clone(), root.table, chain),
        };
        match table {
            Some(table) if !rest.is_empty() => self.walk(alias, table, rest.to_vec(), 0),
            _ => Ok(chain.to_vec()),
        }
    }

    fn walk(
        &mut self,
        alias: String,
        table: &'a TableSchema,
        rest: Vec<String>,
        depth: usize,
    ) -> Result<Vec<String>> {
        if depth > MAX_TRAVERSAL_DEPTH {
            return Err(QueryError::InternalError(format!(
                "field traversal on {} exceeds depth {MAX_TRAVERSAL_DEPTH}",
                table.name
            )));
        }
        let name = &rest[0];
        match table.field(name)? {
            FieldOrTable::Field(_) => {
                self.record(&alias, name);
                let mut qualified = Vec::with_capacity(rest.len() + 1);
                qualified.push(alias);
                qualified.extend(rest);
                Ok(qualified)
            }
            FieldOrTable::LazyJoin(join) => {
                let target = self.db.resolve_table(&join.join_table)?;
                if rest.len() == 1 {
                    return Err(QueryError::ResolutionError(format!(
                        "no fields requested from {alias}.{name}"
                    )));
                }
                self.record(&alias, &join.from_field);
                let child = join_alias(&alias, name);
                if self.bindings.iter().any(|b| b.alias == child) {
                    return Err(QueryError::InvalidQuery(format!(
                        "alias {child} is already bound, cannot join {alias}.{name}"
                    )));
                }
                if !self.joins.iter().any(|j| j.alias == child) {
                    tracing::trace!("[eventql] lazy join {} -> {}", child, join.join_table);
                    self.joins.push(PendingJoin {
                        alias: child.clone(),
                        parent_alias: alias,
                        join,
                        table: target,
                    });
                }
                self.walk(child, target, rest[1..].to_vec(), depth + 1)
            }
            FieldOrTable::Traverser(traverser) => {
                let mut substituted = traverser.chain_for(&self.ctx.modifiers).to_vec();
                substituted.extend_from_slice(&rest[1..]);
                self.walk(alias, table, substituted, depth + 1)
            }
        }
    }

    /// Turn an input link into its concrete form.
    fn materialize_link(
        &self,
        link: &JoinExpr,
        table: Option<TableRef>,
        constraint: Option<Expr>,
        binding: &Binding<'a>,
    ) -> Result<JoinExpr> {
        let mut out = JoinExpr {
            table,
            join_type: link.join_type,
            alias: link.alias.clone(),
            constraint,
            next_join: None,
            origin: link.origin.clone(),
        };
        if let Some(schema) = binding.table {
            let fields = self.accessed.get(&binding.alias).cloned().unwrap_or_default();
            out.table = Some(self.materialize_table(schema, &binding.alias, &fields)?);
            if schema.is_lazy() {
                out.alias = Some(binding.alias.clone());
            }
            out.origin = Some(origin_for(schema, link.join_type));
        }
        Ok(out)
    }

    fn materialize_join(&self, pending: &PendingJoin<'a>) -> Result<JoinExpr> {
        let mut fields = self.accessed.get(&pending.alias).cloned().unwrap_or_default();
        fields.insert(pending.join.to_field.clone());
        let table = self.materialize_table(pending.table, &pending.alias, &fields)?;
        Ok(JoinExpr {
            table: Some(table),
            join_type: Some(pending.join.join_type),
            alias: Some(pending.alias.clone()),
            constraint: Some(Expr::eq(
                Expr::field(&[&pending.parent_alias, &pending.join.from_field]),
                Expr::field(&[&pending.alias, &pending.join.to_field]),
            )),
            next_join: None,
            origin: Some(origin_for(pending.table, Some(pending.join.join_type))),
        })
    }

    fn materialize_table(
        &self,
        schema: &TableSchema,
        alias: &str,
        fields: &FieldsAccessed,
    ) -> Result<TableRef> {
        match &schema.source {
            TableSource::Physical(name) => Ok(TableRef::physical(name)),
            TableSource::Lazy(_) => {
                tracing::debug!(
                    "[eventql] resolving {} AS {} with {} field(s)",
                    schema.name,
                    alias,
                    fields.len()
                );
                Ok(TableRef::subquery(schema.lazy_select(fields, self.ctx)?))
            }
        }
    }
}

impl Rewriter for Scope<'_> {
    type Error = QueryError;

    fn visit_field(&mut self, chain: &[String], meta: &ExprMeta) -> Result<Expr> {
        Ok(Expr::Field {
            chain: self.resolve_chain(chain)?,
            meta: *meta,
        })
    }

    fn visit_subquery(&mut self, query: &SelectQuery, meta: &ExprMeta) -> Result<Expr> {
        Ok(Expr::Subquery {
            query: Box::new(resolve_lazy_tables(query, self.db, self.ctx)?),
            meta: *meta,
        })
    }

    fn visit_select_query(&mut self, query: &SelectQuery) -> Result<SelectQuery> {
        resolve_lazy_tables(query, self.db, self.ctx)
    }
}

fn origin_for(schema: &TableSchema, join_type: Option<JoinType>) -> JoinOrigin {
    let pushdown = if schema.accepts_filter_pushdown && join_type == Some(JoinType::Inner) {
        Pushdown::Pending
    } else {
        Pushdown::NotApplicable
    };
    JoinOrigin {
        table: schema.name.clone(),
        pushdown,
    }
}

/// Link flat joins back into a chain.
fn chain(links: Vec<JoinExpr>) -> Option<JoinExpr> {
    links.into_iter().rev().fold(None, |next, mut link| {
        link.next_join = next.map(Box::new);
        Some(link)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::visitor::collect_fields;
    use crate::config::{Modifiers, PersonsOnEventsMode};
    use crate::test_helpers::*;

    fn resolve(query: &SelectQuery) -> Result<SelectQuery> {
        resolve_lazy_tables(query, &Database::default_schema(), &test_ctx())
    }

    fn aliases(query: &SelectQuery) -> Vec<String> {
        query
            .select_from
            .iter()
            .flat_map(|f| f.iter())
            .filter_map(|j| j.effective_alias().map(str::to_string))
            .collect()
    }

    fn subquery_of<'q>(query: &'q SelectQuery, alias: &str) -> &'q SelectQuery {
        match query
            .select_from
            .as_ref()
            .and_then(|f| f.find(alias))
            .and_then(|j| j.table.as_ref())
        {
            Some(TableRef::Subquery { query }) => query,
            other => panic!("no subquery for {alias}: {other:?}"),
        }
    }

    #[test]
    fn test_physical_root_is_qualified() {
        let q = select_from("events", &[&["event"], &["properties", "$browser"]], None);
        let out = resolve(&q).unwrap();
        assert_eq!(
            out.to_hogql(),
            "SELECT events.event, events.properties.$browser FROM events"
        );
        assert!(!out.has_unresolved_tables());
    }

    #[test]
    fn test_person_id_only_requests_id() {
        let q = select_from("events", &[&["event"], &["person", "id"]], None);
        let out = resolve(&q).unwrap();
        assert_eq!(
            aliases(&out),
            vec!["events", "events__pdi", "events__pdi__person"]
        );
        let persons = subquery_of(&out, "events__pdi__person");
        assert_eq!(persons.output_columns(), vec!["id"]);
        assert!(!persons.to_hogql().contains("properties"));
        assert_eq!(
            out.select[1],
            field(&["events__pdi__person", "id"])
        );
    }

    #[test]
    fn test_join_constraints_and_tags() {
        let q = select_from("events", &[&["person", "properties", "email"]], None);
        let out = resolve(&q).unwrap();
        let from = out.select_from.as_ref().unwrap();

        let pdi = from.find("events__pdi").unwrap();
        assert_eq!(pdi.join_type, Some(JoinType::Inner));
        assert_eq!(
            pdi.constraint.as_ref().unwrap().to_hogql(),
            "events.distinct_id = events__pdi.distinct_id"
        );
        assert_eq!(pdi.origin.as_ref().unwrap().pushdown, Pushdown::NotApplicable);

        let person = from.find("events__pdi__person").unwrap();
        assert_eq!(
            person.constraint.as_ref().unwrap().to_hogql(),
            "events__pdi.person_id = events__pdi__person.id"
        );
        let origin = person.origin.as_ref().unwrap();
        assert_eq!(origin.table, "persons");
        assert_eq!(origin.pushdown, Pushdown::Pending);
    }

    #[test]
    fn test_accessed_sets_are_exact() {
        let q = select_from(
            "events",
            &[&["person", "properties", "email"]],
            Some(field_eq(&["person", "created_at"], "2024-01-01")),
        );
        let out = resolve(&q).unwrap();
        let pdi = subquery_of(&out, "events__pdi");
        assert_eq!(pdi.output_columns(), vec!["person_id", "distinct_id"]);
        let mut persons = subquery_of(&out, "events__pdi__person").output_columns();
        persons.sort();
        assert_eq!(persons, vec!["created_at", "id", "properties"]);
    }

    #[test]
    fn test_lazy_root_keeps_alias() {
        let q = select_from("persons", &[&["id"], &["properties", "email"]], None);
        let out = resolve(&q).unwrap();
        let root = out.select_from.as_ref().unwrap();
        assert_eq!(root.alias.as_deref(), Some("persons"));
        assert!(matches!(root.table, Some(TableRef::Subquery { .. })));
        assert_eq!(out.select[0], field(&["persons", "id"]));
    }

    #[test]
    fn test_explicit_alias_and_join() {
        let mut from = JoinExpr::new(TableRef::named("events")).with_alias("e");
        let mut join = JoinExpr::new(TableRef::named("persons")).with_alias("p");
        join.join_type = Some(JoinType::Inner);
        join.constraint = Some(eq(field(&["e", "person_id"]), field(&["p", "id"])));
        from.push(join);
        let q = SelectQuery {
            select: vec![field(&["p", "properties", "email"])],
            select_from: Some(from),
            ..SelectQuery::default()
        };
        let out = resolve(&q).unwrap();
        let p = out.select_from.as_ref().unwrap().find("p").unwrap();
        assert_eq!(p.origin.as_ref().unwrap().pushdown, Pushdown::Pending);
        assert_eq!(
            p.constraint.as_ref().unwrap().to_hogql(),
            "e.person_id = p.id"
        );
        let mut cols = subquery_of(&out, "p").output_columns();
        cols.sort();
        assert_eq!(cols, vec!["id", "properties"]);
    }

    #[test]
    fn test_star_expands_root_columns() {
        let q = select_from("events", &[&["*"]], None);
        let out = resolve(&q).unwrap();
        assert_eq!(out.select.len(), 9);
        assert_eq!(out.select[0], field(&["events", "uuid"]));
    }

    #[test]
    fn test_persons_on_events_mode_joins_directly() {
        let ctx = QueryContext::new(1).with_modifiers(Modifiers {
            persons_on_events_mode: PersonsOnEventsMode::PersonIdOnEvents,
            ..Modifiers::default()
        });
        let q = select_from("events", &[&["person", "id"]], None);
        let out = resolve_lazy_tables(&q, &Database::default_schema(), &ctx).unwrap();
        assert_eq!(aliases(&out), vec!["events", "events__event_person"]);
        let join = out.select_from.as_ref().unwrap().find("events__event_person").unwrap();
        assert_eq!(
            join.constraint.as_ref().unwrap().to_hogql(),
            "events.person_id = events__event_person.id"
        );
    }

    #[test]
    fn test_nested_subquery_is_its_own_scope() {
        let inner = select_from("persons", &[&["id"]], None);
        let q = select_from(
            "events",
            &[&["event"]],
            Some(Expr::compare(
                crate::ast::CompareOp::In,
                field(&["person_id"]),
                Expr::subquery(inner),
            )),
        );
        let out = resolve(&q).unwrap();
        assert_eq!(aliases(&out), vec!["events"]);
        let Some(Expr::Compare { right, .. }) = &out.where_ else {
            panic!("expected compare");
        };
        let Expr::Subquery { query, .. } = right.as_ref() else {
            panic!("expected subquery");
        };
        assert!(!query.has_unresolved_tables());
        assert_eq!(query.select[0], field(&["persons", "id"]));
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let q = select_from(
            "events",
            &[&["event"], &["person", "properties", "email"]],
            Some(field_eq(&["person", "properties", "email"], "a@b.c")),
        );
        let once = resolve(&q).unwrap();
        let twice = resolve(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_all_chains_qualified() {
        let q = select_from(
            "events",
            &[&["event"], &["person", "pdi", "distinct_id"]],
            Some(field_eq(&["distinct_id"], "x")),
        );
        let out = resolve(&q).unwrap();
        let known = aliases(&out);
        for e in out.select.iter().chain(out.where_.iter()) {
            for chain in collect_fields(e).chains {
                assert!(known.contains(&chain[0]), "unqualified chain {chain:?}");
            }
        }
    }

    #[test]
    fn test_errors() {
        let q = select_from("nope", &[&["x"]], None);
        assert_eq!(resolve(&q).unwrap_err(), QueryError::UnknownTable("nope".into()));

        let q = select_from("events", &[&["person", "shoe_size"]], None);
        assert_eq!(
            resolve(&q).unwrap_err(),
            QueryError::unknown_field("persons", "shoe_size")
        );

        let q = select_from("events", &[&["pdi"]], None);
        assert!(matches!(resolve(&q), Err(QueryError::ResolutionError(_))));

        let q = SelectQuery::from_table(vec![Expr::int(1)], TableRef::named("persons"));
        assert!(matches!(resolve(&q), Err(QueryError::ResolutionError(_))));
    }

    #[test]
    fn test_duplicate_alias_is_invalid() {
        let mut from = JoinExpr::new(TableRef::named("events")).with_alias("x");
        let mut join = JoinExpr::new(TableRef::named("persons")).with_alias("x");
        join.join_type = Some(JoinType::Inner);
        from.push(join);
        let q = SelectQuery {
            select: vec![field(&["event"])],
            select_from: Some(from),
            ..SelectQuery::default()
        };
        assert!(matches!(resolve(&q), Err(QueryError::InvalidQuery(_))));
    }

    #[test]
    fn test_lazy_join_alias_taken_by_user_link() {
        let mut from = JoinExpr::new(TableRef::named("events"));
        let mut join =
            JoinExpr::new(TableRef::named("person_distinct_ids")).with_alias("events__pdi");
        join.join_type = Some(JoinType::Inner);
        join.constraint = Some(eq(
            field(&["events", "distinct_id"]),
            field(&["events__pdi", "distinct_id"]),
        ));
        from.push(join);
        let mut q = SelectQuery {
            select: vec![field(&["person", "id"])],
            select_from: Some(from),
            ..SelectQuery::default()
        };
        let err = resolve(&q).unwrap_err();
        assert!(matches!(&err, QueryError::InvalidQuery(msg) if msg.contains("events__pdi")));

        // Reading only the user's own link stays valid and repeatable.
        q.select = vec![field(&["events__pdi", "person_id"])];
        let once = resolve(&q).unwrap();
        assert_eq!(aliases(&once), vec!["events", "events__pdi"]);
        assert_eq!(resolve(&once).unwrap(), once);
    }
}
