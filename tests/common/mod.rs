//! Shared builders for integration tests.

#![allow(dead_code)]

use eventql::ast::visitor::{CloneOptions, clone_expr, remove_hidden_aliases};
use eventql::ast::{CompareOp, Expr, JoinExpr, SelectQuery, TableRef};
use eventql::config::{Modifiers, PersonsArgMaxVersion, PersonsOnEventsMode, QueryContext};

pub const TEAM_ID: i64 = 7;

/// Route `tracing` output to the test harness. Filter with `RUST_LOG`,
/// e.g. `RUST_LOG=eventql=trace`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn field(chain: &[&str]) -> Expr {
    Expr::field(chain)
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    Expr::compare(CompareOp::Eq, left, right)
}

pub fn person_email(value: &str) -> Expr {
    eq(field(&["person", "properties", "email"]), Expr::string(value))
}

pub fn event_email(value: &str) -> Expr {
    eq(field(&["properties", "email"]), Expr::string(value))
}

pub fn pageview() -> Expr {
    eq(field(&["event"]), Expr::string("$pageview"))
}

/// `properties.email = '<value>'` as it reads inside the persons subquery.
pub fn stripped_email(value: &str) -> Expr {
    eq(field(&["properties", "email"]), Expr::string(value))
}

/// `SELECT * FROM events [WHERE <filter>]`.
pub fn select_events(filter: Option<Expr>) -> SelectQuery {
    SelectQuery {
        where_: filter,
        ..SelectQuery::from_table(vec![field(&["*"])], TableRef::named("events"))
    }
}

pub fn select_events_fields(fields: &[&[&str]], filter: Option<Expr>) -> SelectQuery {
    SelectQuery {
        where_: filter,
        ..SelectQuery::from_table(
            fields.iter().map(|c| field(c)).collect(),
            TableRef::named("events"),
        )
    }
}

/// Context with pushdown on, persons through distinct ids, v1 dedup.
pub fn pushdown_ctx() -> QueryContext {
    init_tracing();
    QueryContext::new(TEAM_ID).with_modifiers(Modifiers {
        persons_arg_max_version: PersonsArgMaxVersion::V1,
        optimize_joined_filters: true,
        persons_on_events_mode: PersonsOnEventsMode::Disabled,
    })
}

pub fn join<'q>(query: &'q SelectQuery, alias: &str) -> &'q JoinExpr {
    query
        .select_from
        .as_ref()
        .and_then(|f| f.find(alias))
        .unwrap_or_else(|| panic!("no join {alias} in {}", query.to_hogql()))
}

pub fn subquery<'q>(query: &'q SelectQuery, alias: &str) -> &'q SelectQuery {
    match &join(query, alias).table {
        Some(TableRef::Subquery { query }) => query,
        other => panic!("join {alias} is not a subquery: {other:?}"),
    }
}

/// Compare two expressions ignoring metadata and hidden aliases.
pub fn bare(expr: &Expr) -> Expr {
    clone_expr(&remove_hidden_aliases(expr), CloneOptions::bare())
}
