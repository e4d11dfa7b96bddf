//! Shared test helpers for unit tests.
//!
//! Provides short builders for expressions and queries plus a default
//! context. All helpers are `#[cfg(test)]`.

use crate::ast::{CompareOp, Expr, SelectQuery, TableRef};
use crate::config::{Modifiers, PersonsArgMaxVersion, QueryContext};

// ── Expression builders ─────────────────────────────────────────────────

/// Build a field reference from string segments.
pub fn field(chain: &[&str]) -> Expr {
    Expr::field(chain)
}

/// Build `left = right`.
pub fn eq(left: Expr, right: Expr) -> Expr {
    Expr::compare(CompareOp::Eq, left, right)
}

/// Build `field = 'value'`.
pub fn field_eq(chain: &[&str], value: &str) -> Expr {
    eq(field(chain), Expr::string(value))
}

// ── Query builders ──────────────────────────────────────────────────────

/// `SELECT <fields> FROM <table> [WHERE <where>]` with an unresolved table.
pub fn select_from(table: &str, fields: &[&[&str]], where_: Option<Expr>) -> SelectQuery {
    SelectQuery {
        where_,
        ..SelectQuery::from_table(
            fields.iter().map(|c| field(c)).collect(),
            TableRef::named(table),
        )
    }
}

// ── Context builders ────────────────────────────────────────────────────

/// Context for team 1 with default modifiers.
pub fn test_ctx() -> QueryContext {
    QueryContext::new(1)
}

/// Context for team 1 with a fixed persons dedup version.
pub fn test_ctx_with_version(version: PersonsArgMaxVersion) -> QueryContext {
    QueryContext::new(1).with_modifiers(Modifiers {
        persons_arg_max_version: version,
        ..Modifiers::default()
    })
}

/// Assert that rendered text contains a fragment, with a readable message.
pub fn assert_hogql_contains(hogql: &str, fragment: &str) {
    assert!(
        hogql.contains(fragment),
        "expected to find `{fragment}` in:\n{hogql}"
    );
}
