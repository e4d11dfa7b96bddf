//! "Latest version wins" deduplication over change-log tables.
//!
//! Versioned sources (`raw_persons`, `raw_person_distinct_ids`, …) store
//! every version of an entity as a separate row with a monotonically
//! increasing version column and a soft-delete flag. The builders here turn
//! such a table into a subquery with exactly one row per live entity: the
//! row holding the highest version, dropped entirely when that row is
//! marked deleted.
//!
//! Two algorithms produce the same rows:
//!
//! - **v1** ([`argmax_select`]) groups by the key and reads every requested
//!   column with `argMax(column, version)`, so all values come from the
//!   same winning row.
//! - **v2** ([`argmax_in_select`]) reads raw rows whose `(key, version)`
//!   pair is in the set of latest live versions. Cheaper when wide columns
//!   such as `properties` are read.

use crate::ast::{CompareOp, Expr, JoinExpr, SelectQuery, TableRef};
use crate::database::FieldsAccessed;
use crate::error::{QueryError, Result};

/// Description of one deduplicated read.
#[derive(Debug, Clone)]
pub struct ArgMaxSelect<'a> {
    /// Physical change-log table.
    pub table_name: &'a str,
    /// Requested output fields.
    pub select_fields: &'a FieldsAccessed,
    /// Entity key. Always selected.
    pub group_fields: &'a [&'a str],
    /// Version column.
    pub argmax_field: &'a str,
    /// Soft-delete flag column.
    pub deleted_field: Option<&'a str>,
    /// Restrict raw rows to this tenant.
    pub team_id: Option<i64>,
    /// Drop entities whose winning row claims to be created more than a
    /// day in the future.
    pub timestamp_field_to_clamp: Option<&'a str>,
}

impl ArgMaxSelect<'_> {
    fn column(&self, name: &str) -> Expr {
        Expr::field(&[self.table_name, name])
    }

    fn argmax_version(&self, expr: Expr) -> Expr {
        Expr::call("argMax", vec![expr, self.column(self.argmax_field)])
    }

    fn check_requested(&self) -> Result<()> {
        if self.select_fields.is_empty() {
            return Err(QueryError::ResolutionError(format!(
                "no fields requested from {}",
                self.table_name
            )));
        }
        Ok(())
    }

    fn team_filter(&self) -> Option<Expr> {
        self.team_id
            .map(|team_id| Expr::eq(self.column("team_id"), Expr::int(team_id)))
    }

    /// `argMax(deleted, version) = 0 [AND argMax(ts, version) < now() + 1 day]`
    fn having(&self) -> Option<Expr> {
        let mut conditions = Vec::new();
        if let Some(deleted) = self.deleted_field {
            conditions.push(Expr::eq(
                self.argmax_version(self.column(deleted)),
                Expr::int(0),
            ));
        }
        if let Some(ts) = self.timestamp_field_to_clamp {
            conditions.push(Expr::compare(
                CompareOp::Lt,
                self.argmax_version(self.column(ts)),
                Expr::call(
                    "plus",
                    vec![
                        Expr::call("now", vec![]),
                        Expr::call("toIntervalDay", vec![Expr::int(1)]),
                    ],
                ),
            ));
        }
        match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => Some(Expr::and(conditions)),
        }
    }

    fn group_by(&self) -> Vec<Expr> {
        self.group_fields.iter().map(|k| self.column(k)).collect()
    }

    fn is_group_field(&self, name: &str) -> bool {
        self.group_fields.contains(&name)
    }
}

/// Build the v1 grouped-argMax subquery.
///
/// ```text
/// SELECT argMax(t.f, t.version) AS f, …, t.key AS key
/// FROM t
/// WHERE t.team_id = <team>
/// GROUP BY t.key
/// HAVING argMax(t.is_deleted, t.version) = 0
/// ```
pub fn argmax_select(spec: &ArgMaxSelect<'_>) -> Result<SelectQuery> {
    spec.check_requested()?;

    let mut select = Vec::new();
    for name in spec.select_fields {
        if !spec.is_group_field(name) {
            select.push(Expr::alias(name, spec.argmax_version(spec.column(name))));
        }
    }
    for key in spec.group_fields {
        select.push(Expr::alias(key, spec.column(key)));
    }

    tracing::trace!(
        "[eventql] argmax v1 over {} ({} columns)",
        spec.table_name,
        select.len()
    );

    Ok(SelectQuery {
        select,
        select_from: Some(JoinExpr::new(TableRef::physical(spec.table_name))),
        where_: spec.team_filter(),
        group_by: spec.group_by(),
        having: spec.having(),
        ..SelectQuery::default()
    })
}

/// Build the v2 latest-version subquery.
///
/// ```text
/// SELECT t.f AS f, …, t.key AS key
/// FROM t
/// WHERE t.team_id = <team>
///   AND tuple(t.key, t.version) IN (
///     SELECT t.key AS key, max(t.version) AS version
///     FROM t WHERE t.team_id = <team>
///     GROUP BY t.key
///     HAVING argMax(t.is_deleted, t.version) = 0)
/// ```
pub fn argmax_in_select(spec: &ArgMaxSelect<'_>) -> Result<SelectQuery> {
    spec.check_requested()?;

    let mut latest_select: Vec<Expr> = spec
        .group_fields
        .iter()
        .map(|k| Expr::alias(k, spec.column(k)))
        .collect();
    latest_select.push(Expr::alias(
        spec.argmax_field,
        Expr::call("max", vec![spec.column(spec.argmax_field)]),
    ));
    let latest = SelectQuery {
        select: latest_select,
        select_from: Some(JoinExpr::new(TableRef::physical(spec.table_name))),
        where_: spec.team_filter(),
        group_by: spec.group_by(),
        having: spec.having(),
        ..SelectQuery::default()
    };

    let mut key_tuple: Vec<Expr> = spec.group_fields.iter().map(|k| spec.column(k)).collect();
    key_tuple.push(spec.column(spec.argmax_field));
    let in_latest = Expr::compare(
        CompareOp::In,
        Expr::call("tuple", key_tuple),
        Expr::subquery(latest),
    );
    let where_ = match spec.team_filter() {
        Some(team) => Expr::and(vec![team, in_latest]),
        None => in_latest,
    };

    let mut select = Vec::new();
    for name in spec.select_fields {
        if !spec.is_group_field(name) {
            select.push(Expr::alias(name, spec.column(name)));
        }
    }
    for key in spec.group_fields {
        select.push(Expr::alias(key, spec.column(key)));
    }

    tracing::trace!(
        "[eventql] argmax v2 over {} ({} columns)",
        spec.table_name,
        select.len()
    );

    Ok(SelectQuery {
        select,
        select_from: Some(JoinExpr::new(TableRef::physical(spec.table_name))),
        where_: Some(where_),
        ..SelectQuery::default()
    })
}
