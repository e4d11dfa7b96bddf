//! `person_distinct_ids`: the latest person each distinct id maps to.
//!
//! Backed by `raw_person_distinct_ids`, a change log keyed by
//! `distinct_id`. Reassigning a distinct id to another person writes a new
//! row with a higher version.

use super::argmax::{ArgMaxSelect, argmax_select};
use super::{FieldOrTable, FieldsAccessed, LazyJoin, LazySelect, TableSchema};
use crate::ast::{ConstantType, SelectQuery};
use crate::config::QueryContext;
use crate::error::Result;
use std::sync::Arc;

pub const RAW_TABLE: &str = "raw_person_distinct_ids";

/// Deduplicated distinct id → person mapping for a change-log table keyed by
/// `distinct_id`. `person_id` is always selected since every consumer joins
/// on it.
pub(crate) fn select_distinct_id_mapping(
    table_name: &str,
    fields: &FieldsAccessed,
    ctx: &QueryContext,
) -> Result<SelectQuery> {
    let mut requested = fields.clone();
    requested.insert("person_id".to_string());
    argmax_select(&ArgMaxSelect {
        table_name,
        select_fields: &requested,
        group_fields: &["distinct_id"],
        argmax_field: "version",
        deleted_field: Some("is_deleted"),
        team_id: Some(ctx.team_id),
        timestamp_field_to_clamp: None,
    })
}

#[derive(Debug)]
pub struct PersonDistinctIdsSelect;

impl LazySelect for PersonDistinctIdsSelect {
    fn lazy_select(&self, fields: &FieldsAccessed, ctx: &QueryContext) -> Result<SelectQuery> {
        select_distinct_id_mapping(RAW_TABLE, fields, ctx)
    }
}

pub fn person_distinct_ids_table() -> TableSchema {
    TableSchema::lazy("person_distinct_ids", Arc::new(PersonDistinctIdsSelect))
        .with_column("team_id", ConstantType::Integer)
        .with_column("distinct_id", ConstantType::String)
        .with_column("person_id", ConstantType::String)
        .with_field(
            "person",
            FieldOrTable::LazyJoin(LazyJoin::inner("person_id", "persons", "id")),
        )
}
