//! `persons`: the latest live version of every person.
//!
//! Backed by the `raw_persons` change log keyed by `id`. The dedup
//! algorithm follows the `persons_arg_max_version` modifier. Persons whose
//! latest `created_at` lies more than a day in the future are dropped.
//!
//! This table accepts pushed-down filters: when joined, conditions that
//! only read person columns can be applied inside its subquery.

use super::argmax::{ArgMaxSelect, argmax_in_select, argmax_select};
use super::{FieldOrTable, FieldsAccessed, LazyJoin, LazySelect, TableSchema};
use crate::ast::{ConstantType, SelectQuery};
use crate::config::{PersonsArgMaxVersion, QueryContext};
use crate::error::Result;
use std::sync::Arc;

pub const RAW_TABLE: &str = "raw_persons";

#[derive(Debug)]
pub struct PersonsSelect;

impl PersonsSelect {
    /// Resolve `Auto` against the requested fields.
    pub fn effective_version(fields: &FieldsAccessed, ctx: &QueryContext) -> PersonsArgMaxVersion {
        match ctx.modifiers.persons_arg_max_version {
            PersonsArgMaxVersion::Auto if fields.contains("properties") => PersonsArgMaxVersion::V2,
            PersonsArgMaxVersion::Auto => PersonsArgMaxVersion::V1,
            explicit => explicit,
        }
    }
}

impl LazySelect for PersonsSelect {
    fn lazy_select(&self, fields: &FieldsAccessed, ctx: &QueryContext) -> Result<SelectQuery> {
        let spec = ArgMaxSelect {
            table_name: RAW_TABLE,
            select_fields: fields,
            group_fields: &["id"],
            argmax_field: "version",
            deleted_field: Some("is_deleted"),
            team_id: Some(ctx.team_id),
            timestamp_field_to_clamp: Some("created_at"),
        };
        match Self::effective_version(fields, ctx) {
            PersonsArgMaxVersion::V2 => argmax_in_select(&spec),
            _ => argmax_select(&spec),
        }
    }
}

pub fn persons_table() -> TableSchema {
    TableSchema::lazy("persons", Arc::new(PersonsSelect))
        .with_column("id", ConstantType::String)
        .with_column("created_at", ConstantType::DateTime)
        .with_column("team_id", ConstantType::Integer)
        .with_column("properties", ConstantType::Json)
        .with_column("is_identified", ConstantType::Boolean)
        .with_field(
            "pdi",
            FieldOrTable::LazyJoin(LazyJoin::inner("id", "persons_pdi", "person_id")),
        )
        .with_filter_pushdown()
}
