//! `persons_pdi`: the distinct ids of a person, joined from `persons.pdi`.

use super::person_distinct_ids::{RAW_TABLE, select_distinct_id_mapping};
use super::{FieldsAccessed, LazySelect, TableSchema};
use crate::ast::{ConstantType, SelectQuery};
use crate::config::QueryContext;
use crate::error::Result;
use std::sync::Arc;

#[derive(Debug)]
pub struct PersonsPdiSelect;

impl LazySelect for PersonsPdiSelect {
    fn lazy_select(&self, fields: &FieldsAccessed, ctx: &QueryContext) -> Result<SelectQuery> {
        select_distinct_id_mapping(RAW_TABLE, fields, ctx)
    }
}

pub fn persons_pdi_table() -> TableSchema {
    TableSchema::lazy("persons_pdi", Arc::new(PersonsPdiSelect))
        .with_column("team_id", ConstantType::Integer)
        .with_column("distinct_id", ConstantType::String)
        .with_column("person_id", ConstantType::String)
}
