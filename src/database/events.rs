//! `events`: the physical events table and its person links.

use super::{FieldOrTable, FieldTraverser, LazyJoin, TableSchema};
use crate::ast::ConstantType;

pub fn events_table() -> TableSchema {
    TableSchema::physical("events", "events")
        .with_column("uuid", ConstantType::String)
        .with_column("event", ConstantType::String)
        .with_column("properties", ConstantType::Json)
        .with_column("timestamp", ConstantType::DateTime)
        .with_column("team_id", ConstantType::Integer)
        .with_column("distinct_id", ConstantType::String)
        .with_column("elements_chain", ConstantType::String)
        .with_column("created_at", ConstantType::DateTime)
        .with_column("person_id", ConstantType::String)
        .with_field(
            "pdi",
            FieldOrTable::LazyJoin(LazyJoin::inner(
                "distinct_id",
                "person_distinct_ids",
                "distinct_id",
            )),
        )
        .with_field(
            "event_person",
            FieldOrTable::LazyJoin(LazyJoin::inner("person_id", "persons", "id")),
        )
        .with_field(
            "person",
            FieldOrTable::Traverser(
                FieldTraverser::new(&["pdi", "person"]).with_persons_on_events(&["event_person"]),
            ),
        )
}
