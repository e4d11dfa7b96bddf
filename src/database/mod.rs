//! Schema registry.
//!
//! A [`Database`] maps logical table names to [`TableSchema`]s. Each table
//! either reads a physical relation or is *lazy*: it only becomes a
//! concrete subquery once the resolver knows which of its fields a query
//! reads, through the table's [`LazySelect`] implementation.
//!
//! Table fields are [`FieldOrTable`] entries:
//! - a [`DatabaseField`] is a physical column;
//! - a [`LazyJoin`] is a field that reaches another table through a join
//!   the resolver adds on demand;
//! - a [`FieldTraverser`] is a shortcut to another chain
//!   (`events.person` → `events.pdi.person`).
//!
//! The registry is built once and never mutated afterwards, so it can be
//! shared by concurrent compilations without locking.

pub mod argmax;
pub mod events;
pub mod person_distinct_ids;
pub mod persons;
pub mod persons_pdi;

use crate::ast::{ConstantType, JoinType, SelectQuery};
use crate::config::{Modifiers, PersonsOnEventsMode, QueryContext};
use crate::error::{QueryError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Names of the fields a query reads from one lazy table.
pub type FieldsAccessed = BTreeSet<String>;

/// A physical column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseField {
    pub name: String,
    pub ty: ConstantType,
    pub nullable: bool,
}

impl DatabaseField {
    pub fn new(name: &str, ty: ConstantType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A field that reaches another table through an on-demand join:
/// `<from_alias>.<from_field> = <join_alias>.<to_field>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LazyJoin {
    pub from_field: String,
    pub join_table: String,
    pub to_field: String,
    pub join_type: JoinType,
}

impl LazyJoin {
    pub fn inner(from_field: &str, join_table: &str, to_field: &str) -> Self {
        Self {
            from_field: from_field.to_string(),
            join_table: join_table.to_string(),
            to_field: to_field.to_string(),
            join_type: JoinType::Inner,
        }
    }
}

/// A field that stands for another chain on the same table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTraverser {
    pub chain: Vec<String>,
    /// Replacement chain used when persons-on-events mode is enabled.
    pub persons_on_events_chain: Option<Vec<String>>,
}

impl FieldTraverser {
    pub fn new(chain: &[&str]) -> Self {
        Self {
            chain: chain.iter().map(|s| s.to_string()).collect(),
            persons_on_events_chain: None,
        }
    }

    pub fn with_persons_on_events(mut self, chain: &[&str]) -> Self {
        self.persons_on_events_chain = Some(chain.iter().map(|s| s.to_string()).collect());
        self
    }

    /// The chain to follow under the given modifiers.
    pub fn chain_for(&self, modifiers: &Modifiers) -> &[String] {
        match (&self.persons_on_events_chain, modifiers.persons_on_events_mode) {
            (Some(chain), PersonsOnEventsMode::PersonIdOnEvents) => chain,
            _ => &self.chain,
        }
    }
}

/// One entry of a table's field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOrTable {
    Field(DatabaseField),
    LazyJoin(LazyJoin),
    Traverser(FieldTraverser),
}

/// Turns a lazy table into a concrete subquery for a given set of fields.
///
/// Implemented once per logical table. Implementations must be pure in
/// `(fields, ctx)`: the same request always yields the same subquery.
pub trait LazySelect: Send + Sync + fmt::Debug {
    fn lazy_select(&self, fields: &FieldsAccessed, ctx: &QueryContext) -> Result<SelectQuery>;
}

/// Where a table's rows come from.
#[derive(Debug, Clone)]
pub enum TableSource {
    Physical(String),
    Lazy(Arc<dyn LazySelect>),
}

/// A logical table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub fields: Vec<(String, FieldOrTable)>,
    pub source: TableSource,
    /// Whether entity-local filters may be pushed into this table's
    /// subquery when it is joined.
    pub accepts_filter_pushdown: bool,
}

impl TableSchema {
    pub fn physical(name: &str, physical_name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            source: TableSource::Physical(physical_name.to_string()),
            accepts_filter_pushdown: false,
        }
    }

    pub fn lazy(name: &str, select: Arc<dyn LazySelect>) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            source: TableSource::Lazy(select),
            accepts_filter_pushdown: false,
        }
    }

    pub fn with_field(mut self, name: &str, entry: FieldOrTable) -> Self {
        self.fields.push((name.to_string(), entry));
        self
    }

    pub fn with_column(self, name: &str, ty: ConstantType) -> Self {
        self.with_field(name, FieldOrTable::Field(DatabaseField::new(name, ty)))
    }

    pub fn with_filter_pushdown(mut self) -> Self {
        self.accepts_filter_pushdown = true;
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldOrTable> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Look up a field, failing with `UnknownField`.
    pub fn field(&self, name: &str) -> Result<&FieldOrTable> {
        self.get_field(name)
            .ok_or_else(|| QueryError::unknown_field(&self.name, name))
    }

    /// Names of the physical columns, in declaration order. `*` expands
    /// to these.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|(n, f)| match f {
            FieldOrTable::Field(_) => Some(n.as_str()),
            _ => None,
        })
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.source, TableSource::Lazy(_))
    }

    /// Resolve a lazy table for exactly `fields`.
    pub fn lazy_select(&self, fields: &FieldsAccessed, ctx: &QueryContext) -> Result<SelectQuery> {
        let TableSource::Lazy(select) = &self.source else {
            return Err(QueryError::InternalError(format!(
                "lazy_select called on physical table {}",
                self.name
            )));
        };
        if fields.is_empty() {
            return Err(QueryError::ResolutionError(format!(
                "no fields requested from {}",
                self.name
            )));
        }
        for name in fields {
            self.field(name)?;
        }
        tracing::debug!(
            "[eventql] resolving lazy table {} for fields {:?}",
            self.name,
            fields
        );
        select.lazy_select(fields, ctx)
    }
}

/// The schema registry.
#[derive(Debug, Clone, Default)]
pub struct Database {
    tables: BTreeMap<String, TableSchema>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// The event/person analytics schema.
    pub fn default_schema() -> Self {
        let mut db = Database::new();
        db.add_table(events::events_table());
        db.add_table(person_distinct_ids::person_distinct_ids_table());
        db.add_table(persons::persons_table());
        db.add_table(persons_pdi::persons_pdi_table());
        db
    }

    pub fn add_table(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Look up a table, failing with `UnknownTable`.
    pub fn resolve_table(&self, name: &str) -> Result<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| QueryError::UnknownTable(name.to_string()))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Modifiers;
    use crate::test_helpers::test_ctx;

    fn fields(names: &[&str]) -> FieldsAccessed {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_schema_tables() {
        let db = Database::default_schema();
        let names: Vec<_> = db.table_names().collect();
        assert_eq!(
            names,
            vec!["events", "person_distinct_ids", "persons", "persons_pdi"]
        );
    }

    #[test]
    fn test_resolve_unknown_table() {
        let db = Database::default_schema();
        assert_eq!(
            db.resolve_table("evnts").unwrap_err(),
            QueryError::UnknownTable("evnts".into())
        );
    }

    #[test]
    fn test_unknown_field() {
        let db = Database::default_schema();
        let events = db.resolve_table("events").unwrap();
        assert_eq!(
            events.field("nope").unwrap_err(),
            QueryError::unknown_field("events", "nope")
        );
    }

    #[test]
    fn test_column_names_skip_joins_and_traversers() {
        let db = Database::default_schema();
        let events = db.resolve_table("events").unwrap();
        let cols: Vec<_> = events.column_names().collect();
        assert!(cols.contains(&"event"));
        assert!(!cols.contains(&"pdi"));
        assert!(!cols.contains(&"person"));
    }

    #[test]
    fn test_lazy_select_requires_fields() {
        let db = Database::default_schema();
        let persons = db.resolve_table("persons").unwrap();
        let err = persons.lazy_select(&fields(&[]), &test_ctx()).unwrap_err();
        assert!(matches!(err, QueryError::ResolutionError(_)));
    }

    #[test]
    fn test_lazy_select_rejects_unknown_fields() {
        let db = Database::default_schema();
        let persons = db.resolve_table("persons").unwrap();
        let err = persons
            .lazy_select(&fields(&["shoe_size"]), &test_ctx())
            .unwrap_err();
        assert_eq!(err, QueryError::unknown_field("persons", "shoe_size"));
    }

    #[test]
    fn test_lazy_select_on_physical_table_is_internal_error() {
        let db = Database::default_schema();
        let events = db.resolve_table("events").unwrap();
        let err = events
            .lazy_select(&fields(&["event"]), &test_ctx())
            .unwrap_err();
        assert!(matches!(err, QueryError::InternalError(_)));
    }

    #[test]
    fn test_traverser_chain_follows_mode() {
        let t = FieldTraverser::new(&["pdi", "person"]).with_persons_on_events(&["event_person"]);
        let disabled = Modifiers::default();
        let on_events = Modifiers {
            persons_on_events_mode: PersonsOnEventsMode::PersonIdOnEvents,
            ..Modifiers::default()
        };
        assert_eq!(t.chain_for(&disabled), ["pdi", "person"]);
        assert_eq!(t.chain_for(&on_events), ["event_person"]);
    }

    #[test]
    fn test_registry_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Database>();

        let db = Arc::new(Database::default_schema());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || db.resolve_table("persons").map(|t| t.is_lazy()))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), Ok(true));
        }
    }
}
