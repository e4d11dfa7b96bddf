//! Query modifiers and the per-request compilation context.
//!
//! Modifiers are enumerated toggles that change how lazy tables are
//! resolved. They can be built in code, parsed one at a time from strings
//! (`FromStr`), or loaded from a TOML document:
//!
//! ```toml
//! persons_arg_max_version = "v2"
//! optimize_joined_filters = true
//! persons_on_events_mode = "disabled"
//! ```

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which deduplication algorithm builds the `persons` subquery.
///
/// - `"auto"` (default): `v2` when `properties` is read, `v1` otherwise.
/// - `"v1"`: grouped `argMax` per field.
/// - `"v2"`: raw rows filtered by `(id, version) IN (latest versions)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonsArgMaxVersion {
    #[default]
    Auto,
    V1,
    V2,
}

/// How `events.person` reaches the persons table.
///
/// - `"disabled"` (default): through `person_distinct_ids` (`events.pdi.person`).
/// - `"person_id_on_events"`: join persons directly on `events.person_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonsOnEventsMode {
    #[default]
    Disabled,
    PersonIdOnEvents,
}

impl PersonsArgMaxVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonsArgMaxVersion::Auto => "auto",
            PersonsArgMaxVersion::V1 => "v1",
            PersonsArgMaxVersion::V2 => "v2",
        }
    }
}

impl fmt::Display for PersonsArgMaxVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonsArgMaxVersion {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(PersonsArgMaxVersion::Auto),
            "v1" => Ok(PersonsArgMaxVersion::V1),
            "v2" => Ok(PersonsArgMaxVersion::V2),
            other => Err(QueryError::ConfigError(format!(
                "invalid persons_arg_max_version '{other}': expected auto, v1 or v2"
            ))),
        }
    }
}

impl PersonsOnEventsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonsOnEventsMode::Disabled => "disabled",
            PersonsOnEventsMode::PersonIdOnEvents => "person_id_on_events",
        }
    }
}

impl fmt::Display for PersonsOnEventsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonsOnEventsMode {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(PersonsOnEventsMode::Disabled),
            "person_id_on_events" => Ok(PersonsOnEventsMode::PersonIdOnEvents),
            other => Err(QueryError::ConfigError(format!(
                "invalid persons_on_events_mode '{other}': expected disabled or person_id_on_events"
            ))),
        }
    }
}

/// Named toggles consulted by the resolver and the filter pushdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    /// Deduplication algorithm for the persons subquery.
    pub persons_arg_max_version: PersonsArgMaxVersion,
    /// Whether entity-local filters are pushed into joined subqueries.
    pub optimize_joined_filters: bool,
    /// How events reach persons.
    pub persons_on_events_mode: PersonsOnEventsMode,
}

impl Default for Modifiers {
    fn default() -> Self {
        Self {
            persons_arg_max_version: PersonsArgMaxVersion::Auto,
            optimize_joined_filters: true,
            persons_on_events_mode: PersonsOnEventsMode::Disabled,
        }
    }
}

impl Modifiers {
    /// Parse modifiers from a TOML document. Missing keys take defaults.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| QueryError::ConfigError(e.to_string()))
    }

    /// Serialize modifiers back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| QueryError::ConfigError(e.to_string()))
    }
}

/// Per-request compilation context: the tenant and its modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryContext {
    /// Tenant (team) every physical read is restricted to.
    pub team_id: i64,
    pub modifiers: Modifiers,
}

impl QueryContext {
    pub fn new(team_id: i64) -> Self {
        Self {
            team_id,
            modifiers: Modifiers::default(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}
