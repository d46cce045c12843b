//! Persistent store contract consumed by the service layer.
//!
//! Records are JSON objects keyed by an integer `id` that the store assigns
//! on insert. Every operation is atomic at the single-record level. Writes
//! that depend on a prior read (single active sprint, unique and increasing
//! numbers) go through the guarded operations, which run the check and the
//! write as one unit against every connection to the same database, not
//! only those in this process.

pub mod sqlite;

pub use sqlite::SqliteStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, ScrumError};

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Project,
    Epic,
    Task,
    Sprint,
    Document,
    Link,
}

impl Kind {
    pub const ALL: [Kind; 6] = [
        Kind::Project,
        Kind::Epic,
        Kind::Task,
        Kind::Sprint,
        Kind::Document,
        Kind::Link,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Kind::Project => "projects",
            Kind::Epic => "epics",
            Kind::Task => "tasks",
            Kind::Sprint => "sprints",
            Kind::Document => "documents",
            Kind::Link => "entity_document_links",
        }
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Conjunction of top-level field equality predicates. A `null` value
/// matches records where the field is absent or null.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((field.to_string(), value.into()));
        self
    }

    /// Add the predicate only when `value` is present.
    pub fn eq_opt<V: Into<Value>>(self, field: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(field, v),
            None => self,
        }
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }
}

// ---------------------------------------------------------------------------
// Guarded writes
// ---------------------------------------------------------------------------

/// Outcome of a write that is refused when a guard record exists.
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded {
    /// The write happened. Carries the new id for inserts and the number of
    /// changed records for updates.
    Written(i64),
    /// A record matching the guard exists; nothing was written.
    Blocked(Value),
}

/// Outcome of an insert that takes the next value of a per-scope sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequenced {
    Inserted { id: i64, seq: i64 },
    /// The requested value does not exceed the current maximum `max`.
    /// `taken` is set when a record in scope already holds it.
    Stale { max: i64, taken: bool },
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub trait Store: Send + Sync {
    /// Records of `kind` matching `filter`, in insertion order.
    fn query(&self, kind: Kind, filter: &Filter) -> Result<Vec<Value>>;

    fn get(&self, kind: Kind, id: i64) -> Result<Option<Value>>;

    /// Insert `record` and return its assigned id. Ids are never reused.
    fn insert(&self, kind: Kind, record: &Value) -> Result<i64>;

    /// Merge the top-level fields of `partial` into the record. Returns the
    /// number of records changed (0 when `id` does not exist).
    fn update(&self, kind: Kind, id: i64, partial: &Value) -> Result<usize>;

    fn delete(&self, kind: Kind, id: i64) -> Result<usize>;

    /// Insert `record` unless a record of `kind` matches `guard`.
    fn insert_unless(&self, kind: Kind, guard: &Filter, record: &Value) -> Result<Guarded>;

    /// Merge `partial` into record `id` unless some other record of `kind`
    /// matches `guard`.
    fn update_unless(&self, kind: Kind, id: i64, guard: &Filter, partial: &Value)
        -> Result<Guarded>;

    /// Insert `record` with `field` set to `requested`, or to one past the
    /// largest `field` among records matching `scope` when `requested` is
    /// `None`. A requested value must exceed that maximum.
    fn insert_sequenced(
        &self,
        kind: Kind,
        scope: &Filter,
        field: &str,
        requested: Option<i64>,
        record: &Value,
    ) -> Result<Sequenced>;

    /// Cheap liveness probe used by health reporting.
    fn ping(&self) -> Result<()>;
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ScrumError::Storage(format!("encode record: {e}")))
}

pub(crate) fn decode<T: DeserializeOwned>(kind: Kind, record: Value) -> Result<T> {
    serde_json::from_value(record)
        .map_err(|e| ScrumError::Storage(format!("corrupt {} record: {e}", kind.table())))
}
