//! SQLite-backed [`Store`].
//!
//! Each [`Kind`] gets its own table of `(id INTEGER PRIMARY KEY AUTOINCREMENT,
//! data TEXT)`, where `data` is the JSON record without its id. Predicates are
//! evaluated with `json_extract`, partial updates with `json_patch`. Plain
//! operations are single statements; guarded ones run their check and write
//! in a `BEGIN IMMEDIATE` transaction, which takes the database write lock up
//! front and so serializes them against other processes using the same file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use super::{Filter, Guarded, Kind, Sequenced, Store};
use crate::error::{Result, ScrumError};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file at `path`, creating parent
    /// directories and tables as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;\nPRAGMA synchronous=NORMAL;")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        for kind in Kind::ALL {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    data TEXT NOT NULL
                );",
                kind.table()
            ))?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ScrumError::Storage("connection lock poisoned".into()))
    }
}

impl Store for SqliteStore {
    fn query(&self, kind: Kind, filter: &Filter) -> Result<Vec<Value>> {
        let conn = self.conn()?;
        select(&conn, kind, filter, None)
    }

    fn get(&self, kind: Kind, id: i64) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row(
                &format!("SELECT data FROM {} WHERE id = ?1", kind.table()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| with_id(kind, id, &d)).transpose()
    }

    fn insert(&self, kind: Kind, record: &Value) -> Result<i64> {
        let data = without_id(record)?;
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO {} (data) VALUES (?1)", kind.table()),
            params![data],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update(&self, kind: Kind, id: i64, partial: &Value) -> Result<usize> {
        let patch = without_id(partial)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET data = json_patch(data, ?1) WHERE id = ?2",
                kind.table()
            ),
            params![patch, id],
        )?;
        Ok(changed)
    }

    fn delete(&self, kind: Kind, id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
            params![id],
        )?;
        Ok(changed)
    }

    fn insert_unless(&self, kind: Kind, guard: &Filter, record: &Value) -> Result<Guarded> {
        let data = without_id(record)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(existing) = select(&tx, kind, guard, Some(1))?.into_iter().next() {
            return Ok(Guarded::Blocked(existing));
        }
        tx.execute(
            &format!("INSERT INTO {} (data) VALUES (?1)", kind.table()),
            params![data],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Guarded::Written(id))
    }

    fn update_unless(
        &self,
        kind: Kind,
        id: i64,
        guard: &Filter,
        partial: &Value,
    ) -> Result<Guarded> {
        let patch = without_id(partial)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let blocker = select(&tx, kind, guard, None)?
            .into_iter()
            .find(|r| r["id"].as_i64() != Some(id));
        if let Some(existing) = blocker {
            return Ok(Guarded::Blocked(existing));
        }
        let changed = tx.execute(
            &format!(
                "UPDATE {} SET data = json_patch(data, ?1) WHERE id = ?2",
                kind.table()
            ),
            params![patch, id],
        )?;
        tx.commit()?;
        Ok(Guarded::Written(changed as i64))
    }

    fn insert_sequenced(
        &self,
        kind: Kind,
        scope: &Filter,
        field: &str,
        requested: Option<i64>,
        record: &Value,
    ) -> Result<Sequenced> {
        let path = json_path(field)?;
        let mut obj = record
            .as_object()
            .cloned()
            .ok_or_else(|| ScrumError::Storage("record must be a JSON object".into()))?;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (clause, binds) = where_clause(scope)?;
        let max: Option<i64> = tx.query_row(
            &format!(
                "SELECT MAX(json_extract(data, '{path}')) FROM {}{clause}",
                kind.table()
            ),
            params_from_iter(binds.iter()),
            |row| row.get(0),
        )?;
        let max = max.unwrap_or(0);

        let seq = match requested {
            Some(n) if n <= max => {
                let taken = !select(&tx, kind, &scope.clone().eq(field, n), Some(1))?.is_empty();
                return Ok(Sequenced::Stale { max, taken });
            }
            Some(n) => n,
            None => max + 1,
        };
        obj.insert(field.to_string(), Value::from(seq));
        let data = without_id(&Value::Object(obj))?;
        tx.execute(
            &format!("INSERT INTO {} (data) VALUES (?1)", kind.table()),
            params![data],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Sequenced::Inserted { id, seq })
    }

    fn ping(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Records of `kind` matching `filter` in id order, read through `conn`,
/// which may be an open transaction.
fn select(
    conn: &Connection,
    kind: Kind,
    filter: &Filter,
    limit: Option<usize>,
) -> Result<Vec<Value>> {
    let (clause, binds) = where_clause(filter)?;
    let mut sql = format!("SELECT id, data FROM {}{clause} ORDER BY id", kind.table());
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {n}"));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(binds.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, data) = row?;
        out.push(with_id(kind, id, &data)?);
    }
    Ok(out)
}

fn where_clause(filter: &Filter) -> Result<(String, Vec<SqlValue>)> {
    let mut sql = String::new();
    let mut binds: Vec<SqlValue> = Vec::new();
    for (i, (field, value)) in filter.conditions().iter().enumerate() {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        let path = json_path(field)?;
        match value {
            Value::Null => {
                sql.push_str(&format!("json_extract(data, '{path}') IS NULL"));
            }
            other => {
                binds.push(to_sql(field, other)?);
                sql.push_str(&format!("json_extract(data, '{path}') = ?{}", binds.len()));
            }
        }
    }
    Ok((sql, binds))
}

/// Field names are interpolated into the JSON path, so only identifiers are
/// accepted.
fn json_path(field: &str) -> Result<String> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ScrumError::invalid("filter", format!("bad field name '{field}'")));
    }
    Ok(format!("$.{field}"))
}

fn to_sql(field: &str, value: &Value) -> Result<SqlValue> {
    match value {
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(SqlValue::Integer(i)),
            None => Ok(SqlValue::Real(n.as_f64().unwrap_or_default())),
        },
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(ScrumError::invalid(
            "filter",
            format!("unsupported value for '{field}'"),
        )),
    }
}

fn with_id(kind: Kind, id: i64, data: &str) -> Result<Value> {
    let mut value: Value = serde_json::from_str(data)
        .map_err(|e| ScrumError::Storage(format!("corrupt {} row {id}: {e}", kind.table())))?;
    match value.as_object_mut() {
        Some(obj) => {
            obj.insert("id".into(), Value::from(id));
            Ok(value)
        }
        None => Err(ScrumError::Storage(format!(
            "corrupt {} row {id}: not an object",
            kind.table()
        ))),
    }
}

fn without_id(record: &Value) -> Result<String> {
    let mut obj = record
        .as_object()
        .cloned()
        .ok_or_else(|| ScrumError::Storage("record must be a JSON object".into()))?;
    obj.remove("id");
    serde_json::to_string(&obj).map_err(|e| ScrumError::Storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn insert_get_roundtrip_injects_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .insert(Kind::Epic, &json!({"epic_num": 1, "title": "Auth"}))
            .unwrap();
        let rec = store.get(Kind::Epic, id).unwrap().unwrap();
        assert_eq!(rec["id"], id);
        assert_eq!(rec["title"], "Auth");
        assert!(store.get(Kind::Epic, id + 100).unwrap().is_none());
    }

    #[test]
    fn query_filters_by_field_equality() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert(Kind::Task, &json!({"epic_num": 1, "status": "TODO"}))
            .unwrap();
        store
            .insert(Kind::Task, &json!({"epic_num": 1, "status": "DONE"}))
            .unwrap();
        store
            .insert(Kind::Task, &json!({"epic_num": 2, "status": "TODO"}))
            .unwrap();

        let rows = store
            .query(Kind::Task, &Filter::all().eq("epic_num", 1).eq("status", "TODO"))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(store.query(Kind::Task, &Filter::all()).unwrap().len(), 3);
    }

    #[test]
    fn null_filter_matches_absent_and_null_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(Kind::Link, &json!({"section": null})).unwrap();
        store.insert(Kind::Link, &json!({})).unwrap();
        store.insert(Kind::Link, &json!({"section": "auth"})).unwrap();
        let rows = store
            .query(Kind::Link, &Filter::all().eq("section", Value::Null))
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn update_merges_fields_and_reports_changes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .insert(Kind::Sprint, &json!({"name": "S1", "status": "ACTIVE"}))
            .unwrap();
        let n = store
            .update(Kind::Sprint, id, &json!({"status": "COMPLETED", "id": 999}))
            .unwrap();
        assert_eq!(n, 1);
        let rec = store.get(Kind::Sprint, id).unwrap().unwrap();
        assert_eq!(rec["name"], "S1");
        assert_eq!(rec["status"], "COMPLETED");
        assert_eq!(rec["id"], id);
        assert_eq!(store.update(Kind::Sprint, 42, &json!({"x": 1})).unwrap(), 0);
    }

    #[test]
    fn deleted_ids_are_not_reused() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.insert(Kind::Task, &json!({"t": 1})).unwrap();
        assert_eq!(store.delete(Kind::Task, a).unwrap(), 1);
        let b = store.insert(Kind::Task, &json!({"t": 2})).unwrap();
        assert!(b > a);
    }

    #[test]
    fn rejects_unsafe_field_names() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .query(Kind::Task, &Filter::all().eq("x') OR 1=1 --", 1))
            .unwrap_err();
        assert!(matches!(err, ScrumError::Invalid { .. }));
    }

    #[test]
    fn insert_unless_refuses_when_guard_matches() {
        let store = SqliteStore::open_in_memory().unwrap();
        let active = Filter::all().eq("status", "ACTIVE");
        let first = store
            .insert_unless(Kind::Sprint, &active, &json!({"name": "S1", "status": "ACTIVE"}))
            .unwrap();
        let Guarded::Written(id) = first else {
            panic!("first insert blocked: {first:?}");
        };
        match store
            .insert_unless(Kind::Sprint, &active, &json!({"name": "S2", "status": "ACTIVE"}))
            .unwrap()
        {
            Guarded::Blocked(existing) => assert_eq!(existing["id"], id),
            other => panic!("expected block, got {other:?}"),
        }
        assert_eq!(store.query(Kind::Sprint, &Filter::all()).unwrap().len(), 1);
    }

    #[test]
    fn update_unless_ignores_the_target_itself() {
        let store = SqliteStore::open_in_memory().unwrap();
        let active = Filter::all().eq("status", "ACTIVE");
        let a = store.insert(Kind::Sprint, &json!({"status": "ACTIVE"})).unwrap();
        let b = store.insert(Kind::Sprint, &json!({"status": "PLANNING"})).unwrap();

        let patch = json!({"status": "ACTIVE"});
        assert_eq!(
            store.update_unless(Kind::Sprint, a, &active, &patch).unwrap(),
            Guarded::Written(1)
        );
        assert!(matches!(
            store.update_unless(Kind::Sprint, b, &active, &patch).unwrap(),
            Guarded::Blocked(_)
        ));
        let rec = store.get(Kind::Sprint, b).unwrap().unwrap();
        assert_eq!(rec["status"], "PLANNING");
    }

    #[test]
    fn insert_sequenced_numbers_within_scope() {
        let store = SqliteStore::open_in_memory().unwrap();
        let epic = |n: i64| Filter::all().eq("epic_num", n);
        let seq = |scope: &Filter, requested| {
            store
                .insert_sequenced(Kind::Task, scope, "story_num", requested, &json!({"epic_num": 1}))
                .unwrap()
        };
        assert!(matches!(seq(&epic(1), None), Sequenced::Inserted { seq: 1, .. }));
        assert!(matches!(seq(&epic(1), Some(5)), Sequenced::Inserted { seq: 5, .. }));
        assert_eq!(seq(&epic(1), Some(5)), Sequenced::Stale { max: 5, taken: true });
        assert_eq!(seq(&epic(1), Some(3)), Sequenced::Stale { max: 5, taken: false });
        assert!(matches!(seq(&epic(1), None), Sequenced::Inserted { seq: 6, .. }));
        // Scope 2 has no records, so its sequence starts over.
        assert!(matches!(seq(&epic(2), None), Sequenced::Inserted { seq: 1, .. }));
    }

    #[test]
    fn guarded_inserts_hold_across_connections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scrum.db");
        let stores: Vec<_> = (0..4)
            .map(|_| std::sync::Arc::new(SqliteStore::open(&path).unwrap()))
            .collect();
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(stores.len()));
        let handles: Vec<_> = stores
            .iter()
            .map(|store| {
                let store = std::sync::Arc::clone(store);
                let barrier = std::sync::Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let mut written = 0;
                    for _ in 0..10 {
                        let outcome = store
                            .insert_unless(
                                Kind::Sprint,
                                &Filter::all().eq("status", "ACTIVE"),
                                &json!({"status": "ACTIVE"}),
                            )
                            .unwrap();
                        if matches!(outcome, Guarded::Written(_)) {
                            written += 1;
                        }
                    }
                    written
                })
            })
            .collect();
        let written: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(written, 1);
        assert_eq!(stores[0].query(Kind::Sprint, &Filter::all()).unwrap().len(), 1);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/scrum.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert(Kind::Project, &json!({"name": "p"})).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let rows = store.query(Kind::Project, &Filter::all()).unwrap();
        assert_eq!(rows.len(), 1);
        store.ping().unwrap();
    }
}
