use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::Value;

pub fn open(db_path: &str) -> Result<Connection> {
    let conn = Connection::open(db_path).with_context(|| format!("opening {db_path}"))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    init(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init(&conn)?;
    Ok(conn)
}

fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
          collection TEXT NOT NULL,
          id TEXT NOT NULL,
          body_json TEXT NOT NULL,
          updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
          PRIMARY KEY (collection, id)
        );
        "#,
    )?;
    Ok(())
}

/// Replace the whole document body, creating it if needed.
pub fn put_document(conn: &Connection, collection: &str, id: &str, body: &Value) -> Result<()> {
    let body_json = serde_json::to_string(body)?;

    conn.execute(
        r#"
        INSERT INTO documents (collection, id, body_json)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(collection, id) DO UPDATE SET
          body_json=excluded.body_json,
          updated_at=strftime('%Y-%m-%dT%H:%M:%fZ','now')
        "#,
        params![collection, id, body_json],
    )?;

    Ok(())
}

pub fn get_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT body_json FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("corrupt document {collection}/{id}"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub fn delete_document(conn: &Connection, collection: &str, id: &str) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
        params![collection, id],
    )?;
    Ok(changed > 0)
}

pub fn list_document_ids(conn: &Connection, collection: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM documents WHERE collection = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;

    let mut ids = Vec::new();
    for r in rows {
        ids.push(r?);
    }
    Ok(ids)
}

/// Read-modify-write of one document inside a transaction. `apply` receives the
/// current body and returns the body to store (`None` leaves it untouched)
/// together with a caller-defined result. The write lock is taken before the
/// read so concurrent writers queue instead of failing on upgrade.
pub fn update_document<T, F>(conn: &Connection, collection: &str, id: &str, apply: F) -> Result<T>
where
    F: FnOnce(Option<Value>) -> Result<(Option<Value>, T)>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let current = get_document(&tx, collection, id)?;
    let (next, out) = apply(current)?;
    if let Some(body) = next {
        put_document(&tx, collection, id, &body)?;
    }
    tx.commit()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn put_replaces_whole_body() {
        let conn = open_in_memory().unwrap();
        put_document(&conn, "bills", "aggregate_1", &json!({"a": 1, "b": 2})).unwrap();
        put_document(&conn, "bills", "aggregate_1", &json!({"a": 3})).unwrap();

        let doc = get_document(&conn, "bills", "aggregate_1").unwrap().unwrap();
        assert_eq!(doc, json!({"a": 3}));
    }

    #[test]
    fn collections_are_separate_namespaces() {
        let conn = open_in_memory().unwrap();
        put_document(&conn, "users", "x", &json!(1)).unwrap();
        assert!(get_document(&conn, "bills", "x").unwrap().is_none());
        assert_eq!(list_document_ids(&conn, "users").unwrap(), vec!["x".to_string()]);
        assert!(delete_document(&conn, "users", "x").unwrap());
        assert!(!delete_document(&conn, "users", "x").unwrap());
    }

    #[test]
    fn failed_update_leaves_document_unchanged() {
        let conn = open_in_memory().unwrap();
        put_document(&conn, "users", "u1", &json!({"n": 1})).unwrap();

        let result: Result<()> = update_document(&conn, "users", "u1", |_| {
            Err(anyhow::anyhow!("boom"))
        });
        assert!(result.is_err());
        assert_eq!(get_document(&conn, "users", "u1").unwrap(), Some(json!({"n": 1})));
    }

    #[test]
    fn update_holds_write_lock_while_reading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docs.db");
        let path = path.to_str().unwrap();
        let conn = open(path).unwrap();
        let other = open(path).unwrap();
        other.busy_timeout(Duration::ZERO).unwrap();

        let mut competing = None;
        update_document(&conn, "users", "u1", |_| {
            competing = Some(put_document(&other, "users", "u2", &json!({"n": 2})));
            Ok((Some(json!({"n": 1})), ()))
        })
        .unwrap();

        assert!(competing.unwrap().is_err());
        assert_eq!(get_document(&other, "users", "u1").unwrap(), Some(json!({"n": 1})));
        assert!(get_document(&other, "users", "u2").unwrap().is_none());
    }
}
