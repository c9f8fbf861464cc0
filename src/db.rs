use crate::structure::StructureTree;
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

pub const DB_FILE: &str = "form137.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    // Single row: the whole tree is one JSON document.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS structure(
            id INTEGER PRIMARY KEY CHECK (id = 1),
            tree_json TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS records(
            id TEXT PRIMARY KEY,
            record_json TEXT NOT NULL
        )",
        [],
    )?;
    ensure_records_lrn(conn)?;
    ensure_records_updated_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_lrn ON records(lrn)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    let has_tree: Option<i64> = conn
        .query_row("SELECT id FROM structure WHERE id = 1", [], |r| r.get(0))
        .optional()?;
    if has_tree.is_none() {
        save_structure(conn, &StructureTree::seeded().to_value())?;
    }
    Ok(())
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn lrn_of(record: &Value) -> String {
    record
        .get("info")
        .and_then(|i| i.get("lrn"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

pub fn load_structure(conn: &Connection) -> anyhow::Result<Value> {
    let text: String = conn
        .query_row("SELECT tree_json FROM structure WHERE id = 1", [], |r| {
            r.get(0)
        })
        .context("structure row missing")?;
    serde_json::from_str(&text).context("stored structure is not valid JSON")
}

pub fn save_structure(conn: &Connection, tree: &Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO structure(id, tree_json, updated_at) VALUES(1, ?, ?)
         ON CONFLICT(id) DO UPDATE SET tree_json = excluded.tree_json, updated_at = excluded.updated_at",
        (serde_json::to_string(tree)?, now_ts()),
    )?;
    Ok(())
}

pub fn get_record(conn: &Connection, id: &str) -> anyhow::Result<Option<Value>> {
    let text: Option<String> = conn
        .query_row(
            "SELECT record_json FROM records WHERE id = ?",
            [id],
            |r| r.get(0),
        )
        .optional()?;
    text.map(|t| serde_json::from_str(&t).with_context(|| format!("record {id} is not valid JSON")))
        .transpose()
}

pub fn put_record(conn: &Connection, id: &str, record: &Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO records(id, lrn, record_json, updated_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           lrn = excluded.lrn,
           record_json = excluded.record_json,
           updated_at = excluded.updated_at",
        (id, lrn_of(record), serde_json::to_string(record)?, now_ts()),
    )?;
    Ok(())
}

pub fn delete_record(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM records WHERE id = ?", [id])?;
    Ok(n > 0)
}

/// All records in insertion order.
pub fn list_records(conn: &Connection) -> anyhow::Result<Vec<Value>> {
    let mut stmt = conn.prepare("SELECT id, record_json FROM records ORDER BY rowid")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, text)| {
            serde_json::from_str(&text).with_context(|| format!("record {id} is not valid JSON"))
        })
        .collect()
}

pub fn record_ids(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM records ORDER BY rowid")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// First record carrying this LRN, with its id.
pub fn find_by_lrn(conn: &Connection, lrn: &str) -> anyhow::Result<Option<(String, Value)>> {
    let lrn = lrn.trim();
    if lrn.is_empty() {
        return Ok(None);
    }
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, record_json FROM records WHERE lrn = ? ORDER BY rowid LIMIT 1",
            [lrn],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    row.map(|(id, text)| {
        let v = serde_json::from_str(&text)
            .with_context(|| format!("record {id} is not valid JSON"))?;
        Ok((id, v))
    })
    .transpose()
}

pub fn settings_get(conn: &Connection, key: &str) -> anyhow::Result<Option<Value>> {
    let text: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    Ok(text.and_then(|t| serde_json::from_str(&t).ok()))
}

pub fn settings_set(conn: &Connection, key: &str, value: &Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn ensure_records_lrn(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "records", "lrn")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE records ADD COLUMN lrn TEXT", [])?;

    // Backfill from the stored documents.
    let mut stmt = conn.prepare("SELECT id, record_json FROM records")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (id, text) in rows {
        let lrn = serde_json::from_str::<Value>(&text)
            .map(|v| lrn_of(&v))
            .unwrap_or_default();
        conn.execute("UPDATE records SET lrn = ? WHERE id = ?", (lrn, id))?;
    }
    Ok(())
}

fn ensure_records_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "records", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE records ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn new_workspace_is_seeded() {
        let conn = mem();
        assert_eq!(load_structure(&conn).expect("tree"), json!({"Grade 11": {}}));
        init_schema(&conn).expect("reopen");
        assert_eq!(load_structure(&conn).expect("tree"), json!({"Grade 11": {}}));
    }

    #[test]
    fn records_upsert_and_lookup_by_lrn() {
        let conn = mem();
        put_record(&conn, "a", &json!({"id": "a", "info": {"lrn": "111"}})).expect("put");
        put_record(&conn, "b", &json!({"id": "b", "info": {"lrn": "222"}})).expect("put");
        put_record(&conn, "a", &json!({"id": "a", "info": {"lrn": "333"}, "extra": 1})).expect("put");

        assert_eq!(record_ids(&conn).expect("ids"), vec!["a", "b"]);
        let (id, v) = find_by_lrn(&conn, " 333 ").expect("query").expect("found");
        assert_eq!(id, "a");
        assert_eq!(v["extra"], 1);
        assert!(find_by_lrn(&conn, "111").expect("query").is_none());
        assert!(find_by_lrn(&conn, "").expect("query").is_none());
        assert!(delete_record(&conn, "b").expect("delete"));
        assert!(!delete_record(&conn, "b").expect("delete"));
        assert_eq!(list_records(&conn).expect("list").len(), 1);
    }

    #[test]
    fn older_records_table_gains_lrn_column() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE records(id TEXT PRIMARY KEY, record_json TEXT NOT NULL)",
            [],
        )
        .expect("create");
        conn.execute(
            "INSERT INTO records(id, record_json) VALUES('x', '{\"info\":{\"lrn\":\"999\"}}')",
            [],
        )
        .expect("insert");
        init_schema(&conn).expect("migrate");
        let (id, _) = find_by_lrn(&conn, "999").expect("query").expect("found");
        assert_eq!(id, "x");
    }

    #[test]
    fn settings_round_trip() {
        let conn = mem();
        assert!(settings_get(&conn, "template.path").expect("get").is_none());
        settings_set(&conn, "template.path", &json!("/tmp/t.xlsx")).expect("set");
        assert_eq!(
            settings_get(&conn, "template.path").expect("get"),
            Some(json!("/tmp/t.xlsx"))
        );
    }
}
