//! Reconciling the workspace with an incoming snapshot.

use crate::db;
use crate::envelope::Envelope;
use crate::error::{CoreError, CoreResult};
use crate::merge::{merge, merge_identity};
use crate::structure::StructureTree;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Snapshot of the whole workspace.
pub fn export_envelope(conn: &Connection) -> CoreResult<Envelope> {
    let structure = db::load_structure(conn)?;
    let records = db::list_records(conn)?;
    Ok(Envelope::new(structure, records))
}

fn local_tree(conn: &Connection) -> CoreResult<Value> {
    Ok(json!({
        "structure": db::load_structure(conn)?,
        "records": db::list_records(conn)?,
    }))
}

fn record_id(v: &Value) -> Option<String> {
    match v.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn stub_ids(structure: &Value) -> CoreResult<HashSet<String>> {
    let tree = StructureTree::from_value(structure.clone())?;
    Ok(tree.stubs().map(|(_, s)| s.id.clone()).collect())
}

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPreview {
    pub records_added: Vec<String>,
    pub records_updated: Vec<String>,
    pub records_unchanged: usize,
    pub students_added: usize,
    pub students_total: usize,
}

/// What `apply` would do, without writing anything.
pub fn preview(conn: &Connection, incoming: &Envelope) -> CoreResult<SyncPreview> {
    let base = local_tree(conn)?;
    let merged = merge(&base, &incoming.tree());

    let mut out = SyncPreview::default();
    for record in &incoming.records {
        let Some(id) = record_id(record) else {
            continue;
        };
        match db::get_record(conn, &id)? {
            None => out.records_added.push(id),
            Some(existing) if existing == *record => out.records_unchanged += 1,
            Some(_) => out.records_updated.push(id),
        }
    }

    let before = stub_ids(&base["structure"])?;
    let after = stub_ids(&merged["structure"])?;
    out.students_added = after.difference(&before).count();
    out.students_total = after.len();
    Ok(out)
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    pub records_written: usize,
    pub students_total: usize,
}

/// Merge an incoming snapshot into the workspace in one transaction. The
/// merged tree is validated before anything is written.
pub fn apply(conn: &Connection, incoming: &Envelope) -> CoreResult<ApplySummary> {
    let base = local_tree(conn)?;
    let merged = merge(&base, &incoming.tree());
    let structure = StructureTree::from_value(merged["structure"].clone())?;

    let incoming_ids: HashSet<String> = incoming.records.iter().filter_map(record_id).collect();
    let to_write: Vec<(String, &Value)> = merged["records"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|r| record_id(r).map(|id| (id, r)))
                .filter(|(id, _)| incoming_ids.contains(id))
                .collect()
        })
        .unwrap_or_default();

    let tx = conn.unchecked_transaction()?;
    db::save_structure(&tx, &structure.to_value())?;
    for (id, record) in &to_write {
        db::put_record(&tx, id, record)?;
    }
    tx.commit()?;

    Ok(ApplySummary {
        records_written: to_write.len(),
        students_total: structure.stubs().count(),
    })
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub id: String,
    /// An existing record with the same LRN was updated.
    pub matched: bool,
    pub record: Value,
}

/// Store an imported record. When a record with the same LRN exists only its
/// identity sections are merged; otherwise the record is added as new.
pub fn import_by_lrn(conn: &Connection, imported: &Value) -> CoreResult<ImportOutcome> {
    if !imported.is_object() {
        return Err(CoreError::MalformedInput("record must be an object".into()));
    }
    let lrn = imported
        .get("info")
        .and_then(|i| i.get("lrn"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    if let Some((id, existing)) = db::find_by_lrn(conn, &lrn)? {
        let merged = merge_identity(&existing, imported);
        db::put_record(conn, &id, &merged)?;
        return Ok(ImportOutcome {
            id,
            matched: true,
            record: merged,
        });
    }

    let id = record_id(imported)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| (!lrn.is_empty()).then(|| lrn.clone()))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut record = imported.clone();
    record["id"] = Value::String(id.clone());
    db::put_record(conn, &id, &record)?;
    Ok(ImportOutcome {
        id,
        matched: false,
        record,
    })
}
