use crate::calc;
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, section_path};
use crate::ipc::types::{AppState, Request};
use crate::merge::overlay;
use crate::record::{StudentRecord, SubjectKind};
use crate::structure::{SectionPath, StructureTree, StudentStub};
use crate::sync;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn record_param(req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    match req.params.get("record") {
        Some(v) if v.is_object() => Ok(v.clone()),
        _ => Err(err(&req.id, "bad_params", "missing record", None)),
    }
}

fn optional_path(req: &Request) -> Result<Option<SectionPath>, serde_json::Value> {
    if req.params.get("path").is_none() {
        return Ok(None);
    }
    section_path(req, Some("path")).map(Some)
}

pub(crate) fn parse_record(v: &serde_json::Value) -> CoreResult<StudentRecord> {
    serde_json::from_value(v.clone())
        .map_err(|e| CoreError::MalformedInput(format!("invalid record: {e}")))
}

/// Align the record's stub with its identity fields, adding it under `path`
/// when the tree has no stub for it yet. Returns whether the tree changed.
fn sync_stub(
    conn: &Connection,
    id: &str,
    record: &StudentRecord,
    path: Option<&SectionPath>,
) -> CoreResult<bool> {
    let mut tree = StructureTree::from_value(db::load_structure(conn)?)?;
    let name = record.display_name();
    let lrn = record.info.lrn.trim();
    let changed = if tree.update_stub(id, &name, lrn, record.info.irregular) {
        true
    } else if let Some(path) = path {
        tree.add_student(
            path,
            StudentStub {
                id: id.to_string(),
                name,
                irregular: record.info.irregular,
                lrn: lrn.to_string(),
            },
        )?;
        true
    } else {
        false
    };
    if changed {
        db::save_structure(conn, &tree.to_value())?;
    }
    Ok(changed)
}

/// Typed fields are recomputed; keys the typed model does not know about
/// survive from the submitted JSON.
fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (raw, path) = match (record_param(req), optional_path(req)) {
        (Ok(r), Ok(p)) => (r, p),
        (Err(e), _) | (_, Err(e)) => return e,
    };

    let result = (|| -> CoreResult<serde_json::Value> {
        let mut typed = parse_record(&raw)?;
        calc::recompute(&mut typed);
        let id = typed
            .effective_id()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        typed.id = id.clone();

        let typed_json = serde_json::to_value(&typed).map_err(anyhow::Error::from)?;
        let stored = overlay(&raw, &typed_json);

        let tx = conn.unchecked_transaction()?;
        db::put_record(&tx, &id, &stored)?;
        let stub_changed = sync_stub(&tx, &id, &typed, path.as_ref())?;
        tx.commit()?;

        tracing::info!(record = %id, stub_changed, "record saved");
        Ok(json!({ "id": id, "record": stored, "structureChanged": stub_changed }))
    })();
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::get_record(conn, &id) {
        Ok(Some(record)) => ok(&req.id, json!({ "record": record })),
        Ok(None) => err(&req.id, "not_found", format!("record '{id}'"), None),
        Err(e) => core_err(&req.id, &e.into()),
    }
}

/// Deletes the stored record only; the structure tree is left as it is.
fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::delete_record(conn, &id) {
        Ok(true) => {
            tracing::info!(record = %id, "record deleted");
            ok(&req.id, json!({ "id": id }))
        }
        Ok(false) => err(&req.id, "not_found", format!("record '{id}'"), None),
        Err(e) => core_err(&req.id, &e.into()),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let records = match db::list_records(conn) {
        Ok(v) => v,
        Err(e) => return core_err(&req.id, &e.into()),
    };
    let rows: Vec<serde_json::Value> = records
        .iter()
        .map(|v| {
            let id = v.get("id").cloned().unwrap_or_default();
            let typed = parse_record(v).unwrap_or_else(|e| {
                tracing::warn!(record = %id, error = %e, "stored record does not parse");
                StudentRecord::default()
            });
            json!({
                "id": id,
                "name": typed.display_name(),
                "lrn": typed.info.lrn,
                "irregular": typed.info.irregular,
            })
        })
        .collect();
    ok(&req.id, json!({ "records": rows }))
}

fn handle_find_by_lrn(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lrn = match required_str(req, "lrn") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::find_by_lrn(conn, &lrn) {
        Ok(Some((id, record))) => ok(&req.id, json!({ "found": true, "id": id, "record": record })),
        Ok(None) => ok(&req.id, json!({ "found": false })),
        Err(e) => core_err(&req.id, &e.into()),
    }
}

/// Manual import: an existing LRN gets only its identity sections updated;
/// a new one is stored, and placed in the tree when `path` is given.
fn handle_import_merge(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (raw, path) = match (record_param(req), optional_path(req)) {
        (Ok(r), Ok(p)) => (r, p),
        (Err(e), _) | (_, Err(e)) => return e,
    };

    let result = (|| -> CoreResult<serde_json::Value> {
        let tx = conn.unchecked_transaction()?;
        let outcome = sync::import_by_lrn(&tx, &raw)?;
        let typed = parse_record(&outcome.record)?;
        let stub_changed = sync_stub(&tx, &outcome.id, &typed, path.as_ref())?;
        tx.commit()?;
        tracing::info!(record = %outcome.id, matched = outcome.matched, "record imported");
        Ok(json!({
            "id": outcome.id,
            "matched": outcome.matched,
            "record": outcome.record,
            "structureChanged": stub_changed,
        }))
    })();
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => core_err(&req.id, &e),
    }
}

/// Active annex subjects of one record for autocomplete, optionally
/// filtered by kind and a case-insensitive prefix.
fn handle_annex_suggest(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let kind = match optional_str(req, "type") {
        Some(t) => match SubjectKind::parse(&t) {
            Some(k) => Some(k),
            None => return err(&req.id, "bad_params", format!("unknown subject type: {t}"), None),
        },
        None => None,
    };
    let prefix = optional_str(req, "prefix").unwrap_or_default().to_uppercase();

    let record = match db::get_record(conn, &id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", format!("record '{id}'"), None),
        Err(e) => return core_err(&req.id, &e.into()),
    };
    let typed = match parse_record(&record) {
        Ok(r) => r,
        Err(e) => return core_err(&req.id, &e),
    };
    let subjects: Vec<serde_json::Value> = typed
        .annex
        .iter()
        .filter(|a| a.active)
        .filter(|a| kind.map_or(true, |k| a.kind == k))
        .filter(|a| a.subject.to_uppercase().starts_with(&prefix))
        .map(|a| json!({ "type": a.kind.as_str(), "subject": a.subject }))
        .collect();
    ok(&req.id, json!({ "subjects": subjects }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.get" => Some(handle_get(state, req)),
        "records.save" => Some(handle_save(state, req)),
        "records.delete" => Some(handle_delete(state, req)),
        "records.list" => Some(handle_list(state, req)),
        "records.findByLrn" => Some(handle_find_by_lrn(state, req)),
        "records.importMerge" => Some(handle_import_merge(state, req)),
        "annex.suggest" => Some(handle_annex_suggest(state, req)),
        _ => None,
    }
}
