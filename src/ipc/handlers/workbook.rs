use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::exporter;
use crate::importer;
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::handlers::records::parse_record;
use crate::ipc::helpers::{optional_str, required_path, run_with_timeout};
use crate::ipc::types::{AppState, Request};
use crate::placeholder;
use crate::record::StudentRecord;
use anyhow::Context;
use serde_json::json;
use std::path::Path;

fn read_input(path: &Path, what: &str) -> CoreResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| CoreError::Resource(format!("{what} {}: {e}", path.display())))
}

/// Write through a temp file so a failed export never leaves a partial
/// workbook under the requested name.
fn write_output(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let tmp = path.with_extension("xlsx.writing");
    let written = std::fs::write(&tmp, bytes)
        .with_context(|| format!("failed to write {}", tmp.to_string_lossy()))
        .and_then(|()| {
            std::fs::rename(&tmp, path)
                .with_context(|| format!("failed to move workbook to {}", path.to_string_lossy()))
        });
    if written.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    written
}

/// The record to export: inline `record`, else the stored record `id`.
fn export_record(state: &AppState, req: &Request) -> Result<StudentRecord, serde_json::Value> {
    if let Some(v) = req.params.get("record").filter(|v| v.is_object()) {
        return parse_record(v).map_err(|e| core_err(&req.id, &e));
    }
    let Some(id) = optional_str(req, "id") else {
        return Err(err(&req.id, "bad_params", "missing record or id", None));
    };
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    match db::get_record(conn, &id) {
        Ok(Some(v)) => parse_record(&v).map_err(|e| core_err(&req.id, &e)),
        Ok(None) => Err(err(&req.id, "not_found", format!("record '{id}'"), None)),
        Err(e) => Err(core_err(&req.id, &e.into())),
    }
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (template, out_path) = match (required_path(req, "templatePath"), required_path(req, "outPath")) {
        (Ok(t), Ok(o)) => (t, o),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    let record = match export_record(state, req) {
        Ok(r) => r,
        Err(e) => return e,
    };

    let timeout = state.config.workbook_timeout;
    let result = run_with_timeout(timeout, move || exporter::export_file(&record, &template))
        .and_then(|bytes| {
            write_output(&out_path, &bytes)?;
            Ok(bytes.len())
        });
    match result {
        Ok(size) => {
            tracing::info!(out = %out_path.display(), size, "workbook exported");
            ok(&req.id, json!({ "outPath": out_path.to_string_lossy(), "bytes": size }))
        }
        Err(e) => {
            tracing::warn!(error = %e, "workbook export failed");
            core_err(&req.id, &e)
        }
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_path(req, "path") {
        Ok(p) => p,
        Err(e) => return e,
    };
    let result = read_input(&path, "workbook").and_then(|bytes| {
        run_with_timeout(state.config.workbook_timeout, move || importer::import(&bytes))
    });
    match result {
        Ok(record) => ok(&req.id, json!({ "record": record })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_read_with_template(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (template, path) = match (required_path(req, "templatePath"), required_path(req, "path")) {
        (Ok(t), Ok(p)) => (t, p),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    let result = read_input(&template, "template")
        .and_then(|t| Ok((t, read_input(&path, "workbook")?)))
        .and_then(|(t, filled)| {
            run_with_timeout(state.config.workbook_timeout, move || {
                importer::read_with_template(&t, &filled)
            })
        });
    match result {
        Ok(record) => ok(&req.id, json!({ "record": record })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_template_scan(state: &mut AppState, req: &Request) -> serde_json::Value {
    let template = match required_path(req, "templatePath") {
        Ok(p) => p,
        Err(e) => return e,
    };
    let result = read_input(&template, "template").and_then(|bytes| {
        run_with_timeout(state.config.workbook_timeout, move || {
            let wb = exporter::load_workbook(&bytes, "template")?;
            Ok(placeholder::scan_keys(&wb))
        })
    });
    match result {
        Ok(keys) => ok(&req.id, json!({ "keys": keys })),
        Err(e) => core_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workbook.export" => Some(handle_export(state, req)),
        "workbook.import" => Some(handle_import(state, req)),
        "workbook.readWithTemplate" => Some(handle_read_with_template(state, req)),
        "template.scan" => Some(handle_template_scan(state, req)),
        _ => None,
    }
}
