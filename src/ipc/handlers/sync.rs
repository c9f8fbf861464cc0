use crate::db;
use crate::envelope;
use crate::error::{CoreError, CoreResult};
use crate::ipc::error::{core_err, ok};
use crate::ipc::handlers::core::LAST_SYNC_KEY;
use crate::ipc::helpers::{db_conn, optional_str, required_path, required_str};
use crate::ipc::types::{AppState, Request};
use crate::sync::{self, ApplySummary};
use crate::syncfile;
use rusqlite::Connection;
use serde_json::json;

fn record_last_sync(conn: &Connection, source: &str, fingerprint: &str, summary: &ApplySummary) {
    let entry = json!({
        "source": source,
        "fingerprint": fingerprint,
        "appliedAt": chrono::Utc::now().to_rfc3339(),
        "recordsWritten": summary.records_written,
    });
    if let Err(e) = db::settings_set(conn, LAST_SYNC_KEY, &entry) {
        tracing::warn!(error = %e, "failed to record last sync");
    }
}

fn handle_export_file(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let out_path = match required_path(req, "outPath") {
        Ok(p) => p,
        Err(e) => return e,
    };
    let result = sync::export_envelope(conn).and_then(|env| {
        syncfile::write_sync_file(&env, &out_path).map_err(CoreError::from)
    });
    match result {
        Ok(summary) => {
            tracing::info!(out = %out_path.display(), records = summary.record_count, "sync file written");
            ok(
                &req.id,
                json!({
                    "outPath": out_path.to_string_lossy(),
                    "format": summary.format,
                    "recordCount": summary.record_count,
                    "fingerprint": summary.fingerprint,
                }),
            )
        }
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_preview_file(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let path = match required_path(req, "path") {
        Ok(p) => p,
        Err(e) => return e,
    };
    let result = syncfile::read_sync_file(&path).and_then(|loaded| {
        let preview = sync::preview(conn, &loaded.envelope)?;
        Ok(json!({
            "formatDetected": loaded.format_detected,
            "fingerprint": loaded.fingerprint,
            "version": loaded.envelope.version,
            "timestamp": loaded.envelope.timestamp,
            "preview": preview,
        }))
    });
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => core_err(&req.id, &e),
    }
}

/// Apply a sync file. `expectedFingerprint`, when given, must match the
/// file previewed earlier.
fn handle_import_file(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let path = match required_path(req, "path") {
        Ok(p) => p,
        Err(e) => return e,
    };
    let expected = optional_str(req, "expectedFingerprint");

    let result = (|| -> CoreResult<serde_json::Value> {
        let loaded = syncfile::read_sync_file(&path)?;
        if let Some(expected) = expected.as_deref() {
            if expected != loaded.fingerprint {
                return Err(CoreError::Conflict(
                    "sync file changed since it was previewed".to_string(),
                ));
            }
        }
        let summary = sync::apply(conn, &loaded.envelope)?;
        record_last_sync(conn, "file", &loaded.fingerprint, &summary);
        tracing::info!(
            path = %path.display(),
            records = summary.records_written,
            "sync file applied"
        );
        Ok(json!({ "fingerprint": loaded.fingerprint, "summary": summary }))
    })();
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_encode_payload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let max = state.config.relay_max_bytes;
    let result = sync::export_envelope(conn)
        .and_then(|env| envelope::encode_transport(&env, max))
        .and_then(|bytes| {
            let fingerprint = envelope::fingerprint(&bytes);
            let payload = String::from_utf8(bytes)
                .map_err(|e| CoreError::Internal(format!("payload is not UTF-8: {e}")))?;
            Ok((payload, fingerprint))
        });
    match result {
        Ok((payload, fingerprint)) => ok(
            &req.id,
            json!({ "payload": payload, "bytes": payload.len(), "fingerprint": fingerprint }),
        ),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_merge_payload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let payload = match required_str(req, "payload") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let max = state.config.relay_max_bytes;
    let result = (|| -> CoreResult<serde_json::Value> {
        let incoming = envelope::decode_transport(payload.as_bytes(), max)?;
        let fingerprint = envelope::fingerprint(payload.as_bytes());
        let summary = sync::apply(conn, &incoming)?;
        record_last_sync(conn, "relay", &fingerprint, &summary);
        tracing::info!(records = summary.records_written, "relay payload applied");
        Ok(json!({ "fingerprint": fingerprint, "summary": summary }))
    })();
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => core_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sync.exportFile" => Some(handle_export_file(state, req)),
        "sync.previewFile" => Some(handle_preview_file(state, req)),
        "sync.importFile" => Some(handle_import_file(state, req)),
        "sync.encodePayload" => Some(handle_encode_payload(state, req)),
        "sync.mergePayload" => Some(handle_merge_payload(state, req)),
        _ => None,
    }
}
