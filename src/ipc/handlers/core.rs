use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_path;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::Path;

/// Settings key holding a summary of the last applied sync.
pub const LAST_SYNC_KEY: &str = "sync.last_applied";

/// Open (creating if needed) the workspace database and make it current.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    tracing::info!(workspace = %path.display(), "workspace opened");
    Ok(())
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let last_sync = state
        .db
        .as_ref()
        .and_then(|conn| db::settings_get(conn, LAST_SYNC_KEY).ok().flatten());
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "workbookTimeoutSecs": state.config.workbook_timeout.as_secs(),
            "relayMaxBytes": state.config.relay_max_bytes,
            "lastSync": last_sync,
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_path(req, "path") {
        Ok(p) => p,
        Err(e) => return e,
    };

    match open_workspace(state, &path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => {
            tracing::warn!(workspace = %path.display(), error = %e, "workspace open failed");
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
