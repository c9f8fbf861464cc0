use crate::error::{CoreError, CoreResult};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::structure::SectionPath;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_path(req: &Request, key: &str) -> Result<PathBuf, serde_json::Value> {
    required_str(req, key).map(PathBuf::from)
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// `{grade, strand, section}` from the params, or from `params[key]` when
/// given a key.
pub fn section_path(req: &Request, key: Option<&str>) -> Result<SectionPath, serde_json::Value> {
    let src = match key {
        Some(k) => req.params.get(k),
        None => Some(&req.params),
    };
    let field = |name: &str| {
        src.and_then(|p| p.get(name))
            .and_then(|v| v.as_str())
            .map(|v| v.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", name), None))
    };
    Ok(SectionPath {
        grade: field("grade")?,
        strand: field("strand")?,
        section: field("section")?,
    })
}

/// Run `job` on a worker thread and wait at most `timeout`. A job that
/// overruns is abandoned; its result is dropped when it finishes.
pub fn run_with_timeout<T, F>(timeout: Duration, job: F) -> CoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CoreResult<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("form137-workbook".to_string())
        .spawn(move || {
            let _ = tx.send(job());
        })
        .map_err(|e| CoreError::Internal(format!("failed to start worker: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(CoreError::Timeout(timeout.as_secs())),
        Err(RecvTimeoutError::Disconnected) => Err(CoreError::Internal(
            "workbook worker exited without a result".to_string(),
        )),
    }
}
