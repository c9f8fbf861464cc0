/// Failure taxonomy shared by the record engine and the IPC boundary.
///
/// A missing label is not represented here: the locator answers `None` and
/// callers skip the field.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad sync envelope shape, unreadable workbook, invalid JSON payload.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Missing template file, oversized payload.
    #[error("resource error: {0}")]
    Resource(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable error code carried in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::MalformedInput(_) => "malformed_input",
            CoreError::Resource(_) => "resource",
            CoreError::Timeout(_) => "timeout",
            CoreError::Conflict(_) => "conflict",
            CoreError::Storage(_) => "db_failed",
            CoreError::Internal(_) => "internal",
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Storage(e.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
