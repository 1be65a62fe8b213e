//! Backing-store access.
//!
//! [`QueryBackend`] is the only seam between the analytics core and the
//! store. Implementations must tolerate concurrent `execute` calls from the
//! fetch pool; [`SqliteBackend`] does so by opening a read-only connection
//! per call, so every query gets its own statement and cursor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, params_from_iter};

use super::types::{FetchError, Query, QuerySource, Value};

/// A read-only query executor shared across one batch.
pub trait QueryBackend: Send + Sync {
    /// Execute `query` and return the full result set.
    fn execute(&self, query: &Query) -> Result<QuerySource, FetchError>;

    /// Short label for logs.
    fn describe(&self) -> String {
        "backend".to_string()
    }
}

/// SQLite events database opened read-only per query.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteBackend {
    /// Verify the database can be opened and return a backend for it.
    ///
    /// This is the "login" step: a missing or unreadable file fails here
    /// rather than inside the first batch.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FetchError> {
        let backend = Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_secs(5),
        };
        backend.connect()?;
        Ok(backend)
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, FetchError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| FetchError::Open {
            path: self.path.display().to_string(),
            source,
        })?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

impl QueryBackend for SqliteBackend {
    fn execute(&self, query: &Query) -> Result<QuerySource, FetchError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&query.sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut out = QuerySource::new(columns);
        let mut rows = stmt
            .query(params_from_iter(query.params.iter()))
            .map_err(map_busy)?;
        while let Some(row) = rows.next().map_err(map_busy)? {
            let mut cells = Vec::with_capacity(width);
            for idx in 0..width {
                cells.push(convert(row.get_ref(idx)?));
            }
            out.rows.push(cells);
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

fn convert(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(format!("<{} byte blob>", bytes.len())),
    }
}

fn map_busy(err: rusqlite::Error) -> FetchError {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
            FetchError::Timeout(err.to_string())
        }
        _ => FetchError::Query(err),
    }
}
