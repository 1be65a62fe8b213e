//! Shared types for the analytics core.
//!
//! Query identity, tabular results, the reshaped device matrix and the error
//! taxonomy live here so the cache, the fetch orchestrator and the reshaper
//! agree on one vocabulary.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Column names
// ---------------------------------------------------------------------------

pub const EVENT_NAME: &str = "EVENT_NAME";
pub const EVENT_COUNT: &str = "EVENT_COUNT";
pub const DEVICE_NAME: &str = "DEVICE_NAME";
pub const DEVICE_TOKEN: &str = "DEVICE_TOKEN";
pub const SESSION_DATE: &str = "SESSION_DATE";
pub const SESSION_DURATION: &str = "SESSION_DURATION";
pub const LATEST_EVENT_TIMESTAMP: &str = "LATEST_EVENT_TIMESTAMP";

/// Literal substituted for a null device name or token before grouping.
pub const UNKNOWN_DEVICE: &str = "unknown";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure of a single backing-store call.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The store could not be opened (missing file, bad credentials).
    #[error("cannot open backing store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    /// Statement preparation or execution failed.
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
    /// The store gave up waiting (lock contention, network timeout).
    #[error("query timed out: {0}")]
    Timeout(String),
    /// Anything else a backend wants to surface.
    #[error("{0}")]
    Other(String),
}

/// Analytics core error.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    /// A single query function failed; recovered per slot by the orchestrator.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// At least one slot of a batch failed; the session must re-authenticate.
    #[error("fetch failed ({failed} of {total} queries), re-authenticate: {first}")]
    BatchFailure {
        failed: usize,
        total: usize,
        first: String,
    },
    /// An externally supplied value was rejected before any query ran.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Reshaper input broke its column contract. Programming error.
    #[error("reshape contract violated: {0}")]
    Reshape(String),
    /// The session has no live connection.
    #[error("no active session, log in first")]
    NotActive,
    /// The cache was cleared and data must be reloaded via a fresh login.
    #[error("cache has been cleared, log in again to reload data")]
    CacheCleared,
    /// Drill-down requested with no row selected.
    #[error("no device row selected")]
    NoSelection,
    /// No row of the current device matrix carries the requested token.
    #[error("no device row with token {0:?}")]
    TokenNotFound(String),
    /// Selection index outside the current device matrix.
    #[error("row {index} out of range ({rows} device rows)")]
    RowOutOfRange { index: usize, rows: usize },
}

/// Convenience alias.
pub type AnalyticsResult<T> = std::result::Result<T, AnalyticsError>;

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A fully parameterized read-only query.
///
/// Identity is the exact text plus the exact bound values; nothing is parsed.
/// This is the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub sql: String,
    pub params: Vec<String>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a positional parameter (`?N` where N is its 1-based position).
    pub fn bind(mut self, value: impl Into<String>) -> Self {
        self.params.push(value.into());
        self
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let first_line = self
            .sql
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("");
        write!(f, "{first_line} [{} params]", self.params.len())
    }
}

// ---------------------------------------------------------------------------
// Cell values and tables
// ---------------------------------------------------------------------------

/// A single scalar cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of the cell. Reals are accepted only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Real(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Date view; timestamps truncate to their day.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            Self::Timestamp(ts) => Some(ts.date()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v:.2}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Read-only tabular query result.
///
/// Row-major; every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuerySource {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QuerySource {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from column names and rows, rejecting ragged rows.
    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> AnalyticsResult<Self> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != columns.len())
        {
            return Err(AnalyticsError::Reshape(format!(
                "row {idx} has {} cells, expected {}",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column. Store engines differ in identifier case, so the
    /// lookup is ASCII case-insensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Like [`column_index`](Self::column_index) but a missing column is a
    /// contract violation.
    pub fn require_column(&self, name: &str) -> AnalyticsResult<usize> {
        self.column_index(name).ok_or_else(|| {
            AnalyticsError::Reshape(format!(
                "missing column {name} (have: {})",
                self.columns.join(", ")
            ))
        })
    }

    /// Iterate one column's cells.
    pub fn column(&self, name: &str) -> AnalyticsResult<impl Iterator<Item = &Value>> {
        let idx = self.require_column(name)?;
        Ok(self.rows.iter().map(move |r| &r[idx]))
    }

    /// Return a copy with textual date/time cells of `name` parsed into
    /// [`Value::Date`] / [`Value::Timestamp`]. Cells that do not parse are
    /// left untouched.
    pub fn with_temporal_column(&self, name: &str) -> AnalyticsResult<Self> {
        let idx = self.require_column(name)?;
        let mut out = self.clone();
        for row in &mut out.rows {
            let parsed = match &row[idx] {
                Value::Text(raw) => parse_temporal(raw),
                _ => None,
            };
            if let Some(parsed) = parsed {
                row[idx] = parsed;
            }
        }
        Ok(out)
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parse `YYYY-MM-DD` into a date, or one of the common timestamp layouts
/// into a timestamp. Midnight timestamps stay timestamps.
pub fn parse_temporal(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    let raw = raw.strip_suffix('Z').unwrap_or(raw);
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Value::Date(d));
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(Value::Timestamp)
}

// ---------------------------------------------------------------------------
// DeviceMatrix
// ---------------------------------------------------------------------------

/// One device row of the wide matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRow {
    pub device_name: String,
    pub device_token: String,
    /// Aligned with [`DeviceMatrix::event_names`].
    pub counts: Vec<i64>,
}

impl DeviceRow {
    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }
}

/// Wide per-device matrix: one row per device name, one count column per
/// event name, both in ascending name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceMatrix {
    pub event_names: Vec<String>,
    pub rows: Vec<DeviceRow>,
}

impl DeviceMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column headers of the wide table.
    pub fn columns(&self) -> Vec<String> {
        let mut cols = Vec::with_capacity(self.event_names.len() + 2);
        cols.push(DEVICE_NAME.to_string());
        cols.push(DEVICE_TOKEN.to_string());
        cols.extend(self.event_names.iter().cloned());
        cols
    }

    pub fn row(&self, index: usize) -> AnalyticsResult<&DeviceRow> {
        self.rows.get(index).ok_or(AnalyticsError::RowOutOfRange {
            index,
            rows: self.rows.len(),
        })
    }

    pub fn find_device(&self, name: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.device_name == name)
    }

    pub fn find_token(&self, token: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.device_token == token)
    }

    /// Count for one (row, event) cell; `None` when the event is unknown.
    pub fn count(&self, row: usize, event_name: &str) -> Option<i64> {
        let col = self.event_names.iter().position(|e| e == event_name)?;
        self.rows.get(row).map(|r| r.counts[col])
    }

    /// Unpivot one row back to `(event name, count)` pairs.
    pub fn event_counts(&self, index: usize) -> AnalyticsResult<Vec<(String, i64)>> {
        let row = self.row(index)?;
        Ok(self
            .event_names
            .iter()
            .cloned()
            .zip(row.counts.iter().copied())
            .collect())
    }

    /// Render as a wide `DEVICE_NAME, DEVICE_TOKEN, <events...>` table.
    pub fn to_query_source(&self) -> QuerySource {
        let rows = self
            .rows
            .iter()
            .map(|r| {
                let mut cells = Vec::with_capacity(r.counts.len() + 2);
                cells.push(Value::Text(r.device_name.clone()));
                cells.push(Value::Text(r.device_token.clone()));
                cells.extend(r.counts.iter().map(|c| Value::Integer(*c)));
                cells
            })
            .collect();
        QuerySource {
            columns: self.columns(),
            rows,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
