//! Query builders and the cached fetcher for the events table.
//!
//! All query text targets `account_events`:
//!
//! | column             | meaning                                        |
//! |--------------------|------------------------------------------------|
//! | `event_name`       | event kind (`gameStarted`, ...)                |
//! | `game_name`        | game the event belongs to                      |
//! | `environment_name` | deployment environment label                   |
//! | `event_timestamp`  | `YYYY-MM-DD HH:MM:SS`                          |
//! | `event_json`       | payload with `deviceName`, `deviceToken`, `sessionID` |
//!
//! Every externally influenced value is bound as a positional parameter.
//! The environment label is additionally restricted to ASCII letters.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use super::backend::QueryBackend;
use super::cache::QueryCache;
use super::pivot::pivot_device_events;
use super::types::*;

/// The five tracked event names, in the order the dashboard lists them.
pub const DEFAULT_EVENTS: &[&str] = &[
    "gameStarted",
    "experienceStarted",
    "perfectServingStarted",
    "breweryIngredientsStarted",
    "artOfBrewingStarted",
];

pub const DEFAULT_GAME: &str = "The Experience";

static ENVIRONMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z]+$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Environment label
// ---------------------------------------------------------------------------

/// True when `input` is a non-empty run of ASCII letters.
pub fn validate_environment(input: &str) -> bool {
    ENVIRONMENT_RE.is_match(input)
}

/// A validated environment label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Environment(String);

impl Environment {
    pub fn parse(input: &str) -> AnalyticsResult<Self> {
        if validate_environment(input) {
            Ok(Self(input.to_string()))
        } else {
            Err(AnalyticsError::Validation(format!(
                "environment {input:?} may only contain the letters a-z and A-Z"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Query builders
// ---------------------------------------------------------------------------

/// Builds the dashboard's queries for one environment and game.
#[derive(Debug, Clone)]
pub struct EventQueries {
    pub environment: Environment,
    pub game_name: String,
    pub events: Vec<String>,
    pub lookback_months: u32,
}

impl EventQueries {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            game_name: DEFAULT_GAME.to_string(),
            events: DEFAULT_EVENTS.iter().map(|e| e.to_string()).collect(),
            lookback_months: 1,
        }
    }

    /// `?1` game, `?2` environment.
    fn scoped(&self, sql: String) -> Query {
        Query::new(sql)
            .bind(self.game_name.as_str())
            .bind(self.environment.as_str())
    }

    fn bind_events(&self, mut query: Query) -> Query {
        for e in &self.events {
            query = query.bind(e.as_str());
        }
        query
    }

    fn lookback_modifier(&self) -> String {
        format!("-{} months", self.lookback_months)
    }

    /// `EVENT_NAME, EVENT_COUNT` over the tracked events.
    pub fn total_events_by_name(&self) -> Query {
        let sql = format!(
            "SELECT event_name AS EVENT_NAME, COUNT(*) AS EVENT_COUNT
             FROM account_events
             WHERE game_name = ?1
               AND environment_name = ?2
               AND event_name IN ({})
             GROUP BY event_name
             ORDER BY event_name DESC",
            placeholders(3, self.events.len())
        );
        self.bind_events(self.scoped(sql))
    }

    /// `SESSION_DATE, SESSION_DURATION` (minutes) for the whole environment
    /// over the lookback window. Sessions are split per day; non-positive
    /// durations are dropped.
    pub fn session_durations(&self) -> Query {
        self.scoped(session_sql(""))
            .bind(self.lookback_modifier())
    }

    /// Long-format `EVENT_NAME, DEVICE_NAME, DEVICE_TOKEN, EVENT_COUNT`.
    ///
    /// Rows with a device name but no token are excluded; rows with neither
    /// are kept and later grouped as the unknown device.
    pub fn device_event_counts(&self) -> Query {
        let sql = format!(
            "SELECT
                 event_name AS EVENT_NAME,
                 json_extract(event_json, '$.deviceName') AS DEVICE_NAME,
                 json_extract(event_json, '$.deviceToken') AS DEVICE_TOKEN,
                 COUNT(*) AS EVENT_COUNT
             FROM account_events
             WHERE game_name = ?1
               AND environment_name = ?2
               AND event_name IN ({})
               AND (
                   json_extract(event_json, '$.deviceToken') IS NOT NULL
                   OR (
                       json_extract(event_json, '$.deviceToken') IS NULL
                       AND json_extract(event_json, '$.deviceName') IS NULL
                   )
               )
             GROUP BY 1, 2, 3
             ORDER BY event_name, EVENT_COUNT DESC",
            placeholders(3, self.events.len())
        );
        self.bind_events(self.scoped(sql))
    }

    /// `EVENT_NAME, LATEST_EVENT_TIMESTAMP` for one device token.
    pub fn latest_event_timestamps(&self, device_token: &str) -> Query {
        let sql = format!(
            "SELECT event_name AS EVENT_NAME, MAX(event_timestamp) AS LATEST_EVENT_TIMESTAMP
             FROM account_events
             WHERE game_name = ?1
               AND environment_name = ?2
               AND json_extract(event_json, '$.deviceToken') = ?3
               AND event_name IN ({})
             GROUP BY event_name
             ORDER BY LATEST_EVENT_TIMESTAMP DESC",
            placeholders(4, self.events.len())
        );
        self.bind_events(self.scoped(sql).bind(device_token))
    }

    /// [`session_durations`](Self::session_durations) narrowed to one device.
    pub fn device_session_durations(&self, device_token: &str) -> Query {
        self.scoped(session_sql(
            "AND json_extract(event_json, '$.deviceToken') = ?4",
        ))
        .bind(self.lookback_modifier())
        .bind(device_token)
    }
}

/// `?start, ?start+1, ...` for `count` parameters.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `?1` game, `?2` environment, `?3` lookback modifier, plus `extra_filter`.
fn session_sql(extra_filter: &str) -> String {
    format!(
        "WITH session_data AS (
             SELECT
                 json_extract(event_json, '$.sessionID') AS session_id,
                 date(event_timestamp) AS session_date,
                 MIN(event_timestamp) AS session_start_time,
                 MAX(event_timestamp) AS session_end_time
             FROM account_events
             WHERE game_name = ?1
               AND environment_name = ?2
               {extra_filter}
               AND json_extract(event_json, '$.sessionID') IS NOT NULL
               AND event_timestamp >= date('now', ?3)
             GROUP BY session_id, session_date
         )
         SELECT
             session_date AS SESSION_DATE,
             (CAST(strftime('%s', session_end_time) AS INTEGER) - CAST(strftime('%s', session_start_time) AS INTEGER)) / 60
                 AS SESSION_DURATION
         FROM session_data
         WHERE (CAST(strftime('%s', session_end_time) AS INTEGER) - CAST(strftime('%s', session_start_time) AS INTEGER)) / 60 > 0
         ORDER BY session_date"
    )
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Session/connection handle: a backend, the session's cache, and the
/// query builders. Dropping it closes the connection and discards the cache.
pub struct EventFetcher {
    backend: Arc<dyn QueryBackend>,
    cache: QueryCache,
    queries: EventQueries,
}

impl EventFetcher {
    pub fn new(backend: Arc<dyn QueryBackend>, queries: EventQueries) -> Self {
        Self {
            backend,
            cache: QueryCache::new(),
            queries,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn queries(&self) -> &EventQueries {
        &self.queries
    }

    pub fn backend(&self) -> &dyn QueryBackend {
        self.backend.as_ref()
    }

    /// Cached execution; the backend is only touched on a miss.
    pub fn fetch(&self, query: &Query) -> AnalyticsResult<Arc<QuerySource>> {
        Ok(self
            .cache
            .get_or_compute(query, |q| self.backend.execute(q))?)
    }

    pub fn total_events_by_name(&self) -> AnalyticsResult<Arc<QuerySource>> {
        self.fetch(&self.queries.total_events_by_name())
    }

    pub fn session_durations(&self) -> AnalyticsResult<Arc<QuerySource>> {
        let raw = self.fetch(&self.queries.session_durations())?;
        Ok(Arc::new(raw.with_temporal_column(SESSION_DATE)?))
    }

    pub fn device_event_counts(&self) -> AnalyticsResult<Arc<QuerySource>> {
        self.fetch(&self.queries.device_event_counts())
    }

    /// Device event counts pivoted into a [`DeviceMatrix`].
    pub fn device_event_matrix(&self) -> AnalyticsResult<DeviceMatrix> {
        let table = self.device_event_counts()?;
        pivot_device_events(&table)
    }

    pub fn latest_event_timestamps(&self, device_token: &str) -> AnalyticsResult<Arc<QuerySource>> {
        let raw = self.fetch(&self.queries.latest_event_timestamps(device_token))?;
        Ok(Arc::new(raw.with_temporal_column(LATEST_EVENT_TIMESTAMP)?))
    }

    pub fn device_session_durations(&self, device_token: &str) -> AnalyticsResult<Arc<QuerySource>> {
        let raw = self.fetch(&self.queries.device_session_durations(device_token))?;
        Ok(Arc::new(raw.with_temporal_column(SESSION_DATE)?))
    }
}

impl std::fmt::Debug for EventFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFetcher")
            .field("backend", &self.backend.describe())
            .field("cached", &self.cache.len())
            .field("queries", &self.queries)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
