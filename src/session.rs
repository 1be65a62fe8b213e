//! Dashboard session: connection handle, cache lifetime and row selection.
//!
//! A session is active between [`login`](DashboardSession::login) and
//! [`logout`](DashboardSession::logout). Any failed slot in a batch ends the
//! session: the fetcher (connection and cache) is dropped and the caller
//! must log in again.

use std::sync::Arc;

use tracing::{info, warn};

use crate::analytics::derive::{
    DailyAverage, DurationMetrics, daily_average_durations, duration_metrics,
};
use crate::analytics::fetch::{BoundQueryTask, QueryTask, run_batch, run_batch_with};
use crate::analytics::{
    AnalyticsError, AnalyticsResult, DeviceMatrix, DeviceRow, EventFetcher, EventQueries,
    QueryBackend, QuerySource,
};

/// Explicit session flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub active: bool,
    pub selected_row: Option<usize>,
    pub cache_cleared: bool,
}

/// Result of the primary batch.
#[derive(Debug, Clone)]
pub struct Overview {
    /// `EVENT_NAME, EVENT_COUNT`.
    pub totals: Arc<QuerySource>,
    /// `SESSION_DATE, SESSION_DURATION`.
    pub sessions: Arc<QuerySource>,
    pub devices: Arc<DeviceMatrix>,
}

impl Overview {
    pub fn daily_averages(&self) -> AnalyticsResult<Vec<DailyAverage>> {
        daily_average_durations(&self.sessions)
    }

    pub fn duration_metrics(&self) -> AnalyticsResult<Option<DurationMetrics>> {
        duration_metrics(&self.sessions)
    }

    /// JSON envelope for CLI consumers.
    pub fn to_json(&self) -> AnalyticsResult<serde_json::Value> {
        Ok(serde_json::json!({
            "totals": &*self.totals,
            "sessions": {
                "metrics": self.duration_metrics()?,
                "daily_average": self.daily_averages()?,
                "rows": self.sessions.len(),
            },
            "devices": {
                "columns": self.devices.columns(),
                "rows": &self.devices.rows,
            },
        }))
    }
}

/// Result of the drill-down batch for one device.
#[derive(Debug, Clone)]
pub struct DeviceDetail {
    pub row: usize,
    pub device: DeviceRow,
    pub event_counts: Vec<(String, i64)>,
    /// `EVENT_NAME, LATEST_EVENT_TIMESTAMP`.
    pub latest_timestamps: Arc<QuerySource>,
    /// `SESSION_DATE, SESSION_DURATION` for this device.
    pub sessions: Arc<QuerySource>,
}

impl DeviceDetail {
    pub fn daily_averages(&self) -> AnalyticsResult<Vec<DailyAverage>> {
        daily_average_durations(&self.sessions)
    }

    pub fn to_json(&self) -> AnalyticsResult<serde_json::Value> {
        let counts: Vec<serde_json::Value> = self
            .event_counts
            .iter()
            .map(|(name, count)| serde_json::json!({ "EVENT_NAME": name, "EVENT_COUNT": count }))
            .collect();
        Ok(serde_json::json!({
            "row": self.row,
            "device_name": self.device.device_name,
            "device_token": self.device.device_token,
            "event_counts": counts,
            "latest_timestamps": &*self.latest_timestamps,
            "daily_average": self.daily_averages()?,
        }))
    }
}

enum Dataset {
    Table(Arc<QuerySource>),
    Matrix(DeviceMatrix),
}

/// One user's dashboard session.
#[derive(Debug, Default)]
pub struct DashboardSession {
    fetcher: Option<Arc<EventFetcher>>,
    state: SessionState,
    devices: Option<Arc<DeviceMatrix>>,
}

impl DashboardSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn fetcher(&self) -> Option<&EventFetcher> {
        self.fetcher.as_deref()
    }

    /// The device matrix from the last successful overview.
    pub fn devices(&self) -> Option<&DeviceMatrix> {
        self.devices.as_deref()
    }

    /// Start a session on `backend`. Any previous connection and cache are
    /// discarded, so changing credentials always starts from an empty cache.
    pub fn login(&mut self, backend: Arc<dyn QueryBackend>, queries: EventQueries) {
        info!(
            target: "evdash::session",
            backend = %backend.describe(),
            environment = %queries.environment,
            "session started"
        );
        self.fetcher = Some(Arc::new(EventFetcher::new(backend, queries)));
        self.devices = None;
        self.state = SessionState {
            active: true,
            selected_row: None,
            cache_cleared: false,
        };
    }

    /// Drop the connection and cache and reset every flag.
    pub fn logout(&mut self) {
        if self.fetcher.take().is_some() {
            info!(target: "evdash::session", "session closed");
        }
        self.devices = None;
        self.state = SessionState::default();
    }

    /// Empty the cache, drop the connection and deactivate until the next
    /// login.
    pub fn clear_cache(&mut self) {
        if let Some(fetcher) = self.fetcher.take() {
            fetcher.cache().clear();
            info!(target: "evdash::session", "cache cleared, reload required");
        }
        self.devices = None;
        self.state.active = false;
        self.state.selected_row = None;
        self.state.cache_cleared = true;
    }

    fn live_fetcher(&self) -> AnalyticsResult<Arc<EventFetcher>> {
        if self.state.cache_cleared {
            return Err(AnalyticsError::CacheCleared);
        }
        match (&self.fetcher, self.state.active) {
            (Some(fetcher), true) => Ok(Arc::clone(fetcher)),
            _ => Err(AnalyticsError::NotActive),
        }
    }

    fn end_after_failure(&mut self, err: &AnalyticsError) {
        warn!(
            target: "evdash::session",
            error = %err,
            "batch failed, closing connection; credentials must be entered again"
        );
        self.logout();
    }

    /// Run the primary batch: totals, session durations and the device
    /// matrix, concurrently.
    pub fn load_overview(&mut self) -> AnalyticsResult<Overview> {
        let fetcher = self.live_fetcher()?;
        let f = fetcher.as_ref();

        let tasks: Vec<QueryTask<'_, Dataset>> = vec![
            Box::new(|| f.total_events_by_name().map(Dataset::Table)),
            Box::new(|| f.session_durations().map(Dataset::Table)),
            Box::new(|| f.device_event_matrix().map(Dataset::Matrix)),
        ];
        let results = match run_batch(tasks).into_results() {
            Ok(results) => results,
            Err(err) => {
                self.end_after_failure(&err);
                return Err(err);
            }
        };
        fetcher.cache().log_stats();

        let mut it = results.into_iter();
        let (totals, sessions, devices) = match (it.next(), it.next(), it.next()) {
            (Some(Dataset::Table(t)), Some(Dataset::Table(s)), Some(Dataset::Matrix(m))) => {
                (t, s, Arc::new(m))
            }
            _ => {
                return Err(AnalyticsError::Reshape(
                    "primary batch returned an unexpected slot layout".into(),
                ));
            }
        };

        if self.devices.as_deref() != Some(devices.as_ref()) {
            self.state.selected_row = None;
        }
        self.devices = Some(Arc::clone(&devices));

        Ok(Overview {
            totals,
            sessions,
            devices,
        })
    }

    /// Select a row of the current device matrix.
    pub fn select_row(&mut self, index: usize) -> AnalyticsResult<&DeviceRow> {
        let devices = self.devices.as_ref().ok_or(AnalyticsError::NoSelection)?;
        devices.row(index)?;
        self.state.selected_row = Some(index);
        devices.row(index)
    }

    /// Select the row carrying `token`.
    pub fn select_token(&mut self, token: &str) -> AnalyticsResult<usize> {
        let index = self
            .devices
            .as_ref()
            .and_then(|d| d.find_token(token))
            .ok_or_else(|| AnalyticsError::TokenNotFound(token.to_string()))?;
        self.state.selected_row = Some(index);
        Ok(index)
    }

    pub fn clear_selection(&mut self) {
        self.state.selected_row = None;
    }

    pub fn selected_device(&self) -> Option<&DeviceRow> {
        let index = self.state.selected_row?;
        self.devices.as_ref()?.rows.get(index)
    }

    /// Run the drill-down batch for the selected device: latest per-event
    /// timestamps and per-day session durations, with the device token bound
    /// to both.
    pub fn drill_down(&mut self) -> AnalyticsResult<DeviceDetail> {
        let fetcher = self.live_fetcher()?;
        let row = self.state.selected_row.ok_or(AnalyticsError::NoSelection)?;
        let devices = self.devices.clone().ok_or(AnalyticsError::NoSelection)?;
        let device = devices.row(row)?.clone();
        let event_counts = devices.event_counts(row)?;
        let f = fetcher.as_ref();

        let tasks: Vec<BoundQueryTask<'_, str, Arc<QuerySource>>> = vec![
            Box::new(|token: &str| f.latest_event_timestamps(token)),
            Box::new(|token: &str| f.device_session_durations(token)),
        ];
        let results = match run_batch_with(tasks, device.device_token.as_str()).into_results() {
            Ok(results) => results,
            Err(err) => {
                self.end_after_failure(&err);
                return Err(err);
            }
        };

        let mut it = results.into_iter();
        let (Some(latest_timestamps), Some(sessions)) = (it.next(), it.next()) else {
            return Err(AnalyticsError::Reshape(
                "drill-down batch returned an unexpected slot layout".into(),
            ));
        };

        Ok(DeviceDetail {
            row,
            device,
            event_counts,
            latest_timestamps,
            sessions,
        })
    }
}
