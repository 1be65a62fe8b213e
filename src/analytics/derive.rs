//! Derived session metrics.
//!
//! All division operations are safe against zero denominators and produce
//! `None` rather than NaN / Infinity.

use std::collections::BTreeMap;

use serde::Serialize;

use super::types::{AnalyticsResult, QuerySource, SESSION_DATE, SESSION_DURATION, Value};

/// Mean session duration for one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAverage {
    /// `YYYY-MM-DD`.
    pub day: String,
    pub average_minutes: f64,
    pub sessions: usize,
}

/// Shortest / longest / mean duration over a session-duration result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationMetrics {
    pub shortest: i64,
    pub longest: i64,
    pub average: f64,
    pub sessions: usize,
}

/// Group `SESSION_DURATION` by `SESSION_DATE` and average per day, in date
/// order. Rows with a null date or duration are skipped.
pub fn daily_average_durations(sessions: &QuerySource) -> AnalyticsResult<Vec<DailyAverage>> {
    let date_col = sessions.require_column(SESSION_DATE)?;
    let dur_col = sessions.require_column(SESSION_DURATION)?;

    let mut days: BTreeMap<String, (i64, usize)> = BTreeMap::new();
    for row in &sessions.rows {
        let Some(day) = day_key(&row[date_col]) else {
            continue;
        };
        let Some(minutes) = row[dur_col].as_i64() else {
            continue;
        };
        let entry = days.entry(day).or_insert((0, 0));
        entry.0 += minutes;
        entry.1 += 1;
    }

    Ok(days
        .into_iter()
        .filter_map(|(day, (sum, n))| {
            safe_div(sum, n as i64).map(|average_minutes| DailyAverage {
                day,
                average_minutes,
                sessions: n,
            })
        })
        .collect())
}

/// Shortest, longest and mean `SESSION_DURATION`; `None` for an empty result.
pub fn duration_metrics(sessions: &QuerySource) -> AnalyticsResult<Option<DurationMetrics>> {
    let durations: Vec<i64> = sessions
        .column(SESSION_DURATION)?
        .filter_map(Value::as_i64)
        .collect();

    let (Some(shortest), Some(longest)) = (
        durations.iter().copied().min(),
        durations.iter().copied().max(),
    ) else {
        return Ok(None);
    };
    let total: i64 = durations.iter().sum();

    Ok(safe_div(total, durations.len() as i64).map(|average| DurationMetrics {
        shortest,
        longest,
        average,
        sessions: durations.len(),
    }))
}

/// Safe division returning `None` when the denominator is zero.
pub fn safe_div(numerator: i64, denominator: i64) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}

fn day_key(cell: &Value) -> Option<String> {
    match cell {
        Value::Null => None,
        Value::Text(s) => Some(s.get(..10).unwrap_or(s).to_string()),
        other => other
            .as_date()
            .map(|d| d.format("%Y-%m-%d").to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
