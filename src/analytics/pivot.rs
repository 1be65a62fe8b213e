//! Long-to-wide reshape of per-device event counts.
//!
//! Input is one row per (event, device name, device token) with a count;
//! output is a [`DeviceMatrix`] with one row per device name and one column
//! per event name seen anywhere in the input.

use std::collections::{BTreeMap, BTreeSet};

use super::types::{
    AnalyticsError, AnalyticsResult, DEVICE_NAME, DEVICE_TOKEN, DeviceMatrix, DeviceRow,
    EVENT_COUNT, EVENT_NAME, QuerySource, UNKNOWN_DEVICE, Value,
};

/// Pivot a long-format device/event result into a [`DeviceMatrix`].
///
/// Null device names and tokens collapse into one [`UNKNOWN_DEVICE`] row.
/// When a device name carries several tokens the first one encountered is
/// kept. Counts for repeated (device, event) pairs are summed; absent pairs
/// are zero.
pub fn pivot_device_events(rows: &QuerySource) -> AnalyticsResult<DeviceMatrix> {
    let event_col = rows.require_column(EVENT_NAME)?;
    let name_col = rows.require_column(DEVICE_NAME)?;
    let token_col = rows.require_column(DEVICE_TOKEN)?;
    let count_col = rows.require_column(EVENT_COUNT)?;

    let mut event_names: BTreeSet<String> = BTreeSet::new();
    let mut tokens: BTreeMap<String, String> = BTreeMap::new();
    let mut counts: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();

    for (idx, row) in rows.rows.iter().enumerate() {
        let event = match &row[event_col] {
            Value::Text(s) => s.clone(),
            other => {
                return Err(AnalyticsError::Reshape(format!(
                    "row {idx}: {EVENT_NAME} must be text, got {other:?}"
                )));
            }
        };
        let device = identity(&row[name_col]);
        let token = identity(&row[token_col]);
        let count = row[count_col]
            .as_i64()
            .filter(|c| *c >= 0)
            .ok_or_else(|| {
                AnalyticsError::Reshape(format!(
                    "row {idx}: {EVENT_COUNT} must be a non-negative integer, got {:?}",
                    row[count_col]
                ))
            })?;

        tokens.entry(device.clone()).or_insert(token);
        *counts
            .entry(device)
            .or_default()
            .entry(event.clone())
            .or_insert(0) += count;
        event_names.insert(event);
    }

    let event_names: Vec<String> = event_names.into_iter().collect();
    let rows = counts
        .into_iter()
        .map(|(device_name, per_event)| {
            let counts = event_names
                .iter()
                .map(|e| per_event.get(e).copied().unwrap_or(0))
                .collect();
            let device_token = tokens
                .get(&device_name)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
            DeviceRow {
                device_name,
                device_token,
                counts,
            }
        })
        .collect();

    Ok(DeviceMatrix { event_names, rows })
}

fn identity(cell: &Value) -> String {
    match cell {
        Value::Null => UNKNOWN_DEVICE.to_string(),
        Value::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
