//! Row-count discovery and time-range partitioning.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::das::DasDocument;
use crate::domain::TimeWindow;
use crate::error::IngestError;

/// Row count assumed when the header query gave nothing and conservative chunking is on.
pub const UNKNOWN_SIZE_CHUNK_FACTOR: u64 = 10;

fn dimensions_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)dimensions:\s*(.*?)\s*variables:").expect("valid dimensions regex")
    })
}

fn row_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:row|obs)\s*=\s*(\d+)\s*;").expect("valid row regex"))
}

/// Extracts the `row = N;` (or `obs = N;`) dimension from an `.ncHeader` response.
pub fn parse_row_count(header: &str) -> Option<u64> {
    let block = dimensions_regex()
        .captures(header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(header);
    block
        .lines()
        .filter_map(|line| row_regex().captures(line.trim()))
        .find_map(|caps| caps.get(1)?.as_str().parse().ok())
}

/// Reads `actual_range` of the time variable (epoch seconds) as a UTC window.
pub fn time_range_from_das(doc: &DasDocument, time_attribute: &str) -> Option<TimeWindow> {
    let range = doc.attribute(time_attribute, "actual_range")?;
    let mut parts = range.value.split(',').map(str::trim);
    let start = parse_epoch(parts.next()?)?;
    let end = parse_epoch(parts.next()?)?;
    match TimeWindow::new(start, end) {
        Ok(window) => Some(window),
        Err(err) => {
            warn!(variable = %time_attribute, error = %err, "ignoring inverted actual_range");
            None
        }
    }
}

fn parse_epoch(value: &str) -> Option<DateTime<Utc>> {
    let seconds: f64 = value.parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    let millis = (seconds * 1000.0).round();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}

pub fn needs_chunking(row_count: Option<u64>, chunk_size: u64, is_trajectory: bool) -> bool {
    if is_trajectory {
        return false;
    }
    matches!(row_count, Some(count) if count > chunk_size)
}

/// Splits `window` into `ceil(row_count / chunk_size)` contiguous windows of equal
/// length, assuming records are spread evenly over time. The last window always ends
/// exactly at `window.end`.
pub fn plan_chunks(
    row_count: u64,
    chunk_size: u64,
    window: TimeWindow,
) -> Result<Vec<TimeWindow>, IngestError> {
    if chunk_size == 0 {
        return Err(IngestError::ChunkPlan("chunk size must be positive".to_string()));
    }
    if row_count == 0 {
        return Err(IngestError::ChunkPlan("row count must be positive".to_string()));
    }

    let chunks_needed = row_count.div_ceil(chunk_size);
    let total_millis = window.duration().num_milliseconds() as f64;
    let millis_per_chunk = total_millis / row_count as f64 * chunk_size as f64;
    debug!(chunks_needed, millis_per_chunk, "planning time chunks");

    let mut windows = Vec::with_capacity(chunks_needed as usize);
    let mut start = window.start;
    for index in 1..=chunks_needed {
        let end = if index == chunks_needed {
            window.end
        } else {
            let offset = (millis_per_chunk * index as f64).round() as i64;
            (window.start + Duration::milliseconds(offset)).min(window.end)
        };
        windows.push(TimeWindow::new(start, end)?);
        start = end;
    }
    Ok(windows)
}
