//! External chat record sources.
//!
//! The archive delivers raw chat actions as `{sequence, data}` pairs. A
//! [`ChatSource`] pages through them forwards from a cursor, backwards from
//! a cursor, or around a playback time after a seek.

mod http;
mod line;

pub use http::HttpSource;
pub use line::{LineSource, record_time_range};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Default number of records per page, matching the archive API.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Half width of the window returned around a seek target.
pub const AROUND_WINDOW_MS: i64 = 60_000;

/// Seek targets at or below this fetch from the very beginning.
pub const AROUND_START_THRESHOLD_MS: i64 = 5_000;

/// One raw chat action with its archive sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(alias = "seq")]
    pub sequence: u64,
    pub data: Value,
}

impl RawRecord {
    pub fn new(sequence: u64, data: Value) -> Self {
        Self { sequence, data }
    }
}

/// A page of records in ascending sequence order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPage {
    pub records: Vec<RawRecord>,
    /// No further records exist in the direction of the request
    pub exhausted: bool,
}

impl RecordPage {
    pub fn new(records: Vec<RawRecord>, exhausted: bool) -> Self {
        Self { records, exhausted }
    }

    pub fn first_sequence(&self) -> Option<u64> {
        self.records.first().map(|r| r.sequence)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.records.last().map(|r| r.sequence)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The time range `[start, end)` fetched around a seek target.
pub fn around_window(time_ms: i64) -> (i64, i64) {
    if time_ms > AROUND_START_THRESHOLD_MS {
        (time_ms - AROUND_WINDOW_MS, time_ms + AROUND_WINDOW_MS)
    } else {
        (i64::MIN, AROUND_WINDOW_MS)
    }
}

/// Paginated access to archived chat records.
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Records after `sequence`, or from the start when `None`.
    async fn fetch_after(&self, sequence: Option<u64>) -> Result<RecordPage>;

    /// The records immediately before `sequence`.
    async fn fetch_before(&self, sequence: u64) -> Result<RecordPage>;

    /// Records whose time range overlaps the window around `time_ms`.
    async fn fetch_around(&self, time_ms: i64) -> Result<RecordPage>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_record_accepts_seq_alias() {
        let record: RawRecord = serde_json::from_value(json!({"seq": 7, "data": {"a": 1}})).unwrap();
        assert_eq!(record.sequence, 7);
        let record: RawRecord =
            serde_json::from_value(json!({"sequence": 8, "data": null, "video_id": "x"})).unwrap();
        assert_eq!(record.sequence, 8);
    }

    #[test]
    fn test_around_window() {
        assert_eq!(around_window(0), (i64::MIN, 60_000));
        assert_eq!(around_window(5_000), (i64::MIN, 60_000));
        assert_eq!(around_window(90_000), (30_000, 150_000));
    }
}
