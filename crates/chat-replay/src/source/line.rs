//! `.live_chat.json` archives: one raw chat action per line.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use super::{ChatSource, DEFAULT_PAGE_SIZE, RawRecord, RecordPage, around_window};
use crate::error::{ReplayError, Result};
use crate::parser::parse_timestamp_text;

#[derive(Debug, Clone)]
struct IndexedRecord {
    record: RawRecord,
    start_ms: i64,
    end_ms: i64,
}

/// In-memory source over an archived chat file.
///
/// The sequence number of a record is its zero-based line index.
#[derive(Debug, Clone)]
pub struct LineSource {
    records: Vec<IndexedRecord>,
    page_size: usize,
}

impl LineSource {
    /// Index the lines of an archive. Blank lines are skipped.
    pub fn from_lines(text: &str) -> Result<Self> {
        let mut records = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let data: Value = serde_json::from_str(line)
                .map_err(|e| ReplayError::parse(format!("Line {}: {}", index + 1, e)))?;
            let (start_ms, end_ms) = record_time_range(&data);
            records.push(IndexedRecord {
                record: RawRecord::new(index as u64, data),
                start_ms,
                end_ms,
            });
        }
        debug!("Indexed {} chat records", records.len());
        Ok(Self {
            records,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Read and index an archive file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_lines(&text)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(sequence, start, end)` for every record.
    pub fn time_ranges(&self) -> impl Iterator<Item = (u64, i64, i64)> + '_ {
        self.records
            .iter()
            .map(|r| (r.record.sequence, r.start_ms, r.end_ms))
    }

    /// Every record in file order.
    pub fn records(&self) -> impl Iterator<Item = &RawRecord> {
        self.records.iter().map(|r| &r.record)
    }

    fn page(&self, range: std::ops::Range<usize>, exhausted: bool) -> RecordPage {
        RecordPage::new(
            self.records[range].iter().map(|r| r.record.clone()).collect(),
            exhausted,
        )
    }
}

#[async_trait]
impl ChatSource for LineSource {
    async fn fetch_after(&self, sequence: Option<u64>) -> Result<RecordPage> {
        let start = match sequence {
            Some(sequence) => self
                .records
                .partition_point(|r| r.record.sequence <= sequence),
            None => 0,
        };
        let end = (start + self.page_size).min(self.records.len());
        Ok(self.page(start..end, end == self.records.len()))
    }

    async fn fetch_before(&self, sequence: u64) -> Result<RecordPage> {
        let end = self
            .records
            .partition_point(|r| r.record.sequence < sequence);
        let start = end.saturating_sub(self.page_size);
        Ok(self.page(start..end, start == 0))
    }

    async fn fetch_around(&self, time_ms: i64) -> Result<RecordPage> {
        let (lower, upper) = around_window(time_ms);
        let records: Vec<RawRecord> = self
            .records
            .iter()
            .filter(|r| r.start_ms < upper && lower < r.end_ms)
            .map(|r| r.record.clone())
            .collect();
        let exhausted = match records.last() {
            Some(last) => self
                .records
                .last()
                .is_none_or(|r| r.record.sequence == last.sequence),
            None => self
                .records
                .iter()
                .all(|r| r.start_ms < upper),
        };
        Ok(RecordPage::new(records, exhausted))
    }
}

/// Time range `[start, end)` covered by a raw record.
///
/// The start is `videoOffsetTimeMsec`. Tickers with an offset of 0 fall back
/// to the countdown text of their renderer and last `durationSec`; every
/// other record is 1 ms long. Malformed fields count as 0 so that indexing
/// never rejects a record; the parser reports them at ingestion.
pub fn record_time_range(data: &Value) -> (i64, i64) {
    let replay = data.get("replayChatItemAction");
    let mut offset = replay
        .and_then(|r| r.get("videoOffsetTimeMsec"))
        .and_then(lenient_i64)
        .unwrap_or(0);
    let action = replay.and_then(|r| r.pointer("/actions/0"));

    let ticker = action
        .and_then(|a| a.pointer("/addLiveChatTickerItemAction/item"))
        .and_then(|item| item.as_object())
        .and_then(|item| item.values().next());
    if let (0, Some(ticker)) = (offset, ticker) {
        offset = ticker
            .pointer("/showItemEndpoint/showLiveChatItemEndpoint/renderer")
            .and_then(|item| item.as_object())
            .and_then(|item| item.values().next())
            .and_then(|renderer| renderer.pointer("/timestampText/simpleText"))
            .and_then(Value::as_str)
            .and_then(|text| parse_timestamp_text(text).ok())
            .unwrap_or(0);
    }

    let duration = ticker
        .and_then(|t| t.get("durationSec"))
        .and_then(lenient_i64)
        .map(|sec| sec.saturating_mul(1000))
        .filter(|ms| *ms > 0)
        .unwrap_or(1);
    (offset, offset.saturating_add(duration))
}

fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
