//! Time-indexed chat event store.
//!
//! The store owns three collections fed from a [`ChatSource`]:
//!
//! - `messages`: point events sorted by offset
//! - `tickers`: interval events in an [`IntervalIndex`]
//! - `banners`: banner history sorted by offset
//!
//! Fetching is split into a *plan* step that captures the cursor state, a
//! *run* step that talks to the source without touching the store, and an
//! *apply* step that merges the staged batch. The apply step compares the
//! captured [`CursorToken`] with the live one and drops results that a seek
//! or another fetch has made obsolete, so the run step can happen on another
//! task while the store keeps answering queries. A batch is merged entirely
//! or not at all.

use rustc_hash::FxHashSet;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::ReplayConfig;
use crate::error::{ReplayError, Result};
use crate::event::{ChatEvent, EventKind};
use crate::interval::IntervalIndex;
use crate::parser::EventParser;
use crate::source::{ChatSource, around_window};

/// Default upper bound on pages pulled by one forward fetch.
pub const DEFAULT_MAX_PAGES: usize = 8;

/// Cursor state a fetch was planned against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorToken {
    generation: u64,
    sequence: Option<u64>,
}

impl fmt::Display for CursorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sequence {
            Some(sequence) => write!(f, "{}@{}", self.generation, sequence),
            None => write!(f, "{}@-", self.generation),
        }
    }
}

/// Parsed events staged by a fetch, not yet visible in the store.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub events: Vec<ChatEvent>,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    pub exhausted: bool,
}

/// Outcome of a fetch run, tagged with the token it was planned with.
#[derive(Debug)]
pub struct Fetched {
    token: CursorToken,
    result: Result<Batch>,
}

impl Fetched {
    pub fn token(&self) -> CursorToken {
        self.token
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// A planned forward fetch.
#[derive(Debug, Clone)]
pub struct ForwardFetch {
    token: CursorToken,
    target_ms: i64,
    max_pages: usize,
    parser: EventParser,
}

impl ForwardFetch {
    pub fn target_ms(&self) -> i64 {
        self.target_ms
    }

    /// Pull pages until the source runs dry, `max_pages` is reached or a
    /// point event lands past the target.
    pub async fn run(self, source: &dyn ChatSource) -> Fetched {
        let token = self.token;
        Fetched {
            token,
            result: self.stage(source).await,
        }
    }

    async fn stage(&self, source: &dyn ChatSource) -> Result<Batch> {
        let mut batch = Batch::default();
        let mut after = self.token.sequence;
        for _ in 0..self.max_pages {
            let page = source.fetch_after(after).await?;
            for record in &page.records {
                let events = self
                    .parser
                    .parse(&record.data)
                    .map_err(|e| e.at_sequence(record.sequence))?;
                let past_target = events
                    .iter()
                    .rev()
                    .find(|e| e.kind() == EventKind::Point)
                    .is_some_and(|e| e.offset_ms() > self.target_ms);
                batch.events.extend(events);
                if batch.first_sequence.is_none() {
                    batch.first_sequence = Some(record.sequence);
                }
                batch.last_sequence = Some(record.sequence);
                after = Some(record.sequence);
                if past_target {
                    return Ok(batch);
                }
            }
            if page.exhausted || page.is_empty() {
                batch.exhausted = page.exhausted;
                break;
            }
        }
        Ok(batch)
    }
}

/// A planned backward fetch.
#[derive(Debug, Clone)]
pub struct BackwardFetch {
    token: CursorToken,
    before: u64,
    wanted: usize,
    max_pages: usize,
    parser: EventParser,
}

impl BackwardFetch {
    /// Pull pages before the backward cursor until `wanted` point events
    /// are staged or the beginning is reached.
    pub async fn run(self, source: &dyn ChatSource) -> Fetched {
        let token = self.token;
        Fetched {
            token,
            result: self.stage(source).await,
        }
    }

    async fn stage(&self, source: &dyn ChatSource) -> Result<Batch> {
        let mut pages = Vec::new();
        let mut before = self.before;
        let mut points = 0;
        let mut exhausted = false;
        for _ in 0..self.max_pages {
            let page = source.fetch_before(before).await?;
            let mut events = Vec::new();
            for record in &page.records {
                let parsed = self
                    .parser
                    .parse(&record.data)
                    .map_err(|e| e.at_sequence(record.sequence))?;
                points += parsed.iter().filter(|e| e.kind() == EventKind::Point).count();
                events.extend(parsed);
            }
            let first = page.first_sequence();
            pages.push((first, events));
            exhausted = page.exhausted;
            match first {
                Some(first) if !exhausted && points < self.wanted => before = first,
                _ => break,
            }
        }

        let mut batch = Batch {
            exhausted,
            ..Default::default()
        };
        // Pages were fetched newest first
        for (first, events) in pages.into_iter().rev() {
            if batch.first_sequence.is_none() {
                batch.first_sequence = first;
            }
            batch.events.extend(events);
        }
        Ok(batch)
    }
}

/// A planned anchor fetch after a seek.
#[derive(Debug, Clone)]
pub struct ResetFetch {
    token: CursorToken,
    time_ms: i64,
    parser: EventParser,
}

impl ResetFetch {
    pub fn time_ms(&self) -> i64 {
        self.time_ms
    }

    pub async fn run(self, source: &dyn ChatSource) -> Fetched {
        let token = self.token;
        Fetched {
            token,
            result: self.stage(source).await,
        }
    }

    async fn stage(&self, source: &dyn ChatSource) -> Result<Batch> {
        let page = source.fetch_around(self.time_ms).await?;
        let (lower, _) = around_window(self.time_ms);
        let mut events = Vec::new();
        // Tickers that began before the window can sit far below it in
        // sequence order; backward paging starts at the first record inside.
        let mut first_inside = None;
        for record in &page.records {
            let parsed = self
                .parser
                .parse(&record.data)
                .map_err(|e| e.at_sequence(record.sequence))?;
            if first_inside.is_none() && parsed.iter().any(|e| e.offset_ms() >= lower) {
                first_inside = Some(record.sequence);
            }
            events.extend(parsed);
        }
        Ok(Batch {
            events,
            first_sequence: first_inside,
            last_sequence: page.last_sequence(),
            exhausted: page.exhausted,
        })
    }
}

fn ticker_start(event: &ChatEvent) -> i64 {
    event.offset_ms()
}

fn ticker_end(event: &ChatEvent) -> i64 {
    event.end_ms()
}

/// In-memory chat event store for one replay session.
#[derive(Debug)]
pub struct ChatEventStore {
    parser: EventParser,
    max_pages: usize,

    messages: Vec<ChatEvent>,
    tickers: IntervalIndex<ChatEvent>,
    banners: Vec<ChatEvent>,
    seen: FxHashSet<(EventKind, String)>,

    /// Bumped on every reset; results planned under an older generation are stale
    generation: u64,
    /// Last sequence ingested going forward
    forward: Option<u64>,
    /// First sequence ingested going backward
    backward: Option<u64>,
    forward_exhausted: bool,
    backward_exhausted: bool,
    /// Seek target whose anchor fetch has not been applied yet
    pending_reset: Option<i64>,
    /// Set by an ingestion fault; cleared by the next reset
    halted: bool,
}

impl ChatEventStore {
    pub fn new(parser: EventParser) -> Self {
        Self {
            parser,
            max_pages: DEFAULT_MAX_PAGES,
            messages: Vec::new(),
            tickers: IntervalIndex::new(ticker_start, ticker_end),
            banners: Vec::new(),
            seen: FxHashSet::default(),
            generation: 0,
            forward: None,
            backward: None,
            forward_exhausted: false,
            backward_exhausted: false,
            pending_reset: None,
            halted: false,
        }
    }

    pub fn from_config(config: &ReplayConfig) -> Result<Self> {
        Ok(Self::new(EventParser::new(config)?).with_max_pages(config.max_pages_per_fetch))
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn messages(&self) -> &[ChatEvent] {
        &self.messages
    }

    pub fn tickers(&self) -> &IntervalIndex<ChatEvent> {
        &self.tickers
    }

    pub fn banners(&self) -> &[ChatEvent] {
        &self.banners
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether an ingestion fault stopped forward fetching.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_forward_exhausted(&self) -> bool {
        self.forward_exhausted
    }

    /// Seek target still waiting for its anchor fetch.
    pub fn pending_reset(&self) -> Option<i64> {
        self.pending_reset
    }

    fn forward_token(&self) -> CursorToken {
        CursorToken {
            generation: self.generation,
            sequence: self.forward,
        }
    }

    fn backward_token(&self) -> CursorToken {
        CursorToken {
            generation: self.generation,
            sequence: self.backward,
        }
    }

    fn check_token(&self, requested: CursorToken, current: CursorToken) -> Result<()> {
        if requested == current {
            Ok(())
        } else {
            Err(ReplayError::StaleCursor {
                requested: requested.to_string(),
                current: current.to_string(),
            })
        }
    }

    // ---------------------------------------------------------------------
    // Planning
    // ---------------------------------------------------------------------

    /// Plan a forward fetch towards `target_ms`, or `None` when the cached
    /// tail already reaches it or no forward fetch is possible.
    pub fn plan_forward(&self, target_ms: i64) -> Option<ForwardFetch> {
        if self.halted || self.forward_exhausted || self.pending_reset.is_some() {
            return None;
        }
        if self
            .messages
            .last()
            .is_some_and(|tail| tail.offset_ms() >= target_ms)
        {
            return None;
        }
        Some(ForwardFetch {
            token: self.forward_token(),
            target_ms,
            max_pages: self.max_pages,
            parser: self.parser.clone(),
        })
    }

    /// Plan a fetch of the `count` point events preceding `anchor_id`.
    ///
    /// Returns `None` when the store already holds enough history or the
    /// source has nothing earlier.
    pub fn plan_backward(
        &self,
        before_offset_ms: i64,
        count: usize,
        anchor_id: &str,
    ) -> Result<Option<BackwardFetch>> {
        let from = self
            .messages
            .partition_point(|m| m.offset_ms() < before_offset_ms);
        let anchor = self.messages[from..]
            .iter()
            .position(|m| m.id() == anchor_id)
            .map(|i| i + from)
            .ok_or_else(|| ReplayError::UnknownAnchor(anchor_id.to_string()))?;
        if anchor >= count || self.backward_exhausted || self.pending_reset.is_some() {
            return Ok(None);
        }
        let Some(before) = self.backward else {
            return Ok(None);
        };
        Ok(Some(BackwardFetch {
            token: self.backward_token(),
            before,
            wanted: count - anchor,
            max_pages: self.max_pages,
            parser: self.parser.clone(),
        }))
    }

    /// Drop every collection and cursor, then plan the anchor fetch around
    /// `time_ms`. Results of fetches planned before this call become stale.
    pub fn plan_reset(&mut self, time_ms: i64) -> ResetFetch {
        self.messages.clear();
        self.tickers.clear();
        self.banners.clear();
        self.seen.clear();
        self.generation += 1;
        self.forward = None;
        self.backward = None;
        self.forward_exhausted = false;
        self.backward_exhausted = false;
        self.halted = false;
        self.pending_reset = Some(time_ms);
        info!(generation = self.generation, "Resetting chat store around {}ms", time_ms);
        self.retry_reset(time_ms)
    }

    /// Re-plan the pending anchor fetch after a transport failure.
    pub fn retry_reset(&self, time_ms: i64) -> ResetFetch {
        ResetFetch {
            token: CursorToken {
                generation: self.generation,
                sequence: None,
            },
            time_ms,
            parser: self.parser.clone(),
        }
    }

    // ---------------------------------------------------------------------
    // Applying
    // ---------------------------------------------------------------------

    /// Merge a forward fetch. Returns the number of new events.
    pub fn apply_forward(&mut self, fetched: Fetched) -> Result<usize> {
        if let Err(stale) = self.check_token(fetched.token, self.forward_token()) {
            debug!("Discarding forward fetch: {}", stale);
            return Ok(0);
        }
        let batch = self.accept(fetched.result)?;
        if batch.last_sequence.is_some() {
            self.forward = batch.last_sequence;
        }
        if self.backward.is_none() {
            self.backward = batch.first_sequence;
            self.backward_exhausted = fetched.token.sequence.is_none();
        }
        self.forward_exhausted = batch.exhausted;
        debug!(
            "Forward cursor at {:?}, exhausted: {}",
            self.forward, self.forward_exhausted
        );
        Ok(self.ingest(batch.events))
    }

    /// Merge a backward fetch. Returns the number of new events.
    pub fn apply_backward(&mut self, fetched: Fetched) -> Result<usize> {
        if let Err(stale) = self.check_token(fetched.token, self.backward_token()) {
            debug!("Discarding backward fetch: {}", stale);
            return Ok(0);
        }
        let batch = self.accept(fetched.result)?;
        if batch.first_sequence.is_some() {
            self.backward = batch.first_sequence;
        }
        self.backward_exhausted = batch.exhausted;
        debug!(
            "Backward cursor at {:?}, exhausted: {}",
            self.backward, self.backward_exhausted
        );
        Ok(self.ingest_unsorted(batch.events))
    }

    /// Merge the anchor fetch of a reset. Returns the number of new events.
    pub fn apply_reset(&mut self, fetched: Fetched) -> Result<usize> {
        let current = CursorToken {
            generation: self.generation,
            sequence: None,
        };
        if self.pending_reset.is_none() {
            debug!("Discarding reset fetch: no reset pending");
            return Ok(0);
        }
        if let Err(stale) = self.check_token(fetched.token, current) {
            debug!("Discarding reset fetch: {}", stale);
            return Ok(0);
        }
        let batch = match self.accept(fetched.result) {
            Ok(batch) => batch,
            Err(e) => {
                if e.is_ingestion_fault() {
                    self.pending_reset = None;
                }
                return Err(e);
            }
        };
        self.pending_reset = None;
        self.forward = batch.last_sequence;
        self.backward = batch.first_sequence;
        self.forward_exhausted = batch.exhausted;
        self.backward_exhausted = batch.first_sequence.is_none();
        let added = self.ingest_unsorted(batch.events);
        debug!(
            "Reset applied with {} events, cursors {:?}..{:?}",
            added, self.backward, self.forward
        );
        Ok(added)
    }

    fn accept(&mut self, result: Result<Batch>) -> Result<Batch> {
        result.inspect_err(|e| {
            if e.is_ingestion_fault() {
                warn!("Halting chat ingestion: {}", e);
                self.halted = true;
            }
        })
    }

    // ---------------------------------------------------------------------
    // Convenience wrappers
    // ---------------------------------------------------------------------

    /// Fetch forward until the tail passes `target_ms`.
    pub async fn fetch_forward(&mut self, source: &dyn ChatSource, target_ms: i64) -> Result<usize> {
        match self.plan_forward(target_ms) {
            Some(fetch) => {
                let fetched = fetch.run(source).await;
                self.apply_forward(fetched)
            }
            None => Ok(0),
        }
    }

    /// Make sure up to `count` point events before `anchor_id` are cached,
    /// then return them oldest first.
    pub async fn fetch_backward(
        &mut self,
        source: &dyn ChatSource,
        before_offset_ms: i64,
        count: usize,
        anchor_id: &str,
    ) -> Result<Vec<ChatEvent>> {
        if let Some(fetch) = self.plan_backward(before_offset_ms, count, anchor_id)? {
            let fetched = fetch.run(source).await;
            self.apply_backward(fetched)?;
        }
        Ok(self.messages_preceding(anchor_id, count)?.to_vec())
    }

    /// Clear the store and reload it around `time_ms`.
    pub async fn reset_around(&mut self, source: &dyn ChatSource, time_ms: i64) -> Result<usize> {
        let fetch = self.plan_reset(time_ms);
        let fetched = fetch.run(source).await;
        self.apply_reset(fetched)
    }

    // ---------------------------------------------------------------------
    // Ingestion
    // ---------------------------------------------------------------------

    fn is_new(&mut self, event: &ChatEvent) -> bool {
        self.seen.insert((event.kind(), event.id().to_string()))
    }

    /// Insert events arriving roughly in offset order.
    fn ingest(&mut self, events: Vec<ChatEvent>) -> usize {
        let mut added = 0;
        for event in events {
            if !self.is_new(&event) {
                continue;
            }
            added += 1;
            match event.kind() {
                EventKind::Point => insert_sorted(&mut self.messages, event),
                EventKind::Interval => self.tickers.push(event),
                EventKind::Banner => insert_sorted(&mut self.banners, event),
            }
        }
        added
    }

    /// Insert a batch that may interleave with cached events anywhere.
    fn ingest_unsorted(&mut self, events: Vec<ChatEvent>) -> usize {
        let mut points = Vec::new();
        let mut tickers = Vec::new();
        let mut banners = Vec::new();
        for event in events {
            if !self.is_new(&event) {
                continue;
            }
            match event.kind() {
                EventKind::Point => points.push(event),
                EventKind::Interval => tickers.push(event),
                EventKind::Banner => banners.push(event),
            }
        }
        let added = points.len() + tickers.len() + banners.len();
        merge_sorted(&mut self.messages, points);
        merge_sorted(&mut self.banners, banners);
        if !tickers.is_empty() {
            self.tickers.extend_unsorted(tickers);
        }
        added
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Number of point events with `offset <= time_ms`.
    fn count_at(&self, time_ms: i64) -> usize {
        self.messages.partition_point(|m| m.offset_ms() <= time_ms)
    }

    /// Up to `max_count` point events at or before `time_ms`, oldest first.
    pub fn messages_before(&self, time_ms: i64, max_count: usize) -> &[ChatEvent] {
        let end = self.count_at(time_ms);
        &self.messages[end.saturating_sub(max_count)..end]
    }

    /// Point events at or before `time_ms` with `offset + window_ms > time_ms`,
    /// oldest first.
    pub fn messages_in_window(&self, time_ms: i64, window_ms: i64) -> &[ChatEvent] {
        let end = self.count_at(time_ms);
        let start = self
            .messages
            .partition_point(|m| m.offset_ms().saturating_add(window_ms) <= time_ms);
        &self.messages[start.min(end)..end]
    }

    /// Up to `count` point events strictly before `anchor_id`, oldest first.
    pub fn messages_preceding(&self, anchor_id: &str, count: usize) -> Result<&[ChatEvent]> {
        let anchor = self
            .messages
            .iter()
            .rposition(|m| m.id() == anchor_id)
            .ok_or_else(|| ReplayError::UnknownAnchor(anchor_id.to_string()))?;
        Ok(&self.messages[anchor.saturating_sub(count)..anchor])
    }

    pub fn message(&self, id: &str) -> Option<&ChatEvent> {
        self.messages.iter().rev().find(|m| m.id() == id)
    }

    /// Tickers active at `time_ms`, ordered by start.
    pub fn active_tickers(&self, time_ms: i64) -> Vec<&ChatEvent> {
        self.tickers.active_at(time_ms)
    }

    /// The latest banner with `offset <= time_ms`.
    pub fn active_banner(&self, time_ms: i64) -> Option<&ChatEvent> {
        let count = self.banners.partition_point(|b| b.offset_ms() <= time_ms);
        count.checked_sub(1).map(|i| &self.banners[i])
    }
}

/// Insert after every event with an offset not above the new one.
fn insert_sorted(events: &mut Vec<ChatEvent>, event: ChatEvent) {
    match events.last() {
        Some(last) if last.offset_ms() > event.offset_ms() => {
            let at = events.partition_point(|e| e.offset_ms() <= event.offset_ms());
            events.insert(at, event);
        }
        _ => events.push(event),
    }
}

/// Merge `new` into `events`; on equal offsets new events come first.
fn merge_sorted(events: &mut Vec<ChatEvent>, mut new: Vec<ChatEvent>) {
    if new.is_empty() {
        return;
    }
    new.append(events);
    new.sort_by_key(ChatEvent::offset_ms);
    *events = new;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChatMessage, MessagePart};
    use crate::source::{LineSource, RecordPage};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    fn point(id: &str, offset_ms: i64) -> ChatEvent {
        ChatEvent::MessageNormal(ChatMessage {
            id: id.to_string(),
            offset_ms,
            author_name: "Alice".to_string(),
            parts: vec![MessagePart::text(id)],
            ..Default::default()
        })
    }

    fn ids(events: &[ChatEvent]) -> Vec<&str> {
        events.iter().map(ChatEvent::id).collect()
    }

    fn store() -> ChatEventStore {
        ChatEventStore::new(EventParser::for_channel("UCowner"))
    }

    fn message_line(id: &str, offset_ms: i64) -> Value {
        json!({"replayChatItemAction": {"videoOffsetTimeMsec": offset_ms.to_string(), "actions": [
            {"addChatItemAction": {"item": {"liveChatTextMessageRenderer": {
                "id": id, "authorName": {"simpleText": "A"}, "message": {"runs": [{"text": id}]}
            }}}}
        ]}})
    }

    fn ticker_line(id: &str, offset_ms: i64, duration_sec: u32) -> Value {
        json!({"replayChatItemAction": {"videoOffsetTimeMsec": offset_ms.to_string(), "actions": [
            {"addLiveChatTickerItemAction": {"item": {"liveChatTickerSponsorItemRenderer": {
                "id": id, "durationSec": duration_sec, "fullDurationSec": duration_sec,
                "showItemEndpoint": {"showLiveChatItemEndpoint": {"renderer": {
                    "liveChatMembershipItemRenderer": {"id": format!("{id}-member")}
                }}}
            }}}}
        ]}})
    }

    fn banner_line(id: &str, offset_ms: i64) -> Value {
        json!({"replayChatItemAction": {"videoOffsetTimeMsec": offset_ms.to_string(), "actions": [
            {"addBannerToLiveChatCommand": {"bannerRenderer": {"liveChatBannerRenderer": {
                "contents": {"liveChatTextMessageRenderer": {"id": id, "authorName": {"simpleText": "Owner"}}}
            }}}}
        ]}})
    }

    fn source(lines: &[Value]) -> LineSource {
        let text = lines
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        LineSource::from_lines(&text).unwrap()
    }

    /// Messages every second from 0 to 299s.
    fn long_archive() -> LineSource {
        source(
            &(0..300)
                .map(|i| message_line(&format!("m{i}"), i * 1_000))
                .collect::<Vec<_>>(),
        )
        .with_page_size(20)
    }

    struct FailingSource;

    #[async_trait]
    impl ChatSource for FailingSource {
        async fn fetch_after(&self, _: Option<u64>) -> Result<RecordPage> {
            Err(ReplayError::source("connection reset"))
        }
        async fn fetch_before(&self, _: u64) -> Result<RecordPage> {
            Err(ReplayError::source("connection reset"))
        }
        async fn fetch_around(&self, _: i64) -> Result<RecordPage> {
            Err(ReplayError::source("connection reset"))
        }
    }

    #[test]
    fn test_queries_on_empty_store() {
        let store = store();
        assert!(store.messages_before(1_000, 10).is_empty());
        assert!(store.messages_in_window(1_000, 10_000).is_empty());
        assert!(store.active_tickers(1_000).is_empty());
        assert!(store.active_banner(1_000).is_none());
        assert!(matches!(
            store.messages_preceding("m1", 5),
            Err(ReplayError::UnknownAnchor(_))
        ));
    }

    #[test]
    fn test_messages_before() {
        let mut store = store();
        store.ingest(vec![point("m1", 100), point("m2", 200), point("m3", 300)]);
        assert_eq!(ids(store.messages_before(250, 2)), vec!["m1", "m2"]);
        assert_eq!(ids(store.messages_before(300, 2)), vec!["m2", "m3"]);
        assert_eq!(ids(store.messages_before(1_000, 10)), vec!["m1", "m2", "m3"]);
        assert!(store.messages_before(99, 10).is_empty());
    }

    #[test]
    fn test_messages_in_window() {
        let mut store = store();
        store.ingest(vec![point("m1", 100), point("m2", 200), point("m3", 300)]);
        assert_eq!(ids(store.messages_in_window(300, 150)), vec!["m2", "m3"]);
        // offset + window == time is outside the window
        assert_eq!(ids(store.messages_in_window(300, 100)), vec!["m3"]);
        assert!(store.messages_in_window(300, 0).is_empty());
    }

    #[test]
    fn test_messages_preceding() {
        let mut store = store();
        store.ingest(vec![point("m1", 100), point("m2", 200), point("m3", 300)]);
        assert_eq!(ids(store.messages_preceding("m3", 5).unwrap()), vec!["m1", "m2"]);
        assert_eq!(ids(store.messages_preceding("m3", 1).unwrap()), vec!["m2"]);
        assert!(store.messages_preceding("m1", 5).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_order_and_duplicates() {
        let mut store = store();
        let added = store.ingest(vec![
            point("a", 0),
            point("b", 1_000),
            point("pre", -65_000),
            point("a", 0),
        ]);
        assert_eq!(added, 3);
        assert_eq!(ids(store.messages()), vec!["pre", "a", "b"]);
    }

    #[test]
    fn test_active_banner_is_latest() {
        let mut store = store();
        let banner = |id: &str, offset_ms| {
            ChatEvent::Banner(crate::event::Banner {
                id: id.to_string(),
                offset_ms,
                header_text_parts: vec![],
                expanded_message: Box::new(point(id, offset_ms)),
            })
        };
        store.ingest(vec![banner("b1", 1_000), banner("b2", 5_000)]);
        assert!(store.active_banner(999).is_none());
        assert_eq!(store.active_banner(4_999).map(ChatEvent::id), Some("b1"));
        assert_eq!(store.active_banner(5_000).map(ChatEvent::id), Some("b2"));
    }

    #[tokio::test]
    async fn test_fetch_forward_routes_events() {
        let source = source(&[
            message_line("m1", 1_000),
            ticker_line("t1", 1_500, 30),
            banner_line("b1", 2_000),
            message_line("m2", 3_000),
            message_line("m3", 10_000),
            message_line("m4", 20_000),
        ]);
        let mut store = store();
        let added = store.fetch_forward(&source, 5_000).await.unwrap();
        // stops at the first point event past the target
        assert_eq!(added, 5);
        assert_eq!(ids(store.messages()), vec!["m1", "m2", "m3"]);
        assert_eq!(store.active_tickers(20_000).len(), 1);
        assert_eq!(store.active_banner(2_500).map(ChatEvent::id), Some("b1"));
        assert!(!store.is_forward_exhausted());

        // tail already past the target
        assert_eq!(store.fetch_forward(&source, 9_000).await.unwrap(), 0);

        store.fetch_forward(&source, 60_000).await.unwrap();
        assert_eq!(store.messages().len(), 4);
        assert!(store.is_forward_exhausted());
        assert!(store.plan_forward(100_000).is_none());
    }

    #[tokio::test]
    async fn test_forward_fetch_respects_page_limit() {
        let source = long_archive();
        let mut store = store().with_max_pages(2);
        store.fetch_forward(&source, 200_000).await.unwrap();
        assert_eq!(store.messages().len(), 40);
        store.fetch_forward(&source, 200_000).await.unwrap();
        assert_eq!(store.messages().len(), 80);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_store_untouched() {
        let mut store = store();
        store.ingest(vec![point("m1", 100)]);
        let err = store.fetch_forward(&FailingSource, 5_000).await.unwrap_err();
        assert!(matches!(err, ReplayError::Source(_)));
        assert_eq!(ids(store.messages()), vec!["m1"]);
        assert!(!store.is_halted());
        // transport failures are retried
        assert!(store.plan_forward(5_000).is_some());
    }

    #[tokio::test]
    async fn test_ingestion_fault_is_atomic_and_halts() {
        let source = source(&[
            message_line("m1", 1_000),
            message_line("m2", 2_000),
            json!({"replayChatItemAction": {"videoOffsetTimeMsec": "3000", "actions": [
                {"addChatItemAction": {"item": {"liveChatPollRenderer": {}}}}
            ]}}),
            message_line("m4", 4_000),
        ]);
        let mut store = store();
        let err = store.fetch_forward(&source, 10_000).await.unwrap_err();
        assert!(matches!(err, ReplayError::UnknownEvent(ref msg) if msg.starts_with("record 2")));
        assert!(store.messages().is_empty());
        assert!(store.is_halted());
        assert!(store.plan_forward(10_000).is_none());

        // a reset clears the fault
        store.plan_reset(0);
        assert!(!store.is_halted());
    }

    #[tokio::test]
    async fn test_reset_around() {
        let source = long_archive();
        let mut store = store();
        store.fetch_forward(&source, 10_000).await.unwrap();
        assert!(store.messages().iter().any(|m| m.id() == "m0"));

        store.reset_around(&source, 150_000).await.unwrap();
        let messages = store.messages();
        assert_eq!(messages.first().map(ChatEvent::id), Some("m90"));
        assert_eq!(messages.last().map(ChatEvent::id), Some("m209"));
        assert!(messages.iter().all(|m| m.offset_ms() >= 90_000));
        assert!(store.pending_reset().is_none());

        // forward continues from the anchor page
        store.fetch_forward(&source, 215_000).await.unwrap();
        assert_eq!(store.messages().last().map(ChatEvent::id), Some("m216"));
    }

    #[tokio::test]
    async fn test_stale_forward_fetch_is_discarded() {
        let source = long_archive();
        let mut store = store();
        let forward = store.plan_forward(50_000).unwrap();
        let fetched = forward.run(&source).await;
        assert!(fetched.is_ok());

        // a seek lands while the forward fetch is in flight
        let reset = store.plan_reset(200_000);
        assert_eq!(store.apply_forward(fetched).unwrap(), 0);
        assert!(store.messages().is_empty());

        let fetched = reset.run(&source).await;
        store.apply_reset(fetched).unwrap();
        assert!(store.messages().iter().all(|m| m.offset_ms() >= 140_000));
    }

    #[tokio::test]
    async fn test_superseded_reset_is_discarded() {
        let source = long_archive();
        let mut store = store();
        let first = store.plan_reset(100_000);
        let second = store.plan_reset(250_000);
        let first = first.run(&source).await;
        let second = second.run(&source).await;
        assert_eq!(store.apply_reset(first).unwrap(), 0);
        assert!(store.apply_reset(second).unwrap() > 0);
        assert_eq!(store.messages().first().map(ChatEvent::id), Some("m190"));
    }

    #[tokio::test]
    async fn test_fetch_backward() {
        let source = long_archive();
        let mut store = store();
        store.reset_around(&source, 150_000).await.unwrap();
        assert_eq!(store.messages().first().map(ChatEvent::id), Some("m90"));

        let earlier = store.fetch_backward(&source, 90_000, 30, "m90").await.unwrap();
        assert_eq!(earlier.len(), 30);
        assert_eq!(earlier.first().map(ChatEvent::id), Some("m60"));
        assert_eq!(earlier.last().map(ChatEvent::id), Some("m89"));
        // whole pages are kept
        assert_eq!(store.messages().first().map(ChatEvent::id), Some("m50"));

        // served locally now
        assert!(store.plan_backward(80_000, 10, "m80").unwrap().is_none());
        assert!(matches!(
            store.plan_backward(0, 10, "nope"),
            Err(ReplayError::UnknownAnchor(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_backward_past_long_ticker() {
        let mut lines: Vec<Value> = (0..300)
            .map(|i| message_line(&format!("m{i}"), i * 1_000))
            .collect();
        lines.insert(101, ticker_line("t1", 100_500, 300));
        let source = source(&lines).with_page_size(20);
        let mut store = store();
        store.reset_around(&source, 250_000).await.unwrap();
        assert_eq!(store.messages().first().map(ChatEvent::id), Some("m190"));
        assert_eq!(store.active_tickers(250_000).len(), 1);

        let earlier = store.fetch_backward(&source, 190_000, 5, "m190").await.unwrap();
        assert_eq!(ids(&earlier), vec!["m185", "m186", "m187", "m188", "m189"]);
    }

    #[tokio::test]
    async fn test_stale_backward_fetch_is_discarded() {
        let source = long_archive();
        let mut store = store();
        store.reset_around(&source, 150_000).await.unwrap();
        let backward = store.plan_backward(90_000, 10, "m90").unwrap().unwrap();
        let fetched = backward.run(&source).await;
        store.reset_around(&source, 250_000).await.unwrap();
        assert_eq!(store.apply_backward(fetched).unwrap(), 0);
        assert!(store.messages().iter().all(|m| m.offset_ms() >= 190_000));
    }

    #[tokio::test]
    async fn test_reset_from_start_includes_preroll() {
        let source = source(&[
            message_line("m0", 0),
            json!({"replayChatItemAction": {"videoOffsetTimeMsec": "0", "actions": [
                {"addChatItemAction": {"item": {"liveChatTextMessageRenderer": {
                    "id": "pre", "authorName": {"simpleText": "A"},
                    "timestampText": {"simpleText": "-1:05"}
                }}}}
            ]}}),
            message_line("m1", 2_000),
        ]);
        let mut store = store();
        store.reset_around(&source, 0).await.unwrap();
        assert_eq!(ids(store.messages()), vec!["pre", "m0", "m1"]);
        assert!(store.is_forward_exhausted());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Point messages stay sorted by offset whatever the arrival order.
        #[test]
        fn prop_messages_stay_sorted(
            forward in prop::collection::vec(-100_000i64..100_000, 0..40),
            backward in prop::collection::vec(-100_000i64..100_000, 0..40),
        ) {
            let mut store = store();
            store.ingest(
                forward.iter().enumerate().map(|(i, o)| point(&format!("f{i}"), *o)).collect(),
            );
            store.ingest_unsorted(
                backward.iter().enumerate().map(|(i, o)| point(&format!("b{i}"), *o)).collect(),
            );
            prop_assert_eq!(store.messages().len(), forward.len() + backward.len());
            for pair in store.messages().windows(2) {
                prop_assert!(pair[0].offset_ms() <= pair[1].offset_ms());
            }
        }
    }
}
