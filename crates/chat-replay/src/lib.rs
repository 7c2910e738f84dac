//! Chat replay: archived YouTube live chat, played back alongside the video.
//!
//! This crate normalizes raw live-chat replay records into typed chat events,
//! caches them around the playback position and lays them out as scrolling
//! bullets (danmaku/弾幕) over the video.
//!
//! ## Core Types
//!
//! - [`ChatEvent`] - A normalized chat event (message, super chat, ticker, banner)
//! - [`EventParser`] - Turns raw replay records into [`ChatEvent`]s
//! - [`ReplayConfig`] - Settings for one replay session
//!
//! ## Sources
//!
//! - [`ChatSource`] - Trait for paginated access to archived records
//! - [`LineSource`] - Records from a line-delimited JSON archive file
//! - [`HttpSource`] - Records from the archive web app
//!
//! ## Caching
//!
//! - [`ChatEventStore`] - Sorted, deduplicated events with cursor-based paging
//! - [`IntervalIndex`] - Stabbing queries over tickers
//!
//! ## Playback
//!
//! - [`DanmakuScheduler`] - Collision-free lane placement for bullets
//! - [`ReplayController`] - Async loop driving the store and scheduler from a clock
//! - [`ReplayHandle`] - Commands and events for a running controller

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod interval;
pub mod parser;
pub mod scheduler;
pub mod source;
pub mod store;

pub use config::{
    AssetConfig, BadgeConfig, DanmakuConfig, HistoryMode, MembershipLocale, ReplayConfig,
};
pub use controller::{
    BulletMeasure, CharWidthMeasure, ControllerState, ManualClock, PlaybackClock, RealtimeClock,
    ReplayCommand, ReplayController, ReplayEvent, ReplayFrame, ReplayHandle, TickerView,
};
pub use error::{ReplayError, Result};
pub use event::{
    Badge, BadgeKind, Banner, ChatEvent, ChatMessage, EventKind, MessagePart, NewMemberTicker,
    PaidMessage, PaidMessageTicker, PaidSticker,
};
pub use interval::IntervalIndex;
pub use parser::EventParser;
pub use scheduler::{BulletState, DanmakuScheduler, Placement};
pub use source::{ChatSource, HttpSource, LineSource, RawRecord, RecordPage};
pub use store::ChatEventStore;
