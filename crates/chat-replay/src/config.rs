//! Replay configuration.
//!
//! Every value the replay engine needs is passed in explicitly through
//! [`ReplayConfig`]; nothing is read from global state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root of the locally mirrored image assets.
pub const DEFAULT_ASSET_ROOT: &str = "/images";

/// Top-level configuration for a replay session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Channel that owns the archived video (emoji and badge assets are keyed by it)
    pub channel_id: String,
    /// Archived video id
    pub video_id: String,
    /// Asset path layout
    pub assets: AssetConfig,
    /// Membership badge tooltip matchers
    pub badges: BadgeConfig,
    /// Interval between playback ticks while playing
    pub tick_interval_ms: u64,
    /// How much message history each frame carries
    pub history: HistoryMode,
    /// Bullet overlay settings
    pub danmaku: DanmakuConfig,
    /// Upper bound on source pages pulled by a single forward fetch
    pub max_pages_per_fetch: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            channel_id: String::new(),
            video_id: String::new(),
            assets: AssetConfig::default(),
            badges: BadgeConfig::default(),
            tick_interval_ms: 250,
            history: HistoryMode::default(),
            danmaku: DanmakuConfig::default(),
            max_pages_per_fetch: 8,
        }
    }
}

impl ReplayConfig {
    /// Create a config for a channel/video pair with default settings.
    pub fn new(channel_id: impl Into<String>, video_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            video_id: video_id.into(),
            ..Default::default()
        }
    }

    /// Set the message history mode.
    pub fn with_history(mut self, history: HistoryMode) -> Self {
        self.history = history;
        self
    }

    /// Set the danmaku configuration.
    pub fn with_danmaku(mut self, danmaku: DanmakuConfig) -> Self {
        self.danmaku = danmaku;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Where mirrored images live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub root: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_ASSET_ROOT.to_string(),
        }
    }
}

/// Locale-specific membership tooltip patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipLocale {
    /// Locale label, used in error messages
    pub name: String,
    /// Matches the tooltip of a brand new member
    pub new_member: String,
    /// Matches a tenure tooltip; may capture `years` and `months`
    pub tenure: String,
}

impl MembershipLocale {
    pub fn new(
        name: impl Into<String>,
        new_member: impl Into<String>,
        tenure: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            new_member: new_member.into(),
            tenure: tenure.into(),
        }
    }

    pub fn english() -> Self {
        Self::new(
            "en",
            r"New member",
            r"Member \((?:(?P<years>\d+) years?)?(?:, )?(?:(?P<months>\d+) months?)?\)",
        )
    }

    pub fn japanese() -> Self {
        Self::new(
            "ja",
            r"新規メンバー",
            r"メンバー（(?:(?P<years>\d+)\s*年)?\s*(?:(?P<months>\d+)\s*か月)?）",
        )
    }
}

/// Membership badge parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgeConfig {
    pub locales: Vec<MembershipLocale>,
}

impl Default for BadgeConfig {
    fn default() -> Self {
        Self {
            locales: vec![MembershipLocale::english(), MembershipLocale::japanese()],
        }
    }
}

/// How many past messages a frame shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum HistoryMode {
    /// The last `n` messages at or before the playback time
    Count(usize),
    /// Messages from the trailing window of this many milliseconds
    Window(i64),
}

impl Default for HistoryMode {
    fn default() -> Self {
        Self::Count(100)
    }
}

/// Bullet overlay configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DanmakuConfig {
    /// Number of horizontal lanes
    pub lane_count: usize,
    /// Time for a bullet to cross the viewport
    pub duration_ms: i64,
    /// Largest start shift applied to avoid a collision; 0 keeps bullets on
    /// their chat timestamp and accepts near-misses instead
    pub max_shift_ms: i64,
    /// Initial viewport width in pixels
    pub viewport_width: u32,
}

impl Default for DanmakuConfig {
    fn default() -> Self {
        Self {
            lane_count: 10,
            duration_ms: 8000,
            max_shift_ms: 0,
            viewport_width: 1280,
        }
    }
}
