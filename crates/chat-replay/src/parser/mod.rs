//! YouTube live chat replay parser.
//!
//! Turns one raw `replayChatItemAction` record into zero or more
//! [`ChatEvent`]s. Every renderer shape is classified by a closed enum and
//! handled in a single match; anything unrecognised is an error rather than
//! being skipped, so a schema change upstream cannot silently corrupt a
//! replay.

pub mod assets;
pub mod badge;
pub mod timestamp;

use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

use crate::config::ReplayConfig;
use crate::error::{ReplayError, Result};
use crate::event::{
    Badge, BadgeKind, Banner, ChatEvent, ChatMessage, MessagePart, NewMemberTicker, PaidMessage,
    PaidMessageTicker, PaidSticker,
};

pub use assets::{AssetPaths, choose_thumbnail_url, encode_base64_url};
pub use badge::{BadgeMatcher, MILESTONES, milestone_for};
pub use timestamp::parse_timestamp_text;

/// Longest raw JSON excerpt quoted in an error message.
const MAX_EXCERPT_LEN: usize = 300;

/// Top-level chat action.
enum Action<'a> {
    AddChatItem(&'a Value),
    AddTickerItem(&'a Value),
    AddBanner(&'a Value),
    /// Swaps the live chat input panel; nothing to replay
    ReplaceChatRenderer,
}

impl<'a> Action<'a> {
    fn classify(action: &'a Value) -> Result<Self> {
        if let Some(item) = action.pointer("/addChatItemAction/item") {
            Ok(Self::AddChatItem(item))
        } else if let Some(item) = action.pointer("/addLiveChatTickerItemAction/item") {
            Ok(Self::AddTickerItem(item))
        } else if let Some(renderer) = action.pointer("/addBannerToLiveChatCommand/bannerRenderer")
        {
            Ok(Self::AddBanner(renderer))
        } else if action.get("replaceLiveChatRendererAction").is_some() {
            Ok(Self::ReplaceChatRenderer)
        } else {
            Err(ReplayError::unknown_event(format!(
                "Unknown chat action: {}",
                excerpt(action)
            )))
        }
    }
}

/// Renderer inside an `addChatItemAction` (also used for ticker and banner
/// contents).
enum ItemRenderer<'a> {
    TextMessage(&'a Value),
    PaidMessage(&'a Value),
    Membership(&'a Value),
    PaidSticker(&'a Value),
    /// Slow mode / subscribers-only notices
    ModeChange,
    /// Engagement prompts shown to live viewers
    ViewerEngagement,
    Placeholder,
}

impl<'a> ItemRenderer<'a> {
    fn classify(item: &'a Value) -> Result<Self> {
        if let Some(object) = item.as_object() {
            for (key, renderer) in object {
                match key.as_str() {
                    "liveChatTextMessageRenderer" => return Ok(Self::TextMessage(renderer)),
                    "liveChatPaidMessageRenderer" => return Ok(Self::PaidMessage(renderer)),
                    "liveChatMembershipItemRenderer" => return Ok(Self::Membership(renderer)),
                    "liveChatPaidStickerRenderer" => return Ok(Self::PaidSticker(renderer)),
                    "liveChatModeChangeMessageRenderer" => return Ok(Self::ModeChange),
                    "liveChatViewerEngagementMessageRenderer" => {
                        return Ok(Self::ViewerEngagement);
                    }
                    "liveChatPlaceholderItemRenderer" => return Ok(Self::Placeholder),
                    _ => {}
                }
            }
        }
        Err(ReplayError::unknown_event(format!(
            "Unknown chat item renderer: {}",
            excerpt(item)
        )))
    }
}

/// Renderer inside an `addLiveChatTickerItemAction`.
enum TickerRenderer<'a> {
    PaidMessage(&'a Value),
    Sponsor(&'a Value),
    /// Super sticker tickers are not rendered during replay
    PaidSticker,
}

impl<'a> TickerRenderer<'a> {
    fn classify(item: &'a Value) -> Result<Self> {
        if let Some(renderer) = item.get("liveChatTickerPaidMessageItemRenderer") {
            Ok(Self::PaidMessage(renderer))
        } else if let Some(renderer) = item.get("liveChatTickerSponsorItemRenderer") {
            Ok(Self::Sponsor(renderer))
        } else if item.get("liveChatTickerPaidStickerItemRenderer").is_some() {
            Ok(Self::PaidSticker)
        } else {
            Err(ReplayError::unknown_event(format!(
                "Unknown chat ticker renderer: {}",
                excerpt(item)
            )))
        }
    }
}

/// Stateless parser for raw chat replay records.
///
/// Parsing is deterministic: the same record always yields identical events.
#[derive(Debug, Clone)]
pub struct EventParser {
    assets: AssetPaths,
    badges: Arc<BadgeMatcher>,
}

impl EventParser {
    /// Build a parser from the replay configuration.
    pub fn new(config: &ReplayConfig) -> Result<Self> {
        Ok(Self {
            assets: AssetPaths::new(&config.assets, config.channel_id.clone()),
            badges: Arc::new(BadgeMatcher::new(&config.badges)?),
        })
    }

    /// Parser with default asset layout and badge locales.
    pub fn for_channel(channel_id: impl Into<String>) -> Self {
        Self {
            assets: AssetPaths::new(&Default::default(), channel_id),
            badges: Arc::new(BadgeMatcher::default()),
        }
    }

    /// Parse one line of a `.live_chat.json` archive.
    pub fn parse_line(&self, line: &str) -> Result<Vec<ChatEvent>> {
        let record: Value = serde_json::from_str(line)?;
        self.parse(&record)
    }

    /// Parse one raw record.
    pub fn parse(&self, record: &Value) -> Result<Vec<ChatEvent>> {
        let replay = record.get("replayChatItemAction").ok_or_else(|| {
            ReplayError::unknown_event(format!("Unknown chat record: {}", excerpt(record)))
        })?;
        let offset = record_offset(replay)?;

        let mut events = Vec::new();
        let Some(actions) = replay.get("actions").and_then(Value::as_array) else {
            return Ok(events);
        };
        for action in actions.iter().filter(|action| !action.is_null()) {
            match Action::classify(action)? {
                Action::AddChatItem(item) => events.extend(self.parse_chat_item(item, offset)?),
                Action::AddTickerItem(item) => events.extend(self.parse_ticker(item, offset)?),
                Action::AddBanner(renderer) => events.extend(self.parse_banner(renderer, offset)?),
                Action::ReplaceChatRenderer => trace!("Skipping replaceLiveChatRendererAction"),
            }
        }
        Ok(events)
    }

    fn parse_chat_item(&self, item: &Value, record_offset: i64) -> Result<Option<ChatEvent>> {
        let event = match ItemRenderer::classify(item)? {
            ItemRenderer::TextMessage(r) => {
                ChatEvent::MessageNormal(self.chat_message(r, record_offset, "message")?)
            }
            ItemRenderer::PaidMessage(r) => ChatEvent::MessagePaid(PaidMessage {
                message: self.chat_message(r, record_offset, "message")?,
                paid_amount_text: text_of(r.get("purchaseAmountText")),
                header_bg_color: color(r, "headerBackgroundColor")?,
                header_fg_color: color(r, "headerTextColor")?,
                body_bg_color: color(r, "bodyBackgroundColor")?,
                body_fg_color: color(r, "bodyTextColor")?,
                author_name_color: color(r, "authorNameTextColor")?,
            }),
            ItemRenderer::Membership(r) => {
                ChatEvent::NewMember(self.chat_message(r, record_offset, "headerSubtext")?)
            }
            ItemRenderer::PaidSticker(r) => ChatEvent::StickerPaid(PaidSticker {
                id: required_str(r, "id")?,
                offset_ms: resolve_offset(record_offset, r)?,
                author_id: optional_str(r, "authorExternalChannelId"),
                author_name: text_of(r.get("authorName")),
                author_photo_url: self.author_photo(r),
                sticker_url: r
                    .pointer("/sticker/thumbnails")
                    .and_then(choose_thumbnail_url)
                    .and_then(|url| self.assets.sticker(url)),
                sticker_description: r
                    .pointer("/sticker/accessibility/accessibilityData/label")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                sticker_width: unsigned(r, "stickerDisplayWidth")?,
                sticker_height: unsigned(r, "stickerDisplayHeight")?,
                paid_amount_text: text_of(r.get("purchaseAmountText")),
                bg_color: color(r, "backgroundColor")?,
                author_name_color: color(r, "authorNameTextColor")?,
                money_fg_color: color(r, "moneyChipTextColor")?,
                badges: self.badges(r)?,
            }),
            ItemRenderer::ModeChange
            | ItemRenderer::ViewerEngagement
            | ItemRenderer::Placeholder => return Ok(None),
        };
        Ok(Some(event))
    }

    fn parse_ticker(&self, item: &Value, record_offset: i64) -> Result<Option<ChatEvent>> {
        let event = match TickerRenderer::classify(item)? {
            TickerRenderer::PaidMessage(r) => {
                let duration_sec = ticker_duration(r)?;
                let expanded = self.expanded_message(r, record_offset)?;
                ChatEvent::TickerPaidMessage(PaidMessageTicker {
                    id: required_str(r, "id")?,
                    offset_ms: expanded.offset_ms(),
                    duration_sec,
                    author_photo_url: self.author_photo(r),
                    paid_amount_text: text_of(r.get("amount")),
                    amount_color: color(r, "amountTextColor")?,
                    start_bg_color: color(r, "startBackgroundColor")?,
                    end_bg_color: color(r, "endBackgroundColor")?,
                    expanded_message: Box::new(expanded),
                })
            }
            TickerRenderer::Sponsor(r) => {
                let duration_sec = ticker_duration(r)?;
                let expanded = self.expanded_message(r, record_offset)?;
                ChatEvent::TickerNewMember(NewMemberTicker {
                    id: required_str(r, "id")?,
                    offset_ms: expanded.offset_ms(),
                    duration_sec,
                    author_photo_url: self.author_photo(r),
                    text_parts: self.message_parts(r.get("detailText"))?,
                    text_color: color(r, "detailTextColor")?,
                    start_bg_color: color(r, "startBackgroundColor")?,
                    end_bg_color: color(r, "endBackgroundColor")?,
                    expanded_message: Box::new(expanded),
                })
            }
            TickerRenderer::PaidSticker => {
                trace!("Skipping paid sticker ticker");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }

    fn expanded_message(&self, ticker: &Value, record_offset: i64) -> Result<ChatEvent> {
        let renderer = ticker
            .pointer("/showItemEndpoint/showLiveChatItemEndpoint/renderer")
            .ok_or_else(|| {
                ReplayError::parse(format!(
                    "Ticker without message renderer: {}",
                    excerpt(ticker)
                ))
            })?;
        self.parse_chat_item(renderer, record_offset)?
            .ok_or_else(|| {
                ReplayError::parse(format!(
                    "Ticker without expanded message: {}",
                    excerpt(renderer)
                ))
            })
    }

    fn parse_banner(&self, banner: &Value, record_offset: i64) -> Result<Option<ChatEvent>> {
        let renderer = banner.get("liveChatBannerRenderer").ok_or_else(|| {
            ReplayError::unknown_event(format!("Unknown banner renderer: {}", excerpt(banner)))
        })?;
        let Some(contents) = renderer.get("contents") else {
            return Ok(None);
        };
        let Some(expanded) = self.parse_chat_item(contents, record_offset)? else {
            return Ok(None);
        };
        Ok(Some(ChatEvent::Banner(Banner {
            id: expanded.id().to_string(),
            offset_ms: expanded.offset_ms(),
            header_text_parts: self
                .message_parts(renderer.pointer("/header/liveChatBannerHeaderRenderer/text"))?,
            expanded_message: Box::new(expanded),
        })))
    }

    fn chat_message(
        &self,
        renderer: &Value,
        record_offset: i64,
        text_key: &str,
    ) -> Result<ChatMessage> {
        Ok(ChatMessage {
            id: required_str(renderer, "id")?,
            offset_ms: resolve_offset(record_offset, renderer)?,
            author_id: optional_str(renderer, "authorExternalChannelId"),
            author_name: text_of(renderer.get("authorName")),
            author_photo_url: self.author_photo(renderer),
            parts: self.message_parts(renderer.get(text_key))?,
            badges: self.badges(renderer)?,
        })
    }

    /// Message text from either `{runs: [...]}` or `{simpleText}`.
    fn message_parts(&self, text: Option<&Value>) -> Result<Vec<MessagePart>> {
        let Some(text) = text else {
            return Ok(Vec::new());
        };
        if let Some(runs) = text.get("runs").and_then(Value::as_array) {
            return runs.iter().map(|run| self.message_run(run)).collect();
        }
        Ok(text
            .get("simpleText")
            .and_then(Value::as_str)
            .map(|s| vec![MessagePart::text(s)])
            .unwrap_or_default())
    }

    fn message_run(&self, run: &Value) -> Result<MessagePart> {
        if let Some(text) = run.get("text").and_then(Value::as_str) {
            return Ok(MessagePart::text(text));
        }
        let emoji = run.get("emoji").ok_or_else(|| {
            ReplayError::parse(format!("Message run without text or emoji: {}", excerpt(run)))
        })?;
        let emoji_id = required_str(emoji, "emojiId")?;
        // Custom emoji ids are "<owner channel>/<emoji id>"; standard emoji
        // ids are the emoji itself.
        let Some((_, short_id)) = emoji_id.split_once('/') else {
            return Ok(MessagePart::text(emoji_id));
        };
        let short_id = short_id.split('/').next().unwrap_or(short_id);
        let name = emoji
            .pointer("/shortcuts/0")
            .and_then(Value::as_str)
            .or_else(|| {
                emoji
                    .pointer("/image/accessibility/accessibilityData/label")
                    .and_then(Value::as_str)
            })
            .unwrap_or(short_id)
            .to_string();
        Ok(MessagePart::Emoji {
            emoji_url: self.assets.emoji(short_id),
            emoji_name: name,
        })
    }

    fn badges(&self, renderer: &Value) -> Result<Vec<Badge>> {
        let Some(author_badges) = renderer.get("authorBadges").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        let mut badges = Vec::with_capacity(author_badges.len());
        for badge in author_badges {
            let Some(badge) = badge.get("liveChatAuthorBadgeRenderer") else {
                continue;
            };
            if let Some(icon_type) = badge.pointer("/icon/iconType").and_then(Value::as_str) {
                let kind = match icon_type {
                    "OWNER" => BadgeKind::Owner,
                    "MODERATOR" => BadgeKind::Moderator,
                    "VERIFIED" => BadgeKind::Verified,
                    _ => continue,
                };
                badges.push(kind.into());
            } else if badge.get("customThumbnail").is_some() {
                let tooltip = badge
                    .get("tooltip")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ReplayError::badge_parse("Member badge without tooltip"))?;
                let months = self.badges.tenure_months(tooltip)?;
                badges.push(Badge::Sponsor {
                    months_duration: months,
                    icon_url: self.assets.sponsor_badge(milestone_for(months)),
                });
            }
        }
        Ok(badges)
    }

    fn author_photo(&self, renderer: &Value) -> Option<String> {
        let photo = renderer
            .get("authorPhoto")
            .or_else(|| renderer.get("sponsorPhoto"))?;
        let url = choose_thumbnail_url(photo.get("thumbnails")?)?;
        let channel_id = renderer.get("authorExternalChannelId")?.as_str()?;
        Some(self.assets.author_photo(channel_id, url))
    }
}

/// Record-level `videoOffsetTimeMsec`; 0 when absent.
fn record_offset(replay: &Value) -> Result<i64> {
    match replay.get("videoOffsetTimeMsec") {
        None | Some(Value::Null) => Ok(0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ReplayError::parse(format!("Invalid videoOffsetTimeMsec: {s:?}"))),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| ReplayError::parse(format!("Invalid videoOffsetTimeMsec: {n}"))),
        Some(other) => Err(ReplayError::parse(format!(
            "Invalid videoOffsetTimeMsec: {}",
            excerpt(other)
        ))),
    }
}

/// A positive record offset wins; otherwise fall back to the renderer's
/// countdown text.
fn resolve_offset(record_offset: i64, renderer: &Value) -> Result<i64> {
    if record_offset > 0 {
        return Ok(record_offset);
    }
    match renderer.pointer("/timestampText/simpleText").and_then(Value::as_str) {
        Some(text) => parse_timestamp_text(text),
        None => Ok(0),
    }
}

fn ticker_duration(renderer: &Value) -> Result<u32> {
    let duration = unsigned(renderer, "durationSec")?;
    let full_duration = unsigned(renderer, "fullDurationSec")?;
    if duration != full_duration {
        return Err(ReplayError::parse(format!(
            "Unexpected ticker duration mismatch: {duration} != {full_duration}"
        )));
    }
    Ok(full_duration)
}

fn required_str(value: &Value, key: &str) -> Result<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| ReplayError::parse(format!("Missing {key}: {}", excerpt(value))))
}

fn optional_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(ToString::to_string)
}

/// Plain text of a `{simpleText}` or `{runs}` node.
fn text_of(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    if let Some(text) = value.get("simpleText").and_then(Value::as_str) {
        return text.to_string();
    }
    value
        .get("runs")
        .and_then(Value::as_array)
        .map(|runs| {
            runs.iter()
                .filter_map(|run| run.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// ARGB color; absent colors are 0.
fn color(value: &Value, key: &str) -> Result<u32> {
    unsigned(value, key)
}

/// Unsigned 32-bit field given as a number or numeric string; absent is 0.
fn unsigned(value: &Value, key: &str) -> Result<u32> {
    let parsed = match value.get(key) {
        None | Some(Value::Null) => return Ok(0),
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| ReplayError::parse(format!("Invalid {key}: {}", excerpt(value))))
}

fn excerpt(value: &Value) -> String {
    let mut text = value.to_string();
    if text.len() > MAX_EXCERPT_LEN {
        let mut end = MAX_EXCERPT_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push('…');
    }
    text
}
