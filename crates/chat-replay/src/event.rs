//! Normalized chat event types.
//!
//! Every raw YouTube chat action is reduced to one of the [`ChatEvent`]
//! variants below. Events are immutable once produced by the parser.

use serde::{Deserialize, Serialize};

/// A piece of message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePart {
    /// Literal text run
    Text { text: String },
    /// Custom channel emoji, rewritten to a local asset path
    Emoji {
        emoji_url: String,
        emoji_name: String,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Plain-text rendering; emoji collapse to their shortcut name.
    pub fn as_plain_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
            Self::Emoji { emoji_name, .. } => emoji_name,
        }
    }
}

/// Kind of a non-sponsor author badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeKind {
    Owner,
    Moderator,
    Verified,
}

/// An author badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Badge {
    Owner,
    Moderator,
    Verified,
    /// Channel membership badge
    Sponsor {
        /// Total membership tenure in months (0 for new members)
        months_duration: u32,
        /// Local icon for the milestone at or below the tenure
        icon_url: String,
    },
}

impl From<BadgeKind> for Badge {
    fn from(kind: BadgeKind) -> Self {
        match kind {
            BadgeKind::Owner => Self::Owner,
            BadgeKind::Moderator => Self::Moderator,
            BadgeKind::Verified => Self::Verified,
        }
    }
}

/// Fields shared by every chat message with an author.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub offset_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_photo_url: Option<String>,
    pub parts: Vec<MessagePart>,
    pub badges: Vec<Badge>,
}

impl ChatMessage {
    /// Concatenated plain text of all parts.
    pub fn plain_text(&self) -> String {
        self.parts.iter().map(MessagePart::as_plain_text).collect()
    }
}

/// A super chat. Colors are 32-bit ARGB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidMessage {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub paid_amount_text: String,
    pub header_bg_color: u32,
    pub header_fg_color: u32,
    pub body_bg_color: u32,
    pub body_fg_color: u32,
    pub author_name_color: u32,
}

/// A super sticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidSticker {
    pub id: String,
    pub offset_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_url: Option<String>,
    pub sticker_description: String,
    pub sticker_width: u32,
    pub sticker_height: u32,
    pub paid_amount_text: String,
    pub bg_color: u32,
    pub author_name_color: u32,
    pub money_fg_color: u32,
    pub badges: Vec<Badge>,
}

/// Ticker highlighting a super chat or sticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidMessageTicker {
    pub id: String,
    pub offset_ms: i64,
    pub duration_sec: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_photo_url: Option<String>,
    pub paid_amount_text: String,
    pub amount_color: u32,
    pub start_bg_color: u32,
    pub end_bg_color: u32,
    pub expanded_message: Box<ChatEvent>,
}

/// Ticker highlighting a new channel member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMemberTicker {
    pub id: String,
    pub offset_ms: i64,
    pub duration_sec: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_photo_url: Option<String>,
    pub text_parts: Vec<MessagePart>,
    pub text_color: u32,
    pub start_bg_color: u32,
    pub end_bg_color: u32,
    pub expanded_message: Box<ChatEvent>,
}

/// A pinned announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banner {
    pub id: String,
    pub offset_ms: i64,
    pub header_text_parts: Vec<MessagePart>,
    pub expanded_message: Box<ChatEvent>,
}

/// A normalized chat event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageNormal(ChatMessage),
    MessagePaid(PaidMessage),
    NewMember(ChatMessage),
    StickerPaid(PaidSticker),
    TickerPaidMessage(PaidMessageTicker),
    TickerNewMember(NewMemberTicker),
    Banner(Banner),
}

/// Which store collection an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Appears at a single instant in the message log
    Point,
    /// Active over `[offset, offset + duration)`
    Interval,
    /// Active from its offset until the next banner
    Banner,
}

impl ChatEvent {
    pub fn id(&self) -> &str {
        match self {
            Self::MessageNormal(m) | Self::NewMember(m) => &m.id,
            Self::MessagePaid(p) => &p.message.id,
            Self::StickerPaid(s) => &s.id,
            Self::TickerPaidMessage(t) => &t.id,
            Self::TickerNewMember(t) => &t.id,
            Self::Banner(b) => &b.id,
        }
    }

    pub fn offset_ms(&self) -> i64 {
        match self {
            Self::MessageNormal(m) | Self::NewMember(m) => m.offset_ms,
            Self::MessagePaid(p) => p.message.offset_ms,
            Self::StickerPaid(s) => s.offset_ms,
            Self::TickerPaidMessage(t) => t.offset_ms,
            Self::TickerNewMember(t) => t.offset_ms,
            Self::Banner(b) => b.offset_ms,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageNormal(_)
            | Self::MessagePaid(_)
            | Self::NewMember(_)
            | Self::StickerPaid(_) => EventKind::Point,
            Self::TickerPaidMessage(_) | Self::TickerNewMember(_) => EventKind::Interval,
            Self::Banner(_) => EventKind::Banner,
        }
    }

    /// Active duration in milliseconds; zero for everything but tickers.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Self::TickerPaidMessage(t) => i64::from(t.duration_sec) * 1000,
            Self::TickerNewMember(t) => i64::from(t.duration_sec) * 1000,
            _ => 0,
        }
    }

    /// End of the active window, `offset + duration`.
    pub fn end_ms(&self) -> i64 {
        self.offset_ms() + self.duration_ms()
    }

    /// Text shown when the event scrolls across the video.
    pub fn bullet_text(&self) -> String {
        match self {
            Self::MessageNormal(m) | Self::NewMember(m) => m.plain_text(),
            Self::MessagePaid(p) => {
                let text = p.message.plain_text();
                if text.is_empty() {
                    p.paid_amount_text.clone()
                } else {
                    format!("{} {}", p.paid_amount_text, text)
                }
            }
            Self::StickerPaid(s) => s.paid_amount_text.clone(),
            Self::TickerPaidMessage(t) => t.expanded_message.bullet_text(),
            Self::TickerNewMember(t) => t.expanded_message.bullet_text(),
            Self::Banner(b) => b.expanded_message.bullet_text(),
        }
    }
}
