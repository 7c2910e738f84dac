//! Local asset paths for mirrored chat images.
//!
//! The archival pipeline downloads emoji, badges, stickers and author photos
//! to deterministic locations; these helpers produce the same paths from the
//! raw chat data.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

use crate::config::AssetConfig;

/// Builds asset paths under a configured root.
#[derive(Debug, Clone)]
pub struct AssetPaths {
    root: String,
    channel_id: String,
}

impl AssetPaths {
    pub fn new(config: &AssetConfig, channel_id: impl Into<String>) -> Self {
        Self {
            root: config.root.trim_end_matches('/').to_string(),
            channel_id: channel_id.into(),
        }
    }

    /// `{root}/live_chat_emoji/{channel}/{emoji}.png`
    pub fn emoji(&self, emoji_short_id: &str) -> String {
        format!(
            "{}/live_chat_emoji/{}/{}.png",
            self.root, self.channel_id, emoji_short_id
        )
    }

    /// `{root}/live_chat_sponsor_badges/{channel}/{milestone}.png`
    pub fn sponsor_badge(&self, milestone_months: u32) -> String {
        format!(
            "{}/live_chat_sponsor_badges/{}/{}.png",
            self.root, self.channel_id, milestone_months
        )
    }

    /// `{root}/stickers/{b64(remote path)}/sticker.webp`
    ///
    /// The scheme (and protocol-relative `//`) is stripped before encoding.
    pub fn sticker(&self, url: &str) -> Option<String> {
        let remote_path = strip_scheme(url)?;
        Some(format!(
            "{}/stickers/{}/sticker.webp",
            self.root,
            encode_base64_url(remote_path)
        ))
    }

    /// `{root}/author_photos/{author channel}/{b64(url)}.jpeg`
    pub fn author_photo(&self, author_channel_id: &str, url: &str) -> String {
        format!(
            "{}/author_photos/{}/{}.jpeg",
            self.root,
            author_channel_id,
            encode_base64_url(url)
        )
    }
}

/// URL-safe base64 without padding.
pub fn encode_base64_url(input: &str) -> String {
    URL_SAFE_NO_PAD.encode(input.as_bytes())
}

fn strip_scheme(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https:")
        .or_else(|| url.strip_prefix("http:"))
        .unwrap_or(url);
    rest.strip_prefix("//").filter(|path| !path.is_empty())
}

/// Pick the widest thumbnail URL; the first one wins a tie.
pub fn choose_thumbnail_url(thumbnails: &Value) -> Option<&str> {
    let mut chosen: Option<(u64, &str)> = None;
    for thumbnail in thumbnails.as_array()? {
        let Some(url) = thumbnail.get("url").and_then(Value::as_str) else {
            continue;
        };
        let width = thumbnail.get("width").and_then(Value::as_u64).unwrap_or(0);
        match chosen {
            Some((best, _)) if width <= best => {}
            _ => chosen = Some((width, url)),
        }
    }
    chosen.map(|(_, url)| url)
}
