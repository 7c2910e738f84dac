//! Bullet width measurement.

use crate::event::{ChatEvent, MessagePart};

/// Rendered width of a bullet in pixels.
pub trait BulletMeasure: Send + Sync {
    fn width(&self, event: &ChatEvent) -> f64;
}

/// Estimates width from the bullet text: narrow glyphs take one unit, wide
/// (CJK, emoji) glyphs two, custom emoji one square.
#[derive(Debug, Clone, Copy)]
pub struct CharWidthMeasure {
    /// Width of a narrow glyph
    pub char_width: f64,
    /// Side of a custom emoji image
    pub emoji_width: f64,
}

impl Default for CharWidthMeasure {
    fn default() -> Self {
        Self {
            char_width: 12.0,
            emoji_width: 24.0,
        }
    }
}

impl CharWidthMeasure {
    fn text_width(&self, text: &str) -> f64 {
        text.chars()
            .map(|c| if c.len_utf8() >= 3 { 2.0 } else { 1.0 })
            .sum::<f64>()
            * self.char_width
    }

    fn parts_width(&self, parts: &[MessagePart]) -> f64 {
        parts
            .iter()
            .map(|part| match part {
                MessagePart::Text { text } => self.text_width(text),
                MessagePart::Emoji { .. } => self.emoji_width,
            })
            .sum()
    }
}

impl BulletMeasure for CharWidthMeasure {
    fn width(&self, event: &ChatEvent) -> f64 {
        match event {
            ChatEvent::MessageNormal(m) | ChatEvent::NewMember(m) => self.parts_width(&m.parts),
            _ => self.text_width(&event.bullet_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChatMessage;

    #[test]
    fn test_char_width_estimate() {
        let measure = CharWidthMeasure::default();
        let event = ChatEvent::MessageNormal(ChatMessage {
            id: "m".to_string(),
            parts: vec![
                MessagePart::text("hi "),
                MessagePart::Emoji {
                    emoji_url: "/images/live_chat_emoji/UC/e.png".to_string(),
                    emoji_name: ":e:".to_string(),
                },
                MessagePart::text("草"),
            ],
            ..Default::default()
        });
        assert_eq!(measure.width(&event), 3.0 * 12.0 + 24.0 + 2.0 * 12.0);
    }
}
