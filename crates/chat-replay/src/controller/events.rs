//! Replay controller commands and events.

use serde::Serialize;

use crate::event::ChatEvent;
use crate::scheduler::Placement;

/// Commands sent to the controller task from a [`super::ReplayHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayCommand {
    /// Playback resumed
    Play,
    /// Playback paused; ticks stop and bullets freeze
    Pause,
    /// Playback jumped to a new position
    Seek(i64),
    /// The viewport changed width
    Resize(u32),
    /// Load point events older than `anchor_id`
    LoadEarlier { anchor_id: String, count: usize },
    /// Stop the controller
    Stop,
}

/// Events emitted by the controller.
#[derive(Debug, Clone)]
pub enum ReplayEvent {
    /// What to show at the current playback position
    Frame(ReplayFrame),
    /// Answer to [`ReplayCommand::LoadEarlier`], oldest first
    EarlierMessages {
        anchor_id: String,
        messages: Vec<ChatEvent>,
    },
    /// Ingestion or transport failure. `halted` is set when ingestion stopped
    /// until the next seek.
    Fault { error: String, halted: bool },
    /// The controller exited
    Stopped,
}

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    /// A forward fetch is in flight
    Fetching,
    /// Building a frame
    Rendering,
}

/// A ticker with its remaining display progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerView {
    pub ticker: ChatEvent,
    /// `1` when the ticker appears, `0` when it ends
    pub progress: f64,
}

impl TickerView {
    pub fn new(ticker: &ChatEvent, time_ms: i64) -> Self {
        let duration = ticker.duration_ms();
        let progress = if duration > 0 {
            (1.0 - (time_ms - ticker.offset_ms()) as f64 / duration as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            ticker: ticker.clone(),
            progress,
        }
    }
}

/// Presentation snapshot at one playback position.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayFrame {
    pub time_ms: i64,
    pub playing: bool,
    pub messages: Vec<ChatEvent>,
    pub tickers: Vec<TickerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<ChatEvent>,
    pub bullets: Vec<Placement>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChatMessage, NewMemberTicker};

    #[test]
    fn test_ticker_progress() {
        let ticker = ChatEvent::TickerNewMember(NewMemberTicker {
            id: "t".to_string(),
            offset_ms: 10_000,
            duration_sec: 100,
            author_photo_url: None,
            text_parts: vec![],
            text_color: 0,
            start_bg_color: 0,
            end_bg_color: 0,
            expanded_message: Box::new(ChatEvent::NewMember(ChatMessage::default())),
        });
        assert_eq!(TickerView::new(&ticker, 10_000).progress, 1.0);
        assert_eq!(TickerView::new(&ticker, 60_000).progress, 0.5);
        assert_eq!(TickerView::new(&ticker, 200_000).progress, 0.0);
        assert_eq!(TickerView::new(&ticker, 0).progress, 1.0);
    }
}
