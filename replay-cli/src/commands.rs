use chat_replay::{
    CharWidthMeasure, ChatEvent, ChatEventStore, EventParser, LineSource, RealtimeClock,
    ReplayConfig, ReplayController, ReplayEvent, ReplayFrame,
};
use serde_json::json;
use std::collections::HashSet;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

/// Print every normalized event of an archive as a JSON line.
pub async fn parse(config: &ReplayConfig, file: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(file).await?;
    let parser = EventParser::new(config)?;
    let mut out = BufWriter::new(io::stdout().lock());
    let mut count = 0usize;
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let events = parser
            .parse_line(line)
            .map_err(|e| AppError::InvalidInput(format!("line {}: {}", index + 1, e)))?;
        for event in events {
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
            count += 1;
        }
    }
    out.flush()?;
    info!("Parsed {} events from {}", count, file.display());
    Ok(())
}

/// Print `sequence<TAB>start<TAB>end` for each record.
pub async fn index(file: &Path) -> Result<()> {
    let source = LineSource::open(file).await?;
    let mut out = BufWriter::new(io::stdout().lock());
    for (sequence, start, end) in source.time_ranges() {
        writeln!(out, "{sequence}\t{start}\t{end}")?;
    }
    out.flush()?;
    Ok(())
}

/// Print the chat state at one playback position.
pub async fn query(config: &ReplayConfig, file: &Path, at: i64, history: usize) -> Result<()> {
    let source = LineSource::open(file).await?;
    let mut store = ChatEventStore::from_config(config)?;
    let loaded = store.reset_around(&source, at).await?;
    let fetched = store.fetch_forward(&source, at).await?;
    debug!("Loaded {} events around {}ms, {} more forward", loaded, at, fetched);

    let snapshot = json!({
        "time_ms": at,
        "messages": store.messages_before(at, history),
        "tickers": store.active_tickers(at),
        "banner": store.active_banner(at),
    });
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Replay the archive against a realtime clock, printing messages as they
/// come up.
pub async fn play(
    config: ReplayConfig,
    file: &Path,
    from: i64,
    to: Option<i64>,
    speed: f64,
) -> Result<()> {
    if speed.is_nan() || speed <= 0.0 {
        return Err(AppError::InvalidInput(format!(
            "speed must be positive, got {speed}"
        )));
    }
    let source = LineSource::open(file).await?;
    info!("Replaying {} records from {}", source.len(), format_offset(from));

    let controller = ReplayController::new(
        config,
        Arc::new(source),
        Arc::new(RealtimeClock::new(from, speed)),
        Arc::new(CharWidthMeasure::default()),
    )?;
    let mut events = controller.subscribe();
    let handle = controller.spawn();

    let mut shown = HashSet::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ReplayEvent::Frame(frame)) => {
                    show_frame(&frame, &mut shown);
                    if to.is_some_and(|to| frame.time_ms >= to) {
                        info!("Reached {}", format_offset(frame.time_ms));
                        break;
                    }
                }
                Ok(ReplayEvent::Fault { error, halted }) => {
                    warn!("Replay fault (halted: {}): {}", halted, error);
                }
                Ok(ReplayEvent::EarlierMessages { .. }) => {}
                Ok(ReplayEvent::Stopped) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} events", skipped),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    handle.stop().await;
    Ok(())
}

fn show_frame(frame: &ReplayFrame, shown: &mut HashSet<String>) {
    for message in &frame.messages {
        if shown.insert(message.id().to_string()) {
            println!("{}", format_message(message));
        }
    }
    debug!(
        "{} bullets on screen, {} tickers",
        frame.bullets.len(),
        frame.tickers.len()
    );
}

fn format_message(event: &ChatEvent) -> String {
    let author = match event {
        ChatEvent::MessageNormal(m) | ChatEvent::NewMember(m) => m.author_name.as_str(),
        ChatEvent::MessagePaid(p) => p.message.author_name.as_str(),
        ChatEvent::StickerPaid(s) => s.author_name.as_str(),
        _ => "",
    };
    format!(
        "[{}] {}: {}",
        format_offset(event.offset_ms()),
        author,
        event.bullet_text()
    )
}

/// `h:mm:ss`, with a leading `-` for pre-roll offsets.
fn format_offset(offset_ms: i64) -> String {
    let sign = if offset_ms < 0 { "-" } else { "" };
    let total = offset_ms.unsigned_abs() / 1000;
    format!(
        "{}{}:{:02}:{:02}",
        sign,
        total / 3600,
        total / 60 % 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_replay::{ChatMessage, MessagePart};

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(0), "0:00:00");
        assert_eq!(format_offset(3_725_999), "1:02:05");
        assert_eq!(format_offset(-65_000), "-0:01:05");
    }

    #[test]
    fn test_format_message() {
        let event = ChatEvent::MessageNormal(ChatMessage {
            id: "m1".to_string(),
            offset_ms: 61_000,
            author_name: "Alice".to_string(),
            parts: vec![MessagePart::text("hello")],
            ..Default::default()
        });
        assert_eq!(format_message(&event), "[0:01:01] Alice: hello");
    }
}
