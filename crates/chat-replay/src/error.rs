//! Replay error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Errors that can occur while ingesting or replaying live chat.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// A renderer or action shape the parser does not know.
    #[error("Unknown chat event: {0}")]
    UnknownEvent(String),

    /// Malformed embedded data inside a recognised shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Membership badge tooltip matched no configured locale.
    #[error("Badge parse error: {0}")]
    BadgeParse(String),

    /// A fetch result belongs to a cursor that has since been replaced.
    #[error("Stale cursor: requested {requested}, current {current}")]
    StaleCursor { requested: String, current: String },

    /// The anchor message of a backward fetch is not in the store.
    #[error("Unknown anchor message: {0}")]
    UnknownAnchor(String),

    /// The danmaku scheduler already tracks a bullet with this id.
    #[error("Duplicate bullet: {0}")]
    DuplicateBullet(String),

    /// Transport-level failure reported by a chat source.
    #[error("Source error: {0}")]
    Source(String),

    /// The replay controller task has exited.
    #[error("Replay controller is not running")]
    Stopped,

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ReplayError {
    /// Create an unknown event error.
    pub fn unknown_event(msg: impl Into<String>) -> Self {
        Self::UnknownEvent(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a badge parse error.
    pub fn badge_parse(msg: impl Into<String>) -> Self {
        Self::BadgeParse(msg.into())
    }

    /// Create a source error.
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Prefix the message of an ingestion fault with the record it came from.
    pub fn at_sequence(self, sequence: u64) -> Self {
        match self {
            Self::UnknownEvent(msg) => Self::UnknownEvent(format!("record {sequence}: {msg}")),
            Self::Parse(msg) => Self::Parse(format!("record {sequence}: {msg}")),
            Self::BadgeParse(msg) => Self::BadgeParse(format!("record {sequence}: {msg}")),
            other => other,
        }
    }

    /// Whether this error means the raw data no longer matches the
    /// normalization contract. Such faults halt ingestion instead of being
    /// retried.
    pub fn is_ingestion_fault(&self) -> bool {
        matches!(
            self,
            Self::UnknownEvent(_) | Self::Parse(_) | Self::BadgeParse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingestion_fault_classification() {
        assert!(ReplayError::unknown_event("x").is_ingestion_fault());
        assert!(ReplayError::parse("x").is_ingestion_fault());
        assert!(ReplayError::badge_parse("x").is_ingestion_fault());
        assert!(!ReplayError::source("timeout").is_ingestion_fault());
        assert!(!ReplayError::UnknownAnchor("m1".to_string()).is_ingestion_fault());
    }

    #[test]
    fn test_at_sequence_keeps_variant() {
        let err = ReplayError::parse("bad offset").at_sequence(42);
        assert!(matches!(&err, ReplayError::Parse(msg) if msg == "record 42: bad offset"));
        let err = ReplayError::source("timeout").at_sequence(42);
        assert!(matches!(&err, ReplayError::Source(msg) if msg == "timeout"));
    }
}
