use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspect and replay archived YouTube live chat.
#[derive(Debug, Parser)]
#[command(name = "chat-replay", version, about)]
pub struct Args {
    /// TOML file with replay settings
    #[arg(short, long, global = true, env = "CHAT_REPLAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Normalize every record of an archive and print one JSON event per line
    Parse {
        /// Line-delimited `.live_chat.json` archive
        file: PathBuf,

        /// Channel owning the video (overrides the config file)
        #[arg(long)]
        channel_id: Option<String>,
    },

    /// Print the time range covered by each record
    Index {
        file: PathBuf,
    },

    /// Show what the chat looks like at one playback position
    Query {
        file: PathBuf,

        /// Playback position in milliseconds
        #[arg(long, allow_negative_numbers = true)]
        at: i64,

        /// Number of past messages to show
        #[arg(long)]
        history: Option<usize>,
    },

    /// Replay the chat in real time
    Play {
        file: PathBuf,

        /// Start position in milliseconds
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        from: i64,

        /// Stop once playback passes this position
        #[arg(long, allow_negative_numbers = true)]
        to: Option<i64>,

        /// Playback speed
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },
}
