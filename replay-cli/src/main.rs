mod cli;
mod commands;
mod config;
mod error;

use crate::{
    cli::{Args, Commands},
    error::Result,
};
use clap::Parser;
use std::process;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = config::load(args.config.as_deref())?;

    match args.command {
        Commands::Parse { file, channel_id } => {
            if let Some(channel_id) = channel_id {
                config.channel_id = channel_id;
            }
            commands::parse(&config, &file).await?;
        }
        Commands::Index { file } => commands::index(&file).await?,
        Commands::Query { file, at, history } => {
            let history = history.unwrap_or(match config.history {
                chat_replay::HistoryMode::Count(count) => count,
                chat_replay::HistoryMode::Window(_) => 100,
            });
            commands::query(&config, &file, at, history).await?;
        }
        Commands::Play {
            file,
            from,
            to,
            speed,
        } => commands::play(config, &file, from, to, speed).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
}
