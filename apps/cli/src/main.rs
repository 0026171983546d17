//! Rewind CLI - step a database forward and back through checkpoints.
//!
//! This CLI provides a `rewind` command that drives the checkpoint lifecycle
//! of an owner's project against the Neon control plane.

mod commands;
mod context;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{cleanup, history};
use commands::cleanup::CleanupCommand;
use context::AppContext;

/// Rewind CLI - checkpointed database history
///
/// Each checkpoint pairs a prompt with a snapshot of the project's live
/// branch. Moving to a checkpoint restores its snapshot; moving forward from
/// the newest checkpoint runs the next scripted step and records a new one.
#[derive(Parser, Debug)]
#[command(name = "rewind", author, version, about = "Rewind - checkpointed database history")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file (defaults to ./.rewind.toml, then ~/.rewind/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Owner whose project is operated on
    #[arg(short, long, default_value = "default", global = true)]
    owner: String,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tear down the owner's project and start a fresh one
    ///
    /// Deletes every project the owner has, provisions a new one and records
    /// the bootstrap checkpoint.
    Start,

    /// Restore the project to a checkpoint
    Goto {
        /// Checkpoint to restore
        checkpoint_id: String,
    },

    /// Move forward from the current checkpoint
    ///
    /// Restores the existing successor if there is one; otherwise runs the
    /// next step and records a new checkpoint.
    Next {
        /// Checkpoint the project is currently on
        current_id: String,

        /// Run this step instead of the one following the current checkpoint
        #[arg(long)]
        step: Option<String>,
    },

    /// Re-snapshot the live branch into a checkpoint
    Refresh {
        /// Checkpoint to update
        checkpoint_id: String,
    },

    /// Show the project's checkpoints
    Timeline {
        /// Checkpoint to view from (defaults to the latest)
        current_id: Option<String>,
    },

    /// Delete control-plane resources in bulk
    #[command(subcommand)]
    Cleanup(CleanupCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ctx = AppContext::load(args.config.as_deref(), args.json)?;
    let owner = args.owner.as_str();

    match args.command {
        Command::Start => history::start(&ctx, owner).await?,
        Command::Goto { checkpoint_id } => history::goto(&ctx, owner, &checkpoint_id).await?,
        Command::Next { current_id, step } => {
            history::next(&ctx, owner, &current_id, step.as_deref()).await?;
        }
        Command::Refresh { checkpoint_id } => {
            history::refresh(&ctx, owner, &checkpoint_id).await?;
        }
        Command::Timeline { current_id } => {
            history::timeline(&ctx, owner, current_id.as_deref()).await?;
        }
        Command::Cleanup(cmd) => cleanup::execute(&ctx, owner, cmd).await?,
    }

    Ok(())
}
