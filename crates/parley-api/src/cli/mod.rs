//! CLI command definitions for the `parley` binary.
//!
//! `serve` runs the Discord bot; the remaining commands inspect local state
//! without connecting to Discord.

pub mod channels;
pub mod status;
pub mod usage;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Discord chat bot streaming replies from an OpenAI-compatible model.
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter implied by `--quiet` / `-v` when RUST_LOG is unset.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn,parley=info",
            1 => "info,parley=debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to Discord and answer in active channels until Ctrl+C.
    Serve,

    /// List every active channel and its settings.
    #[command(alias = "ls")]
    Channels {
        /// Only channels of this guild.
        #[arg(long)]
        guild: Option<u64>,
    },

    /// Show token usage, for one guild or the whole installation.
    Usage {
        /// Guild to summarize.
        #[arg(long)]
        guild: Option<u64>,
    },

    /// Show configuration and storage overview.
    Status,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}
