//! Command-line interface for avatalk
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Talk to a lip-synced avatar
#[derive(Parser, Debug)]
#[command(name = "avatalk", version, about = "Talk to a lip-synced avatar")]
pub struct Cli {
    /// Subcommand to execute (default: chat)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Per-stage timeout override. Examples: 10s, 1m30s
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Write the avatar's audio to this raw PCM file
    #[arg(long, global = true, value_name = "PATH")]
    pub audio_sink: Option<PathBuf>,

    /// Audio input device for /listen (e.g., hw:0)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub device: Option<String>,
}

/// Parse a stage timeout.
///
/// Supports any duration format accepted by `humantime`; a bare number is
/// taken as seconds.
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let duration = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if duration.is_zero() {
        return Err("timeout must be greater than zero".to_string());
    }
    Ok(duration)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive conversation: type a line to talk, /listen and /stop to speak
    Chat,

    /// Say one thing, wait for the reply to be rendered, then exit
    Say {
        /// What to say to the avatar
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Show the persisted session identity, creating it if needed
    Session,

    /// View and create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment)
    Show,
    /// Print the configuration file location
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
