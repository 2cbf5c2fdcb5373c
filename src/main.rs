use anyhow::{Context, Result};
use avatalk::app::{RunOptions, run_chat_command, run_say_command};
use avatalk::cli::{Cli, Commands, ConfigAction};
use avatalk::config::Config;
use avatalk::session::Session;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let options = RunOptions {
        quiet: cli.quiet,
        device: cli.device.clone(),
    };

    match &cli.command {
        None | Some(Commands::Chat) => {
            let config = load_config(&cli)?;
            run_chat_command(config, options).await?;
        }
        Some(Commands::Say { text }) => {
            let config = load_config(&cli)?;
            run_say_command(config, options, text.join(" ")).await?;
        }
        Some(Commands::Session) => {
            let config = load_config(&cli)?;
            let path = config
                .session
                .path
                .clone()
                .unwrap_or_else(Session::default_path);
            let session = Session::load_or_create(&path)?;
            println!("{}  {}", "Session:".dimmed(), session.session_id());
            println!("{}     {}", "User:".dimmed(), session.user_id());
            println!("{}     {}", "File:".dimmed(), path.display());
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, &cli)?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "avatalk",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Log to stderr. `RUST_LOG` wins over `-v`/`--quiet`.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,avatalk={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .init();
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(Config::default_path)
}

/// Load configuration from file or use defaults.
///
/// Priority order (highest first):
/// 1. Command-line flags (--timeout, --audio-sink)
/// 2. Environment variables
/// 3. Config file (--config, or ~/.config/avatalk/config.toml)
/// 4. Built-in defaults
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    }
    .with_env_overrides();

    if let Some(timeout) = cli.timeout {
        config.pipeline.stage_timeout_ms = u64::try_from(timeout.as_millis())
            .context("--timeout is too large")?
            .max(1);
    }
    if let Some(sink) = &cli.audio_sink {
        config.renderer.audio_sink = Some(sink.clone());
    }

    tracing::debug!(config = ?config.redacted(), "effective configuration");
    Ok(config)
}

/// Handle configuration commands.
fn handle_config_command(action: &ConfigAction, cli: &Cli) -> Result<()> {
    let path = config_path(cli);

    match action {
        ConfigAction::Show => {
            let config = load_config(cli)?;
            print!("{}", config.redacted().to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            write_default_config(&path, *force)?;
            println!("{} {}", "Wrote".green(), path.display());
        }
    }

    Ok(())
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, Config::default().to_toml()?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
