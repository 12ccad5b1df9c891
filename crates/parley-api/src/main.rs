//! Parley CLI and Discord bot entry point.
//!
//! Binary name: `parley`
//!
//! Parses CLI arguments, initializes tracing, the database and services, then
//! dispatches to the command handler or runs the Discord bot.

mod cli;
mod discord;
mod state;

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use clap_complete::generate;
use serenity::http::Http;
use tokio_util::sync::CancellationToken;

use parley_infra::config::{
    DISCORD_TOKEN_ENV, load_global_config, resolve_data_dir, resolve_discord_token,
};
use parley_observe::tracing_setup::{init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use discord::DiscordBot;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "parley", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = resolve_data_dir();
    tokio::fs::create_dir_all(&data_dir).await?;
    let config = load_global_config(&data_dir).await;

    init_tracing(cli.log_filter(), config.telemetry.otel_stdout)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init(data_dir, config).await?;

    let result = run(cli, state).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli, state: AppState) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve => serve(state, cli.quiet).await?,
        Commands::Channels { guild } => cli::channels::list_channels(&state, guild, cli.json).await?,
        Commands::Usage { guild } => cli::usage::show_usage(&state, guild, cli.json).await?,
        Commands::Status => cli::status::status(&state, cli.json).await?,
        Commands::Completions { .. } => unreachable!("handled above"),
    }
    Ok(())
}

async fn serve(state: AppState, quiet: bool) -> anyhow::Result<()> {
    let token = resolve_discord_token(&state.config).with_context(|| {
        format!("no Discord bot token: set {DISCORD_TOKEN_ENV} or discord_token in config.toml")
    })?;

    let http = Arc::new(Http::new(&token));
    let coordinator = state.coordinator(http).await?;
    let bot = Arc::new(DiscordBot::new(state, coordinator));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    if !quiet {
        println!(
            "  {} Parley is connecting to Discord",
            console::style("⚡").bold()
        );
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    discord::run(bot, &token, shutdown).await;

    if !quiet {
        println!("\n  Bot stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
