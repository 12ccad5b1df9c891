//! System status dashboard command.

use anyhow::Result;
use console::style;

use parley_core::repository::usage::UsageRepository;
use parley_infra::config::resolve_discord_token;

use crate::state::AppState;

use super::usage::format_tokens;

/// Display configuration, channel, guild, and usage counts.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let channels = state.channel_service.list().await?;
    let enabled = channels.iter().filter(|c| c.enabled).count();
    let guilds = state.guild_service.list().await?;
    let usage = state.usage_repo.total_summary().await?;
    let has_token = resolve_discord_token(&state.config).is_some();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "discord_token_configured": has_token,
            "openai_base_url": state.config.openai_base_url,
            "vault_key_source": state.config.vault.key_source,
            "guilds_with_key": guilds.len(),
            "channels": {
                "total": channels.len(),
                "enabled": enabled,
            },
            "exchanges": usage.exchanges,
            "total_tokens": usage.total_tokens,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let check_mark = |ok: bool| {
        if ok {
            format!("{}", style("✓").green())
        } else {
            format!("{}", style("✗").red())
        }
    };

    println!();
    println!("  {} Parley v{}", style("⚡").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Discord ──").dim());
    println!("  {} Bot token configured", check_mark(has_token));
    println!("  Servers with API key: {}", style(guilds.len()).bold());
    println!(
        "  Active channels:      {} ({} enabled)",
        style(channels.len()).bold(),
        style(enabled).green()
    );
    println!();

    println!("  {}", style("── Usage ──").dim());
    println!("  Exchanges:   {}", usage.exchanges);
    println!("  Tokens used: {}", format_tokens(usage.total_tokens));
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Provider: {}", style(&state.config.openai_base_url).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}
