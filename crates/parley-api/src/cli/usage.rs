//! `parley usage`: token usage summary.

use anyhow::Result;
use console::style;

use parley_core::repository::usage::UsageRepository;

use crate::state::AppState;

pub async fn show_usage(state: &AppState, guild: Option<u64>, json: bool) -> Result<()> {
    let summary = match guild {
        Some(guild_id) => state.usage_repo.guild_summary(guild_id).await?,
        None => state.usage_repo.total_summary().await?,
    };

    if json {
        let out = serde_json::json!({
            "guild_id": guild,
            "exchanges": summary.exchanges,
            "input_tokens": summary.input_tokens,
            "output_tokens": summary.output_tokens,
            "total_tokens": summary.total_tokens,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let scope = match guild {
        Some(id) => format!("guild {id}"),
        None => "all guilds".to_string(),
    };

    println!();
    println!("  {} Usage for {}", style("📊").bold(), style(scope).cyan());
    println!();
    println!("  Exchanges:     {}", style(summary.exchanges).bold());
    println!("  Input tokens:  {}", format_tokens(summary.input_tokens));
    println!("  Output tokens: {}", format_tokens(summary.output_tokens));
    println!("  Total tokens:  {}", style(format_tokens(summary.total_tokens)).bold());
    println!();
    Ok(())
}

pub(crate) fn format_tokens(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
