//! `parley channels`: list active channels.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use parley_types::channel::ChannelConfig;

use crate::state::AppState;

pub async fn list_channels(state: &AppState, guild: Option<u64>, json: bool) -> Result<()> {
    let channels: Vec<ChannelConfig> = state
        .channel_service
        .list()
        .await?
        .into_iter()
        .filter(|c| guild.is_none_or(|g| c.guild_id == g))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&channels)?);
        return Ok(());
    }

    if channels.is_empty() {
        println!();
        println!(
            "  {} No active channels. Run {} in a Discord channel to start.",
            style("i").blue().bold(),
            style("/activate").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Guild").fg(Color::White),
        Cell::new("Channel").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Resets").fg(Color::White),
        Cell::new("Marker").fg(Color::White),
        Cell::new("System Prompt").fg(Color::White),
    ]);

    for channel in &channels {
        let status_cell = if channel.enabled {
            Cell::new("● enabled").fg(Color::Green)
        } else {
            Cell::new("○ disabled").fg(Color::Yellow)
        };

        let resets = format!(
            "{} replies / {}{}",
            channel.max_turns,
            format_duration(channel.reset_delta_secs),
            if channel.inherit_on_reset { " (keeps tail)" } else { "" }
        );

        table.add_row(vec![
            Cell::new(channel.guild_id),
            Cell::new(channel.channel_id),
            status_cell,
            Cell::new(channel.model),
            Cell::new(resets),
            Cell::new(&channel.completion_marker),
            Cell::new(preview(&channel.system_prompt, 40)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn format_duration(secs: u32) -> String {
    match secs {
        s if s >= 3600 && s % 3600 == 0 => format!("{}h", s / 3600),
        s if s >= 60 && s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() > max_chars {
        let cut: String = single_line.chars().take(max_chars - 3).collect();
        format!("{cut}...")
    } else {
        single_line
    }
}
