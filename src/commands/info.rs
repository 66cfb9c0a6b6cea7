use crate::{Context, Error};
use poise::serenity_prelude as serenity;

/// Check if the bot is alive
#[poise::command(slash_command)]
pub async fn alive(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say(format!("{}, I'm alive!", ctx.author().name)).await?;
    Ok(())
}

/// List of commands
#[poise::command(slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let names: Vec<String> = ctx
        .framework()
        .options()
        .commands
        .iter()
        .map(|c| format!("`/{}`", c.name))
        .collect();

    let embed = serenity::CreateEmbed::new()
        .title("Commands")
        .description(names.join(", "))
        .color(0x5865F2);
    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Get the overlay link to add in OBS
#[poise::command(slash_command, guild_only)]
pub async fn client(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let link = ctx.data().config.overlay_link(guild_id.get());

    let embed = serenity::CreateEmbed::new()
        .description(format!("Here is the link: {}", link))
        .color(0x5865F2);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Overlay status for this server
#[poise::command(slash_command, guild_only)]
pub async fn info(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let queue = &ctx.data().queue;

    let settings = queue.guild_settings(&guild_id.to_string()).await?;
    let pending = queue.pending_count(guild_id.get()).await?;

    let fallback = ctx.data().config.default_duration_secs;
    let default_time = settings
        .default_media_time
        .map(|s| format!("`{}s`", s))
        .unwrap_or_else(|| format!("`{}s` (default)", fallback));
    let max_time = settings
        .max_media_time
        .map(|s| format!("`{}s`", s))
        .unwrap_or_else(|| "None".to_string());
    let playing = match settings.busy_until {
        Some(until) if until >= chrono::Utc::now() => format!("until <t:{}:T>", until.timestamp()),
        _ => "Idle".to_string(),
    };

    let embed = serenity::CreateEmbed::new()
        .title("📺 Overlay")
        .field("Now playing", playing, true)
        .field("Queued", format!("`{}`", pending), true)
        .field("Default time", default_time, true)
        .field("Max time", max_time, true)
        .field(
            "Fullscreen media",
            if settings.display_media_full { "Yes" } else { "No" },
            true,
        )
        .color(0x5865F2);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}
