use super::success_embed;
use crate::{Context, Error};

/// Set the default display time when content has no duration
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn setdefaulttime(
    ctx: Context<'_>,
    #[description = "Seconds (0 to reset)"]
    #[min = 0]
    #[max = 3600]
    seconds: i64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let value = (seconds > 0).then_some(seconds);

    ctx.data()
        .queue
        .set_default_media_time(guild_id.get(), value)
        .await?;

    let message = match value {
        Some(s) => format!("Default display time set to **{}s**.", s),
        None => format!(
            "Default display time reset to **{}s**.",
            ctx.data().config.default_duration_secs
        ),
    };
    ctx.send(poise::CreateReply::default().embed(success_embed(message)).ephemeral(true))
        .await?;
    Ok(())
}

/// Set the maximum time a content can stay on screen
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn setmaxtime(
    ctx: Context<'_>,
    #[description = "Seconds (0 to remove the limit)"]
    #[min = 0]
    #[max = 3600]
    seconds: i64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let value = (seconds > 0).then_some(seconds);

    ctx.data()
        .queue
        .set_max_media_time(guild_id.get(), value)
        .await?;

    let message = match value {
        Some(s) => format!("Content is now capped at **{}s**.", s),
        None => "Display time limit removed.".to_string(),
    };
    ctx.send(poise::CreateReply::default().embed(success_embed(message)).ephemeral(true))
        .await?;
    Ok(())
}

/// Show media fullscreen on the overlay
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn setdisplayfull(
    ctx: Context<'_>,
    #[description = "Display media fullscreen"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;

    ctx.data()
        .queue
        .set_display_media_full(guild_id.get(), enabled)
        .await?;

    let message = if enabled {
        "Media will be displayed fullscreen."
    } else {
        "Media will keep their original size."
    };
    ctx.send(poise::CreateReply::default().embed(success_embed(message)).ephemeral(true))
        .await?;
    Ok(())
}
