use super::{error_embed, success_embed};
use crate::content::{ContentDescriptor, ContentError};
use crate::db::QueueKind;
use crate::overlay::{guild_topic, Publisher, STOP_EVENT};
use crate::services::queue::BusyState;
use crate::tts::estimate_duration_secs;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

const MAX_TEXT_CHARS: usize = 500;
const MAX_SPEECH_CHARS: usize = 500;

/// Send content to the stream
#[poise::command(slash_command, guild_only)]
pub async fn send(
    ctx: Context<'_>,
    #[description = "Link to show on stream"] url: Option<String>,
    #[description = "Media to show on stream"] media: Option<serenity::Attachment>,
    #[description = "Text to show"] text: Option<String>,
) -> Result<(), Error> {
    queue_content(ctx, url, media, text, false).await
}

/// Send content to the stream (but hidden 😈)
#[poise::command(slash_command, guild_only)]
pub async fn hidesend(
    ctx: Context<'_>,
    #[description = "Link to show on stream"] url: Option<String>,
    #[description = "Media to show on stream"] media: Option<serenity::Attachment>,
    #[description = "Text to show"] text: Option<String>,
) -> Result<(), Error> {
    queue_content(ctx, url, media, text, true).await
}

/// Ask the bot to say something
#[poise::command(slash_command, guild_only)]
pub async fn talk(
    ctx: Context<'_>,
    #[description = "Text to say"] voice: String,
    #[description = "Text to show"] text: Option<String>,
) -> Result<(), Error> {
    queue_speech(ctx, voice, text, false).await
}

/// Ask the bot to say something (but hidden 😈)
#[poise::command(slash_command, guild_only)]
pub async fn hidetalk(
    ctx: Context<'_>,
    #[description = "Text to say"] voice: String,
    #[description = "Text to show"] text: Option<String>,
) -> Result<(), Error> {
    queue_speech(ctx, voice, text, true).await
}

/// Stop what is currently playing on the overlay
#[poise::command(slash_command, guild_only)]
pub async fn stop(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?.to_string();

    ctx.data()
        .overlay
        .publish(&guild_topic(&guild_id), STOP_EVENT, serde_json::Value::Null);
    ctx.data().queue.clear_busy(&guild_id).await?;
    info!("Overlay stopped in guild {} by {}", guild_id, ctx.author().name);

    let embed = success_embed("Stopped. Anything still queued will play next.");
    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

async fn queue_content(
    ctx: Context<'_>,
    url: Option<String>,
    media: Option<serenity::Attachment>,
    text: Option<String>,
    hidden: bool,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;

    if url.is_none() && media.is_none() && text.is_none() {
        let embed = error_embed("Give me a link, a media or some text to show.");
        ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
            .await?;
        return Ok(());
    }
    if text.as_ref().is_some_and(|t| t.chars().count() > MAX_TEXT_CHARS) {
        let embed = error_embed(format!("Text is too long (max {} characters).", MAX_TEXT_CHARS));
        ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
            .await?;
        return Ok(());
    }

    // Metadata lookups can outlast Discord's 3s acknowledgement window.
    if hidden {
        ctx.defer_ephemeral().await?;
    } else {
        ctx.defer().await?;
    }

    let (media_url, mut content_type, mut duration) = match &media {
        Some(attachment) => (
            Some(attachment.proxy_url.clone()),
            attachment.content_type.clone(),
            attachment.duration_secs,
        ),
        None => (None, None, None),
    };

    let mut content = ContentDescriptor::default()
        .with_url(url)
        .with_text(text)
        .with_media(media_url, None);

    if content_type.is_none() || duration.is_none() {
        if let Some(source) = content.source_url() {
            let metadata = ctx.data().metadata.resolve(source).await;
            content_type = content_type.or(metadata.content_type);
            duration = duration.or(metadata.duration_secs);
            content.media_is_short = metadata.is_short;
        }
    }
    content.media_content_type = content_type;

    if !hidden {
        let author = ctx.author();
        content = content.with_author(author.name.clone(), author.avatar_url());
    }

    let entry_id = match ctx
        .data()
        .queue
        .submit(QueueKind::Message, guild_id.get(), content, duration)
        .await
    {
        Ok(id) => id,
        Err(e) => match e.downcast::<ContentError>() {
            Ok(reason) => {
                let embed = error_embed(reason.to_string());
                ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        },
    };
    info!(
        "Queued message {} in guild {} from {}",
        entry_id,
        guild_id,
        ctx.author().name
    );

    let embed = success_embed("Content received! It will play soon.");
    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(hidden))
        .await?;
    Ok(())
}

async fn queue_speech(
    ctx: Context<'_>,
    voice: String,
    text: Option<String>,
    hidden: bool,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;

    let voice = voice.trim();
    if voice.is_empty() || voice.chars().count() > MAX_SPEECH_CHARS {
        let embed = error_embed(format!(
            "Speech must be between 1 and {} characters.",
            MAX_SPEECH_CHARS
        ));
        ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
            .await?;
        return Ok(());
    }

    if hidden {
        ctx.defer_ephemeral().await?;
    } else {
        ctx.defer().await?;
    }

    let audio = ctx.data().tts.synthesize(voice).await?;
    let duration = estimate_duration_secs(audio.len());

    // The overlay plays the clip straight from Discord's CDN.
    let reply = poise::CreateReply::default()
        .embed(success_embed("Content received! It will play soon."))
        .attachment(serenity::CreateAttachment::bytes(audio, "speech.mp3"))
        .ephemeral(hidden);
    let handle = ctx.send(reply).await?;
    let message = handle.message().await?;
    let media = message
        .attachments
        .first()
        .map(|a| a.proxy_url.clone())
        .ok_or("Discord did not return the speech attachment")?;

    let mut content = ContentDescriptor::default()
        .with_text(text)
        .with_media(Some(media), Some("audio/mpeg".to_string()));
    if !hidden {
        let author = ctx.author();
        content = content.with_author(author.name.clone(), author.avatar_url());
    }

    let entry_id = ctx
        .data()
        .queue
        .submit(QueueKind::Vocal, guild_id.get(), content, Some(duration))
        .await?;
    info!(
        "Queued speech {} in guild {} ({:.1}s)",
        entry_id, guild_id, duration
    );
    Ok(())
}
