use overlaybot::commands::{self, error_embed, how_to_use_embed};
use overlaybot::config::Config;
use overlaybot::db::Database;
use overlaybot::dispatcher::QueueDispatcher;
use overlaybot::duration::DurationPolicy;
use overlaybot::metadata::HttpMetadataResolver;
use overlaybot::overlay::{self, OverlayHub};
use overlaybot::services::queue::QueueService;
use overlaybot::tts::TtsClient;
use overlaybot::{Data, Error};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();
    info!("Configuration: {:?}", config);

    let db = Database::new(&config)?;
    db.execute_init()?;

    let queue = QueueService::new(db, DurationPolicy::new(config.default_duration_secs));
    let hub = OverlayHub::new();
    let cancel = CancellationToken::new();

    let dispatcher = QueueDispatcher::new(
        Arc::new(queue.clone()),
        Arc::new(queue.clone()),
        Arc::new(hub.clone()),
        config.dispatch_timing(),
    );
    let dispatcher_task = tokio::spawn(dispatcher.run(cancel.clone()));
    let server_task = tokio::spawn(overlay::server::serve(
        config.port,
        hub.clone(),
        cancel.clone(),
    ));

    let http_client = reqwest::Client::new();
    let data = Data {
        config: config.clone(),
        queue,
        overlay: hub,
        metadata: Arc::new(HttpMetadataResolver::new(http_client.clone())),
        tts: TtsClient::new(http_client, &config.tts_url, &config.language),
    };

    let setup_config = config.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(&config),
            on_error: |error| Box::pin(on_error(error)),
            event_handler: |ctx, event, _framework, _data| Box::pin(event_handler(ctx, event)),
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot is ready! Connected as {}", ready.user.name);
                info!(
                    "Invite: https://discord.com/oauth2/authorize?client_id={}&scope=bot",
                    setup_config.application_id
                );

                if setup_config.register_commands {
                    let commands = &framework.options().commands;
                    match setup_config.dev_guild_id {
                        Some(guild_id) => {
                            poise::builtins::register_in_guild(
                                ctx,
                                commands,
                                serenity::GuildId::new(guild_id),
                            )
                            .await?
                        }
                        None => poise::builtins::register_globally(ctx, commands).await?,
                    }
                    info!("Registered {} commands", commands.len());
                }

                // Set bot status
                ctx.set_activity(Some(serenity::ActivityData::custom(
                    &setup_config.status_message,
                )));

                Ok(data)
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILDS;

    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    cancel.cancel();
    if let Err(e) = dispatcher_task.await {
        error!("Queue dispatcher task failed: {}", e);
    }
    match server_task.await {
        Ok(Err(e)) => error!("Overlay server error: {}", e),
        Err(e) => error!("Overlay server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!("Command /{} failed: {}", ctx.command().name, error);
            let embed = error_embed("Something went wrong with this command. Please check the logs!");
            if let Err(e) = ctx
                .send(poise::CreateReply::default().embed(embed).ephemeral(true))
                .await
            {
                warn!("Failed to report command error: {}", e);
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

async fn event_handler(ctx: &serenity::Context, event: &serenity::FullEvent) -> Result<(), Error> {
    if let serenity::FullEvent::GuildCreate { guild, is_new } = event {
        if *is_new != Some(true) {
            return Ok(());
        }
        info!("Joined guild {} ({})", guild.name, guild.id);

        if let Some(channel_id) = guild.system_channel_id {
            let message = serenity::CreateMessage::new().embed(how_to_use_embed());
            if let Err(e) = channel_id.send_message(&ctx.http, message).await {
                warn!("Could not post how-to in guild {}: {}", guild.id, e);
            }
        }
    }
    Ok(())
}
