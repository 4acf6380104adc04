// This is the entry point of the leveling bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite stores)
// - `discord/` = Discord-specific adapters (commands, events, background jobs)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::guild_settings::{GuildSettingsService, DEFAULT_PREFIX};
use crate::core::leveling::{LevelingConfig, LevelingService};
use crate::discord::leveling::activity_events;
use crate::discord::leveling::background_tasks::LevelingTasks;
use crate::discord::{Data, Error};
use crate::infra::database::{self, DEFAULT_DATABASE_PATH};
use crate::infra::guild_settings::SqliteGuildSettingsStore;
use crate::infra::leveling::SqliteXpStore;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command Discord events.
/// Messages and reactions feed XP; new guilds get their default settings row.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            activity_events::on_message(ctx, data, new_message).await;
        }
        serenity::FullEvent::ReactionAdd { add_reaction } => {
            activity_events::on_reaction_add(ctx, data, add_reaction).await;
        }
        serenity::FullEvent::GuildCreate { guild, .. } => {
            match data.settings.ensure_defaults(guild.id.get()).await {
                Ok(true) => tracing::info!(guild_id = guild.id.get(), "Created default guild settings"),
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    guild_id = guild.id.get(),
                    error = %e,
                    "Could not create default guild settings"
                ),
            }
        }
        _ => {}
    }

    Ok(())
}

/// Per-guild command prefix, falling back to the default in DMs or when the
/// settings row can't be read.
async fn dynamic_prefix(
    ctx: poise::PartialContext<'_, Data, Error>,
) -> Result<Option<String>, Error> {
    let Some(guild_id) = ctx.guild_id else {
        return Ok(Some(DEFAULT_PREFIX.to_string()));
    };

    let prefix = match ctx.data.settings.settings_for(guild_id.get()).await {
        Ok(settings) => settings.command_prefix,
        Err(e) => {
            tracing::warn!(guild_id = guild_id.get(), error = %e, "Falling back to default prefix");
            DEFAULT_PREFIX.to_string()
        }
    };
    Ok(Some(prefix))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let token = std::env::var("DISCORD_TOKEN").context(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    )?;
    let database_path =
        std::env::var("DATABASE_PATH").unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string());

    let config = LevelingConfig::load().context("Invalid leveling configuration")?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    let pool = database::connect(&database_path)
        .await
        .context("Failed to open the leveling database")?;

    let xp_store = SqliteXpStore::new(pool.clone())
        .await
        .context("Failed to initialize SQLite XP store")?;
    let settings_store = SqliteGuildSettingsStore::new(pool)
        .await
        .context("Failed to initialize guild settings store")?;

    let data = Data {
        leveling: Arc::new(LevelingService::with_config(xp_store, config)),
        settings: Arc::new(GuildSettingsService::new(settings_store)),
    };
    let tasks = Arc::new(LevelingTasks::new());

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MESSAGE_REACTIONS
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    let setup_tasks = Arc::clone(&tasks);
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: discord::commands::all(),
            prefix_options: poise::PrefixFrameworkOptions {
                dynamic_prefix: Some(|ctx| Box::pin(dynamic_prefix(ctx))),
                ..Default::default()
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            on_error: |error| {
                Box::pin(async move {
                    if let Err(e) = poise::builtins::on_error(error).await {
                        tracing::error!(error = %e, "Error while handling error");
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up");

                // Register slash commands globally (can take up to an hour to propagate)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered");

                setup_tasks.start(ctx.clone(), data.clone()).await;
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    // Ctrl+C stops the leveling jobs, then the shards.
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Could not listen for Ctrl+C");
            return;
        }
        tracing::info!("Received Ctrl+C, shutting down...");
        tasks.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    client.start().await.context("Error running bot")?;
    Ok(())
}
