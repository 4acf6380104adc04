// Discord commands for the leveling system.
//
// **Notice the pattern:**
// 1. Extract primitive data from Discord types
// 2. Call core service
// 3. Format the response based on the result
//
// This layer is THIN - no business logic, just translation.

use crate::core::guild_settings::GuildSettingsService;
use crate::core::leveling::level_curve;
use crate::core::leveling::{normalize_drop_id, LevelingError, LevelingService, XpSource};
use crate::discord::leveling::leveling_announcements::{build_progress_bar, handle_level_up};
use crate::discord::leveling::platform_adapters::SerenityDropAnnouncer;
use crate::infra::guild_settings::SqliteGuildSettingsStore;
use crate::infra::leveling::SqliteXpStore;
use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// How many activity-log entries `xpstats` looks at.
const XPSTATS_WINDOW: usize = 50;

/// Type alias for our bot's context.
/// This is what every command receives as its first parameter.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Data that's shared across all commands.
/// This is where we store our services and configuration.
#[derive(Clone)]
pub struct Data {
    pub leveling: Arc<LevelingService<SqliteXpStore>>,
    pub settings: Arc<GuildSettingsService<SqliteGuildSettingsStore>>,
}

/// Show your or another member's rank.
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn rank(
    ctx: Context<'_>,
    #[description = "Member to check (defaults to you)"] member: Option<serenity::User>,
) -> Result<(), Error> {
    let target = member.as_ref().unwrap_or_else(|| ctx.author());
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?;

    if target.bot {
        ctx.say("Bots don't earn XP! 🤖").await?;
        return Ok(());
    }

    let name = resolve_display_name_cached(&ctx, guild_id, target.id);
    let rank = match ctx
        .data()
        .leveling
        .get_rank(target.id.get(), guild_id.get())
        .await
    {
        Ok(rank) => rank,
        Err(LevelingError::NotFound) => {
            ctx.say(format!("{name} hasn't earned any XP yet!")).await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let (xp_into_level, level_span) = level_curve::level_progress(rank.xp);
    let progress = xp_into_level as f64 / level_span as f64;

    let embed = serenity::CreateEmbed::new()
        .title(format!("Rank - {name}"))
        .color(0x3498db)
        .thumbnail(target.face())
        .field(
            "Stats",
            format!(
                "**Rank:** #{}\n**Level:** {}\n**Total XP:** {}",
                rank.rank, rank.level, rank.xp
            ),
            false,
        )
        .field(
            format!("Progress to Level {}", rank.level + 1),
            format!(
                "{}\n{}/{} XP ({} to go)",
                build_progress_bar(progress, 20),
                xp_into_level,
                level_span,
                level_curve::xp_to_next_level(rank.xp)
            ),
            false,
        );

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show the server's XP leaderboard.
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn leaderboard(
    ctx: Context<'_>,
    #[description = "Page number (default: 1)"] page: Option<u64>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?;
    let page = page.unwrap_or(1);

    let board = match ctx.data().leveling.get_leaderboard(guild_id.get(), page).await {
        Ok(board) => board,
        Err(LevelingError::OutOfRange { total_pages: 0, .. }) => {
            ctx.say("No one has earned any XP yet!").await?;
            return Ok(());
        }
        Err(LevelingError::OutOfRange { page: 0, .. }) => {
            ctx.say("Page number must be 1 or higher!").await?;
            return Ok(());
        }
        Err(LevelingError::OutOfRange { total_pages, .. }) => {
            ctx.say(format!("There are only {total_pages} pages!")).await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut embed = serenity::CreateEmbed::new()
        .title(format!(
            "🏆 XP Leaderboard - Page {}/{}",
            board.page, board.total_pages
        ))
        .color(0xffd700);

    for entry in &board.entries {
        let name = resolve_display_name_cached(
            &ctx,
            guild_id,
            serenity::UserId::new(entry.progress.user_id),
        );
        let medal = match entry.position {
            1 => "🥇 ",
            2 => "🥈 ",
            3 => "🥉 ",
            _ => "",
        };
        embed = embed.field(
            format!("{medal}#{} - {name}", entry.position),
            format!("Level {} • {} XP", entry.progress.level, entry.progress.xp),
            false,
        );
    }

    embed = embed.footer(serenity::CreateEmbedFooter::new(format!(
        "Use {}leaderboard <page> to see more",
        ctx.prefix()
    )));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Catch an XP drop.
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn catch(
    ctx: Context<'_>,
    #[description = "The code shown on the drop"] drop_id: String,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();
    let leveling = &ctx.data().leveling;

    let Some(drop_id) = normalize_drop_id(&drop_id, leveling.config().drop_id_length) else {
        ctx.say("That drop doesn't exist or has already been claimed!")
            .await?;
        return Ok(());
    };

    // Drops from other servers are ignored without a reply.
    if let Some(active) = leveling.drops().get(&drop_id) {
        if active.guild_id != guild_id {
            return Ok(());
        }
    }

    let announcer = SerenityDropAnnouncer::new(ctx.serenity_context().http.clone());
    match leveling
        .claim_drop(&drop_id, ctx.author().id.get(), guild_id, &announcer, Utc::now())
        .await
    {
        Ok(claim) => {
            ctx.say(format!(
                "🎉 You caught the drop and earned {} XP!",
                claim.amount()
            ))
            .await?;
            if claim.change.leveled_up() {
                handle_level_up(
                    ctx.serenity_context(),
                    ctx.data(),
                    &claim.change,
                    Some(ctx.channel_id()),
                )
                .await;
            }
        }
        Err(LevelingError::Expired) => {
            ctx.say("This drop has expired!").await?;
        }
        Err(LevelingError::NotFound) | Err(LevelingError::AlreadyClaimed) => {
            ctx.say("That drop doesn't exist or has already been claimed!")
                .await?;
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Manage level rewards.
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    subcommands("levelreward_add", "levelreward_remove", "levelreward_list"),
    subcommand_required
)]
pub async fn levelreward(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Add a role reward for reaching a level.
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "add",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn levelreward_add(
    ctx: Context<'_>,
    #[description = "Level required"] level: i64,
    #[description = "Role to grant"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?;

    if level < 1 || level > u32::MAX as i64 {
        ctx.say("Level must be 1 or higher!").await?;
        return Ok(());
    }

    if !can_manage_role(&ctx, guild_id, &role)? {
        ctx.say("You can't add a role reward higher than your highest role!")
            .await?;
        return Ok(());
    }

    let added = ctx
        .data()
        .leveling
        .add_role_reward(guild_id.get(), role.id.get(), level as u32)
        .await?;

    if added {
        ctx.say(format!(
            "✅ Added <@&{}> as a reward for reaching level {level}!",
            role.id
        ))
        .await?;
    } else {
        ctx.say("That role is already a level reward!").await?;
    }
    Ok(())
}

/// Remove a role reward.
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "remove",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn levelreward_remove(
    ctx: Context<'_>,
    #[description = "Role to stop granting"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?;

    let removed = ctx
        .data()
        .leveling
        .remove_role_reward(guild_id.get(), role.id.get())
        .await?;

    if removed {
        ctx.say(format!("✅ Removed <@&{}> from level rewards!", role.id))
            .await?;
    } else {
        ctx.say("That role wasn't a level reward!").await?;
    }
    Ok(())
}

/// List all role rewards.
#[poise::command(prefix_command, slash_command, guild_only, rename = "list")]
pub async fn levelreward_list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?;

    let rewards = ctx.data().leveling.list_role_rewards(guild_id.get()).await?;
    if rewards.is_empty() {
        ctx.say("No role rewards set up yet!").await?;
        return Ok(());
    }

    let mut embed = serenity::CreateEmbed::new()
        .title("Level Rewards")
        .description("Here are all the role rewards for this server:")
        .color(0x3498db);
    for reward in rewards {
        embed = embed.field(
            format!("Level {}", reward.level_requirement),
            format!("<@&{}>", reward.role_id),
            false,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show where someone's recent XP came from.
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn xpstats(
    ctx: Context<'_>,
    #[description = "Member to check (defaults to you)"] member: Option<serenity::User>,
) -> Result<(), Error> {
    let target = member.as_ref().unwrap_or_else(|| ctx.author());
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?;

    let recent = ctx
        .data()
        .leveling
        .recent_activity(target.id.get(), guild_id.get(), XPSTATS_WINDOW)
        .await?;

    let name = resolve_display_name_cached(&ctx, guild_id, target.id);
    if recent.is_empty() {
        ctx.say(format!("{name} hasn't earned any XP yet!")).await?;
        return Ok(());
    }

    let total: u64 = recent.iter().map(|e| e.amount).sum();
    let mut embed = serenity::CreateEmbed::new()
        .title(format!("XP Sources - {name}"))
        .color(0x2ecc71)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Based on the last {} XP gains",
            recent.len()
        )));

    for source in XpSource::ALL {
        let (count, sum) = recent
            .iter()
            .filter(|e| e.source == source)
            .fold((0u64, 0u64), |(count, sum), e| (count + 1, sum + e.amount));
        let share = sum as f64 / total.max(1) as f64;
        embed = embed.field(
            source_label(source),
            format!("{sum} XP from {count} gains\n{}", build_progress_bar(share, 10)),
            false,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

fn source_label(source: XpSource) -> &'static str {
    match source {
        XpSource::Message => "💬 Messages",
        XpSource::Reaction => "😀 Reactions",
        XpSource::Voice => "🎙️ Voice",
        XpSource::Drop => "📦 Drops",
    }
}

/// Whether the invoker may hand out `role` as a reward: server owners always
/// can, everyone else only below their own highest role.
fn can_manage_role(
    ctx: &Context<'_>,
    guild_id: serenity::GuildId,
    role: &serenity::Role,
) -> Result<bool, Error> {
    let guild = ctx
        .serenity_context()
        .cache
        .guild(guild_id)
        .ok_or("Server isn't cached yet, try again in a moment")?;
    let author_id = ctx.author().id;

    if guild.owner_id == author_id {
        return Ok(true);
    }

    let highest = guild
        .members
        .get(&author_id)
        .map(|member| {
            member
                .roles
                .iter()
                .filter_map(|id| guild.roles.get(id))
                .map(|r| r.position)
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);

    Ok(role.position < highest)
}

/// Resolve a display name from the cache only.
///
/// Order of preference:
/// 1. Guild nickname
/// 2. Cached username
/// 3. Fallback to mention format (no HTTP calls to avoid slowdown)
fn resolve_display_name_cached(
    ctx: &Context<'_>,
    guild_id: serenity::GuildId,
    user_id: serenity::UserId,
) -> String {
    if let Some(guild) = ctx.serenity_context().cache.guild(guild_id) {
        if let Some(member) = guild.members.get(&user_id) {
            return member.display_name().to_string();
        }
    }

    if let Some(user) = ctx.serenity_context().cache.user(user_id) {
        return user.name.clone();
    }

    format!("<@{}>", user_id)
}
