use crate::core::leveling::level_curve;
use crate::core::leveling::{LevelChange, RewardReport};
use crate::discord::leveling::platform_adapters::SerenityRoleGranter;
use crate::discord::Data;
use poise::serenity_prelude::{self as serenity, builder::CreateMessage};

/// Everything that happens after a level-up: grant reward roles first, then
/// announce. Failures are logged and never bubble out of the event path.
pub async fn handle_level_up(
    ctx: &serenity::Context,
    data: &Data,
    change: &LevelChange,
    origin_channel: Option<serenity::ChannelId>,
) {
    let granter = SerenityRoleGranter::new(ctx.http.clone(), ctx.cache.clone());
    let report = match data.leveling.dispatch_rewards(change, &granter).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(
                user_id = change.user_id,
                guild_id = change.guild_id,
                error = %e,
                "Could not resolve level rewards"
            );
            RewardReport::default()
        }
    };

    let configured = match data.settings.settings_for(change.guild_id).await {
        Ok(settings) => settings.level_up_channel_id.map(serenity::ChannelId::new),
        Err(e) => {
            tracing::warn!(guild_id = change.guild_id, error = %e, "Could not load guild settings");
            None
        }
    };

    let Some(channel_id) = configured
        .or(origin_channel)
        .or_else(|| system_channel(ctx, change.guild_id))
    else {
        tracing::debug!(
            guild_id = change.guild_id,
            "No channel to announce level-up in"
        );
        return;
    };

    if let Err(e) = send_level_up_embed(ctx, channel_id, change, &report).await {
        tracing::warn!(
            user_id = change.user_id,
            channel_id = channel_id.get(),
            error = %e,
            "Failed to send level-up embed"
        );
    }
}

/// Send the level-up embed to `channel_id`.
pub async fn send_level_up_embed(
    ctx: &serenity::Context,
    channel_id: serenity::ChannelId,
    change: &LevelChange,
    report: &RewardReport,
) -> Result<(), serenity::Error> {
    let (xp_into_level, level_span) = level_curve::level_progress(change.total_xp);
    let progress = xp_into_level as f64 / level_span as f64;

    let mut embed = serenity::CreateEmbed::new()
        .title("🎉 Level Up!")
        .description(format!(
            "Congratulations <@{}>! You've reached level {}!",
            change.user_id, change.new_level
        ))
        .color(level_color(change.new_level))
        .field(
            "Progress",
            format!(
                "Level: {}\nTotal XP: {}\nProgress to Level {}: {}/{} XP\n{}",
                change.new_level,
                change.total_xp,
                change.new_level + 1,
                xp_into_level,
                level_span,
                build_progress_bar(progress, 18)
            ),
            false,
        );

    if !report.rewards.is_empty() {
        let rewards = report
            .rewards
            .iter()
            .map(|r| format!("• <@&{}>", r.role_id))
            .collect::<Vec<_>>()
            .join("\n");
        embed = embed.field("Rewards Earned", rewards, false);
    }

    channel_id
        .send_message(ctx, CreateMessage::new().embed(embed))
        .await
        .map(|_| ())
}

fn system_channel(ctx: &serenity::Context, guild_id: u64) -> Option<serenity::ChannelId> {
    ctx.cache
        .guild(serenity::GuildId::new(guild_id))
        .and_then(|guild| guild.system_channel_id)
}

fn level_color(level: u32) -> serenity::Colour {
    if level >= 50 {
        serenity::Colour::DARK_PURPLE
    } else if level >= 25 {
        serenity::Colour::ORANGE
    } else if level >= 10 {
        serenity::Colour::GOLD
    } else if level >= 5 {
        serenity::Colour::BLURPLE
    } else {
        serenity::Colour::LIGHT_GREY
    }
}

pub fn build_progress_bar(progress: f64, length: usize) -> String {
    let clamped = progress.clamp(0.0, 1.0);
    let mut filled = (clamped * length as f64).round() as usize;
    if clamped > 0.0 && filled == 0 {
        filled = 1;
    }
    filled = filled.min(length);
    let bar = "▰".repeat(filled) + &"▱".repeat(length - filled);
    format!("{} ({}%)", bar, (clamped * 100.0).round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(build_progress_bar(0.5, 10), "▰▰▰▰▰▱▱▱▱▱ (50%)");
        assert_eq!(build_progress_bar(0.0, 4), "▱▱▱▱ (0%)");
        assert_eq!(build_progress_bar(2.0, 4), "▰▰▰▰ (100%)");
    }

    #[test]
    fn tiny_progress_still_shows_one_segment() {
        assert!(build_progress_bar(0.01, 10).starts_with('▰'));
    }

    #[test]
    fn colors_escalate_with_level() {
        assert_eq!(level_color(1), serenity::Colour::LIGHT_GREY);
        assert_eq!(level_color(12), serenity::Colour::GOLD);
        assert_eq!(level_color(60), serenity::Colour::DARK_PURPLE);
    }
}
