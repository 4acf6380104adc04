// Gateway events -> leveling ingest.
//
// Each handler pulls plain ids out of the serenity types, hands them to the
// core service and runs the level-up flow when an award crosses a level.
// Nothing here returns an error: a failed award is logged and forgotten.

use crate::core::guild_settings::GuildSettings;
use crate::core::leveling::{
    AwardOutcome, GuildChannels, MessageActivity, VoiceChannelSnapshot, VoiceMember,
};
use crate::discord::leveling::leveling_announcements::handle_level_up;
use crate::discord::Data;
use poise::serenity_prelude as serenity;
use std::collections::BTreeMap;

pub async fn on_message(ctx: &serenity::Context, data: &Data, message: &serenity::Message) {
    let Some(guild_id) = message.guild_id else {
        return;
    };
    if message.author.bot {
        return;
    }

    let settings = match data.settings.settings_for(guild_id.get()).await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(guild_id = guild_id.get(), error = %e, "Using default guild settings");
            GuildSettings::new(guild_id.get())
        }
    };

    let activity = MessageActivity {
        user_id: message.author.id.get(),
        guild_id: Some(guild_id.get()),
        author_is_bot: message.author.bot,
        content: message.content.clone(),
        bot_user_id: Some(ctx.cache.current_user().id.get()),
    };

    match data.leveling.award_message(&activity, &settings).await {
        Ok(outcome) => after_award(ctx, data, outcome, message.channel_id).await,
        Err(e) => tracing::warn!(
            user_id = activity.user_id,
            guild_id = guild_id.get(),
            error = %e,
            "Message XP award dropped"
        ),
    }
}

pub async fn on_reaction_add(ctx: &serenity::Context, data: &Data, reaction: &serenity::Reaction) {
    let Some(user_id) = reaction.user_id else {
        return;
    };
    let is_bot = reaction
        .member
        .as_ref()
        .map(|m| m.user.bot)
        .or_else(|| ctx.cache.user(user_id).map(|u| u.bot))
        .unwrap_or(false);

    match data
        .leveling
        .award_reaction(user_id.get(), reaction.guild_id.map(|g| g.get()), is_bot)
        .await
    {
        Ok(outcome) => after_award(ctx, data, outcome, reaction.channel_id).await,
        Err(e) => tracing::warn!(
            user_id = user_id.get(),
            error = %e,
            "Reaction XP award dropped"
        ),
    }
}

async fn after_award(
    ctx: &serenity::Context,
    data: &Data,
    outcome: AwardOutcome,
    channel_id: serenity::ChannelId,
) {
    if let Some(change) = outcome.level_up() {
        handle_level_up(ctx, data, &change, Some(channel_id)).await;
    }
}

/// Snapshot every cached voice channel for a voice scan.
pub fn voice_snapshots(cache: &serenity::Cache) -> Vec<VoiceChannelSnapshot> {
    let mut snapshots = Vec::new();

    for guild_id in cache.guilds() {
        let Some(guild) = cache.guild(guild_id) else {
            continue;
        };
        let afk_channel = guild.afk_metadata.as_ref().map(|afk| afk.afk_channel_id);

        let states = guild.voice_states.values().filter_map(|state| {
            let channel_id = state.channel_id?;
            let is_bot = state
                .member
                .as_ref()
                .map(|m| m.user.bot)
                .or_else(|| guild.members.get(&state.user_id).map(|m| m.user.bot))
                .unwrap_or(false);
            Some((
                channel_id.get(),
                VoiceMember {
                    user_id: state.user_id.get(),
                    is_bot,
                    is_afk: Some(channel_id) == afk_channel,
                    self_deaf: state.self_deaf,
                },
            ))
        });

        snapshots.extend(group_by_channel(guild_id.get(), states));
    }

    snapshots
}

fn group_by_channel(
    guild_id: u64,
    states: impl Iterator<Item = (u64, VoiceMember)>,
) -> Vec<VoiceChannelSnapshot> {
    let mut channels: BTreeMap<u64, Vec<VoiceMember>> = BTreeMap::new();
    for (channel_id, member) in states {
        channels.entry(channel_id).or_default().push(member);
    }

    channels
        .into_iter()
        .map(|(channel_id, members)| VoiceChannelSnapshot {
            guild_id,
            channel_id,
            members,
        })
        .collect()
}

/// Text channels in every cached guild where the bot can post a drop.
pub fn drop_targets(cache: &serenity::Cache) -> Vec<GuildChannels> {
    let bot_id = cache.current_user().id;
    let required = serenity::Permissions::VIEW_CHANNEL | serenity::Permissions::SEND_MESSAGES;

    cache
        .guilds()
        .into_iter()
        .filter_map(|guild_id| {
            let guild = cache.guild(guild_id)?;
            let bot_member = guild.members.get(&bot_id);

            let channel_ids = guild
                .channels
                .values()
                .filter(|c| c.kind == serenity::ChannelType::Text)
                .filter(|c| match bot_member {
                    Some(member) => guild.user_permissions_in(c, member).contains(required),
                    None => true,
                })
                .map(|c| c.id.get())
                .collect();

            Some(GuildChannels {
                guild_id: guild_id.get(),
                channel_ids,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user_id: u64) -> VoiceMember {
        VoiceMember {
            user_id,
            is_bot: false,
            is_afk: false,
            self_deaf: false,
        }
    }

    #[test]
    fn voice_states_are_grouped_per_channel() {
        let states = vec![(20, member(1)), (10, member(2)), (20, member(3))];
        let snapshots = group_by_channel(5, states.into_iter());

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].channel_id, 10);
        assert_eq!(snapshots[1].channel_id, 20);
        let users: Vec<u64> = snapshots[1].members.iter().map(|m| m.user_id).collect();
        assert_eq!(users, vec![1, 3]);
        assert!(snapshots.iter().all(|s| s.guild_id == 5));
    }

    #[test]
    fn no_voice_states_means_no_snapshots() {
        assert!(group_by_channel(5, std::iter::empty()).is_empty());
    }
}
