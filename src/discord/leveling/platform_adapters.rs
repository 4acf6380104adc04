// Serenity-backed implementations of the leveling ports.

use crate::core::leveling::{
    ActiveDrop, DropAnnouncer, DropOutcome, GrantOutcome, LevelingError, RoleGranter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use std::sync::Arc;

fn platform_error(e: serenity::Error) -> LevelingError {
    LevelingError::Platform(e.to_string())
}

/// Posts drop prompts as embeds and edits them once the drop is gone.
pub struct SerenityDropAnnouncer {
    http: Arc<serenity::Http>,
}

impl SerenityDropAnnouncer {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

fn drop_embed(drop_id: &str, xp_amount: u64, expires_at: DateTime<Utc>) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title("📦 XP Drop!")
        .description(format!(
            "A mysterious package has appeared!\nBe the first to use `catch {drop_id}` to claim it!"
        ))
        .color(0x3498db)
        .field("Reward", format!("{xp_amount} XP"), true)
        .field("Expires", format!("<t:{}:R>", expires_at.timestamp()), true)
}

fn retired_embed(drop: &ActiveDrop, outcome: DropOutcome) -> serenity::CreateEmbed {
    let description = match outcome {
        DropOutcome::Claimed { user_id } => {
            format!("<@{user_id}> caught this drop and earned {} XP!", drop.xp_amount)
        }
        DropOutcome::Expired => "Nobody caught this one in time. It has expired.".to_string(),
    };

    serenity::CreateEmbed::new()
        .title("📦 XP Drop")
        .description(description)
        .color(0x95a5a6)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Drop {}",
            drop.drop_id
        )))
}

#[async_trait]
impl DropAnnouncer for SerenityDropAnnouncer {
    async fn announce(
        &self,
        _guild_id: u64,
        channel_id: u64,
        drop_id: &str,
        xp_amount: u64,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, LevelingError> {
        let message = serenity::ChannelId::new(channel_id)
            .send_message(
                &self.http,
                serenity::CreateMessage::new().embed(drop_embed(drop_id, xp_amount, expires_at)),
            )
            .await
            .map_err(platform_error)?;

        Ok(message.id.get())
    }

    async fn retire(&self, drop: &ActiveDrop, outcome: DropOutcome) -> Result<(), LevelingError> {
        serenity::ChannelId::new(drop.channel_id)
            .edit_message(
                &self.http,
                serenity::MessageId::new(drop.message_id),
                serenity::EditMessage::new().embed(retired_embed(drop, outcome)),
            )
            .await
            .map_err(platform_error)?;

        Ok(())
    }
}

/// Grants reward roles, checking the cache (then the API) for roles the
/// member already holds.
pub struct SerenityRoleGranter {
    http: Arc<serenity::Http>,
    cache: Arc<serenity::Cache>,
}

impl SerenityRoleGranter {
    pub fn new(http: Arc<serenity::Http>, cache: Arc<serenity::Cache>) -> Self {
        Self { http, cache }
    }

    fn cached_roles(
        &self,
        guild_id: serenity::GuildId,
        user_id: serenity::UserId,
    ) -> Option<Vec<serenity::RoleId>> {
        self.cache
            .guild(guild_id)
            .and_then(|guild| guild.members.get(&user_id).map(|m| m.roles.clone()))
    }
}

#[async_trait]
impl RoleGranter for SerenityRoleGranter {
    async fn grant_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<GrantOutcome, LevelingError> {
        let guild_id = serenity::GuildId::new(guild_id);
        let user_id = serenity::UserId::new(user_id);
        let role_id = serenity::RoleId::new(role_id);

        let roles = match self.cached_roles(guild_id, user_id) {
            Some(roles) => roles,
            None => {
                self.http
                    .get_member(guild_id, user_id)
                    .await
                    .map_err(|e| LevelingError::GrantFailed {
                        role_id: role_id.get(),
                        reason: e.to_string(),
                    })?
                    .roles
            }
        };
        if roles.contains(&role_id) {
            return Ok(GrantOutcome::AlreadyHeld);
        }

        self.http
            .add_member_role(guild_id, user_id, role_id, Some(reason))
            .await
            .map_err(|e| LevelingError::GrantFailed {
                role_id: role_id.get(),
                reason: e.to_string(),
            })?;

        Ok(GrantOutcome::Granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retired_embed_names_the_winner() {
        let drop = ActiveDrop {
            drop_id: "AB12CD34".into(),
            guild_id: 1,
            channel_id: 2,
            message_id: 3,
            xp_amount: 420,
            expires_at: Utc::now(),
        };
        let json = serde_json::to_string(&retired_embed(&drop, DropOutcome::Claimed { user_id: 99 }))
            .unwrap();
        assert!(json.contains("<@99> caught this drop and earned 420 XP!"));

        let json = serde_json::to_string(&retired_embed(&drop, DropOutcome::Expired)).unwrap();
        assert!(json.contains("expired"));
    }

    #[test]
    fn drop_embed_shows_code_and_reward() {
        let json = serde_json::to_string(&drop_embed("ZZ99ZZ99", 250, Utc::now())).unwrap();
        assert!(json.contains("catch ZZ99ZZ99"));
        assert!(json.contains("250 XP"));
    }
}
