// Turns raw activity (messages, reactions, voice presence) into XP awards.
//
// The Discord layer converts serenity events into the plain snapshots below,
// so all the gating rules live here and can be tested without a gateway.

use super::cooldowns::CooldownKey;
use super::leveling_models::{LevelChange, XpSource};
use super::leveling_service::{LevelingError, LevelingService, XpStore};
use crate::core::guild_settings::GuildSettings;
use rand::Rng;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct MessageActivity {
    pub user_id: u64,
    /// `None` for direct messages.
    pub guild_id: Option<u64>,
    pub author_is_bot: bool,
    pub content: String,
    /// The bot's own user id. Messages opening with its mention are commands.
    pub bot_user_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Bot,
    NotInGuild,
    EmptyContent,
    Command,
    LevelingDisabled,
    CoolingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardOutcome {
    Skipped(SkipReason),
    Awarded { amount: u64, change: LevelChange },
}

impl AwardOutcome {
    /// The level change, if this award crossed a level threshold.
    pub fn level_up(&self) -> Option<LevelChange> {
        match self {
            AwardOutcome::Awarded { change, .. } if change.leveled_up() => Some(*change),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceMember {
    pub user_id: u64,
    pub is_bot: bool,
    /// Sitting in the guild's AFK channel.
    pub is_afk: bool,
    pub self_deaf: bool,
}

impl VoiceMember {
    fn qualifies(&self) -> bool {
        !self.is_bot && !self.is_afk && !self.self_deaf
    }
}

#[derive(Debug, Clone)]
pub struct VoiceChannelSnapshot {
    pub guild_id: u64,
    pub channel_id: u64,
    pub members: Vec<VoiceMember>,
}

#[derive(Debug, Default)]
pub struct VoiceScanReport {
    pub awarded: usize,
    pub skipped_channels: usize,
    pub cooling_down: usize,
    pub failed: usize,
    pub level_ups: Vec<LevelChange>,
}

/// `<@id>` or `<@!id>` at the very start of the message.
fn starts_with_mention(content: &str, user_id: u64) -> bool {
    let Some(rest) = content.strip_prefix("<@") else {
        return false;
    };
    let rest = rest.strip_prefix('!').unwrap_or(rest);
    rest.strip_prefix(user_id.to_string().as_str())
        .is_some_and(|tail| tail.starts_with('>'))
}

impl<S: XpStore> LevelingService<S> {
    /// Award message XP if the message qualifies.
    pub async fn award_message(
        &self,
        message: &MessageActivity,
        settings: &GuildSettings,
    ) -> Result<AwardOutcome, LevelingError> {
        if message.author_is_bot {
            return Ok(AwardOutcome::Skipped(SkipReason::Bot));
        }
        let Some(guild_id) = message.guild_id else {
            return Ok(AwardOutcome::Skipped(SkipReason::NotInGuild));
        };
        if message.content.trim().is_empty() {
            return Ok(AwardOutcome::Skipped(SkipReason::EmptyContent));
        }
        if !settings.command_prefix.is_empty()
            && message.content.starts_with(settings.command_prefix.as_str())
        {
            return Ok(AwardOutcome::Skipped(SkipReason::Command));
        }
        if message
            .bot_user_id
            .is_some_and(|bot_id| starts_with_mention(&message.content, bot_id))
        {
            return Ok(AwardOutcome::Skipped(SkipReason::Command));
        }
        if !settings.leveling_enabled {
            return Ok(AwardOutcome::Skipped(SkipReason::LevelingDisabled));
        }

        let amount = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.config.message_xp_min..=self.config.message_xp_max)
        };
        let change = self
            .add_xp(message.user_id, guild_id, amount, XpSource::Message)
            .await?;

        Ok(AwardOutcome::Awarded { amount, change })
    }

    /// Award reaction XP unless the reactor is still inside their cooldown.
    pub async fn award_reaction(
        &self,
        user_id: u64,
        guild_id: Option<u64>,
        is_bot: bool,
    ) -> Result<AwardOutcome, LevelingError> {
        if is_bot {
            return Ok(AwardOutcome::Skipped(SkipReason::Bot));
        }
        let Some(guild_id) = guild_id else {
            return Ok(AwardOutcome::Skipped(SkipReason::NotInGuild));
        };

        if !self
            .cooldowns
            .try_start_reaction(CooldownKey::new(user_id, guild_id))
        {
            tracing::debug!(user_id, guild_id, "Reaction XP on cooldown");
            return Ok(AwardOutcome::Skipped(SkipReason::CoolingDown));
        }

        let amount = self.config.reaction_xp;
        let change = self
            .add_xp(user_id, guild_id, amount, XpSource::Reaction)
            .await?;

        Ok(AwardOutcome::Awarded { amount, change })
    }

    /// One pass over every voice channel. Members only earn XP with enough
    /// qualifying company and once per voice cooldown.
    pub async fn run_voice_scan(
        &self,
        channels: &[VoiceChannelSnapshot],
        now: Instant,
    ) -> VoiceScanReport {
        let mut report = VoiceScanReport::default();

        for channel in channels {
            let qualifying: Vec<&VoiceMember> =
                channel.members.iter().filter(|m| m.qualifies()).collect();
            if qualifying.len() < self.config.voice_min_members {
                report.skipped_channels += 1;
                continue;
            }

            for member in qualifying {
                let key = CooldownKey::new(member.user_id, channel.guild_id);
                if !self.cooldowns.try_voice_award(key, now) {
                    report.cooling_down += 1;
                    continue;
                }

                match self
                    .add_xp(
                        member.user_id,
                        channel.guild_id,
                        self.config.voice_xp,
                        XpSource::Voice,
                    )
                    .await
                {
                    Ok(change) => {
                        report.awarded += 1;
                        if change.leveled_up() {
                            report.level_ups.push(change);
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(
                            user_id = member.user_id,
                            guild_id = channel.guild_id,
                            channel_id = channel.channel_id,
                            error = %e,
                            "Voice XP award dropped"
                        );
                    }
                }
            }
        }

        self.cooldowns.prune_voice(now);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::leveling::leveling_service::tests::UnavailableStore;
    use crate::infra::leveling::InMemoryXpStore;
    use std::time::Duration;

    fn service() -> LevelingService<InMemoryXpStore> {
        LevelingService::new(InMemoryXpStore::new())
    }

    fn message(content: &str) -> MessageActivity {
        MessageActivity {
            user_id: 1,
            guild_id: Some(100),
            author_is_bot: false,
            content: content.to_string(),
            bot_user_id: Some(999),
        }
    }

    fn member(user_id: u64) -> VoiceMember {
        VoiceMember {
            user_id,
            is_bot: false,
            is_afk: false,
            self_deaf: false,
        }
    }

    #[tokio::test]
    async fn chatting_awards_between_fifteen_and_twenty_five() {
        let service = service();
        let settings = GuildSettings::new(100);

        for _ in 0..50 {
            match service.award_message(&message("hello there"), &settings).await.unwrap() {
                AwardOutcome::Awarded { amount, .. } => assert!((15..=25).contains(&amount)),
                other => panic!("expected an award, got {other:?}"),
            }
        }

        let log = service.recent_activity(1, 100, 100).await.unwrap();
        assert_eq!(log.len(), 50);
        assert!(log.iter().all(|e| e.source == XpSource::Message));
    }

    #[tokio::test]
    async fn messages_that_do_not_qualify_are_skipped() {
        let service = service();
        let settings = GuildSettings::new(100);

        let mut bot = message("beep");
        bot.author_is_bot = true;
        let mut dm = message("hi");
        dm.guild_id = None;

        let cases = [
            (bot, SkipReason::Bot),
            (dm, SkipReason::NotInGuild),
            (message("   "), SkipReason::EmptyContent),
            (message("!rank"), SkipReason::Command),
        ];
        for (msg, reason) in cases {
            assert_eq!(
                service.award_message(&msg, &settings).await.unwrap(),
                AwardOutcome::Skipped(reason)
            );
        }
        assert!(service.get_progress(1, 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn custom_prefix_and_disabled_guilds_are_respected() {
        let service = service();
        let mut settings = GuildSettings::new(100);
        settings.command_prefix = "?".to_string();

        assert!(matches!(
            service.award_message(&message("!not a command here"), &settings).await.unwrap(),
            AwardOutcome::Awarded { .. }
        ));
        assert_eq!(
            service.award_message(&message("?rank"), &settings).await.unwrap(),
            AwardOutcome::Skipped(SkipReason::Command)
        );

        settings.leveling_enabled = false;
        assert_eq!(
            service.award_message(&message("hello"), &settings).await.unwrap(),
            AwardOutcome::Skipped(SkipReason::LevelingDisabled)
        );
    }

    #[tokio::test]
    async fn commands_invoked_by_mention_are_skipped() {
        let service = service();
        let settings = GuildSettings::new(100);

        for content in ["<@999> rank", "<@!999> leaderboard 2"] {
            assert_eq!(
                service.award_message(&message(content), &settings).await.unwrap(),
                AwardOutcome::Skipped(SkipReason::Command)
            );
        }
        assert!(service.get_progress(1, 100).await.unwrap().is_none());

        // Other mentions, or ours later in the message, are plain chat.
        for content in ["<@9990> hi", "<@123> hello", "thanks <@999>"] {
            assert!(matches!(
                service.award_message(&message(content), &settings).await.unwrap(),
                AwardOutcome::Awarded { .. }
            ));
        }
    }

    #[test]
    fn mention_prefix_matches_both_forms() {
        assert!(starts_with_mention("<@42>", 42));
        assert!(starts_with_mention("<@!42> rank", 42));
        assert!(!starts_with_mention("<@421> rank", 42));
        assert!(!starts_with_mention("<@&42> rank", 42));
        assert!(!starts_with_mention(" <@42> rank", 42));
    }

    #[tokio::test(start_paused = true)]
    async fn reaction_xp_pauses_for_thirty_seconds() {
        let service = service();

        assert_eq!(
            service.award_reaction(1, Some(100), false).await.unwrap(),
            AwardOutcome::Awarded {
                amount: 5,
                change: LevelChange {
                    user_id: 1,
                    guild_id: 100,
                    old_level: 0,
                    new_level: 0,
                    total_xp: 5
                }
            }
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            service.award_reaction(1, Some(100), false).await.unwrap(),
            AwardOutcome::Skipped(SkipReason::CoolingDown)
        );
        assert_eq!(service.get_progress(1, 100).await.unwrap().unwrap().xp, 5);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert!(matches!(
            service.award_reaction(1, Some(100), false).await.unwrap(),
            AwardOutcome::Awarded { amount: 5, .. }
        ));
        assert_eq!(service.get_progress(1, 100).await.unwrap().unwrap().xp, 10);
    }

    #[tokio::test]
    async fn bots_and_direct_messages_never_earn_reaction_xp() {
        let service = service();
        assert_eq!(
            service.award_reaction(1, Some(100), true).await.unwrap(),
            AwardOutcome::Skipped(SkipReason::Bot)
        );
        assert_eq!(
            service.award_reaction(1, None, false).await.unwrap(),
            AwardOutcome::Skipped(SkipReason::NotInGuild)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn voice_scan_needs_two_qualifying_members() {
        let service = service();
        let mut afk = member(3);
        afk.is_afk = true;
        let mut deaf = member(4);
        deaf.self_deaf = true;
        let mut bot = member(5);
        bot.is_bot = true;

        let channels = vec![
            VoiceChannelSnapshot {
                guild_id: 100,
                channel_id: 1,
                members: vec![member(1), afk, deaf, bot],
            },
            VoiceChannelSnapshot {
                guild_id: 100,
                channel_id: 2,
                members: vec![member(6), member(7)],
            },
        ];

        let report = service.run_voice_scan(&channels, Instant::now()).await;
        assert_eq!(report.awarded, 2);
        assert_eq!(report.skipped_channels, 1);
        assert!(service.get_progress(1, 100).await.unwrap().is_none());
        assert_eq!(service.get_progress(6, 100).await.unwrap().unwrap().xp, 10);
        assert_eq!(service.get_progress(7, 100).await.unwrap().unwrap().xp, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn voice_scan_respects_the_cooldown() {
        let service = service();
        let channels = vec![VoiceChannelSnapshot {
            guild_id: 100,
            channel_id: 1,
            members: vec![member(1), member(2)],
        }];
        let start = Instant::now();

        assert_eq!(service.run_voice_scan(&channels, start).await.awarded, 2);
        let again = service
            .run_voice_scan(&channels, start + Duration::from_secs(30))
            .await;
        assert_eq!(again.awarded, 0);
        assert_eq!(again.cooling_down, 2);

        let later = service
            .run_voice_scan(&channels, start + Duration::from_secs(300))
            .await;
        assert_eq!(later.awarded, 2);
        assert_eq!(service.get_progress(1, 100).await.unwrap().unwrap().xp, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn voice_scan_keeps_going_when_the_store_fails() {
        let service = LevelingService::new(UnavailableStore);
        let channels = vec![VoiceChannelSnapshot {
            guild_id: 100,
            channel_id: 1,
            members: vec![member(1), member(2)],
        }];

        let report = service.run_voice_scan(&channels, Instant::now()).await;
        assert_eq!(report.failed, 2);
        assert_eq!(report.awarded, 0);
    }

    #[tokio::test]
    async fn failed_message_award_is_reported() {
        let service = LevelingService::new(UnavailableStore);
        let err = service
            .award_message(&message("hello"), &GuildSettings::new(100))
            .await
            .unwrap_err();
        assert!(matches!(err, LevelingError::StoreUnavailable(_)));
    }
}
