// Role rewards: after a level-up, grant every reward role the member now
// qualifies for. One failed grant never stops the others.

use super::leveling_models::{LevelChange, RoleReward};
use super::leveling_service::{LevelingError, LevelingService, XpStore};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    AlreadyHeld,
}

/// Adds roles to members on the chat platform.
#[async_trait]
pub trait RoleGranter: Send + Sync {
    async fn grant_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<GrantOutcome, LevelingError>;
}

#[derive(Debug, Default)]
pub struct RewardReport {
    /// Every reward unlocked at the new level, highest requirement first.
    pub rewards: Vec<RoleReward>,
    pub granted: Vec<u64>,
    pub already_held: Vec<u64>,
    pub failed: Vec<LevelingError>,
}

impl<S: XpStore> LevelingService<S> {
    pub async fn dispatch_rewards(
        &self,
        change: &LevelChange,
        granter: &impl RoleGranter,
    ) -> Result<RewardReport, LevelingError> {
        let rewards = self
            .resolve_rewards(change.guild_id, change.new_level)
            .await?;
        let reason = format!("Level {} reward", change.new_level);

        let mut report = RewardReport::default();
        for reward in &rewards {
            match granter
                .grant_role(change.guild_id, change.user_id, reward.role_id, &reason)
                .await
            {
                Ok(GrantOutcome::Granted) => {
                    tracing::info!(
                        user_id = change.user_id,
                        guild_id = change.guild_id,
                        role_id = reward.role_id,
                        "Granted level reward role"
                    );
                    report.granted.push(reward.role_id);
                }
                Ok(GrantOutcome::AlreadyHeld) => report.already_held.push(reward.role_id),
                Err(e) => {
                    let failure = match e {
                        LevelingError::GrantFailed { .. } => e,
                        other => LevelingError::GrantFailed {
                            role_id: reward.role_id,
                            reason: other.to_string(),
                        },
                    };
                    tracing::warn!(
                        user_id = change.user_id,
                        guild_id = change.guild_id,
                        role_id = reward.role_id,
                        error = %failure,
                        "Failed to grant level reward role"
                    );
                    report.failed.push(failure);
                }
            }
        }

        report.rewards = rewards;
        Ok(report)
    }
}
