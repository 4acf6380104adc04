// This is the leveling module - it contains ALL the business logic for the leveling system.
// Notice how this module has NO Discord-specific code (no serenity, no poise imports).
// It works with primitive types (u64, String) so it could be driven from any frontend.
//
// The service is split over a few files that each add an `impl` block:
// - leveling_service.rs: XP ledger, rank queries, role reward lookup
// - activity_ingest.rs: message / reaction / voice awards
// - drops.rs: drop spawning and claiming

use super::cooldowns::CooldownTracker;
use super::drops::DropRegistry;
use super::leveling_config::LevelingConfig;
use super::leveling_models::{
    ActivityLogEntry, LeaderboardEntry, LeaderboardPage, LevelChange, RankInfo, RoleReward,
    UserProgress, XpSource,
};
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LevelingError {
    #[error("Not found")]
    NotFound,

    #[error("That drop has expired")]
    Expired,

    #[error("That drop has already been claimed")]
    AlreadyClaimed,

    #[error("Page {page} is out of range ({total_pages} pages available)")]
    OutOfRange { page: u64, total_pages: u64 },

    #[error("Storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Chat platform error: {0}")]
    Platform(String),

    #[error("Could not grant role {role_id}: {reason}")]
    GrantFailed { role_id: u64, reason: String },

    #[error("XP awards must be positive")]
    InvalidAmount,

    #[error("Invalid user or guild ID")]
    InvalidId,
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Durable storage for XP records, the activity log and role rewards.
#[async_trait]
pub trait XpStore: Send + Sync {
    /// Add `entry.amount` XP to the entry's (user, guild) record, creating the
    /// record at 0 XP if needed, recompute the cached level and append `entry`
    /// to the activity log, all in one transaction.
    ///
    /// Concurrent calls for the same key must serialize; calls for different
    /// keys must not wait on each other's read-modify-write.
    async fn add_xp(&self, entry: &ActivityLogEntry) -> Result<LevelChange, LevelingError>;

    async fn get_progress(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<UserProgress>, LevelingError>;

    /// Members of `guild_id` with strictly more than `xp`.
    async fn count_with_more_xp(&self, guild_id: u64, xp: u64) -> Result<u64, LevelingError>;

    /// Members of `guild_id` with an XP record.
    async fn count_members(&self, guild_id: u64) -> Result<u64, LevelingError>;

    /// XP-descending slice of a guild's records; ties keep insertion order.
    async fn leaderboard_slice(
        &self,
        guild_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<UserProgress>, LevelingError>;

    /// Returns false if the role is already a reward in this guild.
    async fn add_role_reward(&self, reward: &RoleReward) -> Result<bool, LevelingError>;

    /// Returns false if there was nothing to remove.
    async fn remove_role_reward(&self, guild_id: u64, role_id: u64)
        -> Result<bool, LevelingError>;

    /// All rewards of a guild, lowest level first.
    async fn list_role_rewards(&self, guild_id: u64) -> Result<Vec<RoleReward>, LevelingError>;

    /// Rewards with `level_requirement <= level`, highest requirement first.
    async fn rewards_up_to(
        &self,
        guild_id: u64,
        level: u32,
    ) -> Result<Vec<RoleReward>, LevelingError>;

    /// Most recent activity log entries for a member, newest first.
    async fn recent_activity(
        &self,
        user_id: u64,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, LevelingError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// The leveling engine.
///
/// Owns the shared in-memory state (cooldowns, active drops) alongside the
/// store, so that state lives exactly as long as the service does.
pub struct LevelingService<S: XpStore> {
    pub(super) store: S,
    pub(super) config: LevelingConfig,
    pub(super) cooldowns: CooldownTracker,
    pub(super) drops: DropRegistry,
}

impl<S: XpStore> LevelingService<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, LevelingConfig::default())
    }

    pub fn with_config(store: S, config: LevelingConfig) -> Self {
        Self {
            cooldowns: CooldownTracker::new(config.reaction_cooldown(), config.voice_cooldown()),
            drops: DropRegistry::new(),
            store,
            config,
        }
    }

    pub fn config(&self) -> &LevelingConfig {
        &self.config
    }

    pub fn drops(&self) -> &DropRegistry {
        &self.drops
    }

    fn validate_ids(user_id: u64, guild_id: u64) -> Result<(), LevelingError> {
        if user_id == 0 || guild_id == 0 {
            Err(LevelingError::InvalidId)
        } else {
            Ok(())
        }
    }

    fn validate_guild_id(guild_id: u64) -> Result<(), LevelingError> {
        if guild_id == 0 {
            Err(LevelingError::InvalidId)
        } else {
            Ok(())
        }
    }

    /// Add XP to a member and report the level transition.
    ///
    /// A store failure loses the award; callers log it and move on.
    pub async fn add_xp(
        &self,
        user_id: u64,
        guild_id: u64,
        amount: u64,
        source: XpSource,
    ) -> Result<LevelChange, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;
        if amount == 0 {
            return Err(LevelingError::InvalidAmount);
        }

        let entry = ActivityLogEntry {
            user_id,
            guild_id,
            amount,
            source,
            timestamp: Utc::now(),
        };
        let change = self.store.add_xp(&entry).await?;

        if change.leveled_up() {
            tracing::info!(
                user_id,
                guild_id,
                old_level = change.old_level,
                new_level = change.new_level,
                total_xp = change.total_xp,
                %source,
                "User leveled up"
            );
        }

        Ok(change)
    }

    pub async fn get_progress(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<UserProgress>, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;
        self.store.get_progress(user_id, guild_id).await
    }

    /// Rank of a member: 1 + members with strictly more XP. Ties share a rank.
    pub async fn get_rank(&self, user_id: u64, guild_id: u64) -> Result<RankInfo, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;

        let progress = self
            .store
            .get_progress(user_id, guild_id)
            .await?
            .ok_or(LevelingError::NotFound)?;
        let ahead = self
            .store
            .count_with_more_xp(guild_id, progress.xp)
            .await?;

        Ok(RankInfo {
            user_id,
            guild_id,
            xp: progress.xp,
            level: progress.level,
            rank: ahead + 1,
        })
    }

    /// One page of the guild leaderboard (1-based).
    ///
    /// Pages outside `1..=total_pages` are reported as `OutOfRange`, including
    /// page 1 of a guild where nobody has XP yet.
    pub async fn get_leaderboard(
        &self,
        guild_id: u64,
        page: u64,
    ) -> Result<LeaderboardPage, LevelingError> {
        Self::validate_guild_id(guild_id)?;

        let page_size = self.config.leaderboard_page_size.max(1);
        let total_entries = self.store.count_members(guild_id).await?;
        let total_pages = total_entries.div_ceil(page_size);

        if page == 0 || page > total_pages {
            return Err(LevelingError::OutOfRange { page, total_pages });
        }

        let offset = (page - 1) * page_size;
        let rows = self
            .store
            .leaderboard_slice(guild_id, offset, page_size)
            .await?;

        let entries = rows
            .into_iter()
            .enumerate()
            .map(|(index, progress)| LeaderboardEntry {
                position: offset + index as u64 + 1,
                progress,
            })
            .collect();

        Ok(LeaderboardPage {
            page,
            total_pages,
            total_entries,
            entries,
        })
    }

    /// Every role reward unlocked at `level`, highest requirement first.
    pub async fn resolve_rewards(
        &self,
        guild_id: u64,
        level: u32,
    ) -> Result<Vec<RoleReward>, LevelingError> {
        Self::validate_guild_id(guild_id)?;
        self.store.rewards_up_to(guild_id, level).await
    }

    pub async fn add_role_reward(
        &self,
        guild_id: u64,
        role_id: u64,
        level_requirement: u32,
    ) -> Result<bool, LevelingError> {
        Self::validate_ids(role_id, guild_id)?;
        self.store
            .add_role_reward(&RoleReward {
                guild_id,
                role_id,
                level_requirement,
            })
            .await
    }

    pub async fn remove_role_reward(
        &self,
        guild_id: u64,
        role_id: u64,
    ) -> Result<bool, LevelingError> {
        Self::validate_ids(role_id, guild_id)?;
        self.store.remove_role_reward(guild_id, role_id).await
    }

    pub async fn list_role_rewards(&self, guild_id: u64) -> Result<Vec<RoleReward>, LevelingError> {
        Self::validate_guild_id(guild_id)?;
        self.store.list_role_rewards(guild_id).await
    }

    pub async fn recent_activity(
        &self,
        user_id: u64,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;
        self.store.recent_activity(user_id, guild_id, limit).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
