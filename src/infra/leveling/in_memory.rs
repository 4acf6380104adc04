// This is the infra layer - it implements the traits defined in core.
// This file provides an IN-MEMORY implementation of XpStore.
//
// Used by the tests and handy for running the bot without a database.
// Everything is lost on restart.

use crate::core::leveling::level_curve::level_from_xp;
use crate::core::leveling::{
    ActivityLogEntry, LevelChange, LevelingError, RoleReward, UserProgress, XpStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A composite key for looking up user XP.
/// We need both user_id AND guild_id since users can be in multiple guilds.
#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
struct UserGuildKey {
    user_id: u64,
    guild_id: u64,
}

#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
struct RewardKey {
    guild_id: u64,
    role_id: u64,
}

/// Data we store for each user in each guild.
#[derive(Clone, Debug)]
struct StoredProgress {
    xp: u64,
    level: u32,
    last_update: DateTime<Utc>,
    /// Creation order, used to break leaderboard ties.
    seq: u64,
    history: Vec<ActivityLogEntry>,
}

/// In-memory implementation of XpStore.
///
/// `add_xp` does its whole read-modify-write while holding the DashMap entry
/// for the key, so concurrent awards to one member serialize and awards to
/// different members don't wait on each other.
#[derive(Default)]
pub struct InMemoryXpStore {
    data: DashMap<UserGuildKey, StoredProgress>,
    next_seq: AtomicU64,
    rewards: DashMap<RewardKey, u32>,
}

impl InMemoryXpStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn progress_of(key: &UserGuildKey, stored: &StoredProgress) -> UserProgress {
        UserProgress {
            user_id: key.user_id,
            guild_id: key.guild_id,
            xp: stored.xp,
            level: stored.level,
            last_update: stored.last_update,
        }
    }
}

#[async_trait]
impl XpStore for InMemoryXpStore {
    async fn add_xp(&self, entry: &ActivityLogEntry) -> Result<LevelChange, LevelingError> {
        let key = UserGuildKey {
            user_id: entry.user_id,
            guild_id: entry.guild_id,
        };

        let mut record = self.data.entry(key).or_insert_with(|| StoredProgress {
            xp: 0,
            level: 0,
            last_update: entry.timestamp,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            history: Vec::new(),
        });

        let old_level = record.level;
        record.xp = record.xp.saturating_add(entry.amount);
        record.level = level_from_xp(record.xp);
        record.last_update = entry.timestamp;
        record.history.push(entry.clone());

        Ok(LevelChange {
            user_id: entry.user_id,
            guild_id: entry.guild_id,
            old_level,
            new_level: record.level,
            total_xp: record.xp,
        })
    }

    async fn get_progress(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<UserProgress>, LevelingError> {
        let key = UserGuildKey { user_id, guild_id };
        Ok(self
            .data
            .get(&key)
            .map(|stored| Self::progress_of(&key, &stored)))
    }

    async fn count_with_more_xp(&self, guild_id: u64, xp: u64) -> Result<u64, LevelingError> {
        Ok(self
            .data
            .iter()
            .filter(|e| e.key().guild_id == guild_id && e.value().xp > xp)
            .count() as u64)
    }

    async fn count_members(&self, guild_id: u64) -> Result<u64, LevelingError> {
        Ok(self
            .data
            .iter()
            .filter(|e| e.key().guild_id == guild_id)
            .count() as u64)
    }

    async fn leaderboard_slice(
        &self,
        guild_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<UserProgress>, LevelingError> {
        let mut rows: Vec<(u64, UserProgress)> = self
            .data
            .iter()
            .filter(|e| e.key().guild_id == guild_id)
            .map(|e| (e.value().seq, Self::progress_of(e.key(), e.value())))
            .collect();

        // XP descending, then oldest record first.
        rows.sort_by(|(seq_a, a), (seq_b, b)| b.xp.cmp(&a.xp).then(seq_a.cmp(seq_b)));

        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(_, progress)| progress)
            .collect())
    }

    async fn add_role_reward(&self, reward: &RoleReward) -> Result<bool, LevelingError> {
        let key = RewardKey {
            guild_id: reward.guild_id,
            role_id: reward.role_id,
        };
        match self.rewards.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(reward.level_requirement);
                Ok(true)
            }
        }
    }

    async fn remove_role_reward(
        &self,
        guild_id: u64,
        role_id: u64,
    ) -> Result<bool, LevelingError> {
        Ok(self
            .rewards
            .remove(&RewardKey { guild_id, role_id })
            .is_some())
    }

    async fn list_role_rewards(&self, guild_id: u64) -> Result<Vec<RoleReward>, LevelingError> {
        let mut rewards: Vec<RoleReward> = self
            .rewards
            .iter()
            .filter(|e| e.key().guild_id == guild_id)
            .map(|e| RoleReward {
                guild_id,
                role_id: e.key().role_id,
                level_requirement: *e.value(),
            })
            .collect();
        rewards.sort_by_key(|r| (r.level_requirement, r.role_id));
        Ok(rewards)
    }

    async fn rewards_up_to(
        &self,
        guild_id: u64,
        level: u32,
    ) -> Result<Vec<RoleReward>, LevelingError> {
        let mut rewards = self.list_role_rewards(guild_id).await?;
        rewards.retain(|r| r.level_requirement <= level);
        rewards.reverse();
        Ok(rewards)
    }

    async fn recent_activity(
        &self,
        user_id: u64,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, LevelingError> {
        let key = UserGuildKey { user_id, guild_id };
        Ok(self
            .data
            .get(&key)
            .map(|stored| stored.history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
