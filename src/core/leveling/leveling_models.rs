// Leveling domain models.
//
// Plain data with primitive ids (u64 user/guild/channel/role ids) so nothing
// here depends on serenity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a chunk of XP came from. Stored in the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XpSource {
    Message,
    Reaction,
    Voice,
    Drop,
}

impl XpSource {
    pub const ALL: [XpSource; 4] = [
        XpSource::Message,
        XpSource::Reaction,
        XpSource::Voice,
        XpSource::Drop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            XpSource::Message => "message",
            XpSource::Reaction => "reaction",
            XpSource::Voice => "voice",
            XpSource::Drop => "drop",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for XpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's XP record in one guild.
///
/// `level` is cached next to `xp` and always equals `level_from_xp(xp)`.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProgress {
    pub user_id: u64,
    pub guild_id: u64,
    pub xp: u64,
    pub level: u32,
    pub last_update: DateTime<Utc>,
}

/// One line of the append-only XP audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub user_id: u64,
    pub guild_id: u64,
    pub amount: u64,
    pub source: XpSource,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a single ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub user_id: u64,
    pub guild_id: u64,
    pub old_level: u32,
    pub new_level: u32,
    pub total_xp: u64,
}

impl LevelChange {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }
}

/// A role granted automatically once a member reaches `level_requirement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleReward {
    pub guild_id: u64,
    pub role_id: u64,
    pub level_requirement: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankInfo {
    pub user_id: u64,
    pub guild_id: u64,
    pub xp: u64,
    pub level: u32,
    /// 1 + number of members in the guild with strictly more XP.
    pub rank: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    /// Absolute 1-based position across all pages.
    pub position: u64,
    pub progress: UserProgress,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardPage {
    pub page: u64,
    pub total_pages: u64,
    pub total_entries: u64,
    pub entries: Vec<LeaderboardEntry>,
}

/// A claimable XP drop that has been announced in a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveDrop {
    pub drop_id: String,
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub xp_amount: u64,
    pub expires_at: DateTime<Utc>,
}

impl ActiveDrop {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
