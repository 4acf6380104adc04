// XP drops: short-lived claim prompts posted at random into active channels.
//
// The registry is the only shared state. A drop leaves `active` exactly once,
// through `DashMap::remove_if`, so the first claimant to get there wins and
// every later caller sees it gone. Removed ids move to `retired` and are never
// handed out again for the lifetime of the process.

use super::leveling_models::{ActiveDrop, LevelChange, XpSource};
use super::leveling_service::{LevelingError, LevelingService, XpStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use rand::seq::SliceRandom;
use rand::Rng;

const DROP_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

// ============================================================================
// MESSAGING PORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    Claimed { user_id: u64 },
    Expired,
}

/// Posts and updates drop prompts on the chat platform.
#[async_trait]
pub trait DropAnnouncer: Send + Sync {
    /// Post the claim prompt and return the id of the posted message.
    async fn announce(
        &self,
        guild_id: u64,
        channel_id: u64,
        drop_id: &str,
        xp_amount: u64,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, LevelingError>;

    /// Update a prompt once its drop is gone.
    async fn retire(&self, drop: &ActiveDrop, outcome: DropOutcome) -> Result<(), LevelingError>;
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retirement {
    Claimed,
    Expired,
}

#[derive(Default)]
pub struct DropRegistry {
    active: DashMap<String, ActiveDrop>,
    /// Grows by one entry per finished drop, roughly 0.3 per guild every
    /// 30 to 60 minutes at the default spawn settings.
    retired: DashMap<String, Retirement>,
    /// Ids handed out but not yet registered (announcement in flight).
    reserved: DashSet<String>,
}

impl DropRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn get(&self, drop_id: &str) -> Option<ActiveDrop> {
        self.active.get(drop_id).map(|d| d.value().clone())
    }

    pub fn retirement(&self, drop_id: &str) -> Option<Retirement> {
        self.retired.get(drop_id).map(|r| *r.value())
    }

    pub fn id_in_use(&self, drop_id: &str) -> bool {
        self.active.contains_key(drop_id)
            || self.retired.contains_key(drop_id)
            || self.reserved.contains(drop_id)
    }

    /// Hand out a fresh id that no active, retired or reserved drop uses.
    pub fn reserve_id(&self, rng: &mut impl Rng, len: usize) -> String {
        loop {
            let candidate = generate_drop_id(rng, len);
            if !self.id_in_use(&candidate) && self.reserved.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    pub fn release(&self, drop_id: &str) {
        self.reserved.remove(drop_id);
    }

    /// Make a drop claimable. Returns false if the id is already active or retired.
    pub fn register(&self, drop: ActiveDrop) -> bool {
        if self.retired.contains_key(&drop.drop_id) {
            return false;
        }
        let drop_id = drop.drop_id.clone();
        let inserted = match self.active.entry(drop_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(drop);
                true
            }
        };
        self.reserved.remove(&drop_id);
        inserted
    }

    /// Atomically remove the drop for a claimant in `guild_id`.
    ///
    /// Only one caller can ever get `Ok` for an id. An expired drop is still
    /// removed, and reported as `Expired` with the drop attached for cleanup.
    fn take(
        &self,
        drop_id: &str,
        guild_id: u64,
        now: DateTime<Utc>,
    ) -> Result<ActiveDrop, (LevelingError, Option<ActiveDrop>)> {
        match self.active.remove_if(drop_id, |_, d| d.guild_id == guild_id) {
            Some((id, drop)) => {
                if drop.is_expired(now) {
                    self.retired.insert(id, Retirement::Expired);
                    Err((LevelingError::Expired, Some(drop)))
                } else {
                    self.retired.insert(id, Retirement::Claimed);
                    Ok(drop)
                }
            }
            // Either unknown, gone, or belongs to another guild; the latter
            // stays active.
            None => match self.retirement(drop_id) {
                Some(Retirement::Claimed) => Err((LevelingError::AlreadyClaimed, None)),
                _ => Err((LevelingError::NotFound, None)),
            },
        }
    }

    /// Remove every drop that is expired at `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<ActiveDrop> {
        let expired: Vec<String> = self
            .active
            .iter()
            .filter(|d| d.is_expired(now))
            .map(|d| d.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            // A claim may have raced us to it.
            if let Some((id, drop)) = self.active.remove_if(&id, |_, d| d.is_expired(now)) {
                self.retired.insert(id, Retirement::Expired);
                removed.push(drop);
            }
        }
        removed
    }
}

pub fn generate_drop_id(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| DROP_ID_ALPHABET[rng.gen_range(0..DROP_ID_ALPHABET.len())] as char)
        .collect()
}

/// Trim and upper-case a user-typed drop id. `None` if it can't be a drop id.
pub fn normalize_drop_id(raw: &str, len: usize) -> Option<String> {
    let id = raw.trim().to_ascii_uppercase();
    (id.len() == len && id.bytes().all(|b| DROP_ID_ALPHABET.contains(&b))).then_some(id)
}

// ============================================================================
// SERVICE OPERATIONS
// ============================================================================

/// Text channels a drop may be posted into, per guild.
#[derive(Debug, Clone)]
pub struct GuildChannels {
    pub guild_id: u64,
    pub channel_ids: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct ClaimResult {
    pub drop: ActiveDrop,
    pub change: LevelChange,
}

impl ClaimResult {
    pub fn amount(&self) -> u64 {
        self.drop.xp_amount
    }
}

impl<S: XpStore> LevelingService<S> {
    /// One spawn tick. Each guild independently rolls for a drop; a drop is
    /// registered only once its prompt has been posted.
    pub async fn spawn_drops<R: Rng + Send>(
        &self,
        guilds: &[GuildChannels],
        announcer: &impl DropAnnouncer,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Vec<ActiveDrop> {
        let mut spawned = Vec::new();

        for guild in guilds {
            if !rng.gen_bool(self.config.drop_spawn_chance) {
                continue;
            }
            let Some(&channel_id) = guild.channel_ids.choose(rng) else {
                continue;
            };

            let drop_id = self.drops.reserve_id(rng, self.config.drop_id_length);
            let xp_amount = rng.gen_range(self.config.drop_xp_min..=self.config.drop_xp_max);
            let expires_at = now + self.config.drop_lifetime();

            let message_id = match announcer
                .announce(guild.guild_id, channel_id, &drop_id, xp_amount, expires_at)
                .await
            {
                Ok(message_id) => message_id,
                Err(e) => {
                    tracing::warn!(
                        guild_id = guild.guild_id,
                        channel_id,
                        drop_id = %drop_id,
                        error = %e,
                        "Failed to post XP drop, skipping guild this cycle"
                    );
                    self.drops.release(&drop_id);
                    continue;
                }
            };

            let drop = ActiveDrop {
                drop_id,
                guild_id: guild.guild_id,
                channel_id,
                message_id,
                xp_amount,
                expires_at,
            };
            if self.drops.register(drop.clone()) {
                tracing::info!(
                    guild_id = drop.guild_id,
                    channel_id,
                    drop_id = %drop.drop_id,
                    xp_amount,
                    "XP drop spawned"
                );
                spawned.push(drop);
            }
        }

        spawned
    }

    /// Claim a drop for `user_id`. The first valid claim wins; the prompt is
    /// then updated, and a failed update is only logged.
    pub async fn claim_drop(
        &self,
        drop_id: &str,
        user_id: u64,
        guild_id: u64,
        announcer: &impl DropAnnouncer,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult, LevelingError> {
        if user_id == 0 || guild_id == 0 {
            return Err(LevelingError::InvalidId);
        }

        let drop = match self.drops.take(drop_id, guild_id, now) {
            Ok(drop) => drop,
            Err((err, expired)) => {
                if let Some(drop) = expired {
                    retire_prompt(announcer, &drop, DropOutcome::Expired).await;
                }
                return Err(err);
            }
        };

        let change = self
            .add_xp(user_id, guild_id, drop.xp_amount, XpSource::Drop)
            .await
            .map_err(|e| {
                tracing::warn!(user_id, guild_id, drop_id, error = %e, "Drop claimed but XP was not saved");
                e
            })?;

        tracing::info!(
            user_id,
            guild_id,
            drop_id,
            xp_amount = drop.xp_amount,
            "XP drop claimed"
        );
        retire_prompt(announcer, &drop, DropOutcome::Claimed { user_id }).await;

        Ok(ClaimResult { drop, change })
    }

    /// Remove expired drops and mark their prompts. Returns how many went.
    pub async fn sweep_expired_drops(
        &self,
        announcer: &impl DropAnnouncer,
        now: DateTime<Utc>,
    ) -> usize {
        let expired = self.drops.sweep(now);
        for drop in &expired {
            tracing::debug!(drop_id = %drop.drop_id, guild_id = drop.guild_id, "XP drop expired");
            retire_prompt(announcer, drop, DropOutcome::Expired).await;
        }
        expired.len()
    }
}

async fn retire_prompt(announcer: &impl DropAnnouncer, drop: &ActiveDrop, outcome: DropOutcome) {
    if let Err(e) = announcer.retire(drop, outcome).await {
        tracing::warn!(
            drop_id = %drop.drop_id,
            channel_id = drop.channel_id,
            error = %e,
            "Failed to update drop message"
        );
    }
}
