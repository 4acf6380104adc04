// In-memory cooldowns for low-effort XP sources.
//
// These are a soft anti-spam measure: process-local, never persisted, and
// reset on restart. Both maps are DashMaps so every event task can touch
// them without a global lock; the check-and-set for one key happens under
// that key's shard lock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
pub struct CooldownKey {
    pub user_id: u64,
    pub guild_id: u64,
}

impl CooldownKey {
    pub fn new(user_id: u64, guild_id: u64) -> Self {
        Self { user_id, guild_id }
    }
}

pub struct CooldownTracker {
    reaction_window: Duration,
    voice_window: Duration,
    /// Keys currently suppressed for reaction XP -> when the window opened.
    reactions: Arc<DashMap<CooldownKey, Instant>>,
    /// Last voice award per key.
    voice: DashMap<CooldownKey, Instant>,
}

impl CooldownTracker {
    pub fn new(reaction_window: Duration, voice_window: Duration) -> Self {
        Self {
            reaction_window,
            voice_window,
            reactions: Arc::new(DashMap::new()),
            voice: DashMap::new(),
        }
    }

    /// Open a reaction window for `key` unless one is already running.
    ///
    /// Returns `true` when the caller may award reaction XP. A removal task
    /// clears the key once the window has passed; the elapsed-time check
    /// below covers the gap if that task hasn't run yet.
    pub fn try_start_reaction(&self, key: CooldownKey) -> bool {
        let now = Instant::now();
        match self.reactions.entry(key) {
            Entry::Occupied(mut opened) => {
                if now.saturating_duration_since(*opened.get()) < self.reaction_window {
                    return false;
                }
                opened.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        let started = now;

        let reactions = Arc::clone(&self.reactions);
        let window = self.reaction_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            // Only clear the window we opened; a newer one keeps running.
            reactions.remove_if(&key, |_, opened| *opened == started);
        });

        true
    }

    #[cfg(test)]
    pub fn reaction_cooling_down(&self, key: CooldownKey) -> bool {
        self.reactions
            .get(&key)
            .map(|opened| opened.elapsed() < self.reaction_window)
            .unwrap_or(false)
    }

    /// Record a voice award for `key` at `now` if the last one is at least
    /// one voice window old.
    pub fn try_voice_award(&self, key: CooldownKey, now: Instant) -> bool {
        let mut eligible = true;
        self.voice
            .entry(key)
            .and_modify(|last| {
                if now.saturating_duration_since(*last) < self.voice_window {
                    eligible = false;
                } else {
                    *last = now;
                }
            })
            .or_insert(now);
        eligible
    }

    /// Forget voice timestamps older than the window. Returns how many went.
    pub fn prune_voice(&self, now: Instant) -> usize {
        let before = self.voice.len();
        self.voice
            .retain(|_, last| now.saturating_duration_since(*last) < self.voice_window);
        before.saturating_sub(self.voice.len())
    }
}
