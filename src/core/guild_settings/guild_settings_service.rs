// Per-guild settings consumed by the leveling engine.
// Managing them (prefix commands, toggles) is not this bot's job; it only reads
// them and makes sure a default row exists for every guild it joins.

use async_trait::async_trait;

pub const DEFAULT_PREFIX: &str = "!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSettings {
    pub guild_id: u64,
    pub leveling_enabled: bool,
    /// Where level-up announcements go. `None` means the channel the
    /// level-up happened in.
    pub level_up_channel_id: Option<u64>,
    pub command_prefix: String,
}

impl GuildSettings {
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            leveling_enabled: true,
            level_up_channel_id: None,
            command_prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GuildSettingsError {
    #[error("Settings store error: {0}")]
    Store(String),
    #[error("Invalid guild ID")]
    InvalidGuild,
}

#[async_trait]
pub trait GuildSettingsStore: Send + Sync {
    async fn get_settings(&self, guild_id: u64) -> Result<Option<GuildSettings>, GuildSettingsError>;
    /// Insert a default row unless one exists. Returns true if a row was created.
    async fn ensure_defaults(&self, guild_id: u64) -> Result<bool, GuildSettingsError>;
}

pub struct GuildSettingsService<S: GuildSettingsStore> {
    store: S,
}

impl<S: GuildSettingsStore> GuildSettingsService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Settings for a guild, or the defaults if nothing has been stored yet.
    pub async fn settings_for(&self, guild_id: u64) -> Result<GuildSettings, GuildSettingsError> {
        if guild_id == 0 {
            return Err(GuildSettingsError::InvalidGuild);
        }
        Ok(self
            .store
            .get_settings(guild_id)
            .await?
            .unwrap_or_else(|| GuildSettings::new(guild_id)))
    }

    pub async fn ensure_defaults(&self, guild_id: u64) -> Result<bool, GuildSettingsError> {
        if guild_id == 0 {
            return Err(GuildSettingsError::InvalidGuild);
        }
        self.store.ensure_defaults(guild_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemorySettingsStore {
        rows: Mutex<HashMap<u64, GuildSettings>>,
    }

    impl InMemorySettingsStore {
        fn save_settings(&self, settings: &GuildSettings) {
            self.rows
                .lock()
                .unwrap()
                .insert(settings.guild_id, settings.clone());
        }
    }

    #[async_trait]
    impl GuildSettingsStore for InMemorySettingsStore {
        async fn get_settings(
            &self,
            guild_id: u64,
        ) -> Result<Option<GuildSettings>, GuildSettingsError> {
            Ok(self.rows.lock().unwrap().get(&guild_id).cloned())
        }

        async fn ensure_defaults(&self, guild_id: u64) -> Result<bool, GuildSettingsError> {
            let mut rows = self.rows.lock().unwrap();
            if rows.contains_key(&guild_id) {
                return Ok(false);
            }
            rows.insert(guild_id, GuildSettings::new(guild_id));
            Ok(true)
        }
    }

    #[tokio::test]
    async fn unknown_guild_gets_defaults() {
        let service = GuildSettingsService::new(InMemorySettingsStore::default());
        let settings = service.settings_for(42).await.unwrap();

        assert!(settings.leveling_enabled);
        assert_eq!(settings.command_prefix, "!");
        assert_eq!(settings.level_up_channel_id, None);
    }

    #[tokio::test]
    async fn stored_settings_win_over_defaults() {
        let store = InMemorySettingsStore::default();
        store.save_settings(&GuildSettings {
            guild_id: 42,
            leveling_enabled: false,
            level_up_channel_id: Some(9),
            command_prefix: "$".into(),
        });
        let service = GuildSettingsService::new(store);

        let settings = service.settings_for(42).await.unwrap();
        assert!(!settings.leveling_enabled);
        assert_eq!(settings.command_prefix, "$");
    }

    #[tokio::test]
    async fn ensure_defaults_only_creates_once() {
        let service = GuildSettingsService::new(InMemorySettingsStore::default());
        assert!(service.ensure_defaults(42).await.unwrap());
        assert!(!service.ensure_defaults(42).await.unwrap());
        assert!(matches!(
            service.ensure_defaults(0).await,
            Err(GuildSettingsError::InvalidGuild)
        ));
    }
}
