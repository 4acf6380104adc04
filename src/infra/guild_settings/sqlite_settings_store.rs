// SQLite implementation of the GuildSettingsStore trait.

use crate::core::guild_settings::{GuildSettings, GuildSettingsError, GuildSettingsStore, DEFAULT_PREFIX};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

pub struct SqliteGuildSettingsStore {
    pool: SqlitePool,
}

fn storage_error(e: sqlx::Error) -> GuildSettingsError {
    GuildSettingsError::Store(e.to_string())
}

impl SqliteGuildSettingsStore {
    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guild_settings (
                guild_id INTEGER PRIMARY KEY,
                leveling_enabled INTEGER NOT NULL DEFAULT 1,
                level_up_channel_id INTEGER,
                prefix TEXT NOT NULL DEFAULT '!'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert a full settings row. Only tests write settings directly.
    #[cfg(test)]
    pub(crate) async fn save_settings(
        &self,
        settings: &GuildSettings,
    ) -> Result<(), GuildSettingsError> {
        sqlx::query(
            r#"
            INSERT INTO guild_settings (guild_id, leveling_enabled, level_up_channel_id, prefix)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                leveling_enabled = excluded.leveling_enabled,
                level_up_channel_id = excluded.level_up_channel_id,
                prefix = excluded.prefix
            "#,
        )
        .bind(settings.guild_id as i64)
        .bind(settings.leveling_enabled as i64)
        .bind(settings.level_up_channel_id.map(|id| id as i64))
        .bind(&settings.command_prefix)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }
}

#[async_trait]
impl GuildSettingsStore for SqliteGuildSettingsStore {
    async fn get_settings(&self, guild_id: u64) -> Result<Option<GuildSettings>, GuildSettingsError> {
        let row = sqlx::query(
            r#"
            SELECT guild_id, leveling_enabled, level_up_channel_id, prefix
            FROM guild_settings
            WHERE guild_id = ?
            "#,
        )
        .bind(guild_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(|row| GuildSettings {
            guild_id: row.get::<i64, _>("guild_id") as u64,
            leveling_enabled: row.get::<i64, _>("leveling_enabled") != 0,
            level_up_channel_id: row
                .get::<Option<i64>, _>("level_up_channel_id")
                .map(|id| id as u64),
            command_prefix: row.get("prefix"),
        }))
    }

    async fn ensure_defaults(&self, guild_id: u64) -> Result<bool, GuildSettingsError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO guild_settings (guild_id, leveling_enabled, prefix) VALUES (?, 1, ?)",
        )
        .bind(guild_id as i64)
        .bind(DEFAULT_PREFIX)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guild_settings::GuildSettingsService;
    use crate::infra::database;

    async fn open_store() -> (SqliteGuildSettingsStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.db");
        let pool = database::connect(path.to_str().unwrap()).await.unwrap();
        (SqliteGuildSettingsStore::new(pool).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn ensure_defaults_inserts_once() {
        let (store, _dir) = open_store().await;

        assert!(store.ensure_defaults(7).await.unwrap());
        assert!(!store.ensure_defaults(7).await.unwrap());

        let settings = store.get_settings(7).await.unwrap().unwrap();
        assert_eq!(settings, GuildSettings::new(7));
    }

    #[tokio::test]
    async fn saved_settings_are_read_back() {
        let (store, _dir) = open_store().await;
        let settings = GuildSettings {
            guild_id: 7,
            leveling_enabled: false,
            level_up_channel_id: Some(1234),
            command_prefix: "?".into(),
        };

        store.save_settings(&settings).await.unwrap();
        // ensure_defaults must not clobber an existing row.
        store.ensure_defaults(7).await.unwrap();

        let service = GuildSettingsService::new(store);
        assert_eq!(service.settings_for(7).await.unwrap(), settings);
        assert_eq!(service.settings_for(8).await.unwrap(), GuildSettings::new(8));
    }
}
