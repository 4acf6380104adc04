// SQLite implementation of the XpStore trait.
//
// `add_xp` is one transaction: an upsert that bumps xp and hands back the new
// total plus the level cached before the award, the level fix-up, and the
// xp_logs row. SQLite only lets one writer in at a time, so awards for the
// same member can never interleave.

use crate::core::leveling::level_curve::level_from_xp;
use crate::core::leveling::{
    ActivityLogEntry, LevelChange, LevelingError, RoleReward, UserProgress, XpSource, XpStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

pub struct SqliteXpStore {
    pool: SqlitePool,
}

fn storage_error(e: sqlx::Error) -> LevelingError {
    LevelingError::StoreUnavailable(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, LevelingError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LevelingError::StoreUnavailable(format!("bad timestamp {raw:?}: {e}")))
}

fn row_to_progress(row: &SqliteRow) -> Result<UserProgress, LevelingError> {
    let last_update: String = row.get("last_update");
    Ok(UserProgress {
        user_id: row.get::<i64, _>("user_id") as u64,
        guild_id: row.get::<i64, _>("guild_id") as u64,
        xp: row.get::<i64, _>("xp") as u64,
        level: row.get::<i64, _>("level") as u32,
        last_update: parse_timestamp(&last_update)?,
    })
}

fn row_to_reward(row: &SqliteRow) -> RoleReward {
    RoleReward {
        guild_id: row.get::<i64, _>("guild_id") as u64,
        role_id: row.get::<i64, _>("role_id") as u64,
        level_requirement: row.get::<i64, _>("level_requirement") as u32,
    }
}

impl SqliteXpStore {
    /// Wrap an open pool and make sure the leveling tables exist.
    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_levels (
                user_id INTEGER NOT NULL,
                guild_id INTEGER NOT NULL,
                xp INTEGER NOT NULL DEFAULT 0,
                level INTEGER NOT NULL DEFAULT 0,
                last_update TEXT NOT NULL,
                PRIMARY KEY (user_id, guild_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_user_levels_guild_xp
            ON user_levels(guild_id, xp DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS xp_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                guild_id INTEGER NOT NULL,
                xp_amount INTEGER NOT NULL,
                source TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_xp_logs_user_guild
            ON xp_logs(user_id, guild_id, id DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS role_rewards (
                guild_id INTEGER NOT NULL,
                role_id INTEGER NOT NULL,
                level_requirement INTEGER NOT NULL,
                PRIMARY KEY (guild_id, role_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl XpStore for SqliteXpStore {
    async fn add_xp(&self, entry: &ActivityLogEntry) -> Result<LevelChange, LevelingError> {
        let timestamp = entry.timestamp.to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        // `level` in RETURNING is still the pre-award value; only xp changed.
        let row = sqlx::query(
            r#"
            INSERT INTO user_levels (user_id, guild_id, xp, level, last_update)
            VALUES (?, ?, ?, 0, ?)
            ON CONFLICT(user_id, guild_id) DO UPDATE SET
                xp = xp + excluded.xp,
                last_update = excluded.last_update
            RETURNING xp, level
            "#,
        )
        .bind(entry.user_id as i64)
        .bind(entry.guild_id as i64)
        .bind(entry.amount as i64)
        .bind(timestamp.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error)?;

        let total_xp = row.get::<i64, _>("xp") as u64;
        let old_level = row.get::<i64, _>("level") as u32;
        let new_level = level_from_xp(total_xp);

        if new_level != old_level {
            sqlx::query("UPDATE user_levels SET level = ? WHERE user_id = ? AND guild_id = ?")
                .bind(new_level as i64)
                .bind(entry.user_id as i64)
                .bind(entry.guild_id as i64)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }

        sqlx::query(
            r#"
            INSERT INTO xp_logs (user_id, guild_id, xp_amount, source, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.user_id as i64)
        .bind(entry.guild_id as i64)
        .bind(entry.amount as i64)
        .bind(entry.source.as_str())
        .bind(timestamp.as_str())
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;

        Ok(LevelChange {
            user_id: entry.user_id,
            guild_id: entry.guild_id,
            old_level,
            new_level,
            total_xp,
        })
    }

    async fn get_progress(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<UserProgress>, LevelingError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, guild_id, xp, level, last_update
            FROM user_levels
            WHERE user_id = ? AND guild_id = ?
            "#,
        )
        .bind(user_id as i64)
        .bind(guild_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.as_ref().map(row_to_progress).transpose()
    }

    async fn count_with_more_xp(&self, guild_id: u64, xp: u64) -> Result<u64, LevelingError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM user_levels WHERE guild_id = ? AND xp > ?")
                .bind(guild_id as i64)
                .bind(xp as i64)
                .fetch_one(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(count as u64)
    }

    async fn count_members(&self, guild_id: u64) -> Result<u64, LevelingError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_levels WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(count as u64)
    }

    async fn leaderboard_slice(
        &self,
        guild_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<UserProgress>, LevelingError> {
        // rowid follows insertion order and survives the upsert's UPDATE path.
        let rows = sqlx::query(
            r#"
            SELECT user_id, guild_id, xp, level, last_update
            FROM user_levels
            WHERE guild_id = ?
            ORDER BY xp DESC, rowid ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(guild_id as i64)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(row_to_progress).collect()
    }

    async fn add_role_reward(&self, reward: &RoleReward) -> Result<bool, LevelingError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO role_rewards (guild_id, role_id, level_requirement)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(reward.guild_id as i64)
        .bind(reward.role_id as i64)
        .bind(reward.level_requirement as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_role_reward(
        &self,
        guild_id: u64,
        role_id: u64,
    ) -> Result<bool, LevelingError> {
        let result = sqlx::query("DELETE FROM role_rewards WHERE guild_id = ? AND role_id = ?")
            .bind(guild_id as i64)
            .bind(role_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_role_rewards(&self, guild_id: u64) -> Result<Vec<RoleReward>, LevelingError> {
        let rows = sqlx::query(
            r#"
            SELECT guild_id, role_id, level_requirement
            FROM role_rewards
            WHERE guild_id = ?
            ORDER BY level_requirement ASC, role_id ASC
            "#,
        )
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.iter().map(row_to_reward).collect())
    }

    async fn rewards_up_to(
        &self,
        guild_id: u64,
        level: u32,
    ) -> Result<Vec<RoleReward>, LevelingError> {
        let rows = sqlx::query(
            r#"
            SELECT guild_id, role_id, level_requirement
            FROM role_rewards
            WHERE guild_id = ? AND level_requirement <= ?
            ORDER BY level_requirement DESC, role_id DESC
            "#,
        )
        .bind(guild_id as i64)
        .bind(level as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.iter().map(row_to_reward).collect())
    }

    async fn recent_activity(
        &self,
        user_id: u64,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, LevelingError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, guild_id, xp_amount, source, timestamp
            FROM xp_logs
            WHERE user_id = ? AND guild_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id as i64)
        .bind(guild_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter()
            .map(|row| {
                let source: String = row.get("source");
                let timestamp: String = row.get("timestamp");
                Ok(ActivityLogEntry {
                    user_id: row.get::<i64, _>("user_id") as u64,
                    guild_id: row.get::<i64, _>("guild_id") as u64,
                    amount: row.get::<i64, _>("xp_amount") as u64,
                    source: XpSource::parse(&source).ok_or_else(|| {
                        LevelingError::StoreUnavailable(format!("unknown xp source {source:?}"))
                    })?,
                    timestamp: parse_timestamp(&timestamp)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::leveling::LevelingService;
    use crate::infra::database;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn open_store() -> (SqliteXpStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leveling.db");
        let pool = database::connect(path.to_str().unwrap()).await.unwrap();
        (SqliteXpStore::new(pool).await.unwrap(), dir)
    }

    fn award(user_id: u64, amount: u64, source: XpSource) -> ActivityLogEntry {
        ActivityLogEntry {
            user_id,
            guild_id: 100,
            amount,
            source,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn add_xp_creates_then_accumulates() {
        let (store, _dir) = open_store().await;

        let change = store.add_xp(&award(1, 20, XpSource::Message)).await.unwrap();
        assert_eq!((change.old_level, change.new_level, change.total_xp), (0, 0, 20));

        let change = store.add_xp(&award(1, 90, XpSource::Drop)).await.unwrap();
        assert_eq!((change.old_level, change.new_level, change.total_xp), (0, 1, 110));

        let progress = store.get_progress(1, 100).await.unwrap().unwrap();
        assert_eq!(progress.xp, 110);
        assert_eq!(progress.level, 1);
    }

    #[tokio::test]
    async fn every_award_is_logged() {
        let (store, _dir) = open_store().await;
        store.add_xp(&award(1, 20, XpSource::Message)).await.unwrap();
        store.add_xp(&award(1, 5, XpSource::Reaction)).await.unwrap();
        store.add_xp(&award(1, 10, XpSource::Voice)).await.unwrap();

        let log = store.recent_activity(1, 100, 10).await.unwrap();
        let amounts: Vec<(u64, XpSource)> = log.iter().map(|e| (e.amount, e.source)).collect();
        assert_eq!(
            amounts,
            vec![
                (10, XpSource::Voice),
                (5, XpSource::Reaction),
                (20, XpSource::Message)
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_awards_serialize() {
        let (store, _dir) = open_store().await;
        let service = Arc::new(LevelingService::new(store));

        let mut handles = Vec::new();
        for i in 0..40u64 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service
                    .add_xp(9, 100, 10 + i, XpSource::Message)
                    .await
                    .unwrap()
            }));
        }
        let mut level_ups = 0;
        for handle in handles {
            if handle.await.unwrap().leveled_up() {
                level_ups += 1;
            }
        }

        let expected: u64 = (0..40u64).map(|i| 10 + i).sum();
        let progress = service.get_progress(9, 100).await.unwrap().unwrap();
        assert_eq!(progress.xp, expected);
        assert_eq!(progress.level, level_from_xp(expected));
        // Every level between 0 and the final one was reported exactly once.
        assert_eq!(level_ups, progress.level);
    }

    #[tokio::test]
    async fn leaderboard_orders_by_xp_then_join_order() {
        let (store, _dir) = open_store().await;
        store.add_xp(&award(5, 100, XpSource::Message)).await.unwrap();
        store.add_xp(&award(6, 300, XpSource::Message)).await.unwrap();
        store.add_xp(&award(7, 100, XpSource::Message)).await.unwrap();
        // A later award doesn't move user 5 behind user 7 on ties.
        store.add_xp(&award(5, 50, XpSource::Message)).await.unwrap();
        store.add_xp(&award(7, 50, XpSource::Message)).await.unwrap();

        let board = store.leaderboard_slice(100, 0, 10).await.unwrap();
        let users: Vec<u64> = board.iter().map(|p| p.user_id).collect();
        assert_eq!(users, vec![6, 5, 7]);

        assert_eq!(store.count_members(100).await.unwrap(), 3);
        assert_eq!(store.count_with_more_xp(100, 150).await.unwrap(), 1);
        assert_eq!(store.leaderboard_slice(100, 2, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn role_rewards_round_trip() {
        let (store, _dir) = open_store().await;
        let reward = |role_id, level_requirement| RoleReward {
            guild_id: 100,
            role_id,
            level_requirement,
        };

        assert!(store.add_role_reward(&reward(1, 10)).await.unwrap());
        assert!(store.add_role_reward(&reward(2, 5)).await.unwrap());
        assert!(!store.add_role_reward(&reward(2, 7)).await.unwrap());

        let listed = store.list_role_rewards(100).await.unwrap();
        assert_eq!(listed, vec![reward(2, 5), reward(1, 10)]);

        let unlocked = store.rewards_up_to(100, 12).await.unwrap();
        assert_eq!(unlocked, vec![reward(1, 10), reward(2, 5)]);

        assert!(store.remove_role_reward(100, 1).await.unwrap());
        assert!(!store.remove_role_reward(100, 1).await.unwrap());
        assert_eq!(store.rewards_up_to(100, 12).await.unwrap(), vec![reward(2, 5)]);
    }

    #[tokio::test]
    async fn data_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leveling.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteXpStore::new(database::connect(path).await.unwrap())
                .await
                .unwrap();
            store.add_xp(&award(1, 500, XpSource::Drop)).await.unwrap();
            store.pool.close().await;
        }

        let store = SqliteXpStore::new(database::connect(path).await.unwrap())
            .await
            .unwrap();
        let progress = store.get_progress(1, 100).await.unwrap().unwrap();
        assert_eq!(progress.xp, 500);
        assert_eq!(progress.level, 2);
    }
}
