// Shared SQLite connection pool. Every SQLite-backed store in infra runs on
// the same pool so the bot only ever opens one database file.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DATABASE_PATH: &str = "data/leveling.db";

/// Open (and create if needed) the database at `database_path`.
pub async fn connect(database_path: &str) -> anyhow::Result<SqlitePool> {
    let path = Path::new(database_path.trim_start_matches("sqlite://"));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    tracing::info!(path = %path.display(), "Opened SQLite database");
    Ok(pool)
}
