//! SQLite connection for the `[db].path` database.
//!
//! One file holds every tenant's `agents`, `knowledge_spaces` and
//! `conversations` rows (see [`crate::migrate`]). The server writes a
//! conversation per chat turn while the CLI edits agents and spaces, so the
//! database runs in WAL mode to let readers proceed during those writes.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;

/// Connections shared by the chat server's concurrent turns.
const MAX_CONNECTIONS: u32 = 5;

/// Open the configured database.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    connect_path(&config.db.path).await
}

/// Open the database at `db_path`, creating the file and its directory on
/// first use so `gchat init` works against a fresh data directory.
pub async fn connect_path(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_data_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested/data/gchat.sqlite");

        let pool = connect_path(&path).await.unwrap();
        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        pool.close().await;

        assert!(path.exists());
        assert_eq!(mode.0.to_lowercase(), "wal");
    }
}
