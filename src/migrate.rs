use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema in the configured database. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an already open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Agents: knowledge space ids are stored as a JSON array, in order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            tenant_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            name TEXT NOT NULL,
            knowledge_space_ids TEXT NOT NULL,
            strict_rag INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            PRIMARY KEY (tenant_id, agent_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_spaces (
            tenant_id TEXT NOT NULL,
            knowledge_space_id TEXT NOT NULL,
            name TEXT NOT NULL,
            source_urls TEXT NOT NULL,
            current_version TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (tenant_id, knowledge_space_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Conversations are append-only
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            conversation_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            last_user_message TEXT NOT NULL,
            last_assistant_message TEXT NOT NULL,
            referenced_urls TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            is_rag INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_tenant_agent ON conversations(tenant_id, agent_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
