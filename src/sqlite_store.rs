//! SQLite-backed record stores.
//!
//! Implements the core [`AgentStore`], [`KnowledgeSpaceStore`] and
//! [`ConversationStore`] traits over the schema created by
//! [`crate::migrate`], plus the admin writes used by the CLI.
//!
//! List-valued columns (`knowledge_space_ids`, `source_urls`,
//! `referenced_urls`) are stored as JSON arrays.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use grounded_chat_core::models::{Agent, Conversation, KnowledgeSpace};
use grounded_chat_core::store::{AgentStore, ConversationStore, KnowledgeSpaceStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace an agent.
    pub async fn insert_agent(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (tenant_id, agent_id, name, knowledge_space_ids,
                                strict_rag, description, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, agent_id) DO UPDATE SET
                name = excluded.name,
                knowledge_space_ids = excluded.knowledge_space_ids,
                strict_rag = excluded.strict_rag,
                description = excluded.description
            "#,
        )
        .bind(&agent.tenant_id)
        .bind(&agent.agent_id)
        .bind(&agent.name)
        .bind(serde_json::to_string(&agent.knowledge_space_ids)?)
        .bind(agent.strict_rag)
        .bind(&agent.description)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a knowledge space.
    pub async fn insert_knowledge_space(&self, space: &KnowledgeSpace) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_spaces (tenant_id, knowledge_space_id, name,
                                          source_urls, current_version, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, knowledge_space_id) DO UPDATE SET
                name = excluded.name,
                source_urls = excluded.source_urls,
                current_version = excluded.current_version
            "#,
        )
        .bind(&space.tenant_id)
        .bind(&space.knowledge_space_id)
        .bind(&space.name)
        .bind(serde_json::to_string(&space.source_urls)?)
        .bind(&space.current_version)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_agents(&self, tenant_id: &str) -> Result<Vec<Agent>> {
        let rows = sqlx::query(
            "SELECT tenant_id, agent_id, name, knowledge_space_ids, strict_rag, description
             FROM agents WHERE tenant_id = ? ORDER BY agent_id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(agent_from_row).collect()
    }

    pub async fn list_knowledge_spaces(&self, tenant_id: &str) -> Result<Vec<KnowledgeSpace>> {
        let rows = sqlx::query(
            "SELECT tenant_id, knowledge_space_id, name, source_urls, current_version
             FROM knowledge_spaces WHERE tenant_id = ? ORDER BY knowledge_space_id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(space_from_row).collect()
    }

    /// Remove a knowledge space record. Returns false if it did not exist.
    ///
    /// Agents still listing the space keep their reference; retrieval skips
    /// spaces that cannot be resolved.
    pub async fn delete_knowledge_space(
        &self,
        tenant_id: &str,
        knowledge_space_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM knowledge_spaces WHERE tenant_id = ? AND knowledge_space_id = ?",
        )
        .bind(tenant_id)
        .bind(knowledge_space_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Most recent conversations for an agent, newest first.
    pub async fn list_conversations(
        &self,
        tenant_id: &str,
        agent_id: &str,
        limit: i64,
    ) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT conversation_id, tenant_id, agent_id, user_id, last_user_message,
                    last_assistant_message, referenced_urls, created_at, is_rag
             FROM conversations
             WHERE tenant_id = ? AND agent_id = ?
             ORDER BY created_at DESC, conversation_id DESC
             LIMIT ?",
        )
        .bind(tenant_id)
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(conversation_from_row).collect()
    }
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent> {
    let ks_json: String = row.get("knowledge_space_ids");
    Ok(Agent {
        tenant_id: row.get("tenant_id"),
        agent_id: row.get("agent_id"),
        name: row.get("name"),
        knowledge_space_ids: serde_json::from_str(&ks_json)
            .context("invalid knowledge_space_ids column")?,
        strict_rag: row.get("strict_rag"),
        description: row.get("description"),
    })
}

fn space_from_row(row: &SqliteRow) -> Result<KnowledgeSpace> {
    let urls_json: String = row.get("source_urls");
    Ok(KnowledgeSpace {
        tenant_id: row.get("tenant_id"),
        knowledge_space_id: row.get("knowledge_space_id"),
        name: row.get("name"),
        source_urls: serde_json::from_str(&urls_json).context("invalid source_urls column")?,
        current_version: row.get("current_version"),
    })
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation> {
    let urls_json: String = row.get("referenced_urls");
    let created_ms: i64 = row.get("created_at");
    Ok(Conversation {
        conversation_id: row.get("conversation_id"),
        tenant_id: row.get("tenant_id"),
        agent_id: row.get("agent_id"),
        user_id: row.get("user_id"),
        last_user_message: row.get("last_user_message"),
        last_assistant_message: row.get("last_assistant_message"),
        referenced_urls: serde_json::from_str(&urls_json)
            .context("invalid referenced_urls column")?,
        created_at: DateTime::<Utc>::from_timestamp_millis(created_ms).unwrap_or_default(),
        is_rag: row.get("is_rag"),
    })
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn find_agent(&self, tenant_id: &str, agent_id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query(
            "SELECT tenant_id, agent_id, name, knowledge_space_ids, strict_rag, description
             FROM agents WHERE tenant_id = ? AND agent_id = ?",
        )
        .bind(tenant_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(agent_from_row).transpose()
    }
}

#[async_trait]
impl KnowledgeSpaceStore for SqliteStore {
    async fn find_knowledge_space(
        &self,
        tenant_id: &str,
        knowledge_space_id: &str,
    ) -> Result<Option<KnowledgeSpace>> {
        let row = sqlx::query(
            "SELECT tenant_id, knowledge_space_id, name, source_urls, current_version
             FROM knowledge_spaces WHERE tenant_id = ? AND knowledge_space_id = ?",
        )
        .bind(tenant_id)
        .bind(knowledge_space_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(space_from_row).transpose()
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, tenant_id, agent_id, user_id,
                                       last_user_message, last_assistant_message,
                                       referenced_urls, created_at, is_rag)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&conversation.conversation_id)
        .bind(&conversation.tenant_id)
        .bind(&conversation.agent_id)
        .bind(&conversation.user_id)
        .bind(&conversation.last_user_message)
        .bind(&conversation.last_assistant_message)
        .bind(serde_json::to_string(&conversation.referenced_urls)?)
        .bind(conversation.created_at.timestamp_millis())
        .bind(conversation.is_rag)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_path;
    use crate::migrate::migrate_pool;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = connect_path(&tmp.path().join("gchat.sqlite")).await.unwrap();
        migrate_pool(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    #[tokio::test]
    async fn test_agent_roundtrip_preserves_space_order() {
        let (_tmp, store) = store().await;
        let agent = Agent::new(
            "acme",
            "helper",
            "Helper",
            vec!["faq".into(), "docs".into()],
            true,
            "support bot",
        )
        .unwrap();
        store.insert_agent(&agent).await.unwrap();

        let found = store.find_agent("acme", "helper").await.unwrap().unwrap();
        assert_eq!(found, agent);
        assert!(store.find_agent("other", "helper").await.unwrap().is_none());
        assert_eq!(store.list_agents("acme").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_knowledge_space_upsert_bumps_version() {
        let (_tmp, store) = store().await;
        let mut space = KnowledgeSpace::new(
            "acme",
            "docs",
            "Docs",
            vec!["https://acme.test/docs".into()],
            "2024-05-01",
        )
        .unwrap();
        store.insert_knowledge_space(&space).await.unwrap();
        space.current_version = "2024-06-01".into();
        store.insert_knowledge_space(&space).await.unwrap();

        let found = store
            .find_knowledge_space("acme", "docs")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.current_version, "2024-06-01");
        assert_eq!(found.namespace().as_str(), "t_acme_ks_docs_2024-06-01");
        assert_eq!(store.list_knowledge_spaces("acme").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_knowledge_space_is_tenant_scoped() {
        let (_tmp, store) = store().await;
        for tenant in ["acme", "globex"] {
            let space = KnowledgeSpace::new(
                tenant,
                "docs",
                "Docs",
                vec!["https://docs.test".into()],
                "2024-05-01",
            )
            .unwrap();
            store.insert_knowledge_space(&space).await.unwrap();
        }

        assert!(store.delete_knowledge_space("acme", "docs").await.unwrap());
        assert!(!store.delete_knowledge_space("acme", "docs").await.unwrap());
        assert!(store.find_knowledge_space("acme", "docs").await.unwrap().is_none());
        assert!(store.find_knowledge_space("globex", "docs").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_conversations_are_appended() {
        let (_tmp, store) = store().await;
        for (i, is_rag) in [(1, true), (2, false)] {
            store
                .save(&Conversation {
                    conversation_id: format!("conv_{}_abcdef123", i),
                    tenant_id: "acme".into(),
                    agent_id: "helper".into(),
                    user_id: "u1".into(),
                    last_user_message: "q".into(),
                    last_assistant_message: "a".into(),
                    referenced_urls: vec!["https://acme.test/a".into()],
                    created_at: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000 + i)
                        .unwrap(),
                    is_rag,
                })
                .await
                .unwrap();
        }

        let listed = store.list_conversations("acme", "helper", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].conversation_id, "conv_2_abcdef123");
        assert!(!listed[0].is_rag);
        assert_eq!(listed[1].referenced_urls, vec!["https://acme.test/a"]);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let (_tmp, store) = store().await;
        migrate_pool(store.pool()).await.unwrap();
    }
}
