//! Tenant administration commands.
//!
//! Registers agents and knowledge spaces, and lists them along with recent
//! conversations. Used by the `gchat agent`, `gchat space` and
//! `gchat conversations` CLI commands.

use anyhow::Result;

use grounded_chat_core::models::{Agent, KnowledgeSpace, DEFAULT_EMBEDDING_DIMS};
use grounded_chat_core::store::KnowledgeSpaceStore;
use grounded_chat_core::ChatError;

use crate::config::Config;
use crate::db;
use crate::qdrant::QdrantStore;
use crate::sqlite_store::SqliteStore;

async fn open(config: &Config) -> Result<SqliteStore> {
    Ok(SqliteStore::new(db::connect(config).await?))
}

pub async fn run_agent_add(config: &Config, agent: Agent) -> Result<()> {
    let store = open(config).await?;
    store.insert_agent(&agent).await?;
    store.pool().close().await;

    println!(
        "Agent '{}' saved for tenant '{}' ({} knowledge space{}, strict: {}).",
        agent.agent_id,
        agent.tenant_id,
        agent.knowledge_space_ids.len(),
        if agent.knowledge_space_ids.len() == 1 { "" } else { "s" },
        agent.strict_rag
    );
    Ok(())
}

pub async fn run_agent_list(config: &Config, tenant_id: &str) -> Result<()> {
    let store = open(config).await?;
    let agents = store.list_agents(tenant_id).await?;
    store.pool().close().await;

    if agents.is_empty() {
        println!("No agents.");
        return Ok(());
    }

    println!("{:<20} {:<24} {:<7} SPACES", "AGENT", "NAME", "STRICT");
    for agent in agents {
        println!(
            "{:<20} {:<24} {:<7} {}",
            agent.agent_id,
            agent.name,
            agent.strict_rag,
            agent.knowledge_space_ids.join(",")
        );
    }
    Ok(())
}

pub async fn run_space_add(config: &Config, space: KnowledgeSpace) -> Result<()> {
    let store = open(config).await?;
    store.insert_knowledge_space(&space).await?;
    store.pool().close().await;

    println!(
        "Knowledge space '{}' saved for tenant '{}' (namespace {}).",
        space.knowledge_space_id,
        space.tenant_id,
        space.namespace()
    );
    Ok(())
}

/// Remove a knowledge space record, then its current version's collection.
pub async fn run_space_delete(config: &Config, tenant_id: &str, space_id: &str) -> Result<()> {
    let store = open(config).await?;
    let space = store.find_knowledge_space(tenant_id, space_id).await?;
    let space = match space {
        Some(space) => space,
        None => {
            store.pool().close().await;
            return Err(ChatError::not_found("knowledge space", space_id).into());
        }
    };
    store.delete_knowledge_space(tenant_id, space_id).await?;
    store.pool().close().await;

    let namespace = space.namespace();
    let dims = config.embedding.dims.unwrap_or(DEFAULT_EMBEDDING_DIMS);
    QdrantStore::new(&config.vector_store, dims)?
        .delete_collection(&namespace)
        .await?;

    println!(
        "Knowledge space '{}' deleted for tenant '{}' (collection {} dropped).",
        space_id, tenant_id, namespace
    );
    Ok(())
}

pub async fn run_space_list(config: &Config, tenant_id: &str) -> Result<()> {
    let store = open(config).await?;
    let spaces = store.list_knowledge_spaces(tenant_id).await?;
    store.pool().close().await;

    if spaces.is_empty() {
        println!("No knowledge spaces.");
        return Ok(());
    }

    println!("{:<20} {:<12} {:<40} URLS", "SPACE", "VERSION", "NAMESPACE");
    for space in spaces {
        println!(
            "{:<20} {:<12} {:<40} {}",
            space.knowledge_space_id,
            space.current_version,
            space.namespace().as_str(),
            space.source_urls.len()
        );
    }
    Ok(())
}

pub async fn run_conversations(
    config: &Config,
    tenant_id: &str,
    agent_id: &str,
    limit: i64,
) -> Result<()> {
    let store = open(config).await?;
    let conversations = store.list_conversations(tenant_id, agent_id, limit).await?;
    store.pool().close().await;

    if conversations.is_empty() {
        println!("No conversations.");
        return Ok(());
    }

    for c in conversations {
        println!(
            "{}  {}  user={} rag={}",
            c.conversation_id,
            c.created_at.format("%Y-%m-%d %H:%M:%S"),
            c.user_id,
            c.is_rag
        );
        println!("    Q: {}", c.last_user_message);
        println!("    A: {}", c.last_assistant_message);
        for url in &c.referenced_urls {
            println!("    cited: {}", url);
        }
        println!();
    }
    Ok(())
}
