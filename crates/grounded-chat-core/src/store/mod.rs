//! Collaborator traits for the chat pipeline.
//!
//! The orchestrator and the retrieval engine reach every external system
//! through these traits, enabling pluggable backends (OpenAI + Qdrant +
//! SQLite in the app crate, [`memory`] in tests).
//!
//! All traits are async (via `async-trait`) and implementations must be
//! `Send + Sync` to be shared across request tasks.

pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Agent, Chunk, Conversation, Embedding, KnowledgeSpace, SearchResult};
use crate::namespace::Namespace;

/// Turns text into an embedding vector.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Similarity search over namespaced collections of chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Up to `top_k` nearest chunks in `namespace`, best first.
    ///
    /// A namespace that has never been written to yields no results.
    async fn search(
        &self,
        namespace: &Namespace,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Insert or replace chunks (by id) in `namespace`.
    async fn upsert(&self, namespace: &Namespace, chunks: &[Chunk]) -> Result<()>;
}

/// Produces the answer text for a fully assembled prompt.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save(&self, conversation: &Conversation) -> Result<()>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn find_agent(&self, tenant_id: &str, agent_id: &str) -> Result<Option<Agent>>;
}

#[async_trait]
pub trait KnowledgeSpaceStore: Send + Sync {
    async fn find_knowledge_space(
        &self,
        tenant_id: &str,
        knowledge_space_id: &str,
    ) -> Result<Option<KnowledgeSpace>>;
}

#[async_trait]
impl<T: EmbeddingService + ?Sized> EmbeddingService for Arc<T> {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        (**self).embed(text).await
    }
}

#[async_trait]
impl<T: VectorStore + ?Sized> VectorStore for Arc<T> {
    async fn search(
        &self,
        namespace: &Namespace,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        (**self).search(namespace, query, top_k).await
    }

    async fn upsert(&self, namespace: &Namespace, chunks: &[Chunk]) -> Result<()> {
        (**self).upsert(namespace, chunks).await
    }
}

#[async_trait]
impl<T: CompletionService + ?Sized> CompletionService for Arc<T> {
    async fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt).await
    }
}
