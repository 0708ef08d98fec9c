//! Wiring: builds the [`ChatService`] from configuration.
//!
//! Every collaborator is constructed here explicitly. The three network
//! services are each wrapped in their guard with an independent circuit
//! breaker; the record stores share one SQLite pool.

use std::sync::Arc;

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use grounded_chat_core::chat::{ChatCollaborators, ChatService};
use grounded_chat_core::guard::{GuardedCompletion, GuardedEmbedding, GuardedVectorStore};
use grounded_chat_core::models::DEFAULT_EMBEDDING_DIMS;
use grounded_chat_core::resilience::RetryOptions;
use grounded_chat_core::retrieval::RetrievalParams;

use crate::completion::OpenAICompletion;
use crate::config::Config;
use crate::embedding::OpenAIEmbedding;
use crate::logging::TracingLogger;
use crate::qdrant::QdrantStore;
use crate::sqlite_store::SqliteStore;

pub fn build_chat_service(config: &Config, pool: SqlitePool) -> Result<ChatService> {
    if !config.embedding.is_enabled() {
        bail!("chat requires an [embedding] provider; provider is 'disabled'");
    }
    if !config.completion.is_enabled() {
        bail!("chat requires a [completion] provider; provider is 'disabled'");
    }

    let retry = RetryOptions::from(&config.resilience);
    let dims = config.embedding.dims.unwrap_or(DEFAULT_EMBEDDING_DIMS);

    let embedder = GuardedEmbedding::new(
        OpenAIEmbedding::new(&config.embedding)?,
        config.resilience.breaker("embedding"),
        retry.clone(),
    );
    let vectors = GuardedVectorStore::new(
        QdrantStore::new(&config.vector_store, dims)?,
        config.resilience.breaker("vector-store"),
        retry.clone(),
    );
    let completion = GuardedCompletion::new(
        OpenAICompletion::new(&config.completion)?,
        config.resilience.breaker("completion"),
        retry,
    );

    let records = Arc::new(SqliteStore::new(pool));

    let deps = ChatCollaborators {
        agents: records.clone(),
        spaces: records.clone(),
        conversations: records,
        vectors: Arc::new(vectors),
        embedder: Arc::new(embedder),
        completion: Arc::new(completion),
    };

    Ok(
        ChatService::new(deps, RetrievalParams::from(&config.retrieval))
            .with_structured_logger(Arc::new(TracingLogger)),
    )
}
