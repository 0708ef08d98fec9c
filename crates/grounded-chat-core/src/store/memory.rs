//! In-memory store implementations for testing and local demos.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force cosine similarity over every chunk in the
//! requested namespace.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Agent, Chunk, Conversation, Embedding, KnowledgeSpace, SearchResult};
use crate::namespace::Namespace;

use super::{AgentStore, ConversationStore, KnowledgeSpaceStore, VectorStore};

/// In-memory agents, knowledge spaces, conversations and vectors.
pub struct InMemoryStore {
    agents: RwLock<HashMap<(String, String), Agent>>,
    spaces: RwLock<HashMap<(String, String), KnowledgeSpace>>,
    conversations: RwLock<Vec<Conversation>>,
    collections: RwLock<HashMap<Namespace, Vec<Chunk>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            spaces: RwLock::new(HashMap::new()),
            conversations: RwLock::new(Vec::new()),
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_agent(&self, agent: Agent) {
        let key = (agent.tenant_id.clone(), agent.agent_id.clone());
        self.agents.write().unwrap().insert(key, agent);
    }

    pub fn add_knowledge_space(&self, space: KnowledgeSpace) {
        let key = (space.tenant_id.clone(), space.knowledge_space_id.clone());
        self.spaces.write().unwrap().insert(key, space);
    }

    /// Every conversation saved so far, oldest first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.conversations.read().unwrap().clone()
    }

    /// Number of chunks stored under `namespace`.
    pub fn collection_len(&self, namespace: &Namespace) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(namespace)
            .map_or(0, Vec::len)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentStore for InMemoryStore {
    async fn find_agent(&self, tenant_id: &str, agent_id: &str) -> Result<Option<Agent>> {
        let agents = self.agents.read().unwrap();
        Ok(agents
            .get(&(tenant_id.to_string(), agent_id.to_string()))
            .cloned())
    }
}

#[async_trait]
impl KnowledgeSpaceStore for InMemoryStore {
    async fn find_knowledge_space(
        &self,
        tenant_id: &str,
        knowledge_space_id: &str,
    ) -> Result<Option<KnowledgeSpace>> {
        let spaces = self.spaces.read().unwrap();
        Ok(spaces
            .get(&(tenant_id.to_string(), knowledge_space_id.to_string()))
            .cloned())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.conversations
            .write()
            .unwrap()
            .push(conversation.clone());
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn search(
        &self,
        namespace: &Namespace,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let collections = self.collections.read().unwrap();
        let Some(chunks) = collections.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<SearchResult> = chunks
            .iter()
            .map(|chunk| SearchResult {
                score: cosine_similarity(query.as_slice(), chunk.embedding.as_slice()) as f64,
                chunk: chunk.clone(),
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    async fn upsert(&self, namespace: &Namespace, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            chunk.validate()?;
        }
        let mut collections = self.collections.write().unwrap();
        let stored = collections.entry(namespace.clone()).or_default();
        for chunk in chunks {
            match stored.iter_mut().find(|c| c.id == chunk.id) {
                Some(existing) => *existing = chunk.clone(),
                None => stored.push(chunk.clone()),
            }
        }
        Ok(())
    }
}
