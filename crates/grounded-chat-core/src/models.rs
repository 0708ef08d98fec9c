//! Core data models used throughout grounded-chat.
//!
//! Agents and knowledge spaces are configuration records owned by a tenant.
//! Chunks and their embeddings live in the vector store; search results and
//! conversations are produced once per chat turn.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::namespace::Namespace;

/// Dimensionality of `text-embedding-3-small`, the default embedding model.
pub const DEFAULT_EMBEDDING_DIMS: usize = 1536;

/// A chat agent bound to one or more knowledge spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub tenant_id: String,
    pub agent_id: String,
    pub name: String,
    /// Ordered list of linked knowledge spaces. Never empty.
    pub knowledge_space_ids: Vec<String>,
    /// When true the agent refuses to answer without retrieved context.
    pub strict_rag: bool,
    pub description: String,
}

impl Agent {
    pub fn new(
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        name: impl Into<String>,
        knowledge_space_ids: Vec<String>,
        strict_rag: bool,
        description: impl Into<String>,
    ) -> Result<Self> {
        if knowledge_space_ids.is_empty() {
            bail!("agent must reference at least one knowledge space");
        }
        Ok(Self {
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            name: name.into(),
            knowledge_space_ids,
            strict_rag,
            description: description.into(),
        })
    }
}

/// A crawled, versioned collection of source pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSpace {
    pub tenant_id: String,
    pub knowledge_space_id: String,
    pub name: String,
    pub source_urls: Vec<String>,
    /// Ingestion version, formatted `YYYY-MM-DD`.
    pub current_version: String,
}

impl KnowledgeSpace {
    pub fn new(
        tenant_id: impl Into<String>,
        knowledge_space_id: impl Into<String>,
        name: impl Into<String>,
        source_urls: Vec<String>,
        current_version: impl Into<String>,
    ) -> Result<Self> {
        let current_version = current_version.into();
        if source_urls.is_empty() {
            bail!("knowledge space must have at least one source url");
        }
        if !is_version_date(&current_version) {
            bail!(
                "knowledge space version must be YYYY-MM-DD, got '{}'",
                current_version
            );
        }
        Ok(Self {
            tenant_id: tenant_id.into(),
            knowledge_space_id: knowledge_space_id.into(),
            name: name.into(),
            source_urls,
            current_version,
        })
    }

    /// Vector-store namespace for the current version of this space.
    pub fn namespace(&self) -> Namespace {
        Namespace::new(
            &self.tenant_id,
            &self.knowledge_space_id,
            &self.current_version,
        )
    }
}

/// `YYYY-MM-DD` with a real calendar date behind it.
fn is_version_date(s: &str) -> bool {
    s.len() == 10 && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// A fixed-length embedding vector with only finite components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Validate a vector of any non-zero length.
    pub fn new(vector: Vec<f32>) -> Result<Self> {
        if vector.is_empty() {
            bail!("embedding must not be empty");
        }
        if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
            bail!("embedding component {} is not a finite number", pos);
        }
        Ok(Self(vector))
    }

    /// Validate a vector against the model's expected dimensionality.
    pub fn with_dims(vector: Vec<f32>, dims: usize) -> Result<Self> {
        if vector.len() != dims {
            bail!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                dims
            );
        }
        Self::new(vector)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dims(&self) -> usize {
        self.0.len()
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = anyhow::Error;

    fn try_from(vector: Vec<f32>) -> Result<Self> {
        Self::new(vector)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(e: Embedding) -> Self {
        e.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: String,
    pub version: String,
}

/// A contiguous piece of a crawled page, stored in a namespace's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub tenant_id: String,
    pub knowledge_space_id: String,
    pub url: String,
    pub domain: String,
    pub content: String,
    pub embedding: Embedding,
    pub metadata: ChunkMetadata,
    pub crawl_date: DateTime<Utc>,
}

impl Chunk {
    /// Reject chunks that must never be stored (empty content).
    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(
                ChatError::Validation(format!("chunk {} has empty content", self.id)).into(),
            );
        }
        Ok(())
    }
}

/// A chunk matched by similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Similarity score, cosine for the shipped backends (~`[-1, 1]`).
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// One persisted chat turn. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub tenant_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub last_user_message: String,
    pub last_assistant_message: String,
    pub referenced_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub is_rag: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_requires_knowledge_space() {
        let err = Agent::new("t1", "a1", "Support", vec![], false, "").unwrap_err();
        assert!(err.to_string().contains("at least one knowledge space"));

        let agent = Agent::new("t1", "a1", "Support", vec!["ks1".into()], true, "").unwrap();
        assert!(agent.strict_rag);
    }

    #[test]
    fn test_knowledge_space_version_pattern() {
        let urls = vec!["https://example.com".to_string()];
        assert!(KnowledgeSpace::new("t1", "ks1", "Docs", urls.clone(), "2024-03-01").is_ok());
        assert!(KnowledgeSpace::new("t1", "ks1", "Docs", urls.clone(), "2024-3-1").is_err());
        assert!(KnowledgeSpace::new("t1", "ks1", "Docs", urls.clone(), "2024-02-30").is_err());
        assert!(KnowledgeSpace::new("t1", "ks1", "Docs", urls, "v1").is_err());
    }

    #[test]
    fn test_knowledge_space_requires_urls() {
        let err = KnowledgeSpace::new("t1", "ks1", "Docs", vec![], "2024-03-01").unwrap_err();
        assert!(err.to_string().contains("source url"));
    }

    #[test]
    fn test_embedding_validation() {
        assert!(Embedding::new(vec![0.1, 0.2]).is_ok());
        assert!(Embedding::new(vec![]).is_err());
        assert!(Embedding::new(vec![0.1, f32::NAN]).is_err());
        assert!(Embedding::new(vec![f32::INFINITY]).is_err());
        assert!(Embedding::with_dims(vec![0.1, 0.2], 3).is_err());
        assert_eq!(Embedding::with_dims(vec![0.0; 4], 4).unwrap().dims(), 4);
    }

    #[test]
    fn test_embedding_deserialize_rejects_non_finite() {
        let ok: Embedding = serde_json::from_str("[0.5, -0.5]").unwrap();
        assert_eq!(ok.as_slice(), &[0.5, -0.5]);
        assert!(serde_json::from_str::<Embedding>("[]").is_err());
    }

    #[test]
    fn test_role_serde_lowercase() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"hi"}"#).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(
            serde_json::to_string(&ChatMessage::user("q")).unwrap(),
            r#"{"role":"user","content":"q"}"#
        );
    }
}
