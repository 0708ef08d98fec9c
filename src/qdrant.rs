//! Qdrant REST vector store.
//!
//! One Qdrant collection per [`Namespace`]. Collections are created on first
//! upsert with the configured dimensionality and cosine distance; searching a
//! collection that does not exist yet returns no results.
//!
//! Point payloads use camelCase keys:
//!
//! ```json
//! { "chunkId": "..", "tenantId": "..", "knowledgeSpaceId": "..", "url": "..",
//!   "domain": "..", "crawlDate": "2024-05-01T00:00:00Z", "content": "..",
//!   "metadata": { "title": "..", "version": "2024-05-01" } }
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use grounded_chat_core::models::{Chunk, ChunkMetadata, Embedding, SearchResult};
use grounded_chat_core::namespace::Namespace;
use grounded_chat_core::resilience::CallError;
use grounded_chat_core::store::VectorStore;

use crate::config::VectorStoreConfig;
use crate::upstream;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkPayload {
    chunk_id: String,
    tenant_id: String,
    knowledge_space_id: String,
    url: String,
    domain: String,
    crawl_date: DateTime<Utc>,
    content: String,
    metadata: ChunkMetadata,
}

impl From<&Chunk> for ChunkPayload {
    fn from(c: &Chunk) -> Self {
        Self {
            chunk_id: c.id.clone(),
            tenant_id: c.tenant_id.clone(),
            knowledge_space_id: c.knowledge_space_id.clone(),
            url: c.url.clone(),
            domain: c.domain.clone(),
            crawl_date: c.crawl_date,
            content: c.content.clone(),
            metadata: c.metadata.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f64,
    payload: ChunkPayload,
    vector: Vec<f32>,
}

pub struct QdrantStore {
    client: Client,
    url: String,
    api_key: Option<String>,
    dims: usize,
}

impl QdrantStore {
    /// `QDRANT_API_KEY` is sent as the `api-key` header when set.
    pub fn new(config: &VectorStoreConfig, dims: usize) -> Result<Self> {
        Ok(Self {
            client: upstream::client(config.timeout_secs)?,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
            dims,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let req = self.client.request(method, format!("{}{}", self.url, path));
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    /// Create the namespace's collection if it does not exist.
    pub async fn ensure_collection(&self, namespace: &Namespace) -> Result<()> {
        let path = format!("/collections/{}", namespace);
        match upstream::send_json(self.request(reqwest::Method::GET, &path)).await {
            Ok(_) => return Ok(()),
            Err(err) if is_not_found(&err) => {}
            Err(err) => return Err(err),
        }

        debug!(collection = %namespace, size = self.dims, "creating qdrant collection");
        upstream::send_json(self.request(reqwest::Method::PUT, &path).json(&json!({
            "vectors": { "size": self.dims, "distance": "Cosine" }
        })))
        .await?;
        Ok(())
    }

    /// Drop the namespace's collection. A collection that is already gone is
    /// not an error.
    pub async fn delete_collection(&self, namespace: &Namespace) -> Result<()> {
        let path = format!("/collections/{}", namespace);
        match upstream::send_json(self.request(reqwest::Method::DELETE, &path)).await {
            Ok(_) => {
                debug!(collection = %namespace, "deleted qdrant collection");
                Ok(())
            }
            Err(err) if is_not_found(&err) => {
                debug!(collection = %namespace, "qdrant collection already absent");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<CallError>(),
        Some(CallError::Status { status: 404, .. })
    )
}

fn parse_search_response(body: &Value) -> Result<Vec<SearchResult>> {
    let points: Vec<ScoredPoint> = serde_json::from_value(
        body.get("result")
            .cloned()
            .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result"))?,
    )
    .context("Invalid Qdrant response: malformed points")?;

    points
        .into_iter()
        .filter(|p| {
            let keep = !p.payload.content.trim().is_empty();
            if !keep {
                warn!(chunk_id = %p.payload.chunk_id, "skipping stored point with empty content");
            }
            keep
        })
        .map(|p| {
            Ok(SearchResult {
                score: p.score,
                chunk: Chunk {
                    id: p.payload.chunk_id,
                    tenant_id: p.payload.tenant_id,
                    knowledge_space_id: p.payload.knowledge_space_id,
                    url: p.payload.url,
                    domain: p.payload.domain,
                    content: p.payload.content,
                    embedding: Embedding::new(p.vector)?,
                    metadata: p.payload.metadata,
                    crawl_date: p.payload.crawl_date,
                },
            })
        })
        .collect()
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn search(
        &self,
        namespace: &Namespace,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let path = format!("/collections/{}/points/search", namespace);
        let request = self.request(reqwest::Method::POST, &path).json(&json!({
            "vector": query.as_slice(),
            "limit": top_k,
            "with_payload": true,
            "with_vector": true,
        }));

        let body = match upstream::send_json(request).await {
            Ok(body) => body,
            Err(err) if is_not_found(&err) => {
                debug!(collection = %namespace, "collection does not exist yet");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let results = parse_search_response(&body)?;
        debug!(collection = %namespace, results = results.len(), "qdrant search");
        Ok(results)
    }

    async fn upsert(&self, namespace: &Namespace, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            chunk.validate()?;
        }
        self.ensure_collection(namespace).await?;

        let points: Vec<Value> = chunks
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "vector": c.embedding.as_slice(),
                    "payload": ChunkPayload::from(c),
                })
            })
            .collect();

        let path = format!("/collections/{}/points?wait=true", namespace);
        upstream::send_json(
            self.request(reqwest::Method::PUT, &path)
                .json(&json!({ "points": points })),
        )
        .await?;

        debug!(collection = %namespace, chunks = chunks.len(), "qdrant upsert");
        Ok(())
    }
}
