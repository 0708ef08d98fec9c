//! OpenAI embedding client.
//!
//! Calls `POST {url}/v1/embeddings` for one query at a time. Retry and
//! circuit breaking are not done here: the client is wrapped in
//! [`GuardedEmbedding`](grounded_chat_core::guard::GuardedEmbedding) by
//! [`crate::app::build_chat_service`].
//!
//! Requires the `OPENAI_API_KEY` environment variable.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use grounded_chat_core::models::Embedding;
use grounded_chat_core::store::EmbeddingService;

use crate::config::EmbeddingConfig;
use crate::upstream;

pub struct OpenAIEmbedding {
    client: Client,
    url: String,
    api_key: String,
    /// Model name (e.g. `"text-embedding-3-small"`).
    model: String,
    dims: usize,
}

impl OpenAIEmbedding {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;

        Ok(Self {
            client: upstream::client(config.timeout_secs)?,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model,
            dims,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }
}

#[async_trait]
impl EmbeddingService for OpenAIEmbedding {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": text,
            }));

        let body = upstream::send_json(request).await?;
        let vector = parse_embedding_response(&body)?;
        Embedding::with_dims(vector, self.dims)
    }
}

/// Extract `data[0].embedding` from an embeddings API response.
fn parse_embedding_response(json: &Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data[0].embedding"))?;

    let mut vector = Vec::with_capacity(embedding.len());
    for v in embedding {
        match v.as_f64() {
            Some(f) => vector.push(f as f32),
            None => bail!("Invalid OpenAI response: non-numeric embedding component"),
        }
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding_response() {
        let body = json!({
            "object": "list",
            "data": [{ "object": "embedding", "index": 0, "embedding": [0.25, -0.5, 1.0] }],
            "model": "text-embedding-3-small"
        });
        assert_eq!(parse_embedding_response(&body).unwrap(), vec![0.25, -0.5, 1.0]);
    }

    #[test]
    fn test_parse_rejects_malformed_response() {
        assert!(parse_embedding_response(&json!({ "data": [] })).is_err());
        assert!(parse_embedding_response(&json!({ "data": [{ "embedding": ["x"] }] })).is_err());
    }

    #[test]
    fn test_requires_model_and_dims() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            ..EmbeddingConfig::default()
        };
        assert!(OpenAIEmbedding::with_api_key(&config, "sk-test").is_err());

        let config = EmbeddingConfig {
            provider: "openai".into(),
            model: Some("text-embedding-3-small".into()),
            dims: Some(1536),
            ..EmbeddingConfig::default()
        };
        let client = OpenAIEmbedding::with_api_key(&config, "sk-test").unwrap();
        assert_eq!(client.dims(), 1536);
        assert_eq!(client.model_name(), "text-embedding-3-small");
    }
}
