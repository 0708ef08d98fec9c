//! OpenAI chat-completion client.
//!
//! Sends the assembled prompt as a single user message to
//! `POST {url}/v1/chat/completions` and returns the first choice's content.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use grounded_chat_core::store::CompletionService;

use crate::config::CompletionConfig;
use crate::upstream;

pub struct OpenAICompletion {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAICompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &CompletionConfig, api_key: impl Into<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("completion.model required for OpenAI provider"))?;

        Ok(Self {
            client: upstream::client(config.timeout_secs)?,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAICompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": self.temperature,
                "messages": [{ "role": "user", "content": prompt }],
            }));

        let body = upstream::send_json(request).await?;
        parse_completion_response(&body)
    }
}

fn parse_completion_response(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_response() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "こんにちは" }, "finish_reason": "stop" }]
        });
        assert_eq!(parse_completion_response(&body).unwrap(), "こんにちは");
        assert!(parse_completion_response(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_requires_model() {
        let config = CompletionConfig {
            provider: "openai".into(),
            ..CompletionConfig::default()
        };
        assert!(OpenAICompletion::with_api_key(&config, "sk-test").is_err());
    }
}
