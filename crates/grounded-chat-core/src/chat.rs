//! Grounded-answer orchestrator.
//!
//! [`ChatService::answer`] runs one chat turn:
//!
//! 1. Load the agent (unknown agent → [`ChatError::NotFound`]).
//! 2. Pick the latest `user` message (none → [`ChatError::Validation`]).
//! 3. Retrieve ranked context from the agent's knowledge spaces.
//! 4. Strict agents with an empty context answer [`NO_INFO_MESSAGE`] without
//!    calling the LLM.
//! 5. Otherwise build the context block and prompt, call the completion
//!    service once, and return its answer with the cited URLs.
//!
//! Both paths persist exactly one [`Conversation`]. Collaborator errors are
//! propagated unchanged.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::{ChatMessage, Conversation, Role, SearchResult};
use crate::retrieval::{retrieve, Retrieval, RetrievalParams, RetrievalRequest};
use crate::store::{
    AgentStore, CompletionService, ConversationStore, EmbeddingService, KnowledgeSpaceStore,
    VectorStore,
};

/// Fixed answer of a strict agent when nothing relevant was retrieved.
pub const NO_INFO_MESSAGE: &str = "このサイトには情報がありませんでした。";

const USER_MESSAGE_PREVIEW_CHARS: usize = 200;
const PROMPT_PREVIEW_CHARS: usize = 500;

/// One chat turn as received from an authenticated caller.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub tenant_id: String,
    pub user_id: String,
    pub agent_id: String,
    /// Full message history, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Correlation id for logs, if the caller has one.
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatAnswer {
    /// Conversation id, `conv_{unix_millis}_{suffix}`.
    pub id: String,
    /// The agent id.
    pub model: String,
    /// False only for the strict-agent fallback.
    pub grounded: bool,
    pub answer: String,
    pub cited_urls: Vec<String>,
}

/// RAG search outcome for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct RagSearchEvent {
    pub request_id: Option<String>,
    pub tenant_id: String,
    pub agent_id: String,
    pub candidates: usize,
    pub hit_count: usize,
    pub top_urls: Vec<String>,
    pub top_scores: Vec<f64>,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestEvent {
    pub request_id: Option<String>,
    pub method: String,
    pub path: String,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseEvent {
    pub request_id: Option<String>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration: Duration,
}

/// Sink for structured request, response and retrieval events.
pub trait StructuredLogger: Send + Sync {
    fn log_rag_search(&self, event: &RagSearchEvent);
    fn log_request(&self, event: &RequestEvent);
    fn log_response(&self, event: &ResponseEvent);
}

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct ChatCollaborators {
    pub agents: Arc<dyn AgentStore>,
    pub spaces: Arc<dyn KnowledgeSpaceStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub completion: Arc<dyn CompletionService>,
}

pub struct ChatService {
    deps: ChatCollaborators,
    params: RetrievalParams,
    structured_logger: Option<Arc<dyn StructuredLogger>>,
}

impl ChatService {
    pub fn new(deps: ChatCollaborators, params: RetrievalParams) -> Self {
        Self {
            deps,
            params,
            structured_logger: None,
        }
    }

    pub fn with_structured_logger(mut self, logger: Arc<dyn StructuredLogger>) -> Self {
        self.structured_logger = Some(logger);
        self
    }

    pub fn structured_logger(&self) -> Option<&Arc<dyn StructuredLogger>> {
        self.structured_logger.as_ref()
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Answer one chat turn.
    pub async fn answer(&self, req: &ChatRequest) -> Result<ChatAnswer> {
        let agent = self
            .deps
            .agents
            .find_agent(&req.tenant_id, &req.agent_id)
            .await?
            .ok_or_else(|| ChatError::not_found("agent", &req.agent_id))?;

        let user_message = last_user_message(&req.messages)?;

        info!(
            tenant_id = %req.tenant_id,
            agent_id = %req.agent_id,
            user_id = %req.user_id,
            request_id = req.request_id.as_deref().unwrap_or("-"),
            user_message = %preview(user_message, USER_MESSAGE_PREVIEW_CHARS),
            "processing chat request"
        );

        let retrieval = retrieve(
            self.deps.embedder.as_ref(),
            self.deps.vectors.as_ref(),
            self.deps.spaces.as_ref(),
            &RetrievalRequest {
                tenant_id: &req.tenant_id,
                knowledge_space_ids: &agent.knowledge_space_ids,
                query: user_message,
                params: &self.params,
            },
        )
        .await?;

        self.log_rag_search(req, &retrieval);

        if agent.strict_rag && retrieval.context.is_empty() {
            let conversation = new_conversation(req, user_message, NO_INFO_MESSAGE, Vec::new(), false);
            self.deps.conversations.save(&conversation).await?;
            info!(
                tenant_id = %req.tenant_id,
                agent_id = %req.agent_id,
                conversation_id = %conversation.conversation_id,
                "no context for strict agent, returning fallback"
            );
            return Ok(ChatAnswer {
                id: conversation.conversation_id,
                model: req.agent_id.clone(),
                grounded: false,
                answer: NO_INFO_MESSAGE.to_string(),
                cited_urls: Vec::new(),
            });
        }

        let context = build_context_markdown(&retrieval.context);
        let prompt = build_prompt(&context, &req.messages, user_message);
        debug!(
            tenant_id = %req.tenant_id,
            agent_id = %req.agent_id,
            prompt_len = prompt.chars().count(),
            prompt = %preview(&prompt, PROMPT_PREVIEW_CHARS),
            "prompt constructed"
        );

        let answer = self.deps.completion.complete(&prompt).await?;

        let conversation = new_conversation(
            req,
            user_message,
            &answer,
            retrieval.cited_urls.clone(),
            true,
        );
        self.deps.conversations.save(&conversation).await?;

        Ok(ChatAnswer {
            id: conversation.conversation_id,
            model: req.agent_id.clone(),
            grounded: true,
            answer,
            cited_urls: retrieval.cited_urls,
        })
    }

    fn log_rag_search(&self, req: &ChatRequest, retrieval: &Retrieval) {
        let top = &retrieval.context[..retrieval.context.len().min(3)];
        let event = RagSearchEvent {
            request_id: req.request_id.clone(),
            tenant_id: req.tenant_id.clone(),
            agent_id: req.agent_id.clone(),
            candidates: retrieval.candidates,
            hit_count: retrieval.context.len(),
            top_urls: top.iter().map(|r| r.chunk.url.clone()).collect(),
            top_scores: top.iter().map(|r| r.score).collect(),
            threshold: self.params.similarity_threshold,
        };
        match &self.structured_logger {
            Some(logger) => logger.log_rag_search(&event),
            None => debug!(
                tenant_id = %event.tenant_id,
                agent_id = %event.agent_id,
                hit_count = event.hit_count,
                top_urls = ?event.top_urls,
                top_scores = ?event.top_scores,
                "rag search completed"
            ),
        }
    }
}

fn last_user_message(messages: &[ChatMessage]) -> Result<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .ok_or_else(|| ChatError::Validation("no user message found".into()).into())
}

fn new_conversation(
    req: &ChatRequest,
    user_message: &str,
    assistant_message: &str,
    referenced_urls: Vec<String>,
    is_rag: bool,
) -> Conversation {
    Conversation {
        conversation_id: conversation_id(),
        tenant_id: req.tenant_id.clone(),
        agent_id: req.agent_id.clone(),
        user_id: req.user_id.clone(),
        last_user_message: user_message.to_string(),
        last_assistant_message: assistant_message.to_string(),
        referenced_urls,
        created_at: Utc::now(),
        is_rag,
    }
}

/// `conv_{unix_millis}_{9 hex chars}`.
pub fn conversation_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("conv_{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
}

/// Numbered markdown references, one per context chunk.
pub fn build_context_markdown(context: &[SearchResult]) -> String {
    let mut markdown = String::from("# Context Documents (DO NOT DISCARD)\n\n");
    for (i, r) in context.iter().enumerate() {
        markdown.push_str(&format!(
            "{}. [{}]({})\n{}\n\n",
            i + 1,
            r.chunk.metadata.title,
            r.chunk.url,
            r.chunk.content
        ));
    }
    markdown
}

pub fn build_prompt(context_markdown: &str, history: &[ChatMessage], latest_user_message: &str) -> String {
    let history = history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "SYSTEM: あなたは公式サポートAIです。
与えられたコンテキストの範囲内のみで回答してください。
コンテキストに情報がない場合は、必ず次のように答えてください：
「{no_info}」

AGENT POLICY:
- 丁寧なビジネス口調で回答してください。
- 推測で回答しないでください。
- 箇条書きが有効な場合は箇条書きを利用してください。

CONTEXT:
{context_markdown}

CONVERSATION HISTORY:
{history}

USER: {latest_user_message}

TASK: 上記のCONTEXTの情報だけに基づいて、ユーザーの質問に日本語で回答してください。",
        no_info = NO_INFO_MESSAGE,
    )
}

/// First `max_chars` code points of `text`, with `...` appended if cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Agent, Chunk, ChunkMetadata, Embedding, KnowledgeSpace};
    use crate::namespace::Namespace;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedEmbedding;

    #[async_trait]
    impl EmbeddingService for FixedEmbedding {
        async fn embed(&self, _text: &str) -> Result<Embedding> {
            Embedding::new(vec![1.0, 0.0])
        }
    }

    #[derive(Default)]
    struct RecordingCompletion {
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingCompletion {
        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionService for RecordingCompletion {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("grounded answer".into())
        }
    }

    #[derive(Default)]
    struct RecordingLogger {
        searches: Mutex<Vec<RagSearchEvent>>,
    }

    impl StructuredLogger for RecordingLogger {
        fn log_rag_search(&self, event: &RagSearchEvent) {
            self.searches.lock().unwrap().push(event.clone());
        }
        fn log_request(&self, _event: &RequestEvent) {}
        fn log_response(&self, _event: &ResponseEvent) {}
    }

    fn chunk(url: &str, title: &str, vector: Vec<f32>) -> Chunk {
        Chunk {
            id: format!("{}-{}", url, vector[1]),
            tenant_id: "acme".into(),
            knowledge_space_id: "docs".into(),
            url: url.into(),
            domain: "acme.test".into(),
            content: format!("body of {}", title),
            embedding: Embedding::new(vector).unwrap(),
            metadata: ChunkMetadata {
                title: title.into(),
                version: "2024-05-01".into(),
            },
            crawl_date: Utc::now(),
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        completion: Arc<RecordingCompletion>,
        service: ChatService,
    }

    async fn fixture(strict: bool, with_chunks: bool) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        store.add_agent(
            Agent::new("acme", "helper", "Helper", vec!["docs".into()], strict, "").unwrap(),
        );
        store.add_knowledge_space(
            KnowledgeSpace::new(
                "acme",
                "docs",
                "Docs",
                vec!["https://acme.test".into()],
                "2024-05-01",
            )
            .unwrap(),
        );
        if with_chunks {
            store
                .upsert(
                    &Namespace::new("acme", "docs", "2024-05-01"),
                    &[
                        chunk("https://acme.test/a", "Setup", vec![1.0, 0.0]),
                        chunk("https://acme.test/a", "Setup (cont.)", vec![0.9, 0.3]),
                        chunk("https://acme.test/b", "Billing", vec![0.6, 0.7]),
                        chunk("https://acme.test/c", "Unrelated", vec![0.0, 1.0]),
                    ],
                )
                .await
                .unwrap();
        }

        let completion = Arc::new(RecordingCompletion::default());
        let service = ChatService::new(
            ChatCollaborators {
                agents: store.clone(),
                spaces: store.clone(),
                conversations: store.clone(),
                vectors: store.clone(),
                embedder: Arc::new(FixedEmbedding),
                completion: completion.clone(),
            },
            RetrievalParams::default(),
        );
        Fixture {
            store,
            completion,
            service,
        }
    }

    struct FailingVectors;

    #[async_trait]
    impl VectorStore for FailingVectors {
        async fn search(
            &self,
            _namespace: &Namespace,
            _query: &Embedding,
            _top_k: usize,
        ) -> Result<Vec<SearchResult>> {
            Err(anyhow::anyhow!("vector store unavailable"))
        }

        async fn upsert(&self, _namespace: &Namespace, _chunks: &[Chunk]) -> Result<()> {
            Err(anyhow::anyhow!("vector store unavailable"))
        }
    }

    struct FailingEmbedding;

    #[async_trait]
    impl EmbeddingService for FailingEmbedding {
        async fn embed(&self, _text: &str) -> Result<Embedding> {
            Err(anyhow::anyhow!("embedding provider unavailable"))
        }
    }

    struct FailingCompletion;

    #[async_trait]
    impl CompletionService for FailingCompletion {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Err(anyhow::anyhow!("completion provider unavailable"))
        }
    }

    /// Service over the seeded fixture store with the given providers swapped
    /// in. `vectors: None` searches the fixture store itself.
    async fn service_with(
        vectors: Option<Arc<dyn VectorStore>>,
        embedder: Arc<dyn EmbeddingService>,
        completion: Arc<dyn CompletionService>,
    ) -> (Arc<InMemoryStore>, ChatService) {
        let store = fixture(false, true).await.store;
        let vectors = vectors.unwrap_or_else(|| store.clone() as Arc<dyn VectorStore>);
        let service = ChatService::new(
            ChatCollaborators {
                agents: store.clone(),
                spaces: store.clone(),
                conversations: store.clone(),
                vectors,
                embedder,
                completion,
            },
            RetrievalParams::default(),
        );
        (store, service)
    }

    fn request(messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            tenant_id: "acme".into(),
            user_id: "u1".into(),
            agent_id: "helper".into(),
            messages,
            request_id: Some("req-1".into()),
        }
    }

    #[tokio::test]
    async fn test_grounded_answer_cites_deduplicated_urls() {
        let fx = fixture(false, true).await;
        let answer = fx
            .service
            .answer(&request(vec![ChatMessage::user("How do I set up?")]))
            .await
            .unwrap();

        assert!(answer.grounded);
        assert_eq!(answer.model, "helper");
        assert_eq!(answer.answer, "grounded answer");
        assert_eq!(
            answer.cited_urls,
            vec!["https://acme.test/a", "https://acme.test/b"]
        );
        assert!(answer.id.starts_with("conv_"));

        let saved = fx.store.conversations();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].is_rag);
        assert_eq!(saved[0].conversation_id, answer.id);
        assert_eq!(saved[0].referenced_urls, answer.cited_urls);
        assert_eq!(saved[0].last_user_message, "How do I set up?");
    }

    #[tokio::test]
    async fn test_strict_fallback_skips_completion() {
        let fx = fixture(true, false).await;
        let answer = fx
            .service
            .answer(&request(vec![ChatMessage::user("Anything?")]))
            .await
            .unwrap();

        assert!(!answer.grounded);
        assert_eq!(answer.answer, NO_INFO_MESSAGE);
        assert!(answer.cited_urls.is_empty());
        assert!(fx.completion.prompts().is_empty());

        let saved = fx.store.conversations();
        assert_eq!(saved.len(), 1);
        assert!(!saved[0].is_rag);
        assert_eq!(saved[0].last_assistant_message, NO_INFO_MESSAGE);
    }

    #[tokio::test]
    async fn test_lenient_agent_answers_without_context() {
        let fx = fixture(false, false).await;
        let answer = fx
            .service
            .answer(&request(vec![ChatMessage::user("Anything?")]))
            .await
            .unwrap();

        assert!(answer.grounded);
        assert!(answer.cited_urls.is_empty());
        assert_eq!(fx.completion.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_prompt_contains_context_and_history() {
        let fx = fixture(false, true).await;
        fx.service
            .answer(&request(vec![
                ChatMessage::system("be nice"),
                ChatMessage::user("first question"),
                ChatMessage::assistant("first answer"),
                ChatMessage::user("How do I set up?"),
            ]))
            .await
            .unwrap();

        let prompts = fx.completion.prompts();
        let prompt = &prompts[0];
        assert!(prompt.contains("# Context Documents (DO NOT DISCARD)"));
        assert!(prompt.contains("1. [Setup](https://acme.test/a)\nbody of Setup\n"));
        assert!(prompt.contains("SYSTEM: be nice\nUSER: first question\nASSISTANT: first answer\nUSER: How do I set up?"));
        assert!(prompt.contains("\n\nUSER: How do I set up?\n\nTASK:"));
        assert!(!prompt.contains("Unrelated"));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_found() {
        let fx = fixture(false, true).await;
        let mut req = request(vec![ChatMessage::user("hi")]);
        req.agent_id = "ghost".into();

        let err = fx.service.answer(&req).await.unwrap_err();
        assert!(matches!(
            ChatError::find(&err),
            Some(ChatError::NotFound { entity: "agent", .. })
        ));
        assert!(fx.store.conversations().is_empty());
    }

    #[tokio::test]
    async fn test_missing_user_message_is_validation_error() {
        let fx = fixture(false, true).await;
        let err = fx
            .service
            .answer(&request(vec![ChatMessage::assistant("hello")]))
            .await
            .unwrap_err();
        assert!(matches!(
            ChatError::find(&err),
            Some(ChatError::Validation(_))
        ));
        assert!(fx.completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_structured_logger_receives_rag_search() {
        let fx = fixture(false, true).await;
        let logger = Arc::new(RecordingLogger::default());
        let service = fx.service.with_structured_logger(logger.clone());

        service
            .answer(&request(vec![ChatMessage::user("setup")]))
            .await
            .unwrap();

        let searches = logger.searches.lock().unwrap();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].request_id.as_deref(), Some("req-1"));
        assert_eq!(searches[0].hit_count, 3);
        assert_eq!(searches[0].candidates, 4);
        assert_eq!(searches[0].top_urls[0], "https://acme.test/a");
        assert!((searches[0].threshold - 0.35).abs() < f64::EPSILON);
    }

    #[test]
    fn test_conversation_id_shape() {
        let id = conversation_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "conv");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_preview_counts_code_points() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("あいうえお", 3), "あいう...");
        assert_eq!(preview("abc", 3), "abc");
    }

    #[tokio::test]
    async fn test_vector_store_failure_fails_turn_without_saving() {
        let (store, service) = service_with(
            Some(Arc::new(FailingVectors) as Arc<dyn VectorStore>),
            Arc::new(FixedEmbedding),
            Arc::new(RecordingCompletion::default()),
        )
        .await;

        let err = service
            .answer(&request(vec![ChatMessage::user("How do I set up?")]))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("vector store unavailable"));
        assert!(store.conversations().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_fails_turn_without_saving() {
        let completion = Arc::new(RecordingCompletion::default());
        let (store, service) = service_with(
            None,
            Arc::new(FailingEmbedding),
            completion.clone(),
        )
        .await;

        let err = service
            .answer(&request(vec![ChatMessage::user("How do I set up?")]))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("embedding provider unavailable"));
        assert!(completion.prompts().is_empty());
        assert!(store.conversations().is_empty());
    }

    #[tokio::test]
    async fn test_completion_failure_fails_turn_without_saving() {
        let (store, service) = service_with(
            None,
            Arc::new(FixedEmbedding),
            Arc::new(FailingCompletion),
        )
        .await;

        let err = service
            .answer(&request(vec![ChatMessage::user("How do I set up?")]))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("completion provider unavailable"));
        assert!(store.conversations().is_empty());
    }
}
