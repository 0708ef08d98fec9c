//! # grounded-chat core
//!
//! Runtime-light logic for grounded-chat: data models, namespace derivation,
//! the resilience layer, retrieval and ranking, the grounded-answer
//! orchestrator, and SSE framing.
//!
//! This crate contains no sqlx, HTTP clients, or filesystem I/O. Every
//! external dependency (embedding model, vector store, LLM, record stores)
//! is reached through the async traits in [`store`], so the pipeline can be
//! exercised end-to-end against [`store::memory`].
//!
//! ```text
//! ChatRequest ──▶ chat::ChatService ──▶ retrieval::retrieve ──▶ EmbeddingService
//!                        │                      └───────────▶ VectorStore (per namespace)
//!                        ├──▶ CompletionService
//!                        ├──▶ ConversationStore
//!                        ▼
//!                  ChatAnswer ──▶ sse::completion_events
//! ```

pub mod chat;
pub mod embedding;
pub mod error;
pub mod guard;
pub mod models;
pub mod namespace;
pub mod resilience;
pub mod retrieval;
pub mod sse;
pub mod store;

pub use error::ChatError;
