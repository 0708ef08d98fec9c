//! # Grounded Chat
//!
//! Multi-tenant, retrieval-augmented chat. Each tenant registers knowledge
//! spaces (crawled, versioned collections of pages stored in a vector
//! database) and agents linked to them. A chat turn retrieves the most
//! relevant chunks, asks an LLM to answer from that context only, and
//! returns the answer with its cited URLs, as JSON or an SSE stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────────┐   ┌────────────────┐
//! │   HTTP   │──▶│    ChatService     │──▶│ Embedding API  │
//! │  (axum)  │   │ retrieve → prompt  │   │ Qdrant         │
//! ├──────────┤   │ → complete → save  │   │ Completion API │
//! │   CLI    │──▶│                    │   └────────────────┘
//! │ (gchat)  │   └─────────┬──────────┘    retry + breaker
//! └──────────┘             ▼
//!                    ┌──────────┐
//!                    │  SQLite  │ agents, spaces, conversations
//!                    └──────────┘
//! ```
//!
//! The pipeline itself lives in `grounded-chat-core`; this crate provides the
//! concrete collaborators, configuration, the HTTP server and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`app`] | Builds the chat service from configuration |
//! | [`server`] | OpenAI-compatible HTTP server |
//! | [`embedding`] | OpenAI embedding client |
//! | [`completion`] | OpenAI chat-completion client |
//! | [`qdrant`] | Qdrant vector store client |
//! | [`sqlite_store`] | Agent, knowledge space and conversation records |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | Subscriber setup and structured events |
//! | [`upstream`] | Shared HTTP client and failure classification |
//! | [`admin`], [`chat_cmd`] | CLI command implementations |

pub mod admin;
pub mod app;
pub mod chat_cmd;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod logging;
pub mod migrate;
pub mod qdrant;
pub mod server;
pub mod sqlite_store;
pub mod upstream;
