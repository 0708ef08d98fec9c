//! One chat turn from the command line.
//!
//! Runs the same pipeline as `POST /v1/chat/completions`. With `--stream`
//! the answer is printed as the SSE frames a streaming client would receive.

use anyhow::Result;

use grounded_chat_core::chat::ChatRequest;
use grounded_chat_core::models::ChatMessage;
use grounded_chat_core::sse::{events_from_pieces, split_with_bounds};

use crate::app::build_chat_service;
use crate::config::Config;
use crate::db;

pub struct ChatArgs {
    pub tenant_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub message: String,
    pub stream: bool,
}

pub async fn run_chat(config: &Config, args: ChatArgs) -> Result<()> {
    let pool = db::connect(config).await?;
    let service = build_chat_service(config, pool.clone())?;

    let answer = service
        .answer(&ChatRequest {
            tenant_id: args.tenant_id,
            user_id: args.user_id,
            agent_id: args.agent_id,
            messages: vec![ChatMessage::user(args.message)],
            request_id: None,
        })
        .await;
    pool.close().await;
    let answer = answer?;

    if args.stream {
        let s = &config.streaming;
        let pieces = split_with_bounds(&answer.answer, s.chunk_size, s.min_chunk_size, s.max_chunk_size);
        let created = chrono::Utc::now().timestamp();
        for event in events_from_pieces(&answer, created, pieces) {
            print!("{}", event.to_frame());
        }
        return Ok(());
    }

    println!("{}", answer.answer);
    if !answer.cited_urls.is_empty() {
        println!();
        println!("Sources:");
        for url in &answer.cited_urls {
            println!("  - {}", url);
        }
    }
    if !answer.grounded {
        println!();
        println!("(no matching context; fallback answer)");
    }
    println!();
    println!("conversation: {}", answer.id);
    Ok(())
}
