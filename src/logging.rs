//! Log subscriber setup and the structured event logger.

use anyhow::{anyhow, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use grounded_chat_core::chat::{RagSearchEvent, RequestEvent, ResponseEvent, StructuredLogger};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `[logging].level` when set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("invalid log level '{}': {}", config.level, e))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {}", e))
}

/// [`StructuredLogger`] that emits one `tracing` event per call, with every
/// field attached, under the `gchat::events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl StructuredLogger for TracingLogger {
    fn log_rag_search(&self, event: &RagSearchEvent) {
        info!(
            target: "gchat::events",
            event = "rag_search",
            request_id = event.request_id.as_deref().unwrap_or("-"),
            tenant_id = %event.tenant_id,
            agent_id = %event.agent_id,
            candidates = event.candidates,
            hit_count = event.hit_count,
            top_urls = ?event.top_urls,
            top_scores = ?event.top_scores,
            threshold = event.threshold,
            "rag search"
        );
    }

    fn log_request(&self, event: &RequestEvent) {
        info!(
            target: "gchat::events",
            event = "request",
            request_id = event.request_id.as_deref().unwrap_or("-"),
            method = %event.method,
            path = %event.path,
            tenant_id = event.tenant_id.as_deref().unwrap_or("-"),
            user_id = event.user_id.as_deref().unwrap_or("-"),
            agent_id = event.agent_id.as_deref().unwrap_or("-"),
            stream = event.stream,
            "request"
        );
    }

    fn log_response(&self, event: &ResponseEvent) {
        info!(
            target: "gchat::events",
            event = "response",
            request_id = event.request_id.as_deref().unwrap_or("-"),
            method = %event.method,
            path = %event.path,
            status = event.status,
            duration_ms = event.duration.as_millis() as u64,
            "response"
        );
    }
}
