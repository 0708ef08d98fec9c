//! Error taxonomy for a chat turn.
//!
//! Functions in this crate return `anyhow::Result`. When a caller needs to
//! tell failure kinds apart (the HTTP layer mapping to status codes, the
//! retry classifier) it looks for a [`ChatError`] in the error chain with
//! [`ChatError::find`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed caller input. Surfaced to the caller, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown agent or knowledge space.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A dependency kept failing after the resilience layer gave up.
    #[error("{service} request failed")]
    ExternalService {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The dependency's circuit breaker rejected the call without trying it.
    #[error("circuit breaker open, skipping call to {dependency}")]
    CircuitOpen { dependency: String },
}

impl ChatError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// First `ChatError` in the chain of `err`, if any.
    pub fn find(err: &anyhow::Error) -> Option<&ChatError> {
        err.chain().find_map(|cause| cause.downcast_ref::<ChatError>())
    }

    /// True for failures the caller caused (validation, unknown ids).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_find_through_context_layers() {
        let err: anyhow::Error = ChatError::not_found("agent", "a1").into();
        let wrapped = Err::<(), _>(err)
            .context("loading agent")
            .context("chat turn")
            .unwrap_err();

        match ChatError::find(&wrapped) {
            Some(ChatError::NotFound { entity, id }) => {
                assert_eq!(*entity, "agent");
                assert_eq!(id, "a1");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_find_none_for_foreign_errors() {
        let err = anyhow::anyhow!("socket closed");
        assert!(ChatError::find(&err).is_none());
    }

    #[test]
    fn test_client_error_kinds() {
        assert!(ChatError::Validation("x".into()).is_client_error());
        assert!(ChatError::not_found("agent", "x").is_client_error());
        assert!(!ChatError::CircuitOpen {
            dependency: "llm".into()
        }
        .is_client_error());
    }
}
