//! Resilience decorators for the external collaborators.
//!
//! Each guard wraps an implementation of a collaborator trait and implements
//! the same trait, so the pipeline never knows whether it is talking to a
//! raw client or a guarded one. Every call runs as
//! `retry_with_backoff(|| breaker.execute(|| inner.call()))`, and a failure
//! that survives both is reported as [`ChatError::ExternalService`].

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ChatError;
use crate::models::{Chunk, Embedding, SearchResult};
use crate::namespace::Namespace;
use crate::resilience::{retry_with_backoff, CircuitBreaker, RetryOptions};
use crate::store::{CompletionService, EmbeddingService, VectorStore};

fn external(service: &'static str, err: anyhow::Error) -> anyhow::Error {
    if ChatError::find(&err).is_some() {
        err
    } else {
        ChatError::ExternalService {
            service,
            source: err,
        }
        .into()
    }
}

pub struct GuardedEmbedding<E> {
    inner: E,
    breaker: CircuitBreaker,
    retry: RetryOptions,
}

impl<E: EmbeddingService> GuardedEmbedding<E> {
    pub fn new(inner: E, breaker: CircuitBreaker, retry: RetryOptions) -> Self {
        Self {
            inner,
            breaker,
            retry,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<E: EmbeddingService> EmbeddingService for GuardedEmbedding<E> {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let (inner, breaker) = (&self.inner, &self.breaker);
        retry_with_backoff(
            move || breaker.execute(move || inner.embed(text)),
            &self.retry,
        )
        .await
        .map_err(|e| external("embedding", e))
    }
}

pub struct GuardedVectorStore<V> {
    inner: V,
    breaker: CircuitBreaker,
    retry: RetryOptions,
}

impl<V: VectorStore> GuardedVectorStore<V> {
    pub fn new(inner: V, breaker: CircuitBreaker, retry: RetryOptions) -> Self {
        Self {
            inner,
            breaker,
            retry,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<V: VectorStore> VectorStore for GuardedVectorStore<V> {
    async fn search(
        &self,
        namespace: &Namespace,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let (inner, breaker) = (&self.inner, &self.breaker);
        retry_with_backoff(
            move || breaker.execute(move || inner.search(namespace, query, top_k)),
            &self.retry,
        )
        .await
        .map_err(|e| external("vector store", e))
    }

    async fn upsert(&self, namespace: &Namespace, chunks: &[Chunk]) -> Result<()> {
        let (inner, breaker) = (&self.inner, &self.breaker);
        retry_with_backoff(
            move || breaker.execute(move || inner.upsert(namespace, chunks)),
            &self.retry,
        )
        .await
        .map_err(|e| external("vector store", e))
    }
}

pub struct GuardedCompletion<C> {
    inner: C,
    breaker: CircuitBreaker,
    retry: RetryOptions,
}

impl<C: CompletionService> GuardedCompletion<C> {
    pub fn new(inner: C, breaker: CircuitBreaker, retry: RetryOptions) -> Self {
        Self {
            inner,
            breaker,
            retry,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<C: CompletionService> CompletionService for GuardedCompletion<C> {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let (inner, breaker) = (&self.inner, &self.breaker);
        retry_with_backoff(
            move || breaker.execute(move || inner.complete(prompt)),
            &self.retry,
        )
        .await
        .map_err(|e| external("completion", e))
    }
}
