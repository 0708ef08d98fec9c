//! Retrieval and ranking across an agent's knowledge spaces.
//!
//! # Algorithm
//!
//! 1. Embed the query once.
//! 2. Resolve each knowledge space; unknown ids are logged and skipped.
//! 3. Search every resolved namespace for `top_k` candidates, concurrently.
//! 4. Keep candidates scoring at least `similarity_threshold`.
//! 5. Stable sort by score (desc), truncate to `max_context_chunks`.
//! 6. Cite the context's URLs in rank order, deduplicated, truncated to
//!    `max_cited_urls`.
//!
//! Because candidates are merged and re-sorted after every search has
//! finished, the order in which the per-namespace searches complete does not
//! affect the result.

use anyhow::Result;
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::SearchResult;
use crate::store::{EmbeddingService, KnowledgeSpaceStore, VectorStore};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalParams {
    /// Minimum similarity score for a chunk to enter the context.
    pub similarity_threshold: f64,
    /// Candidates fetched per knowledge space.
    pub top_k: usize,
    pub max_context_chunks: usize,
    pub max_cited_urls: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.35,
            top_k: 8,
            max_context_chunks: 5,
            max_cited_urls: 3,
        }
    }
}

/// Bundles all inputs for a single retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    pub tenant_id: &'a str,
    /// The agent's knowledge spaces, in the agent's order.
    pub knowledge_space_ids: &'a [String],
    /// Text of the latest user message.
    pub query: &'a str,
    pub params: &'a RetrievalParams,
}

#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// Ranked context, best first.
    pub context: Vec<SearchResult>,
    pub cited_urls: Vec<String>,
    /// Candidates returned by all searches before filtering.
    pub candidates: usize,
}

/// Run retrieval for one chat turn.
///
/// A knowledge space that cannot be found is skipped. Embedding and vector
/// store failures are returned to the caller.
pub async fn retrieve(
    embedder: &dyn EmbeddingService,
    vectors: &dyn VectorStore,
    spaces: &dyn KnowledgeSpaceStore,
    req: &RetrievalRequest<'_>,
) -> Result<Retrieval> {
    let query_vec = embedder.embed(req.query).await?;

    let mut namespaces = Vec::with_capacity(req.knowledge_space_ids.len());
    for ks_id in req.knowledge_space_ids {
        match spaces.find_knowledge_space(req.tenant_id, ks_id).await? {
            Some(space) => namespaces.push(space.namespace()),
            None => warn!(
                tenant_id = %req.tenant_id,
                knowledge_space_id = %ks_id,
                "knowledge space not found, skipping"
            ),
        }
    }

    let searches = namespaces
        .iter()
        .map(|ns| vectors.search(ns, &query_vec, req.params.top_k));
    let per_namespace = try_join_all(searches).await?;

    let candidates: Vec<SearchResult> = per_namespace.into_iter().flatten().collect();
    let candidate_count = candidates.len();

    let context = rank_results(candidates, req.params);
    let cited_urls = cited_urls(&context, req.params.max_cited_urls);

    debug!(
        namespaces = namespaces.len(),
        candidates = candidate_count,
        context = context.len(),
        "retrieval complete"
    );

    Ok(Retrieval {
        context,
        cited_urls,
        candidates: candidate_count,
    })
}

/// Filter by threshold, stable-sort descending by score, cap the length.
pub fn rank_results(results: Vec<SearchResult>, params: &RetrievalParams) -> Vec<SearchResult> {
    let mut kept: Vec<SearchResult> = results
        .into_iter()
        .filter(|r| r.score >= params.similarity_threshold)
        .collect();
    kept.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    kept.truncate(params.max_context_chunks);
    kept
}

/// URLs of `context` in rank order, first occurrence only, at most `max`.
pub fn cited_urls(context: &[SearchResult], max: usize) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for r in context {
        if urls.len() >= max {
            break;
        }
        if !urls.iter().any(|u| u == &r.chunk.url) {
            urls.push(r.chunk.url.clone());
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata, Embedding, KnowledgeSpace};
    use crate::namespace::Namespace;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;

    fn result(url: &str, score: f64) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                id: format!("{}#{}", url, score),
                tenant_id: "t1".into(),
                knowledge_space_id: "ks1".into(),
                url: url.into(),
                domain: "example.com".into(),
                content: format!("text from {}", url),
                embedding: Embedding::new(vec![1.0]).unwrap(),
                metadata: ChunkMetadata {
                    title: url.into(),
                    version: "2024-01-01".into(),
                },
                crawl_date: Utc::now(),
            },
            score,
        }
    }

    fn urls(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.url.as_str()).collect()
    }

    #[test]
    fn test_rank_filters_sorts_and_caps() {
        let params = RetrievalParams::default();
        let input = vec![
            result("a", 0.40),
            result("b", 0.34),
            result("c", 0.90),
            result("d", 0.35),
            result("e", 0.70),
            result("f", 0.50),
            result("g", 0.60),
        ];
        let ranked = rank_results(input, &params);
        assert_eq!(urls(&ranked), vec!["c", "e", "g", "f", "a"]);
        assert!(ranked.iter().all(|r| r.score >= 0.35));
    }

    #[test]
    fn test_rank_threshold_is_inclusive() {
        let ranked = rank_results(vec![result("edge", 0.35)], &RetrievalParams::default());
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn test_rank_is_stable_for_ties() {
        let ranked = rank_results(
            vec![result("first", 0.5), result("second", 0.5), result("third", 0.5)],
            &RetrievalParams::default(),
        );
        assert_eq!(urls(&ranked), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_out_of_window_scores_do_not_change_context() {
        let params = RetrievalParams {
            max_context_chunks: 2,
            ..RetrievalParams::default()
        };
        let base = vec![result("a", 0.9), result("b", 0.8), result("c", 0.5)];
        let bumped = vec![result("a", 0.9), result("b", 0.8), result("c", 0.7)];
        assert_eq!(
            urls(&rank_results(base, &params)),
            urls(&rank_results(bumped, &params))
        );
    }

    #[test]
    fn test_citations_dedup_in_rank_order() {
        let context = vec![result("A", 0.9), result("A", 0.8), result("B", 0.6)];
        assert_eq!(cited_urls(&context, 3), vec!["A", "B"]);
    }

    #[test]
    fn test_citations_capped() {
        let context = vec![
            result("A", 0.9),
            result("B", 0.8),
            result("C", 0.7),
            result("D", 0.6),
        ];
        assert_eq!(cited_urls(&context, 3), vec!["A", "B", "C"]);
        assert!(cited_urls(&[], 3).is_empty());
    }

    struct FixedEmbedding(Vec<f32>);

    #[async_trait]
    impl EmbeddingService for FixedEmbedding {
        async fn embed(&self, _text: &str) -> Result<Embedding> {
            Embedding::new(self.0.clone())
        }
    }

    fn stored_chunk(ks: &str, url: &str, vector: Vec<f32>) -> Chunk {
        let mut c = result(url, 0.0).chunk;
        c.id = format!("{}-{}", ks, url);
        c.knowledge_space_id = ks.into();
        c.embedding = Embedding::new(vector).unwrap();
        c
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        for ks in ["docs", "faq"] {
            store.add_knowledge_space(
                KnowledgeSpace::new("t1", ks, ks, vec![format!("https://{}.test", ks)], "2024-05-01")
                    .unwrap(),
            );
        }
        store
            .upsert(
                &Namespace::new("t1", "docs", "2024-05-01"),
                &[
                    stored_chunk("docs", "https://docs.test/a", vec![1.0, 0.0]),
                    stored_chunk("docs", "https://docs.test/b", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
            .upsert(
                &Namespace::new("t1", "faq", "2024-05-01"),
                &[stored_chunk("faq", "https://faq.test/q", vec![0.8, 0.6])],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_retrieve_merges_namespaces_and_skips_missing() {
        let store = seeded_store().await;
        let embedder = FixedEmbedding(vec![1.0, 0.0]);
        let ks_ids = vec!["docs".to_string(), "missing".to_string(), "faq".to_string()];
        let params = RetrievalParams::default();

        let retrieval = retrieve(
            &embedder,
            &store,
            &store,
            &RetrievalRequest {
                tenant_id: "t1",
                knowledge_space_ids: &ks_ids,
                query: "how do I start?",
                params: &params,
            },
        )
        .await
        .unwrap();

        assert_eq!(retrieval.candidates, 3);
        assert_eq!(
            urls(&retrieval.context),
            vec!["https://docs.test/a", "https://faq.test/q"]
        );
        assert_eq!(
            retrieval.cited_urls,
            vec!["https://docs.test/a", "https://faq.test/q"]
        );
    }

    #[tokio::test]
    async fn test_retrieve_other_tenant_sees_nothing() {
        let store = seeded_store().await;
        let embedder = FixedEmbedding(vec![1.0, 0.0]);
        let ks_ids = vec!["docs".to_string()];
        let params = RetrievalParams::default();

        let retrieval = retrieve(
            &embedder,
            &store,
            &store,
            &RetrievalRequest {
                tenant_id: "t2",
                knowledge_space_ids: &ks_ids,
                query: "q",
                params: &params,
            },
        )
        .await
        .unwrap();

        assert!(retrieval.context.is_empty());
        assert_eq!(retrieval.candidates, 0);
    }
}
