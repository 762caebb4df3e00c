/// Hybrid search orchestration
///
/// Runs the lexical and semantic channels concurrently, each under its own
/// deadline, fuses whatever came back, resolves paper records, and applies
/// citation blending. A semantic failure or a lexical timeout degrades the
/// search to the remaining channel instead of failing it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::bm25::LexicalHit;
use super::fusion::{blend_citations, fuse};
use super::index::LexicalIndex;
use super::{ChannelOutcome, ChannelReport, SearchHit, SearchRequest, SearchResponse};
use crate::config::SearchConfig;
use crate::errors::ScholarError;
use crate::semantic::{SemanticHit, SemanticSearch};
use crate::store::{Paper, PaperStore};

pub struct HybridSearcher {
    index: Arc<LexicalIndex>,
    semantic: Option<Arc<dyn SemanticSearch>>,
    store: Arc<dyn PaperStore>,
    config: SearchConfig,
}

impl HybridSearcher {
    /// `semantic: None` runs lexical-only searches without marking them degraded.
    pub fn new(
        index: Arc<LexicalIndex>,
        semantic: Option<Arc<dyn SemanticSearch>>,
        store: Arc<dyn PaperStore>,
        config: SearchConfig,
    ) -> Self {
        HybridSearcher { index, semantic, store, config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn semantic_enabled(&self) -> bool {
        self.semantic.is_some()
    }

    pub fn validate(&self, request: &SearchRequest) -> Result<(), ScholarError> {
        if request.size == 0 || request.size > self.config.max_size {
            return Err(ScholarError::validation(
                "size",
                &format!("size must be between 1 and {}", self.config.max_size),
            ));
        }
        if !request.bert_weight.is_finite() || request.bert_weight < 0.0 {
            return Err(ScholarError::validation("bert_weight", "bert_weight must be a finite number >= 0"));
        }
        if !request.citation_weight.is_finite() || request.citation_weight < 0.0 {
            return Err(ScholarError::validation(
                "citation_weight",
                "citation_weight must be a finite number >= 0",
            ));
        }
        Ok(())
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ScholarError> {
        self.validate(request)?;
        let started = Instant::now();

        // Blank and non-blank queries agree on an unbuilt index
        if !self.index.is_ready() {
            return Err(ScholarError::IndexNotReady);
        }

        let query = request.query.trim();
        if query.is_empty() {
            let semantic = if self.semantic.is_some() { ChannelOutcome::Used } else { ChannelOutcome::Disabled };
            return Ok(SearchResponse::empty(
                &request.query,
                ChannelReport { lexical: ChannelOutcome::Used, semantic },
            ));
        }

        let depth = request.size.max(self.config.candidate_pool);
        let (lexical, semantic) = tokio::join!(
            self.lexical_channel(query, depth),
            self.semantic_channel(query, depth)
        );
        let (lexical_outcome, lexical_hits) = lexical?;
        let (semantic_outcome, semantic_hits) = semantic;

        let candidates = fuse(&lexical_hits, &semantic_hits, request.bert_weight, request.size);

        let ids: Vec<String> = candidates.iter().map(|c| c.document_id.clone()).collect();
        let mut papers: HashMap<String, Paper> = self
            .store
            .get_papers(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let mut hits: Vec<SearchHit> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match papers.remove(&candidate.document_id) {
                Some(paper) if !paper.is_stub => hits.push(SearchHit::from_candidate(candidate, paper)),
                Some(_) => {
                    tracing::debug!(paper_id = %candidate.document_id, "Dropping stub paper from results");
                }
                None => {
                    tracing::debug!(paper_id = %candidate.document_id, "Dropping unresolved search candidate");
                }
            }
        }

        blend_citations(&mut hits, request.citation_weight);
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.position = i + 1;
        }

        let channels = ChannelReport { lexical: lexical_outcome, semantic: semantic_outcome };
        let took_ms = started.elapsed().as_millis() as u64;

        if channels.degraded() {
            tracing::warn!(
                lexical = ?channels.lexical,
                semantic = ?channels.semantic,
                results = hits.len(),
                "Search degraded"
            );
        }
        tracing::info!(
            lexical_candidates = lexical_hits.len(),
            semantic_candidates = semantic_hits.len(),
            results = hits.len(),
            took_ms,
            "Hybrid search complete"
        );

        Ok(SearchResponse {
            query: request.query.clone(),
            results: hits,
            degraded: channels.degraded(),
            channels,
            took_ms,
        })
    }

    async fn lexical_channel(
        &self,
        query: &str,
        depth: usize,
    ) -> Result<(ChannelOutcome, Vec<LexicalHit>), ScholarError> {
        let index = Arc::clone(&self.index);
        let query = query.to_string();
        let task = tokio::task::spawn_blocking(move || index.search(&query, depth));

        match tokio::time::timeout(Duration::from_millis(self.config.lexical_timeout_ms), task).await {
            Ok(joined) => Ok((ChannelOutcome::Used, joined??)),
            Err(_) => {
                tracing::warn!(timeout_ms = self.config.lexical_timeout_ms, "Lexical search timed out");
                Ok((ChannelOutcome::TimedOut, Vec::new()))
            }
        }
    }

    async fn semantic_channel(&self, query: &str, depth: usize) -> (ChannelOutcome, Vec<SemanticHit>) {
        let Some(semantic) = &self.semantic else {
            return (ChannelOutcome::Disabled, Vec::new());
        };

        let timeout = Duration::from_millis(self.config.semantic_timeout_ms);
        match tokio::time::timeout(timeout, semantic.query(query, depth)).await {
            Ok(Ok(hits)) => (ChannelOutcome::Used, hits),
            Ok(Err(e)) => {
                tracing::warn!(backend = semantic.name(), error = %e, "Semantic search failed");
                (ChannelOutcome::Failed, Vec::new())
            }
            Err(_) => {
                tracing::warn!(
                    backend = semantic.name(),
                    timeout_ms = self.config.semantic_timeout_ms,
                    "Semantic search timed out"
                );
                (ChannelOutcome::TimedOut, Vec::new())
            }
        }
    }
}
