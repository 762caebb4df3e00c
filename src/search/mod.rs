pub mod bm25;
pub mod fusion;
pub mod index;
pub mod orchestrator;
pub mod tokenizer;

// Re-export key types for convenience
pub use bm25::{Bm25Index, Bm25Params, IndexDocument, IndexStats, LexicalHit};
pub use fusion::{FusedCandidate, RRF_K};
pub use index::LexicalIndex;
pub use orchestrator::HybridSearcher;

use serde::{Deserialize, Serialize};

use crate::store::Paper;

/// Which channels contributed a fused result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Hybrid,
    LexicalOnly,
    SemanticOnly,
}

/// What happened to one retrieval channel during a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOutcome {
    Used,
    Disabled,
    Failed,
    TimedOut,
}

impl ChannelOutcome {
    /// A channel that was expected to answer but did not.
    pub fn is_degraded(self) -> bool {
        matches!(self, ChannelOutcome::Failed | ChannelOutcome::TimedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub lexical: ChannelOutcome,
    pub semantic: ChannelOutcome,
}

impl ChannelReport {
    pub fn degraded(&self) -> bool {
        self.lexical.is_degraded() || self.semantic.is_degraded()
    }
}

/// Parameters of one hybrid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub size: usize,
    /// Multiplier on the semantic channel's RRF contribution
    pub bert_weight: f64,
    /// Multiplier on the citation signal; >= 1.0 orders by citations alone
    pub citation_weight: f64,
}

impl SearchRequest {
    /// Cache key over the normalized request parameters.
    pub fn cache_key(&self) -> String {
        let normalized = self
            .query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        format!(
            "{}|size={}|bert={}|citation={}",
            normalized, self.size, self.bert_weight, self.citation_weight
        )
    }
}

/// A fused, metadata-resolved result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// 1-based position in the final ordering
    pub position: usize,
    pub document_id: String,
    /// Final ordering score: fusion score plus citation contribution,
    /// or the raw citation count in citation-only mode
    pub hybrid_score: f64,
    /// Weighted RRF score before citation blending
    pub fusion_score: f64,
    pub lexical_rank: usize,
    pub lexical_score: Option<f64>,
    pub semantic_rank: usize,
    pub semantic_distance: Option<f64>,
    pub citation_count: i64,
    pub citation_contribution: f64,
    pub match_source: MatchSource,
    pub paper: Paper,
}

impl SearchHit {
    pub fn from_candidate(candidate: FusedCandidate, paper: Paper) -> Self {
        SearchHit {
            position: 0,
            hybrid_score: candidate.fusion_score,
            fusion_score: candidate.fusion_score,
            document_id: candidate.document_id,
            lexical_rank: candidate.lexical_rank,
            lexical_score: candidate.lexical_score,
            semantic_rank: candidate.semantic_rank,
            semantic_distance: candidate.semantic_distance,
            citation_count: paper.n_citation,
            citation_contribution: 0.0,
            match_source: candidate.match_source,
            paper,
        }
    }
}

/// Ordered search results plus how they were obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub channels: ChannelReport,
    pub degraded: bool,
    pub took_ms: u64,
}

impl SearchResponse {
    pub fn empty(query: &str, channels: ChannelReport) -> Self {
        SearchResponse {
            query: query.to_string(),
            results: Vec::new(),
            degraded: channels.degraded(),
            channels,
            took_ms: 0,
        }
    }
}
