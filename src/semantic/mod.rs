/// Semantic retrieval channel
///
/// The vector backend is an external collaborator. This module only defines the
/// contract the hybrid searcher and the vector sync consume, plus a
/// Chroma-backed implementation. Failures here never fail a search: the
/// searcher logs them and continues with lexical results only.

pub mod chroma;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::store::PaperDocument;

/// One semantic match. Lower distance means more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticHit {
    pub document_id: String,
    pub distance: f64,
}

/// Errors surfaced by a semantic backend.
#[derive(Debug, Error)]
pub enum SemanticError {
    /// Query embedding could not be produced
    #[error("Query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Transport-level failure talking to the backend
    #[error("Semantic backend request failed: {0}")]
    Request(String),

    /// Backend returned an HTTP error
    #[error("Semantic backend error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Backend answered with something we could not interpret
    #[error("Malformed semantic backend response: {0}")]
    Malformed(String),

    /// Request we refuse to send, such as mismatched upsert columns
    #[error("Invalid semantic backend request: {0}")]
    InvalidRequest(String),
}

/// Ranked nearest-neighbor lookup over the paper corpus.
///
/// Results are ordered best first. An empty query or a zero count yields an
/// empty list, never an error.
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    async fn query(&self, text: &str, desired_count: usize) -> Result<Vec<SemanticHit>, SemanticError>;

    /// Embed `documents` and store them under their paper ids, replacing any
    /// existing vectors. Returns how many were written.
    async fn upsert_documents(&self, documents: &[PaperDocument]) -> Result<usize, SemanticError>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}
