/// Chroma-backed semantic search
///
/// Embeds the query locally and asks a Chroma server (HTTP v1 API) for the
/// nearest paper vectors. Chroma document ids are paper ids, so hits resolve
/// directly against the paper store. Paper vectors are written through the
/// same collection with `upsert`, embedded by the same provider as queries.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

use super::{SemanticError, SemanticHit, SemanticSearch};
use crate::config::SemanticConfig;
use crate::embedding::EmbeddingProvider;
use crate::store::PaperDocument;

#[derive(Deserialize)]
struct CollectionInfo {
    id: String,
}

/// Shape of a v1 query response. One inner list per query embedding.
#[derive(Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f64>>>,
}

pub struct ChromaSemanticSearch {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    collection_id: OnceCell<String>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl ChromaSemanticSearch {
    pub fn new(config: &SemanticConfig, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        ChromaSemanticSearch {
            client: reqwest::Client::new(),
            base_url: config.chroma_url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            collection_id: OnceCell::new(),
            embedder,
        }
    }

    /// Resolve the collection name to its id once and reuse it.
    async fn collection_id(&self) -> Result<&str, SemanticError> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let url = format!("{}/api/v1/collections/{}", self.base_url, self.collection);
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| SemanticError::Request(e.to_string()))?;
                let info: CollectionInfo = check_status(response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| SemanticError::Malformed(e.to_string()))?;
                tracing::info!(collection = %self.collection, id = %info.id, "Resolved Chroma collection");
                Ok::<_, SemanticError>(info.id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Write vectors to the collection, replacing entries with the same id.
    pub async fn upsert(
        &self,
        ids: &[String],
        embeddings: Vec<Vec<f32>>,
        documents: &[String],
    ) -> Result<(), SemanticError> {
        let body = upsert_body(ids, embeddings, documents)?;
        let collection_id = self.collection_id().await?;

        let url = format!("{}/api/v1/collections/{}/upsert", self.base_url, collection_id);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SemanticError::Request(e.to_string()))?;
        check_status(response).await?;

        tracing::debug!(count = ids.len(), "Chroma upsert complete");
        Ok(())
    }
}

/// Column-oriented upsert payload. Every column must have one entry per id.
fn upsert_body(
    ids: &[String],
    embeddings: Vec<Vec<f32>>,
    documents: &[String],
) -> Result<serde_json::Value, SemanticError> {
    if embeddings.len() != ids.len() || documents.len() != ids.len() {
        return Err(SemanticError::InvalidRequest(format!(
            "{} ids, {} embeddings, {} documents",
            ids.len(),
            embeddings.len(),
            documents.len()
        )));
    }
    Ok(json!({
        "ids": ids,
        "embeddings": embeddings,
        "documents": documents,
    }))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SemanticError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(SemanticError::Api { status: status.as_u16(), message })
}

/// Flatten a query response into ranked hits.
///
/// A missing distance list is tolerated (every hit gets distance 0.0); a
/// distance list whose length disagrees with the id list is not.
fn parse_query_response(body: serde_json::Value) -> Result<Vec<SemanticHit>, SemanticError> {
    let parsed: QueryResponse =
        serde_json::from_value(body).map_err(|e| SemanticError::Malformed(e.to_string()))?;

    let ids = parsed.ids.into_iter().next().unwrap_or_default();
    let distances = match parsed.distances.and_then(|d| d.into_iter().next()) {
        Some(distances) if distances.len() == ids.len() => distances,
        Some(distances) => {
            return Err(SemanticError::Malformed(format!(
                "{} ids but {} distances",
                ids.len(),
                distances.len()
            )))
        }
        None => vec![0.0; ids.len()],
    };

    Ok(ids
        .into_iter()
        .zip(distances)
        .map(|(document_id, distance)| SemanticHit { document_id, distance })
        .collect())
}

#[async_trait]
impl SemanticSearch for ChromaSemanticSearch {
    async fn query(&self, text: &str, desired_count: usize) -> Result<Vec<SemanticHit>, SemanticError> {
        if text.trim().is_empty() || desired_count == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(text).await?;
        let collection_id = self.collection_id().await?;

        let url = format!("{}/api/v1/collections/{}/query", self.base_url, collection_id);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "query_embeddings": [embedding],
                "n_results": desired_count,
                "include": ["distances"],
            }))
            .send()
            .await
            .map_err(|e| SemanticError::Request(e.to_string()))?;

        let body: serde_json::Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SemanticError::Malformed(e.to_string()))?;

        let mut hits = parse_query_response(body)?;
        hits.truncate(desired_count);
        tracing::debug!(hits = hits.len(), "Chroma query complete");
        Ok(hits)
    }

    async fn upsert_documents(&self, documents: &[PaperDocument]) -> Result<usize, SemanticError> {
        if documents.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(documents.len());
        let mut texts = Vec::with_capacity(documents.len());
        let mut embeddings = Vec::with_capacity(documents.len());
        for document in documents {
            let text = document.vector_text();
            embeddings.push(self.embedder.embed(&text).await?);
            ids.push(document.id.clone());
            texts.push(text);
        }

        self.upsert(&ids, embeddings, &texts).await?;
        Ok(ids.len())
    }

    fn name(&self) -> &str {
        "chroma"
    }
}
