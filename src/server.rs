use rmcp::{
    ServerHandler,
    tool,
    model::{ServerCapabilities, Implementation, ProtocolVersion, CallToolResult},
    handler::server::wrapper::Parameters,
    ErrorData as McpError,
};
use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::Catalog;
use crate::errors::ScholarError;
use crate::search::SearchRequest;
use crate::store::{CreatePaper, Paper, UpdatePaper};

pub struct CatalogService {
    catalog: Arc<Catalog>,
    start_time: Instant,
}

impl CatalogService {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// Parameter structs

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SearchPapersParams {
    /// Free-text query over paper titles and abstracts (required)
    pub query: String,
    /// Number of results to return (1-100, default: 20)
    pub size: Option<u32>,
    /// Weight of the semantic channel relative to lexical (default: 2.0)
    pub bert_weight: Option<f64>,
    /// Weight of the citation-count signal; 1.0 or more orders by citations only (default: 0.5)
    pub citation_weight: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ListPapersParams {
    /// Page number, starting at 1 (default: 1)
    pub page: Option<u32>,
    /// Papers per page (1-100, default: 20)
    pub size: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct PaperIdParams {
    /// Paper ID (required)
    pub id: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct AddPaperParams {
    /// Paper ID; generated when omitted. An existing ID is replaced.
    pub id: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    /// Citation count (default: 0)
    pub n_citation: Option<i64>,
    pub doi: Option<String>,
    /// Author names in byline order
    pub authors: Option<Vec<String>>,
    /// IDs of cited papers; unknown IDs are recorded as stubs
    pub references: Option<Vec<String>>,
    /// Placeholder for a referenced paper; stubs are never searchable (default: false)
    pub is_stub: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct UpdatePaperParams {
    /// Paper ID to update (required)
    pub id: String,
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    pub n_citation: Option<i64>,
    pub doi: Option<String>,
    /// Replaces the author list
    pub authors: Option<Vec<String>>,
    /// Replaces the reference list
    pub references: Option<Vec<String>>,
    pub is_stub: Option<bool>,
}

// Helper: convert ScholarError to CallToolResult with isError: true
fn error_to_result(err: ScholarError) -> CallToolResult {
    match err {
        ScholarError::NotFound { id } => CallToolResult::structured_error(json!({
            "isError": true,
            "error": format!("Paper not found: {}", id),
            "hint": "Use search_papers to find available paper IDs"
        })),
        ScholarError::Validation { message, field } => {
            let mut obj = json!({
                "isError": true,
                "error": message,
            });
            if let Some(f) = field {
                obj["field"] = json!(f);
            }
            CallToolResult::structured_error(obj)
        }
        ScholarError::IndexNotReady => CallToolResult::structured_error(json!({
            "isError": true,
            "error": "Search index is still being built",
            "hint": "Retry shortly, or call reindex"
        })),
        other => CallToolResult::structured_error(json!({
            "isError": true,
            "error": other.to_string()
        })),
    }
}

fn required_id(id: &str) -> Option<CallToolResult> {
    if id.trim().is_empty() {
        return Some(CallToolResult::structured_error(json!({
            "isError": true,
            "error": "Field 'id' is required and cannot be empty",
            "field": "id"
        })));
    }
    None
}

fn paper_to_json(paper: &Paper) -> serde_json::Value {
    json!({
        "id": paper.id,
        "title": paper.title,
        "abstract": paper.abstract_text,
        "venue": paper.venue,
        "year": paper.year,
        "n_citation": paper.n_citation,
        "doi": paper.doi,
        "authors": paper.authors,
        "references": paper.references,
        "is_stub": paper.is_stub,
        "in_chroma": paper.in_chroma,
        "created_at": paper.created_at.to_rfc3339(),
        "updated_at": paper.updated_at.map(|dt| dt.to_rfc3339()),
    })
}

// Tool implementations
#[rmcp::tool_router]
impl CatalogService {
    #[tool(description = "Hybrid search over papers: BM25 keyword matching fused with semantic similarity, nudged by citation count. Returns ranked papers with per-channel scores.")]
    async fn search_papers(
        &self,
        Parameters(params): Parameters<SearchPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "search_papers",
            size = ?params.size,
            bert_weight = ?params.bert_weight,
            citation_weight = ?params.citation_weight,
            "Tool called"
        );

        let defaults = self.catalog.searcher().config();
        let request = SearchRequest {
            query: params.query,
            size: params.size.map(|s| s as usize).unwrap_or(defaults.default_size),
            bert_weight: params.bert_weight.unwrap_or(defaults.bert_weight),
            citation_weight: params.citation_weight.unwrap_or(defaults.citation_weight),
        };

        match self.catalog.search(&request).await {
            Ok(response) => {
                let results: Vec<serde_json::Value> = response
                    .results
                    .iter()
                    .map(|hit| {
                        json!({
                            "position": hit.position,
                            "hybrid_score": hit.hybrid_score,
                            "fusion_score": hit.fusion_score,
                            "lexical_rank": hit.lexical_rank,
                            "lexical_score": hit.lexical_score,
                            "semantic_rank": hit.semantic_rank,
                            "semantic_distance": hit.semantic_distance,
                            "citation_contribution": hit.citation_contribution,
                            "match_source": hit.match_source,
                            "paper": paper_to_json(&hit.paper),
                        })
                    })
                    .collect();

                Ok(CallToolResult::structured(json!({
                    "query": response.query,
                    "results": results,
                    "count": response.results.len(),
                    "channels": response.channels,
                    "degraded": response.degraded,
                    "took_ms": response.took_ms,
                })))
            }
            Err(e) => Ok(error_to_result(e)),
        }
    }

    #[tool(description = "Retrieve a paper by ID with its authors and citation count.")]
    async fn get_paper(
        &self,
        Parameters(params): Parameters<PaperIdParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "get_paper", id = %params.id, "Tool called");

        if let Some(err) = required_id(&params.id) {
            return Ok(err);
        }

        match self.catalog.get_paper(&params.id).await {
            Ok(paper) => Ok(CallToolResult::structured(paper_to_json(&paper))),
            Err(e) => Ok(error_to_result(e)),
        }
    }

    #[tool(description = "List papers page by page, most cited first (ties: newest year). Stubs are not listed.")]
    async fn list_papers(
        &self,
        Parameters(params): Parameters<ListPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "list_papers", page = ?params.page, size = ?params.size, "Tool called");

        let page = params.page.unwrap_or(1);
        let size = params.size.unwrap_or(self.catalog.searcher().config().default_size as u32);

        match self.catalog.list_papers(page, size).await {
            Ok(listing) => {
                let papers: Vec<serde_json::Value> = listing.papers.iter().map(paper_to_json).collect();
                Ok(CallToolResult::structured(json!({
                    "papers": papers,
                    "total": listing.total,
                    "page": listing.page,
                    "size": listing.size,
                    "pages": listing.pages,
                })))
            }
            Err(e) => Ok(error_to_result(e)),
        }
    }

    #[tool(description = "Add a paper, or replace an existing one with the same ID. The paper becomes searchable immediately unless it is a stub.")]
    async fn add_paper(
        &self,
        Parameters(params): Parameters<AddPaperParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "add_paper", id = ?params.id, "Tool called");

        let input = CreatePaper {
            id: params.id,
            title: params.title,
            abstract_text: params.abstract_text,
            venue: params.venue,
            year: params.year,
            n_citation: params.n_citation.unwrap_or(0),
            doi: params.doi,
            authors: params.authors.unwrap_or_default(),
            references: params.references.unwrap_or_default(),
            is_stub: params.is_stub.unwrap_or(false),
        };

        match self.catalog.add_paper(input).await {
            Ok(paper) => {
                let mut body = paper_to_json(&paper);
                body["hint"] = json!("Use get_paper with this ID to retrieve, or update_paper to modify");
                Ok(CallToolResult::structured(body))
            }
            Err(e) => Ok(error_to_result(e)),
        }
    }

    #[tool(description = "Update fields of an existing paper. At least one field must be provided; changed titles or abstracts are re-indexed.")]
    async fn update_paper(
        &self,
        Parameters(params): Parameters<UpdatePaperParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "update_paper",
            id = %params.id,
            has_title = params.title.is_some(),
            has_abstract = params.abstract_text.is_some(),
            has_n_citation = params.n_citation.is_some(),
            "Tool called"
        );

        if let Some(err) = required_id(&params.id) {
            return Ok(err);
        }

        let input = UpdatePaper {
            title: params.title,
            abstract_text: params.abstract_text,
            venue: params.venue,
            year: params.year,
            n_citation: params.n_citation,
            doi: params.doi,
            authors: params.authors,
            references: params.references,
            is_stub: params.is_stub,
        };

        match self.catalog.update_paper(&params.id, input).await {
            Ok(paper) => Ok(CallToolResult::structured(paper_to_json(&paper))),
            Err(e) => Ok(error_to_result(e)),
        }
    }

    #[tool(description = "Remove a paper from the catalog and the search index. This is permanent.")]
    async fn remove_paper(
        &self,
        Parameters(params): Parameters<PaperIdParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "remove_paper", id = %params.id, "Tool called");

        if let Some(err) = required_id(&params.id) {
            return Ok(err);
        }

        match self.catalog.remove_paper(&params.id).await {
            Ok(true) => Ok(CallToolResult::structured(json!({
                "deleted": true,
                "id": params.id,
            }))),
            Ok(false) => Ok(error_to_result(ScholarError::NotFound { id: params.id })),
            Err(e) => Ok(error_to_result(e)),
        }
    }

    #[tool(description = "Report lexical index statistics: document count, vocabulary size, average document length and BM25 parameters.")]
    async fn index_stats(&self) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "index_stats", "Tool called");

        match self.catalog.index_stats() {
            Ok(stats) => Ok(CallToolResult::structured(json!({
                "document_count": stats.document_count,
                "term_count": stats.term_count,
                "average_length": stats.average_length,
                "k1": stats.k1,
                "b": stats.b,
            }))),
            Err(e) => Ok(error_to_result(e)),
        }
    }

    #[tool(description = "Rebuild the lexical index from the stored corpus. Searches keep using the previous index until the rebuild completes.")]
    async fn reindex(&self) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "reindex", "Tool called");

        let started = Instant::now();
        match self.catalog.rebuild().await {
            Ok(stats) => Ok(CallToolResult::structured(json!({
                "document_count": stats.document_count,
                "term_count": stats.term_count,
                "took_ms": started.elapsed().as_millis() as u64,
            }))),
            Err(e) => Ok(error_to_result(e)),
        }
    }

    #[tool(description = "Embed every live paper whose text is not yet in the vector collection and upsert it, so the semantic channel can find it.")]
    async fn sync_vectors(&self) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "sync_vectors", "Tool called");

        let started = Instant::now();
        match self.catalog.sync_vectors().await {
            Ok(report) => Ok(CallToolResult::structured(json!({
                "synced": report.synced,
                "batches": report.batches,
                "took_ms": started.elapsed().as_millis() as u64,
            }))),
            Err(e) => Ok(error_to_result(e)),
        }
    }

    #[tool(description = "Check server health and status")]
    async fn health_check(&self) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "health_check", "Tool called");

        let index_ready = self.catalog.index().is_ready();
        let paper_count = self.catalog.store().count_papers().await;
        let status = if index_ready && paper_count.is_ok() { "ok" } else { "degraded" };

        let mut response = json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.uptime_seconds(),
            "index_ready": index_ready,
            "semantic_enabled": self.catalog.searcher().semantic_enabled(),
        });
        match paper_count {
            Ok(count) => response["paper_count"] = json!(count),
            Err(e) => response["store_error"] = json!(e.to_string()),
        }

        Ok(CallToolResult::structured(response))
    }
}

// ServerHandler implementation
#[rmcp::tool_handler(router = Self::tool_router())]
impl ServerHandler for CatalogService {
    fn get_info(&self) -> rmcp::model::InitializeResult {
        rmcp::model::InitializeResult {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "scholarnet".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some("Research paper catalog with hybrid lexical and semantic search".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Research paper catalog. Tools: search_papers, list_papers, get_paper, add_paper, update_paper, remove_paper, index_stats, reindex, sync_vectors, health_check.".to_string()
            ),
        }
    }
}
