/// Paper store abstraction layer
///
/// Provides the PaperStore trait and the paper record types. The lexical index
/// is built from `list_live_papers()` snapshots, and fused search results are
/// resolved to full records through `get_papers()`.
///
/// Papers cite each other by id. Writing a paper whose references name ids
/// the store has never seen creates stub records for them, so the reference
/// graph never dangles.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ScholarError;
use crate::search::IndexDocument;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryPaperStore;
pub use postgres::PostgresPaperStore;

/// A stored paper with its ordered author list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    /// Citation count, never negative
    pub n_citation: i64,
    pub doi: Option<String>,
    /// Author names in byline order
    pub authors: Vec<String>,
    /// Ids of the papers this one cites, in the order given
    pub references: Vec<String>,
    /// Placeholder created for a referenced paper we have no metadata for.
    /// Stubs are never indexed or returned from search.
    pub is_stub: bool,
    /// Whether the current title and abstract have been pushed to the vector collection
    pub in_chroma: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Paper {
    /// Bare record with only an id; everything else empty.
    pub fn new(id: impl Into<String>) -> Self {
        Paper {
            id: id.into(),
            title: None,
            abstract_text: None,
            venue: None,
            year: None,
            n_citation: 0,
            doi: None,
            authors: Vec::new(),
            references: Vec::new(),
            is_stub: false,
            in_chroma: false,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Placeholder for a referenced id with no metadata yet.
    pub fn stub(id: impl Into<String>) -> Self {
        Paper {
            is_stub: true,
            ..Paper::new(id)
        }
    }

    pub fn document(&self) -> PaperDocument {
        PaperDocument {
            id: self.id.clone(),
            title: self.title.clone(),
            abstract_text: self.abstract_text.clone(),
            n_citation: self.n_citation,
        }
    }
}

/// The slice of a paper the lexical index needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperDocument {
    pub id: String,
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub n_citation: i64,
}

impl PaperDocument {
    /// Title and abstract joined by a space; missing parts are empty.
    pub fn index_text(&self) -> String {
        format!(
            "{} {}",
            self.title.as_deref().unwrap_or(""),
            self.abstract_text.as_deref().unwrap_or("")
        )
    }

    pub fn to_index_document(&self) -> IndexDocument {
        IndexDocument::new(self.id.clone(), self.index_text())
    }

    /// Text embedded into the vector collection: `"{title}. {abstract}"`.
    pub fn vector_text(&self) -> String {
        format!(
            "{}. {}",
            self.title.as_deref().unwrap_or(""),
            self.abstract_text.as_deref().unwrap_or("")
        )
    }
}

/// One page of live papers, most cited first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperPage {
    pub papers: Vec<Paper>,
    /// Live papers across all pages
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub pages: u64,
}

impl PaperPage {
    pub fn new(papers: Vec<Paper>, total: u64, page: u32, size: u32) -> Self {
        PaperPage {
            papers,
            total,
            page,
            size,
            pages: total.div_ceil(u64::from(size.max(1))),
        }
    }

    /// Rows to skip before this page.
    pub fn offset(page: u32, size: u32) -> u64 {
        u64::from(page.saturating_sub(1)) * u64::from(size)
    }
}

/// Input for creating or replacing a paper.
///
/// When `id` is absent the store assigns a UUID.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePaper {
    pub id: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    #[serde(default)]
    pub n_citation: i64,
    pub doi: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Cited paper ids; unknown ones become stubs
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub is_stub: bool,
}

impl CreatePaper {
    pub fn validate(&self) -> Result<(), ScholarError> {
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(ScholarError::validation("id", "id must not be blank"));
            }
        }
        if self.n_citation < 0 {
            return Err(ScholarError::validation("n_citation", "n_citation must be >= 0"));
        }
        validate_authors(&self.authors)?;
        validate_references(&self.references)
    }
}

/// Partial update. Only `Some` fields are applied; `authors` replaces the list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePaper {
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    pub n_citation: Option<i64>,
    pub doi: Option<String>,
    pub authors: Option<Vec<String>>,
    /// Replaces the reference list; unknown ids become stubs
    pub references: Option<Vec<String>>,
    pub is_stub: Option<bool>,
}

impl UpdatePaper {
    pub fn validate(&self) -> Result<(), ScholarError> {
        if matches!(self.n_citation, Some(n) if n < 0) {
            return Err(ScholarError::validation("n_citation", "n_citation must be >= 0"));
        }
        if let Some(authors) = &self.authors {
            validate_authors(authors)?;
        }
        if let Some(references) = &self.references {
            validate_references(references)?;
        }
        Ok(())
    }

    /// Whether the update changes the indexed text.
    pub fn touches_index_text(&self) -> bool {
        self.title.is_some() || self.abstract_text.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.abstract_text.is_none()
            && self.venue.is_none()
            && self.year.is_none()
            && self.n_citation.is_none()
            && self.doi.is_none()
            && self.authors.is_none()
            && self.references.is_none()
            && self.is_stub.is_none()
    }

    pub(crate) fn apply(self, paper: &mut Paper) {
        if self.touches_index_text() {
            paper.in_chroma = false;
        }
        if let Some(title) = self.title {
            paper.title = Some(title);
        }
        if let Some(abstract_text) = self.abstract_text {
            paper.abstract_text = Some(abstract_text);
        }
        if let Some(venue) = self.venue {
            paper.venue = Some(venue);
        }
        if let Some(year) = self.year {
            paper.year = Some(year);
        }
        if let Some(n_citation) = self.n_citation {
            paper.n_citation = n_citation;
        }
        if let Some(doi) = self.doi {
            paper.doi = Some(doi);
        }
        if let Some(authors) = self.authors {
            paper.authors = authors;
        }
        if let Some(references) = self.references {
            paper.references = dedup_references(references);
        }
        if let Some(is_stub) = self.is_stub {
            paper.is_stub = is_stub;
        }
    }
}

fn validate_authors(authors: &[String]) -> Result<(), ScholarError> {
    if authors.iter().any(|a| a.trim().is_empty()) {
        return Err(ScholarError::validation("authors", "author names must not be blank"));
    }
    Ok(())
}

fn validate_references(references: &[String]) -> Result<(), ScholarError> {
    if references.iter().any(|r| r.trim().is_empty()) {
        return Err(ScholarError::validation("references", "referenced ids must not be blank"));
    }
    Ok(())
}

/// Drop repeated ids, keeping each at its first position.
pub(crate) fn dedup_references(references: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    references.into_iter().filter(|r| seen.insert(r.clone())).collect()
}

/// Core abstraction for paper persistence.
///
/// All implementations must be Send + Sync; the catalog shares one store
/// between the MCP handlers and the search path.
#[async_trait]
pub trait PaperStore: Send + Sync {
    /// Every non-stub paper, in a stable order (creation time, then id).
    async fn list_live_papers(&self) -> Result<Vec<PaperDocument>, ScholarError>;

    /// Fetch one paper. `NotFound` when absent.
    async fn get_paper(&self, id: &str) -> Result<Paper, ScholarError>;

    /// Fetch many papers. Unknown ids are silently absent from the result.
    async fn get_papers(&self, ids: &[String]) -> Result<Vec<Paper>, ScholarError>;

    /// Live papers ordered by citations (desc), then year (desc, missing last), then id.
    /// `page` is 1-based.
    async fn list_papers(&self, page: u32, size: u32) -> Result<PaperPage, ScholarError>;

    /// Live papers whose current text is not yet in the vector collection,
    /// oldest first, at most `limit`.
    async fn list_unsynced_papers(&self, limit: usize) -> Result<Vec<PaperDocument>, ScholarError>;

    /// Flag papers as present in the vector collection. Returns how many were flagged.
    async fn mark_in_chroma(&self, ids: &[String]) -> Result<u64, ScholarError>;

    /// Insert a paper, or replace every field of an existing one with the same id.
    /// Referenced ids that do not exist yet are created as stubs.
    async fn upsert_paper(&self, input: CreatePaper) -> Result<Paper, ScholarError>;

    /// Partially update an existing paper. `NotFound` when absent.
    async fn update_paper(&self, id: &str, input: UpdatePaper) -> Result<Paper, ScholarError>;

    /// Delete a paper. Returns whether it existed.
    async fn delete_paper(&self, id: &str) -> Result<bool, ScholarError>;

    /// Number of stored papers, stubs included.
    async fn count_papers(&self) -> Result<u64, ScholarError>;
}
