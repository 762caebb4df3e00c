/// In-memory implementation of PaperStore
///
/// Backs the `memory` store backend and the test suites. Nothing survives a
/// restart.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::ScholarError;
use crate::store::{dedup_references, CreatePaper, Paper, PaperDocument, PaperPage, PaperStore, UpdatePaper};

#[derive(Default)]
pub struct InMemoryPaperStore {
    papers: RwLock<HashMap<String, Paper>>,
}

impl InMemoryPaperStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Insert a stub for every referenced id not already stored. Existing papers are untouched.
fn insert_stubs(papers: &mut HashMap<String, Paper>, references: &[String]) {
    for id in references {
        if !papers.contains_key(id) {
            papers.insert(id.clone(), Paper::stub(id.clone()));
        }
    }
}

/// Most cited first, then newest year with missing years last, then id.
fn catalog_order(a: &Paper, b: &Paper) -> Ordering {
    b.n_citation
        .cmp(&a.n_citation)
        .then_with(|| match (a.year, b.year) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl PaperStore for InMemoryPaperStore {
    async fn list_live_papers(&self) -> Result<Vec<PaperDocument>, ScholarError> {
        let papers = self.papers.read().await;
        let mut live: Vec<&Paper> = papers.values().filter(|p| !p.is_stub).collect();
        live.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(live.into_iter().map(Paper::document).collect())
    }

    async fn get_paper(&self, id: &str) -> Result<Paper, ScholarError> {
        self.papers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ScholarError::NotFound { id: id.to_string() })
    }

    async fn get_papers(&self, ids: &[String]) -> Result<Vec<Paper>, ScholarError> {
        let papers = self.papers.read().await;
        Ok(ids.iter().filter_map(|id| papers.get(id).cloned()).collect())
    }

    async fn list_papers(&self, page: u32, size: u32) -> Result<PaperPage, ScholarError> {
        let papers = self.papers.read().await;
        let mut live: Vec<&Paper> = papers.values().filter(|p| !p.is_stub).collect();
        live.sort_by(|a, b| catalog_order(a, b));

        let total = live.len() as u64;
        let items = live
            .into_iter()
            .skip(PaperPage::offset(page, size) as usize)
            .take(size as usize)
            .cloned()
            .collect();
        Ok(PaperPage::new(items, total, page, size))
    }

    async fn list_unsynced_papers(&self, limit: usize) -> Result<Vec<PaperDocument>, ScholarError> {
        let papers = self.papers.read().await;
        let mut pending: Vec<&Paper> = papers.values().filter(|p| !p.is_stub && !p.in_chroma).collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending.into_iter().take(limit).map(Paper::document).collect())
    }

    async fn mark_in_chroma(&self, ids: &[String]) -> Result<u64, ScholarError> {
        let mut papers = self.papers.write().await;
        let mut marked = 0;
        for id in ids {
            if let Some(paper) = papers.get_mut(id) {
                paper.in_chroma = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn upsert_paper(&self, input: CreatePaper) -> Result<Paper, ScholarError> {
        let id = input.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut papers = self.papers.write().await;

        let (created_at, updated_at) = match papers.get(&id) {
            Some(existing) => (existing.created_at, Some(Utc::now())),
            None => (Utc::now(), None),
        };

        let paper = Paper {
            id: id.clone(),
            title: input.title,
            abstract_text: input.abstract_text,
            venue: input.venue,
            year: input.year,
            n_citation: input.n_citation,
            doi: input.doi,
            authors: input.authors,
            references: dedup_references(input.references),
            is_stub: input.is_stub,
            in_chroma: false,
            created_at,
            updated_at,
        };
        papers.insert(id, paper.clone());
        insert_stubs(&mut papers, &paper.references);
        Ok(paper)
    }

    async fn update_paper(&self, id: &str, input: UpdatePaper) -> Result<Paper, ScholarError> {
        let mut papers = self.papers.write().await;
        let paper = papers
            .get_mut(id)
            .ok_or_else(|| ScholarError::NotFound { id: id.to_string() })?;
        input.apply(paper);
        paper.updated_at = Some(Utc::now());
        let updated = paper.clone();
        insert_stubs(&mut papers, &updated.references);
        Ok(updated)
    }

    async fn delete_paper(&self, id: &str) -> Result<bool, ScholarError> {
        Ok(self.papers.write().await.remove(id).is_some())
    }

    async fn count_papers(&self) -> Result<u64, ScholarError> {
        Ok(self.papers.read().await.len() as u64)
    }
}
