/// Paper catalog service
///
/// Keeps the paper store, the lexical index, and the search cache in step.
/// Every write goes to the store first; the index follows only once the
/// store has accepted it, and every change clears the cache.
///
/// Cache keys carry the mutation epoch that was current when the search
/// started. A search that overlaps a write therefore stores its answer under
/// an epoch no later lookup uses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::cache::SearchCache;
use crate::config::SearchConfig;
use crate::errors::ScholarError;
use crate::search::{HybridSearcher, IndexDocument, IndexStats, LexicalIndex, SearchRequest, SearchResponse};
use crate::semantic::SemanticSearch;
use crate::store::{CreatePaper, Paper, PaperPage, PaperStore, UpdatePaper};

const DEFAULT_SYNC_BATCH_SIZE: usize = 64;

/// Outcome of one vector sync run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Papers written to the vector collection
    pub synced: usize,
    pub batches: usize,
}

pub struct Catalog {
    store: Arc<dyn PaperStore>,
    index: Arc<LexicalIndex>,
    searcher: HybridSearcher,
    semantic: Option<Arc<dyn SemanticSearch>>,
    cache: Option<Arc<dyn SearchCache>>,
    /// Bumped before every cache clear
    cache_epoch: AtomicU64,
    sync_batch_size: usize,
    /// Serializes writers with rebuilds so a rebuild snapshot never misses a concurrent write.
    write_gate: Mutex<()>,
}

impl Catalog {
    pub fn new(
        store: Arc<dyn PaperStore>,
        index: Arc<LexicalIndex>,
        semantic: Option<Arc<dyn SemanticSearch>>,
        cache: Option<Arc<dyn SearchCache>>,
        search: SearchConfig,
    ) -> Self {
        let searcher = HybridSearcher::new(Arc::clone(&index), semantic.clone(), Arc::clone(&store), search);
        Catalog {
            store,
            index,
            searcher,
            semantic,
            cache,
            cache_epoch: AtomicU64::new(0),
            sync_batch_size: DEFAULT_SYNC_BATCH_SIZE,
            write_gate: Mutex::new(()),
        }
    }

    /// Papers embedded per vector sync batch (at least 1).
    pub fn with_sync_batch_size(mut self, batch_size: usize) -> Self {
        self.sync_batch_size = batch_size.max(1);
        self
    }

    pub fn index(&self) -> &LexicalIndex {
        &self.index
    }

    pub fn store(&self) -> &dyn PaperStore {
        self.store.as_ref()
    }

    pub fn searcher(&self) -> &HybridSearcher {
        &self.searcher
    }

    /// Rebuild the lexical index from the store's live corpus.
    ///
    /// The new index is built on the blocking pool and swapped in whole. On
    /// failure the previously installed index keeps serving.
    pub async fn rebuild(&self) -> Result<IndexStats, ScholarError> {
        let _gate = self.write_gate.lock().await;

        let corpus: Vec<IndexDocument> = self
            .store
            .list_live_papers()
            .await?
            .iter()
            .map(|doc| doc.to_index_document())
            .collect();

        let index = Arc::clone(&self.index);
        let stats = tokio::task::spawn_blocking(move || index.rebuild(corpus)).await??;

        self.invalidate_cache().await;
        Ok(stats)
    }

    /// Insert or replace a paper. Stubs are kept out of the index.
    pub async fn add_paper(&self, input: CreatePaper) -> Result<Paper, ScholarError> {
        input.validate()?;
        let _gate = self.write_gate.lock().await;

        let paper = self.store.upsert_paper(input).await?;
        if paper.is_stub {
            self.index.remove(&paper.id)?;
        } else {
            self.index.add(paper.document().to_index_document())?;
        }

        tracing::info!(paper_id = %paper.id, is_stub = paper.is_stub, "Paper added");
        self.invalidate_cache().await;
        Ok(paper)
    }

    pub async fn update_paper(&self, id: &str, input: UpdatePaper) -> Result<Paper, ScholarError> {
        input.validate()?;
        if input.is_empty() {
            return Err(ScholarError::validation("update", "at least one field must be provided"));
        }
        let reindex = input.touches_index_text() || input.is_stub.is_some();
        let _gate = self.write_gate.lock().await;

        let paper = self.store.update_paper(id, input).await?;
        if paper.is_stub {
            self.index.remove(&paper.id)?;
        } else if reindex {
            self.index.update(paper.document().to_index_document())?;
        }

        tracing::info!(paper_id = %paper.id, reindexed = reindex, "Paper updated");
        // Citation changes alter ranking even when the text is untouched
        self.invalidate_cache().await;
        Ok(paper)
    }

    /// Delete a paper. Returns whether the store had it.
    pub async fn remove_paper(&self, id: &str) -> Result<bool, ScholarError> {
        let _gate = self.write_gate.lock().await;

        let existed = self.store.delete_paper(id).await?;
        let indexed = self.index.remove(id)?;

        tracing::info!(paper_id = %id, existed, indexed, "Paper removed");
        self.invalidate_cache().await;
        Ok(existed)
    }

    pub async fn get_paper(&self, id: &str) -> Result<Paper, ScholarError> {
        self.store.get_paper(id).await
    }

    /// One page of live papers, most cited first. `page` is 1-based.
    pub async fn list_papers(&self, page: u32, size: u32) -> Result<PaperPage, ScholarError> {
        if page == 0 {
            return Err(ScholarError::validation("page", "page must be >= 1"));
        }
        let max_size = self.searcher.config().max_size;
        if size == 0 || size as usize > max_size {
            return Err(ScholarError::validation(
                "size",
                &format!("size must be between 1 and {}", max_size),
            ));
        }
        self.store.list_papers(page, size).await
    }

    /// Push every live paper whose current text is not in the vector
    /// collection yet, batch by batch.
    ///
    /// Each batch holds the write gate from listing to flagging, so a
    /// concurrent text edit cannot be flagged as synced with a stale vector.
    /// A failed batch stops the run; earlier batches stay flagged.
    pub async fn sync_vectors(&self) -> Result<SyncReport, ScholarError> {
        let semantic = self
            .semantic
            .as_ref()
            .ok_or_else(|| ScholarError::Config("semantic search is disabled".to_string()))?;

        let mut report = SyncReport { synced: 0, batches: 0 };
        loop {
            let _gate = self.write_gate.lock().await;

            let batch = self.store.list_unsynced_papers(self.sync_batch_size).await?;
            if batch.is_empty() {
                break;
            }

            let written = semantic.upsert_documents(&batch).await?;
            let ids: Vec<String> = batch.into_iter().map(|doc| doc.id).collect();
            let marked = self.store.mark_in_chroma(&ids).await?;

            report.synced += written;
            report.batches += 1;
            tracing::debug!(batch = report.batches, written, marked, "Vector batch synced");

            if marked == 0 {
                break;
            }
        }

        // New vectors change what the semantic channel returns
        if report.synced > 0 {
            self.invalidate_cache().await;
        }
        tracing::info!(
            synced = report.synced,
            batches = report.batches,
            backend = semantic.name(),
            "Vector sync complete"
        );
        Ok(report)
    }

    /// Hybrid search, answered from the cache when possible.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ScholarError> {
        self.searcher.validate(request)?;

        let epoch = self.cache_epoch.load(Ordering::SeqCst);
        let key = format!("{}#{}", epoch, request.cache_key());
        if let Some(cache) = &self.cache {
            match cache.get(&key).await {
                Ok(Some(cached)) => {
                    tracing::debug!(query = %request.query, "Search cache hit");
                    return Ok(cached.as_ref().clone());
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Search cache lookup failed"),
            }
        }

        let response = self.searcher.search(request).await?;

        if let Some(cache) = &self.cache {
            // A write landed mid-search; the answer may predate it
            let stale = self.cache_epoch.load(Ordering::SeqCst) != epoch;
            if !response.degraded && !stale {
                if let Err(e) = cache.put(key, Arc::new(response.clone())).await {
                    tracing::warn!(error = %e, "Search cache store failed");
                }
            }
        }
        Ok(response)
    }

    pub fn index_stats(&self) -> Result<IndexStats, ScholarError> {
        self.index.stats()
    }

    async fn invalidate_cache(&self) {
        self.cache_epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate_all().await {
                tracing::warn!(error = %e, "Search cache invalidation failed");
            }
        }
    }
}
