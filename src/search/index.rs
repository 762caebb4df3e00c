/// Shared, lock-guarded handle around the BM25 index
///
/// Readers take the read lock for the duration of one search. Mutations take
/// the write lock, so a removal's postings rebuild is never observed half
/// done. Full rebuilds are constructed outside the lock and swapped in.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use super::bm25::{Bm25Index, Bm25Params, IndexDocument, IndexStats, LexicalHit};
use crate::errors::ScholarError;

pub struct LexicalIndex {
    params: Bm25Params,
    inner: RwLock<Option<Bm25Index>>,
}

impl LexicalIndex {
    /// Create a handle with no index installed. Searches fail until `install`.
    pub fn new(params: Bm25Params) -> Self {
        LexicalIndex {
            params,
            inner: RwLock::new(None),
        }
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Option<Bm25Index>>, ScholarError> {
        self.inner
            .read()
            .map_err(|_| ScholarError::Internal("lexical index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Option<Bm25Index>>, ScholarError> {
        self.inner
            .write()
            .map_err(|_| ScholarError::Internal("lexical index lock poisoned".to_string()))
    }

    pub fn is_ready(&self) -> bool {
        self.read().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Build a fresh index from `corpus` (without holding the lock) and swap it in.
    pub fn rebuild<I>(&self, corpus: I) -> Result<IndexStats, ScholarError>
    where
        I: IntoIterator<Item = IndexDocument>,
    {
        let started = Instant::now();
        let index = Bm25Index::build(self.params, corpus);
        let stats = index.stats();
        self.install(index)?;

        tracing::info!(
            document_count = stats.document_count,
            term_count = stats.term_count,
            average_length = stats.average_length,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Lexical index built"
        );
        Ok(stats)
    }

    /// Atomically replace the installed index.
    pub fn install(&self, index: Bm25Index) -> Result<(), ScholarError> {
        *self.write()? = Some(index);
        Ok(())
    }

    pub fn add(&self, doc: IndexDocument) -> Result<(), ScholarError> {
        self.mutate(&doc.id.clone(), "add", |index| index.add(doc))
    }

    pub fn update(&self, doc: IndexDocument) -> Result<(), ScholarError> {
        self.mutate(&doc.id.clone(), "update", |index| index.update(doc))
    }

    /// Returns whether the document was present.
    pub fn remove(&self, id: &str) -> Result<bool, ScholarError> {
        let mut removed = false;
        self.mutate(id, "remove", |index| removed = index.remove(id))?;
        Ok(removed)
    }

    fn mutate<F>(&self, id: &str, operation: &str, f: F) -> Result<(), ScholarError>
    where
        F: FnOnce(&mut Bm25Index),
    {
        let mut guard = self.write()?;
        match guard.as_mut() {
            Some(index) => {
                f(index);
                Ok(())
            }
            None => {
                // The pending build reads the corpus from the store and will include this change
                tracing::warn!(paper_id = %id, operation, "Lexical index not built yet, skipping");
                Ok(())
            }
        }
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>, ScholarError> {
        let guard = self.read()?;
        let index = guard.as_ref().ok_or(ScholarError::IndexNotReady)?;
        Ok(index.search(query, limit))
    }

    pub fn stats(&self) -> Result<IndexStats, ScholarError> {
        let guard = self.read()?;
        let index = guard.as_ref().ok_or(ScholarError::IndexNotReady)?;
        Ok(index.stats())
    }

    /// Clone of the installed index, for inspection.
    pub fn snapshot(&self) -> Result<Bm25Index, ScholarError> {
        let guard = self.read()?;
        guard.as_ref().cloned().ok_or(ScholarError::IndexNotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn corpus() -> Vec<IndexDocument> {
        vec![
            IndexDocument::new("A", "deep learning networks"),
            IndexDocument::new("B", "attention mechanism networks"),
            IndexDocument::new("C", "unrelated topic text"),
        ]
    }

    #[test]
    fn test_search_before_build_fails() {
        let index = LexicalIndex::new(Bm25Params::default());
        assert!(!index.is_ready());
        assert!(matches!(index.search("networks", 10), Err(ScholarError::IndexNotReady)));
        assert!(matches!(index.stats(), Err(ScholarError::IndexNotReady)));
    }

    #[test]
    fn test_mutations_before_build_are_skipped() {
        let index = LexicalIndex::new(Bm25Params::default());
        index.add(IndexDocument::new("A", "deep learning")).unwrap();
        assert!(!index.remove("A").unwrap());
        assert!(!index.is_ready());
    }

    #[test]
    fn test_rebuild_installs_and_replaces() {
        let index = LexicalIndex::new(Bm25Params::default());
        let stats = index.rebuild(corpus()).unwrap();
        assert_eq!(stats.document_count, 3);
        assert_eq!(index.search("networks", 10).unwrap().len(), 2);

        let stats = index
            .rebuild(vec![IndexDocument::new("Z", "graph networks survey")])
            .unwrap();
        assert_eq!(stats.document_count, 1);
        assert!(index.search("attention", 10).unwrap().is_empty());
    }

    #[test]
    fn test_mutations_through_handle() {
        let index = LexicalIndex::new(Bm25Params::default());
        index.rebuild(corpus()).unwrap();

        index.add(IndexDocument::new("D", "graph networks")).unwrap();
        assert_eq!(index.stats().unwrap().document_count, 4);

        assert!(index.remove("D").unwrap());
        assert!(!index.remove("D").unwrap());
        assert_eq!(index.stats().unwrap().document_count, 3);

        index.update(IndexDocument::new("C", "attention topic")).unwrap();
        let hits = index.search("attention", 10).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let index = Arc::new(LexicalIndex::new(Bm25Params::default()));
        index.rebuild(corpus()).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let stats = index.stats().unwrap();
                        let snapshot = index.snapshot().unwrap();
                        // Every observed state is internally consistent
                        assert!(stats.document_count >= 3);
                        assert_eq!(snapshot.len(), snapshot.document_ids().len());
                    }
                })
            })
            .collect();

        for i in 0..20 {
            let id = format!("extra-{}", i);
            index.add(IndexDocument::new(&id, "convolutional networks")).unwrap();
            index.remove(&id).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(index.stats().unwrap().document_count, 3);
    }
}
