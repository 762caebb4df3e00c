/// In-memory BM25 index over the live paper corpus
///
/// Documents are addressed by a dense internal position. `documents`,
/// `document_ids` and `doc_lengths` are parallel vectors and always have the
/// same length. Postings (`term_frequency`) and `document_frequency` are keyed
/// by term and must always describe exactly the documents currently present.
///
/// Additions update postings incrementally. Removal deletes the document from
/// the parallel vectors and rebuilds postings from the remaining token lists,
/// since every later position shifts down by one.

use std::collections::HashMap;

use serde::Serialize;

use super::tokenizer::tokenize;

/// BM25 parameters, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f64,
    /// Length-normalization strength
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Bm25Params { k1: 1.2, b: 0.75 }
    }
}

/// A document handed to the index: its identifier and the text to tokenize.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id: String,
    pub text: String,
}

impl IndexDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        IndexDocument {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// One lexical match with its 1-based rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalHit {
    pub document_id: String,
    pub rank: usize,
    pub score: f64,
}

/// Observability snapshot of the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub average_length: f64,
    pub term_count: usize,
    pub k1: f64,
    pub b: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Index {
    params: Bm25Params,
    documents: Vec<Vec<String>>,
    document_ids: Vec<String>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f64,
    /// term -> (position -> occurrences in that document)
    term_frequency: HashMap<String, HashMap<usize, u32>>,
    /// term -> number of documents containing it
    document_frequency: HashMap<String, usize>,
}

impl Bm25Index {
    /// Create an empty index.
    pub fn new(params: Bm25Params) -> Self {
        Bm25Index {
            params,
            documents: Vec::new(),
            document_ids: Vec::new(),
            doc_lengths: Vec::new(),
            avg_doc_length: 0.0,
            term_frequency: HashMap::new(),
            document_frequency: HashMap::new(),
        }
    }

    /// Build an index from the full live corpus.
    ///
    /// Later duplicates of an identifier replace earlier ones so identifiers
    /// stay unique.
    pub fn build<I>(params: Bm25Params, corpus: I) -> Self
    where
        I: IntoIterator<Item = IndexDocument>,
    {
        let mut index = Bm25Index::new(params);
        let mut seen: HashMap<String, usize> = HashMap::new();

        for doc in corpus {
            let tokens = tokenize(&doc.text);
            match seen.get(&doc.id) {
                Some(&position) => {
                    tracing::warn!(paper_id = %doc.id, "Duplicate paper id in corpus, keeping last");
                    index.doc_lengths[position] = tokens.len();
                    index.documents[position] = tokens;
                }
                None => {
                    seen.insert(doc.id.clone(), index.documents.len());
                    index.doc_lengths.push(tokens.len());
                    index.documents.push(tokens);
                    index.document_ids.push(doc.id);
                }
            }
        }

        index.recompute_average_length();
        index.rebuild_postings();
        index
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position_of(id).is_some()
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.document_ids.iter().position(|existing| existing == id)
    }

    /// Append one document at the next position.
    ///
    /// An identifier that is already indexed is replaced (remove + add).
    pub fn add(&mut self, doc: IndexDocument) {
        if self.contains(&doc.id) {
            self.update(doc);
            return;
        }

        let tokens = tokenize(&doc.text);
        let position = self.documents.len();

        self.doc_lengths.push(tokens.len());
        self.index_tokens(position, &tokens);
        self.documents.push(tokens);
        self.document_ids.push(doc.id);
        self.recompute_average_length();

        tracing::debug!(
            paper_id = %self.document_ids[position],
            position,
            length = self.doc_lengths[position],
            "Added paper to lexical index"
        );
    }

    /// Remove a document by identifier. Unknown identifiers are a logged no-op.
    ///
    /// Returns whether a document was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(position) = self.position_of(id) else {
            tracing::info!(paper_id = %id, "Paper not in lexical index, nothing to remove");
            return false;
        };

        self.documents.remove(position);
        self.document_ids.remove(position);
        self.doc_lengths.remove(position);

        self.rebuild_postings();
        self.recompute_average_length();

        tracing::debug!(paper_id = %id, "Removed paper from lexical index");
        true
    }

    /// Replace a document's text: remove then re-add at the end.
    pub fn update(&mut self, doc: IndexDocument) {
        self.remove(&doc.id);
        self.add(doc);
    }

    /// BM25 score of the document at `position` for the given query terms.
    ///
    /// Terms unknown to the index or absent from the document contribute zero.
    pub fn score(&self, position: usize, query_terms: &[String]) -> f64 {
        let Some(&doc_length) = self.doc_lengths.get(position) else {
            return 0.0;
        };

        let Bm25Params { k1, b } = self.params;
        let mut score = 0.0;

        for term in query_terms {
            let Some(postings) = self.term_frequency.get(term) else {
                continue;
            };
            let Some(&tf) = postings.get(&position) else {
                continue;
            };

            let tf = tf as f64;
            let length_ratio = doc_length as f64 / self.avg_doc_length;
            let numerator = tf * (k1 + 1.0);
            let denominator = tf + k1 * (1.0 - b + b * length_ratio);

            score += self.idf(term) * (numerator / denominator);
        }

        score
    }

    /// Inverse document frequency: ln((N + 1) / (df + 1)), zero for unknown terms.
    pub fn idf(&self, term: &str) -> f64 {
        match self.document_frequency.get(term) {
            Some(&df) => {
                let n = self.documents.len() as f64;
                ((n + 1.0) / (df as f64 + 1.0)).ln()
            }
            None => 0.0,
        }
    }

    /// Rank every live document against the query and keep the best `limit`.
    ///
    /// Documents scoring zero are excluded. Ties keep insertion order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<LexicalHit> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = (0..self.documents.len())
            .map(|position| (position, self.score(position, &query_terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        // sort_by is stable, so equal scores stay in position order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        scored
            .into_iter()
            .enumerate()
            .map(|(i, (position, score))| LexicalHit {
                document_id: self.document_ids[position].clone(),
                rank: i + 1,
                score,
            })
            .collect()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            document_count: self.documents.len(),
            average_length: self.avg_doc_length,
            term_count: self.term_frequency.len(),
            k1: self.params.k1,
            b: self.params.b,
        }
    }

    /// Number of documents containing `term`.
    pub fn document_frequency(&self, term: &str) -> usize {
        self.document_frequency.get(term).copied().unwrap_or(0)
    }

    /// Occurrences of `term` in the document with identifier `id`.
    pub fn term_frequency(&self, term: &str, id: &str) -> u32 {
        self.position_of(id)
            .and_then(|position| self.term_frequency.get(term)?.get(&position).copied())
            .unwrap_or(0)
    }

    pub fn average_document_length(&self) -> f64 {
        self.avg_doc_length
    }

    /// Identifiers in position order.
    pub fn document_ids(&self) -> &[String] {
        &self.document_ids
    }

    fn recompute_average_length(&mut self) {
        self.avg_doc_length = if self.doc_lengths.is_empty() {
            0.0
        } else {
            self.doc_lengths.iter().sum::<usize>() as f64 / self.doc_lengths.len() as f64
        };
    }

    fn rebuild_postings(&mut self) {
        self.term_frequency.clear();
        self.document_frequency.clear();

        let documents = std::mem::take(&mut self.documents);
        for (position, tokens) in documents.iter().enumerate() {
            self.index_tokens(position, tokens);
        }
        self.documents = documents;
    }

    fn index_tokens(&mut self, position: usize, tokens: &[String]) {
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for token in tokens {
            *counts.entry(token.as_str()).or_default() += 1;
        }

        for (term, count) in counts {
            self.term_frequency
                .entry(term.to_string())
                .or_default()
                .insert(position, count);
            *self.document_frequency.entry(term.to_string()).or_default() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<IndexDocument> {
        vec![
            IndexDocument::new("A", "deep learning networks"),
            IndexDocument::new("B", "attention mechanism networks"),
            IndexDocument::new("C", "unrelated topic text"),
        ]
    }

    fn build() -> Bm25Index {
        Bm25Index::build(Bm25Params::default(), corpus())
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    /// Check df[t] == number of postings for t, for every term.
    fn assert_postings_consistent(index: &Bm25Index) {
        assert_eq!(index.documents.len(), index.document_ids.len());
        assert_eq!(index.documents.len(), index.doc_lengths.len());
        assert_eq!(index.term_frequency.len(), index.document_frequency.len());
        for (term, postings) in &index.term_frequency {
            assert_eq!(index.document_frequency[term], postings.len(), "term {}", term);
        }
    }

    #[test]
    fn test_search_networks_returns_matching_papers_only() {
        let index = build();
        let hits = index.search("networks", 2);

        assert_eq!(hits.len(), 2);
        let ids: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
        assert!(ids.contains(&"A"));
        assert!(ids.contains(&"B"));
        assert!(hits.iter().all(|h| h.score > 0.0));
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[1].rank, 2);
    }

    #[test]
    fn test_equal_scores_keep_insertion_order() {
        let index = build();
        // A and B have identical length and tf for "networks"
        let hits = index.search("networks", 10);
        assert_eq!(hits[0].document_id, "A");
        assert_eq!(hits[1].document_id, "B");
        assert_close(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_score_matches_formula() {
        let index = build();
        let terms = vec!["networks".to_string()];
        // N=3, df=2, tf=1, doc_len=3, avg=3
        let idf = (4.0f64 / 3.0).ln();
        let expected = idf * (1.0 * 2.2) / (1.0 + 1.2 * (1.0 - 0.75 + 0.75 * 1.0));
        assert_close(index.score(0, &terms), expected);
        assert_close(index.score(2, &terms), 0.0);
    }

    #[test]
    fn test_own_text_scores_positive() {
        let index = build();
        for (position, doc) in corpus().iter().enumerate() {
            let terms = tokenize(&doc.text);
            assert!(index.score(position, &terms) > 0.0, "doc {} scored zero", doc.id);
        }
    }

    #[test]
    fn test_empty_query_and_empty_corpus() {
        let index = build();
        assert!(index.search("", 10).is_empty());
        assert!(index.search("the of and", 10).is_empty());
        assert!(index.search("networks", 0).is_empty());

        let empty = Bm25Index::build(Bm25Params::default(), Vec::new());
        assert!(empty.search("networks", 10).is_empty());
        assert_eq!(empty.stats().document_count, 0);
        assert_eq!(empty.stats().average_length, 0.0);
    }

    #[test]
    fn test_unknown_terms_contribute_nothing() {
        let index = build();
        let with_unknown = index.search("networks zzzunknown", 10);
        let without = index.search("networks", 10);
        assert_eq!(with_unknown, without);
    }

    #[test]
    fn test_build_is_deterministic() {
        let first = build();
        let second = build();
        assert_eq!(first, second);
        assert_eq!(first.term_frequency, second.term_frequency);
        assert_eq!(first.document_frequency, second.document_frequency);
        assert_close(first.average_document_length(), second.average_document_length());
    }

    #[test]
    fn test_add_updates_postings_incrementally() {
        let mut index = Bm25Index::new(Bm25Params::default());
        for doc in corpus() {
            index.add(doc);
        }
        assert_postings_consistent(&index);
        // Incremental adds reach the same state as a bulk build
        assert_eq!(index, build());
        assert_close(index.average_document_length(), 3.0);
    }

    #[test]
    fn test_remove_leaves_no_stale_counts() {
        let mut index = build();
        assert!(index.remove("A"));
        assert_postings_consistent(&index);

        let expected = Bm25Index::build(
            Bm25Params::default(),
            vec![
                IndexDocument::new("B", "attention mechanism networks"),
                IndexDocument::new("C", "unrelated topic text"),
            ],
        );
        assert_eq!(index, expected);
        assert_eq!(index.document_frequency("deep"), 0);
        assert_eq!(index.document_frequency("networks"), 1);
        assert_eq!(index.term_frequency("networks", "B"), 1);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut index = build();
        let before = index.stats();
        assert!(!index.remove("missing"));
        assert_eq!(index.stats(), before);
        assert_eq!(index, build());
    }

    #[test]
    fn test_remove_then_add_same_content_restores_scores() {
        let original = build();
        let mut index = build();
        index.remove("A");
        index.add(IndexDocument::new("A", "deep learning networks"));

        assert_eq!(index.stats(), original.stats());
        for query in ["networks", "deep learning", "attention", "topic"] {
            let mut before = original.search(query, 10);
            let mut after = index.search(query, 10);
            before.sort_by(|a, b| a.document_id.cmp(&b.document_id));
            after.sort_by(|a, b| a.document_id.cmp(&b.document_id));
            assert_eq!(before.len(), after.len(), "query {}", query);
            for (x, y) in before.iter().zip(after.iter()) {
                assert_eq!(x.document_id, y.document_id);
                assert_close(x.score, y.score);
            }
        }
    }

    #[test]
    fn test_update_replaces_text() {
        let mut index = build();
        index.update(IndexDocument::new("C", "graph networks"));

        assert_eq!(index.len(), 3);
        assert_postings_consistent(&index);
        assert_eq!(index.document_frequency("unrelated"), 0);
        assert_eq!(index.document_frequency("networks"), 3);
        // Updated document moves to the last position
        assert_eq!(index.document_ids().last().map(String::as_str), Some("C"));
    }

    #[test]
    fn test_update_unknown_inserts() {
        let mut index = build();
        index.update(IndexDocument::new("D", "convolutional networks"));
        assert_eq!(index.len(), 4);
        assert!(index.contains("D"));
    }

    #[test]
    fn test_add_existing_id_keeps_ids_unique() {
        let mut index = build();
        index.add(IndexDocument::new("B", "sparse attention"));
        assert_eq!(index.len(), 3);
        assert_eq!(index.document_frequency("mechanism"), 0);
        assert_eq!(index.term_frequency("sparse", "B"), 1);
    }

    #[test]
    fn test_stats() {
        let index = build();
        let stats = index.stats();
        assert_eq!(stats.document_count, 3);
        assert_close(stats.average_length, 3.0);
        // deep learning networks attention mechanism unrelated topic text
        assert_eq!(stats.term_count, 8);
        assert_eq!(stats.k1, 1.2);
        assert_eq!(stats.b, 0.75);
    }

    #[test]
    fn test_zero_length_documents_are_indexed_but_never_match() {
        let index = Bm25Index::build(
            Bm25Params::default(),
            vec![
                IndexDocument::new("stub-like", ""),
                IndexDocument::new("A", "deep learning networks"),
                IndexDocument::new("B", "graph learning"),
            ],
        );
        assert_eq!(index.len(), 3);
        assert_close(index.average_document_length(), 5.0 / 3.0);
        let hits = index.search("learning networks", 10);
        assert!(hits.iter().all(|h| h.document_id != "stub-like"));
    }

    #[test]
    fn test_term_in_every_document_has_zero_idf() {
        let index = Bm25Index::build(
            Bm25Params::default(),
            vec![
                IndexDocument::new("A", "graph networks"),
                IndexDocument::new("B", "neural networks"),
            ],
        );
        assert_close(index.idf("networks"), 0.0);
        assert!(index.search("networks", 10).is_empty());
        assert_eq!(index.search("graph networks", 10).len(), 1);
    }
}
