//! End-to-end hybrid search over the in-memory store with scripted semantic backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scholarnet::cache::{MokaSearchCache, SearchCache};
use scholarnet::catalog::Catalog;
use scholarnet::config::SearchConfig;
use scholarnet::search::{Bm25Params, ChannelOutcome, LexicalIndex, MatchSource, SearchRequest, SearchResponse};
use scholarnet::semantic::{SemanticError, SemanticHit, SemanticSearch};
use scholarnet::store::{CreatePaper, InMemoryPaperStore, PaperDocument, UpdatePaper};

/// Returns a fixed ranking, optionally failing the first `failures` calls or sleeping first.
struct ScriptedSemantic {
    ranking: Vec<&'static str>,
    failures: usize,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedSemantic {
    fn ranking(ids: &[&'static str]) -> Self {
        ScriptedSemantic {
            ranking: ids.to_vec(),
            failures: 0,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_first(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl SemanticSearch for ScriptedSemantic {
    async fn query(&self, _text: &str, desired_count: usize) -> Result<Vec<SemanticHit>, SemanticError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if call < self.failures {
            return Err(SemanticError::Request("connection refused".to_string()));
        }
        Ok(self
            .ranking
            .iter()
            .take(desired_count)
            .enumerate()
            .map(|(i, id)| SemanticHit {
                document_id: id.to_string(),
                distance: 0.1 * (i + 1) as f64,
            })
            .collect())
    }

    async fn upsert_documents(&self, documents: &[PaperDocument]) -> Result<usize, SemanticError> {
        Ok(documents.len())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn paper(id: &str, title: &str, n_citation: i64) -> CreatePaper {
    CreatePaper {
        id: Some(id.to_string()),
        title: Some(title.to_string()),
        n_citation,
        ..Default::default()
    }
}

fn request(query: &str, bert_weight: f64, citation_weight: f64) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        size: 10,
        bert_weight,
        citation_weight,
    }
}

fn ids(response: &SearchResponse) -> Vec<&str> {
    response.results.iter().map(|h| h.document_id.as_str()).collect()
}

async fn catalog_with(semantic: Option<Arc<dyn SemanticSearch>>, config: SearchConfig) -> Catalog {
    let cache: Arc<dyn SearchCache> = Arc::new(MokaSearchCache::new(100, Duration::from_secs(60)));
    let catalog = Catalog::new(
        Arc::new(InMemoryPaperStore::new()),
        Arc::new(LexicalIndex::new(Bm25Params::default())),
        semantic,
        Some(cache),
        config,
    );
    catalog.rebuild().await.unwrap();
    for input in [
        paper("d1", "neural networks deep learning", 10),
        paper("d2", "graph networks", 500),
        paper("d3", "protein folding", 3),
    ] {
        catalog.add_paper(input).await.unwrap();
    }
    catalog
}

#[tokio::test]
async fn test_fuses_lexical_and_semantic_channels() {
    let semantic: Arc<dyn SemanticSearch> = Arc::new(ScriptedSemantic::ranking(&["d3", "d1"]));
    let catalog = catalog_with(Some(semantic), SearchConfig::default()).await;

    let response = catalog.search(&request("networks", 2.0, 0.0)).await.unwrap();

    // Lexical: d2 (shorter) then d1. Semantic: d3 then d1.
    // d3 = 1/63 + 2/61, d1 = 1/62 + 2/62, d2 = 1/61 + 2/63
    assert_eq!(ids(&response), vec!["d3", "d1", "d2"]);
    assert!(!response.degraded);
    assert_eq!(response.channels.lexical, ChannelOutcome::Used);
    assert_eq!(response.channels.semantic, ChannelOutcome::Used);

    let by_id = |id: &str| response.results.iter().find(|h| h.document_id == id).unwrap();
    assert_eq!(by_id("d1").match_source, MatchSource::Hybrid);
    assert_eq!(by_id("d2").match_source, MatchSource::LexicalOnly);
    assert_eq!(by_id("d3").match_source, MatchSource::SemanticOnly);
    assert_eq!(by_id("d3").lexical_score, None);
    assert!(by_id("d2").lexical_score.unwrap() > by_id("d1").lexical_score.unwrap());
    assert!((by_id("d1").hybrid_score - 3.0 / 62.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_zero_bert_weight_follows_lexical_order() {
    let semantic: Arc<dyn SemanticSearch> = Arc::new(ScriptedSemantic::ranking(&["d3", "d1"]));
    let catalog = catalog_with(Some(semantic), SearchConfig::default()).await;

    let response = catalog.search(&request("networks", 0.0, 0.0)).await.unwrap();
    assert_eq!(ids(&response), vec!["d2", "d1", "d3"]);
}

#[tokio::test]
async fn test_citation_nudge_breaks_near_ties() {
    let semantic: Arc<dyn SemanticSearch> = Arc::new(ScriptedSemantic::ranking(&["d3", "d1"]));
    let catalog = catalog_with(Some(semantic), SearchConfig::default()).await;

    // d2 has the most citations in the window and gains 0.5 * 0.05 = 0.025
    let response = catalog.search(&request("networks", 2.0, 0.5)).await.unwrap();
    assert_eq!(response.results[0].document_id, "d2");
    assert!((response.results[0].citation_contribution - 0.025).abs() < 1e-12);
    let d3 = response.results.iter().find(|h| h.document_id == "d3").unwrap();
    assert_eq!(d3.citation_contribution, 0.0);
}

#[tokio::test]
async fn test_citation_only_mode_ignores_bert_weight() {
    let semantic: Arc<dyn SemanticSearch> = Arc::new(ScriptedSemantic::ranking(&["d3", "d1"]));
    let catalog = catalog_with(Some(semantic), SearchConfig::default()).await;

    for bert_weight in [0.0, 2.0, 8.0] {
        let response = catalog.search(&request("networks", bert_weight, 1.0)).await.unwrap();
        assert_eq!(ids(&response), vec!["d2", "d1", "d3"]);
        assert_eq!(response.results[0].hybrid_score, 500.0);
    }
}

#[tokio::test]
async fn test_semantic_failure_degrades_to_lexical() {
    let semantic: Arc<dyn SemanticSearch> = Arc::new(ScriptedSemantic::ranking(&["d3", "d1"]).failing_first(1));
    let catalog = catalog_with(Some(semantic), SearchConfig::default()).await;

    let first = catalog.search(&request("networks", 2.0, 0.0)).await.unwrap();
    assert!(first.degraded);
    assert_eq!(first.channels.semantic, ChannelOutcome::Failed);
    assert_eq!(ids(&first), vec!["d2", "d1"]);

    // The degraded answer was not cached, so the recovered backend is consulted
    let second = catalog.search(&request("networks", 2.0, 0.0)).await.unwrap();
    assert!(!second.degraded);
    assert_eq!(second.results.len(), 3);
}

#[tokio::test]
async fn test_slow_semantic_times_out() {
    let semantic: Arc<dyn SemanticSearch> =
        Arc::new(ScriptedSemantic::ranking(&["d3"]).slow(Duration::from_millis(500)));
    let config = SearchConfig {
        semantic_timeout_ms: 50,
        ..SearchConfig::default()
    };
    let catalog = catalog_with(Some(semantic), config).await;

    let response = catalog.search(&request("networks", 2.0, 0.0)).await.unwrap();
    assert!(response.degraded);
    assert_eq!(response.channels.semantic, ChannelOutcome::TimedOut);
    assert_eq!(ids(&response), vec!["d2", "d1"]);
}

#[tokio::test]
async fn test_unresolvable_and_stub_hits_are_dropped() {
    let semantic: Arc<dyn SemanticSearch> = Arc::new(ScriptedSemantic::ranking(&["ghost", "s1", "d1"]));
    let catalog = catalog_with(Some(semantic), SearchConfig::default()).await;
    let mut stub = paper("s1", "networks of references", 0);
    stub.is_stub = true;
    catalog.add_paper(stub).await.unwrap();

    let response = catalog.search(&request("networks", 2.0, 0.0)).await.unwrap();
    let found = ids(&response);
    assert!(!found.contains(&"ghost"));
    assert!(!found.contains(&"s1"));
    assert_eq!(found.len(), 2);
    assert_eq!(response.results[1].position, 2);
}

#[tokio::test]
async fn test_removed_paper_leaves_results() {
    let catalog = catalog_with(None, SearchConfig::default()).await;
    assert_eq!(catalog.search(&request("graph", 2.0, 0.0)).await.unwrap().results.len(), 1);

    catalog.remove_paper("d2").await.unwrap();
    let response = catalog.search(&request("graph", 2.0, 0.0)).await.unwrap();
    assert!(response.results.is_empty());
    assert_eq!(catalog.index_stats().unwrap().document_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_searches_during_mutation() {
    let catalog = Arc::new(catalog_with(None, SearchConfig::default()).await);

    let writer = {
        let catalog = Arc::clone(&catalog);
        tokio::spawn(async move {
            for i in 0..50 {
                catalog
                    .add_paper(paper(&format!("w{}", i), "streaming graph networks", i))
                    .await
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let catalog = Arc::clone(&catalog);
            tokio::spawn(async move {
                for _ in 0..25 {
                    let response = catalog.search(&request("graph networks", 2.0, 0.5)).await.unwrap();
                    assert!(!response.degraded);
                    for (i, hit) in response.results.iter().enumerate() {
                        assert_eq!(hit.position, i + 1);
                    }
                }
            })
        })
        .collect();

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    assert_eq!(catalog.index_stats().unwrap().document_count, 53);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_search_overlapping_update_is_not_cached() {
    let semantic: Arc<dyn SemanticSearch> =
        Arc::new(ScriptedSemantic::ranking(&[]).slow(Duration::from_millis(300)));
    let catalog = Arc::new(catalog_with(Some(semantic), SearchConfig::default()).await);

    let in_flight = {
        let catalog = Arc::clone(&catalog);
        tokio::spawn(async move { catalog.search(&request("graph", 2.0, 0.0)).await })
    };

    // The lexical channel has already answered; the semantic channel is still sleeping
    tokio::time::sleep(Duration::from_millis(100)).await;
    catalog
        .update_paper(
            "d2",
            UpdatePaper {
                title: Some("protein design".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let overlapped = in_flight.await.unwrap().unwrap();
    assert_eq!(ids(&overlapped), vec!["d2"]);

    let after = catalog.search(&request("graph", 2.0, 0.0)).await.unwrap();
    assert!(after.results.is_empty(), "d2 no longer matches but was served from cache");
    assert!(!after.degraded);
}
