/// Weighted reciprocal rank fusion and citation blending
///
/// BM25 scores and embedding distances are not on comparable scales, so the
/// two channels are merged by rank only:
///
/// ```text
/// hybrid(d) = 1 / (K + lexical_rank(d)) + bert_weight / (K + semantic_rank(d))
/// ```
///
/// A document missing from a channel takes that channel's length + 1 as its
/// rank, one past the worst listed rank, rather than being dropped.

use std::collections::HashMap;

use super::bm25::LexicalHit;
use super::{MatchSource, SearchHit};
use crate::semantic::SemanticHit;

/// RRF smoothing constant. Dampens the pull of rank-1 outliers.
pub const RRF_K: f64 = 60.0;

/// Scale applied to the weighted citation signal so it acts as a tie-breaking nudge.
pub const CITATION_SCALE: f64 = 0.05;

/// Citation weights at or above this order results purely by citation count.
pub const CITATION_ONLY_THRESHOLD: f64 = 1.0;

/// One document after rank fusion, before metadata resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub document_id: String,
    /// Rank used for fusion (list length + 1 when absent)
    pub lexical_rank: usize,
    /// BM25 score, when the lexical channel returned the document
    pub lexical_score: Option<f64>,
    pub semantic_rank: usize,
    /// Distance reported by the semantic backend, when it returned the document
    pub semantic_distance: Option<f64>,
    pub lexical_rrf: f64,
    pub semantic_rrf: f64,
    pub fusion_score: f64,
    pub match_source: MatchSource,
}

#[derive(Default)]
struct Entry {
    lexical: Option<(usize, f64)>,
    semantic: Option<(usize, f64)>,
}

/// Fuse both channels and keep the best `limit` candidates.
///
/// The union is built in first-seen order (lexical list, then semantic-only
/// documents in semantic order) and sorted stably, so ties are deterministic.
pub fn fuse(
    lexical: &[LexicalHit],
    semantic: &[SemanticHit],
    bert_weight: f64,
    limit: usize,
) -> Vec<FusedCandidate> {
    let mut order: Vec<String> = Vec::with_capacity(lexical.len() + semantic.len());
    let mut entries: HashMap<String, Entry> = HashMap::new();

    for hit in lexical {
        let entry = entries.entry(hit.document_id.clone()).or_insert_with(|| {
            order.push(hit.document_id.clone());
            Entry::default()
        });
        if entry.lexical.is_none() {
            entry.lexical = Some((hit.rank, hit.score));
        }
    }

    for (i, hit) in semantic.iter().enumerate() {
        let entry = entries.entry(hit.document_id.clone()).or_insert_with(|| {
            order.push(hit.document_id.clone());
            Entry::default()
        });
        if entry.semantic.is_none() {
            entry.semantic = Some((i + 1, hit.distance));
        }
    }

    let lexical_missing_rank = lexical.len() + 1;
    let semantic_missing_rank = semantic.len() + 1;

    let mut fused: Vec<FusedCandidate> = order
        .into_iter()
        .filter_map(|id| {
            let entry = entries.remove(&id)?;
            let lexical_rank = entry.lexical.map(|(rank, _)| rank).unwrap_or(lexical_missing_rank);
            let semantic_rank = entry.semantic.map(|(rank, _)| rank).unwrap_or(semantic_missing_rank);
            let lexical_rrf = 1.0 / (RRF_K + lexical_rank as f64);
            let semantic_rrf = 1.0 / (RRF_K + semantic_rank as f64);

            let match_source = match (entry.lexical.is_some(), entry.semantic.is_some()) {
                (true, true) => MatchSource::Hybrid,
                (true, false) => MatchSource::LexicalOnly,
                _ => MatchSource::SemanticOnly,
            };

            Some(FusedCandidate {
                document_id: id,
                lexical_rank,
                lexical_score: entry.lexical.map(|(_, score)| score),
                semantic_rank,
                semantic_distance: entry.semantic.map(|(_, distance)| distance),
                lexical_rrf,
                semantic_rrf,
                fusion_score: lexical_rrf + semantic_rrf * bert_weight,
                match_source,
            })
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fusion_score
            .partial_cmp(&a.fusion_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused.truncate(limit);
    fused
}

/// Min-max normalization over the given window.
///
/// When every value is equal (including a single value) all normalize to 0.
pub fn normalize_window(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|&v| (v - min) / (max - min)).collect()
}

/// Blend the citation signal into `hybrid_score` and re-sort.
///
/// Normalization is relative to the hits passed in (the current result
/// window), not the whole corpus. With `citation_weight >= 1.0` the fused
/// score is discarded and hits are ordered by raw citation count.
pub fn blend_citations(hits: &mut [SearchHit], citation_weight: f64) {
    if hits.is_empty() {
        return;
    }

    if citation_weight >= CITATION_ONLY_THRESHOLD {
        for hit in hits.iter_mut() {
            hit.citation_contribution = 0.0;
            hit.hybrid_score = hit.citation_count as f64;
        }
        hits.sort_by(|a, b| b.citation_count.cmp(&a.citation_count));
        return;
    }

    let raw: Vec<f64> = hits.iter().map(|h| h.citation_count as f64).collect();
    let normalized = normalize_window(&raw);

    for (hit, norm) in hits.iter_mut().zip(normalized) {
        hit.citation_contribution = norm * citation_weight * CITATION_SCALE;
        hit.hybrid_score = hit.fusion_score + hit.citation_contribution;
    }

    hits.sort_by(|a, b| {
        b.hybrid_score
            .partial_cmp(&a.hybrid_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Paper;

    fn lexical(ids: &[&str]) -> Vec<LexicalHit> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| LexicalHit {
                document_id: id.to_string(),
                rank: i + 1,
                score: 10.0 - i as f64,
            })
            .collect()
    }

    fn semantic(ids: &[&str]) -> Vec<SemanticHit> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| SemanticHit {
                document_id: id.to_string(),
                distance: 0.1 * (i + 1) as f64,
            })
            .collect()
    }

    fn position_of(fused: &[FusedCandidate], id: &str) -> usize {
        fused.iter().position(|c| c.document_id == id).unwrap()
    }

    fn hit(id: &str, fusion_score: f64, citations: i64) -> SearchHit {
        SearchHit {
            position: 0,
            document_id: id.to_string(),
            hybrid_score: fusion_score,
            fusion_score,
            lexical_rank: 1,
            lexical_score: None,
            semantic_rank: 1,
            semantic_distance: None,
            citation_count: citations,
            citation_contribution: 0.0,
            match_source: MatchSource::Hybrid,
            paper: Paper::new(id),
        }
    }

    #[test]
    fn test_union_not_intersection() {
        let fused = fuse(&lexical(&["a", "b"]), &semantic(&["c", "a"]), 2.0, 10);
        assert_eq!(fused.len(), 3);

        let a = &fused[position_of(&fused, "a")];
        assert_eq!(a.match_source, MatchSource::Hybrid);
        let b = &fused[position_of(&fused, "b")];
        assert_eq!(b.match_source, MatchSource::LexicalOnly);
        assert_eq!(b.semantic_distance, None);
        let c = &fused[position_of(&fused, "c")];
        assert_eq!(c.match_source, MatchSource::SemanticOnly);
        assert_eq!(c.lexical_score, None);
    }

    #[test]
    fn test_missing_channel_gets_soft_penalty_rank() {
        let fused = fuse(&lexical(&["a", "b"]), &semantic(&["c", "d", "e"]), 2.0, 10);
        let b = &fused[position_of(&fused, "b")];
        assert_eq!(b.lexical_rank, 2);
        assert_eq!(b.semantic_rank, 4);
        let e = &fused[position_of(&fused, "e")];
        assert_eq!(e.lexical_rank, 3);
        assert_eq!(e.semantic_rank, 3);
    }

    #[test]
    fn test_hybrid_score_formula() {
        let fused = fuse(&lexical(&["a"]), &semantic(&["b", "a"]), 2.0, 10);
        let a = &fused[position_of(&fused, "a")];
        let expected = 1.0 / 61.0 + 2.0 / 62.0;
        assert!((a.fusion_score - expected).abs() < 1e-12);
        assert!((a.lexical_rrf - 1.0 / 61.0).abs() < 1e-12);
        assert!((a.semantic_rrf - 1.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn test_sorted_descending_and_truncated() {
        let fused = fuse(&lexical(&["a", "b", "c"]), &semantic(&["c", "b", "a"]), 1.0, 2);
        assert_eq!(fused.len(), 2);
        assert!(fused[0].fusion_score >= fused[1].fusion_score);
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        // Symmetric ranks with weight 1.0 produce identical scores
        let fused = fuse(&lexical(&["a", "b"]), &semantic(&["b", "a"]), 1.0, 10);
        assert_eq!(fused[0].document_id, "a");
        assert_eq!(fused[1].document_id, "b");
    }

    #[test]
    fn test_empty_inputs() {
        assert!(fuse(&[], &[], 2.0, 10).is_empty());
        let fused = fuse(&[], &semantic(&["x", "y"]), 2.0, 10);
        assert_eq!(fused[0].document_id, "x");
        assert_eq!(fused[1].document_id, "y");
    }

    #[test]
    fn test_bert_weight_monotonic_for_semantic_only_document() {
        // "s" appears only semantically, "l" only lexically at the same rank
        let lex = lexical(&["l"]);
        let sem = semantic(&["s"]);

        let mut last_position = usize::MAX;
        for weight in [0.0, 0.5, 1.0, 2.0, 4.0] {
            let fused = fuse(&lex, &sem, weight, 10);
            let position = position_of(&fused, "s");
            assert!(position <= last_position, "weight {} moved s down", weight);
            last_position = position;
        }
        assert_eq!(last_position, 0);
    }

    #[test]
    fn test_normalize_window() {
        assert!(normalize_window(&[]).is_empty());
        assert_eq!(normalize_window(&[7.0]), vec![0.0]);
        assert_eq!(normalize_window(&[3.0, 3.0]), vec![0.0, 0.0]);
        let n = normalize_window(&[0.0, 50.0, 100.0]);
        assert!((n[1] - 0.5).abs() < 1e-12);
        assert!((n[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_citation_nudge() {
        let mut hits = vec![hit("a", 0.0400, 0), hit("b", 0.0390, 1000)];
        blend_citations(&mut hits, 0.5);

        // b gains 1.0 * 0.5 * 0.05 = 0.025 and overtakes a
        assert_eq!(hits[0].document_id, "b");
        assert!((hits[0].citation_contribution - 0.025).abs() < 1e-12);
        assert!((hits[0].hybrid_score - 0.064).abs() < 1e-12);
        assert_eq!(hits[1].citation_contribution, 0.0);
    }

    #[test]
    fn test_zero_citation_weight_keeps_fusion_order() {
        let mut hits = vec![hit("a", 0.04, 0), hit("b", 0.03, 500)];
        blend_citations(&mut hits, 0.0);
        assert_eq!(hits[0].document_id, "a");
        assert_eq!(hits[0].hybrid_score, 0.04);
    }

    #[test]
    fn test_equal_citations_contribute_nothing() {
        let mut hits = vec![hit("a", 0.04, 12), hit("b", 0.03, 12)];
        blend_citations(&mut hits, 0.9);
        assert!(hits.iter().all(|h| h.citation_contribution == 0.0));
        assert_eq!(hits[0].document_id, "a");
    }

    #[test]
    fn test_citation_only_mode_orders_by_raw_count() {
        let mut hits = vec![hit("a", 0.05, 3), hit("b", 0.04, 90), hit("c", 0.03, 15)];
        blend_citations(&mut hits, 1.0);
        let ids: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(hits[0].hybrid_score, 90.0);
    }

    #[test]
    fn test_citation_only_mode_ignores_bert_weight() {
        let lex = lexical(&["a", "b", "c"]);
        let sem = semantic(&["c", "a", "b"]);
        let citations: HashMap<&str, i64> = [("a", 5), ("b", 50), ("c", 20)].into_iter().collect();

        let order_for = |weight: f64| -> Vec<String> {
            let mut hits: Vec<SearchHit> = fuse(&lex, &sem, weight, 10)
                .into_iter()
                .map(|c| hit(&c.document_id, c.fusion_score, citations[c.document_id.as_str()]))
                .collect();
            blend_citations(&mut hits, 1.0);
            hits.into_iter().map(|h| h.document_id).collect()
        };

        assert_eq!(order_for(0.0), vec!["b", "c", "a"]);
        assert_eq!(order_for(2.0), order_for(0.0));
        assert_eq!(order_for(10.0), order_for(0.0));
    }
}
