//! Fusion algorithms (C6).
//!
//! Grounded directly on `search/hybrid.rs`'s `reciprocal_rank_fusion` and
//! `linear_combination` free functions, generalized from two ranked lists
//! to three (keyword/term/graph) and from `(String, f32)` pairs to
//! `(i64, f64)` note-id/score pairs.

use std::collections::HashMap;

pub const DEFAULT_RRF_K: f64 = 60.0;

/// Reciprocal Rank Fusion across any number of ranked signal lists:
/// `score(id) = sum of 1/(k + rank(id))` across every list containing it.
pub fn reciprocal_rank_fusion(lists: &[Vec<(i64, f64)>], k: f64) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    for list in lists {
        for (rank, (id, _)) in list.iter().enumerate() {
            *scores.entry(*id).or_default() += 1.0 / (k + rank as f64);
        }
    }
    sorted(scores)
}

/// Weighted linear combination: each list is normalized by its own top
/// score, then summed with its configured weight.
pub fn weighted_combination(lists: &[(Vec<(i64, f64)>, f64)]) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    for (list, weight) in lists {
        let max_score = list.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max).max(0.001);
        for (id, score) in list {
            *scores.entry(*id).or_default() += (score / max_score) * weight;
        }
    }
    sorted(scores)
}

fn sorted(scores: HashMap<i64, f64>) -> Vec<(i64, f64)> {
    let mut results: Vec<(i64, f64)> = scores.into_iter().collect();
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_rewards_items_in_every_list() {
        let keyword = vec![(1, 0.9), (2, 0.8), (3, 0.7)];
        let term = vec![(2, 0.95), (1, 0.85), (4, 0.75)];
        let graph = vec![(1, 0.5), (5, 0.4)];
        let results = reciprocal_rank_fusion(&[keyword, term, graph], DEFAULT_RRF_K);
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn rrf_with_empty_lists_keeps_the_nonempty_one() {
        let keyword: Vec<(i64, f64)> = vec![];
        let term = vec![(1, 0.9)];
        let graph: Vec<(i64, f64)> = vec![];
        let results = reciprocal_rank_fusion(&[keyword, term, graph], DEFAULT_RRF_K);
        assert_eq!(results, vec![(1, 1.0 / DEFAULT_RRF_K)]);
    }

    #[test]
    fn weighted_combination_respects_weights() {
        let keyword = vec![(1, 1.0)];
        let term = vec![(2, 1.0)];
        let graph: Vec<(i64, f64)> = vec![];
        let results = weighted_combination(&[(keyword, 0.9), (term, 0.1), (graph, 0.2)]);
        let score = |id: i64| results.iter().find(|(i, _)| *i == id).map(|(_, s)| *s);
        assert!(score(1).unwrap() > score(2).unwrap());
    }

    #[test]
    fn results_are_sorted_descending() {
        let a = vec![(1, 0.2), (2, 0.9), (3, 0.5)];
        let results = weighted_combination(&[(a, 1.0)]);
        for w in results.windows(2) {
            assert!(w[0].1 >= w[1].1);
        }
    }
}
