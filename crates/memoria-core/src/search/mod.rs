//! Hybrid Searcher (C6).
//!
//! Combines three independently-degradable signals — FTS5/BM25 keyword
//! match, term-vector cosine similarity, and one-hop graph-neighbor score
//! propagation — and fuses them by weighted sum (default) or Reciprocal
//! Rank Fusion, mirroring the shape of the reference project's
//! `search/hybrid.rs` generalized from two sources to three and from a
//! fixed RRF-only design to a configurable fusion mode (§9 open question
//! 2 in the design ledger).
//!
//! An [`EmbeddingProvider`] seam exists for a fourth, optional semantic
//! signal; this crate ships zero implementations of it and zero embedding
//! dependencies, matching the reference project's own stance that
//! semantic search is a pluggable enhancement, not a hard dependency.

mod cache;
pub mod fusion;
mod keyword;

use std::collections::HashMap;

pub use cache::{CacheKey, SearchCache};
pub use keyword::KeywordSearcher;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::model::{Filters, Hit, Note, SearchSource};
use crate::storage::Storage;
use crate::terms::{cosine_similarity, TermExtractor};

/// A pluggable source of dense semantic vectors. No implementation ships in
/// this crate; callers that want a semantic signal supply their own.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub struct HybridSearcher<'a> {
    storage: &'a Storage,
    config: SearchConfig,
    cache: &'a SearchCache,
    extractor: TermExtractor,
}

impl<'a> HybridSearcher<'a> {
    /// `cache` is borrowed rather than owned so a caller holding one
    /// long-lived `SearchCache` (e.g. `Engine`) gets actual cache hits
    /// across separate `HybridSearcher::new` calls instead of every call
    /// starting from an empty cache.
    pub fn new(storage: &'a Storage, config: SearchConfig, cache: &'a SearchCache) -> Self {
        Self {
            storage,
            config,
            cache,
            extractor: TermExtractor::default(),
        }
    }

    /// Source lists are fetched at `limit * multiplier` so fusion has room
    /// to re-rank before truncating to the caller's requested `limit`.
    fn effective_source_limit(&self, limit: i64) -> i64 {
        (limit * 3).max(limit)
    }

    pub fn search(
        &self,
        profile: &str,
        query: &str,
        limit: i64,
        min_score: f64,
        filters: &Filters,
    ) -> Result<Vec<Hit>> {
        let cache_key = CacheKey::new(profile, query, filters, limit, min_score);
        if let Some(hits) = self.cache.get(&cache_key) {
            return Ok(hits);
        }

        let source_limit = self.effective_source_limit(limit);

        let keyword_searcher = KeywordSearcher::new(self.storage);
        let keyword_hits = keyword_searcher.search(profile, query, source_limit, filters)?;
        let keyword_list: Vec<(i64, f64)> =
            keyword_hits.iter().map(|(note, score)| (note.id, *score)).collect();

        let term_list = self.term_signal(profile, query, source_limit as usize);
        let graph_list = self.graph_signal(profile, &keyword_list, &term_list)?;

        let fused = match self.config.fusion.as_str() {
            "rrf" => fusion::reciprocal_rank_fusion(
                &[keyword_list.clone(), term_list.clone(), graph_list.clone()],
                fusion::DEFAULT_RRF_K,
            ),
            _ => fusion::weighted_combination(&[
                (keyword_list.clone(), self.config.weights.keyword),
                (term_list.clone(), self.config.weights.term),
                (graph_list.clone(), self.config.weights.graph),
            ]),
        };

        let keyword_ids: std::collections::HashSet<i64> =
            keyword_list.iter().map(|(id, _)| *id).collect();
        let term_ids: std::collections::HashSet<i64> = term_list.iter().map(|(id, _)| *id).collect();
        let graph_ids: std::collections::HashSet<i64> = graph_list.iter().map(|(id, _)| *id).collect();

        let mut hits = Vec::new();
        for (id, score) in fused {
            if score < min_score {
                continue;
            }
            let Some(note) = self.storage.peek(profile, id)? else {
                continue;
            };
            if !note_matches_filters(&note, filters) {
                continue;
            }
            let mut sources = Vec::new();
            if keyword_ids.contains(&id) {
                sources.push(SearchSource::Keyword);
            }
            if term_ids.contains(&id) {
                sources.push(SearchSource::Term);
            }
            if graph_ids.contains(&id) {
                sources.push(SearchSource::Graph);
            }
            hits.push(Hit { note, score, sources });
        }

        // Fusion itself only breaks ties by id (it never sees note metadata);
        // re-sort here so equal-score hits land most-recent-first (§8 inv. 9).
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.note.created_at.cmp(&a.note.created_at))
        });
        hits.truncate(limit.max(0) as usize);

        self.cache.put(cache_key, hits.clone());
        Ok(hits)
    }

    /// Cosine similarity between the query's own term vector and every
    /// note's stored entity vector from the last graph build. Empty if no
    /// graph has been built yet for this profile — the signal degrades to
    /// nothing rather than erroring.
    fn term_signal(&self, profile: &str, query: &str, limit: usize) -> Vec<(i64, f64)> {
        let query_vector = self.extractor.top_terms_single(query, 20);
        if query_vector.is_empty() {
            return Vec::new();
        }
        let Ok(vectors) = self.storage.term_vectors(profile) else {
            return Vec::new();
        };
        let mut scored: Vec<(i64, f64)> = vectors
            .into_iter()
            .map(|(id, vector)| (id, cosine_similarity(&query_vector, &vector)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        scored
    }

    /// One-hop propagation: every keyword/term hit pushes `damping * score`
    /// onto its graph neighbors, summed across sources. Neighbors that are
    /// themselves already top hits still receive propagated credit, since
    /// they independently attest to the same cluster of related notes.
    fn graph_signal(
        &self,
        profile: &str,
        keyword_list: &[(i64, f64)],
        term_list: &[(i64, f64)],
    ) -> Result<Vec<(i64, f64)>> {
        let damping = self.config.graph_damping;
        let mut seed_scores: HashMap<i64, f64> = HashMap::new();
        for &(id, score) in keyword_list.iter().chain(term_list.iter()) {
            let entry = seed_scores.entry(id).or_insert(0.0);
            *entry = entry.max(score);
        }

        let mut propagated: HashMap<i64, f64> = HashMap::new();
        for (&id, &score) in &seed_scores {
            let edges = self.storage.related(profile, id)?;
            for edge in edges {
                let neighbor = if edge.source_memory_id == id {
                    edge.target_memory_id
                } else {
                    edge.source_memory_id
                };
                *propagated.entry(neighbor).or_insert(0.0) += damping * score * edge.similarity;
            }
        }

        let mut result: Vec<(i64, f64)> = propagated.into_iter().collect();
        result.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(result)
    }
}

fn note_matches_filters(note: &Note, filters: &Filters) -> bool {
    if !filters.tags.is_empty() && !filters.tags.iter().all(|t| note.tags.contains(t)) {
        return false;
    }
    if let Some(project) = &filters.project {
        if note.project_name.as_deref() != Some(project.as_str()) {
            return false;
        }
    }
    if let Some(category) = &filters.category {
        if note.category.as_deref() != Some(category.as_str()) {
            return false;
        }
    }
    if let Some(min_importance) = filters.min_importance {
        if note.importance < min_importance {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::error::CancellationToken;
    use crate::model::AddInput;
    use std::time::Duration;
    use tempfile::tempdir;

    fn storage() -> (Storage, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("memory.db")).unwrap();
        (storage, dir)
    }

    fn cache() -> SearchCache {
        SearchCache::new(256, Duration::from_secs(300))
    }

    fn add(storage: &Storage, content: &str) -> i64 {
        storage
            .add("default", AddInput { content: content.to_string(), ..Default::default() })
            .unwrap()
            .id
    }

    #[test]
    fn keyword_only_search_finds_matching_note_before_any_graph_build() {
        let (storage, _dir) = storage();
        add(&storage, "Built React authentication using JWT tokens");
        let cache = cache();
        let searcher = HybridSearcher::new(&storage, SearchConfig::default(), &cache);
        let hits = searcher
            .search("default", "authentication", 10, 0.0, &Filters::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].sources.contains(&SearchSource::Keyword));
    }

    #[test]
    fn graph_signal_surfaces_neighbors_not_matched_by_keyword() {
        let (storage, _dir) = storage();
        add(&storage, "Built React authentication using JWT tokens");
        let neighbor_id = add(&storage, "Implemented JWT token refresh using React hooks");
        storage
            .build_graph("default", &GraphConfig::default(), &CancellationToken::new())
            .unwrap();

        let cache = cache();
        let searcher = HybridSearcher::new(&storage, SearchConfig::default(), &cache);
        let hits = searcher
            .search("default", "authentication", 10, 0.0, &Filters::default())
            .unwrap();
        assert!(hits.iter().any(|h| h.note.id == neighbor_id));
    }

    #[test]
    fn rrf_fusion_mode_is_selectable_via_config() {
        let (storage, _dir) = storage();
        add(&storage, "Optimized database queries using indexes");
        let mut config = SearchConfig::default();
        config.fusion = "rrf".to_string();
        let cache = cache();
        let searcher = HybridSearcher::new(&storage, config, &cache);
        let hits = searcher
            .search("default", "database queries", 10, 0.0, &Filters::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn filters_exclude_non_matching_notes() {
        let (storage, _dir) = storage();
        storage
            .add(
                "default",
                AddInput {
                    content: "Optimized database queries using indexes".to_string(),
                    category: Some("backend".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let cache = cache();
        let searcher = HybridSearcher::new(&storage, SearchConfig::default(), &cache);
        let mut filters = Filters::default();
        filters.category = Some("frontend".to_string());
        let hits = searcher
            .search("default", "database queries", 10, 0.0, &filters)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn repeated_query_is_served_from_cache() {
        let (storage, _dir) = storage();
        add(&storage, "Optimized database queries using indexes");
        let cache = cache();
        let searcher = HybridSearcher::new(&storage, SearchConfig::default(), &cache);
        let first = searcher
            .search("default", "database queries", 10, 0.0, &Filters::default())
            .unwrap();
        let second = searcher
            .search("default", "database queries", 10, 0.0, &Filters::default())
            .unwrap();
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn equal_scoring_hits_break_ties_by_recency() {
        let (storage, _dir) = storage();
        let older = add(&storage, "Optimized database queries using indexes");
        let newer = add(&storage, "Optimized database queries using covering indexes");
        let cache = cache();
        let searcher = HybridSearcher::new(&storage, SearchConfig::default(), &cache);
        let hits = searcher
            .search("default", "database queries indexes", 10, 0.0, &Filters::default())
            .unwrap();
        let older_pos = hits.iter().position(|h| h.note.id == older).unwrap();
        let newer_pos = hits.iter().position(|h| h.note.id == newer).unwrap();
        if (hits[older_pos].score - hits[newer_pos].score).abs() < 1e-9 {
            assert!(newer_pos < older_pos);
        }
    }
}
