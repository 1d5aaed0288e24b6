//! Term Extractor (C4).
//!
//! Turns notes into per-note sparse term vectors: tokenize (preserving both
//! the joined and split forms of camelCase/snake_case identifiers),
//! stop-word filter, unigrams + bigrams, TF·IDF, top-k selection. The
//! extractor is deterministic given `(corpus, stop-words, k)`.

use std::collections::{HashMap, HashSet};

/// Terms that are never stop-worded even though they are short or common,
/// because they carry technical meaning in this domain.
const PROTECTED_TERMS: &[&str] = &[
    "api", "sql", "jwt", "ssl", "ui", "db", "ci", "cd", "os", "io", "ml", "ai",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
    "he", "her", "his", "i", "in", "is", "it", "its", "of", "on", "or", "our", "she", "that",
    "the", "their", "there", "these", "they", "this", "to", "was", "we", "were", "will",
    "with", "you", "your",
];

const MIN_TOKEN_LEN: usize = 2;
const MAX_TOKEN_LEN: usize = 40;
const TOP_K: usize = 20;

#[derive(Debug, Clone)]
pub struct TermExtractorConfig {
    pub top_k: usize,
    pub domain_stop_words: Vec<String>,
}

impl Default for TermExtractorConfig {
    fn default() -> Self {
        Self {
            top_k: TOP_K,
            domain_stop_words: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TermExtractor {
    config: TermExtractorConfig,
}

impl TermExtractor {
    pub fn new(config: TermExtractorConfig) -> Self {
        Self { config }
    }

    fn stop_words(&self) -> HashSet<&str> {
        let mut set: HashSet<&str> = STOP_WORDS.iter().copied().collect();
        for w in &self.config.domain_stop_words {
            set.insert(w.as_str());
        }
        set
    }

    /// Splits `token` on camelCase/snake_case boundaries, returning the
    /// original joined token plus each split part, e.g. `fastApi` yields
    /// `["fastapi", "fast", "api"]`.
    fn split_compound(token: &str) -> Vec<String> {
        let joined = token.to_lowercase();
        let mut parts = Vec::new();
        let mut current = String::new();
        let chars: Vec<char> = token.chars().collect();
        for (i, &c) in chars.iter().enumerate() {
            if c == '_' {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
                continue;
            }
            if c.is_uppercase() && i > 0 && !chars[i - 1].is_uppercase() && !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            current.push(c.to_ascii_lowercase());
        }
        if !current.is_empty() {
            parts.push(current);
        }

        let mut result = vec![joined];
        if parts.len() > 1 {
            result.extend(parts);
        }
        result
    }

    /// Tokenizes `text`: lowercase, split on non-alphanumeric, camelCase/
    /// snake_case aware, length-filtered.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for raw in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
            if raw.is_empty() {
                continue;
            }
            for token in Self::split_compound(raw) {
                if token.chars().count() >= MIN_TOKEN_LEN && token.chars().count() <= MAX_TOKEN_LEN {
                    tokens.push(token);
                }
            }
        }
        tokens
    }

    fn is_stop_word(&self, token: &str, stop_words: &HashSet<&str>) -> bool {
        if PROTECTED_TERMS.contains(&token) {
            return false;
        }
        stop_words.contains(token)
    }

    /// Unigrams plus bigrams of adjacent non-stop-word tokens, after
    /// stop-word filtering of unigrams.
    fn ngrams(&self, tokens: &[String]) -> Vec<String> {
        let stop_words = self.stop_words();
        let kept: Vec<&String> = tokens
            .iter()
            .filter(|t| !self.is_stop_word(t, &stop_words))
            .collect();

        let mut grams: Vec<String> = kept.iter().map(|s| s.to_string()).collect();
        for window in kept.windows(2) {
            grams.push(format!("{} {}", window[0], window[1]));
        }
        grams
    }

    /// Per-note term frequency (raw count / total grams in that note).
    fn term_frequencies(&self, text: &str) -> HashMap<String, f64> {
        let tokens = self.tokenize(text);
        let grams = self.ngrams(&tokens);
        let total = grams.len().max(1) as f64;
        let mut counts: HashMap<String, f64> = HashMap::new();
        for gram in grams {
            *counts.entry(gram).or_insert(0.0) += 1.0;
        }
        for v in counts.values_mut() {
            *v /= total;
        }
        counts
    }

    /// Computes top-k TF·IDF entities for every note in `corpus`, a slice
    /// of `(note_id, content)`. IDF is computed once over the whole corpus.
    pub fn build_vectors(&self, corpus: &[(i64, String)]) -> HashMap<i64, Vec<(String, f64)>> {
        let n = corpus.len() as f64;
        let per_note_tf: Vec<(i64, HashMap<String, f64>)> = corpus
            .iter()
            .map(|(id, content)| (*id, self.term_frequencies(content)))
            .collect();

        let mut document_frequency: HashMap<&str, f64> = HashMap::new();
        for (_, tf) in &per_note_tf {
            for term in tf.keys() {
                *document_frequency.entry(term.as_str()).or_insert(0.0) += 1.0;
            }
        }

        let idf = |term: &str| -> f64 {
            let df = document_frequency.get(term).copied().unwrap_or(0.0);
            ((n + 1.0) / (1.0 + df)).ln() + 1.0
        };

        let mut out = HashMap::with_capacity(per_note_tf.len());
        for (id, tf) in per_note_tf {
            let mut scored: Vec<(String, f64, f64)> = tf
                .into_iter()
                .map(|(term, tf_value)| {
                    let df = document_frequency.get(term.as_str()).copied().unwrap_or(0.0);
                    (term.clone(), tf_value * idf(&term), df)
                })
                .collect();

            // Highest TF·IDF first; ties broken by ascending document
            // frequency (rarer wins), then lexicographically.
            scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
                    .then_with(|| a.0.cmp(&b.0))
            });

            let top_k = scored
                .into_iter()
                .take(self.config.top_k)
                .map(|(term, score, _)| (term, score))
                .collect();
            out.insert(id, top_k);
        }
        out
    }

    /// Convenience for scoring a single piece of text outside a full corpus
    /// build (used by compression's summary-line generation). IDF collapses
    /// to a constant since there is no corpus, so this ranks by raw TF.
    pub fn top_terms_single(&self, text: &str, k: usize) -> Vec<(String, f64)> {
        let mut tf: Vec<(String, f64)> = self.term_frequencies(text).into_iter().collect();
        tf.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        tf.into_iter().take(k).collect()
    }
}

/// Cosine similarity between two sparse weighted term vectors over their
/// shared term set.
pub fn cosine_similarity(a: &[(String, f64)], b: &[(String, f64)]) -> f64 {
    let a_map: HashMap<&str, f64> = a.iter().map(|(t, w)| (t.as_str(), *w)).collect();
    let b_map: HashMap<&str, f64> = b.iter().map(|(t, w)| (t.as_str(), *w)).collect();

    let dot: f64 = a_map
        .iter()
        .filter_map(|(term, weight)| b_map.get(term).map(|bw| weight * bw))
        .sum();
    let norm_a: f64 = a_map.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b: f64 = b_map.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_camel_case_preserving_joined_form() {
        let extractor = TermExtractor::default();
        let tokens = extractor.tokenize("fastApi");
        assert!(tokens.contains(&"fastapi".to_string()));
        assert!(tokens.contains(&"fast".to_string()));
        assert!(tokens.contains(&"api".to_string()));
    }

    #[test]
    fn tokenize_splits_snake_case() {
        let extractor = TermExtractor::default();
        let tokens = extractor.tokenize("snake_case_name");
        assert!(tokens.contains(&"snake".to_string()));
        assert!(tokens.contains(&"case".to_string()));
        assert!(tokens.contains(&"name".to_string()));
    }

    #[test]
    fn protected_terms_are_never_stop_worded() {
        let extractor = TermExtractor::default();
        let grams = extractor.ngrams(&["api".to_string(), "design".to_string()]);
        assert!(grams.contains(&"api".to_string()));
    }

    #[test]
    fn build_vectors_is_deterministic() {
        let extractor = TermExtractor::default();
        let corpus = vec![
            (1, "Built React authentication using JWT tokens".to_string()),
            (2, "Implemented token refresh mechanism for security".to_string()),
        ];
        let first = extractor.build_vectors(&corpus);
        let second = extractor.build_vectors(&corpus);
        assert_eq!(first.get(&1), second.get(&1));
        assert_eq!(first.get(&2), second.get(&2));
    }

    #[test]
    fn top_k_is_capped() {
        let extractor = TermExtractor::new(TermExtractorConfig { top_k: 3, ..Default::default() });
        let corpus = vec![(1, "alpha beta gamma delta epsilon zeta eta theta".to_string())];
        let vectors = extractor.build_vectors(&corpus);
        assert!(vectors[&1].len() <= 3);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![("a".to_string(), 1.0), ("b".to_string(), 2.0)];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_of_disjoint_vectors_is_zero() {
        let a = vec![("a".to_string(), 1.0)];
        let b = vec![("b".to_string(), 1.0)];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
