//! Pattern Learner (C7).
//!
//! Detects recurring user preferences (framework, language, testing style,
//! terminology, ...) by scanning note content against a static taxonomy of
//! candidate values per [`PatternType`], the way the reference project's
//! `PatternDetector` scans source files against a library of `CodePattern`s
//! — generalized here from a keyword-overlap heuristic to a Beta-Binomial
//! posterior over evidence counts (§4.7).

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::config::PatternConfig;
use crate::model::{IdentityContext, IdentityPattern, PatternType, SortOrder};
use crate::storage::{Result as StorageResult, Storage, StorageError};

/// Candidate values scanned for per built-in [`PatternType`]. `ActiveProject`
/// is handled separately since its candidates come from each note's own
/// `project_name` rather than a fixed vocabulary.
const TAXONOMY: &[(PatternType, &[&str])] = &[
    (
            PatternType::PreferredFramework,
            &[
                "React", "Vue", "Angular", "Svelte", "Next.js", "Nuxt", "FastAPI", "Django",
                "Flask", "Rails",
            ],
        ),
        (
            PatternType::PreferredLanguage,
            &[
                "Rust", "TypeScript", "JavaScript", "Python", "Go", "Java", "Kotlin", "Swift",
                "C#", "C++", "Ruby", "PHP",
            ],
        ),
        (
            PatternType::PreferredBackend,
            &[
                "Node.js", "Express", "FastAPI", "Django", "Flask", "Actix", "Axum", "Rails",
                "Spring",
            ],
        ),
        (
            PatternType::PreferredDb,
            &["PostgreSQL", "MySQL", "SQLite", "MongoDB", "Redis", "DynamoDB"],
        ),
        (
            PatternType::TestingStyle,
            &["TDD", "BDD", "unit testing", "integration testing", "snapshot testing"],
        ),
        (
            PatternType::CodeStyle,
            &["functional", "object-oriented", "declarative", "imperative"],
        ),
        (
            PatternType::Terminology,
            &["API", "SQL", "JWT", "SSL", "UI", "CI/CD"],
        ),
    (
        PatternType::WorkflowSequence,
        &["feature branch workflow", "trunk-based development", "gitflow", "pair programming"],
    ),
];

/// True if `needle` occurs in `haystack` on a token boundary (not as a
/// substring of a longer word), case-insensitively. Both strings are
/// expected already lowercased by the caller.
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let bytes = haystack.as_bytes();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let before_ok = abs == 0 || !bytes[abs - 1].is_ascii_alphanumeric();
        let after = abs + needle.len();
        let after_ok = after >= bytes.len() || !bytes[after].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        start = abs + 1;
        if start >= haystack.len() {
            break;
        }
    }
    false
}

struct Candidate {
    pattern_type: PatternType,
    value: String,
    supporting_ids: Vec<i64>,
}

/// `(alpha + k) / (alpha + beta + n + log2(max(n, 2)))`, the Beta-Binomial
/// posterior mean used throughout §4.7.
fn posterior_mean(alpha: f64, beta: f64, k: f64, n: f64) -> f64 {
    (alpha + k) / (alpha + beta + n + n.max(2.0).log2())
}

/// Softens the ratio between a dominant value and its competitors within a
/// pattern type: raw posteriors are log-compressed, then rescaled back up so
/// the group's total confidence mass is preserved. A single overwhelming
/// value no longer pushes every other candidate to near-zero.
fn log_normalize(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }
    let logged: Vec<f64> = raw.iter().map(|p| (1.0 + p).ln()).collect();
    let logged_total: f64 = logged.iter().sum();
    let raw_total: f64 = raw.iter().sum();
    if logged_total <= 0.0 {
        return raw.to_vec();
    }
    logged.iter().map(|l| l / logged_total * raw_total).collect()
}

const CONFIDENCE_CAP: f64 = 0.95;
const RECENCY_BONUS: f64 = 1.1;
const MAX_EXAMPLES_PER_PATTERN: usize = 3;

pub struct PatternLearner<'a> {
    storage: &'a Storage,
    config: &'a PatternConfig,
}

impl<'a> PatternLearner<'a> {
    pub fn new(storage: &'a Storage, config: &'a PatternConfig) -> Self {
        Self { storage, config }
    }

    /// Rescans every note in `profile`, replacing the non-pinned subset of
    /// its `identity_patterns` rows. Pinned rows (set by [`Self::correct`])
    /// are left untouched: a recompute that would collide with a pinned
    /// `(pattern_type, pattern_key)` is silently dropped via `INSERT OR
    /// IGNORE`, so a user correction always wins over the next learn pass.
    pub fn learn_patterns(&self, profile: &str) -> StorageResult<Vec<IdentityPattern>> {
        let notes = self.storage.list(profile, SortOrder::Recent, i64::MAX, 0)?;
        let total = notes.len() as f64;

        let mut candidates: Vec<Candidate> = Vec::new();
        for (pattern_type, values) in TAXONOMY {
            for value in *values {
                let needle = value.to_lowercase();
                let supporting_ids: Vec<i64> = notes
                    .iter()
                    .filter(|note| contains_word(&note.content.to_lowercase(), &needle))
                    .map(|note| note.id)
                    .collect();
                if !supporting_ids.is_empty() {
                    candidates.push(Candidate {
                        pattern_type: pattern_type.clone(),
                        value: (*value).to_string(),
                        supporting_ids,
                    });
                }
            }
        }
        candidates.extend(self.active_project_candidates(&notes));

        let mut by_type: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            by_type.entry(candidate.pattern_type.as_str().to_string()).or_default().push(idx);
        }

        let now = Utc::now();
        let mut confidences = vec![0.0_f64; candidates.len()];
        for indices in by_type.values() {
            let prior = self.config_prior(&candidates[indices[0]].pattern_type);
            let raw: Vec<f64> = indices
                .iter()
                .map(|&i| {
                    let candidate = &candidates[i];
                    let k = candidate.supporting_ids.len() as f64;
                    let mean = posterior_mean(prior.alpha, prior.beta, k, total.max(1.0));
                    mean * self.recency_multiplier(&notes, &candidate.supporting_ids, now)
                })
                .collect();
            let normalized = log_normalize(&raw);
            for (slot, &i) in indices.iter().enumerate() {
                confidences[i] = normalized[slot].min(CONFIDENCE_CAP);
            }
        }

        let pinned = self.pinned_keys(profile)?;

        {
            let writer = self.storage.writer();
            writer.execute(
                "DELETE FROM pattern_examples WHERE pattern_id IN \
                 (SELECT id FROM identity_patterns WHERE profile = ?1 AND pinned = 0)",
                params![profile],
            )?;
            writer.execute(
                "DELETE FROM identity_patterns WHERE profile = ?1 AND pinned = 0",
                params![profile],
            )?;

            for (idx, candidate) in candidates.iter().enumerate() {
                let pattern_key = slugify(&candidate.value);
                if pinned.contains(&(candidate.pattern_type.as_str().to_string(), pattern_key.clone())) {
                    continue;
                }
                let frequency = candidate.supporting_ids.len() as i64;
                let inserted = writer.execute(
                    "INSERT OR IGNORE INTO identity_patterns \
                     (profile, pattern_type, pattern_key, pattern_value, confidence, frequency, last_seen, pinned) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
                    params![
                        profile,
                        candidate.pattern_type.as_str(),
                        pattern_key,
                        candidate.value,
                        confidences[idx],
                        frequency,
                        now.to_rfc3339(),
                    ],
                )?;
                if inserted == 0 {
                    continue;
                }
                let pattern_id = writer.last_insert_rowid();
                for &memory_id in candidate.supporting_ids.iter().rev().take(MAX_EXAMPLES_PER_PATTERN) {
                    let context = notes
                        .iter()
                        .find(|n| n.id == memory_id)
                        .map(|n| truncate_context(&n.content))
                        .unwrap_or_default();
                    writer.execute(
                        "INSERT OR IGNORE INTO pattern_examples (pattern_id, memory_id, context) \
                         VALUES (?1, ?2, ?3)",
                        params![pattern_id, memory_id, context],
                    )?;
                }
            }
        }

        self.list(profile)
    }

    /// A compact, confidence-filtered view suitable for embedding in a
    /// prompt: one line per surviving pattern, sorted by confidence.
    pub fn get_identity_context(&self, profile: &str, min_confidence: f64) -> StorageResult<IdentityContext> {
        let mut patterns = self.list(profile)?;
        patterns.retain(|p| p.confidence >= min_confidence);
        patterns.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        let summary_lines = patterns
            .iter()
            .map(|p| format!("{}: {} ({:.2} confidence)", p.pattern_type, p.pattern_value, p.confidence))
            .collect();
        Ok(IdentityContext { patterns, summary_lines })
    }

    /// Pins a pattern to a corrected value: confidence jumps to `1.0` and the
    /// row is marked `pinned`, so future [`Self::learn_patterns`] calls never
    /// overwrite it.
    pub fn correct(&self, pattern_id: i64, new_value: &str) -> StorageResult<IdentityPattern> {
        let writer = self.storage.writer();
        let now = Utc::now();
        let changed = writer.execute(
            "UPDATE identity_patterns SET pattern_value = ?1, confidence = 1.0, pinned = 1, last_seen = ?2 \
             WHERE id = ?3",
            params![new_value, now.to_rfc3339(), pattern_id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("pattern {pattern_id} not found")));
        }
        drop(writer);
        self.get(pattern_id)?.ok_or_else(|| StorageError::NotFound(format!("pattern {pattern_id} not found")))
    }

    fn get(&self, pattern_id: i64) -> StorageResult<Option<IdentityPattern>> {
        let reader = self.storage.reader();
        reader
            .query_row(
                "SELECT id, profile, pattern_type, pattern_key, pattern_value, confidence, frequency, last_seen, pinned \
                 FROM identity_patterns WHERE id = ?1",
                params![pattern_id],
                row_to_pattern,
            )
            .optional()
            .map_err(StorageError::from)
    }

    fn list(&self, profile: &str) -> StorageResult<Vec<IdentityPattern>> {
        let reader = self.storage.reader();
        let mut stmt = reader.prepare(
            "SELECT id, profile, pattern_type, pattern_key, pattern_value, confidence, frequency, last_seen, pinned \
             FROM identity_patterns WHERE profile = ?1 ORDER BY confidence DESC",
        )?;
        let rows = stmt
            .query_map(params![profile], row_to_pattern)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn pinned_keys(&self, profile: &str) -> StorageResult<std::collections::HashSet<(String, String)>> {
        let reader = self.storage.reader();
        let mut stmt = reader.prepare(
            "SELECT pattern_type, pattern_key FROM identity_patterns WHERE profile = ?1 AND pinned = 1",
        )?;
        let rows = stmt
            .query_map(params![profile], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().collect())
    }

    fn config_prior(&self, pattern_type: &PatternType) -> crate::config::BetaPrior {
        let category = pattern_type.prior_category();
        let key = match category {
            crate::model::PriorCategory::Preference => "preference",
            crate::model::PriorCategory::Style => "style",
            crate::model::PriorCategory::Terminology => "terminology",
        };
        self.config
            .priors
            .get(key)
            .copied()
            .unwrap_or(crate::config::BetaPrior { alpha: 1.0, beta: 4.0 })
    }

    /// `1.1x` if more than half of a candidate's supporting notes fall
    /// within the configured recency window.
    fn recency_multiplier(&self, notes: &[crate::model::Note], supporting_ids: &[i64], now: chrono::DateTime<Utc>) -> f64 {
        if supporting_ids.is_empty() {
            return 1.0;
        }
        let window = chrono::Duration::days(self.config.recency_window_days.max(0));
        let recent = supporting_ids
            .iter()
            .filter(|id| {
                notes
                    .iter()
                    .find(|n| n.id == **id)
                    .map(|n| now.signed_duration_since(n.created_at) <= window)
                    .unwrap_or(false)
            })
            .count();
        if recent * 2 > supporting_ids.len() {
            RECENCY_BONUS
        } else {
            1.0
        }
    }

    fn active_project_candidates(&self, notes: &[crate::model::Note]) -> Vec<Candidate> {
        let mut by_project: HashMap<String, Vec<i64>> = HashMap::new();
        for note in notes {
            if let Some(project) = &note.project_name {
                by_project.entry(project.clone()).or_default().push(note.id);
            }
        }
        by_project
            .into_iter()
            .map(|(project, ids)| Candidate {
                pattern_type: PatternType::ActiveProject,
                value: project,
                supporting_ids: ids,
            })
            .collect()
    }
}

fn slugify(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn truncate_context(content: &str) -> String {
    const MAX_LEN: usize = 200;
    if content.len() <= MAX_LEN {
        content.to_string()
    } else {
        let mut end = MAX_LEN;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &content[..end])
    }
}

fn row_to_pattern(row: &rusqlite::Row) -> rusqlite::Result<IdentityPattern> {
    let last_seen: String = row.get(7)?;
    Ok(IdentityPattern {
        id: row.get(0)?,
        profile: row.get(1)?,
        pattern_type: row.get(2)?,
        pattern_key: row.get(3)?,
        pattern_value: row.get(4)?,
        confidence: row.get(5)?,
        frequency: row.get(6)?,
        last_seen: crate::storage::parse_timestamp(&last_seen, "last_seen")?,
        pinned: row.get::<_, i64>(8)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AddInput;
    use tempfile::tempdir;

    fn storage() -> (Storage, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("memory.db")).unwrap();
        (storage, dir)
    }

    fn add(storage: &Storage, content: &str) -> i64 {
        storage
            .add("default", AddInput { content: content.to_string(), ..Default::default() })
            .unwrap()
            .id
    }

    #[test]
    fn detects_preferred_framework_from_repeated_mentions() {
        let (storage, _dir) = storage();
        add(&storage, "Building the dashboard with React and hooks");
        add(&storage, "Refactored the React component tree");
        let config = PatternConfig::default();
        let learner = PatternLearner::new(&storage, &config);
        let patterns = learner.learn_patterns("default").unwrap();
        let react = patterns.iter().find(|p| p.pattern_value == "React").unwrap();
        assert_eq!(react.pattern_type, "preferred_framework");
        assert!(react.confidence > 0.0);
    }

    #[test]
    fn more_supporting_notes_yields_higher_confidence() {
        let (storage, _dir) = storage();
        add(&storage, "Using Rust for the backend service");
        let config = PatternConfig::default();
        let learner = PatternLearner::new(&storage, &config);
        let one_note = learner.learn_patterns("default").unwrap();
        let rust_one = one_note.iter().find(|p| p.pattern_value == "Rust").unwrap().confidence;

        add(&storage, "Rust keeps paying off on this backend service");
        add(&storage, "Another Rust module shipped today");
        let three_notes = learner.learn_patterns("default").unwrap();
        let rust_three = three_notes.iter().find(|p| p.pattern_value == "Rust").unwrap().confidence;

        assert!(rust_three > rust_one);
    }

    #[test]
    fn word_boundary_matching_avoids_false_positives() {
        let (storage, _dir) = storage();
        add(&storage, "Deployed a rapid prototype over the weekend");
        let config = PatternConfig::default();
        let learner = PatternLearner::new(&storage, &config);
        let patterns = learner.learn_patterns("default").unwrap();
        assert!(!patterns.iter().any(|p| p.pattern_value == "API"));
    }

    #[test]
    fn correct_pins_value_and_survives_recompute() {
        let (storage, _dir) = storage();
        add(&storage, "Using Vue for the admin panel");
        let config = PatternConfig::default();
        let learner = PatternLearner::new(&storage, &config);
        let patterns = learner.learn_patterns("default").unwrap();
        let vue = patterns.iter().find(|p| p.pattern_value == "Vue").unwrap();

        let corrected = learner.correct(vue.id, "React").unwrap();
        assert_eq!(corrected.pattern_value, "React");
        assert_eq!(corrected.confidence, 1.0);
        assert!(corrected.pinned);

        add(&storage, "Shipped another Vue component");
        let after_recompute = learner.learn_patterns("default").unwrap();
        let pinned = after_recompute.iter().find(|p| p.id == vue.id).unwrap();
        assert_eq!(pinned.pattern_value, "React");
        assert!(pinned.pinned);
    }

    #[test]
    fn get_identity_context_filters_by_confidence_and_sorts_descending() {
        let (storage, _dir) = storage();
        add(&storage, "Using Rust with Axum for the API");
        add(&storage, "Rust again for the worker pool");
        let config = PatternConfig::default();
        let learner = PatternLearner::new(&storage, &config);
        learner.learn_patterns("default").unwrap();

        let context = learner.get_identity_context("default", 0.0).unwrap();
        assert!(!context.patterns.is_empty());
        for pair in context.patterns.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert_eq!(context.patterns.len(), context.summary_lines.len());
    }

    #[test]
    fn active_project_pattern_tracks_project_name_frequency() {
        let (storage, _dir) = storage();
        storage
            .add(
                "default",
                AddInput {
                    content: "Sprint planning notes".to_string(),
                    project_name: Some("memoria".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let config = PatternConfig::default();
        let learner = PatternLearner::new(&storage, &config);
        let patterns = learner.learn_patterns("default").unwrap();
        assert!(patterns.iter().any(|p| p.pattern_type == "active_project" && p.pattern_value == "memoria"));
    }
}
