//! Persisted record types. Every type that crosses the façade boundary is a
//! typed struct or enum — no untyped maps leak out of this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compression tier of a [`Note`]. Monotonically advances 1 → 2 → 3 except
/// via an explicit restore from archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Tier {
    Full = 1,
    Summarized = 2,
    Archived = 3,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Full => "full",
            Tier::Summarized => "summarized",
            Tier::Archived => "archived",
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            2 => Tier::Summarized,
            3 => Tier::Archived,
            _ => Tier::Full,
        }
    }
}

/// The primary entity: a short user-authored text record with metadata.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: i64,
    pub profile: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub content_hash: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    pub importance: i32,
    pub memory_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    pub tree_path: String,
    pub depth: i32,
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: i64,
}

/// Input to [`crate::storage::Storage::add`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddInput {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub importance: Option<i32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub memory_type: Option<String>,
}

/// Sort order for [`crate::storage::Storage::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Recent,
    Accessed,
    Importance,
}

impl SortOrder {
    pub fn column(&self) -> &'static str {
        match self {
            SortOrder::Recent => "created_at",
            SortOrder::Accessed => "last_accessed",
            SortOrder::Importance => "importance",
        }
    }
}

/// Filters shared by keyword search, hybrid search, and `list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filters {
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub category: Option<String>,
    pub min_importance: Option<i32>,
}

/// Aggregate counts returned by `Storage::stats` / the façade's `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_notes: i64,
    pub by_category: std::collections::BTreeMap<String, i64>,
    pub by_project: std::collections::BTreeMap<String, i64>,
    pub db_size_bytes: u64,
    pub last_backup: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Graph layer (C5)
// ---------------------------------------------------------------------------

/// One per [`Note`] present in the current graph build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub memory_id: i64,
    /// Ordered `(term, weight)` pairs, up to K = 20.
    pub entities: Vec<(String, f64)>,
}

/// Undirected similarity edge, canonically stored with `source < target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub source_memory_id: i64,
    pub target_memory_id: i64,
    pub similarity: f64,
    pub relationship_type: String,
    pub shared_entities: Vec<String>,
}

/// A named community of notes, possibly with sub-clusters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: i64,
    pub cluster_name: String,
    pub description: String,
    pub memory_count: i64,
    pub avg_importance: f64,
    pub top_entities: Vec<String>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_cluster_id: Option<i64>,
    pub depth: i32,
}

/// Summary statistics returned by a graph build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub cluster_count: usize,
    pub max_depth: i32,
    pub used_community_detection: bool,
}

// ---------------------------------------------------------------------------
// Pattern learner (C7)
// ---------------------------------------------------------------------------

/// A taxonomy pattern type. Additional types may be registered at runtime
/// but the built-in set is never retroactively removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    PreferredFramework,
    PreferredLanguage,
    PreferredBackend,
    PreferredDb,
    TestingStyle,
    CodeStyle,
    Terminology,
    WorkflowSequence,
    ActiveProject,
    /// A user-registered pattern type not in the built-in taxonomy.
    Custom(String),
}

impl PatternType {
    pub fn as_str(&self) -> &str {
        match self {
            PatternType::PreferredFramework => "preferred_framework",
            PatternType::PreferredLanguage => "preferred_language",
            PatternType::PreferredBackend => "preferred_backend",
            PatternType::PreferredDb => "preferred_db",
            PatternType::TestingStyle => "testing_style",
            PatternType::CodeStyle => "code_style",
            PatternType::Terminology => "terminology",
            PatternType::WorkflowSequence => "workflow_sequence",
            PatternType::ActiveProject => "active_project",
            PatternType::Custom(s) => s.as_str(),
        }
    }

    /// The Beta-Binomial prior category this type falls into (§4.7).
    pub fn prior_category(&self) -> PriorCategory {
        match self {
            PatternType::TestingStyle | PatternType::CodeStyle => PriorCategory::Style,
            PatternType::Terminology => PriorCategory::Terminology,
            _ => PriorCategory::Preference,
        }
    }
}

/// Prior category used to pick `(alpha, beta)` for the posterior mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorCategory {
    Preference,
    Style,
    Terminology,
}

/// A compact, prompt-ready view over a profile's learned patterns, grouped
/// by [`PatternType`] and pre-filtered to a confidence floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityContext {
    pub patterns: Vec<IdentityPattern>,
    /// One line per pattern, e.g. `"preferred_framework: React (0.82 confidence)"`.
    pub summary_lines: Vec<String>,
}

/// A learned user preference with a Bayesian confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPattern {
    pub id: i64,
    pub profile: String,
    pub pattern_type: String,
    pub pattern_key: String,
    pub pattern_value: String,
    pub confidence: f64,
    pub frequency: i64,
    pub last_seen: DateTime<Utc>,
    pub pinned: bool,
}

/// Provenance for one learned pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternExample {
    pub pattern_id: i64,
    pub memory_id: i64,
    pub context: String,
}

// ---------------------------------------------------------------------------
// Profiles (C8) and archive (C9)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub active: bool,
}

/// A profile plus its row counts across every profile-scoped table,
/// returned by [`crate::profile::ProfileManager::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    #[serde(flatten)]
    pub info: ProfileInfo,
    pub row_counts: std::collections::BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub original_memory_id: i64,
    pub compressed_blob: Vec<u8>,
    pub original_size: i64,
    pub compressed_size: i64,
    pub archived_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Façade-level aggregates (C10)
// ---------------------------------------------------------------------------

/// Snapshot returned by [`crate::Engine::status`]: counts, active profile,
/// DB size, and the last graph-build/backup timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub active_profile: String,
    pub storage: StorageStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_graph_build: Option<DateTime<Utc>>,
}

/// Summary statistics over the active profile's current graph, returned by
/// [`crate::Engine::graph_stats`] and the dashboard's `graph` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub cluster_count: usize,
    pub max_depth: i32,
    /// `edge_count / max_possible_edges`, 0 when fewer than 2 nodes.
    pub edge_density: f64,
}

/// One day's note-creation count, returned by the dashboard's `timeline`
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineBucket {
    pub date: chrono::NaiveDate,
    pub count: i64,
}

/// A read-only rendering of the current graph for the dashboard's `graph`
/// endpoint: nodes as `(id, label)` and edges as `(source, target, weight)`,
/// truncated to `max_nodes` highest-degree nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphView {
    pub nodes: Vec<GraphViewNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphViewNode {
    pub id: i64,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<i64>,
}

/// Which layer a `reset layer` invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetLayer {
    Graph,
    Patterns,
}

/// `reset soft|hard|layer` scope (§6 CLI surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetScope {
    /// Clears notes and everything derived from them (graph, patterns),
    /// leaving the profile itself and its backup history in place.
    Soft,
    /// Clears every profile-scoped row including the event log, short of
    /// dropping the profile's registry entry.
    Hard,
    Layer(ResetLayer),
}

/// Row counts affected by a [`crate::Engine`] `reset` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub notes_cleared: i64,
    pub graph_cleared: bool,
    pub patterns_cleared: bool,
}

// ---------------------------------------------------------------------------
// Search (C6)
// ---------------------------------------------------------------------------

/// A signal that contributed to a hybrid search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Keyword,
    Term,
    Graph,
}

/// Fusion mode for hybrid search (§4.6, §9 open question 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    #[default]
    Weighted,
    Rrf,
}

/// A single ranked hybrid-search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    pub note: Note,
    pub score: f64,
    pub sources: Vec<SearchSource>,
}
