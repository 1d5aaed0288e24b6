//! Core Façade (C10).
//!
//! [`Engine`] is the single embedded entry point every binding (CLI, MCP
//! server, HTTP dashboard) talks to. It owns the one [`Storage`] connection
//! pair for the process, the loaded [`Config`], and the bounded [`EventLog`]
//! the dashboard's live stream reads from. Most other layers — tree, graph,
//! patterns, profiles, backup/compression — are borrowing helpers
//! ([`crate::profile::ProfileManager`], [`crate::patterns::PatternLearner`])
//! constructed on demand from `&self` rather than stored as a field, since
//! each borrows `&Storage` and storing them directly would make `Engine`
//! self-referential. The search cache is the one exception: `Engine` owns a
//! [`crate::search::SearchCache`] directly (it needs no borrow of its own),
//! and `searcher()` builds a fresh [`crate::search::HybridSearcher`] each
//! call that *borrows* that persistent cache, so repeated queries still hit
//! it across calls instead of starting cold every time.
//!
//! There is no global mutable state anywhere here (§9): callers construct an
//! `Engine` explicitly and pass it around as `&Engine` or `Arc<Engine>`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;

use crate::config::Config;
use crate::error::{CancellationToken, EngineError, Result};
use crate::event::{Event, EventLog};
use crate::model::{
    AddInput, BuildStats, Cluster, Filters, GraphEdge, GraphStats, GraphView, GraphViewNode, Hit,
    IdentityContext, IdentityPattern, Note, ProfileInfo, ProfileSummary, ResetReport, ResetScope,
    SortOrder, Status, TimelineBucket,
};
use crate::patterns::PatternLearner;
use crate::profile::ProfileManager;
use crate::search::{HybridSearcher, SearchCache};
use crate::storage::{CompressionReport, Storage};

const DB_FILENAME: &str = "memory.db";
const CONFIG_FILENAME: &str = "config.json";

/// The single entry point of this crate. One `Engine` per process (or per
/// test), never a lazily-initialized global.
pub struct Engine {
    storage: Storage,
    config: Config,
    events: EventLog,
    root: PathBuf,
    /// Set from `SLM_PROFILE`; overrides the persisted active profile for
    /// every call made through this `Engine` instance, without touching
    /// `profiles.json`.
    profile_override: Option<String>,
    /// Backs every `search()` call for the lifetime of this `Engine`, so the
    /// configured `search.cache_size`/`cache_ttl_s` actually produce cache
    /// hits across repeated queries instead of resetting per call.
    search_cache: SearchCache,
}

impl Engine {
    /// Resolves the data directory (`root`, then `SLM_HOME`, then the
    /// platform default under `directories::ProjectDirs`), loads
    /// `config.json` (`SLM_CONFIG` override, falling back to
    /// `<root>/config.json`), opens the database, and applies any pending
    /// migration.
    pub fn open(root: Option<PathBuf>) -> Result<Self> {
        let root = resolve_root(root)?;
        std::fs::create_dir_all(&root)?;

        let config_path = std::env::var_os("SLM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join(CONFIG_FILENAME));
        let config = Config::load(&config_path)?;

        let storage = Storage::open(root.join(DB_FILENAME))?;
        let profile_override = std::env::var("SLM_PROFILE").ok();
        let search_cache = SearchCache::new(
            config.search.cache_size,
            Duration::from_secs(config.search.cache_ttl_s),
        );

        Ok(Self {
            storage,
            config,
            events: EventLog::default(),
            root,
            profile_override,
            search_cache,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The profile every call on this `Engine` is scoped to: `SLM_PROFILE`
    /// if set, otherwise the persisted active profile.
    pub fn current_profile(&self) -> Result<String> {
        match &self.profile_override {
            Some(name) => Ok(name.clone()),
            None => Ok(self.profile_manager().active()?),
        }
    }

    fn profile_manager(&self) -> ProfileManager<'_> {
        ProfileManager::new(&self.storage)
    }

    fn pattern_learner(&self) -> PatternLearner<'_> {
        PatternLearner::new(&self.storage, &self.config.pattern)
    }

    fn searcher(&self) -> HybridSearcher<'_> {
        HybridSearcher::new(&self.storage, self.config.search.clone(), &self.search_cache)
    }

    fn record(&self, operation: &'static str, profile: &str, outcome: &Result<()>) {
        match outcome {
            Ok(()) => self.events.push(Event::success(profile, operation)),
            Err(err) => self.events.push(Event::error(profile, operation, err.kind())),
        }
    }

    // -- C2 Storage Engine ---------------------------------------------------

    pub fn add(&self, input: AddInput) -> Result<Note> {
        let profile = self.current_profile()?;
        let result = self.storage.add(&profile, input).map_err(EngineError::from);
        self.record("add", &profile, &result.as_ref().map(|_| ()).map_err(|e| clone_kind(e)));
        result
    }

    pub fn get(&self, id: i64) -> Result<Note> {
        let profile = self.current_profile()?;
        self.storage
            .get(&profile, id)?
            .ok_or_else(|| EngineError::NotFound(format!("note {id} not found")))
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let profile = self.current_profile()?;
        let result = self.storage.delete(&profile, id).map_err(EngineError::from);
        self.record("delete", &profile, &result);
        result
    }

    pub fn list(&self, sort: SortOrder, limit: i64, offset: i64) -> Result<Vec<Note>> {
        let profile = self.current_profile()?;
        Ok(self.storage.list(&profile, sort, limit, offset)?)
    }

    // -- C3 Tree Manager ------------------------------------------------------

    pub fn ancestors(&self, id: i64) -> Result<Vec<Note>> {
        let profile = self.current_profile()?;
        Ok(self.storage.ancestors(&profile, id)?)
    }

    pub fn descendants(&self, id: i64) -> Result<Vec<Note>> {
        let profile = self.current_profile()?;
        Ok(self.storage.descendants(&profile, id)?)
    }

    pub fn siblings(&self, id: i64) -> Result<Vec<Note>> {
        let profile = self.current_profile()?;
        Ok(self.storage.siblings(&profile, id)?)
    }

    pub fn reparent(&self, id: i64, new_parent_id: Option<i64>) -> Result<()> {
        let profile = self.current_profile()?;
        let result = self.storage.reparent(&profile, id, new_parent_id).map_err(EngineError::from);
        self.record("reparent", &profile, &result);
        result
    }

    // -- C6 Hybrid Searcher ---------------------------------------------------

    pub fn search(&self, query: &str, limit: i64, min_score: f64, filters: Filters) -> Result<Vec<Hit>> {
        let profile = self.current_profile()?;
        self.searcher().search(&profile, query, limit, min_score, &filters)
    }

    // -- C5 Graph Builder -------------------------------------------------------

    pub fn build_graph(&self, cancellation: &CancellationToken) -> Result<BuildStats> {
        let profile = self.current_profile()?;
        let result = self
            .storage
            .build_graph(&profile, &self.config.graph, cancellation)
            .map_err(EngineError::from);
        self.record("build_graph", &profile, &result.as_ref().map(|_| ()).map_err(|e| clone_kind(e)));
        result
    }

    pub fn graph_stats(&self) -> Result<GraphStats> {
        let profile = self.current_profile()?;
        let nodes = self.storage.term_vectors(&profile)?;
        let clusters = self.storage.list_clusters(&profile)?;
        let node_count = nodes.len();
        let mut edge_count = 0usize;
        for (id, _) in &nodes {
            edge_count += self.storage.related(&profile, *id)?.len();
        }
        // Each edge is counted from both endpoints above.
        edge_count /= 2;
        let max_possible = (node_count * node_count.saturating_sub(1)) / 2;
        let edge_density = if max_possible == 0 {
            0.0
        } else {
            edge_count as f64 / max_possible as f64
        };
        Ok(GraphStats {
            node_count,
            edge_count,
            cluster_count: clusters.len(),
            max_depth: clusters.iter().map(|c| c.depth).max().unwrap_or(0),
            edge_density,
        })
    }

    pub fn cluster(&self, id: i64) -> Result<(Cluster, Vec<i64>)> {
        let profile = self.current_profile()?;
        self.storage
            .cluster(&profile, id)?
            .ok_or_else(|| EngineError::NotFound(format!("cluster {id} not found")))
    }

    pub fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let profile = self.current_profile()?;
        Ok(self.storage.list_clusters(&profile)?)
    }

    pub fn related(&self, memory_id: i64) -> Result<Vec<GraphEdge>> {
        let profile = self.current_profile()?;
        Ok(self.storage.related(&profile, memory_id)?)
    }

    /// A bounded, dashboard-friendly view of the current graph: the
    /// `max_nodes` highest-degree notes and the edges between them.
    pub fn graph_view(&self, max_nodes: usize) -> Result<GraphView> {
        let profile = self.current_profile()?;
        let nodes = self.storage.term_vectors(&profile)?;
        let mut degree: Vec<(i64, usize)> = Vec::with_capacity(nodes.len());
        for (id, _) in &nodes {
            degree.push((*id, self.storage.related(&profile, *id)?.len()));
        }
        degree.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        degree.truncate(max_nodes);
        let kept: std::collections::HashSet<i64> = degree.iter().map(|(id, _)| *id).collect();

        let mut out_nodes = Vec::with_capacity(kept.len());
        let mut out_edges = Vec::new();
        let mut seen_edges = std::collections::HashSet::new();
        for &id in &kept {
            let Some(note) = self.storage.peek(&profile, id)? else { continue };
            out_nodes.push(GraphViewNode {
                id,
                label: note.content.chars().take(60).collect(),
                cluster_id: note.cluster_id,
            });
            for edge in self.storage.related(&profile, id)? {
                if !kept.contains(&edge.source_memory_id) || !kept.contains(&edge.target_memory_id) {
                    continue;
                }
                let key = (edge.source_memory_id, edge.target_memory_id);
                if seen_edges.insert(key) {
                    out_edges.push(edge);
                }
            }
        }
        Ok(GraphView { nodes: out_nodes, edges: out_edges })
    }

    // -- C7 Pattern Learner -----------------------------------------------------

    pub fn learn_patterns(&self) -> Result<Vec<IdentityPattern>> {
        let profile = self.current_profile()?;
        let result = self.pattern_learner().learn_patterns(&profile).map_err(EngineError::from);
        self.record("learn_patterns", &profile, &result.as_ref().map(|_| ()).map_err(|e| clone_kind(e)));
        result
    }

    pub fn patterns(&self) -> Result<Vec<IdentityPattern>> {
        self.get_identity_context(0.0).map(|ctx| ctx.patterns)
    }

    pub fn get_identity_context(&self, min_confidence: f64) -> Result<IdentityContext> {
        let profile = self.current_profile()?;
        Ok(self.pattern_learner().get_identity_context(&profile, min_confidence)?)
    }

    pub fn correct_pattern(&self, pattern_id: i64, new_value: &str) -> Result<IdentityPattern> {
        let profile = self.current_profile()?;
        let result = self.pattern_learner().correct(pattern_id, new_value).map_err(EngineError::from);
        self.record("correct_pattern", &profile, &result.as_ref().map(|_| ()).map_err(|e| clone_kind(e)));
        result
    }

    // -- C8 Profile Manager -------------------------------------------------------

    pub fn list_profiles(&self) -> Result<Vec<ProfileSummary>> {
        Ok(self.profile_manager().list()?)
    }

    pub fn create_profile(&self, name: &str, description: Option<&str>) -> Result<ProfileInfo> {
        let result = self.profile_manager().create(name, description).map_err(EngineError::from);
        self.record("create_profile", name, &result.as_ref().map(|_| ()).map_err(|e| clone_kind(e)));
        result
    }

    pub fn switch_profile(&self, name: &str) -> Result<()> {
        let result = self.profile_manager().switch(name).map_err(EngineError::from);
        self.record("switch_profile", name, &result);
        result
    }

    pub fn delete_profile(&self, name: &str) -> Result<()> {
        let result = self.profile_manager().delete(name).map_err(EngineError::from);
        self.record("delete_profile", name, &result);
        result
    }

    // -- C9 Backup & Compression ------------------------------------------------

    pub fn backup(&self, path: Option<PathBuf>) -> Result<PathBuf> {
        let profile = self.current_profile()?;
        let result = self.storage.backup(path).map_err(EngineError::from);
        self.record("backup", &profile, &result.as_ref().map(|_| ()).map_err(|e| clone_kind(e)));
        if let Ok(target) = &result {
            let _ = self.storage.prune_backups(self.config.backup.retention);
            return Ok(target.clone());
        }
        result
    }

    pub fn compress(&self) -> Result<CompressionReport> {
        let profile = self.current_profile()?;
        let result = self
            .storage
            .compress(&profile, &self.config.compression)
            .map_err(EngineError::from);
        self.record("compress", &profile, &result.as_ref().map(|_| ()).map_err(|e| clone_kind(e)));
        result
    }

    pub fn rematerialize(&self, id: i64) -> Result<String> {
        let profile = self.current_profile()?;
        Ok(self.storage.rematerialize(&profile, id)?)
    }

    /// `reset soft|hard|layer`. Always snapshots the database first (§6):
    /// a reset that fails to back up never clears anything.
    pub fn reset(&self, scope: ResetScope) -> Result<ResetReport> {
        let profile = self.current_profile()?;
        self.storage.backup(None)?;
        let result = self.storage.reset(&profile, scope).map_err(EngineError::from);
        self.record("reset", &profile, &result.as_ref().map(|_| ()).map_err(|e| clone_kind(e)));
        result
    }

    // -- C10 Façade: status & dashboard read endpoints ---------------------------

    pub fn status(&self) -> Result<Status> {
        let profile = self.current_profile()?;
        Ok(Status {
            active_profile: profile.clone(),
            storage: self.storage.stats(&profile)?,
            last_graph_build: self.storage.last_graph_build(&profile)?,
        })
    }

    /// Alias for [`Self::status`]'s `storage` field, matching the dashboard's
    /// `stats` endpoint name (§6).
    pub fn stats(&self) -> Result<crate::model::StorageStats> {
        let profile = self.current_profile()?;
        Ok(self.storage.stats(&profile)?)
    }

    /// One bucket per day with at least one note created, most recent
    /// `days` days, oldest first.
    pub fn timeline(&self, days: i64) -> Result<Vec<TimelineBucket>> {
        let profile = self.current_profile()?;
        let notes = self.storage.list(&profile, SortOrder::Recent, i64::MAX, 0)?;
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days.max(0));
        let mut by_day: std::collections::BTreeMap<chrono::NaiveDate, i64> = std::collections::BTreeMap::new();
        for note in notes {
            if note.created_at < cutoff {
                continue;
            }
            *by_day.entry(note.created_at.date_naive()).or_insert(0) += 1;
        }
        Ok(by_day
            .into_iter()
            .map(|(date, count)| TimelineBucket { date, count })
            .collect())
    }

    /// Filtered, unranked memory listing for the dashboard's `memories`
    /// endpoint — `list` ordered by recency with filters applied in memory,
    /// since `Storage::list` itself has no filter parameter.
    pub fn memories(&self, filters: &Filters, limit: i64) -> Result<Vec<Note>> {
        let profile = self.current_profile()?;
        let notes = self.storage.list(&profile, SortOrder::Recent, i64::MAX, 0)?;
        Ok(notes
            .into_iter()
            .filter(|note| note_matches(note, filters))
            .take(limit.max(0) as usize)
            .collect())
    }

    /// Every note in the active profile, serialized as JSON or a newline
    /// joined plain-text digest depending on `format`.
    pub fn export(&self, format: &str) -> Result<String> {
        let profile = self.current_profile()?;
        let notes = self.storage.list(&profile, SortOrder::Recent, i64::MAX, 0)?;
        match format {
            "json" => serde_json::to_string_pretty(&notes)
                .map_err(|e| EngineError::Internal(e.to_string())),
            "text" | "plain" => Ok(notes
                .iter()
                .map(|n| format!("#{} [{}] {}", n.id, n.created_at.to_rfc3339(), n.content))
                .collect::<Vec<_>>()
                .join("\n")),
            other => Err(EngineError::Validation(format!("unknown export format {other:?}"))),
        }
    }

    pub fn events(&self, limit: usize) -> Vec<Event> {
        self.events.recent(limit)
    }
}

fn note_matches(note: &Note, filters: &Filters) -> bool {
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

/// `Result<()>`, cloning only the error kind — event recording never needs
/// the full error payload, and `EngineError` isn't `Clone`.
fn clone_kind(err: &EngineError) -> EngineError {
    match err {
        EngineError::Validation(_) => EngineError::Validation(String::new()),
        EngineError::NotFound(_) => EngineError::NotFound(String::new()),
        EngineError::Conflict(_) => EngineError::Conflict(String::new()),
        EngineError::Integrity(_) => EngineError::Integrity(String::new()),
        EngineError::DependencyUnavailable(s) => EngineError::DependencyUnavailable(s),
        EngineError::Cancelled(s) => EngineError::Cancelled(s),
        EngineError::Io(_) => EngineError::Io(String::new()),
        EngineError::Internal(_) => EngineError::Internal(String::new()),
    }
}

fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    if let Some(home) = std::env::var_os("SLM_HOME") {
        return Ok(PathBuf::from(home));
    }
    let proj_dirs = ProjectDirs::from("com", "memoria", "core")
        .ok_or_else(|| EngineError::Internal("could not determine project directories".into()))?;
    Ok(proj_dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::DEFAULT_PROFILE;
    use tempfile::tempdir;

    fn engine() -> (Engine, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let engine = Engine::open(Some(dir.path().to_path_buf())).unwrap();
        (engine, dir)
    }

    #[test]
    fn open_creates_database_under_explicit_root() {
        let (engine, dir) = engine();
        assert!(dir.path().join(DB_FILENAME).exists());
        assert_eq!(engine.current_profile().unwrap(), DEFAULT_PROFILE);
    }

    #[test]
    fn add_then_status_reflects_the_new_note() {
        let (engine, _dir) = engine();
        engine.add(AddInput { content: "hello".into(), ..Default::default() }).unwrap();
        let status = engine.status().unwrap();
        assert_eq!(status.storage.total_notes, 1);
        assert_eq!(status.active_profile, DEFAULT_PROFILE);
    }

    #[test]
    fn get_missing_note_is_not_found() {
        let (engine, _dir) = engine();
        let err = engine.get(999).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn build_graph_then_stats_reports_zero_density_below_two_nodes() {
        let (engine, _dir) = engine();
        engine.add(AddInput { content: "solo note".into(), ..Default::default() }).unwrap();
        engine.build_graph(&CancellationToken::new()).unwrap();
        let stats = engine.graph_stats().unwrap();
        assert_eq!(stats.edge_density, 0.0);
    }

    #[test]
    fn reset_soft_clears_notes_and_records_an_event() {
        let (engine, _dir) = engine();
        engine.add(AddInput { content: "to be cleared".into(), ..Default::default() }).unwrap();
        let report = engine.reset(ResetScope::Soft).unwrap();
        assert_eq!(report.notes_cleared, 1);
        let events = engine.events(10);
        assert!(events.iter().any(|e| e.operation == "reset" && e.outcome == "success"));
    }

    #[test]
    fn switch_profile_changes_scope_for_subsequent_calls() {
        let (engine, _dir) = engine();
        engine.create_profile("work", None).unwrap();
        engine.switch_profile("work").unwrap();
        assert_eq!(engine.current_profile().unwrap(), "work");
        engine.add(AddInput { content: "work note".into(), ..Default::default() }).unwrap();
        assert_eq!(engine.list(SortOrder::Recent, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn export_json_round_trips_through_serde() {
        let (engine, _dir) = engine();
        engine.add(AddInput { content: "exportable".into(), ..Default::default() }).unwrap();
        let json = engine.export("json").unwrap();
        let notes: Vec<Note> = serde_json::from_str(&json).unwrap();
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn export_rejects_unknown_format() {
        let (engine, _dir) = engine();
        let err = engine.export("yaml").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
