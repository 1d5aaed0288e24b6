//! Graph Builder (C5).
//!
//! `build(profile)` atomically replaces all GraphNode/GraphEdge/Cluster rows
//! for a profile: materializes entity vectors (C4), computes pairwise
//! cosine similarity pruned at `τ_edge`, runs community detection, refines
//! clusters with ≥10 members recursively up to depth 3, names and
//! summarizes each cluster, and writes `cluster_id` back onto notes.

mod community;
mod naming;

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::config::GraphConfig;
use crate::error::{CancellationToken, EngineError, Result};
use crate::model::{BuildStats, Cluster, GraphEdge, GraphNode};
use crate::storage::Storage;
use crate::terms::{cosine_similarity, TermExtractor};

use community::{connected_components, louvain_communities, AdjacencyGraph, Xorshift64};

pub use naming::name_cluster;

impl Storage {
    /// Rebuilds the similarity graph and cluster hierarchy for `profile`.
    /// Builds are atomic: on success, the previous graph/cluster rows are
    /// replaced in one transaction; on cancellation or error, the previous
    /// graph is left intact.
    pub fn build_graph(
        &self,
        profile: &str,
        config: &GraphConfig,
        cancellation: &CancellationToken,
    ) -> Result<BuildStats> {
        cancellation.check("entity_extraction")?;
        let notes = self.list(profile, crate::model::SortOrder::Recent, i64::MAX, 0)?;

        if notes.len() < 2 {
            self.replace_graph_rows(profile, &[], &[], &[], &[])?;
            self.record_graph_build(profile)?;
            return Ok(BuildStats {
                node_count: notes.len(),
                edge_count: 0,
                cluster_count: 0,
                max_depth: 0,
                used_community_detection: false,
            });
        }

        let extractor = TermExtractor::default();
        let corpus: Vec<(i64, String)> = notes.iter().map(|n| (n.id, n.content.clone())).collect();
        let vectors = extractor.build_vectors(&corpus);

        let ids: Vec<i64> = notes.iter().map(|n| n.id).collect();
        let graph_nodes: Vec<GraphNode> = ids
            .iter()
            .map(|&id| GraphNode {
                memory_id: id,
                entities: vectors.get(&id).cloned().unwrap_or_default(),
            })
            .collect();

        cancellation.check("edge_computation")?;
        let edges = compute_edges(&ids, &vectors, config.edge_threshold);

        cancellation.check("community_detection")?;
        let used_community_detection = config.community_detection != "connected-components";
        let (labels, fallback_used) =
            detect_communities(&ids, &edges, profile, config, used_community_detection);

        cancellation.check("naming")?;
        // `clusters.id` is a global AUTOINCREMENT primary key shared by every
        // profile, so the hierarchy can't restart numbering at 1 per build —
        // that would collide with another profile's existing cluster rows.
        let starting_id = self.next_cluster_id()?;
        let clusters = build_cluster_hierarchy(&notes, &ids, &labels, &vectors, config, starting_id);

        cancellation.check("persistence")?;
        // Each note belongs to the most specific (deepest) cluster whose
        // leaf membership contains it; shallower ancestors carry the same
        // note in their own (broader) leaf set but are not the assignment.
        let note_cluster_assignments: Vec<(i64, i64)> = ids
            .iter()
            .filter_map(|&id| {
                clusters
                    .iter()
                    .filter(|c| c.leaf_members.contains(&id))
                    .max_by_key(|c| c.cluster.depth)
                    .map(|c| (id, c.cluster.id))
            })
            .collect();

        let flat_clusters: Vec<Cluster> = clusters.iter().map(|c| c.cluster.clone()).collect();
        self.replace_graph_rows(
            profile,
            &graph_nodes,
            &edges,
            &flat_clusters,
            &note_cluster_assignments,
        )?;
        self.record_graph_build(profile)?;

        let max_depth = flat_clusters.iter().map(|c| c.depth).max().unwrap_or(0);

        Ok(BuildStats {
            node_count: graph_nodes.len(),
            edge_count: edges.len(),
            cluster_count: flat_clusters.len(),
            max_depth,
            used_community_detection: used_community_detection && !fallback_used,
        })
    }

    /// Every note's stored entity vector from the current graph build, used
    /// by hybrid search's term-similarity signal so it need not recompute
    /// TF·IDF over the whole corpus per query.
    pub fn term_vectors(&self, profile: &str) -> Result<Vec<(i64, Vec<(String, f64)>)>> {
        let reader = self.reader();
        let mut stmt = reader
            .prepare("SELECT memory_id, entities_json FROM graph_nodes WHERE profile = ?1")
            .map_err(crate::storage::StorageError::from)?;
        let rows = stmt
            .query_map(params![profile], |row| {
                let entities_json: String = row.get(1)?;
                let entities: Vec<(String, f64)> = serde_json::from_str(&entities_json).unwrap_or_default();
                Ok((row.get::<_, i64>(0)?, entities))
            })
            .map_err(crate::storage::StorageError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(crate::storage::StorageError::from)?;
        Ok(rows)
    }

    /// Upserts `graph_builds.built_at` for `profile` to now. Called on every
    /// successful build, including the trivial empty-profile case, since a
    /// build did complete and `status` should reflect that.
    fn record_graph_build(&self, profile: &str) -> Result<()> {
        let writer = self.writer();
        writer
            .execute(
                "INSERT INTO graph_builds (profile, built_at) VALUES (?1, ?2) \
                 ON CONFLICT(profile) DO UPDATE SET built_at = excluded.built_at",
                params![profile, Utc::now().to_rfc3339()],
            )
            .map_err(crate::storage::StorageError::from)?;
        Ok(())
    }

    /// Timestamp of the most recent successful [`Storage::build_graph`] for
    /// `profile`, or `None` if no graph has ever been built.
    pub fn last_graph_build(&self, profile: &str) -> Result<Option<DateTime<Utc>>> {
        let reader = self.reader();
        let raw: Option<String> = reader
            .query_row(
                "SELECT built_at FROM graph_builds WHERE profile = ?1",
                params![profile],
                |row| row.get(0),
            )
            .ok();
        Ok(raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc))))
    }

    /// Graph neighbors of `memory_id` in the current build.
    pub fn related(&self, profile: &str, memory_id: i64) -> Result<Vec<GraphEdge>> {
        let reader = self.reader();
        let mut stmt = reader
            .prepare(
                "SELECT source_memory_id, target_memory_id, similarity, relationship_type, shared_entities_json \
                 FROM graph_edges WHERE profile = ?1 AND (source_memory_id = ?2 OR target_memory_id = ?2) \
                 ORDER BY similarity DESC",
            )
            .map_err(crate::storage::StorageError::from)?;
        let rows = stmt
            .query_map(params![profile, memory_id], |row| row_to_edge(row))
            .map_err(crate::storage::StorageError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(crate::storage::StorageError::from)?;
        Ok(rows)
    }

    /// Members and summary of one cluster.
    pub fn cluster(&self, profile: &str, cluster_id: i64) -> Result<Option<(Cluster, Vec<i64>)>> {
        let reader = self.reader();
        let cluster = reader
            .query_row(
                "SELECT id, cluster_name, description, memory_count, avg_importance, \
                        top_entities_json, summary, parent_cluster_id, depth \
                 FROM clusters WHERE profile = ?1 AND id = ?2",
                params![profile, cluster_id],
                row_to_cluster,
            )
            .ok();
        let Some(cluster) = cluster else {
            return Ok(None);
        };
        let mut stmt = reader
            .prepare("SELECT id FROM notes WHERE profile = ?1 AND cluster_id = ?2")
            .map_err(crate::storage::StorageError::from)?;
        let members = stmt
            .query_map(params![profile, cluster_id], |row| row.get::<_, i64>(0))
            .map_err(crate::storage::StorageError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(crate::storage::StorageError::from)?;
        Ok(Some((cluster, members)))
    }

    /// All clusters for `profile`, root-first.
    pub fn list_clusters(&self, profile: &str) -> Result<Vec<Cluster>> {
        let reader = self.reader();
        let mut stmt = reader
            .prepare(
                "SELECT id, cluster_name, description, memory_count, avg_importance, \
                        top_entities_json, summary, parent_cluster_id, depth \
                 FROM clusters WHERE profile = ?1 ORDER BY depth, id",
            )
            .map_err(crate::storage::StorageError::from)?;
        let rows = stmt
            .query_map(params![profile], row_to_cluster)
            .map_err(crate::storage::StorageError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(crate::storage::StorageError::from)?;
        Ok(rows)
    }

    /// Replaces every graph/cluster row for `profile` and reassigns
    /// `notes.cluster_id` in a single transaction, so a failure partway
    /// through a rebuild leaves the previous, fully-consistent graph in
    /// place instead of a half-deleted one.
    fn replace_graph_rows(
        &self,
        profile: &str,
        nodes: &[GraphNode],
        edges: &[GraphEdge],
        clusters: &[Cluster],
        note_cluster_assignments: &[(i64, i64)],
    ) -> Result<()> {
        let mut writer = self.writer();
        let tx = writer.transaction().map_err(crate::storage::StorageError::from)?;
        tx.execute("DELETE FROM graph_nodes WHERE profile = ?1", params![profile])
            .map_err(crate::storage::StorageError::from)?;
        tx.execute("DELETE FROM graph_edges WHERE profile = ?1", params![profile])
            .map_err(crate::storage::StorageError::from)?;
        tx.execute("DELETE FROM clusters WHERE profile = ?1", params![profile])
            .map_err(crate::storage::StorageError::from)?;
        tx.execute("UPDATE notes SET cluster_id = NULL WHERE profile = ?1", params![profile])
            .map_err(crate::storage::StorageError::from)?;

        for node in nodes {
            let entities_json = serde_json::to_string(&node.entities)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            tx.execute(
                "INSERT INTO graph_nodes (memory_id, profile, entities_json) VALUES (?1, ?2, ?3)",
                params![node.memory_id, profile, entities_json],
            )
            .map_err(crate::storage::StorageError::from)?;
        }

        for edge in edges {
            let shared_json = serde_json::to_string(&edge.shared_entities)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            tx.execute(
                "INSERT INTO graph_edges (profile, source_memory_id, target_memory_id, similarity, relationship_type, shared_entities_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![profile, edge.source_memory_id, edge.target_memory_id, edge.similarity, edge.relationship_type, shared_json],
            )
            .map_err(crate::storage::StorageError::from)?;
        }

        for cluster in clusters {
            let top_entities_json = serde_json::to_string(&cluster.top_entities)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            tx.execute(
                "INSERT INTO clusters (id, profile, cluster_name, description, memory_count, avg_importance, top_entities_json, summary, parent_cluster_id, depth) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    cluster.id, profile, cluster.cluster_name, cluster.description,
                    cluster.memory_count, cluster.avg_importance, top_entities_json,
                    cluster.summary, cluster.parent_cluster_id, cluster.depth,
                ],
            )
            .map_err(crate::storage::StorageError::from)?;
        }

        for &(note_id, cluster_id) in note_cluster_assignments {
            tx.execute(
                "UPDATE notes SET cluster_id = ?1 WHERE id = ?2",
                params![cluster_id, note_id],
            )
            .map_err(crate::storage::StorageError::from)?;
        }

        tx.commit().map_err(crate::storage::StorageError::from)?;
        Ok(())
    }

    /// The next unused `clusters.id`. `id` is a global `AUTOINCREMENT`
    /// primary key shared across all profiles, so a build must continue
    /// numbering past whatever the highest existing row is rather than
    /// restarting at 1.
    fn next_cluster_id(&self) -> Result<i64> {
        let reader = self.reader();
        let max: i64 = reader
            .query_row("SELECT COALESCE(MAX(id), 0) FROM clusters", [], |row| row.get(0))
            .map_err(crate::storage::StorageError::from)?;
        Ok(max + 1)
    }

}

fn compute_edges(
    ids: &[i64],
    vectors: &std::collections::HashMap<i64, Vec<(String, f64)>>,
    edge_threshold: f64,
) -> Vec<GraphEdge> {
    let mut edges = Vec::new();
    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            let (a, b) = (ids[i], ids[j]);
            let empty = Vec::new();
            let va = vectors.get(&a).unwrap_or(&empty);
            let vb = vectors.get(&b).unwrap_or(&empty);
            let similarity = cosine_similarity(va, vb);
            if similarity >= edge_threshold {
                let shared = shared_entities(va, vb);
                let (source, target) = if a < b { (a, b) } else { (b, a) };
                edges.push(GraphEdge {
                    source_memory_id: source,
                    target_memory_id: target,
                    similarity,
                    relationship_type: "similarity".to_string(),
                    shared_entities: shared,
                });
            }
        }
    }
    edges
}

fn shared_entities(a: &[(String, f64)], b: &[(String, f64)]) -> Vec<String> {
    let b_terms: std::collections::HashSet<&str> = b.iter().map(|(t, _)| t.as_str()).collect();
    let mut shared: Vec<(String, f64)> = a
        .iter()
        .filter(|(t, _)| b_terms.contains(t.as_str()))
        .cloned()
        .collect();
    shared.sort_by(|x, y| y.1.partial_cmp(&x.1).unwrap_or(std::cmp::Ordering::Equal));
    shared.into_iter().map(|(t, _)| t).collect()
}

/// Runs community detection over the pruned edge set. Returns `(labels,
/// fallback_used)`, where `labels[i]` is the community index of `ids[i]`.
fn detect_communities(
    ids: &[i64],
    edges: &[GraphEdge],
    profile: &str,
    config: &GraphConfig,
    prefer_louvain: bool,
) -> (Vec<usize>, bool) {
    let index_of: std::collections::HashMap<i64, usize> =
        ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let mut graph = AdjacencyGraph::new(ids.len());
    for edge in edges {
        if let (Some(&a), Some(&b)) = (
            index_of.get(&edge.source_memory_id),
            index_of.get(&edge.target_memory_id),
        ) {
            graph.add_edge(a, b, edge.similarity);
        }
    }

    if prefer_louvain {
        let mut rng = Xorshift64::seeded(profile, ids.len());
        (louvain_communities(&graph, config.resolution, &mut rng), false)
    } else {
        (connected_components(&graph), true)
    }
}

/// A cluster plus its leaf-member note ids, used while assembling the
/// hierarchy before flattening for persistence.
struct ClusterNode {
    cluster: Cluster,
    leaf_members: Vec<i64>,
}

/// Builds the (possibly recursive) cluster hierarchy from top-level
/// community labels, splitting any cluster with ≥ `min_split_size` members
/// by re-running community detection on its induced subgraph, up to
/// `max_depth`.
fn build_cluster_hierarchy(
    notes: &[crate::model::Note],
    ids: &[i64],
    top_level_labels: &[usize],
    vectors: &std::collections::HashMap<i64, Vec<(String, f64)>>,
    config: &GraphConfig,
    starting_id: i64,
) -> Vec<ClusterNode> {
    let mut next_id: i64 = starting_id;
    let mut output = Vec::new();

    let mut groups: std::collections::BTreeMap<usize, Vec<i64>> = std::collections::BTreeMap::new();
    for (idx, &id) in ids.iter().enumerate() {
        groups.entry(top_level_labels[idx]).or_default().push(id);
    }

    for (_, members) in groups {
        let assigned_id = next_id;
        next_id += 1;
        let cluster = assemble_cluster(assigned_id, notes, &members, vectors, None, 0);
        let leaf_members = if members.len() >= config.min_split_size && config.max_depth > 0 {
            split_cluster(
                assigned_id,
                notes,
                &members,
                vectors,
                config,
                1,
                &mut next_id,
                &mut output,
            )
        } else {
            members.clone()
        };
        output.push(ClusterNode { cluster, leaf_members });
    }

    output
}

fn split_cluster(
    parent_id: i64,
    notes: &[crate::model::Note],
    members: &[i64],
    vectors: &std::collections::HashMap<i64, Vec<(String, f64)>>,
    config: &GraphConfig,
    depth: i32,
    next_id: &mut i64,
    output: &mut Vec<ClusterNode>,
) -> Vec<i64> {
    if depth > config.max_depth || members.len() < 2 {
        return members.to_vec();
    }

    let sub_edges = compute_edges(members, vectors, config.edge_threshold);
    let (labels, _) = detect_communities(members, &sub_edges, "subcluster", config, true);
    let distinct: std::collections::HashSet<usize> = labels.iter().copied().collect();
    if distinct.len() <= 1 {
        return members.to_vec();
    }

    let mut groups: std::collections::BTreeMap<usize, Vec<i64>> = std::collections::BTreeMap::new();
    for (idx, &id) in members.iter().enumerate() {
        groups.entry(labels[idx]).or_default().push(id);
    }

    let mut all_leaves = Vec::new();
    for (_, sub_members) in groups {
        let id = *next_id;
        *next_id += 1;
        let cluster = assemble_cluster(id, notes, &sub_members, vectors, Some(parent_id), depth);
        let leaves = if sub_members.len() >= config.min_split_size {
            split_cluster(id, notes, &sub_members, vectors, config, depth + 1, next_id, output)
        } else {
            sub_members.clone()
        };
        all_leaves.extend(leaves.iter().copied());
        output.push(ClusterNode {
            cluster,
            leaf_members: leaves,
        });
    }
    all_leaves
}

fn assemble_cluster(
    id: i64,
    notes: &[crate::model::Note],
    members: &[i64],
    vectors: &std::collections::HashMap<i64, Vec<(String, f64)>>,
    parent_cluster_id: Option<i64>,
    depth: i32,
) -> Cluster {
    let member_notes: Vec<&crate::model::Note> =
        notes.iter().filter(|n| members.contains(&n.id)).collect();

    let avg_importance = if member_notes.is_empty() {
        0.0
    } else {
        member_notes.iter().map(|n| n.importance as f64).sum::<f64>() / member_notes.len() as f64
    };

    let weighted_entities = naming::aggregate_top_entities_weighted(members, vectors, 5);
    let top_entities: Vec<String> = weighted_entities.iter().map(|(term, _)| term.clone()).collect();
    let cluster_name = naming::name_cluster(id, &weighted_entities);
    let summary = naming::summarize_cluster(&member_notes, &top_entities, parent_cluster_id);

    Cluster {
        id,
        cluster_name,
        description: format!("{} notes", member_notes.len()),
        memory_count: member_notes.len() as i64,
        avg_importance,
        top_entities,
        summary,
        parent_cluster_id,
        depth,
    }
}

fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<GraphEdge> {
    let shared_json: String = row.get(4)?;
    Ok(GraphEdge {
        source_memory_id: row.get(0)?,
        target_memory_id: row.get(1)?,
        similarity: row.get(2)?,
        relationship_type: row.get(3)?,
        shared_entities: serde_json::from_str(&shared_json).unwrap_or_default(),
    })
}

fn row_to_cluster(row: &rusqlite::Row) -> rusqlite::Result<Cluster> {
    let top_entities_json: String = row.get(5)?;
    Ok(Cluster {
        id: row.get(0)?,
        cluster_name: row.get(1)?,
        description: row.get(2)?,
        memory_count: row.get(3)?,
        avg_importance: row.get(4)?,
        top_entities: serde_json::from_str(&top_entities_json).unwrap_or_default(),
        summary: row.get(6)?,
        parent_cluster_id: row.get(7)?,
        depth: row.get(8)?,
    })
}
