//! Cluster naming and summarization.
//!
//! A cluster's name is derived from its own top aggregate TF·IDF terms, not
//! from any member note's title — there are no titles. Falls back to
//! `Cluster <id>` when no entity clears the corpus noise floor.

use std::collections::HashMap;

use crate::model::Note;

const NAME_TERM_COUNT: usize = 3;
/// A cluster's top entity must clear this aggregate TF·IDF weight to be
/// considered "dominant" enough to name the cluster after (§4.5 step 6).
const MIN_NAME_WEIGHT: f64 = 0.05;

/// Aggregates per-note term vectors across `members` into a single ranked
/// list, summing weights across notes and taking the top `k`, alongside each
/// term's aggregate weight (used by [`name_cluster`] to judge dominance).
pub fn aggregate_top_entities_weighted(
    members: &[i64],
    vectors: &HashMap<i64, Vec<(String, f64)>>,
    k: usize,
) -> Vec<(String, f64)> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    for &id in members {
        if let Some(terms) = vectors.get(&id) {
            for (term, weight) in terms {
                *totals.entry(term.clone()).or_insert(0.0) += weight;
            }
        }
    }
    let mut ranked: Vec<(String, f64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(k);
    ranked
}

/// Same as [`aggregate_top_entities_weighted`] but discards the weights, for
/// callers (persisted `Cluster.top_entities`) that only need the term list.
pub fn aggregate_top_entities(
    members: &[i64],
    vectors: &HashMap<i64, Vec<(String, f64)>>,
    k: usize,
) -> Vec<String> {
    aggregate_top_entities_weighted(members, vectors, k)
        .into_iter()
        .map(|(term, _)| term)
        .collect()
}

/// Names a cluster from its top weighted entities, joining the leading terms
/// with `&`. Falls back to a numbered placeholder when there are no entities
/// or the top one never clears [`MIN_NAME_WEIGHT`] — a "no dominant terms"
/// cluster names itself by id rather than by noise.
pub fn name_cluster(id: i64, top_entities: &[(String, f64)]) -> String {
    match top_entities.first() {
        Some((_, weight)) if *weight >= MIN_NAME_WEIGHT => top_entities
            .iter()
            .take(NAME_TERM_COUNT)
            .map(|(term, _)| term.clone())
            .collect::<Vec<_>>()
            .join(" & "),
        _ => format!("Cluster {id}"),
    }
}

/// A short human-readable summary: member count, top entities, and a note
/// about sub-clustering if this cluster has a parent.
pub fn summarize_cluster(
    members: &[&Note],
    top_entities: &[String],
    parent_cluster_id: Option<i64>,
) -> String {
    let entity_list = if top_entities.is_empty() {
        "no dominant terms".to_string()
    } else {
        top_entities.join(", ")
    };
    let lineage = match parent_cluster_id {
        Some(parent) => format!(" (refined from cluster {parent})"),
        None => String::new(),
    };
    format!(
        "{} notes centered on: {}{}",
        members.len(),
        entity_list,
        lineage
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_cluster_falls_back_when_no_entities() {
        assert_eq!(name_cluster(7, &[]), "Cluster 7");
    }

    #[test]
    fn name_cluster_falls_back_when_top_weight_is_below_the_noise_floor() {
        let terms = vec![("stray".to_string(), 0.001)];
        assert_eq!(name_cluster(3, &terms), "Cluster 3");
    }

    #[test]
    fn name_cluster_joins_top_terms() {
        let terms = vec![
            ("react".to_string(), 0.9),
            ("auth".to_string(), 0.8),
            ("jwt".to_string(), 0.7),
            ("extra".to_string(), 0.6),
        ];
        assert_eq!(name_cluster(1, &terms), "react & auth & jwt");
    }

    #[test]
    fn aggregate_top_entities_sums_across_members() {
        let mut vectors = HashMap::new();
        vectors.insert(1, vec![("react".to_string(), 0.5)]);
        vectors.insert(2, vec![("react".to_string(), 0.6), ("auth".to_string(), 0.2)]);
        let top = aggregate_top_entities(&[1, 2], &vectors, 2);
        assert_eq!(top[0], "react");
    }
}
