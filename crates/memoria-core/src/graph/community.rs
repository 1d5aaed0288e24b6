//! Community detection over a materialized weighted adjacency view.
//!
//! No community-detection crate exists anywhere in this project's
//! dependency corpus, so this hand-implements a single-level Louvain-style
//! modularity-optimization pass (the "community detection algorithm of the
//! Leiden family" the design calls for) plus a dependency-free
//! connected-components fallback via union-find, used when
//! `graph.community_detection = "connected-components"` or as the
//! degradation path when the weighted graph has no meaningful structure to
//! optimize.
//!
//! Vertices are contiguous `usize` ids; callers map back to note ids.

/// A weighted undirected graph as an adjacency list, `vertex -> [(neighbor, weight)]`.
pub struct AdjacencyGraph {
    pub adjacency: Vec<Vec<(usize, f64)>>,
}

impl AdjacencyGraph {
    pub fn new(vertex_count: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); vertex_count],
        }
    }

    pub fn add_edge(&mut self, a: usize, b: usize, weight: f64) {
        self.adjacency[a].push((b, weight));
        self.adjacency[b].push((a, weight));
    }

    pub fn vertex_count(&self) -> usize {
        self.adjacency.len()
    }

    fn total_weight(&self) -> f64 {
        self.adjacency
            .iter()
            .map(|edges| edges.iter().map(|(_, w)| w).sum::<f64>())
            .sum::<f64>()
            / 2.0
    }

    fn degree(&self, v: usize) -> f64 {
        self.adjacency[v].iter().map(|(_, w)| w).sum()
    }
}

/// A tiny deterministic PRNG (xorshift64*) seeded from `(profile, note_count)`
/// so graph builds with identical inputs produce identical partitions. No
/// `rand` dependency exists anywhere in this project's corpus for this.
pub struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    pub fn seeded(profile: &str, note_count: usize) -> Self {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in profile.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash ^= note_count as u64;
        Self {
            state: hash.max(1),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Fisher-Yates shuffle using this generator.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = (self.next_u64() as usize) % (i + 1);
            items.swap(i, j);
        }
    }
}

/// One level of Louvain-style local-moving modularity optimization: each
/// vertex starts in its own community, then repeatedly moves to the
/// neighboring community that yields the greatest modularity gain, until no
/// move improves modularity. `resolution` scales the null-model term
/// (values > 1 favor more, smaller communities).
pub fn louvain_communities(
    graph: &AdjacencyGraph,
    resolution: f64,
    rng: &mut Xorshift64,
) -> Vec<usize> {
    let n = graph.vertex_count();
    let mut community = (0..n).collect::<Vec<usize>>();
    if n == 0 {
        return community;
    }

    let total_weight = graph.total_weight().max(1e-12);
    let degrees: Vec<f64> = (0..n).map(|v| graph.degree(v)).collect();

    let mut order: Vec<usize> = (0..n).collect();
    rng.shuffle(&mut order);

    let mut improved = true;
    let mut iterations = 0;
    while improved && iterations < 100 {
        improved = false;
        iterations += 1;
        for &v in &order {
            let current_community = community[v];

            // Weight from v into each neighboring community.
            let mut weight_to_community: std::collections::HashMap<usize, f64> =
                std::collections::HashMap::new();
            for &(neighbor, w) in &graph.adjacency[v] {
                if neighbor == v {
                    continue;
                }
                *weight_to_community.entry(community[neighbor]).or_insert(0.0) += w;
            }

            let community_degree_sum = |target: usize, exclude: usize| -> f64 {
                (0..n)
                    .filter(|&u| u != exclude && community[u] == target)
                    .map(|u| degrees[u])
                    .sum()
            };

            let current_sigma_tot = community_degree_sum(current_community, v);
            let gain = |target: usize, w_to_target: f64| -> f64 {
                let sigma_tot = community_degree_sum(target, v);
                w_to_target / total_weight
                    - resolution * (sigma_tot * degrees[v]) / (2.0 * total_weight * total_weight)
            };

            let current_gain = gain(
                current_community,
                weight_to_community.get(&current_community).copied().unwrap_or(0.0),
            );
            let _ = current_sigma_tot;

            let mut best_community = current_community;
            let mut best_gain = current_gain;
            for (&candidate, &w) in &weight_to_community {
                if candidate == current_community {
                    continue;
                }
                let candidate_gain = gain(candidate, w);
                if candidate_gain > best_gain + 1e-12 {
                    best_gain = candidate_gain;
                    best_community = candidate;
                }
            }

            if best_community != current_community {
                community[v] = best_community;
                improved = true;
            }
        }
    }

    renumber_communities(&community)
}

/// Renumbers arbitrary community labels to a dense `0..k` range, ordering
/// by descending member count so equal-modularity partitions are persisted
/// deterministically (the documented tie-break policy).
pub fn renumber_communities(labels: &[usize]) -> Vec<usize> {
    let mut counts: std::collections::HashMap<usize, usize> = std::collections::HashMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    let mut by_count: Vec<(usize, usize)> = counts.into_iter().collect();
    by_count.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let remap: std::collections::HashMap<usize, usize> = by_count
        .into_iter()
        .enumerate()
        .map(|(new_id, (old_id, _))| (old_id, new_id))
        .collect();
    labels.iter().map(|l| remap[l]).collect()
}

/// Union-find over the pruned similarity graph. Used as the
/// always-available fallback when community detection is disabled or the
/// weighted graph degrades to trivial structure (§4.5 failure semantics:
/// "clusters degrade to connected components of the pruned similarity
/// graph").
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        if self.rank[ra] < self.rank[rb] {
            self.parent[ra] = rb;
        } else if self.rank[ra] > self.rank[rb] {
            self.parent[rb] = ra;
        } else {
            self.parent[rb] = ra;
            self.rank[ra] += 1;
        }
    }
}

pub fn connected_components(graph: &AdjacencyGraph) -> Vec<usize> {
    let n = graph.vertex_count();
    let mut uf = UnionFind::new(n);
    for v in 0..n {
        for &(neighbor, _) in &graph.adjacency[v] {
            uf.union(v, neighbor);
        }
    }
    let labels: Vec<usize> = (0..n).map(|v| uf.find(v)).collect();
    renumber_communities(&labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_components_groups_disjoint_triangles() {
        let mut graph = AdjacencyGraph::new(6);
        graph.add_edge(0, 1, 1.0);
        graph.add_edge(1, 2, 1.0);
        graph.add_edge(3, 4, 1.0);
        graph.add_edge(4, 5, 1.0);
        let labels = connected_components(&graph);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn louvain_is_deterministic_given_the_same_seed() {
        let mut graph = AdjacencyGraph::new(4);
        graph.add_edge(0, 1, 1.0);
        graph.add_edge(2, 3, 1.0);
        let mut rng1 = Xorshift64::seeded("default", 4);
        let mut rng2 = Xorshift64::seeded("default", 4);
        let first = louvain_communities(&graph, 1.0, &mut rng1);
        let second = louvain_communities(&graph, 1.0, &mut rng2);
        assert_eq!(first, second);
    }

    #[test]
    fn louvain_separates_two_disjoint_clusters() {
        let mut graph = AdjacencyGraph::new(4);
        graph.add_edge(0, 1, 1.0);
        graph.add_edge(2, 3, 1.0);
        let mut rng = Xorshift64::seeded("default", 4);
        let labels = louvain_communities(&graph, 1.0, &mut rng);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn renumber_orders_by_descending_member_count() {
        let labels = vec![5, 5, 5, 9, 9, 3];
        let renumbered = renumber_communities(&labels);
        // The 3-member group (originally label 5) should become 0.
        assert_eq!(renumbered[0], 0);
        assert_eq!(renumbered[1], 0);
        assert_eq!(renumbered[2], 0);
        assert_eq!(renumbered[3], 1);
        assert_eq!(renumbered[4], 1);
        assert_eq!(renumbered[5], 2);
    }
}
