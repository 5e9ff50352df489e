//! Track compatibility graph and its maximal cliques.
//!
//! An edge joins two tracks whose pairwise vertex fit was accepted. Every
//! maximal clique is a largest set of mutually compatible tracks and seeds
//! one candidate vertex.

use crate::vertex::TrackIndex;
use std::collections::BTreeSet;

/// Undirected graph over selected-track indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompatibilityGraph {
    adjacency: Vec<BTreeSet<TrackIndex>>,
}

impl CompatibilityGraph {
    pub fn new(n_nodes: usize) -> Self {
        Self {
            adjacency: vec![BTreeSet::new(); n_nodes],
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.adjacency.len()
    }

    /// Adds the edge (a, b); self-loops and out-of-range nodes are ignored.
    pub fn add_edge(&mut self, a: TrackIndex, b: TrackIndex) {
        if a == b || a >= self.n_nodes() || b >= self.n_nodes() {
            return;
        }
        self.adjacency[a].insert(b);
        self.adjacency[b].insert(a);
    }

    pub fn has_edge(&self, a: TrackIndex, b: TrackIndex) -> bool {
        self.adjacency.get(a).is_some_and(|n| n.contains(&b))
    }

    pub fn neighbors(&self, node: TrackIndex) -> impl Iterator<Item = TrackIndex> + '_ {
        self.adjacency.get(node).into_iter().flatten().copied()
    }

    pub fn degree(&self, node: TrackIndex) -> usize {
        self.adjacency.get(node).map_or(0, |n| n.len())
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(|n| n.len()).sum::<usize>() / 2
    }

    /// All edges (a, b) with a < b, in ascending order.
    pub fn edges(&self) -> Vec<(TrackIndex, TrackIndex)> {
        self.adjacency
            .iter()
            .enumerate()
            .flat_map(|(a, n)| n.range(a + 1..).map(move |&b| (a, b)))
            .collect()
    }

    /// Every maximal clique with at least two nodes, each sorted ascending.
    ///
    /// Bron-Kerbosch with pivoting. The pivot is the node of P ∪ X with the
    /// most neighbours in P (lowest index on ties) and candidates are
    /// expanded in ascending order, so the output order is deterministic.
    pub fn maximal_cliques(&self) -> Vec<Vec<TrackIndex>> {
        let mut cliques = Vec::new();
        let candidates: BTreeSet<TrackIndex> = (0..self.n_nodes()).collect();
        self.bron_kerbosch(&mut Vec::new(), candidates, BTreeSet::new(), &mut cliques);
        cliques
    }

    fn bron_kerbosch(
        &self,
        clique: &mut Vec<TrackIndex>,
        mut candidates: BTreeSet<TrackIndex>,
        mut excluded: BTreeSet<TrackIndex>,
        out: &mut Vec<Vec<TrackIndex>>,
    ) {
        if candidates.is_empty() {
            if excluded.is_empty() && clique.len() >= 2 {
                let mut found = clique.clone();
                found.sort_unstable();
                out.push(found);
            }
            return;
        }

        let pivot = self.pick_pivot(&candidates, &excluded);
        let expand: Vec<TrackIndex> = candidates
            .iter()
            .copied()
            .filter(|v| !self.has_edge(pivot, *v))
            .collect();

        for v in expand {
            let n = &self.adjacency[v];
            clique.push(v);
            self.bron_kerbosch(
                clique,
                candidates.intersection(n).copied().collect(),
                excluded.intersection(n).copied().collect(),
                out,
            );
            clique.pop();
            candidates.remove(&v);
            excluded.insert(v);
        }
    }

    fn pick_pivot(&self, candidates: &BTreeSet<TrackIndex>, excluded: &BTreeSet<TrackIndex>) -> TrackIndex {
        let mut all: Vec<TrackIndex> = candidates.union(excluded).copied().collect();
        all.sort_unstable();
        let mut best = all[0];
        let mut best_count = 0;
        for (k, &u) in all.iter().enumerate() {
            let count = self.adjacency[u].intersection(candidates).count();
            if k == 0 || count > best_count {
                best = u;
                best_count = count;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn graph(n: usize, edges: &[(usize, usize)]) -> CompatibilityGraph {
        let mut g = CompatibilityGraph::new(n);
        for &(a, b) in edges {
            g.add_edge(a, b);
        }
        g
    }

    #[test]
    fn test_edges_are_symmetric() {
        let g = graph(4, &[(0, 1), (2, 1), (3, 3), (0, 9)]);
        assert!(g.has_edge(1, 0));
        assert!(g.has_edge(1, 2));
        assert!(!g.has_edge(3, 3));
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.edges(), vec![(0, 1), (1, 2)]);
        assert_eq!(g.degree(1), 2);
    }

    #[test]
    fn test_triangle_with_tail() {
        let g = graph(5, &[(0, 1), (1, 2), (0, 2), (2, 3)]);
        assert_eq!(g.maximal_cliques(), vec![vec![0, 1, 2], vec![2, 3]]);
    }

    #[test]
    fn test_isolated_nodes_give_nothing() {
        assert!(graph(3, &[]).maximal_cliques().is_empty());
        assert!(CompatibilityGraph::new(0).maximal_cliques().is_empty());
    }

    #[test]
    fn test_overlapping_cliques() {
        // two 4-cliques sharing the edge (2, 3)
        let g = graph(
            6,
            &[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3), (2, 4), (2, 5), (3, 4), (3, 5), (4, 5)],
        );
        let mut cliques = g.maximal_cliques();
        cliques.sort();
        assert_eq!(cliques, vec![vec![0, 1, 2, 3], vec![2, 3, 4, 5]]);
    }

    #[test]
    fn test_output_is_deterministic() {
        let g = graph(6, &[(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (1, 4)]);
        assert_eq!(g.maximal_cliques(), g.clone().maximal_cliques());
    }

    proptest! {
        #[test]
        fn prop_cliques_cover_edges_and_are_maximal(
            n in 2usize..12,
            raw in prop::collection::vec((0usize..12, 0usize..12), 0..40),
        ) {
            let edges: Vec<(usize, usize)> = raw.into_iter().map(|(a, b)| (a % n, b % n)).collect();
            let g = graph(n, &edges);
            let cliques = g.maximal_cliques();

            for c in &cliques {
                prop_assert!(c.len() >= 2);
                for (k, &a) in c.iter().enumerate() {
                    for &b in &c[k + 1..] {
                        prop_assert!(g.has_edge(a, b));
                    }
                }
                for v in 0..n {
                    if c.contains(&v) {
                        continue;
                    }
                    prop_assert!(!c.iter().all(|&m| g.has_edge(v, m)));
                }
            }
            for (a, b) in g.edges() {
                prop_assert!(cliques.iter().any(|c| c.contains(&a) && c.contains(&b)));
            }
        }
    }
}
