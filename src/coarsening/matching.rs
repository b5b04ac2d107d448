//! Heavy-edge matching clustering.
//!
//! Nodes are visited in a shuffled order; each unmatched node pairs with its
//! unmatched neighbor of maximum edge weight, subject to the cluster weight
//! cap. The resulting clustering halves the node count at best and never
//! crosses the cap.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

use super::Clustering;
use crate::graph::Graph;
use crate::{NodeId, NodeWeight};

pub fn heavy_edge_matching(
    graph: &Graph,
    max_cluster_weight: NodeWeight,
    rng: &mut SmallRng,
) -> Clustering {
    let n = graph.n();
    let mut matched = vec![false; n];
    let mut clusters = vec![0 as NodeId; n];

    let mut order: Vec<NodeId> = (0..n).collect();
    order.shuffle(rng);

    let mut next_cluster = 0;
    for u in order {
        if matched[u] {
            continue;
        }

        // Heaviest unmatched neighbor that fits under the weight cap; ties go
        // to the smaller id so the result does not depend on neighbor order.
        let mut best_weight = 0;
        let mut best_neighbor = None;
        for (e, v) in graph.neighbors(u) {
            let w = graph.edge_weight(e);
            let better = w > best_weight
                || (w == best_weight && best_neighbor.is_some_and(|b| v < b));
            if better
                && !matched[v]
                && v != u
                && graph.node_weight(u) + graph.node_weight(v) <= max_cluster_weight
            {
                best_weight = w;
                best_neighbor = Some(v);
            }
        }

        matched[u] = true;
        clusters[u] = next_cluster;
        if let Some(v) = best_neighbor {
            matched[v] = true;
            clusters[v] = next_cluster;
        }
        next_cluster += 1;
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CsrGraph;
    use rand::SeedableRng;

    #[test]
    fn test_matches_heaviest_edges() {
        // Arrange: triangle where edge (1,2) is heaviest
        let graph = Graph::Csr(CsrGraph::from_edges(3, &[(0, 1, 5), (0, 2, 10), (1, 2, 15)]));
        let mut rng = SmallRng::seed_from_u64(5);

        // Act
        let clusters = heavy_edge_matching(&graph, i64::MAX, &mut rng);

        // Assert: exactly one pair is merged
        let num_clusters = clusters.iter().collect::<std::collections::HashSet<_>>().len();
        assert_eq!(num_clusters, 2);
    }

    #[test]
    fn test_respects_cluster_weight_cap() {
        // Arrange
        let graph = Graph::Csr(CsrGraph::from_weighted_edges(
            2,
            &[(0, 1, 1)],
            vec![10, 10],
        ));
        let mut rng = SmallRng::seed_from_u64(5);

        // Act
        let clusters = heavy_edge_matching(&graph, 15, &mut rng);

        // Assert: combined weight 20 exceeds the cap, so no merge happens
        assert_ne!(clusters[0], clusters[1]);
    }
}
