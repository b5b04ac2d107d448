//! Cluster contraction: collapses a clustering into a coarse graph.

use rayon::prelude::*;

use super::Clustering;
use crate::datastructures::RatingMap;
use crate::graph::{CsrGraph, Graph};
use crate::{EdgeId, EdgeWeight, NodeId, NodeWeight, INVALID_NODE};

/// Contracts `clustering` and returns the coarse graph plus the fine-to-coarse
/// node mapping. Parallel edges between clusters collapse into one edge whose
/// weight is the sum; intra-cluster edges vanish.
pub fn contract_clustering(graph: &Graph, clustering: &Clustering) -> (CsrGraph, Vec<NodeId>) {
    let n = graph.n();
    debug_assert_eq!(n, clustering.len());

    // Densify cluster ids in first-appearance order so the mapping is
    // deterministic for a fixed clustering.
    let mut remap = vec![INVALID_NODE; n];
    let mut mapping = vec![0 as NodeId; n];
    let mut coarse_n = 0;
    for u in 0..n {
        let c = clustering[u];
        if remap[c] == INVALID_NODE {
            remap[c] = coarse_n;
            coarse_n += 1;
        }
        mapping[u] = remap[c];
    }

    // Bucket fine nodes by coarse node.
    let mut bucket_offsets = vec![0 as NodeId; coarse_n + 1];
    for &c in &mapping {
        bucket_offsets[c + 1] += 1;
    }
    for c in 0..coarse_n {
        bucket_offsets[c + 1] += bucket_offsets[c];
    }
    let mut buckets = vec![0 as NodeId; n];
    let mut cursor = bucket_offsets.clone();
    for u in 0..n {
        buckets[cursor[mapping[u]]] = u;
        cursor[mapping[u]] += 1;
    }

    let coarse_node_weights: Vec<NodeWeight> = (0..coarse_n)
        .into_par_iter()
        .map(|c| {
            buckets[bucket_offsets[c]..bucket_offsets[c + 1]]
                .iter()
                .map(|&u| graph.node_weight(u))
                .sum()
        })
        .collect();

    // Aggregate the coarse adjacency per coarse node with a thread-local
    // rating map; rows come out sorted by target.
    let rows: Vec<Vec<(NodeId, EdgeWeight)>> = (0..coarse_n)
        .into_par_iter()
        .map_init(RatingMap::new, |rating, c| {
            rating.clear();
            for &u in &buckets[bucket_offsets[c]..bucket_offsets[c + 1]] {
                for (e, v) in graph.neighbors(u) {
                    let cv = mapping[v];
                    if cv != c {
                        rating.add(cv, graph.edge_weight(e));
                    }
                }
            }
            let mut row: Vec<(NodeId, EdgeWeight)> = rating.entries().collect();
            row.sort_unstable_by_key(|&(v, _)| v);
            row
        })
        .collect();

    let mut offsets = vec![0 as EdgeId; coarse_n + 1];
    for c in 0..coarse_n {
        offsets[c + 1] = offsets[c] + rows[c].len();
    }
    let m = offsets[coarse_n];
    let mut targets = vec![0 as NodeId; m];
    let mut edge_weights = vec![0 as EdgeWeight; m];
    for c in 0..coarse_n {
        for (i, &(v, w)) in rows[c].iter().enumerate() {
            targets[offsets[c] + i] = v;
            edge_weights[offsets[c] + i] = w;
        }
    }

    (
        CsrGraph::new(offsets, targets, coarse_node_weights, edge_weights, false),
        mapping,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_merges_parallel_edges() {
        // Arrange: triangle where 1 and 2 merge; the merged cluster keeps a
        // single edge to node 0 with the summed weight.
        let graph = Graph::Csr(CsrGraph::from_edges(3, &[(0, 1, 5), (0, 2, 10), (1, 2, 15)]));
        let clustering = vec![0, 1, 1];

        // Act
        let (coarse, mapping) = contract_clustering(&graph, &clustering);

        // Assert
        assert_eq!(coarse.n(), 2);
        assert_eq!(mapping, vec![0, 1, 1]);
        let row: Vec<(NodeId, EdgeWeight)> =
            coarse.neighbors(0).map(|(e, v)| (v, coarse.edge_weight(e))).collect();
        assert_eq!(row, vec![(1, 15)]);
        assert_eq!(coarse.node_weight(1), 2);
    }

    #[test]
    fn test_contract_preserves_total_node_weight() {
        // Arrange
        let graph = Graph::Csr(CsrGraph::from_weighted_edges(
            5,
            &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 4, 1)],
            vec![1, 2, 3, 4, 5],
        ));
        let clustering = vec![0, 0, 2, 2, 4];

        // Act
        let (coarse, _) = contract_clustering(&graph, &clustering);

        // Assert
        assert_eq!(coarse.n(), 3);
        assert_eq!(coarse.total_node_weight(), graph.total_node_weight());
    }

    #[test]
    fn test_identity_clustering_keeps_the_graph() {
        // Arrange
        let graph = Graph::Csr(CsrGraph::from_edges(4, &[(0, 1, 1), (1, 2, 2), (2, 3, 3)]));
        let clustering: Clustering = (0..4).collect();

        // Act
        let (coarse, mapping) = contract_clustering(&graph, &clustering);

        // Assert
        assert_eq!(coarse.n(), 4);
        assert_eq!(coarse.m(), graph.m());
        assert_eq!(mapping, vec![0, 1, 2, 3]);
    }
}
