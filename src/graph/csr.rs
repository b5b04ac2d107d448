//! Plain CSR graph storage.
//!
//! Node ids are `0..n`, edge ids `0..m` with both directions of every
//! undirected edge materialized. Weights are optional; an empty weight array
//! means unit weights. Once built, a graph is immutable except for the
//! reversible isolated-node trimming used around initial partitioning.

use rayon::prelude::*;

use crate::{EdgeId, EdgeWeight, NodeId, NodeWeight};

/// Number of degree buckets: bucket 0 holds isolated nodes, bucket `b >= 1`
/// holds degrees in `[2^(b-1), 2^b)`.
pub const NUMBER_OF_DEGREE_BUCKETS: usize = usize::BITS as usize + 1;

/// Bucket index of a degree.
pub fn degree_bucket(degree: NodeId) -> usize {
    if degree == 0 {
        0
    } else {
        degree.ilog2() as usize + 1
    }
}

// In bucket-sorted layout, non-isolated buckets come first in ascending
// order and isolated nodes form the trailing slot, so trimming them is a
// truncation of the node table.
fn bucket_slot(bucket: usize) -> usize {
    if bucket == 0 {
        NUMBER_OF_DEGREE_BUCKETS - 1
    } else {
        bucket - 1
    }
}

/// Prefix sums over the bucket-sorted node layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegreeBuckets {
    starts: Vec<NodeId>,
}

impl DegreeBuckets {
    /// Builds the histogram in parallel from per-node degrees.
    pub fn from_degrees(degrees: impl IndexedParallelIterator<Item = NodeId>) -> Self {
        let counts = degrees
            .fold(
                || vec![0 as NodeId; NUMBER_OF_DEGREE_BUCKETS],
                |mut acc, degree| {
                    acc[bucket_slot(degree_bucket(degree))] += 1;
                    acc
                },
            )
            .reduce(
                || vec![0 as NodeId; NUMBER_OF_DEGREE_BUCKETS],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    a
                },
            );

        let mut starts = vec![0 as NodeId; NUMBER_OF_DEGREE_BUCKETS + 1];
        for slot in 0..NUMBER_OF_DEGREE_BUCKETS {
            starts[slot + 1] = starts[slot] + counts[slot];
        }
        Self { starts }
    }

    /// Degenerate histogram for graphs without bucket ordering: all nodes in
    /// the first slot.
    pub fn unsorted(n: NodeId) -> Self {
        let mut starts = vec![n; NUMBER_OF_DEGREE_BUCKETS + 1];
        starts[0] = 0;
        Self { starts }
    }

    pub fn first_node_in_bucket(&self, bucket: usize) -> NodeId {
        self.starts[bucket_slot(bucket)]
    }

    pub fn first_invalid_node_in_bucket(&self, bucket: usize) -> NodeId {
        self.starts[bucket_slot(bucket) + 1]
    }

    pub fn size_of_bucket(&self, bucket: usize) -> NodeId {
        self.first_invalid_node_in_bucket(bucket) - self.first_node_in_bucket(bucket)
    }

    pub fn number_of_nonempty_buckets(&self) -> usize {
        (0..NUMBER_OF_DEGREE_BUCKETS)
            .filter(|&slot| self.starts[slot + 1] > self.starts[slot])
            .count()
    }

    /// Removes `count` nodes from the trailing isolated slot.
    pub fn remove_isolated(&mut self, count: NodeId) {
        let last = NUMBER_OF_DEGREE_BUCKETS;
        debug_assert!(self.starts[last] - self.starts[last - 1] >= count);
        self.starts[last] -= count;
    }

    /// Exact inverse of [`remove_isolated`](Self::remove_isolated).
    pub fn integrate_isolated(&mut self, count: NodeId) {
        self.starts[NUMBER_OF_DEGREE_BUCKETS] += count;
    }
}

/// Static graph in compressed-sparse-row form.
#[derive(Debug, Clone)]
pub struct CsrGraph {
    offsets: Vec<EdgeId>,
    targets: Vec<NodeId>,
    node_weights: Vec<NodeWeight>,
    edge_weights: Vec<EdgeWeight>,
    n: NodeId,
    full_n: NodeId,
    total_node_weight: NodeWeight,
    max_node_weight: NodeWeight,
    total_edge_weight: EdgeWeight,
    max_degree: NodeId,
    sorted: bool,
    buckets: DegreeBuckets,
}

impl CsrGraph {
    /// Builds a graph from raw CSR arrays. `sorted` asserts that the node
    /// order is sorted by degree bucket with isolated nodes last.
    pub fn new(
        offsets: Vec<EdgeId>,
        targets: Vec<NodeId>,
        node_weights: Vec<NodeWeight>,
        edge_weights: Vec<EdgeWeight>,
        sorted: bool,
    ) -> Self {
        debug_assert!(!offsets.is_empty());
        debug_assert_eq!(*offsets.last().expect("offsets non-empty"), targets.len());

        let n = offsets.len() - 1;
        debug_assert!(node_weights.is_empty() || node_weights.len() == n);
        debug_assert!(edge_weights.is_empty() || edge_weights.len() == targets.len());

        let degrees = |u: NodeId| offsets[u + 1] - offsets[u];
        let max_degree = (0..n).into_par_iter().map(degrees).max().unwrap_or(0);
        let buckets = if sorted {
            DegreeBuckets::from_degrees((0..n).into_par_iter().map(degrees))
        } else {
            DegreeBuckets::unsorted(n)
        };

        let (total_node_weight, max_node_weight) = if node_weights.is_empty() {
            (n as NodeWeight, 1)
        } else {
            (
                node_weights.par_iter().sum(),
                node_weights.par_iter().copied().max().unwrap_or(1),
            )
        };
        let total_edge_weight = if edge_weights.is_empty() {
            targets.len() as EdgeWeight
        } else {
            edge_weights.par_iter().sum()
        };

        Self {
            offsets,
            targets,
            node_weights,
            edge_weights,
            n,
            full_n: n,
            total_node_weight,
            max_node_weight,
            total_edge_weight,
            max_degree,
            sorted,
            buckets,
        }
    }

    /// Builds a symmetric unit-node-weight graph from one entry per
    /// undirected edge. Intended for tests and generators.
    pub fn from_edges(n: NodeId, edges: &[(NodeId, NodeId, EdgeWeight)]) -> Self {
        Self::from_weighted_edges(n, edges, Vec::new())
    }

    /// Like [`from_edges`](Self::from_edges) with explicit node weights.
    pub fn from_weighted_edges(
        n: NodeId,
        edges: &[(NodeId, NodeId, EdgeWeight)],
        node_weights: Vec<NodeWeight>,
    ) -> Self {
        let mut degrees = vec![0 as EdgeId; n + 1];
        for &(u, v, _) in edges {
            debug_assert_ne!(u, v, "self loops are not supported");
            degrees[u + 1] += 1;
            degrees[v + 1] += 1;
        }
        for u in 0..n {
            degrees[u + 1] += degrees[u];
        }
        let offsets = degrees;

        let m = offsets[n];
        let mut targets = vec![0 as NodeId; m];
        let mut edge_weights = vec![0 as EdgeWeight; m];
        let mut cursor = offsets.clone();
        for &(u, v, w) in edges {
            targets[cursor[u]] = v;
            edge_weights[cursor[u]] = w;
            cursor[u] += 1;
            targets[cursor[v]] = u;
            edge_weights[cursor[v]] = w;
            cursor[v] += 1;
        }

        // Sort each adjacency row so gap coding applies directly.
        for u in 0..n {
            let range = offsets[u]..offsets[u + 1];
            let mut row: Vec<(NodeId, EdgeWeight)> = targets[range.clone()]
                .iter()
                .copied()
                .zip(edge_weights[range.clone()].iter().copied())
                .collect();
            row.sort_unstable_by_key(|&(v, _)| v);
            for (i, (v, w)) in row.into_iter().enumerate() {
                targets[offsets[u] + i] = v;
                edge_weights[offsets[u] + i] = w;
            }
        }

        Self::new(offsets, targets, node_weights, edge_weights, false)
    }

    /// Declares that the node order is already sorted by degree bucket with
    /// isolated nodes last, and builds the bucket histogram.
    pub fn assume_bucket_sorted(self) -> Self {
        debug_assert!({
            let key = |u: NodeId| {
                let b = degree_bucket(self.degree(u));
                if b == 0 {
                    usize::MAX
                } else {
                    b
                }
            };
            (1..self.n).all(|u| key(u - 1) <= key(u))
        });
        Self::new(self.offsets, self.targets, self.node_weights, self.edge_weights, true)
    }

    /// Current number of nodes (reflects isolated-node trimming).
    pub fn n(&self) -> NodeId {
        self.n
    }

    /// Number of directed edges; the undirected edge count is `m() / 2`.
    pub fn m(&self) -> EdgeId {
        self.targets.len()
    }

    pub fn degree(&self, u: NodeId) -> NodeId {
        self.offsets[u + 1] - self.offsets[u]
    }

    pub fn max_degree(&self) -> NodeId {
        self.max_degree
    }

    pub fn first_edge(&self, u: NodeId) -> EdgeId {
        self.offsets[u]
    }

    /// Iterates `(edge_id, target)` pairs of `u`'s adjacency row.
    pub fn neighbors(&self, u: NodeId) -> impl Iterator<Item = (EdgeId, NodeId)> + '_ {
        let range = self.offsets[u]..self.offsets[u + 1];
        range.clone().zip(self.targets[range].iter().copied())
    }

    pub fn node_weight(&self, u: NodeId) -> NodeWeight {
        if self.node_weights.is_empty() {
            1
        } else {
            self.node_weights[u]
        }
    }

    pub fn edge_weight(&self, e: EdgeId) -> EdgeWeight {
        if self.edge_weights.is_empty() {
            1
        } else {
            self.edge_weights[e]
        }
    }

    pub fn has_node_weights(&self) -> bool {
        !self.node_weights.is_empty()
    }

    pub fn has_edge_weights(&self) -> bool {
        !self.edge_weights.is_empty()
    }

    pub fn total_node_weight(&self) -> NodeWeight {
        self.total_node_weight
    }

    pub fn max_node_weight(&self) -> NodeWeight {
        self.max_node_weight
    }

    pub fn total_edge_weight(&self) -> EdgeWeight {
        self.total_edge_weight
    }

    pub fn sorted(&self) -> bool {
        self.sorted
    }

    pub fn buckets(&self) -> &DegreeBuckets {
        &self.buckets
    }

    pub fn raw_offsets(&self) -> &[EdgeId] {
        &self.offsets
    }

    pub fn raw_targets(&self) -> &[NodeId] {
        &self.targets
    }

    /// Number of trailing nodes without any incident edge.
    pub fn count_isolated_nodes(&self) -> NodeId {
        (0..self.n).rev().take_while(|&u| self.degree(u) == 0).count()
    }

    /// Shrinks the node table by exactly `count` trailing isolated nodes.
    /// Requires bucket-sorted node order.
    pub fn remove_isolated_nodes(&mut self, count: NodeId) {
        if count == 0 {
            return;
        }
        debug_assert!(self.sorted);
        debug_assert!((self.n - count..self.n).all(|u| self.degree(u) == 0));

        self.n -= count;
        self.buckets.remove_isolated(count);
        self.update_total_node_weight();
    }

    /// Exact inverse of [`remove_isolated_nodes`](Self::remove_isolated_nodes).
    pub fn integrate_isolated_nodes(&mut self) {
        debug_assert!(self.sorted);

        let count = self.full_n - self.n;
        self.n = self.full_n;
        self.buckets.integrate_isolated(count);
        self.update_total_node_weight();
    }

    fn update_total_node_weight(&mut self) {
        if self.node_weights.is_empty() {
            self.total_node_weight = self.n as NodeWeight;
            self.max_node_weight = 1;
        } else {
            let weights = &self.node_weights[..self.n];
            self.total_node_weight = weights.par_iter().sum();
            self.max_node_weight = weights.par_iter().copied().max().unwrap_or(1);
        }
    }
}

/// Rearranges the nodes of `graph` so they are sorted by degree bucket with
/// isolated nodes last. Returns the rearranged graph and the old-to-new id
/// permutation.
pub fn rearrange_by_degree_buckets(graph: &CsrGraph) -> (CsrGraph, Vec<NodeId>) {
    let n = graph.n();

    let mut counts = vec![0 as NodeId; NUMBER_OF_DEGREE_BUCKETS + 1];
    for u in 0..n {
        counts[bucket_slot(degree_bucket(graph.degree(u))) + 1] += 1;
    }
    for slot in 0..NUMBER_OF_DEGREE_BUCKETS {
        counts[slot + 1] += counts[slot];
    }

    let mut old_to_new = vec![0 as NodeId; n];
    let mut cursor = counts;
    for u in 0..n {
        let slot = bucket_slot(degree_bucket(graph.degree(u)));
        old_to_new[u] = cursor[slot];
        cursor[slot] += 1;
    }

    let mut new_to_old = vec![0 as NodeId; n];
    for (old, &new) in old_to_new.iter().enumerate() {
        new_to_old[new] = old;
    }

    let mut offsets = vec![0 as EdgeId; n + 1];
    for new in 0..n {
        offsets[new + 1] = offsets[new] + graph.degree(new_to_old[new]);
    }

    let mut targets = vec![0 as NodeId; graph.m()];
    let mut edge_weights = if graph.has_edge_weights() {
        vec![0 as EdgeWeight; graph.m()]
    } else {
        Vec::new()
    };
    for new in 0..n {
        let old = new_to_old[new];
        let mut row: Vec<(NodeId, EdgeWeight)> = graph
            .neighbors(old)
            .map(|(e, v)| (old_to_new[v], graph.edge_weight(e)))
            .collect();
        row.sort_unstable_by_key(|&(v, _)| v);
        for (i, (v, w)) in row.into_iter().enumerate() {
            targets[offsets[new] + i] = v;
            if !edge_weights.is_empty() {
                edge_weights[offsets[new] + i] = w;
            }
        }
    }

    let node_weights = if graph.has_node_weights() {
        new_to_old.iter().map(|&old| graph.node_weight(old)).collect()
    } else {
        Vec::new()
    };

    (CsrGraph::new(offsets, targets, node_weights, edge_weights, true), old_to_new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_graph(n: NodeId) -> CsrGraph {
        let edges: Vec<(NodeId, NodeId, EdgeWeight)> =
            (0..n - 1).map(|u| (u, u + 1, 1)).collect();
        CsrGraph::from_edges(n, &edges)
    }

    #[test]
    fn test_degree_bucket_bins() {
        assert_eq!(degree_bucket(0), 0);
        assert_eq!(degree_bucket(1), 1);
        assert_eq!(degree_bucket(2), 2);
        assert_eq!(degree_bucket(3), 2);
        assert_eq!(degree_bucket(4), 3);
        assert_eq!(degree_bucket(7), 3);
        assert_eq!(degree_bucket(8), 4);
    }

    #[test]
    fn test_from_edges_builds_symmetric_adjacency() {
        // Arrange
        let graph = path_graph(3);

        // Assert
        assert_eq!(graph.n(), 3);
        assert_eq!(graph.m(), 4);
        assert_eq!(graph.degree(0), 1);
        assert_eq!(graph.degree(1), 2);
        let neighbors: Vec<NodeId> = graph.neighbors(1).map(|(_, v)| v).collect();
        assert_eq!(neighbors, vec![0, 2]);
    }

    #[test]
    fn test_degree_sum_is_twice_edge_count() {
        // Arrange
        let graph = CsrGraph::from_edges(4, &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 0, 1)]);

        // Act
        let degree_sum: NodeId = (0..graph.n()).map(|u| graph.degree(u)).sum();

        // Assert
        assert_eq!(degree_sum, graph.m());
        assert_eq!(graph.m(), 8);
    }

    #[test]
    fn test_unit_weights_by_default() {
        // Arrange
        let graph = path_graph(4);

        // Assert
        assert_eq!(graph.node_weight(2), 1);
        assert_eq!(graph.edge_weight(0), 1);
        assert_eq!(graph.total_node_weight(), 4);
    }

    #[test]
    fn test_rearrange_sorts_by_bucket_with_isolated_last() {
        // Arrange: node 0 isolated, node 1 degree 1, node 2 degree 3
        let graph = CsrGraph::from_edges(
            5,
            &[(2, 1, 1), (2, 3, 1), (2, 4, 1), (3, 4, 1)],
        );
        assert_eq!(graph.degree(0), 0);

        // Act
        let (sorted, old_to_new) = rearrange_by_degree_buckets(&graph);

        // Assert
        assert!(sorted.sorted());
        assert_eq!(old_to_new[0], sorted.n() - 1);
        let buckets: Vec<usize> =
            (0..4).map(|u| degree_bucket(sorted.degree(u))).collect();
        assert!(buckets.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(sorted.degree(sorted.n() - 1), 0);
    }

    #[test]
    fn test_remove_integrate_isolated_nodes_is_identity() {
        // Arrange
        let graph = CsrGraph::from_weighted_edges(
            5,
            &[(0, 1, 2), (1, 2, 3)],
            vec![1, 2, 3, 4, 5],
        );
        let (mut sorted, _) = rearrange_by_degree_buckets(&graph);
        let before_n = sorted.n();
        let before_weight = sorted.total_node_weight();
        let before_buckets = sorted.buckets().clone();
        let isolated = sorted.count_isolated_nodes();
        assert_eq!(isolated, 2);

        // Act
        sorted.remove_isolated_nodes(isolated);

        // Assert
        assert_eq!(sorted.n(), before_n - isolated);
        assert!(sorted.total_node_weight() < before_weight);

        // Act
        sorted.integrate_isolated_nodes();

        // Assert
        assert_eq!(sorted.n(), before_n);
        assert_eq!(sorted.total_node_weight(), before_weight);
        assert_eq!(*sorted.buckets(), before_buckets);
    }
}
