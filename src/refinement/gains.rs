//! Gain caches: weighted connection strength of nodes to blocks.
//!
//! `conn(u, b)` is the total weight of edges from `u` into block `b`; the
//! gain of moving `u` from `f` to `t` is `conn(u, t) - conn(u, f)`. The dense
//! cache keeps all `n * k` cells eagerly with O(deg) incremental updates; the
//! on-the-fly cache recomputes rows per query and trades memory for time; the
//! delta overlay makes speculative moves visible to one search without
//! touching the shared cache.

use std::sync::atomic::{AtomicI64, Ordering};

use rustc_hash::FxHashMap;

use rayon::prelude::*;

use crate::datastructures::RatingMap;
use crate::graph::Graph;
use crate::partition::PartitionedGraph;
use crate::{BlockId, EdgeWeight, NodeId};

/// Common surface of the dense and on-the-fly variants.
pub trait GainCache {
    fn initialize(&mut self, graph: &Graph, p_graph: &PartitionedGraph);

    fn conn(&self, graph: &Graph, p_graph: &PartitionedGraph, u: NodeId, b: BlockId)
        -> EdgeWeight;

    fn gain(
        &self,
        graph: &Graph,
        p_graph: &PartitionedGraph,
        u: NodeId,
        from: BlockId,
        to: BlockId,
    ) -> EdgeWeight {
        self.conn(graph, p_graph, u, to) - self.conn(graph, p_graph, u, from)
    }

    /// Account for the move `u: from -> to`. Called once per committed move,
    /// possibly from parallel contexts.
    fn notify_move(&self, graph: &Graph, u: NodeId, from: BlockId, to: BlockId);

    fn is_border_node(&self, graph: &Graph, p_graph: &PartitionedGraph, u: NodeId) -> bool;

    /// Rebuilds every row from the adjacency and reports mismatches.
    fn validate(&self, graph: &Graph, p_graph: &PartitionedGraph) -> bool;
}

/// Flat `n * k` cache of connection weights, updated with relaxed atomics.
/// Relaxed suffices because each cell's final value is the sum of per-edge
/// contributions regardless of order.
pub struct DenseGainCache {
    k: BlockId,
    n: NodeId,
    cache: Vec<AtomicI64>,
    weighted_degrees: Vec<EdgeWeight>,
}

impl DenseGainCache {
    pub fn new(k: BlockId, n: NodeId) -> Self {
        Self {
            k,
            n,
            cache: (0..n * k).map(|_| AtomicI64::new(0)).collect(),
            weighted_degrees: vec![0; n],
        }
    }

    fn index(&self, u: NodeId, b: BlockId) -> usize {
        u * self.k + b
    }

    pub fn weighted_degree(&self, u: NodeId) -> EdgeWeight {
        self.weighted_degrees[u]
    }

    fn cell(&self, u: NodeId, b: BlockId) -> EdgeWeight {
        self.cache[self.index(u, b)].load(Ordering::Relaxed)
    }
}

impl GainCache for DenseGainCache {
    fn initialize(&mut self, graph: &Graph, p_graph: &PartitionedGraph) {
        debug_assert!(self.n * self.k >= graph.n() * p_graph.k(), "gain cache is too small");

        self.cache.par_iter().for_each(|cell| cell.store(0, Ordering::Relaxed));

        let weighted_degrees: Vec<EdgeWeight> = (0..graph.n())
            .into_par_iter()
            .map(|u| {
                let mut weighted_degree = 0;
                for (e, v) in graph.neighbors(u) {
                    let w = graph.edge_weight(e);
                    weighted_degree += w;
                    self.cache[u * self.k + p_graph.block(v)].fetch_add(w, Ordering::Relaxed);
                }
                weighted_degree
            })
            .collect();
        self.weighted_degrees[..graph.n()].copy_from_slice(&weighted_degrees);
    }

    fn conn(
        &self,
        _graph: &Graph,
        _p_graph: &PartitionedGraph,
        u: NodeId,
        b: BlockId,
    ) -> EdgeWeight {
        self.cell(u, b)
    }

    fn notify_move(&self, graph: &Graph, u: NodeId, from: BlockId, to: BlockId) {
        for (e, v) in graph.neighbors(u) {
            let w = graph.edge_weight(e);
            self.cache[self.index(v, from)].fetch_sub(w, Ordering::Relaxed);
            self.cache[self.index(v, to)].fetch_add(w, Ordering::Relaxed);
        }
    }

    fn is_border_node(&self, _graph: &Graph, p_graph: &PartitionedGraph, u: NodeId) -> bool {
        self.weighted_degrees[u] != self.cell(u, p_graph.block(u))
    }

    fn validate(&self, graph: &Graph, p_graph: &PartitionedGraph) -> bool {
        (0..graph.n()).into_par_iter().all(|u| {
            let mut actual = vec![0 as EdgeWeight; self.k];
            let mut actual_weighted_degree = 0;
            for (e, v) in graph.neighbors(u) {
                let w = graph.edge_weight(e);
                actual[p_graph.block(v)] += w;
                actual_weighted_degree += w;
            }

            for b in 0..self.k {
                if actual[b] != self.cell(u, b) {
                    log::warn!(
                        "node {u}: cached connection to block {b} is {} but should be {}",
                        self.cell(u, b),
                        actual[b]
                    );
                    return false;
                }
            }
            if actual_weighted_degree != self.weighted_degrees[u] {
                log::warn!(
                    "node {u}: cached weighted degree is {} but should be {}",
                    self.weighted_degrees[u],
                    actual_weighted_degree
                );
                return false;
            }
            true
        })
    }
}

/// Pseudo-cache that recomputes connections from the adjacency on each query.
#[derive(Default)]
pub struct OnTheFlyGainCache;

impl OnTheFlyGainCache {
    pub fn new() -> Self {
        Self
    }
}

impl GainCache for OnTheFlyGainCache {
    fn initialize(&mut self, _graph: &Graph, _p_graph: &PartitionedGraph) {}

    fn conn(
        &self,
        graph: &Graph,
        p_graph: &PartitionedGraph,
        u: NodeId,
        b: BlockId,
    ) -> EdgeWeight {
        graph
            .neighbors(u)
            .filter(|&(_, v)| p_graph.block(v) == b)
            .map(|(e, _)| graph.edge_weight(e))
            .sum()
    }

    fn notify_move(&self, _graph: &Graph, _u: NodeId, _from: BlockId, _to: BlockId) {}

    fn is_border_node(&self, graph: &Graph, p_graph: &PartitionedGraph, u: NodeId) -> bool {
        let b = p_graph.block(u);
        graph.neighbors(u).any(|(_, v)| p_graph.block(v) != b)
    }

    fn validate(&self, _graph: &Graph, _p_graph: &PartitionedGraph) -> bool {
        true
    }
}

/// Overlay that records speculative connection deltas for one search.
pub struct DeltaGainCache<'c, C: GainCache> {
    base: &'c C,
    k: BlockId,
    delta: FxHashMap<usize, EdgeWeight>,
}

impl<'c, C: GainCache> DeltaGainCache<'c, C> {
    pub fn new(base: &'c C, k: BlockId) -> Self {
        Self { base, k, delta: FxHashMap::default() }
    }

    pub fn conn(
        &self,
        graph: &Graph,
        p_graph: &PartitionedGraph,
        u: NodeId,
        b: BlockId,
    ) -> EdgeWeight {
        self.base.conn(graph, p_graph, u, b)
            + self.delta.get(&(u * self.k + b)).copied().unwrap_or(0)
    }

    pub fn gain(
        &self,
        graph: &Graph,
        p_graph: &PartitionedGraph,
        u: NodeId,
        from: BlockId,
        to: BlockId,
    ) -> EdgeWeight {
        self.conn(graph, p_graph, u, to) - self.conn(graph, p_graph, u, from)
    }

    /// Records the speculative move `u: from -> to` in the overlay only.
    pub fn notify_move(&mut self, graph: &Graph, u: NodeId, from: BlockId, to: BlockId) {
        for (e, v) in graph.neighbors(u) {
            let w = graph.edge_weight(e);
            *self.delta.entry(v * self.k + from).or_insert(0) -= w;
            *self.delta.entry(v * self.k + to).or_insert(0) += w;
        }
    }

    pub fn clear(&mut self) {
        self.delta.clear();
    }
}

/// The strongest externally connected block of `u`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxGainer {
    pub block: BlockId,
    /// `conn(u, block) - conn(u, block(u))`.
    pub gain: EdgeWeight,
    pub int_degree: EdgeWeight,
    pub ext_degree: EdgeWeight,
}

/// Rates `u`'s neighborhood and returns the best foreign block, breaking ties
/// towards the smaller block id so parallel runs stay deterministic. Returns
/// `None` for nodes without foreign neighbors.
pub fn compute_max_gainer(
    graph: &Graph,
    p_graph: &PartitionedGraph,
    u: NodeId,
    rating: &mut RatingMap,
) -> Option<MaxGainer> {
    let b_u = p_graph.block(u);
    rating.clear();
    for (e, v) in graph.neighbors(u) {
        rating.add(p_graph.block(v), graph.edge_weight(e));
    }

    let int_degree = rating.get(b_u);
    let best = rating
        .entries()
        .filter(|&(b, _)| b != b_u)
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))?;

    Some(MaxGainer {
        block: best.0,
        gain: best.1 - int_degree,
        int_degree,
        ext_degree: best.1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CsrGraph;

    fn test_graph() -> Graph {
        // Star around node 0 with one heavy arm
        Graph::Csr(CsrGraph::from_edges(4, &[(0, 1, 2), (0, 2, 1), (0, 3, 4)]))
    }

    #[test]
    fn test_dense_cache_initial_connections() {
        // Arrange
        let graph = test_graph();
        let p = PartitionedGraph::new(&graph, 2, vec![0, 0, 0, 1]);
        let mut cache = DenseGainCache::new(2, graph.n());

        // Act
        cache.initialize(&graph, &p);

        // Assert
        assert_eq!(cache.conn(&graph, &p, 0, 0), 3);
        assert_eq!(cache.conn(&graph, &p, 0, 1), 4);
        assert_eq!(cache.gain(&graph, &p, 0, 0, 1), 1);
        assert!(cache.validate(&graph, &p));
    }

    #[test]
    fn test_dense_cache_tracks_moves() {
        // Arrange
        let graph = test_graph();
        let mut p = PartitionedGraph::new(&graph, 2, vec![0, 0, 0, 1]);
        let mut cache = DenseGainCache::new(2, graph.n());
        cache.initialize(&graph, &p);

        // Act: move node 1 into block 1
        p.set_block(&graph, 1, 1);
        cache.notify_move(&graph, 1, 0, 1);

        // Assert
        assert_eq!(cache.conn(&graph, &p, 0, 0), 1);
        assert_eq!(cache.conn(&graph, &p, 0, 1), 6);
        assert!(cache.validate(&graph, &p));
    }

    #[test]
    fn test_move_order_does_not_change_the_result() {
        // Arrange
        let graph = test_graph();
        let blocks = vec![0, 0, 0, 1];

        // Act: apply the same two moves in both orders
        let run = |first: NodeId, second: NodeId| {
            let mut p = PartitionedGraph::new(&graph, 2, blocks.clone());
            let mut cache = DenseGainCache::new(2, graph.n());
            cache.initialize(&graph, &p);
            p.set_block(&graph, first, 1);
            cache.notify_move(&graph, first, 0, 1);
            p.set_block(&graph, second, 1);
            cache.notify_move(&graph, second, 0, 1);
            (0..graph.n())
                .flat_map(|u| (0..2).map(move |b| (u, b)))
                .map(|(u, b)| cache.conn(&graph, &p, u, b))
                .collect::<Vec<_>>()
        };

        // Assert
        assert_eq!(run(1, 2), run(2, 1));
    }

    #[test]
    fn test_on_the_fly_matches_dense() {
        // Arrange
        let graph = test_graph();
        let p = PartitionedGraph::new(&graph, 2, vec![0, 1, 0, 1]);
        let mut dense = DenseGainCache::new(2, graph.n());
        dense.initialize(&graph, &p);
        let otf = OnTheFlyGainCache::new();

        // Assert
        for u in 0..graph.n() {
            for b in 0..2 {
                assert_eq!(dense.conn(&graph, &p, u, b), otf.conn(&graph, &p, u, b));
            }
        }
    }

    #[test]
    fn test_delta_overlay_leaves_base_untouched() {
        // Arrange
        let graph = test_graph();
        let p = PartitionedGraph::new(&graph, 2, vec![0, 0, 0, 1]);
        let mut dense = DenseGainCache::new(2, graph.n());
        dense.initialize(&graph, &p);

        // Act: speculative move of node 3 into block 0
        let mut delta = DeltaGainCache::new(&dense, 2);
        delta.notify_move(&graph, 3, 1, 0);

        // Assert: overlay sees the move, base does not
        assert_eq!(delta.conn(&graph, &p, 0, 1), 0);
        assert_eq!(delta.conn(&graph, &p, 0, 0), 7);
        assert_eq!(dense.conn(&graph, &p, 0, 1), 4);
        assert!(dense.validate(&graph, &p));
    }

    #[test]
    fn test_max_gainer_prefers_heaviest_foreign_block() {
        // Arrange
        let graph = test_graph();
        let p = PartitionedGraph::new(&graph, 3, vec![0, 1, 1, 2]);
        let mut rating = RatingMap::new();

        // Act
        let gainer = compute_max_gainer(&graph, &p, 0, &mut rating).expect("border node");

        // Assert: conn to block 1 is 3, to block 2 is 4
        assert_eq!(gainer.block, 2);
        assert_eq!(gainer.ext_degree, 4);
        assert_eq!(gainer.int_degree, 0);
        assert_eq!(gainer.gain, 4);
    }
}
