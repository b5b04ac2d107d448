//! A graph together with its (mutable) partition state.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::context::PartitionContext;
use crate::graph::Graph;
use crate::metrics;
use crate::{BlockId, BlockWeight, EdgeWeight, NodeId};

/// Partition state for one graph: the block of every node plus the block
/// weights. Both are stored as relaxed atomics so refiners can move nodes
/// from parallel loops; every parallel phase writes disjoint node slots, and
/// each weight slot's final value is the sum of commutative per-move deltas.
#[derive(Debug)]
pub struct PartitionedGraph {
    block: Vec<AtomicUsize>,
    block_weights: Vec<AtomicI64>,
    k: BlockId,
}

impl PartitionedGraph {
    /// Wraps an existing block assignment, recomputing block weights.
    pub fn new(graph: &Graph, k: BlockId, block: Vec<BlockId>) -> Self {
        debug_assert_eq!(graph.n(), block.len());

        let mut weights = vec![0 as BlockWeight; k];
        for (u, &b) in block.iter().enumerate() {
            debug_assert!(b < k, "node {u} has out-of-range block {b}");
            weights[b] += graph.node_weight(u);
        }

        Self {
            block: block.into_iter().map(AtomicUsize::new).collect(),
            block_weights: weights.into_iter().map(AtomicI64::new).collect(),
            k,
        }
    }

    pub fn k(&self) -> BlockId {
        self.k
    }

    pub fn n(&self) -> NodeId {
        self.block.len()
    }

    pub fn block(&self, u: NodeId) -> BlockId {
        self.block[u].load(Ordering::Relaxed)
    }

    /// Snapshot of the block assignment.
    pub fn copy_partition(&self) -> Vec<BlockId> {
        self.block.iter().map(|b| b.load(Ordering::Relaxed)).collect()
    }

    /// Writes the assignment into a caller-provided slice.
    pub fn copy_partition_into(&self, out: &mut [BlockId]) {
        debug_assert_eq!(out.len(), self.block.len());
        out.par_iter_mut()
            .zip(self.block.par_iter())
            .for_each(|(slot, b)| *slot = b.load(Ordering::Relaxed));
    }

    /// Moves `u` to `to`, maintaining block weights.
    pub fn set_block(&self, graph: &Graph, u: NodeId, to: BlockId) {
        let from = self.block[u].swap(to, Ordering::Relaxed);
        if from != to {
            let w = graph.node_weight(u);
            self.block_weights[from].fetch_sub(w, Ordering::Relaxed);
            self.block_weights[to].fetch_add(w, Ordering::Relaxed);
        }
    }

    /// Reassigns `u` without touching block weights; the caller accumulates
    /// weight deltas and applies them in bulk.
    pub fn set_block_unchecked(&self, u: NodeId, to: BlockId) {
        self.block[u].store(to, Ordering::Relaxed);
    }

    pub fn block_weight(&self, b: BlockId) -> BlockWeight {
        self.block_weights[b].load(Ordering::Relaxed)
    }

    pub fn block_weights(&self) -> Vec<BlockWeight> {
        self.block_weights.iter().map(|w| w.load(Ordering::Relaxed)).collect()
    }

    pub fn set_block_weight(&self, b: BlockId, weight: BlockWeight) {
        self.block_weights[b].store(weight, Ordering::Relaxed);
    }

    pub fn add_block_weight(&self, b: BlockId, delta: BlockWeight) {
        self.block_weights[b].fetch_add(delta, Ordering::Relaxed);
    }

    /// Restores the assignment and weights from a snapshot.
    pub fn restore(&self, snapshot_blocks: &[BlockId], snapshot_weights: &[BlockWeight]) {
        debug_assert_eq!(snapshot_blocks.len(), self.block.len());
        self.block
            .par_iter()
            .zip(snapshot_blocks.par_iter())
            .for_each(|(slot, &b)| slot.store(b, Ordering::Relaxed));
        for (slot, &w) in self.block_weights.iter().zip(snapshot_weights) {
            slot.store(w, Ordering::Relaxed);
        }
    }

    pub fn edge_cut(&self, graph: &Graph) -> EdgeWeight {
        (0..graph.n())
            .into_par_iter()
            .map(|u| {
                let block_u = self.block(u);
                graph
                    .neighbors(u)
                    .filter(|&(_, v)| self.block(v) != block_u)
                    .map(|(e, _)| graph.edge_weight(e))
                    .sum::<EdgeWeight>()
            })
            .sum::<EdgeWeight>()
            / 2
    }

    pub fn is_feasible(&self, p_ctx: &PartitionContext) -> bool {
        metrics::is_feasible(&self.block_weights(), p_ctx)
    }

    /// Checks that the stored block weights match a fresh recomputation and
    /// that every node has a block in range.
    pub fn validate(&self, graph: &Graph) -> bool {
        if (0..self.n()).any(|u| self.block(u) >= self.k) {
            log::warn!("partition contains an out-of-range block id");
            return false;
        }

        let actual: Vec<BlockWeight> = (0..self.k)
            .into_par_iter()
            .map(|b| {
                (0..graph.n())
                    .filter(|&u| self.block(u) == b)
                    .map(|u| graph.node_weight(u))
                    .sum()
            })
            .collect();

        for b in 0..self.k {
            if actual[b] != self.block_weight(b) {
                log::warn!(
                    "block {b} weight drifted: stored {} but recomputed {}",
                    self.block_weight(b),
                    actual[b]
                );
                return false;
            }
        }
        true
    }
}

impl Clone for PartitionedGraph {
    fn clone(&self) -> Self {
        Self {
            block: self.copy_partition().into_iter().map(AtomicUsize::new).collect(),
            block_weights: self
                .block_weights()
                .into_iter()
                .map(AtomicI64::new)
                .collect(),
            k: self.k,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CsrGraph;

    fn small_graph() -> Graph {
        Graph::Csr(CsrGraph::from_weighted_edges(
            4,
            &[(0, 1, 1), (1, 2, 1), (2, 3, 1)],
            vec![2, 3, 4, 5],
        ))
    }

    #[test]
    fn test_block_weights_follow_assignment() {
        // Arrange
        let graph = small_graph();

        // Act
        let p = PartitionedGraph::new(&graph, 2, vec![0, 0, 1, 1]);

        // Assert
        assert_eq!(p.block_weight(0), 5);
        assert_eq!(p.block_weight(1), 9);
    }

    #[test]
    fn test_set_block_moves_weight() {
        // Arrange
        let graph = small_graph();
        let p = PartitionedGraph::new(&graph, 2, vec![0, 0, 1, 1]);

        // Act
        p.set_block(&graph, 1, 1);

        // Assert
        assert_eq!(p.block(1), 1);
        assert_eq!(p.block_weight(0), 2);
        assert_eq!(p.block_weight(1), 12);
        assert!(p.validate(&graph));
    }

    #[test]
    fn test_validate_catches_drift() {
        // Arrange
        let graph = small_graph();
        let p = PartitionedGraph::new(&graph, 2, vec![0, 0, 1, 1]);

        // Act: bypass weight maintenance
        p.set_block_unchecked(0, 1);

        // Assert
        assert!(!p.validate(&graph));
    }

    #[test]
    fn test_restore_round_trips() {
        // Arrange
        let graph = small_graph();
        let p = PartitionedGraph::new(&graph, 2, vec![0, 0, 1, 1]);
        let blocks = p.copy_partition();
        let weights = p.block_weights();

        // Act
        p.set_block(&graph, 0, 1);
        p.set_block(&graph, 3, 0);
        p.restore(&blocks, &weights);

        // Assert
        assert_eq!(p.copy_partition(), blocks);
        assert_eq!(p.block_weights(), weights);
    }
}
