//! Quality metrics of a partition: edge cut, block loads, imbalance and
//! feasibility.

use rayon::prelude::*;

use crate::context::PartitionContext;
use crate::graph::Graph;
use crate::{BlockId, BlockWeight, EdgeWeight, NodeWeight};

/// Total node weight per block of a partition. Out-of-range block ids are
/// ignored, so partially assigned partitions can be inspected too.
pub fn compute_parts_load(
    partition: &[BlockId],
    num_parts: usize,
    weights: impl IntoIterator<Item = NodeWeight>,
) -> Vec<BlockWeight> {
    let mut loads = vec![0 as BlockWeight; num_parts];

    for (&part, w) in partition.iter().zip(weights) {
        if part < num_parts {
            loads[part] += w;
        }
    }

    loads
}

/// Imbalance of a partition: the maximum relative deviation of any block
/// load above the ideal (average) load.
pub fn imbalance(
    num_parts: usize,
    partition: &[BlockId],
    weights: impl IntoIterator<Item = NodeWeight>,
) -> f64 {
    if num_parts == 0 {
        return 0.0;
    }

    let loads = compute_parts_load(partition, num_parts, weights);
    let total: BlockWeight = loads.iter().sum();

    let ideal = total as f64 / num_parts as f64;
    if ideal == 0.0 {
        return 0.0;
    }

    loads
        .into_iter()
        .map(|load| (load as f64 - ideal) / ideal)
        .fold(0.0f64, f64::max)
}

/// The edge cut of a partition: total weight of edges whose endpoints lie in
/// different blocks, each undirected edge counted once.
pub fn edge_cut(graph: &Graph, partition: &[BlockId]) -> EdgeWeight {
    debug_assert_eq!(graph.n(), partition.len());

    (0..graph.n())
        .into_par_iter()
        .map(|u| {
            let block_u = partition[u];
            graph
                .neighbors(u)
                .filter(|&(_, v)| partition[v] != block_u)
                .map(|(e, _)| graph.edge_weight(e))
                .sum::<EdgeWeight>()
        })
        .sum::<EdgeWeight>()
        / 2
}

/// Total weight by which overloaded blocks exceed their caps.
pub fn total_overload(block_weights: &[BlockWeight], p_ctx: &PartitionContext) -> BlockWeight {
    block_weights
        .iter()
        .enumerate()
        .map(|(b, &w)| (w - p_ctx.max_block_weight(b)).max(0))
        .sum()
}

/// Whether every block respects its weight cap.
pub fn is_feasible(block_weights: &[BlockWeight], p_ctx: &PartitionContext) -> bool {
    block_weights
        .iter()
        .enumerate()
        .all(|(b, &w)| w <= p_ctx.max_block_weight(b))
}
