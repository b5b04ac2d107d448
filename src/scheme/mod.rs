//! Partitioning orchestration.
//!
//! Drives the multilevel schedule: coarsen the input graph, partition the
//! coarsest level, then uncoarsen while running the refinement ladder at
//! every level. Three schedules exist: `KWay` partitions the coarsest graph
//! directly into k blocks; `Deep` carries a growing block count through the
//! hierarchy, bisecting blocks as the graph becomes fine enough to afford
//! them; `Deeper` duplicates the deep schedule across seed groups and keeps
//! the best result by cut.

use std::fmt;

use log::{debug, info};
use rayon::prelude::*;

use crate::coarsening::Coarsener;
use crate::context::{Context, PartitionContext, PartitioningMode};
use crate::graph::Graph;
use crate::initial;
use crate::metrics;
use crate::partition::PartitionedGraph;
use crate::refinement::{create_refiner, GreedyBalancer, Refiner};
use crate::{BlockId, NodeId, Partition};

/// Common errors thrown by the partitioner.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Input sets don't have matching lengths.
    InputLenMismatch { expected: usize, actual: usize },

    /// The requested block count cannot be produced.
    InvalidBlockCount { k: BlockId },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InputLenMismatch { expected, actual } => write!(
                f,
                "input sets don't have the same length (expected {expected} items, got {actual})",
            ),
            Error::InvalidBlockCount { k } => write!(f, "cannot partition into {k} blocks"),
        }
    }
}

impl std::error::Error for Error {}

fn refine_level(
    refiners: &mut [Box<dyn Refiner>],
    balancer: &mut GreedyBalancer,
    graph: &Graph,
    p_graph: &mut PartitionedGraph,
    p_ctx: &PartitionContext,
) {
    for refiner in refiners.iter_mut() {
        refiner.initialize(graph);
        refiner.refine(graph, p_graph, p_ctx);
        debug_assert!(p_graph.validate(graph));
    }
    if !p_graph.is_feasible(p_ctx) {
        balancer.initialize(graph);
        balancer.refine(graph, p_graph, p_ctx);
    }
}

fn coarsen_to_limit(coarsener: &mut Coarsener<'_>, limit: NodeId) {
    loop {
        let prev = coarsener.coarsest().n();
        if prev <= limit {
            break;
        }
        let now = coarsener.coarsen_once().n();
        if now == prev {
            break;
        }
    }
}

fn kway_partition(graph: &Graph, ctx: &Context) -> PartitionedGraph {
    let k = ctx.partition.k;
    let p_ctx = PartitionContext {
        k,
        epsilon: ctx.partition.epsilon,
        total_node_weight: graph.total_node_weight(),
    };

    let mut coarsener = Coarsener::new(graph, ctx);
    let limit = k * ctx.initial_partitioning.coarsest_limit_per_block;
    coarsen_to_limit(&mut coarsener, limit.max(k));
    info!(
        "coarsened {} -> {} nodes over {} levels",
        graph.n(),
        coarsener.coarsest().n(),
        coarsener.level()
    );

    let blocks = initial::initial_partition(coarsener.coarsest(), ctx, k, ctx.seed);
    let mut p_graph = PartitionedGraph::new(coarsener.coarsest(), k, blocks);
    debug!("initial partition: cut {}", p_graph.edge_cut(coarsener.coarsest()));

    let mut refiners: Vec<Box<dyn Refiner>> = ctx
        .refinement
        .algorithms
        .iter()
        .map(|&algorithm| create_refiner(ctx, algorithm))
        .collect();
    let mut balancer = GreedyBalancer::new(ctx.refinement.balancer.clone());

    refine_level(&mut refiners, &mut balancer, coarsener.coarsest(), &mut p_graph, &p_ctx);
    while coarsener.level() > 0 {
        p_graph = coarsener.uncoarsen_once(p_graph);
        refine_level(&mut refiners, &mut balancer, coarsener.coarsest(), &mut p_graph, &p_ctx);
    }

    p_graph
}

/// Splits every block that still represents more than one final block by
/// bisecting its induced subgraph. Returns the updated per-block targets.
fn split_blocks(
    graph: &Graph,
    p_graph: &mut PartitionedGraph,
    target_ks: &[BlockId],
    ctx: &Context,
) -> Vec<BlockId> {
    let partition = p_graph.copy_partition();

    // New ids: block b becomes base[b] (and base[b] + k0's worth on a split).
    let mut new_targets = Vec::new();
    let mut base = vec![0 as BlockId; target_ks.len()];
    for (b, &k_b) in target_ks.iter().enumerate() {
        base[b] = new_targets.len();
        if k_b > 1 {
            new_targets.push(k_b.div_ceil(2));
            new_targets.push(k_b / 2);
        } else {
            new_targets.push(1);
        }
    }

    let mut new_partition = vec![0 as BlockId; graph.n()];
    for (b, &k_b) in target_ks.iter().enumerate() {
        if k_b <= 1 {
            for u in 0..graph.n() {
                if partition[u] == b {
                    new_partition[u] = base[b];
                }
            }
            continue;
        }

        let (sub, to_orig) = initial::extract_block_subgraph(graph, &partition, b);
        let sub_graph = Graph::Csr(sub);
        let halves = initial::initial_partition(
            &sub_graph,
            ctx,
            2,
            ctx.seed ^ (b as u64).wrapping_mul(0x9e37_79b9),
        );
        for (i, &u) in to_orig.iter().enumerate() {
            new_partition[u] = base[b] + halves[i];
        }
    }

    *p_graph = PartitionedGraph::new(graph, new_targets.len(), new_partition);
    new_targets
}

fn deep_partition(graph: &Graph, ctx: &Context) -> PartitionedGraph {
    let k = ctx.partition.k;
    let limit_per_block = ctx.initial_partitioning.coarsest_limit_per_block;

    let mut coarsener = Coarsener::new(graph, ctx);
    coarsen_to_limit(&mut coarsener, (2 * limit_per_block).max(2));

    // Bipartition the coarsest graph, then double the block count on the way
    // up whenever the level is fine enough to host the finer partition.
    let mut target_ks = vec![k];
    let coarsest = coarsener.coarsest();
    let mut p_graph = PartitionedGraph::new(coarsest, 1, vec![0; coarsest.n()]);

    let mut balancer = GreedyBalancer::new(ctx.refinement.balancer.clone());
    let mut refiners: Vec<Box<dyn Refiner>> = ctx
        .refinement
        .algorithms
        .iter()
        .map(|&algorithm| create_refiner(ctx, algorithm))
        .collect();

    loop {
        let level_graph = coarsener.coarsest();
        let n = level_graph.n();

        // Split while this level can afford more blocks; the input level
        // always completes the split to k.
        while target_ks.iter().any(|&k_b| k_b > 1)
            && (coarsener.level() == 0 || n >= 2 * p_graph.k() * limit_per_block)
        {
            target_ks = split_blocks(level_graph, &mut p_graph, &target_ks, ctx);
            debug!(
                "deep split at level {}: {} blocks on {} nodes",
                coarsener.level(),
                p_graph.k(),
                n
            );
        }

        if p_graph.k() > 1 {
            let p_ctx = PartitionContext {
                k: p_graph.k(),
                epsilon: ctx.partition.epsilon,
                total_node_weight: level_graph.total_node_weight(),
            };
            refine_level(&mut refiners, &mut balancer, level_graph, &mut p_graph, &p_ctx);
        }

        if coarsener.level() == 0 {
            break;
        }
        p_graph = coarsener.uncoarsen_once(p_graph);
    }

    debug_assert_eq!(p_graph.k(), k);
    p_graph
}

fn deeper_partition(graph: &Graph, ctx: &Context) -> PartitionedGraph {
    let groups = ctx.parallel.num_groups.max(1);
    let p_ctx = PartitionContext {
        k: ctx.partition.k,
        epsilon: ctx.partition.epsilon,
        total_node_weight: graph.total_node_weight(),
    };

    // Every group partitions its own copy of the schedule with a distinct
    // seed; the best result by (feasibility, cut) survives.
    let results: Vec<PartitionedGraph> = (0..groups)
        .into_par_iter()
        .map(|group| {
            let mut group_ctx = ctx.clone();
            group_ctx.seed = ctx.seed ^ (group as u64).wrapping_mul(0x517c_c1b7_2722_0a95);
            deep_partition(graph, &group_ctx)
        })
        .collect();

    results
        .into_iter()
        .min_by_key(|p| (!p.is_feasible(&p_ctx), p.edge_cut(graph)))
        .expect("at least one group ran")
}

/// Partitions `graph` according to `ctx` and returns the partition state.
pub fn partition_graph(graph: &Graph, ctx: &Context) -> Result<PartitionedGraph, Error> {
    if ctx.partition.k == 0 || ctx.partition.k > graph.n().max(1) {
        return Err(Error::InvalidBlockCount { k: ctx.partition.k });
    }

    let p_graph = match ctx.mode {
        PartitioningMode::KWay => kway_partition(graph, ctx),
        PartitioningMode::Deep => deep_partition(graph, ctx),
        PartitioningMode::Deeper => deeper_partition(graph, ctx),
    };

    debug_assert!(p_graph.validate(graph));
    info!(
        "final partition: cut {}, imbalance {:.4}",
        p_graph.edge_cut(graph),
        metrics::imbalance(
            p_graph.k(),
            &p_graph.copy_partition(),
            (0..graph.n()).map(|u| graph.node_weight(u))
        )
    );
    Ok(p_graph)
}

/// Multilevel graph partitioner.
///
/// # Example
///
/// ```no_run
/// use parcut::context::Context;
/// use parcut::graph::{CsrGraph, Graph};
/// use parcut::{MultilevelPartitioner, Partition};
///
/// let graph = Graph::Csr(CsrGraph::from_edges(4, &[(0, 1, 1), (1, 2, 1), (2, 3, 1)]));
/// let mut partition = vec![0; graph.n()];
/// let mut ctx = Context::default();
/// ctx.partition.k = 2;
/// MultilevelPartitioner::new(ctx).partition(&mut partition, &graph).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct MultilevelPartitioner {
    pub ctx: Context,
}

impl MultilevelPartitioner {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

impl Partition<&Graph> for MultilevelPartitioner {
    type Metadata = ();
    type Error = Error;

    fn partition(
        &mut self,
        part_ids: &mut [usize],
        graph: &Graph,
    ) -> Result<Self::Metadata, Self::Error> {
        if part_ids.len() != graph.n() {
            return Err(Error::InputLenMismatch {
                expected: part_ids.len(),
                actual: graph.n(),
            });
        }

        let p_graph = partition_graph(graph, &self.ctx)?;
        p_graph.copy_partition_into(part_ids);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CsrGraph;

    fn ctx_with_k(k: BlockId) -> Context {
        let mut ctx = Context::default();
        ctx.partition.k = k;
        ctx.seed = 1;
        ctx
    }

    #[test]
    fn test_partition_is_total() {
        // Arrange
        let graph = Graph::Csr(CsrGraph::from_edges(
            6,
            &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 4, 1), (4, 5, 1)],
        ));

        // Act
        let p = partition_graph(&graph, &ctx_with_k(2)).expect("partitioning succeeds");

        // Assert
        assert!((0..graph.n()).all(|u| p.block(u) < 2));
        assert!(p.validate(&graph));
    }

    #[test]
    fn test_rejects_zero_blocks() {
        // Arrange
        let graph = Graph::Csr(CsrGraph::from_edges(3, &[(0, 1, 1), (1, 2, 1)]));

        // Act
        let result = partition_graph(&graph, &ctx_with_k(0));

        // Assert
        assert!(matches!(result, Err(Error::InvalidBlockCount { k: 0 })));
    }

    #[test]
    fn test_partition_trait_checks_lengths() {
        // Arrange
        let graph = Graph::Csr(CsrGraph::from_edges(3, &[(0, 1, 1), (1, 2, 1)]));
        let mut too_short = vec![0; 2];

        // Act
        let result = MultilevelPartitioner::new(ctx_with_k(2))
            .partition(&mut too_short, &graph);

        // Assert
        assert!(matches!(result, Err(Error::InputLenMismatch { .. })));
    }

    #[test]
    fn test_deep_mode_reaches_k() {
        // Arrange
        let mut edges = Vec::new();
        for r in 0..6usize {
            for c in 0..6usize {
                let u = r * 6 + c;
                if c + 1 < 6 {
                    edges.push((u, u + 1, 1));
                }
                if r + 1 < 6 {
                    edges.push((u, u + 6, 1));
                }
            }
        }
        let graph = Graph::Csr(CsrGraph::from_edges(36, &edges));
        let mut ctx = ctx_with_k(3);
        ctx.mode = PartitioningMode::Deep;

        // Act
        let p = partition_graph(&graph, &ctx).expect("partitioning succeeds");

        // Assert
        assert_eq!(p.k(), 3);
        for b in 0..3 {
            assert!((0..graph.n()).any(|u| p.block(u) == b), "block {b} is empty");
        }
    }

    #[test]
    fn test_deeper_mode_matches_or_beats_deep() {
        // Arrange
        let mut edges = Vec::new();
        for r in 0..6usize {
            for c in 0..6usize {
                let u = r * 6 + c;
                if c + 1 < 6 {
                    edges.push((u, u + 1, 1));
                }
                if r + 1 < 6 {
                    edges.push((u, u + 6, 1));
                }
            }
        }
        let graph = Graph::Csr(CsrGraph::from_edges(36, &edges));

        let mut deep_ctx = ctx_with_k(2);
        deep_ctx.mode = PartitioningMode::Deep;
        let mut deeper_ctx = ctx_with_k(2);
        deeper_ctx.mode = PartitioningMode::Deeper;

        // Act
        let deep = partition_graph(&graph, &deep_ctx).expect("deep succeeds");
        let deeper = partition_graph(&graph, &deeper_ctx).expect("deeper succeeds");

        // Assert
        assert!(deeper.edge_cut(&graph) <= deep.edge_cut(&graph));
    }
}
