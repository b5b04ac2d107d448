//! Configuration for the partitioning pipeline.
//!
//! Every tunable of the engine lives here; algorithms receive a borrowed
//! context and never read configuration from global state.

use crate::{BlockId, BlockWeight, NodeId, NodeWeight};

/// Which multilevel schedule the orchestrator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitioningMode {
    /// Direct k-way partitioning of the coarsest graph.
    KWay,
    /// Recursive bisection interleaved with the hierarchy.
    Deep,
    /// Deep partitioning with duplicated schedules; the best result by cut wins.
    Deeper,
}

/// Refinement algorithms that can appear in the refinement ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementAlgorithm {
    LabelPropagation,
    Fm,
    Jet,
    Greedy,
}

#[derive(Debug, Clone)]
pub struct PartitionContext {
    /// Number of blocks.
    pub k: BlockId,
    /// Balance tolerance; block weights may not exceed `(1 + epsilon) * ceil(W / k)`.
    pub epsilon: f64,
    /// Total node weight of the input graph; set by the orchestrator.
    pub total_node_weight: NodeWeight,
}

impl PartitionContext {
    /// Hard upper bound for the weight of `block`.
    pub fn max_block_weight(&self, _block: BlockId) -> BlockWeight {
        let avg = (self.total_node_weight + self.k as i64 - 1) / self.k as i64;
        ((1.0 + self.epsilon) * avg as f64).floor() as BlockWeight
    }

    /// Average block weight, rounded up.
    pub fn perfectly_balanced_block_weight(&self) -> BlockWeight {
        (self.total_node_weight + self.k as i64 - 1) / self.k as i64
    }
}

impl Default for PartitionContext {
    fn default() -> Self {
        Self { k: 2, epsilon: 0.03, total_node_weight: 0 }
    }
}

#[derive(Debug, Clone)]
pub struct CoarseningContext {
    /// Stop coarsening once the coarsest graph has at most `contraction_limit * k` nodes.
    pub contraction_limit: NodeId,
    /// Reject a contraction unless it shrinks the node count below this ratio.
    pub convergence_threshold: f64,
    /// Upper bound on hierarchy levels built with local clustering.
    pub max_local_clustering_levels: usize,
    /// Upper bound on the total number of hierarchy levels.
    pub max_global_clustering_levels: usize,
    /// Scales the maximum cluster weight derived from the partition context.
    pub cluster_weight_multiplier: f64,
    /// Rounds of label propagation per clustering invocation.
    pub lp_num_iterations: usize,
}

impl Default for CoarseningContext {
    fn default() -> Self {
        Self {
            contraction_limit: 2000,
            convergence_threshold: 0.95,
            max_local_clustering_levels: 2,
            max_global_clustering_levels: 48,
            cluster_weight_multiplier: 1.0,
            lp_num_iterations: 5,
        }
    }
}

impl CoarseningContext {
    /// Maximum cluster weight for the next contraction, derived from the
    /// partition shape: clusters may not grow beyond the weight that would
    /// make a balanced block impossible on the coarsest graph.
    pub fn max_cluster_weight(
        &self,
        n: NodeId,
        total_node_weight: NodeWeight,
        p_ctx: &PartitionContext,
    ) -> NodeWeight {
        let divisor = (n / self.contraction_limit.max(1)).clamp(2, p_ctx.k.max(2)) as f64;
        let weight = self.cluster_weight_multiplier * p_ctx.epsilon * total_node_weight as f64
            / divisor;
        (weight.floor() as NodeWeight).max(1)
    }
}

#[derive(Debug, Clone)]
pub struct InitialPartitioningContext {
    /// Bipartition attempts per heuristic; the best result by (feasibility, cut) wins.
    pub num_repetitions: usize,
    /// Nodes of the coarsest graph per block before bisection starts.
    pub coarsest_limit_per_block: NodeId,
}

impl Default for InitialPartitioningContext {
    fn default() -> Self {
        Self { num_repetitions: 4, coarsest_limit_per_block: 20 }
    }
}

#[derive(Debug, Clone)]
pub struct LabelPropagationContext {
    /// Passes over the node set; 0 means unbounded.
    pub num_iterations: usize,
    /// Nodes with a larger degree are skipped to preserve parallel scaling.
    pub large_degree_threshold: NodeId,
    /// At most this many neighbors are rated per node.
    pub max_num_neighbors: usize,
}

impl Default for LabelPropagationContext {
    fn default() -> Self {
        Self {
            num_iterations: 5,
            large_degree_threshold: 1_000_000,
            max_num_neighbors: 300_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FmContext {
    /// Refinement rounds; each round processes every seed once.
    pub num_iterations: usize,
    /// Upper bound on the node count of one localized search graph.
    pub max_search_graph_size: NodeId,
    /// Seeds processed by one task.
    pub seeds_per_task: usize,
}

impl Default for FmContext {
    fn default() -> Self {
        Self { num_iterations: 3, max_search_graph_size: 64, seeds_per_task: 16 }
    }
}

#[derive(Debug, Clone)]
pub struct JetContext {
    /// Iteration cap; 0 means unbounded.
    pub num_iterations: usize,
    /// Consecutive fruitless iterations before giving up; 0 means unbounded.
    pub num_fruitless_iterations: usize,
    /// An iteration is fruitful if it improves the best cut by more than
    /// `(1 - fruitless_threshold) * best_cut`.
    pub fruitless_threshold: f64,
    /// Fraction of internal degree a move may sacrifice on coarse levels.
    pub coarse_penalty_factor: f64,
    /// Fraction of internal degree a move may sacrifice on fine levels.
    pub fine_penalty_factor: f64,
}

impl Default for JetContext {
    fn default() -> Self {
        Self {
            num_iterations: 12,
            num_fruitless_iterations: 12,
            fruitless_threshold: 0.999,
            coarse_penalty_factor: 0.75,
            fine_penalty_factor: 0.25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BalancerContext {
    /// Upper bound on the node weight of one move set.
    pub max_move_set_weight: NodeWeight,
    /// Rounds of set construction and application before giving up.
    pub max_num_rounds: usize,
}

impl Default for BalancerContext {
    fn default() -> Self {
        Self { max_move_set_weight: 64, max_num_rounds: 16 }
    }
}

#[derive(Debug, Clone)]
pub struct RefinementContext {
    /// The refinement ladder, applied in order at every hierarchy level.
    pub algorithms: Vec<RefinementAlgorithm>,
    pub lp: LabelPropagationContext,
    pub fm: FmContext,
    pub jet: JetContext,
    pub balancer: BalancerContext,
}

impl Default for RefinementContext {
    fn default() -> Self {
        Self {
            algorithms: vec![
                RefinementAlgorithm::LabelPropagation,
                RefinementAlgorithm::Fm,
                RefinementAlgorithm::Jet,
            ],
            lp: LabelPropagationContext::default(),
            fm: FmContext::default(),
            jet: JetContext::default(),
            balancer: BalancerContext::default(),
        }
    }
}

/// How node ids are arranged before partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOrdering {
    /// Keep the input order.
    Natural,
    /// Rearrange nodes by degree bucket, isolated nodes last.
    DegreeBuckets,
    /// Treat the input as already sorted by degree bucket.
    ImplicitDegreeBuckets,
}

#[derive(Debug, Clone)]
pub struct CompressionContext {
    /// Store the graph with gap-coded adjacency instead of plain CSR.
    pub enabled: bool,
    /// Encode runs of consecutive neighbors as intervals.
    pub interval_encoding: bool,
    /// Split the neighbor lists of very high degree nodes into fixed-size parts.
    pub high_degree_encoding: bool,
    /// Chunk size of the parallel compressor, in nodes.
    pub parallel_chunk_size: NodeId,
}

impl Default for CompressionContext {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_encoding: true,
            high_degree_encoding: true,
            parallel_chunk_size: 2048,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParallelContext {
    /// Worker threads of the shared-memory engine.
    pub num_threads: usize,
    /// Duplicated schedules in `Deeper` mode.
    pub num_groups: usize,
}

impl Default for ParallelContext {
    fn default() -> Self {
        Self { num_threads: 0, num_groups: 4 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DebugContext {
    /// Dump one sidecar file per hierarchy level with the clustering.
    pub save_clustering_hierarchy: bool,
    /// Prefix for dump files.
    pub dump_prefix: String,
}

/// Top-level configuration of one partitioner run.
#[derive(Debug, Clone)]
pub struct Context {
    pub mode: PartitioningMode,
    pub seed: u64,
    pub node_ordering: NodeOrdering,
    pub partition: PartitionContext,
    pub coarsening: CoarseningContext,
    pub initial_partitioning: InitialPartitioningContext,
    pub refinement: RefinementContext,
    pub compression: CompressionContext,
    pub parallel: ParallelContext,
    pub debug: DebugContext,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            mode: PartitioningMode::KWay,
            seed: 0,
            node_ordering: NodeOrdering::Natural,
            partition: PartitionContext::default(),
            coarsening: CoarseningContext::default(),
            initial_partitioning: InitialPartitioningContext::default(),
            refinement: RefinementContext::default(),
            compression: CompressionContext::default(),
            parallel: ParallelContext::default(),
            debug: DebugContext::default(),
        }
    }
}
