//! JET refinement, after "Jet: Multilevel Graph Partitioning on GPUs" by
//! Gilbert et al.
//!
//! Each iteration runs a fixed sequence of parallel phases: find a candidate
//! move per node, filter candidates by their projected gain under the
//! assumption that better-ranked neighbors move first, execute the surviving
//! moves with commutative block weight deltas, rebalance, and snapshot the
//! partition whenever it beats the best one seen. On exit the best snapshot
//! is restored.

use std::sync::atomic::{AtomicI64, Ordering};

use log::debug;
use rayon::prelude::*;

use super::{compute_max_gainer, GreedyBalancer, Refiner};
use crate::context::{Context, JetContext, PartitionContext};
use crate::datastructures::RatingMap;
use crate::graph::Graph;
use crate::partition::PartitionedGraph;
use crate::{BlockId, BlockWeight, EdgeWeight, NodeId};

/// Tracks the best partition seen across iterations, preferring feasible
/// snapshots and breaking feasibility ties by cut.
struct BestPartitionSnapshooter {
    blocks: Vec<BlockId>,
    weights: Vec<BlockWeight>,
    cut: EdgeWeight,
    feasible: bool,
}

impl BestPartitionSnapshooter {
    fn init(p_graph: &PartitionedGraph, graph: &Graph, p_ctx: &PartitionContext) -> Self {
        Self {
            blocks: p_graph.copy_partition(),
            weights: p_graph.block_weights(),
            cut: p_graph.edge_cut(graph),
            feasible: p_graph.is_feasible(p_ctx),
        }
    }

    /// Records the current partition if it beats the snapshot; returns the
    /// current cut either way.
    fn update(
        &mut self,
        p_graph: &PartitionedGraph,
        graph: &Graph,
        p_ctx: &PartitionContext,
    ) -> EdgeWeight {
        let cut = p_graph.edge_cut(graph);
        let feasible = p_graph.is_feasible(p_ctx);

        let better = (feasible && !self.feasible)
            || (feasible == self.feasible && cut < self.cut);
        if better {
            p_graph.copy_partition_into(&mut self.blocks);
            self.weights = p_graph.block_weights();
            self.cut = cut;
            self.feasible = feasible;
        }
        cut
    }

    fn rollback(&self, p_graph: &PartitionedGraph) {
        p_graph.restore(&self.blocks, &self.weights);
    }
}

pub struct JetRefiner {
    jet_ctx: JetContext,
    contraction_limit: NodeId,
    balancer: GreedyBalancer,
    penalty_factor: f64,
    gains_and_targets: Vec<(EdgeWeight, BlockId)>,
    locked: Vec<bool>,
    block_weight_deltas: Vec<AtomicI64>,
}

impl JetRefiner {
    pub fn new(ctx: &Context) -> Self {
        Self {
            jet_ctx: ctx.refinement.jet.clone(),
            contraction_limit: ctx.coarsening.contraction_limit,
            balancer: GreedyBalancer::new(ctx.refinement.balancer.clone()),
            penalty_factor: 0.0,
            gains_and_targets: Vec::new(),
            locked: Vec::new(),
            block_weight_deltas: Vec::new(),
        }
    }

    /// Phase 1: per node, the best candidate move. A node without a foreign
    /// block, or whose best move loses too much internal connectivity, keeps
    /// its block. Nodes moved in the previous iteration sit out one round to
    /// prevent oscillation.
    fn find_moves(&mut self, graph: &Graph, p_graph: &PartitionedGraph) {
        let penalty_factor = self.penalty_factor;
        let locked = &self.locked;
        self.gains_and_targets
            .par_iter_mut()
            .enumerate()
            .for_each_init(RatingMap::new, |rating, (u, slot)| {
                let b_u = p_graph.block(u);
                if locked[u] {
                    *slot = (0, b_u);
                    return;
                }

                match compute_max_gainer(graph, p_graph, u, rating) {
                    Some(gainer)
                        if gainer.block != b_u
                            && (gainer.ext_degree > gainer.int_degree
                                || gainer.gain
                                    >= -((penalty_factor * gainer.int_degree as f64).floor()
                                        as EdgeWeight)) =>
                    {
                        *slot = (gainer.gain, gainer.block);
                    }
                    _ => *slot = (0, b_u),
                }
            });
    }

    /// Phase 2: keep a candidate only if its gain stays non-negative when
    /// every better-ranked neighbor is assumed to move as announced. The
    /// `(gain, node id)` order is total, so the outcome does not depend on
    /// scheduling.
    fn filter_moves(&mut self, graph: &Graph, p_graph: &PartitionedGraph) {
        let gains_and_targets = &self.gains_and_targets;
        self.locked.par_iter_mut().enumerate().for_each(|(u, locked)| {
            *locked = false;

            let from_u = p_graph.block(u);
            let (gain_u, to_u) = gains_and_targets[u];
            if from_u == to_u {
                return;
            }

            let mut projected_gain = 0;
            for (e, v) in graph.neighbors(u) {
                let w = graph.edge_weight(e);
                let (gain_v, to_v) = gains_and_targets[v];
                let projected_b_v = if gain_v > gain_u || (gain_v == gain_u && v < u) {
                    to_v
                } else {
                    p_graph.block(v)
                };

                if projected_b_v == to_u {
                    projected_gain += w;
                } else if projected_b_v == from_u {
                    projected_gain -= w;
                }
            }

            *locked = projected_gain >= 0;
        });
    }

    /// Phase 3: execute every locked move; block weight updates commute, so
    /// they are collected as relaxed deltas and applied in bulk.
    fn execute_moves(&self, graph: &Graph, p_graph: &PartitionedGraph) {
        (0..graph.n()).into_par_iter().for_each(|u| {
            if self.locked[u] {
                let from = p_graph.block(u);
                let to = self.gains_and_targets[u].1;
                p_graph.set_block_unchecked(u, to);

                let w = graph.node_weight(u);
                self.block_weight_deltas[from].fetch_sub(w, Ordering::Relaxed);
                self.block_weight_deltas[to].fetch_add(w, Ordering::Relaxed);
            }
        });
    }

    fn apply_block_weight_deltas(&self, p_graph: &PartitionedGraph) {
        for (b, delta) in self.block_weight_deltas.iter().enumerate() {
            p_graph.add_block_weight(b, delta.swap(0, Ordering::Relaxed));
        }
    }
}

impl Refiner for JetRefiner {
    fn initialize(&mut self, graph: &Graph) {
        self.gains_and_targets = vec![(0, 0); graph.n()];
        self.locked = vec![false; graph.n()];
    }

    fn refine(
        &mut self,
        graph: &Graph,
        p_graph: &mut PartitionedGraph,
        p_ctx: &PartitionContext,
    ) -> bool {
        debug_assert_eq!(graph.n(), self.locked.len(), "refiner was not initialized");

        self.block_weight_deltas = (0..p_graph.k()).map(|_| AtomicI64::new(0)).collect();
        self.locked.iter_mut().for_each(|l| *l = false);

        // Coarse levels may sacrifice a larger share of internal degree.
        self.penalty_factor = if graph.n() <= 2 * p_ctx.k * self.contraction_limit {
            self.jet_ctx.coarse_penalty_factor
        } else {
            self.jet_ctx.fine_penalty_factor
        };

        let max_iterations = if self.jet_ctx.num_iterations == 0 {
            usize::MAX
        } else {
            self.jet_ctx.num_iterations
        };
        let max_fruitless = if self.jet_ctx.num_fruitless_iterations == 0 {
            usize::MAX
        } else {
            self.jet_ctx.num_fruitless_iterations
        };

        let mut snapshooter = BestPartitionSnapshooter::init(p_graph, graph, p_ctx);
        let initial_cut = snapshooter.cut;
        let mut best_cut = initial_cut;
        let mut cur_iteration = 0;
        let mut cur_fruitless = 0;

        loop {
            self.find_moves(graph, p_graph);
            self.filter_moves(graph, p_graph);
            self.execute_moves(graph, p_graph);
            self.apply_block_weight_deltas(p_graph);

            debug_assert!(p_graph.validate(graph));

            self.balancer.initialize(graph);
            self.balancer.refine(graph, p_graph, p_ctx);

            let new_cut = snapshooter.update(p_graph, graph, p_ctx);

            cur_iteration += 1;
            cur_fruitless += 1;

            // An iteration is fruitful only if it improves the reference cut
            // by more than the configured fraction.
            if best_cut - new_cut
                > ((1.0 - self.jet_ctx.fruitless_threshold) * best_cut as f64) as EdgeWeight
            {
                debug!("jet iteration {cur_iteration}: cut {best_cut} -> {new_cut}");
                best_cut = new_cut;
                cur_fruitless = 0;
            }

            if cur_iteration >= max_iterations || cur_fruitless >= max_fruitless {
                break;
            }
        }

        snapshooter.rollback(p_graph);
        debug_assert!(p_graph.validate(graph));

        initial_cut > snapshooter.cut
    }
}
