//! Distributed JET refinement, after "Jet: Multilevel Graph Partitioning on
//! GPUs" by Gilbert et al.
//!
//! Each iteration is a fixed sequence of bulk-synchronous supersteps:
//! find moves | exchange candidates | filter | execute | sync labels |
//! allreduce weight deltas | rebalance | snapshot. Inside a superstep every
//! rank computes purely locally over its owned nodes; a barrier closes each
//! phase. The filter's `(gain, global id)` order is total, so the set of
//! executed moves is independent of thread or message scheduling.

use std::sync::atomic::{AtomicI64, Ordering};

use bytemuck::{Pod, Zeroable};
use log::debug;
use rayon::prelude::*;

use super::balancer::DistBalancer;
use super::communicator::Communicator;
use super::graph::{DistPartition, DistributedGraph};
use crate::context::{Context, JetContext, PartitionContext};
use crate::datastructures::RatingMap;
use crate::refinement::compute_max_gainer;
use crate::{BlockId, BlockWeight, EdgeWeight, NodeId};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CandidateMessage {
    global: u64,
    gain: i64,
    target: u64,
}

struct BestPartitionSnapshooter {
    blocks: Vec<BlockId>,
    weights: Vec<BlockWeight>,
    cut: EdgeWeight,
    feasible: bool,
}

impl BestPartitionSnapshooter {
    fn init<C: Communicator>(
        dist: &DistributedGraph,
        p: &DistPartition,
        p_ctx: &PartitionContext,
        comm: &C,
    ) -> Self {
        Self {
            blocks: p.copy_partition(),
            weights: p.block_weights(),
            cut: p.global_edge_cut(dist, comm),
            feasible: p.is_feasible(p_ctx),
        }
    }

    fn update<C: Communicator>(
        &mut self,
        dist: &DistributedGraph,
        p: &DistPartition,
        p_ctx: &PartitionContext,
        comm: &C,
    ) -> EdgeWeight {
        let cut = p.global_edge_cut(dist, comm);
        let feasible = p.is_feasible(p_ctx);

        let better =
            (feasible && !self.feasible) || (feasible == self.feasible && cut < self.cut);
        if better {
            self.blocks = p.copy_partition();
            self.weights = p.block_weights();
            self.cut = cut;
            self.feasible = feasible;
        }
        cut
    }

    fn rollback(&self, p: &DistPartition) {
        p.restore(&self.blocks, &self.weights);
    }
}

pub struct DistJetRefiner {
    jet_ctx: JetContext,
    contraction_limit: NodeId,
    balancer: DistBalancer,
    penalty_factor: f64,
    gains_and_targets: Vec<(EdgeWeight, BlockId)>,
    locked: Vec<bool>,
}

impl DistJetRefiner {
    pub fn new(ctx: &Context) -> Self {
        Self {
            jet_ctx: ctx.refinement.jet.clone(),
            contraction_limit: ctx.coarsening.contraction_limit,
            balancer: DistBalancer::new(ctx.refinement.balancer.clone()),
            penalty_factor: 0.0,
            gains_and_targets: Vec::new(),
            locked: Vec::new(),
        }
    }

    pub fn initialize(&mut self, dist: &DistributedGraph) {
        self.gains_and_targets = vec![(0, 0); dist.total_n()];
        self.locked = vec![false; dist.n_owned()];
    }

    fn find_moves(&mut self, dist: &DistributedGraph, p: &DistPartition) {
        let graph = dist.local();
        let penalty_factor = self.penalty_factor;
        let locked = &self.locked;
        let n_owned = dist.n_owned();

        self.gains_and_targets[..n_owned]
            .par_iter_mut()
            .enumerate()
            .for_each_init(RatingMap::new, |rating, (u, slot)| {
                let b_u = p.block(u);
                if locked[u] {
                    *slot = (0, b_u);
                    return;
                }

                match compute_max_gainer(graph, p.inner(), u, rating) {
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

    /// Sends `(gain, target)` of every owned candidate to the ranks holding
    /// it as a ghost; ghosts without a candidate keep their current block.
    fn exchange_candidates<C: Communicator>(
        &mut self,
        dist: &DistributedGraph,
        p: &DistPartition,
        comm: &C,
    ) {
        for ghost in dist.n_owned()..dist.total_n() {
            self.gains_and_targets[ghost] = (0, p.block(ghost));
        }

        let outgoing: Vec<Vec<u8>> = dist
            .mirrors()
            .iter()
            .map(|mirrored| {
                let mut buf = Vec::new();
                for &u in mirrored {
                    let (gain, target) = self.gains_and_targets[u];
                    if target != p.block(u) {
                        buf.extend_from_slice(bytemuck::bytes_of(&CandidateMessage {
                            global: dist.local_to_global(u),
                            gain,
                            target: target as u64,
                        }));
                    }
                }
                buf
            })
            .collect();

        for buf in comm.exchange(outgoing) {
            for msg in &bytemuck::pod_collect_to_vec::<u8, CandidateMessage>(&buf) {
                let local = dist
                    .global_to_local(msg.global)
                    .expect("candidate for unknown ghost");
                self.gains_and_targets[local] = (msg.gain, msg.target as BlockId);
            }
        }
    }

    /// Locks a candidate iff its projected gain is non-negative when every
    /// neighbor with a better `(gain, global id)` rank moves as announced.
    fn filter_moves(&mut self, dist: &DistributedGraph, p: &DistPartition) {
        let graph = dist.local();
        let gains_and_targets = &self.gains_and_targets;

        self.locked.par_iter_mut().enumerate().for_each(|(u, locked)| {
            *locked = false;

            let from_u = p.block(u);
            let (gain_u, to_u) = gains_and_targets[u];
            if from_u == to_u {
                return;
            }

            let global_u = dist.local_to_global(u);
            let mut projected_gain = 0;
            for (e, v) in graph.neighbors(u) {
                let w = graph.edge_weight(e);
                let (gain_v, to_v) = gains_and_targets[v];
                let global_v = dist.local_to_global(v);
                let projected_b_v =
                    if gain_v > gain_u || (gain_v == gain_u && global_v < global_u) {
                        to_v
                    } else {
                        p.block(v)
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

    fn execute_moves(&self, dist: &DistributedGraph, p: &DistPartition, deltas: &[AtomicI64]) {
        let graph = dist.local();
        (0..dist.n_owned()).into_par_iter().for_each(|u| {
            if self.locked[u] {
                let from = p.block(u);
                let to = self.gains_and_targets[u].1;
                p.set_block_unchecked(u, to);

                let w = graph.node_weight(u);
                deltas[from].fetch_sub(w, Ordering::Relaxed);
                deltas[to].fetch_add(w, Ordering::Relaxed);
            }
        });
    }

    /// Runs JET until the iteration or fruitless cap is hit; the partition
    /// ends at the best snapshot seen. Collective: all ranks call together.
    pub fn refine<C: Communicator>(
        &mut self,
        dist: &DistributedGraph,
        p: &DistPartition,
        p_ctx: &PartitionContext,
        comm: &C,
    ) -> bool {
        debug_assert_eq!(self.locked.len(), dist.n_owned(), "refiner was not initialized");
        self.locked.iter_mut().for_each(|l| *l = false);

        let global_n = dist.global_n() as NodeId;
        self.penalty_factor = if global_n <= 2 * p_ctx.k * self.contraction_limit {
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

        let mut snapshooter = BestPartitionSnapshooter::init(dist, p, p_ctx, comm);
        let initial_cut = snapshooter.cut;
        let mut best_cut = initial_cut;
        let mut cur_iteration = 0;
        let mut cur_fruitless = 0;

        loop {
            comm.barrier();

            self.find_moves(dist, p);
            self.exchange_candidates(dist, p, comm);
            self.filter_moves(dist, p);

            let deltas: Vec<AtomicI64> = (0..p.k()).map(|_| AtomicI64::new(0)).collect();
            self.execute_moves(dist, p, &deltas);

            let locked = &self.locked;
            p.sync_ghost_labels(dist, comm, |u| locked[u]);

            let mut delta_values: Vec<BlockWeight> =
                deltas.iter().map(|d| d.load(Ordering::Relaxed)).collect();
            p.apply_block_weight_deltas(comm, &mut delta_values);

            self.balancer.refine(dist, p, p_ctx, comm);

            let new_cut = snapshooter.update(dist, p, p_ctx, comm);

            cur_iteration += 1;
            cur_fruitless += 1;

            if best_cut - new_cut
                > ((1.0 - self.jet_ctx.fruitless_threshold) * best_cut as f64) as EdgeWeight
            {
                debug!("distributed jet iteration {cur_iteration}: cut {best_cut} -> {new_cut}");
                best_cut = new_cut;
                cur_fruitless = 0;
            }

            if cur_iteration >= max_iterations || cur_fruitless >= max_fruitless {
                break;
            }
        }

        snapshooter.rollback(p);
        comm.barrier();

        initial_cut > snapshooter.cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::communicator::{thread_comm_group, ThreadComm};
    use crate::graph::CsrGraph;

    fn on_ranks<F>(size: usize, f: F)
    where
        F: Fn(&ThreadComm) + Send + Sync,
    {
        let comms = thread_comm_group(size);
        std::thread::scope(|scope| {
            for comm in &comms {
                scope.spawn(|| f(comm));
            }
        });
    }

    fn path_graph(n: NodeId) -> CsrGraph {
        let edges: Vec<(NodeId, NodeId, EdgeWeight)> =
            (0..n - 1).map(|u| (u, u + 1, 1)).collect();
        CsrGraph::from_edges(n, &edges)
    }

    #[test]
    fn test_improves_an_alternating_path_across_ranks() {
        // Arrange: blocks alternate along a path split over two ranks
        on_ranks(2, |comm| {
            let global = path_graph(8);
            let dist = DistributedGraph::distribute(&global, comm);
            let blocks: Vec<BlockId> = (0..dist.total_n())
                .map(|u| (dist.local_to_global(u) % 2) as BlockId)
                .collect();
            let p = DistPartition::new(&dist, comm, 2, blocks);
            let p_ctx = PartitionContext { k: 2, epsilon: 0.03, total_node_weight: 8 };
            let initial_cut = p.global_edge_cut(&dist, comm);
            assert_eq!(initial_cut, 7);

            // Act
            let ctx = Context::default();
            let mut jet = DistJetRefiner::new(&ctx);
            jet.initialize(&dist);
            let improved = jet.refine(&dist, &p, &p_ctx, comm);

            // Assert
            assert!(improved);
            assert!(p.global_edge_cut(&dist, comm) < initial_cut);
            assert!(p.is_feasible(&p_ctx));
        });
    }

    #[test]
    fn test_deterministic_across_runs() {
        // Arrange: the full refined assignment, keyed by global node id
        let run = || {
            let collected = std::sync::Mutex::new(Vec::new());
            on_ranks(2, |comm| {
                let global = path_graph(10);
                let dist = DistributedGraph::distribute(&global, comm);
                let blocks: Vec<BlockId> = (0..dist.total_n())
                    .map(|u| (dist.local_to_global(u) % 2) as BlockId)
                    .collect();
                let p = DistPartition::new(&dist, comm, 2, blocks);
                let p_ctx =
                    PartitionContext { k: 2, epsilon: 0.03, total_node_weight: 10 };

                let ctx = Context::default();
                let mut jet = DistJetRefiner::new(&ctx);
                jet.initialize(&dist);
                jet.refine(&dist, &p, &p_ctx, comm);

                let cut = p.global_edge_cut(&dist, comm);
                let mut out = collected.lock().expect("collector poisoned");
                for u in 0..dist.n_owned() {
                    out.push((dist.local_to_global(u), p.block(u), cut));
                }
            });
            let mut result = collected.into_inner().expect("collector poisoned");
            result.sort_unstable();
            result
        };

        // Act and Assert: identical runs agree on every label and the cut
        assert_eq!(run(), run());
    }

    #[test]
    fn test_single_rank_matches_shared_memory_shape() {
        // Arrange: one rank, whole graph local
        let comms = thread_comm_group(1);
        let comm = &comms[0];
        let global = path_graph(6);
        let dist = DistributedGraph::distribute(&global, comm);
        let p = DistPartition::new(&dist, comm, 2, vec![0, 1, 0, 1, 0, 1]);
        let p_ctx = PartitionContext { k: 2, epsilon: 0.03, total_node_weight: 6 };

        // Act
        let ctx = Context::default();
        let mut jet = DistJetRefiner::new(&ctx);
        jet.initialize(&dist);
        jet.refine(&dist, &p, &p_ctx, comm);

        // Assert
        assert!(p.global_edge_cut(&dist, comm) <= 2);
        assert!(p.is_feasible(&p_ctx));
    }
}
