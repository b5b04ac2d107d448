//! Distributed balancing refinement.
//!
//! Every rank grows move sets over its owned nodes, then all ranks exchange
//! their candidate sets and run the same greedy reduction over the combined
//! list: candidates are taken in descending relative gain as long as the
//! source block is still overloaded and the target has room. Because the
//! reduction input and its total order are identical everywhere, each rank
//! can apply its own accepted sets without further coordination, followed by
//! one ghost label sync.

use bytemuck::{Pod, Zeroable};
use log::debug;

use super::communicator::Communicator;
use super::graph::{DistPartition, DistributedGraph};
use crate::context::{BalancerContext, PartitionContext};
use crate::metrics;
use crate::partition::PartitionedGraph;
use crate::refinement::balancer::{relative_gain, MoveSetBuilder, MoveSets};
use crate::{BlockId, NodeId};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SetCandidateMessage {
    rank: u64,
    set: u64,
    from: u64,
    to: u64,
    weight: i64,
    gain: i64,
}

pub struct DistBalancer {
    ctx: BalancerContext,
}

impl DistBalancer {
    pub fn new(ctx: BalancerContext) -> Self {
        Self { ctx }
    }

    /// One build-exchange-reduce-apply round; returns the number of sets
    /// accepted group-wide.
    fn round<C: Communicator>(
        &self,
        dist: &DistributedGraph,
        p: &DistPartition,
        p_ctx: &PartitionContext,
        comm: &C,
    ) -> usize {
        // Local move sets against the replicated global block weights.
        let view = PartitionedGraph::new(dist.local(), p.k(), p.copy_partition());
        for b in 0..p.k() {
            view.set_block_weight(b, p.block_weight(b));
        }
        let sets: MoveSets = MoveSetBuilder::new(dist.local(), &view, p_ctx, dist.n_owned())
            .build(self.ctx.max_move_set_weight);

        let mut message = Vec::with_capacity(sets.num_sets());
        for s in 0..sets.num_sets() {
            message.push(SetCandidateMessage {
                rank: comm.rank() as u64,
                set: s as u64,
                from: sets.blocks[s] as u64,
                to: sets.targets[s] as u64,
                weight: sets.weight(dist.local(), s),
                gain: sets.gains[s],
            });
        }
        let bytes: Vec<u8> = bytemuck::cast_slice(&message).to_vec();
        let incoming = comm.exchange(vec![bytes; comm.size()]);

        let mut candidates: Vec<SetCandidateMessage> = incoming
            .iter()
            .flat_map(|buf| bytemuck::pod_collect_to_vec::<u8, SetCandidateMessage>(buf))
            .collect();

        // Identical total order on every rank.
        candidates.sort_unstable_by(|a, b| {
            let ra = relative_gain(a.gain, a.weight);
            let rb = relative_gain(b.gain, b.weight);
            rb.partial_cmp(&ra)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.rank.cmp(&b.rank))
                .then_with(|| a.set.cmp(&b.set))
        });

        // Replicated greedy reduction: migrate weight out of overloaded
        // blocks without creating new overload.
        let mut weights = p.block_weights();
        let mut accepted = 0;
        let mut moved = vec![false; dist.n_owned()];
        for cand in &candidates {
            let from = cand.from as BlockId;
            let to = cand.to as BlockId;
            if weights[from] <= p_ctx.max_block_weight(from) {
                continue;
            }
            if weights[to] + cand.weight > p_ctx.max_block_weight(to) {
                continue;
            }
            weights[from] -= cand.weight;
            weights[to] += cand.weight;
            accepted += 1;

            if cand.rank as usize == comm.rank() {
                for &u in sets.nodes(cand.set as usize) {
                    p.set_block_unchecked(u, to);
                    moved[u] = true;
                }
            }
        }

        p.sync_ghost_labels(dist, comm, |u: NodeId| moved[u]);
        p.set_block_weights(&weights);
        comm.barrier();

        accepted
    }

    /// Migrates weight until every block fits its cap or no candidate set is
    /// accepted anymore. Returns true if the total overload shrank.
    pub fn refine<C: Communicator>(
        &mut self,
        dist: &DistributedGraph,
        p: &DistPartition,
        p_ctx: &PartitionContext,
        comm: &C,
    ) -> bool {
        let initial_overload = metrics::total_overload(&p.block_weights(), p_ctx);
        if initial_overload == 0 {
            return false;
        }

        for round in 0..self.ctx.max_num_rounds {
            if p.is_feasible(p_ctx) {
                break;
            }
            let accepted = self.round(dist, p, p_ctx, comm);
            debug!("distributed balancer round {round} accepted {accepted} sets");
            if accepted == 0 {
                break;
            }
        }

        metrics::total_overload(&p.block_weights(), p_ctx) < initial_overload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::communicator::{thread_comm_group, ThreadComm};
    use crate::graph::CsrGraph;
    use crate::{EdgeWeight, NodeWeight};

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

    #[test]
    fn test_drains_an_overloaded_block_across_ranks() {
        // Arrange: a path of 8 unit nodes, everything in block 0
        on_ranks(2, |comm| {
            let edges: Vec<(NodeId, NodeId, EdgeWeight)> =
                (0..7).map(|u| (u, u + 1, 1)).collect();
            let global = CsrGraph::from_edges(8, &edges);
            let dist = DistributedGraph::distribute(&global, comm);
            let p = DistPartition::new(&dist, comm, 2, vec![0; dist.total_n()]);
            let p_ctx =
                PartitionContext { k: 2, epsilon: 0.03, total_node_weight: 8 };
            assert!(!p.is_feasible(&p_ctx));

            // Act
            let mut balancer = DistBalancer::new(BalancerContext::default());
            let improved = balancer.refine(&dist, &p, &p_ctx, comm);

            // Assert
            assert!(improved);
            assert!(p.is_feasible(&p_ctx));

            // Replicated weights agree with a fresh reduction.
            let mut recount = vec![0 as NodeWeight; 2];
            for u in 0..dist.n_owned() {
                recount[p.block(u)] += dist.local().node_weight(u);
            }
            comm.allreduce_sum(&mut recount);
            assert_eq!(recount, p.block_weights());
        });
    }
}
