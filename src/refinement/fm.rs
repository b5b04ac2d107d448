//! Localized FM-style refinement.
//!
//! Seeds are border nodes. Around each seed, a task grows a bounded search
//! graph, speculates on a sequence of single-node moves using a delta overlay
//! over the shared gain cache, and keeps the prefix of moves with the best
//! cumulative gain. All search graphs of a round speculate in parallel
//! against the round-start partition; their prefixes are then committed in
//! seed order, dropping any search that touches an already-claimed node.
//! Dropped commits are counted as conflicts. Applying moves one by one keeps
//! the partition and the gain cache synchronized for the next round.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use super::gains::{DeltaGainCache, DenseGainCache, GainCache, OnTheFlyGainCache};
use super::Refiner;
use crate::context::{FmContext, PartitionContext};
use crate::datastructures::BinaryMaxHeap;
use crate::graph::Graph;
use crate::partition::PartitionedGraph;
use crate::{BlockId, EdgeWeight, NodeId};

struct TentativeMove {
    node: NodeId,
    from: BlockId,
    to: BlockId,
}

pub struct FmRefiner {
    ctx: FmContext,
    seed: u64,
    num_conflicts: usize,
}

impl FmRefiner {
    pub fn new(ctx: FmContext, seed: u64) -> Self {
        Self { ctx, seed, num_conflicts: 0 }
    }

    /// Number of search commits dropped because an earlier search claimed a
    /// shared node.
    pub fn num_conflicts(&self) -> usize {
        self.num_conflicts
    }

    fn find_seeds<C: GainCache + Sync>(
        &self,
        graph: &Graph,
        p_graph: &PartitionedGraph,
        cache: &C,
        round: u64,
    ) -> Vec<NodeId> {
        let mut seeds: Vec<NodeId> = (0..graph.n())
            .into_par_iter()
            .filter(|&u| cache.is_border_node(graph, p_graph, u))
            .collect();
        let mut rng = SmallRng::seed_from_u64(self.seed ^ round.wrapping_mul(0x9e37_79b9));
        seeds.shuffle(&mut rng);
        seeds
    }

    /// Grows the search graph and speculates on moves; returns the best
    /// prefix of tentative moves, which may be empty.
    fn localized_search<C: GainCache>(
        &self,
        graph: &Graph,
        p_graph: &PartitionedGraph,
        p_ctx: &PartitionContext,
        cache: &C,
        seed_node: NodeId,
    ) -> Vec<TentativeMove> {
        let k = p_graph.k();
        let max_size = self.ctx.max_search_graph_size;

        // Bounded breadth-first region around the seed.
        let mut region: Vec<NodeId> = vec![seed_node];
        let mut members: FxHashSet<NodeId> = FxHashSet::default();
        members.insert(seed_node);
        let mut cursor = 0;
        while cursor < region.len() && region.len() < max_size {
            let u = region[cursor];
            cursor += 1;
            for (_, v) in graph.neighbors(u) {
                if region.len() >= max_size {
                    break;
                }
                if members.insert(v) {
                    region.push(v);
                }
            }
        }

        let local_id: FxHashMap<NodeId, usize> =
            region.iter().enumerate().map(|(i, &u)| (u, i)).collect();

        let mut delta_cache = DeltaGainCache::new(cache, k);
        let mut overlay: FxHashMap<NodeId, BlockId> = FxHashMap::default();
        let mut weight_deltas = vec![0i64; k];

        let block_of = |overlay: &FxHashMap<NodeId, BlockId>, u: NodeId| {
            overlay.get(&u).copied().unwrap_or_else(|| p_graph.block(u))
        };

        // The best move per region node feeds a max-gain queue.
        let rate = |delta_cache: &DeltaGainCache<'_, C>,
                    overlay: &FxHashMap<NodeId, BlockId>,
                    u: NodeId|
         -> Option<(BlockId, EdgeWeight)> {
            let from = block_of(overlay, u);
            (0..k)
                .filter(|&b| b != from)
                .map(|b| (b, delta_cache.gain(graph, p_graph, u, from, b)))
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        };

        let mut pq: BinaryMaxHeap<EdgeWeight> = BinaryMaxHeap::new(region.len());
        let mut targets = vec![0 as BlockId; region.len()];
        for (i, &u) in region.iter().enumerate() {
            if let Some((to, gain)) = rate(&delta_cache, &overlay, u) {
                targets[i] = to;
                pq.push(i, gain);
            }
        }

        let mut moves: Vec<TentativeMove> = Vec::new();
        let mut cum_gain = 0;
        let mut best_gain = 0;
        let mut best_len = 0;

        while let Some((i, gain)) = pq.pop() {
            let u = region[i];
            let from = block_of(&overlay, u);
            let to = targets[i];
            if to == from {
                continue;
            }

            // Balance constraint against global weights plus this search's
            // own speculative deltas.
            let w = graph.node_weight(u);
            if p_graph.block_weight(to) + weight_deltas[to] + w > p_ctx.max_block_weight(to) {
                continue;
            }

            overlay.insert(u, to);
            weight_deltas[from] -= w;
            weight_deltas[to] += w;
            delta_cache.notify_move(graph, u, from, to);
            cum_gain += gain;
            moves.push(TentativeMove { node: u, from, to });

            if cum_gain > best_gain {
                best_gain = cum_gain;
                best_len = moves.len();
            }

            // Re-rate the moved node's region neighbors still in the queue.
            for (_, v) in graph.neighbors(u) {
                if let Some(&j) = local_id.get(&v) {
                    if pq.contains(j) {
                        if let Some((to_v, gain_v)) = rate(&delta_cache, &overlay, region[j]) {
                            targets[j] = to_v;
                            pq.change_priority(j, gain_v);
                        }
                    }
                }
            }
        }

        moves.truncate(best_len);
        moves
    }

    /// Applies the committed prefixes of one round in seed order.
    fn commit_round<C: GainCache>(
        &mut self,
        graph: &Graph,
        p_graph: &PartitionedGraph,
        p_ctx: &PartitionContext,
        cache: &C,
        searches: Vec<Vec<TentativeMove>>,
    ) -> usize {
        let mut claimed = vec![false; graph.n()];
        let mut committed = 0;

        for moves in &searches {
            if moves.iter().any(|m| claimed[m.node]) {
                self.num_conflicts += 1;
                continue;
            }

            // Earlier commits may have changed the block weights this search
            // speculated against.
            let mut deltas = vec![0i64; p_graph.k()];
            for m in moves {
                let w = graph.node_weight(m.node);
                deltas[m.from] -= w;
                deltas[m.to] += w;
            }
            let overloads = (0..p_graph.k()).any(|b| {
                deltas[b] > 0 && p_graph.block_weight(b) + deltas[b] > p_ctx.max_block_weight(b)
            });
            if overloads {
                continue;
            }

            for m in moves {
                claimed[m.node] = true;
                p_graph.set_block(graph, m.node, m.to);
                cache.notify_move(graph, m.node, m.from, m.to);
            }
            committed += 1;
        }
        committed
    }
}

impl Refiner for FmRefiner {
    fn initialize(&mut self, _graph: &Graph) {
        self.num_conflicts = 0;
    }

    fn refine(
        &mut self,
        graph: &Graph,
        p_graph: &mut PartitionedGraph,
        p_ctx: &PartitionContext,
    ) -> bool {
        let initial_cut = p_graph.edge_cut(graph);

        // The dense cache pays n * k cells up front; past that budget the
        // on-the-fly variant recomputes rows per query instead.
        if graph.n().saturating_mul(p_graph.k()) <= DENSE_GAIN_CACHE_CELL_LIMIT {
            let mut cache = DenseGainCache::new(p_graph.k(), graph.n());
            cache.initialize(graph, p_graph);
            self.run_rounds(graph, p_graph, p_ctx, &cache);
        } else {
            let mut cache = OnTheFlyGainCache::new();
            cache.initialize(graph, p_graph);
            self.run_rounds(graph, p_graph, p_ctx, &cache);
        }

        debug_assert!(p_graph.validate(graph));
        p_graph.edge_cut(graph) < initial_cut
    }
}

const DENSE_GAIN_CACHE_CELL_LIMIT: usize = 1 << 26;

impl FmRefiner {
    fn run_rounds<C: GainCache + Sync>(
        &mut self,
        graph: &Graph,
        p_graph: &mut PartitionedGraph,
        p_ctx: &PartitionContext,
        cache: &C,
    ) {
        for round in 0..self.ctx.num_iterations as u64 {
            let seeds = self.find_seeds(graph, p_graph, cache, round);
            if seeds.is_empty() {
                break;
            }

            let p_graph_ref: &PartitionedGraph = p_graph;
            let searches: Vec<Vec<TentativeMove>> = seeds
                .par_chunks(self.ctx.seeds_per_task.max(1))
                .flat_map_iter(|batch| {
                    batch.iter().map(|&seed_node| {
                        self.localized_search(graph, p_graph_ref, p_ctx, cache, seed_node)
                    })
                })
                .filter(|moves| !moves.is_empty())
                .collect();

            let committed = self.commit_round(graph, p_graph, p_ctx, cache, searches);

            log::debug!(
                "fm round {round}: {committed} committed searches, {} conflicts so far",
                self.num_conflicts
            );
            debug_assert!(cache.validate(graph, p_graph));

            if committed == 0 {
                break;
            }
        }
    }
}
