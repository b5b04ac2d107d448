//! Initial partitioning of the coarsest graph.
//!
//! A pool of seeded bipartition heuristics (random, breadth-first region
//! growing, greedy graph growing) runs several attempts each; the best
//! bipartition by (feasibility, cut) wins. k-way partitions come from
//! recursive bisection over block-induced subgraphs, splitting the target
//! block count as evenly as possible at every step.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::context::Context;
use crate::datastructures::{BinaryMinHeap, Marker};
use crate::graph::{CsrGraph, Graph};
use crate::metrics;
use crate::{BlockId, BlockWeight, EdgeWeight, NodeId, NodeWeight};

/// Weight goals of one bisection step: block 0 receives `k0` of `k` final
/// blocks, block 1 the remaining `k1`.
#[derive(Debug, Clone, Copy)]
struct BisectionTargets {
    target: [NodeWeight; 2],
    max: [NodeWeight; 2],
}

impl BisectionTargets {
    fn new(total: NodeWeight, k0: BlockId, k1: BlockId, epsilon: f64) -> Self {
        let k = (k0 + k1) as i64;
        let t0 = (total * k0 as i64 + k - 1) / k;
        let t1 = total - t0;
        Self {
            target: [t0, t1],
            max: [
                ((1.0 + epsilon) * t0 as f64).floor() as NodeWeight,
                ((1.0 + epsilon) * t1 as f64).floor() as NodeWeight,
            ],
        }
    }
}

/// Random start node that has not been visited yet, if any.
fn pick_unvisited(n: NodeId, marker: &Marker, rng: &mut SmallRng) -> Option<NodeId> {
    if n == 0 {
        return None;
    }
    let start = rng.gen_range(0..n);
    (start..n).chain(0..start).find(|&u| !marker.get(u))
}

fn block_weights(graph: &Graph, partition: &[BlockId]) -> [BlockWeight; 2] {
    let mut weights = [0; 2];
    for u in 0..graph.n() {
        weights[partition[u]] += graph.node_weight(u);
    }
    weights
}

/// Assigns shuffled nodes to block 0 until its target weight is reached.
fn random_bipartition(graph: &Graph, targets: &BisectionTargets, rng: &mut SmallRng) -> Vec<BlockId> {
    let n = graph.n();
    let mut order: Vec<NodeId> = (0..n).collect();
    order.shuffle(rng);

    let mut partition = vec![1; n];
    let mut weight = 0;
    for u in order {
        if weight >= targets.target[0] {
            break;
        }
        partition[u] = 0;
        weight += graph.node_weight(u);
    }
    partition
}

/// Grows block 0 as a breadth-first region from a random start node.
fn bfs_bipartition(graph: &Graph, targets: &BisectionTargets, rng: &mut SmallRng) -> Vec<BlockId> {
    let n = graph.n();
    let mut partition = vec![1; n];
    let mut marker = Marker::new(n);
    let mut queue = std::collections::VecDeque::new();
    let mut weight = 0;

    while weight < targets.target[0] {
        if queue.is_empty() {
            // Restart from an unvisited node; covers disconnected graphs.
            let Some(start) = pick_unvisited(n, &marker, rng) else {
                break;
            };
            marker.set(start);
            queue.push_back(start);
        }
        let u = queue.pop_front().expect("queue non-empty");
        partition[u] = 0;
        weight += graph.node_weight(u);
        for (_, v) in graph.neighbors(u) {
            if !marker.get(v) {
                marker.set(v);
                queue.push_back(v);
            }
        }
    }
    partition
}

/// Greedy graph growing: starts block 0 at a random seed and repeatedly pulls
/// in the frontier node of minimum negative gain, i.e. the node whose move
/// into block 0 increases the cut the least.
fn greedy_graph_growing_bipartition(
    graph: &Graph,
    targets: &BisectionTargets,
    rng: &mut SmallRng,
) -> Vec<BlockId> {
    let n = graph.n();
    let mut partition = vec![1; n];
    let mut queue: BinaryMinHeap<EdgeWeight> = BinaryMinHeap::new(n);
    let mut marker = Marker::new(n);
    let mut weight = 0;

    let negative_gain = |u: NodeId| -> EdgeWeight {
        graph.neighbors(u).map(|(e, _)| graph.edge_weight(e)).sum()
    };

    while weight < targets.target[0] {
        if queue.is_empty() {
            let Some(start) = pick_unvisited(n, &marker, rng) else {
                break;
            };
            marker.set(start);
            queue.push(start, negative_gain(start));
        }

        let (u, _) = queue.pop().expect("queue non-empty");
        partition[u] = 0;
        weight += graph.node_weight(u);

        // Pulling u in turns each frontier edge from cut into internal,
        // improving the neighbor's gain by twice the edge weight.
        for (e, v) in graph.neighbors(u) {
            if partition[v] == 1 {
                let w = graph.edge_weight(e);
                if queue.contains(v) {
                    let key = queue.key(v) - 2 * w;
                    queue.change_priority(v, key);
                } else if !marker.get(v) {
                    marker.set(v);
                    queue.push(v, negative_gain(v) - 2 * w);
                }
            }
        }
    }
    partition
}

fn is_feasible_bipartition(weights: &[BlockWeight; 2], targets: &BisectionTargets) -> bool {
    weights[0] <= targets.max[0] && weights[1] <= targets.max[1]
}

/// Runs every heuristic `num_repetitions` times and keeps the best result by
/// (feasibility, cut).
fn bipartition(
    graph: &Graph,
    targets: &BisectionTargets,
    num_repetitions: usize,
    seed: u64,
) -> Vec<BlockId> {
    type Heuristic = fn(&Graph, &BisectionTargets, &mut SmallRng) -> Vec<BlockId>;
    const HEURISTICS: [Heuristic; 3] =
        [random_bipartition, bfs_bipartition, greedy_graph_growing_bipartition];

    let mut best: Option<(bool, EdgeWeight, Vec<BlockId>)> = None;
    for (h, heuristic) in HEURISTICS.iter().enumerate() {
        for attempt in 0..num_repetitions {
            let mut rng = SmallRng::seed_from_u64(
                seed ^ ((h * num_repetitions + attempt) as u64).wrapping_mul(0x517c_c1b7),
            );
            let partition = heuristic(graph, targets, &mut rng);
            let cut = metrics::edge_cut(graph, &partition);
            let feasible = is_feasible_bipartition(&block_weights(graph, &partition), targets);

            let better = match &best {
                None => true,
                Some((best_feasible, best_cut, _)) => {
                    (feasible && !best_feasible) || (feasible == *best_feasible && cut < *best_cut)
                }
            };
            if better {
                best = Some((feasible, cut, partition));
            }
        }
    }

    best.expect("at least one attempt ran").2
}

/// Extracts the subgraph induced by `block`, returning it together with the
/// map from subgraph node ids back to `graph` node ids.
pub fn extract_block_subgraph(
    graph: &Graph,
    partition: &[BlockId],
    block: BlockId,
) -> (CsrGraph, Vec<NodeId>) {
    let mut to_sub = vec![usize::MAX; graph.n()];
    let mut to_orig = Vec::new();
    for u in 0..graph.n() {
        if partition[u] == block {
            to_sub[u] = to_orig.len();
            to_orig.push(u);
        }
    }

    let sub_n = to_orig.len();
    let mut offsets = vec![0; sub_n + 1];
    for (i, &u) in to_orig.iter().enumerate() {
        offsets[i + 1] = offsets[i]
            + graph.neighbors(u).filter(|&(_, v)| partition[v] == block).count();
    }

    let m = offsets[sub_n];
    let mut targets = vec![0 as NodeId; m];
    let mut edge_weights = vec![0 as EdgeWeight; m];
    for (i, &u) in to_orig.iter().enumerate() {
        let mut pos = offsets[i];
        let mut row: Vec<(NodeId, EdgeWeight)> = graph
            .neighbors(u)
            .filter(|&(_, v)| partition[v] == block)
            .map(|(e, v)| (to_sub[v], graph.edge_weight(e)))
            .collect();
        row.sort_unstable_by_key(|&(v, _)| v);
        for (v, w) in row {
            targets[pos] = v;
            edge_weights[pos] = w;
            pos += 1;
        }
    }

    let node_weights = to_orig.iter().map(|&u| graph.node_weight(u)).collect();
    (
        CsrGraph::new(offsets, targets, node_weights, edge_weights, false),
        to_orig,
    )
}

/// Partitions `graph` into `k` blocks by recursive bisection.
pub fn initial_partition(graph: &Graph, ctx: &Context, k: BlockId, seed: u64) -> Vec<BlockId> {
    let mut partition = vec![0; graph.n()];
    recurse(graph, ctx, k, seed, 0, &mut partition, &(0..graph.n()).collect::<Vec<_>>());
    partition
}

fn recurse(
    graph: &Graph,
    ctx: &Context,
    k: BlockId,
    seed: u64,
    block_base: BlockId,
    out: &mut [BlockId],
    to_orig: &[NodeId],
) {
    if k <= 1 {
        for &u in to_orig {
            out[u] = block_base;
        }
        return;
    }

    let k0 = k.div_ceil(2);
    let k1 = k / 2;
    let targets =
        BisectionTargets::new(graph.total_node_weight(), k0, k1, ctx.partition.epsilon);
    let halves = bipartition(
        graph,
        &targets,
        ctx.initial_partitioning.num_repetitions,
        seed,
    );

    for side in 0..2 {
        let sub_k = if side == 0 { k0 } else { k1 };
        let base = if side == 0 { block_base } else { block_base + k0 };

        if sub_k <= 1 {
            for (i, &u) in to_orig.iter().enumerate() {
                if halves[i] == side {
                    out[u] = base;
                }
            }
            continue;
        }

        let (sub, sub_to_here) = extract_block_subgraph(graph, &halves, side);
        let sub_to_orig: Vec<NodeId> = sub_to_here.iter().map(|&i| to_orig[i]).collect();
        let sub_graph = Graph::Csr(sub);
        recurse(
            &sub_graph,
            ctx,
            sub_k,
            seed ^ (side as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15),
            base,
            out,
            &sub_to_orig,
        );
    }
}
