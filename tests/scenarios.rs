//! End-to-end partitioning scenarios on small structured graphs.

use parcut::context::{Context, PartitionContext, PartitioningMode};
use parcut::gen_weights::gen_uniform_weights;
use parcut::graph::{CsrGraph, Graph};
use parcut::metrics;
use parcut::scheme::partition_graph;
use parcut::{EdgeWeight, NodeId};

fn ctx(k: usize, epsilon: f64, seed: u64) -> Context {
    let mut ctx = Context::default();
    ctx.partition.k = k;
    ctx.partition.epsilon = epsilon;
    ctx.seed = seed;
    ctx
}

fn p_ctx_for(graph: &Graph, ctx: &Context) -> PartitionContext {
    PartitionContext {
        k: ctx.partition.k,
        epsilon: ctx.partition.epsilon,
        total_node_weight: graph.total_node_weight(),
    }
}

fn path(n: NodeId) -> Graph {
    let edges: Vec<(NodeId, NodeId, EdgeWeight)> = (0..n - 1).map(|u| (u, u + 1, 1)).collect();
    Graph::Csr(CsrGraph::from_edges(n, &edges))
}

fn complete(n: NodeId) -> Graph {
    let mut edges = Vec::new();
    for u in 0..n {
        for v in (u + 1)..n {
            edges.push((u, v, 1));
        }
    }
    Graph::Csr(CsrGraph::from_edges(n, &edges))
}

fn grid(side: NodeId) -> Graph {
    let mut edges = Vec::new();
    for r in 0..side {
        for c in 0..side {
            let u = r * side + c;
            if c + 1 < side {
                edges.push((u, u + 1, 1));
            }
            if r + 1 < side {
                edges.push((u, u + side, 1));
            }
        }
    }
    Graph::Csr(CsrGraph::from_edges(side * side, &edges))
}

fn random_graph(n: NodeId, p: f64, seed: u64) -> Graph {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut edges = Vec::new();
    for u in 0..n {
        for v in (u + 1)..n {
            if rng.gen_bool(p) {
                edges.push((u, v, 1));
            }
        }
    }
    Graph::Csr(CsrGraph::from_edges(n, &edges))
}

#[test]
fn path_of_six_splits_in_the_middle() {
    let graph = path(6);
    let ctx = ctx(2, 0.03, 1);

    let p = partition_graph(&graph, &ctx).expect("partitioning succeeds");

    assert_eq!(p.edge_cut(&graph), 1);
    assert_eq!(p.block(0), p.block(1));
    assert_eq!(p.block(1), p.block(2));
    assert_eq!(p.block(3), p.block(4));
    assert_eq!(p.block(4), p.block(5));
    assert_ne!(p.block(2), p.block(3));
}

#[test]
fn complete_graph_of_four_splits_two_and_two() {
    let graph = complete(4);
    let ctx = ctx(2, 0.0, 1);

    let p = partition_graph(&graph, &ctx).expect("partitioning succeeds");

    assert_eq!(p.edge_cut(&graph), 4);
    assert_eq!(p.block_weight(0), 2);
    assert_eq!(p.block_weight(1), 2);
}

#[test]
fn star_stays_balanced() {
    let n = 6;
    let edges: Vec<(NodeId, NodeId, EdgeWeight)> = (1..n).map(|v| (0, v, 1)).collect();
    let graph = Graph::Csr(CsrGraph::from_edges(n, &edges));
    let ctx = ctx(2, 0.0, 1);

    let p = partition_graph(&graph, &ctx).expect("partitioning succeeds");

    let p_ctx = p_ctx_for(&graph, &ctx);
    assert!(p.is_feasible(&p_ctx));
    assert!(p.edge_cut(&graph) <= 3);
}

#[test]
fn disconnected_cliques_are_cut_free() {
    let mut edges = Vec::new();
    for base in [0, 10] {
        for u in 0..10 {
            for v in (u + 1)..10 {
                edges.push((base + u, base + v, 1));
            }
        }
    }
    let graph = Graph::Csr(CsrGraph::from_edges(20, &edges));
    let ctx = ctx(2, 0.0, 1);

    let p = partition_graph(&graph, &ctx).expect("partitioning succeeds");

    assert_eq!(p.edge_cut(&graph), 0);
    assert_eq!(p.block_weight(0), 10);
    assert_eq!(p.block_weight(1), 10);
}

#[test]
fn grid_partitions_into_quadrants() {
    let graph = grid(4);
    let ctx = ctx(4, 0.03, 1);

    let p = partition_graph(&graph, &ctx).expect("partitioning succeeds");

    let p_ctx = p_ctx_for(&graph, &ctx);
    assert!(p.is_feasible(&p_ctx));
    assert_eq!(p.edge_cut(&graph), 8);
}

#[test]
fn partitions_are_total_and_accounted() {
    let graph = random_graph(100, 0.05, 1);
    let ctx = ctx(4, 0.03, 1);

    let p = partition_graph(&graph, &ctx).expect("partitioning succeeds");

    // Totality and balance.
    let p_ctx = p_ctx_for(&graph, &ctx);
    assert!((0..graph.n()).all(|u| p.block(u) < 4));
    assert!(p.is_feasible(&p_ctx));

    // The reported cut matches an independent recomputation.
    let partition = p.copy_partition();
    assert_eq!(p.edge_cut(&graph), metrics::edge_cut(&graph, &partition));

    // Stored block weights match a fresh reduction, and the imbalance stays
    // within the tolerance for unit weights.
    assert!(p.validate(&graph));
    let imb = metrics::imbalance(4, &partition, gen_uniform_weights(graph.n()));
    assert!(imb <= 0.2, "imbalance {imb} too large");
}

#[test]
fn repeated_runs_are_identical_under_a_fixed_seed() {
    let graph = random_graph(100, 0.05, 1);
    let ctx = ctx(4, 0.03, 1);

    let first = partition_graph(&graph, &ctx).expect("partitioning succeeds");
    let second = partition_graph(&graph, &ctx).expect("partitioning succeeds");

    assert_eq!(first.edge_cut(&graph), second.edge_cut(&graph));
    assert_eq!(first.copy_partition(), second.copy_partition());
}

#[test]
fn deep_and_deeper_modes_handle_weighted_graphs() {
    let edges: Vec<(NodeId, NodeId, EdgeWeight)> =
        (0..19).map(|u| (u, u + 1, (u % 3 + 1) as EdgeWeight)).collect();
    let node_weights: Vec<i64> = (0..20).map(|u| (u % 4 + 1) as i64).collect();
    let graph = Graph::Csr(CsrGraph::from_weighted_edges(20, &edges, node_weights));

    for mode in [PartitioningMode::KWay, PartitioningMode::Deep, PartitioningMode::Deeper] {
        let mut ctx = ctx(3, 0.1, 7);
        ctx.mode = mode;

        let p = partition_graph(&graph, &ctx).expect("partitioning succeeds");

        let p_ctx = p_ctx_for(&graph, &ctx);
        assert!(p.is_feasible(&p_ctx), "mode {mode:?} violated balance");
        assert!((0..graph.n()).all(|u| p.block(u) < 3));
        assert!(p.validate(&graph));
    }
}

#[test]
fn compressed_storage_partitions_like_plain_storage() {
    let csr = match random_graph(60, 0.1, 3) {
        Graph::Csr(csr) => csr,
        Graph::Compressed(_) => unreachable!(),
    };
    let mut compress_ctx = Context::default();
    compress_ctx.compression.enabled = true;

    let plain = Graph::Csr(csr.clone());
    let packed = Graph::from_csr(csr, &compress_ctx.compression);
    assert!(matches!(packed, Graph::Compressed(_)));

    let run = |graph: &Graph| {
        let p = partition_graph(graph, &ctx(2, 0.03, 5)).expect("partitioning succeeds");
        let p_ctx = p_ctx_for(graph, &ctx(2, 0.03, 5));
        assert!(p.is_feasible(&p_ctx));
        assert!(p.validate(graph));
        (p.edge_cut(graph), p.copy_partition())
    };

    // Both storages produce valid partitions, and the compressed run is
    // reproducible on its own.
    let plain_result = run(&plain);
    let packed_first = run(&packed);
    let packed_second = run(&packed);
    assert_eq!(packed_first, packed_second);
    assert!(plain_result.0 >= 0 && packed_first.0 >= 0);
}
