//! The message-passing engine.
//!
//! Mirrors the shared-memory multilevel pipeline over a group of ranks: the
//! distributed coarsener shrinks the graph until the coarsest level fits on
//! one rank, the root gathers it and runs the shared-memory initial
//! partitioner, the labels are scattered back, and the distributed refiners
//! improve the partition while uncoarsening.

pub mod balancer;
pub mod coarsening;
pub mod communicator;
pub mod graph;
pub mod jet;

pub use balancer::DistBalancer;
pub use coarsening::DistCoarsener;
pub use communicator::{thread_comm_group, Communicator, NoComm, ThreadComm};
pub use graph::{DistPartition, DistributedGraph};
pub use jet::DistJetRefiner;

use bytemuck::{Pod, Zeroable};
use log::info;

use crate::context::{Context, PartitionContext};
use crate::graph::CsrGraph;
use crate::initial;
use crate::scheme::Error;
use crate::{BlockId, GlobalNodeId, NodeId, NodeWeight};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RowHeader {
    degree: u64,
    weight: i64,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RowEntry {
    dst: u64,
    weight: i64,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlockMessage {
    block: u64,
}

/// Collects the whole (coarsest) graph on rank 0; other ranks get `None`.
fn gather_to_root<C: Communicator>(dist: &DistributedGraph, comm: &C) -> Option<CsrGraph> {
    let local = dist.local();
    let rank = comm.rank();
    let size = comm.size();

    let mut headers = Vec::new();
    let mut entries = Vec::new();
    for u in 0..dist.n_owned() {
        headers.extend_from_slice(bytemuck::bytes_of(&RowHeader {
            degree: local.degree(u) as u64,
            weight: local.node_weight(u),
        }));
        for (e, v) in local.neighbors(u) {
            entries.extend_from_slice(bytemuck::bytes_of(&RowEntry {
                dst: dist.local_to_global(v),
                weight: local.edge_weight(e),
            }));
        }
    }

    let mut header_out: Vec<Vec<u8>> = vec![Vec::new(); size];
    let mut entry_out: Vec<Vec<u8>> = vec![Vec::new(); size];
    header_out[0] = headers;
    entry_out[0] = entries;
    let header_in = comm.exchange(header_out);
    let entry_in = comm.exchange(entry_out);

    if rank != 0 {
        return None;
    }

    let n = dist.global_n() as NodeId;
    let mut offsets = vec![0; n + 1];
    let mut node_weights = vec![0 as NodeWeight; n];
    let mut targets = Vec::new();
    let mut edge_weights = Vec::new();

    let mut u = 0;
    for src in 0..size {
        let headers = bytemuck::pod_collect_to_vec::<u8, RowHeader>(&header_in[src]);
        let entries = bytemuck::pod_collect_to_vec::<u8, RowEntry>(&entry_in[src]);
        let mut pos = 0;
        for header in headers {
            offsets[u + 1] = offsets[u] + header.degree as usize;
            node_weights[u] = header.weight;
            for entry in &entries[pos..pos + header.degree as usize] {
                targets.push(entry.dst as NodeId);
                edge_weights.push(entry.weight);
            }
            pos += header.degree as usize;
            u += 1;
        }
    }
    debug_assert_eq!(u, n);

    Some(CsrGraph::new(offsets, targets, node_weights, edge_weights, false))
}

/// Runs the initial partitioner on rank 0 and scatters each rank its label
/// slice.
fn initial_partition_on_root<C: Communicator>(
    dist: &DistributedGraph,
    ctx: &Context,
    comm: &C,
) -> Vec<BlockId> {
    let gathered = gather_to_root(dist, comm);
    let size = comm.size();

    let outgoing: Vec<Vec<u8>> = if let Some(coarsest) = gathered {
        let shm_graph = crate::graph::Graph::Csr(coarsest);
        let labels =
            initial::initial_partition(&shm_graph, ctx, ctx.partition.k, ctx.seed);
        info!(
            "initial partition on root: cut {}",
            crate::metrics::edge_cut(&shm_graph, &labels)
        );

        (0..size)
            .map(|r| {
                let begin = dist.node_distribution()[r] as usize;
                let end = dist.node_distribution()[r + 1] as usize;
                let mut buf = Vec::new();
                for &b in &labels[begin..end] {
                    buf.extend_from_slice(bytemuck::bytes_of(&BlockMessage {
                        block: b as u64,
                    }));
                }
                buf
            })
            .collect()
    } else {
        vec![Vec::new(); size]
    };

    let incoming = comm.exchange(outgoing);
    bytemuck::pod_collect_to_vec::<u8, BlockMessage>(&incoming[0])
        .iter()
        .map(|msg| msg.block as BlockId)
        .collect()
}

/// Distributed multilevel partitioning. Collective: every rank calls with
/// its slice of the graph and the same configuration.
pub fn partition<C: Communicator>(
    dist_graph: &DistributedGraph,
    ctx: &Context,
    comm: &C,
) -> Result<DistPartition, Error> {
    let k = ctx.partition.k;
    if k == 0 || (k as GlobalNodeId) > dist_graph.global_n().max(1) {
        return Err(Error::InvalidBlockCount { k });
    }

    let p_ctx = PartitionContext {
        k,
        epsilon: ctx.partition.epsilon,
        total_node_weight: dist_graph.global_total_node_weight(comm),
    };

    let mut coarsener = DistCoarsener::new(dist_graph, ctx, comm);
    let limit = (k * ctx.initial_partitioning.coarsest_limit_per_block) as GlobalNodeId;
    loop {
        let prev = coarsener.coarsest().global_n();
        if prev <= limit.max(k as GlobalNodeId) {
            break;
        }
        let before = coarsener.level();
        if coarsener.coarsen_once() == before {
            break;
        }
    }
    info!(
        "distributed coarsening: {} -> {} nodes over {} levels",
        dist_graph.global_n(),
        coarsener.coarsest().global_n(),
        coarsener.level()
    );

    let coarsest = coarsener.coarsest();
    let owned_labels = initial_partition_on_root(coarsest, ctx, comm);
    let mut labels = owned_labels;
    labels.resize(coarsest.total_n(), 0);
    let mut p = DistPartition::new(coarsest, comm, k, labels);
    p.sync_ghost_labels(coarsest, comm, |_| true);

    let mut jet = DistJetRefiner::new(ctx);
    jet.initialize(coarsener.coarsest());
    jet.refine(coarsener.coarsest(), &p, &p_ctx, comm);

    while coarsener.level() > 0 {
        p = coarsener.uncoarsen_once(p);
        jet.initialize(coarsener.coarsest());
        jet.refine(coarsener.coarsest(), &p, &p_ctx, comm);
    }

    let mut balancer = DistBalancer::new(ctx.refinement.balancer.clone());
    balancer.refine(coarsener.coarsest(), &p, &p_ctx, comm);

    Ok(p)
}
