//! Distributed graph: one contiguous slice of the node set per rank, plus
//! ghost copies of remote endpoints.
//!
//! Locally, owned nodes come first (`0..n_owned`) followed by the ghosts.
//! Only owned nodes carry adjacency rows; their targets are local ids that
//! may point at ghosts. `node_distribution` and `edge_distribution` are
//! length `R + 1` prefix sums over the global graph.

use bytemuck::{Pod, Zeroable};
use rustc_hash::FxHashMap;

use super::communicator::Communicator;
use crate::graph::{CsrGraph, Graph};
use crate::partition::PartitionedGraph;
use crate::{BlockId, BlockWeight, EdgeId, EdgeWeight, GlobalNodeId, NodeId, NodeWeight};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GhostAnnouncement {
    global: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GhostWeight {
    weight: i64,
}

pub struct DistributedGraph {
    graph: Graph,
    n_owned: NodeId,
    node_distribution: Vec<GlobalNodeId>,
    edge_distribution: Vec<u64>,
    ghost_to_global: Vec<GlobalNodeId>,
    global_to_ghost: FxHashMap<GlobalNodeId, NodeId>,
    ghost_owner: Vec<usize>,
    /// Per peer rank: owned nodes that rank holds as ghosts, in the order the
    /// peer announced them.
    mirrors: Vec<Vec<NodeId>>,
    rank: usize,
}

impl DistributedGraph {
    /// Assembles the rank-local part from rows with global target ids.
    /// `rows[u]` holds the neighbors of owned node `u` as `(global_id,
    /// weight)` pairs; ghost node weights are fetched from the owning ranks.
    /// Collective: every rank must call this once.
    pub fn assemble<C: Communicator>(
        comm: &C,
        node_distribution: Vec<GlobalNodeId>,
        rows: Vec<Vec<(GlobalNodeId, EdgeWeight)>>,
        node_weights: Vec<NodeWeight>,
    ) -> Self {
        let rank = comm.rank();
        let size = comm.size();
        debug_assert_eq!(node_distribution.len(), size + 1);

        let offset = node_distribution[rank];
        let n_owned = (node_distribution[rank + 1] - offset) as NodeId;
        debug_assert_eq!(rows.len(), n_owned);

        let owner_of = |g: GlobalNodeId| -> usize {
            node_distribution.partition_point(|&off| off <= g) - 1
        };

        // Register ghosts in first-appearance order.
        let mut ghost_to_global = Vec::new();
        let mut global_to_ghost: FxHashMap<GlobalNodeId, NodeId> = FxHashMap::default();
        let mut ghost_owner = Vec::new();
        let mut local_rows: Vec<Vec<(NodeId, EdgeWeight)>> = Vec::with_capacity(n_owned);
        for row in &rows {
            let mut local_row = Vec::with_capacity(row.len());
            for &(g, w) in row {
                let local = if (offset..node_distribution[rank + 1]).contains(&g) {
                    (g - offset) as NodeId
                } else {
                    let next_id = n_owned + ghost_to_global.len();
                    *global_to_ghost.entry(g).or_insert_with(|| {
                        ghost_to_global.push(g);
                        ghost_owner.push(owner_of(g));
                        next_id
                    })
                };
                local_row.push((local, w));
            }
            local_rows.push(local_row);
        }

        let n_ghost = ghost_to_global.len();
        let total_n = n_owned + n_ghost;

        let mut offsets = vec![0 as EdgeId; total_n + 1];
        for u in 0..n_owned {
            offsets[u + 1] = offsets[u] + local_rows[u].len();
        }
        for u in n_owned..total_n {
            offsets[u + 1] = offsets[u];
        }
        let m = offsets[n_owned];
        let mut targets = vec![0 as NodeId; m];
        let mut edge_weights = vec![0 as EdgeWeight; m];
        for (u, row) in local_rows.iter().enumerate() {
            for (i, &(v, w)) in row.iter().enumerate() {
                targets[offsets[u] + i] = v;
                edge_weights[offsets[u] + i] = w;
            }
        }

        // Announce ghosts to their owners so each rank knows its mirrors.
        let mut announcements: Vec<Vec<u8>> = vec![Vec::new(); size];
        for (i, &g) in ghost_to_global.iter().enumerate() {
            let owner = ghost_owner[i];
            announcements[owner]
                .extend_from_slice(bytemuck::bytes_of(&GhostAnnouncement { global: g }));
        }
        let incoming = comm.exchange(announcements);
        let mirror_globals: Vec<Vec<GlobalNodeId>> = incoming
            .into_iter()
            .map(|buf| {
                bytemuck::pod_collect_to_vec::<u8, GhostAnnouncement>(&buf)
                    .iter()
                    .map(|a| a.global)
                    .collect()
            })
            .collect();
        let mirrors: Vec<Vec<NodeId>> = mirror_globals
            .iter()
            .map(|globals| globals.iter().map(|&g| (g - offset) as NodeId).collect())
            .collect();

        // Answer the same announcements with the node weights the peers are
        // missing for their ghost copies.
        let weight_of = |u: NodeId| -> NodeWeight {
            if node_weights.is_empty() {
                1
            } else {
                node_weights[u]
            }
        };
        let weight_replies: Vec<Vec<u8>> = mirrors
            .iter()
            .map(|mirrored| {
                let mut buf = Vec::new();
                for &u in mirrored {
                    buf.extend_from_slice(bytemuck::bytes_of(&GhostWeight {
                        weight: weight_of(u),
                    }));
                }
                buf
            })
            .collect();
        let weight_incoming = comm.exchange(weight_replies);

        // Replies arrive in announcement order per owner rank.
        let mut ghost_weights = vec![1 as NodeWeight; n_ghost];
        for (owner, buf) in weight_incoming.iter().enumerate() {
            let weights = bytemuck::pod_collect_to_vec::<u8, GhostWeight>(buf);
            let mut i = 0;
            for (ghost, &g_owner) in ghost_owner.iter().enumerate() {
                if g_owner == owner {
                    ghost_weights[ghost] = weights[i].weight;
                    i += 1;
                }
            }
        }

        let mut all_node_weights = node_weights;
        if !all_node_weights.is_empty() || n_ghost > 0 {
            if all_node_weights.is_empty() {
                all_node_weights = vec![1; n_owned];
            }
            all_node_weights.extend_from_slice(&ghost_weights);
        }

        let graph =
            Graph::Csr(CsrGraph::new(offsets, targets, all_node_weights, edge_weights, false));

        let mut local_m = vec![0i64; size];
        local_m[rank] = m as i64;
        comm.allreduce_sum(&mut local_m);
        let mut edge_distribution = vec![0u64; size + 1];
        for r in 0..size {
            edge_distribution[r + 1] = edge_distribution[r] + local_m[r] as u64;
        }

        Self {
            graph,
            n_owned,
            node_distribution,
            edge_distribution,
            ghost_to_global,
            global_to_ghost,
            ghost_owner,
            mirrors,
            rank,
        }
    }

    /// Splits a global graph into contiguous rank slices. Every rank calls
    /// this with the same graph; useful for tests and single-host runs.
    pub fn distribute<C: Communicator>(global: &CsrGraph, comm: &C) -> Self {
        let size = comm.size();
        let rank = comm.rank();
        let n = global.n();

        let node_distribution: Vec<GlobalNodeId> =
            (0..=size).map(|r| (r * n / size) as GlobalNodeId).collect();
        let begin = node_distribution[rank] as NodeId;
        let end = node_distribution[rank + 1] as NodeId;

        let rows: Vec<Vec<(GlobalNodeId, EdgeWeight)>> = (begin..end)
            .map(|u| {
                global
                    .neighbors(u)
                    .map(|(e, v)| (v as GlobalNodeId, global.edge_weight(e)))
                    .collect()
            })
            .collect();
        let node_weights: Vec<NodeWeight> = if global.has_node_weights() {
            (begin..end).map(|u| global.node_weight(u)).collect()
        } else {
            Vec::new()
        };

        Self::assemble(comm, node_distribution, rows, node_weights)
    }

    pub fn local(&self) -> &Graph {
        &self.graph
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Owned node count of this rank.
    pub fn n_owned(&self) -> NodeId {
        self.n_owned
    }

    /// Owned plus ghost nodes.
    pub fn total_n(&self) -> NodeId {
        self.graph.n()
    }

    pub fn global_n(&self) -> GlobalNodeId {
        *self.node_distribution.last().expect("non-empty distribution")
    }

    pub fn global_m(&self) -> u64 {
        *self.edge_distribution.last().expect("non-empty distribution")
    }

    pub fn node_distribution(&self) -> &[GlobalNodeId] {
        &self.node_distribution
    }

    pub fn edge_distribution(&self) -> &[u64] {
        &self.edge_distribution
    }

    pub fn is_owned(&self, u: NodeId) -> bool {
        u < self.n_owned
    }

    pub fn local_to_global(&self, u: NodeId) -> GlobalNodeId {
        if self.is_owned(u) {
            self.node_distribution[self.rank] + u as GlobalNodeId
        } else {
            self.ghost_to_global[u - self.n_owned]
        }
    }

    pub fn global_to_local(&self, g: GlobalNodeId) -> Option<NodeId> {
        let offset = self.node_distribution[self.rank];
        if (offset..self.node_distribution[self.rank + 1]).contains(&g) {
            Some((g - offset) as NodeId)
        } else {
            self.global_to_ghost.get(&g).copied()
        }
    }

    pub fn ghost_owner(&self, u: NodeId) -> usize {
        debug_assert!(!self.is_owned(u));
        self.ghost_owner[u - self.n_owned]
    }

    pub fn owner_of_global(&self, g: GlobalNodeId) -> usize {
        self.node_distribution.partition_point(|&off| off <= g) - 1
    }

    /// Peer ranks holding ghosts of our owned nodes, with the nodes they
    /// mirror.
    pub fn mirrors(&self) -> &[Vec<NodeId>] {
        &self.mirrors
    }

    /// Total node weight over owned nodes of all ranks.
    pub fn global_total_node_weight<C: Communicator>(&self, comm: &C) -> NodeWeight {
        let mut buf =
            [(0..self.n_owned).map(|u| self.graph.node_weight(u)).sum::<NodeWeight>()];
        comm.allreduce_sum(&mut buf);
        buf[0]
    }
}

/// Partition state of a distributed graph: labels for owned and ghost nodes,
/// plus the replicated global block weights.
pub struct DistPartition {
    /// Labels over `total_n` local nodes; block weights in here are *local*
    /// bookkeeping only and are overridden by [`sync_block_weights`].
    ///
    /// [`sync_block_weights`]: DistPartition::sync_block_weights
    inner: PartitionedGraph,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LabelMessage {
    global: u64,
    block: u64,
}

impl DistPartition {
    /// Wraps a local label assignment and establishes the global block
    /// weights with one reduction.
    pub fn new<C: Communicator>(
        dist: &DistributedGraph,
        comm: &C,
        k: BlockId,
        blocks: Vec<BlockId>,
    ) -> Self {
        debug_assert_eq!(blocks.len(), dist.total_n());
        let inner = PartitionedGraph::new(dist.local(), k, blocks);
        let p = Self { inner };
        p.sync_block_weights(dist, comm);
        p
    }

    pub fn k(&self) -> BlockId {
        self.inner.k()
    }

    pub fn block(&self, u: NodeId) -> BlockId {
        self.inner.block(u)
    }

    pub fn set_block(&self, dist: &DistributedGraph, u: NodeId, to: BlockId) {
        self.inner.set_block(dist.local(), u, to)
    }

    pub fn set_block_unchecked(&self, u: NodeId, to: BlockId) {
        self.inner.set_block_unchecked(u, to)
    }

    pub fn block_weight(&self, b: BlockId) -> BlockWeight {
        self.inner.block_weight(b)
    }

    pub fn block_weights(&self) -> Vec<BlockWeight> {
        self.inner.block_weights()
    }

    pub fn inner(&self) -> &PartitionedGraph {
        &self.inner
    }

    pub fn copy_partition(&self) -> Vec<BlockId> {
        self.inner.copy_partition()
    }

    /// Restores labels and weights from a snapshot.
    pub fn restore(&self, blocks: &[BlockId], weights: &[BlockWeight]) {
        self.inner.restore(blocks, weights);
    }

    /// Overwrites the replicated global block weights; every rank must pass
    /// the same values.
    pub fn set_block_weights(&self, weights: &[BlockWeight]) {
        for (b, &w) in weights.iter().enumerate() {
            self.inner.set_block_weight(b, w);
        }
    }

    /// Reduces per-rank weight deltas and applies them to the replicated
    /// block weights. `deltas` is consumed and holds the reduced sums on
    /// return.
    pub fn apply_block_weight_deltas<C: Communicator>(
        &self,
        comm: &C,
        deltas: &mut [BlockWeight],
    ) {
        comm.allreduce_sum(deltas);
        for (b, &delta) in deltas.iter().enumerate() {
            if delta != 0 {
                self.inner.add_block_weight(b, delta);
            }
        }
    }

    pub fn is_feasible(&self, p_ctx: &crate::context::PartitionContext) -> bool {
        crate::metrics::is_feasible(&self.block_weights(), p_ctx)
    }

    /// Recomputes the global block weights from owned nodes.
    pub fn sync_block_weights<C: Communicator>(&self, dist: &DistributedGraph, comm: &C) {
        let mut weights = vec![0 as BlockWeight; self.k()];
        for u in 0..dist.n_owned() {
            weights[self.block(u)] += dist.local().node_weight(u);
        }
        comm.allreduce_sum(&mut weights);
        for (b, &w) in weights.iter().enumerate() {
            self.inner.set_block_weight(b, w);
        }
    }

    /// Sends the labels of owned nodes selected by `changed` to every rank
    /// that mirrors them, and applies incoming labels to ghosts.
    pub fn sync_ghost_labels<C: Communicator>(
        &self,
        dist: &DistributedGraph,
        comm: &C,
        changed: impl Fn(NodeId) -> bool,
    ) {
        let outgoing: Vec<Vec<u8>> = dist
            .mirrors()
            .iter()
            .map(|mirrored| {
                let mut buf = Vec::new();
                for &u in mirrored {
                    if changed(u) {
                        buf.extend_from_slice(bytemuck::bytes_of(&LabelMessage {
                            global: dist.local_to_global(u),
                            block: self.block(u) as u64,
                        }));
                    }
                }
                buf
            })
            .collect();

        for buf in comm.exchange(outgoing) {
            for msg in &bytemuck::pod_collect_to_vec::<u8, LabelMessage>(&buf) {
                let local = dist
                    .global_to_local(msg.global)
                    .expect("label update for unknown ghost");
                self.inner.set_block_unchecked(local, msg.block as BlockId);
            }
        }
    }

    /// Edge cut over all ranks; every directed cut edge is seen exactly once
    /// per endpoint owner, so the reduced sum halves to the undirected cut.
    pub fn global_edge_cut<C: Communicator>(
        &self,
        dist: &DistributedGraph,
        comm: &C,
    ) -> EdgeWeight {
        let graph = dist.local();
        let mut local = 0;
        for u in 0..dist.n_owned() {
            let b_u = self.block(u);
            for (e, v) in graph.neighbors(u) {
                if self.block(v) != b_u {
                    local += graph.edge_weight(e);
                }
            }
        }
        let mut buf = [local];
        comm.allreduce_sum(&mut buf);
        buf[0] / 2
    }
}
