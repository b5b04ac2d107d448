//! parcut — a multilevel graph partitioner.
//!
//! Given an undirected, weighted graph and a target block count `k` with
//! balance tolerance `epsilon`, the partitioner computes a mapping from nodes
//! to blocks that minimizes the weight of cut edges while keeping every block
//! below `(1 + epsilon)` times the average block weight.
//!
//! The crate ships two engines: a shared-memory engine parallelized with
//! rayon, and a message-passing engine layered on the thin
//! [`dist::Communicator`] contract. Both run the same multilevel scheme:
//! coarsen the graph through a hierarchy of clusterings, partition the
//! coarsest level, then project the partition back level by level while
//! refining it with label propagation, localized FM searches, JET, and a
//! rebalancer.

pub mod coarsening;
pub mod context;
pub mod datastructures;
pub mod dist;
pub mod gen_weights;
pub mod graph;
pub mod initial;
pub mod io;
pub mod metrics;
pub mod partition;
pub mod refinement;
pub mod scheme;

/// Node id local to a graph, `0..n`.
pub type NodeId = usize;
/// Edge id local to a graph, `0..2m` (both directions are materialized).
pub type EdgeId = usize;
/// Block id of a partition, `0..k`.
pub type BlockId = usize;
/// Global node id in the message-passing engine.
pub type GlobalNodeId = u64;

pub type NodeWeight = i64;
pub type EdgeWeight = i64;
pub type BlockWeight = i64;

/// Sentinel for "no node" / "unassigned".
pub const INVALID_NODE: NodeId = usize::MAX;
/// Sentinel for "no block".
pub const INVALID_BLOCK: BlockId = usize::MAX;

// The `Partition` trait allows for partitioning data.
// Partitioning algorithms implement this trait.
// The generic argument `M` defines the input of the algorithms (e.g. a graph
// or a graph plus node weights).
// The input partition must be of the correct size and its contents may or may
// not be used by the algorithms.
pub trait Partition<M> {
    // Diagnostic data returned for a specific run of the algorithm.
    type Metadata;

    // Error details, should the algorithm fail to run.
    type Error;

    // Partition the given data and output the part ID of each element in
    // `part_ids`.
    //
    // Part IDs must be contiguous and start from zero, meaning the number of
    // parts is one plus the maximum of `part_ids`.  If a lower ID does not
    // appear in the array, the part is assumed to be empty.
    fn partition(&mut self, part_ids: &mut [usize], data: M)
                 -> Result<Self::Metadata, Self::Error>;
}

pub use graph::{CsrGraph, Graph};
pub use partition::PartitionedGraph;
pub use scheme::MultilevelPartitioner;
