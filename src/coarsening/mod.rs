//! Builds and manages a hierarchy of coarse graphs.
//!
//! The coarsener owns the stack of coarse graphs plus one fine-to-coarse
//! mapping per level. Levels are appended by [`Coarsener::coarsen_once`] and
//! popped in LIFO order by [`Coarsener::uncoarsen_once`], which projects a
//! partition of the coarsest graph one level down.

pub mod contraction;
pub mod lp_clustering;
pub mod matching;

pub use contraction::contract_clustering;
pub use lp_clustering::label_propagation_clustering;
pub use matching::heavy_edge_matching;

use log::debug;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::context::Context;
use crate::graph::Graph;
use crate::partition::PartitionedGraph;
use crate::{NodeId, NodeWeight};

/// Cluster id per node; ids are arbitrary node ids, densified on contraction.
pub type Clustering = Vec<NodeId>;

pub struct Coarsener<'a> {
    input: &'a Graph,
    ctx: &'a Context,
    hierarchy: Vec<Graph>,
    mappings: Vec<Vec<NodeId>>,
    local_clustering_converged: bool,
}

impl<'a> Coarsener<'a> {
    pub fn new(input: &'a Graph, ctx: &'a Context) -> Self {
        Self {
            input,
            ctx,
            hierarchy: Vec::new(),
            mappings: Vec::new(),
            local_clustering_converged: false,
        }
    }

    /// Number of coarse levels built so far.
    pub fn level(&self) -> usize {
        self.hierarchy.len()
    }

    /// The current coarsest graph; the input graph at level zero.
    pub fn coarsest(&self) -> &Graph {
        self.hierarchy.last().unwrap_or(self.input)
    }

    /// Maximum cluster weight for the next contraction.
    pub fn max_cluster_weight(&self) -> NodeWeight {
        let graph = self.coarsest();
        self.ctx.coarsening.max_cluster_weight(
            graph.n(),
            graph.total_node_weight(),
            &self.ctx.partition,
        )
    }

    /// Coarsens one level with the derived cluster weight cap.
    pub fn coarsen_once(&mut self) -> &Graph {
        self.coarsen_once_with(self.max_cluster_weight())
    }

    /// Tries to append one coarse level. Local clustering runs until it stops
    /// making progress, then the coarsener switches to global clustering for
    /// good. Returns the current coarsest graph if coarsening has converged.
    pub fn coarsen_once_with(&mut self, max_cluster_weight: NodeWeight) -> &Graph {
        if self.level() >= self.ctx.coarsening.max_global_clustering_levels {
            return self.coarsest();
        }
        if self.level() >= self.ctx.coarsening.max_local_clustering_levels {
            self.local_clustering_converged = true;
        }

        if !self.local_clustering_converged {
            if self.coarsen_once_local(max_cluster_weight) {
                return self.coarsest();
            }
            // The switch is sticky: once local clustering stalls, later
            // levels go straight to global clustering.
            self.local_clustering_converged = true;
        }

        self.coarsen_once_global(max_cluster_weight);
        self.coarsest()
    }

    fn coarsen_once_local(&mut self, max_cluster_weight: NodeWeight) -> bool {
        debug!("coarsening level {} with local clustering", self.level());

        let mut rng = SmallRng::seed_from_u64(self.level_seed());
        let clustering = heavy_edge_matching(self.coarsest(), max_cluster_weight, &mut rng);
        self.try_contract(&clustering)
    }

    fn coarsen_once_global(&mut self, max_cluster_weight: NodeWeight) -> bool {
        debug!("coarsening level {} with global clustering", self.level());

        let clustering = label_propagation_clustering(
            self.coarsest(),
            max_cluster_weight,
            self.ctx.coarsening.lp_num_iterations,
        );
        self.try_contract(&clustering)
    }

    /// Contracts `clustering` and keeps the result only if it shrinks the
    /// graph enough.
    fn try_contract(&mut self, clustering: &Clustering) -> bool {
        let fine_n = self.coarsest().n();
        let (coarse, mapping) = contract_clustering(self.coarsest(), clustering);

        if coarse.n() as f64 / fine_n as f64 >= self.ctx.coarsening.convergence_threshold {
            debug!(
                "discarding contraction {} -> {}: insufficient shrinkage",
                fine_n,
                coarse.n()
            );
            return false;
        }

        debug!("contracted {} -> {} nodes", fine_n, coarse.n());
        if self.ctx.debug.save_clustering_hierarchy {
            let _ = crate::io::write_hierarchy_level(
                &self.ctx.debug.dump_prefix,
                self.level(),
                fine_n,
                coarse.n(),
                &mapping,
            );
        }

        self.hierarchy.push(Graph::Csr(coarse));
        self.mappings.push(mapping);
        true
    }

    /// Projects a partition of the coarsest graph one level down and pops the
    /// top hierarchy entry. The returned partition is re-seated on the new
    /// coarsest graph.
    pub fn uncoarsen_once(&mut self, p_graph: PartitionedGraph) -> PartitionedGraph {
        debug_assert!(!self.hierarchy.is_empty(), "no level to uncoarsen");

        let mapping = self.mappings.pop().expect("mapping per level");
        self.hierarchy.pop();
        let finer = self.coarsest();

        let coarse_blocks = p_graph.copy_partition();
        let blocks: Vec<_> = (0..finer.n())
            .into_par_iter()
            .map(|v| coarse_blocks[mapping[v]])
            .collect();

        PartitionedGraph::new(finer, p_graph.k(), blocks)
    }

    fn level_seed(&self) -> u64 {
        self.ctx.seed ^ (self.level() as u64).wrapping_mul(0x517c_c1b7_2722_0a95)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CsrGraph;

    fn grid_graph(side: NodeId) -> Graph {
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

    #[test]
    fn test_coarsen_once_appends_one_level_or_none() {
        // Arrange
        let graph = grid_graph(8);
        let ctx = Context::default();
        let mut coarsener = Coarsener::new(&graph, &ctx);

        // Act
        let before = coarsener.level();
        coarsener.coarsen_once_with(1000);
        let after = coarsener.level();

        // Assert
        assert!(after == before || after == before + 1);
        assert!(coarsener.coarsest().n() <= graph.n());
    }

    #[test]
    fn test_hierarchy_shrinks_until_convergence() {
        // Arrange
        let graph = grid_graph(8);
        let ctx = Context::default();
        let mut coarsener = Coarsener::new(&graph, &ctx);

        // Act
        let mut prev = graph.n();
        loop {
            let coarse_n = coarsener.coarsen_once_with(1000).n();
            if coarse_n == prev {
                break;
            }
            assert!((coarse_n as f64) < 0.95 * prev as f64);
            prev = coarse_n;
        }

        // Assert
        assert!(coarsener.level() >= 1);
        assert!(coarsener.coarsest().n() < graph.n());
    }

    #[test]
    fn test_uncoarsen_projects_blocks_through_the_mapping() {
        // Arrange
        let graph = grid_graph(4);
        let ctx = Context::default();
        let mut coarsener = Coarsener::new(&graph, &ctx);
        coarsener.coarsen_once_with(1000);
        assert_eq!(coarsener.level(), 1);

        let coarse = coarsener.coarsest();
        let blocks: Vec<_> = (0..coarse.n()).map(|u| u % 2).collect();
        let p_coarse = PartitionedGraph::new(coarse, 2, blocks.clone());
        let coarse_weight_total: i64 = p_coarse.block_weights().iter().sum();

        // Act
        let p_fine = coarsener.uncoarsen_once(p_coarse);

        // Assert: one level popped, same k, weights re-derived on the finer graph
        assert_eq!(coarsener.level(), 0);
        assert_eq!(p_fine.k(), 2);
        assert_eq!(p_fine.n(), graph.n());
        let fine_weight_total: i64 = p_fine.block_weights().iter().sum();
        assert_eq!(fine_weight_total, coarse_weight_total);
        assert!(p_fine.validate(&graph));
    }
}
