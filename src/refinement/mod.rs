//! The refinement ladder.
//!
//! Refiners share a two-call surface: [`Refiner::initialize`] sizes internal
//! buffers for a graph, [`Refiner::refine`] improves a partition in place and
//! reports whether it found an improvement. The orchestrator builds one
//! concrete refiner per configured algorithm through [`create_refiner`].

pub mod balancer;
pub mod fm;
pub mod gains;
pub mod jet;
pub mod lp;

pub use balancer::GreedyBalancer;
pub use fm::FmRefiner;
pub use gains::{
    compute_max_gainer, DeltaGainCache, DenseGainCache, GainCache, MaxGainer,
    OnTheFlyGainCache,
};
pub use jet::JetRefiner;
pub use lp::LabelPropagationRefiner;

use crate::context::{Context, PartitionContext, RefinementAlgorithm};
use crate::graph::Graph;
use crate::partition::PartitionedGraph;

pub trait Refiner {
    /// Prepares internal buffers for `graph`. Must be called before
    /// [`refine`](Self::refine) whenever the graph changes.
    fn initialize(&mut self, graph: &Graph);

    /// Improves the partition in place; returns true on improvement.
    fn refine(
        &mut self,
        graph: &Graph,
        p_graph: &mut PartitionedGraph,
        p_ctx: &PartitionContext,
    ) -> bool;
}

/// Constructs the refiner for one ladder entry.
pub fn create_refiner(ctx: &Context, algorithm: RefinementAlgorithm) -> Box<dyn Refiner> {
    match algorithm {
        RefinementAlgorithm::LabelPropagation => {
            Box::new(LabelPropagationRefiner::new(ctx.refinement.lp.clone(), ctx.seed))
        }
        RefinementAlgorithm::Fm => Box::new(FmRefiner::new(ctx.refinement.fm.clone(), ctx.seed)),
        RefinementAlgorithm::Jet => Box::new(JetRefiner::new(ctx)),
        RefinementAlgorithm::Greedy => {
            Box::new(GreedyBalancer::new(ctx.refinement.balancer.clone()))
        }
    }
}
