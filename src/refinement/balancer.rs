//! Balancing refinement: migrates weight out of overloaded blocks.
//!
//! The balancer grows connected move sets around seed nodes in overloaded
//! blocks, trims each set back to its best prefix, and then applies sets in
//! order of relative gain as long as the target block has room. Rounds repeat
//! until every block respects its cap or no further progress is possible.

use log::debug;

use super::Refiner;
use crate::context::{BalancerContext, PartitionContext};
use crate::datastructures::BinaryMaxHeap;
use crate::graph::Graph;
use crate::metrics;
use crate::partition::PartitionedGraph;
use crate::{BlockId, EdgeWeight, NodeId, NodeWeight, INVALID_BLOCK, INVALID_NODE};

/// Connected subsets of single blocks, selected as atomic migration units.
/// Set `s` occupies `move_sets[move_set_indices[s]..move_set_indices[s + 1]]`.
pub struct MoveSets {
    pub node_to_move_set: Vec<NodeId>,
    pub move_sets: Vec<NodeId>,
    pub move_set_indices: Vec<NodeId>,
    /// Source block per set.
    pub blocks: Vec<BlockId>,
    /// Best target block per set; never the source block.
    pub targets: Vec<BlockId>,
    /// Weighted connection towards the target minus the connection kept in
    /// the source block, per set.
    pub gains: Vec<EdgeWeight>,
}

impl MoveSets {
    pub fn num_sets(&self) -> usize {
        self.move_set_indices.len() - 1
    }

    pub fn size(&self, set: usize) -> NodeId {
        debug_assert!(set + 1 < self.move_set_indices.len());
        self.move_set_indices[set + 1] - self.move_set_indices[set]
    }

    pub fn nodes(&self, set: usize) -> &[NodeId] {
        &self.move_sets[self.move_set_indices[set]..self.move_set_indices[set + 1]]
    }

    pub fn weight(&self, graph: &Graph, set: usize) -> NodeWeight {
        self.nodes(set).iter().map(|&u| graph.node_weight(u)).sum()
    }
}

/// Grows one move set at a time: a max-heap frontier keyed by the connection
/// of candidates to the growing set, plus a per-block connection heap that
/// tracks the best migration target of the current prefix.
pub struct MoveSetBuilder<'a> {
    graph: &'a Graph,
    p_graph: &'a PartitionedGraph,
    p_ctx: &'a PartitionContext,
    /// Nodes at or beyond this id are observed but never added to a set; the
    /// message-passing engine passes its owned-node count here.
    movable_limit: NodeId,

    node_to_move_set: Vec<NodeId>,
    move_sets: Vec<NodeId>,
    move_set_indices: Vec<NodeId>,
    blocks: Vec<BlockId>,
    targets: Vec<BlockId>,
    gains: Vec<EdgeWeight>,

    frontier: BinaryMaxHeap<EdgeWeight>,
    cur_conns: BinaryMaxHeap<EdgeWeight>,
    cur_block: BlockId,
    cur_block_conn: EdgeWeight,
    cur_weight: NodeWeight,
    cur_pos: NodeId,
    cur_move_set: NodeId,

    best_prefix_pos: NodeId,
    best_prefix_block: BlockId,
    best_prefix_conn: EdgeWeight,
    best_prefix_block_conn: EdgeWeight,
}

impl<'a> MoveSetBuilder<'a> {
    pub fn new(
        graph: &'a Graph,
        p_graph: &'a PartitionedGraph,
        p_ctx: &'a PartitionContext,
        movable_limit: NodeId,
    ) -> Self {
        let n = graph.n();
        Self {
            graph,
            p_graph,
            p_ctx,
            movable_limit,
            node_to_move_set: vec![INVALID_NODE; n],
            move_sets: vec![INVALID_NODE; n],
            move_set_indices: vec![0],
            blocks: Vec::new(),
            targets: Vec::new(),
            gains: Vec::new(),
            frontier: BinaryMaxHeap::new(n),
            cur_conns: BinaryMaxHeap::new(p_graph.k()),
            cur_block: INVALID_BLOCK,
            cur_block_conn: 0,
            cur_weight: 0,
            cur_pos: 0,
            cur_move_set: 0,
            best_prefix_pos: 0,
            best_prefix_block: INVALID_BLOCK,
            best_prefix_conn: 0,
            best_prefix_block_conn: 0,
        }
    }

    pub fn build(mut self, max_move_set_weight: NodeWeight) -> MoveSets {
        for u in 0..self.movable_limit {
            let b_u = self.p_graph.block(u);
            if self.p_graph.block_weight(b_u) > self.p_ctx.max_block_weight(b_u)
                && self.node_to_move_set[u] == INVALID_NODE
            {
                self.grow_move_set(u, max_move_set_weight);
            }
        }
        self.finalize()
    }

    fn grow_move_set(&mut self, seed: NodeId, max_weight: NodeWeight) {
        debug_assert_eq!(self.node_to_move_set[seed], INVALID_NODE);

        self.cur_block = self.p_graph.block(seed);
        self.reset_cur_conns();

        self.frontier.push(seed, 0);
        while !self.frontier.is_empty() && self.cur_weight < max_weight {
            let (u, _) = self.frontier.pop().expect("frontier non-empty");
            self.add_to_move_set(u);

            for (e, v) in self.graph.neighbors(u) {
                if v < self.movable_limit
                    && self.p_graph.block(v) == self.cur_block
                    && self.node_to_move_set[v] == INVALID_NODE
                {
                    let w = self.graph.edge_weight(e);
                    if self.frontier.contains(v) {
                        let key = self.frontier.key(v) + w;
                        self.frontier.change_priority(v, key);
                    } else {
                        self.frontier.push(v, w);
                    }
                }
            }
        }
        self.frontier.clear();

        self.finish_move_set();
    }

    fn add_to_move_set(&mut self, u: NodeId) {
        debug_assert_eq!(self.cur_block, self.p_graph.block(u));

        self.cur_weight += self.graph.node_weight(u);
        self.node_to_move_set[u] = self.cur_move_set;
        self.move_sets[self.cur_pos] = u;
        self.cur_pos += 1;

        for (e, v) in self.graph.neighbors(u) {
            let w = self.graph.edge_weight(e);
            if v < self.movable_limit && self.node_to_move_set[v] == self.cur_move_set {
                // Edge became internal to the set.
                self.cur_block_conn -= w;
            } else {
                let b_v = self.p_graph.block(v);
                if b_v == self.cur_block {
                    self.cur_block_conn += w;
                } else {
                    let key = self.cur_conns.key(b_v) + w;
                    self.cur_conns.change_priority(b_v, key);
                }
            }
        }

        // Later prefixes win ties, so a set that merely matches an earlier
        // connection still grows.
        if self.cur_conns.peek_key() >= self.best_prefix_conn {
            self.best_prefix_block = self.cur_conns.peek_id();
            self.best_prefix_conn = self.cur_conns.peek_key();
            self.best_prefix_pos = self.cur_pos;
            self.best_prefix_block_conn = self.cur_block_conn;
        }
    }

    fn finish_move_set(&mut self) {
        // Trim the tail past the best prefix; trimmed nodes become seeds for
        // later sets again.
        for pos in self.best_prefix_pos..self.cur_pos {
            self.node_to_move_set[self.move_sets[pos]] = INVALID_NODE;
        }
        self.cur_pos = self.best_prefix_pos;

        if self.cur_pos > *self.move_set_indices.last().expect("non-empty indices") {
            debug_assert_ne!(self.best_prefix_block, self.cur_block);
            self.move_set_indices.push(self.cur_pos);
            self.blocks.push(self.cur_block);
            self.targets.push(self.best_prefix_block);
            self.gains.push(self.best_prefix_conn - self.best_prefix_block_conn);
            self.cur_move_set += 1;
        }

        self.cur_block = INVALID_BLOCK;
        self.cur_block_conn = 0;
        self.cur_weight = 0;
        self.best_prefix_conn = 0;
        self.best_prefix_block = INVALID_BLOCK;
        self.best_prefix_pos = self.cur_pos;
        self.best_prefix_block_conn = 0;
    }

    fn finalize(mut self) -> MoveSets {
        self.move_sets.truncate(self.cur_pos);
        MoveSets {
            node_to_move_set: self.node_to_move_set,
            move_sets: self.move_sets,
            move_set_indices: self.move_set_indices,
            blocks: self.blocks,
            targets: self.targets,
            gains: self.gains,
        }
    }

    // Candidate targets are every block except the source block, so the heap
    // maximum is always a legal migration target.
    fn reset_cur_conns(&mut self) {
        self.cur_conns.clear();
        for b in 0..self.p_graph.k() {
            if b != self.cur_block {
                self.cur_conns.push(b, 0);
            }
        }
    }
}

/// Builds move sets for every overloaded block.
pub fn build_move_sets(
    graph: &Graph,
    p_graph: &PartitionedGraph,
    p_ctx: &PartitionContext,
    max_move_set_weight: NodeWeight,
) -> MoveSets {
    MoveSetBuilder::new(graph, p_graph, p_ctx, graph.n()).build(max_move_set_weight)
}

/// One candidate migration, ordered by relative gain.
#[derive(Debug, Clone, Copy)]
pub struct SetCandidate {
    pub set: usize,
    pub from: BlockId,
    pub to: BlockId,
    pub weight: NodeWeight,
    pub gain: EdgeWeight,
    pub rel_gain: f64,
}

/// Weighted gain used to order candidates: heavy sets amplify positive gains
/// and damp negative ones, so cheap high-impact migrations go first.
pub fn relative_gain(gain: EdgeWeight, weight: NodeWeight) -> f64 {
    if gain >= 0 {
        gain as f64 * weight as f64
    } else {
        gain as f64 / weight.max(1) as f64
    }
}

/// Orders candidates by descending relative gain with the set id as the
/// deterministic tie-break.
pub fn sort_candidates(candidates: &mut [SetCandidate]) {
    candidates.sort_unstable_by(|a, b| {
        b.rel_gain
            .partial_cmp(&a.rel_gain)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.set.cmp(&b.set))
    });
}

pub struct GreedyBalancer {
    ctx: BalancerContext,
}

impl GreedyBalancer {
    pub fn new(ctx: BalancerContext) -> Self {
        Self { ctx }
    }

    fn candidates(graph: &Graph, sets: &MoveSets) -> Vec<SetCandidate> {
        (0..sets.num_sets())
            .map(|s| {
                let weight = sets.weight(graph, s);
                SetCandidate {
                    set: s,
                    from: sets.blocks[s],
                    to: sets.targets[s],
                    weight,
                    gain: sets.gains[s],
                    rel_gain: relative_gain(sets.gains[s], weight),
                }
            })
            .collect()
    }

    /// One build-and-apply round. Returns the number of applied sets.
    fn round(
        &self,
        graph: &Graph,
        p_graph: &PartitionedGraph,
        p_ctx: &PartitionContext,
    ) -> usize {
        let sets = build_move_sets(graph, p_graph, p_ctx, self.ctx.max_move_set_weight);
        if sets.num_sets() == 0 {
            return 0;
        }

        let mut candidates = Self::candidates(graph, &sets);
        sort_candidates(&mut candidates);

        let mut applied = 0;
        for cand in candidates {
            // The source block may have been drained by earlier candidates.
            if p_graph.block_weight(cand.from) <= p_ctx.max_block_weight(cand.from) {
                continue;
            }
            if p_graph.block_weight(cand.to) + cand.weight > p_ctx.max_block_weight(cand.to) {
                continue;
            }

            for &u in sets.nodes(cand.set) {
                p_graph.set_block(graph, u, cand.to);
            }
            applied += 1;
        }
        applied
    }
}

impl Refiner for GreedyBalancer {
    fn initialize(&mut self, _graph: &Graph) {}

    fn refine(
        &mut self,
        graph: &Graph,
        p_graph: &mut PartitionedGraph,
        p_ctx: &PartitionContext,
    ) -> bool {
        let initial_overload = metrics::total_overload(&p_graph.block_weights(), p_ctx);
        if initial_overload == 0 {
            return false;
        }

        for round in 0..self.ctx.max_num_rounds {
            if p_graph.is_feasible(p_ctx) {
                break;
            }
            let applied = self.round(graph, p_graph, p_ctx);
            debug!("balancer round {round} applied {applied} move sets");
            if applied == 0 {
                break;
            }
        }

        let final_overload = metrics::total_overload(&p_graph.block_weights(), p_ctx);
        final_overload < initial_overload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CsrGraph;

    fn overload_setup() -> (Graph, PartitionedGraph, PartitionContext) {
        // Path of 6 unit nodes, all in block 0; block 1 is empty.
        let graph = Graph::Csr(CsrGraph::from_edges(
            6,
            &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 4, 1), (4, 5, 1)],
        ));
        let p = PartitionedGraph::new(&graph, 2, vec![0; 6]);
        let p_ctx = PartitionContext { k: 2, epsilon: 0.03, total_node_weight: 6 };
        (graph, p, p_ctx)
    }

    #[test]
    fn test_move_set_indices_are_consistent() {
        // Arrange
        let (graph, p, p_ctx) = overload_setup();

        // Act
        let sets = build_move_sets(&graph, &p, &p_ctx, 3);

        // Assert
        assert_eq!(sets.move_set_indices[0], 0);
        assert_eq!(
            *sets.move_set_indices.last().expect("indices"),
            sets.move_sets.len()
        );
        for s in 0..sets.num_sets() {
            assert!(sets.size(s) > 0);
            for &u in sets.nodes(s) {
                assert_eq!(sets.node_to_move_set[u], s);
            }
        }
    }

    #[test]
    fn test_sets_are_disjoint_and_single_block() {
        // Arrange
        let (graph, p, p_ctx) = overload_setup();

        // Act
        let sets = build_move_sets(&graph, &p, &p_ctx, 3);

        // Assert
        let mut seen = vec![false; graph.n()];
        for s in 0..sets.num_sets() {
            for &u in sets.nodes(s) {
                assert!(!seen[u], "node {u} appears in two sets");
                seen[u] = true;
                assert_eq!(p.block(u), sets.blocks[s]);
            }
            assert_ne!(sets.targets[s], sets.blocks[s]);
        }
    }

    #[test]
    fn test_sets_are_connected() {
        // Arrange
        let (graph, p, p_ctx) = overload_setup();

        // Act
        let sets = build_move_sets(&graph, &p, &p_ctx, 3);

        // Assert: BFS inside each set reaches every member
        for s in 0..sets.num_sets() {
            let members: std::collections::HashSet<NodeId> =
                sets.nodes(s).iter().copied().collect();
            if members.len() <= 1 {
                continue;
            }
            let start = *sets.nodes(s).first().expect("non-empty set");
            let mut reached = std::collections::HashSet::from([start]);
            let mut queue = std::collections::VecDeque::from([start]);
            while let Some(u) = queue.pop_front() {
                for (_, v) in graph.neighbors(u) {
                    if members.contains(&v) && reached.insert(v) {
                        queue.push_back(v);
                    }
                }
            }
            assert_eq!(reached.len(), members.len());
        }
    }

    #[test]
    fn test_balancer_restores_feasibility() {
        // Arrange
        let (graph, mut p, p_ctx) = overload_setup();
        assert!(!p.is_feasible(&p_ctx));
        let mut balancer = GreedyBalancer::new(BalancerContext::default());

        // Act
        balancer.initialize(&graph);
        let improved = balancer.refine(&graph, &mut p, &p_ctx);

        // Assert
        assert!(improved);
        assert!(p.is_feasible(&p_ctx));
        assert!(p.validate(&graph));
    }

    #[test]
    fn test_relative_gain_orders_candidates() {
        // Arrange
        let mut candidates = vec![
            SetCandidate { set: 0, from: 0, to: 1, weight: 2, gain: -4, rel_gain: relative_gain(-4, 2) },
            SetCandidate { set: 1, from: 0, to: 1, weight: 2, gain: 3, rel_gain: relative_gain(3, 2) },
            SetCandidate { set: 2, from: 0, to: 1, weight: 1, gain: 3, rel_gain: relative_gain(3, 1) },
        ];

        // Act
        sort_candidates(&mut candidates);

        // Assert: positive gains first, heavier positive set wins, negative last
        assert_eq!(candidates[0].set, 1);
        assert_eq!(candidates[1].set, 2);
        assert_eq!(candidates[2].set, 0);
    }
}
