//! Compressed graph storage.
//!
//! The adjacency is stored as a byte blob of gap codes instead of a plain
//! target array. Each node's payload starts with a varint header holding the
//! degree and a high-degree flag:
//!
//! - High-degree nodes split their neighbor list into parts of
//!   [`HIGH_DEGREE_PART_LENGTH`] values. A table of fixed-width part byte
//!   lengths precedes the part payloads, so parts can be decoded
//!   independently and scanned in parallel.
//! - Within a part, maximal runs of consecutive neighbors of length at least
//!   [`INTERVAL_LENGTH_THRESHOLD`] are stored as (left, length) intervals;
//!   the first interval's left bound is signed relative to the node id, later
//!   bounds are gaps from the previous interval's right end.
//! - The remaining residual neighbors are gap codes `v_j - v_{j-1} - 1`, the
//!   first one signed relative to the node id.
//!
//! The decoded neighbor sequence enumerates intervals first, then residuals;
//! as a multiset it is identical to the CSR row the blob was built from.
//! Edge weights are stored in emission order so edge ids stay sequential.

use std::sync::Mutex;

use rayon::prelude::*;

use super::csr::{CsrGraph, DegreeBuckets};
use super::varint::{
    decode_signed_varint, decode_varint, encode_signed_varint, encode_varint,
};
use crate::context::CompressionContext;
use crate::datastructures::ConcurrentCircularVector;
use crate::{EdgeId, EdgeWeight, NodeId, NodeWeight};

/// Neighbor lists at least this long use the part-wise encoding.
pub const HIGH_DEGREE_THRESHOLD: NodeId = 10_000;
/// Number of neighbors per independently decodable part.
pub const HIGH_DEGREE_PART_LENGTH: NodeId = 1_000;
/// Minimum run length stored as an interval.
pub const INTERVAL_LENGTH_THRESHOLD: NodeId = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EncodeStats {
    num_high_degree_nodes: usize,
    num_high_degree_parts: usize,
    num_interval_nodes: usize,
    num_intervals: usize,
}

impl EncodeStats {
    fn merge(&mut self, other: EncodeStats) {
        self.num_high_degree_nodes += other.num_high_degree_nodes;
        self.num_high_degree_parts += other.num_high_degree_parts;
        self.num_interval_nodes += other.num_interval_nodes;
        self.num_intervals += other.num_intervals;
    }
}

/// Graph with gap-coded adjacency. Same access surface as [`CsrGraph`].
#[derive(Debug, Clone)]
pub struct CompressedGraph {
    byte_offsets: Vec<usize>,
    edge_offsets: Vec<EdgeId>,
    blob: Vec<u8>,
    node_weights: Vec<NodeWeight>,
    edge_weights: Vec<EdgeWeight>,
    n: NodeId,
    full_n: NodeId,
    total_node_weight: NodeWeight,
    max_node_weight: NodeWeight,
    total_edge_weight: EdgeWeight,
    max_degree: NodeId,
    sorted: bool,
    buckets: DegreeBuckets,
    interval_encoding: bool,
    high_degree_encoding: bool,
    num_high_degree_nodes: usize,
    num_high_degree_parts: usize,
    num_interval_nodes: usize,
    num_intervals: usize,
}

impl CompressedGraph {
    pub fn n(&self) -> NodeId {
        self.n
    }

    pub fn m(&self) -> EdgeId {
        *self.edge_offsets.last().expect("edge offsets non-empty")
    }

    pub fn degree(&self, u: NodeId) -> NodeId {
        self.edge_offsets[u + 1] - self.edge_offsets[u]
    }

    pub fn max_degree(&self) -> NodeId {
        self.max_degree
    }

    pub fn first_edge(&self, u: NodeId) -> EdgeId {
        self.edge_offsets[u]
    }

    pub fn node_weight(&self, u: NodeId) -> NodeWeight {
        if self.node_weights.is_empty() {
            1
        } else {
            self.node_weights[u]
        }
    }

    pub fn edge_weight(&self, e: EdgeId) -> EdgeWeight {
        if self.edge_weights.is_empty() {
            1
        } else {
            self.edge_weights[e]
        }
    }

    pub fn total_node_weight(&self) -> NodeWeight {
        self.total_node_weight
    }

    pub fn max_node_weight(&self) -> NodeWeight {
        self.max_node_weight
    }

    pub fn total_edge_weight(&self) -> EdgeWeight {
        self.total_edge_weight
    }

    pub fn sorted(&self) -> bool {
        self.sorted
    }

    pub fn buckets(&self) -> &DegreeBuckets {
        &self.buckets
    }

    pub fn num_high_degree_nodes(&self) -> usize {
        self.num_high_degree_nodes
    }

    pub fn num_high_degree_parts(&self) -> usize {
        self.num_high_degree_parts
    }

    pub fn num_interval_nodes(&self) -> usize {
        self.num_interval_nodes
    }

    pub fn num_intervals(&self) -> usize {
        self.num_intervals
    }

    /// Size of the adjacency blob in bytes.
    pub fn blob_len(&self) -> usize {
        self.blob.len()
    }

    /// Iterates `(edge_id, target)` pairs of `u`'s adjacency, decoding lazily.
    pub fn neighbors(&self, u: NodeId) -> CompressedNeighbors<'_> {
        let degree = self.degree(u);
        let mut pos = self.byte_offsets[u];
        let mut high = false;
        let mut part_table = 0..0;
        if degree > 0 {
            let header = decode_varint(&self.blob, &mut pos);
            debug_assert_eq!((header >> 1) as NodeId, degree);
            high = header & 1 == 1;
            if high {
                let parts = degree.div_ceil(HIGH_DEGREE_PART_LENGTH);
                part_table = pos..pos + 4 * parts;
                pos = part_table.end;
            }
        }
        CompressedNeighbors {
            blob: &self.blob,
            pos,
            u,
            interval_encoding: self.interval_encoding,
            edge: self.edge_offsets[u],
            remaining: degree,
            high,
            part_table,
            part_remaining: 0,
            intervals_pending: 0,
            interval_value: 0,
            interval_left: 0,
            last_right: 0,
            first_interval: true,
            prev_residual: 0,
            first_residual: true,
        }
    }

    /// Number of independently decodable parts of `u`'s neighbor list.
    pub fn num_parts(&self, u: NodeId) -> usize {
        let degree = self.degree(u);
        if degree == 0 {
            return 0;
        }
        let mut pos = self.byte_offsets[u];
        let header = decode_varint(&self.blob, &mut pos);
        if header & 1 == 1 {
            degree.div_ceil(HIGH_DEGREE_PART_LENGTH)
        } else {
            1
        }
    }

    /// Decodes one part of a high-degree neighbor list, independent of the
    /// other parts. Parts of distinct indices may be scanned in parallel.
    pub fn neighbors_of_part(&self, u: NodeId, part: usize) -> CompressedNeighbors<'_> {
        let degree = self.degree(u);
        let mut pos = self.byte_offsets[u];
        let header = decode_varint(&self.blob, &mut pos);
        debug_assert_eq!(header & 1, 1, "node {u} is not high-degree");

        let parts = degree.div_ceil(HIGH_DEGREE_PART_LENGTH);
        debug_assert!(part < parts);
        let table = &self.blob[pos..pos + 4 * parts];
        let mut start = pos + 4 * parts;
        for entry in table.chunks_exact(4).take(part) {
            start += u32::from_le_bytes(entry.try_into().expect("4-byte entry")) as usize;
        }

        let part_size = HIGH_DEGREE_PART_LENGTH.min(degree - part * HIGH_DEGREE_PART_LENGTH);
        CompressedNeighbors {
            blob: &self.blob,
            pos: start,
            u,
            interval_encoding: self.interval_encoding,
            edge: self.edge_offsets[u] + part * HIGH_DEGREE_PART_LENGTH,
            remaining: part_size,
            high: false,
            part_table: 0..0,
            part_remaining: 0,
            intervals_pending: 0,
            interval_value: 0,
            interval_left: 0,
            last_right: 0,
            first_interval: true,
            prev_residual: 0,
            first_residual: true,
        }
    }

    /// Number of trailing nodes without any incident edge.
    pub fn count_isolated_nodes(&self) -> NodeId {
        (0..self.n).rev().take_while(|&u| self.degree(u) == 0).count()
    }

    /// Shrinks the node table by exactly `count` trailing isolated nodes.
    pub fn remove_isolated_nodes(&mut self, count: NodeId) {
        if count == 0 {
            return;
        }
        debug_assert!(self.sorted);
        debug_assert!((self.n - count..self.n).all(|u| self.degree(u) == 0));

        self.n -= count;
        self.buckets.remove_isolated(count);
        self.update_total_node_weight();
    }

    /// Exact inverse of [`remove_isolated_nodes`](Self::remove_isolated_nodes).
    pub fn integrate_isolated_nodes(&mut self) {
        debug_assert!(self.sorted);

        let count = self.full_n - self.n;
        self.n = self.full_n;
        self.buckets.integrate_isolated(count);
        self.update_total_node_weight();
    }

    fn update_total_node_weight(&mut self) {
        if self.node_weights.is_empty() {
            self.total_node_weight = self.n as NodeWeight;
            self.max_node_weight = 1;
        } else {
            let weights = &self.node_weights[..self.n];
            self.total_node_weight = weights.par_iter().sum();
            self.max_node_weight = weights.par_iter().copied().max().unwrap_or(1);
        }
    }
}

/// Lazy decoder over one node's adjacency.
pub struct CompressedNeighbors<'a> {
    blob: &'a [u8],
    pos: usize,
    u: NodeId,
    interval_encoding: bool,
    edge: EdgeId,
    remaining: usize,
    high: bool,
    part_table: std::ops::Range<usize>,
    part_remaining: usize,
    intervals_pending: usize,
    interval_value: NodeId,
    interval_left: usize,
    last_right: NodeId,
    first_interval: bool,
    prev_residual: NodeId,
    first_residual: bool,
}

impl CompressedNeighbors<'_> {
    fn start_part(&mut self) {
        self.part_remaining = if self.high {
            HIGH_DEGREE_PART_LENGTH.min(self.remaining)
        } else {
            self.remaining
        };
        self.intervals_pending = if self.interval_encoding {
            decode_varint(self.blob, &mut self.pos) as usize
        } else {
            0
        };
        self.first_interval = true;
        self.first_residual = true;
        self.interval_left = 0;
    }

    fn start_interval(&mut self) {
        let left = if self.first_interval {
            self.first_interval = false;
            (self.u as i64 + decode_signed_varint(self.blob, &mut self.pos)) as NodeId
        } else {
            self.last_right + 2 + decode_varint(self.blob, &mut self.pos) as NodeId
        };
        let length =
            INTERVAL_LENGTH_THRESHOLD + decode_varint(self.blob, &mut self.pos) as NodeId;
        self.interval_value = left;
        self.interval_left = length;
        self.last_right = left + length - 1;
        self.intervals_pending -= 1;
    }
}

impl Iterator for CompressedNeighbors<'_> {
    type Item = (EdgeId, NodeId);

    fn next(&mut self) -> Option<(EdgeId, NodeId)> {
        loop {
            if self.interval_left > 0 {
                let v = self.interval_value;
                self.interval_value += 1;
                self.interval_left -= 1;
                self.part_remaining -= 1;
                self.remaining -= 1;
                let e = self.edge;
                self.edge += 1;
                return Some((e, v));
            }
            if self.intervals_pending > 0 {
                self.start_interval();
                continue;
            }
            if self.part_remaining > 0 {
                let v = if self.first_residual {
                    self.first_residual = false;
                    (self.u as i64 + decode_signed_varint(self.blob, &mut self.pos)) as NodeId
                } else {
                    self.prev_residual + 1 + decode_varint(self.blob, &mut self.pos) as NodeId
                };
                self.prev_residual = v;
                self.part_remaining -= 1;
                self.remaining -= 1;
                let e = self.edge;
                self.edge += 1;
                return Some((e, v));
            }
            if self.remaining > 0 {
                self.start_part();
                continue;
            }
            return None;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for CompressedNeighbors<'_> {}

/// Encodes one part of a neighbor list. `row` must be sorted by target.
/// Pushes the part's edge weights in emission order when present.
fn encode_part(
    u: NodeId,
    row: &[(NodeId, EdgeWeight)],
    interval_encoding: bool,
    out: &mut Vec<u8>,
    weights_out: &mut Vec<EdgeWeight>,
    has_edge_weights: bool,
    stats: &mut EncodeStats,
) {
    debug_assert!(row.windows(2).all(|w| w[0].0 < w[1].0));

    let mut intervals: Vec<(usize, usize)> = Vec::new();
    if interval_encoding {
        let mut i = 0;
        while i < row.len() {
            let mut j = i + 1;
            while j < row.len() && row[j].0 == row[j - 1].0 + 1 {
                j += 1;
            }
            if j - i >= INTERVAL_LENGTH_THRESHOLD {
                intervals.push((i, j - i));
            }
            i = j;
        }
    }

    if interval_encoding {
        encode_varint(intervals.len() as u64, out);
    }
    stats.num_intervals += intervals.len();

    let mut covered = vec![false; row.len()];
    let mut prev_right: Option<NodeId> = None;
    for &(start, len) in &intervals {
        let left = row[start].0;
        match prev_right {
            None => encode_signed_varint(left as i64 - u as i64, out),
            Some(right) => encode_varint((left - right - 2) as u64, out),
        }
        encode_varint((len - INTERVAL_LENGTH_THRESHOLD) as u64, out);
        prev_right = Some(left + len - 1);
        covered[start..start + len].iter_mut().for_each(|c| *c = true);
        if has_edge_weights {
            weights_out.extend(row[start..start + len].iter().map(|&(_, w)| w));
        }
    }

    let mut prev: Option<NodeId> = None;
    for (i, &(v, w)) in row.iter().enumerate() {
        if covered[i] {
            continue;
        }
        match prev {
            None => encode_signed_varint(v as i64 - u as i64, out),
            Some(p) => encode_varint((v - p - 1) as u64, out),
        }
        prev = Some(v);
        if has_edge_weights {
            weights_out.push(w);
        }
    }
}

/// Encodes a full node payload.
fn encode_node(
    u: NodeId,
    row: &[(NodeId, EdgeWeight)],
    ctx: &CompressionContext,
    out: &mut Vec<u8>,
    weights_out: &mut Vec<EdgeWeight>,
    has_edge_weights: bool,
    stats: &mut EncodeStats,
) {
    let degree = row.len();
    if degree == 0 {
        return;
    }

    let high = ctx.high_degree_encoding && degree >= HIGH_DEGREE_THRESHOLD;
    encode_varint(((degree as u64) << 1) | u64::from(high), out);

    if !high {
        let had_intervals = stats.num_intervals;
        encode_part(u, row, ctx.interval_encoding, out, weights_out, has_edge_weights, stats);
        if stats.num_intervals > had_intervals {
            stats.num_interval_nodes += 1;
        }
        return;
    }

    stats.num_high_degree_nodes += 1;
    let parts: Vec<&[(NodeId, EdgeWeight)]> = row.chunks(HIGH_DEGREE_PART_LENGTH).collect();
    stats.num_high_degree_parts += parts.len();

    let had_intervals = stats.num_intervals;
    let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(parts.len());
    for part in &parts {
        let mut payload = Vec::new();
        encode_part(
            u,
            part,
            ctx.interval_encoding,
            &mut payload,
            weights_out,
            has_edge_weights,
            stats,
        );
        payloads.push(payload);
    }
    if stats.num_intervals > had_intervals {
        stats.num_interval_nodes += 1;
    }

    for payload in &payloads {
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    }
    for payload in &payloads {
        out.extend_from_slice(payload);
    }
}

fn row_of(graph: &CsrGraph, u: NodeId) -> Vec<(NodeId, EdgeWeight)> {
    graph.neighbors(u).map(|(e, v)| (v, graph.edge_weight(e))).collect()
}

fn finish(
    graph: &CsrGraph,
    byte_offsets: Vec<usize>,
    edge_offsets: Vec<EdgeId>,
    blob: Vec<u8>,
    edge_weights: Vec<EdgeWeight>,
    ctx: &CompressionContext,
    stats: EncodeStats,
) -> CompressedGraph {
    let node_weights = if graph.has_node_weights() {
        (0..graph.n()).map(|u| graph.node_weight(u)).collect()
    } else {
        Vec::new()
    };

    CompressedGraph {
        byte_offsets,
        edge_offsets,
        blob,
        node_weights,
        edge_weights,
        n: graph.n(),
        full_n: graph.n(),
        total_node_weight: graph.total_node_weight(),
        max_node_weight: graph.max_node_weight(),
        total_edge_weight: graph.total_edge_weight(),
        max_degree: graph.max_degree(),
        sorted: graph.sorted(),
        buckets: graph.buckets().clone(),
        interval_encoding: ctx.interval_encoding,
        high_degree_encoding: ctx.high_degree_encoding,
        num_high_degree_nodes: stats.num_high_degree_nodes,
        num_high_degree_parts: stats.num_high_degree_parts,
        num_interval_nodes: stats.num_interval_nodes,
        num_intervals: stats.num_intervals,
    }
}

/// Sequential compressor: appends one node at a time.
pub fn compress(graph: &CsrGraph, ctx: &CompressionContext) -> CompressedGraph {
    let n = graph.n();
    let has_edge_weights = graph.has_edge_weights();

    let mut blob = Vec::new();
    let mut byte_offsets = Vec::with_capacity(n + 1);
    let mut edge_offsets = Vec::with_capacity(n + 1);
    let mut edge_weights = Vec::new();
    let mut stats = EncodeStats::default();

    byte_offsets.push(0);
    edge_offsets.push(0);
    for u in 0..n {
        let row = row_of(graph, u);
        encode_node(u, &row, ctx, &mut blob, &mut edge_weights, has_edge_weights, &mut stats);
        byte_offsets.push(blob.len());
        edge_offsets.push(edge_offsets[u] + row.len());
    }

    finish(graph, byte_offsets, edge_offsets, blob, edge_weights, ctx, stats)
}

struct ChunkResult {
    base: usize,
    bytes: Vec<u8>,
    node_byte_ends: Vec<usize>,
    edge_weights: Vec<EdgeWeight>,
    stats: EncodeStats,
}

/// Parallel compressor: nodes are split into chunks, chunks are encoded into
/// per-chunk buffers, and a concurrent circular vector hands the running
/// byte offset from chunk to chunk. Produces byte-identical output to
/// [`compress`].
pub fn compress_parallel(graph: &CsrGraph, ctx: &CompressionContext) -> CompressedGraph {
    let n = graph.n();
    let chunk_size = ctx.parallel_chunk_size.max(1);
    let num_chunks = n.div_ceil(chunk_size);
    let num_workers = rayon::current_num_threads().max(1);
    let has_edge_weights = graph.has_edge_weights();

    let ring = ConcurrentCircularVector::new(num_workers + 1, num_workers);
    let results: Vec<Mutex<Option<ChunkResult>>> =
        (0..num_chunks).map(|_| Mutex::new(None)).collect();

    rayon::scope(|scope| {
        for _ in 0..num_workers {
            scope.spawn(|_| loop {
                let chunk = ring.next();
                if chunk >= num_chunks {
                    return;
                }

                let begin = chunk * chunk_size;
                let end = n.min(begin + chunk_size);

                let mut bytes = Vec::new();
                let mut node_byte_ends = Vec::with_capacity(end - begin);
                let mut edge_weights = Vec::new();
                let mut stats = EncodeStats::default();
                for u in begin..end {
                    let row = row_of(graph, u);
                    encode_node(
                        u,
                        &row,
                        ctx,
                        &mut bytes,
                        &mut edge_weights,
                        has_edge_weights,
                        &mut stats,
                    );
                    node_byte_ends.push(bytes.len());
                }

                let base = ring.fetch_and_update(chunk, bytes.len() as u64) as usize;
                *results[chunk].lock().expect("chunk slot poisoned") =
                    Some(ChunkResult { base, bytes, node_byte_ends, edge_weights, stats });
            });
        }
    });

    let mut blob = Vec::new();
    let mut byte_offsets = Vec::with_capacity(n + 1);
    let mut edge_weights = Vec::new();
    let mut stats = EncodeStats::default();
    byte_offsets.push(0);
    for slot in &results {
        let chunk = slot
            .lock()
            .expect("chunk slot poisoned")
            .take()
            .expect("every chunk was encoded");
        debug_assert_eq!(chunk.base, blob.len());
        for &end in &chunk.node_byte_ends {
            byte_offsets.push(chunk.base + end);
        }
        blob.extend_from_slice(&chunk.bytes);
        edge_weights.extend_from_slice(&chunk.edge_weights);
        stats.merge(chunk.stats);
    }

    let mut edge_offsets = Vec::with_capacity(n + 1);
    edge_offsets.push(0);
    for u in 0..n {
        edge_offsets.push(edge_offsets[u] + graph.degree(u));
    }

    finish(graph, byte_offsets, edge_offsets, blob, edge_weights, ctx, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn ctx() -> CompressionContext {
        CompressionContext { enabled: true, ..CompressionContext::default() }
    }

    fn random_graph(n: NodeId, p: f64, seed: u64) -> CsrGraph {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut edges = Vec::new();
        for u in 0..n {
            for v in (u + 1)..n {
                if rng.gen_bool(p) {
                    edges.push((u, v, rng.gen_range(1..4)));
                }
            }
        }
        CsrGraph::from_edges(n, &edges)
    }

    fn assert_same_multiset(csr: &CsrGraph, compressed: &CompressedGraph) {
        assert_eq!(csr.n(), compressed.n());
        assert_eq!(csr.m(), compressed.m());
        assert_eq!(csr.max_degree(), compressed.max_degree());
        assert_eq!(csr.buckets(), compressed.buckets());

        for u in 0..csr.n() {
            let mut expected: Vec<(NodeId, EdgeWeight)> =
                csr.neighbors(u).map(|(e, v)| (v, csr.edge_weight(e))).collect();
            let mut actual: Vec<(NodeId, EdgeWeight)> = compressed
                .neighbors(u)
                .map(|(e, v)| (v, compressed.edge_weight(e)))
                .collect();
            expected.sort_unstable();
            actual.sort_unstable();
            assert_eq!(expected, actual, "neighbor multiset differs for node {u}");
        }
    }

    #[test]
    fn test_round_trip_on_path() {
        // Arrange
        let csr = CsrGraph::from_edges(6, &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 4, 1), (4, 5, 1)]);

        // Act
        let compressed = compress(&csr, &ctx());

        // Assert
        assert_same_multiset(&csr, &compressed);
    }

    #[test]
    fn test_interval_encoding_kicks_in_on_runs() {
        // Arrange: node 0 adjacent to the run 1..=8
        let edges: Vec<(NodeId, NodeId, EdgeWeight)> = (1..9).map(|v| (0, v, 1)).collect();
        let csr = CsrGraph::from_edges(9, &edges);

        // Act
        let compressed = compress(&csr, &ctx());

        // Assert
        assert!(compressed.num_interval_nodes() >= 1);
        assert!(compressed.num_intervals() >= 1);
        assert_same_multiset(&csr, &compressed);
    }

    #[test]
    fn test_interval_encoding_can_be_disabled() {
        // Arrange
        let edges: Vec<(NodeId, NodeId, EdgeWeight)> = (1..9).map(|v| (0, v, 1)).collect();
        let csr = CsrGraph::from_edges(9, &edges);
        let no_intervals = CompressionContext { interval_encoding: false, ..ctx() };

        // Act
        let compressed = compress(&csr, &no_intervals);

        // Assert
        assert_eq!(compressed.num_intervals(), 0);
        assert_same_multiset(&csr, &compressed);
    }

    #[test]
    fn test_round_trip_on_random_graph() {
        // Arrange
        let csr = random_graph(80, 0.1, 42);

        // Act
        let compressed = compress(&csr, &ctx());

        // Assert
        assert_same_multiset(&csr, &compressed);
    }

    #[test]
    fn test_parallel_builder_is_byte_identical() {
        // Arrange
        let csr = random_graph(200, 0.05, 7);
        let small_chunks = CompressionContext { parallel_chunk_size: 16, ..ctx() };

        // Act
        let sequential = compress(&csr, &small_chunks);
        let parallel = compress_parallel(&csr, &small_chunks);

        // Assert
        assert_eq!(sequential.blob, parallel.blob);
        assert_eq!(sequential.byte_offsets, parallel.byte_offsets);
        assert_eq!(sequential.edge_offsets, parallel.edge_offsets);
        assert_eq!(sequential.edge_weights, parallel.edge_weights);
        assert_eq!(sequential.num_intervals, parallel.num_intervals);
    }

    #[test]
    fn test_high_degree_parts_decode_independently() {
        // Arrange: one hub with degree above the high-degree threshold
        let hub = 0;
        let n = HIGH_DEGREE_THRESHOLD + 500;
        let edges: Vec<(NodeId, NodeId, EdgeWeight)> =
            (1..n).map(|v| (hub, v, 1)).collect();
        let csr = CsrGraph::from_edges(n, &edges);

        // Act
        let compressed = compress(&csr, &ctx());

        // Assert
        assert_eq!(compressed.num_high_degree_nodes(), 1);
        let parts = compressed.num_parts(hub);
        assert_eq!(parts, (n - 1).div_ceil(HIGH_DEGREE_PART_LENGTH));

        let mut via_parts: Vec<NodeId> = (0..parts)
            .flat_map(|p| compressed.neighbors_of_part(hub, p).map(|(_, v)| v))
            .collect();
        let mut direct: Vec<NodeId> = compressed.neighbors(hub).map(|(_, v)| v).collect();
        via_parts.sort_unstable();
        direct.sort_unstable();
        assert_eq!(via_parts, direct);
        assert_eq!(via_parts.len(), n - 1);
    }

    #[test]
    fn test_remove_integrate_isolated_is_identity() {
        // Arrange
        let csr = CsrGraph::from_edges(6, &[(0, 1, 1), (1, 2, 1)]);
        let (sorted, _) = super::super::csr::rearrange_by_degree_buckets(&csr);
        let mut compressed = compress(&sorted, &ctx());
        let before_n = compressed.n();
        let before_weight = compressed.total_node_weight();
        let isolated = compressed.count_isolated_nodes();
        assert_eq!(isolated, 3);

        // Act
        compressed.remove_isolated_nodes(isolated);
        compressed.integrate_isolated_nodes();

        // Assert
        assert_eq!(compressed.n(), before_n);
        assert_eq!(compressed.total_node_weight(), before_weight);
    }
}
