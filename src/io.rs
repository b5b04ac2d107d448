//! Graph input and output.
//!
//! Readers validate at the boundary: a malformed header, an asymmetric
//! adjacency or a non-positive weight is an error and no graph is returned.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use itertools::Itertools;
use sprs::TriMatI;
use thiserror::Error;

use crate::graph::CsrGraph;
use crate::{EdgeId, EdgeWeight, NodeId, NodeWeight};

/// Errors raised while reading a graph.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("inconsistent input: {0}")]
    Inconsistent(String),
}

/// Graph file formats accepted by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFileFormat {
    Metis,
    Parhip,
    MatrixMarket,
}

fn parse_error(line: usize, message: impl Into<String>) -> InputError {
    InputError::Parse { line, message: message.into() }
}

/// Reads a graph in METIS text format: a header `n m [fmt [ncon]]` followed
/// by one line per node listing its (1-based) neighbors, with weights
/// according to `fmt`. The adjacency must be symmetric.
pub fn read_metis(path: &Path) -> Result<CsrGraph, InputError> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines().enumerate();

    let (header_line_no, header) = loop {
        match lines.next() {
            Some((no, line)) => {
                let line = line?;
                if !line.trim_start().starts_with('%') && !line.trim().is_empty() {
                    break (no + 1, line);
                }
            }
            None => return Err(parse_error(0, "missing header")),
        }
    };

    let fields = header.split_whitespace().collect_vec();
    if fields.len() < 2 || fields.len() > 4 {
        return Err(parse_error(header_line_no, "header must be `n m [fmt [ncon]]`"));
    }
    let n: NodeId = fields[0]
        .parse()
        .map_err(|_| parse_error(header_line_no, "invalid node count"))?;
    let m: EdgeId = fields[1]
        .parse()
        .map_err(|_| parse_error(header_line_no, "invalid edge count"))?;
    let fmt = if fields.len() >= 3 { fields[2] } else { "0" };
    let has_node_weights = fmt.len() >= 2 && fmt.as_bytes()[fmt.len() - 2] == b'1';
    let has_edge_weights = fmt.as_bytes()[fmt.len() - 1] == b'1';
    let ncon: usize = if fields.len() == 4 {
        fields[3]
            .parse()
            .map_err(|_| parse_error(header_line_no, "invalid weight count"))?
    } else {
        usize::from(has_node_weights)
    };

    let mut offsets = vec![0 as EdgeId; n + 1];
    let mut targets = Vec::with_capacity(2 * m);
    let mut edge_weights = if has_edge_weights { Vec::with_capacity(2 * m) } else { Vec::new() };
    let mut node_weights = if has_node_weights { Vec::with_capacity(n) } else { Vec::new() };

    let mut u = 0;
    for (no, line) in lines {
        let line = line?;
        let line_no = no + 1;
        if line.trim_start().starts_with('%') {
            continue;
        }
        if u >= n {
            if line.trim().is_empty() {
                continue;
            }
            return Err(parse_error(line_no, "more node lines than announced"));
        }

        let mut tokens = line.split_whitespace();
        if has_node_weights {
            let mut weight = 0;
            for _ in 0..ncon.max(1) {
                let token = tokens
                    .next()
                    .ok_or_else(|| parse_error(line_no, "missing node weight"))?;
                weight += token
                    .parse::<NodeWeight>()
                    .map_err(|_| parse_error(line_no, "invalid node weight"))?;
            }
            if weight < 1 {
                return Err(parse_error(line_no, "node weight out of range"));
            }
            node_weights.push(weight);
        }

        while let Some(token) = tokens.next() {
            let v: NodeId = token
                .parse()
                .map_err(|_| parse_error(line_no, "invalid neighbor id"))?;
            if v < 1 || v > n {
                return Err(parse_error(line_no, format!("neighbor id {v} out of range")));
            }
            targets.push(v - 1);
            if has_edge_weights {
                let token = tokens
                    .next()
                    .ok_or_else(|| parse_error(line_no, "missing edge weight"))?;
                let w: EdgeWeight = token
                    .parse()
                    .map_err(|_| parse_error(line_no, "invalid edge weight"))?;
                if w < 1 {
                    return Err(parse_error(line_no, "edge weight out of range"));
                }
                edge_weights.push(w);
            }
        }
        u += 1;
        offsets[u] = targets.len();
    }

    if u != n {
        return Err(InputError::Inconsistent(format!(
            "header announced {n} nodes but the file contains {u}"
        )));
    }
    if targets.len() != 2 * m {
        return Err(InputError::Inconsistent(format!(
            "header announced {m} edges but the file contains {} directed entries",
            targets.len()
        )));
    }

    let graph = CsrGraph::new(offsets, targets, node_weights, edge_weights, false);
    validate_undirected(&graph)?;
    Ok(graph)
}

/// Checks offset monotonicity and adjacency symmetry (including weights).
pub fn validate_undirected(graph: &CsrGraph) -> Result<(), InputError> {
    for u in 0..graph.n() {
        for (e, v) in graph.neighbors(u) {
            if v >= graph.n() {
                return Err(InputError::Inconsistent(format!(
                    "edge {u} -> {v} points past the node set"
                )));
            }
            if v == u {
                return Err(InputError::Inconsistent(format!("self loop at node {u}")));
            }
            let w = graph.edge_weight(e);
            let reverse = graph
                .neighbors(v)
                .find(|&(_, t)| t == u)
                .map(|(re, _)| graph.edge_weight(re));
            if reverse != Some(w) {
                return Err(InputError::Inconsistent(format!(
                    "adjacency is asymmetric at edge {u} -> {v}"
                )));
            }
        }
    }
    Ok(())
}

const PARHIP_HAS_NODE_WEIGHTS: u64 = 1;
const PARHIP_HAS_EDGE_WEIGHTS: u64 = 2;

/// Reads the little-endian binary format: a header `[version, n, m]`, node
/// offsets (`n + 1` entries), the adjacency (`m` entries), then optional
/// node and edge weight arrays. The arrays match the CSR layout bit for bit.
pub fn read_parhip(path: &Path) -> Result<CsrGraph, InputError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut read_u64s = |count: usize| -> Result<Vec<u64>, InputError> {
        let mut buf = vec![0u8; count * 8];
        reader.read_exact(&mut buf).map_err(|_| {
            InputError::Inconsistent("file truncated".to_string())
        })?;
        Ok(buf.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().expect("8 bytes"))).collect())
    };

    let header = read_u64s(3)?;
    let version = header[0];
    let n = header[1] as NodeId;
    let m = header[2] as EdgeId;

    let offsets: Vec<EdgeId> = read_u64s(n + 1)?.into_iter().map(|x| x as EdgeId).collect();
    if offsets.first() != Some(&0) || offsets.last() != Some(&m) {
        return Err(InputError::Inconsistent("offsets disagree with edge count".to_string()));
    }
    if offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(InputError::Inconsistent("offsets are not monotone".to_string()));
    }

    let targets: Vec<NodeId> = read_u64s(m)?.into_iter().map(|x| x as NodeId).collect();

    let node_weights: Vec<NodeWeight> = if version & PARHIP_HAS_NODE_WEIGHTS != 0 {
        read_u64s(n)?.into_iter().map(|x| x as NodeWeight).collect()
    } else {
        Vec::new()
    };
    let edge_weights: Vec<EdgeWeight> = if version & PARHIP_HAS_EDGE_WEIGHTS != 0 {
        read_u64s(m)?.into_iter().map(|x| x as EdgeWeight).collect()
    } else {
        Vec::new()
    };

    if node_weights.iter().any(|&w| w < 1) || edge_weights.iter().any(|&w| w < 1) {
        return Err(InputError::Inconsistent("weight out of range".to_string()));
    }

    let graph = CsrGraph::new(offsets, targets, node_weights, edge_weights, false);
    validate_undirected(&graph)?;
    Ok(graph)
}

/// Writes the binary format read by [`read_parhip`].
pub fn write_parhip(graph: &CsrGraph, path: &Path) -> Result<(), std::io::Error> {
    let mut writer = BufWriter::new(File::create(path)?);

    let mut version = 0;
    if graph.has_node_weights() {
        version |= PARHIP_HAS_NODE_WEIGHTS;
    }
    if graph.has_edge_weights() {
        version |= PARHIP_HAS_EDGE_WEIGHTS;
    }

    let mut write_u64 = |writer: &mut BufWriter<File>, x: u64| writer.write_all(&x.to_le_bytes());
    write_u64(&mut writer, version)?;
    write_u64(&mut writer, graph.n() as u64)?;
    write_u64(&mut writer, graph.m() as u64)?;
    for &offset in graph.raw_offsets() {
        write_u64(&mut writer, offset as u64)?;
    }
    for &target in graph.raw_targets() {
        write_u64(&mut writer, target as u64)?;
    }
    if graph.has_node_weights() {
        for u in 0..graph.n() {
            write_u64(&mut writer, graph.node_weight(u) as u64)?;
        }
    }
    if graph.has_edge_weights() {
        for e in 0..graph.m() {
            write_u64(&mut writer, graph.edge_weight(e) as u64)?;
        }
    }
    Ok(())
}

/// Reads a matrix market file as a graph; entries are directed adjacency
/// entries, weights are rounded to integers with a floor of one.
pub fn read_matrix_market(path: &Path) -> Result<CsrGraph, InputError> {
    let tri: TriMatI<f64, usize> = sprs::io::read_matrix_market(path)
        .map_err(|e| InputError::Inconsistent(format!("matrix market: {e}")))?;

    if tri.rows() != tri.cols() {
        return Err(InputError::Inconsistent(format!(
            "adjacency matrix must be square, got {}x{}",
            tri.rows(),
            tri.cols()
        )));
    }

    let n = tri.rows();
    let mut degrees = vec![0 as EdgeId; n + 1];
    for (_, (r, c)) in tri.triplet_iter() {
        if r != c {
            degrees[r + 1] += 1;
        }
    }
    for u in 0..n {
        degrees[u + 1] += degrees[u];
    }
    let offsets = degrees;
    let m = offsets[n];

    let mut targets = vec![0 as NodeId; m];
    let mut edge_weights = vec![0 as EdgeWeight; m];
    let mut cursor = offsets.clone();
    for (&w, (r, c)) in tri.triplet_iter() {
        if r == c {
            continue;
        }
        targets[cursor[r]] = c;
        edge_weights[cursor[r]] = (w.round() as EdgeWeight).max(1);
        cursor[r] += 1;
    }

    let graph = CsrGraph::new(offsets, targets, Vec::new(), edge_weights, false);
    validate_undirected(&graph)?;
    Ok(graph)
}

/// Reads a graph in the given format.
pub fn read_graph(path: &Path, format: GraphFileFormat) -> Result<CsrGraph, InputError> {
    match format {
        GraphFileFormat::Metis => read_metis(path),
        GraphFileFormat::Parhip => read_parhip(path),
        GraphFileFormat::MatrixMarket => read_matrix_market(path),
    }
}

/// Write the partition array to a file, one node per line.
pub fn write_partition_data_to_file(
    partition: &[usize],
    file_name: &str,
) -> Result<(), std::io::Error> {
    let mut file = BufWriter::new(File::create(file_name)?);
    for (vertex_id, block) in partition.iter().enumerate() {
        writeln!(file, "vertex {vertex_id} => partition {block}")?;
    }
    Ok(())
}

/// Debug dump of one coarsening level: node count, cluster count, then the
/// cluster id of every node.
pub fn write_hierarchy_level(
    prefix: &str,
    level: usize,
    n: NodeId,
    num_clusters: NodeId,
    mapping: &[NodeId],
) -> Result<(), std::io::Error> {
    let mut file = BufWriter::new(File::create(format!("{prefix}hierarchy.{level}"))?);
    writeln!(file, "{n} {num_clusters}")?;
    for &cluster in mapping {
        writeln!(file, "{cluster}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn create_mock_file(dir: &Path, filename: &str, content: &str) -> std::path::PathBuf {
        let file_path = dir.join(filename);
        let mut file = File::create(&file_path).expect("create temp file");
        file.write_all(content.as_bytes()).expect("write temp file");
        file_path
    }

    #[test]
    fn test_read_metis_unweighted() -> Result<(), InputError> {
        // Arrange: a triangle
        let dir = tempdir()?;
        let path = create_mock_file(
            dir.path(),
            "triangle.graph",
            "% a triangle\n3 3\n2 3\n1 3\n1 2\n",
        );

        // Act
        let graph = read_metis(&path)?;

        // Assert
        assert_eq!(graph.n(), 3);
        assert_eq!(graph.m(), 6);
        assert_eq!(graph.degree(0), 2);
        Ok(())
    }

    #[test]
    fn test_read_metis_with_weights() -> Result<(), InputError> {
        // Arrange: fmt 11 = node and edge weights
        let dir = tempdir()?;
        let path = create_mock_file(
            dir.path(),
            "weighted.graph",
            "2 1 11\n4 2 7\n5 1 7\n",
        );

        // Act
        let graph = read_metis(&path)?;

        // Assert
        assert_eq!(graph.node_weight(0), 4);
        assert_eq!(graph.node_weight(1), 5);
        assert_eq!(graph.edge_weight(0), 7);
        Ok(())
    }

    #[test]
    fn test_read_metis_rejects_asymmetry() {
        // Arrange: 1 -> 2 without the reverse entry
        let dir = tempdir().expect("temp dir");
        let path = create_mock_file(dir.path(), "broken.graph", "2 1\n2\n\n");

        // Act
        let result = read_metis(&path);

        // Assert
        assert!(matches!(result, Err(InputError::Inconsistent(_))));
    }

    #[test]
    fn test_read_metis_rejects_bad_header() {
        // Arrange
        let dir = tempdir().expect("temp dir");
        let path = create_mock_file(dir.path(), "empty.graph", "% only a comment\n");

        // Act
        let result = read_metis(&path);

        // Assert
        assert!(matches!(result, Err(InputError::Parse { .. })));
    }

    #[test]
    fn test_parhip_round_trip() -> Result<(), InputError> {
        // Arrange
        let dir = tempdir()?;
        let path = dir.path().join("graph.parhip");
        let graph = CsrGraph::from_weighted_edges(
            4,
            &[(0, 1, 2), (1, 2, 3), (2, 3, 4)],
            vec![1, 2, 3, 4],
        );

        // Act
        write_parhip(&graph, &path)?;
        let read_back = read_parhip(&path)?;

        // Assert: bit-for-bit CSR agreement
        assert_eq!(read_back.n(), graph.n());
        assert_eq!(read_back.m(), graph.m());
        assert_eq!(read_back.raw_offsets(), graph.raw_offsets());
        assert_eq!(read_back.raw_targets(), graph.raw_targets());
        for u in 0..graph.n() {
            assert_eq!(read_back.node_weight(u), graph.node_weight(u));
        }
        for e in 0..graph.m() {
            assert_eq!(read_back.edge_weight(e), graph.edge_weight(e));
        }
        Ok(())
    }

    #[test]
    fn test_read_matrix_market() -> Result<(), InputError> {
        // Arrange
        let dir = tempdir()?;
        let path = create_mock_file(
            dir.path(),
            "graph.mtx",
            "%%MatrixMarket matrix coordinate integer general\n%\n3 3 4\n1 2 1\n2 1 1\n2 3 2\n3 2 2\n",
        );

        // Act
        let graph = read_matrix_market(&path)?;

        // Assert
        assert_eq!(graph.n(), 3);
        assert_eq!(graph.m(), 4);
        assert_eq!(graph.degree(1), 2);
        Ok(())
    }

    #[test]
    fn test_write_partition_file() -> Result<(), std::io::Error> {
        // Arrange
        let dir = tempdir()?;
        let path = dir.path().join("partition.txt");

        // Act
        write_partition_data_to_file(&[0, 1, 1], path.to_str().expect("utf-8 path"))?;

        // Assert
        let content = std::fs::read_to_string(&path)?;
        assert!(content.contains("vertex 2 => partition 1"));
        Ok(())
    }
}
