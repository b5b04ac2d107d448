use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};

use parcut::context::{Context, NodeOrdering, PartitioningMode};
use parcut::graph::{rearrange_by_degree_buckets, Graph};
use parcut::io::{read_graph, write_partition_data_to_file, GraphFileFormat};
use parcut::metrics::imbalance;
use parcut::scheme::partition_graph;
use parcut::{BlockId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FileFormatArg {
    Metis,
    Parhip,
    Mtx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum NodeOrderArg {
    Natural,
    DegBuckets,
    ImplicitDegBuckets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Kway,
    Deep,
    Deeper,
}

/// Multilevel graph partitioner.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Input graph file.
    #[arg(short = 'G', long = "graph")]
    graph: PathBuf,

    /// Format of the input graph.
    #[arg(long, value_enum, default_value_t = FileFormatArg::Metis)]
    graph_file_format: FileFormatArg,

    /// Node ordering applied before partitioning.
    #[arg(long, value_enum, default_value_t = NodeOrderArg::Natural)]
    node_order: NodeOrderArg,

    /// Store the graph with gap-coded adjacency.
    #[arg(long)]
    compress_in_memory: bool,

    /// Disable interval run-length encoding inside the compressed adjacency.
    #[arg(long)]
    no_interval_encoding: bool,

    /// Disable the part-wise encoding of high degree nodes.
    #[arg(long)]
    no_high_degree_encoding: bool,

    /// Nodes per chunk of the parallel compressor.
    #[arg(long, default_value_t = 2048)]
    compression_chunk_size: usize,

    /// Number of blocks.
    #[arg(short = 'k', default_value_t = 2)]
    k: usize,

    /// Balance tolerance.
    #[arg(short = 'e', long = "epsilon", default_value_t = 0.03)]
    epsilon: f64,

    /// Worker threads; 0 keeps the scheduler default.
    #[arg(short = 't', long = "threads", default_value_t = 0)]
    threads: usize,

    /// Seed for all randomized components.
    #[arg(short = 's', long = "seed", default_value_t = 0)]
    seed: u64,

    /// Partitioning schedule.
    #[arg(long, value_enum, default_value_t = ModeArg::Deep)]
    mode: ModeArg,

    /// Write the partition to this file.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new().num_threads(args.threads).build_global()?;
    }

    let mut ctx = Context::default();
    ctx.seed = args.seed;
    ctx.partition.k = args.k;
    ctx.partition.epsilon = args.epsilon;
    ctx.parallel.num_threads = args.threads;
    ctx.mode = match args.mode {
        ModeArg::Kway => PartitioningMode::KWay,
        ModeArg::Deep => PartitioningMode::Deep,
        ModeArg::Deeper => PartitioningMode::Deeper,
    };
    ctx.node_ordering = match args.node_order {
        NodeOrderArg::Natural => NodeOrdering::Natural,
        NodeOrderArg::DegBuckets => NodeOrdering::DegreeBuckets,
        NodeOrderArg::ImplicitDegBuckets => NodeOrdering::ImplicitDegreeBuckets,
    };
    ctx.compression.enabled = args.compress_in_memory;
    ctx.compression.interval_encoding = !args.no_interval_encoding;
    ctx.compression.high_degree_encoding = !args.no_high_degree_encoding;
    ctx.compression.parallel_chunk_size = args.compression_chunk_size.max(1);

    let format = match args.graph_file_format {
        FileFormatArg::Metis => GraphFileFormat::Metis,
        FileFormatArg::Parhip => GraphFileFormat::Parhip,
        FileFormatArg::Mtx => GraphFileFormat::MatrixMarket,
    };

    let csr = read_graph(&args.graph, format)?;
    let input_n = csr.n();

    // Optional rearrangement; the permutation maps input ids to the ids the
    // partitioner works with.
    let (csr, old_to_new) = match ctx.node_ordering {
        NodeOrdering::Natural => (csr, None),
        NodeOrdering::DegreeBuckets => {
            let (sorted, perm) = rearrange_by_degree_buckets(&csr);
            (sorted, Some(perm))
        }
        NodeOrdering::ImplicitDegreeBuckets => (csr.assume_bucket_sorted(), None),
    };

    let mut graph = Graph::from_csr(csr, &ctx.compression);

    // Isolated nodes do not affect the cut; they are trimmed during
    // partitioning and assigned to the lightest blocks afterwards.
    let isolated = if graph.sorted() { graph.count_isolated_nodes() } else { 0 };
    graph.remove_isolated_nodes(isolated);

    let start = Instant::now();
    let p_graph = partition_graph(&graph, &ctx)?;
    let elapsed = start.elapsed();
    let edge_cut = p_graph.edge_cut(&graph);

    let mut partition = p_graph.copy_partition();
    graph.integrate_isolated_nodes();
    let mut block_weights = p_graph.block_weights();
    for u in partition.len()..graph.n() {
        let lightest = block_weights
            .iter()
            .enumerate()
            .min_by_key(|&(b, &w)| (w, b))
            .map(|(b, _)| b)
            .expect("at least one block");
        block_weights[lightest] += graph.node_weight(u);
        partition.push(lightest);
    }

    // Report in terms of the input node order.
    let (partition, node_weights): (Vec<BlockId>, Vec<_>) = match &old_to_new {
        Some(perm) => (
            (0..input_n as NodeId).map(|u| partition[perm[u]]).collect(),
            (0..input_n as NodeId).map(|u| graph.node_weight(perm[u])).collect(),
        ),
        None => (partition, (0..graph.n()).map(|u| graph.node_weight(u)).collect()),
    };

    println!("Edge cut {edge_cut}");
    println!("Imbalance {:?}", imbalance(args.k, &partition, node_weights));
    println!("Execution time {elapsed:?}");

    if let Some(output) = &args.output {
        write_partition_data_to_file(&partition, output)?;
    }

    Ok(())
}
