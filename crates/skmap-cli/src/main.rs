use anyhow::Context;
use clap::{Parser, Subcommand};
use needletail::parse_fastx_file;
use skmap_lib::comm::spawn_group;
use skmap_lib::encoding::encode_base;
use skmap_lib::kmer::Kmer;
use skmap_lib::supermer::split_supermers_batch;
use skmap_lib::{Communicator, CountingConfig, KmerCountMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "skmap")]
#[command(version = "0.1.0")]
#[command(about = "Distributed supermer-routed k-mer counting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count k-mers of a FASTA/FASTQ file across an in-process rank group
    Count {
        /// Input FASTA/FASTQ file
        #[arg(short, long)]
        input: String,

        /// K-mer length
        #[arg(short, long)]
        k: usize,

        /// Minimizer length
        #[arg(short, long)]
        m: usize,

        /// Number of ranks in the group
        #[arg(short = 'r', long, default_value = "4")]
        ranks: usize,
    },

    /// Count k-mers, then look up queries from a text file (one k-mer per line)
    Query {
        /// Input FASTA/FASTQ file
        #[arg(short, long)]
        input: String,

        /// K-mer length
        #[arg(short, long)]
        k: usize,

        /// Minimizer length
        #[arg(short, long)]
        m: usize,

        /// Number of ranks in the group
        #[arg(short = 'r', long, default_value = "4")]
        ranks: usize,

        /// Query file with one k-mer per line
        #[arg(short, long)]
        queries: String,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Count { input, k, m, ranks } => count_command(&input, k, m, ranks, None)?,
        Commands::Query {
            input,
            k,
            m,
            ranks,
            queries,
        } => count_command(&input, k, m, ranks, Some(&queries))?,
    }

    Ok(())
}

fn count_command(
    input: &str,
    k: usize,
    m: usize,
    ranks: usize,
    query_file: Option<&str>,
) -> anyhow::Result<()> {
    anyhow::ensure!(ranks > 0, "rank group must have at least one rank");
    let config = CountingConfig::new(k, m)?;

    info!("Counting k-mers");
    info!("  input: {}", input);
    info!("  k: {}, m: {}, ranks: {}", k, m, ranks);

    let sequences = Arc::new(read_sequences(input, k)?);
    info!("  loaded {} ACGT segments", sequences.len());

    let queries: Arc<Vec<Kmer>> = Arc::new(match query_file {
        Some(path) => read_queries(path, k)?,
        None => Vec::new(),
    });

    let results = spawn_group(ranks, |comm| -> anyhow::Result<RankReport> {
        let rank = comm.rank();

        // shard sequences round-robin across the group
        let shard: Vec<Vec<u8>> = sequences
            .iter()
            .enumerate()
            .filter(|(i, _)| i % comm.size() == rank)
            .map(|(_, seq)| seq.clone())
            .collect();
        let supermers = split_supermers_batch(&shard, k, m);

        let mut map = KmerCountMap::new(comm, config.clone())?;
        map.insert_supermers(supermers);

        // queries enter on rank 0 only; the other ranks still take part
        // in the collective exchange with empty batches
        let batch = if rank == 0 { queries.as_ref().clone() } else { Vec::new() };
        let counts = map.count(batch);

        Ok(RankReport {
            rank,
            local_distinct: map.local_unique_size(),
            local_total: map.local_kmer_total(),
            global_distinct: map.size(),
            global_total: map.global_kmer_total(),
            counts,
        })
    });

    let mut reports = Vec::with_capacity(ranks);
    for result in results {
        reports.push(result?);
    }

    for report in &reports {
        info!(
            "  rank {}: {} distinct k-mers, {} total occurrences",
            report.rank, report.local_distinct, report.local_total
        );
    }
    let first = &reports[0];
    println!(
        "{} distinct k-mers, {} total occurrences across {} ranks",
        first.global_distinct, first.global_total, ranks
    );

    if query_file.is_some() {
        for (kmer, count) in &first.counts {
            println!("{}\t{}", kmer, count);
        }
    }

    Ok(())
}

struct RankReport {
    rank: usize,
    local_distinct: usize,
    local_total: u64,
    global_distinct: u64,
    global_total: u64,
    counts: Vec<(Kmer, u64)>,
}

/// Read a FASTA/FASTQ file and split every record into encoded ACGT
/// segments at ambiguous bases; segments shorter than k are dropped.
fn read_sequences(path: &str, k: usize) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut reader =
        parse_fastx_file(path).with_context(|| format!("Failed to open {}", path))?;
    let mut segments = Vec::new();
    let mut skipped = 0usize;
    while let Some(record) = reader.next() {
        let record = record?;
        let seq = record.seq();
        let mut current: Vec<u8> = Vec::new();
        for &base in seq.iter() {
            match encode_base(base) {
                Ok(code) => current.push(code),
                Err(_) => {
                    if current.len() >= k {
                        segments.push(std::mem::take(&mut current));
                    } else {
                        skipped += current.len();
                        current.clear();
                    }
                }
            }
        }
        if current.len() >= k {
            segments.push(current);
        }
    }
    if skipped > 0 {
        warn!("dropped {} bases in sub-k segments around ambiguous bases", skipped);
    }
    Ok(segments)
}

/// Read query k-mers, one per line; blank lines are skipped
fn read_queries(path: &str, k: usize) -> anyhow::Result<Vec<Kmer>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
    let mut queries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        anyhow::ensure!(
            line.len() == k,
            "query {:?} is not a {}-mer",
            line,
            k
        );
        queries.push(Kmer::parse(line)?);
    }
    Ok(queries)
}
