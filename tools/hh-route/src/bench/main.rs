//! Benchmark harness for point-to-point queries
//!
//! Supports:
//! - Random vertex-pair queries, sequential or spread over a rayon pool
//! - Cache budget sweeps over the same query workload
//!
//! Outputs: p50/p95/p99 times + search counters + cache statistics

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hdrhistogram::Histogram;
use hh_route::logging::{init_logging, LogFormat};
use hh_route::query::SearchStats;
use hh_route::store::CacheStats;
use hh_route::{Engine, EngineConfig, VertexId};
use rand::prelude::*;
use rayon::prelude::*;

#[derive(Parser)]
#[command(name = "hh-bench")]
#[command(about = "Benchmark harness for hh-route query performance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Time random shortest-path queries
    Queries {
        /// Artifact to query
        artifact: PathBuf,

        /// Number of random vertex pairs
        #[arg(long, default_value = "1000")]
        n_queries: usize,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Run queries on a rayon pool of this many threads (1 = sequential)
        #[arg(long, default_value = "1")]
        threads: usize,

        /// Block cache budget in MiB
        #[arg(long, default_value = "64")]
        cache_mb: u64,

        /// Ignore the artifact's distance table
        #[arg(long)]
        no_distance_table: bool,
    },

    /// Run the same workload under several cache budgets
    CacheSweep {
        artifact: PathBuf,

        /// Budgets in KiB
        #[arg(long, value_delimiter = ',', default_value = "64,256,1024,4096,16384")]
        budgets_kb: Vec<u64>,

        #[arg(long, default_value = "500")]
        n_queries: usize,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[derive(Default)]
struct Totals {
    found: u64,
    unreachable: u64,
    settled: u64,
    relaxed: u64,
    ascents: u64,
    table_entries: u64,
    route_edges: u64,
}

impl Totals {
    fn add(&mut self, stats: &SearchStats, edges: usize) {
        self.found += 1;
        self.settled += stats.settled.iter().sum::<u64>();
        self.relaxed += stats.relaxed.iter().sum::<u64>();
        self.ascents += stats.ascents;
        self.table_entries += stats.table_entries.iter().sum::<u64>();
        self.route_edges += edges as u64;
    }

    fn merge(&mut self, other: Totals) {
        self.found += other.found;
        self.unreachable += other.unreachable;
        self.settled += other.settled;
        self.relaxed += other.relaxed;
        self.ascents += other.ascents;
        self.table_entries += other.table_entries;
        self.route_edges += other.route_edges;
    }
}

fn open_engine(artifact: &Path, cache_bytes: u64, use_distance_table: bool) -> Result<Engine> {
    let config = EngineConfig {
        cache_bytes,
        use_distance_table,
        ..Default::default()
    };
    let load_start = Instant::now();
    let engine = Engine::open(artifact, config).with_context(|| format!("opening {}", artifact.display()))?;
    println!("  ✓ Loaded in {:.1} ms", load_start.elapsed().as_secs_f64() * 1000.0);
    println!("  ✓ Level-0 vertices: {}", engine.num_vertices());
    println!("  ✓ Levels: {}", engine.header().num_levels());
    Ok(engine)
}

fn random_pairs(engine: &Engine, n: usize, seed: u64) -> Vec<(VertexId, VertexId)> {
    let vertices = engine.level_zero_vertices();
    if vertices.is_empty() {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            (
                vertices[rng.random_range(0..vertices.len())],
                vertices[rng.random_range(0..vertices.len())],
            )
        })
        .collect()
}

/// One timed query. Unreachable pairs count but are not timed.
fn timed_query(engine: &Engine, s: VertexId, t: VertexId, hist: &mut Histogram<u64>, totals: &mut Totals) -> Result<()> {
    let start = Instant::now();
    match engine.route(s, t, None)? {
        Some((route, stats)) => {
            hist.record(start.elapsed().as_micros().max(1) as u64)?;
            totals.add(&stats, route.edges.len());
        }
        None => totals.unreachable += 1,
    }
    Ok(())
}

fn run_queries(
    artifact: &Path,
    n_queries: usize,
    seed: u64,
    threads: usize,
    cache_mb: u64,
    no_distance_table: bool,
) -> Result<()> {
    println!("[1/2] Opening {}", artifact.display());
    let engine = open_engine(artifact, cache_mb * 1024 * 1024, !no_distance_table)?;
    let pairs = random_pairs(&engine, n_queries, seed);
    println!();

    println!("[2/2] Running {} queries on {} thread(s)...", pairs.len(), threads.max(1));
    let wall = Instant::now();
    let (hist, totals) = if threads <= 1 {
        let mut hist = Histogram::<u64>::new(3)?;
        let mut totals = Totals::default();
        for &(s, t) in &pairs {
            timed_query(&engine, s, t, &mut hist, &mut totals)?;
        }
        (hist, totals)
    } else {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
        let merged = Mutex::new((Histogram::<u64>::new(3)?, Totals::default()));
        pool.install(|| {
            pairs.par_chunks(64).try_for_each(|chunk| -> Result<()> {
                let mut hist = Histogram::<u64>::new(3)?;
                let mut totals = Totals::default();
                for &(s, t) in chunk {
                    timed_query(&engine, s, t, &mut hist, &mut totals)?;
                }
                let mut guard = merged.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
                guard.0.add(&hist)?;
                guard.1.merge(totals);
                Ok(())
            })
        })?;
        merged.into_inner().map_err(|_| anyhow::anyhow!("poisoned"))?
    };
    let wall = wall.elapsed();
    println!();

    print_histogram_stats("Query", &hist);
    print_totals(&totals);
    print_cache_stats(&engine.cache_stats());
    println!(
        "  Throughput: {:.1} queries/sec",
        pairs.len() as f64 / wall.as_secs_f64().max(f64::EPSILON)
    );
    println!();
    Ok(())
}

fn run_cache_sweep(artifact: &Path, budgets_kb: &[u64], n_queries: usize, seed: u64) -> Result<()> {
    println!("───────────────────────────────────────────────────────────────");
    println!("  {:>10} {:>10} {:>10} {:>10} {:>10}", "budget KB", "p50 μs", "p99 μs", "hit rate", "evictions");
    println!("───────────────────────────────────────────────────────────────");
    for &kb in budgets_kb {
        let engine = Engine::open(
            artifact,
            EngineConfig {
                cache_bytes: (kb * 1024).max(1),
                ..Default::default()
            },
        )
        .with_context(|| format!("opening {}", artifact.display()))?;
        let pairs = random_pairs(&engine, n_queries, seed);
        let mut hist = Histogram::<u64>::new(3)?;
        let mut totals = Totals::default();
        for &(s, t) in &pairs {
            timed_query(&engine, s, t, &mut hist, &mut totals)?;
        }
        let cache = engine.cache_stats();
        let lookups = (cache.hits + cache.misses).max(1);
        println!(
            "  {:>10} {:>10} {:>10} {:>9.1}% {:>10}",
            kb,
            hist.value_at_quantile(0.50),
            hist.value_at_quantile(0.99),
            100.0 * cache.hits as f64 / lookups as f64,
            cache.evictions
        );
    }
    println!();
    Ok(())
}

fn print_histogram_stats(name: &str, hist: &Histogram<u64>) {
    println!("───────────────────────────────────────────────────────────────");
    println!("  {} timing (μs)", name);
    println!("───────────────────────────────────────────────────────────────");
    println!("    min:    {:>10.0}", hist.min() as f64);
    println!("    p50:    {:>10.0}", hist.value_at_quantile(0.50) as f64);
    println!("    p95:    {:>10.0}", hist.value_at_quantile(0.95) as f64);
    println!("    p99:    {:>10.0}", hist.value_at_quantile(0.99) as f64);
    println!("    max:    {:>10.0}", hist.max() as f64);
    println!("    mean:   {:>10.1}", hist.mean());
}

fn print_totals(totals: &Totals) {
    let n = totals.found.max(1);
    println!("───────────────────────────────────────────────────────────────");
    println!("  COUNTERS (averages over {} routes, {} unreachable)", totals.found, totals.unreachable);
    println!("───────────────────────────────────────────────────────────────");
    println!("  Settled:        {:>12}", format_number(totals.settled / n));
    println!("  Relaxed:        {:>12}", format_number(totals.relaxed / n));
    println!("  Ascents:        {:>12}", format_number(totals.ascents / n));
    println!("  Table entries:  {:>12}", format_number(totals.table_entries / n));
    println!("  Route edges:    {:>12}", format_number(totals.route_edges / n));
}

fn print_cache_stats(cache: &CacheStats) {
    println!("───────────────────────────────────────────────────────────────");
    println!("  BLOCK CACHE");
    println!("───────────────────────────────────────────────────────────────");
    println!("  Hits:           {:>12}", format_number(cache.hits));
    println!("  Misses:         {:>12}", format_number(cache.misses));
    println!("  Evictions:      {:>12}", format_number(cache.evictions));
    println!("  Resident:       {:>12}", format_number(cache.entries));
    println!("  Weighted KB:    {:>12}", format_number(cache.weighted_bytes / 1024));
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

fn main() -> Result<()> {
    init_logging(LogFormat::Human, "warn");
    let cli = Cli::parse();

    match cli.command {
        Commands::Queries {
            artifact,
            n_queries,
            seed,
            threads,
            cache_mb,
            no_distance_table,
        } => run_queries(&artifact, n_queries, seed, threads, cache_mb, no_distance_table),

        Commands::CacheSweep {
            artifact,
            budgets_kb,
            n_queries,
            seed,
        } => run_cache_sweep(&artifact, &budgets_kb, n_queries, seed),
    }
}
